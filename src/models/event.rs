use serde::{Deserialize, Serialize};

/// One event-log row. `kind` is a registered log type (default, user,
/// authentication, content, comment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    pub id: i64,
    pub message: String,
    pub severity: String,
    pub kind: String,
    pub module: String,
    pub created_at: String,
}
