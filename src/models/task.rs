use serde::{Deserialize, Serialize};

/// A recurring maintenance job. The installer registers a daily
/// `truncate_log` task so the event log does not grow without bound.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub name: String,
    pub description: String,
    /// Seconds between runs
    pub period: i64,
    pub last_run: Option<String>,
}

pub const DAILY_SECS: i64 = 24 * 60 * 60;
