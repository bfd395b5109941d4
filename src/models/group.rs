use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
}

/// Base permission tokens granted to the administrator group at install.
pub const BASE_PERMISSIONS: &[&str] = &[
    "manage_posts",
    "manage_users",
    "manage_groups",
    "manage_options",
    "view_logs",
];
