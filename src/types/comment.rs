use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub ticket_id: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub comment_text: String,
    #[serde(default)]
    pub is_internal: bool,
    pub created_at: String,
}

/// Ticket audit trail entry.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HistoryEntry {
    pub id: String,
    pub action: Option<String>,
    pub field_name: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub changed_by_name: Option<String>,
    pub created_at: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Approval {
    pub id: String,
    pub status: String,
    pub requested_by_name: Option<String>,
    pub approver_name: Option<String>,
    pub comments: Option<String>,
    pub created_at: String,
}
