use serde::{Deserialize, Serialize};

use super::TicketStatus;

/// Lightweight child of a ticket with its own status and assignee.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Subtask {
    pub id: String,
    pub ticket_id: String,
    pub title: String,
    pub status: TicketStatus,
    pub story_points: Option<u32>,
    pub assignee_id: Option<String>,
    pub assignee_name: Option<String>,
}
