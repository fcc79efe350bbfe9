//! Shared REST response types used across commands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::FieldError;
use crate::types::{Project, Ticket, User};

/// Envelope every endpoint wraps its payload in.
#[derive(Deserialize)]
pub struct ApiEnvelope<T> {
    #[allow(dead_code)]
    pub success: Option<bool>,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<FieldError>,
}

/// Login, register and refresh responses.
#[derive(Deserialize, Debug, Clone)]
pub struct AuthPayload {
    pub user: Option<User>,
    #[serde(rename = "accessToken", alias = "access_token")]
    pub access_token: String,
    #[serde(rename = "refreshToken", alias = "refresh_token")]
    pub refresh_token: Option<String>,
}

/// Current user (`/auth/me`) response.
#[derive(Deserialize)]
pub struct MeResponse {
    pub user: User,
}

#[derive(Deserialize, Serialize)]
pub struct ProjectsPage {
    pub projects: Vec<Project>,
}

/// Ticket lists arrive either wrapped (`{"tickets": [...]}`) or bare.
#[derive(Deserialize, Serialize)]
#[serde(untagged)]
pub enum TicketList {
    Page { tickets: Vec<Ticket> },
    Plain(Vec<Ticket>),
}

impl TicketList {
    pub fn into_tickets(self) -> Vec<Ticket> {
        match self {
            TicketList::Page { tickets } | TicketList::Plain(tickets) => tickets,
        }
    }
}

/// Single project, wrapped (`{"project": {...}}`) or bare.
#[derive(Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProjectPayload {
    Wrapped { project: Project },
    Bare(Project),
}

impl ProjectPayload {
    pub fn into_project(self) -> Project {
        match self {
            ProjectPayload::Wrapped { project } | ProjectPayload::Bare(project) => project,
        }
    }
}

/// Card as returned by the board endpoints, grouped by status column.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct BoardCard {
    pub id: String,
    #[serde(default)]
    pub ticket_number: String,
    pub title: String,
    #[serde(default)]
    pub priority: crate::types::TicketPriority,
    pub assignee_name: Option<String>,
    pub story_points: Option<u32>,
    /// Set when the card represents a subtask rather than a ticket.
    pub parent_ticket_id: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct BoardPayload {
    #[serde(default)]
    pub columns: BTreeMap<String, Vec<BoardCard>>,
}

/// Minimal ticket info returned after create/update.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CreatedTicket {
    pub id: String,
    #[serde(default)]
    pub ticket_number: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ticket_list_accepts_both_shapes() {
        let ticket = json!({
            "id": "t-1", "project_id": "p-1", "title": "Broken login",
            "description": "Users cannot sign in", "status": "TODO"
        });
        let wrapped: TicketList = serde_json::from_value(json!({ "tickets": [ticket.clone()] })).unwrap();
        let bare: TicketList = serde_json::from_value(json!([ticket])).unwrap();
        assert_eq!(wrapped.into_tickets().len(), 1);
        assert_eq!(bare.into_tickets()[0].id, "t-1");
    }

    #[test]
    fn test_auth_payload_reads_camel_case_tokens() {
        let payload: AuthPayload = serde_json::from_value(json!({
            "accessToken": "a", "refreshToken": "r"
        }))
        .unwrap();
        assert_eq!(payload.access_token, "a");
        assert_eq!(payload.refresh_token.as_deref(), Some("r"));
        assert!(payload.user.is_none());
    }
}
