use std::fmt;

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use super::{Subtask, TicketPriority};

/// Workflow status shared by tickets and subtasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    Todo,
    InProgress,
    InReview,
    Done,
    Closed,
}

impl TicketStatus {
    /// Columns shown on the kanban board, left to right.
    pub const BOARD_COLUMNS: [TicketStatus; 4] = [
        TicketStatus::Todo,
        TicketStatus::InProgress,
        TicketStatus::InReview,
        TicketStatus::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "OPEN",
            TicketStatus::Todo => "TODO",
            TicketStatus::InProgress => "IN_PROGRESS",
            TicketStatus::InReview => "IN_REVIEW",
            TicketStatus::Done => "DONE",
            TicketStatus::Closed => "CLOSED",
        }
    }

    /// Human label, e.g. "IN PROGRESS".
    pub fn label(self) -> String {
        self.as_str().replace('_', " ")
    }

    pub fn colored(self) -> String {
        let label = self.label();
        match self {
            TicketStatus::Done | TicketStatus::Closed => label.green().to_string(),
            TicketStatus::InProgress => label.blue().to_string(),
            TicketStatus::InReview => label.yellow().to_string(),
            TicketStatus::Open | TicketStatus::Todo => label.bright_black().to_string(),
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkCategory {
    Development,
    Bau,
    Support,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkType {
    NewFeature,
    BugFix,
    Enhancement,
    Maintenance,
    Incident,
}

impl WorkCategory {
    /// Work types that may be filed under this category.
    pub fn work_types(self) -> &'static [WorkType] {
        match self {
            WorkCategory::Development => &[
                WorkType::NewFeature,
                WorkType::BugFix,
                WorkType::Enhancement,
            ],
            WorkCategory::Bau => &[WorkType::Maintenance, WorkType::Enhancement],
            WorkCategory::Support => &[WorkType::Incident, WorkType::BugFix],
        }
    }

    pub fn allows(self, work_type: WorkType) -> bool {
        self.work_types().contains(&work_type)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkCategory::Development => "DEVELOPMENT",
            WorkCategory::Bau => "BAU",
            WorkCategory::Support => "SUPPORT",
        }
    }
}

impl fmt::Display for WorkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl WorkType {
    pub fn label(self) -> &'static str {
        match self {
            WorkType::NewFeature => "New Feature",
            WorkType::BugFix => "Bug Fix",
            WorkType::Enhancement => "Enhancement",
            WorkType::Maintenance => "Maintenance",
            WorkType::Incident => "Incident",
        }
    }
}

/// Completed/total subtask pair shown on cards and in the detail view.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubtaskProgress {
    pub completed: usize,
    pub total: usize,
}

impl SubtaskProgress {
    pub fn from_subtasks(subtasks: &[Subtask]) -> Self {
        Self {
            completed: subtasks
                .iter()
                .filter(|s| s.status == TicketStatus::Done)
                .count(),
            total: subtasks.len(),
        }
    }
}

impl fmt::Display for SubtaskProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.total)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Ticket {
    pub id: String,
    #[serde(default)]
    pub ticket_number: String,
    pub project_id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: TicketStatus,
    #[serde(default)]
    pub priority: TicketPriority,
    pub work_category: Option<WorkCategory>,
    pub work_type: Option<WorkType>,
    pub story_points: Option<u32>,
    pub reporter_id: Option<String>,
    pub reporter_name: Option<String>,
    pub assignee_id: Option<String>,
    pub assignee_name: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Server-computed subtask counts, when the endpoint includes them.
    pub subtask_stats: Option<SubtaskProgress>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Ticket {
    pub fn subtask_progress(&self) -> SubtaskProgress {
        SubtaskProgress::from_subtasks(&self.subtasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ticket_json() -> serde_json::Value {
        json!({
            "id": "t-1",
            "ticket_number": "TMS-42",
            "project_id": "p-1",
            "title": "Login fails",
            "description": null,
            "status": "IN_PROGRESS",
            "priority": "HIGH",
            "work_category": "SUPPORT",
            "work_type": "INCIDENT",
            "story_points": 3,
            "assignee_name": "Ann Lee",
            "subtasks": [
                { "id": "s-1", "ticket_id": "t-1", "title": "Repro", "status": "DONE" },
                { "id": "s-2", "ticket_id": "t-1", "title": "Fix", "status": "IN_PROGRESS" },
                { "id": "s-3", "ticket_id": "t-1", "title": "Deploy", "status": "TODO" }
            ],
            "subtask_stats": { "completed": 1, "total": 3 }
        })
    }

    #[test]
    fn test_subtask_progress_matches_server_pair() {
        let ticket: Ticket = serde_json::from_value(ticket_json()).unwrap();
        assert_eq!(Some(ticket.subtask_progress()), ticket.subtask_stats);
        assert_eq!(ticket.subtask_progress().to_string(), "1/3");
    }

    #[test]
    fn test_subtask_progress_empty() {
        assert_eq!(
            SubtaskProgress::from_subtasks(&[]),
            SubtaskProgress { completed: 0, total: 0 }
        );
    }

    #[test]
    fn test_status_wire_format() {
        assert_eq!(
            serde_json::to_value(TicketStatus::InReview).unwrap(),
            json!("IN_REVIEW")
        );
        assert_eq!(TicketStatus::InProgress.label(), "IN PROGRESS");
    }

    #[test]
    fn test_work_types_by_category() {
        assert!(WorkCategory::Development.allows(WorkType::NewFeature));
        assert!(WorkCategory::Bau.allows(WorkType::Enhancement));
        assert!(!WorkCategory::Support.allows(WorkType::Maintenance));
        assert!(!WorkCategory::Bau.allows(WorkType::Incident));
    }
}
