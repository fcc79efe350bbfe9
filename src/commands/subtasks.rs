use reqwest::Method;
use serde_json::{json, Map, Value};
use tabled::Tabled;

use crate::cache::{keys, Mutation};
use crate::context::AppContext;
use crate::error::{FieldError, Result, TmsError};
use crate::output::{self, truncate};
use crate::types::{Subtask, SubtaskProgress, TicketStatus};

use super::fetch;

#[derive(Tabled)]
struct SubtaskRow {
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Points")]
    points: String,
    #[tabled(rename = "Assignee")]
    assignee: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&Subtask> for SubtaskRow {
    fn from(subtask: &Subtask) -> Self {
        Self {
            title: truncate(&subtask.title, 50),
            status: subtask.status.colored(),
            points: subtask.story_points.map(|p| p.to_string()).unwrap_or_default(),
            assignee: subtask.assignee_name.clone().unwrap_or_default(),
            id: subtask.id.clone(),
        }
    }
}

pub(crate) async fn fetch_subtasks(ctx: &AppContext, ticket_id: &str) -> Result<Vec<Subtask>> {
    fetch(
        ctx,
        keys::subtasks(ticket_id),
        &format!("/tickets/{ticket_id}/subtasks"),
    )
    .await
}

pub(crate) fn print_subtasks(subtasks: &[Subtask]) {
    output::print_table(subtasks, |s| SubtaskRow::from(s));
}

pub async fn list(ctx: &AppContext, ticket_id: &str) -> Result<()> {
    let subtasks = fetch_subtasks(ctx, ticket_id).await?;

    if subtasks.is_empty() {
        output::print_message(&format!("No subtasks on {ticket_id}"));
        return Ok(());
    }

    if !output::is_json_output() {
        println!("{} done", SubtaskProgress::from_subtasks(&subtasks));
    }
    print_subtasks(&subtasks);
    Ok(())
}

pub async fn add(
    ctx: &AppContext,
    ticket_id: &str,
    title: &str,
    story_points: Option<u32>,
    assignee: Option<String>,
) -> Result<()> {
    if title.trim().is_empty() {
        return Err(TmsError::validation(vec![FieldError::new(
            "title",
            "Title is required",
        )]));
    }

    let body = json!({
        "title": title.trim(),
        "story_points": story_points,
        "assignee_id": assignee,
    });
    let subtask: Subtask = ctx
        .cache
        .mutate(
            Mutation::CreateSubtask {
                ticket_id: ticket_id.to_string(),
            },
            ctx.client
                .request(Method::POST, &format!("/tickets/{ticket_id}/subtasks"), Some(body)),
        )
        .await?;

    output::print_message(&format!("Added subtask {} ({})", subtask.title, subtask.id));
    Ok(())
}

pub async fn update(
    ctx: &AppContext,
    ticket_id: &str,
    subtask_id: &str,
    status: Option<TicketStatus>,
    title: Option<String>,
) -> Result<()> {
    let mut body = Map::new();
    if let Some(status) = status {
        body.insert("status".to_string(), json!(status));
    }
    if let Some(title) = title {
        body.insert("title".to_string(), json!(title));
    }

    if body.is_empty() {
        output::print_message("No updates specified");
        return Ok(());
    }

    ctx.cache
        .mutate(
            Mutation::UpdateSubtask {
                ticket_id: ticket_id.to_string(),
            },
            ctx.client.execute(
                Method::PATCH,
                &format!("/subtasks/{subtask_id}"),
                Some(Value::Object(body)),
            ),
        )
        .await?;

    output::print_message(&format!("Updated subtask {subtask_id}"));
    Ok(())
}

pub async fn delete(ctx: &AppContext, ticket_id: &str, subtask_id: &str) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::DeleteSubtask {
                ticket_id: ticket_id.to_string(),
            },
            ctx.client
                .execute(Method::DELETE, &format!("/subtasks/{subtask_id}"), None),
        )
        .await?;

    output::print_message(&format!("Deleted subtask {subtask_id}"));
    Ok(())
}
