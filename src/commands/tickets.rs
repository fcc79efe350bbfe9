use colored::Colorize;
use reqwest::Method;
use serde_json::{json, Map, Value};
use tabled::Tabled;
use tracing::warn;

use crate::cache::{keys, Mutation};
use crate::cli::{TicketCreateArgs, TicketListArgs, TicketUpdateArgs};
use crate::context::AppContext;
use crate::error::{Result, TmsError};
use crate::output::{self, format_date, format_relative, print_field, truncate};
use crate::responses::{CreatedTicket, TicketList};
use crate::types::{Approval, HistoryEntry, SubtaskProgress, Ticket, TicketStatus};
use crate::validation::TicketForm;

use super::{attachments, comments, fetch, subtasks};

#[derive(Tabled)]
struct TicketRow {
    #[tabled(rename = "Number")]
    number: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Assignee")]
    assignee: String,
    #[tabled(rename = "Subtasks")]
    subtasks: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&Ticket> for TicketRow {
    fn from(ticket: &Ticket) -> Self {
        let progress = ticket.subtask_progress();
        Self {
            number: ticket.ticket_number.clone(),
            title: truncate(&ticket.title, 50),
            status: ticket.status.colored(),
            priority: ticket.priority.colored(),
            assignee: ticket.assignee_name.clone().unwrap_or_default(),
            subtasks: if progress.total == 0 {
                String::new()
            } else {
                progress.to_string()
            },
            id: ticket.id.clone(),
        }
    }
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "By")]
    by: String,
    #[tabled(rename = "Change")]
    change: String,
}

impl From<&HistoryEntry> for HistoryRow {
    fn from(entry: &HistoryEntry) -> Self {
        let change = match (&entry.field_name, &entry.old_value, &entry.new_value) {
            (Some(field), old, Some(new)) => format!(
                "{field}: {} -> {new}",
                old.as_deref().unwrap_or("-")
            ),
            _ => entry.action.clone().unwrap_or_default(),
        };
        Self {
            when: format_relative(&entry.created_at),
            by: entry.changed_by_name.clone().unwrap_or_default(),
            change: truncate(&change, 60),
        }
    }
}

#[derive(Tabled)]
struct ApprovalRow {
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Requested by")]
    requested_by: String,
    #[tabled(rename = "Approver")]
    approver: String,
    #[tabled(rename = "Comments")]
    comments: String,
    #[tabled(rename = "Created")]
    created: String,
}

impl From<&Approval> for ApprovalRow {
    fn from(approval: &Approval) -> Self {
        Self {
            status: approval.status.clone(),
            requested_by: approval.requested_by_name.clone().unwrap_or_default(),
            approver: approval.approver_name.clone().unwrap_or_default(),
            comments: truncate(approval.comments.as_deref().unwrap_or(""), 40),
            created: format_date(&approval.created_at),
        }
    }
}

fn print_tickets(tickets: &[Ticket], empty: &str) {
    if tickets.is_empty() {
        output::print_message(empty);
    } else {
        output::print_table(tickets, |t| TicketRow::from(t));
    }
}

pub async fn list(ctx: &AppContext, args: TicketListArgs) -> Result<()> {
    let project = ctx.config.resolve_project(args.project.as_deref())?;

    let filters = json!({
        "status": args.status,
        "priority": args.priority,
        "search": args.search,
    });
    let mut query = Vec::new();
    if let Some(status) = args.status {
        query.push(("status", status.as_str().to_string()));
    }
    if let Some(priority) = args.priority {
        query.push(("priority", priority.as_str().to_string()));
    }
    if let Some(search) = &args.search {
        query.push(("search", search.clone()));
    }

    let path = format!("/projects/{project}/tickets");
    let tickets = ctx
        .cache
        .query(keys::tickets(&project, &filters), Default::default(), || {
            ctx.client
                .request_with_query::<TicketList>(Method::GET, &path, &query, None)
        })
        .await?
        .into_tickets();

    print_tickets(&tickets, "No tickets found");
    Ok(())
}

pub(crate) async fn fetch_ticket(ctx: &AppContext, id: &str) -> Result<Ticket> {
    fetch(ctx, keys::ticket(id), &format!("/tickets/{id}")).await
}

pub async fn show(ctx: &AppContext, id: &str) -> Result<()> {
    let ticket = fetch_ticket(ctx, id).await?;
    let subtasks = subtasks::fetch_subtasks(ctx, id).await?;

    if output::is_json_output() {
        output::print_item(&json!({ "ticket": ticket, "subtasks": subtasks }), |_| {});
        return Ok(());
    }

    println!("{} {}", ticket.ticket_number.bold(), ticket.title.bold());
    println!();
    if let Some(desc) = &ticket.description {
        println!("{desc}");
        println!();
    }

    print_field("Status", Some(&ticket.status.colored()));
    print_field("Priority", Some(&ticket.priority.colored()));
    print_field("Category", ticket.work_category.map(|c| c.as_str()));
    print_field("Work type", ticket.work_type.map(|w| w.label()));
    print_field(
        "Points",
        ticket.story_points.map(|p| p.to_string()).as_deref(),
    );
    print_field("Reporter", ticket.reporter_name.as_deref());
    print_field("Assignee", ticket.assignee_name.as_deref());
    print_field("Created", ticket.created_at.as_deref().map(format_date).as_deref());

    let progress = SubtaskProgress::from_subtasks(&subtasks);
    if let Some(reported) = ticket.subtask_stats {
        if reported != progress {
            warn!(ticket = id, %reported, computed = %progress, "subtask counts disagree with server");
        }
    }

    if !subtasks.is_empty() {
        println!();
        println!("Subtasks ({progress} done)");
        subtasks::print_subtasks(&subtasks);
    }

    println!();
    comments::print_comments(&comments::fetch_comments(ctx, id).await?);
    attachments::print_attachments(&attachments::fetch_attachments(ctx, id).await?);
    Ok(())
}

fn ticket_form(ctx: &AppContext, args: TicketCreateArgs) -> Result<TicketForm> {
    let form = TicketForm {
        project_id: ctx.config.resolve_project(args.project.as_deref())?,
        title: args.title,
        description: args.description,
        priority: args.priority,
        work_category: args.category,
        work_type: args.work_type,
        story_points: args.story_points,
        assignee_id: args.assignee,
    };
    form.validate()?;
    Ok(form)
}

pub async fn create(ctx: &AppContext, args: TicketCreateArgs) -> Result<()> {
    let form = ticket_form(ctx, args)?;
    let created: CreatedTicket = ctx
        .cache
        .mutate(
            Mutation::CreateTicket,
            ctx.client
                .request(Method::POST, "/tickets", Some(serde_json::to_value(&form)?)),
        )
        .await?;

    output::print_message(&format!("Created {} - {}", created.ticket_number, created.title));
    Ok(())
}

pub async fn update(ctx: &AppContext, args: TicketUpdateArgs) -> Result<()> {
    let mut body = Map::new();
    if let Some(title) = args.title {
        body.insert("title".to_string(), json!(title));
    }
    if let Some(description) = args.description {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(priority) = args.priority {
        body.insert("priority".to_string(), json!(priority));
    }
    if let Some(status) = args.status {
        body.insert("status".to_string(), json!(status));
    }
    if let Some(points) = args.story_points {
        body.insert("story_points".to_string(), json!(points));
    }
    if let Some(assignee) = args.assignee {
        body.insert("assignee_id".to_string(), json!(assignee));
    }

    if body.is_empty() {
        output::print_message("No updates specified");
        return Ok(());
    }

    patch(ctx, &args.id, Value::Object(body)).await?;
    output::print_message(&format!("Updated {}", args.id));
    Ok(())
}

async fn patch(ctx: &AppContext, id: &str, body: Value) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::UpdateTicket {
                ticket_id: id.to_string(),
            },
            ctx.client.execute(Method::PATCH, &format!("/tickets/{id}"), Some(body)),
        )
        .await
}

pub async fn set_status(ctx: &AppContext, id: &str, status: TicketStatus) -> Result<()> {
    patch(ctx, id, json!({ "status": status })).await?;
    output::print_message(&format!("{id} is now {}", status.label()));
    Ok(())
}

pub async fn delete(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::DeleteTicket {
                ticket_id: id.to_string(),
            },
            ctx.client.execute(Method::DELETE, &format!("/tickets/{id}"), None),
        )
        .await?;
    output::print_message(&format!("Deleted {id}"));
    Ok(())
}

pub async fn history(ctx: &AppContext, id: &str) -> Result<()> {
    let entries: Vec<HistoryEntry> =
        fetch(ctx, keys::history(id), &format!("/tickets/{id}/history")).await?;

    if entries.is_empty() {
        output::print_message(&format!("No history for {id}"));
        return Ok(());
    }
    output::print_table(&entries, |e| HistoryRow::from(e));
    Ok(())
}

pub async fn approvals(ctx: &AppContext, id: &str) -> Result<()> {
    let approvals: Vec<Approval> =
        fetch(ctx, keys::approvals(id), &format!("/tickets/{id}/approvals")).await?;

    if approvals.is_empty() {
        output::print_message(&format!("No approval requests for {id}"));
        return Ok(());
    }
    output::print_table(&approvals, |a| ApprovalRow::from(a));
    Ok(())
}

pub async fn request_approval(ctx: &AppContext, id: &str, comment: Option<String>) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::RequestApproval {
                ticket_id: id.to_string(),
            },
            ctx.client.execute(
                Method::POST,
                &format!("/tickets/{id}/approvals"),
                Some(json!({ "comments": comment })),
            ),
        )
        .await?;
    output::print_message(&format!("Approval requested for {id}"));
    Ok(())
}

/// Client portal: tickets the signed-in user reported.
pub async fn portal_list(ctx: &AppContext) -> Result<()> {
    let user = ctx.user().ok_or(TmsError::Unauthorized)?;
    let query = [("reporter_id", user.id.clone())];

    let tickets = ctx
        .cache
        .query(keys::my_tickets(), Default::default(), || {
            ctx.client
                .request_with_query::<TicketList>(Method::GET, "/projects/all/tickets", &query, None)
        })
        .await?
        .into_tickets();

    print_tickets(&tickets, "You have not reported any tickets");
    Ok(())
}

pub async fn portal_create(ctx: &AppContext, args: TicketCreateArgs) -> Result<()> {
    let user = ctx.user().ok_or(TmsError::Unauthorized)?;
    let form = ticket_form(ctx, args)?;

    let mut body = serde_json::to_value(&form)?;
    if let Value::Object(map) = &mut body {
        map.insert("reporter_id".to_string(), json!(user.id));
    }

    let created: CreatedTicket = ctx
        .cache
        .mutate(
            Mutation::CreatePortalTicket,
            ctx.client.request(Method::POST, "/tickets", Some(body)),
        )
        .await?;

    output::print_message(&format!("Reported {} - {}", created.ticket_number, created.title));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::{SessionStore, TokenPair};

    #[tokio::test]
    async fn test_request_approval_posts_to_approvals() {
        let mut server = mockito::Server::new_async().await;
        let approve = server
            .mock("POST", "/tickets/t-1/approvals")
            .match_header("authorization", "Bearer access-1")
            .match_body(mockito::Matcher::PartialJson(
                json!({ "comments": "ready for sign-off" }),
            ))
            .with_body(r#"{"success":true}"#)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            api_url: Some(server.url()),
            ..Config::default()
        };
        let ctx = AppContext::new(config, SessionStore::load_from(dir.path().join("session.json")));
        ctx.client.set_tokens(Some(TokenPair {
            access_token: "access-1".into(),
            refresh_token: None,
        }));
        ctx.cache.set_data(keys::approvals("t-1"), &json!([])).unwrap();

        request_approval(&ctx, "t-1", Some("ready for sign-off".into()))
            .await
            .unwrap();

        approve.assert_async().await;
        assert!(ctx.cache.is_stale(&keys::approvals("t-1")));
    }
}
