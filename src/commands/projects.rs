use reqwest::Method;
use serde_json::{json, Map, Value};
use tabled::Tabled;

use crate::cache::{keys, Mutation, QueryOptions, AGENT_STALE_TIME};
use crate::cli::{MemberArgs, ProjectArgs, ProjectUpdateArgs};
use crate::context::AppContext;
use crate::error::{FieldError, Result, TmsError};
use crate::output::{self, print_field, truncate};
use crate::responses::{ProjectPayload, ProjectsPage};
use crate::types::{Agent, Project, ProjectMember};

use super::fetch;

#[derive(Tabled)]
pub(crate) struct ProjectRow {
    #[tabled(rename = "Code")]
    code: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Members")]
    members: usize,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&Project> for ProjectRow {
    fn from(project: &Project) -> Self {
        Self {
            code: project.project_code.clone().unwrap_or_default(),
            name: truncate(&project.name, 40),
            status: project.status.clone().unwrap_or_default(),
            members: project.members.len(),
            id: project.id.clone(),
        }
    }
}

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "User ID")]
    user_id: String,
}

impl From<&ProjectMember> for MemberRow {
    fn from(member: &ProjectMember) -> Self {
        Self {
            name: member.name.clone(),
            email: member.email.clone(),
            role: member.role.clone().unwrap_or_default(),
            user_id: member.user_id.clone(),
        }
    }
}

#[derive(Tabled)]
struct AgentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Email")]
    email: String,
    #[tabled(rename = "Role")]
    role: String,
    #[tabled(rename = "ID")]
    id: String,
}

impl From<&Agent> for AgentRow {
    fn from(agent: &Agent) -> Self {
        Self {
            name: agent.name.clone(),
            email: agent.email.clone(),
            role: agent.role.map(|r| r.to_string()).unwrap_or_default(),
            id: agent.id.clone(),
        }
    }
}

pub async fn list(ctx: &AppContext) -> Result<()> {
    let page: ProjectsPage = fetch(ctx, keys::projects(), "/projects").await?;

    if page.projects.is_empty() {
        output::print_message("No projects yet");
        return Ok(());
    }

    output::print_table(&page.projects, |p| ProjectRow::from(p));
    Ok(())
}

/// Members of a project, shared with the comment composer.
pub(crate) async fn fetch_members(ctx: &AppContext, project_id: &str) -> Result<Vec<ProjectMember>> {
    fetch(
        ctx,
        keys::project_members(project_id),
        &format!("/projects/{project_id}/members"),
    )
    .await
}

pub async fn show(ctx: &AppContext, id: &str) -> Result<()> {
    let project = fetch::<ProjectPayload>(ctx, keys::project(id), &format!("/projects/{id}"))
        .await?
        .into_project();

    output::print_item(&project, |p| {
        println!("{}", p.name);
        println!();
        if let Some(desc) = &p.description {
            println!("{desc}");
            println!();
        }
        print_field("Code", p.project_code.as_deref());
        print_field("Status", p.status.as_deref());
        print_field("Owner", p.owner_name.as_deref());
        print_field("ID", Some(&p.id));
    });

    if !output::is_json_output() && !project.members.is_empty() {
        println!();
        output::print_table(&project.members, |m| MemberRow::from(m));
    }
    Ok(())
}

pub async fn create(ctx: &AppContext, args: ProjectArgs) -> Result<()> {
    if args.name.trim().chars().count() < 2 {
        return Err(TmsError::validation(vec![FieldError::new(
            "name",
            "Name must be at least 2 characters",
        )]));
    }

    let body = json!({
        "name": args.name,
        "project_code": args.code,
        "description": args.description,
    });
    let project = ctx
        .cache
        .mutate(
            Mutation::CreateProject,
            ctx.client.request::<ProjectPayload>(Method::POST, "/projects", Some(body)),
        )
        .await?
        .into_project();

    output::print_message(&format!("Created project {} ({})", project.name, project.id));
    Ok(())
}

pub async fn update(ctx: &AppContext, id: &str, fields: ProjectUpdateArgs) -> Result<()> {
    let mut body = Map::new();
    if let Some(name) = fields.name {
        body.insert("name".to_string(), json!(name));
    }
    if let Some(description) = fields.description {
        body.insert("description".to_string(), json!(description));
    }
    if let Some(status) = fields.status {
        body.insert("status".to_string(), json!(status));
    }

    if body.is_empty() {
        output::print_message("No updates specified");
        return Ok(());
    }

    ctx.cache
        .mutate(
            Mutation::UpdateProject,
            ctx.client
                .execute(Method::PATCH, &format!("/projects/{id}"), Some(Value::Object(body))),
        )
        .await?;
    ctx.cache.invalidate(&keys::project(id));

    output::print_message(&format!("Updated project {id}"));
    Ok(())
}

pub async fn delete(ctx: &AppContext, id: &str) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::DeleteProject,
            ctx.client.execute(Method::DELETE, &format!("/projects/{id}"), None),
        )
        .await?;
    output::print_message(&format!("Deleted project {id}"));
    Ok(())
}

pub async fn members(ctx: &AppContext, id: &str) -> Result<()> {
    let members = fetch_members(ctx, id).await?;

    if members.is_empty() {
        output::print_message(&format!("No members in project {id}"));
        return Ok(());
    }

    output::print_table(&members, |m| MemberRow::from(m));
    Ok(())
}

pub async fn add_member(ctx: &AppContext, args: MemberArgs) -> Result<()> {
    let body = json!({ "user_id": args.user, "role": args.role });
    ctx.cache
        .mutate(
            Mutation::AddMember,
            ctx.client
                .execute(Method::POST, &format!("/projects/{}/members", args.id), Some(body)),
        )
        .await?;
    output::print_message(&format!("Added {} to project {}", args.user, args.id));
    Ok(())
}

pub async fn update_member(ctx: &AppContext, id: &str, member_id: &str, role: &str) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::UpdateMember,
            ctx.client.execute(
                Method::PATCH,
                &format!("/projects/{id}/members/{member_id}"),
                Some(json!({ "role": role })),
            ),
        )
        .await?;
    output::print_message(&format!("Member {member_id} is now {role}"));
    Ok(())
}

pub async fn remove_member(ctx: &AppContext, id: &str, member_id: &str) -> Result<()> {
    ctx.cache
        .mutate(
            Mutation::RemoveMember,
            ctx.client
                .execute(Method::DELETE, &format!("/projects/{id}/members/{member_id}"), None),
        )
        .await?;
    output::print_message(&format!("Removed {member_id} from project {id}"));
    Ok(())
}

pub async fn agents(ctx: &AppContext, search: &str) -> Result<()> {
    let search = search.trim();
    // Lookups start at two characters.
    if search.chars().count() < 2 {
        return Err(TmsError::validation(vec![FieldError::new(
            "search",
            "Type at least 2 characters",
        )]));
    }

    let query = [("search", search.to_string())];
    let agents: Vec<Agent> = ctx
        .cache
        .query(
            keys::agents(search),
            QueryOptions::stale_for(AGENT_STALE_TIME),
            || ctx.client.request_with_query(Method::GET, "/projects/agents", &query, None),
        )
        .await?;

    if agents.is_empty() {
        output::print_message(&format!("No agents matching \"{search}\""));
        return Ok(());
    }

    output::print_table(&agents, |a| AgentRow::from(a));
    Ok(())
}
