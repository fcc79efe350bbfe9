use colored::Colorize;

use crate::cache::keys;
use crate::context::AppContext;
use crate::error::Result;
use crate::output;
use crate::responses::ProjectsPage;

use super::fetch;
use super::projects::ProjectRow;

pub async fn show(ctx: &AppContext) -> Result<()> {
    let page: ProjectsPage = fetch(ctx, keys::projects(), "/projects").await?;

    if output::is_json_output() {
        output::print_item(&page, |_| {});
        return Ok(());
    }

    if let Some(user) = ctx.user() {
        println!("{}", format!("Welcome back, {}!", user.name).bold());
    }
    println!("Total projects: {}", page.projects.len().to_string().cyan());
    println!();

    if !page.projects.is_empty() {
        output::print_table(&page.projects, |p| ProjectRow::from(p));
    }
    Ok(())
}
