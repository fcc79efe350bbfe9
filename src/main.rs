mod board;
mod cache;
mod cli;
mod client;
mod commands;
mod composer;
mod config;
mod context;
mod error;
mod export;
mod output;
mod realtime;
mod responses;
mod routes;
mod session;
mod sync;
mod types;
mod validation;

use std::error::Error;
use std::io;

use clap::{CommandFactory, Parser};
use clap_complete::generate;
use colored::Colorize;
use tracing::warn;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{Cli, Commands, PortalCommands, ProjectCommands, SubtaskCommands, TicketCommands};
use context::AppContext;
use error::Result;
use routes::Route;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_tracing(verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e.toast("Something went wrong, please try again"));

        if verbose {
            let mut source = e.source();
            while let Some(cause) = source {
                eprintln!("Caused by: {cause}");
                source = cause.source();
            }
        }

        std::process::exit(1);
    }
}

/// Logs go to stderr so `--json` output stays clean. `RUST_LOG` wins over
/// `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "tms=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

/// The screen a command belongs to, for the role check. `None` for commands
/// that belong to no screen.
fn route_for(command: &Commands) -> Option<Route> {
    match command {
        Commands::Login(_) => Some(Route::Login),
        Commands::Register(_) => Some(Route::Register),
        Commands::Logout
        | Commands::Theme { .. }
        | Commands::Completions { .. }
        | Commands::Init => None,
        Commands::Whoami | Commands::Dashboard => Some(Route::Dashboard),
        Commands::Project { .. } | Commands::Projects | Commands::Agents { .. } => {
            Some(Route::Projects)
        }
        Commands::Ticket { .. } | Commands::Tickets(_) => Some(Route::Tickets),
        Commands::Board(_) => Some(Route::Board),
        Commands::MyTickets { .. } => Some(Route::Client),
        Commands::Export(_) => Some(Route::Reports),
    }
}

async fn run(cli: Cli) -> Result<()> {
    output::set_json_output(cli.json);
    output::set_quiet(cli.quiet);

    match cli.command {
        // Commands that don't require config/session
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "tms", &mut io::stdout());
            Ok(())
        }
        Commands::Init => commands::init::run().await,
        command => {
            let mut ctx = AppContext::load()?;
            let result = dispatch(&mut ctx, command).await;

            if let Err(e) = &result {
                if e.requires_logout() {
                    ctx.force_logout();
                }
            }
            if let Err(e) = ctx.shutdown() {
                warn!(error = %e, "failed to persist session");
            }
            result
        }
    }
}

async fn dispatch(ctx: &mut AppContext, command: Commands) -> Result<()> {
    // Public screens skip the session restore.
    if let Some(route) = route_for(&command).filter(|route| !route.is_public()) {
        ctx.enter(route).await?;
    }

    match command {
        Commands::Login(args) => commands::auth::login(ctx, args).await,
        Commands::Register(args) => commands::auth::register(ctx, args).await,
        Commands::Logout => commands::auth::logout(ctx).await,
        Commands::Whoami => commands::auth::whoami(ctx),
        Commands::Theme { show } => commands::auth::theme(ctx, show),
        Commands::Dashboard => commands::dashboard::show(ctx).await,
        Commands::Projects => commands::projects::list(ctx).await,
        Commands::Project { action } => match action {
            ProjectCommands::List => commands::projects::list(ctx).await,
            ProjectCommands::Show { id } => commands::projects::show(ctx, &id).await,
            ProjectCommands::Create(args) => commands::projects::create(ctx, args).await,
            ProjectCommands::Update { id, fields } => {
                commands::projects::update(ctx, &id, fields).await
            }
            ProjectCommands::Delete { id } => commands::projects::delete(ctx, &id).await,
            ProjectCommands::Members { id } => commands::projects::members(ctx, &id).await,
            ProjectCommands::AddMember(args) => commands::projects::add_member(ctx, args).await,
            ProjectCommands::UpdateMember {
                id,
                member_id,
                role,
            } => commands::projects::update_member(ctx, &id, &member_id, &role).await,
            ProjectCommands::RemoveMember { id, member_id } => {
                commands::projects::remove_member(ctx, &id, &member_id).await
            }
        },
        Commands::Agents { search } => commands::projects::agents(ctx, &search).await,
        Commands::Tickets(args) => commands::tickets::list(ctx, args).await,
        Commands::Ticket { action } => ticket(ctx, action).await,
        Commands::Board(args) => commands::board::run(ctx, args).await,
        Commands::MyTickets { action } => match action.unwrap_or(PortalCommands::List) {
            PortalCommands::List => commands::tickets::portal_list(ctx).await,
            PortalCommands::Create(args) => commands::tickets::portal_create(ctx, args).await,
        },
        Commands::Export(args) => commands::export::run(ctx, args).await,
        Commands::Completions { .. } | Commands::Init => {
            // Already handled in `run`
            Ok(())
        }
    }
}

async fn ticket(ctx: &AppContext, action: TicketCommands) -> Result<()> {
    match action {
        TicketCommands::List(args) => commands::tickets::list(ctx, args).await,
        TicketCommands::Show { id } => commands::tickets::show(ctx, &id).await,
        TicketCommands::Create(args) => commands::tickets::create(ctx, args).await,
        TicketCommands::Update(args) => commands::tickets::update(ctx, args).await,
        TicketCommands::Status { id, status } => {
            commands::tickets::set_status(ctx, &id, status).await
        }
        TicketCommands::Delete { id } => commands::tickets::delete(ctx, &id).await,
        TicketCommands::History { id } => commands::tickets::history(ctx, &id).await,
        TicketCommands::Approvals { id } => commands::tickets::approvals(ctx, &id).await,
        TicketCommands::RequestApproval { id, comment } => {
            commands::tickets::request_approval(ctx, &id, comment).await
        }
        TicketCommands::Comments { id } => commands::comments::list(ctx, &id).await,
        TicketCommands::Comment(args) => commands::comments::add(ctx, args).await,
        TicketCommands::Compose { id, internal } => {
            commands::comments::compose(ctx, &id, internal).await
        }
        TicketCommands::Subtask { action } => match action {
            SubtaskCommands::List { ticket_id } => {
                commands::subtasks::list(ctx, &ticket_id).await
            }
            SubtaskCommands::Add {
                ticket_id,
                title,
                story_points,
                assignee,
            } => commands::subtasks::add(ctx, &ticket_id, &title, story_points, assignee).await,
            SubtaskCommands::Update {
                ticket_id,
                subtask_id,
                status,
                title,
            } => commands::subtasks::update(ctx, &ticket_id, &subtask_id, status, title).await,
            SubtaskCommands::Delete {
                ticket_id,
                subtask_id,
            } => commands::subtasks::delete(ctx, &ticket_id, &subtask_id).await,
        },
        TicketCommands::Attachments { id } => commands::attachments::list(ctx, &id).await,
        TicketCommands::Upload { id, files } => {
            commands::attachments::upload(ctx, &id, &files).await
        }
    }
}
