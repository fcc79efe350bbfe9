use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

use crate::export::{ExportFormat, ExportKind};
use crate::types::{Role, TicketPriority, TicketStatus, WorkCategory, WorkType};

#[derive(Parser)]
#[command(name = "tms")]
#[command(about = "A CLI for the ticket management system", version)]
#[command(after_help = "EXAMPLES:
    tms login -e ann@example.com       Sign in
    tms tickets -p <project-id>        List tickets of a project
    tms ticket show <ticket-id>        Show ticket details
    tms board -p <project-id> --watch  Live kanban board
    tms export tickets --format csv    Download a ticket export")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output as JSON for scripting
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress confirmation messages
    #[arg(long, short, global = true)]
    pub quiet: bool,

    /// Log progress to stderr and print error causes
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in with email and password
    #[command(after_help = "EXAMPLES:
    tms login -e ann@example.com
    tms login -e ann@example.com -p secret1")]
    Login(LoginArgs),
    /// Create an account and sign in
    #[command(after_help = "EXAMPLES:
    tms register -n \"Ann Lee\" -e ann@example.com --role agent")]
    Register(RegisterArgs),
    /// Sign out and forget stored tokens
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Toggle or show the UI theme
    #[command(after_help = "EXAMPLES:
    tms theme
    tms theme --show")]
    Theme {
        /// Show the current theme without changing it
        #[arg(long)]
        show: bool,
    },
    /// Overview of your projects
    #[command(alias = "home")]
    Dashboard,
    /// Manage projects
    #[command(after_help = "EXAMPLES:
    tms project list
    tms project show <project-id>
    tms project create -n \"Billing\" --code BIL
    tms project add-member <project-id> --user <user-id>")]
    Project {
        #[command(subcommand)]
        action: ProjectCommands,
    },
    /// List projects (alias for 'project list')
    Projects,
    /// Search staff users to assign work to
    #[command(after_help = "EXAMPLES:
    tms agents ann")]
    Agents {
        /// Name or email fragment (at least 2 characters)
        search: String,
    },
    /// Manage tickets
    #[command(after_help = "EXAMPLES:
    tms ticket list -p <project-id> --status todo
    tms ticket show <ticket-id>
    tms ticket create -p <project-id> -t \"Login fails\" -d \"Users cannot sign in\" --category support --work-type incident
    tms ticket status <ticket-id> done
    tms ticket comment <ticket-id> \"Fixed in @Ann Lee's branch\" -a ./trace.log")]
    Ticket {
        #[command(subcommand)]
        action: TicketCommands,
    },
    /// List tickets (alias for 'ticket list')
    Tickets(TicketListArgs),
    /// Show or change a project's kanban board
    #[command(after_help = "EXAMPLES:
    tms board -p <project-id>
    tms board -p <project-id> --view list
    tms board --assignee <user-id>
    tms board -p <project-id> --watch
    tms board move <ticket-id> --from todo --to in-progress -p <project-id>")]
    Board(BoardArgs),
    /// Client portal: tickets you reported
    #[command(alias = "portal")]
    MyTickets {
        #[command(subcommand)]
        action: Option<PortalCommands>,
    },
    /// Download a ticket, time log or report export
    #[command(after_help = "EXAMPLES:
    tms export tickets --format csv
    tms export monthly-effort --month 3 --year 2026
    tms export dev-vs-bau --start-date 2026-01-01 --end-date 2026-03-31 -o ./reports")]
    Export(ExportArgs),
    /// Generate shell completions
    #[command(after_help = "EXAMPLES:
    tms completions bash > ~/.bash_completion.d/tms
    tms completions zsh > ~/.zfunc/_tms
    tms completions fish > ~/.config/fish/completions/tms.fish")]
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
    /// Initialize configuration file interactively
    Init,
}

#[derive(Args)]
pub struct LoginArgs {
    #[arg(long, short)]
    pub email: String,

    /// Password (prompted when omitted)
    #[arg(long, short)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct RegisterArgs {
    #[arg(long, short)]
    pub name: String,

    #[arg(long, short)]
    pub email: String,

    /// Password (prompted when omitted)
    #[arg(long, short)]
    pub password: Option<String>,

    #[arg(long, value_enum, default_value = "customer")]
    pub role: Role,
}

#[derive(Subcommand)]
pub enum ProjectCommands {
    /// List projects
    List,
    /// Show project details and members
    Show { id: String },
    /// Create a project
    Create(ProjectArgs),
    /// Update a project
    Update {
        id: String,
        #[command(flatten)]
        fields: ProjectUpdateArgs,
    },
    /// Delete a project
    Delete { id: String },
    /// List project members
    Members { id: String },
    /// Add a member to a project
    AddMember(MemberArgs),
    /// Change a member's project role
    UpdateMember {
        id: String,
        member_id: String,
        #[arg(long)]
        role: String,
    },
    /// Remove a member from a project
    RemoveMember { id: String, member_id: String },
}

#[derive(Args)]
pub struct ProjectArgs {
    #[arg(long, short)]
    pub name: String,

    /// Short project code used in ticket numbers
    #[arg(long)]
    pub code: Option<String>,

    #[arg(long, short)]
    pub description: Option<String>,
}

#[derive(Args)]
pub struct ProjectUpdateArgs {
    #[arg(long, short)]
    pub name: Option<String>,

    #[arg(long, short)]
    pub description: Option<String>,

    #[arg(long)]
    pub status: Option<String>,
}

#[derive(Args)]
pub struct MemberArgs {
    /// Project ID
    pub id: String,

    /// User ID of the member
    #[arg(long)]
    pub user: String,

    /// Role inside the project
    #[arg(long)]
    pub role: Option<String>,
}

#[derive(Subcommand)]
pub enum TicketCommands {
    /// List tickets of a project
    List(TicketListArgs),
    /// Show ticket details with subtasks, comments and attachments
    Show { id: String },
    /// Create a ticket
    Create(TicketCreateArgs),
    /// Update ticket fields
    Update(TicketUpdateArgs),
    /// Change a ticket's status
    Status { id: String, status: TicketStatus },
    /// Delete a ticket
    Delete { id: String },
    /// Show the change history
    History { id: String },
    /// List approval requests
    Approvals { id: String },
    /// Ask for approval
    RequestApproval {
        id: String,
        #[arg(long, short)]
        comment: Option<String>,
    },
    /// List comments
    Comments { id: String },
    /// Add a comment, optionally with attachments
    Comment(CommentArgs),
    /// Write a comment interactively with @mention suggestions
    Compose {
        id: String,
        /// Mark the comment internal (hidden from customers)
        #[arg(long)]
        internal: bool,
    },
    /// Manage subtasks
    Subtask {
        #[command(subcommand)]
        action: SubtaskCommands,
    },
    /// List attachments
    Attachments { id: String },
    /// Upload files to a ticket
    Upload {
        id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args, Clone)]
pub struct TicketListArgs {
    /// Project ID (uses default if not specified)
    #[arg(long, short)]
    pub project: Option<String>,

    #[arg(long, value_enum)]
    pub status: Option<TicketStatus>,

    #[arg(long, value_enum)]
    pub priority: Option<TicketPriority>,

    /// Text search in title and description
    #[arg(long, short)]
    pub search: Option<String>,
}

#[derive(Args)]
pub struct TicketCreateArgs {
    /// Project ID (uses default if not specified)
    #[arg(long, short)]
    pub project: Option<String>,

    #[arg(long, short)]
    pub title: String,

    #[arg(long, short)]
    pub description: String,

    #[arg(long, value_enum, default_value = "medium")]
    pub priority: TicketPriority,

    #[arg(long, value_enum)]
    pub category: WorkCategory,

    #[arg(long, value_enum)]
    pub work_type: WorkType,

    #[arg(long)]
    pub story_points: Option<u32>,

    /// Assignee user ID
    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(Args)]
pub struct TicketUpdateArgs {
    pub id: String,

    #[arg(long, short)]
    pub title: Option<String>,

    #[arg(long, short)]
    pub description: Option<String>,

    #[arg(long, value_enum)]
    pub priority: Option<TicketPriority>,

    #[arg(long, value_enum)]
    pub status: Option<TicketStatus>,

    #[arg(long)]
    pub story_points: Option<u32>,

    /// Assignee user ID
    #[arg(long)]
    pub assignee: Option<String>,
}

#[derive(Args)]
pub struct CommentArgs {
    pub id: String,

    pub text: String,

    /// Files to attach after the comment is posted
    #[arg(long, short)]
    pub attach: Vec<PathBuf>,

    #[arg(long)]
    pub internal: bool,
}

#[derive(Subcommand)]
pub enum SubtaskCommands {
    /// List subtasks of a ticket
    List { ticket_id: String },
    /// Add a subtask
    Add {
        ticket_id: String,
        title: String,
        #[arg(long)]
        story_points: Option<u32>,
        #[arg(long)]
        assignee: Option<String>,
    },
    /// Change a subtask
    Update {
        ticket_id: String,
        subtask_id: String,
        #[arg(long, value_enum)]
        status: Option<TicketStatus>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Delete a subtask
    Delete { ticket_id: String, subtask_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum BoardView {
    #[default]
    Kanban,
    List,
}

#[derive(Args)]
pub struct BoardArgs {
    #[command(subcommand)]
    pub action: Option<BoardCommands>,

    /// Project ID (uses default if not specified)
    #[arg(long, short, global = true)]
    pub project: Option<String>,

    /// Show the board of one assignee instead of a project
    #[arg(long, conflicts_with = "project")]
    pub assignee: Option<String>,

    #[arg(long, value_enum, default_value = "kanban")]
    pub view: BoardView,

    /// Redraw whenever the board changes on the server
    #[arg(long)]
    pub watch: bool,
}

#[derive(Subcommand)]
pub enum BoardCommands {
    /// Move a card to another column
    Move {
        /// Ticket or subtask ID
        card_id: String,
        #[arg(long, value_enum)]
        from: TicketStatus,
        #[arg(long, value_enum)]
        to: TicketStatus,
        /// The card is a subtask of this ticket
        #[arg(long)]
        subtask_of: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum PortalCommands {
    /// List tickets you reported
    List,
    /// Report a new ticket
    Create(TicketCreateArgs),
}

#[derive(Args)]
pub struct ExportArgs {
    #[arg(value_enum)]
    pub kind: ExportKind,

    #[arg(long, value_enum, default_value = "excel")]
    pub format: ExportFormat,

    #[arg(long)]
    pub month: Option<u32>,

    #[arg(long)]
    pub year: Option<i32>,

    #[arg(long)]
    pub start_date: Option<String>,

    #[arg(long)]
    pub end_date: Option<String>,

    /// Directory to save the file in
    #[arg(long, short, default_value = ".")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_board_move() {
        let cli = Cli::parse_from([
            "tms", "board", "move", "t-1", "--from", "todo", "--to", "in-progress", "-p", "p-1",
        ]);
        let Commands::Board(args) = cli.command else {
            panic!("expected board command");
        };
        assert_eq!(args.project.as_deref(), Some("p-1"));
        assert!(matches!(
            args.action,
            Some(BoardCommands::Move { from: TicketStatus::Todo, to: TicketStatus::InProgress, .. })
        ));
    }
}
