use std::path::Path;

use colored::Colorize;
use tabled::Tabled;

use crate::cache::keys;
use crate::cli::CommentArgs;
use crate::composer::{Composer, Key, KeyAction, SubmitOutcome};
use crate::context::AppContext;
use crate::error::{Result, TmsError};
use crate::output::{self, format_relative, truncate};
use crate::types::Comment;

use super::{attachments, fetch, prompt, projects, tickets};

#[derive(Tabled)]
struct CommentRow {
    #[tabled(rename = "Author")]
    author: String,
    #[tabled(rename = "Comment")]
    body: String,
    #[tabled(rename = "Internal")]
    internal: String,
    #[tabled(rename = "When")]
    created_at: String,
}

impl From<&Comment> for CommentRow {
    fn from(comment: &Comment) -> Self {
        Self {
            author: comment
                .user_name
                .clone()
                .unwrap_or_else(|| "Unknown".to_string()),
            body: truncate(&comment.comment_text.replace('\n', " "), 60),
            internal: if comment.is_internal { "yes" } else { "" }.to_string(),
            created_at: format_relative(&comment.created_at),
        }
    }
}

pub(crate) async fn fetch_comments(ctx: &AppContext, ticket_id: &str) -> Result<Vec<Comment>> {
    fetch(
        ctx,
        keys::comments(ticket_id),
        &format!("/tickets/{ticket_id}/comments"),
    )
    .await
}

pub(crate) fn print_comments(comments: &[Comment]) {
    if comments.is_empty() {
        output::print_message("No comments yet");
        return;
    }
    output::print_table(comments, |c| CommentRow::from(c));
}

pub async fn list(ctx: &AppContext, ticket_id: &str) -> Result<()> {
    print_comments(&fetch_comments(ctx, ticket_id).await?);
    Ok(())
}

pub async fn add(ctx: &AppContext, args: CommentArgs) -> Result<()> {
    let mut composer = Composer::default();
    composer.set_text(&args.text);
    composer.set_internal(args.internal);
    for path in &args.attach {
        composer.attach(attachments::read_upload(path)?);
    }

    let outcome = composer.submit(&ctx.client, &ctx.cache, &args.id).await?;
    report(&args.id, outcome)
}

fn added_message(ticket_id: &str, comment: Option<&Comment>) -> String {
    match comment {
        Some(comment) => format!("Comment {} added to {ticket_id}", comment.id),
        None => format!("Files added to {ticket_id}"),
    }
}

fn report(ticket_id: &str, outcome: SubmitOutcome) -> Result<()> {
    match outcome {
        SubmitOutcome::Empty => {
            output::print_message("Nothing to post");
            Ok(())
        }
        SubmitOutcome::Posted { comment, uploaded } => {
            let mut message = added_message(ticket_id, comment.as_ref());
            if uploaded > 0 {
                message.push_str(&format!(" with {uploaded} file(s)"));
            }
            output::print_message(&message);
            if let Some(comment) = &comment {
                if !output::is_json_output() {
                    print_comments(std::slice::from_ref(comment));
                }
            }
            Ok(())
        }
        SubmitOutcome::PostedUploadFailed { comment, error } => Err(TmsError::PartialFailure {
            message: format!(
                "{} but the file upload failed",
                added_message(ticket_id, comment.as_ref())
            ),
            source: Box::new(error),
        }),
    }
}

/// Line-based composer. A trailing `\` continues on a new line, `:N` picks
/// mention suggestion N, `:attach <path>` stages a file and `:drop N` unstages
/// one. `:quit` abandons.
pub async fn compose(ctx: &AppContext, ticket_id: &str, internal: bool) -> Result<()> {
    let ticket = tickets::fetch_ticket(ctx, ticket_id).await?;
    let members = projects::fetch_members(ctx, &ticket.project_id).await?;

    let mut composer = Composer::new(members);
    composer.set_internal(internal);

    println!(
        "Commenting on {} {}. Enter posts, a trailing \\ adds a line.",
        ticket.ticket_number.bold(),
        ticket.title
    );

    loop {
        let line = prompt("> ")?;

        if line == ":quit" {
            output::print_message("Discarded");
            return Ok(());
        }

        if let Some(path) = line.strip_prefix(":attach ") {
            match attachments::read_upload(Path::new(path.trim())) {
                Ok(file) => {
                    println!("Staged {}", file.file_name);
                    composer.attach(file);
                }
                Err(e) => eprintln!("{}", e.to_string().red()),
            }
            continue;
        }

        if let Some(index) = line.strip_prefix(":drop ") {
            let removed = index
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| composer.remove_file(i));
            match removed {
                Some(file) => println!("Dropped {}", file.file_name),
                None => eprintln!("No staged file {}", index.trim()),
            }
            for (i, file) in composer.files().iter().enumerate() {
                println!("  {} {}", i + 1, file.file_name);
            }
            continue;
        }

        if let Some(choice) = line.strip_prefix(':').and_then(|n| n.parse::<usize>().ok()) {
            let picked = choice
                .checked_sub(1)
                .and_then(|i| composer.suggestions().get(i).map(|m| (*m).clone()));
            match picked {
                Some(member) => {
                    composer.select(&member);
                    println!("{}", composer.text().dimmed());
                }
                None => eprintln!("No suggestion {choice}"),
            }
            continue;
        }

        let (body, shift) = match line.strip_suffix('\\') {
            Some(body) => (body, true),
            None => (line.as_str(), false),
        };
        for c in body.chars() {
            composer.handle_key(Key::Char(c));
        }

        // An empty line posts even while a mention is open.
        let suggestions = composer.suggestions();
        if !body.is_empty() && !suggestions.is_empty() {
            if let Some(anchor) = composer.anchor() {
                println!(
                    "Mention at line {}, column {}:",
                    anchor.line + 1,
                    anchor.column + 1
                );
            }
            for (i, member) in suggestions.iter().enumerate() {
                println!("  :{} {} <{}>", i + 1, member.name, member.email);
            }
            continue;
        }

        if composer.handle_key(Key::Enter { shift }) == KeyAction::Submit {
            let outcome = composer.submit(&ctx.client, &ctx.cache, ticket_id).await?;
            return report(ticket_id, outcome);
        }
    }
}
