use colored::Colorize;
use serde_json::{Map, Value};
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::Tabled;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::board::{Board, BoardScope, DragPayload, DropOutcome};
use crate::cache::{QueryState, DEFAULT_GC_TIME};
use crate::cli::{BoardArgs, BoardCommands, BoardView};
use crate::context::AppContext;
use crate::error::{Result, TmsError};
use crate::output::{self, truncate};
use crate::realtime::ConnectionState;
use crate::responses::{BoardCard, BoardPayload};
use crate::types::TicketStatus;

#[derive(Tabled)]
struct CardRow {
    #[tabled(rename = "Column")]
    column: String,
    #[tabled(rename = "Number")]
    number: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Priority")]
    priority: String,
    #[tabled(rename = "Assignee")]
    assignee: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn scope(ctx: &AppContext, args: &BoardArgs) -> Result<BoardScope> {
    match &args.assignee {
        Some(assignee) => Ok(BoardScope::Assignee(assignee.clone())),
        None => Ok(BoardScope::Project(
            ctx.config.resolve_project(args.project.as_deref())?,
        )),
    }
}

pub async fn run(ctx: &AppContext, args: BoardArgs) -> Result<()> {
    let scope = scope(ctx, &args)?;

    match args.action {
        Some(BoardCommands::Move {
            card_id,
            from,
            to,
            subtask_of,
        }) => {
            let payload = match subtask_of {
                Some(ticket_id) => DragPayload::Subtask {
                    subtask_id: card_id,
                    ticket_id,
                    from,
                },
                None => DragPayload::Ticket {
                    ticket_id: card_id,
                    from,
                },
            };
            move_card(ctx, scope, &payload, to).await
        }
        None if args.watch => watch(ctx, scope, args.view).await,
        None => {
            let board = Board::load(&ctx.client, &ctx.cache, scope).await?;
            render(&board, args.view);
            Ok(())
        }
    }
}

fn card_label(card: &BoardCard) -> String {
    let mut label = format!("{} {}", card.ticket_number, truncate(&card.title, 28));
    label.push_str(&format!(" ({})", card.priority.as_str()));
    if let Some(assignee) = &card.assignee_name {
        label.push_str(&format!("\n  {assignee}"));
    }
    label
}

fn render(board: &Board, view: BoardView) {
    if output::is_json_output() {
        let columns: Map<String, Value> = board
            .columns()
            .map(|(status, cards)| {
                (
                    status.as_str().to_string(),
                    serde_json::to_value(cards).unwrap_or(Value::Null),
                )
            })
            .collect();
        output::print_item(&Value::Object(columns), |_| {});
        return;
    }

    match view {
        BoardView::Kanban => print_kanban(board),
        BoardView::List => {
            let rows: Vec<(TicketStatus, BoardCard)> = board
                .columns()
                .flat_map(|(status, cards)| cards.iter().map(move |c| (status, c.clone())))
                .collect();
            if rows.is_empty() {
                output::print_message("The board is empty");
                return;
            }
            let rows: Vec<CardRow> = rows
                .iter()
                .map(|(status, card)| CardRow {
                    column: status.colored(),
                    number: card.ticket_number.clone(),
                    title: truncate(&card.title, 50),
                    priority: card.priority.colored(),
                    assignee: card.assignee_name.clone().unwrap_or_default(),
                    id: card.id.clone(),
                })
                .collect();
            println!("{}", tabled::Table::new(rows).with(Style::rounded()));
        }
    }
}

fn print_kanban(board: &Board) {
    let columns: Vec<(TicketStatus, &[BoardCard])> = board.columns().collect();
    let depth = columns.iter().map(|(_, cards)| cards.len()).max().unwrap_or(0);

    let mut builder = Builder::default();
    builder.push_record(
        columns
            .iter()
            .map(|(status, cards)| format!("{} ({})", status.colored(), cards.len())),
    );
    for row in 0..depth {
        builder.push_record(
            columns
                .iter()
                .map(|(_, cards)| cards.get(row).map(card_label).unwrap_or_default()),
        );
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
}

async fn move_card(
    ctx: &AppContext,
    scope: BoardScope,
    payload: &DragPayload,
    to: TicketStatus,
) -> Result<()> {
    let mut board = Board::load(&ctx.client, &ctx.cache, scope).await?;

    match board.drop_card(&ctx.client, &ctx.cache, payload, to).await? {
        DropOutcome::Unchanged => {
            output::print_message(&format!("{} is already in {}", payload.card_id(), to.label()))
        }
        DropOutcome::Moved { to } => {
            output::print_message(&format!("Moved {} to {}", payload.card_id(), to.label()))
        }
    }
    Ok(())
}

/// Keep the board on screen and redraw it whenever the cache drops it.
/// Once live updates give up, Enter starts a new connection attempt.
async fn watch(ctx: &AppContext, scope: BoardScope, view: BoardView) -> Result<()> {
    let sync = ctx.start_live_sync().ok_or(TmsError::Unauthorized)?;
    let _room = match &scope {
        BoardScope::Project(id) => Some(ctx.realtime.enter_room(id)),
        BoardScope::Assignee(_) => None,
    };

    let key = scope.key();
    let mut invalidations = ctx.cache.subscribe();
    let mut connection = ctx.realtime.watch_state();
    let mut input = stdin_lines();

    let board = Board::load(&ctx.client, &ctx.cache, scope.clone()).await?;
    render(&board, view);
    eprintln!("{}", "Watching for changes, Ctrl+C to stop".dimmed());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = invalidations.recv() => {
                let redraw = match changed {
                    Ok(prefix) => key.starts_with(&prefix),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "invalidation feed lagged");
                        true
                    }
                    Err(RecvError::Closed) => break,
                };
                if redraw {
                    refresh(ctx, &scope, view).await;
                    ctx.cache.collect_garbage(DEFAULT_GC_TIME);
                }
            }
            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                match state {
                    ConnectionState::Reconnecting { attempt } => {
                        debug!(attempt, "live updates reconnecting");
                    }
                    ConnectionState::GaveUp => {
                        warn!("live updates stopped after repeated failures");
                        eprintln!("{}", "Live updates stopped. Press Enter to reconnect.".yellow());
                    }
                    ConnectionState::Connected => debug!("live updates connected"),
                    _ => {}
                }
            }
            Some(_) = input.recv() => {
                if ctx.realtime.state() == ConnectionState::GaveUp {
                    match ctx.realtime.reconnect() {
                        Some(_) => eprintln!("{}", "Reconnecting live updates...".dimmed()),
                        None => warn!("no token left to reconnect with"),
                    }
                }
            }
        }
    }

    sync.detach(&ctx.realtime);
    Ok(())
}

/// Lines typed while watching. Stdin is read on a thread of its own so the
/// runtime never waits on it at exit.
fn stdin_lines() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Refetch and redraw. A failed refetch keeps the watch going and shows the
/// last board the cache still holds.
async fn refresh(ctx: &AppContext, scope: &BoardScope, view: BoardView) {
    let stamp = chrono::Local::now().format("%H:%M:%S").to_string();
    println!();

    match Board::load(&ctx.client, &ctx.cache, scope.clone()).await {
        Ok(board) => {
            println!("{}", format!("{stamp}  {} cards", board.card_count()).dimmed());
            render(&board, view);
        }
        Err(e) => {
            warn!(error = %e, "board refresh failed");
            let state: QueryState<BoardPayload> = ctx.cache.state(&scope.key());
            println!("{}", format!("{stamp}  {}", refresh_note(&state)).dimmed());
            if let Some(payload) = state.data {
                render(&Board::new(scope.clone(), payload), view);
            }
            eprintln!(
                "{} {}",
                "Error:".red().bold(),
                e.toast("Failed to refresh the board")
            );
        }
    }
}

fn refresh_note<T>(state: &QueryState<T>) -> String {
    let mut note = match (&state.data, state.is_stale) {
        (Some(_), true) => "Showing the last loaded board, it is out of date".to_string(),
        (Some(_), false) => "Showing the last loaded board".to_string(),
        (None, _) => "No board loaded yet".to_string(),
    };
    if state.is_loading {
        note.push_str(", another refresh is running");
    }
    if let Some(error) = &state.error {
        note.push_str(&format!(" ({error})"));
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{keys, QueryCache, QueryKey, QueryOptions};

    #[tokio::test]
    async fn test_failed_refetch_still_offers_last_board() {
        let cache = QueryCache::new();
        let key = keys::board("p-1");
        let payload: BoardPayload = serde_json::from_value(serde_json::json!({
            "columns": { "TODO": [{ "id": "t-1", "ticket_number": "TMS-1", "title": "Login page" }] }
        }))
        .unwrap();

        let _ = cache
            .query(key.clone(), QueryOptions::default(), || async { Ok(payload) })
            .await
            .unwrap();
        cache.invalidate(&QueryKey::new("board"));
        let failed: Result<BoardPayload> = cache
            .query(key.clone(), QueryOptions::default(), || async {
                Err(TmsError::Server {
                    status: 502,
                    message: "bad gateway".into(),
                })
            })
            .await;
        assert!(failed.is_err());

        let state: QueryState<BoardPayload> = cache.state(&key);
        let note = refresh_note(&state);
        assert!(note.starts_with("Showing the last loaded board, it is out of date"));
        assert!(note.contains("bad gateway"));

        let board = Board::new(BoardScope::Project("p-1".into()), state.data.unwrap());
        assert_eq!(board.card_count(), 1);
        assert_eq!(board.locate("t-1"), Some(TicketStatus::Todo));
    }

    #[test]
    fn test_refresh_note_without_data() {
        let state: QueryState<BoardPayload> = QueryState {
            data: None,
            is_loading: true,
            is_stale: false,
            error: None,
        };
        assert_eq!(
            refresh_note(&state),
            "No board loaded yet, another refresh is running"
        );
    }
}
