//! Kanban board model and card drops.
//!
//! A card's column is its status. Dropping a card proposes a status change;
//! the card moves immediately and moves back if the server refuses.

use std::collections::BTreeMap;

use reqwest::Method;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::{keys, Mutation, QueryCache, QueryKey};
use crate::client::TmsClient;
use crate::error::{Result, TmsError};
use crate::responses::{BoardCard, BoardPayload};
use crate::types::TicketStatus;

/// What is being dragged. Tickets and subtasks are updated through
/// different endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragPayload {
    Ticket {
        ticket_id: String,
        from: TicketStatus,
    },
    Subtask {
        subtask_id: String,
        ticket_id: String,
        from: TicketStatus,
    },
}

impl DragPayload {
    pub fn card_id(&self) -> &str {
        match self {
            DragPayload::Ticket { ticket_id, .. } => ticket_id,
            DragPayload::Subtask { subtask_id, .. } => subtask_id,
        }
    }

    pub fn from(&self) -> TicketStatus {
        match self {
            DragPayload::Ticket { from, .. } | DragPayload::Subtask { from, .. } => *from,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Dropped back on its own column; nothing was sent.
    Unchanged,
    Moved { to: TicketStatus },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardScope {
    Project(String),
    Assignee(String),
}

impl BoardScope {
    pub fn key(&self) -> QueryKey {
        match self {
            BoardScope::Project(id) => keys::board(id),
            BoardScope::Assignee(id) => keys::assignee_board(id),
        }
    }

    pub fn path(&self) -> String {
        match self {
            BoardScope::Project(id) => format!("/projects/{id}/board"),
            BoardScope::Assignee(id) => format!("/board/assignee/{id}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Board {
    scope: BoardScope,
    columns: BTreeMap<TicketStatus, Vec<BoardCard>>,
}

impl Board {
    /// Build the four board columns. Statuses outside the board are ignored.
    pub fn new(scope: BoardScope, payload: BoardPayload) -> Self {
        let mut columns: BTreeMap<TicketStatus, Vec<BoardCard>> = TicketStatus::BOARD_COLUMNS
            .iter()
            .map(|status| (*status, Vec::new()))
            .collect();

        for (name, cards) in payload.columns {
            match serde_json::from_value::<TicketStatus>(Value::String(name.clone())) {
                Ok(status) if columns.contains_key(&status) => {
                    columns.entry(status).or_default().extend(cards);
                }
                _ => debug!(column = %name, "skipping column not shown on the board"),
            }
        }

        Self { scope, columns }
    }

    /// Fetch the board through the cache.
    pub async fn load(client: &TmsClient, cache: &QueryCache, scope: BoardScope) -> Result<Self> {
        let path = scope.path();
        let payload: BoardPayload = cache
            .query(scope.key(), Default::default(), || {
                client.request(Method::GET, &path, None)
            })
            .await?;
        Ok(Self::new(scope, payload))
    }

    pub fn columns(&self) -> impl Iterator<Item = (TicketStatus, &[BoardCard])> {
        self.columns.iter().map(|(status, cards)| (*status, cards.as_slice()))
    }

    #[cfg(test)]
    pub fn column(&self, status: TicketStatus) -> &[BoardCard] {
        self.columns.get(&status).map_or(&[], Vec::as_slice)
    }

    pub fn locate(&self, card_id: &str) -> Option<TicketStatus> {
        self.columns
            .iter()
            .find(|(_, cards)| cards.iter().any(|c| c.id == card_id))
            .map(|(status, _)| *status)
    }

    pub fn card_count(&self) -> usize {
        self.columns.values().map(Vec::len).sum()
    }

    fn move_card(&mut self, card_id: &str, from: TicketStatus, to: TicketStatus) -> bool {
        let Some(source) = self.columns.get_mut(&from) else {
            return false;
        };
        let Some(index) = source.iter().position(|c| c.id == card_id) else {
            return false;
        };
        let card = source.remove(index);
        self.columns.entry(to).or_default().push(card);
        true
    }

    /// Drop a card on the `to` column.
    ///
    /// Same-column drops send nothing. A card that is no longer where the
    /// drag says it was is refused with `Conflict` and the board is marked
    /// stale. On a failed request the card returns to its source column.
    pub async fn drop_card(
        &mut self,
        client: &TmsClient,
        cache: &QueryCache,
        payload: &DragPayload,
        to: TicketStatus,
    ) -> Result<DropOutcome> {
        let from = payload.from();
        if from == to {
            return Ok(DropOutcome::Unchanged);
        }
        if !TicketStatus::BOARD_COLUMNS.contains(&to) {
            return Err(TmsError::validation(vec![crate::error::FieldError::new(
                "status",
                format!("{to} is not a board column"),
            )]));
        }

        let card_id = payload.card_id().to_string();
        if self.locate(&card_id) != Some(from) {
            cache.invalidate(&self.scope.key());
            return Err(TmsError::Conflict(format!(
                "card {card_id} is no longer in {}, refresh the board",
                from.label()
            )));
        }

        self.move_card(&card_id, from, to);
        match self.send(client, cache, payload, to).await {
            Ok(()) => {
                debug!(card = %card_id, from = %from, to = %to, "card moved");
                Ok(DropOutcome::Moved { to })
            }
            Err(e) => {
                warn!(card = %card_id, error = %e, "move failed, reverting card");
                self.move_card(&card_id, to, from);
                Err(e)
            }
        }
    }

    async fn send(
        &self,
        client: &TmsClient,
        cache: &QueryCache,
        payload: &DragPayload,
        to: TicketStatus,
    ) -> Result<()> {
        match payload {
            DragPayload::Ticket { ticket_id, .. } => {
                let BoardScope::Project(project_id) = &self.scope else {
                    return Err(TmsError::NoProject);
                };
                let body = json!({
                    "project_id": project_id,
                    "updates": [{ "ticket_id": ticket_id, "status": to }],
                });
                cache
                    .mutate(
                        Mutation::MoveOnBoard {
                            project_id: project_id.clone(),
                        },
                        client.execute(Method::PATCH, "/tickets/bulk-status", Some(body)),
                    )
                    .await
            }
            DragPayload::Subtask {
                subtask_id,
                ticket_id,
                ..
            } => {
                cache
                    .mutate(
                        Mutation::UpdateSubtask {
                            ticket_id: ticket_id.clone(),
                        },
                        client.execute(
                            Method::PATCH,
                            &format!("/subtasks/{subtask_id}"),
                            Some(json!({ "status": to })),
                        ),
                    )
                    .await?;
                cache.invalidate(&self.scope.key());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::TokenPair;
    use mockito::Matcher;

    fn card(id: &str) -> BoardCard {
        BoardCard {
            id: id.to_string(),
            ticket_number: format!("TMS-{id}"),
            title: format!("Card {id}"),
            priority: Default::default(),
            assignee_name: None,
            story_points: None,
            parent_ticket_id: None,
        }
    }

    fn board() -> Board {
        let mut payload = BoardPayload::default();
        payload.columns.insert("TODO".into(), vec![card("t-1")]);
        payload.columns.insert("IN_PROGRESS".into(), vec![card("t-2")]);
        payload.columns.insert("ARCHIVED".into(), vec![card("t-3")]);
        Board::new(BoardScope::Project("p-1".into()), payload)
    }

    fn client(url: &str) -> TmsClient {
        let client = TmsClient::new(url);
        client.set_tokens(Some(TokenPair {
            access_token: "token".into(),
            refresh_token: None,
        }));
        client
    }

    fn ticket_drag(id: &str, from: TicketStatus) -> DragPayload {
        DragPayload::Ticket {
            ticket_id: id.into(),
            from,
        }
    }

    #[test]
    fn test_unknown_columns_are_skipped() {
        let board = board();
        assert_eq!(board.columns().count(), 4);
        assert_eq!(board.card_count(), 2);
        assert!(board.column(TicketStatus::Done).is_empty());
    }

    #[tokio::test]
    async fn test_same_column_drop_sends_nothing() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let mut board = board();
        let outcome = board
            .drop_card(
                &client(&server.url()),
                &QueryCache::new(),
                &ticket_drag("t-1", TicketStatus::Todo),
                TicketStatus::Todo,
            )
            .await
            .unwrap();

        assert_eq!(outcome, DropOutcome::Unchanged);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_ticket_drop_uses_bulk_status_and_invalidates_board() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/tickets/bulk-status")
            .match_body(Matcher::Json(json!({
                "project_id": "p-1",
                "updates": [{ "ticket_id": "t-1", "status": "IN_REVIEW" }]
            })))
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let cache = QueryCache::new();
        cache.set_data(keys::board("p-1"), &json!({})).unwrap();

        let mut board = board();
        let outcome = board
            .drop_card(
                &client(&server.url()),
                &cache,
                &ticket_drag("t-1", TicketStatus::Todo),
                TicketStatus::InReview,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome, DropOutcome::Moved { to: TicketStatus::InReview });
        assert_eq!(board.locate("t-1"), Some(TicketStatus::InReview));
        assert!(cache.is_stale(&keys::board("p-1")));
    }

    #[tokio::test]
    async fn test_failed_drop_reverts_card() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("PATCH", "/tickets/bulk-status")
            .with_status(500)
            .with_body(r#"{"success":false,"message":"boom"}"#)
            .create_async()
            .await;

        let cache = QueryCache::new();
        cache.set_data(keys::board("p-1"), &json!({})).unwrap();

        let mut board = board();
        let err = board
            .drop_card(
                &client(&server.url()),
                &cache,
                &ticket_drag("t-2", TicketStatus::InProgress),
                TicketStatus::Done,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TmsError::Server { status: 500, .. }));
        assert_eq!(board.locate("t-2"), Some(TicketStatus::InProgress));
        assert!(!cache.is_stale(&keys::board("p-1")));
    }

    #[tokio::test]
    async fn test_subtask_drop_patches_subtask() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/subtasks/s-1")
            .match_body(Matcher::Json(json!({ "status": "DONE" })))
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let mut payload = BoardPayload::default();
        let mut subtask = card("s-1");
        subtask.parent_ticket_id = Some("t-1".into());
        payload.columns.insert("IN_REVIEW".into(), vec![subtask]);
        let mut board = Board::new(BoardScope::Project("p-1".into()), payload);

        let cache = QueryCache::new();
        cache.set_data(keys::subtasks("t-1"), &json!([])).unwrap();

        let drag = DragPayload::Subtask {
            subtask_id: "s-1".into(),
            ticket_id: "t-1".into(),
            from: TicketStatus::InReview,
        };
        board
            .drop_card(&client(&server.url()), &cache, &drag, TicketStatus::Done)
            .await
            .unwrap();

        mock.assert_async().await;
        assert!(cache.is_stale(&keys::subtasks("t-1")));
        assert_eq!(board.locate("s-1"), Some(TicketStatus::Done));
    }

    #[tokio::test]
    async fn test_stale_source_column_is_refused() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let cache = QueryCache::new();
        cache.set_data(keys::board("p-1"), &json!({})).unwrap();

        let mut board = board();
        let err = board
            .drop_card(
                &client(&server.url()),
                &cache,
                &ticket_drag("t-1", TicketStatus::InReview),
                TicketStatus::Done,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TmsError::Conflict(_)));
        assert!(cache.is_stale(&keys::board("p-1")));
        mock.assert_async().await;
    }
}
