//! Server push to cache invalidation.
//!
//! Each live event names what changed; the matching cache prefixes are marked
//! stale and any view watching them refetches. Payloads are only read for the
//! ids that narrow a key.

use serde_json::Value;
use tracing::debug;

use crate::cache::{keys, QueryCache, QueryKey};
use crate::realtime::{
    RealtimeClient, Subscription, BOARD_UPDATED, BULK_STATUS_CHANGED, COMMENT_CREATED,
    LIVE_EVENTS, TICKET_CREATED, TICKET_DELETED, TICKET_UPDATED,
};

/// Keeps the cache in step with server events while alive.
pub struct LiveSync {
    subscriptions: Vec<Subscription>,
}

impl LiveSync {
    pub fn attach(realtime: &RealtimeClient, cache: &QueryCache) -> Self {
        let subscriptions = LIVE_EVENTS
            .iter()
            .map(|&event| {
                let cache = cache.clone();
                realtime.on(event, move |payload| {
                    for prefix in keys_for_event(event, payload) {
                        let count = cache.invalidate(&prefix);
                        debug!(event, prefix = %prefix, count, "live invalidation");
                    }
                })
            })
            .collect();

        Self { subscriptions }
    }

    /// Unregister every handler. Dropping the value does the same.
    pub fn detach(self, realtime: &RealtimeClient) {
        for subscription in self.subscriptions {
            realtime.off(subscription);
        }
    }
}

fn id_field<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| payload.get(*name).and_then(Value::as_str))
}

fn ticket_id(payload: &Value) -> Option<&str> {
    id_field(payload, &["ticket_id", "id"]).or_else(|| {
        payload
            .get("ticket")
            .and_then(|t| id_field(t, &["id"]))
    })
}

fn project_id(payload: &Value) -> Option<&str> {
    id_field(payload, &["project_id", "projectId"])
}

/// Key prefixes an event makes stale. Unknown events touch nothing.
pub fn keys_for_event(event: &str, payload: &Value) -> Vec<QueryKey> {
    let mut prefixes = Vec::new();
    match event {
        TICKET_CREATED => {
            prefixes.push(QueryKey::new("tickets"));
            prefixes.push(QueryKey::new("board"));
            prefixes.push(keys::my_tickets());
        }
        TICKET_UPDATED | TICKET_DELETED => {
            if let Some(id) = ticket_id(payload) {
                prefixes.push(keys::ticket(id));
            }
            prefixes.push(QueryKey::new("tickets"));
            prefixes.push(QueryKey::new("board"));
            if event == TICKET_DELETED {
                prefixes.push(keys::my_tickets());
            }
        }
        COMMENT_CREATED => match id_field(payload, &["ticket_id"]) {
            Some(id) => prefixes.push(keys::comments(id)),
            None => prefixes.push(QueryKey::new("comments")),
        },
        BOARD_UPDATED | BULK_STATUS_CHANGED => {
            match project_id(payload) {
                Some(id) => prefixes.push(keys::board(id)),
                None => prefixes.push(QueryKey::new("board")),
            }
            prefixes.push(QueryKey::new("tickets"));
        }
        _ => {}
    }
    prefixes
}
