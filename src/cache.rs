//! Keyed server-state cache with invalidation by key prefix.
//!
//! Entries hold the JSON payload of a fetch. A key is a tuple of JSON values
//! compared by value, so `["tickets", "p-1", {"status": "TODO"}]` built twice
//! from equal parts addresses the same entry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::error::Result;

/// Agent lookups are reused for five minutes.
pub const AGENT_STALE_TIME: Duration = Duration::from_secs(5 * 60);

/// Idle time after which an unread entry is dropped.
pub const DEFAULT_GC_TIME: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    parts: Vec<String>,
}

impl QueryKey {
    pub fn new(root: &str) -> Self {
        Self {
            parts: vec![encode_part(&root)],
        }
    }

    /// Append a part. Objects are encoded with sorted keys, so equal values
    /// always encode to equal parts.
    pub fn with<T: Serialize + ?Sized>(mut self, part: &T) -> Self {
        self.parts.push(encode_part(part));
        self
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.parts.len() >= prefix.parts.len() && self.parts[..prefix.parts.len()] == prefix.parts[..]
    }
}

fn encode_part<T: Serialize + ?Sized>(part: &T) -> String {
    serde_json::to_value(part)
        .unwrap_or(Value::Null)
        .to_string()
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.parts.join(","))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Canonical keys used by the views.
pub mod keys {
    use super::QueryKey;

    pub fn projects() -> QueryKey {
        QueryKey::new("projects")
    }

    pub fn project(project_id: &str) -> QueryKey {
        QueryKey::new("project").with(project_id)
    }

    pub fn project_members(project_id: &str) -> QueryKey {
        QueryKey::new("project-members").with(project_id)
    }

    pub fn agents(search: &str) -> QueryKey {
        QueryKey::new("agents").with(search)
    }

    pub fn tickets<F: serde::Serialize>(project_id: &str, filters: &F) -> QueryKey {
        QueryKey::new("tickets").with(project_id).with(filters)
    }

    pub fn my_tickets() -> QueryKey {
        QueryKey::new("my-tickets")
    }

    pub fn ticket(ticket_id: &str) -> QueryKey {
        QueryKey::new("ticket").with(ticket_id)
    }

    pub fn comments(ticket_id: &str) -> QueryKey {
        QueryKey::new("comments").with(ticket_id)
    }

    pub fn subtasks(ticket_id: &str) -> QueryKey {
        QueryKey::new("subtasks").with(ticket_id)
    }

    pub fn attachments(ticket_id: &str) -> QueryKey {
        QueryKey::new("attachments").with(ticket_id)
    }

    pub fn history(ticket_id: &str) -> QueryKey {
        QueryKey::new("history").with(ticket_id)
    }

    pub fn approvals(ticket_id: &str) -> QueryKey {
        QueryKey::new("approvals").with(ticket_id)
    }

    pub fn board(project_id: &str) -> QueryKey {
        QueryKey::new("board").with(project_id)
    }

    pub fn assignee_board(assignee_id: &str) -> QueryKey {
        QueryKey::new("board").with("assignee").with(assignee_id)
    }
}

/// Server-side writes and the cached data each one may change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    CreateTicket,
    UpdateTicket { ticket_id: String },
    DeleteTicket { ticket_id: String },
    AddComment { ticket_id: String },
    UploadAttachments { ticket_id: String },
    CreateSubtask { ticket_id: String },
    UpdateSubtask { ticket_id: String },
    DeleteSubtask { ticket_id: String },
    MoveOnBoard { project_id: String },
    RequestApproval { ticket_id: String },
    CreateProject,
    UpdateProject,
    DeleteProject,
    AddMember,
    UpdateMember,
    RemoveMember,
    CreatePortalTicket,
}

impl Mutation {
    /// Key prefixes invalidated when this mutation succeeds.
    pub fn invalidates(&self) -> Vec<QueryKey> {
        match self {
            Mutation::CreateTicket => vec![
                QueryKey::new("tickets"),
                QueryKey::new("board"),
                keys::my_tickets(),
            ],
            Mutation::UpdateTicket { ticket_id } => vec![
                keys::ticket(ticket_id),
                QueryKey::new("tickets"),
                QueryKey::new("board"),
            ],
            Mutation::DeleteTicket { ticket_id } => vec![
                keys::ticket(ticket_id),
                QueryKey::new("tickets"),
                QueryKey::new("board"),
                keys::my_tickets(),
            ],
            Mutation::AddComment { ticket_id } => vec![keys::comments(ticket_id)],
            Mutation::UploadAttachments { ticket_id } => vec![keys::attachments(ticket_id)],
            Mutation::CreateSubtask { ticket_id }
            | Mutation::UpdateSubtask { ticket_id }
            | Mutation::DeleteSubtask { ticket_id } => vec![
                keys::subtasks(ticket_id),
                keys::ticket(ticket_id),
                QueryKey::new("tickets"),
            ],
            Mutation::MoveOnBoard { project_id } => {
                vec![keys::board(project_id), QueryKey::new("tickets")]
            }
            Mutation::RequestApproval { ticket_id } => vec![keys::approvals(ticket_id)],
            Mutation::CreateProject | Mutation::UpdateProject | Mutation::DeleteProject => {
                vec![keys::projects()]
            }
            Mutation::AddMember | Mutation::UpdateMember | Mutation::RemoveMember => {
                vec![keys::projects(), QueryKey::new("project-members")]
            }
            Mutation::CreatePortalTicket => vec![keys::my_tickets()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// How long a fetched value is served without refetching.
    pub stale_time: Duration,
}

impl QueryOptions {
    pub fn stale_for(stale_time: Duration) -> Self {
        Self { stale_time }
    }
}

/// Snapshot of a key for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub is_loading: bool,
    pub is_stale: bool,
    pub error: Option<String>,
}

struct Entry {
    data: Option<Value>,
    updated_at: Option<Instant>,
    last_read: Instant,
    stale: bool,
    generation: u64,
    /// Bumped by every `invalidate` that matches this key.
    invalidations: u64,
    error: Option<String>,
}

impl Entry {
    fn empty() -> Self {
        Self {
            data: None,
            updated_at: None,
            last_read: Instant::now(),
            stale: false,
            generation: 0,
            invalidations: 0,
            error: None,
        }
    }

    fn is_fresh(&self, stale_time: Duration) -> bool {
        match (&self.data, self.updated_at) {
            (Some(_), Some(at)) => !self.stale && at.elapsed() <= stale_time,
            _ => false,
        }
    }
}

struct Inner {
    entries: Mutex<HashMap<QueryKey, Entry>>,
    fetch_locks: Mutex<HashMap<QueryKey, Arc<tokio::sync::Mutex<()>>>>,
    epoch: AtomicU64,
    events: broadcast::Sender<QueryKey>,
}

/// Process-wide cache shared by every view. Cloning is cheap.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                fetch_locks: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                events,
            }),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<QueryKey, Entry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fetch_lock(&self, key: &QueryKey) -> Arc<tokio::sync::Mutex<()>> {
        self.inner
            .fetch_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key.clone())
            .or_default()
            .clone()
    }

    /// Return the cached value for `key` if fresh, otherwise run `fetcher`.
    ///
    /// Only one fetch per key runs at a time. Callers arriving while a fetch
    /// is in flight wait for it and reuse its result.
    pub async fn query<T, F, Fut>(&self, key: QueryKey, options: QueryOptions, fetcher: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.read_fresh(&key, options.stale_time) {
            trace!(key = %key, "cache hit");
            return Ok(serde_json::from_value(value)?);
        }

        let seen = self.generation(&key);
        let lock = self.fetch_lock(&key);
        let _in_flight = lock.lock().await;

        if self.generation(&key) != seen {
            if let Some(value) = self.read_current(&key) {
                trace!(key = %key, "joined in-flight fetch");
                return Ok(serde_json::from_value(value)?);
            }
        }

        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let invalidations = self.begin_fetch(&key);
        debug!(key = %key, "fetching");
        let result = fetcher().await;

        if self.inner.epoch.load(Ordering::SeqCst) != epoch {
            debug!(key = %key, "cache cleared during fetch, discarding result");
            return result;
        }

        match &result {
            Ok(data) => {
                let value = serde_json::to_value(data)?;
                let mut entries = self.entries();
                let entry = entries.entry(key.clone()).or_insert_with(Entry::empty);
                entry.data = Some(value);
                entry.updated_at = Some(Instant::now());
                entry.last_read = Instant::now();
                entry.stale = entry.invalidations != invalidations;
                if entry.stale {
                    debug!(key = %key, "invalidated during fetch, result kept stale");
                }
                entry.generation += 1;
                entry.error = None;
            }
            Err(e) => {
                let mut entries = self.entries();
                let entry = entries.entry(key).or_insert_with(Entry::empty);
                entry.error = Some(e.to_string());
            }
        }

        result
    }

    /// Make sure `key` has an entry an invalidation can land on while the
    /// fetch runs, and return its invalidation count.
    fn begin_fetch(&self, key: &QueryKey) -> u64 {
        self.entries()
            .entry(key.clone())
            .or_insert_with(Entry::empty)
            .invalidations
    }

    fn read_fresh(&self, key: &QueryKey, stale_time: Duration) -> Option<Value> {
        let mut entries = self.entries();
        let entry = entries.get_mut(key)?;
        if !entry.is_fresh(stale_time) {
            return None;
        }
        entry.last_read = Instant::now();
        entry.data.clone()
    }

    fn read_current(&self, key: &QueryKey) -> Option<Value> {
        let mut entries = self.entries();
        let entry = entries.get_mut(key)?;
        if entry.stale {
            return None;
        }
        entry.last_read = Instant::now();
        entry.data.clone()
    }

    fn generation(&self, key: &QueryKey) -> u64 {
        self.entries().get(key).map_or(0, |e| e.generation)
    }

    /// Run a mutation; on success invalidate everything it may have changed.
    pub async fn mutate<T, Fut>(&self, mutation: Mutation, operation: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let result = operation.await;
        if result.is_ok() {
            for prefix in mutation.invalidates() {
                self.invalidate(&prefix);
            }
        }
        result
    }

    /// Mark every key under `prefix` stale and notify watchers. Returns the
    /// number of cached entries affected.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        let mut count = 0;
        for (key, entry) in self.entries().iter_mut() {
            if key.starts_with(prefix) {
                entry.stale = true;
                entry.invalidations += 1;
                count += 1;
            }
        }
        debug!(prefix = %prefix, count, "invalidated");
        // No receivers is fine.
        let _ = self.inner.events.send(prefix.clone());
        count
    }

    /// Store data without a fetch.
    #[cfg(test)]
    pub fn set_data<T: Serialize>(&self, key: QueryKey, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        let mut entries = self.entries();
        let entry = entries.entry(key).or_insert_with(Entry::empty);
        entry.data = Some(value);
        entry.updated_at = Some(Instant::now());
        entry.last_read = Instant::now();
        Ok(())
    }

    #[cfg(test)]
    pub fn get<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let value = self.entries().get(key)?.data.clone()?;
        serde_json::from_value(value).ok()
    }

    pub fn state<T: DeserializeOwned>(&self, key: &QueryKey) -> QueryState<T> {
        let is_loading = self
            .inner
            .fetch_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|lock| lock.try_lock().is_err());

        let entries = self.entries();
        match entries.get(key) {
            Some(entry) => QueryState {
                data: entry
                    .data
                    .clone()
                    .and_then(|v| serde_json::from_value(v).ok()),
                is_loading,
                is_stale: entry.stale,
                error: entry.error.clone(),
            },
            None => QueryState {
                data: None,
                is_loading,
                is_stale: false,
                error: None,
            },
        }
    }

    #[cfg(test)]
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.entries().get(key).is_some_and(|e| e.stale)
    }

    /// Receive every invalidated prefix.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.inner.events.subscribe()
    }

    /// Drop everything. Fetches still in flight finish but are not stored.
    pub fn clear(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries().clear();
        self.inner
            .fetch_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Drop entries nobody has read within `idle`, and the fetch locks of
    /// dropped keys nobody is holding or waiting on.
    pub fn collect_garbage(&self, idle: Duration) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_read.elapsed() < idle);
        let dropped = before - entries.len();

        self.inner
            .fetch_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|key, lock| entries.contains_key(key) || Arc::strong_count(lock) > 1);
        dropped
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries().len()
    }
}
