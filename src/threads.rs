//! Thread lifecycle: one conversation per (user, graph type).
//!
//! A thread record is created exactly once per user and graph type and then
//! reused; only its `last_updated_at` field ever changes. Records are never
//! deleted here. Eviction of stale records is a store concern left to a
//! durable backend.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

/// One conversation instance of a graph, keyed by `(user_id, thread_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub user_id: String,
    pub thread_id: String,
    pub root_id: String,
    pub graph_type: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// Aggregate of a user's threads for one graph type, consumed by the router
/// and by thread resolution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummary {
    pub count: usize,
    pub last_updated_at: DateTime<Utc>,
    /// Most recently updated thread of the graph type.
    pub thread_id: String,
    pub root_id: String,
}

/// Identifiers resolved for an interaction, plus whether the record was
/// minted by this call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedThread {
    pub thread_id: String,
    pub root_id: String,
    pub created: bool,
}

/// In-memory thread store.
///
/// All mutation happens under one mutex, which makes record creation
/// idempotent under races: two concurrent requests for the same new
/// `(user, graph type)` serialize, the second observes the first's record
/// and reuses it instead of minting a duplicate.
#[derive(Default)]
pub struct ThreadManager {
    records: Mutex<FxHashMap<(String, String), ThreadRecord>>,
}

impl ThreadManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Per-graph-type summary of a user's threads. Within a graph type the
    /// summary tracks the most recently updated thread's ids.
    #[must_use]
    pub fn summarize_by_graph_type(&self, user_id: &str) -> FxHashMap<String, ThreadSummary> {
        let records = self.records.lock().expect("thread store lock poisoned");
        let mut summaries: FxHashMap<String, ThreadSummary> = FxHashMap::default();
        for record in records.values().filter(|r| r.user_id == user_id) {
            summaries
                .entry(record.graph_type.clone())
                .and_modify(|summary| {
                    summary.count += 1;
                    if record.last_updated_at > summary.last_updated_at {
                        summary.last_updated_at = record.last_updated_at;
                        summary.thread_id = record.thread_id.clone();
                        summary.root_id = record.root_id.clone();
                    }
                })
                .or_insert_with(|| ThreadSummary {
                    count: 1,
                    last_updated_at: record.last_updated_at,
                    thread_id: record.thread_id.clone(),
                    root_id: record.root_id.clone(),
                });
        }
        summaries
    }

    /// Reuse the user's existing thread for `graph_type`, bumping its
    /// `last_updated_at`, or mint a new record. At most one active thread
    /// exists per user and graph type.
    #[instrument(skip(self))]
    pub fn resolve_thread(&self, user_id: &str, graph_type: &str) -> ResolvedThread {
        let mut records = self.records.lock().expect("thread store lock poisoned");
        let now = Utc::now();

        let existing = records
            .values_mut()
            .filter(|r| r.user_id == user_id && r.graph_type == graph_type)
            .max_by_key(|r| r.last_updated_at);
        if let Some(record) = existing {
            record.last_updated_at = now;
            tracing::debug!(thread_id = %record.thread_id, "thread reused");
            return ResolvedThread {
                thread_id: record.thread_id.clone(),
                root_id: record.root_id.clone(),
                created: false,
            };
        }

        let thread_id = mint_thread_id(now);
        let root_id = Uuid::new_v4().to_string();
        let record = ThreadRecord {
            user_id: user_id.to_string(),
            thread_id: thread_id.clone(),
            root_id: root_id.clone(),
            graph_type: graph_type.to_string(),
            created_at: now,
            last_updated_at: now,
        };
        records.insert((user_id.to_string(), thread_id.clone()), record);
        tracing::debug!(%thread_id, "thread minted");
        ResolvedThread {
            thread_id,
            root_id,
            created: true,
        }
    }

    /// Bump `last_updated_at` on an existing record. No-op for unknown keys.
    pub fn touch(&self, user_id: &str, thread_id: &str) {
        let mut records = self.records.lock().expect("thread store lock poisoned");
        if let Some(record) = records.get_mut(&(user_id.to_string(), thread_id.to_string())) {
            record.last_updated_at = Utc::now();
        }
    }

    /// Snapshot of one record.
    #[must_use]
    pub fn record(&self, user_id: &str, thread_id: &str) -> Option<ThreadRecord> {
        let records = self.records.lock().expect("thread store lock poisoned");
        records
            .get(&(user_id.to_string(), thread_id.to_string()))
            .cloned()
    }
}

/// Globally unique thread id: millisecond timestamp plus a random suffix.
fn mint_thread_id(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("thread-{}-{suffix:06x}", now.timestamp_millis())
}
