//! Session store: an arena of fragment sessions keyed by connection.
//!
//! Each record holds the owner (slot 0) and the uploaded fragments (slots
//! 1..). Records expire a fixed TTL after they are opened; expired records
//! are invisible to reads and reclaimed by [`SessionStore::reap_expired`].

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use parley_common::ConnectionId;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Record {
    owner: Option<String>,
    fragments: BTreeMap<u32, String>,
    expires_at: Instant,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// One page of fragments, in index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentPage {
    pub items: Vec<(u32, String)>,
    /// Set when more fragments follow; pass it back as `exclusive_start`.
    pub last_evaluated: Option<u32>,
}

/// Thread-safe session arena.
#[derive(Clone)]
pub struct SessionStore {
    records: Arc<RwLock<HashMap<ConnectionId, Record>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Write the owner record. A new START discards fragments of any earlier
    /// upload on the same connection.
    pub async fn open_session(&self, connection: &ConnectionId, user_id: &str) {
        let mut map = self.records.write().await;
        map.insert(
            connection.clone(),
            Record {
                owner: Some(user_id.to_string()),
                fragments: BTreeMap::new(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Store one fragment at `index` (>= 1). A fragment for a connection with
    /// no live record starts its own record with a fresh TTL.
    pub async fn put_fragment(&self, connection: &ConnectionId, index: u32, payload: String) {
        let mut map = self.records.write().await;
        let now = Instant::now();
        let ttl = self.ttl;
        let record = map.entry(connection.clone()).or_insert_with(|| Record {
            owner: None,
            fragments: BTreeMap::new(),
            expires_at: now + ttl,
        });
        if !record.is_live(now) {
            *record = Record {
                owner: None,
                fragments: BTreeMap::new(),
                expires_at: now + ttl,
            };
        }
        if record.fragments.insert(index, payload).is_some() {
            tracing::debug!(connection = %connection, index, "Fragment replaced");
        }
    }

    /// Owner of a live session.
    pub async fn owner(&self, connection: &ConnectionId) -> Option<String> {
        let map = self.records.read().await;
        map.get(connection)
            .filter(|r| r.is_live(Instant::now()))
            .and_then(|r| r.owner.clone())
    }

    /// Up to `limit` fragments with index greater than `exclusive_start`.
    pub async fn query_fragments(
        &self,
        connection: &ConnectionId,
        exclusive_start: Option<u32>,
        limit: usize,
    ) -> FragmentPage {
        let map = self.records.read().await;
        let Some(record) = map.get(connection).filter(|r| r.is_live(Instant::now())) else {
            return FragmentPage {
                items: Vec::new(),
                last_evaluated: None,
            };
        };
        let lower = match exclusive_start {
            Some(start) => Bound::Excluded(start),
            None => Bound::Included(1),
        };
        let mut range = record.fragments.range((lower, Bound::Unbounded));
        let items: Vec<(u32, String)> = range
            .by_ref()
            .take(limit.max(1))
            .map(|(i, p)| (*i, p.clone()))
            .collect();
        let last_evaluated = match range.next() {
            Some(_) => items.last().map(|(i, _)| *i),
            None => None,
        };
        FragmentPage {
            items,
            last_evaluated,
        }
    }

    /// Drop expired records. Returns how many were reclaimed.
    pub async fn reap_expired(&self) -> usize {
        let mut map = self.records.write().await;
        let now = Instant::now();
        let before = map.len();
        map.retain(|id, record| {
            let live = record.is_live(now);
            if !live {
                tracing::info!(connection = %id, fragments = record.fragments.len(), "Reaping expired session");
            }
            live
        });
        before - map.len()
    }

    /// Number of records, live or not yet reaped.
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}
