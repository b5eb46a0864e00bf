use crate::model::{Id, StageRecord};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cache entry for a staged draft
#[derive(Clone, Debug)]
struct StageEntry {
    record: StageRecord,
    last_touched: Instant,
}

/// In-memory holding area for pre-commit form drafts with TTL.
///
/// Process-wide and unpersisted: a restart loses uncommitted stages. Expiry
/// is lazy: entries are dropped when read past their TTL or swept by
/// [`prune_expired`](Self::prune_expired), which the staging API calls on
/// every invocation. There is no background timer.
#[derive(Debug)]
pub struct StagingStore {
    entries: Arc<RwLock<HashMap<Id, StageEntry>>>,
    /// Time-to-live for staged drafts (1 hour)
    ttl: Duration,
}

impl StagingStore {
    /// Create a new staging store with 1-hour TTL
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(3600))
    }

    /// Custom TTL, used by tests to exercise expiry without waiting.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Get a staged draft if present and not expired
    pub async fn get(&self, id: &Id) -> Option<StageRecord> {
        let mut entries = self.entries.write().await;

        if let Some(entry) = entries.get(id) {
            if entry.last_touched.elapsed() > self.ttl {
                entries.remove(id);
                return None;
            }
            Some(entry.record.clone())
        } else {
            None
        }
    }

    /// Insert or replace a staged draft, refreshing its activity clock
    pub async fn put(&self, record: StageRecord) {
        let mut entries = self.entries.write().await;
        entries.insert(
            record.id.clone(),
            StageEntry {
                record,
                last_touched: Instant::now(),
            },
        );
    }

    /// Remove a staged draft; true when something was actually removed
    pub async fn remove(&self, id: &Id) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(id).is_some()
    }

    /// Drop every entry past its TTL, returning how many were removed
    pub async fn prune_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = Instant::now();
        let ttl = self.ttl;

        let expired_ids: Vec<Id> = entries
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_touched) > ttl)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired_ids {
            entries.remove(id);
        }
        expired_ids.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for StagingStore {
    fn default() -> Self {
        Self::new()
    }
}
