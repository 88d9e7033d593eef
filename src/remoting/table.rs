//! Correlation table: `opaque -> ReplyFuture` for outstanding requests.

use super::reply::ReplyFuture;
use crate::protocol::Command;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

/// Concurrent map shared by the sending path, the receive path and the reaper.
///
/// Backed by a sharded map so a reaper scan only locks one shard at a time.
pub struct ReplyTable {
    replies: DashMap<u64, Arc<ReplyFuture>>,
}

impl ReplyTable {
    pub fn new() -> Self {
        Self {
            replies: DashMap::with_capacity(256),
        }
    }

    /// Store `future` under its opaque
    ///
    /// Callers keep opaques unique among in-flight requests.
    pub fn register(&self, future: Arc<ReplyFuture>) {
        self.replies.insert(future.opaque(), future);
    }

    pub fn get(&self, opaque: u64) -> Option<Arc<ReplyFuture>> {
        self.replies.get(&opaque).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove and return the entry; a second removal returns `None`
    pub fn remove(&self, opaque: u64) -> Option<Arc<ReplyFuture>> {
        self.replies.remove(&opaque).map(|(_, future)| future)
    }

    /// Remove the entry only if it is still `future`.
    ///
    /// Keeps a late cleanup from evicting a newer request that reused the
    /// same opaque.
    pub fn remove_exact(&self, future: &Arc<ReplyFuture>) -> bool {
        self.replies
            .remove_if(&future.opaque(), |_, current| Arc::ptr_eq(current, future))
            .is_some()
    }

    /// Hand `response` to the future waiting on its opaque.
    ///
    /// Returns the future if this call completed it. `None` means nobody was
    /// waiting any more (late, duplicate or already-timed-out reply).
    pub fn resolve(&self, response: Command) -> Option<Arc<ReplyFuture>> {
        let future = self.remove(response.opaque())?;
        if future.complete(Some(response)) {
            Some(future)
        } else {
            None
        }
    }

    /// Remove every entry older than its timeout plus `guard`
    pub fn evict_expired(&self, guard: Duration) -> Vec<Arc<ReplyFuture>> {
        let expired: Vec<u64> = self
            .replies
            .iter()
            .filter(|entry| entry.value().is_expired(guard))
            .map(|entry| *entry.key())
            .collect();

        expired
            .into_iter()
            .filter_map(|opaque| {
                self.replies
                    .remove_if(&opaque, |_, future| future.is_expired(guard))
                    .map(|(_, future)| future)
            })
            .collect()
    }

    /// Remove every entry
    pub fn drain(&self) -> Vec<Arc<ReplyFuture>> {
        let opaques: Vec<u64> = self.replies.iter().map(|entry| *entry.key()).collect();
        opaques
            .into_iter()
            .filter_map(|opaque| self.remove(opaque))
            .collect()
    }

    pub fn contains(&self, opaque: u64) -> bool {
        self.replies.contains_key(&opaque)
    }

    pub fn len(&self) -> usize {
        self.replies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }
}

impl Default for ReplyTable {
    fn default() -> Self {
        Self::new()
    }
}
