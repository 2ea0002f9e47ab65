//! LRU eviction over unlocked spans.

use super::index::{CacheIndex, Span};
use super::layout::SpanLayout;
use crate::error::PlaybackError;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Result of a reclaim pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    /// Bytes released from the index.
    pub freed: u64,
    /// Number of spans evicted.
    pub evicted: usize,
    /// Bytes still missing after the pass (only locked spans were left).
    pub deficit: u64,
}

/// Frees space by deleting least recently used spans.
///
/// Metadata is removed under the index lock; files are deleted afterwards so
/// disk I/O never runs while the lock is held.
pub struct LruEvictor {
    index: Arc<CacheIndex>,
    layout: SpanLayout,
    capacity_bytes: u64,
    event_bus: Option<EventBus>,
}

impl LruEvictor {
    pub fn new(index: Arc<CacheIndex>, layout: SpanLayout, capacity_bytes: u64) -> Self {
        Self {
            index,
            layout,
            capacity_bytes,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Bytes held beyond the budget.
    pub fn overflow(&self) -> u64 {
        self.index.total_bytes().saturating_sub(self.capacity_bytes)
    }

    /// Evict until `bytes_needed` are freed or no unlocked span remains.
    #[instrument(skip(self))]
    pub async fn reclaim(&self, bytes_needed: u64) -> ReclaimOutcome {
        if bytes_needed == 0 {
            return ReclaimOutcome::default();
        }

        let victims = self.index.remove_lru(bytes_needed);
        let freed: u64 = victims.iter().map(|s| s.length).sum();
        let evicted = victims.len();

        for span in &victims {
            self.delete_file(span).await;
            self.emit(CacheEvent::SpanEvicted {
                resource_key: span.key.to_string(),
                offset: span.offset,
                length: span.length,
            });
        }

        let outcome = ReclaimOutcome {
            freed,
            evicted,
            deficit: bytes_needed.saturating_sub(freed),
        };
        if evicted > 0 {
            info!(
                "Evicted {} spans ({} bytes), {} bytes short",
                outcome.evicted, outcome.freed, outcome.deficit
            );
        }
        outcome
    }

    /// Bring the cache back under its budget, reporting a soft overflow when
    /// locked spans prevent it.
    pub async fn enforce_capacity(&self) -> ReclaimOutcome {
        let overflow = self.overflow();
        if overflow == 0 {
            return ReclaimOutcome::default();
        }

        let outcome = self.reclaim(overflow).await;
        if outcome.deficit > 0 {
            let total_bytes = self.index.total_bytes();
            warn!(
                "{}",
                PlaybackError::CapacityExceeded {
                    total_bytes,
                    capacity_bytes: self.capacity_bytes,
                }
            );
            self.emit(CacheEvent::CapacityExceeded {
                total_bytes,
                capacity_bytes: self.capacity_bytes,
            });
        }
        outcome
    }

    async fn delete_file(&self, span: &Span) {
        let path = self.layout.span_path(span);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(span_id = span.id, "Deleted span file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(span_id = span.id, "Failed to delete span file: {}", e),
        }
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }
}
