//! # Playback Queue
//!
//! Append-only list of media items, and a reader that plays them back to back
//! as one continuous byte stream through a [`CachingDataSource`].

use crate::datasource::CachingDataSource;
use crate::cache::DataSourceStats;
use crate::error::{PlaybackError, Result};
use crate::types::{DataSpec, ResourceKey};
use bytes::Bytes;
use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
use core_runtime::logging::redact_uri;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One entry of the queue. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub resource_key: ResourceKey,
    pub source_uri: String,
}

impl QueueItem {
    /// Item keyed by its URI.
    pub fn new(source_uri: impl Into<String>) -> Self {
        let source_uri = source_uri.into();
        Self {
            resource_key: ResourceKey::from_uri(&source_uri),
            source_uri,
        }
    }

    pub fn with_key(mut self, key: impl Into<ResourceKey>) -> Self {
        self.resource_key = key.into();
        self
    }

    fn data_spec(&self) -> DataSpec {
        DataSpec::new(self.source_uri.clone()).with_key(self.resource_key.clone())
    }
}

/// Ordered, append-only media queue.
pub struct PlaybackQueue {
    items: RwLock<Vec<QueueItem>>,
    prepared: AtomicBool,
    len_tx: watch::Sender<usize>,
    event_bus: Option<EventBus>,
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackQueue {
    pub fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            items: RwLock::new(Vec::new()),
            prepared: AtomicBool::new(false),
            len_tx,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Append items in order. Returns the new length.
    pub fn append(&self, items: impl IntoIterator<Item = QueueItem>) -> usize {
        let (first_index, len) = {
            let mut queue = self.items.write();
            let first_index = queue.len();
            queue.extend(items);
            (first_index, queue.len())
        };

        let count = len - first_index;
        if count > 0 {
            debug!(first_index, count, "Appended queue items");
            self.len_tx.send_replace(len);
            self.emit(QueueEvent::ItemsAppended { first_index, count });
        }
        len
    }

    /// Append one item per URI, keyed by the URI.
    pub fn append_uris<I, S>(&self, uris: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.append(uris.into_iter().map(QueueItem::new))
    }

    /// Mark the queue ready for playback. Allowed once.
    pub fn prepare(&self) -> Result<()> {
        if self
            .prepared
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PlaybackError::AlreadyPrepared);
        }

        let items = self.len();
        info!("Queue prepared with {} items", items);
        self.emit(QueueEvent::Prepared { items });
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::Acquire)
    }

    pub fn get(&self, index: usize) -> Option<QueueItem> {
        self.items.read().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn items(&self) -> Vec<QueueItem> {
        self.items.read().clone()
    }

    /// Wait until the queue holds at least `len` items.
    pub async fn wait_for_len(&self, len: usize) -> usize {
        let mut rx = self.len_tx.subscribe();
        let reached = match rx.wait_for(|current| *current >= len).await {
            Ok(current) => *current,
            Err(_) => self.len(),
        };
        reached
    }

    /// Reader that walks the queue through `source`.
    pub fn reader(self: &Arc<Self>, source: CachingDataSource) -> QueueReader {
        QueueReader::new(Arc::clone(self), source)
    }

    fn emit(&self, event: QueueEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Queue(event));
        }
    }
}

/// Continuous stream over every queue item, in order.
///
/// Items appended while reading are picked up when the reader reaches them.
pub struct QueueReader {
    queue: Arc<PlaybackQueue>,
    source: CachingDataSource,
    index: usize,
    opened: bool,
}

impl QueueReader {
    pub fn new(queue: Arc<PlaybackQueue>, source: CachingDataSource) -> Self {
        Self {
            queue,
            source,
            index: 0,
            opened: false,
        }
    }

    /// Index of the item being read (or next to be read).
    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn stats(&self) -> DataSourceStats {
        self.source.stats()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.source.cancellation_token()
    }

    /// Next chunk tagged with its item index, or `None` once every item
    /// appended so far has been read.
    ///
    /// An error leaves the failing item current, so a transient failure is
    /// retried by calling again. Use [`skip_current`](Self::skip_current) to
    /// move past an item that cannot be read.
    pub async fn next_chunk(&mut self) -> Result<Option<(usize, Bytes)>> {
        if !self.queue.is_prepared() {
            return Err(PlaybackError::NotPrepared);
        }

        loop {
            if !self.opened {
                let Some(item) = self.queue.get(self.index) else {
                    return Ok(None);
                };
                debug!(index = self.index, uri = %redact_uri(&item.source_uri), "Starting queue item");
                self.source.open(item.data_spec()).await?;
                self.opened = true;
                self.queue.emit(QueueEvent::ItemStarted {
                    index: self.index,
                    resource_key: item.resource_key.to_string(),
                });
            }

            match self.source.read_chunk().await? {
                Some(chunk) => return Ok(Some((self.index, chunk))),
                None => {
                    self.source.close().await?;
                    self.opened = false;
                    self.index += 1;
                }
            }
        }
    }

    /// Like [`next_chunk`](Self::next_chunk), but waits for more items instead
    /// of ending when the queue is exhausted.
    pub async fn next_chunk_waiting(&mut self) -> Result<(usize, Bytes)> {
        loop {
            if let Some(next) = self.next_chunk().await? {
                return Ok(next);
            }
            self.queue.wait_for_len(self.index + 1).await;
        }
    }

    /// Abandon the current item and move on to the next one. Bytes already
    /// fetched for the item stay cached.
    ///
    /// Returns the index the reader continues from.
    pub async fn skip_current(&mut self) -> Result<usize> {
        debug!(index = self.index, "Skipping queue item");
        self.opened = false;
        self.source.close().await?;
        self.index += 1;
        Ok(self.index)
    }

    pub async fn close(&mut self) -> Result<()> {
        self.opened = false;
        self.source.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_get() {
        let queue = PlaybackQueue::new();
        assert!(queue.is_empty());

        assert_eq!(queue.append_uris(["https://a/1.mp3?sig=x", "https://a/2.mp3"]), 2);
        assert_eq!(queue.append([QueueItem::new("https://a/3.mp3").with_key("three")]), 3);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.get(0).unwrap().resource_key.as_str(), "https://a/1.mp3");
        assert_eq!(queue.get(2).unwrap().resource_key.as_str(), "three");
        assert!(queue.get(3).is_none());
        assert_eq!(queue.items().len(), 3);
    }

    #[test]
    fn test_prepare_once() {
        let queue = PlaybackQueue::new();
        assert!(!queue.is_prepared());
        queue.prepare().unwrap();
        assert!(queue.is_prepared());
        assert!(matches!(queue.prepare(), Err(PlaybackError::AlreadyPrepared)));
    }

    #[test]
    fn test_append_emits_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let queue = PlaybackQueue::new().with_event_bus(bus);
        queue.append_uris(["u1"]);
        queue.append_uris(Vec::<String>::new());

        assert_eq!(
            rx.try_recv().unwrap(),
            CoreEvent::Queue(QueueEvent::ItemsAppended {
                first_index: 0,
                count: 1
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_for_len_wakes_on_append() {
        let queue = Arc::new(PlaybackQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.wait_for_len(2).await })
        };

        queue.append_uris(["a"]);
        queue.append_uris(["b"]);
        assert_eq!(waiter.await.unwrap(), 2);
        assert_eq!(queue.wait_for_len(1).await, 2);
    }
}
