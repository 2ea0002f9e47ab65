//! # Event Bus System
//!
//! Provides an event-driven view of the media cache using `tokio::sync::broadcast`.
//! Cache and queue components publish typed events; hosts subscribe to drive
//! diagnostics overlays, metrics or prefetch heuristics without coupling to the
//! cache internals.
//!
//! ## Overview
//!
//! The event bus system consists of:
//! - **Event Types**: Strongly-typed enum hierarchies for the cache and the queue
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Wrapper for consuming events with filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   emit    ┌───────────┐
//! │ CacheStore   ├──────────>│           │
//! └──────────────┘           │           │   subscribe   ┌────────────┐
//! ┌──────────────┐   emit    │ EventBus  ├──────────────>│ Subscriber │
//! │ DataSource   ├──────────>│ (broadcast│               └────────────┘
//! └──────────────┘           │  channel) │
//! ┌──────────────┐   emit    │           │
//! │ PlaybackQueue├──────────>│           │
//! └──────────────┘           └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Cache(CacheEvent::SpanCached {
//!         resource_key: "track-1".to_string(),
//!         offset: 0,
//!         length: 4096,
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert!(matches!(event, CoreEvent::Cache(_)));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.
//!
//! Publishers ignore the error returned when nobody is subscribed.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Cache hits are emitted per segment, so the buffer is sized for bursts
/// during seeks. Subscribers that can't keep up receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Span storage, eviction and hit/miss events
    Cache(CacheEvent),
    /// Playback queue events
    Queue(QueueEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Cache(CacheEvent::SpanInvalidated { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::CacheDegraded { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::CapacityExceeded { .. }) => EventSeverity::Warning,
            CoreEvent::Cache(CacheEvent::FetchFailed { .. }) => EventSeverity::Error,
            CoreEvent::Cache(CacheEvent::SpanEvicted { .. }) => EventSeverity::Info,
            CoreEvent::Queue(QueueEvent::Prepared { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    /// Debug-level events (verbose)
    Debug,
    /// Informational events
    Info,
    /// Warning events
    Warning,
    /// Error events
    Error,
}

// ============================================================================
// Cache Events
// ============================================================================

/// Events emitted by the span store and the caching data source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// A span was finalized and indexed.
    SpanCached {
        resource_key: String,
        offset: u64,
        length: u64,
    },
    /// A span was removed by the evictor.
    SpanEvicted {
        resource_key: String,
        offset: u64,
        length: u64,
    },
    /// A span failed to read back and was dropped.
    SpanInvalidated {
        resource_key: String,
        offset: u64,
        /// Human-readable cause (cipher failure, missing file, ...).
        reason: String,
    },
    /// A byte range was served from cache.
    CacheHit {
        resource_key: String,
        offset: u64,
        length: u64,
    },
    /// A byte range had to be fetched from upstream.
    CacheMiss {
        resource_key: String,
        offset: u64,
        /// `None` when the gap runs to the end of the resource.
        length: Option<u64>,
    },
    /// Caching was abandoned for a fetch; bytes keep flowing uncached.
    CacheDegraded {
        resource_key: String,
        message: String,
    },
    /// Reclaim could not bring the cache under its budget.
    CapacityExceeded {
        total_bytes: u64,
        capacity_bytes: u64,
    },
    /// Upstream failed while a data source was reading.
    FetchFailed {
        resource_key: String,
        offset: u64,
        message: String,
        retryable: bool,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::SpanCached { .. } => "Span cached",
            CacheEvent::SpanEvicted { .. } => "Span evicted",
            CacheEvent::SpanInvalidated { .. } => "Span invalidated",
            CacheEvent::CacheHit { .. } => "Served from cache",
            CacheEvent::CacheMiss { .. } => "Fetching from upstream",
            CacheEvent::CacheDegraded { .. } => "Caching disabled for fetch",
            CacheEvent::CapacityExceeded { .. } => "Cache over capacity",
            CacheEvent::FetchFailed { .. } => "Upstream fetch failed",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Events emitted by the playback queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// Items were appended to the queue.
    ItemsAppended {
        /// Index of the first appended item.
        first_index: usize,
        /// Number of items appended.
        count: usize,
    },
    /// The queue was prepared for playback.
    Prepared { items: usize },
    /// A queue reader moved on to another item.
    ItemStarted {
        index: usize,
        resource_key: String,
    },
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::ItemsAppended { .. } => "Items appended to queue",
            QueueEvent::Prepared { .. } => "Queue prepared",
            QueueEvent::ItemStarted { .. } => "Queue item started",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for core events.
///
/// Cloning is cheap; every clone publishes into the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event.
    /// Returns an error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber to receive events.
    ///
    /// Each call creates an independent receiver that will receive all future events.
    /// Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with additional filtering capabilities.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let evictions = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Cache(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Adds a filter function to this stream.
    ///
    /// Only events that match the filter will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };

            if filter(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };

                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cached(key: &str, offset: u64) -> CoreEvent {
        CoreEvent::Cache(CacheEvent::SpanCached {
            resource_key: key.to_string(),
            offset,
            length: 100,
        })
    }

    #[tokio::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(cached("a", 0)).is_err());
    }

    #[tokio::test]
    async fn test_event_emission_with_subscribers() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe();

        let event = cached("track-1", 0);
        let result = bus.emit(event.clone());
        assert_eq!(result.unwrap(), 1);

        let received = sub.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CoreEvent::Queue(QueueEvent::Prepared { items: 3 });
        bus.emit(event.clone()).ok();

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| matches!(event, CoreEvent::Queue(_)));

        bus.emit(cached("a", 0)).ok();
        let queued = CoreEvent::Queue(QueueEvent::ItemsAppended {
            first_index: 0,
            count: 2,
        });
        bus.emit(queued.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), queued);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for offset in 0..5 {
            bus.emit(cached("a", offset)).ok();
        }

        let result = sub.recv().await;
        assert!(matches!(result, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Cache(CacheEvent::FetchFailed {
            resource_key: "a".to_string(),
            offset: 0,
            message: "reset".to_string(),
            retryable: true,
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let over = CoreEvent::Cache(CacheEvent::CapacityExceeded {
            total_bytes: 2,
            capacity_bytes: 1,
        });
        assert_eq!(over.severity(), EventSeverity::Warning);

        let hit = CoreEvent::Cache(CacheEvent::CacheHit {
            resource_key: "a".to_string(),
            offset: 0,
            length: 1,
        });
        assert_eq!(hit.severity(), EventSeverity::Debug);
        assert_eq!(hit.description(), "Served from cache");
    }

    #[tokio::test]
    async fn test_concurrent_publishers() {
        let bus = EventBus::new(100);
        let mut sub = bus.subscribe();

        let bus1 = bus.clone();
        let bus2 = bus.clone();

        let handle1 = tokio::spawn(async move {
            for offset in 0..10 {
                bus1.emit(cached("a", offset)).ok();
            }
        });
        let handle2 = tokio::spawn(async move {
            for index in 0..10 {
                bus2.emit(CoreEvent::Queue(QueueEvent::ItemStarted {
                    index,
                    resource_key: "b".to_string(),
                }))
                .ok();
            }
        });

        handle1.await.ok();
        handle2.await.ok();

        let mut count = 0;
        while sub.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 20);
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Cache(CacheEvent::CacheMiss {
            resource_key: "track-9".to_string(),
            offset: 4096,
            length: None,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("track-9"));
        assert!(json.contains("CacheMiss"));

        let deserialized: CoreEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
