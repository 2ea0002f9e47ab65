//! # Span Index
//!
//! In-memory map from resource keys to the encrypted spans that hold their
//! bytes, plus the bookkeeping needed to share spans safely:
//!
//! - **Leases** ([`SpanLease`]) lock a span while a reader streams it so the
//!   evictor skips it.
//! - **Claims** ([`WriteClaim`]) register an in-flight write over a gap so
//!   concurrent readers can wait for it instead of fetching the same bytes.
//! - **Recency** is tracked in an [`LruCache`] and drives eviction order.
//!
//! All state sits behind one mutex that is never held across an `.await` and
//! never while touching disk.

use crate::types::ResourceKey;
use bridge_traits::{ByteRange, Clock, SystemClock};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Process-unique span identifier. Higher ids were written more recently.
pub type SpanId = u64;

/// Current checkpoint format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A contiguous, finalized run of cached bytes for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub key: ResourceKey,
    pub offset: u64,
    pub length: u64,
    pub last_access: DateTime<Utc>,
    /// Whether a reader held a lease when this copy was taken.
    #[serde(skip)]
    pub locked: bool,
}

impl Span {
    pub fn new(id: SpanId, key: ResourceKey, offset: u64, length: u64) -> Self {
        Self {
            id,
            key,
            offset,
            length,
            last_access: Utc::now(),
            locked: false,
        }
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    pub fn contains(&self, position: u64) -> bool {
        position >= self.offset && position < self.end()
    }

    pub fn range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.length)
    }
}

/// One piece of a resolved request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// `range` can be read from `span`.
    Cached { span: Span, range: ByteRange },
    /// `range` is not cached. An open-ended gap runs to the end of the resource.
    Gap { range: ByteRange },
}

impl Segment {
    pub fn range(&self) -> ByteRange {
        match self {
            Segment::Cached { range, .. } | Segment::Gap { range } => *range,
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, Segment::Cached { .. })
    }
}

/// Outcome of [`CacheIndex::resolve`].
#[derive(Debug)]
pub enum Resolution {
    /// Bytes at the position are cached; the span stays locked while the
    /// lease lives.
    Cached { lease: SpanLease, range: ByteRange },
    /// Another writer is fetching this position. Wait for `done` to close,
    /// then resolve again.
    Wait { done: watch::Receiver<()> },
    /// Nobody has these bytes. The caller owns the claim until it drops it.
    Fetch { claim: WriteClaim, range: ByteRange },
    /// The position is at or past the end of the resource or request.
    End,
}

/// Aggregate index counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub resources: usize,
    pub spans: usize,
    pub locked_spans: usize,
    pub pending_writes: usize,
    pub total_bytes: u64,
}

/// Serializable copy of the index used for checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub version: u32,
    pub next_id: SpanId,
    /// Least recently used first.
    pub spans: Vec<Span>,
    #[serde(default)]
    pub content_lengths: BTreeMap<ResourceKey, u64>,
}

struct SpanEntry {
    span: Span,
    readers: usize,
}

impl SpanEntry {
    fn snapshot(&self) -> Span {
        let mut span = self.span.clone();
        span.locked = self.readers > 0;
        span
    }
}

struct PendingWrite {
    start: u64,
    end: Option<u64>,
    done: watch::Receiver<()>,
}

impl PendingWrite {
    fn contains(&self, position: u64) -> bool {
        position >= self.start && self.end.map_or(true, |end| position < end)
    }
}

#[derive(Default)]
struct ResourceEntry {
    spans: BTreeSet<(u64, SpanId)>,
    content_length: Option<u64>,
    pending: BTreeMap<u64, PendingWrite>,
}

impl ResourceEntry {
    fn is_vacant(&self) -> bool {
        self.spans.is_empty() && self.pending.is_empty() && self.content_length.is_none()
    }
}

enum Coverage {
    Span { id: SpanId, end: u64 },
    Gap { end: Option<u64> },
}

struct IndexState {
    resources: HashMap<ResourceKey, ResourceEntry>,
    spans: HashMap<SpanId, SpanEntry>,
    recency: LruCache<SpanId, ()>,
    total_bytes: u64,
    next_id: SpanId,
    next_claim: u64,
}

fn min_end(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn range_between(start: u64, end: Option<u64>) -> ByteRange {
    match end {
        Some(end) => ByteRange::new(start, end - start),
        None => ByteRange::from(start),
    }
}

impl IndexState {
    fn new() -> Self {
        Self {
            resources: HashMap::new(),
            spans: HashMap::new(),
            recency: LruCache::unbounded(),
            total_bytes: 0,
            next_id: 1,
            next_claim: 1,
        }
    }

    fn content_length(&self, key: &ResourceKey) -> Option<u64> {
        self.resources.get(key).and_then(|r| r.content_length)
    }

    /// Request end clamped to the known content length.
    fn clamp_end(&self, key: &ResourceKey, end: Option<u64>) -> Option<u64> {
        min_end(end, self.content_length(key))
    }

    /// What serves byte `position`: the newest covering span up to where a
    /// newer span takes over, or a gap up to the next span.
    fn coverage_at(&self, key: &ResourceKey, position: u64, limit: Option<u64>) -> Coverage {
        let Some(resource) = self.resources.get(key) else {
            return Coverage::Gap { end: limit };
        };

        let mut best: Option<&Span> = None;
        let mut next_start: Option<u64> = None;
        for (_, id) in &resource.spans {
            let Some(entry) = self.spans.get(id) else {
                continue;
            };
            let span = &entry.span;
            if span.contains(position) {
                if best.map_or(true, |b| span.id > b.id) {
                    best = Some(span);
                }
            } else if span.offset > position {
                next_start = min_end(next_start, Some(span.offset));
            }
        }

        match best {
            Some(best) => {
                let mut end = best.end();
                for &(offset, id) in resource.spans.range((position.saturating_add(1), 0)..) {
                    if offset >= end {
                        break;
                    }
                    if id > best.id {
                        end = offset;
                    }
                }
                let end = limit.map_or(end, |limit| end.min(limit));
                Coverage::Span { id: best.id, end }
            }
            None => Coverage::Gap {
                end: min_end(next_start, limit),
            },
        }
    }

    fn add_span(&mut self, span: Span) {
        self.next_id = self.next_id.max(span.id + 1);
        self.total_bytes += span.length;
        self.recency.put(span.id, ());
        self.resources
            .entry(span.key.clone())
            .or_default()
            .spans
            .insert((span.offset, span.id));
        self.spans.insert(span.id, SpanEntry { span, readers: 0 });
    }

    fn remove_span(&mut self, id: SpanId) -> Option<Span> {
        let entry = self.spans.remove(&id)?;
        self.recency.pop(&id);
        self.total_bytes = self.total_bytes.saturating_sub(entry.span.length);

        let key = &entry.span.key;
        if let Some(resource) = self.resources.get_mut(key) {
            resource.spans.remove(&(entry.span.offset, id));
            if resource.is_vacant() {
                self.resources.remove(key);
            }
        }
        Some(entry.span)
    }
}

/// Thread-safe span index.
pub struct CacheIndex {
    state: Mutex<IndexState>,
    clock: Arc<dyn Clock>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CacheIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheIndex")
            .field("stats", &self.stats())
            .finish()
    }
}

impl CacheIndex {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Index whose access stamps come from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(IndexState::new()),
            clock,
        }
    }

    /// Reserve the id for a span about to be written.
    pub fn allocate_id(&self) -> SpanId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    /// Split `range` into cached segments and gaps.
    ///
    /// The request is clamped to the key's content length when known, so a
    /// request starting at or past the end yields no segments.
    pub fn lookup(&self, key: &ResourceKey, range: ByteRange) -> Vec<Segment> {
        let state = self.state.lock();
        let end = state.clamp_end(key, range.end());

        let mut segments = Vec::new();
        let mut position = range.start;
        while end.map_or(true, |end| position < end) {
            match state.coverage_at(key, position, end) {
                Coverage::Span { id, end: segment_end } => {
                    let Some(entry) = state.spans.get(&id) else {
                        break;
                    };
                    segments.push(Segment::Cached {
                        span: entry.snapshot(),
                        range: ByteRange::new(position, segment_end - position),
                    });
                    position = segment_end;
                }
                Coverage::Gap { end: gap_end } => {
                    segments.push(Segment::Gap {
                        range: range_between(position, gap_end),
                    });
                    match gap_end {
                        Some(gap_end) => position = gap_end,
                        None => break,
                    }
                }
            }
        }
        segments
    }

    /// Resolve the segment starting at `position` and take the matching
    /// lease or claim in the same critical section.
    pub fn resolve(
        self: &Arc<Self>,
        key: &ResourceKey,
        position: u64,
        end: Option<u64>,
        block_on_cache: bool,
    ) -> Resolution {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let end = state.clamp_end(key, end);
        if end.is_some_and(|end| position >= end) {
            return Resolution::End;
        }

        let gap_end = match state.coverage_at(key, position, end) {
            Coverage::Span { id, end: segment_end } => {
                if let Some(entry) = state.spans.get_mut(&id) {
                    entry.readers += 1;
                    let lease = SpanLease {
                        index: Arc::clone(self),
                        span: entry.snapshot(),
                    };
                    return Resolution::Cached {
                        lease,
                        range: ByteRange::new(position, segment_end - position),
                    };
                }
                end
            }
            Coverage::Gap { end: gap_end } => gap_end,
        };

        let resource = state.resources.entry(key.clone()).or_default();
        let mut gap_end = gap_end;
        if block_on_cache {
            if let Some(pending) = resource.pending.values().find(|p| p.contains(position)) {
                trace!(key = %key, position, "Waiting on in-flight write");
                return Resolution::Wait {
                    done: pending.done.clone(),
                };
            }
            let next_pending = resource
                .pending
                .values()
                .filter(|p| p.start > position)
                .map(|p| p.start)
                .min();
            gap_end = min_end(gap_end, next_pending);
        }

        let claim_id = state.next_claim;
        state.next_claim += 1;

        let (sender, receiver) = watch::channel(());
        resource.pending.insert(
            claim_id,
            PendingWrite {
                start: position,
                end: gap_end,
                done: receiver,
            },
        );

        let range = range_between(position, gap_end);
        debug!(key = %key, range = %range, "Claimed gap for fetch");
        Resolution::Fetch {
            claim: WriteClaim {
                index: Arc::clone(self),
                key: key.clone(),
                claim_id,
                range,
                _done: sender,
            },
            range,
        }
    }

    /// Register a finalized span.
    ///
    /// Older unlocked spans lying entirely inside the new one are dropped and
    /// returned so their files can be deleted.
    pub fn insert(&self, mut span: Span) -> Vec<Span> {
        span.last_access = self.clock.now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let shadowed: Vec<SpanId> = match state.resources.get(&span.key) {
            Some(resource) => resource
                .spans
                .range((span.offset, 0)..(span.end(), 0))
                .filter_map(|(_, id)| state.spans.get(id))
                .filter(|e| e.readers == 0 && e.span.id < span.id && e.span.end() <= span.end())
                .map(|e| e.span.id)
                .collect(),
            None => Vec::new(),
        };

        let removed: Vec<Span> = shadowed
            .into_iter()
            .filter_map(|id| state.remove_span(id))
            .collect();
        if !removed.is_empty() {
            debug!(key = %span.key, count = removed.len(), "Dropped shadowed spans");
        }

        state.add_span(span);
        removed
    }

    /// Remove a span regardless of leases. Outstanding leases stay valid and
    /// release nothing when dropped.
    pub fn remove(&self, key: &ResourceKey, id: SpanId) -> Option<Span> {
        let mut state = self.state.lock();
        match state.spans.get(&id) {
            Some(entry) if &entry.span.key == key => state.remove_span(id),
            _ => None,
        }
    }

    /// Mark a span as most recently used.
    pub fn touch(&self, id: SpanId) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if let Some(entry) = state.spans.get_mut(&id) {
            entry.span.last_access = self.clock.now();
            state.recency.promote(&id);
        }
    }

    /// Take a lease on a span, if it is still indexed.
    pub fn lock(self: &Arc<Self>, id: SpanId) -> Option<SpanLease> {
        let mut state = self.state.lock();
        let entry = state.spans.get_mut(&id)?;
        entry.readers += 1;
        Some(SpanLease {
            index: Arc::clone(self),
            span: entry.snapshot(),
        })
    }

    /// Release one lease. Unknown ids are ignored.
    pub fn unlock(&self, id: SpanId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.spans.get_mut(&id) {
            entry.readers = entry.readers.saturating_sub(1);
        }
    }

    pub fn is_locked(&self, id: SpanId) -> bool {
        self.state
            .lock()
            .spans
            .get(&id)
            .is_some_and(|e| e.readers > 0)
    }

    /// Remove least recently used unlocked spans until `bytes_needed` are
    /// freed or none are left. Returns the removed spans.
    pub fn remove_lru(&self, bytes_needed: u64) -> Vec<Span> {
        let mut state = self.state.lock();

        let mut freed = 0u64;
        let mut victims = Vec::new();
        for (id, _) in state.recency.iter().rev() {
            if freed >= bytes_needed {
                break;
            }
            if let Some(entry) = state.spans.get(id) {
                if entry.readers == 0 {
                    freed += entry.span.length;
                    victims.push(*id);
                }
            }
        }

        victims
            .into_iter()
            .filter_map(|id| state.remove_span(id))
            .collect()
    }

    /// Remove every unlocked span.
    pub fn clear(&self) -> Vec<Span> {
        let mut state = self.state.lock();
        let ids: Vec<SpanId> = state
            .spans
            .values()
            .filter(|e| e.readers == 0)
            .map(|e| e.span.id)
            .collect();
        ids.into_iter()
            .filter_map(|id| state.remove_span(id))
            .collect()
    }

    pub fn set_content_length(&self, key: &ResourceKey, length: u64) {
        let mut state = self.state.lock();
        let resource = state.resources.entry(key.clone()).or_default();
        if resource.content_length != Some(length) {
            debug!(key = %key, length, "Recorded content length");
            resource.content_length = Some(length);
        }
    }

    pub fn content_length(&self, key: &ResourceKey) -> Option<u64> {
        self.state.lock().content_length(key)
    }

    pub fn get(&self, id: SpanId) -> Option<Span> {
        self.state.lock().spans.get(&id).map(SpanEntry::snapshot)
    }

    /// Spans of one resource ordered by offset.
    pub fn spans_for(&self, key: &ResourceKey) -> Vec<Span> {
        let state = self.state.lock();
        state
            .resources
            .get(key)
            .map(|r| {
                r.spans
                    .iter()
                    .filter_map(|(_, id)| state.spans.get(id).map(SpanEntry::snapshot))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.lock();
        IndexStats {
            resources: state.resources.values().filter(|r| !r.spans.is_empty()).count(),
            spans: state.spans.len(),
            locked_spans: state.spans.values().filter(|e| e.readers > 0).count(),
            pending_writes: state.resources.values().map(|r| r.pending.len()).sum(),
            total_bytes: state.total_bytes,
        }
    }

    pub fn snapshot(&self) -> IndexSnapshot {
        let state = self.state.lock();
        let spans = state
            .recency
            .iter()
            .rev()
            .filter_map(|(id, _)| state.spans.get(id).map(|e| e.span.clone()))
            .collect();
        let content_lengths = state
            .resources
            .iter()
            .filter_map(|(key, r)| r.content_length.map(|len| (key.clone(), len)))
            .collect();

        IndexSnapshot {
            version: SNAPSHOT_VERSION,
            next_id: state.next_id,
            spans,
            content_lengths,
        }
    }

    /// Load a checkpoint into an empty index. Recency follows snapshot order.
    pub fn restore(&self, snapshot: IndexSnapshot) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(snapshot.next_id);
        for (key, length) in snapshot.content_lengths {
            state.resources.entry(key).or_default().content_length = Some(length);
        }
        for span in snapshot.spans {
            if state.spans.contains_key(&span.id) {
                continue;
            }
            state.add_span(span);
        }
    }

    fn release_claim(&self, key: &ResourceKey, claim_id: u64) {
        let mut state = self.state.lock();
        if let Some(resource) = state.resources.get_mut(key) {
            resource.pending.remove(&claim_id);
            if resource.is_vacant() {
                state.resources.remove(key);
            }
        }
    }
}

/// Read lock on one span, released on drop.
pub struct SpanLease {
    index: Arc<CacheIndex>,
    span: Span,
}

impl SpanLease {
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn id(&self) -> SpanId {
        self.span.id
    }
}

impl fmt::Debug for SpanLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanLease").field("span", &self.span).finish()
    }
}

impl Drop for SpanLease {
    fn drop(&mut self) {
        self.index.unlock(self.span.id);
    }
}

/// Registration of an in-flight write over a gap.
///
/// Dropping the claim removes the pending write and then wakes every reader
/// waiting on it.
pub struct WriteClaim {
    index: Arc<CacheIndex>,
    key: ResourceKey,
    claim_id: u64,
    range: ByteRange,
    _done: watch::Sender<()>,
}

impl WriteClaim {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn range(&self) -> ByteRange {
        self.range
    }
}

impl fmt::Debug for WriteClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteClaim")
            .field("key", &self.key)
            .field("range", &self.range)
            .finish()
    }
}

impl Drop for WriteClaim {
    fn drop(&mut self) {
        self.index.release_claim(&self.key, self.claim_id);
    }
}
