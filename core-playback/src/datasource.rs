//! # Caching Data Source
//!
//! Serves a [`DataSpec`] segment by segment: cached segments are decrypted
//! from the span store, gaps are fetched from the upstream source and teed
//! into a new span while the bytes are handed to the caller. One network
//! fetch therefore serves playback and populates the cache.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──open()──> ResolvingGaps ──> Serving | Fetching | Mixed ──close()──> Closed
//! ```
//!
//! ## Failure handling
//!
//! - An upstream error finalizes the partial span and surfaces as
//!   [`PlaybackError::Network`] (retryable: the next read resumes from the
//!   current position).
//! - A span that fails to read back is invalidated and its bytes are fetched
//!   again. If upstream fails too, the original cache error is returned.
//! - A span write error disables caching for the rest of the fetch; the bytes
//!   keep flowing.
//!
//! ## Cancellation
//!
//! The cancellation token interrupts a read only while it waits on upstream
//! or on another writer. The segment in progress stays in place, so a
//! [`close`](CachingDataSource::close) after a cancelled read keeps every
//! byte already delivered as a finished span. The same holds when the read
//! future itself is dropped while waiting.

use crate::cache::{CacheStore, SpanReader, SpanWriter, WriteClaim};
use crate::cache::index::{Resolution, SpanId};
use crate::cache::stats::DataSourceStats;
use crate::error::{PlaybackError, Result};
use crate::types::DataSpec;
use bridge_traits::{ByteRange, ByteStream, UpstreamSource};
use bytes::Bytes;
use core_runtime::events::CacheEvent;
use core_runtime::logging::redact_uri;
use futures::StreamExt;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Where a data source is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Idle,
    ResolvingGaps,
    /// Every requested byte was cached at open time.
    Serving,
    /// Nothing requested was cached at open time.
    Fetching,
    /// Both cached segments and gaps.
    Mixed,
    Closed,
}

impl SourceState {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SourceState::Serving | SourceState::Fetching | SourceState::Mixed
        )
    }
}

struct Fetch {
    claim: WriteClaim,
    range: ByteRange,
    stream: ByteStream,
    writer: Option<SpanWriter>,
    /// Cache error this fetch is replacing, returned if upstream fails before
    /// producing a byte.
    fallback: Option<PlaybackError>,
}

enum Segment {
    Cache(SpanReader),
    Upstream(Fetch),
}

/// Read-through cache in front of an [`UpstreamSource`].
pub struct CachingDataSource {
    store: Arc<CacheStore>,
    upstream: Arc<dyn UpstreamSource>,
    block_on_cache: bool,
    max_span_bytes: Option<u64>,
    state: SourceState,
    spec: Option<DataSpec>,
    position: u64,
    end: Option<u64>,
    current: Option<Segment>,
    leftover: Bytes,
    cancel: CancellationToken,
    stats: DataSourceStats,
    failed_at: Option<u64>,
    cache_error: Option<PlaybackError>,
}

impl fmt::Debug for CachingDataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingDataSource")
            .field("upstream", &self.upstream.name())
            .field("state", &self.state)
            .field("position", &self.position)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

impl CachingDataSource {
    /// Create a source using the store's block-on-cache and span size settings.
    pub fn new(store: Arc<CacheStore>, upstream: Arc<dyn UpstreamSource>) -> Self {
        let block_on_cache = store.config().block_on_cache;
        let max_span_bytes = store.config().max_span_bytes;
        Self {
            store,
            upstream,
            block_on_cache,
            max_span_bytes,
            state: SourceState::Idle,
            spec: None,
            position: 0,
            end: None,
            current: None,
            leftover: Bytes::new(),
            cancel: CancellationToken::new(),
            stats: DataSourceStats::default(),
            failed_at: None,
            cache_error: None,
        }
    }

    pub fn with_block_on_cache(mut self, enabled: bool) -> Self {
        self.block_on_cache = enabled;
        self
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Resource position of the next byte returned.
    pub fn position(&self) -> u64 {
        self.position - self.leftover.len() as u64
    }

    pub fn stats(&self) -> DataSourceStats {
        self.stats
    }

    /// Token that interrupts the read in progress with
    /// [`PlaybackError::Cancelled`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open `spec` for reading.
    ///
    /// Returns the number of bytes that will be served, when known.
    #[instrument(skip(self, spec), fields(uri = %redact_uri(&spec.uri), range = %spec.range))]
    pub async fn open(&mut self, spec: DataSpec) -> Result<Option<u64>> {
        if self.state.is_open() || self.state == SourceState::ResolvingGaps {
            return Err(PlaybackError::InvalidState(
                "data source is already open".to_string(),
            ));
        }

        let start = spec.range.start;
        if let Some(length) = self.store.content_length(&spec.key) {
            if start > length {
                return Err(PlaybackError::InvalidRange(format!(
                    "{} starts past the end of a {} byte resource",
                    spec.range, length
                )));
            }
        }

        self.state = SourceState::ResolvingGaps;
        let segments = match self.store.lookup(&spec.key, spec.range) {
            Ok(segments) => segments,
            Err(e) => {
                self.state = SourceState::Idle;
                return Err(e);
            }
        };

        let cached = segments.iter().filter(|s| s.is_cached()).count();
        self.state = if cached == segments.len() {
            SourceState::Serving
        } else if cached == 0 {
            SourceState::Fetching
        } else {
            SourceState::Mixed
        };

        let resolved_length = match (spec.range.length, self.store.content_length(&spec.key)) {
            (Some(length), Some(total)) => Some(length.min(total - start)),
            (Some(length), None) => Some(length),
            (None, Some(total)) => Some(total - start),
            (None, None) => None,
        };

        debug!(
            state = ?self.state,
            segments = segments.len(),
            "Opened data source"
        );

        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        self.position = start;
        self.end = spec.range.end();
        self.spec = Some(spec);
        self.leftover = Bytes::new();
        self.failed_at = None;
        self.cache_error = None;
        Ok(resolved_length)
    }

    /// Next chunk of plaintext, or `None` at the end of the request.
    pub async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.state.is_open() {
            return Err(PlaybackError::InvalidState(
                "data source is not open".to_string(),
            ));
        }
        if !self.leftover.is_empty() {
            return Ok(Some(std::mem::take(&mut self.leftover)));
        }
        if self.cancel.is_cancelled() {
            return Err(PlaybackError::Cancelled);
        }

        self.next_chunk().await
    }

    /// Fill `buf` with the next bytes. Returns 0 at the end of the request.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(mut chunk) = self.read_chunk().await? else {
            return Ok(0);
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.leftover = chunk.split_off(n);
        }
        Ok(n)
    }

    /// Stop reading. An unfinished span is kept as a shorter valid span and
    /// every lease and claim is released.
    #[instrument(skip(self))]
    pub async fn close(&mut self) -> Result<()> {
        match self.current.take() {
            Some(Segment::Upstream(fetch)) => {
                let Fetch { claim, writer, .. } = fetch;
                if let Some(writer) = writer {
                    self.finish_writer(writer).await;
                }
                drop(claim);
            }
            Some(Segment::Cache(reader)) => drop(reader),
            None => {}
        }

        if self.state != SourceState::Idle && self.state != SourceState::Closed {
            debug!(
                from_cache = self.stats.bytes_from_cache,
                from_upstream = self.stats.bytes_from_upstream,
                "Closed data source"
            );
        }
        self.state = SourceState::Closed;
        self.spec = None;
        self.leftover = Bytes::new();
        self.cache_error = None;
        Ok(())
    }

    /// Segments are worked on in place; `current` is only taken once a
    /// segment is finished, so dropping this future loses nothing.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let cancel = self.cancel.clone();
            match self.current.as_mut() {
                None => match self.advance().await? {
                    Some(segment) => self.current = Some(segment),
                    None => return Ok(None),
                },
                Some(Segment::Cache(reader)) => match reader.next_chunk().await {
                    Ok(Some(chunk)) => {
                        self.position += chunk.len() as u64;
                        self.stats.bytes_from_cache += chunk.len() as u64;
                        return Ok(Some(chunk));
                    }
                    Ok(None) => self.current = None,
                    Err(e) if e.is_cache_error() => {
                        let span_id = reader.span().id;
                        self.current = None;
                        self.recover_from_cache_error(span_id, e).await?;
                    }
                    Err(e) => return Err(e),
                },
                Some(Segment::Upstream(fetch)) => {
                    let remaining = fetch
                        .range
                        .end()
                        .map(|end| end.saturating_sub(self.position));
                    let item = if remaining == Some(0) {
                        None
                    } else {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
                            item = fetch.stream.next() => item,
                        }
                    };

                    match item {
                        Some(Ok(mut chunk)) => {
                            if chunk.is_empty() {
                                continue;
                            }
                            if let Some(remaining) = remaining {
                                if chunk.len() as u64 > remaining {
                                    chunk.truncate(remaining as usize);
                                }
                            }
                            fetch.fallback = None;

                            self.tee(&chunk).await;
                            self.position += chunk.len() as u64;
                            self.stats.bytes_from_upstream += chunk.len() as u64;
                            return Ok(Some(chunk));
                        }
                        Some(Err(e)) => {
                            let err = PlaybackError::from(e);
                            return match self.current.take() {
                                Some(Segment::Upstream(fetch)) => Err(self.fail_fetch(fetch, err).await),
                                _ => Err(err),
                            };
                        }
                        None => {
                            if let Some(Segment::Upstream(fetch)) = self.current.take() {
                                self.finish_fetch(fetch).await;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Resolve the segment at the current position.
    async fn advance(&mut self) -> Result<Option<Segment>> {
        let Some(key) = self.spec.as_ref().map(|s| s.key.clone()) else {
            return Ok(None);
        };

        loop {
            if self.end.is_some_and(|end| self.position >= end) {
                return Ok(None);
            }

            let resolution =
                self.store
                    .index()
                    .resolve(&key, self.position, self.end, self.block_on_cache);
            match resolution {
                Resolution::End => return Ok(None),
                Resolution::Cached { lease, range } => {
                    let span_id = lease.id();
                    match self.store.read_span(lease, range).await {
                        Ok(reader) => {
                            self.cache_error = None;
                            self.store.emit(CacheEvent::CacheHit {
                                resource_key: key.to_string(),
                                offset: range.start,
                                length: range.length.unwrap_or_default(),
                            });
                            return Ok(Some(Segment::Cache(reader)));
                        }
                        Err(e) if e.is_cache_error() => {
                            self.recover_from_cache_error(span_id, e).await?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Resolution::Wait { mut done } => {
                    debug!(position = self.position, "Waiting for in-flight write");
                    let cancel = self.cancel.clone();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
                        _ = done.changed() => {}
                    }
                }
                Resolution::Fetch { claim, range } => {
                    return self.open_fetch(claim, range).await.map(Some);
                }
            }
        }
    }

    /// Drop a span that failed to read and arrange for its bytes to be
    /// fetched again. A second failure at the same position is returned.
    async fn recover_from_cache_error(&mut self, span_id: SpanId, err: PlaybackError) -> Result<()> {
        self.stats.cache_read_failures += 1;
        if self.failed_at == Some(self.position) {
            warn!(position = self.position, "Repeated cache failure: {}", err);
            return Err(err);
        }

        warn!(span_id, position = self.position, "Cache read failed, refetching: {}", err);
        self.failed_at = Some(self.position);
        self.store.invalidate(span_id, &err.to_string()).await;
        self.cache_error = Some(err);
        Ok(())
    }

    async fn open_fetch(&mut self, claim: WriteClaim, range: ByteRange) -> Result<Segment> {
        let Some(spec) = self.spec.clone() else {
            return Err(PlaybackError::InvalidState("data source is not open".to_string()));
        };
        let fallback = self.cache_error.take();

        self.stats.upstream_requests += 1;
        self.store.emit(CacheEvent::CacheMiss {
            resource_key: spec.key.to_string(),
            offset: range.start,
            length: range.length,
        });

        let cancel = self.cancel.clone();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlaybackError::Cancelled),
            response = self.upstream.read(&spec.uri, range) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let err = PlaybackError::from(e);
                self.report_fetch_failure(&err);
                return Err(fallback.unwrap_or(err));
            }
        };

        if let Some(total) = response.total_length {
            self.store.set_content_length(&spec.key, total);
        }

        let writer = self.open_writer(range.start).await;
        Ok(Segment::Upstream(Fetch {
            claim,
            range,
            stream: response.stream,
            writer,
            fallback,
        }))
    }

    /// Copy `chunk` into the current fetch's span writer, rolling over to a
    /// new span when the size cap is reached.
    async fn tee(&mut self, chunk: &[u8]) {
        let mut data = chunk;
        while !data.is_empty() {
            let max_span_bytes = self.max_span_bytes;
            let Some(Segment::Upstream(fetch)) = self.current.as_mut() else {
                return;
            };
            let Some(writer) = fetch.writer.as_mut() else {
                return;
            };

            let room = match max_span_bytes {
                Some(max) => (max.saturating_sub(writer.written()) as usize).min(data.len()),
                None => data.len(),
            };
            let (head, tail) = data.split_at(room);
            if let Err(e) = writer.write(head).await {
                fetch.writer = None;
                self.degrade(e);
                return;
            }
            data = tail;

            if max_span_bytes.is_some_and(|max| writer.written() >= max) {
                let next = writer.position();
                let full = fetch.writer.take();
                if let Some(full) = full {
                    self.finish_writer(full).await;
                }
                let writer = self.open_writer(next).await;
                if let Some(Segment::Upstream(fetch)) = self.current.as_mut() {
                    fetch.writer = writer;
                }
            }
        }
    }

    async fn open_writer(&mut self, offset: u64) -> Option<SpanWriter> {
        let key = self.spec.as_ref()?.key.clone();
        match self.store.write(&key, offset).await {
            Ok(writer) => Some(writer),
            Err(e) => {
                self.degrade(e);
                None
            }
        }
    }

    async fn finish_writer(&mut self, writer: SpanWriter) {
        match writer.finish().await {
            Ok(Some(_)) => self.stats.spans_written += 1,
            Ok(None) => {}
            Err(e) => self.degrade(e),
        }
    }

    /// Upstream reached the end of the fetch.
    async fn finish_fetch(&mut self, fetch: Fetch) {
        let Fetch {
            claim,
            range,
            writer,
            ..
        } = fetch;

        if range.end().map_or(true, |end| self.position < end) {
            if let Some(spec) = &self.spec {
                self.store.set_content_length(&spec.key, self.position);
            }
        }
        if let Some(writer) = writer {
            self.finish_writer(writer).await;
        }
        drop(claim);
    }

    /// Upstream failed mid-fetch: keep what arrived and report the error.
    async fn fail_fetch(&mut self, fetch: Fetch, err: PlaybackError) -> PlaybackError {
        let Fetch {
            claim,
            writer,
            fallback,
            ..
        } = fetch;

        if let Some(writer) = writer {
            self.finish_writer(writer).await;
        }
        drop(claim);

        self.report_fetch_failure(&err);
        fallback.unwrap_or(err)
    }

    fn report_fetch_failure(&self, err: &PlaybackError) {
        warn!(position = self.position, "Upstream read failed: {}", err);
        if let Some(spec) = &self.spec {
            self.store.emit(CacheEvent::FetchFailed {
                resource_key: spec.key.to_string(),
                offset: self.position,
                message: err.to_string(),
                retryable: err.is_transient(),
            });
        }
    }

    /// Keep serving upstream bytes without caching them.
    fn degrade(&mut self, err: PlaybackError) {
        self.stats.cache_write_failures += 1;
        warn!("Span write failed, continuing uncached: {}", err);
        if let Some(spec) = &self.spec {
            self.store.emit(CacheEvent::CacheDegraded {
                resource_key: spec.key.to_string(),
                message: err.to_string(),
            });
        }
    }
}

impl Drop for CachingDataSource {
    fn drop(&mut self) {
        if self.current.is_some() {
            info!("Data source dropped while reading; unfinished span discarded");
        }
    }
}
