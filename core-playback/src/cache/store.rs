//! # Span Store
//!
//! Owns the span directory: writes encrypted spans, streams them back,
//! checkpoints the index, and recovers it when reopened.

use super::config::CacheConfig;
use super::encryption::{span_aad, CipherCodec, SpanDecryptor, SpanEncryptor, HEADER_LEN};
use super::evictor::{LruEvictor, ReclaimOutcome};
use super::index::{CacheIndex, IndexSnapshot, Segment, Span, SpanId, SpanLease, SNAPSHOT_VERSION};
use super::layout::{SpanFileKind, SpanFileName, SpanLayout};
use super::stats::CacheStats;
use crate::error::{PlaybackError, Result};
use crate::types::ResourceKey;
use bridge_traits::{ByteRange, Clock, SystemClock};
use bytes::{Bytes, BytesMut};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use core_runtime::logging::strip_path;
use std::collections::HashSet;
use std::fmt;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, instrument, warn};

/// Collaborators injected into a store at open time.
#[derive(Clone)]
pub struct StoreOptions {
    pub event_bus: Option<EventBus>,
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            event_bus: None,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Encrypted, range-addressable span storage.
pub struct CacheStore {
    config: CacheConfig,
    layout: SpanLayout,
    index: Arc<CacheIndex>,
    codec: CipherCodec,
    evictor: LruEvictor,
    event_bus: Option<EventBus>,
    closed: AtomicBool,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("root", &self.layout.root())
            .field("capacity_bytes", &self.config.capacity_bytes)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Open (or create) the store rooted at `config.cache_root`.
    pub async fn open(config: CacheConfig) -> Result<Arc<Self>> {
        Self::open_with_options(config, StoreOptions::default()).await
    }

    /// Open the store and publish cache events on `event_bus`.
    pub async fn open_with_event_bus(config: CacheConfig, event_bus: EventBus) -> Result<Arc<Self>> {
        Self::open_with_options(
            config,
            StoreOptions {
                event_bus: Some(event_bus),
                ..StoreOptions::default()
            },
        )
        .await
    }

    /// Open the store with explicit collaborators.
    ///
    /// Stale in-flight files are removed, the checkpointed index is restored
    /// without spans whose files are gone, and span files the index does not
    /// know about are deleted.
    #[instrument(skip_all, fields(root = %strip_path(&config.cache_root.to_string_lossy())))]
    pub async fn open_with_options(config: CacheConfig, options: StoreOptions) -> Result<Arc<Self>> {
        config.validate()?;

        let layout = SpanLayout::new(&config.cache_root);
        tokio::fs::create_dir_all(layout.spans_dir())
            .await
            .map_err(|e| {
                error!("Failed to create cache directory: {}", e);
                PlaybackError::CacheIo(format!("Failed to create cache directory: {}", e))
            })?;

        let index = Arc::new(CacheIndex::with_clock(options.clock));
        let on_disk = scan_span_files(&layout).await?;

        let snapshot = if config.persist_index {
            load_snapshot(&layout.index_path()).await
        } else {
            None
        };

        let mut known: HashSet<PathBuf> = HashSet::new();
        if let Some(mut snapshot) = snapshot {
            let before = snapshot.spans.len();
            snapshot.spans.retain(|span| {
                let path = layout.span_path(span);
                let present = on_disk.contains(&path);
                if present {
                    known.insert(path);
                }
                present
            });
            if snapshot.spans.len() < before {
                warn!(
                    "Dropped {} indexed spans with missing files",
                    before - snapshot.spans.len()
                );
            }
            index.restore(snapshot);
        }

        let orphans: Vec<&PathBuf> = on_disk.iter().filter(|p| !known.contains(*p)).collect();
        if !orphans.is_empty() {
            warn!("Deleting {} orphan span files", orphans.len());
            for path in orphans {
                remove_quietly(path).await;
            }
        }

        let evictor = LruEvictor::new(index.clone(), layout.clone(), config.capacity_bytes);
        let evictor = match &options.event_bus {
            Some(bus) => evictor.with_event_bus(bus.clone()),
            None => evictor,
        };

        let store = Arc::new(Self {
            codec: CipherCodec::new(&config.key, config.chunk_size),
            config,
            layout,
            index,
            evictor,
            event_bus: options.event_bus,
            closed: AtomicBool::new(false),
        });

        // The budget may have shrunk since the checkpoint was taken.
        store.evictor.enforce_capacity().await;

        let stats = store.index.stats();
        info!(
            "Cache store opened with {} spans ({} bytes)",
            stats.spans, stats.total_bytes
        );
        Ok(store)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<CacheIndex> {
        &self.index
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(PlaybackError::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }

    /// Split `range` of `key` into cached segments and gaps.
    pub fn lookup(&self, key: &ResourceKey, range: ByteRange) -> Result<Vec<Segment>> {
        self.ensure_open()?;
        Ok(self.index.lookup(key, range))
    }

    pub fn content_length(&self, key: &ResourceKey) -> Option<u64> {
        self.index.content_length(key)
    }

    pub fn set_content_length(&self, key: &ResourceKey, length: u64) {
        self.index.set_content_length(key, length);
    }

    /// Start a new span for `key` at `offset`.
    pub async fn write(self: &Arc<Self>, key: &ResourceKey, offset: u64) -> Result<SpanWriter> {
        self.ensure_open()?;

        let id = self.index.allocate_id();
        tokio::fs::create_dir_all(self.layout.key_dir(key)).await?;

        let part_path = self.layout.part_path(key, offset, id);
        let file = File::create(&part_path).await?;
        let mut file = BufWriter::new(file);

        let encryptor = self.codec.encrypting_writer(span_aad(key, offset));
        if let Err(e) = file.write_all(&encryptor.header()).await {
            drop(file);
            remove_quietly(&part_path).await;
            return Err(e.into());
        }

        debug!(key = %key, offset, span_id = id, "Opened span writer");
        Ok(SpanWriter {
            store: Arc::clone(self),
            key: key.clone(),
            offset,
            id,
            part_path,
            file: Some(file),
            encryptor: Some(encryptor),
            written: 0,
            done: false,
        })
    }

    /// Stream `range` of a leased span, decrypting frame by frame.
    ///
    /// An unbounded `range` reads to the end of the span.
    pub async fn read_span(&self, lease: SpanLease, range: ByteRange) -> Result<SpanReader> {
        self.ensure_open()?;

        let span = lease.span().clone();
        let end = range.end().unwrap_or(span.end());
        if range.start < span.offset || end > span.end() || end < range.start {
            return Err(PlaybackError::InvalidRange(format!(
                "{} is outside span {}",
                range,
                span.range()
            )));
        }

        let path = self.layout.span_path(&span);
        let mut file = File::open(&path).await.map_err(|e| {
            PlaybackError::CacheIo(format!("Failed to open span {}: {}", span.id, e))
        })?;
        let file_len = file.metadata().await?.len();

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).await.map_err(map_read_error)?;

        let decryptor =
            self.codec
                .decrypting_reader(&header, file_len, span_aad(&span.key, span.offset))?;
        if decryptor.plaintext_len() != span.length {
            return Err(PlaybackError::Cipher(format!(
                "span {} holds {} bytes, index expects {}",
                span.id,
                decryptor.plaintext_len(),
                span.length
            )));
        }

        self.index.touch(span.id);
        Ok(SpanReader {
            _lease: lease,
            span,
            file,
            cursor: HEADER_LEN as u64,
            decryptor,
            position: range.start,
            end,
        })
    }

    /// Read a fully cached range into memory.
    ///
    /// Fails with [`PlaybackError::NotCached`] when any part of the range is
    /// missing.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn read(&self, key: &ResourceKey, range: ByteRange) -> Result<Bytes> {
        self.ensure_open()?;

        let segments = self.index.lookup(key, range);
        if segments.is_empty() && !range.is_empty() {
            return Err(PlaybackError::InvalidRange(format!(
                "{} starts past the end of {}",
                range, key
            )));
        }

        let mut out = BytesMut::new();
        for segment in segments {
            let (span, range) = match segment {
                Segment::Cached { span, range } => (span, range),
                Segment::Gap { range } => {
                    return Err(PlaybackError::NotCached(format!("{} of {}", range, key)));
                }
            };
            let lease = self
                .index
                .lock(span.id)
                .ok_or_else(|| PlaybackError::NotCached(format!("{} of {}", range, key)))?;
            let mut reader = self.read_span(lease, range).await?;
            while let Some(chunk) = reader.next_chunk().await? {
                out.extend_from_slice(&chunk);
            }
        }
        Ok(out.freeze())
    }

    /// Drop a span that failed to read back.
    pub async fn invalidate(&self, id: SpanId, reason: &str) -> Option<Span> {
        let span = self.index.get(id)?;
        let span = self.index.remove(&span.key, id)?;

        warn!(key = %span.key, span_id = id, "Invalidating span: {}", reason);
        remove_quietly(&self.layout.span_path(&span)).await;
        self.emit(CacheEvent::SpanInvalidated {
            resource_key: span.key.to_string(),
            offset: span.offset,
            reason: reason.to_string(),
        });
        Some(span)
    }

    /// Evict until the cache fits its budget (or only locked spans remain).
    pub async fn reclaim(&self) -> Result<ReclaimOutcome> {
        self.ensure_open()?;
        Ok(self.evictor.enforce_capacity().await)
    }

    /// Evict at least `bytes_needed`, when enough unlocked spans exist.
    pub async fn reclaim_bytes(&self, bytes_needed: u64) -> Result<ReclaimOutcome> {
        self.ensure_open()?;
        Ok(self.evictor.reclaim(bytes_needed).await)
    }

    /// Write the index to `index.json`.
    pub async fn checkpoint(&self) -> Result<()> {
        self.ensure_open()?;
        self.write_checkpoint().await
    }

    async fn write_checkpoint(&self) -> Result<()> {
        if !self.config.persist_index {
            return Ok(());
        }

        let snapshot = self.index.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| PlaybackError::Internal(format!("Failed to encode index: {}", e)))?;

        let path = self.layout.index_path();
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!("Checkpointed {} spans", snapshot.spans.len());
        Ok(())
    }

    /// Delete every unlocked span. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        self.ensure_open()?;

        let removed = self.index.clear();
        for span in &removed {
            remove_quietly(&self.layout.span_path(span)).await;
        }
        info!("Cleared {} spans", removed.len());
        Ok(removed.len())
    }

    pub fn stats(&self) -> CacheStats {
        let index = self.index.stats();
        CacheStats {
            resource_count: index.resources,
            span_count: index.spans,
            locked_spans: index.locked_spans,
            pending_writes: index.pending_writes,
            total_bytes: index.total_bytes,
            capacity_bytes: self.config.capacity_bytes,
            calculated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Checkpoint and close. Later operations fail with
    /// [`PlaybackError::Closed`]. Closing twice is a no-op.
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let stats = self.index.stats();
        if stats.locked_spans > 0 {
            warn!("Closing cache with {} spans still leased", stats.locked_spans);
        }

        self.write_checkpoint().await?;
        info!("Cache store closed ({} spans)", stats.spans);
        Ok(())
    }

    /// Register a finished span and delete what it shadows.
    async fn commit(&self, span: Span) -> Result<()> {
        let shadowed = self.index.insert(span.clone());
        for old in &shadowed {
            remove_quietly(&self.layout.span_path(old)).await;
        }

        self.emit(CacheEvent::SpanCached {
            resource_key: span.key.to_string(),
            offset: span.offset,
            length: span.length,
        });

        self.evictor.enforce_capacity().await;
        Ok(())
    }
}

/// Writes one span. Not shareable: a span file has a single writer.
///
/// Dropping an unfinished writer discards its in-flight file.
pub struct SpanWriter {
    store: Arc<CacheStore>,
    key: ResourceKey,
    offset: u64,
    id: SpanId,
    part_path: PathBuf,
    file: Option<BufWriter<File>>,
    encryptor: Option<SpanEncryptor>,
    written: u64,
    done: bool,
}

impl fmt::Debug for SpanWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanWriter")
            .field("key", &self.key)
            .field("offset", &self.offset)
            .field("id", &self.id)
            .field("written", &self.written)
            .finish()
    }
}

impl SpanWriter {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Plaintext bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Resource position the next byte will be written at.
    pub fn position(&self) -> u64 {
        self.offset + self.written
    }

    /// Encrypt and append `data`.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let (Some(file), Some(encryptor)) = (self.file.as_mut(), self.encryptor.as_mut()) else {
            return Err(PlaybackError::InvalidState("span writer is finished".to_string()));
        };

        let ciphertext = encryptor.update(data)?;
        if !ciphertext.is_empty() {
            file.write_all(&ciphertext).await?;
        }
        self.written += data.len() as u64;
        Ok(())
    }

    /// Seal the span and register it.
    ///
    /// Returns `None` (and leaves nothing on disk) when no bytes were written.
    pub async fn finish(mut self) -> Result<Option<Span>> {
        if self.written == 0 {
            self.abandon().await;
            return Ok(None);
        }
        self.store.ensure_open()?;

        let (Some(mut file), Some(encryptor)) = (self.file.take(), self.encryptor.take()) else {
            return Err(PlaybackError::InvalidState("span writer is finished".to_string()));
        };

        let last = encryptor.finalize()?;
        file.write_all(&last).await?;
        file.flush().await?;
        file.into_inner().sync_data().await?;

        let span = Span::new(self.id, self.key.clone(), self.offset, self.written);
        tokio::fs::rename(&self.part_path, self.store.layout.span_path(&span)).await?;
        self.done = true;

        debug!(key = %span.key, offset = span.offset, length = span.length, "Span finished");
        self.store.commit(span.clone()).await?;
        Ok(Some(span))
    }

    /// Discard the in-flight file.
    pub async fn abandon(mut self) {
        self.file = None;
        self.encryptor = None;
        remove_quietly(&self.part_path).await;
        self.done = true;
    }
}

impl Drop for SpanWriter {
    fn drop(&mut self) {
        if !self.done {
            self.file = None;
            if let Err(e) = std::fs::remove_file(&self.part_path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!("Failed to discard in-flight span: {}", e);
                }
            }
        }
    }
}

/// Frame-at-a-time plaintext reader over one leased span.
pub struct SpanReader {
    _lease: SpanLease,
    span: Span,
    file: File,
    cursor: u64,
    decryptor: SpanDecryptor,
    position: u64,
    end: u64,
}

impl fmt::Debug for SpanReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanReader")
            .field("span", &self.span.id)
            .field("position", &self.position)
            .field("end", &self.end)
            .finish()
    }
}

impl SpanReader {
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Resource position of the next byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }

    /// Next decrypted chunk, or `None` at the end of the requested range.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.position >= self.end {
            return Ok(None);
        }

        let relative = self.position - self.span.offset;
        let frame = self.decryptor.frame_for(relative);
        let (frame_offset, frame_len) = self.decryptor.frame_bounds(frame);

        if self.cursor != frame_offset {
            self.file.seek(SeekFrom::Start(frame_offset)).await?;
        }
        let mut ciphertext = vec![0u8; frame_len];
        self.file
            .read_exact(&mut ciphertext)
            .await
            .map_err(map_read_error)?;
        self.cursor = frame_offset + frame_len as u64;

        let plaintext = self.decryptor.decrypt_frame(frame, &ciphertext)?;
        let skip = (relative - frame * self.decryptor.chunk_size() as u64) as usize;
        if skip >= plaintext.len() {
            return Err(PlaybackError::Cipher(format!(
                "frame {} of span {} is short",
                frame, self.span.id
            )));
        }

        let take = (plaintext.len() - skip).min((self.end - self.position) as usize);
        self.position += take as u64;
        Ok(Some(plaintext.slice(skip..skip + take)))
    }
}

fn map_read_error(err: std::io::Error) -> PlaybackError {
    if err.kind() == ErrorKind::UnexpectedEof {
        PlaybackError::Cipher("span file is truncated".to_string())
    } else {
        PlaybackError::CacheIo(err.to_string())
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %strip_path(&path.to_string_lossy()), "Failed to delete: {}", e),
    }
}

/// Collect finished span files, deleting stale in-flight ones on the way.
async fn scan_span_files(layout: &SpanLayout) -> Result<HashSet<PathBuf>> {
    let mut found = HashSet::new();
    let mut key_dirs = tokio::fs::read_dir(layout.spans_dir()).await?;

    while let Some(key_dir) = key_dirs.next_entry().await? {
        if !key_dir.file_type().await?.is_dir() {
            continue;
        }
        let mut files = tokio::fs::read_dir(key_dir.path()).await?;
        while let Some(file) = files.next_entry().await? {
            let name = file.file_name();
            match SpanFileName::parse(&name.to_string_lossy()) {
                Some(SpanFileName {
                    kind: SpanFileKind::Finished,
                    ..
                }) => {
                    found.insert(file.path());
                }
                Some(SpanFileName {
                    kind: SpanFileKind::InFlight,
                    ..
                }) => {
                    debug!("Removing stale in-flight span");
                    remove_quietly(&file.path()).await;
                }
                None => {}
            }
        }
    }
    Ok(found)
}

async fn load_snapshot(path: &Path) -> Option<IndexSnapshot> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("Failed to read index checkpoint: {}", e);
            return None;
        }
    };

    match serde_json::from_slice::<IndexSnapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => Some(snapshot),
        Ok(snapshot) => {
            warn!("Ignoring index checkpoint version {}", snapshot.version);
            None
        }
        Err(e) => {
            warn!("Ignoring corrupt index checkpoint: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::encryption::EncryptionKey;

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("store-{}", uuid::Uuid::new_v4()))
    }

    fn config(root: &Path) -> CacheConfig {
        CacheConfig::new(root, EncryptionKey::from_bytes(vec![3u8; 32]).unwrap()).with_chunk_size(16)
    }

    async fn put(store: &Arc<CacheStore>, key: &ResourceKey, offset: u64, data: &[u8]) -> Span {
        let mut writer = store.write(key, offset).await.unwrap();
        writer.write(data).await.unwrap();
        writer.finish().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let root = temp_root();
        let store = CacheStore::open(config(&root)).await.unwrap();
        let key = ResourceKey::new("song");
        let data: Vec<u8> = (0..100u8).collect();

        put(&store, &key, 0, &data).await;

        assert_eq!(store.read(&key, ByteRange::new(0, 100)).await.unwrap(), &data[..]);
        assert_eq!(
            store.read(&key, ByteRange::new(37, 20)).await.unwrap(),
            &data[37..57]
        );
        assert!(matches!(
            store.read(&key, ByteRange::new(90, 20)).await,
            Err(PlaybackError::NotCached(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_writer_leaves_nothing() {
        let root = temp_root();
        let store = CacheStore::open(config(&root)).await.unwrap();
        let key = ResourceKey::new("song");

        let writer = store.write(&key, 0).await.unwrap();
        assert!(writer.finish().await.unwrap().is_none());

        {
            let mut writer = store.write(&key, 0).await.unwrap();
            writer.write(b"partial").await.unwrap();
        }

        let mut entries = tokio::fs::read_dir(SpanLayout::new(&root).key_dir(&key))
            .await
            .unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert_eq!(store.stats().span_count, 0);
    }

    #[tokio::test]
    async fn test_corrupt_span_is_cipher_error() {
        let root = temp_root();
        let store = CacheStore::open(config(&root)).await.unwrap();
        let key = ResourceKey::new("song");
        let span = put(&store, &key, 0, &[5u8; 40]).await;

        let path = SpanLayout::new(&root).span_path(&span);
        let mut bytes = tokio::fs::read(&path).await.unwrap();
        bytes[HEADER_LEN + 2] ^= 0xFF;
        tokio::fs::write(&path, bytes).await.unwrap();

        let err = store.read(&key, ByteRange::new(0, 40)).await.unwrap_err();
        assert!(matches!(err, PlaybackError::Cipher(_)));

        assert!(store.invalidate(span.id, "test").await.is_some());
        assert!(!path.exists());
        assert_eq!(store.stats().total_bytes, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_survives_reopen() {
        let root = temp_root();
        let key = ResourceKey::new("song");
        {
            let store = CacheStore::open(config(&root)).await.unwrap();
            put(&store, &key, 0, b"hello span store").await;
            store.set_content_length(&key, 16);
            store.close().await.unwrap();
            assert!(matches!(store.checkpoint().await, Err(PlaybackError::Closed)));
        }

        let store = CacheStore::open(config(&root)).await.unwrap();
        assert_eq!(store.content_length(&key), Some(16));
        assert_eq!(
            store.read(&key, ByteRange::full()).await.unwrap(),
            &b"hello span store"[..]
        );
    }

    #[tokio::test]
    async fn test_orphans_removed_without_checkpoint() {
        let root = temp_root();
        let key = ResourceKey::new("song");
        let path = {
            let store = CacheStore::open(config(&root).with_persist_index(false))
                .await
                .unwrap();
            let span = put(&store, &key, 0, b"orphan").await;
            store.close().await.unwrap();
            SpanLayout::new(&root).span_path(&span)
        };
        assert!(path.exists());

        let store = CacheStore::open(config(&root)).await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.stats().span_count, 0);
    }

    #[tokio::test]
    async fn test_clear_and_closed_store() {
        let root = temp_root();
        let store = CacheStore::open(config(&root)).await.unwrap();
        let key = ResourceKey::new("song");
        put(&store, &key, 0, b"one").await;
        put(&store, &key, 10, b"two").await;

        assert_eq!(store.clear().await.unwrap(), 2);
        store.close().await.unwrap();
        store.close().await.unwrap();

        assert!(matches!(store.write(&key, 0).await, Err(PlaybackError::Closed)));
        assert!(matches!(
            store.read(&key, ByteRange::new(0, 1)).await,
            Err(PlaybackError::Closed)
        ));
    }
}
