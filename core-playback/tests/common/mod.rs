//! Shared fixtures for the cache pipeline integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{BridgeError, ByteRange, UpstreamResponse, UpstreamSource};
use bytes::Bytes;
use core_playback::cache::{CacheConfig, CacheStore, EncryptionKey};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const CHUNK: usize = 16;

pub fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("media-cache-test-{}", uuid::Uuid::new_v4()))
}

pub fn test_config(root: &PathBuf) -> CacheConfig {
    CacheConfig::new(root, EncryptionKey::from_bytes(vec![7u8; 32]).unwrap()).with_chunk_size(CHUNK)
}

pub async fn open_store(config: CacheConfig) -> Arc<CacheStore> {
    CacheStore::open(config).await.unwrap()
}

/// Deterministic resource body.
pub fn body(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

/// In-memory origin that counts requests.
pub struct MemoryUpstream {
    resources: HashMap<String, Bytes>,
    chunk_size: usize,
    delay: Option<Duration>,
    stalled: bool,
    fail_once_after: Mutex<Option<usize>>,
    stall_once_after: Mutex<Option<usize>>,
    requests: AtomicUsize,
    ranges: Mutex<Vec<ByteRange>>,
}

impl MemoryUpstream {
    pub fn new() -> Self {
        Self {
            resources: HashMap::new(),
            chunk_size: 20,
            delay: None,
            stalled: false,
            fail_once_after: Mutex::new(None),
            stall_once_after: Mutex::new(None),
            requests: AtomicUsize::new(0),
            ranges: Mutex::new(Vec::new()),
        }
    }

    pub fn with_resource(mut self, uri: &str, data: Bytes) -> Self {
        self.resources.insert(uri.to_string(), data);
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Bodies never produce a chunk.
    pub fn stalled(mut self) -> Self {
        self.stalled = true;
        self
    }

    /// The next body fails after `bytes` bytes.
    pub fn fail_once_after(self, bytes: usize) -> Self {
        *self.fail_once_after.lock() = Some(bytes);
        self
    }

    /// The next body delivers `bytes` bytes and then never produces another.
    pub fn stall_once_after(self, bytes: usize) -> Self {
        *self.stall_once_after.lock() = Some(bytes);
        self
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn ranges(&self) -> Vec<ByteRange> {
        self.ranges.lock().clone()
    }
}

#[async_trait]
impl UpstreamSource for MemoryUpstream {
    async fn read(&self, uri: &str, range: ByteRange) -> BridgeResult<UpstreamResponse> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.ranges.lock().push(range);

        let data = self.resources.get(uri).cloned().ok_or(BridgeError::Http {
            status: 404,
            uri: uri.to_string(),
        })?;
        let total = data.len() as u64;

        if self.stalled {
            return Ok(UpstreamResponse::new(Some(total), stream::pending().boxed()));
        }

        let start = range.start.min(total) as usize;
        let end = range.end().map_or(total, |end| end.min(total)) as usize;
        let mut body = data.slice(start..end);

        let fail_after = self.fail_once_after.lock().take();
        if let Some(limit) = fail_after {
            body.truncate(limit);
        }
        let stall_after = self.stall_once_after.lock().take();
        if let Some(limit) = stall_after {
            body.truncate(limit);
        }

        let mut items: Vec<BridgeResult<Bytes>> = Vec::new();
        while !body.is_empty() {
            let n = self.chunk_size.min(body.len());
            items.push(Ok(body.split_to(n)));
        }
        if fail_after.is_some() {
            items.push(Err(BridgeError::Network("connection reset".to_string())));
        }

        let delay = self.delay;
        let stream = stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed();
        let stream = match stall_after {
            Some(_) => stream.chain(futures::stream::pending()).boxed(),
            None => stream,
        };
        Ok(UpstreamResponse::new(Some(total), stream))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
