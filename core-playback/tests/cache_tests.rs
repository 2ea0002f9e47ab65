//! Span store behavior: round trips, eviction, leases and recovery.

mod common;

use bridge_traits::ByteRange;
use common::{body, open_store, temp_root, test_config};
use core_playback::cache::layout::SpanLayout;
use core_playback::cache::{CacheStore, Segment, Span};
use core_playback::{PlaybackError, ResourceKey};
use std::sync::Arc;

async fn put(store: &Arc<CacheStore>, key: &ResourceKey, offset: u64, data: &[u8]) -> Span {
    let mut writer = store.write(key, offset).await.unwrap();
    writer.write(data).await.unwrap();
    writer.finish().await.unwrap().unwrap()
}

#[tokio::test]
async fn test_round_trip_across_writes() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let key = ResourceKey::new("track-1");
    let data = body(100);

    let mut writer = store.write(&key, 0).await.unwrap();
    for part in data.chunks(7) {
        writer.write(part).await.unwrap();
    }
    let span = writer.finish().await.unwrap().unwrap();
    assert_eq!(span.length, 100);

    assert_eq!(store.read(&key, ByteRange::new(0, 100)).await.unwrap(), data);
    assert_eq!(
        store.read(&key, ByteRange::new(15, 34)).await.unwrap(),
        data.slice(15..49)
    );
}

#[tokio::test]
async fn test_read_spans_adjacent_segments() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let key = ResourceKey::new("track-1");
    let data = body(100);

    put(&store, &key, 0, &data[..50]).await;
    put(&store, &key, 50, &data[50..]).await;

    assert_eq!(store.read(&key, ByteRange::new(0, 100)).await.unwrap(), data);
    assert_eq!(store.stats().span_count, 2);
}

#[tokio::test]
async fn test_newest_span_serves_overlap() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let key = ResourceKey::new("track-1");

    put(&store, &key, 0, &[1u8; 30]).await;
    put(&store, &key, 10, &[2u8; 10]).await;

    let bytes = store.read(&key, ByteRange::new(0, 30)).await.unwrap();
    assert_eq!(&bytes[..10], &[1u8; 10]);
    assert_eq!(&bytes[10..20], &[2u8; 10]);
    assert_eq!(&bytes[20..], &[1u8; 10]);

    // A later span covering everything replaces both.
    put(&store, &key, 0, &[3u8; 30]).await;
    assert_eq!(store.stats().span_count, 1);
    assert_eq!(store.stats().total_bytes, 30);
}

#[tokio::test]
async fn test_capacity_evicts_least_recent_span() {
    let root = temp_root();
    let store = open_store(test_config(&root).with_capacity(1000)).await;
    let key = ResourceKey::new("track-1");
    let layout = SpanLayout::new(&root);

    let first = put(&store, &key, 0, &[0u8; 400]).await;
    put(&store, &key, 400, &[0u8; 400]).await;
    put(&store, &key, 800, &[0u8; 400]).await;

    let stats = store.stats();
    assert_eq!(stats.total_bytes, 800);
    assert_eq!(stats.span_count, 2);
    assert!(!layout.span_path(&first).exists());

    let segments = store.lookup(&key, ByteRange::new(0, 1200)).unwrap();
    assert!(matches!(segments[0], Segment::Gap { range } if range == ByteRange::new(0, 400)));
}

#[tokio::test]
async fn test_reclaim_skips_locked_spans() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let key = ResourceKey::new("track-1");
    let layout = SpanLayout::new(&root);

    let a = put(&store, &key, 0, &[0u8; 64]).await;
    let b = put(&store, &key, 64, &[0u8; 64]).await;
    let leases = vec![
        store.index().lock(a.id).unwrap(),
        store.index().lock(b.id).unwrap(),
    ];

    let outcome = store.reclaim_bytes(1000).await.unwrap();
    assert_eq!(outcome.freed, 0);
    assert_eq!(outcome.evicted, 0);
    assert_eq!(outcome.deficit, 1000);
    assert_eq!(store.stats().total_bytes, 128);
    assert!(layout.span_path(&a).exists());
    assert!(layout.span_path(&b).exists());

    drop(leases);
    let outcome = store.reclaim_bytes(1000).await.unwrap();
    assert_eq!(outcome.freed, 128);
    assert_eq!(store.stats().total_bytes, 0);
}

#[tokio::test]
async fn test_truncated_span_file_is_cipher_error() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let key = ResourceKey::new("track-1");
    let span = put(&store, &key, 0, &body(80)).await;

    let path = SpanLayout::new(&root).span_path(&span);
    let bytes = tokio::fs::read(&path).await.unwrap();
    tokio::fs::write(&path, &bytes[..bytes.len() - 20]).await.unwrap();

    let err = store.read(&key, ByteRange::new(0, 80)).await.unwrap_err();
    assert!(matches!(err, PlaybackError::Cipher(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_wrong_key_cannot_read_spans() {
    let root = temp_root();
    let key = ResourceKey::new("track-1");
    {
        let store = open_store(test_config(&root)).await;
        put(&store, &key, 0, &body(40)).await;
        store.close().await.unwrap();
    }

    let other_key = core_playback::EncryptionKey::from_bytes(vec![8u8; 32]).unwrap();
    let mut config = test_config(&root);
    config.key = other_key;
    let store = open_store(config).await;

    let err = store.read(&key, ByteRange::new(0, 40)).await.unwrap_err();
    assert!(err.is_cache_error());
}

#[tokio::test]
async fn test_reopen_drops_spans_with_missing_files() {
    let root = temp_root();
    let key = ResourceKey::new("track-1");
    let gone = {
        let store = open_store(test_config(&root)).await;
        let gone = put(&store, &key, 0, &[1u8; 10]).await;
        put(&store, &key, 10, &[2u8; 10]).await;
        store.close().await.unwrap();
        gone
    };
    std::fs::remove_file(SpanLayout::new(&root).span_path(&gone)).unwrap();

    let store = open_store(test_config(&root)).await;
    assert_eq!(store.stats().span_count, 1);
    assert_eq!(store.stats().total_bytes, 10);
    assert_eq!(
        store.read(&key, ByteRange::new(10, 10)).await.unwrap(),
        &[2u8; 10][..]
    );
}

#[tokio::test]
async fn test_reopen_with_smaller_budget_evicts() {
    let root = temp_root();
    let key = ResourceKey::new("track-1");
    {
        let store = open_store(test_config(&root)).await;
        put(&store, &key, 0, &[1u8; 100]).await;
        put(&store, &key, 100, &[1u8; 100]).await;
        store.close().await.unwrap();
    }

    let store = open_store(test_config(&root).with_capacity(150)).await;
    assert_eq!(store.stats().total_bytes, 100);
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let root = temp_root();
    let result = CacheStore::open(test_config(&root).with_capacity(0)).await;
    assert!(matches!(result, Err(PlaybackError::InvalidConfig(_))));
}
