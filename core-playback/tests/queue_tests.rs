//! Reading a playback queue as one continuous stream.

mod common;

use bytes::BytesMut;
use common::{body, open_store, temp_root, test_config, MemoryUpstream};
use core_playback::{CachingDataSource, PlaybackError, PlaybackQueue, QueueItem};
use std::sync::Arc;
use std::time::Duration;

const A: &str = "https://cdn.example.com/a.mp3";
const B: &str = "https://cdn.example.com/b.mp3";
const C: &str = "https://cdn.example.com/c.mp3";

fn upstream() -> Arc<MemoryUpstream> {
    Arc::new(
        MemoryUpstream::new()
            .with_resource(A, body(30))
            .with_resource(B, body(45).slice(5..))
            .with_resource(C, body(12)),
    )
}

#[tokio::test]
async fn test_items_are_read_in_order() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let upstream = upstream();

    let queue = Arc::new(PlaybackQueue::new());
    queue.append_uris([A, B]);
    queue.prepare().unwrap();

    let mut reader = queue.reader(CachingDataSource::new(store.clone(), upstream.clone()));
    let mut per_item = vec![BytesMut::new(), BytesMut::new()];
    while let Some((index, chunk)) = reader.next_chunk().await.unwrap() {
        per_item[index].extend_from_slice(&chunk);
    }
    reader.close().await.unwrap();

    assert_eq!(per_item[0].clone().freeze(), body(30));
    assert_eq!(per_item[1].clone().freeze(), body(45).slice(5..));
    assert_eq!(reader.current_index(), 2);
    assert_eq!(reader.stats().upstream_requests, 2);
}

#[tokio::test]
async fn test_reader_requires_prepare() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;

    let queue = Arc::new(PlaybackQueue::new());
    queue.append_uris([A]);
    let mut reader = queue.reader(CachingDataSource::new(store, upstream()));

    assert!(matches!(
        reader.next_chunk().await,
        Err(PlaybackError::NotPrepared)
    ));
}

#[tokio::test]
async fn test_empty_prepared_queue_ends_immediately() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;

    let queue = Arc::new(PlaybackQueue::new());
    queue.prepare().unwrap();
    let mut reader = queue.reader(CachingDataSource::new(store, upstream()));

    assert!(reader.next_chunk().await.unwrap().is_none());
}

#[tokio::test]
async fn test_items_appended_while_reading_are_played() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;

    let queue = Arc::new(PlaybackQueue::new());
    queue.append_uris([A]);
    queue.prepare().unwrap();

    let mut reader = queue.reader(CachingDataSource::new(store, upstream()));
    let (index, _) = reader.next_chunk().await.unwrap().unwrap();
    assert_eq!(index, 0);

    queue.append([QueueItem::new(C).with_key("c")]);

    let mut last = 0;
    let mut c_bytes = BytesMut::new();
    while let Some((index, chunk)) = reader.next_chunk().await.unwrap() {
        last = index;
        if index == 1 {
            c_bytes.extend_from_slice(&chunk);
        }
    }
    assert_eq!(last, 1);
    assert_eq!(c_bytes.freeze(), body(12));
}

#[tokio::test]
async fn test_waiting_reader_picks_up_late_items() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;

    let queue = Arc::new(PlaybackQueue::new());
    queue.prepare().unwrap();

    let appender = {
        let queue = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue.append_uris([C]);
        })
    };

    let mut reader = queue.reader(CachingDataSource::new(store, upstream()));
    let (index, chunk) = reader.next_chunk_waiting().await.unwrap();
    assert_eq!(index, 0);
    assert_eq!(chunk, body(12));
    appender.await.unwrap();
}

#[tokio::test]
async fn test_second_pass_is_served_from_cache() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let upstream = upstream();

    let queue = Arc::new(PlaybackQueue::new());
    queue.append_uris([A, C]);
    queue.prepare().unwrap();

    for _ in 0..2 {
        let mut reader = queue.reader(CachingDataSource::new(store.clone(), upstream.clone()));
        while reader.next_chunk().await.unwrap().is_some() {}
        reader.close().await.unwrap();
    }

    assert_eq!(upstream.requests(), 2);
}

#[tokio::test]
async fn test_skip_moves_past_unreadable_item() {
    let root = temp_root();
    let store = open_store(test_config(&root)).await;
    let upstream = upstream();

    let queue = Arc::new(PlaybackQueue::new());
    queue.append_uris(["https://cdn.example.com/missing.mp3", C]);
    queue.prepare().unwrap();

    let mut reader = queue.reader(CachingDataSource::new(store, upstream.clone()));
    for _ in 0..2 {
        assert!(matches!(
            reader.next_chunk().await,
            Err(PlaybackError::UpstreamRejected(_))
        ));
        assert_eq!(reader.current_index(), 0);
    }

    assert_eq!(reader.skip_current().await.unwrap(), 1);
    let mut c_bytes = BytesMut::new();
    while let Some((index, chunk)) = reader.next_chunk().await.unwrap() {
        assert_eq!(index, 1);
        c_bytes.extend_from_slice(&chunk);
    }
    assert_eq!(c_bytes.freeze(), body(12));
    assert_eq!(upstream.requests(), 3);
}
