//! End-to-end tests for the HDFS sink
//!
//! These drive `HdfsEmitter` through its public API against the in-memory
//! filesystem (with a paused clock where timing matters) and the local
//! filesystem.

use bytes::Bytes;
use hdfs_sink::remote::{Capabilities, LocalConnector, MemoryFileSystem};
use hdfs_sink::stream::{LeaseRecoveryPolicy, PoolOptions};
use hdfs_sink::{Emitter, HdfsEmitter, Message, PluginError, SinkConfig, SinkError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Helpers
// ============================================================================

/// 2024-03-05T07:08:09Z
const TS: i64 = 1_709_622_489_000_000_000;

fn event(source: &str, body: &str) -> Message {
    Message::with_id("01HQZ", TS, source, "log", Bytes::from(body.to_string()))
}

fn plain(path: &str) -> SinkConfig {
    SinkConfig::new(path)
        .message_format("%{payload}")
        .flush_interval_secs(0)
}

fn memory_emitter(fs: &MemoryFileSystem, config: &SinkConfig) -> HdfsEmitter {
    HdfsEmitter::new(config, Arc::new(fs.clone())).unwrap()
}

// ============================================================================
// Path and payload rendering
// ============================================================================

#[tokio::test]
async fn test_date_partitioned_paths() {
    let fs = MemoryFileSystem::new();
    let config = SinkConfig::new("/logs/%{source}/%{+%Y/%m/%d}/%{type}.log")
        .message_format("[%{+%H:%M:%S}] %{env}: %{payload}")
        .flush_interval_secs(0);
    let emitter = memory_emitter(&fs, &config);

    emitter
        .write(&event("web", "GET /").with_metadata("env", "prod"))
        .await
        .unwrap();

    assert_eq!(
        fs.contents_str("/logs/web/2024/03/05/log.log").unwrap(),
        "[07:08:09] prod: GET /\n"
    );
}

#[tokio::test]
async fn test_json_records_are_one_per_line() {
    let fs = MemoryFileSystem::new();
    let config = SinkConfig::new("/events.ndjson").flush_interval_secs(0);
    let emitter = memory_emitter(&fs, &config);

    emitter
        .emit(&[event("a", "first"), event("b", "second\nline")])
        .await
        .unwrap();

    let contents = fs.contents_str("/events.ndjson").unwrap();
    let lines: Vec<_> = contents.lines().collect();
    assert_eq!(lines.len(), 2);

    let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["source"], "b");
    assert_eq!(second["payload"], "second\nline");
    assert_eq!(second["timestamp"], "2024-03-05T07:08:09+00:00");
}

// ============================================================================
// Existing-file policy
// ============================================================================

#[tokio::test]
async fn test_append_keeps_existing_data() {
    let fs = MemoryFileSystem::new();
    fs.insert_file("/a.log", "old\n");
    let emitter = memory_emitter(&fs, &plain("/a.log").enable_append(true));

    emitter.write(&event("s", "new")).await.unwrap();

    assert_eq!(fs.contents_str("/a.log").unwrap(), "old\nnew\n");
    let calls = fs.calls();
    assert_eq!(calls.append, 1);
    assert_eq!(calls.create, 0);
}

#[tokio::test]
async fn test_reopen_overwrites_existing_data() {
    let fs = MemoryFileSystem::new();
    fs.insert_file("/a.log", "old\n");
    let emitter = memory_emitter(&fs, &plain("/a.log").enable_reopen(true));

    emitter.write(&event("s", "new")).await.unwrap();

    assert_eq!(fs.contents_str("/a.log").unwrap(), "new\n");
    assert_eq!(fs.calls().overwrite, 1);
}

#[tokio::test]
async fn test_append_wins_over_reopen() {
    let fs = MemoryFileSystem::new();
    fs.insert_file("/a.log", "old\n");
    let config = plain("/a.log").enable_append(true).enable_reopen(true);
    let emitter = memory_emitter(&fs, &config);

    emitter.write(&event("s", "new")).await.unwrap();

    assert_eq!(fs.contents_str("/a.log").unwrap(), "old\nnew\n");
}

#[tokio::test]
async fn test_existing_file_refused_without_policy() {
    let fs = MemoryFileSystem::new();
    fs.insert_file("/a.log", "old\n");
    let emitter = memory_emitter(&fs, &plain("/a.log"));

    let err = emitter.emit(&[event("s", "new")]).await.unwrap_err();

    assert!(matches!(err, PluginError::Send(_)));
    assert_eq!(fs.contents_str("/a.log").unwrap(), "old\n");
    assert_eq!(emitter.open_handles().await, 0);
}

// ============================================================================
// Lease recovery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_append_recovers_abandoned_lease() {
    let fs = MemoryFileSystem::new();
    fs.insert_file("/a.log", "old\n");
    fs.hold_lease("/a.log", Some(1));
    let emitter = memory_emitter(&fs, &plain("/a.log").enable_append(true));
    let started = Instant::now();

    emitter.write(&event("s", "new")).await.unwrap();

    // failed append, two recovery requests 4s apart, successful append
    let calls = fs.calls();
    assert_eq!(calls.append, 2);
    assert_eq!(calls.recover_lease, 2);
    assert!(started.elapsed() >= Duration::from_secs(4));
    assert_eq!(fs.contents_str("/a.log").unwrap(), "old\nnew\n");
}

#[tokio::test(start_paused = true)]
async fn test_unrecoverable_lease_fails_each_event() {
    let fs = MemoryFileSystem::new();
    fs.insert_file("/a.log", "");
    fs.hold_lease("/a.log", None);

    let config = plain("/a.log").enable_append(true);
    let options = PoolOptions {
        lease_recovery: LeaseRecoveryPolicy {
            timeout: Duration::from_secs(5),
            first_pause: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            polls_per_round: 2,
        },
        ..PoolOptions::from_config(&config)
    };
    let emitter = HdfsEmitter::with_options(&config, Arc::new(fs.clone()), options).unwrap();

    for _ in 0..2 {
        let err = emitter.write(&event("s", "x")).await.unwrap_err();
        assert!(matches!(err, SinkError::Append { .. }));
    }

    // every event goes through the whole sequence again
    assert_eq!(fs.calls().append, 4);
    assert_eq!(emitter.failed_count(), 2);
    assert_eq!(emitter.open_handles().await, 0);
}

// ============================================================================
// Flushing
// ============================================================================

#[tokio::test]
async fn test_legacy_filesystem_flushes_then_syncs() {
    let fs = MemoryFileSystem::with_capabilities(Capabilities {
        durable_flush: false,
        file_closed_query: false,
    });
    let emitter = memory_emitter(&fs, &plain("/a.log"));

    emitter.write(&event("s", "one")).await.unwrap();

    let calls = fs.calls();
    assert_eq!(calls.hflush, 0);
    assert_eq!(calls.flush, 1);
    assert_eq!(calls.sync, 1);
    assert_eq!(fs.contents_str("/a.log").unwrap(), "one\n");
}

#[tokio::test]
async fn test_flush_failures_do_not_fail_writes() {
    let fs = MemoryFileSystem::new();
    fs.fail_flush();
    let emitter = memory_emitter(&fs, &plain("/a.log"));

    emitter.write(&event("s", "one")).await.unwrap();
    emitter.write(&event("s", "two")).await.unwrap();

    assert_eq!(emitter.written_count(), 2);
    assert_eq!(emitter.open_handles().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_flush_covers_every_handle() {
    let fs = MemoryFileSystem::new();
    let config = SinkConfig::new("/logs/%{source}.log")
        .message_format("%{payload}")
        .flush_interval_secs(30);
    let emitter = memory_emitter(&fs, &config);

    emitter.write(&event("a", "1")).await.unwrap();
    emitter.write(&event("b", "2")).await.unwrap();
    assert_eq!(fs.calls().hflush, 0);

    tokio::time::advance(Duration::from_secs(30)).await;
    emitter.write(&event("a", "3")).await.unwrap();

    // no timer of its own: the flush rode on the third event
    assert_eq!(fs.calls().hflush, 2);
    assert_eq!(fs.contents_str("/logs/a.log").unwrap(), "1\n3\n");
    assert_eq!(fs.contents_str("/logs/b.log").unwrap(), "2\n");
}

// ============================================================================
// Eviction and shutdown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rotated_paths_are_closed() {
    let fs = MemoryFileSystem::new();
    let config = SinkConfig::new("/logs/%{hour}.log").message_format("%{payload}");
    let emitter = memory_emitter(&fs, &config);

    emitter
        .write(&event("s", "a").with_metadata("hour", "07"))
        .await
        .unwrap();

    // traffic moves on to the next file; the old one survives one cycle
    tokio::time::advance(Duration::from_secs(10)).await;
    emitter
        .write(&event("s", "b").with_metadata("hour", "08"))
        .await
        .unwrap();
    assert_eq!(emitter.open_handles().await, 2);

    tokio::time::advance(Duration::from_secs(10)).await;
    emitter
        .write(&event("s", "c").with_metadata("hour", "08"))
        .await
        .unwrap();
    assert_eq!(emitter.open_handles().await, 1);
    assert_eq!(fs.contents_str("/logs/07.log").unwrap(), "a\n");
    assert!(!fs.is_leased("/logs/07.log"));
}

#[tokio::test]
async fn test_close_failure_still_releases_handle() {
    let fs = MemoryFileSystem::new();
    fs.fail_close("/a.log");
    let emitter = memory_emitter(&fs, &plain("/a.log"));

    emitter.write(&event("s", "x")).await.unwrap();
    emitter.shutdown().await.unwrap();

    assert_eq!(emitter.open_handles().await, 0);
    assert_eq!(fs.calls().close, 1);
}

// ============================================================================
// Local filesystem
// ============================================================================

#[tokio::test]
async fn test_local_filesystem_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = SinkConfig {
        remote_uri: format!("file://{}", dir.path().display()),
        ..SinkConfig::new("/logs/%{source}.log")
            .message_format("%{id} %{payload}")
            .enable_append(true)
    };

    let emitter = HdfsEmitter::connect(&config, &LocalConnector).await.unwrap();
    assert!(emitter.health().await);

    emitter
        .emit(&[event("web", "GET /"), event("db", "SELECT 1")])
        .await
        .unwrap();
    emitter.shutdown().await.unwrap();

    // second run appends to the same files
    let emitter = HdfsEmitter::connect(&config, &LocalConnector).await.unwrap();
    emitter.emit(&[event("web", "GET /health")]).await.unwrap();
    emitter.shutdown().await.unwrap();

    let web = std::fs::read_to_string(dir.path().join("logs/web.log")).unwrap();
    assert_eq!(web, "01HQZ GET /\n01HQZ GET /health\n");
    let db = std::fs::read_to_string(dir.path().join("logs/db.log")).unwrap();
    assert_eq!(db, "01HQZ SELECT 1\n");
}
