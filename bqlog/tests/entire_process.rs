use std::{
    path::PathBuf,
    sync::atomic::{AtomicU32, Ordering},
    thread,
    time::Duration,
};

use bqlog::{
    config::{AppenderConfig, AppenderKind, BaseDirType, LogConfig, SnapshotConfig, ThreadMode},
    decoder, Argument, Level,
};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// A name unique to this test run, so that concurrently running tests
/// never collide on the same `bqLog/<name>` directory under the shared
/// system temp root.
fn unique_log_name(test_name: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{test_name}_{}_{n}", std::process::id())
}

fn log_dir(log_name: &str) -> PathBuf {
    std::env::temp_dir().join("bqLog").join(log_name)
}

fn appender(name: &str, kind: AppenderKind, file_name: &str) -> AppenderConfig {
    AppenderConfig {
        name: name.to_owned(),
        r#type: Some(kind),
        file_name: file_name.to_owned(),
        base_dir_type: BaseDirType::Temp,
        ..AppenderConfig::default()
    }
}

fn only_file(dir: &std::path::Path) -> PathBuf {
    let mut entries: Vec<_> =
        std::fs::read_dir(dir).unwrap().map(|entry| entry.unwrap().path()).collect();
    entries.sort();
    assert_eq!(entries.len(), 1, "expected exactly one file in {}", dir.display());
    entries.remove(0)
}

/// Checks a rendered line's `[LEVEL]`, `[CATEGORY]` and message fields
/// without pinning down the timestamp/zone/tid prefix, which varies with
/// wall-clock time and the running thread.
fn assert_rendered_line(line: &str, level: &str, category: &str, message: &str) {
    let fields: Vec<&str> = line.splitn(5, '\t').collect();
    assert_eq!(fields.len(), 5, "unexpected line shape: {line:?}");
    assert_eq!(fields[1], format!("[{level}]"));
    assert_eq!(fields[2], format!("[{category}]"));
    assert!(fields[3].starts_with("[tid-") && fields[3].ends_with(']'), "missing tid field: {:?}", fields[3]);
    assert_eq!(fields[4], message);
}

#[test]
fn test_sync_log_round_trips_through_text_appender() {
    let log_name = unique_log_name("sync_text");
    let mut config = LogConfig::default();
    config.thread_mode = ThreadMode::Sync;

    let id = bqlog::create_log(
        log_name.clone(),
        config,
        vec!["default".to_owned()],
        vec![appender("file", AppenderKind::TextFile, "app")],
        SnapshotConfig::default(),
    )
    .expect("manager accepts a fresh log");

    assert!(bqlog::log(id, Level::Info, 0, "hello {0}", vec![Argument::Str("world")]));
    assert!(bqlog::log(id, Level::Warning, 0, "count {0}", vec![Argument::U32(7)]));
    bqlog::force_flush(id);

    let file = only_file(&log_dir(&log_name));
    let text = std::fs::read_to_string(file).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert_rendered_line(lines[0], "I", "default", "hello world");
    assert_rendered_line(lines[1], "W", "default", "count 7");
}

#[test]
fn test_async_log_drains_through_worker_into_raw_file() {
    let log_name = unique_log_name("async_raw");

    let id = bqlog::create_log(
        log_name.clone(),
        LogConfig::default(),
        vec!["default".to_owned(), "network".to_owned()],
        vec![appender("file", AppenderKind::RawFile, "app")],
        SnapshotConfig::default(),
    )
    .expect("manager accepts a fresh log");

    assert!(bqlog::log(id, Level::Info, 0, "startup", Vec::new()));
    assert!(bqlog::log(id, Level::Error, 1, "connect failed: {0}", vec![Argument::Str("timeout")]));
    bqlog::force_flush(id);

    let file = only_file(&log_dir(&log_name));
    let lines = decoder::decode_file(&file, None).expect("well-formed raw file");
    assert_eq!(lines.len(), 2);
    assert_rendered_line(&lines[0], "I", "default", "startup");
    assert_rendered_line(&lines[1], "E", "network", "connect failed: timeout");
}

#[test]
fn test_category_mask_blocks_disallowed_category() {
    let log_name = unique_log_name("category_mask");

    let mut file_appender = appender("file", AppenderKind::TextFile, "app");
    file_appender.categories_mask = vec!["default".to_owned()];

    let mut config = LogConfig::default();
    config.thread_mode = ThreadMode::Sync;

    let id = bqlog::create_log(
        log_name.clone(),
        config,
        vec!["default".to_owned(), "network".to_owned()],
        vec![file_appender],
        SnapshotConfig::default(),
    )
    .expect("manager accepts a fresh log");

    assert!(bqlog::log(id, Level::Info, 0, "kept", Vec::new()));
    assert!(bqlog::log(id, Level::Info, 1, "dropped", Vec::new()));
    bqlog::force_flush(id);

    let file = only_file(&log_dir(&log_name));
    let text = std::fs::read_to_string(file).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    assert_rendered_line(lines[0], "I", "default", "kept");
}

#[test]
fn test_recreating_a_log_reuses_the_id_and_reconfigures_appenders() {
    let log_name = unique_log_name("recreate");
    let mut config = LogConfig::default();
    config.thread_mode = ThreadMode::Sync;

    let mut error_only = appender("file", AppenderKind::TextFile, "app");
    error_only.levels = vec![Level::Error];

    let first = bqlog::create_log(
        log_name.clone(),
        config.clone(),
        vec!["default".to_owned()],
        vec![error_only],
        SnapshotConfig::default(),
    )
    .unwrap();
    assert!(!bqlog::log(first, Level::Info, 0, "dropped by the error-only appender", Vec::new()));

    // Re-creating under the same name reuses the slot and id, but the new
    // appender list (and its level gate) fully replaces the old one; the
    // category list passed this time around, however, is ignored.
    let second = bqlog::create_log(
        log_name.clone(),
        config,
        vec!["ignored".to_owned()],
        vec![appender("file", AppenderKind::TextFile, "app")],
        SnapshotConfig::default(),
    )
    .unwrap();
    assert_eq!(first, second);

    assert!(bqlog::log(second, Level::Info, 0, "kept by the reconfigured appender", Vec::new()));
    bqlog::force_flush(second);

    let file = only_file(&log_dir(&log_name));
    let text = std::fs::read_to_string(file).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    assert_rendered_line(lines[0], "I", "default", "kept by the reconfigured appender");
}

#[test]
fn test_snapshot_retains_recent_records_independent_of_appenders() {
    let log_name = unique_log_name("snapshot");
    let mut config = LogConfig::default();
    config.thread_mode = ThreadMode::Sync;

    let snapshot_config = SnapshotConfig { buffer_size: 4096, ..SnapshotConfig::default() };

    let id = bqlog::create_log(
        log_name,
        config,
        vec!["default".to_owned()],
        Vec::new(),
        snapshot_config,
    )
    .unwrap();

    assert!(bqlog::log(id, Level::Info, 0, "hello {0}", vec![Argument::Str("snapshot")]));
    let text = bqlog::take_snapshot(id).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    assert_rendered_line(lines[0], "I", "default", "hello snapshot");

    // A second take with nothing new written drains an already-empty ring.
    assert_eq!(bqlog::take_snapshot(id).unwrap(), "");
}

#[test]
fn test_independent_log_flushes_on_its_own_worker() {
    let log_name = unique_log_name("independent");
    let mut config = LogConfig::default();
    config.thread_mode = ThreadMode::Independent;

    let id = bqlog::create_log(
        log_name.clone(),
        config,
        vec!["default".to_owned()],
        vec![appender("file", AppenderKind::TextFile, "app")],
        SnapshotConfig::default(),
    )
    .unwrap();

    for i in 0..5 {
        assert!(bqlog::log(id, Level::Debug, 0, "tick {0}", vec![Argument::U32(i)]));
    }
    bqlog::force_flush(id);
    // `force_flush` already blocks until the worker has acted; sleep a
    // little extra to give a slow CI machine room regardless.
    thread::sleep(Duration::from_millis(50));

    let file = only_file(&log_dir(&log_name));
    let text = std::fs::read_to_string(file).unwrap();
    assert_eq!(text.lines().count(), 5);
}
