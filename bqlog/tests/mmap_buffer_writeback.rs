use std::{
    path::PathBuf,
    sync::atomic::{AtomicU32, Ordering},
};

use bqlog::{
    config::{AppenderConfig, AppenderKind, BaseDirType, LogConfig, SnapshotConfig, ThreadMode},
    Argument, Level,
};

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn unique_log_name(test_name: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{test_name}_{}_{n}", std::process::id())
}

fn log_dir(log_name: &str) -> PathBuf {
    std::env::temp_dir().join("bqLog").join(log_name)
}

fn text_appender(file_name: &str) -> AppenderConfig {
    AppenderConfig {
        name: "file".to_owned(),
        r#type: Some(AppenderKind::TextFile),
        file_name: file_name.to_owned(),
        base_dir_type: BaseDirType::Temp,
        ..AppenderConfig::default()
    }
}

fn sync_config() -> LogConfig {
    let mut config = LogConfig::default();
    config.thread_mode = ThreadMode::Sync;
    config
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

/// Unflushed bytes sitting in a sync-mode appender's write cache (mirrored
/// into its mmap scratch file as they're written) survive a simulated
/// crash: rebuilding the appender from scratch, as re-creating the log
/// under the same name does, replays them into the real file.
#[test]
fn test_mmap_buffer_writeback_recovers_unflushed_records() {
    let log_name = unique_log_name("writeback");

    let id = bqlog::create_log(
        log_name.clone(),
        sync_config(),
        vec!["default".to_owned()],
        vec![text_appender("app")],
        SnapshotConfig::default(),
    )
    .unwrap();

    for i in 0..3u32 {
        assert!(bqlog::log(id, Level::Info, 0, "line {0}", vec![Argument::U32(i)]));
    }

    // Nothing has touched disk yet: only the appender's in-process cache
    // (and its mmap mirror) hold these three records.
    let dir = log_dir(&log_name);
    let nothing_on_disk =
        std::fs::read_dir(&dir).map(|mut entries| entries.next().is_none()).unwrap_or(true);
    assert!(nothing_on_disk, "no bytes should have reached disk before a flush");

    // Re-creating the log under the same name tears down and rebuilds its
    // appender, which replays the mmap-backed write cache into the file.
    bqlog::create_log(
        log_name.clone(),
        sync_config(),
        vec!["default".to_owned()],
        vec![text_appender("app")],
        SnapshotConfig::default(),
    )
    .unwrap();

    let text = std::fs::read_to_string(only_file(&dir)).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_rendered_line(lines[0], "I", "default", "line 0");
    assert_rendered_line(lines[1], "I", "default", "line 1");
    assert_rendered_line(lines[2], "I", "default", "line 2");
}

/// When the write cache was already flushed to disk before the log is
/// re-created, there is nothing left in the mmap scratch to replay, and
/// the existing file content is left untouched (no duplicated records).
#[test]
fn test_mmap_buffer_no_writeback_needed_once_flushed() {
    let log_name = unique_log_name("no_writeback");

    let id = bqlog::create_log(
        log_name.clone(),
        sync_config(),
        vec!["default".to_owned()],
        vec![text_appender("app")],
        SnapshotConfig::default(),
    )
    .unwrap();

    assert!(bqlog::log(id, Level::Info, 0, "flushed before recreate", Vec::new()));
    bqlog::force_flush(id);

    bqlog::create_log(
        log_name.clone(),
        sync_config(),
        vec!["default".to_owned()],
        vec![text_appender("app")],
        SnapshotConfig::default(),
    )
    .unwrap();

    let dir = log_dir(&log_name);
    let text = std::fs::read_to_string(only_file(&dir)).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 1);
    assert_rendered_line(lines[0], "I", "default", "flushed before recreate");
}
