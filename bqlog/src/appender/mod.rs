//! Appenders: sinks that a worker drains consumed records into.
//!
//! The four appender kinds (`console`, `text_file`, `raw_file`,
//! `compressed_file`) are modeled as a tagged enum over a shared capability
//! set rather than as trait objects, since the set of kinds is closed and
//! fixed by configuration.

pub(crate) mod binary;
pub(crate) mod compressed;
pub(crate) mod console;
pub(crate) mod file_base;
pub(crate) mod raw;
pub(crate) mod text;

use std::path::PathBuf;

use crate::{config::AppenderConfig, record::Level, tz::TimeZone};

/// Which levels and categories reach a given appender.
#[derive(Clone, Debug)]
pub(crate) struct Filter {
    levels: [bool; 6],
    /// Category indices this appender accepts; an empty set means "all".
    categories: Vec<u32>,
}

impl Filter {
    pub(crate) fn from_config(config: &AppenderConfig, category_indices: &[u32]) -> Self {
        let mut levels = [true; 6];
        if !config.levels.is_empty() {
            levels = [false; 6];
            for level in &config.levels {
                levels[level.primitive() as usize] = true;
            }
        }
        Self { levels, categories: category_indices.to_vec() }
    }

    pub(crate) fn allows(&self, level: Level, category: u32) -> bool {
        self.levels[level.primitive() as usize]
            && (self.categories.is_empty() || self.categories.contains(&category))
    }

    /// Whether this appender accepts `level` for at least one category,
    /// used to precompute a log-wide level bitmap for a cheap early exit.
    pub(crate) fn allows_level(&self, level: Level) -> bool {
        self.levels[level.primitive() as usize]
    }
}

/// Where an appender's files are rooted, before the configured file name is
/// joined on.
pub(crate) fn base_directory(log_name: &str) -> PathBuf {
    PathBuf::from("bqLog").join(log_name)
}

/// Where a file appender's mmap crash-recovery scratch file lives.
pub(crate) fn scratch_path(log_name: &str, appender_name: &str) -> PathBuf {
    PathBuf::from("bqlog_mmap")
        .join(format!("mmap_{log_name}"))
        .join("appenders")
        .join(format!("{appender_name}.mmap"))
}

/// The tagged variant over the four appender kinds, dispatched by the
/// worker for every consumed record.
pub(crate) enum Appender {
    Console(console::ConsoleAppender),
    Text(text::TextAppender),
    Raw(raw::RawAppender),
    Compressed(compressed::CompressedAppender),
}

impl Appender {
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Console(a) => a.name(),
            Self::Text(a) => a.name(),
            Self::Raw(a) => a.name(),
            Self::Compressed(a) => a.name(),
        }
    }

    pub(crate) fn filter(&self) -> &Filter {
        match self {
            Self::Console(a) => &a.filter,
            Self::Text(a) => &a.filter,
            Self::Raw(a) => &a.filter,
            Self::Compressed(a) => &a.filter,
        }
    }

    /// Consumes one record, rendering/encoding and routing it to the sink.
    pub(crate) fn consume_record(
        &mut self,
        record: &crate::record::Record<'_>,
        category_name: &str,
    ) {
        match self {
            Self::Console(a) => a.consume_record(record, category_name),
            Self::Text(a) => a.consume_record(record, category_name),
            Self::Raw(a) => a.consume_record(record),
            Self::Compressed(a) => a.consume_record(record),
        }
    }

    /// Flushes the in-process write cache toward the OS.
    pub(crate) fn flush_cache(&mut self) {
        match self {
            Self::Console(_) => {}
            Self::Text(a) => a.flush_cache(),
            Self::Raw(a) => a.flush_cache(),
            Self::Compressed(a) => a.flush_cache(),
        }
    }

    /// Flushes the OS-level cache to durable storage.
    pub(crate) fn flush_to_disk(&mut self) {
        match self {
            Self::Console(_) => {}
            Self::Text(a) => a.flush_to_disk(),
            Self::Raw(a) => a.flush_to_disk(),
            Self::Compressed(a) => a.flush_to_disk(),
        }
    }
}

/// Resolves the configured time zone, falling back to local time on any
/// parse failure (appenders never fail construction over a bad TZ string).
pub(crate) fn resolve_time_zone(config: &AppenderConfig) -> TimeZone {
    config
        .time_zone
        .as_deref()
        .and_then(|raw| TimeZone::parse(raw).ok())
        .unwrap_or_default()
}
