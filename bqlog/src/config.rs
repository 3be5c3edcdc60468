//! Configuration parsing: a dotted `key = value` tree (TOML) describing a
//! log's thread mode, category mask, buffer policy, appender list and
//! snapshot ring.

use std::collections::HashMap;

use serde::Deserialize;

use crate::record::Level;

/// How a log's producer threads hand entries to the consumer.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// The producer writes directly; there is no separate consumer thread.
    Sync,
    /// A shared worker thread services every async log.
    #[default]
    Async,
    /// The log gets its own dedicated consumer thread.
    Independent,
}

/// How a SISO ring buffer behaves once full.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BufferPolicy {
    #[default]
    Discard,
    Block,
    Expand,
}

fn default_buffer_size() -> u64 {
    64 * 1024
}

/// The `log.*` configuration section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub thread_mode: ThreadMode,
    pub categories_mask: Vec<String>,
    pub print_stack_levels: Vec<Level>,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u64,
    pub recovery: bool,
    pub buffer_policy: BufferPolicy,
    pub high_perform_mode_freq_threshold_per_second: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            thread_mode: ThreadMode::default(),
            categories_mask: Vec::new(),
            print_stack_levels: Vec::new(),
            buffer_size: default_buffer_size(),
            recovery: true,
            buffer_policy: BufferPolicy::default(),
            high_perform_mode_freq_threshold_per_second: 0,
        }
    }
}

/// The kind of sink an `appenders_config.<name>` section configures.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppenderKind {
    Console,
    TextFile,
    RawFile,
    CompressedFile,
}

/// Which directory class a file appender's `file_name` is resolved against.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaseDirType {
    #[default]
    Default,
    AppData,
    Temp,
}

/// One `appenders_config.<name>` section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AppenderConfig {
    #[serde(skip)]
    pub name: String,
    pub r#type: Option<AppenderKind>,
    pub levels: Vec<Level>,
    pub file_name: String,
    pub base_dir_type: BaseDirType,
    pub always_create_new_file: bool,
    pub max_file_size: u64,
    pub expire_time_seconds: u64,
    pub expire_time_days: u64,
    pub capacity_limit: u64,
    pub enable_rolling_log_file: bool,
    pub time_zone: Option<String>,
    pub categories_mask: Vec<String>,
    pub pub_key: Option<String>,
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            r#type: None,
            levels: Vec::new(),
            file_name: String::new(),
            base_dir_type: BaseDirType::default(),
            always_create_new_file: false,
            max_file_size: 0,
            expire_time_seconds: 0,
            expire_time_days: 0,
            capacity_limit: 0,
            enable_rolling_log_file: false,
            time_zone: None,
            categories_mask: Vec::new(),
            pub_key: None,
        }
    }
}

impl AppenderConfig {
    /// The merged retention threshold in milliseconds (seconds and days add).
    pub(crate) fn expire_time_ms(&self) -> u64 {
        (self.expire_time_seconds.saturating_add(self.expire_time_days * 86_400)) * 1000
    }
}

/// The `snapshot.*` configuration section.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub buffer_size: u64,
    pub levels: Vec<Level>,
    pub categories_mask: Vec<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { buffer_size: 0, levels: Vec::new(), categories_mask: Vec::new() }
    }
}

/// A fully parsed per-log configuration: `log.*`, every
/// `appenders_config.<name>.*` section, and `snapshot.*`.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub log: LogConfig,
    pub appenders: Vec<AppenderConfig>,
    pub snapshot: SnapshotConfig,
}

/// The raw shape of a config TOML document, unknown keys ignored.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    log: LogConfig,
    #[serde(default)]
    appenders_config: HashMap<String, AppenderConfig>,
    #[serde(default)]
    snapshot: SnapshotConfig,
}

impl Config {
    /// Parses a log's configuration from a TOML document.
    pub fn parse(toml_text: &str) -> Result<Self, toml::de::Error> {
        let raw: RawConfig = toml::from_str(toml_text)?;
        let mut appenders: Vec<AppenderConfig> = raw
            .appenders_config
            .into_iter()
            .map(|(name, mut config)| {
                config.name = name;
                config
            })
            .collect();
        appenders.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(Self { log: raw.log, appenders, snapshot: raw.snapshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.log.thread_mode, ThreadMode::Async);
        assert!(config.appenders.is_empty());
    }

    #[test]
    fn test_parse_log_and_appender_sections() {
        let toml_text = r#"
            [log]
            thread_mode = "independent"
            buffer_size = 131072
            buffer_policy = "block"

            [appenders_config.file]
            type = "raw_file"
            file_name = "app"
            max_file_size = 1048576
            levels = ["info", "error"]

            [snapshot]
            buffer_size = 4096
        "#;
        let config = Config::parse(toml_text).unwrap();
        assert_eq!(config.log.thread_mode, ThreadMode::Independent);
        assert_eq!(config.log.buffer_size, 131072);
        assert_eq!(config.log.buffer_policy, BufferPolicy::Block);

        assert_eq!(config.appenders.len(), 1);
        let appender = &config.appenders[0];
        assert_eq!(appender.name, "file");
        assert_eq!(appender.r#type, Some(AppenderKind::RawFile));
        assert_eq!(appender.max_file_size, 1_048_576);
        assert_eq!(appender.levels, vec![Level::Info, Level::Error]);

        assert_eq!(config.snapshot.buffer_size, 4096);
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let toml_text = r#"
            [log]
            thread_mode = "sync"
            made_up_key = 42

            [made_up_section]
            x = 1
        "#;
        let config = Config::parse(toml_text).unwrap();
        assert_eq!(config.log.thread_mode, ThreadMode::Sync);
    }

    #[test]
    fn test_expire_time_merges_seconds_and_days() {
        let mut appender = AppenderConfig::default();
        appender.expire_time_seconds = 30;
        appender.expire_time_days = 2;
        assert_eq!(appender.expire_time_ms(), (30 + 2 * 86_400) * 1000);
    }
}
