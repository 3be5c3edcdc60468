//! An extremely high performance structured logging engine for clients
//! (iOS, Android, Desktop), written in Rust.
//!
//! ### Compression
//!
//! bqlog's compressed file appender streams each record through a
//! per-template delta encoder: the first occurrence of a format string in
//! a log file is stored in full, later occurrences reference it by index,
//! trading a small amount of CPU for a large reduction in file size
//! relative to the raw binary format.
//!
//! ### Encryption
//!
//! bqlog uses the `AES-128-CBC` algorithm for symmetric encryption during
//! logging. To avoid embedding the symmetric key directly in the binary,
//! the key is generated per-file and sealed with `RSA`, so only the holder
//! of the matching private key can recover it. When creating a log, there
//! is no need to provide the symmetric key, only the RSA public key (an
//! OpenSSH `ssh-rsa ...` line) should be configured on the appender.
//!
//! ### Buffering
//!
//! In order to minimize IO frequency, bqlog buffers log records in a ring
//! before an appender ever touches disk. Client programs may exit
//! unexpectedly (e.g., crash); an `async`/`independent` log's ring may be
//! backed by `mmap` so that the OS can still persist the buffered data,
//! and the next time the log is created the buffered data is replayed
//! into the appenders automatically.
//!
//! ### Decoding
//!
//! With bqlog, the `.lograw`/`.logcompr` binary appender output is not
//! human-readable on its own; the `log_decoder` command line tool (or the
//! [`decoder`] module directly) reconstructs the original text.
//!
//! ## Usage
//!
//! ### Creating a log
//!
//! ```rust,no_run
//! # use bqlog::{config::{LogConfig, AppenderConfig, SnapshotConfig}, Level};
//! let id = bqlog::create_log(
//!     "my_app".to_owned(),
//!     LogConfig::default(),
//!     vec!["default".to_owned()],
//!     Vec::<AppenderConfig>::new(),
//!     SnapshotConfig::default(),
//! ).expect("manager is not shutting down");
//!
//! bqlog::log(id, Level::Info, 0, "hello {0}", vec![bqlog::Argument::Str("world")]);
//! bqlog::force_flush(id);
//! ```
//!
//! ### Decoding
//!
//! ```plain
//! $ log_decoder ./my_app/file.lograw ./plain.log
//! ```

use std::path::PathBuf;

pub mod codec;
pub use codec::{DecodingError, EncodingError};

mod common;

mod vlq;
mod tz;

mod ring;

pub mod record;
pub use record::{Argument, Level};

mod layout;

pub mod crypto;

mod mmap;

mod appender;
pub use appender::console::{ConsoleCallback, ConsoleCallbackHandle};

pub mod config;
pub use config::Config;

pub mod decoder;

mod worker;

mod signal;

mod manager;
pub use manager::{
    create_log, force_flush, force_flush_all, log, set_console_callback, set_tracker,
    take_snapshot, uninit, LogId, Track, Tracker,
};

mod snapshot;

/// Creates a log from a fully parsed [`Config`] rather than its three
/// constituent pieces, mirroring how `Config::parse` is normally used.
pub fn create_log_from_config(
    name: String,
    categories: Vec<String>,
    config: Config,
) -> Option<LogId> {
    create_log(name, config.log, categories, config.appenders, config.snapshot)
}

/// Where a created log's files (error sidecars, `AppData`/`Temp`-rooted
/// appenders) are ultimately rooted, relative to the process's working
/// directory, absent an explicit `base_dir_type` override.
pub fn default_log_directory(log_name: &str) -> PathBuf {
    appender::base_directory(log_name)
}
