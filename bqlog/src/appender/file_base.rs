//! Shared write-cache, rotation, retention, capacity and mmap-backed crash
//! recovery machinery, reused by the text, raw and compressed file
//! appenders.

use std::{
    fs,
    fs::File,
    io,
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use chrono::{Datelike, TimeZone as _};

use crate::{mmap::Mmap, tz::TimeZone};

const INITIAL_CACHE_CAPACITY: usize = 64 * 1024;
const SCRATCH_FIXED_HEAD_LEN: usize = 8 + 8 + 1 + 4;
const SCRATCH_ALIGNMENT: usize = 32;

/// Configuration a [`FileBase`] rotates and retains files under.
pub(crate) struct Options {
    pub(crate) directory: PathBuf,
    pub(crate) file_name: String,
    pub(crate) extension: &'static str,
    pub(crate) max_file_size: u64,
    pub(crate) expire_time_ms: u64,
    pub(crate) capacity_limit: u64,
    pub(crate) enable_rolling_log_file: bool,
    pub(crate) always_create_new_file: bool,
    pub(crate) time_zone: TimeZone,
    pub(crate) scratch_path: PathBuf,
}

/// A hook pair a binary appender uses to bracket replayed recovery bytes
/// with `recovery begin`/`end` markers; text appenders use the string
/// variant directly.
pub(crate) trait RecoveryHooks {
    fn on_recovery_begin(&mut self) {}
    fn on_recovery_end(&mut self) {}
}

pub(crate) struct FileBase {
    options: Options,
    file: Option<File>,
    path: PathBuf,
    size: u64,
    index: u32,
    next_midnight_ms: Option<i64>,
    scratch: Option<Mmap>,
    scratch_head_len: usize,
    cache: Vec<u8>,
    cache_capacity: usize,
    last_epoch_ms: i64,
}

impl FileBase {
    /// Opens (recovering from the mmap scratch region if one exists and is
    /// self-consistent) or creates the first file for this appender.
    pub(crate) fn new(options: Options, epoch_ms: i64, recovery: &mut dyn RecoveryHooks) -> Self {
        let index = next_free_index(&options);
        let next_midnight_ms =
            options.enable_rolling_log_file.then(|| next_midnight_ms(&options.time_zone, epoch_ms));
        let path = file_path(&options, epoch_ms, index);

        let mut base = Self {
            options,
            file: None,
            path,
            size: 0,
            index,
            next_midnight_ms,
            scratch: None,
            scratch_head_len: 0,
            cache: Vec::with_capacity(INITIAL_CACHE_CAPACITY),
            cache_capacity: INITIAL_CACHE_CAPACITY,
            last_epoch_ms: epoch_ms,
        };

        base.recover(recovery);
        base
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// The number of bytes written to the current file so far (including
    /// unflushed cache bytes), used to compute absolute offsets for
    /// encryption keying.
    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    /// Ensures the file should not be rotated before writing `len` more
    /// bytes, rotating first if needed.
    pub(crate) fn prepare_for_write(&mut self, len: usize, epoch_ms: i64) {
        self.last_epoch_ms = epoch_ms;
        let would_exceed_size =
            self.options.max_file_size > 0 && self.size + len as u64 > self.options.max_file_size;
        let past_midnight = self.next_midnight_ms.is_some_and(|deadline| epoch_ms >= deadline);

        if would_exceed_size || past_midnight {
            self.rotate(epoch_ms);
        }
    }

    /// Appends `bytes` to the in-process write cache (and its mmap mirror),
    /// flushing to the OS first if the cache has no room.
    pub(crate) fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.cache.len() + bytes.len() > self.cache_capacity {
            self.flush_cache()?;
        }
        while bytes.len() > self.cache_capacity {
            self.cache_capacity *= 2;
            self.scratch = None;
        }

        self.cache.extend_from_slice(bytes);
        self.size += bytes.len() as u64;
        self.mirror_to_scratch();
        self.mark_write_finished();
        Ok(())
    }

    /// Flushes the write cache to the OS-level file (`write(2)`, not
    /// necessarily durable). A write failure logs a one-shot entry to the
    /// shared `write_file_error.log` sidecar and rolls to a new file,
    /// except when the disk is simply full: there is no new file that
    /// would fare any better, so the cache (and its mmap mirror) are left
    /// intact for the next flush attempt to retry.
    pub(crate) fn flush_cache(&mut self) -> io::Result<()> {
        if self.cache.is_empty() {
            return Ok(());
        }
        let attempted_len = self.cache.len();
        let result = (|| -> io::Result<()> {
            let file = self.open()?;
            file.seek(SeekFrom::End(0))?;
            file.write_all(&self.cache)?;
            Ok(())
        })();

        match &result {
            Ok(()) => {
                self.cache.clear();
                self.ensure_scratch();
                if let Some(scratch) = &mut self.scratch {
                    write_scratch_cursor(scratch, 0);
                }
            }
            Err(err) if err.raw_os_error() == Some(libc::ENOSPC) => {
                log_write_error(&self.options, err, attempted_len);
            }
            Err(err) => {
                log_write_error(&self.options, err, attempted_len);
                self.file = None;
                self.index += 1;
                self.path = file_path(&self.options, self.last_epoch_ms, self.index);
                self.scratch = None;
                self.cache.clear();
                self.ensure_scratch();
                if let Some(scratch) = &mut self.scratch {
                    write_scratch_cursor(scratch, 0);
                }
            }
        }

        result
    }

    /// Flushes the OS-level file to durable storage (`fsync`), logging a
    /// failure to the shared `flush_file_error.log` sidecar.
    pub(crate) fn flush_to_disk(&mut self) -> io::Result<()> {
        if let Some(file) = &self.file {
            if let Err(err) = file.sync_all() {
                log_flush_error(&self.options, &err);
                return Err(err);
            }
        }
        Ok(())
    }

    fn open(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = fs::OpenOptions::new().append(true).create(true).open(&self.path)?;
            self.size = file.metadata()?.len();
            self.file = Some(file);
        }
        Ok(self.file.as_mut().expect("just inserted"))
    }

    fn rotate(&mut self, epoch_ms: i64) {
        let _ = self.flush_cache();
        let _ = self.flush_to_disk();
        self.file = None;

        let _ = enforce_retention(&self.options);
        let _ = enforce_capacity(&self.options);

        self.index += 1;
        self.path = file_path(&self.options, epoch_ms, self.index);
        self.size = 0;
        if self.options.enable_rolling_log_file {
            self.next_midnight_ms = Some(next_midnight_ms(&self.options.time_zone, epoch_ms));
        }
        self.scratch = None;
        self.ensure_scratch();
    }

    fn mirror_to_scratch(&mut self) {
        self.ensure_scratch();
        let append_len = self.last_append_len();
        let head_len = self.scratch_head_len;
        let cache_len = self.cache.len();
        let Some(scratch) = &mut self.scratch else { return };
        let offset = head_len + cache_len - append_len;
        scratch[offset..offset + append_len]
            .copy_from_slice(&self.cache[cache_len - append_len..]);
    }

    fn last_append_len(&self) -> usize {
        // The cache only ever grows between `mark_write_finished` calls, so
        // the tail of `self.cache` not yet mirrored is exactly the bytes
        // appended by the most recent `write`.
        self.cache.len() - read_scratch_cursor(self.scratch.as_ref())
    }

    fn mark_write_finished(&mut self) {
        let len = self.cache.len();
        if let Some(scratch) = &mut self.scratch {
            write_scratch_cursor(scratch, len as u64);
        }
    }

    fn ensure_scratch(&mut self) {
        if self.scratch.is_some() {
            return;
        }
        let path_bytes = self.path.to_string_lossy();
        let path_bytes = path_bytes.as_bytes();
        let head_len = align_up(
            SCRATCH_FIXED_HEAD_LEN + path_bytes.len(),
            SCRATCH_ALIGNMENT,
        );
        let total_len = head_len + self.cache_capacity;

        let Ok(mut mmap) = Mmap::new(&self.options.scratch_path, total_len) else { return };
        let alignment_offset = (head_len - (SCRATCH_FIXED_HEAD_LEN + path_bytes.len())) as u8;

        mmap[0..8].copy_from_slice(&(self.cache_capacity as u64).to_le_bytes());
        mmap[8..16].copy_from_slice(&0u64.to_le_bytes());
        mmap[16] = alignment_offset;
        mmap[17..21].copy_from_slice(&(path_bytes.len() as u32).to_le_bytes());
        mmap[21..21 + path_bytes.len()].copy_from_slice(path_bytes);

        self.scratch_head_len = head_len;
        self.scratch = Some(mmap);
    }

    /// Replays any unflushed cache bytes recorded in the mmap scratch
    /// region from a prior crash, then (re)establishes a fresh scratch
    /// mapping for this file.
    fn recover(&mut self, hooks: &mut dyn RecoveryHooks) {
        let existing = if self.options.always_create_new_file {
            None
        } else {
            read_existing_scratch(&self.options.scratch_path)
        };

        if let Some((cursor, recovered_path, cache_capacity)) = existing {
            if let Some(parent) = recovered_path.parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Ok(mut file) =
                fs::OpenOptions::new().append(true).create(true).open(&recovered_path)
            {
                if cursor > 0 {
                    if let Some(bytes) = read_scratch_payload(&self.options.scratch_path, cursor) {
                        hooks.on_recovery_begin();
                        let _ = file.seek(SeekFrom::End(0));
                        let _ = file.write_all(&bytes);
                        hooks.on_recovery_end();
                    }
                }
                self.path = recovered_path;
                self.size = file.metadata().map(|m| m.len()).unwrap_or(0);
                self.file = Some(file);
                self.cache_capacity = cache_capacity.max(INITIAL_CACHE_CAPACITY);
            }
        }
        self.ensure_scratch();
    }
}

/// Appends a one-shot diagnostic line to a sidecar file shared by every
/// log rooted under the same `bqLog` directory, one level above any
/// individual log's own output directory.
fn append_error_sidecar(options: &Options, file_name: &str, line: &str) {
    let Some(root) = options.directory.parent() else { return };
    if fs::create_dir_all(root).is_err() {
        return;
    }
    if let Ok(mut sidecar) =
        fs::OpenOptions::new().append(true).create(true).open(root.join(file_name))
    {
        let _ = sidecar.write_all(line.as_bytes());
    }
}

fn epoch_ms_now() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

fn io_error_code(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => code.to_string(),
        None => err.kind().to_string(),
    }
}

fn log_write_error(options: &Options, err: &io::Error, attempted_len: usize) {
    let line = format!(
        "{}\t{}\tattempted={attempted_len}\tfile={}\n",
        epoch_ms_now(),
        io_error_code(err),
        options.file_name,
    );
    append_error_sidecar(options, "write_file_error.log", &line);
}

fn log_flush_error(options: &Options, err: &io::Error) {
    let line = format!("{}\t{}\tfile={}\n", epoch_ms_now(), io_error_code(err), options.file_name);
    append_error_sidecar(options, "flush_file_error.log", &line);
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn write_scratch_cursor(scratch: &mut Mmap, cursor: u64) {
    scratch[8..16].copy_from_slice(&cursor.to_le_bytes());
}

fn read_scratch_cursor(scratch: Option<&Mmap>) -> usize {
    scratch.map(|m| u64::from_le_bytes(m[8..16].try_into().unwrap()) as usize).unwrap_or(0)
}

fn read_existing_scratch(path: &Path) -> Option<(usize, PathBuf, usize)> {
    if !path.exists() {
        return None;
    }
    let len = fs::metadata(path).ok()?.len() as usize;
    if len < SCRATCH_FIXED_HEAD_LEN {
        return None;
    }
    let mmap = Mmap::new(path, len).ok()?;
    let write_cache_size = u64::from_le_bytes(mmap[0..8].try_into().unwrap()) as usize;
    let cursor = u64::from_le_bytes(mmap[8..16].try_into().unwrap()) as usize;
    let alignment_offset = mmap[16] as usize;
    let path_len = u32::from_le_bytes(mmap[17..21].try_into().unwrap()) as usize;

    let head_len = SCRATCH_FIXED_HEAD_LEN + path_len + alignment_offset;
    if head_len > mmap.len() || head_len + write_cache_size > mmap.len() {
        return None;
    }
    if cursor > write_cache_size {
        return None;
    }
    let file_path = std::str::from_utf8(&mmap[21..21 + path_len]).ok()?;
    let file_path = PathBuf::from(file_path);
    Some((cursor, file_path, write_cache_size))
}

fn read_scratch_payload(path: &Path, cursor: usize) -> Option<Vec<u8>> {
    let len = fs::metadata(path).ok()?.len() as usize;
    let mmap = Mmap::new(path, len).ok()?;
    let path_len = u32::from_le_bytes(mmap[17..21].try_into().unwrap()) as usize;
    let alignment_offset = mmap[16] as usize;
    let head_len = SCRATCH_FIXED_HEAD_LEN + path_len + alignment_offset;
    if head_len + cursor > mmap.len() {
        return None;
    }
    Some(mmap[head_len..head_len + cursor].to_vec())
}

fn next_free_index(options: &Options) -> u32 {
    let pattern_prefix = format!("{}_", options.file_name);
    fs::read_dir(&options.directory)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name();
            let name = name.to_str()?;
            let stem = name.strip_suffix(&format!(".{}", options.extension))?;
            let suffix = stem.strip_prefix(&pattern_prefix)?;
            let index_part = suffix.rsplit('_').next().unwrap_or(suffix);
            index_part.parse::<u32>().ok()
        })
        .max()
        .map(|max| max + 1)
        .unwrap_or(0)
}

fn file_path(options: &Options, epoch_ms: i64, index: u32) -> PathBuf {
    let mut name = options.file_name.clone();
    if options.enable_rolling_log_file {
        let date = options.time_zone.to_naive(epoch_ms).date();
        name.push_str(&format!("_{:04}{:02}{:02}", date.year(), date.month(), date.day()));
    }
    name.push_str(&format!("_{index}.{}", options.extension));
    options.directory.join(name)
}

fn next_midnight_ms(time_zone: &TimeZone, epoch_ms: i64) -> i64 {
    let naive = time_zone.to_naive(epoch_ms);
    let today_midnight =
        chrono::NaiveDate::from_ymd_opt(naive.year(), naive.month(), naive.day())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .expect("valid calendar date");
    let tomorrow_midnight = today_midnight + chrono::Duration::days(1);

    match time_zone.fixed_offset_ms() {
        Some(offset_ms) => tomorrow_midnight.and_utc().timestamp_millis() - offset_ms,
        None => chrono::Local
            .from_local_datetime(&tomorrow_midnight)
            .single()
            .map(|dt| dt.timestamp_millis())
            .unwrap_or_else(|| tomorrow_midnight.and_utc().timestamp_millis()),
    }
}

fn enforce_retention(options: &Options) -> io::Result<()> {
    if options.expire_time_ms == 0 {
        return Ok(());
    }
    let now = std::time::SystemTime::now();
    for path in matching_files(options)? {
        let Ok(metadata) = fs::metadata(&path) else { continue };
        let Ok(modified) = metadata.modified() else { continue };
        let Ok(age) = now.duration_since(modified) else { continue };
        if age.as_millis() as u64 > options.expire_time_ms {
            let _ = fs::remove_file(&path);
        }
    }
    Ok(())
}

fn enforce_capacity(options: &Options) -> io::Result<()> {
    if options.capacity_limit == 0 {
        return Ok(());
    }
    let mut files: Vec<(PathBuf, u64, std::time::SystemTime)> = matching_files(options)?
        .into_iter()
        .filter_map(|path| {
            let metadata = fs::metadata(&path).ok()?;
            let modified = metadata.modified().ok()?;
            Some((path, metadata.len(), modified))
        })
        .collect();

    files.sort_by_key(|(_, _, modified)| *modified);

    let mut total: u64 = files.iter().map(|(_, len, _)| len).sum();
    for (path, len, _) in files {
        if total <= options.capacity_limit {
            break;
        }
        if fs::remove_file(&path).is_ok() {
            total -= len;
        }
    }
    Ok(())
}

fn matching_files(options: &Options) -> io::Result<Vec<PathBuf>> {
    let prefix = format!("{}_", options.file_name);
    Ok(fs::read_dir(&options.directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(&prefix))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    struct NoopHooks;
    impl RecoveryHooks for NoopHooks {}

    fn options(dir: &Path) -> Options {
        Options {
            directory: dir.to_path_buf(),
            file_name: "test".to_owned(),
            extension: "lograw",
            max_file_size: 0,
            expire_time_ms: 0,
            capacity_limit: 0,
            enable_rolling_log_file: false,
            always_create_new_file: false,
            time_zone: TimeZone::default(),
            scratch_path: dir.join("scratch.mmap"),
        }
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempdir().unwrap();
        let mut base = FileBase::new(options(dir.path()), 0, &mut NoopHooks);
        base.prepare_for_write(5, 0);
        base.write(b"hello").unwrap();
        base.flush_cache().unwrap();
        base.flush_to_disk().unwrap();

        let content = fs::read(base.path()).unwrap();
        assert_eq!(content, b"hello");
    }

    #[test]
    fn test_rotation_by_size_increments_index() {
        let dir = tempdir().unwrap();
        let mut options = options(dir.path());
        options.max_file_size = 4;
        let mut base = FileBase::new(options, 0, &mut NoopHooks);

        base.prepare_for_write(4, 0);
        base.write(b"abcd").unwrap();
        base.flush_cache().unwrap();
        let first_path = base.path().to_path_buf();

        base.prepare_for_write(4, 0);
        assert_ne!(base.path(), first_path);
    }

    #[test]
    fn test_recovers_unflushed_cache_bytes() {
        let dir = tempdir().unwrap();
        let opts = options(dir.path());

        {
            let mut base = FileBase::new(opts_clone(&opts), 0, &mut NoopHooks);
            base.prepare_for_write(5, 0);
            base.write(b"hello").unwrap();
            // Crash: no flush_cache, file dropped with bytes only in the
            // mmap scratch mirror.
        }

        let mut base = FileBase::new(opts_clone(&opts), 0, &mut NoopHooks);
        let content = fs::read(base.path()).unwrap_or_default();
        assert_eq!(content, b"hello");
        let _ = base.flush_to_disk();
    }

    fn opts_clone(options: &Options) -> Options {
        Options {
            directory: options.directory.clone(),
            file_name: options.file_name.clone(),
            extension: options.extension,
            max_file_size: options.max_file_size,
            expire_time_ms: options.expire_time_ms,
            capacity_limit: options.capacity_limit,
            enable_rolling_log_file: options.enable_rolling_log_file,
            always_create_new_file: options.always_create_new_file,
            time_zone: options.time_zone.clone(),
            scratch_path: options.scratch_path.clone(),
        }
    }
}
