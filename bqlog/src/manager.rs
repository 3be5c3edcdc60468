//! The process-wide registry of logs: creation/lookup by a generational
//! id, per-log category and level gating, transport selection (direct
//! dispatch for sync-mode logs, a ring buffer drained by a worker for
//! async/independent-mode logs), and orderly shutdown.
//!
//! Grounded on the consumer-thread sharing rules in the worker module and
//! on the REDESIGN FLAGS guidance to replace a forged-pointer id with a
//! slot index plus generation counter.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, OnceLock,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use parking_lot::{Mutex, RwLock};

use crate::{
    appender::{
        base_directory, compressed::CompressedAppender, console::ConsoleAppender,
        console::ConsoleCallbackHandle, file_base::Options, raw::RawAppender, resolve_time_zone,
        scratch_path, text::TextAppender, Appender, Filter,
    },
    config::{
        AppenderConfig, AppenderKind, BaseDirType, BufferPolicy, LogConfig, SnapshotConfig,
        ThreadMode,
    },
    crypto,
    mmap::Mmap,
    record::{Argument, Level, Record, RecordBuilder},
    ring::{self, Miso, OverflowPolicy, Storage, BLOCK_LEN},
    snapshot::Snapshot,
    worker::Worker,
};

/// Reports an internal error at its call site: appender I/O failures,
/// malformed records seen while draining a ring, and dropped writes that
/// would otherwise vanish silently. A logging engine does not take a
/// logging dependency on itself, so this callback is its own reporting
/// surface.
pub trait Track {
    fn track(&self, context: &str, file: &'static str, line: u32);
}

impl<F> Track for F
where
    F: Fn(&str, &'static str, u32),
{
    #[inline]
    fn track(&self, context: &str, file: &'static str, line: u32) {
        self(context, file, line)
    }
}

/// Trait object type for [`Track`].
pub type Tracker = Box<dyn Track + Send + Sync>;

fn report(message: String, file: &'static str, line: u32) {
    let tracker = manager().tracker.lock();
    match tracker.as_ref() {
        Some(tracker) => tracker.track(&message, file, line),
        None => eprintln!("[bqlog] {file}:{line} {message}"),
    }
}

/// Registers (or clears) the process-wide error tracker.
pub fn set_tracker(tracker: Option<Tracker>) {
    *manager().tracker.lock() = tracker;
}

/// An opaque handle to a created log: a slot index plus the generation
/// that slot held at creation time. Stays valid for the process lifetime
/// since slots are never freed, but carries a generation anyway so a
/// future `destroy_log` cannot hand out a stale id silently.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LogId {
    index: u32,
    generation: u32,
}

struct Slot {
    log: Option<Arc<Log>>,
    generation: u32,
}

struct WorkerState {
    shared_async: Option<Worker>,
    independent: HashMap<u32, Worker>,
}

struct ManagerState {
    slots: RwLock<Vec<Slot>>,
    names: Mutex<HashMap<String, u32>>,
    workers: Mutex<WorkerState>,
    tracker: Mutex<Option<Tracker>>,
    shutting_down: AtomicBool,
}

static MANAGER: OnceLock<ManagerState> = OnceLock::new();

fn manager() -> &'static ManagerState {
    MANAGER.get_or_init(|| {
        crate::signal::install_crash_handlers();
        ManagerState {
            slots: RwLock::new(Vec::new()),
            names: Mutex::new(HashMap::new()),
            workers: Mutex::new(WorkerState { shared_async: None, independent: HashMap::new() }),
            tracker: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    })
}

fn lookup(state: &ManagerState, id: LogId) -> Option<Arc<Log>> {
    let slots = state.slots.read();
    let slot = slots.get(id.index as usize)?;
    if slot.generation != id.generation {
        return None;
    }
    slot.log.clone()
}

/// Creates a log, or (per the "re-create reuses the existing object"
/// lifecycle rule) reconfigures the appenders of an already-existing log
/// with the same name and returns its existing id. Returns `None` once
/// [`uninit`] has been called.
pub(crate) fn create_log(
    name: String,
    config: LogConfig,
    categories: Vec<String>,
    appenders: Vec<AppenderConfig>,
    snapshot: SnapshotConfig,
) -> Option<LogId> {
    let state = manager();
    if state.shutting_down.load(Ordering::Acquire) {
        return None;
    }

    let existing_index = state.names.lock().get(&name).copied();
    if let Some(index) = existing_index {
        let slots = state.slots.read();
        let slot = slots.get(index as usize)?;
        let log = slot.log.as_ref()?;
        let generation = slot.generation;
        log.reconfigure_appenders(appenders);
        log.reconfigure_snapshot(&snapshot);
        return Some(LogId { index, generation });
    }

    let mut slots = state.slots.write();
    let index = slots.len() as u32;
    let generation = 0;
    let log = Arc::new(Log::build(index, generation, name.clone(), config, categories, appenders, snapshot));
    slots.push(Slot { log: Some(Arc::clone(&log)), generation });
    drop(slots);
    state.names.lock().insert(name, index);

    register_with_worker(state, &log);
    Some(LogId { index, generation })
}

fn register_with_worker(state: &ManagerState, log: &Arc<Log>) {
    match log.thread_mode() {
        ThreadMode::Sync => {}
        ThreadMode::Independent => {
            let worker = Worker::spawn_independent(Arc::clone(log));
            state.workers.lock().independent.insert(log.index(), worker);
        }
        ThreadMode::Async => {
            let mut workers = state.workers.lock();
            if workers.shared_async.is_none() {
                workers.shared_async = Some(Worker::spawn_shared());
            }
            workers.shared_async.as_ref().expect("just inserted").register(Arc::clone(log));
        }
    }
}

/// Submits a record to `id`'s log. Returns `false` if the id is stale, the
/// manager is shutting down, the record was filtered out by level or
/// category, or it was dropped (ring full / oversized).
pub(crate) fn log<'a>(
    id: LogId,
    level: Level,
    category: u32,
    format: &'a str,
    args: Vec<Argument<'a>>,
) -> bool {
    let state = manager();
    if state.shutting_down.load(Ordering::Acquire) {
        return false;
    }
    let Some(log) = lookup(state, id) else { return false };

    match log.try_log(level, category, format, args) {
        LogOutcome::Dispatched => true,
        LogOutcome::FilteredOut => false,
        LogOutcome::RingFull => {
            nudge_worker_for(state, &log);
            report(format!("log '{}' dropped a record: ring buffer full", log.name()), file!(), line!());
            false
        }
        LogOutcome::RingTooLarge => {
            report(
                format!("log '{}' dropped a record larger than its entire ring buffer", log.name()),
                file!(),
                line!(),
            );
            false
        }
    }
}

fn nudge_worker_for(state: &ManagerState, log: &Log) {
    let workers = state.workers.lock();
    if let Some(worker) = workers.independent.get(&log.index()) {
        worker.nudge();
    } else if let Some(shared) = &workers.shared_async {
        shared.nudge();
    }
}

/// Registers (or clears) the console callback for `id`'s console
/// appender(s), if any.
pub(crate) fn set_console_callback(id: LogId, callback: Option<ConsoleCallbackHandle>) {
    let state = manager();
    if let Some(log) = lookup(state, id) {
        log.set_console_callback(callback);
    }
}

/// Flushes `id`'s log: drains its transport, flushes appender caches, and
/// syncs to durable storage. A no-op if `id` is stale.
pub(crate) fn force_flush(id: LogId) {
    let state = manager();
    if let Some(log) = lookup(state, id) {
        flush_one(state, &log);
    }
}

/// Returns `id`'s log's currently retained snapshot text, or `None` if
/// `id` is stale.
pub(crate) fn take_snapshot(id: LogId) -> Option<String> {
    let state = manager();
    lookup(state, id).map(|log| log.take_snapshot())
}

fn flush_one(state: &ManagerState, log: &Arc<Log>) {
    match log.thread_mode() {
        ThreadMode::Sync => log.flush_caches(true),
        ThreadMode::Independent => {
            if let Some(worker) = state.workers.lock().independent.get(&log.index()) {
                worker.force_flush(Some(log.index()));
            }
        }
        ThreadMode::Async => {
            if let Some(shared) = &state.workers.lock().shared_async {
                shared.force_flush(Some(log.index()));
            }
        }
    }
}

/// Flushes every log known to the manager.
pub(crate) fn force_flush_all() {
    let state = manager();
    let logs: Vec<Arc<Log>> = state.slots.read().iter().filter_map(|slot| slot.log.clone()).collect();
    for log in &logs {
        if log.thread_mode() == ThreadMode::Sync {
            log.flush_caches(true);
        }
    }

    let workers = state.workers.lock();
    if let Some(shared) = &workers.shared_async {
        shared.force_flush_all();
    }
    for worker in workers.independent.values() {
        worker.force_flush_all();
    }
}

/// Flips the manager into its shutting-down phase: subsequent
/// `create_log`/`log` calls become no-ops, console callbacks are cleared
/// before every worker is joined so none can race a caller's teardown.
pub(crate) fn uninit() {
    let state = manager();
    state.shutting_down.store(true, Ordering::Release);

    for slot in state.slots.read().iter() {
        if let Some(log) = &slot.log {
            log.clear_console_callbacks();
        }
    }

    let mut workers = state.workers.lock();
    if let Some(shared) = workers.shared_async.take() {
        shared.shutdown();
    }
    for (_, worker) in workers.independent.drain() {
        worker.shutdown();
    }
}

/// Whether `mask` matches `category`: `"*default"` matches the implicit
/// empty category, a trailing `*` matches by prefix, anything else must
/// match exactly.
fn category_mask_matches(mask: &str, category: &str) -> bool {
    if mask == "*default" {
        return category.is_empty();
    }
    match mask.strip_suffix('*') {
        Some(prefix) => category.starts_with(prefix),
        None => mask == category,
    }
}

/// Resolves which of `categories` are selected by `masks`. An empty mask
/// list means "match everything", matching [`Filter::allows`]'s
/// convention for an empty category set.
fn resolve_category_indices(categories: &[String], masks: &[String]) -> Vec<u32> {
    if masks.is_empty() {
        return Vec::new();
    }
    categories
        .iter()
        .enumerate()
        .filter(|(_, name)| masks.iter().any(|mask| category_mask_matches(mask, name)))
        .map(|(idx, _)| idx as u32)
        .collect()
}

pub(crate) fn category_enabled_bitmap(categories: &[String], masks: &[String]) -> Vec<bool> {
    if masks.is_empty() {
        return vec![true; categories.len()];
    }
    let mut bitmap = vec![false; categories.len()];
    for idx in resolve_category_indices(categories, masks) {
        bitmap[idx as usize] = true;
    }
    bitmap
}

fn level_enabled_bitmap(appenders: &[Appender]) -> [bool; 6] {
    if appenders.is_empty() {
        return [true; 6];
    }
    let mut bitmap = [false; 6];
    for (idx, enabled) in bitmap.iter_mut().enumerate() {
        let Some(level) = Level::from_primitive(idx as u8) else { continue };
        *enabled = appenders.iter().any(|appender| appender.filter().allows_level(level));
    }
    bitmap
}

/// Packs a per-level bitmap into a single byte so it can live behind an
/// `AtomicU8`, cheap to re-publish whenever appenders are reconfigured.
fn pack_level_bitmap(bitmap: [bool; 6]) -> u8 {
    bitmap.iter().enumerate().fold(0u8, |mask, (idx, &enabled)| mask | ((enabled as u8) << idx))
}

fn now_epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

fn current_thread_id() -> u64 {
    thread_local! {
        static ID: u64 = next_thread_id();
    }
    fn next_thread_id() -> u64 {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        NEXT.fetch_add(1, Ordering::Relaxed)
    }
    ID.with(|id| *id)
}

fn base_dir(log_name: &str, base_dir_type: BaseDirType) -> PathBuf {
    match base_dir_type {
        BaseDirType::Default => base_directory(log_name),
        BaseDirType::AppData => app_data_dir().join("bqLog").join(log_name),
        BaseDirType::Temp => std::env::temp_dir().join("bqLog").join(log_name),
    }
}

fn app_data_dir() -> PathBuf {
    std::env::var_os("APPDATA")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

fn file_options(log_name: &str, config: &AppenderConfig, extension: &'static str) -> Options {
    Options {
        directory: base_dir(log_name, config.base_dir_type),
        file_name: config.file_name.clone(),
        extension,
        max_file_size: config.max_file_size,
        expire_time_ms: config.expire_time_ms(),
        capacity_limit: config.capacity_limit,
        enable_rolling_log_file: config.enable_rolling_log_file,
        always_create_new_file: config.always_create_new_file,
        time_zone: resolve_time_zone(config),
        scratch_path: scratch_path(log_name, &config.name),
    }
}

/// Parses the appender's configured public key, falling back to no
/// encryption on any parse failure rather than failing appender
/// construction (mirrors [`resolve_time_zone`]'s fallback convention).
fn parse_optional_public_key(pub_key: Option<&str>) -> Option<rsa::RsaPublicKey> {
    pub_key.and_then(|line| crypto::parse_public_key(line).ok())
}

fn build_appender(
    log_name: &str,
    categories: &[String],
    config: &AppenderConfig,
    log_index: u32,
    epoch_ms: i64,
) -> Option<Appender> {
    let category_indices = resolve_category_indices(categories, &config.categories_mask);
    let filter = Filter::from_config(config, &category_indices);

    let appender = match config.r#type? {
        AppenderKind::Console => Appender::Console(ConsoleAppender::new(
            config.name.clone(),
            log_index,
            filter,
            false,
            resolve_time_zone(config),
        )),
        AppenderKind::TextFile => {
            let options = file_options(log_name, config, "log");
            Appender::Text(TextAppender::new(config.name.clone(), options, filter, epoch_ms))
        }
        AppenderKind::RawFile => {
            let options = file_options(log_name, config, "lograw");
            let public_key = parse_optional_public_key(config.pub_key.as_deref());
            Appender::Raw(RawAppender::new(
                config.name.clone(),
                options,
                public_key,
                resolve_time_zone(config),
                categories.to_vec(),
                filter,
                epoch_ms,
            ))
        }
        AppenderKind::CompressedFile => {
            let options = file_options(log_name, config, "logcompr");
            let public_key = parse_optional_public_key(config.pub_key.as_deref());
            Appender::Compressed(CompressedAppender::new(
                config.name.clone(),
                options,
                public_key,
                resolve_time_zone(config),
                categories.to_vec(),
                filter,
                epoch_ms,
            ))
        }
    };
    Some(appender)
}

fn build_appenders(
    log_name: &str,
    categories: &[String],
    configs: &[AppenderConfig],
    log_index: u32,
    epoch_ms: i64,
) -> Vec<Appender> {
    configs.iter().filter_map(|config| build_appender(log_name, categories, config, log_index, epoch_ms)).collect()
}

fn dispatch_to(appenders: &mut [Appender], categories: &[String], record: &Record<'_>) {
    let category_name = categories.get(record.category as usize).map(String::as_str).unwrap_or("");
    for appender in appenders.iter_mut() {
        if appender.filter().allows(record.level, record.category) {
            appender.consume_record(record, category_name);
        }
    }
}

fn ring_scratch_path(log_name: &str) -> PathBuf {
    PathBuf::from("bqlog_mmap").join(format!("mmap_{log_name}")).join("ring.mmap")
}

fn ring_storage(log_name: &str, recovery: bool, min_blocks: u32) -> Storage {
    let len = min_blocks as usize * BLOCK_LEN;
    if recovery {
        if let Ok(mmap) = Mmap::new(ring_scratch_path(log_name), len) {
            return Storage::Mmap(mmap);
        }
    }
    Storage::Heap(vec![0u8; len])
}

/// The outcome of submitting one record to a log's transport.
pub(crate) enum LogOutcome {
    Dispatched,
    FilteredOut,
    RingFull,
    RingTooLarge,
}

/// A transport mode's ring buffer, or nothing at all for a log whose
/// producer threads call appenders directly.
pub(crate) enum Transport {
    Sync,
    Buffered(Miso),
}

/// One created log: its category/level gating, owned appenders, and
/// transport. Shared across producer and worker threads via `Arc`.
pub(crate) struct Log {
    index: u32,
    #[allow(dead_code)]
    generation: u32,
    name: String,
    config: LogConfig,
    categories: Vec<String>,
    category_enabled: Vec<bool>,
    /// A bitmask over [`Level::primitive`] indices, recomputed whenever
    /// appenders are (re)configured so a stale bitmap never survives a
    /// `reconfigure_appenders` call.
    level_enabled: AtomicU8,
    appenders: Mutex<Vec<Appender>>,
    transport: Transport,
    last_epoch_ms: AtomicU64,
    snapshot: Snapshot,
}

impl Log {
    fn build(
        index: u32,
        generation: u32,
        name: String,
        config: LogConfig,
        categories: Vec<String>,
        appender_configs: Vec<AppenderConfig>,
        snapshot_config: SnapshotConfig,
    ) -> Self {
        let epoch_ms = now_epoch_ms() as i64;
        let mut appenders = build_appenders(&name, &categories, &appender_configs, index, epoch_ms);
        let level_enabled = AtomicU8::new(pack_level_bitmap(level_enabled_bitmap(&appenders)));
        let category_enabled = category_enabled_bitmap(&categories, &config.categories_mask);

        let overflow_policy = match config.buffer_policy {
            BufferPolicy::Discard => OverflowPolicy::Discard,
            // The ring has no "grow on demand" mode; blocking the
            // producer until the consumer catches up is the closest
            // available behavior to "expand".
            BufferPolicy::Block | BufferPolicy::Expand => OverflowPolicy::Block,
        };

        let transport = match config.thread_mode {
            ThreadMode::Sync => Transport::Sync,
            ThreadMode::Async | ThreadMode::Independent => {
                let min_blocks = ring::round_up_block_count((config.buffer_size / BLOCK_LEN as u64).max(1) as u32);
                let storage = ring_storage(&name, config.recovery, min_blocks);
                let miso = Miso::new(storage, min_blocks, overflow_policy, |bytes| {
                    if let Ok(record) = Record::decode(bytes) {
                        dispatch_to(&mut appenders, &categories, &record);
                    }
                });
                Transport::Buffered(miso)
            }
        };

        let snapshot = Snapshot::new(&snapshot_config, &categories);

        Self {
            index,
            generation,
            name,
            config,
            categories,
            category_enabled,
            level_enabled,
            appenders: Mutex::new(appenders),
            transport,
            last_epoch_ms: AtomicU64::new(0),
            snapshot,
        }
    }

    /// Builds a standalone log bypassing the manager singleton, for unit
    /// tests that exercise dispatch/worker logic in isolation.
    pub(crate) fn new_for_test(
        index: u32,
        name: String,
        config: LogConfig,
        categories: Vec<String>,
        appenders: Vec<AppenderConfig>,
    ) -> Self {
        Self::build(index, 0, name, config, categories, appenders, SnapshotConfig::default())
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn thread_mode(&self) -> ThreadMode {
        self.config.thread_mode
    }

    pub(crate) fn try_log<'a>(
        &self,
        level: Level,
        category: u32,
        format: &'a str,
        args: Vec<Argument<'a>>,
    ) -> LogOutcome {
        let level_mask = self.level_enabled.load(Ordering::Relaxed);
        if level_mask & (1 << level.primitive()) == 0 {
            return LogOutcome::FilteredOut;
        }
        if self.category_enabled.get(category as usize).is_some_and(|enabled| !enabled) {
            return LogOutcome::FilteredOut;
        }

        let thread_name = std::thread::current().name().map(str::to_owned);
        let record = RecordBuilder::new(level, category, format)
            .args(args)
            .build(now_epoch_ms(), current_thread_id(), thread_name.as_deref());

        match &self.transport {
            Transport::Sync => {
                self.dispatch(&record);
                LogOutcome::Dispatched
            }
            Transport::Buffered(ring) => {
                let bytes = record.encode();
                match ring.reserve(bytes.len()) {
                    Ok(reservation) => {
                        reservation.commit(&bytes);
                        LogOutcome::Dispatched
                    }
                    Err(ring::Error::Full) => LogOutcome::RingFull,
                    Err(ring::Error::TooLarge) => LogOutcome::RingTooLarge,
                }
            }
        }
    }

    /// Clamps `epoch_ms` against the previous dispatched entry so the
    /// rendered log never appears to go backwards in time.
    fn clamp_epoch(&self, epoch_ms: u64) -> u64 {
        let mut last = self.last_epoch_ms.load(Ordering::Relaxed);
        loop {
            let clamped = epoch_ms.max(last);
            match self.last_epoch_ms.compare_exchange_weak(
                last,
                clamped,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return clamped,
                Err(actual) => last = actual,
            }
        }
    }

    fn dispatch(&self, record: &Record<'_>) {
        let clamped = self.clamp_epoch(record.epoch_ms);
        if clamped == record.epoch_ms {
            dispatch_to(&mut self.appenders.lock(), &self.categories, record);
            self.snapshot.write(record);
        } else {
            let mut clamped_record = record.clone();
            clamped_record.epoch_ms = clamped;
            dispatch_to(&mut self.appenders.lock(), &self.categories, &clamped_record);
            self.snapshot.write(&clamped_record);
        }
    }

    /// Returns this log's currently retained snapshot text.
    pub(crate) fn take_snapshot(&self) -> String {
        self.snapshot.take()
    }

    fn reconfigure_snapshot(&self, snapshot_config: &SnapshotConfig) {
        self.snapshot.reconfigure(snapshot_config, &self.categories);
    }

    /// Drains every chunk currently available in this log's ring buffer.
    /// A no-op for sync-mode logs, which have no ring.
    pub(crate) fn drain_transport(&self) {
        let Transport::Buffered(ring) = &self.transport else { return };
        loop {
            let consumed = ring.read_with(|bytes| match Record::decode(bytes) {
                Ok(record) => self.dispatch(&record),
                Err(err) => report(
                    format!("log '{}' could not decode a ring entry: {err}", self.name),
                    file!(),
                    line!(),
                ),
            });
            if consumed.is_none() {
                break;
            }
        }
    }

    pub(crate) fn flush_caches(&self, to_disk: bool) {
        let mut appenders = self.appenders.lock();
        for appender in appenders.iter_mut() {
            appender.flush_cache();
            if to_disk {
                appender.flush_to_disk();
            }
        }
    }

    fn reconfigure_appenders(&self, appender_configs: Vec<AppenderConfig>) {
        let epoch_ms = now_epoch_ms() as i64;
        let new_appenders = build_appenders(&self.name, &self.categories, &appender_configs, self.index, epoch_ms);
        self.level_enabled.store(pack_level_bitmap(level_enabled_bitmap(&new_appenders)), Ordering::Relaxed);
        *self.appenders.lock() = new_appenders;
    }

    fn set_console_callback(&self, callback: Option<ConsoleCallbackHandle>) {
        let mut appenders = self.appenders.lock();
        for appender in appenders.iter_mut() {
            if let Appender::Console(console) = appender {
                console.set_callback(callback.clone());
            }
        }
    }

    fn clear_console_callbacks(&self) {
        let mut appenders = self.appenders.lock();
        for appender in appenders.iter_mut() {
            if let Appender::Console(console) = appender {
                console.clear_callback();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Level;

    #[test]
    fn test_category_mask_matches_default_and_prefix() {
        assert!(category_mask_matches("*default", ""));
        assert!(!category_mask_matches("*default", "anything"));
        assert!(category_mask_matches("Module*", "ModuleA.SystemA"));
        assert!(!category_mask_matches("Module*", "Other"));
        assert!(category_mask_matches("Exact", "Exact"));
        assert!(!category_mask_matches("Exact", "Exactish"));
    }

    #[test]
    fn test_resolve_category_indices_empty_mask_matches_all() {
        let categories = vec!["a".to_owned(), "b".to_owned()];
        assert_eq!(resolve_category_indices(&categories, &[]), Vec::<u32>::new());
    }

    #[test]
    fn test_resolve_category_indices_prefix() {
        let categories = vec!["ModuleA.SystemA".to_owned(), "ModuleB".to_owned()];
        let masks = vec!["ModuleA*".to_owned()];
        assert_eq!(resolve_category_indices(&categories, &masks), vec![0]);
    }

    fn sync_config() -> LogConfig {
        LogConfig { thread_mode: ThreadMode::Sync, ..LogConfig::default() }
    }

    fn console_appender_config() -> AppenderConfig {
        AppenderConfig {
            name: "console".to_owned(),
            r#type: Some(AppenderKind::Console),
            ..AppenderConfig::default()
        }
    }

    #[test]
    fn test_sync_log_dispatches_immediately_to_console_appender() {
        use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);

        let log = Log::build(
            0,
            0,
            "test".to_owned(),
            sync_config(),
            vec!["default".to_owned()],
            vec![console_appender_config()],
            SnapshotConfig::default(),
        );
        log.set_console_callback(Some(Arc::new(move |_log_id: u32, _cat: u32, _level: u8, _text: &str| {
            seen_clone.fetch_add(1, AtomicOrdering::SeqCst);
        })));

        let outcome = log.try_log(Level::Info, 0, "hello", Vec::new());
        assert!(matches!(outcome, LogOutcome::Dispatched));
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_category_filter_blocks_disallowed_category() {
        let mut config = sync_config();
        config.categories_mask = vec!["allowed".to_owned()];
        let log = Log::build(
            0,
            0,
            "test".to_owned(),
            config,
            vec!["allowed".to_owned(), "blocked".to_owned()],
            vec![console_appender_config()],
            SnapshotConfig::default(),
        );

        assert!(matches!(log.try_log(Level::Info, 1, "nope", Vec::new()), LogOutcome::FilteredOut));
        assert!(matches!(log.try_log(Level::Info, 0, "yep", Vec::new()), LogOutcome::Dispatched));
    }

    #[test]
    fn test_epoch_clamping_keeps_dispatch_order_monotonic() {
        let log = Log::build(
            0,
            0,
            "test".to_owned(),
            sync_config(),
            vec!["default".to_owned()],
            vec![console_appender_config()],
            SnapshotConfig::default(),
        );

        assert_eq!(log.clamp_epoch(1000), 1000);
        assert_eq!(log.clamp_epoch(500), 1000);
        assert_eq!(log.clamp_epoch(2000), 2000);
    }

    #[test]
    fn test_async_log_round_trips_through_ring() {
        use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);

        let log = Log::build(
            0,
            0,
            "test".to_owned(),
            LogConfig { thread_mode: ThreadMode::Async, recovery: false, ..LogConfig::default() },
            vec!["default".to_owned()],
            vec![console_appender_config()],
            SnapshotConfig::default(),
        );
        log.set_console_callback(Some(Arc::new(move |_log_id: u32, _cat: u32, _level: u8, _text: &str| {
            seen_clone.fetch_add(1, AtomicOrdering::SeqCst);
        })));

        assert!(matches!(log.try_log(Level::Info, 0, "buffered", Vec::new()), LogOutcome::Dispatched));
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 0);

        log.drain_transport();
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 1);
    }
}
