//! An in-memory retained-text ring: diagnostic tooling can ask a log "what
//! have you printed recently" without touching its file appenders. Gated
//! by its own level bitmap and category mask, independent of any
//! appender's filter.
//!
//! Grounded on the two-text-buffer handoff scheme of the original
//! snapshot implementation: `take` renders into whichever of two text
//! buffers was not returned last time, and stitches on the tail of the
//! previous text when the new render is shorter than the configured
//! size and nothing was discarded in between (`continuous`).

use parking_lot::Mutex;

use crate::{
    config::SnapshotConfig,
    layout,
    manager::category_enabled_bitmap,
    record::{Level, Record},
    ring::{self, OverflowPolicy, Siso, Storage, BLOCK_LEN},
    tz::{TimeCache, TimeZone},
};

fn level_bitmap(levels: &[Level]) -> [bool; 6] {
    if levels.is_empty() {
        return [true; 6];
    }
    let mut bitmap = [false; 6];
    for level in levels {
        bitmap[level.primitive() as usize] = true;
    }
    bitmap
}

struct Inner {
    ring: Option<Siso>,
    buffer_size: u64,
    level_enabled: [bool; 6],
    category_enabled: Vec<bool>,
    categories: Vec<String>,
    texts: [String; 2],
    text_index: usize,
    continuous: bool,
    time_cache: TimeCache,
}

impl Inner {
    fn build(config: &SnapshotConfig, categories: &[String]) -> Self {
        let ring = (config.buffer_size > 0).then(|| {
            let min_blocks =
                ring::round_up_block_count((config.buffer_size / BLOCK_LEN as u64).max(1) as u32);
            let storage = Storage::Heap(vec![0u8; min_blocks as usize * BLOCK_LEN]);
            Siso::new(storage, min_blocks, OverflowPolicy::Discard, |_| {})
        });

        Self {
            ring,
            buffer_size: config.buffer_size,
            level_enabled: level_bitmap(&config.levels),
            category_enabled: category_enabled_bitmap(categories, &config.categories_mask),
            categories: categories.to_vec(),
            texts: [String::new(), String::new()],
            text_index: 0,
            continuous: false,
            time_cache: TimeCache::new(TimeZone::LOCAL),
        }
    }
}

/// A log's retained-text snapshot ring, guarded by its own lock so a
/// `take` never blocks on (or races with) the log's appenders.
pub(crate) struct Snapshot {
    inner: Mutex<Inner>,
}

impl Snapshot {
    pub(crate) fn new(config: &SnapshotConfig, categories: &[String]) -> Self {
        Self { inner: Mutex::new(Inner::build(config, categories)) }
    }

    pub(crate) fn reconfigure(&self, config: &SnapshotConfig, categories: &[String]) {
        *self.inner.lock() = Inner::build(config, categories);
    }

    /// Buffers `record` if it passes the snapshot's own level/category
    /// gate and a ring is configured. Silently drops the oldest entry to
    /// make room rather than blocking the caller.
    pub(crate) fn write(&self, record: &Record<'_>) {
        let mut inner = self.inner.lock();
        if !inner.level_enabled[record.level.primitive() as usize] {
            return;
        }
        if inner.category_enabled.get(record.category as usize).is_some_and(|enabled| !enabled) {
            return;
        }

        let Some(ring) = inner.ring.as_mut() else {
            inner.continuous = false;
            return;
        };

        let bytes = record.encode();
        let mut discarded = false;
        loop {
            match ring.write(&bytes) {
                Ok(()) => break,
                Err(ring::Error::TooLarge) => break,
                Err(ring::Error::Full) => {
                    discarded = true;
                    if ring.read_with(|_| ()).is_none() {
                        break;
                    }
                }
            }
        }

        if discarded {
            inner.continuous = false;
        }
    }

    /// Renders every currently buffered record and returns the text,
    /// prepending the tail of the previous snapshot when the ring has
    /// drained faster than `buffer_size` and nothing was discarded since.
    pub(crate) fn take(&self) -> String {
        let mut inner = self.inner.lock();
        let categories = inner.categories.clone();

        let index = (inner.text_index + 1) & 1;
        inner.text_index = index;

        let mut text = String::new();
        if let Some(ring) = inner.ring.as_mut() {
            loop {
                let time_cache = &mut inner.time_cache;
                let consumed = ring.read_with(|bytes| {
                    Record::decode(bytes).ok().map(|record| {
                        let category_name =
                            categories.get(record.category as usize).map(String::as_str).unwrap_or("");
                        layout::render_line(&record, category_name, time_cache)
                    })
                });
                match consumed {
                    Some(Some(rendered)) => {
                        text.push_str(&rendered);
                        text.push('\n');
                    }
                    Some(None) => {}
                    None => break,
                }
            }
        }

        if inner.continuous && (text.len() as u64) < inner.buffer_size {
            let previous = &inner.texts[(index + 1) & 1];
            let left = (inner.buffer_size as usize - text.len()).min(previous.len());
            let start = previous.len() - left;
            let boundary = previous.char_indices().map(|(i, _)| i).find(|&i| i >= start).unwrap_or(previous.len());
            text = format!("{}{}", &previous[boundary..], text);
        }

        inner.continuous = true;
        inner.texts[index] = text.clone();
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordBuilder;

    fn config(buffer_size: u64) -> SnapshotConfig {
        SnapshotConfig { buffer_size, levels: Vec::new(), categories_mask: Vec::new() }
    }

    #[test]
    fn test_disabled_snapshot_returns_empty_text() {
        let snapshot = Snapshot::new(&config(0), &["default".to_owned()]);
        let record = RecordBuilder::new(Level::Info, 0, "hi").build(0, 1, None);
        snapshot.write(&record);
        assert_eq!(snapshot.take(), "");
    }

    #[test]
    fn test_written_records_are_rendered() {
        let snapshot = Snapshot::new(&config(4096), &["default".to_owned()]);
        let record = RecordBuilder::new(Level::Info, 0, "hello {0}")
            .arg(crate::record::Argument::U32(1))
            .build(0, 1, None);
        snapshot.write(&record);

        let text = snapshot.take();
        assert_eq!(text, "[I]\t[default]\thello 1\n");
    }

    #[test]
    fn test_level_gate_blocks_disallowed_level() {
        let config = SnapshotConfig {
            buffer_size: 4096,
            levels: vec![Level::Error],
            categories_mask: Vec::new(),
        };
        let snapshot = Snapshot::new(&config, &["default".to_owned()]);
        let record = RecordBuilder::new(Level::Info, 0, "hi").build(0, 1, None);
        snapshot.write(&record);
        assert_eq!(snapshot.take(), "");
    }

    #[test]
    fn test_reconfigure_resets_buffered_state() {
        let snapshot = Snapshot::new(&config(4096), &["default".to_owned()]);
        let record = RecordBuilder::new(Level::Info, 0, "hi").build(0, 1, None);
        snapshot.write(&record);

        snapshot.reconfigure(&config(4096), &["default".to_owned()]);
        assert_eq!(snapshot.take(), "");
    }
}
