//! The console appender: forwards consumed records to a registered
//! callback instead of persisting them, optionally buffering the
//! rendered text for later fetch.

use std::sync::{Arc, Mutex};

use crate::{
    appender::Filter,
    record::Record,
    tz::{TimeCache, TimeZone},
};

/// Receives `(log_id, category_idx, level, utf8_text, length)` for every
/// record the console appender consumes.
pub trait ConsoleCallback {
    fn on_log(&self, log_id: u32, category_idx: u32, level: u8, text: &str);
}

impl<F> ConsoleCallback for F
where
    F: Fn(u32, u32, u8, &str),
{
    #[inline]
    fn on_log(&self, log_id: u32, category_idx: u32, level: u8, text: &str) {
        self(log_id, category_idx, level, text)
    }
}

/// Trait object type for [`ConsoleCallback`].
pub type ConsoleCallbackHandle = Arc<dyn ConsoleCallback + Send + Sync>;

pub(crate) struct ConsoleAppender {
    name: String,
    pub(super) filter: Filter,
    log_id: u32,
    callback: Option<ConsoleCallbackHandle>,
    buffer: Option<Mutex<Vec<String>>>,
    time_cache: TimeCache,
}

impl ConsoleAppender {
    pub(crate) fn new(
        name: String,
        log_id: u32,
        filter: Filter,
        buffered: bool,
        time_zone: TimeZone,
    ) -> Self {
        Self {
            name,
            filter,
            log_id,
            callback: None,
            buffer: buffered.then(|| Mutex::new(Vec::new())),
            time_cache: TimeCache::new(time_zone),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Registers the callback invoked on every consumed record. Replaces
    /// any previously registered callback.
    pub(crate) fn set_callback(&mut self, callback: Option<ConsoleCallbackHandle>) {
        self.callback = callback;
    }

    /// Unregisters the callback so no further calls race a shutting-down
    /// consumer.
    pub(crate) fn clear_callback(&mut self) {
        self.callback = None;
    }

    pub(crate) fn consume_record(&mut self, record: &Record<'_>, category_name: &str) {
        let text = crate::layout::render_line(record, category_name, &mut self.time_cache);

        if let Some(callback) = &self.callback {
            callback.on_log(self.log_id, record.category, record.level.primitive(), &text);
        }

        if let Some(buffer) = &self.buffer {
            buffer.lock().unwrap().push(text);
        }
    }

    /// Drains and returns the buffered lines, if buffering is enabled.
    pub(crate) fn fetch_and_clear(&self) -> Vec<String> {
        match &self.buffer {
            Some(buffer) => std::mem::take(&mut *buffer.lock().unwrap()),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::record::{Level, RecordBuilder};

    #[test]
    fn test_callback_receives_rendered_text() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_clone = Arc::clone(&seen);

        let mut appender = ConsoleAppender::new(
            "console".to_owned(),
            7,
            Filter::from_config(&Default::default(), &[]),
            false,
            TimeZone::default(),
        );
        appender.set_callback(Some(Arc::new(move |log_id: u32, _cat: u32, _level: u8, _text: &str| {
            seen_clone.store(log_id, Ordering::SeqCst);
        })));

        let record = RecordBuilder::new(Level::Info, 0, "hello").build(0, 1, None);
        appender.consume_record(&record, "default");

        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_buffered_lines_are_fetched_and_cleared() {
        let mut appender = ConsoleAppender::new(
            "console".to_owned(),
            0,
            Filter::from_config(&Default::default(), &[]),
            true,
            TimeZone::default(),
        );

        let record = RecordBuilder::new(Level::Info, 0, "hello").build(0, 1, None);
        appender.consume_record(&record, "default");

        let lines = appender.fetch_and_clear();
        assert_eq!(lines.len(), 1);
        assert!(appender.fetch_and_clear().is_empty());
    }

    #[test]
    fn test_clear_callback_stops_future_calls() {
        let called = Arc::new(AtomicU32::new(0));
        let called_clone = Arc::clone(&called);

        let mut appender = ConsoleAppender::new(
            "console".to_owned(),
            0,
            Filter::from_config(&Default::default(), &[]),
            false,
            TimeZone::default(),
        );
        appender.set_callback(Some(Arc::new(move |_: u32, _: u32, _: u8, _: &str| {
            called_clone.fetch_add(1, Ordering::SeqCst);
        })));
        appender.clear_callback();

        let record = RecordBuilder::new(Level::Info, 0, "hello").build(0, 1, None);
        appender.consume_record(&record, "default");

        assert_eq!(called.load(Ordering::SeqCst), 0);
    }
}
