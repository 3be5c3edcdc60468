//! The text-file appender: a plain, human-readable `.log` file. Each
//! consumed record becomes one newline-terminated layout-engine line.

use crate::{
    appender::{
        file_base::{FileBase, Options, RecoveryHooks},
        Filter,
    },
    layout,
    record::Record,
    tz::TimeCache,
};

struct NoopRecoveryHooks;
impl RecoveryHooks for NoopRecoveryHooks {}

pub(crate) struct TextAppender {
    name: String,
    pub(super) filter: Filter,
    file: FileBase,
    time_cache: TimeCache,
}

impl TextAppender {
    pub(crate) fn new(name: String, options: Options, filter: Filter, epoch_ms: i64) -> Self {
        let time_cache = TimeCache::new(options.time_zone);
        let mut hooks = NoopRecoveryHooks;
        let file = FileBase::new(options, epoch_ms, &mut hooks);
        Self { name, filter, file, time_cache }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn consume_record(&mut self, record: &Record<'_>, category_name: &str) {
        let mut line = layout::render_line(record, category_name, &mut self.time_cache);
        line.push('\n');

        let epoch_ms = record.epoch_ms as i64;
        self.file.prepare_for_write(line.len(), epoch_ms);
        let _ = self.file.write(line.as_bytes());
    }

    pub(crate) fn flush_cache(&mut self) {
        let _ = self.file.flush_cache();
    }

    pub(crate) fn flush_to_disk(&mut self) {
        let _ = self.file.flush_to_disk();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::{
        record::{Argument, Level, RecordBuilder},
        tz::TimeZone,
    };

    fn options(dir: &std::path::Path) -> Options {
        Options {
            directory: dir.to_path_buf(),
            file_name: "app".to_owned(),
            extension: "log",
            max_file_size: 0,
            expire_time_ms: 0,
            capacity_limit: 0,
            enable_rolling_log_file: false,
            always_create_new_file: false,
            time_zone: TimeZone::parse("UTC").unwrap(),
            scratch_path: dir.join("scratch.mmap"),
        }
    }

    fn filter() -> Filter {
        Filter::from_config(&crate::config::AppenderConfig::default(), &[])
    }

    #[test]
    fn test_record_is_written_as_a_line() {
        let dir = tempdir().unwrap();
        let mut appender = TextAppender::new("text".to_owned(), options(dir.path()), filter(), 0);

        let record = RecordBuilder::new(Level::Info, 0, "hello {0}").arg(Argument::U32(1)).build(0, 1, None);
        appender.consume_record(&record, "default");
        appender.flush_cache();
        appender.flush_to_disk();

        let text = std::fs::read_to_string(appender.file.path()).unwrap();
        assert_eq!(text, "1970-01-01 00:00:00.000 UTC0\t[I]\t[default]\t[tid-1 ]\thello 1\n");
    }

    #[test]
    fn test_multiple_records_append() {
        let dir = tempdir().unwrap();
        let mut appender = TextAppender::new("text".to_owned(), options(dir.path()), filter(), 0);

        for i in 0..3 {
            let record = RecordBuilder::new(Level::Info, 0, "line").build(i, 1, None);
            appender.consume_record(&record, "default");
        }
        appender.flush_cache();

        let text = std::fs::read_to_string(appender.file.path()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
