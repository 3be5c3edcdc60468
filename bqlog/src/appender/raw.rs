//! The raw binary appender: writes each consumed record as `[u32
//! length][record bytes]`, the on-buffer record verbatim.

use rsa::RsaPublicKey;

use crate::{
    appender::{
        binary::{BinaryFile, FileFormat},
        file_base::Options,
        Filter,
    },
    record::Record,
    tz::TimeZone,
};

pub(crate) struct RawAppender {
    name: String,
    pub(super) filter: Filter,
    file: BinaryFile,
}

impl RawAppender {
    pub(crate) fn new(
        name: String,
        options: Options,
        public_key: Option<RsaPublicKey>,
        time_zone: TimeZone,
        categories: Vec<String>,
        filter: Filter,
        epoch_ms: i64,
    ) -> Self {
        let file = BinaryFile::new(options, FileFormat::Raw, public_key, time_zone, categories, epoch_ms);
        Self { name, filter, file }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn consume_record(&mut self, record: &Record<'_>) {
        let bytes = record.encode();
        let framed_len = 4 + bytes.len();

        let epoch_ms = record.epoch_ms as i64;
        self.file.prepare_segment(framed_len, epoch_ms);

        let mut framed = Vec::with_capacity(framed_len);
        framed.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        framed.extend_from_slice(&bytes);
        self.file.write_payload(framed);
    }

    pub(crate) fn flush_cache(&mut self) {
        self.file.flush_cache();
    }

    pub(crate) fn flush_to_disk(&mut self) {
        self.file.flush_to_disk();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::record::{Level, RecordBuilder};

    #[test]
    fn test_records_are_length_prefixed() {
        let dir = tempdir().unwrap();
        let options = Options {
            directory: dir.path().to_path_buf(),
            file_name: "app".to_owned(),
            extension: "lograw",
            max_file_size: 0,
            expire_time_ms: 0,
            capacity_limit: 0,
            enable_rolling_log_file: false,
            always_create_new_file: false,
            time_zone: TimeZone::default(),
            scratch_path: dir.path().join("scratch.mmap"),
        };
        let filter = Filter::from_config(&crate::config::AppenderConfig::default(), &[]);
        let mut appender = RawAppender::new(
            "raw".to_owned(),
            options,
            None,
            TimeZone::default(),
            vec!["default".to_owned()],
            filter,
            0,
        );

        let record = RecordBuilder::new(Level::Info, 0, "hello").build(0, 1, None);
        let expected = record.encode();
        appender.consume_record(&record);
        appender.flush_cache();
        appender.flush_to_disk();

        let bytes = std::fs::read(appender.file.path()).unwrap();
        let len = u32::from_le_bytes(bytes[bytes.len() - expected.len() - 4..bytes.len() - expected.len()].try_into().unwrap());
        assert_eq!(len as usize, expected.len());
        assert_eq!(&bytes[bytes.len() - expected.len()..], &expected[..]);
    }
}
