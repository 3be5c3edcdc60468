//! The compressed binary appender: deduplicates format templates and
//! thread info within a file, referencing them by index from each log
//! entry instead of repeating them.

use std::collections::HashMap;

use rsa::RsaPublicKey;

use crate::{
    appender::{
        binary::{BinaryFile, FileFormat},
        file_base::Options,
        Filter,
    },
    record::{Argument, Level, Record},
    tz::TimeZone,
    vlq,
};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The format-template hash: FNV-1a-64 over the UTF-8 template bytes,
/// folded with level and category so two categories never collide on the
/// same template index.
fn template_hash(level: Level, category: u32, format: &str) -> u64 {
    let mut hash = fnv1a64(format.as_bytes());
    hash ^= level.primitive() as u64;
    hash = hash.wrapping_mul(FNV_PRIME);
    hash ^= category as u64;
    hash.wrapping_mul(FNV_PRIME)
}

/// Argument type tags as written in the compressed format. Distinct from
/// (and simpler than) the on-buffer tags in `record::tag`, since payloads
/// here are VLQ/zigzag-encoded rather than natural-alignment padded.
mod arg_tag {
    pub(crate) const NULL: u8 = 0;
    pub(crate) const POINTER: u8 = 1;
    pub(crate) const BOOL: u8 = 2;
    pub(crate) const CHAR: u8 = 3;
    pub(crate) const SIGNED: u8 = 4;
    pub(crate) const UNSIGNED: u8 = 5;
    pub(crate) const F32: u8 = 6;
    pub(crate) const F64: u8 = 7;
    pub(crate) const STR: u8 = 8;
}

fn write_arg(arg: &Argument<'_>, out: &mut Vec<u8>) {
    match arg {
        Argument::Null => out.push(arg_tag::NULL),
        Argument::Pointer(v) => {
            out.push(arg_tag::POINTER);
            vlq::encode(*v, out);
        }
        Argument::Bool(b) => {
            out.push(arg_tag::BOOL);
            out.push(*b as u8);
        }
        Argument::Char(c) => {
            out.push(arg_tag::CHAR);
            vlq::encode(*c as u64, out);
        }
        Argument::I8(v) => write_signed(*v as i64, out),
        Argument::I16(v) => write_signed(*v as i64, out),
        Argument::I32(v) => write_signed(*v as i64, out),
        Argument::I64(v) => write_signed(*v, out),
        Argument::U8(v) => write_unsigned(*v as u64, out),
        Argument::U16(v) => write_unsigned(*v as u64, out),
        Argument::U32(v) => write_unsigned(*v as u64, out),
        Argument::U64(v) => write_unsigned(*v, out),
        Argument::F32(v) => {
            out.push(arg_tag::F32);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Argument::F64(v) => {
            out.push(arg_tag::F64);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Argument::Str(s) => {
            out.push(arg_tag::STR);
            vlq::encode(s.len() as u64, out);
            out.extend_from_slice(s.as_bytes());
        }
    }
}

fn write_signed(value: i64, out: &mut Vec<u8>) {
    out.push(arg_tag::SIGNED);
    vlq::encode(vlq::zigzag_encode(value), out);
}

fn write_unsigned(value: u64, out: &mut Vec<u8>) {
    out.push(arg_tag::UNSIGNED);
    vlq::encode(value, out);
}

pub(crate) struct CompressedAppender {
    name: String,
    pub(super) filter: Filter,
    file: BinaryFile,
    templates: HashMap<(u8, u32, u64), u32>,
    next_template_idx: u32,
    threads: HashMap<u64, u32>,
    next_thread_idx: u32,
    last_epoch_ms: u64,
}

impl CompressedAppender {
    pub(crate) fn new(
        name: String,
        options: Options,
        public_key: Option<RsaPublicKey>,
        time_zone: TimeZone,
        categories: Vec<String>,
        filter: Filter,
        epoch_ms: i64,
    ) -> Self {
        let file =
            BinaryFile::new(options, FileFormat::Compressed, public_key, time_zone, categories, epoch_ms);
        Self {
            name,
            filter,
            file,
            templates: HashMap::new(),
            next_template_idx: 0,
            threads: HashMap::new(),
            next_thread_idx: 0,
            last_epoch_ms: 0,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn consume_record(&mut self, record: &Record<'_>) {
        let epoch_ms = record.epoch_ms as i64;

        let template_idx = self.template_index(record, epoch_ms);
        let thread_idx = self.thread_index(record, epoch_ms);

        let offset = record.epoch_ms as i64 - self.last_epoch_ms as i64;
        self.last_epoch_ms = record.epoch_ms;

        let mut body = Vec::new();
        vlq::encode(vlq::zigzag_encode(offset), &mut body);
        vlq::encode(template_idx as u64, &mut body);
        vlq::encode(thread_idx as u64, &mut body);
        vlq::encode(record.args.len() as u64, &mut body);
        for arg in &record.args {
            write_arg(arg, &mut body);
        }

        self.write_record(true, epoch_ms, body);
    }

    fn template_index(&mut self, record: &Record<'_>, epoch_ms: i64) -> u32 {
        let key =
            (record.level.primitive(), record.category, template_hash(record.level, record.category, record.format));

        if let Some(idx) = self.templates.get(&key) {
            return *idx;
        }

        let idx = self.next_template_idx;
        self.next_template_idx += 1;
        self.templates.insert(key, idx);

        let mut body = Vec::new();
        body.push(0); // sub-type: format
        body.push(record.level.primitive());
        vlq::encode(record.category as u64, &mut body);
        body.extend_from_slice(record.format.as_bytes());
        self.write_record(false, epoch_ms, body);

        idx
    }

    fn thread_index(&mut self, record: &Record<'_>, epoch_ms: i64) -> u32 {
        if let Some(idx) = self.threads.get(&record.thread_id) {
            return *idx;
        }

        let idx = self.next_thread_idx;
        self.next_thread_idx += 1;
        self.threads.insert(record.thread_id, idx);

        let mut body = Vec::new();
        body.push(1); // sub-type: thread-info
        vlq::encode(idx as u64, &mut body);
        vlq::encode(record.thread_id, &mut body);
        if let Some(name) = record.thread_name {
            body.extend_from_slice(name.as_bytes());
        }
        self.write_record(false, epoch_ms, body);

        idx
    }

    fn write_record(&mut self, is_log_entry: bool, epoch_ms: i64, body: Vec<u8>) {
        let mut len_buf = Vec::new();
        vlq::encode(body.len() as u64, &mut len_buf);

        let mut framed = Vec::with_capacity(1 + len_buf.len() + body.len());
        framed.push(if is_log_entry { 0x80 } else { 0x00 });
        framed.extend_from_slice(&len_buf);
        framed.extend_from_slice(&body);

        self.file.prepare_segment(framed.len(), epoch_ms);
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
    use crate::record::RecordBuilder;

    fn options(dir: &std::path::Path) -> Options {
        Options {
            directory: dir.to_path_buf(),
            file_name: "app".to_owned(),
            extension: "logcompr",
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
    fn test_repeated_format_reuses_template_index() {
        let dir = tempdir().unwrap();
        let filter = Filter::from_config(&crate::config::AppenderConfig::default(), &[]);
        let mut appender = CompressedAppender::new(
            "c".to_owned(),
            options(dir.path()),
            None,
            TimeZone::default(),
            vec!["default".to_owned()],
            filter,
            0,
        );

        let first = RecordBuilder::new(Level::Info, 0, "hello {0}")
            .arg(Argument::U32(1))
            .build(1000, 7, Some("main"));
        let second = RecordBuilder::new(Level::Info, 0, "hello {0}")
            .arg(Argument::U32(2))
            .build(1500, 7, Some("main"));

        appender.consume_record(&first);
        assert_eq!(appender.templates.len(), 1);
        assert_eq!(appender.threads.len(), 1);

        appender.consume_record(&second);
        // No new template or thread-info record should have been emitted.
        assert_eq!(appender.templates.len(), 1);
        assert_eq!(appender.threads.len(), 1);

        appender.flush_cache();
        appender.flush_to_disk();
    }

    #[test]
    fn test_hash_distinguishes_category_and_level() {
        let h1 = template_hash(Level::Info, 0, "x");
        let h2 = template_hash(Level::Warning, 0, "x");
        let h3 = template_hash(Level::Info, 1, "x");
        assert_ne!(h1, h2);
        assert_ne!(h1, h3);
    }
}
