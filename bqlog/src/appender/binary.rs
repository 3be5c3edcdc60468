//! The binary file envelope shared by the raw and compressed appenders:
//! `[file_header][segment][segment]…`, each segment optionally carrying a
//! fresh encryption envelope ahead of its XOR-keyed payload.

use rsa::RsaPublicKey;

use crate::{
    appender::file_base::{FileBase, Options, RecoveryHooks},
    crypto,
    tz::TimeZone,
};

/// Bumped whenever the on-disk layout changes incompatibly; the decoder
/// refuses files whose version does not match.
pub(crate) const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum FileFormat {
    Raw = 0,
    Compressed = 1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SegType {
    Normal = 0,
    RecoveryByAppender = 1,
    RecoveryByLogBuffer = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum EncType {
    Plaintext = 0,
    RsaAesXor = 1,
}

pub(crate) const PAYLOAD_METADATA_MAGIC: [u8; 3] = [0x02, 0x02, 0x07];
pub(crate) const TIME_ZONE_STR_LEN: usize = 32;
pub(crate) const SEGMENT_HEAD_LEN: usize = 11;
pub(crate) const FILE_HEADER_LEN: usize = 8;

/// Whether `path` already names a non-empty file on disk, i.e. this is a
/// rebuild onto an unchanged path rather than a genuinely fresh file.
fn has_existing_content(path: &std::path::Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

struct RecoveryFlag(bool);
impl RecoveryHooks for RecoveryFlag {
    fn on_recovery_begin(&mut self) {
        self.0 = true;
    }
}

/// Which segment type to open next. Consumed (reset to `Normal`) the first
/// time a segment is actually opened, so only the segment immediately
/// following a crash recovery is marked.
enum PendingSegType {
    Normal,
    RecoveredByAppender,
}

/// A binary (`.lograw`/`.logcompr`) file appender's shared envelope state:
/// file header, current segment, and (if configured) its encryption
/// envelope.
pub(crate) struct BinaryFile {
    file_base: FileBase,
    format: FileFormat,
    public_key: Option<RsaPublicKey>,
    time_zone: TimeZone,
    categories: Vec<String>,
    known_path: Option<std::path::PathBuf>,
    xor_blob: Option<Vec<u8>>,
    segment_payload_base: u64,
    pending_seg_type: PendingSegType,
}

impl BinaryFile {
    pub(crate) fn new(
        options: Options,
        format: FileFormat,
        public_key: Option<RsaPublicKey>,
        time_zone: TimeZone,
        categories: Vec<String>,
        epoch_ms: i64,
    ) -> Self {
        let mut recovery = RecoveryFlag(false);
        let file_base = FileBase::new(options, epoch_ms, &mut recovery);
        let pending_seg_type =
            if recovery.0 { PendingSegType::RecoveredByAppender } else { PendingSegType::Normal };

        // A brand new instance's `known_path` must track the resolved file
        // path, not construction identity: `reconfigure_appenders` rebuilds
        // this struct from scratch even when the underlying file hasn't
        // rotated, and seeding `known_path` with `None` in that case would
        // make `prepare_segment` mistake the unchanged path for a rotation
        // and write a second file header mid-file.
        let known_path =
            has_existing_content(file_base.path()).then(|| file_base.path().to_path_buf());

        Self {
            file_base,
            format,
            public_key,
            time_zone,
            categories,
            known_path,
            xor_blob: None,
            segment_payload_base: 0,
            pending_seg_type,
        }
    }

    pub(crate) fn path(&self) -> &std::path::Path {
        self.file_base.path()
    }

    pub(crate) fn flush_cache(&mut self) {
        let _ = self.file_base.flush_cache();
    }

    pub(crate) fn flush_to_disk(&mut self) {
        let _ = self.file_base.flush_to_disk();
    }

    /// Ensures a file header and an open segment exist before writing
    /// `payload_len` more plaintext bytes at `epoch_ms`, rotating/opening a
    /// new segment first if needed. Returns the XOR key to apply to the
    /// upcoming payload bytes, if encryption is configured.
    pub(crate) fn prepare_segment(&mut self, payload_len: usize, epoch_ms: i64) {
        self.file_base.prepare_for_write(payload_len, epoch_ms);

        let rotated = self.known_path.as_deref() != Some(self.file_base.path());
        if rotated {
            self.known_path = Some(self.file_base.path().to_path_buf());
            self.write_file_header();
            self.open_segment();
        }
    }

    /// XORs `payload` in place against the current segment's key, keyed by
    /// its absolute file offset, and writes it.
    pub(crate) fn write_payload(&mut self, mut payload: Vec<u8>) {
        if let Some(blob) = &self.xor_blob {
            let file_offset = self.file_base.size() as usize;
            let relative = file_offset - self.segment_payload_base as usize;
            crypto::xor_stream(&mut payload, relative, blob);
        }
        let _ = self.file_base.write(&payload);
    }

    fn write_file_header(&mut self) {
        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        header.push(self.format as u8);
        header.extend_from_slice(&[0u8; 3]);
        let _ = self.file_base.write(&header);
    }

    fn open_segment(&mut self) {
        let seg_type = match self.pending_seg_type {
            PendingSegType::Normal => SegType::Normal,
            PendingSegType::RecoveredByAppender => SegType::RecoveryByAppender,
        };
        self.pending_seg_type = PendingSegType::Normal;

        let enc_type =
            if self.public_key.is_some() { EncType::RsaAesXor } else { EncType::Plaintext };
        let has_key = matches!(enc_type, EncType::RsaAesXor);

        let mut head = Vec::with_capacity(11);
        head.extend_from_slice(&0u64.to_le_bytes()); // next_seg_pos, unused (single-segment files)
        head.push(seg_type as u8);
        head.push(enc_type as u8);
        head.push(has_key as u8);
        let _ = self.file_base.write(&head);

        self.xor_blob = None;
        if has_key {
            if let Some(public_key) = &self.public_key {
                if let Ok(envelope) = crypto::seal(public_key) {
                    let _ = self.file_base.write(&envelope.header);
                    self.xor_blob = Some(envelope.xor_blob);
                }
            }
        }

        let current = self.file_base.size();
        let aligned = current.div_ceil(32) * 32;
        if aligned > current {
            let _ = self.file_base.write(&vec![0u8; (aligned - current) as usize]);
        }
        self.segment_payload_base = self.file_base.size();

        self.write_payload_metadata();
    }

    fn write_payload_metadata(&mut self) {
        let mut meta = Vec::new();
        meta.extend_from_slice(&PAYLOAD_METADATA_MAGIC);

        let use_local_time = self.time_zone.fixed_offset_ms().is_none();
        meta.push(use_local_time as u8);

        let offset_ms = self.time_zone.fixed_offset_ms().unwrap_or(0);
        let offset_minutes_total = offset_ms / 60_000;
        meta.push((offset_minutes_total / 60) as i8 as u8);
        meta.push((offset_minutes_total % 60) as i8 as u8);
        meta.extend_from_slice(&offset_ms.to_le_bytes());

        let mut zone_str = [0u8; TIME_ZONE_STR_LEN];
        let zone_label = b"local";
        let len = zone_label.len().min(TIME_ZONE_STR_LEN);
        zone_str[..len].copy_from_slice(&zone_label[..len]);
        meta.extend_from_slice(&zone_str);

        meta.extend_from_slice(&(self.categories.len() as u32).to_le_bytes());
        for category in &self.categories {
            let bytes = category.as_bytes();
            meta.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            meta.extend_from_slice(bytes);
        }

        self.write_payload(meta);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::appender::file_base::Options;

    fn options(dir: &std::path::Path) -> Options {
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
    fn test_file_header_and_segment_written_once() {
        let dir = tempdir().unwrap();
        let mut file = BinaryFile::new(
            options(dir.path()),
            FileFormat::Raw,
            None,
            TimeZone::default(),
            vec!["default".to_owned()],
            0,
        );
        file.prepare_segment(4, 0);
        file.write_payload(b"abcd".to_vec());
        file.flush_cache();
        file.flush_to_disk();

        let bytes = std::fs::read(file.path()).unwrap();
        assert_eq!(&bytes[0..4], &FORMAT_VERSION.to_le_bytes());
        assert_eq!(bytes[4], FileFormat::Raw as u8);
    }

    #[test]
    fn test_rebuild_onto_same_path_does_not_duplicate_header() {
        let dir = tempdir().unwrap();

        let path = {
            let mut file = BinaryFile::new(
                options(dir.path()),
                FileFormat::Raw,
                None,
                TimeZone::default(),
                vec!["default".to_owned()],
                0,
            );
            file.prepare_segment(4, 0);
            file.write_payload(b"abcd".to_vec());
            // Dropped without flushing: the header, segment and metadata
            // live only in the cache and its mmap scratch mirror, same as
            // what `reconfigure_appenders` leaves behind before rebuilding
            // a fresh appender onto the same file.
            file.path().to_path_buf()
        };

        // Rebuilding recovers those unflushed bytes from the scratch mirror
        // onto the same path.
        let mut rebuilt = BinaryFile::new(
            options(dir.path()),
            FileFormat::Raw,
            None,
            TimeZone::default(),
            vec!["default".to_owned()],
            0,
        );
        assert_eq!(rebuilt.path(), path);

        rebuilt.prepare_segment(4, 0);
        rebuilt.write_payload(b"efgh".to_vec());
        rebuilt.flush_cache();
        rebuilt.flush_to_disk();

        let bytes = std::fs::read(&path).unwrap();
        let magic_occurrences =
            bytes.windows(PAYLOAD_METADATA_MAGIC.len()).filter(|w| *w == PAYLOAD_METADATA_MAGIC).count();
        assert_eq!(magic_occurrences, 1, "rebuilding onto the same file must not open a second segment");
        assert_eq!(&bytes[0..4], &FORMAT_VERSION.to_le_bytes());
    }
}
