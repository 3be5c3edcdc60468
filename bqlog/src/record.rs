//! The binary log record layout produced by a producer thread and consumed
//! by the worker: `[head: 24 bytes][format-bytes][args][ext-info]`, every
//! section aligned to 4 bytes.

use std::mem;

use bqlog_derive::{Builder, Decode as DeriveDecode, Encode as DeriveEncode};
use thiserror::Error;

use crate::codec::{Decode, DecodingError, Encode, EncodingError, Sink, Source};

/// Logging levels, ordered from least to most severe.
#[repr(u8)]
#[non_exhaustive]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Verbose = 0,
    Debug = 1,
    Info = 2,
    Warning = 3,
    Error = 4,
    Fatal = 5,
}

impl Level {
    #[inline]
    pub(crate) fn primitive(&self) -> u8 {
        *self as u8
    }

    pub(crate) fn from_primitive(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Verbose),
            1 => Some(Self::Debug),
            2 => Some(Self::Info),
            3 => Some(Self::Warning),
            4 => Some(Self::Error),
            5 => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// Whether a format string is stored as UTF-8 or UTF-16 code units.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum FormatEncoding {
    Utf8 = 0,
    Utf16 = 1,
}

/// The fixed 24-byte head of a log record.
///
/// Field layout (little-endian, all offsets 4-byte aligned):
/// `epoch_ms: u64, level: u8, format_encoding: u8, _pad: u16, category: u32,
/// format_data_len: u32, args_offset: u32, ext_info_offset: u32`.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct Head {
    pub(crate) epoch_ms: u64,
    pub(crate) level: u8,
    pub(crate) format_encoding: u8,
    _pad: u16,
    pub(crate) category: u32,
    pub(crate) format_data_len: u32,
    pub(crate) args_offset: u32,
    pub(crate) ext_info_offset: u32,
}

impl Head {
    pub(crate) const LEN: usize = mem::size_of::<Self>();

    fn to_bytes(self) -> [u8; Self::LEN] {
        // SAFETY: `Head` is `repr(C)`, has no padding bytes left uninitialized
        // (the `_pad` field is always zeroed), and `Self::LEN` matches its size.
        unsafe { mem::transmute(self) }
    }

    fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        // SAFETY: inverse of `to_bytes`; any bit pattern is a valid `Head`.
        unsafe { mem::transmute(bytes) }
    }
}

/// One positional argument carried by a log record.
#[derive(Clone, Debug, PartialEq)]
pub enum Argument<'a> {
    Null,
    Pointer(u64),
    Bool(bool),
    Char(char),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Str(&'a str),
}

/// 1-byte tags identifying each [`Argument`] variant on the wire.
mod tag {
    pub(crate) const NULL: u8 = 0;
    pub(crate) const POINTER: u8 = 1;
    pub(crate) const BOOL: u8 = 2;
    pub(crate) const CHAR: u8 = 3;
    pub(crate) const I8: u8 = 4;
    pub(crate) const I16: u8 = 5;
    pub(crate) const I32: u8 = 6;
    pub(crate) const I64: u8 = 7;
    pub(crate) const U8: u8 = 8;
    pub(crate) const U16: u8 = 9;
    pub(crate) const U32: u8 = 10;
    pub(crate) const U64: u8 = 11;
    pub(crate) const F32: u8 = 12;
    pub(crate) const F64: u8 = 13;
    pub(crate) const STR: u8 = 14;
}

impl<'a> Argument<'a> {
    fn write_tagged(&self, out: &mut Vec<u8>) {
        match *self {
            Self::Null => out.push(tag::NULL),
            Self::Pointer(v) => {
                out.push(tag::POINTER);
                pad_to(out, 8);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::Bool(v) => {
                out.push(tag::BOOL);
                out.push(v as u8);
            }
            Self::Char(v) => {
                out.push(tag::CHAR);
                pad_to(out, 4);
                out.extend_from_slice(&(v as u32).to_le_bytes());
            }
            Self::I8(v) => {
                out.push(tag::I8);
                out.push(v as u8);
            }
            Self::I16(v) => {
                out.push(tag::I16);
                pad_to(out, 2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::I32(v) => {
                out.push(tag::I32);
                pad_to(out, 4);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::I64(v) => {
                out.push(tag::I64);
                pad_to(out, 8);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::U8(v) => {
                out.push(tag::U8);
                out.push(v);
            }
            Self::U16(v) => {
                out.push(tag::U16);
                pad_to(out, 2);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::U32(v) => {
                out.push(tag::U32);
                pad_to(out, 4);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::U64(v) => {
                out.push(tag::U64);
                pad_to(out, 8);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::F32(v) => {
                out.push(tag::F32);
                pad_to(out, 4);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::F64(v) => {
                out.push(tag::F64);
                pad_to(out, 8);
                out.extend_from_slice(&v.to_le_bytes());
            }
            Self::Str(s) => {
                out.push(tag::STR);
                pad_to(out, 4);
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
        pad_align(out, 4);
    }

    fn read_tagged(bytes: &'a [u8], pos: &mut usize) -> Result<Self, DecodingError> {
        let tag = *bytes.get(*pos).ok_or(DecodingError::UnexpectedEnd { extra_len: 1 })?;
        *pos += 1;

        macro_rules! read_int {
            ($align:expr, $ty:ty, $n:expr) => {{
                align_pos(pos, $align);
                let raw: [u8; $n] = bytes
                    .get(*pos..*pos + $n)
                    .ok_or(DecodingError::UnexpectedEnd { extra_len: $n })?
                    .try_into()
                    .unwrap();
                *pos += $n;
                <$ty>::from_le_bytes(raw)
            }};
        }

        let arg = match tag {
            tag::NULL => Self::Null,
            tag::POINTER => Self::Pointer(read_int!(8, u64, 8)),
            tag::BOOL => {
                let v = *bytes.get(*pos).ok_or(DecodingError::UnexpectedEnd { extra_len: 1 })?;
                *pos += 1;
                Self::Bool(v != 0)
            }
            tag::CHAR => {
                let raw = read_int!(4, u32, 4);
                Self::Char(char::from_u32(raw).unwrap_or('\u{FFFD}'))
            }
            tag::I8 => {
                let v = *bytes.get(*pos).ok_or(DecodingError::UnexpectedEnd { extra_len: 1 })?
                    as i8;
                *pos += 1;
                Self::I8(v)
            }
            tag::I16 => Self::I16(read_int!(2, i16, 2)),
            tag::I32 => Self::I32(read_int!(4, i32, 4)),
            tag::I64 => Self::I64(read_int!(8, i64, 8)),
            tag::U8 => {
                let v = *bytes.get(*pos).ok_or(DecodingError::UnexpectedEnd { extra_len: 1 })?;
                *pos += 1;
                Self::U8(v)
            }
            tag::U16 => Self::U16(read_int!(2, u16, 2)),
            tag::U32 => Self::U32(read_int!(4, u32, 4)),
            tag::U64 => Self::U64(read_int!(8, u64, 8)),
            tag::F32 => Self::F32(f32::from_bits(read_int!(4, u32, 4))),
            tag::F64 => Self::F64(f64::from_bits(read_int!(8, u64, 8))),
            tag::STR => {
                let len = read_int!(4, u32, 4) as usize;
                let bytes = bytes
                    .get(*pos..*pos + len)
                    .ok_or(DecodingError::UnexpectedEnd { extra_len: len })?;
                *pos += len;
                Self::Str(std::str::from_utf8(bytes)?)
            }
            _ => {
                return Err(DecodingError::UnexpectedVariant {
                    type_name: "Argument",
                    found_byte: tag,
                })
            }
        };
        align_pos(pos, 4);
        Ok(arg)
    }
}

fn pad_to(out: &mut Vec<u8>, align: usize) {
    pad_align(out, align);
}

fn pad_align(out: &mut Vec<u8>, align: usize) {
    let rem = out.len() % align;
    if rem != 0 {
        out.resize(out.len() + (align - rem), 0);
    }
}

fn align_pos(pos: &mut usize, align: usize) {
    let rem = *pos % align;
    if rem != 0 {
        *pos += align - rem;
    }
}

/// Per-producer-thread information appended after the argument list.
#[derive(DeriveEncode, DeriveDecode, Builder, Default, Clone, PartialEq, Eq, Debug)]
pub(crate) struct ExtInfo<'a> {
    pub(crate) thread_id: u64,
    pub(crate) thread_name: Option<&'a str>,
}

/// A fully-built, not-yet-serialized log record.
#[derive(Clone, Debug)]
pub struct Record<'a> {
    pub(crate) epoch_ms: u64,
    pub(crate) level: Level,
    pub(crate) category: u32,
    pub(crate) format: &'a str,
    pub(crate) args: Vec<Argument<'a>>,
    pub(crate) thread_id: u64,
    pub(crate) thread_name: Option<&'a str>,
}

/// Errors that can occur while decoding a serialized record.
#[derive(Error, Clone, Debug)]
pub enum Error {
    #[error(transparent)]
    Decoding(#[from] DecodingError),
    #[error("unrecognized log level byte {0}")]
    Level(u8),
    #[error("unrecognized format encoding byte {0}")]
    FormatEncoding(u8),
}

impl<'a> Record<'a> {
    /// Serializes this record to its `[head][format][args][ext-info]` wire
    /// form.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut format_section = Vec::new();
        format_section.extend_from_slice(self.format.as_bytes());
        pad_align(&mut format_section, 4);

        let mut args_section = Vec::new();
        for arg in &self.args {
            arg.write_tagged(&mut args_section);
        }

        let mut ext_section = Vec::new();
        self.ext_info().encode(&mut ext_section).unwrap_or(());

        let head = Head {
            epoch_ms: self.epoch_ms,
            level: self.level.primitive(),
            format_encoding: FormatEncoding::Utf8 as u8,
            _pad: 0,
            category: self.category,
            format_data_len: self.format.len() as u32,
            args_offset: (Head::LEN + format_section.len()) as u32,
            ext_info_offset: (Head::LEN + format_section.len() + args_section.len()) as u32,
        };

        let mut out = Vec::with_capacity(
            Head::LEN + format_section.len() + args_section.len() + ext_section.len(),
        );
        out.extend_from_slice(&head.to_bytes());
        out.extend_from_slice(&format_section);
        out.extend_from_slice(&args_section);
        out.extend_from_slice(&ext_section);
        out
    }

    fn ext_info(&self) -> ExtInfo<'a> {
        ExtInfo { thread_id: self.thread_id, thread_name: self.thread_name }
    }

    /// Parses a record previously produced by [`Record::encode`].
    pub(crate) fn decode(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < Head::LEN {
            return Err(DecodingError::UnexpectedEnd { extra_len: Head::LEN - bytes.len() }.into());
        }
        let head_bytes: [u8; Head::LEN] = bytes[..Head::LEN].try_into().unwrap();
        let head = Head::from_bytes(head_bytes);

        let level = Level::from_primitive(head.level).ok_or(Error::Level(head.level))?;
        if head.format_encoding != FormatEncoding::Utf8 as u8 {
            return Err(Error::FormatEncoding(head.format_encoding));
        }

        let format_start = Head::LEN;
        let format_end = format_start + head.format_data_len as usize;
        let format = std::str::from_utf8(
            bytes.get(format_start..format_end).ok_or(DecodingError::UnexpectedEnd {
                extra_len: format_end.saturating_sub(bytes.len()),
            })?,
        )?;

        let args_start = head.args_offset as usize;
        let args_end = head.ext_info_offset as usize;
        let mut args = Vec::new();
        let mut pos = args_start;
        while pos < args_end {
            args.push(Argument::read_tagged(bytes, &mut pos)?);
        }

        let ext_bytes = bytes.get(args_end..).ok_or(DecodingError::UnexpectedEnd {
            extra_len: args_end.saturating_sub(bytes.len()),
        })?;
        let mut source = ext_bytes;
        let ext = ExtInfo::decode(&mut source)?;

        Ok(Self {
            epoch_ms: head.epoch_ms,
            level,
            category: head.category,
            format,
            args,
            thread_id: ext.thread_id,
            thread_name: ext.thread_name,
        })
    }
}

/// A fixed-capacity builder used by producer threads: fills in the epoch,
/// level, category and thread info, then takes ownership of the format
/// string and arguments supplied by the caller.
pub struct RecordBuilder<'a> {
    level: Level,
    category: u32,
    format: &'a str,
    args: Vec<Argument<'a>>,
}

impl<'a> RecordBuilder<'a> {
    #[inline]
    pub fn new(level: Level, category: u32, format: &'a str) -> Self {
        Self { level, category, format, args: Vec::new() }
    }

    #[inline]
    pub fn arg(mut self, arg: Argument<'a>) -> Self {
        self.args.push(arg);
        self
    }

    #[inline]
    pub fn args(mut self, args: impl IntoIterator<Item = Argument<'a>>) -> Self {
        self.args.extend(args);
        self
    }

    /// Finalizes the record, stamping the current thread's id, name and the
    /// current epoch time in milliseconds.
    pub fn build(self, epoch_ms: u64, thread_id: u64, thread_name: Option<&'a str>) -> Record<'a> {
        Record {
            epoch_ms,
            level: self.level,
            category: self.category,
            format: self.format,
            args: self.args,
            thread_id,
            thread_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let record = RecordBuilder::new(Level::Info, 3, "hello {0}, age {1}")
            .arg(Argument::Str("world"))
            .arg(Argument::U32(7))
            .build(1_700_000_000_000, 42, Some("main"));

        let bytes = record.encode();
        let decoded = Record::decode(&bytes).unwrap();

        assert_eq!(decoded.epoch_ms, 1_700_000_000_000);
        assert_eq!(decoded.level, Level::Info);
        assert_eq!(decoded.category, 3);
        assert_eq!(decoded.format, "hello {0}, age {1}");
        assert_eq!(decoded.args, vec![Argument::Str("world"), Argument::U32(7)]);
        assert_eq!(decoded.thread_id, 42);
        assert_eq!(decoded.thread_name, Some("main"));
    }

    #[test]
    fn test_no_args_no_thread_name() {
        let record =
            RecordBuilder::new(Level::Error, 0, "boom").build(0, 1, None);
        let bytes = record.encode();
        let decoded = Record::decode(&bytes).unwrap();
        assert!(decoded.args.is_empty());
        assert_eq!(decoded.thread_name, None);
    }

    #[test]
    fn test_level_roundtrip() {
        for level in
            [Level::Verbose, Level::Debug, Level::Info, Level::Warning, Level::Error, Level::Fatal]
        {
            assert_eq!(Level::from_primitive(level.primitive()), Some(level));
        }
        assert_eq!(Level::from_primitive(200), None);
    }
}
