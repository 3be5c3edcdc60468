//! Decodes `.lograw`/`.logcompr` binary log files back into readable text,
//! walking the file-header/segment/payload envelope the binary appenders
//! write and running each reconstructed record through the layout engine.

use std::{collections::HashMap, fs, io, path::Path};

use rsa::RsaPrivateKey;
use thiserror::Error;

use crate::{
    appender::binary::{
        EncType, FileFormat, SegType, FILE_HEADER_LEN, FORMAT_VERSION, PAYLOAD_METADATA_MAGIC,
        SEGMENT_HEAD_LEN, TIME_ZONE_STR_LEN,
    },
    crypto,
    layout,
    record::{Argument, Level, Record, RecordBuilder},
    tz::{TimeCache, TimeZone},
    vlq,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("the log file is too short to contain a valid header")]
    Truncated,
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),
    #[error("unrecognized file format tag {0}")]
    UnknownFormat(u8),
    #[error("payload metadata magic mismatch")]
    BadMagic,
    #[error("encryption error: {0}")]
    Crypto(#[from] crypto::Error),
    #[error("a private key is required to decrypt this file")]
    MissingPrivateKey,
    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

struct PayloadMetadata {
    categories: Vec<String>,
    time_zone: TimeZone,
}

/// Decodes an entire binary log file to a vector of rendered text lines,
/// bracketing segments recovered after a crash with recovery markers.
pub fn decode_file(path: impl AsRef<Path>, private_key: Option<&RsaPrivateKey>) -> Result<Vec<String>, Error> {
    let mut lines = Vec::new();
    decode_file_with(path, private_key, |line| {
        lines.push(line.to_owned());
        Ok(())
    })?;
    Ok(lines)
}

/// Streams decoded lines to `callback` instead of collecting them, for
/// large files the caller would rather not hold in memory at once.
pub fn decode_file_with(
    path: impl AsRef<Path>,
    private_key: Option<&RsaPrivateKey>,
    mut callback: impl FnMut(&str) -> io::Result<()>,
) -> Result<(), Error> {
    let bytes = fs::read(path)?;
    if bytes.len() < FILE_HEADER_LEN {
        return Err(Error::Truncated);
    }

    let version = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    if version != FORMAT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }
    let format = match bytes[4] {
        v if v == FileFormat::Raw as u8 => FileFormat::Raw,
        v if v == FileFormat::Compressed as u8 => FileFormat::Compressed,
        other => return Err(Error::UnknownFormat(other)),
    };

    let mut pos = FILE_HEADER_LEN;
    let mut in_recovery = false;

    while pos + SEGMENT_HEAD_LEN <= bytes.len() {
        let seg_type = match bytes[pos + 8] {
            v if v == SegType::Normal as u8 => SegType::Normal,
            v if v == SegType::RecoveryByAppender as u8 => SegType::RecoveryByAppender,
            v if v == SegType::RecoveryByLogBuffer as u8 => SegType::RecoveryByLogBuffer,
            _ => SegType::Normal,
        };
        let enc_type =
            if bytes[pos + 9] == EncType::RsaAesXor as u8 { EncType::RsaAesXor } else { EncType::Plaintext };
        let has_key = bytes[pos + 10] != 0;
        pos += SEGMENT_HEAD_LEN;

        let is_recovery = !matches!(seg_type, SegType::Normal);
        if is_recovery && !in_recovery {
            callback("--- recovery begin ---")?;
            in_recovery = true;
        } else if !is_recovery && in_recovery {
            callback("--- recovery end ---")?;
            in_recovery = false;
        }

        let xor_blob = if has_key {
            if !matches!(enc_type, EncType::RsaAesXor) {
                None
            } else {
                let key = private_key.ok_or(Error::MissingPrivateKey)?;
                let envelope_len = crypto::RSA_CIPHERTEXT_LEN + crypto::IV_LEN + crypto::XOR_BLOB_LEN;
                let envelope = bytes.get(pos..pos + envelope_len).ok_or(Error::Truncated)?;
                pos += envelope_len;
                Some(crypto::unseal(key, envelope)?)
            }
        } else {
            None
        };

        let payload_start = pos.div_ceil(32) * 32;
        pos = payload_start;

        let (metadata, metadata_len) = read_payload_metadata(&bytes[pos..], xor_blob.as_deref(), pos)?;
        pos += metadata_len;
        let mut time_cache = TimeCache::new(metadata.time_zone);

        match format {
            FileFormat::Raw => {
                pos = decode_raw_records(
                    &bytes,
                    pos,
                    payload_start,
                    xor_blob.as_deref(),
                    &metadata,
                    &mut time_cache,
                    &mut callback,
                )?
            }
            FileFormat::Compressed => {
                pos = decode_compressed_records(
                    &bytes,
                    pos,
                    payload_start,
                    xor_blob.as_deref(),
                    &metadata,
                    &mut time_cache,
                    &mut callback,
                )?
            }
        }
    }

    if in_recovery {
        callback("--- recovery end ---")?;
    }

    Ok(())
}

fn decrypt_copy(bytes: &[u8], xor_blob: Option<&[u8]>, segment_base: usize, at: usize) -> Vec<u8> {
    let mut copy = bytes.to_vec();
    if let Some(blob) = xor_blob {
        crypto::xor_stream(&mut copy, at - segment_base, blob);
    }
    copy
}

fn read_payload_metadata(
    bytes: &[u8],
    xor_blob: Option<&[u8]>,
    absolute_pos: usize,
) -> Result<(PayloadMetadata, usize), Error> {
    let fixed_len = 3 + 1 + 1 + 1 + 8 + TIME_ZONE_STR_LEN + 4;
    if bytes.len() < fixed_len {
        return Err(Error::Truncated);
    }
    let fixed = decrypt_copy(&bytes[..fixed_len], xor_blob, absolute_pos, absolute_pos);

    if fixed[..3] != PAYLOAD_METADATA_MAGIC {
        return Err(Error::BadMagic);
    }

    let use_local_time = fixed[3] != 0;
    let offset_ms = i64::from_le_bytes(fixed[6..14].try_into().unwrap());
    let time_zone = if use_local_time {
        TimeZone::LOCAL
    } else {
        TimeZone::from_offset_minutes(Some((offset_ms / 60_000) as i32))
    };

    let category_count = u32::from_le_bytes(fixed[fixed_len - 4..fixed_len].try_into().unwrap()) as usize;

    let mut pos = fixed_len;
    let mut categories = Vec::with_capacity(category_count);
    for _ in 0..category_count {
        let len_bytes = decrypt_copy(
            bytes.get(pos..pos + 4).ok_or(Error::Truncated)?,
            xor_blob,
            absolute_pos,
            absolute_pos + pos,
        );
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        pos += 4;
        let name_bytes =
            decrypt_copy(bytes.get(pos..pos + len).ok_or(Error::Truncated)?, xor_blob, absolute_pos, absolute_pos + pos);
        let name = String::from_utf8(name_bytes).map_err(|e| Error::MalformedRecord(e.to_string()))?;
        pos += len;
        categories.push(name);
    }

    Ok((PayloadMetadata { categories, time_zone }, pos))
}

fn decode_raw_records(
    bytes: &[u8],
    mut pos: usize,
    segment_base: usize,
    xor_blob: Option<&[u8]>,
    metadata: &PayloadMetadata,
    time_cache: &mut TimeCache,
    callback: &mut impl FnMut(&str) -> io::Result<()>,
) -> Result<usize, Error> {
    while pos + 4 <= bytes.len() {
        let len_bytes = decrypt_copy(&bytes[pos..pos + 4], xor_blob, segment_base, pos);
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap()) as usize;
        pos += 4;
        if pos + len > bytes.len() {
            break;
        }
        let record_bytes = decrypt_copy(&bytes[pos..pos + len], xor_blob, segment_base, pos);
        pos += len;

        let record = Record::decode(&record_bytes).map_err(|e| Error::MalformedRecord(e.to_string()))?;
        let category_name = metadata
            .categories
            .get(record.category as usize)
            .map(String::as_str)
            .unwrap_or("?");
        callback(&layout::render_line(&record, category_name, time_cache))?;
    }
    Ok(pos)
}

struct FormatTemplate {
    level: Level,
    category: u32,
    format: String,
}

fn decode_compressed_records(
    bytes: &[u8],
    mut pos: usize,
    segment_base: usize,
    xor_blob: Option<&[u8]>,
    metadata: &PayloadMetadata,
    time_cache: &mut TimeCache,
    callback: &mut impl FnMut(&str) -> io::Result<()>,
) -> Result<usize, Error> {
    let mut templates: HashMap<u32, FormatTemplate> = HashMap::new();
    let mut next_template_idx = 0u32;
    let mut threads: HashMap<u32, (u64, String)> = HashMap::new();
    let mut next_thread_idx = 0u32;
    let mut last_epoch_ms: i64 = 0;

    while pos < bytes.len() {
        let tag = decrypt_copy(&bytes[pos..pos + 1], xor_blob, segment_base, pos)[0];
        pos += 1;

        let (body_len, len_len) = vlq::decode(&decrypt_copy(
            &bytes[pos..bytes.len().min(pos + 9)],
            xor_blob,
            segment_base,
            pos,
        ))
        .map_err(|e| Error::MalformedRecord(e.to_string()))?;
        pos += len_len;

        let body_len = body_len as usize;
        if pos + body_len > bytes.len() {
            break;
        }
        let body = decrypt_copy(&bytes[pos..pos + body_len], xor_blob, segment_base, pos);
        pos += body_len;

        if tag & 0x80 == 0 {
            decode_template_record(&body, &mut templates, &mut next_template_idx, &mut threads, &mut next_thread_idx)?;
        } else {
            let line = decode_log_entry(
                &body,
                &templates,
                &threads,
                &mut last_epoch_ms,
                metadata,
                time_cache,
            )?;
            callback(&line)?;
        }
    }
    Ok(pos)
}

fn decode_template_record(
    body: &[u8],
    templates: &mut HashMap<u32, FormatTemplate>,
    next_template_idx: &mut u32,
    threads: &mut HashMap<u32, (u64, String)>,
    next_thread_idx: &mut u32,
) -> Result<(), Error> {
    if body.is_empty() {
        return Err(Error::MalformedRecord("empty template body".to_owned()));
    }
    match body[0] {
        0 => {
            // Format template.
            if body.len() < 2 {
                return Err(Error::MalformedRecord("short format template".to_owned()));
            }
            let level = Level::from_primitive(body[1])
                .ok_or_else(|| Error::MalformedRecord("bad level byte".to_owned()))?;
            let (category, used) =
                vlq::decode(&body[2..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            let format = std::str::from_utf8(&body[2 + used..])
                .map_err(|e| Error::MalformedRecord(e.to_string()))?
                .to_owned();
            let idx = *next_template_idx;
            *next_template_idx += 1;
            templates.insert(idx, FormatTemplate { level, category: category as u32, format });
        }
        1 => {
            // Thread info.
            let (idx, used1) = vlq::decode(&body[1..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            let (thread_id, used2) =
                vlq::decode(&body[1 + used1..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            let name = std::str::from_utf8(&body[1 + used1 + used2..])
                .map_err(|e| Error::MalformedRecord(e.to_string()))?
                .to_owned();
            threads.insert(idx as u32, (thread_id, name));
            *next_thread_idx = (*next_thread_idx).max(idx as u32 + 1);
        }
        other => return Err(Error::MalformedRecord(format!("unknown template sub-type {other}"))),
    }
    Ok(())
}

fn decode_log_entry(
    body: &[u8],
    templates: &HashMap<u32, FormatTemplate>,
    threads: &HashMap<u32, (u64, String)>,
    last_epoch_ms: &mut i64,
    metadata: &PayloadMetadata,
    time_cache: &mut TimeCache,
) -> Result<String, Error> {
    let mut pos = 0;
    let (offset_raw, used) = vlq::decode(&body[pos..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
    pos += used;
    let offset = vlq::zigzag_decode(offset_raw);

    let (template_idx, used) = vlq::decode(&body[pos..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
    pos += used;
    let (thread_idx, used) = vlq::decode(&body[pos..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
    pos += used;
    let (arg_count, used) = vlq::decode(&body[pos..]).map_err(|e| Error::MalformedRecord(e.to_string()))?;
    pos += used;

    let template = templates
        .get(&(template_idx as u32))
        .ok_or_else(|| Error::MalformedRecord("unknown template index".to_owned()))?;
    let (thread_id, thread_name) = threads
        .get(&(thread_idx as u32))
        .cloned()
        .ok_or_else(|| Error::MalformedRecord("unknown thread index".to_owned()))?;

    let mut args = Vec::with_capacity(arg_count as usize);
    for _ in 0..arg_count {
        let (arg, used) = read_arg(&body[pos..])?;
        pos += used;
        args.push(arg);
    }

    *last_epoch_ms += offset;
    let epoch_ms = (*last_epoch_ms).max(0) as u64;

    let thread_name_owned = (!thread_name.is_empty()).then_some(thread_name.as_str());
    let record = RecordBuilder::new(template.level, template.category, &template.format)
        .args(args)
        .build(epoch_ms, thread_id, thread_name_owned);

    let category_name =
        metadata.categories.get(template.category as usize).map(String::as_str).unwrap_or("?");
    Ok(layout::render_line(&record, category_name, time_cache))
}

fn read_arg(bytes: &[u8]) -> Result<(Argument<'_>, usize), Error> {
    if bytes.is_empty() {
        return Err(Error::MalformedRecord("missing argument tag".to_owned()));
    }
    let tag = bytes[0];
    let rest = &bytes[1..];
    match tag {
        0 => Ok((Argument::Null, 1)),
        1 => {
            let (v, used) = vlq::decode(rest).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            Ok((Argument::Pointer(v), 1 + used))
        }
        2 => Ok((Argument::Bool(rest.first().copied().unwrap_or(0) != 0), 2)),
        3 => {
            let (v, used) = vlq::decode(rest).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            let ch = char::from_u32(v as u32).unwrap_or('\u{FFFD}');
            Ok((Argument::Char(ch), 1 + used))
        }
        4 => {
            let (v, used) = vlq::decode(rest).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            Ok((Argument::I64(vlq::zigzag_decode(v)), 1 + used))
        }
        5 => {
            let (v, used) = vlq::decode(rest).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            Ok((Argument::U64(v), 1 + used))
        }
        6 => {
            let bytes4: [u8; 4] =
                rest.get(..4).ok_or(Error::Truncated)?.try_into().unwrap();
            Ok((Argument::F32(f32::from_le_bytes(bytes4)), 5))
        }
        7 => {
            let bytes8: [u8; 8] =
                rest.get(..8).ok_or(Error::Truncated)?.try_into().unwrap();
            Ok((Argument::F64(f64::from_le_bytes(bytes8)), 9))
        }
        8 => {
            let (len, used) = vlq::decode(rest).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            let len = len as usize;
            let str_bytes = rest.get(used..used + len).ok_or(Error::Truncated)?;
            let s = std::str::from_utf8(str_bytes).map_err(|e| Error::MalformedRecord(e.to_string()))?;
            Ok((Argument::Str(s), 1 + used + len))
        }
        other => Err(Error::MalformedRecord(format!("unknown argument tag {other}"))),
    }
}
