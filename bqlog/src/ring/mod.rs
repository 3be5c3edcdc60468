//! Lock-free ring-buffer transport: a single-producer/single-consumer
//! (`SISO`) variant used by independent-mode logs, and a
//! multi-producer/single-consumer (`MISO`) variant used by shared/async-mode
//! logs.
//!
//! Both variants are built on the same block-granular storage: the backing
//! memory is divided into fixed-size 32-byte blocks, and every chunk written
//! to the ring starts with an 8-byte header (`block_num`, `data_size`)
//! occupying the first block, followed by `block_num - 1` data blocks. The
//! block count backing a ring must be a power of two so cursor arithmetic can
//! use a mask instead of a modulo.

mod miso;
mod siso;

pub(crate) use miso::{Miso, Reservation};
pub(crate) use siso::Siso;

use thiserror::Error;

use crate::mmap::Mmap;

/// The size, in bytes, of a single block.
pub(crate) const BLOCK_LEN: usize = 32;

/// The size, in bytes, of a chunk header (`block_num: u32`, `data_size: u32`).
const CHUNK_HEADER_LEN: usize = 8;

/// Errors that can occur while writing to a ring buffer.
#[derive(Error, Clone, Copy, Debug)]
pub(crate) enum Error {
    /// The payload, together with its chunk header, does not fit in the ring
    /// even when empty.
    #[error("payload is larger than the entire ring buffer")]
    TooLarge,
    /// The ring has no space for this write and the overflow policy is
    /// `Discard`.
    #[error("ring buffer is full")]
    Full,
}

/// What a producer should do when the ring has no space for a new chunk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub(crate) enum OverflowPolicy {
    /// Drop the new chunk and report [`Error::Full`].
    #[default]
    Discard,
    /// Block the calling thread until the consumer frees enough space.
    Block,
}

/// The backing storage for a ring buffer: either anonymous memory or an
/// `mmap`-backed file enabling crash recovery.
pub(crate) enum Storage {
    Mmap(Mmap),
    Heap(Vec<u8>),
}

impl Storage {
    pub(crate) fn as_slice(&self) -> &[u8] {
        match self {
            Self::Mmap(mmap) => mmap.as_slice(),
            Self::Heap(vec) => vec.as_slice(),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::Mmap(mmap) => mmap.as_mut_slice(),
            Self::Heap(vec) => vec.as_mut_slice(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Mmap(mmap) => mmap.len(),
            Self::Heap(vec) => vec.len(),
        }
    }
}

/// Rounds `blocks` up to the next power of two, with a minimum of 2 (one
/// block for the recovery head, at least one for data).
pub(crate) fn round_up_block_count(blocks: u32) -> u32 {
    blocks.max(2).next_power_of_two()
}

/// Copies `out.len()` bytes from `slice` starting at `start`, wrapping
/// around to the front of `slice` if necessary. Shared by the SISO and MISO
/// implementations.
pub(crate) fn read_circular(slice: &[u8], start: usize, out: &mut [u8]) {
    let len = slice.len();
    let first = out.len().min(len - start);
    out[..first].copy_from_slice(&slice[start..start + first]);
    if first < out.len() {
        out[first..].copy_from_slice(&slice[..out.len() - first]);
    }
}

/// A cursor helper that writes bytes into a circular byte slice, wrapping at
/// the end. `pos` is an absolute byte offset into the slice.
pub(crate) struct CircularWriter<'a> {
    pub(crate) slice: &'a mut [u8],
    pub(crate) pos: usize,
}

impl<'a> CircularWriter<'a> {
    pub(crate) fn write(&mut self, mut bytes: &[u8]) {
        let len = self.slice.len();
        while !bytes.is_empty() {
            let offset = self.pos % len;
            let chunk = bytes.len().min(len - offset);
            self.slice[offset..offset + chunk].copy_from_slice(&bytes[..chunk]);
            self.pos += chunk;
            bytes = &bytes[chunk..];
        }
    }
}

/// Computes how many blocks a payload of `data_len` bytes needs, including
/// its chunk header.
pub(crate) fn blocks_for(data_len: usize) -> u32 {
    let total = CHUNK_HEADER_LEN + data_len;
    ((total + BLOCK_LEN - 1) / BLOCK_LEN) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up_block_count() {
        assert_eq!(round_up_block_count(0), 2);
        assert_eq!(round_up_block_count(3), 4);
        assert_eq!(round_up_block_count(4), 4);
        assert_eq!(round_up_block_count(5), 8);
    }

    #[test]
    fn test_blocks_for() {
        assert_eq!(blocks_for(0), 1); // header alone fills under one block
        assert_eq!(blocks_for(24), 1); // 8 + 24 == 32
        assert_eq!(blocks_for(25), 2);
    }
}
