//! Single-producer/single-consumer ring buffer.

use std::sync::atomic::{AtomicU32, Ordering};

use super::{
    blocks_for, read_circular, round_up_block_count, CircularWriter, Error, OverflowPolicy,
    Storage, BLOCK_LEN,
};

/// A lock-free ring buffer for the common case of one producer thread and
/// one consumer thread (an independent-mode log's own worker).
pub(crate) struct Siso {
    storage: Storage,
    /// Number of `BLOCK_LEN`-sized blocks the storage holds. Always a power
    /// of two so `index & mask` replaces a modulo.
    block_count: u32,
    mask: u32,
    /// Cumulative count of blocks written, never wrapped down.
    write_cursor: AtomicU32,
    /// Cumulative count of blocks the consumer has read.
    read_cursor: AtomicU32,
    policy: OverflowPolicy,
}

impl Siso {
    /// Builds a new ring over `storage`, requesting at least `min_blocks`
    /// blocks of capacity (rounded up to a power of two).
    ///
    /// If `storage` came from an `mmap`-backed file left over from a
    /// previous run, replays any chunks still present from offset zero,
    /// invoking `recover` for each, then continues appending immediately
    /// after the last valid chunk found.
    pub(crate) fn new(
        mut storage: Storage,
        min_blocks: u32,
        policy: OverflowPolicy,
        mut recover: impl FnMut(&[u8]),
    ) -> Self {
        let block_count = round_up_block_count(min_blocks);
        debug_assert!(storage.len() >= block_count as usize * BLOCK_LEN);

        let recovered_blocks = replay(storage.as_mut_slice(), block_count, &mut recover);

        Self {
            storage,
            block_count,
            mask: block_count - 1,
            write_cursor: AtomicU32::new(recovered_blocks),
            read_cursor: AtomicU32::new(recovered_blocks),
            policy,
        }
    }

    /// Writes `data` as a new chunk. Spins (yielding between attempts) when
    /// the policy is [`OverflowPolicy::Block`] and the ring is full.
    pub(crate) fn write(&mut self, data: &[u8]) -> Result<(), Error> {
        let needed = blocks_for(data.len());
        if needed > self.block_count {
            return Err(Error::TooLarge);
        }

        loop {
            let write_cursor = self.write_cursor.load(Ordering::Relaxed);
            let read_cursor = self.read_cursor.load(Ordering::Acquire);
            let used = write_cursor.wrapping_sub(read_cursor);
            let free = self.block_count - used;

            if free >= needed {
                self.write_at(write_cursor, data, needed);
                self.write_cursor.store(write_cursor.wrapping_add(needed), Ordering::Release);
                return Ok(());
            }

            match self.policy {
                OverflowPolicy::Discard => return Err(Error::Full),
                OverflowPolicy::Block => std::thread::yield_now(),
            }
        }
    }

    /// Reads the next available chunk, if any, invoking `f` with its
    /// payload bytes before the block range is reclaimed.
    pub(crate) fn read_with<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let write_cursor = self.write_cursor.load(Ordering::Acquire);
        let read_cursor = self.read_cursor.load(Ordering::Relaxed);
        if read_cursor == write_cursor {
            return None;
        }

        let (block_num, data_size) = self.header_at(read_cursor);
        let result = f(&self.payload_at(read_cursor, data_size));
        self.read_cursor.store(read_cursor.wrapping_add(block_num), Ordering::Release);
        Some(result)
    }

    /// Whether the consumer has drained all chunks currently visible to it.
    pub(crate) fn is_empty(&self) -> bool {
        self.write_cursor.load(Ordering::Acquire) == self.read_cursor.load(Ordering::Relaxed)
    }

    fn write_at(&mut self, cursor: u32, data: &[u8], needed: u32) {
        let start = block_offset(cursor, self.mask);
        let slice = self.storage.as_mut_slice();

        let mut writer = CircularWriter { slice, pos: start };
        writer.write(&needed.to_le_bytes());
        writer.write(&(data.len() as u32).to_le_bytes());
        writer.write(data);
    }

    fn header_at(&self, cursor: u32) -> (u32, u32) {
        let offset = block_offset(cursor, self.mask);
        let slice = self.storage.as_slice();
        let mut block_num = [0u8; 4];
        let mut data_size = [0u8; 4];
        read_circular(slice, offset, &mut block_num);
        read_circular(slice, (offset + 4) % slice.len(), &mut data_size);
        (u32::from_le_bytes(block_num), u32::from_le_bytes(data_size))
    }

    fn payload_at(&self, cursor: u32, data_size: u32) -> Vec<u8> {
        let slice = self.storage.as_slice();
        let start = (block_offset(cursor, self.mask) + 8) % slice.len();
        let mut out = vec![0u8; data_size as usize];
        read_circular(slice, start, &mut out);
        out
    }
}

/// Byte offset of block `cursor` within the (linear) storage buffer.
fn block_offset(cursor: u32, mask: u32) -> usize {
    (cursor & mask) as usize * BLOCK_LEN
}

/// Plays back any well-formed chunks already present in `slice` (left over
/// from a previous, possibly crashed, run), starting at byte 0 and stopping
/// at the first header that fails validation. Returns the number of blocks
/// consumed by valid chunks, which becomes the starting cursor position.
fn replay(slice: &mut [u8], block_count: u32, recover: &mut impl FnMut(&[u8])) -> u32 {
    let mut cursor = 0u32;
    loop {
        let offset = cursor as usize * BLOCK_LEN;
        if offset + 8 > slice.len() {
            break;
        }
        let block_num = u32::from_le_bytes(slice[offset..offset + 4].try_into().unwrap());
        let data_size = u32::from_le_bytes(slice[offset + 4..offset + 8].try_into().unwrap());
        if block_num == 0 || cursor + block_num > block_count {
            break;
        }
        if data_size as usize > (block_num as usize - 1).saturating_mul(BLOCK_LEN).max(BLOCK_LEN) {
            break;
        }

        let payload_start = offset + 8;
        let payload_end = payload_start + data_size as usize;
        if payload_end > slice.len() {
            break;
        }
        recover(&slice[payload_start..payload_end]);
        cursor += block_num;
    }
    cursor
}
