//! The block allocator (§4.2): carves the mapped region into variable-sized
//! allocations threaded through a doubly-linked, ascending-offset list of
//! block records.

use bytemuck::{Pod, Zeroable};
use byteorder::{ByteOrder, LittleEndian};

use crate::{AllocError, Engine};

/// Tuning constants named in the spec.
pub const ALLOC_ALIGN: u64 = 4;
pub const GROWTH_ROUND: u64 = 256;

const MAGIC: u64 = 0x4852_4153_4844_4221; // "HRASHDB!" squeezed into 8 bytes

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct AllocHeaderRaw {
    magic: u64,
    next_free_block_offset: u64,
    mapped_size: u64,
    /// Header offset of this file's root structure (a [`crate::Table`] or
    /// [`crate::MultiMap`]), or 0 if none has been established yet. This is
    /// what lets a reopened engine recover state it built in a previous
    /// process run instead of that state living only in memory — see
    /// `Engine::root_table`/`Engine::root_multimap`.
    root_offset: u64,
    checksum: u64,
}

pub(crate) const HEADER_SIZE: u64 = std::mem::size_of::<AllocHeaderRaw>() as u64;

/// A block record, stored immediately before the payload it describes.
///
/// The spec names only `prev_block_offset`/`next_block_offset`; the `free`
/// flag is an addition the data model explicitly allows ("an implementation
/// may choose any layout"), used to keep every record permanently in the
/// ascending list (see DESIGN.md's Open Question on block record layout)
/// instead of reproducing the reference's unlink-on-free mechanics, which
/// cannot be reconciled with I5 as literally stated.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlockRecordRaw {
    prev: u64,
    next: u64,
    free: u64,
}

pub(crate) const BLOCK_RECORD_SIZE: u64 = std::mem::size_of::<BlockRecordRaw>() as u64;

fn round_up(value: u64, align: u64) -> u64 {
    (value + align - 1) / align * align
}

fn header_checksum(magic: u64, next_free_block_offset: u64, mapped_size: u64, root_offset: u64) -> u64 {
    let mut buf = [0u8; 32];
    LittleEndian::write_u64(&mut buf[0..8], magic);
    LittleEndian::write_u64(&mut buf[8..16], next_free_block_offset);
    LittleEndian::write_u64(&mut buf[16..24], mapped_size);
    LittleEndian::write_u64(&mut buf[24..32], root_offset);
    xxhash_rust::xxh3::xxh3_64(&buf)
}

impl Engine {
    fn header(&self) -> &AllocHeaderRaw {
        bytemuck::from_bytes(&self.storage.bytes()[0..HEADER_SIZE as usize])
    }

    fn header_mut(&mut self) -> &mut AllocHeaderRaw {
        bytemuck::from_bytes_mut(&mut self.storage.bytes_mut()[0..HEADER_SIZE as usize])
    }

    fn write_header(&mut self, next_free_block_offset: u64, mapped_size: u64, root_offset: u64) {
        let checksum = header_checksum(MAGIC, next_free_block_offset, mapped_size, root_offset);
        let header = self.header_mut();
        *header = AllocHeaderRaw {
            magic: MAGIC,
            next_free_block_offset,
            mapped_size,
            root_offset,
            checksum,
        };
    }

    fn next_free_block_offset(&self) -> u64 {
        self.header().next_free_block_offset
    }

    fn set_next_free_block_offset(&mut self, offset: u64) {
        self.header_mut().next_free_block_offset = offset;
    }

    fn mapped_size(&self) -> u64 {
        self.header().mapped_size
    }

    /// The header offset of this file's root structure, or 0 if none has
    /// been established.
    pub(crate) fn root_offset(&self) -> u64 {
        self.header().root_offset
    }

    /// Record `offset` as this file's root structure, rewriting the header
    /// checksum to match.
    pub(crate) fn set_root_offset(&mut self, offset: u64) {
        let (magic, next_free_block_offset, mapped_size) = {
            let header = self.header();
            (header.magic, header.next_free_block_offset, header.mapped_size)
        };
        let checksum = header_checksum(magic, next_free_block_offset, mapped_size, offset);
        let header = self.header_mut();
        header.root_offset = offset;
        header.checksum = checksum;
    }

    /// Lay down the allocator header plus the head/tail sentinel block
    /// records in a freshly created (empty) mapping.
    pub(crate) fn init_allocator(&mut self) {
        let mapped_size = self.storage.len();
        let head_offset = HEADER_SIZE;
        let tail_offset = head_offset + BLOCK_RECORD_SIZE;
        debug_assert!(head_offset < tail_offset, "sentinel blocks must be in ascending offset order");
        self.write_header(head_offset, mapped_size, 0);
        self.write_block_record(head_offset, 0, tail_offset, true);
        self.write_block_record(tail_offset, head_offset, 0, true);
    }

    /// Validate an existing allocator header (format tag + checksum) on
    /// open of a pre-existing file.
    pub(crate) fn validate_allocator(&self) -> Result<(), AllocError> {
        if (self.storage.len() as usize) < HEADER_SIZE as usize {
            return Err(AllocError::DataCorruption("file too small for allocator header"));
        }
        let header = *self.header();
        if header.magic != MAGIC {
            return Err(AllocError::DataCorruption("bad format tag"));
        }
        let expected = header_checksum(
            header.magic,
            header.next_free_block_offset,
            header.mapped_size,
            header.root_offset,
        );
        if expected != header.checksum {
            return Err(AllocError::DataCorruption("allocator header checksum mismatch"));
        }
        if header.mapped_size != self.storage.len() {
            return Err(AllocError::DataCorruption("allocator header size disagrees with file size"));
        }
        Ok(())
    }

    fn read_block_record(&self, offset: u64) -> BlockRecordRaw {
        let start = offset as usize;
        *bytemuck::from_bytes(&self.storage.bytes()[start..start + BLOCK_RECORD_SIZE as usize])
    }

    fn write_block_record(&mut self, offset: u64, prev: u64, next: u64, free: bool) {
        let start = offset as usize;
        let slot: &mut BlockRecordRaw =
            bytemuck::from_bytes_mut(&mut self.storage.bytes_mut()[start..start + BLOCK_RECORD_SIZE as usize]);
        *slot = BlockRecordRaw {
            prev,
            next,
            free: free as u64,
        };
    }

    fn set_free(&mut self, offset: u64, free: bool) {
        let start = offset as usize;
        let slot: &mut BlockRecordRaw =
            bytemuck::from_bytes_mut(&mut self.storage.bytes_mut()[start..start + BLOCK_RECORD_SIZE as usize]);
        slot.free = free as u64;
    }

    fn set_next(&mut self, offset: u64, next: u64) {
        let start = offset as usize;
        let slot: &mut BlockRecordRaw =
            bytemuck::from_bytes_mut(&mut self.storage.bytes_mut()[start..start + BLOCK_RECORD_SIZE as usize]);
        slot.next = next;
    }

    fn set_prev(&mut self, offset: u64, prev: u64) {
        let start = offset as usize;
        let slot: &mut BlockRecordRaw =
            bytemuck::from_bytes_mut(&mut self.storage.bytes_mut()[start..start + BLOCK_RECORD_SIZE as usize]);
        slot.prev = prev;
    }

    /// Allocate `size` bytes, returning the offset of the payload (just past
    /// its block record). See spec §4.2.
    pub(crate) fn allocate(&mut self, size: u64) -> Result<u64, AllocError> {
        let size = round_up(size, ALLOC_ALIGN);
        let mut cursor = self.next_free_block_offset();

        loop {
            let node = self.read_block_record(cursor);
            let is_tail = node.next == 0;

            if !is_tail && node.free == 0 {
                // Occupied mid-list node: keep scanning.
                cursor = node.next;
                continue;
            }

            if is_tail {
                let new_tail = round_up(cursor + BLOCK_RECORD_SIZE + size, ALLOC_ALIGN);
                debug_assert!(new_tail > cursor, "new tail must advance ascending offset order");
                let required = new_tail + BLOCK_RECORD_SIZE;
                if required > self.mapped_size() {
                    let scaled = required.checked_mul(3).ok_or(AllocError::Other("allocation size overflow"))?;
                    let grown = (scaled + 1) / 2;
                    let new_file_size = round_up(grown, GROWTH_ROUND);
                    self.storage.grow(new_file_size)?;
                    let (next_free_block_offset, root_offset) = {
                        let header = self.header();
                        (header.next_free_block_offset, header.root_offset)
                    };
                    let checksum = header_checksum(MAGIC, next_free_block_offset, new_file_size, root_offset);
                    let header = self.header_mut();
                    header.mapped_size = new_file_size;
                    header.checksum = checksum;
                }
                self.write_block_record(new_tail, cursor, 0, true);
                self.set_next(cursor, new_tail);
                self.set_free(cursor, false);
                self.set_next_free_block_offset(new_tail);
                return Ok(cursor + BLOCK_RECORD_SIZE);
            }

            // Free mid-list node.
            let gap = node.next - (cursor + BLOCK_RECORD_SIZE);
            if gap <= size {
                cursor = node.next;
                continue;
            }
            if gap > size + BLOCK_RECORD_SIZE {
                // Split: leftover becomes a new free record.
                let leftover = round_up(cursor + BLOCK_RECORD_SIZE + size, ALLOC_ALIGN);
                let old_next = node.next;
                debug_assert!(
                    cursor < leftover && leftover < old_next,
                    "split must preserve ascending offset order"
                );
                self.write_block_record(leftover, cursor, old_next, true);
                self.set_prev(old_next, leftover);
                self.set_next(cursor, leftover);
                self.set_free(cursor, false);
                self.set_next_free_block_offset(leftover);
            } else {
                // Consume whole node; excess smaller than a block record is wasted.
                self.set_free(cursor, false);
                self.set_next_free_block_offset(node.next);
            }
            return Ok(cursor + BLOCK_RECORD_SIZE);
        }
    }

    /// Mark the block backing `offset` as free. Does not coalesce with
    /// neighbors (see spec §9, known limitation).
    pub(crate) fn free(&mut self, offset: u64) {
        let block_offset = offset - BLOCK_RECORD_SIZE;
        self.set_free(block_offset, true);
        self.set_next_free_block_offset(block_offset);
    }

    /// Allocate and copy in a NUL-terminated interned string.
    pub(crate) fn intern_string(&mut self, bytes: &[u8]) -> Result<u64, AllocError> {
        let offset = self.allocate(bytes.len() as u64 + 1)?;
        let start = offset as usize;
        let dst = &mut self.storage.bytes_mut()[start..start + bytes.len() + 1];
        dst[..bytes.len()].copy_from_slice(bytes);
        dst[bytes.len()] = 0;
        Ok(offset)
    }

    /// Borrow the bytes of an interned (NUL-terminated) string, not
    /// including the terminator.
    pub(crate) fn read_cstr(&self, offset: u64) -> &[u8] {
        let bytes = &self.storage.bytes()[offset as usize..];
        let len = bytes.iter().position(|&b| b == 0).expect("interned string is NUL-terminated");
        &bytes[..len]
    }
}

#[cfg(test)]
mod tests {
    use crate::Engine;

    #[test]
    fn allocate_then_free_then_reuse() {
        let mut engine = Engine::create_anon(4096).unwrap();
        let a = engine.allocate(16).unwrap();
        let b = engine.allocate(32).unwrap();
        assert_ne!(a, b);
        engine.free(a);
        let c = engine.allocate(8).unwrap();
        // Freed block is preferred as the next scan start.
        assert_eq!(c, a);
    }

    #[test]
    fn allocate_past_capacity_grows_file() {
        let mut engine = Engine::create_anon(128).unwrap();
        let mut offsets = Vec::new();
        for _ in 0..64 {
            offsets.push(engine.allocate(16).unwrap());
        }
        let mut dedup = offsets.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), offsets.len());
    }

    #[test]
    fn intern_and_read_roundtrip() {
        let mut engine = Engine::create_anon(4096).unwrap();
        let offset = engine.intern_string(b"hello").unwrap();
        assert_eq!(engine.read_cstr(offset), b"hello");
    }
}
