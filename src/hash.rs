//! The Robin-Hood hash table (§4.3): an open-addressing bucket array over
//! the mapped region, with bounded worst-case lookup via a tracked maximum
//! probe distance.

use bytemuck::{Pod, Zeroable};

use crate::{AllocError, Engine, GROWTH_DEN, GROWTH_NUM, INITIAL_BUCKET_COUNT, LOAD_FACTOR_DEN, LOAD_FACTOR_NUM};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over `bytes`. A hash of exactly zero is remapped to one, since a
/// bucket slot's `hash == 0` means "empty".
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash == 0 {
        1
    } else {
        hash
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct HashHeaderRaw {
    bucket_count: u64,
    bucket_size: u64,
    filled: u64,
    max_dist: u64,
    buckets_offset: u64,
    value_width: u64,
}

const HEADER_SIZE: u64 = std::mem::size_of::<HashHeaderRaw>() as u64;
const SLOT_PREFIX_SIZE: u64 = 16; // hash: u64, key_offset: u64

/// Summary statistics for a [`Table`], returned by [`Table::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub bucket_count: u64,
    pub filled: u64,
    pub max_probe_distance: u64,
}

/// A handle to a Robin-Hood hash table living inside an [`Engine`].
///
/// `Table` itself is just an offset — `Copy`, cheap to pass around — and
/// every operation takes the `Engine` it lives in explicitly, so no method
/// can be called against the wrong engine by accident... except that
/// nothing stops you from doing exactly that; callers are responsible for
/// pairing a `Table` with the `Engine` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Table {
    header_offset: u64,
}

impl Table {
    /// Reopen a handle to a table whose header lives at `header_offset`,
    /// e.g. one read back out of another structure's payload.
    pub(crate) fn from_offset(header_offset: u64) -> Self {
        Self { header_offset }
    }

    /// The offset of this table's header, suitable for storing as a value
    /// elsewhere and reopening later with [`Table::from_offset`].
    pub(crate) fn header_offset(&self) -> u64 {
        self.header_offset
    }

    /// Create a new, empty table whose values are `value_width` bytes wide.
    pub(crate) fn create(engine: &mut Engine, value_width: u32) -> Result<Self, AllocError> {
        let value_width = value_width as u64;
        let bucket_size = SLOT_PREFIX_SIZE + value_width;
        let buckets_bytes = bucket_size
            .checked_mul(INITIAL_BUCKET_COUNT)
            .ok_or(AllocError::InvalidArgument("value_width too large"))?;

        let header_offset = engine.allocate(HEADER_SIZE)?;
        let buckets_offset = engine.allocate(buckets_bytes)?;
        zero_range(engine, buckets_offset, buckets_bytes);

        let table = Self { header_offset };
        table.write_header(
            engine,
            HashHeaderRaw {
                bucket_count: INITIAL_BUCKET_COUNT,
                bucket_size,
                filled: 0,
                max_dist: 0,
                buckets_offset,
                value_width,
            },
        );
        Ok(table)
    }

    fn read_header(&self, engine: &Engine) -> HashHeaderRaw {
        let start = self.header_offset as usize;
        *bytemuck::from_bytes(&engine.storage.bytes()[start..start + HEADER_SIZE as usize])
    }

    fn write_header(&self, engine: &mut Engine, header: HashHeaderRaw) {
        let start = self.header_offset as usize;
        let slot: &mut HashHeaderRaw =
            bytemuck::from_bytes_mut(&mut engine.storage.bytes_mut()[start..start + HEADER_SIZE as usize]);
        *slot = header;
    }

    fn slot_offset(header: &HashHeaderRaw, index: u64) -> u64 {
        header.buckets_offset + index * header.bucket_size
    }

    fn read_slot<'e>(engine: &'e Engine, header: &HashHeaderRaw, index: u64) -> (u64, u64, &'e [u8]) {
        let offset = Self::slot_offset(header, index) as usize;
        let bytes = &engine.storage.bytes()[offset..offset + header.bucket_size as usize];
        let hash = u64::from_le_bytes(bytes[0..8].try_into().unwrap());
        let key_offset = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        (hash, key_offset, &bytes[16..])
    }

    fn write_slot(engine: &mut Engine, header: &HashHeaderRaw, index: u64, hash: u64, key_offset: u64, value: &[u8]) {
        let offset = Self::slot_offset(header, index) as usize;
        let bytes = &mut engine.storage.bytes_mut()[offset..offset + header.bucket_size as usize];
        bytes[0..8].copy_from_slice(&hash.to_le_bytes());
        bytes[8..16].copy_from_slice(&key_offset.to_le_bytes());
        bytes[16..].copy_from_slice(value);
    }

    fn probe_distance(header: &HashHeaderRaw, home: u64, index: u64) -> u64 {
        (index + header.bucket_count - home) % header.bucket_count
    }

    fn key_matches(engine: &Engine, key_offset: u64, key: &[u8]) -> bool {
        engine.read_cstr(key_offset) == key
    }

    /// Look up `key`, returning a copy of its value bytes if present.
    ///
    /// Keys are stored as NUL-terminated strings (matching the on-disk
    /// diskmap format this container is modeled on), so `key` must not
    /// itself contain a NUL byte.
    pub fn lookup(&self, engine: &Engine, key: &[u8]) -> Option<Vec<u8>> {
        let header = self.read_header(engine);
        if header.bucket_count == 0 {
            return None;
        }
        let hash = fnv1a(key);
        let home = hash % header.bucket_count;
        let mut index = home;
        for dist in 0..=header.max_dist {
            let (slot_hash, slot_key, value) = Self::read_slot(engine, &header, index);
            if slot_key == 0 {
                return None;
            }
            if slot_hash == hash && Self::key_matches(engine, slot_key, key) {
                return Some(value.to_vec());
            }
            let _ = dist;
            index = (index + 1) % header.bucket_count;
        }
        None
    }

    /// Insert or overwrite `key` with `value`, returning the bucket index
    /// the key ends up in after this call (before any subsequent insertion
    /// shifts it). `value` must be exactly the table's `value_width` bytes.
    pub fn insert_raw(&mut self, engine: &mut Engine, key: &[u8], value: &[u8]) -> Result<u64, AllocError> {
        if key.is_empty() {
            return Err(AllocError::InvalidArgument("key must not be empty"));
        }
        if key.contains(&0) {
            return Err(AllocError::InvalidArgument("key must not contain a NUL byte"));
        }
        let header = self.read_header(engine);
        if value.len() as u64 != header.value_width {
            return Err(AllocError::InvalidArgument("value does not match table's value width"));
        }

        if let Some(index) = self.find_index(engine, key) {
            let header = self.read_header(engine);
            let (hash, key_offset, _) = Self::read_slot(engine, &header, index);
            Self::write_slot(engine, &header, index, hash, key_offset, value);
            return Ok(index);
        }

        if (header.filled + 1) * LOAD_FACTOR_DEN > header.bucket_count * LOAD_FACTOR_NUM {
            self.resize(engine)?;
        }

        let key_offset = engine.intern_string(key)?;
        self.insert_entry(engine, key_offset, value)
    }

    /// Insert or overwrite `key` (copied into the table's own storage as an
    /// interned string) with `value`.
    pub fn insert_str(&mut self, engine: &mut Engine, key: &[u8], value: &[u8]) -> Result<u64, AllocError> {
        self.insert_raw(engine, key, value)
    }

    fn find_index(&self, engine: &Engine, key: &[u8]) -> Option<u64> {
        let header = self.read_header(engine);
        if header.bucket_count == 0 {
            return None;
        }
        let hash = fnv1a(key);
        let home = hash % header.bucket_count;
        let mut index = home;
        for _ in 0..=header.max_dist {
            let (slot_hash, slot_key, _) = Self::read_slot(engine, &header, index);
            if slot_key == 0 {
                return None;
            }
            if slot_hash == hash && Self::key_matches(engine, slot_key, key) {
                return Some(index);
            }
            index = (index + 1) % header.bucket_count;
        }
        None
    }

    /// Displace entries Robin-Hood style to place a brand-new `(key_offset,
    /// value)` pair. Returns the index the caller's entry first lands in.
    fn insert_entry(&mut self, engine: &mut Engine, key_offset: u64, value: &[u8]) -> Result<u64, AllocError> {
        let mut header = self.read_header(engine);
        let hash = fnv1a(engine.read_cstr(key_offset));
        let mut carry_hash = hash;
        let mut carry_key = key_offset;
        let mut carry_value = value.to_vec();
        let mut index = hash % header.bucket_count;
        let mut dist = 0u64;
        let mut landing = None;
        let mut max_dist = header.max_dist;

        loop {
            let (slot_hash, slot_key, slot_value) = Self::read_slot(engine, &header, index);
            if slot_key == 0 {
                Self::write_slot(engine, &header, index, carry_hash, carry_key, &carry_value);
                max_dist = max_dist.max(dist);
                landing.get_or_insert(index);
                break;
            }
            let resident_home = slot_hash % header.bucket_count;
            let resident_dist = Self::probe_distance(&header, resident_home, index);
            if dist > resident_dist {
                let displaced_value = slot_value.to_vec();
                Self::write_slot(engine, &header, index, carry_hash, carry_key, &carry_value);
                max_dist = max_dist.max(dist);
                landing.get_or_insert(index);
                carry_hash = slot_hash;
                carry_key = slot_key;
                carry_value = displaced_value;
                dist = resident_dist;
            }
            index = (index + 1) % header.bucket_count;
            dist += 1;
        }

        header.filled += 1;
        header.max_dist = max_dist;
        self.write_header(engine, header);
        Ok(landing.expect("insert_entry always places the carried entry"))
    }

    /// Double the bucket count and reinsert every occupied slot.
    fn resize(&mut self, engine: &mut Engine) -> Result<(), AllocError> {
        let old_header = self.read_header(engine);
        let new_bucket_count = old_header
            .bucket_count
            .checked_mul(GROWTH_NUM)
            .and_then(|v| v.checked_div(GROWTH_DEN))
            .ok_or(AllocError::Other("bucket count overflow on resize"))?;
        let new_buckets_bytes = new_bucket_count
            .checked_mul(old_header.bucket_size)
            .ok_or(AllocError::Other("bucket array size overflow on resize"))?;
        let new_buckets_offset = engine.allocate(new_buckets_bytes)?;
        zero_range(engine, new_buckets_offset, new_buckets_bytes);

        let mut entries = Vec::with_capacity(old_header.filled as usize);
        for i in 0..old_header.bucket_count {
            let (hash, key_offset, value) = Self::read_slot(engine, &old_header, i);
            if key_offset != 0 {
                entries.push((hash, key_offset, value.to_vec()));
            }
        }

        let new_header = HashHeaderRaw {
            bucket_count: new_bucket_count,
            bucket_size: old_header.bucket_size,
            filled: 0,
            max_dist: 0,
            buckets_offset: new_buckets_offset,
            value_width: old_header.value_width,
        };
        self.write_header(engine, new_header);

        for (hash, key_offset, value) in entries {
            let mut header = self.read_header(engine);
            let mut index = hash % header.bucket_count;
            let mut dist = 0u64;
            loop {
                let (slot_hash, slot_key, _) = Self::read_slot(engine, &header, index);
                if slot_key == 0 {
                    Self::write_slot(engine, &header, index, hash, key_offset, &value);
                    header.filled += 1;
                    header.max_dist = header.max_dist.max(dist);
                    self.write_header(engine, header);
                    break;
                }
                let resident_home = slot_hash % header.bucket_count;
                let resident_dist = Self::probe_distance(&header, resident_home, index);
                if dist > resident_dist {
                    // Reinsertion scans an all-fresh table in ascending-distance
                    // order, so a collision here never happens: every prior
                    // entry was placed without contest.
                    unreachable!("resize reinsertion never displaces an existing entry");
                }
                index = (index + 1) % header.bucket_count;
                dist += 1;
            }
        }

        engine.free(old_header.buckets_offset);
        Ok(())
    }

    /// Iterate over every `(key, value)` pair currently stored.
    pub fn iterate(&self, engine: &Engine) -> Vec<(Vec<u8>, Vec<u8>)> {
        let header = self.read_header(engine);
        let mut out = Vec::with_capacity(header.filled as usize);
        for i in 0..header.bucket_count {
            let (_, key_offset, value) = Self::read_slot(engine, &header, i);
            if key_offset != 0 {
                out.push((engine.read_cstr(key_offset).to_vec(), value.to_vec()));
            }
        }
        out
    }

    /// Read the value at `index` without a key lookup.
    pub(crate) fn value_at(&self, engine: &Engine, index: u64) -> Vec<u8> {
        let header = self.read_header(engine);
        Self::read_slot(engine, &header, index).2.to_vec()
    }

    /// Resolve `key` to its bucket index, if present.
    pub(crate) fn index_of(&self, engine: &Engine, key: &[u8]) -> Option<u64> {
        self.find_index(engine, key)
    }

    /// Snapshot counters useful for diagnostics and the CLI summary line.
    pub fn stats(&self, engine: &Engine) -> Stats {
        let header = self.read_header(engine);
        Stats {
            bucket_count: header.bucket_count,
            filled: header.filled,
            max_probe_distance: header.max_dist,
        }
    }
}

fn zero_range(engine: &mut Engine, offset: u64, len: u64) {
    let start = offset as usize;
    let end = start + len as usize;
    engine.storage.bytes_mut()[start..end].fill(0);
}
