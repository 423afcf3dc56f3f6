//! A persistent, memory-mapped hash container.
//!
//! An [`Engine`] owns a single memory-mapped file (or, for tests and
//! scratch use, an anonymous mapping) and carves it into variable-sized
//! allocations with a block allocator. [`hash::Table`] and
//! [`multimap::MultiMap`] are built on top of that allocator: a Robin-Hood
//! open-addressing hash table, and a table-of-tables for one-to-many
//! key/value relationships.
//!
//! Everything the engine touches is reached through a borrow of `&Engine`
//! or `&mut Engine` rather than a retained pointer or index, so the borrow
//! checker rejects any attempt to hold a view into the mapping across a
//! call that might grow (and therefore move) it.

#![allow(dead_code)]

mod alloc;
mod error;
mod hash;
mod multimap;
mod storage;

pub use error::AllocError;
pub use hash::{Stats, Table};
pub use multimap::MultiMap;

use std::path::Path;

use storage::Storage;

/// Starting size of a freshly created backing file, in bytes.
pub const INITIAL_FILE_SIZE: u64 = 4096;

/// Starting bucket count for a freshly created [`Table`].
pub const INITIAL_BUCKET_COUNT: u64 = 16;

/// Resize once occupancy crosses this fraction (numerator/denominator) of
/// the bucket count.
pub const LOAD_FACTOR_NUM: u64 = 9;
pub const LOAD_FACTOR_DEN: u64 = 10;

/// Bucket count multiplier (numerator/denominator) applied on resize.
pub const GROWTH_NUM: u64 = 2;
pub const GROWTH_DEN: u64 = 1;

/// A handle to a single memory-mapped hash container.
///
/// Created with [`Engine::create`] (file-backed) or [`Engine::create_anon`]
/// (in-process only). Dropping it unmaps the file without an explicit sync;
/// call [`Engine::sync`] first if durability across process exit matters.
pub struct Engine {
    pub(crate) storage: Storage,
}

impl Engine {
    /// Open `path`, creating it (and initializing the allocator header) if
    /// it doesn't already exist or is empty.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, AllocError> {
        let (storage, is_fresh) = Storage::open(path, INITIAL_FILE_SIZE)?;
        let mut engine = Self { storage };
        if is_fresh {
            engine.init_allocator();
        } else {
            engine.validate_allocator()?;
        }
        Ok(engine)
    }

    /// Create a fresh, file-less engine. Useful for tests and short-lived
    /// in-process caches; nothing is ever written to disk.
    pub fn create_anon(initial_bytes: u64) -> Result<Self, AllocError> {
        let storage = Storage::create_anon(initial_bytes)?;
        let mut engine = Self { storage };
        engine.init_allocator();
        Ok(engine)
    }

    /// Flush dirty pages to the backing file. A no-op for an anonymous
    /// engine.
    pub fn sync(&self) -> Result<(), AllocError> {
        self.storage.sync()
    }

    /// Sync and drop, consuming `self`. Equivalent to letting the value go
    /// out of scope after a [`sync`](Engine::sync), spelled out for callers
    /// who want the fallibility of the final flush.
    pub fn close(self) -> Result<(), AllocError> {
        self.storage.close()
    }

    /// Drop without syncing, discarding any unflushed writes.
    pub fn abandon(self) {
        self.storage.abandon()
    }

    /// Create a new, empty [`Table`] inside this engine.
    pub fn create_table(&mut self, value_width: u32) -> Result<Table, AllocError> {
        Table::create(self, value_width)
    }

    /// Create a new, empty [`MultiMap`] inside this engine.
    pub fn create_multimap(&mut self) -> Result<MultiMap, AllocError> {
        MultiMap::create(self)
    }

    /// The file's single root structure: a [`Table`] of `value_width`-byte
    /// values. The first call against a fresh file creates it and persists
    /// its header offset in the allocator header; every later call —
    /// including ones after a `close`/reopen cycle — recovers the same
    /// table instead of creating a new one.
    ///
    /// A file has exactly one root slot; mixing calls to this with
    /// [`Engine::root_multimap`] against the same file reopens whatever the
    /// first call created, regardless of which method made it.
    pub fn root_table(&mut self, value_width: u32) -> Result<Table, AllocError> {
        let offset = self.root_offset();
        if offset == 0 {
            let table = Table::create(self, value_width)?;
            self.set_root_offset(table.header_offset());
            Ok(table)
        } else {
            Ok(Table::from_offset(offset))
        }
    }

    /// The file's single root structure, as a [`MultiMap`]. See
    /// [`Engine::root_table`] for the creation/recovery contract.
    pub fn root_multimap(&mut self) -> Result<MultiMap, AllocError> {
        let offset = self.root_offset();
        if offset == 0 {
            let mm = MultiMap::create(self)?;
            self.set_root_offset(mm.header_offset());
            Ok(mm)
        } else {
            Ok(MultiMap::from_offset(offset))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_anon_then_sync_is_a_noop() {
        let engine = Engine::create_anon(4096).unwrap();
        engine.sync().unwrap();
    }

    #[test]
    fn create_and_reopen_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.db");
        {
            let mut engine = Engine::create(&path).unwrap();
            let mut table = engine.root_table(8).unwrap();
            table.insert_str(&mut engine, b"k", &42u64.to_le_bytes()).unwrap();
            engine.close().unwrap();
        }
        let mut engine = Engine::create(&path).unwrap();
        let table = engine.root_table(8).unwrap();
        assert_eq!(table.lookup(&engine, b"k"), Some(42u64.to_le_bytes().to_vec()));
    }

    #[test]
    fn root_offset_survives_reopen_without_recreating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root.db");
        let first_offset = {
            let mut engine = Engine::create(&path).unwrap();
            let table = engine.root_table(8).unwrap();
            engine.close().unwrap();
            table.header_offset()
        };
        let mut engine = Engine::create(&path).unwrap();
        let table = engine.root_table(8).unwrap();
        assert_eq!(table.header_offset(), first_offset);
    }
}
