//! A table of tables (§4.4): each outer key maps to its own nested
//! [`Table`], used as a set of value strings.

use byteorder::{ByteOrder, LittleEndian};

use crate::hash::Table;
use crate::{AllocError, Engine};

/// One key to many values, backed by an outer [`Table`] whose payload for
/// each key is the offset of a per-key nested [`Table`] of zero-width
/// values (a set).
pub struct MultiMap {
    outer: Table,
}

impl MultiMap {
    pub(crate) fn create(engine: &mut Engine) -> Result<Self, AllocError> {
        let outer = Table::create(engine, 8)?;
        Ok(Self { outer })
    }

    /// Reopen a handle to a multi-map whose outer table header lives at
    /// `header_offset`, e.g. one recovered from a file's persisted root
    /// offset.
    pub(crate) fn from_offset(header_offset: u64) -> Self {
        Self {
            outer: Table::from_offset(header_offset),
        }
    }

    /// The offset of this multi-map's outer table header, suitable for
    /// storing as a file's root structure.
    pub(crate) fn header_offset(&self) -> u64 {
        self.outer.header_offset()
    }

    fn nested_table_for(&self, engine: &Engine, key: &[u8]) -> Option<Table> {
        let index = self.outer.index_of(engine, key)?;
        let raw = self.outer.value_at(engine, index);
        let offset = LittleEndian::read_u64(&raw);
        Some(Table::from_offset(offset))
    }

    /// Add `value` to the set associated with `key`, creating the set if
    /// this is the first value seen for `key`. Inserting the same value
    /// twice for the same key is a no-op (spec S5).
    pub fn insert(&mut self, engine: &mut Engine, key: &[u8], value: &[u8]) -> Result<(), AllocError> {
        match self.nested_table_for(engine, key) {
            Some(mut nested) => {
                nested.insert_str(engine, value, &[])?;
            }
            None => {
                let mut nested = Table::create(engine, 0)?;
                nested.insert_str(engine, value, &[])?;
                let mut payload = [0u8; 8];
                LittleEndian::write_u64(&mut payload, nested.header_offset());
                self.outer.insert_str(engine, key, &payload)?;
            }
        }
        Ok(())
    }

    /// All values currently associated with `key`, in no particular order.
    /// Empty if `key` has never been inserted.
    pub fn values_of(&self, engine: &Engine, key: &[u8]) -> Vec<Vec<u8>> {
        match self.nested_table_for(engine, key) {
            Some(nested) => nested.iterate(engine).into_iter().map(|(value, _)| value).collect(),
            None => Vec::new(),
        }
    }

    /// All outer keys that have at least one associated value.
    pub fn iterate_keys(&self, engine: &Engine) -> Vec<Vec<u8>> {
        self.outer.iterate(engine).into_iter().map(|(key, _)| key).collect()
    }
}
