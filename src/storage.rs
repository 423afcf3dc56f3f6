use std::fs::File;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

use crate::AllocError;

enum Backing {
    File(File),
    Anon,
}

/// Owns the file descriptor (if any) and the live memory map.
///
/// `map` is always exactly `len()` bytes, read/write, shared with the
/// backing file when there is one. Every accessor hands out a borrow tied to
/// `&self`/`&mut self`, so the borrow checker forbids holding a slice across
/// a call that might [`grow`](Storage::grow) the mapping and move it.
pub(crate) struct Storage {
    backing: Backing,
    map: MmapMut,
}

impl Storage {
    /// Open or create `path`, ensuring it is at least `initial_bytes` long and
    /// mapping exactly that many bytes. Returns whether the file was freshly
    /// created (empty) so the caller can decide whether to initialize the
    /// allocator header.
    pub fn open(path: impl AsRef<Path>, initial_bytes: u64) -> Result<(Self, bool), AllocError> {
        use fs4::fs_std::FileExt;

        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(AllocError::Open)?;
        file.try_lock_exclusive().map_err(AllocError::Lock)?;

        if page_size::get() == 0 {
            return Err(AllocError::Other("host page size reported as zero"));
        }
        debug_assert!(
            page_size::get().is_power_of_two(),
            "host page size must be a power of two"
        );

        let current_len = file.metadata().map_err(AllocError::Open)?.len();
        let is_fresh = current_len == 0;
        let target_len = current_len.max(initial_bytes);
        if target_len != current_len {
            file.set_len(target_len).map_err(|e| AllocError::ResizeFailed {
                size: current_len,
                requested: target_len,
                source: e,
            })?;
        }

        let map = unsafe {
            MmapOptions::new()
                .len(target_len as usize)
                .map_mut(&file)
                .map_err(|e| AllocError::AllocFailed {
                    requested: target_len,
                    source: e,
                })?
        };

        Ok((
            Self {
                backing: Backing::File(file),
                map,
            },
            is_fresh,
        ))
    }

    /// Create a fresh anonymous (file-less) mapping of `initial_bytes`, for
    /// fast in-process use (scratch space, unit tests).
    pub fn create_anon(initial_bytes: u64) -> Result<Self, AllocError> {
        let map = MmapOptions::new()
            .len(initial_bytes as usize)
            .map_anon()
            .map_err(|e| AllocError::AllocFailed {
                requested: initial_bytes,
                source: e,
            })?;
        Ok(Self {
            backing: Backing::Anon,
            map,
        })
    }

    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Flush dirty pages to the underlying file. A no-op for anonymous maps.
    pub fn sync(&self) -> Result<(), AllocError> {
        if matches!(self.backing, Backing::Anon) {
            return Ok(());
        }
        self.map.flush().map_err(AllocError::Sync)
    }

    /// Grow the mapping to `new_bytes`.
    ///
    /// For a file-backed store this flushes, unmaps, extends the file, and
    /// re-maps — the new base address may differ from the old one. For an
    /// anonymous store (no file to truncate) a new, larger anonymous mapping
    /// is allocated and the live bytes are copied over.
    pub fn grow(&mut self, new_bytes: u64) -> Result<(), AllocError> {
        match &self.backing {
            Backing::File(file) => {
                self.map.flush().map_err(AllocError::Sync)?;
                let old_len = self.map.len() as u64;
                file.set_len(new_bytes).map_err(|e| AllocError::ResizeFailed {
                    size: old_len,
                    requested: new_bytes,
                    source: e,
                })?;
                let map = unsafe {
                    MmapOptions::new()
                        .len(new_bytes as usize)
                        .map_mut(file)
                        .map_err(|e| AllocError::AllocFailed {
                            requested: new_bytes,
                            source: e,
                        })?
                };
                self.map = map;
                Ok(())
            }
            Backing::Anon => {
                let mut new_map =
                    MmapOptions::new()
                        .len(new_bytes as usize)
                        .map_anon()
                        .map_err(|e| AllocError::AllocFailed {
                            requested: new_bytes,
                            source: e,
                        })?;
                new_map[..self.map.len()].copy_from_slice(&self.map);
                self.map = new_map;
                Ok(())
            }
        }
    }

    /// Sync, then unmap and close the descriptor.
    pub fn close(self) -> Result<(), AllocError> {
        self.sync()
    }

    /// Unmap and close without syncing.
    pub fn abandon(self) {}
}
