//! A memory-mapped backing file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use tracing::debug;
use memmap2::MmapMut;

use crate::domain::errors::AllocatorError;
use crate::ports::outbound::BackingFile;

/// A growable file mapped into memory with [`memmap2::MmapMut`].
///
/// Growing re-maps the file, since `memmap2` has no in-place grow: the
/// file is extended with `set_len` and the mapping is rebuilt over it.
pub struct MmapFile {
    file: File,
    mmap: MmapMut,
}

impl MmapFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AllocatorError> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        let len = file.metadata()?.len().max(1);
        file.set_len(len)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(MmapFile { file, mmap })
    }
}

impl BackingFile for MmapFile {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn resize(&mut self, new_len: u64) -> Result<(), AllocatorError> {
        if new_len <= self.len() {
            return Ok(());
        }
        self.file.set_len(new_len).map_err(|source| AllocatorError::GrowFailed { requested: new_len, source })?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        debug!("mmap file grown to {new_len} bytes");
        Ok(())
    }

    fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.mmap
    }

    fn flush(&mut self) -> Result<(), AllocatorError> {
        self.mmap.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::slab::SlabAllocator;

    #[test]
    fn grow_write_reopen_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slab.dat");

        {
            let file = MmapFile::open(&path).unwrap();
            let mut slab = SlabAllocator::new(file);
            slab.create().unwrap();
            let position = slab.allocate(16).unwrap();
            slab.get_mut(position).unwrap()[0] = 0xAB;
            slab.sync().unwrap();
        }

        let file = MmapFile::open(&path).unwrap();
        let mut slab = SlabAllocator::new(file);
        slab.start().unwrap();
        assert_eq!(slab.get(0).unwrap()[0], 0xAB);
    }
}
