//! Byte-addressed bump allocator over a growable backing file.
//!
//! Layout: an 8-byte little-endian size header followed by payload bytes.
//! `size` tracks the absolute offset one past the last byte handed out —
//! it starts at 8 (right after the header) rather than 0, so `allocate`'s
//! returned position (`size - 8`) lands the first record at payload offset
//! zero while `size` itself stays a single cursor usable directly against
//! file-absolute addressing in [`to_eof`](SlabAllocator::to_eof).

use tracing::{debug, trace};

use crate::domain::errors::AllocatorError;
use crate::ports::outbound::BackingFile;

const HEADER_LEN: u64 = 8;

/// A bump allocator backed by a [`BackingFile`] (typically a memory-mapped file).
pub struct SlabAllocator<F> {
    file: F,
    size: u64,
    started: bool,
}

impl<F: BackingFile> SlabAllocator<F> {
    pub fn new(file: F) -> Self {
        SlabAllocator { file, size: 0, started: false }
    }

    /// Initializes a fresh backing file: header present, no payload.
    pub fn create(&mut self) -> Result<(), AllocatorError> {
        self.file.resize(HEADER_LEN)?;
        self.size = HEADER_LEN;
        self.write_header();
        self.started = true;
        debug!("slab allocator created");
        Ok(())
    }

    /// Resumes against an existing backing file, reading `size` from its header.
    pub fn start(&mut self) -> Result<(), AllocatorError> {
        if self.file.len() < HEADER_LEN {
            return Err(AllocatorError::OutOfBounds { position: 0, size: self.file.len() });
        }
        self.size = self.read_header();
        self.started = true;
        debug!("slab allocator started, size={}", self.size);
        Ok(())
    }

    fn read_header(&self) -> u64 {
        let bytes = &self.file.as_slice()[0..HEADER_LEN as usize];
        u64::from_le_bytes(bytes.try_into().expect("header slice is 8 bytes"))
    }

    fn write_header(&mut self) {
        let bytes = self.size.to_le_bytes();
        self.file.as_mut_slice()[0..HEADER_LEN as usize].copy_from_slice(&bytes);
    }

    fn ensure_started(&self) -> Result<(), AllocatorError> {
        if self.started {
            Ok(())
        } else {
            Err(AllocatorError::NotStarted)
        }
    }

    /// Reserves `n` bytes, growing the backing file if needed, and returns
    /// the payload-relative offset of the new region.
    pub fn allocate(&mut self, n: u64) -> Result<u64, AllocatorError> {
        self.ensure_started()?;
        let position = self.size - HEADER_LEN;
        let required_len = self.size + n;
        if required_len > self.file.len() {
            self.file.resize(required_len)?;
        }
        self.size += n;
        trace!("slab allocate: n={n} position={position} new_size={}", self.size);
        Ok(position)
    }

    /// A read-only view of the bytes from `position` to the end of used payload.
    pub fn get(&self, position: u64) -> Result<&[u8], AllocatorError> {
        self.ensure_started()?;
        let absolute = HEADER_LEN + position;
        if absolute > self.size {
            return Err(AllocatorError::OutOfBounds { position, size: self.size });
        }
        Ok(&self.file.as_slice()[absolute as usize..self.size as usize])
    }

    /// A mutable view of the bytes from `position` to the end of used payload.
    pub fn get_mut(&mut self, position: u64) -> Result<&mut [u8], AllocatorError> {
        self.ensure_started()?;
        let absolute = HEADER_LEN + position;
        let size = self.size;
        if absolute > size {
            return Err(AllocatorError::OutOfBounds { position, size });
        }
        Ok(&mut self.file.as_mut_slice()[absolute as usize..size as usize])
    }

    /// Distance from `position` to the end of used payload, or zero if out of range.
    pub fn to_eof(&self, position: u64) -> u64 {
        let absolute = HEADER_LEN + position;
        if absolute > self.size {
            0
        } else {
            self.size - absolute
        }
    }

    /// The current logical size (absolute offset past the last used byte).
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flushes the size header and the backing file.
    pub fn sync(&mut self) -> Result<(), AllocatorError> {
        self.write_header();
        self.file.flush()?;
        debug!("slab allocator synced, size={}", self.size);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_file::MemoryFile;

    #[test]
    fn create_then_allocate_lands_at_zero() {
        let mut slab = SlabAllocator::new(MemoryFile::new());
        slab.create().unwrap();
        let position = slab.allocate(80).unwrap();
        assert_eq!(position, 0);
        assert_eq!(slab.get(position).unwrap().len(), 80);
    }

    #[test]
    fn second_allocation_follows_first() {
        let mut slab = SlabAllocator::new(MemoryFile::new());
        slab.create().unwrap();
        let a = slab.allocate(10).unwrap();
        let b = slab.allocate(20).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 10);
        assert_eq!(slab.to_eof(b), 20);
    }

    #[test]
    fn sync_then_start_restores_size() {
        let mut slab = SlabAllocator::new(MemoryFile::new());
        slab.create().unwrap();
        slab.allocate(64).unwrap();
        slab.sync().unwrap();
        let size_before = slab.size();

        let mut resumed = SlabAllocator::new(slab.file);
        resumed.start().unwrap();
        assert_eq!(resumed.size(), size_before);
    }

    #[test]
    fn get_past_size_is_out_of_bounds() {
        let mut slab = SlabAllocator::new(MemoryFile::new());
        slab.create().unwrap();
        slab.allocate(8).unwrap();
        assert!(slab.get(100).is_err());
    }

    #[test]
    fn operations_before_start_fail() {
        let slab = SlabAllocator::new(MemoryFile::new());
        assert!(matches!(slab.get(0), Err(AllocatorError::NotStarted)));
    }
}
