//! An in-memory backing file, for tests that don't need a real mmap.

use crate::domain::errors::AllocatorError;
use crate::ports::outbound::BackingFile;

#[derive(Debug, Default)]
pub struct MemoryFile {
    buf: Vec<u8>,
}

impl MemoryFile {
    pub fn new() -> Self {
        MemoryFile { buf: Vec::new() }
    }
}

impl BackingFile for MemoryFile {
    fn len(&self) -> u64 {
        self.buf.len() as u64
    }

    fn resize(&mut self, new_len: u64) -> Result<(), AllocatorError> {
        self.buf.resize(new_len as usize, 0);
        Ok(())
    }

    fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    fn flush(&mut self) -> Result<(), AllocatorError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_zero_fills_new_bytes() {
        let mut f = MemoryFile::new();
        f.resize(4).unwrap();
        f.as_mut_slice()[0] = 0xFF;
        f.resize(8).unwrap();
        assert_eq!(f.as_slice(), &[0xFF, 0, 0, 0, 0, 0, 0, 0]);
    }
}
