//! Outbound port for the slab allocator.

use crate::domain::errors::AllocatorError;

/// A growable byte buffer the slab allocator can address directly.
///
/// Implementations back this with a memory-mapped file in production and
/// an in-memory `Vec<u8>` in tests; the allocator only ever deals with
/// byte offsets and slices, never with the underlying storage mechanism.
pub trait BackingFile {
    /// Current length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Grows (never shrinks) the buffer to at least `new_len` bytes.
    fn resize(&mut self, new_len: u64) -> Result<(), AllocatorError>;

    fn as_slice(&self) -> &[u8];

    fn as_mut_slice(&mut self) -> &mut [u8];

    /// Flushes any buffered writes to durable storage.
    fn flush(&mut self) -> Result<(), AllocatorError>;
}
