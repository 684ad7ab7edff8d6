//! Positioned reads over a seekable byte source.
//!
//! Every structure above this layer addresses the volume by absolute byte offset from the
//! volume's own start; [`ByteSource`] translates that into `base_offset + offset` against
//! whatever the caller opened (a whole disk image, or a partition carved out of a larger one).
//! The underlying reader is shared by every file entry of a volume, so reads take a mutex for
//! the duration of the seek-then-read pair: to another thread the operation must appear atomic.

use std::io::{Read, Seek, SeekFrom};

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Anything this crate can read a volume out of: a file, an in-memory buffer, a block device.
pub trait Source: Read + Seek + Send {}
impl<T: Read + Seek + Send> Source for T {}

pub(crate) struct ByteSource {
    inner: Mutex<Box<dyn Source>>,
    base_offset: u64,
}

impl ByteSource {
    pub(crate) fn new(source: Box<dyn Source>, base_offset: u64) -> Self {
        Self {
            inner: Mutex::new(source),
            base_offset,
        }
    }

    /// Returns the total length of the underlying source, in bytes (not relative to
    /// `base_offset`).
    pub(crate) fn total_len(&self) -> Result<u64> {
        let mut guard = self.inner.lock();
        let current = guard.stream_position()?;
        let len = guard.seek(SeekFrom::End(0))?;
        guard.seek(SeekFrom::Start(current))?;
        Ok(len)
    }

    /// Reads exactly `buf.len()` bytes starting at `offset` (relative to the volume's start).
    /// A short read is reported as [`Error::IoFailure`]; every caller in this crate asks for a
    /// precisely-sized, fully populated buffer.
    pub(crate) fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let absolute = self
            .base_offset
            .checked_add(offset)
            .ok_or_else(|| Error::out_of_range("byte offset overflows source"))?;

        let mut guard = self.inner.lock();
        guard.seek(SeekFrom::Start(absolute))?;
        guard.read_exact(buf)?;
        Ok(())
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSource")
            .field("base_offset", &self.base_offset)
            .finish_non_exhaustive()
    }
}
