//! Lazy, seekable byte stream over a file's data, whatever block-mapping scheme backs it.
//!
//! Construction picks one of three backing representations, mirroring how the reference
//! implementation dispatches: inline data stored directly in the inode wins when present,
//! otherwise the extent tree is used on volumes that support it, otherwise the classic indirect
//! block map. Reads never materialize the whole file; a sparse logical block (a hole in the
//! extent map, or a zero pointer in the indirect map) is zero-filled without touching the
//! underlying source.

use std::sync::Arc;

use crate::abort::AbortFlag;
use crate::byte_source::ByteSource;
use crate::error::Result;
use crate::format::extent::{self, Extent};
use crate::format::indirect::IndirectMap;

enum Mapping {
    Inline(Vec<u8>),
    Extents(Vec<Extent>),
    Indirect([u8; 60]),
}

pub struct BlockStream {
    source: Arc<ByteSource>,
    block_size: u64,
    size: u64,
    mapping: Mapping,
    abort: Arc<AbortFlag>,
    cursor: u64,
}

impl BlockStream {
    pub(crate) fn from_inline(data: Vec<u8>, abort: Arc<AbortFlag>) -> Self {
        let size = data.len() as u64;
        Self {
            source: Arc::new(ByteSource::new(Box::new(std::io::Cursor::new(Vec::new())), 0)),
            block_size: 1,
            size,
            mapping: Mapping::Inline(data),
            abort,
            cursor: 0,
        }
    }

    pub(crate) fn from_extents(
        source: Arc<ByteSource>,
        block_size: u64,
        size: u64,
        extents: Vec<Extent>,
        abort: Arc<AbortFlag>,
    ) -> Self {
        Self {
            source,
            block_size,
            size,
            mapping: Mapping::Extents(extents),
            abort,
            cursor: 0,
        }
    }

    pub(crate) fn from_indirect(
        source: Arc<ByteSource>,
        block_size: u64,
        size: u64,
        i_block: [u8; 60],
        abort: Arc<AbortFlag>,
    ) -> Self {
        Self {
            source,
            block_size,
            size,
            mapping: Mapping::Indirect(i_block),
            abort,
            cursor: 0,
        }
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn position(&self) -> u64 {
        self.cursor
    }

    pub fn seek(&mut self, position: u64) {
        self.cursor = position.min(self.size);
    }

    /// Returns the flattened extent list backing this stream, or `None` when the file uses
    /// inline data or the classic indirect map rather than the extent tree.
    pub(crate) fn extents(&self) -> Option<&[Extent]> {
        match &self.mapping {
            Mapping::Extents(e) => Some(e),
            _ => None,
        }
    }

    /// Reads into `buf` starting at the stream's current position, advancing it by the number of
    /// bytes read. Returns fewer bytes than `buf.len()` only at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.read_at(self.cursor, buf)?;
        self.cursor += n as u64;
        Ok(n)
    }

    /// Reads into `buf` starting at an absolute file offset, without disturbing the stream's
    /// cursor.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.abort.check()?;

        if offset >= self.size {
            return Ok(0);
        }
        let want = (buf.len() as u64).min(self.size - offset) as usize;
        let buf = &mut buf[..want];

        match &self.mapping {
            Mapping::Inline(data) => {
                buf.copy_from_slice(&data[offset as usize..offset as usize + want]);
                Ok(want)
            }
            Mapping::Extents(extents) => self.read_mapped(offset, buf, |logical| {
                extent::resolve(extents, logical)
            }),
            Mapping::Indirect(i_block) => {
                let map = IndirectMap::new(&self.source, self.block_size, i_block);
                self.read_mapped(offset, buf, |logical| {
                    map.resolve(logical, &self.abort).unwrap_or(None)
                })
            }
        }
    }

    fn read_mapped(
        &self,
        offset: u64,
        buf: &mut [u8],
        resolve: impl Fn(u32) -> Option<u64>,
    ) -> Result<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            self.abort.check()?;

            let abs = offset + done as u64;
            let logical_block = (abs / self.block_size) as u32;
            let in_block_offset = (abs % self.block_size) as usize;
            let chunk = (self.block_size as usize - in_block_offset).min(buf.len() - done);

            match resolve(logical_block) {
                Some(physical) => {
                    let byte_offset = physical * self.block_size + in_block_offset as u64;
                    self.source
                        .read_exact_at(byte_offset, &mut buf[done..done + chunk])?;
                }
                None => {
                    buf[done..done + chunk].fill(0);
                }
            }
            done += chunk;
        }
        Ok(done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn inline_stream_reads_whole_buffer() {
        let abort = Arc::new(AbortFlag::new());
        let mut stream = BlockStream::from_inline(b"hello".to_vec(), abort);
        let mut buf = [0u8; 5];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn extent_stream_zero_fills_sparse_holes() {
        let block_size = 1024u64;
        let mut disk = vec![0u8; 4096];
        disk[1024..1028].copy_from_slice(b"DATA");
        let source = Arc::new(ByteSource::new(Box::new(Cursor::new(disk)), 0));
        let extents = vec![Extent {
            logical_block: 2,
            length: 1,
            physical_block: 1,
        }];
        let abort = Arc::new(AbortFlag::new());
        let mut stream = BlockStream::from_extents(source, block_size, block_size * 3, extents, abort);

        let mut buf = vec![0u8; block_size as usize];
        stream.seek(0);
        assert_eq!(stream.read(&mut buf).unwrap(), buf.len());
        assert!(buf.iter().all(|&b| b == 0));

        stream.seek(block_size * 2);
        let mut buf2 = [0u8; 4];
        stream.read(&mut buf2).unwrap();
        assert_eq!(&buf2, b"DATA");
    }
}
