//! Directory entry parser.
//!
//! Directory contents are a sequence of variable-length records: a fixed 8-byte header (inode
//! number, record length, name length, file type) followed by the name bytes. A record's
//! `rec_len` may exceed `8 + name_len` to skip over a deleted entry's leftover space; this crate
//! treats such a gap as an implicit tombstone, not an entry. `.` and `..` are suppressed from the
//! entries this parses, since volume and path-resolution code synthesize navigation to parent
//! and self separately.

use crate::codec;
use crate::error::{Error, Result};

#[derive(Clone, Debug)]
pub(crate) struct RawDirEntry {
    pub(crate) inode_number: u32,
    pub(crate) file_type: u8,
    pub(crate) name: Vec<u8>,
}

const HEADER_SIZE: usize = 8;

/// Parses every record in one directory block (or the entirety of an inline directory's data
/// region), in on-disk order.
pub(crate) fn parse_block(buf: &[u8]) -> Result<Vec<RawDirEntry>> {
    let mut entries = Vec::new();
    let mut offset = 0usize;

    while offset + HEADER_SIZE <= buf.len() {
        let inode_number = codec::le32(buf, offset);
        let rec_len = codec::le16(buf, offset + 4) as usize;
        let name_len = buf[offset + 6] as usize;
        let file_type = buf[offset + 7];

        if rec_len < HEADER_SIZE {
            return Err(Error::corrupt(format!(
                "directory entry at offset {offset} has rec_len {rec_len} shorter than header"
            )));
        }
        if offset + rec_len > buf.len() {
            return Err(Error::corrupt(format!(
                "directory entry at offset {offset} has rec_len {rec_len} past block end"
            )));
        }
        if HEADER_SIZE + name_len > rec_len {
            return Err(Error::corrupt(format!(
                "directory entry at offset {offset} has name_len {name_len} overflowing rec_len {rec_len}"
            )));
        }

        if inode_number != 0 {
            let name = &buf[offset + HEADER_SIZE..offset + HEADER_SIZE + name_len];
            if name != b"." && name != b".." {
                entries.push(RawDirEntry {
                    inode_number,
                    file_type,
                    name: name.to_vec(),
                });
            }
        }

        offset += rec_len;
    }

    Ok(entries)
}

/// Parses an inline directory's data region (stored directly in the inode / inline-xattr area
/// rather than in a block). The first four bytes hold the parent inode number in the same
/// layout as a conventional `..` entry's header, but this crate only needs the remaining
/// records since `.`/`..` are synthesized elsewhere.
pub(crate) fn parse_inline(buf: &[u8]) -> Result<Vec<RawDirEntry>> {
    if buf.len() < 4 {
        return Ok(Vec::new());
    }
    parse_block(&buf[4..])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirFileType {
    Unknown,
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    SymbolicLink,
}

impl From<u8> for DirFileType {
    fn from(value: u8) -> Self {
        match value {
            1 => DirFileType::Regular,
            2 => DirFileType::Directory,
            3 => DirFileType::CharDevice,
            4 => DirFileType::BlockDevice,
            5 => DirFileType::Fifo,
            6 => DirFileType::Socket,
            7 => DirFileType::SymbolicLink,
            _ => DirFileType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_entry(inode: u32, name: &[u8], rec_len: u16, file_type: u8) -> Vec<u8> {
        let mut buf = vec![0u8; rec_len as usize];
        buf[0..4].copy_from_slice(&inode.to_le_bytes());
        buf[4..6].copy_from_slice(&rec_len.to_le_bytes());
        buf[6] = name.len() as u8;
        buf[7] = file_type;
        buf[8..8 + name.len()].copy_from_slice(name);
        buf
    }

    #[test]
    fn parses_entries_and_skips_dot_entries() {
        let mut block = Vec::new();
        block.extend(encode_entry(2, b".", 12, 2));
        block.extend(encode_entry(2, b"..", 12, 2));
        block.extend(encode_entry(12, b"hello.txt", 4084, 1));

        let entries = parse_block(&block).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].inode_number, 12);
        assert_eq!(entries[0].name, b"hello.txt");
        assert_eq!(DirFileType::from(entries[0].file_type), DirFileType::Regular);
    }

    #[test]
    fn rejects_rec_len_overflowing_block() {
        let block = encode_entry(2, b"x", 5000, 1);
        assert!(parse_block(&block).is_err());
    }

    #[test]
    fn parses_inline_directory_skipping_parent_header() {
        let mut block = vec![0u8; 4];
        block.extend(encode_entry(12, b"a", 4092, 1));
        let entries = parse_inline(&block).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, b"a");
    }
}
