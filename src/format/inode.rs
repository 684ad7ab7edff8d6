//! Inode codec.
//!
//! An inode is a fixed 128-byte record, optionally extended by `inode_size - 128` additional
//! bytes when the superblock's `inode_size` exceeds 128 (always the case on ext4, never on
//! classic ext2). The extension carries nanosecond timestamp fields and, when there is still
//! room left over, inline extended attributes.

use crate::codec::{self, Timestamp};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeNumber(pub(crate) u32);

impl InodeNumber {
    pub const ROOT_DIR: Self = Self(2);

    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for InodeNumber {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    SymbolicLink,
}

const S_IFIFO: u16 = 0x1000;
const S_IFCHR: u16 = 0x2000;
const S_IFDIR: u16 = 0x4000;
const S_IFBLK: u16 = 0x6000;
const S_IFREG: u16 = 0x8000;
const S_IFLNK: u16 = 0xA000;
const S_IFSOCK: u16 = 0xC000;
const S_IFMT: u16 = 0xF000;

impl FileType {
    fn from_mode(mode: u16) -> Result<Self> {
        Ok(match mode & S_IFMT {
            S_IFIFO => FileType::Fifo,
            S_IFCHR => FileType::CharDevice,
            S_IFDIR => FileType::Directory,
            S_IFBLK => FileType::BlockDevice,
            S_IFREG => FileType::Regular,
            S_IFLNK => FileType::SymbolicLink,
            S_IFSOCK => FileType::Socket,
            other => return Err(Error::corrupt(format!("unrecognized inode mode bits {other:#06x}"))),
        })
    }
}

/// Inode flag bits relevant to this crate; the rest (append-only, immutable, compression, ...)
/// are exposed verbatim via [`Inode::flags`] but not interpreted.
pub(crate) mod flags {
    pub(crate) const EXTENTS: u32 = 0x0008_0000;
    pub(crate) const INLINE_DATA: u32 = 0x1000_0000;
}

#[derive(Clone, Debug)]
pub(crate) struct Inode {
    pub(crate) number: InodeNumber,
    pub(crate) mode: u16,
    pub(crate) uid_lo: u16,
    pub(crate) uid_hi: u16,
    pub(crate) gid_lo: u16,
    pub(crate) gid_hi: u16,
    pub(crate) links_count: u16,
    size_lo: u32,
    size_hi: u32,
    pub(crate) flags: u32,
    pub(crate) block: [u8; 60],
    pub(crate) file_acl_lo: u32,
    file_acl_hi: u32,
    atime: u32,
    ctime: u32,
    mtime: u32,
    crtime: u32,
    atime_extra: u32,
    ctime_extra: u32,
    mtime_extra: u32,
    crtime_extra: u32,
    pub(crate) extra_isize: u16,
    has_crtime: bool,
    pub(crate) raw: Vec<u8>,
}

impl Inode {
    /// Decodes an inode from a buffer at least `inode_size` bytes long. `raw` is retained in
    /// full so callers that need the inline-data/inline-xattr region past byte 128 (i_block,
    /// then any bytes after the fixed 128-byte body up to `extra_isize`) can re-slice it.
    pub(crate) fn parse(number: InodeNumber, buf: &[u8]) -> Result<Self> {
        if buf.len() < 128 {
            return Err(Error::corrupt("inode buffer shorter than 128 bytes"));
        }

        let extra_isize = if buf.len() > 128 {
            codec::le16(buf, 128)
        } else {
            0
        };

        let has_extra = |field_end: usize| buf.len() >= field_end && extra_isize as usize + 128 >= field_end;
        let has_crtime = has_extra(148);

        let mut block = [0u8; 60];
        block.copy_from_slice(&buf[40..100]);

        Ok(Self {
            number,
            mode: codec::le16(buf, 0),
            uid_lo: codec::le16(buf, 2),
            size_lo: codec::le32(buf, 4),
            atime: codec::le32(buf, 8),
            ctime: codec::le32(buf, 12),
            mtime: codec::le32(buf, 16),
            gid_lo: codec::le16(buf, 24),
            links_count: codec::le16(buf, 26),
            flags: codec::le32(buf, 32),
            block,
            file_acl_lo: codec::le32(buf, 104),
            size_hi: codec::le32(buf, 108),
            uid_hi: codec::le16(buf, 120),
            gid_hi: codec::le16(buf, 122),
            file_acl_hi: if buf.len() >= 120 { codec::le16(buf, 118) as u32 } else { 0 },
            extra_isize,
            ctime_extra: if has_extra(136) { codec::le32(buf, 132) } else { 0 },
            mtime_extra: if has_extra(140) { codec::le32(buf, 136) } else { 0 },
            atime_extra: if has_extra(144) { codec::le32(buf, 140) } else { 0 },
            crtime: if has_crtime { codec::le32(buf, 144) } else { 0 },
            crtime_extra: if has_extra(152) { codec::le32(buf, 148) } else { 0 },
            has_crtime,
            raw: buf.to_vec(),
        })
    }

    /// An inode record that is entirely zero bytes denotes a free/never-used table slot.
    pub(crate) fn is_empty(buf: &[u8]) -> bool {
        buf.iter().all(|&b| b == 0)
    }

    pub(crate) fn file_type(&self) -> Result<FileType> {
        FileType::from_mode(self.mode)
    }

    pub(crate) fn permissions(&self) -> u16 {
        self.mode & 0x0FFF
    }

    pub(crate) fn uid(&self) -> u32 {
        u32::from(self.uid_lo) | (u32::from(self.uid_hi) << 16)
    }

    pub(crate) fn gid(&self) -> u32 {
        u32::from(self.gid_lo) | (u32::from(self.gid_hi) << 16)
    }

    pub(crate) fn size(&self, feature_large_file: bool) -> u64 {
        if feature_large_file {
            codec::lo_hi32_32(self.size_lo, self.size_hi)
        } else {
            u64::from(self.size_lo)
        }
    }

    /// The low 32 bits of the size field alone, ignoring the large-file feature. Directories and
    /// symbolic links never use the high half regardless of what the superblock enables.
    pub(crate) fn size_low(&self) -> u64 {
        u64::from(self.size_lo)
    }

    pub(crate) fn xattr_block(&self) -> u64 {
        codec::lo_hi32_32(self.file_acl_lo, self.file_acl_hi)
    }

    pub(crate) fn has_flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    pub(crate) fn access_time(&self) -> Timestamp {
        Timestamp::from_seconds_and_extra(self.atime, self.atime_extra)
    }

    pub(crate) fn change_time(&self) -> Timestamp {
        Timestamp::from_seconds_and_extra(self.ctime, self.ctime_extra)
    }

    pub(crate) fn modification_time(&self) -> Timestamp {
        Timestamp::from_seconds_and_extra(self.mtime, self.mtime_extra)
    }

    pub(crate) fn creation_time(&self) -> Option<Timestamp> {
        if self.has_crtime {
            Some(Timestamp::from_seconds_and_extra(self.crtime, self.crtime_extra))
        } else {
            None
        }
    }

    /// Bytes available for inline extended attributes past the fixed+extra body, used by the
    /// inline-EA parser. Empty when the inode is too small to carry any.
    pub(crate) fn inline_xattr_region(&self) -> &[u8] {
        let start = 128 + self.extra_isize as usize;
        if start >= self.raw.len() {
            &[]
        } else {
            &self.raw[start..]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_basic_inode(mode: u16, size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 160];
        buf[0..2].copy_from_slice(&mode.to_le_bytes());
        buf[4..8].copy_from_slice(&size.to_le_bytes());
        buf[26..28].copy_from_slice(&1u16.to_le_bytes());
        buf
    }

    #[test]
    fn parses_regular_file_inode() {
        let buf = encode_basic_inode(S_IFREG | 0o644, 4096);
        let inode = Inode::parse(InodeNumber(12), &buf).unwrap();
        assert_eq!(inode.file_type().unwrap(), FileType::Regular);
        assert_eq!(inode.permissions(), 0o644);
        assert_eq!(inode.size(false), 4096);
    }

    #[test]
    fn detects_empty_inode_slot() {
        let buf = vec![0u8; 128];
        assert!(Inode::is_empty(&buf));
    }

    #[test]
    fn rejects_unrecognized_mode_bits() {
        let buf = encode_basic_inode(0x0000, 0);
        let inode = Inode::parse(InodeNumber(5), &buf).unwrap();
        assert!(inode.file_type().is_err());
    }

    #[test]
    fn decodes_file_acl_high_from_offset_118() {
        let mut buf = encode_basic_inode(S_IFREG | 0o644, 0);
        buf[116..118].copy_from_slice(&0xBEEFu16.to_le_bytes()); // l_i_blocks_high, must be ignored
        buf[118..120].copy_from_slice(&0x0001u16.to_le_bytes()); // l_i_file_acl_high
        let inode = Inode::parse(InodeNumber(12), &buf).unwrap();
        assert_eq!(inode.xattr_block() >> 32, 1);
    }

    #[test]
    fn creation_time_absent_when_inode_too_small_for_crtime() {
        let mut buf = encode_basic_inode(S_IFREG | 0o644, 0);
        buf[128..130].copy_from_slice(&12u16.to_le_bytes()); // extra_isize, too small to reach i_crtime (148)
        buf[144..148].copy_from_slice(&1_600_000_000u32.to_le_bytes()); // must be ignored
        let inode = Inode::parse(InodeNumber(12), &buf).unwrap();
        assert!(inode.creation_time().is_none());
    }

    #[test]
    fn creation_time_present_when_extra_isize_covers_crtime() {
        let mut buf = encode_basic_inode(S_IFREG | 0o644, 0);
        buf[128..130].copy_from_slice(&20u16.to_le_bytes()); // extra_isize, reaches i_crtime (148)
        buf[144..148].copy_from_slice(&1_600_000_000u32.to_le_bytes());
        let inode = Inode::parse(InodeNumber(12), &buf).unwrap();
        assert_eq!(inode.creation_time().unwrap().epoch_seconds(), 1_600_000_000);
    }
}
