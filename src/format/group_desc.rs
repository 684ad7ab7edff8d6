//! Block group descriptors.
//!
//! A block group is a contiguous run of blocks covered by one inode bitmap, one block bitmap
//! and a slice of the inode table. This crate only ever needs the inode table's own address to
//! resolve an inode number to a byte offset; the bitmap addresses and free-space counters the
//! descriptor also carries are outside a read-only metadata/content facade's concerns. The
//! descriptor table itself starts in the block right after the superblock's own block, and is
//! replicated alongside superblock backups on sparse_super volumes.

use crate::codec;
use crate::error::{Error, Result};
use crate::format::superblock::Superblock;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct GroupNumber(pub(crate) u32);

#[derive(Clone, Debug)]
pub(crate) struct GroupDescriptor {
    pub(crate) number: GroupNumber,
    inode_table_lo: u32,
    inode_table_hi: u32,
    checksum: u16,
    raw: Vec<u8>,
}

impl GroupDescriptor {
    pub(crate) fn parse(number: GroupNumber, buf: &[u8], descriptor_size: usize) -> Result<Self> {
        if buf.len() < descriptor_size {
            return Err(Error::corrupt("truncated group descriptor"));
        }
        let inode_table_hi = if descriptor_size >= 64 {
            codec::le32(buf, 40)
        } else {
            0
        };

        Ok(Self {
            number,
            inode_table_lo: codec::le32(buf, 8),
            inode_table_hi,
            checksum: codec::le16(buf, 30),
            raw: buf[..descriptor_size].to_vec(),
        })
    }

    pub(crate) fn inode_table_block(&self) -> u64 {
        codec::lo_hi32_32(self.inode_table_lo, self.inode_table_hi)
    }

    /// Validates the pre-`metadata_csum` group descriptor checksum (`gdt_csum`/`uninit_bg`):
    /// `crc32_weak(uuid || group_number || descriptor_with_checksum_zeroed) & 0xffff`. Volumes
    /// using `metadata_csum` instead checksum the whole group (descriptor, bitmaps, inode table)
    /// as a unit, which is outside this crate's read-only metadata/content facade.
    pub(crate) fn validate_checksum(&self, uuid: &[u8; 16]) -> bool {
        if self.checksum == 0 {
            return true;
        }
        let mut bytes = Vec::with_capacity(16 + 4 + self.raw.len());
        bytes.extend_from_slice(uuid);
        bytes.extend_from_slice(&self.number.0.to_le_bytes());
        bytes.extend_from_slice(&self.raw);
        bytes[16 + 4 + 30..16 + 4 + 32].copy_from_slice(&[0, 0]);

        let computed = (codec::crc32_weak(0xFFFF_FFFF, &bytes) & 0xFFFF) as u16;
        computed == self.checksum
    }
}

/// Computes the byte offset of the group descriptor table's first block.
///
/// The table starts in the block immediately after the superblock's own block: block 1 when the
/// block size is 1024 (superblock occupies block 0..1024, block 1 starts at byte 1024), block 0
/// otherwise (the superblock only occupies the first 1024 bytes of a larger block 0... so the
/// descriptor table starts at the following block).
pub(crate) fn descriptor_table_start_block(sb: &Superblock) -> u64 {
    if sb.block_size() == 1024 {
        2
    } else {
        1
    }
}

pub(crate) fn read_descriptor(
    source: &crate::byte_source::ByteSource,
    sb: &Superblock,
    number: GroupNumber,
) -> Result<GroupDescriptor> {
    let group_count = sb.group_count()?;
    if number.0 >= group_count {
        return Err(Error::out_of_range(format!(
            "group {} out of range (volume has {group_count} groups)",
            number.0
        )));
    }

    let descriptor_size = sb.group_descriptor_size();
    let start_block = descriptor_table_start_block(sb);
    let byte_offset =
        start_block * sb.block_size() + u64::from(number.0) * descriptor_size as u64;

    let mut buf = vec![0u8; descriptor_size];
    source.read_exact_at(byte_offset, &mut buf)?;

    let descriptor = GroupDescriptor::parse(number, &buf, descriptor_size)?;
    if !sb.has_metadata_csum() && !descriptor.validate_checksum(sb.uuid.as_bytes()) {
        log::warn!("group {} descriptor checksum does not match, continuing anyway", number.0);
    }
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn descriptor_table_starts_after_1k_superblock_block() {
        let mut buf = vec![0u8; 1024];
        buf[56..58].copy_from_slice(&0xEF53u16.to_le_bytes());
        buf[24..28].copy_from_slice(&0u32.to_le_bytes());
        buf[32..36].copy_from_slice(&8192u32.to_le_bytes());
        let sb = Superblock::parse(&buf).unwrap();
        assert_eq!(descriptor_table_start_block(&sb), 2);
    }

    #[test]
    fn validates_checksum_against_uuid_and_group_number() {
        let uuid: [u8; 16] = (0..16u8).collect::<Vec<_>>().try_into().unwrap();
        let mut buf = vec![0u8; 32];
        buf[8..12].copy_from_slice(&42u32.to_le_bytes());
        buf[30..32].copy_from_slice(&0x320cu16.to_le_bytes());
        let descriptor = GroupDescriptor::parse(GroupNumber(0), &buf, 32).unwrap();
        assert!(descriptor.validate_checksum(&uuid));

        buf[30..32].copy_from_slice(&0u16.to_le_bytes());
        let descriptor = GroupDescriptor::parse(GroupNumber(0), &buf, 32).unwrap();
        assert!(descriptor.validate_checksum(&uuid));
    }

    #[test]
    fn detects_mismatched_checksum() {
        let uuid: [u8; 16] = (0..16u8).collect::<Vec<_>>().try_into().unwrap();
        let mut buf = vec![0u8; 32];
        buf[8..12].copy_from_slice(&42u32.to_le_bytes());
        buf[30..32].copy_from_slice(&0xdeadu16.to_le_bytes());
        let descriptor = GroupDescriptor::parse(GroupNumber(0), &buf, 32).unwrap();
        assert!(!descriptor.validate_checksum(&uuid));
    }

    #[test]
    fn decodes_32bit_inode_table_address() {
        let mut buf = vec![0u8; 32];
        buf[8..12].copy_from_slice(&5u32.to_le_bytes());
        let descriptor = GroupDescriptor::parse(GroupNumber(0), &buf, 32).unwrap();
        assert_eq!(descriptor.inode_table_block(), 5);
    }

    #[test]
    fn reads_descriptor_for_requested_group() {
        let mut buf = vec![0u8; 1024];
        buf[56..58].copy_from_slice(&0xEF53u16.to_le_bytes());
        buf[24..28].copy_from_slice(&0u32.to_le_bytes());
        buf[32..36].copy_from_slice(&8192u32.to_le_bytes());
        buf[4..8].copy_from_slice(&8192u32.to_le_bytes());
        let sb = Superblock::parse(&buf).unwrap();

        let mut image = vec![0u8; 1024 * 4];
        image[2048 + 8..2048 + 12].copy_from_slice(&42u32.to_le_bytes());
        let source = crate::byte_source::ByteSource::new(Box::new(Cursor::new(image)), 0);

        let descriptor = read_descriptor(&source, &sb, GroupNumber(0)).unwrap();
        assert_eq!(descriptor.inode_table_block(), 42);
    }
}
