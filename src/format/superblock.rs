//! Superblock: the 1024-byte structure describing a volume's geometry and feature set.
//!
//! A copy is kept in every block group unless the sparse_super feature restricts backups to
//! group 0 and powers of 3, 5, 7. This crate only ever decodes the primary copy at byte offset
//! 1024 relative to the volume start.

use uuid::Uuid;

use crate::codec::{self, Timestamp};
use crate::error::{Error, Result};

/// Defines a flag-set newtype over an integer field, with set-algebra helpers.
macro_rules! flag_field {
    ($struct_name:ident, $repr:ty) => {
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub(crate) struct $struct_name(pub(crate) $repr);

        impl $struct_name {
            pub(crate) fn includes(self, bits: $repr) -> bool {
                self.0 & bits == bits
            }

            pub(crate) fn any(self, bits: $repr) -> bool {
                self.0 & bits != 0
            }
        }
    };
}

flag_field!(CompatibleFeatures, u32);

impl CompatibleFeatures {
    pub(crate) const HAS_JOURNAL: u32 = 0x0004;
}

flag_field!(ReadOnlyCompatibleFeatures, u32);

impl ReadOnlyCompatibleFeatures {
    pub(crate) const LARGE_FILE: u32 = 0x0002;
    pub(crate) const METADATA_CSUM: u32 = 0x0400;
}

flag_field!(IncompatibleFeatures, u32);

impl IncompatibleFeatures {
    pub(crate) const FILETYPE: u32 = 0x0002;
    pub(crate) const EXTENTS: u32 = 0x0040;
    pub(crate) const SIXTY_FOUR_BIT: u32 = 0x0080;
    pub(crate) const INLINE_DATA: u32 = 0x8000;

    /// Every incompatible flag this crate understands. A bit set outside this mask on a real
    /// volume means the crate cannot safely interpret on-disk layout and open() must refuse it.
    /// Covers, beyond the named flags above: RECOVER (0x0004), META_BG (0x0010), FLEX_BG (0x0200),
    /// EA_INODE (0x0400), CSUM_SEED (0x2000), ENCRYPT (0x10000), CASEFOLD (0x20000), plus the
    /// directory-entry checksum tail flags (0x0001, 0x0008, 0x0100, 0x1000), all accepted since
    /// none of them change how this crate walks the structures it reads.
    const KNOWN: u32 = 0x0002
        | 0x0004
        | 0x0010
        | 0x0040
        | 0x0080
        | 0x0200
        | 0x0400
        | 0x2000
        | 0x8000
        | 0x10000
        | 0x20000
        | 0x0001
        | 0x0008
        | 0x0100
        | 0x1000
        | 0x4000;
}

/// Which on-disk format generation produced the volume, derived from feature flags rather than
/// taken from a single field: ext2 has no journal, ext3 has a journal but no extent tree support,
/// ext4 can use extents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FormatVersion {
    Ext2,
    Ext3,
    Ext4,
}

#[derive(Clone, Debug)]
pub(crate) struct Superblock {
    pub(crate) inodes_count: u32,
    pub(crate) blocks_count_lo: u32,
    pub(crate) blocks_count_hi: u32,
    pub(crate) free_blocks_count_lo: u32,
    pub(crate) free_blocks_count_hi: u32,
    pub(crate) free_inodes_count: u32,
    pub(crate) first_data_block: u32,
    pub(crate) log_block_size: u32,
    pub(crate) blocks_per_group: u32,
    pub(crate) inodes_per_group: u32,
    pub(crate) mtime: u32,
    pub(crate) wtime: u32,
    pub(crate) magic: u16,
    pub(crate) state: u16,
    pub(crate) errors: u16,
    pub(crate) minor_rev_level: u16,
    pub(crate) creator_os: u32,
    pub(crate) rev_level: u32,
    pub(crate) first_ino: u32,
    pub(crate) inode_size: u16,
    pub(crate) block_group_nr: u16,
    pub(crate) feature_compat: CompatibleFeatures,
    pub(crate) feature_incompat: IncompatibleFeatures,
    pub(crate) feature_ro_compat: ReadOnlyCompatibleFeatures,
    pub(crate) uuid: Uuid,
    pub(crate) volume_name: String,
    pub(crate) last_mounted: String,
    pub(crate) journal_inum: u32,
    pub(crate) last_orphan: u32,
    pub(crate) hash_seed: [u32; 4],
    pub(crate) def_hash_version: u8,
    pub(crate) desc_size: u16,
    pub(crate) default_mount_options: u32,
    pub(crate) first_meta_bg: u32,
    pub(crate) min_extra_isize: u16,
    pub(crate) want_extra_isize: u16,
    pub(crate) flags: u32,
    pub(crate) log_groups_per_flex: u8,
    pub(crate) checksum_type: u8,
    pub(crate) checksum_seed: u32,
    pub(crate) lpf_ino: u32,
    pub(crate) checksum: u32,
}

impl Superblock {
    pub(crate) const DISK_OFFSET: u64 = 1024;
    pub(crate) const SIZE: usize = 1024;
    const MAGIC: u16 = 0xEF53;

    pub(crate) fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(Error::corrupt("superblock buffer shorter than 1024 bytes"));
        }

        let magic = codec::le16(buf, 56);
        if magic != Self::MAGIC {
            return Err(Error::corrupt(format!(
                "bad superblock magic {magic:#06x}, expected {:#06x}",
                Self::MAGIC
            )));
        }

        let feature_compat = CompatibleFeatures(codec::le32(buf, 92));
        let feature_incompat = IncompatibleFeatures(codec::le32(buf, 96));
        let feature_ro_compat = ReadOnlyCompatibleFeatures(codec::le32(buf, 100));

        if feature_incompat.0 & !IncompatibleFeatures::KNOWN != 0 {
            return Err(Error::unsupported(format!(
                "unknown incompatible feature bits {:#x}",
                feature_incompat.0 & !IncompatibleFeatures::KNOWN
            )));
        }

        let log_block_size = codec::le32(buf, 24);
        if log_block_size > 6 {
            return Err(Error::corrupt(format!(
                "implausible log_block_size {log_block_size}"
            )));
        }

        let inode_size = if codec::le32(buf, 76) == 0 {
            128
        } else {
            codec::le16(buf, 88)
        };

        let uuid_bytes: [u8; 16] = buf[104..120].try_into().unwrap();

        Ok(Self {
            inodes_count: codec::le32(buf, 0),
            blocks_count_lo: codec::le32(buf, 4),
            blocks_count_hi: codec::le32(buf, 336),
            free_blocks_count_lo: codec::le32(buf, 12),
            free_blocks_count_hi: codec::le32(buf, 344),
            free_inodes_count: codec::le32(buf, 16),
            first_data_block: codec::le32(buf, 20),
            log_block_size,
            blocks_per_group: codec::le32(buf, 32),
            inodes_per_group: codec::le32(buf, 40),
            mtime: codec::le32(buf, 44),
            wtime: codec::le32(buf, 48),
            magic,
            state: codec::le16(buf, 58),
            errors: codec::le16(buf, 60),
            minor_rev_level: codec::le16(buf, 62),
            creator_os: codec::le32(buf, 72),
            rev_level: codec::le32(buf, 76),
            first_ino: codec::le32(buf, 84),
            inode_size,
            block_group_nr: codec::le16(buf, 90),
            feature_compat,
            feature_incompat,
            feature_ro_compat,
            uuid: Uuid::from_bytes(uuid_bytes),
            volume_name: codec::fixed_utf8(&buf[120..136]),
            last_mounted: codec::fixed_utf8(&buf[136..200]),
            journal_inum: codec::le32(buf, 224),
            last_orphan: codec::le32(buf, 232),
            hash_seed: [
                codec::le32(buf, 236),
                codec::le32(buf, 240),
                codec::le32(buf, 244),
                codec::le32(buf, 248),
            ],
            def_hash_version: buf[252],
            desc_size: codec::le16(buf, 254),
            default_mount_options: codec::le32(buf, 256),
            first_meta_bg: codec::le32(buf, 260),
            min_extra_isize: codec::le16(buf, 348),
            want_extra_isize: codec::le16(buf, 350),
            flags: codec::le32(buf, 352),
            log_groups_per_flex: buf[372],
            checksum_type: buf[373],
            checksum_seed: codec::le32(buf, 624),
            lpf_ino: codec::le32(buf, 616),
            checksum: codec::le32(buf, 1020),
        })
    }

    pub(crate) fn block_size(&self) -> u64 {
        1024u64 << self.log_block_size
    }

    pub(crate) fn blocks_count(&self) -> u64 {
        if self.is_64bit() {
            codec::lo_hi32_32(self.blocks_count_lo, self.blocks_count_hi)
        } else {
            u64::from(self.blocks_count_lo)
        }
    }

    pub(crate) fn is_64bit(&self) -> bool {
        self.feature_incompat.includes(IncompatibleFeatures::SIXTY_FOUR_BIT)
    }

    pub(crate) fn has_metadata_csum(&self) -> bool {
        self.feature_ro_compat
            .includes(ReadOnlyCompatibleFeatures::METADATA_CSUM)
    }

    pub(crate) fn group_descriptor_size(&self) -> usize {
        if self.is_64bit() && self.desc_size >= 64 {
            self.desc_size as usize
        } else {
            32
        }
    }

    pub(crate) fn group_count(&self) -> Result<u32> {
        let blocks = self.blocks_count();
        let per_group = u64::from(self.blocks_per_group);
        if per_group == 0 {
            return Err(Error::corrupt("blocks_per_group is zero"));
        }
        let count = blocks.div_ceil(per_group);
        u32::try_from(count).map_err(|_| Error::out_of_range("group count overflows u32"))
    }

    pub(crate) fn format_version(&self) -> FormatVersion {
        if self.feature_incompat.any(IncompatibleFeatures::EXTENTS) {
            FormatVersion::Ext4
        } else if self.feature_compat.any(CompatibleFeatures::HAS_JOURNAL) {
            FormatVersion::Ext3
        } else {
            FormatVersion::Ext2
        }
    }

    pub(crate) fn last_write_time(&self) -> Timestamp {
        Timestamp::from_seconds(self.wtime)
    }

    pub(crate) fn last_mount_time(&self) -> Timestamp {
        Timestamp::from_seconds(self.mtime)
    }

    /// Validates the metadata_csum superblock checksum, computed as crc32c over bytes 0..1020
    /// of the buffer (everything but the checksum field itself).
    pub(crate) fn validate_checksum(&self, raw: &[u8]) -> bool {
        if !self.has_metadata_csum() {
            return true;
        }
        let computed = codec::crc32c(0, &raw[..1020]);
        computed == self.checksum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_ext2_superblock() -> Vec<u8> {
        let mut buf = vec![0u8; 1024];
        buf[0..4].copy_from_slice(&128u32.to_le_bytes()); // inodes_count
        buf[4..8].copy_from_slice(&1024u32.to_le_bytes()); // blocks_count
        buf[20..24].copy_from_slice(&1u32.to_le_bytes()); // first_data_block
        buf[24..28].copy_from_slice(&0u32.to_le_bytes()); // log_block_size -> 1024
        buf[32..36].copy_from_slice(&8192u32.to_le_bytes()); // blocks_per_group
        buf[40..44].copy_from_slice(&128u32.to_le_bytes()); // inodes_per_group
        buf[56..58].copy_from_slice(&0xEF53u16.to_le_bytes());
        buf
    }

    #[test]
    fn parses_minimal_ext2_superblock() {
        let buf = minimal_ext2_superblock();
        let sb = Superblock::parse(&buf).unwrap();
        assert_eq!(sb.block_size(), 1024);
        assert_eq!(sb.blocks_count(), 1024);
        assert_eq!(sb.format_version(), FormatVersion::Ext2);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = minimal_ext2_superblock();
        buf[56..58].copy_from_slice(&0u16.to_le_bytes());
        assert!(Superblock::parse(&buf).is_err());
    }

    #[test]
    fn rejects_unknown_incompatible_feature() {
        let mut buf = minimal_ext2_superblock();
        buf[96..100].copy_from_slice(&(1u32 << 30).to_le_bytes());
        assert!(matches!(
            Superblock::parse(&buf),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn validates_metadata_csum_with_correctly_seeded_crc32c() {
        let mut buf = minimal_ext2_superblock();
        buf[100..104].copy_from_slice(&0x0400u32.to_le_bytes()); // feature_ro_compat METADATA_CSUM
        buf[1020..1024].copy_from_slice(&0xc90c_7f2eu32.to_le_bytes());
        let sb = Superblock::parse(&buf).unwrap();
        assert!(sb.validate_checksum(&buf));

        buf[1020..1024].copy_from_slice(&0u32.to_le_bytes());
        let sb = Superblock::parse(&buf).unwrap();
        assert!(!sb.validate_checksum(&buf));
    }
}
