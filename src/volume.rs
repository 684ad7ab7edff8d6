//! Volume facade: ties the superblock, group descriptors and inode table together behind a
//! single open/close lifecycle.

use std::sync::Arc;

use crate::abort::AbortFlag;
use crate::byte_source::{ByteSource, Source};
use crate::codec::Timestamp;
use crate::error::{Error, Result};
use crate::file_entry::FileEntry;
use crate::format::group_desc::{self, GroupDescriptor, GroupNumber};
use crate::format::inode::{Inode, InodeNumber};
use crate::format::superblock::{FormatVersion, ReadOnlyCompatibleFeatures, Superblock};
use crate::inode_table::InodeTable;

const MIN_SOURCE_LEN: u64 = 2048;

pub(crate) struct VolumeInner {
    pub(crate) source: Arc<ByteSource>,
    pub(crate) superblock: Superblock,
    pub(crate) group_descriptors: Vec<GroupDescriptor>,
    pub(crate) inode_table: InodeTable,
    pub(crate) abort: Arc<AbortFlag>,
}

impl VolumeInner {
    pub(crate) fn feature_large_file(&self) -> bool {
        self.superblock
            .feature_ro_compat
            .any(ReadOnlyCompatibleFeatures::LARGE_FILE)
    }

    fn descriptor_for(&self, number: InodeNumber) -> Result<&GroupDescriptor> {
        let ipg = self.superblock.inodes_per_group;
        let group = (number.get() - 1) / ipg;
        self.group_descriptors
            .get(group as usize)
            .ok_or_else(|| Error::out_of_range(format!("inode {} has no owning group", number.get())))
    }

    /// Reads and decodes an inode's on-disk record directly, bypassing the cache. Used both by
    /// the cache's miss path and anywhere a fresh read is required.
    pub(crate) fn load_inode(&self, number: InodeNumber) -> Result<Inode> {
        if number.get() == 0 {
            return Err(Error::invalid_argument("inode number 0 is not valid"));
        }
        if number.get() > self.superblock.inodes_count {
            return Err(Error::out_of_range(format!(
                "inode {} exceeds inode count {}",
                number.get(),
                self.superblock.inodes_count
            )));
        }

        let ipg = self.superblock.inodes_per_group;
        let index_in_group = (number.get() - 1) % ipg;
        let descriptor = self.descriptor_for(number)?;
        let inode_size = self.superblock.inode_size as u64;
        let block_size = self.superblock.block_size();

        let byte_offset = descriptor.inode_table_block() * block_size
            + u64::from(index_in_group) * inode_size;

        let mut buf = vec![0u8; inode_size as usize];
        self.source.read_exact_at(byte_offset, &mut buf)?;
        Inode::parse(number, &buf)
    }

    pub(crate) fn get_inode(&self, number: InodeNumber) -> Result<Arc<Inode>> {
        if number.get() == 0 {
            return Err(Error::invalid_argument("inode number 0 is not valid"));
        }
        self.inode_table.get_or_load(number, || self.load_inode(number))
    }
}

/// An open ext2/ext3/ext4 volume.
pub struct Volume {
    pub(crate) inner: Arc<VolumeInner>,
}

impl Volume {
    /// Opens a volume from a seekable byte source, `volume_offset` bytes into it (0 for a whole
    /// disk image, nonzero for a partition carved out of a larger image).
    pub fn open(source: Box<dyn Source>, volume_offset: u64) -> Result<Self> {
        let byte_source = ByteSource::new(source, volume_offset);

        let total_len = byte_source.total_len()?;
        if total_len < MIN_SOURCE_LEN {
            return Err(Error::corrupt(format!(
                "byte source is only {total_len} bytes, too small for an ext volume"
            )));
        }
        let usable_len = total_len.saturating_sub(volume_offset);

        let mut sb_buf = vec![0u8; Superblock::SIZE];
        byte_source.read_exact_at(Superblock::DISK_OFFSET, &mut sb_buf)?;
        let superblock = Superblock::parse(&sb_buf)?;
        if !superblock.validate_checksum(&sb_buf) {
            log::warn!("superblock metadata_csum does not match, continuing anyway");
        }

        let group_count = superblock.group_count()?;
        if u64::from(group_count) * u64::from(superblock.inodes_per_group)
            < u64::from(superblock.inodes_count)
        {
            return Err(Error::corrupt(
                "group count * inodes_per_group is smaller than inodes_count",
            ));
        }

        let mut group_descriptors = Vec::with_capacity(group_count as usize);
        for g in 0..group_count {
            let descriptor = group_desc::read_descriptor(&byte_source, &superblock, GroupNumber(g))?;
            let table_bytes =
                u64::from(superblock.inodes_per_group) * u64::from(superblock.inode_size);
            let table_end = descriptor.inode_table_block() * superblock.block_size() + table_bytes;
            if table_end > usable_len {
                return Err(Error::corrupt(format!(
                    "group {g} inode table lies past the end of the byte source"
                )));
            }
            group_descriptors.push(descriptor);
        }

        log::debug!(
            "opened ext volume: label={:?} format={:?} block_size={} inodes={}",
            superblock.volume_name,
            superblock.format_version(),
            superblock.block_size(),
            superblock.inodes_count
        );

        let inner = Arc::new(VolumeInner {
            source: Arc::new(byte_source),
            superblock,
            group_descriptors,
            inode_table: InodeTable::with_default_capacity(),
            abort: Arc::new(AbortFlag::new()),
        });

        Ok(Self { inner })
    }

    pub fn label(&self) -> &str {
        &self.inner.superblock.volume_name
    }

    pub fn last_mount_path(&self) -> &str {
        &self.inner.superblock.last_mounted
    }

    pub fn last_mount_time(&self) -> Timestamp {
        self.inner.superblock.last_mount_time()
    }

    pub fn last_write_time(&self) -> Timestamp {
        self.inner.superblock.last_write_time()
    }

    pub fn format_version(&self) -> FormatVersion {
        self.inner.superblock.format_version()
    }

    pub fn block_size(&self) -> u64 {
        self.inner.superblock.block_size()
    }

    /// Total inode count from the superblock. Includes unallocated and reserved inodes, not just
    /// the files actually present on the volume.
    pub fn number_of_file_entries(&self) -> u32 {
        self.inner.superblock.inodes_count
    }

    pub fn root_file_entry(&self) -> Result<FileEntry> {
        self.file_entry_by_inode(InodeNumber::ROOT_DIR.get())
    }

    pub fn file_entry_by_inode(&self, number: u32) -> Result<FileEntry> {
        let number = InodeNumber::from(number);
        let inode = self.inner.get_inode(number)?;
        Ok(FileEntry::new(self.inner.clone(), number, inode, None, None))
    }

    pub fn file_entry_by_utf8_path(&self, path: &str) -> Result<FileEntry> {
        crate::path::resolve(self, path.as_bytes())
    }

    pub fn file_entry_by_utf16_path(&self, path: &[u16]) -> Result<FileEntry> {
        let utf8 = String::from_utf16(path).map_err(|_| Error::corrupt("path is not valid UTF-16"))?;
        crate::path::resolve(self, utf8.as_bytes())
    }

    /// Flips the shared abort flag; any operation in flight (or started afterwards) observes
    /// [`Error::Aborted`] at its next check point.
    pub fn signal_abort(&self) {
        self.inner.abort.signal();
    }
}
