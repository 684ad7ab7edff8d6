//! File-entry facade: an inode plus the directory entry that named it, with every expensive
//! subsystem (directory listing, block stream, symlink target, extended attributes) built lazily
//! on first access and cached thereafter.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::block_stream::BlockStream;
use crate::codec::Timestamp;
use crate::error::{Error, Result};
use crate::format::dir::{self, DirFileType};
use crate::format::inode::{flags, FileType, Inode, InodeNumber};
use crate::format::superblock::IncompatibleFeatures;
use crate::format::xattr::{self, Attribute};
use crate::volume::VolumeInner;

/// A byte-range of a file's logical content, reported by the extent accessors. Uniform across
/// extent-tree and indirect-block files, unlike the on-disk extent-tree leaf record: a sparse
/// hole in an indirect-mapped file never has an on-disk record of its own, so this is
/// synthesized by walking the logical range rather than decoded directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExtentInfo {
    pub byte_offset: u64,
    pub byte_size: u64,
    pub sparse: bool,
}

struct DirEntryRecord {
    inode_number: InodeNumber,
    file_type_hint: DirFileType,
    name: String,
}

pub struct FileEntry {
    volume: Arc<VolumeInner>,
    number: InodeNumber,
    inode: Arc<Inode>,
    name: Option<String>,
    dir_file_type_hint: Option<DirFileType>,
    directory_listing: Mutex<Option<Vec<DirEntryRecord>>>,
    extended_attributes: Mutex<Option<Vec<Attribute>>>,
    symlink_target: Mutex<Option<String>>,
    block_stream: Mutex<Option<BlockStream>>,
}

impl FileEntry {
    pub(crate) fn new(
        volume: Arc<VolumeInner>,
        number: InodeNumber,
        inode: Arc<Inode>,
        name: Option<String>,
        dir_file_type_hint: Option<DirFileType>,
    ) -> Self {
        Self {
            volume,
            number,
            inode,
            name,
            dir_file_type_hint,
            directory_listing: Mutex::new(None),
            extended_attributes: Mutex::new(None),
            symlink_target: Mutex::new(None),
            block_stream: Mutex::new(None),
        }
    }

    pub fn inode_number(&self) -> u32 {
        self.number.get()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The file-type hint carried by the directory entry that named this file (cheaper than
    /// decoding the inode's mode bits, but not authoritative, see [`FileEntry::file_type`]).
    pub fn directory_file_type_hint(&self) -> Option<DirFileType> {
        self.dir_file_type_hint
    }

    pub fn is_empty(&self) -> bool {
        Inode::is_empty(&self.inode.raw)
    }

    pub fn file_type(&self) -> Result<FileType> {
        self.inode.file_type()
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.file_type(), Ok(FileType::Directory))
    }

    pub fn is_regular_file(&self) -> bool {
        matches!(self.file_type(), Ok(FileType::Regular))
    }

    pub fn is_symbolic_link(&self) -> bool {
        matches!(self.file_type(), Ok(FileType::SymbolicLink))
    }

    pub fn permissions(&self) -> u16 {
        self.inode.permissions()
    }

    pub fn uid(&self) -> u32 {
        self.inode.uid()
    }

    pub fn gid(&self) -> u32 {
        self.inode.gid()
    }

    pub fn links_count(&self) -> u16 {
        self.inode.links_count
    }

    pub fn size(&self) -> u64 {
        match self.inode.file_type() {
            Ok(FileType::Regular) => self.inode.size(self.volume.feature_large_file()),
            _ => self.inode.size_low(),
        }
    }

    pub fn access_time(&self) -> Timestamp {
        self.inode.access_time()
    }

    pub fn modification_time(&self) -> Timestamp {
        self.inode.modification_time()
    }

    pub fn change_time(&self) -> Timestamp {
        self.inode.change_time()
    }

    pub fn creation_time(&self) -> Option<Timestamp> {
        self.inode.creation_time()
    }

    /// Device number for character/block device inodes, decoded from the first word of the data
    /// reference; `None` for every other file type.
    pub fn device_number(&self) -> Option<u32> {
        match self.inode.file_type() {
            Ok(FileType::CharDevice) | Ok(FileType::BlockDevice) => {}
            _ => return None,
        }
        let word = u32::from_le_bytes(self.inode.block[0..4].try_into().unwrap());
        if word & 0xFFFF_FF00 == 0 {
            Some(word)
        } else {
            let major = (word & 0x000F_FF00) >> 8;
            let minor_low = word & 0xFF;
            let minor_high = (word >> 12) & 0xFFF00;
            Some((minor_low & 0xFF) | (major << 8) | (minor_high << 12))
        }
    }

    fn use_extents(&self) -> bool {
        self.inode.has_flag(flags::EXTENTS)
    }

    fn ensure_block_stream(&self) -> Result<()> {
        let mut guard = self.block_stream.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.build_block_stream()?);
        Ok(())
    }

    fn build_block_stream(&self) -> Result<BlockStream> {
        self.block_stream_for(&self.inode, self.size())
    }

    /// Builds a block stream over an arbitrary inode's content, not just this file entry's own.
    /// Used for this file's own data as well as for reading the value of an extended attribute
    /// stored out-of-line, in a dedicated EA inode.
    fn block_stream_for(&self, inode: &Inode, size: u64) -> Result<BlockStream> {
        let block_size = self.volume.superblock.block_size();
        let abort = self.volume.abort.clone();

        if inode.has_flag(flags::INLINE_DATA) {
            let mut data = inode.block[..(size.min(60) as usize)].to_vec();
            data.resize(size as usize, 0);
            return Ok(BlockStream::from_inline(data, abort));
        }

        let source = self.volume.source.clone();
        if inode.has_flag(flags::EXTENTS) {
            let extents =
                crate::format::extent::load_extents(&source, block_size, &inode.block, &abort)?;
            Ok(BlockStream::from_extents(source, block_size, size, extents, abort))
        } else {
            Ok(BlockStream::from_indirect(
                source,
                block_size,
                size,
                inode.block,
                abort,
            ))
        }
    }

    /// Reads the full content of an extended attribute value stored out-of-line, in its own EA
    /// inode, the way a regular file's data would be read: respecting inline data, extents or the
    /// indirect block map, whichever the EA inode uses.
    fn resolve_ea_inode_value(&self, ea_inode_number: u32, value_size: u32) -> Result<Vec<u8>> {
        let inode = self.volume.get_inode(InodeNumber::from(ea_inode_number))?;
        let size = u64::from(value_size);
        let stream = self.block_stream_for(&inode, size)?;
        let mut buf = vec![0u8; size as usize];
        stream.read_at(0, &mut buf)?;
        Ok(buf)
    }

    pub fn read_buffer_at_offset(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        self.ensure_block_stream()?;
        let guard = self.block_stream.lock();
        guard.as_ref().unwrap().read_at(offset, buf)
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.ensure_block_stream()?;
        let mut guard = self.block_stream.lock();
        guard.as_mut().unwrap().read(buf)
    }

    pub fn seek(&self, position: u64) -> Result<u64> {
        self.ensure_block_stream()?;
        let mut guard = self.block_stream.lock();
        let stream = guard.as_mut().unwrap();
        stream.seek(position);
        Ok(stream.position())
    }

    fn extents(&self) -> Result<Vec<ExtentInfo>> {
        let block_size = self.volume.superblock.block_size();
        let size = self.size();

        if self.inode.has_flag(flags::INLINE_DATA) {
            return Ok(vec![ExtentInfo {
                byte_offset: 0,
                byte_size: size,
                sparse: false,
            }]);
        }

        let total_blocks = size.div_ceil(block_size);

        if self.use_extents() {
            let source = self.volume.source.clone();
            let extents = crate::format::extent::load_extents(
                &source,
                block_size,
                &self.inode.block,
                &self.volume.abort,
            )?;
            let mut out = Vec::new();
            let mut next_logical = 0u64;
            for e in &extents {
                if u64::from(e.logical_block) > next_logical {
                    let gap = u64::from(e.logical_block) - next_logical;
                    out.push(ExtentInfo {
                        byte_offset: next_logical * block_size,
                        byte_size: gap * block_size,
                        sparse: true,
                    });
                }
                out.push(ExtentInfo {
                    byte_offset: u64::from(e.logical_block) * block_size,
                    byte_size: u64::from(e.length) * block_size,
                    sparse: false,
                });
                next_logical = u64::from(e.end_block());
            }
            if next_logical < total_blocks {
                out.push(ExtentInfo {
                    byte_offset: next_logical * block_size,
                    byte_size: (total_blocks - next_logical) * block_size,
                    sparse: true,
                });
            }
            Ok(out)
        } else {
            let map = crate::format::indirect::IndirectMap::new(
                &self.volume.source,
                block_size,
                &self.inode.block,
            );
            let runs = map.extents(total_blocks as u32, &self.volume.abort)?;
            Ok(runs
                .into_iter()
                .map(|(start, len, phys)| ExtentInfo {
                    byte_offset: u64::from(start) * block_size,
                    byte_size: u64::from(len) * block_size,
                    sparse: phys.is_none(),
                })
                .collect())
        }
    }

    pub fn number_of_extents(&self) -> Result<usize> {
        Ok(self.extents()?.len())
    }

    pub fn extent(&self, index: usize) -> Result<ExtentInfo> {
        self.extents()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| Error::out_of_range(format!("extent index {index} out of range")))
    }

    fn ensure_directory_listing(&self) -> Result<()> {
        if !self.is_directory() {
            return Err(Error::invalid_argument("file entry is not a directory"));
        }
        let mut guard = self.directory_listing.lock();
        if guard.is_some() {
            return Ok(());
        }
        *guard = Some(self.build_directory_listing()?);
        Ok(())
    }

    fn build_directory_listing(&self) -> Result<Vec<DirEntryRecord>> {
        let raw_entries = if self.inode.has_flag(flags::INLINE_DATA) {
            dir::parse_inline(&self.inode.block)?
        } else {
            self.ensure_block_stream()?;
            let block_size = self.volume.superblock.block_size();
            let guard = self.block_stream.lock();
            let stream = guard.as_ref().unwrap();
            let size = stream.len();
            let mut entries = Vec::new();
            let mut offset = 0u64;
            while offset < size {
                self.volume.abort.check()?;
                let chunk = block_size.min(size - offset) as usize;
                let mut buf = vec![0u8; chunk];
                stream.read_at(offset, &mut buf)?;
                entries.extend(dir::parse_block(&buf)?);
                offset += block_size;
            }
            entries
        };

        let filetype_known = self
            .volume
            .superblock
            .feature_incompat
            .any(IncompatibleFeatures::FILETYPE);

        Ok(raw_entries
            .into_iter()
            .map(|e| DirEntryRecord {
                inode_number: InodeNumber::from(e.inode_number),
                file_type_hint: if filetype_known {
                    DirFileType::from(e.file_type)
                } else {
                    DirFileType::Unknown
                },
                name: crate::codec::name_utf8(&e.name),
            })
            .collect())
    }

    pub fn number_of_sub_file_entries(&self) -> Result<usize> {
        self.ensure_directory_listing()?;
        Ok(self.directory_listing.lock().as_ref().unwrap().len())
    }

    pub fn sub_file_entry(&self, index: usize) -> Result<FileEntry> {
        self.ensure_directory_listing()?;
        let (inode_number, name, hint) = {
            let guard = self.directory_listing.lock();
            let entries = guard.as_ref().unwrap();
            let entry = entries.get(index).ok_or_else(|| {
                Error::out_of_range(format!("directory entry index {index} out of range"))
            })?;
            (entry.inode_number, entry.name.clone(), entry.file_type_hint)
        };
        let inode = self.volume.get_inode(inode_number)?;
        Ok(FileEntry::new(
            self.volume.clone(),
            inode_number,
            inode,
            Some(name),
            Some(hint),
        ))
    }

    pub fn sub_file_entry_by_utf8_name(&self, name: &str) -> Result<FileEntry> {
        self.ensure_directory_listing()?;
        let index = {
            let guard = self.directory_listing.lock();
            guard
                .as_ref()
                .unwrap()
                .iter()
                .position(|e| e.name == name)
        };
        match index {
            Some(i) => self.sub_file_entry(i),
            None => Err(Error::NotFound(format!("no directory entry named {name:?}"))),
        }
    }

    pub fn sub_file_entry_by_utf16_name(&self, name: &[u16]) -> Result<FileEntry> {
        let utf8 = String::from_utf16(name).map_err(|_| Error::corrupt("name is not valid UTF-16"))?;
        self.sub_file_entry_by_utf8_name(&utf8)
    }

    pub fn symbolic_link_target(&self) -> Result<String> {
        if !self.is_symbolic_link() {
            return Err(Error::invalid_argument("file entry is not a symbolic link"));
        }
        {
            let guard = self.symlink_target.lock();
            if let Some(target) = guard.as_ref() {
                return Ok(target.clone());
            }
        }

        let size = self.size();
        let target = if size < 60 {
            crate::codec::name_utf8(&self.inode.block[..size as usize])
        } else {
            self.ensure_block_stream()?;
            let mut buf = vec![0u8; size as usize];
            {
                let guard = self.block_stream.lock();
                guard.as_ref().unwrap().read_at(0, &mut buf)?;
            }
            crate::codec::name_utf8(&buf)
        };

        *self.symlink_target.lock() = Some(target.clone());
        Ok(target)
    }

    pub fn extended_attributes(&self) -> Result<Vec<Attribute>> {
        {
            let guard = self.extended_attributes.lock();
            if let Some(attrs) = guard.as_ref() {
                return Ok(attrs.clone());
            }
        }

        let mut resolve_value =
            |ea_inode_number: u32, value_size: u32| self.resolve_ea_inode_value(ea_inode_number, value_size);

        let mut attrs = xattr::parse_inline(self.inode.inline_xattr_region(), &mut resolve_value)?;
        let xattr_block = self.inode.xattr_block();
        if xattr_block != 0 {
            let block_size = self.volume.superblock.block_size();
            let mut buf = vec![0u8; block_size as usize];
            self.volume
                .source
                .read_exact_at(xattr_block * block_size, &mut buf)?;
            attrs.extend(xattr::parse_block(&buf, &mut resolve_value)?);
        }

        *self.extended_attributes.lock() = Some(attrs.clone());
        Ok(attrs)
    }

    pub fn number_of_extended_attributes(&self) -> Result<usize> {
        Ok(self.extended_attributes()?.len())
    }

    pub fn extended_attribute(&self, index: usize) -> Result<Attribute> {
        self.extended_attributes()?
            .into_iter()
            .nth(index)
            .ok_or_else(|| {
                Error::out_of_range(format!("extended attribute index {index} out of range"))
            })
    }
}
