//! Read-only parser and access library for Linux ext2, ext3 and ext4 volumes.
//!
//! Given any seekable byte source containing a volume (a whole disk image, a partition carved
//! out of a larger image at a nonzero offset, an in-memory buffer in a test), [`Volume::open`]
//! parses the superblock and group descriptors and exposes a navigable tree of [`FileEntry`]
//! values: metadata, directory listings, file contents via a lazy [`BlockStream`], symbolic-link
//! targets, and extended attributes. The crate never writes to the source.

mod abort;
mod block_stream;
mod byte_source;
mod codec;
mod file_entry;
mod format;
mod inode_table;
mod path;
mod volume;

pub mod error;

pub use block_stream::BlockStream;
pub use byte_source::Source;
pub use codec::Timestamp;
pub use file_entry::{ExtentInfo, FileEntry};
pub use format::dir::DirFileType;
pub use format::inode::FileType;
pub use format::superblock::FormatVersion;
pub use format::xattr::Attribute;
pub use volume::Volume;

pub use error::{Error, Result};
