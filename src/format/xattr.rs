//! Extended attributes: the external EA block format and the inline variant stored past the
//! fixed inode body.
//!
//! Every attribute name a volume can store is split into a name-index prefix looked up in a
//! small fixed table, and a suffix stored literally. This matches how e2fsprogs renders names
//! like `user.foo` or `system.posix_acl_access` from the compact on-disk encoding.

use crate::codec;
use crate::error::{Error, Result};

const EA_MAGIC: u32 = 0xEA020000;

fn name_prefix(index: u8) -> Result<&'static str> {
    Ok(match index {
        0 => "",
        1 => "user.",
        2 => "system.posix_acl_access",
        3 => "system.posix_acl_default",
        4 => "trusted.",
        6 => "security.",
        7 => "system.",
        8 => "system.richacl",
        other => {
            return Err(Error::unsupported(format!(
                "extended attribute name-index {other} is not recognized"
            )))
        }
    })
}

#[derive(Clone, Debug)]
pub struct Attribute {
    pub name: String,
    pub value: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
struct EntryHeader {
    name_len: u8,
    name_index: u8,
    value_offset: u16,
    value_block: u32,
    value_size: u32,
}

const ENTRY_HEADER_SIZE: usize = 16;

fn parse_entry_header(buf: &[u8]) -> EntryHeader {
    EntryHeader {
        name_len: buf[0],
        name_index: buf[1],
        value_offset: codec::le16(buf, 2),
        value_block: codec::le32(buf, 4),
        value_size: codec::le32(buf, 8),
    }
}

/// A callback that resolves an extended attribute value stored out-of-line, in a dedicated EA
/// inode rather than inline in this block: `resolve(inode_number, value_size)` returns that
/// inode's content, read through its own block stream just like a regular file's.
pub(crate) type ValueResolver<'a> = dyn FnMut(u32, u32) -> Result<Vec<u8>> + 'a;

/// Walks a sequence of EA entries starting right after a 4-byte header (the external block's
/// magic, or the inline region's `h_magic`-less entry list depending on caller), stopping at the
/// first all-zero entry header (`name_len == 0 && name_index == 0`), which terminates the list.
fn parse_entries(
    entries_start: &[u8],
    values_base: &[u8],
    resolve_value: &mut ValueResolver<'_>,
) -> Result<Vec<Attribute>> {
    let mut attrs = Vec::new();
    let mut offset = 0usize;

    while offset + ENTRY_HEADER_SIZE <= entries_start.len() {
        let header = parse_entry_header(&entries_start[offset..]);
        if header.name_len == 0 && header.name_index == 0 && header.value_size == 0 {
            break;
        }

        let name_start = offset + ENTRY_HEADER_SIZE;
        let name_end = name_start + header.name_len as usize;
        if name_end > entries_start.len() {
            return Err(Error::corrupt("extended attribute name overruns block"));
        }
        let suffix = String::from_utf8_lossy(&entries_start[name_start..name_end]);
        let name = format!("{}{}", name_prefix(header.name_index)?, suffix);

        let value = if header.value_block != 0 {
            resolve_value(header.value_block, header.value_size)?
        } else {
            let value_start = header.value_offset as usize;
            let value_end = value_start + header.value_size as usize;
            if value_end > values_base.len() {
                return Err(Error::corrupt("extended attribute value overruns block"));
            }
            values_base[value_start..value_end].to_vec()
        };
        attrs.push(Attribute { name, value });

        offset = (offset + ENTRY_HEADER_SIZE + header.name_len as usize + 3) & !3;
    }

    Ok(attrs)
}

/// Parses a full external extended-attribute block (magic at offset 0, entries starting at
/// offset 32, values growing down from the end of the block).
pub(crate) fn parse_block(buf: &[u8], resolve_value: &mut ValueResolver<'_>) -> Result<Vec<Attribute>> {
    if buf.len() < 32 {
        return Err(Error::corrupt("extended attribute block shorter than header"));
    }
    let magic = codec::le32(buf, 0);
    if magic != EA_MAGIC {
        return Err(Error::corrupt(format!(
            "bad extended attribute block magic {magic:#010x}"
        )));
    }
    parse_entries(&buf[32..], buf, resolve_value)
}

/// Parses the inline extended-attribute region past an inode's fixed+extra body: a 4-byte magic
/// (reusing [`EA_MAGIC`]) followed directly by entries, with values anchored to the start of the
/// region (offsets are relative to the inode's own xattr area, not a separate block).
pub(crate) fn parse_inline(buf: &[u8], resolve_value: &mut ValueResolver<'_>) -> Result<Vec<Attribute>> {
    if buf.len() < 4 {
        return Ok(Vec::new());
    }
    let magic = codec::le32(buf, 0);
    if magic != EA_MAGIC {
        return Ok(Vec::new());
    }
    parse_entries(&buf[4..], &buf[4..], resolve_value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_resolver() -> impl FnMut(u32, u32) -> Result<Vec<u8>> {
        |inum, _size| Err(Error::corrupt(format!("unexpected out-of-line EA inode {inum}")))
    }

    fn encode_block(entries: &[(u8, u8, &[u8])]) -> Vec<u8> {
        let mut buf = vec![0u8; 4096];
        buf[0..4].copy_from_slice(&EA_MAGIC.to_le_bytes());
        let mut entry_offset = 32usize;
        let mut value_offset = buf.len();

        for (name_index, _name_len, value) in entries {
            value_offset -= value.len();
            buf[value_offset..value_offset + value.len()].copy_from_slice(value);
        }
        let mut running_value_offset = buf.len();
        for (name_index, _name_len, value) in entries {
            running_value_offset -= value.len();
            let name = b"foo";
            buf[entry_offset] = name.len() as u8;
            buf[entry_offset + 1] = *name_index;
            buf[entry_offset + 2..entry_offset + 4]
                .copy_from_slice(&(running_value_offset as u16).to_le_bytes());
            buf[entry_offset + 8..entry_offset + 12].copy_from_slice(&(value.len() as u32).to_le_bytes());
            buf[entry_offset + 16..entry_offset + 16 + name.len()].copy_from_slice(name);
            entry_offset = (entry_offset + 16 + name.len() + 3) & !3;
        }

        buf
    }

    #[test]
    fn parses_user_prefixed_attribute() {
        let buf = encode_block(&[(1, 3, b"bar")]);
        let attrs = parse_block(&buf, &mut no_resolver()).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "user.foo");
        assert_eq!(attrs[0].value, b"bar");
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 64];
        assert!(parse_block(&buf, &mut no_resolver()).is_err());
    }

    #[test]
    fn rejects_unrecognized_name_index() {
        let buf = encode_block(&[(5, 3, b"bar")]);
        assert!(parse_block(&buf, &mut no_resolver()).is_err());
        let buf = encode_block(&[(9, 3, b"bar")]);
        assert!(parse_block(&buf, &mut no_resolver()).is_err());
    }

    #[test]
    fn resolves_value_stored_in_a_separate_inode() {
        let mut buf = vec![0u8; 4096];
        buf[0..4].copy_from_slice(&EA_MAGIC.to_le_bytes());
        let entry_offset = 32usize;
        let name = b"foo";
        buf[entry_offset] = name.len() as u8;
        buf[entry_offset + 1] = 1; // "user." prefix
        buf[entry_offset + 4..entry_offset + 8].copy_from_slice(&7u32.to_le_bytes()); // value_block = EA inode 7
        buf[entry_offset + 8..entry_offset + 12].copy_from_slice(&11u32.to_le_bytes()); // value_size
        buf[entry_offset + 16..entry_offset + 16 + name.len()].copy_from_slice(name);

        let mut resolver = |inum: u32, size: u32| {
            assert_eq!(inum, 7);
            assert_eq!(size, 11);
            Ok(b"out-of-line".to_vec())
        };
        let attrs = parse_block(&buf, &mut resolver).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "user.foo");
        assert_eq!(attrs[0].value, b"out-of-line");
    }

    #[test]
    fn parses_inline_attribute_with_values_anchored_to_region_start() {
        let mut buf = vec![0u8; 128];
        buf[0..4].copy_from_slice(&EA_MAGIC.to_le_bytes());

        let name = b"selinux";
        let value = b"unconfined_u:object_r:user_home_t:s0";
        let value_offset = 64usize;
        buf[4 + value_offset..4 + value_offset + value.len()].copy_from_slice(value);

        let entry_offset = 4usize;
        buf[entry_offset] = name.len() as u8;
        buf[entry_offset + 1] = 7; // "system." prefix
        buf[entry_offset + 2..entry_offset + 4].copy_from_slice(&(value_offset as u16).to_le_bytes());
        buf[entry_offset + 8..entry_offset + 12].copy_from_slice(&(value.len() as u32).to_le_bytes());
        buf[entry_offset + 16..entry_offset + 16 + name.len()].copy_from_slice(name);

        let attrs = parse_inline(&buf, &mut no_resolver()).unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].name, "system.selinux");
        assert_eq!(attrs[0].value, value);
    }

    #[test]
    fn inline_region_too_short_for_magic_yields_no_attributes() {
        let attrs = parse_inline(&[0u8; 2], &mut no_resolver()).unwrap();
        assert!(attrs.is_empty());
    }
}
