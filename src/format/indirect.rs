//! Classic ext2/ext3 indirect block mapping.
//!
//! Twelve direct pointers cover small files; beyond that, `i_block[12]` points to a singly
//! indirect block of pointers, `i_block[13]` to a doubly indirect block (a block of pointers to
//! singly indirect blocks), and `i_block[14]` to a triply indirect block. Unlike the extent
//! tree this is resolved on demand rather than flattened, since a triply indirect tree can
//! address far more logical blocks than is useful to materialize eagerly.

use crate::abort::AbortFlag;
use crate::byte_source::ByteSource;
use crate::codec;
use crate::error::Result;

const DIRECT_COUNT: u32 = 12;

pub(crate) struct IndirectMap<'a> {
    source: &'a ByteSource,
    block_size: u64,
    pointers: [u32; 15],
}

impl<'a> IndirectMap<'a> {
    pub(crate) fn new(source: &'a ByteSource, block_size: u64, i_block: &[u8; 60]) -> Self {
        let mut pointers = [0u32; 15];
        for (i, p) in pointers.iter_mut().enumerate() {
            *p = codec::le32(i_block, i * 4);
        }
        Self {
            source,
            block_size,
            pointers,
        }
    }

    fn pointers_per_block(&self) -> u32 {
        (self.block_size / 4) as u32
    }

    fn read_pointer(&self, block: u32, index: u32) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.source
            .read_exact_at(u64::from(block) * self.block_size + u64::from(index) * 4, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Resolves a logical block number to a physical block, or `None` for a sparse hole (a zero
    /// pointer anywhere along the path).
    pub(crate) fn resolve(&self, logical_block: u32, abort: &AbortFlag) -> Result<Option<u64>> {
        abort.check()?;

        let ppb = self.pointers_per_block();

        if logical_block < DIRECT_COUNT {
            let ptr = self.pointers[logical_block as usize];
            return Ok(if ptr == 0 { None } else { Some(u64::from(ptr)) });
        }
        let mut remaining = logical_block - DIRECT_COUNT;

        if remaining < ppb {
            return self.resolve_single(self.pointers[12], remaining, abort);
        }
        remaining -= ppb;

        if remaining < ppb * ppb {
            let outer_index = remaining / ppb;
            let inner_index = remaining % ppb;
            let single_block = self.pointers[13];
            if single_block == 0 {
                return Ok(None);
            }
            abort.check()?;
            let indirect_block = self.read_pointer(single_block, outer_index)?;
            return self.resolve_single(indirect_block, inner_index, abort);
        }
        remaining -= ppb * ppb;

        let triple_block = self.pointers[14];
        if triple_block == 0 {
            return Ok(None);
        }
        let double_index = remaining / (ppb * ppb);
        let rest = remaining % (ppb * ppb);
        let outer_index = rest / ppb;
        let inner_index = rest % ppb;

        abort.check()?;
        let double_block = self.read_pointer(triple_block, double_index)?;
        if double_block == 0 {
            return Ok(None);
        }
        let single_block = self.read_pointer(double_block, outer_index)?;
        self.resolve_single(single_block, inner_index, abort)
    }

    fn resolve_single(&self, block: u32, index: u32, abort: &AbortFlag) -> Result<Option<u64>> {
        if block == 0 {
            return Ok(None);
        }
        abort.check()?;
        let ptr = self.read_pointer(block, index)?;
        Ok(if ptr == 0 { None } else { Some(u64::from(ptr)) })
    }

    /// Walks every logical block in `0..total_blocks`, coalescing adjacent physical blocks (and
    /// adjacent sparse holes) into runs of `(logical_start, length, physical_start)`, the latter
    /// `None` for a sparse run.
    pub(crate) fn extents(
        &self,
        total_blocks: u32,
        abort: &AbortFlag,
    ) -> Result<Vec<(u32, u32, Option<u64>)>> {
        let mut out: Vec<(u32, u32, Option<u64>)> = Vec::new();
        for logical in 0..total_blocks {
            let phys = self.resolve(logical, abort)?;
            let extend = match out.last() {
                Some(&(start, len, last_phys)) => {
                    start + len == logical
                        && match (last_phys, phys) {
                            (None, None) => true,
                            (Some(l), Some(c)) => l + 1 == c,
                            _ => false,
                        }
                }
                None => false,
            };
            if extend {
                out.last_mut().unwrap().1 += 1;
            } else {
                out.push((logical, 1, phys));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn resolves_direct_block() {
        let mut i_block = [0u8; 60];
        i_block[0..4].copy_from_slice(&42u32.to_le_bytes());
        let source = ByteSource::new(Box::new(Cursor::new(vec![0u8; 4096])), 0);
        let map = IndirectMap::new(&source, 1024, &i_block);
        let abort = AbortFlag::new();
        assert_eq!(map.resolve(0, &abort).unwrap(), Some(42));
        assert_eq!(map.resolve(1, &abort).unwrap(), None);
    }

    #[test]
    fn resolves_single_indirect_block() {
        let block_size = 1024u64;
        let mut disk = vec![0u8; (block_size * 3) as usize];
        // single indirect block is physical block 2, whose first pointer is 99.
        disk[(block_size * 2) as usize..(block_size * 2) as usize + 4]
            .copy_from_slice(&99u32.to_le_bytes());

        let mut i_block = [0u8; 60];
        i_block[12 * 4..12 * 4 + 4].copy_from_slice(&2u32.to_le_bytes());

        let source = ByteSource::new(Box::new(Cursor::new(disk)), 0);
        let map = IndirectMap::new(&source, block_size, &i_block);
        let abort = AbortFlag::new();
        assert_eq!(map.resolve(12, &abort).unwrap(), Some(99));
    }
}
