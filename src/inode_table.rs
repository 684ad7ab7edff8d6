//! Bounded inode cache.
//!
//! Every file-entry lookup by inode number goes through this cache rather than the volume's
//! byte source directly. Entries are evicted least-recently-used once the table grows past its
//! capacity, the same shape as the reference group-descriptor cache but bounded rather than
//! unbounded: a directory walk over a volume with millions of inodes must not grow this table
//! without limit.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::format::inode::{Inode, InodeNumber};

const DEFAULT_CAPACITY: usize = 64;
const MIN_CAPACITY: usize = 8;

struct Entry {
    inode: std::sync::Arc<Inode>,
    last_access: AtomicU64,
}

pub(crate) struct InodeTable {
    capacity: usize,
    entries: RwLock<HashMap<u32, Entry>>,
    clock: AtomicU64,
}

impl InodeTable {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(MIN_CAPACITY),
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
        }
    }

    pub(crate) fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the cached inode if present, bumping its recency, without ever invoking `load`.
    pub(crate) fn get(&self, number: InodeNumber) -> Option<std::sync::Arc<Inode>> {
        let entries = self.entries.read();
        let entry = entries.get(&number.get())?;
        entry.last_access.store(self.tick(), Ordering::Relaxed);
        Some(entry.inode.clone())
    }

    /// Returns the cached inode, loading and inserting it via `load` on a miss. Eviction happens
    /// under the write lock, so a flood of distinct misses can't grow the table unbounded even
    /// under concurrent access.
    pub(crate) fn get_or_load(
        &self,
        number: InodeNumber,
        load: impl FnOnce() -> crate::error::Result<Inode>,
    ) -> crate::error::Result<std::sync::Arc<Inode>> {
        if let Some(cached) = self.get(number) {
            return Ok(cached);
        }

        let inode = std::sync::Arc::new(load()?);

        let mut entries = self.entries.write();
        if entries.len() >= self.capacity && !entries.contains_key(&number.get()) {
            if let Some((&lru_key, _)) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
            {
                entries.remove(&lru_key);
            }
        }
        entries.insert(
            number.get(),
            Entry {
                inode: inode.clone(),
                last_access: AtomicU64::new(self.tick()),
            },
        );

        Ok(inode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::inode::Inode;

    fn dummy_inode() -> Inode {
        let buf = vec![0u8; 128];
        Inode::parse(InodeNumber::from(12), &buf).unwrap()
    }

    #[test]
    fn caches_and_returns_same_inode() {
        let table = InodeTable::new(8);
        let loaded = table
            .get_or_load(InodeNumber::from(12), || Ok(dummy_inode()))
            .unwrap();
        assert!(table.get(InodeNumber::from(12)).is_some());
        assert_eq!(loaded.number.get(), 12);
    }

    #[test]
    fn evicts_least_recently_used_past_capacity() {
        let table = InodeTable::new(MIN_CAPACITY);
        for i in 0..MIN_CAPACITY as u32 + 1 {
            table
                .get_or_load(InodeNumber::from(i + 1), || {
                    let mut buf = vec![0u8; 128];
                    buf[26..28].copy_from_slice(&1u16.to_le_bytes());
                    Inode::parse(InodeNumber::from(i + 1), &buf)
                })
                .unwrap();
        }
        assert_eq!(table.entries.read().len(), MIN_CAPACITY);
    }
}
