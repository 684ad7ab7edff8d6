//! Cooperative abort signaling.
//!
//! A single per-volume atomic flag, not process-wide global state: a consumer may have more than
//! one volume open at a time and aborting one must not touch the others. The flag is monotonic,
//! once set it stays set for the volume's lifetime.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct AbortFlag(AtomicBool);

impl AbortFlag {
    pub(crate) fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    pub(crate) fn signal(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Checked at the top of directory-walk iterations, extent-tree recursion and
    /// indirect-block recursion. Returns [`Error::Aborted`] as soon as the flag is observed set.
    pub(crate) fn check(&self) -> Result<()> {
        if self.is_set() {
            Err(Error::Aborted)
        } else {
            Ok(())
        }
    }
}
