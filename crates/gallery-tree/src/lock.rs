//! Fail-fast lock table over gallery ids.
//!
//! A mutation claims every id in its scope (the node's ancestor chain, plus
//! the destination chain for moves) in one step. If any id is already held
//! the claim fails with [`TreeError::Contention`] instead of waiting, so two
//! mutations can never deadlock on each other. Claims on disjoint chains
//! proceed independently.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use gallery_types::GalleryId;

use crate::error::{TreeError, TreeResult};

#[derive(Debug, Default)]
pub(crate) struct LockTable {
    held: Mutex<HashSet<GalleryId>>,
}

impl LockTable {
    /// Claim all of `ids` or none of them.
    pub fn try_acquire(&self, ids: BTreeSet<GalleryId>) -> TreeResult<ChainGuard<'_>> {
        let mut held = self.held.lock().map_err(|_| TreeError::LockPoisoned)?;
        if let Some(busy) = ids.iter().find(|id| held.contains(*id)) {
            warn!(gallery = %busy, "chain lock contention");
            return Err(TreeError::Contention { gallery: *busy });
        }
        held.extend(ids.iter().copied());
        Ok(ChainGuard { table: self, ids })
    }

    #[cfg(test)]
    pub fn held_count(&self) -> usize {
        self.held.lock().map(|h| h.len()).unwrap_or(0)
    }
}

/// Releases its ids when dropped.
#[derive(Debug)]
pub(crate) struct ChainGuard<'a> {
    table: &'a LockTable,
    ids: BTreeSet<GalleryId>,
}

impl ChainGuard<'_> {
    /// First id in `scope` this guard does not hold.
    pub fn first_uncovered(&self, scope: &BTreeSet<GalleryId>) -> Option<GalleryId> {
        scope.difference(&self.ids).next().copied()
    }
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .table
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for id in &self.ids {
            held.remove(id);
        }
    }
}
