//! Whole-store snapshots.
//!
//! A [`TreeSnapshot`] carries every node and membership record, soft-deleted
//! ones included, so history survives a round trip. Derived indexes are not
//! stored; [`TreeStore::from_snapshot`] rebuilds them and refuses any
//! snapshot whose paths or counters do not check out.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{TreeError, TreeResult};
use crate::membership::GalleryImageMembership;
use crate::node::GalleryNode;
use crate::rollup;
use crate::state::TreeState;
use crate::store::TreeStore;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable image of a [`TreeStore`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub version: u32,
    pub nodes: Vec<GalleryNode>,
    pub memberships: Vec<GalleryImageMembership>,
}

impl TreeSnapshot {
    /// Serialize to bincode bytes.
    pub fn to_bytes(&self) -> TreeResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TreeError::Serialization(e.to_string()))
    }

    /// Deserialize from bincode bytes.
    pub fn from_bytes(bytes: &[u8]) -> TreeResult<Self> {
        let snapshot: Self =
            bincode::deserialize(bytes).map_err(|e| TreeError::Serialization(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(TreeError::CorruptSnapshot(format!(
                "unsupported version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }

    /// Write to `path` via a sibling temporary file and a rename, so readers
    /// never observe a half-written snapshot.
    pub fn save_to(&self, path: &Path) -> TreeResult<()> {
        let bytes = self.to_bytes()?;
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), bytes = bytes.len(), "wrote tree snapshot");
        Ok(())
    }

    /// Read a snapshot written by [`save_to`](Self::save_to).
    pub fn load_from(path: &Path) -> TreeResult<Self> {
        Self::from_bytes(&fs::read(path)?)
    }
}

impl TreeStore {
    /// Capture every record in the store.
    pub fn snapshot(&self) -> TreeResult<TreeSnapshot> {
        let state = self.read_state()?;
        let mut nodes: Vec<GalleryNode> = state.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        let mut memberships: Vec<GalleryImageMembership> =
            state.memberships.values().cloned().collect();
        memberships.sort_by_key(GalleryImageMembership::key);
        Ok(TreeSnapshot {
            version: SNAPSHOT_VERSION,
            nodes,
            memberships,
        })
    }

    /// Rebuild a store from a snapshot, checking structure and counters.
    pub fn from_snapshot(snapshot: TreeSnapshot) -> TreeResult<Self> {
        let state = TreeState::rebuild(snapshot.nodes, snapshot.memberships);

        for node in state.nodes.values().filter(|n| !n.is_deleted()) {
            let parent = match node.parent_id {
                Some(p) => Some(state.active(&p).ok_or_else(|| {
                    TreeError::CorruptSnapshot(format!("gallery {} has no active parent", node.id))
                })?),
                None => None,
            };
            if !node.path_consistent_with(parent) {
                return Err(TreeError::CorruptSnapshot(format!(
                    "gallery {} has an inconsistent path",
                    node.id
                )));
            }
        }
        for membership in state.memberships.values().filter(|m| !m.is_deleted()) {
            if state.active(&membership.gallery_id).is_none() {
                return Err(TreeError::CorruptSnapshot(format!(
                    "active membership of image {} in missing gallery {}",
                    membership.image_id, membership.gallery_id
                )));
            }
        }

        let report = rollup::verify_all(&state)?;
        if let Some(bad) = report.mismatches.first() {
            return Err(TreeError::CorruptSnapshot(format!(
                "gallery {} stores {:?} = {}, expected {}",
                bad.gallery, bad.field, bad.stored, bad.expected
            )));
        }
        info!(galleries = report.checked, "restored tree from snapshot");
        Ok(Self::from_state(state))
    }
}
