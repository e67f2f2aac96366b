//! Committed tree state: the node and membership tables plus the derived
//! indexes that make reads O(depth) or O(subtree).
//!
//! Derived indexes only ever list *active* records, so every read that goes
//! through them already excludes soft-deleted nodes and memberships.

use std::collections::{BTreeSet, HashMap};

use gallery_types::{GalleryId, ImageId};

use crate::membership::GalleryImageMembership;
use crate::node::GalleryNode;

/// Writes staged by a transaction, applied in one step on commit.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    pub nodes: Vec<GalleryNode>,
    pub memberships: Vec<GalleryImageMembership>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.memberships.is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct TreeState {
    /// Every node ever created, including soft-deleted ones.
    pub nodes: HashMap<GalleryId, GalleryNode>,
    /// Every membership ever created, including soft-deleted ones.
    pub memberships: HashMap<(GalleryId, ImageId), GalleryImageMembership>,
    /// Active parent -> active children.
    pub children: HashMap<GalleryId, BTreeSet<GalleryId>>,
    /// Active nodes without a parent.
    pub roots: BTreeSet<GalleryId>,
    /// Active gallery -> images with an active membership.
    pub members: HashMap<GalleryId, BTreeSet<ImageId>>,
    /// Image -> galleries holding an active membership.
    pub image_galleries: HashMap<ImageId, BTreeSet<GalleryId>>,
}

impl TreeState {
    /// Rebuild state and indexes from raw tables.
    pub fn rebuild(
        nodes: impl IntoIterator<Item = GalleryNode>,
        memberships: impl IntoIterator<Item = GalleryImageMembership>,
    ) -> Self {
        let mut state = Self::default();
        for node in nodes {
            state.put_node(node);
        }
        for membership in memberships {
            state.put_membership(membership);
        }
        state
    }

    /// Look up a node, hiding soft-deleted ones.
    pub fn active(&self, id: &GalleryId) -> Option<&GalleryNode> {
        self.nodes.get(id).filter(|n| !n.is_deleted())
    }

    /// Look up a membership, hiding soft-deleted ones.
    pub fn active_membership(
        &self,
        gallery: &GalleryId,
        image: &ImageId,
    ) -> Option<&GalleryImageMembership> {
        self.memberships
            .get(&(*gallery, *image))
            .filter(|m| !m.is_deleted())
    }

    pub fn child_ids(&self, id: &GalleryId) -> impl Iterator<Item = &GalleryId> {
        self.children.get(id).into_iter().flatten()
    }

    pub fn member_ids(&self, id: &GalleryId) -> impl Iterator<Item = &ImageId> {
        self.members.get(id).into_iter().flatten()
    }

    /// Apply committed writes. Infallible so a commit is all-or-nothing.
    pub fn apply(&mut self, changes: ChangeSet) {
        for node in changes.nodes {
            self.put_node(node);
        }
        for membership in changes.memberships {
            self.put_membership(membership);
        }
    }

    fn put_node(&mut self, node: GalleryNode) {
        if let Some(old) = self.nodes.get(&node.id) {
            if !old.is_deleted() {
                match old.parent_id {
                    Some(parent) => remove_from(&mut self.children, &parent, &old.id),
                    None => {
                        self.roots.remove(&old.id);
                    }
                }
            }
        }
        if !node.is_deleted() {
            match node.parent_id {
                Some(parent) => {
                    self.children.entry(parent).or_default().insert(node.id);
                }
                None => {
                    self.roots.insert(node.id);
                }
            }
        }
        self.nodes.insert(node.id, node);
    }

    fn put_membership(&mut self, membership: GalleryImageMembership) {
        let (gallery, image) = membership.key();
        if membership.is_deleted() {
            remove_from(&mut self.members, &gallery, &image);
            remove_from(&mut self.image_galleries, &image, &gallery);
        } else {
            self.members.entry(gallery).or_default().insert(image);
            self.image_galleries.entry(image).or_default().insert(gallery);
        }
        self.memberships.insert((gallery, image), membership);
    }
}

fn remove_from<K, V>(index: &mut HashMap<K, BTreeSet<V>>, key: &K, value: &V)
where
    K: std::hash::Hash + Eq,
    V: Ord,
{
    if let Some(set) = index.get_mut(key) {
        set.remove(value);
        if set.is_empty() {
            index.remove(key);
        }
    }
}
