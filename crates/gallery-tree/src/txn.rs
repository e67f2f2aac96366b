//! Unit-of-work overlay over committed state.
//!
//! A [`Transaction`] reads through to the committed [`TreeState`] and stages
//! every write in its own maps. Reads see staged writes first. Dropping a
//! transaction discards its writes; [`Transaction::into_changes`] hands them
//! to the store for an atomic commit.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use gallery_types::{GalleryId, ImageId};

use crate::error::{TreeError, TreeResult};
use crate::membership::GalleryImageMembership;
use crate::node::GalleryNode;
use crate::state::{ChangeSet, TreeState};

pub(crate) struct Transaction<'a> {
    base: &'a TreeState,
    nodes: HashMap<GalleryId, GalleryNode>,
    memberships: HashMap<(GalleryId, ImageId), GalleryImageMembership>,
    now: DateTime<Utc>,
}

impl<'a> Transaction<'a> {
    pub fn new(base: &'a TreeState) -> Self {
        Self {
            base,
            nodes: HashMap::new(),
            memberships: HashMap::new(),
            now: Utc::now(),
        }
    }

    /// Timestamp shared by every write in this unit of work.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    // ---------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------

    /// Any node, deleted or not.
    pub fn node(&self, id: &GalleryId) -> Option<&GalleryNode> {
        self.nodes.get(id).or_else(|| self.base.nodes.get(id))
    }

    /// An active node, or `NodeNotFound`.
    pub fn active(&self, id: &GalleryId) -> TreeResult<&GalleryNode> {
        self.node(id)
            .filter(|n| !n.is_deleted())
            .ok_or(TreeError::NodeNotFound(*id))
    }

    /// Stage a node for modification, copying it from committed state on
    /// first touch. The caller decides whether deleted nodes may be edited.
    pub fn node_mut(&mut self, id: &GalleryId) -> TreeResult<&mut GalleryNode> {
        if !self.nodes.contains_key(id) {
            let committed = self
                .base
                .nodes
                .get(id)
                .cloned()
                .ok_or(TreeError::NodeNotFound(*id))?;
            self.nodes.insert(*id, committed);
        }
        let now = self.now;
        let node = self.nodes.get_mut(id).ok_or(TreeError::NodeNotFound(*id))?;
        node.updated_at = now;
        Ok(node)
    }

    pub fn insert_node(&mut self, node: GalleryNode) {
        self.nodes.insert(node.id, node);
    }

    /// Active children of `id`, including staged re-parentings.
    pub fn children(&self, id: &GalleryId) -> BTreeSet<GalleryId> {
        let mut out: BTreeSet<GalleryId> = self
            .base
            .child_ids(id)
            .filter(|child| {
                self.node(child)
                    .is_some_and(|n| !n.is_deleted() && n.parent_id.as_ref() == Some(id))
            })
            .copied()
            .collect();
        out.extend(
            self.nodes
                .values()
                .filter(|n| !n.is_deleted() && n.parent_id.as_ref() == Some(id))
                .map(|n| n.id),
        );
        out
    }

    /// `id` and all its active descendants, depth-first pre-order.
    pub fn subtree(&self, id: &GalleryId) -> Vec<GalleryId> {
        let mut out = Vec::new();
        let mut stack = vec![*id];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(&current).into_iter().rev());
        }
        out
    }

    // ---------------------------------------------------------------
    // Memberships
    // ---------------------------------------------------------------

    /// Any membership record for the pair, deleted or not.
    pub fn membership(&self, gallery: &GalleryId, image: &ImageId) -> Option<&GalleryImageMembership> {
        let key = (*gallery, *image);
        self.memberships
            .get(&key)
            .or_else(|| self.base.memberships.get(&key))
    }

    pub fn active_membership(
        &self,
        gallery: &GalleryId,
        image: &ImageId,
    ) -> Option<&GalleryImageMembership> {
        self.membership(gallery, image).filter(|m| !m.is_deleted())
    }

    pub fn membership_mut(
        &mut self,
        gallery: &GalleryId,
        image: &ImageId,
    ) -> Option<&mut GalleryImageMembership> {
        let key = (*gallery, *image);
        if !self.memberships.contains_key(&key) {
            let committed = self.base.memberships.get(&key)?.clone();
            self.memberships.insert(key, committed);
        }
        let now = self.now;
        let membership = self.memberships.get_mut(&key)?;
        membership.updated_at = now;
        Some(membership)
    }

    pub fn put_membership(&mut self, membership: GalleryImageMembership) {
        self.memberships.insert(membership.key(), membership);
    }

    /// Images with an active membership in `gallery`.
    pub fn members(&self, gallery: &GalleryId) -> BTreeSet<ImageId> {
        let mut out: BTreeSet<ImageId> = self
            .base
            .member_ids(gallery)
            .filter(|image| self.active_membership(gallery, image).is_some())
            .copied()
            .collect();
        out.extend(
            self.memberships
                .values()
                .filter(|m| !m.is_deleted() && &m.gallery_id == gallery)
                .map(|m| m.image_id),
        );
        out
    }

    /// Galleries holding an active membership for `image`.
    pub fn galleries_of(&self, image: &ImageId) -> BTreeSet<GalleryId> {
        let mut out: BTreeSet<GalleryId> = self
            .base
            .image_galleries
            .get(image)
            .into_iter()
            .flatten()
            .filter(|gallery| self.active_membership(gallery, image).is_some())
            .copied()
            .collect();
        out.extend(
            self.memberships
                .values()
                .filter(|m| !m.is_deleted() && &m.image_id == image)
                .map(|m| m.gallery_id),
        );
        out
    }

    /// Hand the staged writes over for commit.
    pub fn into_changes(self) -> ChangeSet {
        ChangeSet {
            nodes: self.nodes.into_values().collect(),
            memberships: self.memberships.into_values().collect(),
        }
    }
}
