//! The gallery tree store.
//!
//! [`TreeStore`] owns the committed [`TreeState`] behind a `RwLock` and a
//! [`LockTable`] of per-gallery claims. Every mutation runs as one unit of
//! work:
//!
//! 1. compute its lock scope (the ancestor chains it touches) under a read lock,
//! 2. claim the scope in the lock table, failing fast with `Contention`,
//! 3. re-read the scope and fail with `Contention` if it moved meanwhile,
//! 4. run against a [`Transaction`] overlay that stages all writes,
//! 5. commit the staged writes in one infallible step under the write lock.
//!
//! An error anywhere before step 5 discards the overlay, so stored paths and
//! counters are never left half-updated.

use std::collections::BTreeSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use gallery_types::{GalleryId, GalleryType, ImageId};

use crate::cover;
use crate::error::{TreeError, TreeResult};
use crate::lock::LockTable;
use crate::membership::{GalleryImageMembership, MembershipOptions};
use crate::node::{
    sibling_key, GalleryNode, GalleryStatistics, GallerySubtree, GalleryUpdate, NewGallery,
};
use crate::rollup::{self, recompute_counts, CountReport};
use crate::state::TreeState;
use crate::txn::Transaction;

/// Hierarchical gallery store with materialized paths and rolled-up counts.
#[derive(Debug, Default)]
pub struct TreeStore {
    pub(crate) state: RwLock<TreeState>,
    locks: LockTable,
}

impl TreeStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_state(state: TreeState) -> Self {
        Self {
            state: RwLock::new(state),
            locks: LockTable::default(),
        }
    }

    pub(crate) fn read_state(&self) -> TreeResult<RwLockReadGuard<'_, TreeState>> {
        self.state.read().map_err(|_| TreeError::LockPoisoned)
    }

    fn write_state(&self) -> TreeResult<RwLockWriteGuard<'_, TreeState>> {
        self.state.write().map_err(|_| TreeError::LockPoisoned)
    }

    /// Run one unit of work. See the module docs for the protocol.
    fn mutate<T, S, F>(&self, scope: S, op: F) -> TreeResult<T>
    where
        S: Fn(&TreeState) -> TreeResult<BTreeSet<GalleryId>>,
        F: FnOnce(&mut Transaction<'_>) -> TreeResult<T>,
    {
        let wanted = scope(&*self.read_state()?)?;
        let guard = self.locks.try_acquire(wanted)?;

        let (value, changes) = {
            let state = self.read_state()?;
            let current = scope(&*state)?;
            if let Some(gallery) = guard.first_uncovered(&current) {
                return Err(TreeError::Contention { gallery });
            }
            let mut tx = Transaction::new(&state);
            let value = op(&mut tx)?;
            (value, tx.into_changes())
        };

        if !changes.is_empty() {
            debug!(
                nodes = changes.nodes.len(),
                memberships = changes.memberships.len(),
                "committing tree mutation"
            );
            self.write_state()?.apply(changes);
        }
        drop(guard);
        Ok(value)
    }

    // ---------------------------------------------------------------
    // Node mutations
    // ---------------------------------------------------------------

    /// Create a gallery, optionally under an existing active parent.
    ///
    /// Fails with `InvalidParent` if the parent is missing or deleted.
    pub fn create_node(&self, new: NewGallery) -> TreeResult<GalleryNode> {
        let id = GalleryId::new();
        let parent = new.parent_id;
        self.mutate(
            |state| {
                let mut scope = parent_chain(state, parent)?;
                scope.insert(id);
                Ok(scope)
            },
            |tx| {
                let mut path = match parent {
                    Some(p) => tx
                        .active(&p)
                        .map_err(|_| TreeError::InvalidParent(p))?
                        .path
                        .clone(),
                    None => Vec::new(),
                };
                path.push(id);
                let now = tx.now();
                let node = GalleryNode {
                    id,
                    name: new.name,
                    description: new.description,
                    gallery_type: new.gallery_type,
                    parent_id: parent,
                    level: (path.len() - 1) as u32,
                    path,
                    sort_order: new.sort_order,
                    is_public: new.is_public,
                    cover_image_id: None,
                    direct_image_count: 0,
                    direct_sub_gallery_count: 0,
                    total_image_count: 0,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                };
                tx.insert_node(node.clone());
                if let Some(p) = parent {
                    recompute_counts(tx, &p)?;
                }
                debug!(gallery = %id, level = node.level, "created gallery");
                Ok(node)
            },
        )
    }

    /// Re-parent a gallery (`None` makes it a root).
    ///
    /// Fails with `CycleDetected` if the new parent is the node itself or one
    /// of its descendants. Rewrites the path and level of the whole subtree
    /// and rolls counts up both the old and the new ancestor chain.
    pub fn move_node(&self, id: &GalleryId, new_parent: Option<GalleryId>) -> TreeResult<()> {
        let id = *id;
        self.mutate(
            |state| {
                let mut scope = chain(state, &id)?;
                scope.extend(parent_chain(state, new_parent)?);
                Ok(scope)
            },
            |tx| {
                let node = tx.active(&id)?.clone();
                let prefix = match new_parent {
                    Some(p) => {
                        let parent = tx.active(&p).map_err(|_| TreeError::InvalidParent(p))?;
                        if node.contains(parent) {
                            return Err(TreeError::CycleDetected { node: id, target: p });
                        }
                        parent.path.clone()
                    }
                    None => Vec::new(),
                };
                if node.parent_id == new_parent {
                    return Ok(());
                }

                let depth = node.path.len() - 1;
                let subtree = tx.subtree(&id);
                for member in &subtree {
                    let n = tx.node_mut(member)?;
                    let mut path = prefix.clone();
                    path.extend_from_slice(&n.path[depth..]);
                    n.level = (path.len() - 1) as u32;
                    n.path = path;
                }
                tx.node_mut(&id)?.parent_id = new_parent;

                if let Some(old) = node.parent_id {
                    recompute_counts(tx, &old)?;
                }
                if let Some(new) = new_parent {
                    recompute_counts(tx, &new)?;
                }
                cover::repair_covers(tx, node.ancestor_ids().iter().rev().copied())?;

                info!(
                    gallery = %id,
                    from = ?node.parent_id,
                    to = ?new_parent,
                    subtree = subtree.len(),
                    "moved gallery"
                );
                Ok(())
            },
        )
    }

    /// Soft-delete a gallery.
    ///
    /// Without `cascade`, fails with `NotEmpty` if the gallery has active
    /// children or memberships. With `cascade`, the whole subtree and its
    /// memberships are soft-deleted and the former ancestors lose the
    /// subtree's total. Returns the number of galleries deleted.
    pub fn delete_node(&self, id: &GalleryId, cascade: bool) -> TreeResult<usize> {
        let id = *id;
        self.mutate(
            |state| chain(state, &id),
            |tx| {
                let node = tx.active(&id)?.clone();
                let children = tx.children(&id);
                let images = tx.members(&id);
                if !cascade && (!children.is_empty() || !images.is_empty()) {
                    return Err(TreeError::NotEmpty {
                        gallery: id,
                        children: children.len(),
                        images: images.len(),
                    });
                }

                let now = tx.now();
                let subtree = tx.subtree(&id);
                let mut removed_memberships = 0usize;
                for gallery in &subtree {
                    for image in tx.members(gallery) {
                        if let Some(m) = tx.membership_mut(gallery, &image) {
                            m.deleted_at = Some(now);
                            removed_memberships += 1;
                        }
                    }
                }
                for gallery in &subtree {
                    tx.node_mut(gallery)?.deleted_at = Some(now);
                }

                if let Some(parent) = node.parent_id {
                    recompute_counts(tx, &parent)?;
                    cover::repair_covers(tx, node.ancestor_ids().iter().rev().copied())?;
                }
                info!(
                    gallery = %id,
                    galleries = subtree.len(),
                    memberships = removed_memberships,
                    images = node.total_image_count,
                    "deleted gallery"
                );
                Ok(subtree.len())
            },
        )
    }

    /// Edit presentation fields of a gallery.
    pub fn update_node(&self, id: &GalleryId, update: GalleryUpdate) -> TreeResult<GalleryNode> {
        let id = *id;
        self.mutate(
            |state| chain(state, &id),
            |tx| {
                tx.active(&id)?;
                let node = tx.node_mut(&id)?;
                update.apply_to(node);
                Ok(node.clone())
            },
        )
    }

    // ---------------------------------------------------------------
    // Membership mutations
    // ---------------------------------------------------------------

    /// Add an image to a gallery.
    ///
    /// Idempotent: an existing active membership is returned unchanged. A
    /// previously removed membership for the same pair is revived with the
    /// new options.
    pub fn add_image(
        &self,
        gallery: &GalleryId,
        image: &ImageId,
        options: MembershipOptions,
    ) -> TreeResult<GalleryImageMembership> {
        let (gallery, image) = (*gallery, *image);
        self.mutate(
            |state| chain(state, &gallery),
            |tx| {
                tx.active(&gallery)?;
                if let Some(existing) = tx.active_membership(&gallery, &image) {
                    return Ok(existing.clone());
                }

                let now = tx.now();
                let membership = match tx.membership(&gallery, &image).cloned() {
                    Some(mut revived) => {
                        revived.sort_order = options.sort_order;
                        revived.is_featured = options.is_featured;
                        revived.is_cover = false;
                        revived.updated_at = now;
                        revived.deleted_at = None;
                        revived
                    }
                    None => {
                        let mut fresh = GalleryImageMembership::new(gallery, image, &options, now);
                        fresh.is_cover = false;
                        fresh
                    }
                };
                tx.put_membership(membership);
                recompute_counts(tx, &gallery)?;
                if options.is_cover {
                    cover::set_cover(tx, &gallery, &image)?;
                }
                debug!(gallery = %gallery, image = %image, "added image");

                tx.active_membership(&gallery, &image)
                    .cloned()
                    .ok_or(TreeError::ImageNotMember { gallery, image })
            },
        )
    }

    /// Remove an image from a gallery. Returns `false` if it was not a member.
    pub fn remove_image(&self, gallery: &GalleryId, image: &ImageId) -> TreeResult<bool> {
        let (gallery, image) = (*gallery, *image);
        self.mutate(
            |state| chain(state, &gallery),
            |tx| {
                let path = tx.active(&gallery)?.path.clone();
                if tx.active_membership(&gallery, &image).is_none() {
                    return Ok(false);
                }
                let now = tx.now();
                if let Some(m) = tx.membership_mut(&gallery, &image) {
                    m.deleted_at = Some(now);
                    m.is_cover = false;
                }
                recompute_counts(tx, &gallery)?;
                cover::repair_covers(tx, path.into_iter().rev())?;
                debug!(gallery = %gallery, image = %image, "removed image");
                Ok(true)
            },
        )
    }

    /// Change the presentation flags of an existing membership.
    ///
    /// Turning `is_cover` on makes the image the gallery's cover; turning it
    /// off on the current cover leaves the gallery without one.
    pub fn update_membership(
        &self,
        gallery: &GalleryId,
        image: &ImageId,
        options: MembershipOptions,
    ) -> TreeResult<GalleryImageMembership> {
        let (gallery, image) = (*gallery, *image);
        self.mutate(
            |state| chain(state, &gallery),
            |tx| {
                let current_cover = tx.active(&gallery)?.cover_image_id;
                let membership = tx
                    .active_membership(&gallery, &image)
                    .ok_or(TreeError::ImageNotMember { gallery, image })?;
                let was_cover = membership.is_cover;

                if let Some(m) = tx.membership_mut(&gallery, &image) {
                    m.sort_order = options.sort_order;
                    m.is_featured = options.is_featured;
                }
                if options.is_cover {
                    cover::set_cover(tx, &gallery, &image)?;
                } else if was_cover || current_cover == Some(image) {
                    cover::clear_cover(tx, &gallery)?;
                }

                tx.active_membership(&gallery, &image)
                    .cloned()
                    .ok_or(TreeError::ImageNotMember { gallery, image })
            },
        )
    }

    /// Make `image` the cover of `gallery`.
    ///
    /// The image must be held by the gallery or one of its descendants.
    pub fn set_cover(&self, gallery: &GalleryId, image: &ImageId) -> TreeResult<()> {
        let (gallery, image) = (*gallery, *image);
        self.mutate(
            |state| chain(state, &gallery),
            |tx| cover::set_cover(tx, &gallery, &image),
        )
    }

    /// Remove the cover of `gallery`.
    pub fn clear_cover(&self, gallery: &GalleryId) -> TreeResult<()> {
        let gallery = *gallery;
        self.mutate(
            |state| chain(state, &gallery),
            |tx| cover::clear_cover(tx, &gallery),
        )
    }

    /// Notification from the image collaborator that `image` was deleted.
    ///
    /// Removes every active membership of the image, rolls counts up each
    /// affected chain and repairs covers that pointed at it. Returns the
    /// number of memberships removed.
    pub fn image_deleted(&self, image: &ImageId) -> TreeResult<usize> {
        let image = *image;
        self.mutate(
            |state| {
                let mut scope = BTreeSet::new();
                for gallery in state.image_galleries.get(&image).into_iter().flatten() {
                    if let Some(node) = state.active(gallery) {
                        scope.extend(node.path.iter().copied());
                    }
                }
                Ok(scope)
            },
            |tx| {
                let galleries = tx.galleries_of(&image);
                let now = tx.now();
                let mut chains = BTreeSet::new();
                for gallery in &galleries {
                    if let Some(m) = tx.membership_mut(gallery, &image) {
                        m.deleted_at = Some(now);
                        m.is_cover = false;
                    }
                    recompute_counts(tx, gallery)?;
                    chains.extend(tx.active(gallery)?.path.iter().copied());
                }
                cover::repair_covers(tx, chains)?;
                if !galleries.is_empty() {
                    info!(image = %image, galleries = galleries.len(), "image removed from galleries");
                }
                Ok(galleries.len())
            },
        )
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// An active gallery.
    pub fn get_node(&self, id: &GalleryId) -> TreeResult<GalleryNode> {
        self.read_state()?
            .active(id)
            .cloned()
            .ok_or(TreeError::NodeNotFound(*id))
    }

    /// Any gallery record ever created, including soft-deleted ones.
    pub fn get_node_record(&self, id: &GalleryId) -> TreeResult<Option<GalleryNode>> {
        Ok(self.read_state()?.nodes.get(id).cloned())
    }

    /// Number of active galleries.
    pub fn len(&self) -> TreeResult<usize> {
        Ok(self
            .read_state()?
            .nodes
            .values()
            .filter(|n| !n.is_deleted())
            .count())
    }

    /// Returns `true` if there are no active galleries.
    pub fn is_empty(&self) -> TreeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Active root galleries ordered by `(sort_order, id)`.
    pub fn roots(&self) -> TreeResult<Vec<GalleryNode>> {
        let state = self.read_state()?;
        Ok(sorted_nodes(&state, state.roots.iter()))
    }

    /// Active direct children ordered by `(sort_order, id)`.
    pub fn children(&self, id: &GalleryId) -> TreeResult<Vec<GalleryNode>> {
        let state = self.read_state()?;
        state.active(id).ok_or(TreeError::NodeNotFound(*id))?;
        Ok(sorted_nodes(&state, state.child_ids(id)))
    }

    /// Ancestors from the root down to the parent, read off the path.
    pub fn get_ancestors(&self, id: &GalleryId) -> TreeResult<Vec<GalleryNode>> {
        let state = self.read_state()?;
        let node = state.active(id).ok_or(TreeError::NodeNotFound(*id))?;
        node.ancestor_ids()
            .iter()
            .map(|a| state.active(a).cloned().ok_or(TreeError::NodeNotFound(*a)))
            .collect()
    }

    /// The gallery and all its active descendants.
    pub fn get_subtree(&self, id: &GalleryId) -> TreeResult<GallerySubtree> {
        let state = self.read_state()?;
        let node = state.active(id).ok_or(TreeError::NodeNotFound(*id))?;
        Ok(build_subtree(&state, node))
    }

    /// Every active root with its subtree.
    pub fn get_tree(&self) -> TreeResult<Vec<GallerySubtree>> {
        let state = self.read_state()?;
        Ok(sorted_nodes(&state, state.roots.iter())
            .iter()
            .map(|root| build_subtree(&state, root))
            .collect())
    }

    /// Case-insensitive substring search over names and descriptions.
    pub fn search(
        &self,
        keyword: &str,
        gallery_type: Option<GalleryType>,
    ) -> TreeResult<Vec<GalleryNode>> {
        let needle = keyword.to_lowercase();
        let state = self.read_state()?;
        let mut hits: Vec<GalleryNode> = state
            .nodes
            .values()
            .filter(|n| !n.is_deleted())
            .filter(|n| gallery_type.map_or(true, |t| n.gallery_type == t))
            .filter(|n| {
                n.name.to_lowercase().contains(&needle)
                    || n.description
                        .as_ref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hits)
    }

    /// Counters and position of a gallery.
    pub fn statistics(&self, id: &GalleryId) -> TreeResult<GalleryStatistics> {
        let state = self.read_state()?;
        let node = state.active(id).ok_or(TreeError::NodeNotFound(*id))?;
        let mut descendants = 0u64;
        let mut stack: Vec<&GalleryId> = state.child_ids(id).collect();
        while let Some(child) = stack.pop() {
            descendants += 1;
            stack.extend(state.child_ids(child));
        }
        Ok(GalleryStatistics {
            gallery_id: node.id,
            name: node.name.clone(),
            direct_image_count: node.direct_image_count,
            direct_sub_gallery_count: node.direct_sub_gallery_count,
            descendant_count: descendants,
            total_image_count: node.total_image_count,
            level: node.level,
            path: node.path.clone(),
        })
    }

    /// Names along the path joined with `/`, e.g. `Travel/2024/Rome`.
    pub fn display_path(&self, id: &GalleryId) -> TreeResult<String> {
        let state = self.read_state()?;
        let node = state.active(id).ok_or(TreeError::NodeNotFound(*id))?;
        let names: Vec<&str> = node
            .path
            .iter()
            .map(|p| {
                state
                    .active(p)
                    .map(|n| n.name.as_str())
                    .ok_or(TreeError::NodeNotFound(*p))
            })
            .collect::<TreeResult<_>>()?;
        Ok(names.join("/"))
    }

    /// Active memberships of a gallery, optionally including every
    /// descendant, ordered by `(sort_order, image id)`.
    pub fn gallery_images(
        &self,
        id: &GalleryId,
        include_descendants: bool,
    ) -> TreeResult<Vec<GalleryImageMembership>> {
        let state = self.read_state()?;
        state.active(id).ok_or(TreeError::NodeNotFound(*id))?;
        let mut galleries = vec![*id];
        if include_descendants {
            let mut stack: Vec<GalleryId> = state.child_ids(id).copied().collect();
            while let Some(child) = stack.pop() {
                galleries.push(child);
                stack.extend(state.child_ids(&child).copied());
            }
        }
        let mut out: Vec<GalleryImageMembership> = galleries
            .iter()
            .flat_map(|g| {
                state
                    .member_ids(g)
                    .filter_map(|image| state.active_membership(g, image))
            })
            .cloned()
            .collect();
        out.sort_by_key(GalleryImageMembership::order_key);
        Ok(out)
    }

    /// The active membership for a pair, if any.
    pub fn membership(
        &self,
        gallery: &GalleryId,
        image: &ImageId,
    ) -> TreeResult<Option<GalleryImageMembership>> {
        Ok(self.read_state()?.active_membership(gallery, image).cloned())
    }

    /// Active galleries directly holding `image`, ascending by id.
    pub fn galleries_for_image(&self, image: &ImageId) -> TreeResult<Vec<GalleryNode>> {
        let state = self.read_state()?;
        Ok(state
            .image_galleries
            .get(image)
            .into_iter()
            .flatten()
            .filter_map(|g| state.active(g))
            .cloned()
            .collect())
    }

    /// Recount `id` and its subtree from scratch and compare against the
    /// stored counters and paths. Read-only.
    pub fn verify(&self, id: &GalleryId) -> TreeResult<CountReport> {
        rollup::verify(&*self.read_state()?, id)
    }

    /// [`verify`](Self::verify) over every root.
    pub fn verify_all(&self) -> TreeResult<CountReport> {
        rollup::verify_all(&*self.read_state()?)
    }
}

/// Lock scope of an active gallery: its whole path.
fn chain(state: &TreeState, id: &GalleryId) -> TreeResult<BTreeSet<GalleryId>> {
    state
        .active(id)
        .map(|n| n.path.iter().copied().collect())
        .ok_or(TreeError::NodeNotFound(*id))
}

fn parent_chain(state: &TreeState, parent: Option<GalleryId>) -> TreeResult<BTreeSet<GalleryId>> {
    match parent {
        Some(p) => chain(state, &p).map_err(|_| TreeError::InvalidParent(p)),
        None => Ok(BTreeSet::new()),
    }
}

fn sorted_nodes<'a>(
    state: &TreeState,
    ids: impl Iterator<Item = &'a GalleryId>,
) -> Vec<GalleryNode> {
    let mut nodes: Vec<GalleryNode> = ids.filter_map(|id| state.active(id)).cloned().collect();
    nodes.sort_by_key(sibling_key);
    nodes
}

fn build_subtree(state: &TreeState, node: &GalleryNode) -> GallerySubtree {
    let children = sorted_nodes(state, state.child_ids(&node.id))
        .iter()
        .map(|child| build_subtree(state, child))
        .collect();
    GallerySubtree {
        node: node.clone(),
        children,
    }
}
