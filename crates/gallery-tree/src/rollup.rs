//! Statistics rollup: keeps per-gallery counters consistent with the tree.
//!
//! After any change to a gallery's memberships or children,
//! [`recompute_counts`] refreshes that gallery's direct counters from its
//! immediate memberships and children, recomputes its total from the
//! children's stored totals, and pushes the resulting delta up the ancestor
//! chain. Ancestors are adjusted, never rescanned, so the cost is
//! O(children + depth) per call.
//!
//! [`verify`] is the read-only counterpart: it recomputes everything below a
//! gallery from scratch and reports any stored value that disagrees.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use gallery_types::GalleryId;

use crate::error::{TreeError, TreeResult};
use crate::state::TreeState;
use crate::txn::Transaction;

/// Refresh the counters of `id` and propagate its total's change to every
/// ancestor. Returns the applied delta.
pub(crate) fn recompute_counts(tx: &mut Transaction<'_>, id: &GalleryId) -> TreeResult<i64> {
    let children = tx.children(id);
    let direct_images = tx.members(id).len() as u64;
    let child_total: u64 = children
        .iter()
        .filter_map(|child| tx.node(child))
        .map(|child| child.total_image_count)
        .sum();

    let node = tx.node_mut(id)?;
    let old_total = node.total_image_count;
    node.direct_image_count = direct_images;
    node.direct_sub_gallery_count = children.len() as u64;
    node.total_image_count = direct_images + child_total;
    let delta = node.total_image_count as i64 - old_total as i64;
    let ancestors = node.ancestor_ids().to_vec();

    if delta != 0 {
        for ancestor in ancestors.iter().rev() {
            let node = tx.node_mut(ancestor)?;
            node.total_image_count = node.total_image_count.saturating_add_signed(delta);
        }
    }
    debug!(gallery = %id, delta, depth = ancestors.len(), "rolled up image counts");
    Ok(delta)
}

/// Which stored value disagreed with a from-scratch recount.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountField {
    DirectImages,
    DirectSubGalleries,
    TotalImages,
}

/// One disagreement found by [`verify`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountMismatch {
    pub gallery: GalleryId,
    pub field: CountField,
    pub stored: u64,
    pub expected: u64,
}

/// Result of a consistency check over a subtree.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReport {
    /// Galleries examined.
    pub checked: usize,
    pub mismatches: Vec<CountMismatch>,
    /// Galleries whose path or level disagrees with their parent.
    pub path_errors: Vec<GalleryId>,
}

impl CountReport {
    /// Returns `true` if no discrepancy was found.
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty() && self.path_errors.is_empty()
    }

    pub(crate) fn merge(&mut self, other: CountReport) {
        self.checked += other.checked;
        self.mismatches.extend(other.mismatches);
        self.path_errors.extend(other.path_errors);
    }
}

/// Recount `root` and its active descendants from memberships and compare
/// with the stored counters and paths. Never writes.
pub(crate) fn verify(state: &TreeState, root: &GalleryId) -> TreeResult<CountReport> {
    if state.active(root).is_none() {
        return Err(TreeError::NodeNotFound(*root));
    }

    // Pre-order walk, then fold totals bottom-up in reverse.
    let mut order = Vec::new();
    let mut stack = vec![*root];
    while let Some(id) = stack.pop() {
        order.push(id);
        stack.extend(state.child_ids(&id).copied());
    }

    let mut report = CountReport::default();
    let mut totals: HashMap<GalleryId, u64> = HashMap::with_capacity(order.len());
    for id in order.iter().rev() {
        let Some(node) = state.active(id) else {
            continue;
        };
        report.checked += 1;

        let parent = node.parent_id.and_then(|p| state.active(&p));
        if !node.path_consistent_with(parent) || (node.parent_id.is_some() && parent.is_none()) {
            report.path_errors.push(*id);
        }

        let direct_images = state.member_ids(id).count() as u64;
        let children: Vec<&GalleryId> = state.child_ids(id).collect();
        let total = direct_images
            + children
                .iter()
                .map(|child| totals.get(*child).copied().unwrap_or(0))
                .sum::<u64>();
        totals.insert(*id, total);

        let checks = [
            (CountField::DirectImages, node.direct_image_count, direct_images),
            (
                CountField::DirectSubGalleries,
                node.direct_sub_gallery_count,
                children.len() as u64,
            ),
            (CountField::TotalImages, node.total_image_count, total),
        ];
        for (field, stored, expected) in checks {
            if stored != expected {
                report.mismatches.push(CountMismatch {
                    gallery: *id,
                    field,
                    stored,
                    expected,
                });
            }
        }
    }
    Ok(report)
}

/// [`verify`] over every root.
pub(crate) fn verify_all(state: &TreeState) -> TreeResult<CountReport> {
    let mut report = CountReport::default();
    for root in &state.roots {
        report.merge(verify(state, root)?);
    }
    Ok(report)
}
