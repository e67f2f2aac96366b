//! Cover image bookkeeping.
//!
//! A gallery's cover must be an image with an active membership in the
//! gallery or one of its descendants. Mutations that can break that rule
//! call [`repair_covers`] over the galleries they touched; an invalid cover
//! falls back to the gallery's first direct member by
//! `(sort_order, image id)`, or to no cover at all.

use tracing::warn;

use gallery_types::{GalleryId, ImageId};

use crate::error::{TreeError, TreeResult};
use crate::txn::Transaction;

/// Returns `true` if `image` is held by `gallery` or one of its descendants.
pub(crate) fn in_subtree(tx: &Transaction<'_>, gallery: &GalleryId, image: &ImageId) -> bool {
    tx.galleries_of(image).iter().any(|holder| {
        tx.node(holder)
            .is_some_and(|n| !n.is_deleted() && n.path.contains(gallery))
    })
}

/// Make `image` the cover of `gallery`, moving the `is_cover` flag onto its
/// direct membership (if it has one).
pub(crate) fn set_cover(tx: &mut Transaction<'_>, gallery: &GalleryId, image: &ImageId) -> TreeResult<()> {
    tx.active(gallery)?;
    if !in_subtree(tx, gallery, image) {
        return Err(TreeError::CoverNotInSubtree {
            gallery: *gallery,
            image: *image,
        });
    }
    for member in tx.members(gallery) {
        let flagged = tx
            .active_membership(gallery, &member)
            .is_some_and(|m| m.is_cover);
        let wanted = member == *image;
        if flagged != wanted {
            if let Some(m) = tx.membership_mut(gallery, &member) {
                m.is_cover = wanted;
            }
        }
    }
    tx.node_mut(gallery)?.cover_image_id = Some(*image);
    Ok(())
}

/// Clear the cover of `gallery` and every `is_cover` flag it holds.
pub(crate) fn clear_cover(tx: &mut Transaction<'_>, gallery: &GalleryId) -> TreeResult<()> {
    tx.active(gallery)?;
    for member in tx.members(gallery) {
        if tx.active_membership(gallery, &member).is_some_and(|m| m.is_cover) {
            if let Some(m) = tx.membership_mut(gallery, &member) {
                m.is_cover = false;
            }
        }
    }
    tx.node_mut(gallery)?.cover_image_id = None;
    Ok(())
}

/// First direct member of `gallery` by `(sort_order, image id)`.
fn fallback_for(tx: &Transaction<'_>, gallery: &GalleryId) -> Option<ImageId> {
    tx.members(gallery)
        .iter()
        .filter_map(|image| tx.active_membership(gallery, image))
        .min_by_key(|m| (m.sort_order, m.image_id))
        .map(|m| m.image_id)
}

/// Re-check the cover of each active gallery in `galleries`, falling back
/// where the current cover left the subtree.
pub(crate) fn repair_covers<I>(tx: &mut Transaction<'_>, galleries: I) -> TreeResult<()>
where
    I: IntoIterator<Item = GalleryId>,
{
    for gallery in galleries {
        let Some(node) = tx.node(&gallery).filter(|n| !n.is_deleted()) else {
            continue;
        };
        let Some(cover) = node.cover_image_id else {
            continue;
        };
        if in_subtree(tx, &gallery, &cover) {
            continue;
        }
        match fallback_for(tx, &gallery) {
            Some(next) => {
                warn!(gallery = %gallery, old = %cover, new = %next, "cover left subtree, falling back");
                set_cover(tx, &gallery, &next)?;
            }
            None => {
                warn!(gallery = %gallery, old = %cover, "cover left subtree, clearing");
                clear_cover(tx, &gallery)?;
            }
        }
    }
    Ok(())
}
