//! Gallery-image membership records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gallery_types::{GalleryId, ImageId};

/// An image listed in a gallery. At most one record exists per
/// `(gallery_id, image_id)` pair; removal soft-deletes it and re-adding
/// revives the same record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImageMembership {
    pub gallery_id: GalleryId,
    pub image_id: ImageId,
    /// Position within the gallery; ties break by image id.
    pub sort_order: i32,
    /// Set on the membership backing the gallery's cover image.
    pub is_cover: bool,
    pub is_featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl GalleryImageMembership {
    pub(crate) fn new(
        gallery_id: GalleryId,
        image_id: ImageId,
        options: &MembershipOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            gallery_id,
            image_id,
            sort_order: options.sort_order,
            is_cover: options.is_cover,
            is_featured: options.is_featured,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Returns `true` if the membership has been removed.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Composite key.
    pub fn key(&self) -> (GalleryId, ImageId) {
        (self.gallery_id, self.image_id)
    }

    pub(crate) fn order_key(&self) -> (i32, ImageId, GalleryId) {
        (self.sort_order, self.image_id, self.gallery_id)
    }
}

/// Presentation flags supplied when adding or updating a membership.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipOptions {
    pub sort_order: i32,
    /// Make this image the gallery's cover.
    pub is_cover: bool,
    pub is_featured: bool,
}

impl MembershipOptions {
    pub fn cover() -> Self {
        Self {
            is_cover: true,
            ..Self::default()
        }
    }

    pub fn featured() -> Self {
        Self {
            is_featured: true,
            ..Self::default()
        }
    }

    pub fn at(sort_order: i32) -> Self {
        Self {
            sort_order,
            ..Self::default()
        }
    }
}
