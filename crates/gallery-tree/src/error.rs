//! Error types for gallery tree operations.

use gallery_types::{GalleryId, ImageId};

/// Errors that can occur during tree store operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The requested parent does not exist or has been deleted.
    #[error("invalid parent gallery: {0}")]
    InvalidParent(GalleryId),

    /// The move would place a gallery beneath itself.
    #[error("moving {node} under {target} would create a cycle")]
    CycleDetected {
        /// The gallery being moved.
        node: GalleryId,
        /// The requested new parent (the node itself or one of its descendants).
        target: GalleryId,
    },

    /// A non-cascading delete hit a gallery that still has content.
    #[error("gallery {gallery} is not empty: {children} sub-galleries, {images} images")]
    NotEmpty {
        /// The gallery that could not be deleted.
        gallery: GalleryId,
        /// Active direct sub-galleries.
        children: usize,
        /// Active direct image memberships.
        images: usize,
    },

    /// The gallery does not exist or has been deleted.
    #[error("gallery not found: {0}")]
    NodeNotFound(GalleryId),

    /// The image is not an active member of the gallery.
    #[error("image {image} is not a member of gallery {gallery}")]
    ImageNotMember {
        /// The gallery queried.
        gallery: GalleryId,
        /// The missing image.
        image: ImageId,
    },

    /// A cover must be an image held by the gallery or one of its descendants.
    #[error("image {image} is not in the subtree of gallery {gallery}")]
    CoverNotInSubtree {
        /// The gallery whose cover was being set.
        gallery: GalleryId,
        /// The rejected image.
        image: ImageId,
    },

    /// Another mutation holds a lock on the required ancestor chain.
    /// Retryable: the caller should back off and try again.
    #[error("gallery {gallery} is locked by a concurrent mutation")]
    Contention {
        /// First gallery found locked.
        gallery: GalleryId,
    },

    /// A tree lock was poisoned by a panicking writer.
    #[error("tree store lock poisoned")]
    LockPoisoned,

    /// A snapshot failed its consistency checks on load.
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),

    /// Serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while reading or writing a snapshot file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TreeError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. })
    }
}

/// Convenience alias for tree store results.
pub type TreeResult<T> = Result<T, TreeError>;
