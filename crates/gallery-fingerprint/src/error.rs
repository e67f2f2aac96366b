//! Error types for fingerprint index operations.

use gallery_types::ImageId;

/// Errors that can occur during fingerprint index operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FingerprintError {
    /// Width or height was zero.
    #[error("invalid dimensions for image {image}: {width}x{height}")]
    DimensionMismatch {
        /// The image being registered.
        image: ImageId,
        /// Supplied width.
        width: u32,
        /// Supplied height.
        height: u32,
    },

    /// The queried image has no fingerprint in the index.
    #[error("image {0} has no registered fingerprint")]
    NotRegistered(ImageId),

    /// Similarity threshold outside `0..=max`.
    #[error("invalid similarity threshold {threshold}: must be at most {max}")]
    InvalidThreshold {
        /// The rejected threshold.
        threshold: u32,
        /// Width of the perceptual hash in bits.
        max: u32,
    },

    /// The index lock was poisoned by a panicking writer.
    #[error("fingerprint index lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for fingerprint index results.
pub type FingerprintResult<T> = Result<T, FingerprintError>;
