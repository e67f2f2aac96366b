//! Fingerprint records and similarity results.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use gallery_types::{ExactHash, ImageId, PerceptualHash};

use crate::error::{FingerprintError, FingerprintResult};

/// A set of images sharing a property (same exact hash, or connected by
/// perceptual similarity). Always holds at least two ids.
pub type DuplicateGroup = BTreeSet<ImageId>;

/// Content fingerprint of one image.
///
/// Created once when the image's metadata is first extracted and replaced
/// wholesale if the underlying bytes are reprocessed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    /// The image this fingerprint belongs to.
    pub image_id: ImageId,
    /// Digest over the raw file bytes.
    pub exact_hash: ExactHash,
    /// Visual fingerprint.
    pub perceptual_hash: PerceptualHash,
    /// Pixel width (non-zero).
    pub width: u32,
    /// Pixel height (non-zero).
    pub height: u32,
}

impl ImageFingerprint {
    /// Build a fingerprint, rejecting zero dimensions.
    pub fn new(
        image_id: ImageId,
        exact_hash: ExactHash,
        perceptual_hash: PerceptualHash,
        width: u32,
        height: u32,
    ) -> FingerprintResult<Self> {
        if width == 0 || height == 0 {
            return Err(FingerprintError::DimensionMismatch {
                image: image_id,
                width,
                height,
            });
        }
        Ok(Self {
            image_id,
            exact_hash,
            perceptual_hash,
            width,
            height,
        })
    }

    /// Hamming distance between this fingerprint's perceptual hash and another's.
    pub fn distance_to(&self, other: &ImageFingerprint) -> u32 {
        self.perceptual_hash.distance(&other.perceptual_hash)
    }

    /// Total pixel count.
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// One candidate returned by a similarity query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimilarMatch {
    /// The candidate image.
    pub image_id: ImageId,
    /// Hamming distance from the queried hash.
    pub distance: u32,
}

impl Ord for SimilarMatch {
    /// Ascending by distance, then by image id.
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.image_id.cmp(&other.image_id))
    }
}

impl PartialOrd for SimilarMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Validate a Hamming distance threshold against the hash width.
pub fn check_threshold(threshold: u32) -> FingerprintResult<()> {
    if threshold > PerceptualHash::BITS {
        return Err(FingerprintError::InvalidThreshold {
            threshold,
            max: PerceptualHash::BITS,
        });
    }
    Ok(())
}
