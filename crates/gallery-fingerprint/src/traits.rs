//! The [`FingerprintIndex`] trait defining the fingerprint query interface.

use gallery_types::{ExactHash, ImageId, PerceptualHash};

use crate::error::{FingerprintError, FingerprintResult};
use crate::fingerprint::{DuplicateGroup, ImageFingerprint, SimilarMatch};

/// Storage and query backend for image fingerprints.
///
/// Implementations must be thread-safe (`Send + Sync`). Every query result is
/// deterministic: groups are ordered by their smallest image id and
/// similarity matches ascend by distance, then image id.
pub trait FingerprintIndex: Send + Sync {
    /// Insert or replace the fingerprint for `image_id`.
    ///
    /// Re-registering an image swaps the old fingerprint for the new one in a
    /// single step. Fails with `DimensionMismatch` if either dimension is zero.
    fn register(
        &self,
        image_id: ImageId,
        exact_hash: ExactHash,
        perceptual_hash: PerceptualHash,
        width: u32,
        height: u32,
    ) -> FingerprintResult<()>;

    /// Register `image_id` only if no other image already carries
    /// `exact_hash`. The check and the insert happen under one write, so two
    /// concurrent callers with the same bytes cannot both succeed.
    ///
    /// Returns the smallest conflicting image id and inserts nothing, or
    /// `Ok(None)` after registering.
    fn register_unless_duplicate(
        &self,
        image_id: ImageId,
        exact_hash: ExactHash,
        perceptual_hash: PerceptualHash,
        width: u32,
        height: u32,
    ) -> FingerprintResult<Option<ImageId>>;

    /// Read the fingerprint of an image. `Ok(None)` if it was never registered.
    fn get(&self, image_id: &ImageId) -> FingerprintResult<Option<ImageFingerprint>>;

    /// Drop an image's fingerprint. Returns `true` if one existed.
    fn remove(&self, image_id: &ImageId) -> FingerprintResult<bool>;

    /// Number of registered fingerprints.
    fn len(&self) -> FingerprintResult<usize>;

    /// Returns `true` if nothing is registered.
    fn is_empty(&self) -> FingerprintResult<bool> {
        Ok(self.len()? == 0)
    }

    /// All images carrying `exact_hash`, ascending by id.
    fn find_by_exact_hash(&self, exact_hash: &ExactHash) -> FingerprintResult<Vec<ImageId>>;

    /// Group images by identical exact hash.
    ///
    /// `exclude` is left out of every group before the size check, so an
    /// image paired only with the excluded one forms no group.
    fn find_exact_duplicates(
        &self,
        exclude: Option<&ImageId>,
    ) -> FingerprintResult<Vec<DuplicateGroup>>;

    /// Every registered image within `threshold` bits of `perceptual_hash`,
    /// except `exclude`.
    fn find_similar_to_hash(
        &self,
        perceptual_hash: &PerceptualHash,
        threshold: u32,
        exclude: Option<&ImageId>,
    ) -> FingerprintResult<Vec<SimilarMatch>>;

    /// Connected components of the "distance ≤ threshold" relation having at
    /// least two members.
    fn find_similar_groups(&self, threshold: u32) -> FingerprintResult<Vec<DuplicateGroup>>;

    /// Every other registered image within `threshold` bits of `image_id`.
    ///
    /// Fails with `NotRegistered` if the image has no fingerprint.
    fn find_similar(&self, image_id: &ImageId, threshold: u32) -> FingerprintResult<Vec<SimilarMatch>> {
        let target = self
            .get(image_id)?
            .ok_or(FingerprintError::NotRegistered(*image_id))?;
        self.find_similar_to_hash(&target.perceptual_hash, threshold, Some(image_id))
    }

    /// Other images byte-identical to `image_id`, ascending by id.
    fn duplicates_of(&self, image_id: &ImageId) -> FingerprintResult<Vec<ImageId>> {
        let target = self
            .get(image_id)?
            .ok_or(FingerprintError::NotRegistered(*image_id))?;
        let mut ids = self.find_by_exact_hash(&target.exact_hash)?;
        ids.retain(|id| id != image_id);
        Ok(ids)
    }
}
