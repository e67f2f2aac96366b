//! The [`Library`] facade: one gallery tree and one fingerprint index.
//!
//! Tree mutations are retried on contention per the configured
//! [`RetryPolicy`](crate::config::RetryPolicy). A library persists as a
//! directory holding [`TREE_FILE`] and [`FINGERPRINTS_FILE`].

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use gallery_fingerprint::{
    DuplicateGroup, FingerprintIndex, ImageFingerprint, InMemoryFingerprintIndex, SimilarMatch,
};
use gallery_tree::{
    GalleryImageMembership, GalleryNode, GalleryUpdate, MembershipOptions, NewGallery,
    TreeSnapshot, TreeStore,
};
use gallery_types::{ExactHash, GalleryId, ImageId, PerceptualHash};

use crate::config::LibraryConfig;
use crate::error::{SdkError, SdkResult};
use crate::retry::retry_on_contention;

/// File name of the tree snapshot inside a library directory.
pub const TREE_FILE: &str = "tree.snapshot";
/// File name of the fingerprint table inside a library directory.
pub const FINGERPRINTS_FILE: &str = "fingerprints.json";

/// Fingerprint data extracted from an image file by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub exact_hash: ExactHash,
    pub perceptual_hash: PerceptualHash,
    pub width: u32,
    pub height: u32,
}

/// What [`Library::ingest`] found and did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub image_id: ImageId,
    /// Previously registered images with the same exact hash, ascending by id.
    pub exact_duplicates: Vec<ImageId>,
    /// Registered images within the configured similarity threshold.
    pub similar: Vec<SimilarMatch>,
    /// The gallery membership created, if a gallery was given.
    pub membership: Option<GalleryImageMembership>,
}

impl IngestReport {
    /// Returns `true` if the image has an exact or near duplicate.
    pub fn has_duplicates(&self) -> bool {
        !self.exact_duplicates.is_empty() || !self.similar.is_empty()
    }
}

/// Gallery library: hierarchy store plus fingerprint index.
///
/// Every tree mutation goes through the configured contention retry policy.
/// The fingerprint index has its own lock and is never retried.
pub struct Library {
    tree: TreeStore,
    fingerprints: InMemoryFingerprintIndex,
    config: LibraryConfig,
}

impl Library {
    /// An empty library.
    pub fn new(config: LibraryConfig) -> SdkResult<Self> {
        Self::with_parts(TreeStore::new(), InMemoryFingerprintIndex::new(), config)
    }

    /// Assemble a library from existing stores.
    pub fn with_parts(
        tree: TreeStore,
        fingerprints: InMemoryFingerprintIndex,
        config: LibraryConfig,
    ) -> SdkResult<Self> {
        config.validate()?;
        Ok(Self {
            tree,
            fingerprints,
            config,
        })
    }

    /// Restore a library saved with [`save`](Self::save).
    pub fn open(dir: impl AsRef<Path>, config: LibraryConfig) -> SdkResult<Self> {
        let dir = dir.as_ref();
        let tree = TreeStore::from_snapshot(TreeSnapshot::load_from(&dir.join(TREE_FILE))?)?;
        let table: Vec<ImageFingerprint> =
            serde_json::from_slice(&fs::read(dir.join(FINGERPRINTS_FILE))?)
                .map_err(|e| SdkError::Serialization(e.to_string()))?;
        let fingerprints = InMemoryFingerprintIndex::from_fingerprints(table)?;
        info!(dir = %dir.display(), "opened library");
        Self::with_parts(tree, fingerprints, config)
    }

    /// Write the tree snapshot and fingerprint table into `dir`.
    pub fn save(&self, dir: impl AsRef<Path>) -> SdkResult<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        self.tree.snapshot()?.save_to(&dir.join(TREE_FILE))?;
        let table = serde_json::to_vec_pretty(&self.fingerprints.export()?)
            .map_err(|e| SdkError::Serialization(e.to_string()))?;
        write_atomically(&dir.join(FINGERPRINTS_FILE), &table)?;
        debug!(dir = %dir.display(), "saved library");
        Ok(())
    }

    // ---- Accessors ----

    pub fn tree(&self) -> &TreeStore {
        &self.tree
    }

    pub fn fingerprints(&self) -> &InMemoryFingerprintIndex {
        &self.fingerprints
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    // ---- Galleries ----

    pub fn create_gallery(&self, new: NewGallery) -> SdkResult<GalleryNode> {
        retry_on_contention(&self.config.retry, || self.tree.create_node(new.clone()))
    }

    pub fn move_gallery(&self, id: &GalleryId, new_parent: Option<GalleryId>) -> SdkResult<()> {
        retry_on_contention(&self.config.retry, || self.tree.move_node(id, new_parent))
    }

    pub fn delete_gallery(&self, id: &GalleryId, cascade: bool) -> SdkResult<usize> {
        retry_on_contention(&self.config.retry, || self.tree.delete_node(id, cascade))
    }

    pub fn update_gallery(&self, id: &GalleryId, update: GalleryUpdate) -> SdkResult<GalleryNode> {
        retry_on_contention(&self.config.retry, || self.tree.update_node(id, update.clone()))
    }

    // ---- Memberships ----

    pub fn add_to_gallery(
        &self,
        gallery: &GalleryId,
        image: &ImageId,
        options: MembershipOptions,
    ) -> SdkResult<GalleryImageMembership> {
        retry_on_contention(&self.config.retry, || self.tree.add_image(gallery, image, options))
    }

    pub fn remove_from_gallery(&self, gallery: &GalleryId, image: &ImageId) -> SdkResult<bool> {
        retry_on_contention(&self.config.retry, || self.tree.remove_image(gallery, image))
    }

    pub fn set_cover(&self, gallery: &GalleryId, image: &ImageId) -> SdkResult<()> {
        retry_on_contention(&self.config.retry, || self.tree.set_cover(gallery, image))
    }

    // ---- Images ----

    /// Register a newly extracted image and optionally file it in a gallery.
    ///
    /// With `reject_exact_duplicates` set, the duplicate check and the
    /// registration are one step in the index, so of two concurrent ingests
    /// of the same bytes exactly one succeeds and the other fails with
    /// [`SdkError::DuplicateImage`]. Otherwise the report lists the
    /// duplicates and near matches alongside the result.
    ///
    /// If filing into `gallery` fails, the registration is undone and the
    /// image's previous fingerprint, if any, is put back.
    pub fn ingest(
        &self,
        image: ImageId,
        metadata: ImageMetadata,
        gallery: Option<GalleryId>,
    ) -> SdkResult<IngestReport> {
        let fingerprint = ImageFingerprint::new(
            image,
            metadata.exact_hash,
            metadata.perceptual_hash,
            metadata.width,
            metadata.height,
        )?;

        let mut exact_duplicates = self.fingerprints.find_by_exact_hash(&fingerprint.exact_hash)?;
        exact_duplicates.retain(|id| id != &image);
        let similar = self.fingerprints.find_similar_to_hash(
            &fingerprint.perceptual_hash,
            self.config.default_similarity_threshold,
            Some(&image),
        )?;

        let previous = self.fingerprints.get(&image)?;
        if self.config.reject_exact_duplicates {
            let refused = self.fingerprints.register_unless_duplicate(
                fingerprint.image_id,
                fingerprint.exact_hash,
                fingerprint.perceptual_hash,
                fingerprint.width,
                fingerprint.height,
            )?;
            if let Some(existing) = refused {
                return Err(SdkError::DuplicateImage { image, existing });
            }
        } else {
            self.register(&fingerprint)?;
        }

        let membership = match gallery {
            Some(g) => match self.add_to_gallery(&g, &image, MembershipOptions::default()) {
                Ok(membership) => Some(membership),
                Err(err) => {
                    match &previous {
                        Some(old) => self.register(old)?,
                        None => {
                            self.fingerprints.remove(&image)?;
                        }
                    }
                    warn!(image = %image, gallery = %g, error = %err, "ingest rolled back");
                    return Err(err);
                }
            },
            None => None,
        };

        info!(
            image = %image,
            exact = exact_duplicates.len(),
            similar = similar.len(),
            gallery = ?gallery,
            "ingested image"
        );
        Ok(IngestReport {
            image_id: image,
            exact_duplicates,
            similar,
            membership,
        })
    }

    fn register(&self, fingerprint: &ImageFingerprint) -> SdkResult<()> {
        Ok(self.fingerprints.register(
            fingerprint.image_id,
            fingerprint.exact_hash,
            fingerprint.perceptual_hash,
            fingerprint.width,
            fingerprint.height,
        )?)
    }

    /// Forget an image: drop its fingerprint and every gallery membership.
    /// Returns the number of memberships removed.
    pub fn delete_image(&self, image: &ImageId) -> SdkResult<usize> {
        let removed = retry_on_contention(&self.config.retry, || self.tree.image_deleted(image))?;
        let had_fingerprint = self.fingerprints.remove(image)?;
        debug!(image = %image, memberships = removed, had_fingerprint, "deleted image");
        Ok(removed)
    }

    /// Near duplicates of a registered image. `None` uses the configured
    /// default threshold.
    pub fn find_similar(
        &self,
        image: &ImageId,
        threshold: Option<u32>,
    ) -> SdkResult<Vec<SimilarMatch>> {
        let threshold = threshold.unwrap_or(self.config.default_similarity_threshold);
        Ok(self.fingerprints.find_similar(image, threshold)?)
    }

    pub fn find_exact_duplicates(&self, exclude: Option<&ImageId>) -> SdkResult<Vec<DuplicateGroup>> {
        Ok(self.fingerprints.find_exact_duplicates(exclude)?)
    }

    /// Clusters of mutually reachable near duplicates at the default threshold.
    pub fn similar_groups(&self) -> SdkResult<Vec<DuplicateGroup>> {
        Ok(self
            .fingerprints
            .find_similar_groups(self.config.default_similarity_threshold)?)
    }
}

/// Write through a sibling temp file and rename, so a crash leaves either
/// the old file or the new one.
fn write_atomically(path: &Path, bytes: &[u8]) -> SdkResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gallery_types::GalleryType;

    fn image(n: u128) -> ImageId {
        ImageId::from_uuid(uuid::Uuid::from_u128(n))
    }

    fn meta(hash: u8, bits: u64) -> ImageMetadata {
        ImageMetadata {
            exact_hash: ExactHash::from([hash; 32]),
            perceptual_hash: PerceptualHash::from_bits(bits),
            width: 640,
            height: 480,
        }
    }

    fn library() -> Library {
        Library::new(LibraryConfig::default()).unwrap()
    }

    #[test]
    fn invalid_config_is_refused() {
        let config = LibraryConfig {
            default_similarity_threshold: 100,
            ..Default::default()
        };
        assert!(matches!(Library::new(config), Err(SdkError::Config(_))));
    }

    #[test]
    fn ingest_registers_and_files_image() {
        let lib = library();
        let g = lib
            .create_gallery(NewGallery::new("inbox", GalleryType::Collection))
            .unwrap();

        let report = lib.ingest(image(1), meta(1, 0), Some(g.id)).unwrap();

        assert!(!report.has_duplicates());
        assert_eq!(report.membership.unwrap().gallery_id, g.id);
        assert!(lib.fingerprints().get(&image(1)).unwrap().is_some());
        assert_eq!(lib.tree().get_node(&g.id).unwrap().total_image_count, 1);
    }

    #[test]
    fn ingest_reports_duplicates() {
        let lib = library();
        lib.ingest(image(1), meta(1, 0b1111), None).unwrap();
        lib.ingest(image(2), meta(2, 0b0111), None).unwrap();

        let report = lib.ingest(image(3), meta(1, 0b1110), None).unwrap();
        assert_eq!(report.exact_duplicates, vec![image(1)]);
        let near: Vec<ImageId> = report.similar.iter().map(|m| m.image_id).collect();
        assert_eq!(near, vec![image(1), image(2)]);
    }

    #[test]
    fn ingest_rejects_duplicate_when_configured() {
        let lib = Library::new(LibraryConfig {
            reject_exact_duplicates: true,
            ..Default::default()
        })
        .unwrap();
        lib.ingest(image(1), meta(7, 0), None).unwrap();

        let err = lib.ingest(image(2), meta(7, 0), None).unwrap_err();
        assert!(matches!(err, SdkError::DuplicateImage { existing, .. } if existing == image(1)));
        assert!(lib.fingerprints().get(&image(2)).unwrap().is_none());

        // Re-ingesting the same image is not a duplicate of itself.
        lib.ingest(image(1), meta(7, 0), None).unwrap();
    }

    #[test]
    fn ingest_with_bad_dimensions_writes_nothing() {
        let lib = library();
        let g = lib
            .create_gallery(NewGallery::new("inbox", GalleryType::Collection))
            .unwrap();
        let mut bad = meta(1, 0);
        bad.width = 0;
        let err = lib.ingest(image(1), bad, Some(g.id)).unwrap_err();
        assert!(matches!(err, SdkError::Fingerprint(_)));
        assert!(lib.tree().gallery_images(&g.id, false).unwrap().is_empty());
    }

    #[test]
    fn ingest_into_missing_gallery_writes_nothing() {
        let lib = library();
        let err = lib.ingest(image(1), meta(1, 0), Some(GalleryId::new())).unwrap_err();
        assert!(matches!(err, SdkError::Tree(_)));
        assert!(lib.fingerprints().is_empty().unwrap());
    }

    #[test]
    fn failed_filing_restores_previous_fingerprint() {
        let lib = library();
        lib.ingest(image(1), meta(1, 0), None).unwrap();
        let before = lib.fingerprints().get(&image(1)).unwrap();

        let err = lib.ingest(image(1), meta(2, 5), Some(GalleryId::new())).unwrap_err();
        assert!(matches!(err, SdkError::Tree(_)));
        assert_eq!(lib.fingerprints().get(&image(1)).unwrap(), before);
        assert!(lib.fingerprints().find_by_exact_hash(&ExactHash::from([2; 32])).unwrap().is_empty());
    }

    #[test]
    fn concurrent_duplicate_ingest_admits_one() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        const THREADS: usize = 6;
        let lib = Arc::new(
            Library::new(LibraryConfig {
                reject_exact_duplicates: true,
                ..Default::default()
            })
            .unwrap(),
        );
        let g = lib
            .create_gallery(NewGallery::new("inbox", GalleryType::Collection))
            .unwrap();

        for round in 0..10u8 {
            let barrier = Arc::new(Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|t| {
                    let lib = Arc::clone(&lib);
                    let barrier = Arc::clone(&barrier);
                    let id = image(round as u128 * 100 + t as u128);
                    thread::spawn(move || {
                        barrier.wait();
                        lib.ingest(id, meta(round, 0), Some(g.id))
                    })
                })
                .collect();
            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let admitted = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(admitted, 1);
            assert!(results
                .iter()
                .filter_map(|r| r.as_ref().err())
                .all(|e| matches!(e, SdkError::DuplicateImage { .. })));
            assert_eq!(
                lib.fingerprints().find_by_exact_hash(&ExactHash::from([round; 32])).unwrap().len(),
                1
            );
        }
        assert_eq!(lib.tree().get_node(&g.id).unwrap().total_image_count, 10);
    }

    #[test]
    fn delete_image_clears_everything() {
        let lib = library();
        let g = lib
            .create_gallery(NewGallery::new("g", GalleryType::Album))
            .unwrap();
        lib.ingest(image(1), meta(1, 0), Some(g.id)).unwrap();

        assert_eq!(lib.delete_image(&image(1)).unwrap(), 1);
        assert!(lib.fingerprints().get(&image(1)).unwrap().is_none());
        assert_eq!(lib.tree().get_node(&g.id).unwrap().total_image_count, 0);
        assert_eq!(lib.delete_image(&image(1)).unwrap(), 0);
    }

    #[test]
    fn find_similar_uses_default_threshold() {
        let lib = Library::new(LibraryConfig {
            default_similarity_threshold: 1,
            ..Default::default()
        })
        .unwrap();
        lib.ingest(image(1), meta(1, 0b000), None).unwrap();
        lib.ingest(image(2), meta(2, 0b001), None).unwrap();
        lib.ingest(image(3), meta(3, 0b011), None).unwrap();

        assert_eq!(lib.find_similar(&image(1), None).unwrap().len(), 1);
        assert_eq!(lib.find_similar(&image(1), Some(2)).unwrap().len(), 2);
        assert_eq!(lib.similar_groups().unwrap().len(), 1);
    }

    #[test]
    fn save_and_open_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library();
        let g = lib
            .create_gallery(NewGallery::new("g", GalleryType::Album))
            .unwrap();
        lib.ingest(image(1), meta(1, 0), Some(g.id)).unwrap();
        lib.ingest(image(2), meta(1, 3), Some(g.id)).unwrap();

        lib.save(dir.path()).unwrap();
        let reopened = Library::open(dir.path(), LibraryConfig::default()).unwrap();

        assert_eq!(reopened.tree().get_node(&g.id).unwrap().total_image_count, 2);
        assert_eq!(reopened.fingerprints().export().unwrap(), lib.fingerprints().export().unwrap());
        assert_eq!(reopened.find_exact_duplicates(None).unwrap().len(), 1);
    }

    #[test]
    fn save_replaces_files_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library();
        lib.ingest(image(1), meta(1, 0), None).unwrap();
        lib.save(dir.path()).unwrap();
        lib.ingest(image(2), meta(2, 0), None).unwrap();
        lib.save(dir.path()).unwrap();

        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec![FINGERPRINTS_FILE.to_string(), TREE_FILE.to_string()]);

        let reopened = Library::open(dir.path(), LibraryConfig::default()).unwrap();
        assert_eq!(reopened.fingerprints().len().unwrap(), 2);
    }
}
