//! Application-facing SDK for the gallery engine.
//!
//! [`Library`] bundles the gallery hierarchy ([`gallery_tree::TreeStore`])
//! with the fingerprint index ([`gallery_fingerprint::InMemoryFingerprintIndex`])
//! and is the main entry point for embedding applications. It adds image
//! ingestion with duplicate checks, image deletion that reaches both stores,
//! and bounded retries for contended tree mutations.

pub mod config;
pub mod error;
pub mod library;
pub mod retry;

pub use config::{LibraryConfig, RetryPolicy, DEFAULT_CONFIG_FILE};
pub use error::{SdkError, SdkResult};
pub use library::{ImageMetadata, IngestReport, Library};
pub use retry::retry_on_contention;

// Re-export key types
pub use gallery_fingerprint::{DuplicateGroup, FingerprintIndex, ImageFingerprint, SimilarMatch};
pub use gallery_tree::{
    CountReport, GalleryImageMembership, GalleryNode, GalleryStatistics, GallerySubtree,
    GalleryUpdate, MembershipOptions, NewGallery, TreeError, TreeStore,
};
pub use gallery_types::{ExactHash, GalleryId, GalleryType, ImageId, PerceptualHash};
