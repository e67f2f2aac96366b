//! Image fingerprint index for the gallery engine.
//!
//! Stores one [`ImageFingerprint`] per image (exact digest, perceptual hash,
//! dimensions) and answers two kinds of question:
//!
//! - **Exact duplicates**: images whose files are byte-identical, grouped by
//!   [`ExactHash`](gallery_types::ExactHash) through a hash-bucketed index.
//! - **Near duplicates**: images whose perceptual hashes lie within a Hamming
//!   distance threshold of a query hash, found by exhaustive scan.
//!
//! Fingerprints are computed by an external metadata extractor; this crate
//! never looks at image bytes. The index is independent of the gallery tree
//! and takes none of its locks.
//!
//! # Modules
//!
//! - [`error`]: Error types for index operations
//! - [`fingerprint`]: [`ImageFingerprint`], [`SimilarMatch`], threshold checks
//! - [`traits`]: The [`FingerprintIndex`] trait defining the query interface
//! - [`memory`]: [`InMemoryFingerprintIndex`], the `RwLock`-backed implementation

pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod traits;

pub use error::{FingerprintError, FingerprintResult};
pub use fingerprint::{check_threshold, DuplicateGroup, ImageFingerprint, SimilarMatch};
pub use memory::InMemoryFingerprintIndex;
pub use traits::FingerprintIndex;
