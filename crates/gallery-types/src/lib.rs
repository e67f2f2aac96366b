//! Foundation types for the gallery engine.
//!
//! This crate provides the identifier and fingerprint types shared by the
//! tree store, the fingerprint index and the SDK. Every other gallery crate
//! depends on `gallery-types`.
//!
//! # Key Types
//!
//! - [`GalleryId`]: Stable identifier of a gallery node (UUID v7)
//! - [`ImageId`]: Stable reference to an externally managed image
//! - [`ExactHash`]: 32-byte digest over an image file's raw bytes
//! - [`PerceptualHash`]: 64-bit visual fingerprint compared by Hamming distance
//! - [`GalleryType`]: Kind of gallery node

pub mod error;
pub mod gallery;
pub mod hash;
pub mod identity;

pub use error::TypeError;
pub use gallery::GalleryType;
pub use hash::{ExactHash, PerceptualHash};
pub use identity::{GalleryId, ImageId};
