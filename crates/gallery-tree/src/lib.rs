//! Gallery hierarchy store.
//!
//! Galleries form a forest. Every node stores its materialized `path` (root
//! first, itself last) and `level`, so ancestor queries are a read of one
//! record. Image memberships hang off galleries, and three counters per node
//! (direct images, direct sub-galleries, total images in the subtree) are
//! kept current by propagating deltas up the ancestor chain.
//!
//! Deletion is soft: removed galleries and memberships keep their records
//! with a `deleted_at` timestamp and disappear from every query.
//!
//! Every mutation is a unit of work. It claims the ancestor chains it
//! touches in a fail-fast lock table, stages its writes in a transaction
//! overlay and commits them in one step. A claim that collides with a
//! concurrent mutation fails with the retryable [`TreeError::Contention`].
//!
//! # Modules
//!
//! - [`error`]: Error types for tree operations
//! - [`node`]: [`GalleryNode`] and its request/response shapes
//! - [`membership`]: [`GalleryImageMembership`] records and options
//! - [`rollup`]: Count verification reports
//! - [`snapshot`]: Bincode snapshots of the whole store
//! - [`store`]: [`TreeStore`], the public entry point

mod cover;
mod lock;
mod state;
mod txn;

pub mod error;
pub mod membership;
pub mod node;
pub mod rollup;
pub mod snapshot;
pub mod store;

pub use error::{TreeError, TreeResult};
pub use membership::{GalleryImageMembership, MembershipOptions};
pub use node::{GalleryNode, GalleryStatistics, GallerySubtree, GalleryUpdate, NewGallery};
pub use rollup::{CountField, CountMismatch, CountReport};
pub use snapshot::{TreeSnapshot, SNAPSHOT_VERSION};
pub use store::TreeStore;
