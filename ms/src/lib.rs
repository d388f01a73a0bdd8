//! ModelStore - content-addressed payload store
//!
//! Stores opaque model payloads (global snapshots and per-round deltas) keyed
//! by the SHA-256 of their bytes. Identical bytes always yield the identical
//! reference, so writes are idempotent and every read can be verified.
//!
//! # Layout
//!
//! ```text
//! <store>/
//! └── objects/
//!     ├── 3f/
//!     │   └── 9a1c...   # remaining 62 hex chars of the digest
//!     └── ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use modelstore::ModelStore;
//!
//! let store = ModelStore::open("/var/lib/fednestd/models")?;
//! let reference = store.put(b"weights")?;
//! assert_eq!(store.get(&reference)?, b"weights");
//! ```
//!
//! Version numbering is not handled here: the aggregation coordinator assigns
//! version numbers and records which reference each version points at.

pub mod cli;
pub mod config;
mod store;

pub use store::{ModelStore, ObjectRef, REF_PREFIX, StoreError, StoreStats, digest};
