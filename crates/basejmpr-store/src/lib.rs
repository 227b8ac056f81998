//! basejmpr-store: revisioned base images and their consumers
//!
//! Keeps an immutable, numbered catalog of downloaded base disk images
//! (`<root>/backing_files/<revision>/`) and works out which VM disk images
//! in the pool use which revision as their copy-on-write backing file.

pub mod checksums;
pub mod error;
pub mod reconcile;
pub mod resolver;
pub mod revision;
pub mod store;

pub use checksums::{ChecksumEntry, parse_checksums, sha256_file};
pub use error::{StoreError, StoreResult};
pub use reconcile::{
    CandidateImage, Consumer, ConsumerGroup, ConsumerReconciler, ReconciliationResult, Resolution,
};
pub use resolver::{BackingFileResolver, ImageIntrospector, QemuImg, parse_backing_reference};
pub use revision::{ArtifactSpec, Revision, RevisionId, RevisionMeta, RevisionSet};
pub use store::{RevisionStore, VerifyResult};
