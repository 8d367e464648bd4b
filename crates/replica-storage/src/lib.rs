#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Object-store adapters implementing [`replica_core::ObjectStore`].
//!
//! Layout:
//! - `fs.rs`: buckets as directories under a root, used for development and tests
//! - `s3.rs`: AWS S3 (or compatible) client, behind the `s3` feature

pub mod fs;
#[cfg(feature = "s3")]
pub mod s3;

pub use fs::FsObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;
