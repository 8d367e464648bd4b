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

//! PostgreSQL persistence for the replication engine: migrations, the copy
//! ledger (operations, mappings, history), and the pipeline graph tables.

mod catalog;
pub mod error;
mod rows;
pub mod store;

pub use error::{DataError, Result as DataResult};
pub use store::PgCopyStore;
