//! Remote collaborators for Holdpen
//!
//! The pipelines talk to two services through blocking traits:
//!
//! - [`BucketStore`]: list, fetch and delete objects ([`S3BucketStore`] in production)
//! - [`ArchiveIndex`]: term search over the archive catalogue ([`ElasticsearchIndex`])
//!
//! Both production clients are async underneath and are driven from worker threads
//! through a tokio runtime handle. With the `testing` feature, [`memory`] provides
//! in-process fakes.

pub mod error;
pub mod index;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod s3;
pub mod store;

pub use error::{IndexError, StoreError};
pub use index::{ArchiveIndex, ElasticsearchIndex, SearchResponse, TermQuery};
pub use s3::S3BucketStore;
pub use store::{BucketStore, ListPage, ListRequest, ObjectSummary, RemoteObject};
