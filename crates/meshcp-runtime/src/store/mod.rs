//! Storage for named, opaque records such as the catalog.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::future::Future;
use std::pin::Pin;

use meshcp_core::Result;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A stored record and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResource {
    /// Opaque value.
    pub value: String,
    /// Version used for compare-and-set updates.
    pub version: i64,
}

/// Key/value store with get, create and update-by-key semantics.
pub trait ResourceStore: Send + Sync + 'static {
    /// Read a record. `None` if it was never created.
    fn get<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<StoredResource>>;

    /// Create a record. Fails with `Conflict` if it already exists.
    fn create<'a>(&'a self, name: &'a str, value: String) -> StoreFuture<'a, ()>;

    /// Replace a record if it is still at `expected_version`.
    fn update<'a>(
        &'a self,
        name: &'a str,
        value: String,
        expected_version: i64,
    ) -> StoreFuture<'a, ()>;
}
