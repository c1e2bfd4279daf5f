// Index gateway: the only path by which the pipeline reads or mutates the search index

pub mod external;

pub use external::ExternalIndexGateway;

use crate::errors::IndexError;
use crate::validation::DocumentBatch;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// IndexGateway performs reads and mutations against one named index at a time.
/// Every call is scoped to a single target so failures stay attributable.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IndexGateway: Send + Sync {
    /// Fetch the current `fields` (plus the key) of the documents with the given ids
    async fn fetch(
        &self,
        index_name: &str,
        key_field: &str,
        ids: &[String],
        fields: &[String],
    ) -> Result<Vec<Map<String, Value>>, IndexError>;

    /// Insert a validated batch, returning the number of documents sent
    async fn insert(&self, index_name: &str, batch: &DocumentBatch) -> Result<usize, IndexError>;

    /// Apply a validated batch of `set` updates, returning the number of documents sent
    async fn update(&self, index_name: &str, batch: &DocumentBatch) -> Result<usize, IndexError>;

    /// Make earlier inserts/updates on the index visible
    async fn commit(&self, index_name: &str) -> Result<(), IndexError>;
}
