//! Document retrieval against the Elasticsearch index.

mod client;
mod hit;
pub mod pruner;

pub use client::{DocumentIndex, DocumentSearch, ElasticsearchClient, SearchError};
pub use hit::SearchHit;
pub use pruner::{prune, PrunedHit, PrunedResult};
