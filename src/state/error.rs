use thiserror::Error;

use crate::history::StoreError;

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("Failed to initialize conversation store: {0}")]
    Store(#[source] StoreError),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}
