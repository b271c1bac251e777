use std::sync::Arc;

use crate::chat::RagOrchestrator;
use crate::core::config::{AppPaths, AppSettings, ConfigService};
use crate::history::{ConversationStore, SqliteConversationStore};
use crate::llm::{GeminiProvider, GenerativeModelClient, LlmProvider};
use crate::search::{DocumentIndex, DocumentSearch, ElasticsearchClient};

pub mod error;

use error::InitializationError;

/// Shared application state handed to every route.
///
/// Collaborators sit behind traits so tests can swap in fakes through
/// [`AppState::from_parts`].
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigService,
    pub settings: Arc<AppSettings>,
    pub store: Arc<dyn ConversationStore>,
    pub documents: Arc<dyn DocumentIndex>,
    pub chat: RagOrchestrator,
}

/// The externally-provided pieces the state is assembled from.
pub struct Collaborators {
    pub store: Arc<dyn ConversationStore>,
    pub search: Arc<dyn DocumentSearch>,
    pub documents: Arc<dyn DocumentIndex>,
    pub provider: Arc<dyn LlmProvider>,
}

impl AppState {
    /// Opens the SQLite store and builds the Elasticsearch and Gemini clients
    /// from the loaded settings.
    pub async fn initialize(
        paths: Arc<AppPaths>,
        config: ConfigService,
        settings: AppSettings,
    ) -> Result<Arc<Self>, InitializationError> {
        let store = SqliteConversationStore::new(paths.db_path.clone())
            .await
            .map_err(InitializationError::Store)?;

        let http = reqwest::Client::builder()
            .user_agent(concat!("querynest-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(InitializationError::HttpClient)?;

        let elastic = Arc::new(ElasticsearchClient::new(settings.search.clone(), http.clone()));
        if !elastic.is_configured() {
            tracing::warn!("Elasticsearch is not configured; document search will fail");
        }

        let provider = Arc::new(GeminiProvider::new(&settings.model, http));
        if settings.model.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY is not set; chat replies will fall back to apologies");
        }

        Ok(Self::from_parts(
            config,
            settings,
            Collaborators {
                store: Arc::new(store),
                search: elastic.clone(),
                documents: elastic,
                provider,
            },
        ))
    }

    pub fn from_parts(
        config: ConfigService,
        settings: AppSettings,
        parts: Collaborators,
    ) -> Arc<Self> {
        let chat = RagOrchestrator::new(
            parts.store.clone(),
            parts.search,
            GenerativeModelClient::new(parts.provider),
            settings.search.clone(),
            settings.chat.clone(),
        );

        Arc::new(Self {
            config,
            settings: Arc::new(settings),
            store: parts.store,
            documents: parts.documents,
            chat,
        })
    }
}
