//! Typed view over the merged configuration document.
//!
//! Every field has a default so a missing `config.yml` still yields a
//! runnable (if unconfigured) server.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub search: SearchSettings,
    pub model: ModelSettings,
    pub chat: ChatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub allowed_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
    pub file: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub url: Option<String>,
    pub index: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub api_key: Option<String>,
    pub default_max_hits: usize,
    pub max_hits_limit: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            url: None,
            index: "documents".to_string(),
            username: None,
            password: None,
            api_key: None,
            default_max_hits: 5,
            max_hits_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    /// Serialized-size budget for search results handed back to the model.
    pub max_tool_result_bytes: usize,
    /// How many pruned hits are copied into the assistant message metadata.
    pub hits_sample_limit: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_tool_result_bytes: 100_000,
            hits_sample_limit: 10,
        }
    }
}
