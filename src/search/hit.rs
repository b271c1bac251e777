use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One ranked hit, with the raw `_source` projection kept intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub source: Map<String, Value>,
}

impl SearchHit {
    /// Builds a hit from one element of `hits.hits`. The id is `_id`, then
    /// `_source.fileId`, then empty.
    pub fn from_raw(raw: &Value) -> Self {
        let source = raw
            .get("_source")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let id = raw
            .get("_id")
            .and_then(Value::as_str)
            .or_else(|| source.get("fileId").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let score = raw.get("_score").and_then(Value::as_f64).unwrap_or(0.0);

        Self { id, score, source }
    }

    pub fn title(&self) -> Option<&str> {
        self.first_str(&["originalName", "filename", "title"])
    }

    pub fn path(&self) -> Option<&str> {
        self.first_str(&["path", "uri", "url", "filename"])
    }

    /// Extracted text: `content`, then `ocr_text`, then `text`.
    pub fn content(&self) -> &str {
        self.first_str(&["content", "ocr_text", "text"])
            .unwrap_or_default()
    }

    fn first_str(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .filter_map(|key| self.source.get(*key).and_then(Value::as_str))
            .find(|value| !value.trim().is_empty())
    }
}
