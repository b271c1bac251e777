//! Bounds the serialized size of search results before they are handed back
//! to the model as a function response.

use serde::{Deserialize, Serialize};

use super::hit::SearchHit;

pub const INITIAL_SNIPPET_CHARS: usize = 400;
pub const MIN_SNIPPET_CHARS: usize = 50;
const SHRINK_FACTOR: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunedHit {
    pub id: String,
    pub score: f64,
    pub title: Option<String>,
    pub path: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunedResult {
    pub hits: Vec<PrunedHit>,
    pub original_count: usize,
    pub final_count: usize,
    pub snippet_length: usize,
    pub bytes: usize,
    pub truncated: bool,
}

/// Shrinks the snippet length first, then the hit count, until the preview
/// fits in `max_bytes` or both floors are reached. At the floors the result
/// is returned even if it is still over budget.
pub fn prune(hits: &[SearchHit], max_bytes: usize) -> PrunedResult {
    if hits.is_empty() {
        return PrunedResult {
            hits: Vec::new(),
            original_count: 0,
            final_count: 0,
            snippet_length: INITIAL_SNIPPET_CHARS,
            bytes: serialized_len(&[]),
            truncated: false,
        };
    }

    let mut snippet_length = INITIAL_SNIPPET_CHARS;
    let mut count = hits.len();

    let (preview, bytes) = loop {
        let preview = preview(&hits[..count], snippet_length);
        let bytes = serialized_len(&preview);

        if bytes <= max_bytes {
            break (preview, bytes);
        }

        if snippet_length > MIN_SNIPPET_CHARS {
            snippet_length = shrink(snippet_length, MIN_SNIPPET_CHARS);
        } else if count > 1 {
            count = shrink(count, 1);
        } else {
            break (preview, bytes);
        }
    };

    PrunedResult {
        original_count: hits.len(),
        final_count: preview.len(),
        truncated: count < hits.len() || snippet_length < INITIAL_SNIPPET_CHARS,
        snippet_length,
        bytes,
        hits: preview,
    }
}

fn preview(hits: &[SearchHit], snippet_length: usize) -> Vec<PrunedHit> {
    hits.iter()
        .map(|hit| PrunedHit {
            id: hit.id.clone(),
            score: hit.score,
            title: hit.title().map(str::to_string),
            path: hit.path().map(str::to_string),
            content: hit.content().chars().take(snippet_length).collect(),
        })
        .collect()
}

fn serialized_len(preview: &[PrunedHit]) -> usize {
    serde_json::to_string(preview).map(|s| s.len()).unwrap_or(0)
}

fn shrink(value: usize, floor: usize) -> usize {
    ((value as f64 * SHRINK_FACTOR).floor() as usize).max(floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(id: &str, content: &str) -> SearchHit {
        SearchHit::from_raw(&json!({
            "_id": id,
            "_score": 1.0,
            "_source": { "originalName": format!("{id}.txt"), "content": content }
        }))
    }

    fn hits(n: usize, content_len: usize) -> Vec<SearchHit> {
        (0..n)
            .map(|i| hit(&format!("doc-{i}"), &"a".repeat(content_len)))
            .collect()
    }

    #[test]
    fn empty_input_is_not_truncated() {
        let result = prune(&[], 10);
        assert!(result.hits.is_empty());
        assert_eq!(result.original_count, 0);
        assert_eq!(result.final_count, 0);
        assert!(!result.truncated);
    }

    #[test]
    fn generous_budget_keeps_everything() {
        let input = hits(3, 120);
        let result = prune(&input, 100_000);

        assert_eq!(result.final_count, 3);
        assert_eq!(result.snippet_length, INITIAL_SNIPPET_CHARS);
        assert!(!result.truncated);
        assert_eq!(result.hits[0].content, "a".repeat(120));
        assert_eq!(result.hits[0].title.as_deref(), Some("doc-0.txt"));
    }

    #[test]
    fn snippet_shrinks_before_hit_count() {
        let input = hits(5, 1000);
        let full = prune(&input, usize::MAX).bytes;
        let result = prune(&input, full - 1);

        assert_eq!(result.final_count, 5);
        assert_eq!(result.snippet_length, 280);
        assert!(result.truncated);
        assert!(result.bytes <= full - 1);
        assert!(result.hits.iter().all(|h| h.content.chars().count() == 280));
    }

    #[test]
    fn tiny_budget_stops_at_floors() {
        let input = hits(10, 1000);
        let result = prune(&input, 0);

        assert_eq!(result.final_count, 1);
        assert_eq!(result.snippet_length, MIN_SNIPPET_CHARS);
        assert!(result.truncated);
        assert!(result.bytes > 0);
    }

    #[test]
    fn smaller_budget_never_yields_more() {
        let input = hits(12, 900);
        let budgets = [0, 200, 800, 1_500, 3_000, 6_000, 20_000, 100_000];

        for pair in budgets.windows(2) {
            let small = prune(&input, pair[0]);
            let large = prune(&input, pair[1]);
            assert!(small.final_count <= large.final_count);
            assert!(small.snippet_length <= large.snippet_length);
        }
    }

    #[test]
    fn alternate_text_fields_collapse_into_content() {
        let scanned = SearchHit::from_raw(&json!({
            "_id": "scan",
            "_source": { "filename": "scan.png", "ocr_text": "recognized text" }
        }));

        let result = prune(&[scanned], 10_000);
        let value = serde_json::to_value(&result.hits[0]).unwrap();

        assert_eq!(value["content"], "recognized text");
        assert!(value.get("ocr_text").is_none());
        assert_eq!(value["title"], "scan.png");
    }
}
