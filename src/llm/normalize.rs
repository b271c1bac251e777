//! Response-shape normalization.
//!
//! Providers and SDK versions disagree on where the answer text and the
//! function call live. Each extractor is a priority-ordered list of
//! strategies; the first non-empty match wins.

use serde_json::{Map, Value};

use super::types::FunctionCall;

const RAW_FALLBACK_CHARS: usize = 1000;

type TextStrategy = fn(&Value) -> Option<String>;
type CallStrategy = fn(&Value) -> Option<FunctionCall>;

const TEXT_STRATEGIES: &[(&str, TextStrategy)] = &[
    ("top_level_text", top_level_text),
    ("candidate_parts", candidate_parts_text),
    ("response_wrapper", response_wrapper_text),
    ("legacy_output", legacy_output_text),
];

const CALL_STRATEGIES: &[(&str, CallStrategy)] = &[
    ("top_level_function_calls", top_level_function_call),
    ("candidate_field", candidate_function_call),
    ("candidate_parts", part_function_call),
];

/// Answer text of a raw response. Never fails: when no known shape matches,
/// the raw JSON is returned truncated.
pub fn extract_text(raw: &Value) -> String {
    for (name, strategy) in TEXT_STRATEGIES {
        if let Some(text) = strategy(raw).filter(|t| !t.trim().is_empty()) {
            tracing::trace!(strategy = name, "Extracted response text");
            return text;
        }
    }

    if is_empty(raw) {
        return String::new();
    }

    tracing::debug!("No known text shape in model response; using raw JSON");
    raw.to_string().chars().take(RAW_FALLBACK_CHARS).collect()
}

pub fn extract_function_call(raw: &Value) -> Option<FunctionCall> {
    CALL_STRATEGIES.iter().find_map(|(name, strategy)| {
        let call = strategy(raw)?;
        tracing::trace!(strategy = name, function = %call.name, "Extracted function call");
        Some(call)
    })
}

/// `candidates[0].content`, replayed verbatim in the next round.
pub fn extract_candidate_content(raw: &Value) -> Option<Value> {
    let content = first_candidate(raw)?.get("content")?;
    content.is_object().then(|| content.clone())
}

fn top_level_text(raw: &Value) -> Option<String> {
    raw.get("text").and_then(Value::as_str).map(str::to_string)
}

fn candidate_parts_text(raw: &Value) -> Option<String> {
    let parts = first_candidate(raw)?
        .pointer("/content/parts")?
        .as_array()?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    Some(text)
}

fn response_wrapper_text(raw: &Value) -> Option<String> {
    let response = raw.get("response")?;
    top_level_text(response)
        .filter(|t| !t.trim().is_empty())
        .or_else(|| candidate_parts_text(response))
}

fn legacy_output_text(raw: &Value) -> Option<String> {
    raw.pointer("/output/0/content/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn top_level_function_call(raw: &Value) -> Option<FunctionCall> {
    raw.pointer("/functionCalls/0").and_then(parse_call)
}

fn candidate_function_call(raw: &Value) -> Option<FunctionCall> {
    let candidate = first_candidate(raw)?;
    candidate
        .get("functionCall")
        .or_else(|| candidate.get("function_call"))
        .and_then(parse_call)
}

fn part_function_call(raw: &Value) -> Option<FunctionCall> {
    first_candidate(raw)?
        .pointer("/content/parts")?
        .as_array()?
        .iter()
        .find_map(|part| {
            part.get("functionCall")
                .or_else(|| part.get("function_call"))
                .and_then(parse_call)
        })
}

fn first_candidate(raw: &Value) -> Option<&Value> {
    raw.pointer("/candidates/0")
}

fn parse_call(value: &Value) -> Option<FunctionCall> {
    let name = value.get("name").and_then(Value::as_str)?.trim();
    if name.is_empty() {
        return None;
    }

    let args = match value.get("args").or_else(|| value.get("arguments")) {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::String(encoded)) => serde_json::from_str::<Value>(encoded)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default(),
        _ => Map::new(),
    };

    Some(FunctionCall {
        name: name.to_string(),
        args,
    })
}

fn is_empty(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
