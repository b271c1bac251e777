use serde_json::{Map, Value};

use super::service::ConfigError;

pub fn validate_config(config: &Value) -> Result<(), ConfigError> {
    let root = config
        .as_object()
        .ok_or_else(|| config_type_error("root", "object"))?;

    if let Some(server) = expect_optional_object(root, "server")? {
        validate_optional_string_field(server, "server.host", "host")?;
        validate_u64_field(server, "server.port", "port", 0, 65_535)?;
        validate_string_array_field(server, "server.allowed_origins", "allowed_origins")?;
    }

    if let Some(logging) = expect_optional_object(root, "logging")? {
        validate_optional_string_field(logging, "logging.level", "level")?;
        validate_bool_field(logging, "logging.file", "file")?;
    }

    if let Some(search) = expect_optional_object(root, "search")? {
        validate_optional_string_field(search, "search.url", "url")?;
        validate_optional_string_field(search, "search.username", "username")?;
        validate_optional_string_field(search, "search.password", "password")?;
        validate_optional_string_field(search, "search.api_key", "api_key")?;
        if search.contains_key("index") {
            validate_required_string_field(search, "search.index", "index")?;
        }
        validate_u64_field(search, "search.default_max_hits", "default_max_hits", 1, 100)?;
        validate_u64_field(search, "search.max_hits_limit", "max_hits_limit", 1, 100)?;

        let default_hits = search.get("default_max_hits").and_then(|v| v.as_u64());
        let limit = search.get("max_hits_limit").and_then(|v| v.as_u64());
        if let (Some(default_hits), Some(limit)) = (default_hits, limit) {
            if default_hits > limit {
                return Err(ConfigError::Invalid {
                    path: "search.default_max_hits".to_string(),
                    reason: format!("must not exceed search.max_hits_limit ({})", limit),
                });
            }
        }
    }

    if let Some(model) = expect_optional_object(root, "model")? {
        validate_optional_string_field(model, "model.base_url", "base_url")?;
        validate_optional_string_field(model, "model.api_key", "api_key")?;
        if model.contains_key("model") {
            validate_required_string_field(model, "model.model", "model")?;
        }
    }

    if let Some(chat) = expect_optional_object(root, "chat")? {
        validate_u64_field(
            chat,
            "chat.max_tool_result_bytes",
            "max_tool_result_bytes",
            1,
            50_000_000,
        )?;
        validate_u64_field(chat, "chat.hits_sample_limit", "hits_sample_limit", 0, 1_000)?;
    }

    Ok(())
}

fn expect_optional_object<'a>(
    root: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a Map<String, Value>>, ConfigError> {
    match root.get(key) {
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(config_type_error(key, "object")),
    }
}

fn validate_bool_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    if value.as_bool().is_some() {
        return Ok(());
    }
    Err(config_type_error(path, "boolean"))
}

fn validate_u64_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
    min: u64,
    max: u64,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(number) = value.as_u64() else {
        return Err(config_type_error(path, "non-negative integer"));
    };
    if number < min || number > max {
        return Err(ConfigError::Invalid {
            path: path.to_string(),
            reason: format!("must be between {} and {}", min, max),
        });
    }
    Ok(())
}

fn validate_required_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let value = section.get(key).ok_or_else(|| ConfigError::Invalid {
        path: path.to_string(),
        reason: "value is required".to_string(),
    })?;
    let Some(text) = value.as_str() else {
        return Err(config_type_error(path, "string"));
    };
    if text.trim().is_empty() {
        return Err(ConfigError::Invalid {
            path: path.to_string(),
            reason: "value cannot be empty".to_string(),
        });
    }
    Ok(())
}

fn validate_optional_string_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    match section.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(config_type_error(path, "string")),
    }
}

fn validate_string_array_field(
    section: &Map<String, Value>,
    path: &str,
    key: &str,
) -> Result<(), ConfigError> {
    let Some(value) = section.get(key) else {
        return Ok(());
    };
    let Some(items) = value.as_array() else {
        return Err(config_type_error(path, "array of strings"));
    };
    for (index, item) in items.iter().enumerate() {
        let Some(text) = item.as_str() else {
            return Err(config_type_error(&format!("{}[{}]", path, index), "string"));
        };
        if text.trim().is_empty() {
            return Err(ConfigError::Invalid {
                path: format!("{}[{}]", path, index),
                reason: "value cannot be empty".to_string(),
            });
        }
    }
    Ok(())
}

fn config_type_error(path: &str, expected: &str) -> ConfigError {
    ConfigError::Invalid {
        path: path.to_string(),
        reason: format!("expected {}", expected),
    }
}
