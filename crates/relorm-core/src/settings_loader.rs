//! Settings loading from configuration files.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `RELORM_DEFAULT_DATABASE` | `default_database` |
//! | `RELORM_DEFAULT_STRATEGY` | `default_strategy` |
//! | `RELORM_DESCRIPTOR_TTL_SECS` | `descriptor_ttl_secs` |
//! | `RELORM_VALIDATE_ON_WRITE` | `validate_on_write` |
//! | `RELORM_DEBUG` | `debug` |
//! | `RELORM_LOG_LEVEL` | `log_level` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use relorm_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file("config/relorm.toml").unwrap();
//! let settings = settings_loader::from_toml_file_with_env("config/relorm.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::OrmError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Keys not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, OrmError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| OrmError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    let json_value = toml_to_json(toml_value);
    from_json_value(json_value, "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, OrmError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        OrmError::ConfigurationError(format!(
            "Failed to read TOML file '{}': {e}",
            path.as_ref().display()
        ))
    })?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, OrmError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, OrmError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| OrmError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;
    from_json_value(json_value, "JSON")
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies `RELORM_*` environment variable overrides to a settings struct.
///
/// Unparseable numeric or boolean values are ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("RELORM_DEFAULT_DATABASE") {
        settings.default_database = val;
    }

    if let Ok(val) = std::env::var("RELORM_DEFAULT_STRATEGY") {
        settings.default_strategy = val;
    }

    if let Ok(val) = std::env::var("RELORM_DESCRIPTOR_TTL_SECS") {
        if let Ok(secs) = val.parse::<u64>() {
            settings.descriptor_ttl_secs = Some(secs);
        }
    }

    if let Ok(val) = std::env::var("RELORM_VALIDATE_ON_WRITE") {
        settings.validate_on_write = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("RELORM_DEBUG") {
        settings.debug = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("RELORM_LOG_LEVEL") {
        settings.log_level = val;
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_bool(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Merges a parsed document over the default settings and deserializes it.
fn from_json_value(value: serde_json::Value, format: &str) -> Result<Settings, OrmError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        OrmError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        OrmError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            default_database = "shop"
            debug = true
            descriptor_ttl_secs = 600
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.default_database, "shop");
        assert!(settings.debug);
        assert_eq!(settings.descriptor_ttl_secs, Some(600));
        // Defaults preserved
        assert_eq!(settings.default_strategy, "eager");
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings.default_database, "main");
        assert!(settings.validate_on_write);
    }

    #[test]
    fn test_from_toml_str_invalid() {
        assert!(from_toml_str("[[invalid toml content").is_err());
    }

    #[test]
    fn test_from_toml_str_wrong_type() {
        let err = from_toml_str("validate_on_write = \"sometimes\"").unwrap_err();
        assert!(matches!(err, OrmError::ConfigurationError(_)));
    }

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{ "log_level": "debug", "default_strategy": "custom" }"#;
        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.default_strategy, "custom");
        assert_eq!(settings.default_database, "main");
    }

    #[test]
    fn test_from_json_str_invalid() {
        assert!(from_json_str("{not json").is_err());
    }

    #[test]
    fn test_from_toml_file_missing() {
        let err = from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read TOML file"));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        let over = serde_json::json!({"a": {"b": 10}});
        let merged = merge_json(base, over);
        assert_eq!(merged["a"]["b"], 10);
        assert_eq!(merged["a"]["c"], 2);
        assert_eq!(merged["d"], 3);
    }
}
