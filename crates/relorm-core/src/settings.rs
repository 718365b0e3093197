//! Settings for the relorm engine.
//!
//! [`Settings`] holds everything the engine reads at construction time: the
//! default database name handed to the introspector, the default loading
//! strategy, descriptor cache lifetime, and logging preferences. Every field
//! has a default so partial configuration files are valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The complete set of engine settings.
///
/// # Examples
///
/// ```
/// use relorm_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert_eq!(settings.default_database, "main");
/// assert_eq!(settings.default_strategy, "eager");
/// assert!(settings.descriptor_ttl().is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    // ── Schema ───────────────────────────────────────────────────────

    /// Database name used when an entity does not override it.
    pub default_database: String,
    /// Loading strategy used when an entity does not override it.
    pub default_strategy: String,
    /// Descriptor cache TTL in seconds; `None` keeps descriptors forever.
    pub descriptor_ttl_secs: Option<u64>,

    // ── Writes ───────────────────────────────────────────────────────

    /// Whether entities are validated before INSERT and UPDATE.
    pub validate_on_write: bool,

    // ── Logging ──────────────────────────────────────────────────────

    /// Whether debug (pretty) log output is used instead of JSON.
    pub debug: bool,
    /// The log level directive (e.g. "info", "relorm_db=debug").
    pub log_level: String,
}

impl Settings {
    /// Returns the descriptor cache TTL as a [`Duration`].
    pub fn descriptor_ttl(&self) -> Option<Duration> {
        self.descriptor_ttl_secs.map(Duration::from_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_database: "main".to_string(),
            default_strategy: "eager".to_string(),
            descriptor_ttl_secs: None,
            validate_on_write: true,
            debug: false,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let s = Settings::default();
        assert_eq!(s.default_database, "main");
        assert_eq!(s.default_strategy, "eager");
        assert!(s.validate_on_write);
        assert!(!s.debug);
        assert_eq!(s.log_level, "info");
    }

    #[test]
    fn test_descriptor_ttl() {
        let mut s = Settings::default();
        assert!(s.descriptor_ttl().is_none());
        s.descriptor_ttl_secs = Some(30);
        assert_eq!(s.descriptor_ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_settings_roundtrip_json() {
        let s = Settings::default();
        let json = serde_json::to_string(&s).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.default_strategy, s.default_strategy);
    }
}
