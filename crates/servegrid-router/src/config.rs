//! Router and migration configuration.
//!
//! Both structs deserialize from TOML with every field optional; missing
//! fields take the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use servegrid_state::ResourceRequirements;

use crate::drain::{DEFAULT_DRAIN_THRESHOLD, DrainPolicy};
use crate::error::{RouterError, RouterResult};

/// Queue length assigned to every new instance unless configured.
pub const DEFAULT_MAX_QUEUE_LENGTH: u32 = 10;

/// Static description of the model a router serves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub model_name: String,
    /// Backend implementation started for each instance.
    pub backend_kind: String,
    /// Forwarded untouched to every started instance.
    pub backend_config: serde_json::Value,
    pub resources: ResourceRequirements,
    pub max_queue_length: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            backend_kind: "transformers".to_string(),
            backend_config: serde_json::Value::Object(Default::default()),
            resources: ResourceRequirements::default(),
            max_queue_length: DEFAULT_MAX_QUEUE_LENGTH,
        }
    }
}

impl RouterConfig {
    /// Default config for `model_name`.
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Reject an empty model name or backend kind.
    pub fn validate(&self) -> RouterResult<()> {
        if self.model_name.is_empty() {
            return Err(RouterError::Config("model_name must not be empty".to_string()));
        }
        if self.backend_kind.is_empty() {
            return Err(RouterError::Config("backend_kind must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Tuning knobs of the migration drain loop.
///
/// The defaults reproduce an unbounded best-effort drain: stop once the
/// source reports at most 10 tokens, with no iteration cap and no timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Residual state size (tokens) that is cheap enough to drop.
    pub drain_threshold: usize,
    /// Give up after this many fetches. Unbounded when unset.
    pub max_drain_iterations: Option<u64>,
    /// Give up after this many seconds of draining. Unbounded when unset.
    pub drain_timeout_secs: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            drain_threshold: DEFAULT_DRAIN_THRESHOLD,
            max_drain_iterations: None,
            drain_timeout_secs: None,
        }
    }
}

impl MigrationConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> RouterResult<Self> {
        let config: MigrationConfig =
            toml::from_str(content).map_err(|e| RouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn from_file(path: &Path) -> RouterResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Reject bounds that would stop the drain before its first fetch.
    pub fn validate(&self) -> RouterResult<()> {
        if self.max_drain_iterations == Some(0) {
            return Err(RouterError::Config(
                "max_drain_iterations must be at least 1".to_string(),
            ));
        }
        if self.drain_timeout_secs == Some(0) {
            return Err(RouterError::Config(
                "drain_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Drain loop policy described by this config.
    pub fn drain_policy(&self) -> DrainPolicy {
        DrainPolicy {
            threshold: self.drain_threshold,
            max_iterations: self.max_drain_iterations,
            timeout: self.drain_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_unbounded() {
        let config = MigrationConfig::default();
        assert_eq!(config.drain_threshold, 10);
        assert_eq!(config.max_drain_iterations, None);
        assert_eq!(config.drain_timeout_secs, None);

        let policy = config.drain_policy();
        assert_eq!(policy, DrainPolicy::default());
    }

    #[test]
    fn parse_partial_toml() {
        let config = MigrationConfig::from_toml_str(
            r#"
max_drain_iterations = 500
drain_timeout_secs = 30
"#,
        )
        .unwrap();

        assert_eq!(config.drain_threshold, 10);
        assert_eq!(config.max_drain_iterations, Some(500));
        assert_eq!(
            config.drain_policy().timeout,
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn zero_bounds_are_rejected() {
        let err = MigrationConfig::from_toml_str("max_drain_iterations = 0").unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));

        let err = MigrationConfig::from_toml_str("drain_timeout_secs = 0").unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = MigrationConfig::from_toml_str("drain_threshold = \"ten\"").unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "drain_threshold = 32").unwrap();

        let config = MigrationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.drain_threshold, 32);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = MigrationConfig::from_file(Path::new("/nonexistent/servegrid.toml")).unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn router_config_from_toml() {
        let config: RouterConfig = toml::from_str(
            r#"
model_name = "facebook/opt-6.7b"
backend_kind = "vllm"

[resources]
num_gpus = 2

[backend_config]
pretrained_model_name_or_path = "facebook/opt-6.7b"
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.resources.num_cpus, 1);
        assert_eq!(config.resources.num_gpus, 2);
        assert_eq!(config.max_queue_length, 10);
        assert_eq!(
            config.backend_config["pretrained_model_name_or_path"],
            "facebook/opt-6.7b"
        );
    }

    #[test]
    fn router_config_requires_model_name() {
        let err = RouterConfig::default().validate().unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
        assert!(RouterConfig::new("opt").validate().is_ok());
    }
}
