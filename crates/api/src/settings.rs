//! Layered service configuration
//!
//! The `preset` pipeline, then the TOML file, then `AFFECT__*` environment
//! variables (e.g. `AFFECT__SERVER__ADDR`, `AFFECT__PIPELINE__MODELS__ALLOW_MOCK`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use affect::{AffectConfig, PipelinePreset};
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::{Deserialize, Serialize};

use crate::rate_limit::RateLimitConfig;
use crate::sessions::HistoryScope;

pub const ENV_PREFIX: &str = "AFFECT";
pub const DEFAULT_CONFIG_PATH: &str = "config/affect.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub addr: String,
    /// Upload size limit
    pub body_limit_bytes: usize,
    /// Upper bound on model inference per request
    pub inference_timeout_ms: u64,
    /// Requests running models at once; others wait within their timeout
    pub max_concurrent_inference: usize,
    pub history_scope: HistoryScope,
    /// Per-session histories kept before the least recently used is evicted
    pub max_sessions: usize,
    /// Idle time after which a session history is dropped (0 = never)
    pub session_ttl_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            body_limit_bytes: 10 * 1024 * 1024,
            inference_timeout_ms: 5000,
            max_concurrent_inference: 4,
            history_scope: HistoryScope::default(),
            max_sessions: 10_000,
            session_ttl_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Defaults the `pipeline` section is layered over
    pub preset: PipelinePreset,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub rate_limit: RateLimitConfig,
    pub pipeline: AffectConfig,
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let layered = |builder: ConfigBuilder<DefaultState>| {
            builder
                .add_source(File::from(file.clone()).required(required))
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .separator("__")
                        .try_parsing(true),
                )
        };

        let preset = match layered(Config::builder()).build()?.get::<PipelinePreset>("preset") {
            Ok(preset) => preset,
            Err(ConfigError::NotFound(_)) => PipelinePreset::default(),
            Err(e) => return Err(e),
        };
        let defaults = Settings {
            preset,
            pipeline: preset.config(),
            ..Default::default()
        };

        let settings: Settings = layered(Config::builder().add_source(Config::try_from(&defaults)?))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject server values that would disable a bound
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_concurrent_inference == 0 {
            return Err(ConfigError::Message("server.max_concurrent_inference must be at least 1".into()));
        }
        if self.server.max_sessions == 0 {
            return Err(ConfigError::Message("server.max_sessions must be at least 1".into()));
        }
        Ok(())
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.server.inference_timeout_ms)
    }

    pub fn session_ttl(&self) -> Option<Duration> {
        match self.server.session_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affect::{AggregationPolicy, StressLabelRule};

    fn write_config(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("affect-settings-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("affect.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.addr, "0.0.0.0:8080");
        assert_eq!(settings.inference_timeout(), Duration::from_secs(5));
        assert_eq!(settings.server.history_scope, HistoryScope::Global);
        assert_eq!(settings.pipeline.processing_width, 500);
        assert!(!settings.pipeline.models.allow_mock);
        assert_eq!(settings.preset, PipelinePreset::Legacy);
        assert_eq!(settings.session_ttl(), Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_preset_is_layered_under_file_values() {
        let path = write_config(
            "preset",
            r#"
preset = "corrected"

[pipeline.stress]
history_window = 50
"#,
        );

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.preset, PipelinePreset::Corrected);
        assert_eq!(settings.pipeline.aggregation, AggregationPolicy::Largest);
        assert_eq!(
            settings.pipeline.stress.label_rule,
            StressLabelRule::Percent { threshold: 50.0 }
        );
        assert_eq!(settings.pipeline.stress.history_window, Some(50));
        assert_eq!(settings.pipeline.processing_width, 500);
    }

    #[test]
    fn test_zero_session_cap_is_rejected() {
        let path = write_config(
            "sessions",
            r#"
[server]
max_sessions = 0
"#,
        );
        assert!(Settings::load(Some(&path)).is_err());
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let path = write_config(
            "file",
            r#"
[server]
inference_timeout_ms = 250
history_scope = "per_session"

[logging]
json = true

[pipeline]
aggregation = "largest"

[pipeline.stress]
history_window = 300
label_rule = { kind = "percent", threshold = 40.0 }

[pipeline.models]
allow_mock = true
"#,
        );

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.inference_timeout(), Duration::from_millis(250));
        assert_eq!(settings.server.history_scope, HistoryScope::PerSession);
        assert!(settings.logging.json);
        assert_eq!(settings.pipeline.aggregation, AggregationPolicy::Largest);
        assert_eq!(settings.pipeline.stress.history_window, Some(300));
        assert_eq!(
            settings.pipeline.stress.label_rule,
            StressLabelRule::Percent { threshold: 40.0 }
        );
        assert!(settings.pipeline.models.allow_mock);
        assert_eq!(settings.preset, PipelinePreset::Legacy);
        // Untouched sections keep their defaults
        assert_eq!(settings.server.addr, "0.0.0.0:8080");
        assert_eq!(settings.pipeline.blink.min_consecutive_frames, 5);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let missing = std::env::temp_dir().join("affect-settings-missing/none.toml");
        assert!(Settings::load(Some(&missing)).is_err());
    }
}
