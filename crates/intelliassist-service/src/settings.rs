//! Layered settings: defaults, optional `intelliassist.{toml,yaml,json}`,
//! then `INTELLIASSIST__SECTION__KEY` environment variables.

use config::{Config, Environment, File, FileFormat};
use intelliassist_ai::{GroqConfig, HuggingFaceConfig, LocalCommandConfig, MetricsConfig, PipelineConfig};
use intelliassist_db::StorageConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

const ENV_PREFIX: &str = "INTELLIASSIST";
const CONFIG_FILE: &str = "intelliassist";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub providers: ProviderSettings,
    pub metrics: MetricsSettings,
    pub pipeline: PipelineSettings,
    pub storage: StorageSettings,
    pub extraction: ExtractionSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub groq: GroqConfig,
    pub huggingface: HuggingFaceConfig,
    pub local_transcription: Option<LocalCommandConfig>,
    pub local_captioning: Option<LocalCommandConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub capacity: usize,
    pub health_window_minutes: u64,
    pub slow_call_secs: u64,
    pub rate_limits: HashMap<String, u32>,
    pub default_rate_limit: u32,
    pub warn_ratio: f64,
    pub enforce_rate_limits: bool,
    /// Window of the dashboard's recent-call list
    pub dashboard_recent_minutes: i64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        let defaults = MetricsConfig::default();
        Self {
            capacity: defaults.capacity,
            health_window_minutes: defaults.health_window.as_secs() / 60,
            slow_call_secs: defaults.slow_call.as_secs(),
            rate_limits: defaults.rate_limits,
            default_rate_limit: defaults.default_rate_limit,
            warn_ratio: defaults.warn_ratio,
            enforce_rate_limits: defaults.enforce_rate_limits,
            dashboard_recent_minutes: 60,
        }
    }
}

impl MetricsSettings {
    pub fn to_config(&self) -> MetricsConfig {
        let mut rate_limits = MetricsConfig::default().rate_limits;
        rate_limits.extend(self.rate_limits.iter().map(|(k, v)| (k.to_lowercase(), *v)));
        MetricsConfig {
            capacity: self.capacity,
            health_window: Duration::from_secs(self.health_window_minutes * 60),
            slow_call: Duration::from_secs(self.slow_call_secs),
            rate_limits,
            default_rate_limit: self.default_rate_limit,
            warn_ratio: self.warn_ratio,
            enforce_rate_limits: self.enforce_rate_limits,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub attempt_timeout_secs: u64,
    pub max_audio_bytes: usize,
    pub large_audio_warn_bytes: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            attempt_timeout_secs: 60,
            max_audio_bytes: defaults.max_audio_bytes,
            large_audio_warn_bytes: defaults.large_audio_warn_bytes,
        }
    }
}

impl PipelineSettings {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_audio_bytes: self.max_audio_bytes,
            large_audio_warn_bytes: self.large_audio_warn_bytes,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_url: Option<String>,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    pub probe_timeout_secs: u64,
    pub max_connections: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            supabase_url: None,
            supabase_anon_key: None,
            probe_timeout_secs: 5,
            max_connections: 5,
        }
    }
}

impl StorageSettings {
    pub fn to_config(&self) -> StorageConfig {
        StorageConfig {
            database_url: self.database_url.clone(),
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            max_connections: self.max_connections,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// JSON rule table replacing the built-in rules
    pub rules_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "intelliassist_service=info,intelliassist_ai=info,intelliassist_db=info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load `.env`, the optional config file and the environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config = Config::builder()
            .add_source(File::with_name(CONFIG_FILE).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut settings: Settings = config.try_deserialize()?;
        settings.apply_legacy_env(|key| std::env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without consulting the environment.
    pub fn from_toml(toml: &str) -> Result<Self> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Fill unset keys from the conventional variable names
    /// (`GROQ_API_KEY`, `HF_API_KEY`, `DATABASE_URL`, `SUPABASE_URL`,
    /// `SUPABASE_ANON_KEY`).
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let fill = |slot: &mut Option<String>, key: &str| {
            if slot.as_deref().map_or(true, |v| v.trim().is_empty()) {
                if let Some(value) = lookup(key) {
                    *slot = Some(value);
                }
            }
        };

        fill(&mut self.providers.groq.api_key, "GROQ_API_KEY");
        fill(&mut self.providers.huggingface.api_key, "HF_API_KEY");
        fill(&mut self.storage.database_url, "DATABASE_URL");
        fill(&mut self.storage.supabase_url, "SUPABASE_URL");
        fill(&mut self.storage.supabase_anon_key, "SUPABASE_ANON_KEY");
    }

    pub fn validate(&self) -> Result<()> {
        if self.metrics.capacity == 0 {
            return Err(Error::InvalidSettings("metrics.capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.metrics.warn_ratio) {
            return Err(Error::InvalidSettings(
                "metrics.warn_ratio must be between 0 and 1".into(),
            ));
        }
        if self.pipeline.attempt_timeout_secs == 0 {
            return Err(Error::InvalidSettings(
                "pipeline.attempt_timeout_secs must be positive".into(),
            ));
        }
        if self.pipeline.large_audio_warn_bytes > self.pipeline.max_audio_bytes {
            return Err(Error::InvalidSettings(
                "pipeline.large_audio_warn_bytes exceeds max_audio_bytes".into(),
            ));
        }
        if self.storage.max_connections == 0 {
            return Err(Error::InvalidSettings(
                "storage.max_connections must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.providers.groq.chat_model, "llama3-8b-8192");
        assert_eq!(settings.pipeline.attempt_timeout(), Duration::from_secs(60));
        assert_eq!(settings.storage.probe_timeout_secs, 5);

        let metrics = settings.metrics.to_config();
        assert_eq!(metrics.capacity, 10_000);
        assert_eq!(metrics.ceiling("groq"), 30);
        assert_eq!(metrics.ceiling("unknown"), 1000);
        assert!(!metrics.enforce_rate_limits);
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let settings = Settings::from_toml(
            r#"
            [providers.groq]
            api_key = "gsk_test"
            chat_model = "llama3-70b-8192"

            [providers.local_transcription]
            executable = "whisper-cli"
            model_path = "/models/ggml-base.bin"

            [metrics]
            enforce_rate_limits = true
            [metrics.rate_limits]
            groq = 10

            [storage]
            probe_timeout_secs = 2
            "#,
        )
        .unwrap();

        assert!(settings.providers.groq.is_configured());
        assert_eq!(settings.providers.groq.chat_model, "llama3-70b-8192");
        assert_eq!(settings.providers.groq.max_tokens, 1024);
        let local = settings.providers.local_transcription.unwrap();
        assert_eq!(local.executable, "whisper-cli");

        let metrics = settings.metrics.to_config();
        assert!(metrics.enforce_rate_limits);
        assert_eq!(metrics.ceiling("groq"), 10);
        assert_eq!(metrics.ceiling("huggingface"), 1000);
        assert_eq!(settings.storage.to_config().probe_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let result = Settings::from_toml("[pipeline]\nattempt_timeout_secs = 0\n");
        assert!(matches!(result, Err(Error::InvalidSettings(_))));

        let result = Settings::from_toml("[metrics]\nwarn_ratio = 1.5\n");
        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_legacy_env_fills_only_unset_keys() {
        let mut settings = Settings::from_toml("[storage]\ndatabase_url = \"postgres://configured\"\n").unwrap();
        let env: HashMap<&str, &str> = [
            ("GROQ_API_KEY", "gsk_env"),
            ("HF_API_KEY", ""),
            ("DATABASE_URL", "postgres://from-env"),
            ("SUPABASE_URL", "https://abc.supabase.co"),
        ]
        .into_iter()
        .collect();

        settings.apply_legacy_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.providers.groq.api_key.as_deref(), Some("gsk_env"));
        assert_eq!(settings.providers.huggingface.api_key, None);
        assert_eq!(settings.storage.database_url.as_deref(), Some("postgres://configured"));
        assert_eq!(settings.storage.supabase_url.as_deref(), Some("https://abc.supabase.co"));
        assert_eq!(settings.storage.supabase_anon_key, None);
    }
}
