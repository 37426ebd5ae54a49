use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{
    buffer::RetryPolicy,
    player::PlaybackSettings,
    repeat::RepeatMode,
    session::SessionSettings,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Paths
    pub data_dir: PathBuf,

    // Audio
    pub default_volume: f32,
    pub max_volume: f32,
    pub output_gain: f32,
    pub max_queue_size: usize,

    // Buffer
    pub prefetch_max_retries: u32,
    pub prefetch_retry_base_ms: u64,
    pub stream_timeout_secs: u64,

    // Sesiones
    #[serde(with = "humantime_serde_compat")]
    pub reconnect_grace: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Paths
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),

            // Audio
            default_volume: env_or("DEFAULT_VOLUME", defaults.default_volume)?,
            max_volume: env_or("MAX_VOLUME", defaults.max_volume)?,
            output_gain: env_or("OUTPUT_GAIN", defaults.output_gain)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            // Buffer
            prefetch_max_retries: env_or("PREFETCH_MAX_RETRIES", defaults.prefetch_max_retries)?,
            prefetch_retry_base_ms: env_or("PREFETCH_RETRY_BASE_MS", defaults.prefetch_retry_base_ms)?,
            stream_timeout_secs: env_or("STREAM_TIMEOUT_SECS", defaults.stream_timeout_secs)?,

            // Sesiones
            reconnect_grace: match std::env::var("RECONNECT_GRACE") {
                Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
                    .with_context(|| format!("RECONNECT_GRACE inválido: {val}"))?,
                _ => defaults.reconnect_grace,
            },
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(config.data_dir.join("users"))?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Default volume must be between 0.0 and `max_volume`
    /// - Output gain must be in `(0.0, 1.0]`
    /// - Queue size and stream timeout must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.max_volume <= 0.0 {
            anyhow::bail!("Max volume must be greater than 0, got: {}", self.max_volume);
        }

        if self.default_volume < 0.0 || self.default_volume > self.max_volume {
            anyhow::bail!(
                "Default volume must be between 0.0 and {}, got: {}",
                self.max_volume,
                self.default_volume
            );
        }

        if self.output_gain <= 0.0 || self.output_gain > 1.0 {
            anyhow::bail!("Output gain must be in (0.0, 1.0], got: {}", self.output_gain);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.stream_timeout_secs == 0 {
            anyhow::bail!("Stream timeout must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: Guild {}\n  \
            Audio: {}% vol (max {}%), gain {}, {} queue\n  \
            Buffer: {} retries from {}ms, {}s timeout\n  \
            Sessions: {} reconnect grace\n  \
            Data: {}",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0) as u32,
            (self.max_volume * 100.0) as u32,
            self.output_gain,
            self.max_queue_size,
            self.prefetch_max_retries,
            self.prefetch_retry_base_ms,
            self.stream_timeout_secs,
            humantime::format_duration(self.reconnect_grace),
            self.data_dir.display(),
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base_delay = Duration::from_millis(self.prefetch_retry_base_ms);
        RetryPolicy {
            max_retries: self.prefetch_max_retries,
            base_delay,
            max_delay: base_delay.saturating_mul(16),
        }
    }

    /// Ajustes de arranque de una sesión, con el volumen y modo ya resueltos
    pub fn session_settings(&self, volume: f32, repeat: RepeatMode) -> SessionSettings {
        SessionSettings {
            playback: PlaybackSettings {
                volume: volume.clamp(0.0, self.max_volume),
                max_volume: self.max_volume,
                max_queue_size: self.max_queue_size,
            },
            repeat,
            retry: self.retry_policy(),
            stream_timeout: Duration::from_secs(self.stream_timeout_secs),
            reconnect_grace: self.reconnect_grace,
            ..SessionSettings::default()
        }
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("{key} inválido: {val}")),
        _ => Ok(default),
    }
}

/// `Duration` como texto legible ("5s", "1m 30s")
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            guild_id: None,

            // Path defaults
            data_dir: "./data".into(),

            // Audio defaults
            default_volume: 1.0,
            max_volume: 2.0,
            output_gain: 0.4,
            max_queue_size: 1000,

            // Buffer defaults
            prefetch_max_retries: 3,
            prefetch_retry_base_ms: 500,
            stream_timeout_secs: 30,

            reconnect_grace: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            default_volume: 3.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            output_gain: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = Config {
            prefetch_max_retries: 5,
            prefetch_retry_base_ms: 100,
            ..Config::default()
        };
        let retry = config.retry_policy();
        assert_eq!(retry.max_retries, 5);
        assert_eq!(retry.delay(1), Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_millis(1600));
    }

    #[test]
    fn test_session_settings_clamp_volume() {
        let settings = Config::default().session_settings(9.0, RepeatMode::RepeatQueue);
        assert_eq!(settings.playback.volume, 2.0);
        assert_eq!(settings.repeat, RepeatMode::RepeatQueue);
        assert_eq!(settings.reconnect_grace, Duration::from_secs(5));
    }

    #[test]
    fn test_summary_hides_token() {
        let config = Config {
            discord_token: "secret-token".into(),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("secret-token"));
        assert!(summary.contains("5s"));
    }

    #[test]
    fn test_serde_uses_readable_durations() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["reconnect_grace"], "5s");
    }
}
