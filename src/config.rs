use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::BotError;

pub const DEFAULT_TYPING_DELAY_MIN: f64 = 0.5;
pub const DEFAULT_TYPING_DELAY_MAX: f64 = 4.5;
/// Upper bound accepted for either typing delay bound, in seconds.
pub const MAX_TYPING_DELAY: f64 = 3600.0;

/// Credentials read from the environment.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_name: String,
    /// Base64 session blob. Takes precedence over the session file when set.
    pub session_string: Option<String>,
}

impl TelegramConfig {
    pub fn session_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.session", self.session_name))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BehaviorConfig {
    #[serde(default = "default_typing_delay_min")]
    pub typing_delay_min: f64,
    #[serde(default = "default_typing_delay_max")]
    pub typing_delay_max: f64,
    #[serde(default = "default_reaction_probability")]
    pub reaction_probability: f64,
    #[serde(default = "default_edit_reply_probability")]
    pub edit_reply_probability: f64,
    #[serde(default = "default_keep_alive_min_secs")]
    pub keep_alive_min_secs: u64,
    #[serde(default = "default_keep_alive_max_secs")]
    pub keep_alive_max_secs: u64,
    #[serde(default = "default_keep_alive_backoff_secs")]
    pub keep_alive_backoff_secs: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            typing_delay_min: default_typing_delay_min(),
            typing_delay_max: default_typing_delay_max(),
            reaction_probability: default_reaction_probability(),
            edit_reply_probability: default_edit_reply_probability(),
            keep_alive_min_secs: default_keep_alive_min_secs(),
            keep_alive_max_secs: default_keep_alive_max_secs(),
            keep_alive_backoff_secs: default_keep_alive_backoff_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_file")]
    pub file: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: default_log_file(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PhrasesConfig {
    /// Optional phrase bank file replacing the built-in one.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Optional TOML file with tunables. Credentials never live here.
#[derive(Debug, Deserialize, Clone, Default)]
struct FileConfig {
    #[serde(default)]
    behavior: BehaviorConfig,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    phrases: PhrasesConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub behavior: BehaviorConfig,
    pub logging: LoggingConfig,
    pub phrases: PhrasesConfig,
}

fn default_typing_delay_min() -> f64 {
    DEFAULT_TYPING_DELAY_MIN
}

fn default_typing_delay_max() -> f64 {
    DEFAULT_TYPING_DELAY_MAX
}

fn default_reaction_probability() -> f64 {
    0.7
}

fn default_edit_reply_probability() -> f64 {
    0.2
}

fn default_keep_alive_min_secs() -> u64 {
    200
}

fn default_keep_alive_max_secs() -> u64 {
    400
}

fn default_keep_alive_backoff_secs() -> u64 {
    30
}

fn default_log_file() -> PathBuf {
    PathBuf::from("rotenberg_bot_debug.log")
}

fn default_session_name() -> String {
    "rotenberg_session".to_string()
}

impl Config {
    /// Load credentials from the process environment (after applying `.env`)
    /// and tunables from `path` if that file exists.
    pub fn load(path: &Path) -> Result<Self> {
        // A missing .env is fine, the variables may already be exported.
        let _ = dotenvy::dotenv();

        let file = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str::<FileConfig>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            FileConfig::default()
        };

        let telegram = telegram_from_lookup(|key| std::env::var(key).ok())?;

        Ok(Self {
            telegram,
            behavior: file.behavior,
            logging: file.logging,
            phrases: file.phrases,
        })
    }

    /// Check required credentials and tunable invariants.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.telegram.api_id == 0 {
            return Err(BotError::Configuration(
                "API_ID is missing from the environment / .env file".into(),
            ));
        }
        if self.telegram.api_hash.is_empty() {
            return Err(BotError::Configuration(
                "API_HASH is missing from the environment / .env file".into(),
            ));
        }

        let b = &self.behavior;
        if !(b.typing_delay_min.is_finite() && b.typing_delay_max.is_finite())
            || b.typing_delay_max > MAX_TYPING_DELAY
        {
            return Err(BotError::Configuration(format!(
                "typing delay bounds must be finite and at most {MAX_TYPING_DELAY}s, got {}..{}",
                b.typing_delay_min, b.typing_delay_max
            )));
        }
        if !(b.typing_delay_min >= 0.0 && b.typing_delay_min <= b.typing_delay_max) {
            return Err(BotError::Configuration(format!(
                "typing delay bounds are invalid: min {} > max {}",
                b.typing_delay_min, b.typing_delay_max
            )));
        }
        for (name, p) in [
            ("reaction_probability", b.reaction_probability),
            ("edit_reply_probability", b.edit_reply_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(BotError::Configuration(format!(
                    "{name} must be within [0, 1], got {p}"
                )));
            }
        }
        if b.keep_alive_min_secs > b.keep_alive_max_secs {
            return Err(BotError::Configuration(format!(
                "keep-alive interval is invalid: min {} > max {}",
                b.keep_alive_min_secs, b.keep_alive_max_secs
            )));
        }

        info!("Configuration loaded successfully");
        Ok(())
    }
}

/// Find a configuration error anywhere in an `anyhow` chain, so callers can
/// print setup help instead of a bare error.
pub fn configuration_error(err: &anyhow::Error) -> Option<&BotError> {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<BotError>())
        .find(|e| matches!(e, BotError::Configuration(_)))
}

/// Read credentials through `lookup`. Absent or blank values fall back to the
/// defaults that `validate` later rejects.
fn telegram_from_lookup<F>(lookup: F) -> Result<TelegramConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    let api_id = match get("API_ID") {
        Some(raw) => raw
            .parse::<i32>()
            .map_err(|_| BotError::Configuration(format!("API_ID must be an integer, got '{raw}'")))?,
        None => 0,
    };

    Ok(TelegramConfig {
        api_id,
        api_hash: get("API_HASH").unwrap_or_default(),
        session_name: get("SESSION_NAME").unwrap_or_else(default_session_name),
        session_string: get("SESSION_STRING"),
    })
}
