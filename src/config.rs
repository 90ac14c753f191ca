//! Configuration for the Signpath gateway
//!
//! Loaded from a TOML file (default location resolved via the platform
//! config directory) with environment variable overrides for secrets.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Default cap on displayed assistant text, in characters
pub const DEFAULT_DISPLAY_MAX_CHARS: usize = 1024;

/// Default speech recognition poll cadence in milliseconds
pub const DEFAULT_SPEECH_POLL_MS: u64 = 500;

/// Default camera prediction poll cadence in milliseconds
pub const DEFAULT_CAMERA_POLL_MS: u64 = 1000;

/// Gateway configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Completion API settings
    pub completion: CompletionConfig,

    /// Speech recognition/synthesis service settings
    pub speech: SpeechConfig,

    /// Gesture camera service settings
    pub gesture: GestureConfig,

    /// Display formatting settings
    pub display: DisplayConfig,

    /// Data directory (conversation database)
    pub data_dir: Option<PathBuf>,
}

/// Completion API settings (OpenAI-compatible, bearer auth)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Base URL including the version segment (e.g. `https://api.together.xyz/v1`)
    pub base_url: String,

    /// Bearer token; `SIGNPATH_API_KEY` overrides the file value
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// System prompt prepended to every request
    pub system_prompt: String,

    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: Option<u32>,
    pub repetition_penalty: Option<f64>,

    /// Stop sequences
    pub stop: Vec<String>,
}

/// Speech service settings (local network recognition + synthesis)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Base URL of the speech service
    pub base_url: String,

    /// Recognition poll interval in milliseconds
    pub poll_interval_ms: u64,
}

/// Gesture camera service settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Base URL of the gesture/video service
    pub base_url: String,

    /// Prediction poll interval in milliseconds
    pub poll_interval_ms: u64,
}

/// Display formatting settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Maximum displayed assistant text length, in characters
    pub max_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            completion: CompletionConfig::default(),
            speech: SpeechConfig::default(),
            gesture: GestureConfig::default(),
            display: DisplayConfig::default(),
            data_dir: None,
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.together.xyz/v1".to_string(),
            api_key: String::new(),
            model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".to_string(),
            system_prompt: "You are a helpful assistant for a sign language \
                            communication app. Keep answers short and clear."
                .to_string(),
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.7,
            top_k: Some(50),
            repetition_penalty: Some(1.0),
            stop: vec!["<|eot_id|>".to_string()],
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5002".to_string(),
            poll_interval_ms: DEFAULT_SPEECH_POLL_MS,
        }
    }
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5001".to_string(),
            poll_interval_ms: DEFAULT_CAMERA_POLL_MS,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_DISPLAY_MAX_CHARS,
        }
    }
}

impl Config {
    /// Load configuration from the given path, or the default location
    ///
    /// Missing files yield the default configuration. The
    /// `SIGNPATH_API_KEY` environment variable overrides the file's
    /// completion API key.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path(),
        };

        let mut config = match path {
            Some(ref p) if p.exists() => {
                let raw = std::fs::read_to_string(p)?;
                let config: Self = toml::from_str(&raw)?;
                tracing::debug!(path = %p.display(), "configuration loaded");
                config
            }
            _ => Self::default(),
        };

        if let Ok(key) = std::env::var("SIGNPATH_API_KEY") {
            if !key.is_empty() {
                config.completion.api_key = key;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Default config file path (`<config dir>/signpath/config.toml`)
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "signpath", "signpath")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Resolved database path under the data directory
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.as_ref().map_or_else(
            || {
                directories::ProjectDirs::from("dev", "signpath", "signpath")
                    .map_or_else(|| PathBuf::from("signpath.db"), |d| d.data_dir().join("signpath.db"))
            },
            |dir| dir.join("signpath.db"),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.completion.base_url.is_empty() {
            return Err(Error::Config("completion.base_url must not be empty".to_string()));
        }
        if self.speech.poll_interval_ms == 0 || self.gesture.poll_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be non-zero".to_string()));
        }
        if self.display.max_chars == 0 {
            return Err(Error::Config("display.max_chars must be non-zero".to_string()));
        }
        Ok(())
    }
}
