//! Configuration management for Parley
//!
//! Configuration is read from a YAML file, then overridden by `PARLEY_*`
//! environment variables, then by command-line flags, and finally
//! validated. The resulting [`Config`] is immutable and handed to
//! constructors; nothing reads the environment after startup.

use crate::error::{ParleyError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Largest accepted chat listing window
const MAX_LIST_WINDOW: usize = 1000;

/// Main configuration structure for Parley
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Backing store settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Completion backend settings
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Conversation settings
    #[serde(default)]
    pub chat: ChatConfig,
}

/// Backing store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database location; the platform data directory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Completion backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of the OpenAI-compatible API, `chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token; requests are unauthenticated when empty
    #[serde(default)]
    pub api_key: String,

    /// Allowed models, the first one is the default
    #[serde(default = "default_models")]
    pub models: Vec<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_models() -> Vec<String> {
    vec!["gpt-4o-mini".to_string()]
}

fn default_timeout_seconds() -> u64 {
    45
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            models: default_models(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

/// Conversation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// How many of the most recently touched chats a listing returns
    #[serde(default = "default_list_window")]
    pub list_window: usize,

    /// Name of this deployment, used to derive the session cookie name
    #[serde(default)]
    pub instance_name: String,
}

fn default_list_window() -> usize {
    20
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            list_window: default_list_window(),
            instance_name: String::new(),
        }
    }
}

/// Split a comma separated list, dropping blank entries
///
/// # Examples
///
/// ```
/// use parley::config::split_csv;
///
/// assert_eq!(split_csv(" a, ,b ,"), vec!["a", "b"]);
/// assert!(split_csv("").is_empty());
/// ```
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from file, environment and CLI
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed command line, for overrides
    ///
    /// # Errors
    ///
    /// - `ParleyError::Io` if the file exists but cannot be read
    /// - `ParleyError::Yaml` if the file is not valid configuration YAML
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(ParleyError::from)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config = serde_yaml::from_str(&contents)
            .map_err(ParleyError::from)
            .with_context(|| format!("Failed to parse config file {}", path))?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(path) = std::env::var("PARLEY_STORAGE_PATH") {
            if !path.trim().is_empty() {
                self.storage.path = Some(PathBuf::from(path));
            }
        }

        if let Ok(base_url) = std::env::var("PARLEY_API_BASE_URL") {
            self.completion.base_url = base_url;
        }

        if let Ok(api_key) = std::env::var("PARLEY_API_KEY") {
            self.completion.api_key = api_key;
        }

        if let Ok(models) = std::env::var("PARLEY_MODELS") {
            let parsed = split_csv(&models);
            if parsed.is_empty() {
                tracing::warn!("Ignoring PARLEY_MODELS with no model names: {:?}", models);
            } else {
                self.completion.models = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("PARLEY_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.trim().parse() {
                self.completion.timeout_seconds = value;
            } else {
                tracing::warn!("Invalid PARLEY_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(window) = std::env::var("PARLEY_LIST_WINDOW") {
            if let Ok(value) = window.trim().parse() {
                self.chat.list_window = value;
            } else {
                tracing::warn!("Invalid PARLEY_LIST_WINDOW: {}", window);
            }
        }

        if let Ok(name) = std::env::var("PARLEY_INSTANCE_NAME") {
            self.chat.instance_name = name;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(path.clone());
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ParleyError::Config` naming the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.completion.base_url.trim().is_empty() {
            return Err(
                ParleyError::Config("completion.base_url cannot be empty".to_string()).into(),
            );
        }

        if let Err(e) = Url::parse(self.completion.base_url.trim()) {
            return Err(ParleyError::Config(format!(
                "completion.base_url is not a valid URL: {}",
                e
            ))
            .into());
        }

        if self.completion.timeout_seconds == 0 {
            return Err(ParleyError::Config(
                "completion.timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.completion.models.iter().any(|m| m.trim().is_empty()) {
            return Err(ParleyError::Config(
                "completion.models cannot contain empty names".to_string(),
            )
            .into());
        }

        if self.chat.list_window == 0 || self.chat.list_window > MAX_LIST_WINDOW {
            return Err(ParleyError::Config(format!(
                "chat.list_window must be between 1 and {}",
                MAX_LIST_WINDOW
            ))
            .into());
        }

        Ok(())
    }

    /// Name of the session cookie for this instance
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::config::Config;
    ///
    /// let mut config = Config::default();
    /// assert_eq!(config.session_name(), "session");
    ///
    /// config.chat.instance_name = "  Team Chat ".to_string();
    /// assert_eq!(config.session_name(), "team-chat-session");
    /// ```
    pub fn session_name(&self) -> String {
        let name = self.chat.instance_name.trim().to_lowercase();
        if name.is_empty() {
            return "session".to_string();
        }
        format!("{}-session", name.replace(' ', "-"))
    }
}
