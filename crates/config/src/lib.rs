//! Configuration loading, validation, and management for OrgClaw.
//!
//! Loads configuration from `~/.orgclaw/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for minute-valued session settings (ten years).
const MAX_SESSION_MINUTES: i64 = 60 * 24 * 365 * 10;

/// The root configuration structure.
///
/// Maps directly to `~/.orgclaw/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Model execution endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Record store
    #[serde(default)]
    pub store: StoreConfig,

    /// Session lifecycle tuning
    #[serde(default)]
    pub session: SessionConfig,

    /// Organizational context files
    #[serde(default)]
    pub context: ContextConfig,

    /// Skill definitions
    #[serde(default)]
    pub skills: SkillsConfig,

    /// Personal memory
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("store", &self.store)
            .field("session", &self.session)
            .field("context", &self.context)
            .field("skills", &self.skills)
            .field("memory", &self.memory)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Base URL of an OpenAI-compatible chat-completions API
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// SQLite database file. Defaults to `~/.orgclaw/orgclaw.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_backend() -> String {
    "sqlite".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long an active session on another channel stays resumable
    #[serde(default = "default_continuity_window")]
    pub continuity_window_minutes: i64,

    /// Live token total above which a session is compacted
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold_tokens: u64,

    /// Messages left uncompacted after compaction
    #[serde(default = "default_keep_recent")]
    pub keep_recent_messages: usize,

    /// Token budget for the conversation-history prompt section
    #[serde(default = "default_history_budget")]
    pub history_token_budget: u64,

    /// Idle time after which `sessions expire` retires a session
    #[serde(default = "default_idle_expiry")]
    pub idle_expiry_minutes: i64,
}

fn default_continuity_window() -> i64 {
    30
}
fn default_compaction_threshold() -> u64 {
    8000
}
fn default_keep_recent() -> usize {
    10
}
fn default_history_budget() -> u64 {
    2000
}
fn default_idle_expiry() -> i64 {
    120
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            continuity_window_minutes: default_continuity_window(),
            compaction_threshold_tokens: default_compaction_threshold(),
            keep_recent_messages: default_keep_recent(),
            history_token_budget: default_history_budget(),
            idle_expiry_minutes: default_idle_expiry(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Directory holding `<org_id>/context/*.md`. Defaults to `~/.orgclaw/orgs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default = "default_context_tokens")]
    pub max_tokens: u64,
}

fn default_context_tokens() -> u64 {
    10_000
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            root: None,
            max_tokens: default_context_tokens(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// TOML file with `[[skills]]` entries. Defaults to `~/.orgclaw/skills.toml`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Memories surfaced per recall
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Extract memories from each exchange
    #[serde(default = "default_true")]
    pub auto_extract: bool,
}

fn default_recall_limit() -> usize {
    5
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
            auto_extract: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.orgclaw/config.toml).
    ///
    /// Environment overrides:
    /// - `ORGCLAW_API_KEY`, then `OPENAI_API_KEY`, when no key is configured
    /// - `ORGCLAW_MODEL`
    /// - `ORGCLAW_DATABASE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.api_key.is_none() {
            self.api_key = std::env::var("ORGCLAW_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("ORGCLAW_MODEL") {
            self.provider.model = model;
        }

        if let Ok(db) = std::env::var("ORGCLAW_DATABASE") {
            self.store.path = Some(PathBuf::from(db));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".orgclaw")
    }

    /// Resolved SQLite database path.
    pub fn database_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("orgclaw.db"))
    }

    /// Resolved root for organizational context files.
    pub fn context_root(&self) -> PathBuf {
        self.context
            .root
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("orgs"))
    }

    /// Resolved skills file path.
    pub fn skills_path(&self) -> PathBuf {
        self.skills
            .path
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("skills.toml"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.temperature < 0.0 || self.provider.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "provider.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if !matches!(self.store.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "store.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.store.backend
            )));
        }

        if self.session.continuity_window_minutes <= 0
            || self.session.continuity_window_minutes > MAX_SESSION_MINUTES
        {
            return Err(ConfigError::ValidationError(format!(
                "session.continuity_window_minutes must be between 1 and {MAX_SESSION_MINUTES}"
            )));
        }

        if self.session.keep_recent_messages == 0 {
            return Err(ConfigError::ValidationError(
                "session.keep_recent_messages must be at least 1".into(),
            ));
        }

        if !(0..=MAX_SESSION_MINUTES).contains(&self.session.idle_expiry_minutes) {
            return Err(ConfigError::ValidationError(format!(
                "session.idle_expiry_minutes must be between 0 and {MAX_SESSION_MINUTES}"
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: ProviderConfig::default(),
            store: StoreConfig::default(),
            session: SessionConfig::default(),
            context: ContextConfig::default(),
            skills: SkillsConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
