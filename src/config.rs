//! Configuration file parser for `meridian.toml`.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos. Secrets may also come from the environment,
//! which takes precedence over the file.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Shared secret guarding the manual trigger endpoint.
pub const TRIGGER_TOKEN_ENV: &str = "MERIDIAN_SECRET_KEY";
pub const RENDER_TOKEN_ENV: &str = "RENDER_API_TOKEN";
pub const LLM_KEY_ENV: &str = "LLM_API_KEY";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Headless rendering service. Rendering is disabled without an endpoint.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub endpoint: Option<String>,
    pub api_token: Option<String>,
}

/// OpenAI-compatible chat-completions service used for classification.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
        }
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `Debug` masks every secret.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file, or `:memory:`.
    pub database_path: String,

    /// Address the HTTP trigger API binds to.
    pub listen_addr: String,

    /// Minutes between scheduled feed scrapes.
    pub scrape_interval_minutes: u64,

    /// Upper bound on how long an idle worker waits before re-checking the queue.
    pub worker_poll_seconds: u64,

    /// Bearer token for the manual trigger endpoint. The endpoint rejects
    /// every request while this is unset.
    pub trigger_token: Option<String>,

    /// Domains that always go straight to rendering. `None` keeps the built-in list.
    pub tricky_domains: Option<Vec<String>>,

    pub render: RenderConfig,

    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "meridian.db".to_string(),
            listen_addr: "127.0.0.1:8787".to_string(),
            scrape_interval_minutes: 60,
            worker_poll_seconds: 30,
            trigger_token: None,
            tricky_domains: None,
            render: RenderConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "[REDACTED]")
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("listen_addr", &self.listen_addr)
            .field("scrape_interval_minutes", &self.scrape_interval_minutes)
            .field("worker_poll_seconds", &self.worker_poll_seconds)
            .field("trigger_token", &redacted(&self.trigger_token))
            .field("tricky_domains", &self.tricky_domains)
            .field("render.endpoint", &self.render.endpoint)
            .field("render.api_token", &redacted(&self.render.api_token))
            .field("llm.endpoint", &self.llm.endpoint)
            .field("llm.api_key", &redacted(&self.llm.api_key))
            .field("llm.model", &self.llm.model)
            .finish()
    }
}

const KNOWN_KEYS: &[&str] = &[
    "database_path",
    "listen_addr",
    "scrape_interval_minutes",
    "worker_poll_seconds",
    "trigger_token",
    "tricky_domains",
    "render",
    "llm",
];
const KNOWN_RENDER_KEYS: &[&str] = &["endpoint", "api_token"];
const KNOWN_LLM_KEYS: &[&str] = &["endpoint", "api_key", "model"];

fn warn_unknown_keys(table: &toml::Table, known: &[&str], prefix: &str) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(key = %format!("{prefix}{key}"), "Unknown key in config file, ignoring");
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file, then apply environment
    /// overrides for secrets.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a TOML file only.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never loaded into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw, KNOWN_KEYS, "");
            if let Some(toml::Value::Table(render)) = raw.get("render") {
                warn_unknown_keys(render, KNOWN_RENDER_KEYS, "render.");
            }
            if let Some(toml::Value::Table(llm)) = raw.get("llm") {
                warn_unknown_keys(llm, KNOWN_LLM_KEYS, "llm.");
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), database = %config.database_path, "Loaded configuration");
        Ok(config)
    }

    /// Overrides secrets with non-empty values from `lookup` (the process
    /// environment in production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = non_empty(TRIGGER_TOKEN_ENV) {
            self.trigger_token = Some(token);
        }
        if let Some(token) = non_empty(RENDER_TOKEN_ENV) {
            self.render.api_token = Some(token);
        }
        if let Some(key) = non_empty(LLM_KEY_ENV) {
            self.llm.api_key = Some(key);
        }
    }

    pub fn trigger_secret(&self) -> Option<SecretString> {
        self.trigger_token.clone().map(SecretString::from)
    }

    pub fn render_secret(&self) -> Option<SecretString> {
        self.render.api_token.clone().map(SecretString::from)
    }

    pub fn llm_secret(&self) -> Option<SecretString> {
        self.llm.api_key.clone().map(SecretString::from)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn temp_config(name: &str, content: &str) -> (std::path::PathBuf, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("meridian_config_test_{name}"));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("meridian.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, "meridian.db");
        assert_eq!(config.scrape_interval_minutes, 60);
        assert!(config.trigger_token.is_none());
        assert!(config.tricky_domains.is_none());
        assert!(config.render.endpoint.is_none());
        assert_eq!(config.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/meridian_test_nonexistent_config.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8787");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = temp_config("whitespace", "   \n  \n  ");
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.database_path, "meridian.db");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = temp_config("partial", "scrape_interval_minutes = 15\n[llm]\nmodel = \"small\"\n");

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.scrape_interval_minutes, 15);
        assert_eq!(config.llm.model, "small");
        assert_eq!(config.llm.endpoint, LlmConfig::default().endpoint);
        assert_eq!(config.worker_poll_seconds, 30);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/meridian/ingest.db"
listen_addr = "0.0.0.0:9000"
scrape_interval_minutes = 30
worker_poll_seconds = 5
trigger_token = "file-token"
tricky_domains = ["paywalled.example"]

[render]
endpoint = "https://render.example/content"
api_token = "render-file-token"

[llm]
endpoint = "https://llm.example/v1/chat/completions"
api_key = "llm-file-key"
model = "classifier-1"
"#;
        let (dir, path) = temp_config("full", content);

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.database_path, "/var/lib/meridian/ingest.db");
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.worker_poll_seconds, 5);
        assert_eq!(config.trigger_token.as_deref(), Some("file-token"));
        assert_eq!(
            config.tricky_domains,
            Some(vec!["paywalled.example".to_string()])
        );
        assert_eq!(
            config.render.endpoint.as_deref(),
            Some("https://render.example/content")
        );
        assert_eq!(config.llm.model, "classifier-1");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = temp_config("invalid", "this is not [valid toml");

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let content = "listen_addr = \"127.0.0.1:1\"\ntheme = \"dark\"\n[llm]\ntemperature = 1\n";
        let (dir, path) = temp_config("unknown", content);

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:1");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (dir, path) = temp_config("wrongtype", "scrape_interval_minutes = \"hourly\"\n");
        assert!(Config::from_file(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = temp_config("too_large", &"a".repeat(1_048_577));

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_overrides_file_secrets() {
        let env: HashMap<&str, &str> = HashMap::from([
            (TRIGGER_TOKEN_ENV, "env-token"),
            (LLM_KEY_ENV, "env-llm-key"),
            (RENDER_TOKEN_ENV, "   "),
        ]);
        let mut config = Config {
            trigger_token: Some("file-token".into()),
            render: RenderConfig {
                endpoint: None,
                api_token: Some("render-file-token".into()),
            },
            ..Config::default()
        };

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.trigger_secret().unwrap().expose_secret(), "env-token");
        assert_eq!(config.llm_secret().unwrap().expose_secret(), "env-llm-key");
        // Blank values do not override
        assert_eq!(
            config.render_secret().unwrap().expose_secret(),
            "render-file-token"
        );
    }

    #[test]
    fn test_debug_masks_secrets() {
        let mut config = Config::default();
        config.trigger_token = Some("super-secret-token".into());
        config.llm.api_key = Some("super-secret-key".into());

        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-token"));
        assert!(!debug_output.contains("super-secret-key"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_shows_none_when_no_secrets() {
        let debug_output = format!("{:?}", Config::default());
        assert!(!debug_output.contains("[REDACTED]"));
    }
}
