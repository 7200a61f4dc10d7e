use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{KaironError, Result};

/// Top-level configuration for the action server.
///
/// Loaded from `~/.kairon/config.toml` by default. Every section falls back
/// to its defaults when absent, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KaironConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub integrations: IntegrationConfig,
}

impl KaironConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails
    /// validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: KaironConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.sandbox.workers == 0 {
            return Err(KaironError::Config(
                "sandbox.workers must be >= 1".to_string(),
            ));
        }
        if self.sandbox.max_timeout_secs == 0 {
            return Err(KaironError::Config(
                "sandbox.max_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.timeouts.script_secs > self.sandbox.max_timeout_secs {
            return Err(KaironError::Config(format!(
                "timeouts.script_secs ({}) exceeds sandbox.max_timeout_secs ({})",
                self.timeouts.script_secs, self.sandbox.max_timeout_secs
            )));
        }
        for (name, secs) in [
            ("timeouts.http_secs", self.timeouts.http_secs),
            ("timeouts.smtp_secs", self.timeouts.smtp_secs),
            ("timeouts.llm_secs", self.timeouts.llm_secs),
            ("timeouts.script_secs", self.timeouts.script_secs),
            ("timeouts.rephrase_secs", self.timeouts.rephrase_secs),
        ] {
            if secs == 0 {
                return Err(KaironError::Config(format!("{name} must be >= 1")));
            }
        }
        if let Some(key) = &self.vault.master_key {
            if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(KaironError::Config(
                    "vault.master_key must be 64 hex characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.kairon/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum accepted request body in bytes.
    pub body_limit_bytes: usize,
    /// Serialize invocations per (bot, sender) pair.
    pub serialize_per_sender: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5055,
            body_limit_bytes: 4 * 1024 * 1024,
            serialize_per_sender: false,
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name, relative to `general.data_dir`.
    pub database_file: String,
    /// Action config cache TTL. 0 disables the cache.
    pub config_cache_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "kairon.db".to_string(),
            config_cache_ttl_secs: 60,
        }
    }
}

/// Key vault configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Hex-encoded 32-byte AES key. `KAIRON_VAULT_KEY` takes precedence.
    pub master_key: Option<String>,
}

/// Upstream timeouts in seconds. Actions may override some of them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub http_secs: u64,
    pub smtp_secs: u64,
    pub llm_secs: u64,
    pub script_secs: u64,
    pub rephrase_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            http_secs: 30,
            smtp_secs: 15,
            llm_secs: 30,
            script_secs: 10,
            rephrase_secs: 5,
        }
    }
}

/// Script sandbox limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Maximum concurrent script evaluations.
    pub workers: usize,
    /// Upper bound for any per-bot script timeout.
    pub max_timeout_secs: u64,
    /// Operation budget per evaluation. 0 means unlimited (wall clock only).
    pub max_operations: u64,
    pub max_string_size: usize,
    pub max_collection_size: usize,
    pub max_call_depth: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_timeout_secs: 10,
            max_operations: 0,
            max_string_size: 1024 * 1024,
            max_collection_size: 10_000,
            max_call_depth: 32,
        }
    }
}

/// OpenAI-compatible LLM endpoint used by FAQ, prompt and rephrasing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`. Unset disables LLM features.
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            temperature: 0.0,
        }
    }
}

/// Endpoints of the external services some actions call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    pub live_agent_url: Option<String>,
    pub live_agent_token: Option<String>,
    pub google_search_url: String,
    /// Generic web search service. Unset disables `web_search_action`.
    pub web_search_url: Option<String>,
    /// `{subdomain}` is replaced with the action's configured subdomain.
    pub zendesk_url_template: String,
    /// `{domain}` is replaced with the action's configured domain.
    pub pipedrive_url_template: String,
    pub hubspot_url: String,
    pub razorpay_url: String,
    pub vector_db_url: Option<String>,
    pub callback_base_url: String,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            live_agent_url: None,
            live_agent_token: None,
            google_search_url: "https://www.googleapis.com/customsearch/v1".to_string(),
            web_search_url: None,
            zendesk_url_template: "https://{subdomain}.zendesk.com".to_string(),
            pipedrive_url_template: "https://{domain}.pipedrive.com".to_string(),
            hubspot_url: "https://api.hsforms.com".to_string(),
            razorpay_url: "https://api.razorpay.com".to_string(),
            vector_db_url: None,
            callback_base_url: "http://localhost:5059".to_string(),
        }
    }
}
