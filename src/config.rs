use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub access: AccessConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Login attributed to MCP stdio callers, which carry no identity headers.
    pub default_login: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: String,
    pub timeout_secs: u64,
    /// Re-ingesting a project doc at an existing (project, path) replaces the stale row.
    pub supersede_same_path: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub api_base: String,
    pub api_key_env: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

/// How a requested tag is compared with stored tags.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TagMatch {
    /// Whole-tag equality (set intersection).
    Exact,
    /// Requested tag may appear anywhere inside a stored tag.
    Substring,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub max_k: usize,
    pub tag_match: TagMatch,
    pub context_body_chars: usize,
    pub default_reference_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AccessConfig {
    pub ingest_min_tier: u32,
    pub reference_min_tier: u32,
    pub admin_min_tier: u32,
    pub require_identity_for_ingest: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuditConfig {
    /// Record calls without an identity under the `anonymous` login.
    pub record_anonymous: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 3000,
            log_level: "info".into(),
            default_login: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let db_path = default_knowledge_dir()
            .join("knowledge.db")
            .to_string_lossy()
            .into_owned();
        Self {
            db_path,
            timeout_secs: 10,
            supersede_same_path: true,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            api_base: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            batch_size: 100,
            timeout_secs: 30,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            max_k: 100,
            tag_match: TagMatch::Exact,
            context_body_chars: 1000,
            default_reference_limit: 50,
        }
    }
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            ingest_min_tier: 0,
            reference_min_tier: 1,
            admin_min_tier: 2,
            require_identity_for_ingest: false,
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            record_anonymous: true,
        }
    }
}

/// Returns `~/.knowledge/`, or `./.knowledge/` when no home directory is known.
pub fn default_knowledge_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".knowledge")
}

/// Returns the default config file path: `~/.knowledge/config.toml`
pub fn default_config_path() -> PathBuf {
    default_knowledge_dir().join("config.toml")
}

impl KnowledgeConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            KnowledgeConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (KNOWLEDGE_DB, KNOWLEDGE_LOG_LEVEL, KNOWLEDGE_PORT, EMBEDDING_MODEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("KNOWLEDGE_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("KNOWLEDGE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("KNOWLEDGE_PORT") {
            match val.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(value = %val, "ignoring invalid KNOWLEDGE_PORT"),
            }
        }
        if let Ok(val) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = KnowledgeConfig::default();
        assert_eq!(config.server.transport, "stdio");
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.retrieval.default_k, 10);
        assert_eq!(config.retrieval.context_body_chars, 1000);
        assert_eq!(config.retrieval.tag_match, TagMatch::Exact);
        assert_eq!(config.embedding.batch_size, 100);
        assert!(config.audit.record_anonymous);
        assert!(config.storage.db_path.ends_with("knowledge.db"));
    }

    #[test]
    fn parse_toml_config() {
        let toml_str = r#"
[server]
log_level = "debug"
port = 8080

[storage]
db_path = "/tmp/test.db"

[retrieval]
default_k = 5
tag_match = "substring"

[access]
reference_min_tier = 3
"#;
        let config: KnowledgeConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.log_level, "debug");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.db_path, "/tmp/test.db");
        assert_eq!(config.retrieval.default_k, 5);
        assert_eq!(config.retrieval.tag_match, TagMatch::Substring);
        assert_eq!(config.access.reference_min_tier, 3);
        // defaults still apply for unset fields
        assert_eq!(config.retrieval.max_k, 100);
        assert_eq!(config.storage.timeout_secs, 10);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = KnowledgeConfig::default();
        std::env::set_var("KNOWLEDGE_DB", "/tmp/override.db");
        std::env::set_var("KNOWLEDGE_LOG_LEVEL", "trace");
        std::env::set_var("KNOWLEDGE_PORT", "4100");
        std::env::set_var("EMBEDDING_MODEL", "text-embedding-3-large");

        config.apply_env_overrides();

        assert_eq!(config.storage.db_path, "/tmp/override.db");
        assert_eq!(config.server.log_level, "trace");
        assert_eq!(config.server.port, 4100);
        assert_eq!(config.embedding.model, "text-embedding-3-large");

        std::env::remove_var("KNOWLEDGE_DB");
        std::env::remove_var("KNOWLEDGE_LOG_LEVEL");
        std::env::remove_var("KNOWLEDGE_PORT");
        std::env::remove_var("EMBEDDING_MODEL");
    }

    #[test]
    fn expand_tilde_leaves_absolute_paths() {
        assert_eq!(expand_tilde("/var/db.sqlite"), PathBuf::from("/var/db.sqlite"));
    }
}
