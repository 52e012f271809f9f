use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{RiskLevel, ToolCategory};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub risk: RiskConfig,
    pub audit: AuditConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Hard cap on reasoning/tool-call steps per turn
    pub max_steps: usize,
    pub request_timeout_secs: u64,
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.mistral.ai/v1".to_string(),
            model: "mistral-small-latest".to_string(),
            api_key_env: "MISTRAL_API_KEY".to_string(),
            max_steps: 10,
            request_timeout_secs: 60,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Purchases and payments above this amount are HIGH and need step-up
    pub purchase_step_up_threshold: f64,
    /// Categories that already need step-up at MEDIUM
    pub step_up_categories: Vec<ToolCategory>,
    /// Level assigned to tools missing from the policy table; never LOW
    pub unknown_tool_level: RiskLevel,
    pub unknown_tool_step_up: bool,
    /// Extra tool name -> category entries merged over the built-in table
    pub tools: BTreeMap<String, ToolCategory>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            purchase_step_up_threshold: 500.0,
            step_up_categories: Vec::new(),
            unknown_tool_level: RiskLevel::Medium,
            unknown_tool_step_up: false,
            tools: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Attempts per audit write, transient store failures only
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// An audit-start failure blocks execution at or above this level
    pub fail_closed_at: RiskLevel,
    /// Strings longer than this are stored as metadata only
    pub max_field_len: usize,
    pub max_array_items: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 50,
            fail_closed_at: RiskLevel::Medium,
            max_field_len: 2048,
            max_array_items: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// In-memory store when absent
    pub postgres_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            postgres_url: None,
            max_connections: 10,
        }
    }
}

impl SystemConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: SystemConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.model.max_steps == 0 {
            return Err(ConfigError::validation("model.max_steps must be at least 1"));
        }
        if self.model.model.trim().is_empty() {
            return Err(ConfigError::validation("model.model must not be empty"));
        }
        let threshold = self.risk.purchase_step_up_threshold;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(ConfigError::validation(
                "risk.purchase_step_up_threshold must be a positive amount",
            ));
        }
        if self.risk.unknown_tool_level == RiskLevel::Low {
            return Err(ConfigError::validation(
                "risk.unknown_tool_level must not be LOW",
            ));
        }
        if self.audit.max_attempts == 0 {
            return Err(ConfigError::validation("audit.max_attempts must be at least 1"));
        }
        if self.audit.max_field_len < 64 {
            return Err(ConfigError::validation("audit.max_field_len must be at least 64"));
        }
        if self.audit.max_array_items == 0 {
            return Err(ConfigError::validation("audit.max_array_items must be at least 1"));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::validation("storage.max_connections must be at least 1"));
        }
        Ok(())
    }
}
