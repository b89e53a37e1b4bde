//! TOML agent registry.
//!
//! Agents are created and edited elsewhere; this registry is the read-only
//! view the runtime loads at startup.
//!
//! Example:
//! ```toml
//! [[agents]]
//! id = "finance-analyst"
//! owner = "user-1"
//! collections = ["finance_transactions", "sales_deals"]
//! allowed_tools = ["query_collection", "analyze_data"]
//!
//! [agents.model]
//! provider = "anthropic"
//! model = "claude-3-5-sonnet-latest"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use quarry_contracts::{
    agent::AgentConfig,
    error::{QuarryError, QuarryResult},
};

/// The top-level structure deserialized from a TOML agents file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRegistry {
    #[serde(default)]
    agents: Vec<AgentConfig>,
}

impl AgentRegistry {
    /// Parse `s` as TOML and build a registry.
    ///
    /// Returns `QuarryError::ConfigError` if the TOML is malformed or two
    /// agents share an id.
    pub fn from_toml_str(s: &str) -> QuarryResult<Self> {
        let registry: AgentRegistry = toml::from_str(s).map_err(|e| QuarryError::ConfigError {
            reason: format!("failed to parse agents TOML: {}", e),
        })?;

        for (i, agent) in registry.agents.iter().enumerate() {
            if registry.agents[..i].iter().any(|a| a.id == agent.id) {
                return Err(QuarryError::ConfigError {
                    reason: format!("duplicate agent id '{}'", agent.id.0),
                });
            }
        }
        Ok(registry)
    }

    /// Read the file at `path` and parse it as an agents file.
    pub fn from_file(path: &Path) -> QuarryResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| QuarryError::ConfigError {
            reason: format!("failed to read agents file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn get(&self, id: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.id.0 == id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentConfig> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
