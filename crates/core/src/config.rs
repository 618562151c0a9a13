//! Engine-wide configuration
//!
//! Unlike [`ErosionSettings`](crate::settings::ErosionSettings), which travel
//! with each target, the engine configuration is fixed when the
//! [`EngineContext`](crate::engine::EngineContext) is created.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default number of released maps kept for undo
pub const DEFAULT_HISTORY_LENGTH: usize = 5;

/// Which compute backend the engine should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendPreference {
    /// GPU when available, CPU otherwise
    #[default]
    Auto,
    /// Always the CPU backend
    Cpu,
    /// GPU, warning and falling back to CPU when unavailable
    Gpu,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Released maps kept in the graveyard
    pub history_length: usize,
    /// Upper bound on bytes held by live fields, `None` for unbounded
    pub memory_budget_bytes: Option<u64>,
    pub backend: BackendPreference,
    /// Base seed of the stochastic solvers
    pub seed: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_length: DEFAULT_HISTORY_LENGTH,
            memory_budget_bytes: None,
            backend: BackendPreference::Auto,
            seed: 0,
        }
    }
}

impl EngineConfig {
    /// CPU-only configuration, convenient for tests and headless tools
    pub fn cpu() -> Self {
        Self {
            backend: BackendPreference::Cpu,
            ..Self::default()
        }
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::from_json("{}").unwrap();
        assert_eq!(config.history_length, 5);
        assert_eq!(config.memory_budget_bytes, None);
        assert_eq!(config.backend, BackendPreference::Auto);
    }

    #[test]
    fn test_backend_names() {
        let config = EngineConfig::from_json(r#"{ "backend": "gpu", "seed": 7 }"#).unwrap();
        assert_eq!(config.backend, BackendPreference::Gpu);
        assert_eq!(config.seed, 7);
        let json = EngineConfig::cpu().to_json().unwrap();
        assert!(json.contains("\"cpu\""));
    }
}
