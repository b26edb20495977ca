// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper for the iteration ceiling.
///
/// `#[serde(default)]` on a numeric field falls back to `0`, which would
/// stop every run after its first turn, so named functions are required.
fn default_iteration_limit() -> u32 {
    30
}

fn default_price_limit() -> f64 {
    5.0
}

fn default_delegation_depth() -> u32 {
    3
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Agents available in this project.  The first entry is the default
    /// unless `default_agent` names another one.
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
    /// Name of the agent addressed when the user input has no `@name` prefix.
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub limits: RunLimits,
    #[serde(default)]
    pub project: ProjectConfig,
}

impl Config {
    /// Resolve an agent definition by name, or the default agent when
    /// `name` is `None`.
    pub fn agent(&self, name: Option<&str>) -> Option<&AgentDefinition> {
        match name {
            Some(n) => self.agents.iter().find(|a| a.name == n),
            None => match &self.default_agent {
                Some(d) => self.agents.iter().find(|a| &a.name == d),
                None => self.agents.first(),
            },
        }
    }
}

/// One named agent: personality, model binding, and sampling settings.
///
/// ```yaml
/// agents:
///   - name: archie
///     description: software architect
///     system_prompt: You design systems before writing code.
///     model: mock
///     temperature: 0.7
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Model selector forwarded to the provider layer.
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature (0.0–2.0)
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Per-token pricing used for run cost accounting.
    #[serde(default)]
    pub pricing: ModelPricing,
}

/// USD price per million tokens, used to convert streamed usage counters
/// into the per-thread price total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub input_per_million: f64,
    #[serde(default)]
    pub output_per_million: f64,
    #[serde(default)]
    pub cache_read_per_million: f64,
}

impl ModelPricing {
    /// Cost of one turn's token counts under this pricing.
    pub fn cost(&self, input: u64, output: u64, cache_read: u64) -> f64 {
        (input as f64 * self.input_per_million
            + output as f64 * self.output_per_million
            + cache_read as f64 * self.cache_read_per_million)
            / 1_000_000.0
    }
}

/// Hard ceilings applied to every agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLimits {
    /// Maximum model↔tool iterations per run before the run is stopped
    /// with a warning.
    #[serde(default = "default_iteration_limit")]
    pub iteration_limit: u32,
    /// Maximum accumulated price (USD) per run before the run is stopped
    /// with a warning.
    #[serde(default = "default_price_limit")]
    pub price_limit: f64,
    /// Maximum fork depth for delegation; forks beyond this fail.
    #[serde(default = "default_delegation_depth")]
    pub max_delegation_depth: u32,
    /// Character budget for the view sent to the model.  `None` disables
    /// budgeting (the full log is sent).
    #[serde(default)]
    pub char_budget: Option<usize>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            iteration_limit: default_iteration_limit(),
            price_limit: default_price_limit(),
            max_delegation_depth: default_delegation_depth(),
            char_budget: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: Option<String>,
    /// Project root; tool calls touching paths outside it are refused.
    /// Supports `~` and `$VAR` expansion.
    #[serde(default)]
    pub root: Option<String>,
    /// Display name attached to user messages.
    #[serde(default)]
    pub username: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_nonzero() {
        let limits = RunLimits::default();
        assert!(limits.iteration_limit > 0);
        assert!(limits.price_limit > 0.0);
        assert!(limits.max_delegation_depth > 0);
    }

    #[test]
    fn empty_yaml_deserializes_with_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        assert!(cfg.agents.is_empty());
        assert_eq!(cfg.limits.iteration_limit, 30);
    }

    #[test]
    fn limits_partial_yaml_fills_remaining_defaults() {
        let cfg: Config = serde_yaml::from_str("limits:\n  iteration_limit: 5").unwrap();
        assert_eq!(cfg.limits.iteration_limit, 5);
        assert_eq!(cfg.limits.price_limit, 5.0);
    }

    #[test]
    fn agent_lookup_by_name() {
        let cfg: Config = serde_yaml::from_str(
            "agents:\n  - name: archie\n  - name: dev\ndefault_agent: dev",
        )
        .unwrap();
        assert_eq!(cfg.agent(Some("archie")).unwrap().name, "archie");
        assert_eq!(cfg.agent(None).unwrap().name, "dev");
    }

    #[test]
    fn agent_lookup_falls_back_to_first() {
        let cfg: Config = serde_yaml::from_str("agents:\n  - name: solo").unwrap();
        assert_eq!(cfg.agent(None).unwrap().name, "solo");
    }

    #[test]
    fn agent_lookup_unknown_is_none() {
        let cfg = Config::default();
        assert!(cfg.agent(Some("ghost")).is_none());
    }

    #[test]
    fn pricing_cost_scales_per_million() {
        let p = ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
            cache_read_per_million: 0.3,
        };
        let cost = p.cost(1_000_000, 1_000_000, 0);
        assert!((cost - 18.0).abs() < 1e-9);
    }

    #[test]
    fn pricing_default_is_free() {
        let p = ModelPricing::default();
        assert_eq!(p.cost(1_000_000, 1_000_000, 1_000_000), 0.0);
    }
}
