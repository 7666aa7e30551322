use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Top-level agentflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub expression: ExpressionConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// How nodes within one ready wave are scheduled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveMode {
    /// One node after another, in frontier order. Context writes are deterministic.
    #[default]
    Sequential,
    /// All nodes of a wave are polled together and joined before advancing.
    /// Context writes from nodes of the same wave may interleave in any order.
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub wave_mode: WaveMode,
    /// Fail a run up front when the compiled graph contains a cycle.
    /// Off by default: nodes on a cycle are silently never scheduled.
    #[serde(default)]
    pub reject_cycles: bool,
    /// Capacity of the engine event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wave_mode: WaveMode::default(),
            reject_cycles: false,
            event_capacity: default_event_capacity(),
        }
    }
}

/// Limits for the built-in expression evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpressionConfig {
    /// Maximum accepted source length, in characters.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Maximum nesting depth of the parsed expression.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            max_length: default_max_length(),
            max_depth: default_max_depth(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_event_capacity() -> usize { 256 }
fn default_max_length() -> usize { 4096 }
fn default_max_depth() -> usize { 64 }
fn default_log_filter() -> String { "agentflow=info,warn".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);

        toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}
