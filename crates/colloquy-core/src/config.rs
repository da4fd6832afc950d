use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default cap on per-turn tool invocations.
pub const DEFAULT_MAX_TOOL_CALLS: u32 = 3;
/// Default per-tool-call deadline.
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;
/// Default number of messages pulled into the prompt as history.
pub const DEFAULT_HISTORY_WINDOW: usize = 10;
/// Default bounded-retry budget for transient external failures.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 2;

/// Priority of context injection relative to prompt length pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextPriority {
    Low,
    Medium,
    High,
}

/// Where the rendered context block lands in the assembled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InjectionPosition {
    /// Concatenated ahead of a plain prompt string.
    Prefix,
    /// Merged into (or created as) the first system message.
    System,
    /// Prepended as a fresh system message at the head of a history list.
    Inline,
}

/// How the invoker decides whether a tool should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolDecisionMode {
    Rule,
    Model,
}

/// Context processing/injection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "bool_true")]
    pub enable_context_injection: bool,
    #[serde(default = "default_context_priority")]
    pub context_priority: ContextPriority,
    /// Hard cap on rendered prefix length, counted by a character proxy.
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,
    #[serde(default = "default_injection_position")]
    pub context_injection_position: InjectionPosition,
    #[serde(default)]
    pub log_context_usage: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enable_context_injection: true,
            context_priority: ContextPriority::Medium,
            max_context_tokens: default_max_context_tokens(),
            context_injection_position: InjectionPosition::System,
            log_context_usage: false,
        }
    }
}

/// Tool subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_decision_mode")]
    pub tool_decision_mode: ToolDecisionMode,
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// Filesystem roots scanned for tool manifests.
    #[serde(default)]
    pub discovery_paths: Vec<String>,
    /// 0 disables the background rescan loop.
    #[serde(default = "default_autoscan_interval_ms")]
    pub discovery_autoscan_interval_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: DEFAULT_MAX_TOOL_CALLS,
            tool_decision_mode: ToolDecisionMode::Rule,
            tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            discovery_paths: Vec::new(),
            discovery_autoscan_interval_ms: default_autoscan_interval_ms(),
        }
    }
}

/// Memory subsystem settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Capacity of the bounded long-term store.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    /// Maximum concurrently tracked conversations in the short-term buffer.
    #[serde(default = "default_conversation_limit")]
    pub conversation_limit: usize,
    /// Round bound enforced by trim on each conversation.
    #[serde(default = "default_max_turns_per_conversation")]
    pub max_turns_per_conversation: usize,
    #[serde(default = "bool_true")]
    pub embedding_enabled: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            conversation_limit: default_conversation_limit(),
            max_turns_per_conversation: default_max_turns_per_conversation(),
            embedding_enabled: true,
        }
    }
}

/// Weights combining the three intensity factors. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RelationshipWeights {
    pub interaction: f64,
    pub emotional: f64,
    pub collaboration: f64,
}

impl Default for RelationshipWeights {
    fn default() -> Self {
        Self {
            interaction: 0.4,
            emotional: 0.35,
            collaboration: 0.25,
        }
    }
}

impl RelationshipWeights {
    pub fn validate(&self) -> Result<()> {
        let sum = self.interaction + self.emotional + self.collaboration;
        if (sum - 1.0).abs() > 1e-6 {
            return Err(EngineError::InvalidArgument(format!(
                "relationship weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Relationship engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipConfig {
    #[serde(default)]
    pub relationship_weights: RelationshipWeights,
    #[serde(default = "default_silent_days")]
    pub silent_threshold_days: i64,
    #[serde(default = "default_cooling_days")]
    pub cooling_threshold_days: i64,
    #[serde(default = "default_active_min_rounds")]
    pub active_min_rounds_7d: u64,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            relationship_weights: RelationshipWeights::default(),
            silent_threshold_days: default_silent_days(),
            cooling_threshold_days: default_cooling_days(),
            active_min_rounds_7d: default_active_min_rounds(),
        }
    }
}

/// Dialogue manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueConfig {
    /// Identifier the assistant participates under.
    #[serde(default = "default_assistant_id")]
    pub assistant_id: String,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Tokens scanned for in replies to infer emotional resonance.
    #[serde(default = "default_affective_tokens")]
    pub affective_tokens: Vec<String>,
    /// Extra continuation markers merged with the built-in set, for
    /// deployments serving other languages.
    #[serde(default)]
    pub continuation_markers: Vec<String>,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            assistant_id: default_assistant_id(),
            history_window: DEFAULT_HISTORY_WINDOW,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            affective_tokens: default_affective_tokens(),
            continuation_markers: Vec::new(),
        }
    }
}

/// Top-level config (colloquy.toml + COLLOQUY_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColloquyConfig {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub relationship: RelationshipConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
}

impl ColloquyConfig {
    /// Load config from a TOML file with COLLOQUY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ColloquyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COLLOQUY_").split("_"))
            .extract()
            .map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        config.relationship.relationship_weights.validate()?;
        Ok(config)
    }
}

fn bool_true() -> bool {
    true
}
fn default_context_priority() -> ContextPriority {
    ContextPriority::Medium
}
fn default_max_context_tokens() -> usize {
    1000
}
fn default_injection_position() -> InjectionPosition {
    InjectionPosition::System
}
fn default_max_tool_calls() -> u32 {
    DEFAULT_MAX_TOOL_CALLS
}
fn default_decision_mode() -> ToolDecisionMode {
    ToolDecisionMode::Rule
}
fn default_tool_timeout_ms() -> u64 {
    DEFAULT_TOOL_TIMEOUT_MS
}
fn default_autoscan_interval_ms() -> u64 {
    300_000
}
fn default_memory_capacity() -> usize {
    1000
}
fn default_conversation_limit() -> usize {
    64
}
fn default_max_turns_per_conversation() -> usize {
    50
}
fn default_silent_days() -> i64 {
    14
}
fn default_cooling_days() -> i64 {
    7
}
fn default_active_min_rounds() -> u64 {
    21
}
fn default_assistant_id() -> String {
    "assistant".to_string()
}
fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}
fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}
fn default_affective_tokens() -> Vec<String> {
    [
        "glad", "happy", "sorry", "love", "proud", "excited", "wonderful", "thank",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.colloquy/colloquy.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        RelationshipWeights::default().validate().unwrap();
    }

    #[test]
    fn skewed_weights_are_rejected() {
        let w = RelationshipWeights {
            interaction: 0.5,
            emotional: 0.5,
            collaboration: 0.5,
        };
        assert!(w.validate().is_err());
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = ColloquyConfig::default();
        assert_eq!(c.tools.max_tool_calls, 3);
        assert_eq!(c.relationship.silent_threshold_days, 14);
        assert_eq!(c.relationship.cooling_threshold_days, 7);
        assert_eq!(c.relationship.active_min_rounds_7d, 21);
        assert_eq!(c.dialogue.retry_attempts, 2);
    }
}
