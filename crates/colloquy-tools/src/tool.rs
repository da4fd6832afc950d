use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::version::ToolVersion;

/// Input modalities a tool can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
    Video,
    File,
    Mixed,
}

impl Modality {
    /// Whether args for this modality may carry a media reference that needs
    /// staging into a temporary artifact.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            Modality::Image | Modality::Audio | Modality::Video | Modality::File | Modality::Mixed
        )
    }
}

impl std::str::FromStr for Modality {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(Modality::Text),
            "image" => Ok(Modality::Image),
            "audio" => Ok(Modality::Audio),
            "video" => Ok(Modality::Video),
            "file" => Ok(Modality::File),
            "mixed" => Ok(Modality::Mixed),
            other => Err(format!("unknown modality: {other}")),
        }
    }
}

/// Versioning metadata carried by a versioned tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: ToolVersion,
    /// Oldest request version this tool still accepts.
    pub min_compatible: ToolVersion,
    pub deprecated: bool,
    pub deprecation_message: Option<String>,
}

impl VersionInfo {
    pub fn new(version: ToolVersion, min_compatible: ToolVersion) -> Self {
        Self {
            version,
            min_compatible,
            deprecated: false,
            deprecation_message: None,
        }
    }
}

/// What a tool returns: plain text or a structured payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ToolOutput {
    Text(String),
    Structured(serde_json::Value),
}

impl ToolOutput {
    /// Text form for prompt assembly; structured payloads are serialized.
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(s) => s,
            ToolOutput::Structured(v) => v.to_string(),
        }
    }

    pub fn as_value(&self) -> serde_json::Value {
        match self {
            ToolOutput::Text(s) => serde_json::Value::String(s.clone()),
            ToolOutput::Structured(v) => v.clone(),
        }
    }
}

/// A callable tool. Concrete tools are values implementing this trait;
/// versioning is carried as metadata rather than a deep hierarchy.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name, stable across versions (e.g. "calculator").
    fn name(&self) -> &str;

    /// One-line description shown to the model.
    fn description(&self) -> &str;

    /// Usage example shown to the model.
    fn usage(&self) -> &str {
        ""
    }

    /// Modalities this tool accepts.
    fn modalities(&self) -> &[Modality] {
        &[Modality::Text]
    }

    /// Versioning metadata, if this tool is versioned.
    fn version_info(&self) -> Option<&VersionInfo> {
        None
    }

    /// Loose tags for grouping and collaboration hints.
    fn tags(&self) -> &[&str] {
        &[]
    }

    /// Keywords that make the rule-based decider consider this tool. The
    /// tool name always counts as a trigger.
    fn trigger_keywords(&self) -> Vec<String> {
        Vec::new()
    }

    /// Upgrade arguments built for an older version into this version's
    /// shape. Return `None` to pass them through unchanged.
    fn migrate_args(
        &self,
        _from_version: &ToolVersion,
        _args: &serde_json::Value,
    ) -> Option<serde_json::Value> {
        None
    }

    /// Execute with JSON arguments.
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput>;
}

/// Whether an utterance trips a tool's rule-based trigger predicate.
pub fn matches_trigger(tool: &dyn Tool, utterance: &str) -> bool {
    let lower = utterance.to_lowercase();
    if lower.contains(&tool.name().to_lowercase()) {
        return true;
    }
    tool.trigger_keywords()
        .iter()
        .any(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
}
