use serde::{Deserialize, Serialize};

/// Recognized side-channel context kinds. Anything else is handled as
/// `General`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    General,
    UserProfile,
    Domain,
    System,
    DialogueHistory,
    Location,
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ContextKind::General => "general",
            ContextKind::UserProfile => "user_profile",
            ContextKind::Domain => "domain",
            ContextKind::System => "system",
            ContextKind::DialogueHistory => "dialogue_history",
            ContextKind::Location => "location",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ContextKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "general" => Ok(ContextKind::General),
            "user_profile" => Ok(ContextKind::UserProfile),
            "domain" => Ok(ContextKind::Domain),
            "system" => Ok(ContextKind::System),
            "dialogue_history" => Ok(ContextKind::DialogueHistory),
            "location" => Ok(ContextKind::Location),
            other => Err(format!("unknown context kind: {other}")),
        }
    }
}

/// Result of handler processing: the scrubbed, normalized fields. Rendering
/// into a text block is a separate step (`ContextProcessor::render`).
#[derive(Debug, Clone)]
pub struct ProcessedContext {
    pub kind: ContextKind,
    pub fields: serde_json::Map<String, serde_json::Value>,
}
