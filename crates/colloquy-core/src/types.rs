use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form key/value annotations carried by every entity.
pub type TagBag = HashMap<String, String>;

/// What kind of participant an identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    Human,
    Ai,
    System,
}

impl std::fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ParticipantKind::Human => "human",
            ParticipantKind::Ai => "ai",
            ParticipantKind::System => "system",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ParticipantKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "human" => Ok(ParticipantKind::Human),
            "ai" => Ok(ParticipantKind::Ai),
            "system" => Ok(ParticipantKind::System),
            other => Err(format!("unknown participant kind: {other}")),
        }
    }
}

/// The seven supported dialogue shapes. One canonical spelling; the engine
/// does not accept legacy aliases on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogueKind {
    HumanAiPrivate,
    AiSelfReflection,
    HumanAiGroup,
    AiMultiHuman,
    AiAi,
    HumanHumanPrivate,
    HumanHumanGroup,
}

impl std::fmt::Display for DialogueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DialogueKind::HumanAiPrivate => "human_ai_private",
            DialogueKind::AiSelfReflection => "ai_self_reflection",
            DialogueKind::HumanAiGroup => "human_ai_group",
            DialogueKind::AiMultiHuman => "ai_multi_human",
            DialogueKind::AiAi => "ai_ai",
            DialogueKind::HumanHumanPrivate => "human_human_private",
            DialogueKind::HumanHumanGroup => "human_human_group",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DialogueKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "human_ai_private" => Ok(DialogueKind::HumanAiPrivate),
            "ai_self_reflection" => Ok(DialogueKind::AiSelfReflection),
            "human_ai_group" => Ok(DialogueKind::HumanAiGroup),
            "ai_multi_human" => Ok(DialogueKind::AiMultiHuman),
            "ai_ai" => Ok(DialogueKind::AiAi),
            "human_human_private" => Ok(DialogueKind::HumanHumanPrivate),
            "human_human_group" => Ok(DialogueKind::HumanHumanGroup),
            other => Err(format!("unknown dialogue kind: {other}")),
        }
    }
}

/// One participant in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, kind: ParticipantKind) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind,
        }
    }
}

/// A persisted dialogue session. The dialogue kind is immutable after
/// creation; `last_activity` only ever moves forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// UUIDv7 primary key — time-sortable.
    pub id: String,
    pub owner_id: String,
    pub kind: DialogueKind,
    pub participants: Vec<Participant>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default)]
    pub tags: TagBag,
}

impl Session {
    pub fn new(owner_id: impl Into<String>, kind: DialogueKind, participants: Vec<Participant>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            owner_id: owner_id.into(),
            kind,
            participants,
            created_at: now,
            last_activity: now,
            tags: TagBag::new(),
        }
    }
}

/// Lifecycle state of a turn. Transitions are one-way:
/// pending → in_progress → completed | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnStatus::Completed | TurnStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects the one-way machine.
    pub fn can_transition_to(self, next: TurnStatus) -> bool {
        matches!(
            (self, next),
            (TurnStatus::Pending, TurnStatus::InProgress)
                | (TurnStatus::Pending, TurnStatus::Failed)
                | (TurnStatus::InProgress, TurnStatus::Completed)
                | (TurnStatus::InProgress, TurnStatus::Failed)
        )
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnStatus::Pending => "pending",
            TurnStatus::InProgress => "in_progress",
            TurnStatus::Completed => "completed",
            TurnStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TurnStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TurnStatus::Pending),
            "in_progress" => Ok(TurnStatus::InProgress),
            "completed" => Ok(TurnStatus::Completed),
            "failed" => Ok(TurnStatus::Failed),
            other => Err(format!("unknown turn status: {other}")),
        }
    }
}

/// A request/response exchange within a session, bundling its messages and
/// tool invocations. Ordinals are dense and strictly increasing from 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub ordinal: u64,
    pub initiator_id: String,
    pub initiator_kind: ParticipantKind,
    pub responder_id: String,
    pub responder_kind: ParticipantKind,
    pub status: TurnStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: TagBag,
}

/// Content shape of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    ImageRef,
    AudioRef,
    FileRef,
    Mixed,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::Text => "text",
            MessageKind::ImageRef => "image_ref",
            MessageKind::AudioRef => "audio_ref",
            MessageKind::FileRef => "file_ref",
            MessageKind::Mixed => "mixed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image_ref" => Ok(MessageKind::ImageRef),
            "audio_ref" => Ok(MessageKind::AudioRef),
            "file_ref" => Ok(MessageKind::FileRef),
            "mixed" => Ok(MessageKind::Mixed),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// Which side of a turn a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Request,
    Response,
}

impl std::fmt::Display for MessageDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageDirection::Request => write!(f, "request"),
            MessageDirection::Response => write!(f, "response"),
        }
    }
}

impl std::str::FromStr for MessageDirection {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "request" => Ok(MessageDirection::Request),
            "response" => Ok(MessageDirection::Response),
            other => Err(format!("unknown message direction: {other}")),
        }
    }
}

/// A single message inside a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub turn_id: String,
    pub direction: MessageDirection,
    pub content: String,
    pub kind: MessageKind,
    pub sender_id: String,
    pub sender_kind: ParticipantKind,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: TagBag,
}

/// Lifecycle state of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InvocationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InvocationStatus::Completed | InvocationStatus::Failed | InvocationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvocationStatus::Pending => "pending",
            InvocationStatus::Running => "running",
            InvocationStatus::Completed => "completed",
            InvocationStatus::Failed => "failed",
            InvocationStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for InvocationStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvocationStatus::Pending),
            "running" => Ok(InvocationStatus::Running),
            "completed" => Ok(InvocationStatus::Completed),
            "failed" => Ok(InvocationStatus::Failed),
            "cancelled" => Ok(InvocationStatus::Cancelled),
            other => Err(format!("unknown invocation status: {other}")),
        }
    }
}

/// Record of one tool call made during a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub id: String,
    pub turn_id: String,
    pub tool_name: String,
    /// The version actually dispatched after resolution, if the tool is
    /// versioned.
    pub tool_version: Option<String>,
    pub args: serde_json::Value,
    pub status: InvocationStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: TagBag,
}
