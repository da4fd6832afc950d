use colloquy_core::types::{DialogueKind, ParticipantKind};

/// What a dialogue kind permits. All kinds share the same turn skeleton;
/// they differ in who is prompted and which subsystems are consulted.
#[derive(Debug, Clone, Copy)]
pub struct KindPolicy {
    /// Consult the relationship engine for tone shaping and updates.
    pub consult_relationship: bool,
    /// Allow the tool invocation loop.
    pub allow_tools: bool,
}

/// Per-kind capability table. Relationship tracking follows pairs involving
/// the assistant; tools are limited to interactive human↔AI kinds.
pub fn policy_for(kind: DialogueKind) -> KindPolicy {
    match kind {
        DialogueKind::HumanAiPrivate | DialogueKind::HumanAiGroup => KindPolicy {
            consult_relationship: true,
            allow_tools: true,
        },
        DialogueKind::AiMultiHuman => KindPolicy {
            consult_relationship: true,
            allow_tools: false,
        },
        DialogueKind::AiSelfReflection | DialogueKind::AiAi => KindPolicy {
            consult_relationship: false,
            allow_tools: false,
        },
        DialogueKind::HumanHumanPrivate | DialogueKind::HumanHumanGroup => KindPolicy {
            consult_relationship: false,
            allow_tools: false,
        },
    }
}

/// Classify a dialogue from its participants.
pub fn detect_kind(
    initiator: ParticipantKind,
    responder: ParticipantKind,
    participant_count: usize,
    is_group: bool,
) -> DialogueKind {
    match (initiator, responder) {
        (ParticipantKind::Human, ParticipantKind::Human) => {
            if is_group {
                DialogueKind::HumanHumanGroup
            } else {
                DialogueKind::HumanHumanPrivate
            }
        }
        (ParticipantKind::Human, ParticipantKind::Ai) => {
            if is_group {
                DialogueKind::HumanAiGroup
            } else {
                DialogueKind::HumanAiPrivate
            }
        }
        (ParticipantKind::Ai, ParticipantKind::Ai) => DialogueKind::AiAi,
        (ParticipantKind::Ai, ParticipantKind::Human) if participant_count > 2 => {
            DialogueKind::AiMultiHuman
        }
        _ => DialogueKind::HumanAiPrivate,
    }
}

/// Base system prompt for a kind.
pub fn base_prompt(kind: DialogueKind, assistant_id: &str) -> String {
    match kind {
        DialogueKind::HumanAiPrivate => format!(
            "You are {assistant_id}, a thoughtful conversational assistant in a \
             private dialogue. Answer helpfully and stay on the user's topic."
        ),
        DialogueKind::HumanAiGroup | DialogueKind::AiMultiHuman => format!(
            "You are {assistant_id}, assisting a group conversation. Address the \
             most recent speaker and keep replies concise."
        ),
        DialogueKind::AiSelfReflection => format!(
            "You are {assistant_id}, privately reflecting on your own recent \
             responses. Summarize what went well and what to improve."
        ),
        DialogueKind::AiAi => format!(
            "You are {assistant_id}, conversing with another AI agent. Be direct \
             and information-dense."
        ),
        DialogueKind::HumanHumanPrivate | DialogueKind::HumanHumanGroup => format!(
            "You are {assistant_id}, a neutral facilitator relaying a \
             human-to-human conversation. Do not inject opinions."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_covers_the_seven_kinds() {
        use ParticipantKind::*;
        assert_eq!(
            detect_kind(Human, Ai, 2, false),
            DialogueKind::HumanAiPrivate
        );
        assert_eq!(detect_kind(Human, Ai, 5, true), DialogueKind::HumanAiGroup);
        assert_eq!(
            detect_kind(Human, Human, 2, false),
            DialogueKind::HumanHumanPrivate
        );
        assert_eq!(
            detect_kind(Human, Human, 4, true),
            DialogueKind::HumanHumanGroup
        );
        assert_eq!(detect_kind(Ai, Ai, 2, false), DialogueKind::AiAi);
        assert_eq!(detect_kind(Ai, Human, 3, true), DialogueKind::AiMultiHuman);
        assert_eq!(detect_kind(Ai, Human, 2, false), DialogueKind::HumanAiPrivate);
    }

    #[test]
    fn tools_are_limited_to_interactive_human_ai_kinds() {
        assert!(policy_for(DialogueKind::HumanAiPrivate).allow_tools);
        assert!(policy_for(DialogueKind::HumanAiGroup).allow_tools);
        assert!(!policy_for(DialogueKind::AiSelfReflection).allow_tools);
        assert!(!policy_for(DialogueKind::HumanHumanPrivate).allow_tools);
        assert!(!policy_for(DialogueKind::AiMultiHuman).allow_tools);
    }

    #[test]
    fn relationship_follows_assistant_pairs() {
        assert!(policy_for(DialogueKind::HumanAiPrivate).consult_relationship);
        assert!(!policy_for(DialogueKind::AiAi).consult_relationship);
        assert!(!policy_for(DialogueKind::HumanHumanGroup).consult_relationship);
    }
}
