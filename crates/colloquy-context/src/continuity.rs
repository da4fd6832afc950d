//! Continuation handling: when the user says "continue", the model must keep
//! expanding the prior topic, never switch to a new one.

use colloquy_core::provider::{ChatMessage, ChatRole};

/// The closed set of built-in continuation markers. Deployments serving other
/// languages extend it via configuration.
pub const CONTINUATION_MARKERS: &[&str] =
    &["continue", "go on", "please continue", "keep going", "say more"];

/// Length of the assistant-tail fallback topic, in characters.
const ASSISTANT_TAIL_CHARS: usize = 20;

/// Whether an utterance is a continuation marker. Matching is
/// case-insensitive and tolerant of trailing punctuation.
pub fn is_continuation(text: &str, extra_markers: &[String]) -> bool {
    let normalized = text
        .trim()
        .trim_end_matches(['.', '!', '?', ',', '…'])
        .to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    CONTINUATION_MARKERS.contains(&normalized.as_str())
        || extra_markers.iter().any(|m| m.to_lowercase() == normalized)
}

/// The topic a continuation refers to: the most recent user message longer
/// than one character that is not itself a marker; failing that, the head of
/// the most recent assistant message.
pub fn prior_topic(history: &[ChatMessage], extra_markers: &[String]) -> Option<String> {
    for msg in history.iter().rev() {
        if msg.role == ChatRole::User
            && msg.content.chars().count() > 1
            && !is_continuation(&msg.content, extra_markers)
        {
            return Some(msg.content.clone());
        }
    }
    history
        .iter()
        .rev()
        .find(|m| m.role == ChatRole::Assistant)
        .map(|m| m.content.chars().take(ASSISTANT_TAIL_CHARS).collect())
}

/// If the latest user message is a continuation marker, build the explicit
/// keep-expanding instruction. Returns `None` otherwise.
pub fn continuation_directive(
    history: &[ChatMessage],
    latest_user_message: &str,
    extra_markers: &[String],
) -> Option<String> {
    if !is_continuation(latest_user_message, extra_markers) {
        return None;
    }
    match prior_topic(history, extra_markers) {
        Some(topic) => Some(format!(
            "The user asked you to continue. Keep expanding on the previous topic: \
             \"{topic}\". Provide further information about it; do not start a new \
             topic and do not repeat what you already said."
        )),
        None => Some(
            "The user asked you to continue. Keep expanding on whatever you were \
             saying; do not start a new topic."
                .to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn markers_match_loosely() {
        assert!(is_continuation("continue", &[]));
        assert!(is_continuation("  Continue.  ", &[]));
        assert!(is_continuation("GO ON!", &[]));
        assert!(!is_continuation("continue the project plan", &[]));
        assert!(!is_continuation("hello", &[]));
    }

    #[test]
    fn configured_markers_extend_the_set() {
        let extra = vec!["继续".to_string()];
        assert!(is_continuation("继续", &extra));
        assert!(!is_continuation("继续", &[]));
    }

    #[test]
    fn topic_is_last_substantive_user_message() {
        let history = vec![
            msg(ChatRole::User, "tell me about Tesla"),
            msg(ChatRole::Assistant, "Tesla is an American EV company."),
            msg(ChatRole::User, "continue"),
            msg(ChatRole::Assistant, "It was founded in 2003."),
        ];
        assert_eq!(
            prior_topic(&history, &[]).unwrap(),
            "tell me about Tesla"
        );
    }

    #[test]
    fn topic_falls_back_to_assistant_tail() {
        let history = vec![msg(
            ChatRole::Assistant,
            "The French Revolution began in 1789 and reshaped Europe.",
        )];
        let topic = prior_topic(&history, &[]).unwrap();
        assert_eq!(topic.chars().count(), 20);
        assert!(topic.starts_with("The French Revolutio"));
    }

    #[test]
    fn directive_names_the_topic() {
        let history = vec![
            msg(ChatRole::User, "tell me about Tesla"),
            msg(ChatRole::Assistant, "Tesla is an American EV company."),
        ];
        let directive = continuation_directive(&history, "continue", &[]).unwrap();
        assert!(directive.contains("Tesla"));
        assert!(!directive.to_lowercase().contains("new topic and switch"));
        assert!(continuation_directive(&history, "what about BMW?", &[]).is_none());
    }
}
