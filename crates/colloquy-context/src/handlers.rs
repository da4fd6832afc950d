//! Per-kind context handlers. Each conforms to the pair
//! `{accepts(kind), process(raw)}`; processing scrubs denylisted keys and
//! normalizes the interesting fields, and a separate `render` step turns the
//! normalized context into its text block.

use serde_json::{Map, Value};

use crate::continuity;
use crate::types::{ContextKind, ProcessedContext};

/// Keys never allowed through, matched case-insensitively as substrings.
const DENYLIST: &[&str] = &["password", "token", "secret", "credential", "auth"];

/// Dialogue history is truncated to this many trailing turns.
const MAX_HISTORY_TURNS: usize = 10;

pub trait ContextHandler: Send + Sync {
    fn accepts(&self, kind: ContextKind) -> bool;

    /// Scrub and normalize one raw side-channel map.
    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext;

    /// Render a processed context into its text block. Empty output means
    /// there is nothing worth injecting.
    fn render(&self, ctx: &ProcessedContext) -> String;
}

/// Drop denylisted keys, recursively through nested objects.
pub(crate) fn scrub(raw: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in raw {
        let lower = k.to_lowercase();
        if DENYLIST.iter().any(|d| lower.contains(d)) {
            continue;
        }
        let v = match v {
            Value::Object(inner) => Value::Object(scrub(inner)),
            other => other.clone(),
        };
        out.insert(k.clone(), v);
    }
    out
}

/// Strings verbatim; unknown shapes coerced to their JSON text.
pub(crate) fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_kv_lines(out: &mut String, map: &Map<String, Value>, indent: &str) {
    for (k, v) in map {
        if k == "kind" {
            continue;
        }
        match v {
            Value::Object(inner) => {
                out.push_str(&format!("{indent}- {k}:\n"));
                for (sk, sv) in inner {
                    out.push_str(&format!("{indent}  - {sk}: {}\n", coerce(sv)));
                }
            }
            other => out.push_str(&format!("{indent}- {k}: {}\n", coerce(other))),
        }
    }
}

/// Fallback handler for `general` and any unregistered kind.
pub struct GeneralHandler;

impl ContextHandler for GeneralHandler {
    fn accepts(&self, _kind: ContextKind) -> bool {
        true
    }

    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext {
        ProcessedContext {
            kind: ContextKind::General,
            fields: scrub(raw),
        }
    }

    fn render(&self, ctx: &ProcessedContext) -> String {
        if !ctx.fields.keys().any(|k| k != "kind") {
            return String::new();
        }
        let mut block = String::from("consider the following context:\n");
        push_kv_lines(&mut block, &ctx.fields, "");
        block
    }
}

/// Identity subset: name, identifiers, preferences, location, recent actions.
pub struct UserProfileHandler;

impl ContextHandler for UserProfileHandler {
    fn accepts(&self, kind: ContextKind) -> bool {
        kind == ContextKind::UserProfile
    }

    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext {
        ProcessedContext {
            kind: ContextKind::UserProfile,
            fields: scrub(raw),
        }
    }

    fn render(&self, ctx: &ProcessedContext) -> String {
        let mut block = String::from("user profile:\n");
        let mut any = false;

        if let Some(Value::Object(info)) = ctx.fields.get("user_info") {
            block.push_str("identity:\n");
            push_kv_lines(&mut block, info, "");
            any = true;
        }
        if let Some(Value::Object(prefs)) = ctx.fields.get("preferences") {
            block.push_str("preferences:\n");
            push_kv_lines(&mut block, prefs, "");
            any = true;
        }
        if let Some(Value::Array(actions)) = ctx.fields.get("recent_actions") {
            block.push_str("recent activity:\n");
            for a in actions {
                block.push_str(&format!("- {}\n", coerce(a)));
            }
            any = true;
        }
        if any {
            block
        } else {
            String::new()
        }
    }
}

/// Topic plus a list of knowledge bullets.
pub struct DomainHandler;

impl ContextHandler for DomainHandler {
    fn accepts(&self, kind: ContextKind) -> bool {
        kind == ContextKind::Domain
    }

    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext {
        ProcessedContext {
            kind: ContextKind::Domain,
            fields: scrub(raw),
        }
    }

    fn render(&self, ctx: &ProcessedContext) -> String {
        let topic = ctx
            .fields
            .get("domain")
            .or_else(|| ctx.fields.get("topic"))
            .map(coerce)
            .unwrap_or_else(|| "general".to_string());
        let mut block = format!("reference knowledge in domain {topic}:\n");
        if let Some(Value::Array(knowledge)) = ctx.fields.get("knowledge") {
            for item in knowledge {
                block.push_str(&format!("- {}\n", coerce(item)));
            }
        }
        block
    }
}

/// System state map plus available features.
pub struct SystemStateHandler;

impl ContextHandler for SystemStateHandler {
    fn accepts(&self, kind: ContextKind) -> bool {
        kind == ContextKind::System
    }

    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext {
        ProcessedContext {
            kind: ContextKind::System,
            fields: scrub(raw),
        }
    }

    fn render(&self, ctx: &ProcessedContext) -> String {
        let mut block = String::from("current system state:\n");
        if let Some(Value::Object(state)) = ctx.fields.get("state") {
            push_kv_lines(&mut block, state, "");
        }
        if let Some(Value::Array(features)) = ctx.fields.get("features") {
            block.push_str("available features:\n");
            for f in features {
                block.push_str(&format!("- {}\n", coerce(f)));
            }
        }
        block
    }
}

/// Recent turn transcript with the continuity hint.
pub struct DialogueHistoryHandler {
    /// Extra continuation markers from configuration.
    pub extra_markers: Vec<String>,
}

impl ContextHandler for DialogueHistoryHandler {
    fn accepts(&self, kind: ContextKind) -> bool {
        kind == ContextKind::DialogueHistory
    }

    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext {
        let mut fields = scrub(raw);
        // Truncate to the trailing window at normalization time so render
        // and any other consumer see the same turns.
        if let Some(Value::Array(history)) = fields.get_mut("history") {
            let start = history.len().saturating_sub(MAX_HISTORY_TURNS);
            history.drain(..start);
        }
        ProcessedContext {
            kind: ContextKind::DialogueHistory,
            fields,
        }
    }

    fn render(&self, ctx: &ProcessedContext) -> String {
        let Some(Value::Array(history)) = ctx.fields.get("history") else {
            return String::new();
        };
        if history.is_empty() {
            return String::new();
        }

        let mut block = String::from(
            "dialogue history (pay attention to the most recent topic):\n",
        );
        let mut last_topic: Option<String> = None;
        for turn in history {
            let role = turn
                .get("role")
                .map(coerce)
                .unwrap_or_else(|| "unknown".to_string());
            let content = turn.get("content").map(coerce).unwrap_or_default();
            if role == "user"
                && content.chars().count() > 1
                && !continuity::is_continuation(&content, &self.extra_markers)
            {
                last_topic = Some(content.clone());
            }
            block.push_str(&format!("{role}: {content}\n"));
        }

        if let Some(topic) = last_topic {
            block.push_str(&format!(
                "if the user asks to continue, keep providing information about \
                 the most recent topic: {topic}\n"
            ));
        }
        block
    }
}

/// City / region / country / coordinates.
pub struct LocationHandler;

impl ContextHandler for LocationHandler {
    fn accepts(&self, kind: ContextKind) -> bool {
        kind == ContextKind::Location
    }

    fn process(&self, raw: &Map<String, Value>) -> ProcessedContext {
        ProcessedContext {
            kind: ContextKind::Location,
            fields: scrub(raw),
        }
    }

    fn render(&self, ctx: &ProcessedContext) -> String {
        let mut block = String::from("user location:\n");
        let mut any = false;
        for key in ["city", "region", "country"] {
            if let Some(v) = ctx.fields.get(key) {
                block.push_str(&format!("{key}: {}\n", coerce(v)));
                any = true;
            }
        }
        if let Some(Value::Object(coords)) = ctx.fields.get("coordinates") {
            if let (Some(lat), Some(lng)) = (coords.get("latitude"), coords.get("longitude")) {
                block.push_str(&format!(
                    "coordinates: lat {}, lng {}\n",
                    coerce(lat),
                    coerce(lng)
                ));
                any = true;
            }
        }
        if any {
            block
        } else {
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(json: Value) -> Map<String, Value> {
        json.as_object().unwrap().clone()
    }

    fn process_and_render<H: ContextHandler>(handler: &H, raw: Value) -> String {
        let ctx = handler.process(&map(raw));
        handler.render(&ctx)
    }

    #[test]
    fn scrub_drops_denylisted_keys_recursively() {
        let raw = map(serde_json::json!({
            "name": "alice",
            "api_token": "sk-123",
            "nested": { "password": "hunter2", "city": "Oslo" },
            "authorization": "Bearer x"
        }));
        let clean = scrub(&raw);
        assert!(clean.contains_key("name"));
        assert!(!clean.contains_key("api_token"));
        assert!(!clean.contains_key("authorization"));
        let nested = clean["nested"].as_object().unwrap();
        assert!(!nested.contains_key("password"));
        assert!(nested.contains_key("city"));
    }

    #[test]
    fn general_renders_key_values() {
        let block = process_and_render(
            &GeneralHandler,
            serde_json::json!({
                "kind": "general",
                "project": "apollo",
                "deadline": "friday"
            }),
        );
        assert!(block.starts_with("consider the following context:"));
        assert!(block.contains("project: apollo"));
        assert!(block.contains("deadline: friday"));
    }

    #[test]
    fn history_is_truncated_to_ten_turns() {
        let turns: Vec<Value> = (0..25)
            .map(|i| serde_json::json!({"role": "user", "content": format!("msg {i}")}))
            .collect();
        let handler = DialogueHistoryHandler {
            extra_markers: vec![],
        };
        let ctx = handler.process(&map(serde_json::json!({"history": turns})));
        assert_eq!(ctx.fields["history"].as_array().unwrap().len(), 10);
        let block = handler.render(&ctx);
        assert!(!block.contains("msg 14"));
        assert!(block.contains("msg 15"));
        assert!(block.contains("msg 24"));
    }

    #[test]
    fn history_hint_names_the_last_topic() {
        let handler = DialogueHistoryHandler {
            extra_markers: vec![],
        };
        let block = process_and_render(
            &handler,
            serde_json::json!({
                "history": [
                    {"role": "user", "content": "tell me about Tesla"},
                    {"role": "assistant", "content": "Tesla is an EV company."},
                    {"role": "user", "content": "continue"}
                ]
            }),
        );
        assert!(block.contains("most recent topic: tell me about Tesla"));
    }

    #[test]
    fn location_block_lists_fields() {
        let block = process_and_render(
            &LocationHandler,
            serde_json::json!({
                "city": "Bergen",
                "country": "Norway",
                "coordinates": {"latitude": 60.39, "longitude": 5.32}
            }),
        );
        assert!(block.contains("city: Bergen"));
        assert!(block.contains("country: Norway"));
        assert!(block.contains("lat 60.39"));
    }

    #[test]
    fn empty_profile_renders_nothing() {
        let block = process_and_render(
            &UserProfileHandler,
            serde_json::json!({"kind": "user_profile"}),
        );
        assert!(block.is_empty());
    }

    #[test]
    fn non_string_values_are_coerced() {
        let block = process_and_render(
            &GeneralHandler,
            serde_json::json!({
                "count": 7,
                "flags": [1, 2]
            }),
        );
        assert!(block.contains("count: 7"));
        assert!(block.contains("flags: [1,2]"));
    }
}
