use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use crate::handlers::{
    ContextHandler, DialogueHistoryHandler, DomainHandler, GeneralHandler, LocationHandler,
    SystemStateHandler, UserProfileHandler,
};
use crate::types::{ContextKind, ProcessedContext};

/// Dispatches a raw side-channel map to the handler registered for its
/// `kind` key. Unregistered kinds fall back to the general handler.
///
/// Processing and rendering are separate operations: `process` normalizes,
/// `render` produces the injectable block, so callers can log or inspect
/// context usage in between.
pub struct ContextProcessor {
    handlers: Vec<Box<dyn ContextHandler>>,
    fallback: GeneralHandler,
}

impl ContextProcessor {
    /// Standard handler set.
    pub fn new(extra_continuation_markers: Vec<String>) -> Self {
        Self {
            handlers: vec![
                Box::new(UserProfileHandler),
                Box::new(DomainHandler),
                Box::new(SystemStateHandler),
                Box::new(DialogueHistoryHandler {
                    extra_markers: extra_continuation_markers,
                }),
                Box::new(LocationHandler),
            ],
            fallback: GeneralHandler,
        }
    }

    fn handler_for(&self, kind: ContextKind) -> &dyn ContextHandler {
        self.handlers
            .iter()
            .find(|h| h.accepts(kind))
            .map(|h| h.as_ref() as &dyn ContextHandler)
            .unwrap_or(&self.fallback)
    }

    /// Normalize one side-channel map. Returns `None` when the map is empty.
    pub fn process(&self, raw: &Map<String, Value>) -> Option<ProcessedContext> {
        if raw.is_empty() {
            return None;
        }
        let kind = raw
            .get("kind")
            .and_then(|v| v.as_str())
            .and_then(|s| ContextKind::from_str(s).ok())
            .unwrap_or(ContextKind::General);

        let processed = self.handler_for(kind).process(raw);
        debug!(kind = %kind, fields = processed.fields.len(), "context processed");
        Some(processed)
    }

    /// Render a processed context into its text block. An empty string means
    /// there is nothing worth injecting.
    pub fn render(&self, ctx: &ProcessedContext) -> String {
        self.handler_for(ctx.kind).render(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(json: Value) -> Map<String, Value> {
        json.as_object().unwrap().clone()
    }

    #[test]
    fn empty_side_channel_yields_nothing() {
        let p = ContextProcessor::new(vec![]);
        assert!(p.process(&Map::new()).is_none());
    }

    #[test]
    fn kind_dispatch_selects_the_right_handler() {
        let p = ContextProcessor::new(vec![]);
        let ctx = p
            .process(&map(serde_json::json!({
                "kind": "location",
                "city": "Tromsø"
            })))
            .unwrap();
        assert_eq!(ctx.kind, ContextKind::Location);
        assert!(p.render(&ctx).contains("user location"));
    }

    #[test]
    fn unknown_kind_falls_back_to_general() {
        let p = ContextProcessor::new(vec![]);
        let ctx = p
            .process(&map(serde_json::json!({
                "kind": "astrology",
                "sign": "pisces"
            })))
            .unwrap();
        assert_eq!(ctx.kind, ContextKind::General);
        assert!(p.render(&ctx).contains("sign: pisces"));
    }

    #[test]
    fn kind_only_context_renders_empty() {
        let p = ContextProcessor::new(vec![]);
        let ctx = p
            .process(&map(serde_json::json!({"kind": "general"})))
            .unwrap();
        assert!(p.render(&ctx).is_empty());
    }
}
