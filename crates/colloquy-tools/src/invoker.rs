use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use colloquy_core::config::{ToolDecisionMode, ToolsConfig};
use colloquy_core::provider::{ChatMessage, GenerateConfig, ModelProvider};
use colloquy_core::types::{InvocationStatus, TagBag};

use crate::error::{Result, ToolError};
use crate::multimodal;
use crate::registry::ToolRegistry;
use crate::tool::{matches_trigger, Tool, ToolOutput};

/// Utterances shorter than this never trigger rule-based tool use.
const MIN_UTTERANCE_CHARS: usize = 4;

/// Pure greetings are answered directly, without consulting tools.
const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "yo", "hiya", "howdy", "good morning", "good evening",
];

/// A decision to call one tool.
#[derive(Debug, Clone)]
pub struct ToolDecision {
    pub tool_name: String,
    pub requested_version: Option<String>,
    pub args: Value,
    pub reasoning: Option<String>,
}

/// Outcome of executing one decision. Tool-level failures (raised, timed
/// out, cancelled) land here with a terminal status; registry-level failures
/// (unknown tool, unresolvable version) surface as errors instead.
pub struct ToolExecution {
    pub tool_name: String,
    pub version: Option<String>,
    pub args: Value,
    pub status: InvocationStatus,
    pub output: Option<ToolOutput>,
    pub error: Option<String>,
    pub deprecation_notice: Option<String>,
    /// The tool's own tags, surfaced for collaboration hints.
    pub tags: TagBag,
}

impl ToolExecution {
    /// Render as the synthetic tool-result block appended to the prompt.
    pub fn result_block(&self) -> String {
        match (&self.output, &self.error) {
            (Some(output), _) => {
                format!("[tool:{}] {}", self.tool_name, output.clone().into_text())
            }
            (None, Some(error)) => format!("[tool:{} error] {error}", self.tool_name),
            (None, None) => format!("[tool:{}] (no output)", self.tool_name),
        }
    }
}

/// Shape of the model's JSON decision in model mode.
#[derive(Debug, Deserialize)]
struct ModelDecision {
    should_use_tool: bool,
    tool_name: Option<String>,
    #[serde(default)]
    tool_args: Value,
    reasoning: Option<String>,
}

/// Decides whether a tool should run for an utterance, executes it, and
/// formats the outcome for the next prompt assembly stage.
pub struct ToolInvoker {
    registry: Arc<ToolRegistry>,
    config: ToolsConfig,
    /// Required for model-based decisions; rule mode works without it.
    model: Option<Arc<dyn ModelProvider>>,
}

impl ToolInvoker {
    pub fn new(
        registry: Arc<ToolRegistry>,
        config: ToolsConfig,
        model: Option<Arc<dyn ModelProvider>>,
    ) -> Self {
        Self {
            registry,
            config,
            model,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Produce at most one tool decision for an utterance.
    pub async fn decide(
        &self,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolDecision>> {
        match self.config.tool_decision_mode {
            ToolDecisionMode::Rule => Ok(self.rule_decision(utterance)),
            ToolDecisionMode::Model => self.model_decision(utterance, cancel).await,
        }
    }

    /// Rule policy: long enough, not a greeting, and tripping at least one
    /// registered tool's trigger predicate.
    fn rule_decision(&self, utterance: &str) -> Option<ToolDecision> {
        let trimmed = utterance.trim();
        if trimmed.chars().count() < MIN_UTTERANCE_CHARS {
            return None;
        }
        let lower = trimmed.trim_end_matches(['!', '.', '?']).to_lowercase();
        if GREETINGS.contains(&lower.as_str()) {
            return None;
        }
        for tool in self.registry.default_tools() {
            if matches_trigger(tool.as_ref(), trimmed) {
                debug!(tool = tool.name(), "rule decision matched");
                return Some(ToolDecision {
                    tool_name: tool.name().to_string(),
                    requested_version: None,
                    args: Value::String(trimmed.to_string()),
                    reasoning: None,
                });
            }
        }
        None
    }

    /// Model policy: ask for a JSON decision; anything malformed means no
    /// tool use.
    async fn model_decision(
        &self,
        utterance: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<ToolDecision>> {
        let Some(model) = &self.model else {
            warn!("model decision mode configured without a model, skipping tools");
            return Ok(None);
        };

        let prompt = format!(
            "You decide whether a tool call is needed to answer the user.\n\n{}\n\
             User message: {utterance}\n\n\
             Respond with JSON only, no prose:\n\
             {{\"should_use_tool\": true|false, \"tool_name\": \"...\", \
             \"tool_args\": ..., \"reasoning\": \"...\"}}",
            self.registry.prompt_listing()
        );
        let messages = [ChatMessage::user(prompt)];
        let completion = match model
            .generate(&messages, &GenerateConfig::default(), cancel)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "tool decision model call failed, skipping tools");
                return Ok(None);
            }
        };

        let Some(parsed) = extract_json::<ModelDecision>(&completion.text) else {
            warn!("malformed tool decision response, defaulting to no tool use");
            return Ok(None);
        };
        if !parsed.should_use_tool {
            return Ok(None);
        }
        let Some(tool_name) = parsed.tool_name.filter(|n| !n.is_empty()) else {
            return Ok(None);
        };
        Ok(Some(ToolDecision {
            tool_name,
            requested_version: None,
            args: parsed.tool_args,
            reasoning: parsed.reasoning,
        }))
    }

    /// Execute a decision: resolve the tool (with version negotiation and
    /// argument migration), stage any media payload, and run with the
    /// configured timeout under the caller's cancellation token.
    pub async fn execute(
        &self,
        decision: &ToolDecision,
        cancel: &CancellationToken,
    ) -> Result<ToolExecution> {
        let resolved = self
            .registry
            .resolve(&decision.tool_name, decision.requested_version.as_deref())?;
        if let Some(notice) = &resolved.deprecation_notice {
            warn!(tool = %decision.tool_name, "{notice}");
        }

        // Argument migration: callers may hand us args shaped for any
        // version back to min_compatible; the tool's hook upgrades them.
        let migrate_from = resolved
            .tool
            .version_info()
            .map(|vi| vi.min_compatible)
            .unwrap_or(crate::version::ToolVersion::new(1, 0, 0));
        let mut args = resolved
            .tool
            .migrate_args(&migrate_from, &decision.args)
            .unwrap_or_else(|| decision.args.clone());

        // Multimodal dispatch: decode or download the payload into a temp
        // artifact and pass a normalized structured argument. The artifact
        // guard cleans up on every exit path below.
        let mut _artifact = None;
        let is_media_tool = resolved.tool.modalities().iter().any(|m| m.is_media());
        if is_media_tool {
            if let Some(media) = multimodal::extract_media(&args) {
                let staged = multimodal::stage_media(&media).await?;
                let text = match &args {
                    Value::Object(map) => map
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    _ => String::new(),
                };
                args = serde_json::json!({
                    "path": staged.path().to_string_lossy(),
                    "media_type": staged.media_type,
                    "text": text,
                });
                _artifact = Some(staged);
            }
        }

        let tags: TagBag = resolved
            .tool
            .tags()
            .iter()
            .map(|t| (t.to_string(), "true".to_string()))
            .collect();
        let version = resolved
            .tool
            .version_info()
            .map(|_| resolved.version.to_string());
        let timeout = Duration::from_millis(self.config.tool_timeout_ms);

        info!(tool = %decision.tool_name, version = ?version, "invoking tool");
        let invoke = resolved.tool.invoke(args.clone());
        let (status, output, error) = tokio::select! {
            _ = cancel.cancelled() => {
                (InvocationStatus::Cancelled, None, Some("cancelled".to_string()))
            }
            timed = tokio::time::timeout(timeout, invoke) => match timed {
                Err(_) => (
                    InvocationStatus::Failed,
                    None,
                    Some(format!("timed out after {}ms", self.config.tool_timeout_ms)),
                ),
                Ok(Ok(output)) => (InvocationStatus::Completed, Some(output), None),
                Ok(Err(e)) => (InvocationStatus::Failed, None, Some(e.to_string())),
            },
        };

        Ok(ToolExecution {
            tool_name: decision.tool_name.clone(),
            version,
            args,
            status,
            output,
            error,
            deprecation_notice: resolved.deprecation_notice,
            tags,
        })
    }
}

/// Pull the first JSON object out of a model response, tolerating prose or
/// code fences around it.
fn extract_json<T: serde::de::DeserializeOwned>(text: &str) -> Option<T> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::{CalculatorV1, CalculatorV2};
    use crate::tool::{Modality, Tool, VersionInfo};
    use crate::version::VersionStatus;
    use async_trait::async_trait;
    use colloquy_core::provider::{Completion, ProviderError, Usage};

    fn registry() -> Arc<ToolRegistry> {
        let reg = Arc::new(ToolRegistry::new());
        reg.register(
            Arc::new(CalculatorV1::new()),
            "core",
            VersionStatus::Stable,
            true,
        )
        .unwrap();
        reg.register(
            Arc::new(CalculatorV2::new()),
            "core",
            VersionStatus::Stable,
            false,
        )
        .unwrap();
        reg
    }

    fn invoker(reg: Arc<ToolRegistry>) -> ToolInvoker {
        ToolInvoker::new(reg, ToolsConfig::default(), None)
    }

    #[tokio::test]
    async fn greetings_and_short_strings_are_rejected() {
        let inv = invoker(registry());
        let cancel = CancellationToken::new();
        assert!(inv.decide("hi", &cancel).await.unwrap().is_none());
        assert!(inv.decide("Hello!", &cancel).await.unwrap().is_none());
        assert!(inv.decide("ok", &cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn trigger_keyword_selects_the_tool() {
        let inv = invoker(registry());
        let cancel = CancellationToken::new();
        let decision = inv
            .decide("please calculate 12 * 12", &cancel)
            .await
            .unwrap()
            .expect("calculator should trigger");
        assert_eq!(decision.tool_name, "calculator");
    }

    #[tokio::test]
    async fn unmatched_utterance_uses_no_tool() {
        let inv = invoker(registry());
        let cancel = CancellationToken::new();
        assert!(inv
            .decide("tell me a story about turtles", &cancel)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let inv = invoker(registry());
        let decision = ToolDecision {
            tool_name: "nonexistent".into(),
            requested_version: None,
            args: Value::String("x".into()),
            reasoning: None,
        };
        let err = inv.execute(&decision, &CancellationToken::new()).await;
        assert!(matches!(err, Err(ToolError::NotFound { .. })));
    }

    #[tokio::test]
    async fn v2_request_migrates_v1_string_args() {
        // Submit {tool: calculator, requested_version: 2.0.0, args: "1+2"}.
        // The invoker must call v2 with {expression, precision} and the
        // result text must contain "3".
        let inv = invoker(registry());
        let decision = ToolDecision {
            tool_name: "calculator".into(),
            requested_version: Some("2.0.0".into()),
            args: Value::String("1+2".into()),
            reasoning: None,
        };
        let exec = inv
            .execute(&decision, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exec.status, InvocationStatus::Completed);
        assert_eq!(exec.args["expression"], "1+2");
        assert_eq!(exec.args["precision"], 2);
        assert!(exec.result_block().contains('3'));
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps forever"
        }
        async fn invoke(&self, _args: Value) -> crate::error::Result<ToolOutput> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(ToolOutput::Text("never".into()))
        }
    }

    #[tokio::test]
    async fn timeout_marks_invocation_failed() {
        let reg = Arc::new(ToolRegistry::new());
        reg.register_simple(Arc::new(SlowTool), "core").unwrap();
        let config = ToolsConfig {
            tool_timeout_ms: 20,
            ..Default::default()
        };
        let inv = ToolInvoker::new(reg, config, None);
        let decision = ToolDecision {
            tool_name: "slow".into(),
            requested_version: None,
            args: Value::Null,
            reasoning: None,
        };
        let exec = inv
            .execute(&decision, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exec.status, InvocationStatus::Failed);
        assert!(exec.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn cancellation_marks_invocation_cancelled() {
        let reg = Arc::new(ToolRegistry::new());
        reg.register_simple(Arc::new(SlowTool), "core").unwrap();
        let inv = ToolInvoker::new(reg, ToolsConfig::default(), None);
        let cancel = CancellationToken::new();
        let decision = ToolDecision {
            tool_name: "slow".into(),
            requested_version: None,
            args: Value::Null,
            reasoning: None,
        };
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                cancel.cancel();
            })
        };
        let exec = inv.execute(&decision, &cancel).await.unwrap();
        handle.await.unwrap();
        assert_eq!(exec.status, InvocationStatus::Cancelled);
    }

    struct ImageProbe;

    #[async_trait]
    impl Tool for ImageProbe {
        fn name(&self) -> &str {
            "image_probe"
        }
        fn description(&self) -> &str {
            "inspects an image artifact"
        }
        fn modalities(&self) -> &[Modality] {
            &[Modality::Image]
        }
        async fn invoke(&self, args: Value) -> crate::error::Result<ToolOutput> {
            let path = args["path"].as_str().unwrap_or_default().to_string();
            let exists = std::path::Path::new(&path).exists();
            Ok(ToolOutput::Structured(serde_json::json!({
                "path": path,
                "existed_during_invoke": exists,
                "media_type": args["media_type"],
            })))
        }
    }

    #[tokio::test]
    async fn media_args_are_staged_and_cleaned_up() {
        let reg = Arc::new(ToolRegistry::new());
        reg.register_simple(Arc::new(ImageProbe), "core").unwrap();
        let inv = ToolInvoker::new(reg, ToolsConfig::default(), None);
        let payload = multimodal::encode_base64(b"fake png bytes");
        let decision = ToolDecision {
            tool_name: "image_probe".into(),
            requested_version: None,
            args: Value::String(format!("data:image/png;base64,{payload}")),
            reasoning: None,
        };
        let exec = inv
            .execute(&decision, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exec.status, InvocationStatus::Completed);
        let out = exec.output.unwrap().as_value();
        assert_eq!(out["existed_during_invoke"], true);
        assert_eq!(out["media_type"], "image/png");
        // The temp artifact is gone once execute returns.
        assert!(!std::path::Path::new(out["path"].as_str().unwrap()).exists());
    }

    struct ScriptedModel {
        response: String,
    }

    #[async_trait]
    impl ModelProvider for ScriptedModel {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn generate(
            &self,
            _messages: &[ChatMessage],
            _config: &GenerateConfig,
            _cancel: &CancellationToken,
        ) -> std::result::Result<Completion, ProviderError> {
            Ok(Completion {
                text: self.response.clone(),
                usage: Usage::default(),
            })
        }
    }

    fn model_invoker(response: &str) -> ToolInvoker {
        let config = ToolsConfig {
            tool_decision_mode: ToolDecisionMode::Model,
            ..Default::default()
        };
        ToolInvoker::new(
            registry(),
            config,
            Some(Arc::new(ScriptedModel {
                response: response.to_string(),
            })),
        )
    }

    #[tokio::test]
    async fn model_decision_parses_json() {
        let inv = model_invoker(
            "Sure. {\"should_use_tool\": true, \"tool_name\": \"calculator\", \
             \"tool_args\": \"40+2\", \"reasoning\": \"math\"}",
        );
        let decision = inv
            .decide("what is 40+2", &CancellationToken::new())
            .await
            .unwrap()
            .expect("model decision should select a tool");
        assert_eq!(decision.tool_name, "calculator");
        assert_eq!(decision.args, Value::String("40+2".into()));
    }

    #[tokio::test]
    async fn malformed_model_response_means_no_tool() {
        let inv = model_invoker("I think you should just relax.");
        assert!(inv
            .decide("what is 40+2", &CancellationToken::new())
            .await
            .unwrap()
            .is_none());
    }
}
