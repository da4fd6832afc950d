use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use colloquy_context::{continuity, ContextInjector, ContextProcessor};
use colloquy_core::config::{ColloquyConfig, InjectionPosition};
use colloquy_core::error::{with_retry, EngineError, Result as EngineResult};
use colloquy_core::provider::{ChatMessage, ChatRole, Completion, GenerateConfig, ModelProvider, Usage};
use colloquy_core::types::{
    DialogueKind, InvocationStatus, MessageDirection, MessageKind, MessageRecord, Participant,
    ParticipantKind, Session, TagBag, ToolInvocationRecord, Turn, TurnStatus,
};
use colloquy_memory::{ConversationBuffer, MemoryManager};
use colloquy_relationship::{CollaborationCounts, InteractionUpdate, RelationshipEngine, UpdateOutcome};
use colloquy_sessions::SessionStore;
use colloquy_tools::ToolInvoker;

use crate::kinds;

/// One call into the engine.
pub struct ProcessRequest {
    /// Absent means "create a fresh private human↔AI session".
    pub session_id: Option<String>,
    pub user_id: String,
    pub content: String,
    pub content_kind: MessageKind,
    pub side_channel: serde_json::Map<String, Value>,
    pub cancel: CancellationToken,
}

impl ProcessRequest {
    pub fn text(user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: None,
            user_id: user_id.into(),
            content: content.into(),
            content_kind: MessageKind::Text,
            side_channel: serde_json::Map::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_side_channel(mut self, side_channel: serde_json::Map<String, Value>) -> Self {
        self.side_channel = side_channel;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Summary of one tool invocation, surfaced in reply tags.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolCallSummary {
    pub name: String,
    pub version: Option<String>,
    pub status: InvocationStatus,
    pub error: Option<String>,
}

/// What one processed utterance produced.
#[derive(Debug)]
pub struct ProcessReply {
    pub reply_text: String,
    pub tags: HashMap<String, Value>,
    pub session_id: String,
    pub turn_id: String,
    pub tool_results: Vec<ToolCallSummary>,
}

/// What the turn-driving stage hands back for finalization.
struct TurnOutcome {
    reply_text: String,
    failed: bool,
    error_code: Option<&'static str>,
    usage: Usage,
    tool_summaries: Vec<ToolCallSummary>,
    collaboration: CollaborationCounts,
}

/// Top-level orchestrator. Owns per-session control flow; one instance is
/// constructed at bootstrap and shared.
pub struct DialogueManager {
    config: ColloquyConfig,
    store: Arc<SessionStore>,
    buffer: Arc<ConversationBuffer>,
    memory: Arc<MemoryManager>,
    processor: ContextProcessor,
    injector: ContextInjector,
    invoker: Arc<ToolInvoker>,
    relationship: Arc<RelationshipEngine>,
    model: Arc<dyn ModelProvider>,
    /// Per-session mutual exclusion: while a turn is in flight, no other
    /// turn for the same session may advance.
    session_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl DialogueManager {
    pub fn new(
        config: ColloquyConfig,
        store: Arc<SessionStore>,
        buffer: Arc<ConversationBuffer>,
        memory: Arc<MemoryManager>,
        invoker: Arc<ToolInvoker>,
        relationship: Arc<RelationshipEngine>,
        model: Arc<dyn ModelProvider>,
    ) -> Self {
        let processor = ContextProcessor::new(config.dialogue.continuation_markers.clone());
        let injector = ContextInjector::new(config.context.clone());
        Self {
            config,
            store,
            buffer,
            memory,
            processor,
            injector,
            invoker,
            relationship,
            model,
            session_locks: DashMap::new(),
        }
    }

    fn assistant_id(&self) -> &str {
        &self.config.dialogue.assistant_id
    }

    /// Process one utterance end to end.
    pub async fn process(&self, request: ProcessRequest) -> EngineResult<ProcessReply> {
        let started = Instant::now();

        // 1. Session resolution.
        let session = match &request.session_id {
            Some(id) => self.store.get_session(id)?,
            None => {
                let session = Session::new(
                    &request.user_id,
                    DialogueKind::HumanAiPrivate,
                    vec![
                        Participant::new(&request.user_id, &request.user_id, ParticipantKind::Human),
                        Participant::new(self.assistant_id(), "Assistant", ParticipantKind::Ai),
                    ],
                );
                self.store.create_session(&session)?;
                info!(session = %session.id, owner = %request.user_id, "session created");
                session
            }
        };
        let policy = kinds::policy_for(session.kind);

        // Per-session serialization; cross-session calls run in parallel.
        let lock = self
            .session_locks
            .entry(session.id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _turn_guard = lock.lock().await;

        self.store.touch_session(&session.id, Utc::now())?;

        // 3. History retrieval (before the new message joins it).
        let history = self.history_for(&session.id);

        // 2. Turn creation with the inbound message.
        let responder = session
            .participants
            .iter()
            .find(|p| p.id != request.user_id)
            .cloned()
            .unwrap_or_else(|| {
                Participant::new(self.assistant_id(), "Assistant", ParticipantKind::Ai)
            });
        let turn = Turn {
            id: Uuid::now_v7().to_string(),
            session_id: session.id.clone(),
            ordinal: self.store.next_ordinal(&session.id)?,
            initiator_id: request.user_id.clone(),
            initiator_kind: ParticipantKind::Human,
            responder_id: responder.id.clone(),
            responder_kind: responder.kind,
            status: TurnStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            tags: TagBag::new(),
        };
        self.store.create_turn(&turn)?;
        self.store.append_message(&MessageRecord {
            id: Uuid::now_v7().to_string(),
            turn_id: turn.id.clone(),
            direction: MessageDirection::Request,
            content: request.content.clone(),
            kind: request.content_kind,
            sender_id: request.user_id.clone(),
            sender_kind: ParticipantKind::Human,
            created_at: Utc::now(),
            tags: TagBag::new(),
        })?;
        self.buffer
            .append(&session.id, ChatRole::User, &request.content);
        self.store
            .set_turn_status(&turn.id, TurnStatus::InProgress, None)?;

        // 4–6. Drive the turn; invariant violations still fail it cleanly.
        let outcome = match self.drive_turn(&session, &turn, policy, &history, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(turn = %turn.id, "turn driver failed: {e}");
                TurnOutcome {
                    reply_text: "Sorry, something went wrong while handling your message."
                        .to_string(),
                    failed: true,
                    error_code: Some(e.code()),
                    usage: Usage::default(),
                    tool_summaries: Vec::new(),
                    collaboration: CollaborationCounts::default(),
                }
            }
        };

        // 6. Finalization: the response message is always written so the
        // transcript stays linear, even for failed turns.
        self.store.append_message(&MessageRecord {
            id: Uuid::now_v7().to_string(),
            turn_id: turn.id.clone(),
            direction: MessageDirection::Response,
            content: outcome.reply_text.clone(),
            kind: MessageKind::Text,
            sender_id: responder.id.clone(),
            sender_kind: responder.kind,
            created_at: Utc::now(),
            tags: TagBag::new(),
        })?;
        self.buffer
            .append(&session.id, ChatRole::Assistant, &outcome.reply_text);
        let final_status = if outcome.failed {
            TurnStatus::Failed
        } else {
            TurnStatus::Completed
        };
        self.store
            .set_turn_status(&turn.id, final_status, Some(Utc::now()))?;

        // 7. Relationship update. Failures are logged, never surfaced.
        let relationship_outcome = if policy.consult_relationship && !outcome.failed {
            self.update_relationship(&request, &outcome)
        } else {
            None
        };

        // Archive the exchange into long-term memory, off the request path.
        if !outcome.failed {
            self.archive_exchange(&session.id, &request.content, &outcome.reply_text);
        }

        // 8. Reply with tags.
        let mut tags: HashMap<String, Value> = HashMap::new();
        tags.insert(
            "processing_ms".into(),
            json!(started.elapsed().as_millis() as u64),
        );
        tags.insert("turn_status".into(), json!(final_status.to_string()));
        tags.insert(
            "prompt_tokens".into(),
            json!(outcome.usage.prompt_tokens),
        );
        tags.insert(
            "completion_tokens".into(),
            json!(outcome.usage.completion_tokens),
        );
        tags.insert(
            "tool_invocations".into(),
            json!(outcome.tool_summaries.len()),
        );
        if let Some(code) = outcome.error_code {
            tags.insert("error".into(), json!(code));
        }
        if let Some(rel) = &relationship_outcome {
            tags.insert(
                "relationship".into(),
                json!({
                    "id": rel.relationship_id,
                    "status": rel.status.to_string(),
                    "ris": rel.ris,
                    "level": rel.level.to_string(),
                    "new_tasks": rel.generated_tasks.len(),
                }),
            );
        }

        Ok(ProcessReply {
            reply_text: outcome.reply_text,
            tags,
            session_id: session.id,
            turn_id: turn.id,
            tool_results: outcome.tool_summaries,
        })
    }

    /// Steps 4 and 5: assemble the prompt and run the bounded tool loop.
    async fn drive_turn(
        &self,
        session: &Session,
        turn: &Turn,
        policy: kinds::KindPolicy,
        history: &[ChatMessage],
        request: &ProcessRequest,
    ) -> EngineResult<TurnOutcome> {
        let mut messages =
            vec![ChatMessage::system(kinds::base_prompt(session.kind, self.assistant_id()))];

        // Tone-shaping relationship block, only when the pair has history.
        if policy.consult_relationship {
            if let Some(block) = self
                .relationship
                .context_for(&request.user_id, self.assistant_id())
            {
                messages.push(ChatMessage::system(block));
            }
        }

        // Continuity rule: a bare "continue" pins the prior topic.
        if let Some(directive) = continuity::continuation_directive(
            history,
            &request.content,
            &self.config.dialogue.continuation_markers,
        ) {
            messages.push(ChatMessage::system(directive));
        }

        // Side-channel context: normalize, render, then place per the
        // configured injection mode.
        let mut history_msgs = history.to_vec();
        let mut user_content = request.content.clone();
        if let Some(ctx) = self.processor.process(&request.side_channel) {
            let block = self.processor.render(&ctx);
            if self.config.context.log_context_usage {
                info!(kind = %ctx.kind, chars = block.len(), "context injected");
            }
            match self.injector.position() {
                InjectionPosition::Prefix => {
                    user_content =
                        self.injector
                            .inject_to_prompt(&user_content, &block, history.len());
                }
                InjectionPosition::System => {
                    messages = self.injector.inject_to_messages(messages, &block, history.len());
                }
                InjectionPosition::Inline => {
                    history_msgs = self.injector.inject_to_history(history_msgs, &block);
                }
            }
        }
        messages.extend(history_msgs);
        messages.push(ChatMessage::user(user_content));

        // 5. Tool loop, bounded by max_tool_calls.
        let mut tool_summaries: Vec<ToolCallSummary> = Vec::new();
        let mut collaboration = CollaborationCounts::default();
        let mut usage = Usage::default();
        let mut last_completion: Option<Completion> = None;
        let mut cancelled = request.cancel.is_cancelled();
        let mut fatal: Option<EngineError> = None;

        if policy.allow_tools && !cancelled {
            let max_calls = self.config.tools.max_tool_calls as usize;
            let mut calls = 0;
            while calls < max_calls && !cancelled {
                let probe = last_completion
                    .as_ref()
                    .map(|c| c.text.as_str())
                    .unwrap_or(&request.content);
                let decision = match self.invoker.decide(probe, &request.cancel).await {
                    Ok(Some(d)) => d,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(turn = %turn.id, "tool decision failed, continuing without tools: {e}");
                        break;
                    }
                };
                calls += 1;

                let inv_id = Uuid::now_v7().to_string();
                self.store.record_invocation(&ToolInvocationRecord {
                    id: inv_id.clone(),
                    turn_id: turn.id.clone(),
                    tool_name: decision.tool_name.clone(),
                    tool_version: decision.requested_version.clone(),
                    args: decision.args.clone(),
                    status: InvocationStatus::Pending,
                    result: None,
                    error: None,
                    created_at: Utc::now(),
                    completed_at: None,
                    tags: TagBag::new(),
                })?;
                self.store.update_invocation(
                    &inv_id,
                    InvocationStatus::Running,
                    None,
                    None,
                    None,
                )?;

                let (result_block, tool_failed) =
                    match self.invoker.execute(&decision, &request.cancel).await {
                        Ok(exec) => {
                            self.store.update_invocation(
                                &inv_id,
                                exec.status,
                                exec.output.as_ref().map(|o| o.as_value()).as_ref(),
                                exec.error.as_deref(),
                                Some(Utc::now()),
                            )?;
                            for key in exec.tags.keys() {
                                match key.as_str() {
                                    "diary" => collaboration.diary += 1,
                                    "co_creation" => collaboration.co_creation += 1,
                                    "gift" => collaboration.gift += 1,
                                    _ => {}
                                }
                            }
                            tool_summaries.push(ToolCallSummary {
                                name: exec.tool_name.clone(),
                                version: exec.version.clone(),
                                status: exec.status,
                                error: exec.error.clone(),
                            });
                            if exec.status == InvocationStatus::Cancelled {
                                cancelled = true;
                            }
                            (exec.result_block(), exec.status != InvocationStatus::Completed)
                        }
                        Err(e) => {
                            // Unknown tool or unresolvable version: the
                            // invocation fails, the turn continues.
                            let msg = e.to_string();
                            self.store.update_invocation(
                                &inv_id,
                                InvocationStatus::Failed,
                                None,
                                Some(msg.as_str()),
                                Some(Utc::now()),
                            )?;
                            tool_summaries.push(ToolCallSummary {
                                name: decision.tool_name.clone(),
                                version: None,
                                status: InvocationStatus::Failed,
                                error: Some(msg.clone()),
                            });
                            (
                                format!("[tool:{} error] {msg}", decision.tool_name),
                                true,
                            )
                        }
                    };
                if cancelled {
                    break;
                }

                // Thread the intermediate reply and the tool result into the
                // prompt, then re-issue the model call.
                if let Some(c) = &last_completion {
                    if !c.text.is_empty() {
                        messages.push(ChatMessage::assistant(c.text.clone()));
                    }
                }
                messages.push(ChatMessage::tool(result_block));

                match self.generate(&messages, &request.cancel).await {
                    Ok(c) => {
                        usage.prompt_tokens += c.usage.prompt_tokens;
                        usage.completion_tokens += c.usage.completion_tokens;
                        last_completion = Some(c);
                    }
                    Err(EngineError::Cancelled) => {
                        cancelled = true;
                        break;
                    }
                    Err(e) => {
                        fatal = Some(e);
                        break;
                    }
                }
                if tool_failed {
                    break;
                }
            }
        }

        // The final non-tool-requesting reply.
        if cancelled || request.cancel.is_cancelled() {
            debug!(turn = %turn.id, "turn cancelled");
            return Ok(TurnOutcome {
                reply_text: "The request was cancelled before a reply could be produced."
                    .to_string(),
                failed: true,
                error_code: Some("CANCELLED"),
                usage,
                tool_summaries,
                collaboration,
            });
        }
        if let Some(e) = fatal {
            error!(turn = %turn.id, "model call failed: {e}");
            return Ok(TurnOutcome {
                reply_text: "Sorry, I could not produce a reply right now. Please try again."
                    .to_string(),
                failed: true,
                error_code: Some(e.code()),
                usage,
                tool_summaries,
                collaboration,
            });
        }

        let completion = match last_completion {
            Some(c) => c,
            None => match self.generate(&messages, &request.cancel).await {
                Ok(c) => {
                    usage.prompt_tokens += c.usage.prompt_tokens;
                    usage.completion_tokens += c.usage.completion_tokens;
                    c
                }
                Err(EngineError::Cancelled) => {
                    return Ok(TurnOutcome {
                        reply_text:
                            "The request was cancelled before a reply could be produced."
                                .to_string(),
                        failed: true,
                        error_code: Some("CANCELLED"),
                        usage,
                        tool_summaries,
                        collaboration,
                    })
                }
                Err(e) => {
                    error!(turn = %turn.id, "model call failed: {e}");
                    return Ok(TurnOutcome {
                        reply_text:
                            "Sorry, I could not produce a reply right now. Please try again."
                                .to_string(),
                        failed: true,
                        error_code: Some(e.code()),
                        usage,
                        tool_summaries,
                        collaboration,
                    });
                }
            },
        };

        Ok(TurnOutcome {
            reply_text: completion.text,
            failed: false,
            error_code: None,
            usage,
            tool_summaries,
            collaboration,
        })
    }

    /// Model call with bounded exponential backoff on transient failures.
    async fn generate(
        &self,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> EngineResult<Completion> {
        let gen_config = GenerateConfig::default();
        let model = &self.model;
        with_retry(self.config.dialogue.retry_attempts, || async {
            model
                .generate(messages, &gen_config, cancel)
                .await
                .map_err(EngineError::from)
        })
        .await
    }

    /// Buffer-first history, falling back to the store when the conversation
    /// was evicted from the short-term buffer.
    fn history_for(&self, session_id: &str) -> Vec<ChatMessage> {
        let window = self.config.dialogue.history_window;
        let buffered = self.buffer.recent(session_id, window, false);
        if !buffered.is_empty() {
            return buffered
                .into_iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: m.content,
                })
                .collect();
        }
        match self.store.recent_messages(session_id, window) {
            Ok(records) => records
                .into_iter()
                .map(|m| {
                    let role = if m.sender_kind == ParticipantKind::Ai {
                        ChatRole::Assistant
                    } else {
                        ChatRole::User
                    };
                    ChatMessage {
                        role,
                        content: m.content,
                    }
                })
                .collect(),
            Err(e) => {
                warn!(session = session_id, "history load failed: {e}");
                Vec::new()
            }
        }
    }

    /// Step 7: resonance is inferred by scanning the reply for configured
    /// affective tokens; collaboration hints come from tool-result tags.
    fn update_relationship(
        &self,
        request: &ProcessRequest,
        outcome: &TurnOutcome,
    ) -> Option<UpdateOutcome> {
        let reply_lower = outcome.reply_text.to_lowercase();
        let resonance = self
            .config
            .dialogue
            .affective_tokens
            .iter()
            .any(|t| reply_lower.contains(&t.to_lowercase()));

        let mut update = InteractionUpdate::new(
            &request.user_id,
            ParticipantKind::Human,
            self.assistant_id(),
            ParticipantKind::Ai,
        )
        .with_resonance(resonance);
        if outcome.collaboration != CollaborationCounts::default() {
            update = update.with_collaboration(outcome.collaboration);
        }

        match self.relationship.update_interaction(update) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("relationship update failed (turn unaffected): {e}");
                None
            }
        }
    }

    /// Fire-and-forget archive of a completed exchange into the default
    /// long-term store.
    fn archive_exchange(&self, session_id: &str, user_text: &str, reply_text: &str) {
        let memory = self.memory.clone();
        let payload = json!(format!("user: {user_text}\nassistant: {reply_text}"));
        let mut tags = TagBag::new();
        tags.insert("session_id".to_string(), session_id.to_string());
        tokio::spawn(async move {
            if let Err(e) = memory.add(None, payload, tags).await {
                debug!("exchange archive skipped: {e}");
            }
        });
    }
}
