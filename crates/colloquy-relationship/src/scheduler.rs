//! Background relationship-task loop, decoupled from request flow.
//!
//! Polls the engine's executable-task view on an interval and dispatches
//! each task to its registered handler through a bounded executor pool.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};

use crate::engine::RelationshipEngine;
use crate::tasks::{RelationshipTask, TaskStatus};

/// Executes one kind of relationship task (keyed by `task_type`).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &RelationshipTask) -> Result<(), String>;
}

/// Polls for executable tasks and runs them with bounded concurrency.
pub struct TaskScheduler {
    engine: Arc<RelationshipEngine>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    poll_interval_ms: u64,
    permits: Arc<Semaphore>,
}

impl TaskScheduler {
    pub fn new(engine: Arc<RelationshipEngine>, poll_interval_ms: u64, concurrency: usize) -> Self {
        Self {
            engine,
            handlers: HashMap::new(),
            poll_interval_ms: poll_interval_ms.max(100),
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    /// Register the handler for one task type.
    pub fn register_handler(&mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(task_type.into(), handler);
    }

    /// One polling pass: claim every executable task that has a handler and
    /// spawn it onto the bounded pool.
    pub fn dispatch_once(&self) -> usize {
        let engine = &self.engine;
        let executable = engine
            .tasks()
            .executable(|rel_id| engine.resolve_for_tasks(rel_id));

        let mut dispatched = 0;
        for task in executable {
            let Some(handler) = self.handlers.get(&task.task_type).cloned() else {
                debug!(task = %task.id, task_type = %task.task_type, "no handler registered");
                continue;
            };
            if engine
                .tasks()
                .set_status(&task.id, TaskStatus::InProgress)
                .is_err()
            {
                continue;
            }
            dispatched += 1;

            let permits = self.permits.clone();
            let engine = self.engine.clone();
            tokio::spawn(async move {
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                debug!(task = %task.id, template = %task.template, "executing relationship task");
                let result = handler.handle(&task).await;
                let status = match &result {
                    Ok(()) => TaskStatus::Completed,
                    Err(e) => {
                        warn!(task = %task.id, "task handler failed: {e}");
                        TaskStatus::Failed
                    }
                };
                if let Err(e) = engine.tasks().set_status(&task.id, status) {
                    error!(task = %task.id, "task status update failed: {e}");
                }
            });
        }
        dispatched
    }

    /// Main loop. Polls until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.poll_interval_ms,
            "relationship task scheduler started"
        );
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(self.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let n = self.dispatch_once();
                    if n > 0 {
                        debug!(dispatched = n, "scheduler tick");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("relationship task scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::InteractionUpdate;
    use colloquy_core::config::RelationshipConfig;
    use colloquy_core::types::ParticipantKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _task: &RelationshipTask) -> Result<(), String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err("boom".to_string())
            } else {
                Ok(())
            }
        }
    }

    fn engine_with_checkin_task() -> Arc<RelationshipEngine> {
        let engine = Arc::new(RelationshipEngine::new(RelationshipConfig::default()));
        // Enough resonant rounds to go active with RIS past 0.2.
        for _ in 0..60 {
            engine
                .update_interaction(
                    InteractionUpdate::new(
                        "u1",
                        ParticipantKind::Human,
                        "assistant",
                        ParticipantKind::Ai,
                    )
                    .with_resonance(true),
                )
                .unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn dispatch_completes_handled_tasks() {
        let engine = engine_with_checkin_task();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = TaskScheduler::new(engine.clone(), 100, 2);
        scheduler.register_handler(
            "interaction",
            Arc::new(CountingHandler {
                calls: calls.clone(),
                fail: false,
            }),
        );

        let dispatched = scheduler.dispatch_once();
        assert!(dispatched >= 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(calls.load(Ordering::SeqCst) >= 1);

        let record = engine.lookup("u1", "assistant").unwrap();
        let tasks = engine.tasks().for_relationship(&record.id);
        assert!(tasks
            .iter()
            .filter(|t| t.task_type == "interaction")
            .all(|t| t.status == TaskStatus::Completed));
    }

    #[tokio::test]
    async fn failing_handler_marks_task_failed() {
        let engine = engine_with_checkin_task();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut scheduler = TaskScheduler::new(engine.clone(), 100, 2);
        scheduler.register_handler(
            "interaction",
            Arc::new(CountingHandler {
                calls,
                fail: true,
            }),
        );

        scheduler.dispatch_once();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let record = engine.lookup("u1", "assistant").unwrap();
        let tasks = engine.tasks().for_relationship(&record.id);
        assert!(tasks
            .iter()
            .filter(|t| t.task_type == "interaction")
            .all(|t| t.status == TaskStatus::Failed));
    }

    #[tokio::test]
    async fn unhandled_task_types_stay_pending() {
        let engine = engine_with_checkin_task();
        let scheduler = TaskScheduler::new(engine.clone(), 100, 2);
        assert_eq!(scheduler.dispatch_once(), 0);

        let record = engine.lookup("u1", "assistant").unwrap();
        let tasks = engine.tasks().for_relationship(&record.id);
        assert!(tasks.iter().any(|t| t.status == TaskStatus::Pending));
    }
}
