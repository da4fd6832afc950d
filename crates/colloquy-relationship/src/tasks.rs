use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use colloquy_core::types::TagBag;

use crate::error::{RelationshipError, Result};
use crate::types::RelationshipStatus;

/// A named pattern specifying activation predicates and the human-readable
/// title/description to materialize into a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub name: String,
    pub title: String,
    pub description: String,
    pub task_type: String,
    pub priority: u8,
    pub min_ris: f64,
    pub required_status: Option<RelationshipStatus>,
}

/// The fixed template catalog. Thresholds are normative.
pub fn default_templates() -> Vec<TaskTemplate> {
    let t = |name: &str,
             title: &str,
             description: &str,
             task_type: &str,
             priority: u8,
             min_ris: f64,
             required_status: Option<RelationshipStatus>| TaskTemplate {
        name: name.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        task_type: task_type.to_string(),
        priority,
        min_ris,
        required_status,
    };
    vec![
        t(
            "daily_check_in",
            "Daily check-in",
            "Send a daily greeting and ask how things are going",
            "interaction",
            3,
            0.2,
            Some(RelationshipStatus::Active),
        ),
        t(
            "emotional_support",
            "Emotional support",
            "Offer emotional support and encouragement",
            "emotional",
            4,
            0.4,
            Some(RelationshipStatus::Active),
        ),
        t(
            "deep_conversation",
            "Deep conversation",
            "Open a more substantial topic for discussion",
            "depth",
            3,
            0.6,
            Some(RelationshipStatus::Active),
        ),
        t(
            "collaboration_project",
            "Collaboration project",
            "Invite the user to work on something together",
            "collaboration",
            4,
            0.7,
            Some(RelationshipStatus::Active),
        ),
        t(
            "cooling_prevention",
            "Cooling prevention",
            "Increase interaction frequency before the relationship cools",
            "prevention",
            3,
            0.3,
            Some(RelationshipStatus::Cooling),
        ),
        t(
            "relationship_revival",
            "Relationship revival",
            "Try to re-engage a long-silent contact",
            "revival",
            2,
            0.0,
            Some(RelationshipStatus::Silent),
        ),
    ]
}

/// Lifecycle state of a relationship task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A materialized task targeting one relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipTask {
    pub id: String,
    pub relationship_id: String,
    pub template: String,
    pub title: String,
    pub description: String,
    pub task_type: String,
    /// Clamped to 1..=5.
    pub priority: u8,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub min_ris: f64,
    pub required_status: Option<RelationshipStatus>,
    #[serde(default)]
    pub tags: TagBag,
}

impl RelationshipTask {
    fn from_template(template: &TaskTemplate, relationship_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            relationship_id: relationship_id.to_string(),
            template: template.name.clone(),
            title: template.title.clone(),
            description: template.description.clone(),
            task_type: template.task_type.clone(),
            priority: template.priority.clamp(1, 5),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            due_at: None,
            completed_at: None,
            min_ris: template.min_ris,
            required_status: template.required_status,
            tags: TagBag::new(),
        }
    }

    /// Whether this task may run against the relationship's current state.
    pub fn can_execute(&self, status: RelationshipStatus, ris: f64) -> bool {
        if let Some(required) = self.required_status {
            if status != required {
                return false;
            }
        }
        ris >= self.min_ris
    }
}

/// Owns materialized tasks and the template catalog.
pub struct TaskManager {
    tasks: RwLock<HashMap<String, RelationshipTask>>,
    templates: Vec<TaskTemplate>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
            templates: default_templates(),
        }
    }

    pub fn templates(&self) -> &[TaskTemplate] {
        &self.templates
    }

    /// Materialize every template whose predicates are satisfied and whose
    /// prior instance for this relationship is not still pending. Returns
    /// the created task ids.
    pub fn generate_for(
        &self,
        relationship_id: &str,
        status: RelationshipStatus,
        ris: f64,
    ) -> Vec<String> {
        let mut created = Vec::new();
        let mut tasks = self.tasks.write().unwrap();
        for template in &self.templates {
            if let Some(required) = template.required_status {
                if status != required {
                    continue;
                }
            }
            if ris < template.min_ris {
                continue;
            }
            let has_pending = tasks.values().any(|t| {
                t.relationship_id == relationship_id
                    && t.template == template.name
                    && t.status == TaskStatus::Pending
            });
            if has_pending {
                continue;
            }
            let task = RelationshipTask::from_template(template, relationship_id);
            debug!(task = %task.id, template = %template.name, "relationship task generated");
            created.push(task.id.clone());
            tasks.insert(task.id.clone(), task);
        }
        if !created.is_empty() {
            info!(
                relationship = relationship_id,
                count = created.len(),
                "generated relationship tasks"
            );
        }
        created
    }

    pub fn get(&self, id: &str) -> Result<RelationshipTask> {
        self.tasks
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RelationshipError::TaskNotFound { id: id.to_string() })
    }

    pub fn all(&self) -> Vec<RelationshipTask> {
        self.tasks.read().unwrap().values().cloned().collect()
    }

    pub fn for_relationship(&self, relationship_id: &str) -> Vec<RelationshipTask> {
        self.tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| t.relationship_id == relationship_id)
            .cloned()
            .collect()
    }

    /// Non-terminal tasks whose predicates hold against live relationship
    /// state, resolved through `resolve(relationship_id)`.
    pub fn executable<F>(&self, resolve: F) -> Vec<RelationshipTask>
    where
        F: Fn(&str) -> Option<(RelationshipStatus, f64)>,
    {
        let mut out: Vec<RelationshipTask> = self
            .tasks
            .read()
            .unwrap()
            .values()
            .filter(|t| !t.status.is_terminal())
            .filter(|t| {
                resolve(&t.relationship_id)
                    .map(|(status, ris)| t.can_execute(status, ris))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        // Highest priority first, then oldest.
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.created_at.cmp(&b.created_at)));
        out
    }

    pub fn set_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.write().unwrap();
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| RelationshipError::TaskNotFound { id: id.to_string() })?;
        task.status = status;
        if status == TaskStatus::Completed {
            task.completed_at = Some(Utc::now());
        }
        Ok(())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
