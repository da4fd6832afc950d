use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use colloquy_core::config::RelationshipConfig;
use colloquy_core::types::ParticipantKind;

use crate::error::{RelationshipError, Result};
use crate::tasks::TaskManager;
use crate::types::{
    CollaborationCounts, IntensityFactors, IntensitySnapshot, RelationshipLevel,
    RelationshipRecord, RelationshipStage, RelationshipStatus,
};

/// Interaction rounds at which the frequency factor saturates.
const INTERACTION_ROUNDS_CAP: f64 = 200.0;
/// Per-unit collaboration weights; the weighted terms sum before the single
/// cap at 1.0.
const DIARY_WEIGHT: f64 = 0.05;
const CO_CREATION_WEIGHT: f64 = 0.05;
const GIFT_WEIGHT: f64 = 0.1;
/// Affection points credited per gift.
const AFFECTION_PER_GIFT: i64 = 10;

/// One processed turn's worth of relationship input.
#[derive(Debug, Clone)]
pub struct InteractionUpdate {
    pub sender_id: String,
    pub sender_kind: ParticipantKind,
    pub receiver_id: String,
    pub receiver_kind: ParticipantKind,
    pub rounds: u64,
    pub emotional_resonance: bool,
    pub collaboration: Option<CollaborationCounts>,
}

impl InteractionUpdate {
    pub fn new(
        sender_id: impl Into<String>,
        sender_kind: ParticipantKind,
        receiver_id: impl Into<String>,
        receiver_kind: ParticipantKind,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            sender_kind,
            receiver_id: receiver_id.into(),
            receiver_kind,
            rounds: 1,
            emotional_resonance: false,
            collaboration: None,
        }
    }

    pub fn with_resonance(mut self, resonance: bool) -> Self {
        self.emotional_resonance = resonance;
        self
    }

    pub fn with_collaboration(mut self, delta: CollaborationCounts) -> Self {
        self.collaboration = Some(delta);
        self
    }
}

/// What an update produced, handed back to the dialogue manager for reply
/// tags.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    pub relationship_id: String,
    pub status: RelationshipStatus,
    pub ris: f64,
    pub level: RelationshipLevel,
    pub generated_tasks: Vec<String>,
}

/// Maintains one durable record per interacting pair, derives the intensity
/// score, and feeds the task generator.
pub struct RelationshipEngine {
    records: RwLock<HashMap<String, RelationshipRecord>>,
    /// Symmetric pair key -> record id.
    pair_index: RwLock<HashMap<(String, String), String>>,
    config: RelationshipConfig,
    tasks: TaskManager,
}

impl RelationshipEngine {
    pub fn new(config: RelationshipConfig) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            pair_index: RwLock::new(HashMap::new()),
            config,
            tasks: TaskManager::new(),
        }
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    fn pair_key(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Find the record for a pair, in either order.
    pub fn lookup(&self, a: &str, b: &str) -> Option<RelationshipRecord> {
        let id = self
            .pair_index
            .read()
            .unwrap()
            .get(&Self::pair_key(a, b))
            .cloned()?;
        let records = self.records.read().unwrap();
        records.get(&id).map(|r| {
            let mut record = r.clone();
            record.status = self.status_of(r, Utc::now());
            record
        })
    }

    pub fn get(&self, id: &str) -> Result<RelationshipRecord> {
        let records = self.records.read().unwrap();
        records
            .get(id)
            .map(|r| {
                let mut record = r.clone();
                record.status = self.status_of(r, Utc::now());
                record
            })
            .ok_or_else(|| RelationshipError::NotFound { id: id.to_string() })
    }

    /// Apply one processed turn. Locates or creates the record, bumps the
    /// counters, and runs task generation against the fresh state.
    pub fn update_interaction(&self, update: InteractionUpdate) -> Result<UpdateOutcome> {
        let now = Utc::now();
        let key = Self::pair_key(&update.sender_id, &update.receiver_id);

        let mut records = self.records.write().unwrap();
        let id = {
            let mut index = self.pair_index.write().unwrap();
            match index.get(&key) {
                Some(id) => id.clone(),
                None => {
                    let record = RelationshipRecord::new(
                        update.sender_id.clone(),
                        update.sender_kind,
                        update.receiver_id.clone(),
                        update.receiver_kind,
                    );
                    let id = record.id.clone();
                    info!(
                        relationship = %id,
                        a = %update.sender_id,
                        b = %update.receiver_id,
                        "relationship created"
                    );
                    index.insert(key, id.clone());
                    records.insert(id.clone(), record);
                    id
                }
            }
        };

        let record = records
            .get_mut(&id)
            .ok_or_else(|| RelationshipError::NotFound { id: id.clone() })?;

        record.total_interaction_rounds += update.rounds;
        if now.date_naive() != record.last_active.date_naive() {
            record.active_days += 1;
        }
        record.last_active = now;
        if update.emotional_resonance {
            record.emotional_resonance_count += 1;
        }
        if let Some(delta) = &update.collaboration {
            record.collaboration.diary += delta.diary;
            record.collaboration.co_creation += delta.co_creation;
            record.collaboration.gift += delta.gift;
            record.affection_score += delta.gift as i64 * AFFECTION_PER_GIFT;
        }

        let status = self.status_of(record, now);
        let snapshot = self.intensity_of(record);
        debug!(
            relationship = %id,
            rounds = record.total_interaction_rounds,
            ris = snapshot.ris,
            status = %status,
            "relationship updated"
        );
        drop(records);

        let generated_tasks = self.tasks.generate_for(&id, status, snapshot.ris);
        Ok(UpdateOutcome {
            relationship_id: id,
            status,
            ris: snapshot.ris,
            level: snapshot.level,
            generated_tasks,
        })
    }

    /// Explicitly break a relationship. The status is sticky: it never
    /// returns to active automatically.
    pub fn disconnect(&self, a: &str, b: &str, reason: &str) -> Result<()> {
        let id = self
            .pair_index
            .read()
            .unwrap()
            .get(&Self::pair_key(a, b))
            .cloned()
            .ok_or_else(|| RelationshipError::NotFound {
                id: format!("{a}<->{b}"),
            })?;
        let mut records = self.records.write().unwrap();
        if let Some(record) = records.get_mut(&id) {
            record.status = RelationshipStatus::Broken;
            warn!(relationship = %id, reason, "relationship disconnected");
        }
        Ok(())
    }

    /// Lazily computed status. Broken is sticky; otherwise thresholds over
    /// the last-active age and the recent-round count decide.
    fn status_of(&self, record: &RelationshipRecord, now: DateTime<Utc>) -> RelationshipStatus {
        if record.status == RelationshipStatus::Broken {
            return RelationshipStatus::Broken;
        }
        let idle_days = (now - record.last_active).num_days();
        if idle_days > self.config.silent_threshold_days {
            return RelationshipStatus::Silent;
        }
        if idle_days > self.config.cooling_threshold_days {
            return RelationshipStatus::Cooling;
        }
        // Within the active window: enough recent rounds keeps it active.
        if record.total_interaction_rounds >= self.config.active_min_rounds_7d {
            RelationshipStatus::Active
        } else {
            RelationshipStatus::Cooling
        }
    }

    /// Derived intensity. RIS = w_i·f_interaction + w_e·f_emotional +
    /// w_c·f_collaboration, each factor in [0, 1].
    pub fn intensity_of(&self, record: &RelationshipRecord) -> IntensitySnapshot {
        let w = self.config.relationship_weights;

        let interaction_frequency =
            (record.total_interaction_rounds as f64 / INTERACTION_ROUNDS_CAP).min(1.0);
        let emotional_density = if record.total_interaction_rounds == 0 {
            0.0
        } else {
            (record.emotional_resonance_count as f64 / record.total_interaction_rounds as f64)
                .min(1.0)
        };
        let collaboration_depth = (record.collaboration.diary as f64 * DIARY_WEIGHT
            + record.collaboration.co_creation as f64 * CO_CREATION_WEIGHT
            + record.collaboration.gift as f64 * GIFT_WEIGHT)
            .min(1.0);

        let ris = (w.interaction * interaction_frequency
            + w.emotional * emotional_density
            + w.collaboration * collaboration_depth)
            .clamp(0.0, 1.0);

        IntensitySnapshot {
            relationship_id: record.id.clone(),
            weights: w,
            factors: IntensityFactors {
                interaction_frequency,
                emotional_density,
                collaboration_depth,
            },
            ris,
            level: RelationshipLevel::from_ris(ris),
            last_updated: Utc::now(),
        }
    }

    /// Tone-shaping prompt block for a pair, or `None` when they have no
    /// history. The stage name is part of the observable output.
    pub fn context_for(&self, a: &str, b: &str) -> Option<String> {
        let record = self.lookup(a, b)?;
        let snapshot = self.intensity_of(&record);
        let stage = RelationshipStage::classify(snapshot.ris, record.total_interaction_rounds);

        let mut block = format!(
            "relationship context (stage: {stage}):\n\
             status: {}, level: {}, rounds: {}, intensity: {:.2}\n",
            record.status, snapshot.level, record.total_interaction_rounds, snapshot.ris
        );

        let tone = match record.status {
            RelationshipStatus::Broken => {
                "This connection was explicitly ended. Stay neutral and courteous, \
                 and do not presume any ongoing relationship."
            }
            RelationshipStatus::Silent => {
                "It has been a long time since you last spoke. Re-open gently, ask \
                 how they have been, and do not assume they remember every detail."
            }
            RelationshipStatus::Cooling => {
                "Contact has been tapering off. Rebuild the connection softly, \
                 revisiting shared topics without being pushy."
            }
            RelationshipStatus::Active => match snapshot.level {
                RelationshipLevel::Stranger => {
                    "You are still getting to know each other. Stay friendly and \
                     polite while learning their interests."
                }
                RelationshipLevel::Acquaintance => {
                    "You have a basic familiarity. Personalize a little, referring \
                     back to earlier exchanges, while keeping a respectful distance."
                }
                RelationshipLevel::Friend => {
                    "You are on friendly terms. A relaxed, natural tone with light \
                     humor fits; offer help proactively."
                }
                RelationshipLevel::Close => {
                    "You know each other well. Speak warmly, share more substantial \
                     thoughts, and check in on how they are doing."
                }
                RelationshipLevel::Intimate => {
                    "This is a deeply trusted companion. Be fully yourself, \
                     anticipate their needs, and speak with genuine warmth."
                }
            },
        };
        block.push_str(tone);
        Some(block)
    }

    /// Aggregate reporting view.
    pub fn stats(&self) -> RelationshipStats {
        let records = self.records.read().unwrap();
        let now = Utc::now();
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut by_level: HashMap<String, usize> = HashMap::new();
        let mut ris_sum = 0.0;
        for record in records.values() {
            let status = self.status_of(record, now);
            let snapshot = self.intensity_of(record);
            *by_status.entry(status.to_string()).or_default() += 1;
            *by_level.entry(snapshot.level.to_string()).or_default() += 1;
            ris_sum += snapshot.ris;
        }
        let total = records.len();
        RelationshipStats {
            total,
            by_status,
            by_level,
            average_ris: if total == 0 { 0.0 } else { ris_sum / total as f64 },
        }
    }

    /// Live (status, RIS) resolver used by the task scheduler's executable
    /// view.
    pub fn resolve_for_tasks(&self, relationship_id: &str) -> Option<(RelationshipStatus, f64)> {
        let records = self.records.read().unwrap();
        let record = records.get(relationship_id)?;
        let status = self.status_of(record, Utc::now());
        let snapshot = self.intensity_of(record);
        Some((status, snapshot.ris))
    }

    // --- persistence hooks (see persist.rs) --------------------------------

    pub(crate) fn records_snapshot(&self) -> Vec<RelationshipRecord> {
        let records = self.records.read().unwrap();
        let mut all: Vec<RelationshipRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub(crate) fn restore_records(&self, loaded: Vec<RelationshipRecord>) {
        let mut records = self.records.write().unwrap();
        let mut index = self.pair_index.write().unwrap();
        records.clear();
        index.clear();
        for record in loaded {
            index.insert(
                Self::pair_key(&record.a_id, &record.b_id),
                record.id.clone(),
            );
            records.insert(record.id.clone(), record);
        }
    }
}

/// Aggregate counts for reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RelationshipStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_level: HashMap<String, usize>,
    pub average_ris: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RelationshipEngine {
        RelationshipEngine::new(RelationshipConfig::default())
    }

    fn human_ai(sender: &str, receiver: &str) -> InteractionUpdate {
        InteractionUpdate::new(
            sender,
            ParticipantKind::Human,
            receiver,
            ParticipantKind::Ai,
        )
    }

    #[test]
    fn lookup_is_symmetric() {
        let eng = engine();
        let outcome = eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        let forward = eng.lookup("u1", "assistant").unwrap();
        let backward = eng.lookup("assistant", "u1").unwrap();
        assert_eq!(forward.id, backward.id);
        assert_eq!(forward.id, outcome.relationship_id);
    }

    #[test]
    fn first_update_initializes_counters() {
        let eng = engine();
        eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        let record = eng.lookup("u1", "assistant").unwrap();
        assert_eq!(record.total_interaction_rounds, 1);
        assert_eq!(record.active_days, 1);
        assert_eq!(record.emotional_resonance_count, 0);
    }

    #[test]
    fn intensity_matches_the_normative_formula() {
        // 200 turns, resonance on every third, co-creation on every fifth.
        let eng = engine();
        for i in 0..200u64 {
            let mut update = human_ai("u1", "assistant").with_resonance(i % 3 == 0);
            if i % 5 == 0 {
                update = update.with_collaboration(CollaborationCounts {
                    co_creation: 1,
                    ..Default::default()
                });
            }
            eng.update_interaction(update).unwrap();
        }
        let record = eng.lookup("u1", "assistant").unwrap();
        let snapshot = eng.intensity_of(&record);

        assert_eq!(snapshot.factors.interaction_frequency, 1.0);
        assert!((snapshot.factors.emotional_density - 67.0 / 200.0).abs() < 0.01);
        // 40 co-creation events: 40 * 0.05 = 2.0, capped once at 1.0.
        assert_eq!(snapshot.factors.collaboration_depth, 1.0);
        assert_eq!(record.status, RelationshipStatus::Active);
        assert!(matches!(
            snapshot.level,
            RelationshipLevel::Close | RelationshipLevel::Intimate
        ));
    }

    #[test]
    fn ris_stays_in_unit_interval_and_does_not_decrease_on_update() {
        let eng = engine();
        let mut last_ris = 0.0;
        for _ in 0..50 {
            let outcome = eng
                .update_interaction(
                    human_ai("u1", "assistant")
                        .with_resonance(true)
                        .with_collaboration(CollaborationCounts {
                            diary: 1,
                            ..Default::default()
                        }),
                )
                .unwrap();
            assert!((0.0..=1.0).contains(&outcome.ris));
            assert!(outcome.ris >= last_ris);
            last_ris = outcome.ris;
        }
    }

    #[test]
    fn gifts_raise_affection() {
        let eng = engine();
        eng.update_interaction(human_ai("u1", "assistant").with_collaboration(
            CollaborationCounts {
                gift: 3,
                ..Default::default()
            },
        ))
        .unwrap();
        let record = eng.lookup("u1", "assistant").unwrap();
        assert_eq!(record.collaboration.gift, 3);
        assert_eq!(record.affection_score, 30);
    }

    #[test]
    fn few_rounds_within_window_reads_as_cooling() {
        let eng = engine();
        for _ in 0..5 {
            eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        }
        let record = eng.lookup("u1", "assistant").unwrap();
        // Recent but below the 21-round activity bar.
        assert_eq!(record.status, RelationshipStatus::Cooling);
        for _ in 0..20 {
            eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        }
        let record = eng.lookup("u1", "assistant").unwrap();
        assert_eq!(record.status, RelationshipStatus::Active);
    }

    #[test]
    fn broken_is_sticky() {
        let eng = engine();
        eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        eng.disconnect("assistant", "u1", "user request").unwrap();
        assert_eq!(
            eng.lookup("u1", "assistant").unwrap().status,
            RelationshipStatus::Broken
        );
        // Further interaction records rounds but the status stays broken.
        eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        assert_eq!(
            eng.lookup("u1", "assistant").unwrap().status,
            RelationshipStatus::Broken
        );
    }

    #[test]
    fn context_block_names_a_stage() {
        let eng = engine();
        assert!(eng.context_for("u1", "assistant").is_none());
        eng.update_interaction(human_ai("u1", "assistant")).unwrap();
        let block = eng.context_for("u1", "assistant").unwrap();
        assert!(block.contains("stage: first_meet"));
        assert!(block.contains("status:"));
        assert!(block.contains("rounds: 1"));
    }

    #[test]
    fn update_generates_gated_tasks() {
        let eng = engine();
        // Push rounds high enough for active status and RIS past 0.2.
        for _ in 0..150 {
            eng.update_interaction(human_ai("u1", "assistant").with_resonance(true))
                .unwrap();
        }
        let record = eng.lookup("u1", "assistant").unwrap();
        let tasks = eng.tasks().for_relationship(&record.id);
        assert!(tasks.iter().any(|t| t.template == "daily_check_in"));
    }
}
