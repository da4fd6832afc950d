use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use colloquy_core::config::RelationshipWeights;
use colloquy_core::types::ParticipantKind;

/// Lifecycle state of a relationship. `Broken` is set explicitly by a
/// disconnect and never reverts automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipStatus {
    Active,
    Cooling,
    Silent,
    Broken,
}

impl std::fmt::Display for RelationshipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelationshipStatus::Active => "active",
            RelationshipStatus::Cooling => "cooling",
            RelationshipStatus::Silent => "silent",
            RelationshipStatus::Broken => "broken",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RelationshipStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(RelationshipStatus::Active),
            "cooling" => Ok(RelationshipStatus::Cooling),
            "silent" => Ok(RelationshipStatus::Silent),
            "broken" => Ok(RelationshipStatus::Broken),
            other => Err(format!("unknown relationship status: {other}")),
        }
    }
}

/// Coarse level derived from RIS bands. Band edges are normative:
/// [0,0.2] stranger, (0.2,0.4] acquaintance, (0.4,0.6] friend,
/// (0.6,0.8] close, (0.8,1] intimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipLevel {
    Stranger,
    Acquaintance,
    Friend,
    Close,
    Intimate,
}

impl RelationshipLevel {
    pub fn from_ris(ris: f64) -> Self {
        if ris <= 0.2 {
            RelationshipLevel::Stranger
        } else if ris <= 0.4 {
            RelationshipLevel::Acquaintance
        } else if ris <= 0.6 {
            RelationshipLevel::Friend
        } else if ris <= 0.8 {
            RelationshipLevel::Close
        } else {
            RelationshipLevel::Intimate
        }
    }
}

impl std::fmt::Display for RelationshipLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelationshipLevel::Stranger => "stranger",
            RelationshipLevel::Acquaintance => "acquaintance",
            RelationshipLevel::Friend => "friend",
            RelationshipLevel::Close => "close",
            RelationshipLevel::Intimate => "intimate",
        };
        write!(f, "{s}")
    }
}

/// The seven named relationship stages observable from `context_for` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStage {
    FirstMeet,
    Resonance,
    EmotionalLink,
    DeepResonance,
    Warming,
    MutualUnderstanding,
    SoulCompanion,
}

impl RelationshipStage {
    /// Classify a pair into a stage. Fresh pairs are `FirstMeet`; beyond
    /// that the stage follows the intensity score.
    pub fn classify(ris: f64, total_rounds: u64) -> Self {
        if total_rounds <= 1 || ris <= 0.15 {
            RelationshipStage::FirstMeet
        } else if ris <= 0.3 {
            RelationshipStage::Resonance
        } else if ris <= 0.45 {
            RelationshipStage::EmotionalLink
        } else if ris <= 0.6 {
            RelationshipStage::DeepResonance
        } else if ris <= 0.75 {
            RelationshipStage::Warming
        } else if ris <= 0.9 {
            RelationshipStage::MutualUnderstanding
        } else {
            RelationshipStage::SoulCompanion
        }
    }
}

impl std::fmt::Display for RelationshipStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RelationshipStage::FirstMeet => "first_meet",
            RelationshipStage::Resonance => "resonance",
            RelationshipStage::EmotionalLink => "emotional_link",
            RelationshipStage::DeepResonance => "deep_resonance",
            RelationshipStage::Warming => "warming",
            RelationshipStage::MutualUnderstanding => "mutual_understanding",
            RelationshipStage::SoulCompanion => "soul_companion",
        };
        write!(f, "{s}")
    }
}

/// Collaboration aggregates feeding the collaboration-depth factor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaborationCounts {
    #[serde(default)]
    pub diary: u64,
    #[serde(default)]
    pub co_creation: u64,
    #[serde(default)]
    pub gift: u64,
}

/// Durable record for one (A, B) pair. Lookup is symmetric: (A,B) and (B,A)
/// resolve to the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    pub id: String,
    pub a_id: String,
    pub a_kind: ParticipantKind,
    pub b_id: String,
    pub b_kind: ParticipantKind,
    pub first_interaction: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub total_interaction_rounds: u64,
    /// Distinct calendar days with at least one interaction.
    pub active_days: u64,
    pub emotional_resonance_count: u64,
    /// Grows with gifts received.
    pub affection_score: i64,
    /// Reciprocal-token counter.
    pub recognition_score: i64,
    pub status: RelationshipStatus,
    #[serde(default)]
    pub collaboration: CollaborationCounts,
}

impl RelationshipRecord {
    pub fn new(
        a_id: impl Into<String>,
        a_kind: ParticipantKind,
        b_id: impl Into<String>,
        b_kind: ParticipantKind,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            a_id: a_id.into(),
            a_kind,
            b_id: b_id.into(),
            b_kind,
            first_interaction: now,
            last_active: now,
            total_interaction_rounds: 0,
            active_days: 1,
            emotional_resonance_count: 0,
            affection_score: 0,
            recognition_score: 0,
            status: RelationshipStatus::Active,
            collaboration: CollaborationCounts::default(),
        }
    }
}

/// The three intensity factors, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IntensityFactors {
    pub interaction_frequency: f64,
    pub emotional_density: f64,
    pub collaboration_depth: f64,
}

/// Derived intensity view over a relationship record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntensitySnapshot {
    pub relationship_id: String,
    pub weights: RelationshipWeights,
    pub factors: IntensityFactors,
    pub ris: f64,
    pub level: RelationshipLevel,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_bands_are_normative() {
        assert_eq!(RelationshipLevel::from_ris(0.0), RelationshipLevel::Stranger);
        assert_eq!(RelationshipLevel::from_ris(0.2), RelationshipLevel::Stranger);
        assert_eq!(
            RelationshipLevel::from_ris(0.21),
            RelationshipLevel::Acquaintance
        );
        assert_eq!(RelationshipLevel::from_ris(0.4), RelationshipLevel::Acquaintance);
        assert_eq!(RelationshipLevel::from_ris(0.55), RelationshipLevel::Friend);
        assert_eq!(RelationshipLevel::from_ris(0.8), RelationshipLevel::Close);
        assert_eq!(RelationshipLevel::from_ris(0.81), RelationshipLevel::Intimate);
        assert_eq!(RelationshipLevel::from_ris(1.0), RelationshipLevel::Intimate);
    }

    #[test]
    fn fresh_pairs_classify_as_first_meet() {
        assert_eq!(
            RelationshipStage::classify(0.9, 1),
            RelationshipStage::FirstMeet
        );
        assert_eq!(
            RelationshipStage::classify(0.5, 40),
            RelationshipStage::DeepResonance
        );
        assert_eq!(
            RelationshipStage::classify(0.95, 300),
            RelationshipStage::SoulCompanion
        );
    }
}
