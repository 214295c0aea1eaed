//! Monster archetypes and the model catalogue keyed by them.
//!
//! Every loaded model is addressed by a [`ModelKey`]: the archetype decides
//! which behavioural variant applies and the [`ModelType`] decides which
//! decision head runs. On disk the pair maps to
//! `{model_dir}/{archetype}/{model_type}.{ext}`.

use std::fmt;

/// Behavioural category of a monster.
///
/// Archetypes are fixed by the game server; the string form is what appears
/// in the `ai_requests.archetype` column and in model directory names.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Archetype {
    /// Presses the attack, rarely retreats
    Aggressive,
    /// Holds ground, prefers guarding
    Defensive,
    /// Heals and buffs pack members
    Support,
    /// Ranged spellcaster, skill heavy
    Mage,
    /// Soaks damage, draws aggro
    Tank,
    /// Keeps distance, kites
    Ranged,
}

impl Archetype {
    /// All archetypes in catalogue order.
    pub fn all() -> impl Iterator<Item = Archetype> {
        <Archetype as strum::IntoEnumIterator>::iter()
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Decision head of a model.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    strum::IntoStaticStr,
    strum::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ModelType {
    #[default]
    CombatDqn,
    MovementPpo,
    SkillDqn,
    ThreatAssessment,
    TeamCoordination,
    SpatialVit,
    TemporalTransformer,
    PatternRecognition,
    SoftActorCritic,
    /// Coordination-aware variant taking the state concatenated with the
    /// pack signal vector.
    PackCoordination,
}

impl ModelType {
    /// All model types in catalogue order.
    pub fn all() -> impl Iterator<Item = ModelType> {
        <ModelType as strum::IntoEnumIterator>::iter()
    }

    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Whether the model expects `state ⊕ signal` instead of the bare state.
    pub fn takes_signal_input(self) -> bool {
        matches!(self, ModelType::PackCoordination)
    }
}

/// Address of one loaded model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModelKey {
    pub archetype: Archetype,
    pub model_type: ModelType,
}

impl ModelKey {
    pub const fn new(archetype: Archetype, model_type: ModelType) -> Self {
        Self {
            archetype,
            model_type,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.archetype, self.model_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn archetype_parses_case_insensitively() {
        assert_eq!(Archetype::from_str("MAGE").unwrap(), Archetype::Mage);
        assert_eq!(Archetype::from_str("tank").unwrap(), Archetype::Tank);
        assert!(Archetype::from_str("dragon").is_err());
    }

    #[test]
    fn model_type_round_trips_through_snake_case() {
        for model_type in ModelType::all() {
            let name = model_type.to_string();
            assert_eq!(ModelType::from_str(&name).unwrap(), model_type);
        }
        assert_eq!(ModelType::CombatDqn.as_ref(), "combat_dqn");
        assert_eq!(ModelType::SoftActorCritic.as_ref(), "soft_actor_critic");
    }

    #[test]
    fn model_key_display_matches_directory_layout() {
        let key = ModelKey::new(Archetype::Aggressive, ModelType::TeamCoordination);
        assert_eq!(key.to_string(), "aggressive/team_coordination");
    }

    #[test]
    fn catalogue_sizes() {
        assert_eq!(Archetype::all().count(), 6);
        assert_eq!(ModelType::all().count(), 10);
    }
}
