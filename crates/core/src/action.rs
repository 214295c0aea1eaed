//! Discrete action space shared with the game server.
//!
//! Action ids are the wire contract with the server's monster AI: the server
//! maps `0..=9` onto its own behaviour enum and treats [`ActionId::TRADITIONAL_AI`]
//! as "run your built-in AI for this monster".

use std::fmt;

/// Discrete action identifier as written to `ai_responses.action_id`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ActionId(pub u8);

impl ActionId {
    pub const IDLE: ActionId = ActionId(0);
    pub const ATTACK: ActionId = ActionId(1);
    pub const MOVE_CLOSER: ActionId = ActionId(2);
    pub const MOVE_AWAY: ActionId = ActionId(3);
    pub const MOVE_RANDOM: ActionId = ActionId(4);
    pub const SKILL_1: ActionId = ActionId(5);
    pub const SKILL_2: ActionId = ActionId(6);
    pub const SKILL_3: ActionId = ActionId(7);
    pub const CHANGE_TARGET: ActionId = ActionId(8);
    pub const FLEE: ActionId = ActionId(9);

    /// Sentinel telling the game server to fall back to its built-in AI.
    pub const TRADITIONAL_AI: ActionId = ActionId(255);

    /// Number of model-selectable actions.
    pub const COUNT: usize = 10;

    /// Safe default used whenever no model can answer.
    pub const fn safe_default() -> Self {
        Self::IDLE
    }

    /// Converts a model's arg-max index into an action id.
    ///
    /// Indices outside the action space are clamped to the safe default
    /// rather than leaking arbitrary numbers to the server.
    pub fn from_index(index: usize) -> Self {
        if index < Self::COUNT {
            ActionId(index as u8)
        } else {
            Self::safe_default()
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn is_traditional_ai(self) -> bool {
        self == Self::TRADITIONAL_AI
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "idle",
            1 => "attack",
            2 => "move_closer",
            3 => "move_away",
            4 => "move_random",
            5 => "skill_1",
            6 => "skill_2",
            7 => "skill_3",
            8 => "change_target",
            9 => "flee",
            255 => "traditional_ai",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.0)
    }
}

/// Category label written to `ai_responses.action_type`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr, strum::EnumString)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum ActionType {
    /// Produced by a model (or its cached output)
    Combat,
    /// Produced by the rule table or the traditional-AI sentinel
    Fallback,
    /// Inference failed outright; sentinel returned
    ErrorFallback,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_index_clamps_out_of_range() {
        assert_eq!(ActionId::from_index(1), ActionId::ATTACK);
        assert_eq!(ActionId::from_index(9), ActionId::FLEE);
        assert_eq!(ActionId::from_index(10), ActionId::IDLE);
        assert_eq!(ActionId::from_index(usize::MAX), ActionId::IDLE);
    }

    #[test]
    fn sentinel_is_distinguished() {
        assert!(ActionId::TRADITIONAL_AI.is_traditional_ai());
        assert!(!ActionId::IDLE.is_traditional_ai());
        assert_eq!(ActionId::TRADITIONAL_AI.to_string(), "traditional_ai(255)");
    }
}
