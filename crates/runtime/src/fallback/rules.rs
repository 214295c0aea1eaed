//! Deterministic rule table used at RULE_BASED_ML.

use mob_ai_core::ActionId;

/// State-vector slots read by the rule table.
pub mod features {
    pub const HP_RATIO: usize = 0;
    pub const SP_RATIO: usize = 1;
    pub const NEAREST_ENEMY_DISTANCE: usize = 30;
    pub const THREAT_LEVEL: usize = 32;
}

/// Features the rule table consumes, with defaults for short vectors.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RuleFeatures {
    pub hp: f32,
    pub sp: f32,
    pub enemy_distance: f32,
    pub threat: f32,
}

impl RuleFeatures {
    pub fn from_state(state: &[f32]) -> Self {
        let at = |index: usize, default: f32| state.get(index).copied().unwrap_or(default);
        Self {
            hp: at(features::HP_RATIO, 1.0),
            sp: at(features::SP_RATIO, 1.0),
            enemy_distance: at(features::NEAREST_ENEMY_DISTANCE, 10.0),
            threat: at(features::THREAT_LEVEL, 0.0),
        }
    }
}

/// Picks an action from hand-written thresholds. First matching rule wins.
pub fn rule_based_action(state: &[f32]) -> ActionId {
    let f = RuleFeatures::from_state(state);

    if f.hp < 0.2 {
        return ActionId::FLEE;
    }
    if f.hp < 0.3 && f.threat > 0.7 {
        return ActionId::MOVE_AWAY;
    }
    if f.threat > 0.8 {
        return ActionId::MOVE_AWAY;
    }
    if f.enemy_distance < 0.1 {
        return ActionId::ATTACK;
    }
    if f.enemy_distance < 0.3 {
        return if f.sp > 0.3 {
            ActionId::SKILL_1
        } else {
            ActionId::ATTACK
        };
    }
    if f.enemy_distance < 0.6 {
        return ActionId::MOVE_CLOSER;
    }
    ActionId::MOVE_RANDOM
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(hp: f32, sp: f32, distance: f32, threat: f32) -> Vec<f32> {
        let mut s = vec![0.0; 64];
        s[features::HP_RATIO] = hp;
        s[features::SP_RATIO] = sp;
        s[features::NEAREST_ENEMY_DISTANCE] = distance;
        s[features::THREAT_LEVEL] = threat;
        s
    }

    #[test]
    fn rule_table() {
        assert_eq!(rule_based_action(&state(0.1, 1.0, 0.05, 0.0)), ActionId::FLEE);
        assert_eq!(rule_based_action(&state(0.25, 1.0, 0.05, 0.75)), ActionId::MOVE_AWAY);
        assert_eq!(rule_based_action(&state(0.9, 1.0, 0.05, 0.85)), ActionId::MOVE_AWAY);
        assert_eq!(rule_based_action(&state(0.9, 1.0, 0.05, 0.1)), ActionId::ATTACK);
        assert_eq!(rule_based_action(&state(0.9, 0.5, 0.2, 0.1)), ActionId::SKILL_1);
        assert_eq!(rule_based_action(&state(0.9, 0.2, 0.2, 0.1)), ActionId::ATTACK);
        assert_eq!(rule_based_action(&state(0.9, 0.5, 0.5, 0.1)), ActionId::MOVE_CLOSER);
        assert_eq!(rule_based_action(&state(0.9, 0.5, 0.9, 0.1)), ActionId::MOVE_RANDOM);
    }

    #[test]
    fn short_state_uses_defaults() {
        // hp 1.0, distance 10.0, threat 0.0
        assert_eq!(rule_based_action(&[]), ActionId::MOVE_RANDOM);
        assert_eq!(rule_based_action(&[0.1]), ActionId::FLEE);
    }
}
