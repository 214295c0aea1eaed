//! Inter-monster signals and their fixed-width encoding.
//!
//! Signal vector layout:
//!
//! | dims   | meaning                                   |
//! |--------|-------------------------------------------|
//! | 0..8   | target information, bucketed by threat    |
//! | 8..16  | formation commands                        |
//! | 16..24 | support requests, bucketed by urgency     |
//! | 24..32 | strategic directives (retreat, regroup, …) |

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use mob_ai_core::MonsterId;

use super::{SIGNAL_DIM, SignalSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Formation {
    Flanking,
    DefensiveCircle,
    SpreadOut,
    TightCluster,
    Line,
    V,
    Surround,
    Other,
}

impl Formation {
    fn slot(self) -> usize {
        8 + match self {
            Formation::Flanking => 0,
            Formation::DefensiveCircle => 1,
            Formation::SpreadOut => 2,
            Formation::TightCluster => 3,
            Formation::Line => 4,
            Formation::V => 5,
            Formation::Surround => 6,
            Formation::Other => 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SignalKind {
    AttackTarget { target_threat: f32, target_priority: f32 },
    FocusFire { target_threat: f32, target_priority: f32 },
    FormUp { formation: Formation, assigned_position: bool },
    FlankManeuver { formation: Formation, assigned_position: bool },
    HelpRequest { urgency: f32 },
    DefendLeader { urgency: f32 },
    Retreat { intensity: f32 },
    Regroup { intensity: f32 },
    Hold { intensity: f32 },
    DangerAlert { danger_level: f32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signal {
    pub sender: MonsterId,
    pub kind: SignalKind,
    /// 1 (highest) to 10 (lowest).
    pub priority: u8,
}

impl Signal {
    pub fn new(sender: MonsterId, kind: SignalKind, priority: u8) -> Self {
        Self {
            sender,
            kind,
            priority: priority.clamp(1, 10),
        }
    }

    /// 1.0 at priority 1, 0.0 at priority 10.
    fn weight(&self) -> f32 {
        1.0 - (self.priority.clamp(1, 10) - 1) as f32 / 9.0
    }
}

fn bucket(value: f32) -> usize {
    ((value.clamp(0.0, 1.0) * 7.0) as usize).min(7)
}

/// Folds `signals` into one [`SIGNAL_DIM`]-wide vector.
pub fn aggregate_signals(signals: &[Signal]) -> Vec<f32> {
    let mut v = vec![0.0f32; SIGNAL_DIM];
    for signal in signals {
        let w = signal.weight();
        match signal.kind {
            SignalKind::AttackTarget {
                target_threat,
                target_priority,
            }
            | SignalKind::FocusFire {
                target_threat,
                target_priority,
            } => {
                let idx = bucket(target_threat);
                v[idx] = v[idx].max(target_priority * w);
            }
            SignalKind::FormUp {
                formation,
                assigned_position,
            }
            | SignalKind::FlankManeuver {
                formation,
                assigned_position,
            } => {
                let idx = formation.slot();
                v[idx] = if assigned_position { (w + 0.5).min(1.0) } else { w };
            }
            SignalKind::HelpRequest { urgency } | SignalKind::DefendLeader { urgency } => {
                let idx = 16 + bucket(urgency);
                v[idx] = v[idx].max(urgency * w);
            }
            SignalKind::Retreat { intensity } => v[24] = (w * intensity).min(1.0),
            SignalKind::Regroup { intensity } => v[25] = (w * intensity).min(1.0),
            SignalKind::Hold { intensity } => v[26] = (w * intensity).min(1.0),
            SignalKind::DangerAlert { danger_level } => v[24] = v[24].max(danger_level * w),
        }
    }
    v
}

/// Process-local signal mailbox per monster.
#[derive(Debug, Default)]
pub struct InMemorySignalBoard {
    inbox: Mutex<HashMap<MonsterId, Vec<Signal>>>,
}

impl InMemorySignalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, to: MonsterId, signal: Signal) {
        self.inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(to)
            .or_default()
            .push(signal);
    }

    /// Delivers `signal` to every recipient except its sender.
    pub fn broadcast(&self, recipients: &[MonsterId], signal: Signal) {
        for &to in recipients.iter().filter(|&&to| to != signal.sender) {
            self.send(to, signal.clone());
        }
    }

    pub fn clear(&self, monster: MonsterId) {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).remove(&monster);
    }
}

#[async_trait]
impl SignalSource for InMemorySignalBoard {
    async fn signal_vectors(&self, monster_ids: &[MonsterId]) -> HashMap<MonsterId, Vec<f32>> {
        let inbox = self.inbox.lock().unwrap_or_else(|e| e.into_inner());
        monster_ids
            .iter()
            .filter_map(|id| inbox.get(id).map(|signals| (*id, aggregate_signals(signals))))
            .collect()
    }
}
