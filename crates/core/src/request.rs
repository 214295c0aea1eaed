//! Inference requests as claimed from the request queue.
//!
//! Rows arrive loosely typed from the store ([`RequestRow`]) and are validated
//! once at the boundary into an immutable [`InferenceRequest`]. Anything that
//! fails validation is rejected there and never reaches the engine.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::archetype::Archetype;

/// Length of the monster feature vector produced by the game server.
pub const STATE_DIM: usize = 64;

pub type RequestId = i64;
pub type MonsterId = i64;

/// Lifecycle status of a queued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::AsRefStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[strum(serialize_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Timeout,
}

impl RequestStatus {
    /// Statuses eligible for retention cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Timeout
        )
    }
}

/// Map position of the monster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Raw request row as returned by the queue store.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestRow {
    pub request_id: RequestId,
    pub monster_id: MonsterId,
    pub mob_id: i32,
    pub archetype: String,
    pub state_vector: Vec<f32>,
    pub spatial_grid: Option<Vec<f32>>,
    /// JSON text of the combat-history blob
    pub combat_history: Option<String>,
    pub pack_leader_id: Option<MonsterId>,
    pub pack_member_ids: Option<Vec<MonsterId>>,
    pub map_id: i32,
    pub position_x: i32,
    pub position_y: i32,
    pub hp_ratio: f32,
    pub sp_ratio: f32,
    pub created_at: DateTime<Utc>,
    pub priority: i32,
}

/// Validation failures at the store boundary.
#[derive(Debug, Error, PartialEq)]
pub enum RequestValidationError {
    #[error("request {request_id}: unknown archetype {archetype:?}")]
    UnknownArchetype {
        request_id: RequestId,
        archetype: String,
    },

    #[error("request {request_id}: state vector has {actual} elements, expected {expected}")]
    StateLength {
        request_id: RequestId,
        expected: usize,
        actual: usize,
    },

    #[error("request {request_id}: non-finite value in {field}")]
    NonFinite {
        request_id: RequestId,
        field: &'static str,
    },

    #[error("request {request_id}: {field} = {value} outside [0, 1]")]
    RatioOutOfRange {
        request_id: RequestId,
        field: &'static str,
        value: f32,
    },
}

impl RequestValidationError {
    pub fn request_id(&self) -> RequestId {
        match self {
            RequestValidationError::UnknownArchetype { request_id, .. }
            | RequestValidationError::StateLength { request_id, .. }
            | RequestValidationError::NonFinite { request_id, .. }
            | RequestValidationError::RatioOutOfRange { request_id, .. } => *request_id,
        }
    }
}

/// Validated, immutable unit of work.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceRequest {
    pub request_id: RequestId,
    pub monster_id: MonsterId,
    pub mob_id: i32,
    pub archetype: Archetype,
    pub state: Vec<f32>,
    pub spatial_grid: Option<Vec<f32>>,
    pub combat_history: Option<String>,
    pub pack_leader_id: Option<MonsterId>,
    pub pack_member_ids: Vec<MonsterId>,
    pub map_id: i32,
    pub position: Position,
    pub hp_ratio: f32,
    pub sp_ratio: f32,
    pub created_at: DateTime<Utc>,
    pub priority: i32,
}

impl InferenceRequest {
    /// Whether this request names a pack it belongs to.
    pub fn is_pack_member(&self) -> bool {
        self.pack_leader_id.is_some() || !self.pack_member_ids.is_empty()
    }

    /// Identifier shared by every member of the same pack: the leader when
    /// known, otherwise the monster itself.
    pub fn pack_key(&self) -> MonsterId {
        self.pack_leader_id.unwrap_or(self.monster_id)
    }
}

impl TryFrom<RequestRow> for InferenceRequest {
    type Error = RequestValidationError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let request_id = row.request_id;

        let archetype = Archetype::from_str(row.archetype.trim()).map_err(|_| {
            RequestValidationError::UnknownArchetype {
                request_id,
                archetype: row.archetype.clone(),
            }
        })?;

        if row.state_vector.len() != STATE_DIM {
            return Err(RequestValidationError::StateLength {
                request_id,
                expected: STATE_DIM,
                actual: row.state_vector.len(),
            });
        }
        if row.state_vector.iter().any(|v| !v.is_finite()) {
            return Err(RequestValidationError::NonFinite {
                request_id,
                field: "state_vector",
            });
        }
        if let Some(grid) = &row.spatial_grid
            && grid.iter().any(|v| !v.is_finite())
        {
            return Err(RequestValidationError::NonFinite {
                request_id,
                field: "spatial_grid",
            });
        }
        for (field, value) in [("hp_ratio", row.hp_ratio), ("sp_ratio", row.sp_ratio)] {
            if !value.is_finite() {
                return Err(RequestValidationError::NonFinite { request_id, field });
            }
            if !(0.0..=1.0).contains(&value) {
                return Err(RequestValidationError::RatioOutOfRange {
                    request_id,
                    field,
                    value,
                });
            }
        }

        Ok(Self {
            request_id,
            monster_id: row.monster_id,
            mob_id: row.mob_id,
            archetype,
            state: row.state_vector,
            spatial_grid: row.spatial_grid,
            combat_history: row.combat_history,
            pack_leader_id: row.pack_leader_id,
            pack_member_ids: row.pack_member_ids.unwrap_or_default(),
            map_id: row.map_id,
            position: Position::new(row.position_x, row.position_y),
            hp_ratio: row.hp_ratio,
            sp_ratio: row.sp_ratio,
            created_at: row.created_at,
            priority: row.priority,
        })
    }
}
