//! # Actuator commands

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Normalised speed setpoints for the left and right motors.
///
/// Both values are clamped to the range [-1, 1] on construction and on deserialisation. The pair
/// (-1, -1) is the stop sentinel, used for emergency stops and at shutdown, and must be
/// interpreted by actuator drivers as "stop" rather than "full reverse".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawMotorMessage")]
pub struct MotorMessage {
    left: f64,
    right: f64,
}

/// Sets whether the drone updates its entities, and with which time step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetMessage {
    /// Whether the entities should be moved on each update
    pub to_move: bool,

    /// Update time step in milliseconds
    pub time_step_ms: i64,
}

/// Unvalidated form of a [`MotorMessage`] as read from the wire.
#[derive(Deserialize)]
struct RawMotorMessage {
    left: f64,
    right: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotorMessage {
    /// The stop sentinel.
    pub const STOP: MotorMessage = MotorMessage {
        left: -1.0,
        right: -1.0,
    };

    /// Neutral setpoints, the motors are idle but not stopped.
    pub const NEUTRAL: MotorMessage = MotorMessage {
        left: 0.0,
        right: 0.0,
    };

    /// Create a new motor message, clamping both speeds into [-1, 1].
    ///
    /// Non-finite speeds are replaced by 0.
    pub fn new(left: f64, right: f64) -> Self {
        Self {
            left: clamp_speed(left),
            right: clamp_speed(right),
        }
    }

    pub fn left(&self) -> f64 {
        self.left
    }

    pub fn right(&self) -> f64 {
        self.right
    }

    /// Returns true if this message is exactly the stop sentinel.
    pub fn is_stop(&self) -> bool {
        self.left == -1.0 && self.right == -1.0
    }
}

impl Default for MotorMessage {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

impl From<RawMotorMessage> for MotorMessage {
    fn from(raw: RawMotorMessage) -> Self {
        MotorMessage::new(raw.left, raw.right)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.max(-1.0).min(1.0)
    } else {
        0.0
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
