//! # System level messages

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Human readable status text.
///
/// Also used to report unavailable devices and unsupported requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatusMessage {
    pub text: String,
}

/// Static identity of the controller and the host it runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfoMessage {
    /// Name of the controller, from its parameters
    pub name: String,

    /// Version of the controller software
    pub version: String,

    /// Network name of the host
    pub host: String,

    /// Kernel release of the host
    pub os_release: String,

    /// Machine architecture of the host
    pub machine: String,
}

/// Periodic liveness broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    /// Name of the controller sending the heartbeat
    pub name: String,

    /// Status string at the time of sending
    pub status: String,

    /// Seconds since the controller started
    pub uptime_s: f64,

    /// UTC time at which the heartbeat was built
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SystemStatusMessage {
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self { text: text.into() }
    }
}
