//! # Sensor data responses

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Water (or air) temperature measured by the temperature probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureMessage {
    pub celsius: f64,
}

/// Heading measured by the magnetic compass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompassMessage {
    /// Heading in degrees clockwise from north, in the range [0, 360).
    pub heading_deg: f64,
}

/// A position fix from the GPS receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsMessage {
    /// Latitude in decimal degrees, positive north.
    pub latitude_deg: f64,

    /// Longitude in decimal degrees, positive east.
    pub longitude_deg: f64,

    /// Altitude above mean sea level in meters, if a GGA sentence has been received.
    pub altitude_m: Option<f64>,

    /// Speed over ground in knots.
    pub speed_kn: f64,

    /// Course over ground in degrees, if the receiver reported one.
    pub course_deg: Option<f64>,

    /// Number of satellites in use, if known.
    pub satellites: Option<u8>,

    /// GGA fix quality (0 = invalid, 1 = GPS, 2 = DGPS, ...).
    pub fix_quality: u8,

    /// UTC time of the fix as reported by the receiver.
    pub utc: Option<DateTime<Utc>>,
}
