//! # Controller Executable Parameters
//!
//! This module provides the parameters for the controller executable, loaded from
//! `ctrl_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use crate::motor_ctrl::EscConfig;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CtrlExecParams {
    /// Name of the controller, reported in system information and heartbeats
    pub name: String,

    /// Endpoint for the general purpose connection listener, e.g. `0.0.0.0:5000`
    pub general_endpoint: String,

    /// Endpoint for the motor connection listener
    pub motor_endpoint: String,

    pub broadcast: BroadcastParams,

    pub sensors: SensorParams,

    pub motors: MotorParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastParams {
    /// Local address the UDP broadcast socket binds to
    pub udp_bind: String,

    /// Address broadcast datagrams are sent to, e.g. `255.255.255.255:5002`
    pub udp_target: String,

    /// Optional ZeroMQ endpoint to also publish broadcasts on, e.g. `tcp://*:5003`
    #[serde(default)]
    pub zmq_endpoint: Option<String>,

    pub heartbeat_interval_ms: u64,

    pub position_interval_ms: u64,

    pub temperature_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorParams {
    /// Index of the I2C bus the sensors are on
    pub i2c_bus: u8,

    /// Address of the TMP102 temperature sensor
    pub temperature_address: u16,

    pub temperature_period_ms: u64,

    /// Address of the HMC5883L compass
    pub compass_address: u16,

    pub compass_period_ms: u64,

    /// Magnetic declination at the operating site, added to the compass heading.
    ///
    /// Units: degrees
    pub compass_declination_deg: f64,

    /// Serial device the GPS receiver writes NMEA sentences to, e.g. `/dev/serial0`
    pub gps_device: String,

    /// Baud rate of the GPS serial line, most receivers default to 9600
    pub gps_baud_rate: u32,

    pub gps_period_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MotorParams {
    /// Address of the PCA9685 board on the sensor I2C bus
    pub pca9685_address: u8,

    /// PCA9685 channel driving the left ESC
    pub left_channel: u8,

    /// PCA9685 channel driving the right ESC
    pub right_channel: u8,

    /// Maximum time between two applications of the setpoints
    pub refresh_period_ms: u64,

    #[serde(default)]
    pub esc: EscConfig,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParamsError {
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("The left and right motors can't share channel {0}")]
    SharedChannel(u8),

    #[error("PCA9685 channel {0} doesn't exist, channels are 0 to 15")]
    InvalidChannel(u8),

    #[error("Invalid ESC settings: {0}")]
    InvalidEsc(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlExecParams {
    /// Check the parameters are usable.
    pub fn are_valid(&self) -> Result<(), ParamsError> {
        let intervals = [
            ("broadcast.heartbeat_interval_ms", self.broadcast.heartbeat_interval_ms),
            ("broadcast.position_interval_ms", self.broadcast.position_interval_ms),
            ("broadcast.temperature_interval_ms", self.broadcast.temperature_interval_ms),
            ("sensors.temperature_period_ms", self.sensors.temperature_period_ms),
            ("sensors.compass_period_ms", self.sensors.compass_period_ms),
            ("sensors.gps_period_ms", self.sensors.gps_period_ms),
            ("motors.refresh_period_ms", self.motors.refresh_period_ms),
        ];

        if let Some((name, _)) = intervals.iter().find(|(_, v)| *v == 0) {
            return Err(ParamsError::ZeroInterval(name));
        }

        let motors = &self.motors;
        for ch in [motors.left_channel, motors.right_channel].iter() {
            if *ch > 15 {
                return Err(ParamsError::InvalidChannel(*ch));
            }
        }
        if motors.left_channel == motors.right_channel {
            return Err(ParamsError::SharedChannel(motors.left_channel));
        }

        let esc = &motors.esc;
        if esc.pwm_freq_hz <= 0.0 {
            return Err(ParamsError::InvalidEsc(format!(
                "PWM frequency must be positive, got {}",
                esc.pwm_freq_hz
            )));
        }
        if esc.pulse_range_us < 0.0 || esc.pulse_range_us > esc.neutral_pulse_us {
            return Err(ParamsError::InvalidEsc(format!(
                "pulse range {} us must be between 0 and the neutral pulse ({} us)",
                esc.pulse_range_us, esc.neutral_pulse_us
            )));
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
