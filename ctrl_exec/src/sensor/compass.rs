//! # HMC5883L magnetic compass

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::{Reading, SensorDriver, SensorError};
use crate::bus::{DeviceBus, RegisterDevice};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const CONFIG_A_REGISTER: u8 = 0x00;
const CONFIG_B_REGISTER: u8 = 0x01;
const MODE_REGISTER: u8 = 0x02;
const DATA_REGISTER: u8 = 0x03;

/// 8 samples averaged per measurement, 15 Hz output rate, normal measurement.
const CONFIG_A: u8 = 0x70;

/// Gain of 1090 LSB/Gauss.
const CONFIG_B: u8 = 0x20;

const MODE_CONTINUOUS: u8 = 0x00;

/// Value of an axis which over- or underflowed.
const AXIS_OVERFLOW: i16 = -4096;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Hmc5883l {
    device: Box<dyn RegisterDevice>,

    declination_deg: f64,
}

/// Raw field strength on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Axes {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Hmc5883l {
    /// Open the compass at the given address and start continuous measurement.
    ///
    /// `declination_deg` is added to every magnetic heading to give a true heading.
    pub fn open(
        bus: &dyn DeviceBus,
        address: u16,
        declination_deg: f64,
    ) -> Result<Self, SensorError> {
        let device = bus
            .open(address)
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;

        Self::new(device, declination_deg)
    }

    /// Configure an already opened device.
    pub fn new(
        mut device: Box<dyn RegisterDevice>,
        declination_deg: f64,
    ) -> Result<Self, SensorError> {
        for (reg, val) in &[
            (CONFIG_A_REGISTER, CONFIG_A),
            (CONFIG_B_REGISTER, CONFIG_B),
            (MODE_REGISTER, MODE_CONTINUOUS),
        ] {
            device
                .write_register(*reg, &[*val])
                .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;
        }

        Ok(Self {
            device,
            declination_deg,
        })
    }
}

impl SensorDriver for Hmc5883l {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let mut raw = [0u8; 6];
        self.device
            .read_register(DATA_REGISTER, &mut raw)
            .map_err(|e| SensorError::DeviceReadFailure(e.to_string()))?;

        let axes = decode_axes(raw)?;

        Ok(Reading::Heading(heading_deg(&axes, self.declination_deg)))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Decode the six data registers, which are ordered X, Z, Y, each big-endian.
pub fn decode_axes(raw: [u8; 6]) -> Result<Axes, SensorError> {
    let axes = Axes {
        x: i16::from_be_bytes([raw[0], raw[1]]),
        z: i16::from_be_bytes([raw[2], raw[3]]),
        y: i16::from_be_bytes([raw[4], raw[5]]),
    };

    if axes.x == AXIS_OVERFLOW || axes.y == AXIS_OVERFLOW || axes.z == AXIS_OVERFLOW {
        return Err(SensorError::DeviceReadFailure(String::from(
            "Magnetometer axis overflow",
        )));
    }

    Ok(axes)
}

/// Heading in degrees in the range [0, 360) given the field on each axis.
pub fn heading_deg(axes: &Axes, declination_deg: f64) -> f64 {
    let heading = (axes.y as f64).atan2(axes.x as f64).to_degrees() + declination_deg;
    let heading = heading.rem_euclid(360.0);

    // rem_euclid can round up to exactly 360 for tiny negative values
    match heading >= 360.0 {
        true => 0.0,
        false => heading,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
