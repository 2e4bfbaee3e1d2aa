//! [`ServoDriver`] implementation for the PCA9685 driver

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use embedded_hal::blocking::i2c::{Write, WriteRead};
use pwm_pca9685::{Channel, Pca9685};

use super::{EscConfig, MotorOutput, ServoDriver, ServoError};

#[cfg(target_arch = "arm")]
use super::EscOutput;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Largest value of the 12 bit off counter.
const MAX_PWM: u16 = 4095;

/// Frequency of the PCA9685's internal oscillator.
const OSC_CLOCK_HZ: f64 = 25_000_000.0;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> ServoDriver for Pca9685<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>
{
    type Channel = Channel;

    fn set_duty_cycle(
        &mut self,
        channel: Self::Channel,
        duty_cycle: f64
    ) -> Result<(), ServoError> {

        // If the duty cycle is out of range return an error
        if duty_cycle < 0.0 || duty_cycle > 1.0 {
            return Err(ServoError::InvalidDutyCycle)
        }

        // Pulse starts at the beginning of the period and ends at the duty cycle
        match self.set_channel_on_off(
            channel,
            0,
            (duty_cycle*(MAX_PWM as f64)).round() as u16
        ) {
            Ok(_) => Ok(()),
            Err(pwm_pca9685::Error::I2C(_)) => Err(ServoError::I2c),
            Err(pwm_pca9685::Error::InvalidInputData) => Err(ServoError::InvalidDutyCycle)
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Get the channel with the given index.
pub fn channel(index: u8) -> Result<Channel, ServoError> {
    Ok(match index {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        i => return Err(ServoError::InvalidChannel(i))
    })
}

/// Prescale register value which gives the closest PWM frequency to the one requested.
///
/// The device only accepts values from 3 to 255, giving roughly 24 Hz to 1526 Hz.
pub fn prescale(pwm_freq_hz: f64) -> Option<u8> {
    let prescale = (OSC_CLOCK_HZ / (4096.0 * pwm_freq_hz)).round() - 1.0;

    match prescale >= 3.0 && prescale <= 255.0 {
        true => Some(prescale as u8),
        false => None
    }
}

/// Open the PCA9685 board on the given I2C bus and drive the ESCs from two of its channels.
#[cfg(target_arch = "arm")]
pub fn open_esc_board(
    bus: u8,
    address: u8,
    left: u8,
    right: u8,
    config: EscConfig
) -> Result<Box<dyn MotorOutput>, ServoError> {
    let unavailable = |e: String| ServoError::DeviceUnavailable(e);

    let prescale = prescale(config.pwm_freq_hz)
        .ok_or_else(|| unavailable(format!("Unsupported PWM frequency {} Hz", config.pwm_freq_hz)))?;

    let i2c = rppal::i2c::I2c::with_bus(bus)
        .map_err(|e| unavailable(e.to_string()))?;
    let mut pwm = Pca9685::new(i2c, address)
        .map_err(|e| unavailable(format!("{:?}", e)))?;

    pwm.set_prescale(prescale)
        .map_err(|e| unavailable(format!("{:?}", e)))?;
    pwm.enable()
        .map_err(|e| unavailable(format!("{:?}", e)))?;

    Ok(Box::new(EscOutput::new(pwm, channel(left)?, channel(right)?, config)))
}

/// No PCA9685 board can be opened when not running on the drone.
#[cfg(not(target_arch = "arm"))]
pub fn open_esc_board(
    _bus: u8,
    address: u8,
    _left: u8,
    _right: u8,
    _config: EscConfig
) -> Result<Box<dyn MotorOutput>, ServoError> {
    Err(ServoError::DeviceUnavailable(format!(
        "No I2C bus for the PCA9685 at 0x{:02X} on this host",
        address
    )))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
