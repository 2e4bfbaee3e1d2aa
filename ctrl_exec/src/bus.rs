//! # Device Bus
//!
//! Register level access to devices. Sensor drivers only see the [`RegisterDevice`] trait, the
//! concrete bus is the I2C bus of the Raspberry Pi, which is only available when building for
//! ARM. On any other host opening a device fails, and the sensors built on it report themselves
//! unavailable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

#[cfg(target_arch = "arm")]
use rppal::i2c::I2c;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A device whose data is accessed through numbered registers.
pub trait RegisterDevice: Send {
    /// Read `buf.len()` bytes starting at the given register.
    fn read_register(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError>;

    /// Write bytes starting at the given register.
    fn write_register(&mut self, register: u8, data: &[u8]) -> Result<(), BusError>;
}

/// A bus on which devices can be opened by address.
pub trait DeviceBus {
    fn open(&self, address: u16) -> Result<Box<dyn RegisterDevice>, BusError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An I2C bus of the host, identified by its number (`/dev/i2c-<bus>`).
pub struct I2cBus {
    bus: u8,
}

/// One device on an [`I2cBus`].
#[cfg(target_arch = "arm")]
struct I2cDevice {
    i2c: I2c,

    address: u16,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("No I2C bus is available on this host")]
    NoBus,

    #[error("Could not open the device at 0x{0:02X}: {1}")]
    OpenFailed(u16, String),

    #[error("Could not read register 0x{1:02X} of the device at 0x{0:02X}: {2}")]
    ReadFailed(u16, u8, String),

    #[error("Could not write register 0x{1:02X} of the device at 0x{0:02X}: {2}")]
    WriteFailed(u16, u8, String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl I2cBus {
    pub fn new(bus: u8) -> Self {
        Self { bus }
    }

    /// Number of the bus.
    pub fn bus(&self) -> u8 {
        self.bus
    }
}

#[cfg(target_arch = "arm")]
impl DeviceBus for I2cBus {
    fn open(&self, address: u16) -> Result<Box<dyn RegisterDevice>, BusError> {
        let mut i2c =
            I2c::with_bus(self.bus).map_err(|e| BusError::OpenFailed(address, e.to_string()))?;
        i2c.set_slave_address(address)
            .map_err(|e| BusError::OpenFailed(address, e.to_string()))?;

        Ok(Box::new(I2cDevice { i2c, address }))
    }
}

#[cfg(not(target_arch = "arm"))]
impl DeviceBus for I2cBus {
    fn open(&self, _address: u16) -> Result<Box<dyn RegisterDevice>, BusError> {
        Err(BusError::NoBus)
    }
}

#[cfg(target_arch = "arm")]
impl RegisterDevice for I2cDevice {
    fn read_register(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
        self.i2c
            .write_read(&[register], buf)
            .map_err(|e| BusError::ReadFailed(self.address, register, e.to_string()))
    }

    fn write_register(&mut self, register: u8, data: &[u8]) -> Result<(), BusError> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        frame.push(register);
        frame.extend_from_slice(data);

        self.i2c
            .write(&frame)
            .map(|_| ())
            .map_err(|e| BusError::WriteFailed(self.address, register, e.to_string()))
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[cfg(not(target_arch = "arm"))]
    #[test]
    fn test_no_bus_off_target() {
        let bus = I2cBus::new(1);
        assert_eq!(bus.bus(), 1);
        assert!(matches!(bus.open(0x48), Err(BusError::NoBus)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            BusError::ReadFailed(0x48, 0x00, String::from("timeout")).to_string(),
            "Could not read register 0x00 of the device at 0x48: timeout"
        );
    }
}
