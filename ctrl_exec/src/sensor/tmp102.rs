//! # TMP102 temperature probe
//!
//! The temperature register holds a left aligned two's complement value. In normal mode it is 12
//! bits wide, in extended mode (bit 0 of the register set) it is 13 bits wide. Both have a
//! resolution of 0.0625 °C.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use super::{Reading, SensorDriver, SensorError};
use crate::bus::{DeviceBus, RegisterDevice};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Degrees celsius per count.
pub const RESOLUTION_C: f64 = 0.0625;

const TEMPERATURE_REGISTER: u8 = 0x00;

const EXTENDED_MODE_BIT: u16 = 0x0001;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Tmp102 {
    device: Box<dyn RegisterDevice>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Tmp102 {
    /// Open the probe at the given address.
    pub fn open(bus: &dyn DeviceBus, address: u16) -> Result<Self, SensorError> {
        let device = bus
            .open(address)
            .map_err(|e| SensorError::DeviceUnavailable(e.to_string()))?;

        Ok(Self::new(device))
    }

    /// Use an already opened device.
    pub fn new(device: Box<dyn RegisterDevice>) -> Self {
        Self { device }
    }
}

impl SensorDriver for Tmp102 {
    fn read(&mut self) -> Result<Reading, SensorError> {
        let mut raw = [0u8; 2];
        self.device
            .read_register(TEMPERATURE_REGISTER, &mut raw)
            .map_err(|e| SensorError::DeviceReadFailure(e.to_string()))?;

        Ok(Reading::Temperature(decode_temperature(raw)))
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Sign extend the lowest `bits` bits of `value` into an `i32`.
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

/// Decode the big-endian contents of the temperature register into degrees celsius.
pub fn decode_temperature(raw: [u8; 2]) -> f64 {
    let reg = u16::from_be_bytes(raw);

    let counts = match reg & EXTENDED_MODE_BIT {
        0 => sign_extend((reg >> 4) as u32, 12),
        _ => sign_extend((reg >> 3) as u32, 13),
    };

    counts as f64 * RESOLUTION_C
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::BusError;

    /// Build the register contents for a count, as the device would.
    fn encode(counts: i32, extended: bool) -> [u8; 2] {
        let reg = match extended {
            true => (((counts as u16) & 0x1FFF) << 3) | EXTENDED_MODE_BIT,
            false => ((counts as u16) & 0x0FFF) << 4,
        };
        reg.to_be_bytes()
    }

    struct FixedRegister(Result<[u8; 2], ()>);

    impl RegisterDevice for FixedRegister {
        fn read_register(&mut self, register: u8, buf: &mut [u8]) -> Result<(), BusError> {
            assert_eq!(register, TEMPERATURE_REGISTER);
            match self.0 {
                Ok(raw) => {
                    buf.copy_from_slice(&raw);
                    Ok(())
                }
                Err(_) => Err(BusError::ReadFailed(0x48, register, "nack".into())),
            }
        }

        fn write_register(&mut self, register: u8, _: &[u8]) -> Result<(), BusError> {
            Err(BusError::WriteFailed(0x48, register, "read only".into()))
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7FF, 12), 2047);
        assert_eq!(sign_extend(0x800, 12), -2048);
        assert_eq!(sign_extend(0xFFF, 12), -1);
        assert_eq!(sign_extend(0xFFF, 13), 4095);
        assert_eq!(sign_extend(0x1000, 13), -4096);
        assert_eq!(sign_extend(0x1FFF, 13), -1);
        assert_eq!(sign_extend(0, 13), 0);
    }

    #[test]
    fn test_datasheet_values() {
        // Normal mode
        assert_eq!(decode_temperature([0x7F, 0xF0]), 127.9375);
        assert_eq!(decode_temperature([0x19, 0x00]), 25.0);
        assert_eq!(decode_temperature([0x00, 0x40]), 0.25);
        assert_eq!(decode_temperature([0x00, 0x00]), 0.0);
        assert_eq!(decode_temperature([0xFF, 0xC0]), -0.25);
        assert_eq!(decode_temperature([0xE7, 0x00]), -25.0);
        assert_eq!(decode_temperature([0xC9, 0x00]), -55.0);

        // Extended mode
        assert_eq!(decode_temperature([0x4B, 0x01]), 150.0);
        assert_eq!(decode_temperature([0x0C, 0x81]), 25.0);
        assert_eq!(decode_temperature([0xFF, 0xE1]), -0.25);
        assert_eq!(decode_temperature([0xE4, 0x81]), -55.0);
    }

    #[test]
    fn test_sign_boundaries() {
        assert_eq!(decode_temperature(encode(2047, false)), 127.9375);
        assert_eq!(decode_temperature(encode(-2048, false)), -128.0);
        assert_eq!(decode_temperature(encode(4095, true)), 255.9375);
        assert_eq!(decode_temperature(encode(-4096, true)), -256.0);
    }

    #[test]
    fn test_extended_mode_covers_range() {
        for counts in -4096..=4095 {
            assert_eq!(
                decode_temperature(encode(counts, true)),
                counts as f64 * RESOLUTION_C
            );
        }

        for counts in -2048..=2047 {
            assert_eq!(
                decode_temperature(encode(counts, false)),
                counts as f64 * RESOLUTION_C
            );
        }
    }

    #[test]
    fn test_driver_reads_register() {
        let mut tmp = Tmp102::new(Box::new(FixedRegister(Ok([0x19, 0x00]))));
        assert_eq!(tmp.read().unwrap(), Reading::Temperature(25.0));

        let mut tmp = Tmp102::new(Box::new(FixedRegister(Err(()))));
        assert!(matches!(
            tmp.read(),
            Err(SensorError::DeviceReadFailure(_))
        ));
    }
}
