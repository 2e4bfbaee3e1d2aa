//! # NMEA 0183 GPS receiver
//!
//! The receiver streams sentences over a serial line, which the operating system exposes as a
//! readable device. Only two sentences are used:
//!
//! - `RMC`: position, speed, course, date and time. Every valid RMC produces a reading.
//! - `GGA`: fix quality, satellites in use and altitude. The latest GGA is merged into the
//!   following RMC.
//!
//! Everything else, and every sentence with a bad checksum, is skipped.
//!
//! Reads never block forever: the serial device is opened with a read timeout, lines are capped
//! in length, and a read in progress can be interrupted through
//! [`SensorDriver::interrupter`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use comms_if::{msg::GpsMessage, net::Interrupt};
use log::{debug, trace};
use serialport::SerialPort;
use std::{
    io::{BufRead, BufReader, ErrorKind},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{Reading, SensorDriver, SensorError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of lines consumed by a single read before giving up on finding an RMC.
///
/// A receiver sends roughly ten sentences per fix, so this is a few fixes worth.
const MAX_LINES_PER_READ: usize = 64;

/// Longest line kept. NMEA 0183 sentences are at most 82 characters, anything longer is noise
/// (usually a wrong baud rate) and is cut into lines of this length.
const MAX_LINE_LEN: usize = 128;

/// Time the serial device may stay silent before a read fails.
const SERIAL_READ_TIMEOUT: Duration = Duration::from_millis(1000);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A GPS receiver read from a stream of NMEA sentences.
pub struct NmeaGps<R: BufRead + Send> {
    reader: R,

    /// Bytes of the line currently being received
    partial: Vec<u8>,

    last_gga: Option<GgaFix>,

    /// Set once the driver is interrupted, every later read fails
    interrupted: Arc<AtomicBool>,

    /// Unblocks a read waiting on the underlying stream
    release: Option<Arc<dyn Interrupt>>,
}

/// Interrupts the reads of an [`NmeaGps`].
struct GpsInterrupt {
    interrupted: Arc<AtomicBool>,

    release: Option<Arc<dyn Interrupt>>,
}

/// The parts of an RMC sentence which make up a reading.
#[derive(Debug, Clone, PartialEq)]
struct RmcFix {
    latitude_deg: f64,
    longitude_deg: f64,
    speed_kn: f64,
    course_deg: Option<f64>,
    utc: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GgaFix {
    fix_quality: u8,
    satellites: Option<u8>,
    altitude_m: Option<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Sentence {
    /// An RMC with a valid fix
    Rmc(RmcFix),

    /// An RMC with the void status, the receiver has no fix
    RmcVoid,

    Gga(GgaFix),

    Other(String),
}

#[derive(thiserror::Error, Debug, PartialEq)]
enum NmeaError {
    #[error("Sentence does not start with '$'")]
    NoStart,

    #[error("Sentence has no checksum")]
    NoChecksum,

    #[error("Checksum mismatch: computed {0:02X}, sentence has {1}")]
    ChecksumMismatch(u8, String),

    #[error("Field {0} of a {1} sentence is missing or invalid")]
    InvalidField(usize, &'static str),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NmeaGps<BufReader<Box<dyn SerialPort>>> {
    /// Open the receiver's serial device, such as `/dev/serial0`, at the given baud rate.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, SensorError> {
        let port = serialport::new(path, baud_rate)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()
            .map_err(|e| SensorError::DeviceUnavailable(format!("{}: {}", path, e)))?;

        Ok(Self::new(BufReader::new(port)))
    }
}

impl<R: BufRead + Send> NmeaGps<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            partial: Vec::with_capacity(MAX_LINE_LEN),
            last_gga: None,
            interrupted: Arc::new(AtomicBool::new(false)),
            release: None,
        }
    }

    /// Use `release` to unblock a read waiting on the stream when the driver is interrupted.
    ///
    /// Needed for streams without a read timeout, which would otherwise only notice the
    /// interrupt once more data arrives.
    pub fn with_release(mut self, release: Box<dyn Interrupt>) -> Self {
        self.release = Some(Arc::from(release));
        self
    }

    /// Read the next line, without its terminator.
    fn next_line(&mut self) -> Result<String, SensorError> {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                return Err(SensorError::DeviceReadFailure(String::from(
                    "The read was interrupted",
                )));
            }

            let (used, complete) = {
                let available = match self.reader.fill_buf() {
                    Ok(b) => b,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                        return Err(SensorError::DeviceReadFailure(String::from(
                            "No data from the receiver",
                        )))
                    }
                    Err(e) => return Err(SensorError::DeviceReadFailure(e.to_string())),
                };

                if available.is_empty() {
                    return Err(SensorError::DeviceReadFailure(String::from(
                        "End of the NMEA stream",
                    )));
                }

                // partial is always shorter than the limit here
                let room = MAX_LINE_LEN - self.partial.len();
                let chunk = &available[..available.len().min(room)];

                match chunk.iter().position(|&b| b == b'\n') {
                    Some(i) => {
                        self.partial.extend_from_slice(&chunk[..i]);
                        (i + 1, true)
                    }
                    None => {
                        self.partial.extend_from_slice(chunk);
                        (chunk.len(), self.partial.len() >= MAX_LINE_LEN)
                    }
                }
            };
            self.reader.consume(used);

            if complete {
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                return Ok(line);
            }
        }
    }
}

impl<R: BufRead + Send> SensorDriver for NmeaGps<R> {
    fn read(&mut self) -> Result<Reading, SensorError> {
        for _ in 0..MAX_LINES_PER_READ {
            let line = self.next_line()?;

            let sentence = match parse_sentence(line.trim()) {
                Ok(s) => s,
                Err(e) => {
                    debug!("Skipping NMEA sentence {:?}: {}", line.trim(), e);
                    continue;
                }
            };

            match sentence {
                Sentence::Rmc(rmc) => return Ok(Reading::Position(self.merge(rmc))),
                Sentence::RmcVoid => {
                    return Err(SensorError::DeviceReadFailure(String::from(
                        "The receiver has no fix",
                    )))
                }
                Sentence::Gga(gga) => self.last_gga = Some(gga),
                Sentence::Other(kind) => trace!("Ignoring {} sentence", kind),
            }
        }

        Err(SensorError::DeviceReadFailure(format!(
            "No RMC sentence in {} lines",
            MAX_LINES_PER_READ
        )))
    }

    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        Some(Box::new(GpsInterrupt {
            interrupted: self.interrupted.clone(),
            release: self.release.clone(),
        }))
    }
}

impl Interrupt for GpsInterrupt {
    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);

        if let Some(r) = &self.release {
            r.interrupt();
        }
    }
}

impl<R: BufRead + Send> NmeaGps<R> {
    fn merge(&self, rmc: RmcFix) -> GpsMessage {
        GpsMessage {
            latitude_deg: rmc.latitude_deg,
            longitude_deg: rmc.longitude_deg,
            altitude_m: self.last_gga.and_then(|g| g.altitude_m),
            speed_kn: rmc.speed_kn,
            course_deg: rmc.course_deg,
            satellites: self.last_gga.and_then(|g| g.satellites),
            // An RMC with status A is at least a GPS fix
            fix_quality: self.last_gga.map(|g| g.fix_quality).unwrap_or(1),
            utc: rmc.utc,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Verify the checksum of a sentence and parse it.
fn parse_sentence(line: &str) -> Result<Sentence, NmeaError> {
    let body = line.strip_prefix('$').ok_or(NmeaError::NoStart)?;
    let (body, checksum) = match body.rfind('*') {
        Some(i) => (&body[..i], &body[i + 1..]),
        None => return Err(NmeaError::NoChecksum),
    };

    let computed = body.bytes().fold(0u8, |acc, b| acc ^ b);
    match u8::from_str_radix(checksum, 16) {
        Ok(c) if c == computed => (),
        _ => return Err(NmeaError::ChecksumMismatch(computed, checksum.to_string())),
    }

    let fields: Vec<&str> = body.split(',').collect();

    // Talker ID (GP, GN, ...) is ignored, only the sentence type matters
    let kind = fields[0].get(2..).unwrap_or("");

    match kind {
        "RMC" => parse_rmc(&fields),
        "GGA" => parse_gga(&fields).map(Sentence::Gga),
        _ => Ok(Sentence::Other(fields[0].to_string())),
    }
}

fn parse_rmc(fields: &[&str]) -> Result<Sentence, NmeaError> {
    const KIND: &str = "RMC";

    match field(fields, 2) {
        Some("A") => (),
        Some("V") => return Ok(Sentence::RmcVoid),
        _ => return Err(NmeaError::InvalidField(2, KIND)),
    }

    let latitude_deg = coordinate(field(fields, 3), field(fields, 4), 'S')
        .ok_or(NmeaError::InvalidField(3, KIND))?;
    let longitude_deg = coordinate(field(fields, 5), field(fields, 6), 'W')
        .ok_or(NmeaError::InvalidField(5, KIND))?;

    let speed_kn = match field(fields, 7) {
        Some(s) => s.parse().map_err(|_| NmeaError::InvalidField(7, KIND))?,
        None => 0.0,
    };
    let course_deg = match field(fields, 8) {
        Some(s) => Some(s.parse().map_err(|_| NmeaError::InvalidField(8, KIND))?),
        None => None,
    };

    let utc = utc_time(field(fields, 1), field(fields, 9));

    Ok(Sentence::Rmc(RmcFix {
        latitude_deg,
        longitude_deg,
        speed_kn,
        course_deg,
        utc,
    }))
}

fn parse_gga(fields: &[&str]) -> Result<GgaFix, NmeaError> {
    const KIND: &str = "GGA";

    let fix_quality = field(fields, 6)
        .and_then(|s| s.parse().ok())
        .ok_or(NmeaError::InvalidField(6, KIND))?;

    Ok(GgaFix {
        fix_quality,
        satellites: field(fields, 7).and_then(|s| s.parse().ok()),
        altitude_m: field(fields, 9).and_then(|s| s.parse().ok()),
    })
}

/// A field of the sentence, `None` if it is absent or empty.
fn field<'a>(fields: &[&'a str], index: usize) -> Option<&'a str> {
    fields.get(index).copied().filter(|f| !f.is_empty())
}

/// Convert a `(d)ddmm.mmmm` coordinate and its hemisphere into signed decimal degrees.
fn coordinate(value: Option<&str>, hemisphere: Option<&str>, negative: char) -> Option<f64> {
    let raw: f64 = value?.parse().ok()?;
    let hemisphere = hemisphere?.chars().next()?;

    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    match hemisphere == negative {
        true => Some(-decimal),
        false => Some(decimal),
    }
}

/// Combine the `hhmmss.ss` time and `ddmmyy` date fields.
fn utc_time(time: Option<&str>, date: Option<&str>) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(time?, "%H%M%S%.f").ok()?;
    let date = NaiveDate::parse_from_str(date?, "%d%m%y").ok()?;

    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Datelike, Timelike};
    use std::{
        io::Cursor,
        net::Shutdown,
        os::unix::net::UnixStream,
    };

    /// Wrap a sentence body with its start marker and a valid checksum.
    fn sentence(body: &str) -> String {
        let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
        format!("${}*{:02X}\r\n", body, checksum)
    }

    const RMC: &str = "GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";
    const GGA: &str = "GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,";

    #[test]
    fn test_known_checksum() {
        // Reference sentence with its published checksum
        assert!(parse_sentence(
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"
        )
        .is_ok());
        assert!(matches!(
            parse_sentence("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*48"),
            Err(NmeaError::ChecksumMismatch(0x47, _))
        ));
        assert_eq!(parse_sentence("GPGGA,1*00"), Err(NmeaError::NoStart));
        assert_eq!(parse_sentence("$GPGGA,1"), Err(NmeaError::NoChecksum));
    }

    #[test]
    fn test_coordinates() {
        let lat = coordinate(Some("4807.038"), Some("N"), 'S').unwrap();
        assert!((lat - (48.0 + 7.038 / 60.0)).abs() < 1e-9);

        let lon = coordinate(Some("01131.000"), Some("W"), 'W').unwrap();
        assert!((lon + (11.0 + 31.0 / 60.0)).abs() < 1e-9);

        assert_eq!(coordinate(Some(""), Some("N"), 'S'), None);
        assert_eq!(coordinate(Some("4807.038"), None, 'S'), None);
    }

    #[test]
    fn test_rmc_merged_with_gga() {
        let stream = format!(
            "{}garbage line\r\n{}{}",
            sentence("GPGSV,3,1,11,03,03,111,00"),
            sentence(GGA),
            sentence(RMC)
        );
        let mut gps = NmeaGps::new(Cursor::new(stream.into_bytes()));

        let fix = match gps.read().unwrap() {
            Reading::Position(p) => p,
            r => panic!("Expected a position, got {:?}", r),
        };

        assert!((fix.latitude_deg - 48.1173).abs() < 1e-9);
        assert!((fix.longitude_deg - 11.516_666_666_666_667).abs() < 1e-9);
        assert_eq!(fix.speed_kn, 22.4);
        assert_eq!(fix.course_deg, Some(84.4));
        assert_eq!(fix.altitude_m, Some(545.4));
        assert_eq!(fix.satellites, Some(8));
        assert_eq!(fix.fix_quality, 1);

        let utc = fix.utc.unwrap();
        assert_eq!((utc.year(), utc.month(), utc.day()), (1994, 3, 23));
        assert_eq!((utc.hour(), utc.minute(), utc.second()), (12, 35, 19));

        // The stream is exhausted
        assert!(matches!(gps.read(), Err(SensorError::DeviceReadFailure(_))));
    }

    #[test]
    fn test_bad_checksum_skipped() {
        let mut corrupted = sentence(RMC);
        corrupted = corrupted.replace("4807.038", "4907.038");

        let stream = format!("{}{}", corrupted, sentence(RMC));
        let mut gps = NmeaGps::new(Cursor::new(stream.into_bytes()));

        match gps.read().unwrap() {
            Reading::Position(p) => {
                assert!((p.latitude_deg - 48.1173).abs() < 1e-9);
                // No GGA seen yet
                assert_eq!(p.satellites, None);
                assert_eq!(p.altitude_m, None);
            }
            r => panic!("Expected a position, got {:?}", r),
        }
    }

    #[test]
    fn test_void_fix_is_read_failure() {
        let stream = sentence("GPRMC,123519,V,,,,,,,230394,,");
        let mut gps = NmeaGps::new(Cursor::new(stream.into_bytes()));

        assert!(matches!(gps.read(), Err(SensorError::DeviceReadFailure(_))));
    }

    #[test]
    fn test_missing_device() {
        assert!(matches!(
            NmeaGps::open("/dev/definitely_not_a_gps", 9600),
            Err(SensorError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_line_without_newline_is_bounded() {
        // Noise as received at the wrong baud rate, followed by a real sentence
        let mut stream = vec![b'$'; 100 * MAX_LINE_LEN];
        stream.extend_from_slice(b"\r\n");
        stream.extend_from_slice(sentence(RMC).as_bytes());
        let mut gps = NmeaGps::new(Cursor::new(stream));

        match gps.read() {
            Err(SensorError::DeviceReadFailure(e)) => assert!(e.contains("No RMC sentence")),
            r => panic!("Expected a read failure, got {:?}", r),
        }
        assert!(gps.partial.len() < MAX_LINE_LEN);

        // Reading carries on after the noise
        let mut fixes = 0;
        for _ in 0..4 {
            if let Ok(Reading::Position(_)) = gps.read() {
                fixes += 1;
            }
        }
        assert_eq!(fixes, 1);
    }

    #[test]
    fn test_silent_stream_times_out() {
        let (rx, _tx) = UnixStream::pair().unwrap();
        rx.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut gps = NmeaGps::new(BufReader::new(rx));

        match gps.read() {
            Err(SensorError::DeviceReadFailure(e)) => assert!(e.contains("No data")),
            r => panic!("Expected a read failure, got {:?}", r),
        }
    }

    #[test]
    fn test_interrupt_unblocks_read() {
        let (rx, _tx) = UnixStream::pair().unwrap();
        let release = StreamRelease(rx.try_clone().unwrap());
        let mut gps = NmeaGps::new(BufReader::new(rx)).with_release(Box::new(release));
        let interrupter = gps.interrupter().unwrap();

        let reader = std::thread::spawn(move || gps.read());

        std::thread::sleep(Duration::from_millis(50));
        interrupter.interrupt();

        assert!(matches!(
            reader.join().unwrap(),
            Err(SensorError::DeviceReadFailure(_))
        ));
    }

    #[test]
    fn test_interrupted_driver_stops_reading() {
        let mut gps = NmeaGps::new(Cursor::new(sentence(RMC).into_bytes()));
        gps.interrupter().unwrap().interrupt();

        match gps.read() {
            Err(SensorError::DeviceReadFailure(e)) => assert!(e.contains("interrupted")),
            r => panic!("Expected a read failure, got {:?}", r),
        }
    }

    struct StreamRelease(UnixStream);

    impl Interrupt for StreamRelease {
        fn interrupt(&self) {
            self.0.shutdown(Shutdown::Both).ok();
        }
    }
}
