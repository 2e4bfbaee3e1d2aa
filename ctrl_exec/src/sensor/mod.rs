//! # Sensor Adapters
//!
//! A sensor adapter wraps one device. It polls the device from its own thread and caches the
//! last reading, so that requests for the sensor's data are always answered from the cache and
//! never wait on the hardware.
//!
//! If the device can't be opened the adapter is permanently unavailable and no thread is started.
//! A failed read only marks the reading unavailable until the next successful poll.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// HMC5883L magnetic compass
pub mod compass;

/// NMEA 0183 GPS receiver
pub mod gps;

/// TMP102 temperature probe
pub mod tmp102;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{DateTime, Utc};
use comms_if::{
    msg::{CompassMessage, GpsMessage, Message, MessageTypeQuery, TemperatureMessage},
    net::Interrupt,
};
use log::{debug, info, warn};
use std::{
    sync::{Arc, RwLock},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::state::ShutdownSignal;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A driver for one sensor device.
///
/// The device is released when the driver is dropped.
pub trait SensorDriver: Send {
    /// Read a new value from the device. May block on the hardware.
    fn read(&mut self) -> Result<Reading, SensorError>;

    /// A handle which makes a blocked `read` return, for devices whose reads can wait on the
    /// outside world. Once interrupted the driver is only dropped.
    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        None
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The cached state of a sensor, as seen by readers.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    /// Last value successfully read from the device, if any
    pub value: Option<Reading>,

    /// Time at which `value` was read
    pub last_updated: Option<DateTime<Utc>>,

    /// False if the device is absent or the last read failed
    pub available: bool,
}

/// Polls a driver, updating the shared cache with the result.
pub struct SensorPoller<D: SensorDriver> {
    name: String,

    driver: D,

    cache: Arc<RwLock<SensorReading>>,
}

/// Read only view of an adapter which answers requests for its data.
#[derive(Clone)]
pub struct SensorProvider {
    name: String,

    query: MessageTypeQuery,

    device_open: bool,

    cache: Arc<RwLock<SensorReading>>,
}

/// A sensor adapter, owning the polling thread of one device.
pub struct SensorAdapter {
    provider: SensorProvider,

    poll_thread: Option<JoinHandle<()>>,

    interrupter: Option<Box<dyn Interrupt>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A value read from a sensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Temperature(f64),
    Heading(f64),
    Position(GpsMessage),
}

#[derive(thiserror::Error, Debug)]
pub enum SensorError {
    #[error("The device is unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Could not read from the device: {0}")]
    DeviceReadFailure(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Reading {
    /// Build the response message carrying this reading.
    pub fn to_message(&self) -> Message {
        match self {
            Reading::Temperature(c) => Message::Temperature(TemperatureMessage { celsius: *c }),
            Reading::Heading(h) => Message::Compass(CompassMessage { heading_deg: *h }),
            Reading::Position(p) => Message::Gps(p.clone()),
        }
    }
}

impl Default for SensorReading {
    fn default() -> Self {
        Self {
            value: None,
            last_updated: None,
            available: false,
        }
    }
}

impl SensorDriver for Box<dyn SensorDriver> {
    fn read(&mut self) -> Result<Reading, SensorError> {
        (**self).read()
    }

    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        (**self).interrupter()
    }
}

impl<D: SensorDriver> SensorPoller<D> {
    pub fn new(name: &str, driver: D, cache: Arc<RwLock<SensorReading>>) -> Self {
        Self {
            name: String::from(name),
            driver,
            cache,
        }
    }

    /// Read the device once and update the cache.
    ///
    /// On failure the previous value is kept but marked unavailable.
    pub fn poll(&mut self) -> Result<Reading, SensorError> {
        let result = self.driver.read();

        let mut cache = match self.cache.write() {
            Ok(c) => c,
            Err(p) => p.into_inner(),
        };

        match &result {
            Ok(r) => {
                cache.value = Some(r.clone());
                cache.last_updated = Some(Utc::now());
                cache.available = true;
            }
            Err(e) => {
                warn!("[{}] {}", self.name, e);
                cache.available = false;
            }
        }

        result
    }
}

impl SensorProvider {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> MessageTypeQuery {
        self.query
    }

    /// True if the device opened and its last read succeeded.
    pub fn is_available(&self) -> bool {
        self.device_open && self.snapshot().available
    }

    /// A copy of the cached reading.
    pub fn snapshot(&self) -> SensorReading {
        match self.cache.read() {
            Ok(c) => c.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    /// The message carrying the latest reading, or `None` if the sensor is unavailable.
    pub fn latest(&self) -> Option<Message> {
        if !self.device_open {
            return None;
        }

        let snapshot = self.snapshot();
        match (snapshot.available, snapshot.value) {
            (true, Some(r)) => Some(r.to_message()),
            _ => None,
        }
    }

    /// Answer an information request for this sensor's data from the cache.
    ///
    /// Returns `None` for any other message.
    pub fn answer(&self, msg: &Message) -> Option<Message> {
        match msg {
            Message::InformationRequest(req) if req.query == self.query => {
                Some(self.latest().unwrap_or_else(|| {
                    Message::status(format!(
                        "[{}] Unable to send {} data",
                        self.name,
                        self.query.name()
                    ))
                }))
            }
            _ => None,
        }
    }
}

impl SensorAdapter {
    /// Start an adapter for a device.
    ///
    /// ## Arguments
    /// - `name`: name of the sensor, used in logs and status messages
    /// - `query`: the request category this sensor answers
    /// - `opened`: the result of opening the device's driver
    /// - `period`: time between polls
    /// - `shutdown`: the poll thread exits when this is triggered
    pub fn start<D>(
        name: &str,
        query: MessageTypeQuery,
        opened: Result<D, SensorError>,
        period: Duration,
        shutdown: ShutdownSignal,
    ) -> Self
    where
        D: SensorDriver + 'static,
    {
        let cache = Arc::new(RwLock::new(SensorReading::default()));

        let (device_open, poll_thread, interrupter) = match opened {
            Ok(driver) => {
                let interrupter = driver.interrupter();
                let mut poller = SensorPoller::new(name, driver, cache.clone());
                let spawned = thread::Builder::new()
                    .name(format!("poll_{}", name))
                    .spawn(move || poll_loop(&mut poller, period, shutdown));

                match spawned {
                    Ok(jh) => (true, Some(jh), interrupter),
                    Err(e) => {
                        warn!("[{}] Could not start the poll thread: {}", name, e);
                        (false, None, None)
                    }
                }
            }
            Err(e) => {
                warn!("[{}] {}", name, e);
                (false, None, None)
            }
        };

        Self {
            provider: SensorProvider {
                name: String::from(name),
                query,
                device_open,
                cache,
            },
            poll_thread,
            interrupter,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_available()
    }

    /// True if the device was opened, regardless of the last read.
    pub fn device_open(&self) -> bool {
        self.provider.device_open
    }

    pub fn answer(&self, msg: &Message) -> Option<Message> {
        self.provider.answer(msg)
    }

    /// A provider answering from this adapter's cache.
    pub fn provider(&self) -> SensorProvider {
        self.provider.clone()
    }

    /// Wait for the poll thread to exit, releasing the device.
    ///
    /// A read in progress is interrupted if the driver supports it, otherwise it is waited for.
    /// The shutdown signal given to [`SensorAdapter::start`] must have been triggered.
    pub fn join(mut self) {
        self.join_poll_thread();
    }

    fn join_poll_thread(&mut self) {
        if let Some(jh) = self.poll_thread.take() {
            if let Some(i) = &self.interrupter {
                i.interrupt();
            }

            if jh.join().is_err() {
                warn!("[{}] Poll thread panicked", self.provider.name);
            }
        }
    }
}

impl Drop for SensorAdapter {
    fn drop(&mut self) {
        self.join_poll_thread();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn poll_loop<D: SensorDriver>(
    poller: &mut SensorPoller<D>,
    period: Duration,
    shutdown: ShutdownSignal,
) {
    debug!("[{}] Polling every {:?}", poller.name, period);

    while !shutdown.is_triggered() {
        // Failures are logged by the poller, polling carries on regardless
        poller.poll().ok();

        if shutdown.wait_timeout(period) {
            break;
        }
    }

    info!("[{}] Poll thread stopped", poller.name);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
