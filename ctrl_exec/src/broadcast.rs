//! # Broadcasts
//!
//! The controller pushes some of its state to anyone listening without being asked: a heartbeat,
//! its position and the water temperature. Each [`BroadcastMessage`] has its own update interval,
//! and one [`BroadcastScheduler`] thread sends all of them.
//!
//! Each pass of the scheduler sends every message which is due, then sleeps until the next one
//! is. A failed send is logged and counts as sent, so one broken message (or transport) can't
//! change the schedule of the others.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::Utc;
use comms_if::{
    msg::{FrameError, HeartbeatMessage, Message},
    net::BroadcastTransport,
};
use log::{debug, info, warn};
use std::{
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    sensor::SensorProvider,
    state::{ControllerState, ShutdownSignal},
};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Source of time for the scheduler.
pub trait Clock: Send {
    fn now(&self) -> Instant;

    /// Wait for `duration`, or until shutdown. Returns `true` if shutdown has been triggered.
    fn wait(&self, duration: Duration, shutdown: &ShutdownSignal) -> bool;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A message sent periodically.
pub struct BroadcastMessage {
    name: String,

    update_interval: Duration,

    payload: Box<dyn Fn() -> Message + Send>,
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

/// Sends every registered message at its interval.
pub struct BroadcastScheduler<C: Clock> {
    entries: Vec<Entry>,

    transport: Box<dyn BroadcastTransport>,

    clock: C,
}

/// Handle to a scheduler running in its own thread.
pub struct BroadcastThread {
    thread: Option<JoinHandle<()>>,
}

struct Entry {
    message: BroadcastMessage,

    last_sent: Option<Instant>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum BroadcastError {
    #[error("The update interval of {0} must be greater than zero")]
    ZeroInterval(String),

    #[error("Could not encode the {0} broadcast: {1}")]
    EncodeFailed(String, FrameError),

    #[error("Could not start the broadcast thread: {0}")]
    ThreadStartFailed(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl BroadcastMessage {
    /// Create a new broadcast.
    ///
    /// ## Arguments
    /// - `name`: name of the broadcast, for logging
    /// - `update_interval_ms`: time between sends, must be greater than zero
    /// - `payload`: builds the message each time it is sent
    pub fn new<F>(name: &str, update_interval_ms: u64, payload: F) -> Result<Self, BroadcastError>
    where
        F: Fn() -> Message + Send + 'static,
    {
        if update_interval_ms == 0 {
            return Err(BroadcastError::ZeroInterval(String::from(name)));
        }

        Ok(Self {
            name: String::from(name),
            update_interval: Duration::from_millis(update_interval_ms),
            payload: Box::new(payload),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Build the message to send now.
    pub fn payload(&self) -> Message {
        (self.payload)()
    }

    /// Build and encode the message to send now.
    pub fn encode(&self) -> Result<Vec<u8>, BroadcastError> {
        self.payload()
            .encode()
            .map_err(|e| BroadcastError::EncodeFailed(self.name.clone(), e))
    }

    /// The heartbeat: name, status and uptime of the controller.
    pub fn heartbeat(
        state: Arc<ControllerState>,
        update_interval_ms: u64,
    ) -> Result<Self, BroadcastError> {
        Self::new("Heartbeat", update_interval_ms, move || {
            Message::Heartbeat(HeartbeatMessage {
                name: String::from(state.name()),
                status: state.status(),
                uptime_s: state.uptime().as_secs_f64(),
                timestamp: Utc::now(),
            })
        })
    }

    /// The latest reading of a sensor, or a status message while it is unavailable.
    pub fn sensor(
        name: &str,
        sensor: SensorProvider,
        update_interval_ms: u64,
    ) -> Result<Self, BroadcastError> {
        let status = format!("[{}] No {} data available", sensor.name(), sensor.query().name());

        Self::new(name, update_interval_ms, move || {
            sensor
                .latest()
                .unwrap_or_else(|| Message::status(status.clone()))
        })
    }
}

impl fmt::Debug for BroadcastMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastMessage")
            .field("name", &self.name)
            .field("update_interval", &self.update_interval)
            .finish()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wait(&self, duration: Duration, shutdown: &ShutdownSignal) -> bool {
        shutdown.wait_timeout(duration)
    }
}

impl<C: Clock> BroadcastScheduler<C> {
    pub fn new(transport: Box<dyn BroadcastTransport>, clock: C) -> Self {
        Self {
            entries: Vec::new(),
            transport,
            clock,
        }
    }

    /// Add a message to the schedule. It is first sent on the next pass.
    pub fn register(&mut self, message: BroadcastMessage) {
        info!(
            "Broadcasting {} every {:?}",
            message.name, message.update_interval
        );

        self.entries.push(Entry {
            message,
            last_sent: None,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Send every message which is due, returning the time until the next one is.
    ///
    /// Returns zero if nothing is scheduled.
    pub fn run_pass(&mut self) -> Duration {
        let mut next_due: Option<Duration> = None;

        for entry in self.entries.iter_mut() {
            let now = self.clock.now();
            let interval = entry.message.update_interval;

            let due_in = match entry.last_sent {
                Some(last) => (last + interval).saturating_duration_since(now),
                None => Duration::from_millis(0),
            };

            let due_in = match due_in.as_nanos() {
                0 => {
                    send(&entry.message, &mut *self.transport);
                    entry.last_sent = Some(now);
                    interval
                }
                _ => due_in,
            };

            next_due = Some(match next_due {
                Some(d) => d.min(due_in),
                None => due_in,
            });
        }

        next_due.unwrap_or_else(|| Duration::from_millis(0))
    }

    /// Run passes until shutdown is triggered.
    pub fn run(&mut self, shutdown: &ShutdownSignal) {
        if self.entries.is_empty() {
            info!("No broadcasts registered");
            shutdown.wait();
            return;
        }

        while !shutdown.is_triggered() {
            let sleep = self.run_pass();

            if self.clock.wait(sleep, shutdown) {
                break;
            }
        }
    }
}

impl BroadcastScheduler<SystemClock> {
    /// Run the scheduler in its own thread until shutdown.
    pub fn spawn(mut self, shutdown: ShutdownSignal) -> Result<BroadcastThread, BroadcastError> {
        let thread = thread::Builder::new()
            .name("broadcast".into())
            .spawn(move || {
                self.run(&shutdown);
                info!("Broadcasts stopped");
            })
            .map_err(BroadcastError::ThreadStartFailed)?;

        Ok(BroadcastThread {
            thread: Some(thread),
        })
    }
}

impl BroadcastThread {
    /// Wait for the thread to exit. The shutdown signal must have been triggered.
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(jh) = self.thread.take() {
            if jh.join().is_err() {
                warn!("Broadcast thread panicked");
            }
        }
    }
}

impl Drop for BroadcastThread {
    fn drop(&mut self) {
        self.join_thread();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn send(message: &BroadcastMessage, transport: &mut dyn BroadcastTransport) {
    let frame = match message.encode() {
        Ok(f) => f,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };

    match transport.send(&frame) {
        Ok(_) => debug!("Sent {} broadcast ({} bytes)", message.name, frame.len()),
        Err(e) => warn!("Could not send the {} broadcast: {}", message.name, e),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
