//! # Event Log
//!
//! Events are short, pre-encoded lines recording things which happened to the controller (a
//! command received, a device becoming unavailable, ...). They are separate from the diagnostic
//! log: the event log is data, appended by a single background writer so that whoever records
//! an event never waits on the disk.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use chrono::Utc;
use log::{trace, warn};
use std::{
    fs::OpenOptions,
    io::{LineWriter, Write},
    path::Path,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};
use thiserror::Error;

use crate::time::unix_millis;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Separator between the fields of an encoded event.
pub const EVENT_SEPARATOR: char = ';';

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Handle to the event log.
///
/// Cloning the handle is cheap, every clone feeds the same writer thread.
#[derive(Clone)]
pub struct EventLog {
    sender: Sender<EventCmd>,

    writer: Arc<Mutex<Option<JoinHandle<()>>>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("Cannot open the event log file: {0}")]
    CannotOpenFile(std::io::Error),

    #[error("Cannot start the event writer thread: {0}")]
    CannotStartWriter(std::io::Error),
}

enum EventCmd {
    Event(String),
    Stop,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl EventLog {
    /// Open (or create) the event log file at the given path and start the writer thread.
    ///
    /// Events are appended to any existing content.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EventLogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())
            .map_err(EventLogError::CannotOpenFile)?;

        Self::start(LineWriter::new(file))
    }

    /// Start a writer thread which appends events to any writer.
    pub fn start<W: Write + Send + 'static>(writer: W) -> Result<Self, EventLogError> {
        let (sender, receiver) = channel();

        let handle = thread::Builder::new()
            .name("event_log".into())
            .spawn(move || writer_thread(writer, receiver))
            .map_err(EventLogError::CannotStartWriter)?;

        Ok(Self {
            sender,
            writer: Arc::new(Mutex::new(Some(handle))),
        })
    }

    /// An event log which discards everything, for use when no session is available.
    pub fn disabled() -> Self {
        let (sender, _) = channel();

        Self {
            sender,
            writer: Arc::new(Mutex::new(None)),
        }
    }

    /// Record an already encoded event. Returns immediately.
    pub fn log(&self, encoded: String) {
        if self.sender.send(EventCmd::Event(encoded)).is_err() {
            trace!("Event log closed, event discarded");
        }
    }

    /// Encode and record an event.
    pub fn log_event(&self, kind: &str, text: &str) {
        self.log(encode_event(kind, text))
    }

    /// Write out all pending events and stop the writer thread.
    ///
    /// Events recorded after this are discarded. Calling this more than once, from any clone,
    /// has no further effect.
    pub fn close(&self) {
        let handle = match self.writer.lock() {
            Ok(mut h) => h.take(),
            Err(_) => {
                warn!("Event log writer lock poisoned");
                None
            }
        };

        if let Some(h) = handle {
            self.sender.send(EventCmd::Stop).ok();
            if h.join().is_err() {
                warn!("Event log writer panicked");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Encode an event as a single line: `<kind>;<utc timestamp ms>;<text>`.
///
/// Line breaks in the text are replaced with spaces so that one event is always one line.
pub fn encode_event(kind: &str, text: &str) -> String {
    format!(
        "{}{}{}{}{}",
        kind,
        EVENT_SEPARATOR,
        unix_millis(&Utc::now()),
        EVENT_SEPARATOR,
        text.replace(|c| c == '\n' || c == '\r', " ")
    )
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn writer_thread<W: Write>(mut writer: W, receiver: Receiver<EventCmd>) {
    while let Ok(EventCmd::Event(line)) = receiver.recv() {
        if let Err(e) = writeln!(writer, "{}", line) {
            warn!("Could not write event: {}", e);
        }
    }

    if let Err(e) = writer.flush() {
        warn!("Could not flush the event log: {}", e);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
