//! # Message Providers
//!
//! Requests which aren't motor commands are answered by the [`Registry`]: an ordered list of
//! providers built once at startup. Dispatch asks each provider in registration order and returns
//! the first answer, so registration order decides which provider wins when more than one could
//! answer. A request no provider answers gets a status message saying so, dispatch never fails.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::{Message, MessageTypeQuery, MotorMessage, SystemInfoMessage};
use log::{debug, warn};
use std::sync::Arc;
use util::{event_log::EventLog, host};

use crate::{sensor::SensorProvider, state::ControllerState};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Event kind recorded for commands received by the controller.
pub const MESSAGE_EVENT: &str = "MESSAGE";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The ordered set of providers answering requests.
#[derive(Default)]
pub struct Registry {
    providers: Vec<Provider>,
}

/// Accepts motor commands and answers queries for the current setpoints.
#[derive(Clone)]
pub struct MotorProvider {
    state: Arc<ControllerState>,

    output_available: bool,
}

/// Applies target messages to the controller state.
#[derive(Clone)]
pub struct TargetProvider {
    state: Arc<ControllerState>,

    events: EventLog,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Everything which can answer a request.
pub enum Provider {
    /// Answers `SYSTEM_INFORMATION` with fixed information gathered at startup
    SystemInfo(SystemInfoMessage),

    /// Answers `SYSTEM_STATUS` with the current status and the initialisation report
    SystemStatus(Arc<ControllerState>),

    /// Answers the query of one sensor
    Sensor(SensorProvider),

    /// Answers `MOTORS`
    Motors(MotorProvider),

    /// Handles target messages
    Target(TargetProvider),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider, after every provider already registered.
    pub fn register(&mut self, provider: Provider) {
        self.providers.push(provider);
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Get the response to a request.
    pub fn dispatch(&self, request: &Message) -> Message {
        match self.providers.iter().find_map(|p| p.answer(request)) {
            Some(response) => response,
            None => {
                debug!("No provider for {:?}", request);
                unsupported(request)
            }
        }
    }
}

impl Provider {
    /// The provider's answer to the request, or `None` if the request isn't for it.
    pub fn answer(&self, request: &Message) -> Option<Message> {
        match self {
            Provider::SystemInfo(info) => {
                answer_query(request, MessageTypeQuery::SystemInformation, || {
                    Message::SystemInfo(info.clone())
                })
            }
            Provider::SystemStatus(state) => {
                answer_query(request, MessageTypeQuery::SystemStatus, || {
                    Message::status(status_text(state))
                })
            }
            Provider::Sensor(sensor) => sensor.answer(request),
            Provider::Motors(motors) => motors.answer(request),
            Provider::Target(target) => target.answer(request),
        }
    }
}

impl MotorProvider {
    pub fn new(state: Arc<ControllerState>, output_available: bool) -> Self {
        Self {
            state,
            output_available,
        }
    }

    /// Apply a motor command to the shared setpoints, returning the acknowledgement.
    ///
    /// The acknowledgement carries the setpoints now in force, which are always stop once
    /// shutdown has begun.
    pub fn command(&self, setpoints: MotorMessage) -> Message {
        let applied = self.state.set_motors(setpoints);

        if applied != setpoints {
            warn!(
                "Motor command {:?} ignored, setpoints held at {:?}",
                setpoints, applied
            );
        }

        Message::Motor(applied)
    }

    pub fn answer(&self, request: &Message) -> Option<Message> {
        answer_query(request, MessageTypeQuery::Motors, || {
            match self.output_available {
                true => Message::Motor(self.state.motors()),
                false => Message::status("[ESCManager] Unable to send motor data"),
            }
        })
    }
}

impl TargetProvider {
    pub fn new(state: Arc<ControllerState>, events: EventLog) -> Self {
        Self { state, events }
    }

    pub fn answer(&self, request: &Message) -> Option<Message> {
        match request {
            Message::Target(target) => {
                self.state.set_target(target);
                self.events.log_event(
                    MESSAGE_EVENT,
                    &format!(
                        "TargetMessage to_move={} time_step_ms={}",
                        target.to_move, target.time_step_ms
                    ),
                );

                Some(Message::Target(*target))
            }
            _ => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// The response to a request no provider can answer.
pub fn unsupported(request: &Message) -> Message {
    let what = match request {
        Message::InformationRequest(req) => format!("{} requests", req.query.name()),
        other => format!("{} messages", other.type_name()),
    };

    Message::status(format!("[Controller] No provider for {}", what))
}

/// Gather the controller's system information.
pub fn system_info(name: &str) -> SystemInfoMessage {
    let (host, os_release, machine) = match host::get_uname() {
        Ok(u) => (u.nodename, u.release, u.machine),
        Err(e) => {
            warn!("Could not get host information: {}", e);
            let unknown = String::from("unknown");
            (unknown.clone(), unknown.clone(), unknown)
        }
    };

    SystemInfoMessage {
        name: String::from(name),
        version: String::from(env!("CARGO_PKG_VERSION")),
        host,
        os_release,
        machine,
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn answer_query<F>(request: &Message, query: MessageTypeQuery, build: F) -> Option<Message>
where
    F: FnOnce() -> Message,
{
    match request {
        Message::InformationRequest(req) if req.query == query => Some(build()),
        _ => None,
    }
}

fn status_text(state: &ControllerState) -> String {
    let mut text = state.status();
    for line in state.init_report() {
        text.push('\n');
        text.push_str(&line);
    }
    text
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::msg::{SystemStatusMessage, TargetMessage};

    fn info(name: &str) -> SystemInfoMessage {
        SystemInfoMessage {
            name: name.into(),
            version: "0.1.0".into(),
            host: "host".into(),
            os_release: "6.1".into(),
            machine: "armv7l".into(),
        }
    }

    #[test]
    fn test_dispatch_is_total() {
        let registry = Registry::new();
        assert!(registry.is_empty());

        assert_eq!(
            registry.dispatch(&Message::request(MessageTypeQuery::Compass)),
            Message::status("[Controller] No provider for compass requests")
        );
        assert_eq!(
            registry.dispatch(&Message::status("hello")),
            Message::status("[Controller] No provider for SystemStatus messages")
        );
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let mut registry = Registry::new();
        registry.register(Provider::SystemInfo(info("first")));
        registry.register(Provider::SystemInfo(info("second")));
        assert_eq!(registry.len(), 2);

        assert_eq!(
            registry.dispatch(&Message::request(MessageTypeQuery::SystemInformation)),
            Message::SystemInfo(info("first"))
        );
    }

    #[test]
    fn test_status_includes_init_report() {
        let state = Arc::new(ControllerState::new("drone"));
        state.report_init("Compass", false);
        state.set_status("Running");

        let mut registry = Registry::new();
        registry.register(Provider::SystemStatus(state));

        assert_eq!(
            registry.dispatch(&Message::request(MessageTypeQuery::SystemStatus)),
            Message::SystemStatus(SystemStatusMessage {
                text: "Running\n[INIT] Compass: not ok!".into()
            })
        );
    }

    #[test]
    fn test_motor_provider() {
        let state = Arc::new(ControllerState::new("drone"));
        let motors = MotorProvider::new(state.clone(), true);
        let query = Message::request(MessageTypeQuery::Motors);

        assert_eq!(
            motors.command(MotorMessage::new(0.2, -0.2)),
            Message::Motor(MotorMessage::new(0.2, -0.2))
        );
        assert_eq!(
            motors.answer(&query),
            Some(Message::Motor(MotorMessage::new(0.2, -0.2)))
        );
        assert_eq!(motors.answer(&Message::request(MessageTypeQuery::Gps)), None);

        // Once stopped, commands are acknowledged with the stop setpoints
        state.force_stop();
        assert_eq!(
            motors.command(MotorMessage::new(1.0, 1.0)),
            Message::Motor(MotorMessage::STOP)
        );

        let no_output = MotorProvider::new(state, false);
        assert_eq!(
            no_output.answer(&query),
            Some(Message::status("[ESCManager] Unable to send motor data"))
        );
    }

    #[test]
    fn test_target_provider() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.log");
        let events = EventLog::open(&path).unwrap();

        let state = Arc::new(ControllerState::new("drone"));
        let mut registry = Registry::new();
        registry.register(Provider::Target(TargetProvider::new(
            state.clone(),
            events.clone(),
        )));

        let target = Message::Target(TargetMessage {
            to_move: true,
            time_step_ms: 100,
        });
        assert_eq!(registry.dispatch(&target), target);
        assert!(state.target().update_entities);
        assert_eq!(state.target().step_ms, 100);

        events.close();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("MESSAGE;"));
        assert!(content.contains("to_move=true time_step_ms=100"));
    }

    #[test]
    fn test_system_info() {
        let info = system_info("drone");
        assert_eq!(info.name, "drone");
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
    }
}
