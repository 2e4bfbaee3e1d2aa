//! # Controller State
//!
//! The process wide state of the controller. One [`ControllerState`] is created at startup and
//! shared by `Arc` with every thread: connection handlers write the motor setpoints, the motor
//! output thread reads them, providers report the status and target flags.
//!
//! The motor setpoints are the only contended value. Both sides of a setpoint are always written
//! together under one lock, which is never held across any I/O.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::{MotorMessage, TargetMessage};
use log::info;
use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, RwLock},
    time::{Duration, Instant},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const STATUS_INITIALISING: &str = "Initializing...";
pub const STATUS_RUNNING: &str = "Running";
pub const STATUS_SHUTTING_DOWN: &str = "Shutting down";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State shared by every thread of the controller.
pub struct ControllerState {
    name: String,

    started: Instant,

    status: RwLock<String>,

    init_report: RwLock<Vec<String>>,

    motors: Mutex<MotorSetpoints>,

    motors_changed: Condvar,

    target: RwLock<TargetFlags>,
}

/// The target flags set by a [`TargetMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetFlags {
    /// Whether the entities are moved on each update
    pub update_entities: bool,

    /// Update step in milliseconds
    pub step_ms: i64,
}

/// A handle used to signal shutdown to every thread of the controller.
///
/// Threads either poll [`ShutdownSignal::is_triggered`] or use
/// [`ShutdownSignal::wait_timeout`] in place of a sleep, so that they wake as soon as shutdown
/// begins.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

struct MotorSetpoints {
    current: MotorMessage,

    /// Incremented on every accepted write
    seq: u64,

    /// Once set the setpoints are held at stop
    stopped: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControllerState {
    /// Create the state for a new controller, with neutral motor setpoints.
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            started: Instant::now(),
            status: RwLock::new(String::from(STATUS_INITIALISING)),
            init_report: RwLock::new(Vec::new()),
            motors: Mutex::new(MotorSetpoints {
                current: MotorMessage::NEUTRAL,
                seq: 0,
                stopped: false,
            }),
            motors_changed: Condvar::new(),
            target: RwLock::new(TargetFlags {
                update_entities: false,
                step_ms: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time since the controller was started.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn status(&self) -> String {
        match self.status.read() {
            Ok(s) => s.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    pub fn set_status(&self, status: &str) {
        info!("Status: {}", status);

        match self.status.write() {
            Ok(mut s) => *s = String::from(status),
            Err(p) => *p.into_inner() = String::from(status),
        }
    }

    /// Record the result of initialising a component.
    pub fn report_init(&self, component: &str, ok: bool) {
        let line = format!(
            "[INIT] {}: {}",
            component,
            match ok {
                true => "ok",
                false => "not ok!",
            }
        );

        info!("{}", line);

        match self.init_report.write() {
            Ok(mut r) => r.push(line),
            Err(p) => p.into_inner().push(line),
        }
    }

    /// All initialisation report lines, in the order they were recorded.
    pub fn init_report(&self) -> Vec<String> {
        match self.init_report.read() {
            Ok(r) => r.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    /// Set both motor setpoints together, returning the setpoints now in force.
    ///
    /// After [`ControllerState::force_stop`] the setpoints are held at stop and new values are
    /// ignored.
    pub fn set_motors(&self, setpoints: MotorMessage) -> MotorMessage {
        let mut motors = self.lock_motors();

        if !motors.stopped {
            motors.current = setpoints;
            motors.seq += 1;
            self.motors_changed.notify_all();
        }

        motors.current
    }

    /// Set the motors to the stop sentinel and hold them there.
    pub fn force_stop(&self) {
        let mut motors = self.lock_motors();

        motors.current = MotorMessage::STOP;
        motors.seq += 1;
        motors.stopped = true;
        self.motors_changed.notify_all();
    }

    /// The current motor setpoints.
    pub fn motors(&self) -> MotorMessage {
        self.lock_motors().current
    }

    /// The current motor setpoints along with their sequence number, which increments on every
    /// change.
    pub fn motors_with_seq(&self) -> (MotorMessage, u64) {
        let motors = self.lock_motors();
        (motors.current, motors.seq)
    }

    /// Block until the setpoints have a sequence number other than `seq`, or the timeout
    /// elapses, then return the current setpoints and their sequence number.
    pub fn wait_for_motors(&self, seq: u64, timeout: Duration) -> (MotorMessage, u64) {
        let motors = self.lock_motors();

        let motors = match self
            .motors_changed
            .wait_timeout_while(motors, timeout, |m| m.seq == seq)
        {
            Ok((m, _)) => m,
            Err(p) => p.into_inner().0,
        };

        (motors.current, motors.seq)
    }

    pub fn target(&self) -> TargetFlags {
        match self.target.read() {
            Ok(t) => *t,
            Err(p) => *p.into_inner(),
        }
    }

    pub fn set_target(&self, target: &TargetMessage) {
        let flags = TargetFlags {
            update_entities: target.to_move,
            step_ms: target.time_step_ms,
        };

        match self.target.write() {
            Ok(mut t) => *t = flags,
            Err(p) => *p.into_inner() = flags,
        }
    }

    fn lock_motors(&self) -> MutexGuard<MotorSetpoints> {
        // Setpoints are always written as a whole so a poisoned value is still consistent
        match self.motors.lock() {
            Ok(m) => m,
            Err(p) => p.into_inner(),
        }
    }
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal shutdown, waking every waiting thread. Triggering more than once has no effect.
    pub fn trigger(&self) {
        let (flag, cvar) = &*self.inner;

        match flag.lock() {
            Ok(mut f) => *f = true,
            Err(p) => *p.into_inner() = true,
        }

        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        match self.inner.0.lock() {
            Ok(f) => *f,
            Err(p) => *p.into_inner(),
        }
    }

    /// Wait for shutdown for at most `timeout`. Returns `true` if shutdown has been triggered.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;

        let guard = match flag.lock() {
            Ok(f) => f,
            Err(p) => p.into_inner(),
        };

        match cvar.wait_timeout_while(guard, timeout, |triggered| !*triggered) {
            Ok((f, _)) => *f,
            Err(p) => *p.into_inner().0,
        }
    }

    /// Block until shutdown is triggered.
    pub fn wait(&self) {
        while !self.wait_timeout(Duration::from_secs(1)) {}
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_initial_state() {
        let state = ControllerState::new("drone");

        assert_eq!(state.name(), "drone");
        assert_eq!(state.status(), STATUS_INITIALISING);
        assert_eq!(state.motors(), MotorMessage::NEUTRAL);
        assert_eq!(state.motors_with_seq().1, 0);
        assert!(state.init_report().is_empty());
    }

    #[test]
    fn test_last_write_is_read() {
        let state = ControllerState::new("drone");

        for i in 1..=50 {
            let v = i as f64 / 100.0;
            state.set_motors(MotorMessage::new(v, -v));
        }

        assert_eq!(state.motors(), MotorMessage::new(0.5, -0.5));
        assert_eq!(state.motors_with_seq().1, 50);
    }

    #[test]
    fn test_concurrent_writers_never_interleave() {
        let state = Arc::new(ControllerState::new("drone"));

        let writers: Vec<_> = (0..8)
            .map(|i| {
                let state = state.clone();
                thread::spawn(move || {
                    let v = i as f64 / 10.0;
                    for _ in 0..2000 {
                        state.set_motors(MotorMessage::new(v, v));
                    }
                })
            })
            .collect();

        let reader = {
            let state = state.clone();
            thread::spawn(move || {
                for _ in 0..5000 {
                    let m = state.motors();
                    assert_eq!(m.left(), m.right());
                }
            })
        };

        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();

        assert_eq!(state.motors_with_seq().1, 8 * 2000);
    }

    #[test]
    fn test_force_stop_holds() {
        let state = ControllerState::new("drone");

        state.set_motors(MotorMessage::new(0.3, 0.3));
        state.force_stop();

        assert_eq!(state.set_motors(MotorMessage::new(1.0, 1.0)), MotorMessage::STOP);
        assert!(state.motors().is_stop());
    }

    #[test]
    fn test_wait_for_motors() {
        let state = Arc::new(ControllerState::new("drone"));
        let (_, seq) = state.motors_with_seq();

        // Nothing changes so this times out with the same setpoints
        let (m, s) = state.wait_for_motors(seq, Duration::from_millis(10));
        assert_eq!((m, s), (MotorMessage::NEUTRAL, seq));

        let writer = {
            let state = state.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                state.set_motors(MotorMessage::new(0.25, 0.75));
            })
        };

        let (m, s) = state.wait_for_motors(seq, Duration::from_secs(5));
        assert_eq!(m, MotorMessage::new(0.25, 0.75));
        assert_eq!(s, seq + 1);

        writer.join().unwrap();
    }

    #[test]
    fn test_init_report_and_target() {
        let state = ControllerState::new("drone");

        state.report_init("Compass", true);
        state.report_init("GPS", false);
        assert_eq!(
            state.init_report(),
            vec!["[INIT] Compass: ok", "[INIT] GPS: not ok!"]
        );

        state.set_target(&TargetMessage {
            to_move: true,
            time_step_ms: 250,
        });
        assert_eq!(
            state.target(),
            TargetFlags {
                update_entities: true,
                step_ms: 250
            }
        );
    }

    #[test]
    fn test_shutdown_signal() {
        let signal = ShutdownSignal::new();
        assert!(!signal.wait_timeout(Duration::from_millis(5)));

        let waiter = {
            let signal = signal.clone();
            thread::spawn(move || signal.wait_timeout(Duration::from_secs(10)))
        };

        signal.trigger();
        signal.trigger();

        assert!(waiter.join().unwrap());
        assert!(signal.is_triggered());
    }
}
