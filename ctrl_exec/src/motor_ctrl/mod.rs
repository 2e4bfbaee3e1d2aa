//! # Motor Control Module
//!
//! This module drives the two motors of the drone from the setpoints held in the
//! [`ControllerState`]. Each motor is run by a reversible ESC, which is commanded with a servo
//! style pulse: the neutral pulse holds the motor still, longer pulses drive it forward and
//! shorter pulses drive it in reverse.
//!
//! The pulses are generated by a servo driver board, abstracted by the [`ServoDriver`] trait.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`ServoDriver`] implementation for the Adafruit PCA9685 16 channel servo driver board.
pub mod pca9685;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::MotorMessage;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::state::{ControllerState, ShutdownSignal};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing servo driver boards.
pub trait ServoDriver {
    /// The type that the underlying driver uses for channel identification
    type Channel;

    /// Set the duty cycle of a channel.
    ///
    /// ## Arguments
    /// - `channel` - The channel to set the duty cycle for
    /// - `duty_cycle` - The duty cycle to set. Must be a value between 0.0 and 1.0. Values outside
    ///   this range will be rejected.
    fn set_duty_cycle(&mut self, channel: Self::Channel, duty_cycle: f64) -> Result<(), ServoError>;
}

/// Something which turns motor setpoints into motion.
pub trait MotorOutput: Send {
    /// Apply the setpoints to the motors.
    fn apply(&mut self, setpoints: MotorMessage) -> Result<(), ServoError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Pulse settings of the ESCs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EscConfig {
    /// Frequency of the PWM signal
    pub pwm_freq_hz: f64,

    /// Pulse width which holds the motor still
    pub neutral_pulse_us: f64,

    /// Change in pulse width between neutral and full speed
    pub pulse_range_us: f64,
}

/// A pair of reversible ESCs on two channels of a servo driver.
pub struct EscOutput<D: ServoDriver> {
    driver: D,

    left: D::Channel,

    right: D::Channel,

    config: EscConfig,
}

/// The motor output thread, shared with the controller so stop can be applied synchronously.
pub struct OutputDriver {
    output: Arc<Mutex<Box<dyn MotorOutput>>>,

    state: Arc<ControllerState>,

    thread: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ServoError {
    #[error("An I2C error occured")]
    I2c,

    #[error("Duty cycle must be between 0.0 and 1.0")]
    InvalidDutyCycle,

    #[error("Channel {0} does not exist on the driver")]
    InvalidChannel(u8),

    #[error("A pulse of {0} us does not fit in the PWM period of {1} us")]
    PulseOutOfRange(f64, f64),

    #[error("The motor output is unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Could not start the motor output thread: {0}")]
    ThreadStartFailed(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EscConfig {
    /// Length of one PWM period in microseconds.
    pub fn period_us(&self) -> f64 {
        1e6 / self.pwm_freq_hz
    }

    /// Pulse width for a normalised speed in [-1, 1].
    pub fn pulse_us(&self, speed: f64) -> f64 {
        self.neutral_pulse_us + speed.max(-1.0).min(1.0) * self.pulse_range_us
    }

    /// Duty cycle of a pulse width.
    pub fn duty_cycle(&self, pulse_us: f64) -> Result<f64, ServoError> {
        let period = self.period_us();
        match pulse_us >= 0.0 && pulse_us <= period {
            true => Ok(pulse_us / period),
            false => Err(ServoError::PulseOutOfRange(pulse_us, period)),
        }
    }

    /// Duty cycles for the (left, right) channels. The stop sentinel gives the neutral pulse on
    /// both.
    pub fn duty_cycles(&self, setpoints: &MotorMessage) -> Result<(f64, f64), ServoError> {
        if setpoints.is_stop() {
            let neutral = self.duty_cycle(self.neutral_pulse_us)?;
            return Ok((neutral, neutral));
        }

        Ok((
            self.duty_cycle(self.pulse_us(setpoints.left()))?,
            self.duty_cycle(self.pulse_us(setpoints.right()))?,
        ))
    }
}

impl Default for EscConfig {
    fn default() -> Self {
        Self {
            pwm_freq_hz: 50.0,
            neutral_pulse_us: 1500.0,
            pulse_range_us: 400.0,
        }
    }
}

impl<D> EscOutput<D>
where
    D: ServoDriver,
    D::Channel: Copy,
{
    pub fn new(driver: D, left: D::Channel, right: D::Channel, config: EscConfig) -> Self {
        Self {
            driver,
            left,
            right,
            config,
        }
    }
}

impl<D> MotorOutput for EscOutput<D>
where
    D: ServoDriver + Send,
    D::Channel: Copy + Send,
{
    fn apply(&mut self, setpoints: MotorMessage) -> Result<(), ServoError> {
        let (left, right) = self.config.duty_cycles(&setpoints)?;

        self.driver.set_duty_cycle(self.left, left)?;
        self.driver.set_duty_cycle(self.right, right)
    }
}

impl OutputDriver {
    /// Start the output thread.
    ///
    /// The thread applies the setpoints every time they change, and at least once every
    /// `refresh` so a glitched channel recovers.
    pub fn start(
        output: Box<dyn MotorOutput>,
        state: Arc<ControllerState>,
        refresh: Duration,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ServoError> {
        let output = Arc::new(Mutex::new(output));

        let thread = {
            let output = output.clone();
            let state = state.clone();
            thread::Builder::new()
                .name("motor_output".into())
                .spawn(move || output_loop(output, state, refresh, shutdown))
                .map_err(ServoError::ThreadStartFailed)?
        };

        Ok(Self {
            output,
            state,
            thread: Some(thread),
        })
    }

    /// Force the setpoints to stop and apply them before returning.
    pub fn stop_now(&self) -> Result<(), ServoError> {
        // The state is changed under the output lock, so the output thread can't apply an older
        // setpoint after this
        let mut output = lock_output(&self.output);
        self.state.force_stop();
        output.apply(MotorMessage::STOP)
    }

    /// Wait for the output thread to exit. The shutdown signal must have been triggered.
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(jh) = self.thread.take() {
            if jh.join().is_err() {
                warn!("Motor output thread panicked");
            }
        }
    }
}

impl Drop for OutputDriver {
    fn drop(&mut self) {
        self.join_thread();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock_output(output: &Mutex<Box<dyn MotorOutput>>) -> MutexGuard<Box<dyn MotorOutput>> {
    match output.lock() {
        Ok(o) => o,
        Err(p) => p.into_inner(),
    }
}

fn output_loop(
    output: Arc<Mutex<Box<dyn MotorOutput>>>,
    state: Arc<ControllerState>,
    refresh: Duration,
    shutdown: ShutdownSignal,
) {
    info!("Motor output running, refresh every {:?}", refresh);

    let mut seq = None;

    while !shutdown.is_triggered() {
        {
            let mut output = lock_output(&output);
            let (setpoints, current_seq) = state.motors_with_seq();

            if let Err(e) = output.apply(setpoints) {
                warn!("Could not apply motor setpoints {:?}: {}", setpoints, e);
            } else if seq != Some(current_seq) {
                debug!("Applied motor setpoints {:?}", setpoints);
            }

            seq = Some(current_seq);
        }

        if let Some(s) = seq {
            state.wait_for_motors(s, refresh);
        }
    }

    info!("Motor output stopped");
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// Servo driver recording every duty cycle set.
    #[derive(Clone, Default)]
    struct Recorder {
        duties: Arc<Mutex<Vec<(u8, f64)>>>,
    }

    impl ServoDriver for Recorder {
        type Channel = u8;

        fn set_duty_cycle(&mut self, channel: u8, duty_cycle: f64) -> Result<(), ServoError> {
            if duty_cycle < 0.0 || duty_cycle > 1.0 {
                return Err(ServoError::InvalidDutyCycle);
            }
            self.duties.lock().unwrap().push((channel, duty_cycle));
            Ok(())
        }
    }

    struct Applied(Arc<Mutex<Vec<MotorMessage>>>);

    impl MotorOutput for Applied {
        fn apply(&mut self, setpoints: MotorMessage) -> Result<(), ServoError> {
            self.0.lock().unwrap().push(setpoints);
            Ok(())
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_pulses() {
        let config = EscConfig::default();

        assert!(close(config.period_us(), 20_000.0));
        assert!(close(config.pulse_us(0.0), 1500.0));
        assert!(close(config.pulse_us(1.0), 1900.0));
        assert!(close(config.pulse_us(-1.0), 1100.0));
        assert!(close(config.pulse_us(-0.5), 1300.0));

        // A single -1 is full reverse, only the pair is stop
        let (l, r) = config.duty_cycles(&MotorMessage::new(-1.0, 0.5)).unwrap();
        assert!(close(l, 1100.0 / 20_000.0));
        assert!(close(r, 1700.0 / 20_000.0));

        let (l, r) = config.duty_cycles(&MotorMessage::STOP).unwrap();
        assert!(close(l, 1500.0 / 20_000.0));
        assert!(close(r, 1500.0 / 20_000.0));

        let bad = EscConfig {
            pwm_freq_hz: 1000.0,
            ..Default::default()
        };
        assert!(matches!(
            bad.duty_cycle(1500.0),
            Err(ServoError::PulseOutOfRange(_, _))
        ));
    }

    #[test]
    fn test_esc_output_channels() {
        let recorder = Recorder::default();
        let mut esc = EscOutput::new(recorder.clone(), 4, 5, EscConfig::default());

        esc.apply(MotorMessage::new(1.0, 0.0)).unwrap();

        let duties = recorder.duties.lock().unwrap().clone();
        assert_eq!(duties.len(), 2);
        assert_eq!(duties[0].0, 4);
        assert!(close(duties[0].1, 1900.0 / 20_000.0));
        assert_eq!(duties[1].0, 5);
        assert!(close(duties[1].1, 1500.0 / 20_000.0));
    }

    #[test]
    fn test_driver_follows_setpoints_and_stops() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(ControllerState::new("drone"));
        let shutdown = ShutdownSignal::new();

        let driver = OutputDriver::start(
            Box::new(Applied(applied.clone())),
            state.clone(),
            Duration::from_millis(20),
            shutdown.clone(),
        )
        .unwrap();

        state.set_motors(MotorMessage::new(0.4, 0.6));

        let mut tries = 0;
        while !applied
            .lock()
            .unwrap()
            .contains(&MotorMessage::new(0.4, 0.6))
            && tries < 200
        {
            thread::sleep(Duration::from_millis(5));
            tries += 1;
        }
        assert!(applied
            .lock()
            .unwrap()
            .contains(&MotorMessage::new(0.4, 0.6)));

        driver.stop_now().unwrap();
        shutdown.trigger();
        driver.join();

        assert_eq!(applied.lock().unwrap().last(), Some(&MotorMessage::STOP));
        assert!(state.motors().is_stop());
    }
}
