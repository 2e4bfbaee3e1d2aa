//! # Controller
//!
//! The [`Controller`] owns every component of the drone's controller: the sensor adapters, the
//! motor output, the two connection listeners and the broadcast scheduler.
//!
//! Components whose hardware is missing are reported as not ok in the initialisation report and
//! the controller runs without them. Only failing to listen for connections stops startup.
//!
//! ## Shutdown
//!
//! Shutdown runs in a fixed order, whatever triggered it:
//! 1. The motors are commanded to stop, and the command applied, before anything is closed.
//! 2. The shutdown signal interrupts the poll, handler, accept and broadcast threads.
//! 3. Every thread is joined, each closing the devices or transports it owns.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    msg::MessageTypeQuery,
    net::{BroadcastTransport, TcpAcceptor, TransportError, UdpBroadcaster, ZmqPublisher},
};
use log::{info, warn};
use std::{sync::Arc, time::Duration};
use util::event_log::EventLog;

use crate::{
    broadcast::{BroadcastError, BroadcastMessage, BroadcastScheduler, BroadcastThread, SystemClock},
    bus::I2cBus,
    conn::{ConnError, ConnectionListener, ConnectionRole, Dispatcher},
    motor_ctrl::{pca9685, MotorOutput, OutputDriver, ServoError},
    params::CtrlExecParams,
    provider::{self, MotorProvider, Provider, Registry, TargetProvider},
    sensor::{
        compass::Hmc5883l, gps::NmeaGps, tmp102::Tmp102, SensorAdapter, SensorDriver,
        SensorError, SensorProvider,
    },
    state::{ControllerState, ShutdownSignal, STATUS_RUNNING, STATUS_SHUTTING_DOWN},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const TEMPERATURE_SENSOR: &str = "I2CTemperatureModule";

pub const COMPASS: &str = "I2CCompassModule";

pub const GPS: &str = "GPSModule";

pub const MOTOR_OUTPUT: &str = "ESCManager";

pub const BROADCAST: &str = "Broadcast";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The devices and transports the controller is built on, each already opened.
///
/// A device which failed to open is kept as its error, so it can be reported.
pub struct Hardware {
    pub temperature: Result<Box<dyn SensorDriver>, SensorError>,

    pub compass: Result<Box<dyn SensorDriver>, SensorError>,

    pub gps: Result<Box<dyn SensorDriver>, SensorError>,

    pub motor_output: Result<Box<dyn MotorOutput>, ServoError>,

    /// Every broadcast frame is sent to all of these
    pub broadcast: Vec<Box<dyn BroadcastTransport>>,
}

pub struct Controller {
    state: Arc<ControllerState>,

    shutdown: ShutdownSignal,

    events: EventLog,

    adapters: Vec<SensorAdapter>,

    output: Option<OutputDriver>,

    general_listener: Option<ConnectionListener<TcpAcceptor>>,

    motor_listener: Option<ConnectionListener<TcpAcceptor>>,

    broadcaster: Option<BroadcastThread>,

    stopped: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ControllerError {
    #[error("Could not listen on {0}: {1}")]
    BindFailed(String, TransportError),

    #[error("Could not start a connection listener: {0}")]
    ListenerFailed(#[from] ConnError),

    #[error("Could not start the broadcasts: {0}")]
    BroadcastFailed(#[from] BroadcastError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Hardware {
    /// Open every device and broadcast transport named in the parameters.
    ///
    /// Failures are logged and kept, opening never fails as a whole.
    pub fn open(params: &CtrlExecParams, zmq_ctx: &zmq::Context) -> Self {
        let sensors = &params.sensors;
        let motors = &params.motors;
        let bus = I2cBus::new(sensors.i2c_bus);

        let temperature = Tmp102::open(&bus, sensors.temperature_address)
            .map(|d| Box::new(d) as Box<dyn SensorDriver>);

        let compass = Hmc5883l::open(
            &bus,
            sensors.compass_address,
            sensors.compass_declination_deg,
        )
        .map(|d| Box::new(d) as Box<dyn SensorDriver>);

        let gps = NmeaGps::open(&sensors.gps_device, sensors.gps_baud_rate)
            .map(|d| Box::new(d) as Box<dyn SensorDriver>);

        let motor_output = pca9685::open_esc_board(
            sensors.i2c_bus,
            motors.pca9685_address,
            motors.left_channel,
            motors.right_channel,
            motors.esc,
        );

        let mut broadcast: Vec<Box<dyn BroadcastTransport>> = Vec::new();

        let bc = &params.broadcast;
        match UdpBroadcaster::new(&bc.udp_bind, &bc.udp_target) {
            Ok(u) => broadcast.push(Box::new(u)),
            Err(e) => warn!("Could not open the UDP broadcast to {}: {}", bc.udp_target, e),
        }

        if let Some(endpoint) = &bc.zmq_endpoint {
            match ZmqPublisher::bind(zmq_ctx, endpoint) {
                Ok(z) => broadcast.push(Box::new(z)),
                Err(e) => warn!("Could not open the ZMQ broadcast on {}: {}", endpoint, e),
            }
        }

        Self {
            temperature,
            compass,
            gps,
            motor_output,
            broadcast,
        }
    }
}

impl Controller {
    /// Start the controller on the given hardware.
    ///
    /// Once this returns the controller is running. Stop it with [`Controller::shutdown`], or by
    /// dropping it.
    pub fn start(
        params: &CtrlExecParams,
        hardware: Hardware,
        events: EventLog,
    ) -> Result<Self, ControllerError> {
        // Bind first, nothing has been started if either endpoint is unavailable
        let general_acceptor = TcpAcceptor::bind(&params.general_endpoint)
            .map_err(|e| ControllerError::BindFailed(params.general_endpoint.clone(), e))?;
        let motor_acceptor = TcpAcceptor::bind(&params.motor_endpoint)
            .map_err(|e| ControllerError::BindFailed(params.motor_endpoint.clone(), e))?;

        let state = Arc::new(ControllerState::new(params.name.as_str()));
        let shutdown = ShutdownSignal::new();

        // From here on dropping the controller on an error shuts down what has been started
        let mut ctrl = Self {
            state: state.clone(),
            shutdown: shutdown.clone(),
            events: events.clone(),
            adapters: Vec::new(),
            output: None,
            general_listener: None,
            motor_listener: None,
            broadcaster: None,
            stopped: false,
        };

        // ---- SENSORS ----

        let sensors = &params.sensors;
        let temperature = ctrl.start_sensor(
            TEMPERATURE_SENSOR,
            MessageTypeQuery::Temperature,
            hardware.temperature,
            sensors.temperature_period_ms,
        );
        let compass = ctrl.start_sensor(
            COMPASS,
            MessageTypeQuery::Compass,
            hardware.compass,
            sensors.compass_period_ms,
        );
        let gps = ctrl.start_sensor(
            GPS,
            MessageTypeQuery::Gps,
            hardware.gps,
            sensors.gps_period_ms,
        );

        // ---- MOTORS ----

        ctrl.output = match hardware.motor_output {
            Ok(output) => match OutputDriver::start(
                output,
                state.clone(),
                Duration::from_millis(params.motors.refresh_period_ms),
                shutdown.clone(),
            ) {
                Ok(o) => Some(o),
                Err(e) => {
                    warn!("[{}] {}", MOTOR_OUTPUT, e);
                    None
                }
            },
            Err(e) => {
                warn!("[{}] {}", MOTOR_OUTPUT, e);
                None
            }
        };
        state.report_init(MOTOR_OUTPUT, ctrl.output.is_some());

        let motors = MotorProvider::new(state.clone(), ctrl.output.is_some());

        // ---- PROVIDERS ----

        let mut registry = Registry::new();
        registry.register(Provider::SystemInfo(provider::system_info(&params.name)));
        registry.register(Provider::SystemStatus(state.clone()));
        registry.register(Provider::Sensor(temperature.clone()));
        registry.register(Provider::Sensor(compass));
        registry.register(Provider::Sensor(gps.clone()));
        registry.register(Provider::Motors(motors.clone()));
        registry.register(Provider::Target(TargetProvider::new(state.clone(), events)));

        let dispatcher = Dispatcher::new(Arc::new(registry), motors);

        // ---- BROADCASTS ----

        let bc = &params.broadcast;
        state.report_init(BROADCAST, !hardware.broadcast.is_empty());

        let mut scheduler = BroadcastScheduler::new(Box::new(hardware.broadcast), SystemClock);
        scheduler.register(BroadcastMessage::heartbeat(
            state.clone(),
            bc.heartbeat_interval_ms,
        )?);
        scheduler.register(BroadcastMessage::sensor(
            "Position",
            gps,
            bc.position_interval_ms,
        )?);
        scheduler.register(BroadcastMessage::sensor(
            "Temperature",
            temperature,
            bc.temperature_interval_ms,
        )?);
        ctrl.broadcaster = Some(scheduler.spawn(shutdown.clone())?);

        // ---- CONNECTIONS ----

        ctrl.general_listener = Some(ConnectionListener::start(
            general_acceptor,
            ConnectionRole::General,
            dispatcher.clone(),
            shutdown.clone(),
        )?);
        ctrl.motor_listener = Some(ConnectionListener::start(
            motor_acceptor,
            ConnectionRole::Motor,
            dispatcher,
            shutdown,
        )?);

        state.report_init(&ConnectionRole::General.to_string(), true);
        state.report_init(&ConnectionRole::Motor.to_string(), true);

        for line in state.init_report() {
            info!("{}", line);
        }

        state.set_status(STATUS_RUNNING);
        info!("Controller {} running", state.name());

        Ok(ctrl)
    }

    /// Address the general purpose listener is bound to.
    pub fn general_endpoint(&self) -> Option<String> {
        self.general_listener.as_ref().map(|l| l.endpoint())
    }

    /// Address the motor listener is bound to.
    pub fn motor_endpoint(&self) -> Option<String> {
        self.motor_listener.as_ref().map(|l| l.endpoint())
    }

    pub fn state(&self) -> Arc<ControllerState> {
        self.state.clone()
    }

    /// The signal which stops the controller. Triggering it only interrupts the threads, call
    /// [`Controller::shutdown`] to stop the motors and wait for everything to close.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn init_report(&self) -> Vec<String> {
        self.state.init_report()
    }

    /// Block until the shutdown signal is triggered.
    pub fn wait(&self) {
        self.shutdown.wait();
    }

    /// Stop the motors, then stop every thread and close every device and transport.
    ///
    /// Calling this more than once has no effect.
    pub fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!("Shutting down");
        self.state.set_status(STATUS_SHUTTING_DOWN);

        // ---- STOP MOTORS ----

        match &self.output {
            Some(output) => {
                if let Err(e) = output.stop_now() {
                    warn!("[{}] Could not apply stop: {}", MOTOR_OUTPUT, e);
                }
            }
            None => self.state.force_stop(),
        }

        // ---- INTERRUPT ----

        self.shutdown.trigger();

        if let Some(l) = self.general_listener.take() {
            l.stop();
        }
        if let Some(l) = self.motor_listener.take() {
            l.stop();
        }

        // ---- CLOSE ----

        for adapter in self.adapters.drain(..) {
            adapter.join();
        }
        if let Some(o) = self.output.take() {
            o.join();
        }
        if let Some(b) = self.broadcaster.take() {
            b.join();
        }

        self.events.close();

        info!("Shutdown complete");
    }

    fn start_sensor(
        &mut self,
        name: &str,
        query: MessageTypeQuery,
        opened: Result<Box<dyn SensorDriver>, SensorError>,
        period_ms: u64,
    ) -> SensorProvider {
        let adapter = SensorAdapter::start(
            name,
            query,
            opened,
            Duration::from_millis(period_ms),
            self.shutdown.clone(),
        );

        self.state.report_init(name, adapter.device_open());

        let provider = adapter.provider();
        self.adapters.push(adapter);
        provider
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
