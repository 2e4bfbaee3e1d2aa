//! Controller shutdown with recording hardware.

mod common;

use comms_if::{
    msg::{Message, MotorMessage},
    net::{BroadcastTransport, Interrupt, TcpFrameStream, TransportError},
};
use ctrl_lib::{
    controller::{Controller, Hardware},
    motor_ctrl::{MotorOutput, ServoError},
    sensor::{gps::NmeaGps, Reading, SensorDriver, SensorError},
    state::STATUS_SHUTTING_DOWN,
};
use std::{
    io::BufReader,
    net::Shutdown,
    os::unix::net::UnixStream,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};
use util::event_log::EventLog;

use common::{params, request};

/// A sensor whose reads take a while, counting how many times it is dropped.
struct SlowSensor {
    read_time: Duration,
    drops: Arc<AtomicUsize>,
}

impl SensorDriver for SlowSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        thread::sleep(self.read_time);
        Ok(Reading::Temperature(12.5))
    }
}

impl Drop for SlowSensor {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Wraps a driver, counting how many times it is dropped.
struct Counted<D: SensorDriver> {
    inner: D,
    drops: Arc<AtomicUsize>,
}

impl<D: SensorDriver> SensorDriver for Counted<D> {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.inner.read()
    }

    fn interrupter(&self) -> Option<Box<dyn Interrupt>> {
        self.inner.interrupter()
    }
}

impl<D: SensorDriver> Drop for Counted<D> {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Shuts a stream down, waking anything blocked reading it.
struct StreamRelease(UnixStream);

impl Interrupt for StreamRelease {
    fn interrupt(&self) {
        self.0.shutdown(Shutdown::Both).ok();
    }
}

/// Records every command applied to the motors.
struct RecordingOutput {
    applied: Arc<Mutex<Vec<MotorMessage>>>,
    drops: Arc<AtomicUsize>,
}

impl MotorOutput for RecordingOutput {
    fn apply(&mut self, setpoints: MotorMessage) -> Result<(), ServoError> {
        self.applied.lock().unwrap().push(setpoints);
        Ok(())
    }
}

impl Drop for RecordingOutput {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

struct CountingBroadcast {
    sent: Arc<AtomicUsize>,
    drops: Arc<AtomicUsize>,
}

impl BroadcastTransport for CountingBroadcast {
    fn send(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for CountingBroadcast {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_shutdown_stops_motors_and_closes_devices_once() {
    let sensor_drops = Arc::new(AtomicUsize::new(0));
    let output_drops = Arc::new(AtomicUsize::new(0));
    let broadcast_drops = Arc::new(AtomicUsize::new(0));
    let sent = Arc::new(AtomicUsize::new(0));
    let applied = Arc::new(Mutex::new(Vec::new()));

    let sensor = |read_ms| -> Result<Box<dyn SensorDriver>, SensorError> {
        Ok(Box::new(SlowSensor {
            read_time: Duration::from_millis(read_ms),
            drops: sensor_drops.clone(),
        }))
    };

    let hardware = Hardware {
        temperature: sensor(5),
        // Long enough that shutdown lands during a read
        compass: sensor(300),
        gps: sensor(5),
        motor_output: Ok(Box::new(RecordingOutput {
            applied: applied.clone(),
            drops: output_drops.clone(),
        })),
        broadcast: vec![Box::new(CountingBroadcast {
            sent: sent.clone(),
            drops: broadcast_drops.clone(),
        })],
    };

    let mut controller = Controller::start(&params(), hardware, EventLog::disabled()).unwrap();
    let state = controller.state();

    let mut motors = TcpFrameStream::connect(&controller.motor_endpoint().unwrap()).unwrap();
    let forward = Message::Motor(MotorMessage::new(0.8, 0.8));
    assert_eq!(request(&mut motors, &forward), forward);

    thread::sleep(Duration::from_millis(100));
    assert!(applied
        .lock()
        .unwrap()
        .contains(&MotorMessage::new(0.8, 0.8)));

    controller.shutdown();

    assert_eq!(state.status(), STATUS_SHUTTING_DOWN);
    assert_eq!(applied.lock().unwrap().last(), Some(&MotorMessage::STOP));
    assert_eq!(state.motors(), MotorMessage::STOP);

    assert_eq!(sensor_drops.load(Ordering::SeqCst), 3);
    assert_eq!(output_drops.load(Ordering::SeqCst), 1);
    assert_eq!(broadcast_drops.load(Ordering::SeqCst), 1);
    assert!(sent.load(Ordering::SeqCst) > 0);

    // Nothing is applied or closed again
    let num_applied = applied.lock().unwrap().len();
    controller.shutdown();
    drop(controller);

    assert_eq!(applied.lock().unwrap().len(), num_applied);
    assert_eq!(sensor_drops.load(Ordering::SeqCst), 3);
    assert_eq!(output_drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_shuts_down() {
    let applied = Arc::new(Mutex::new(Vec::new()));
    let drops = Arc::new(AtomicUsize::new(0));

    let mut hardware = common::no_hardware();
    hardware.motor_output = Ok(Box::new(RecordingOutput {
        applied: applied.clone(),
        drops: drops.clone(),
    }));

    let controller = Controller::start(&params(), hardware, EventLog::disabled()).unwrap();
    controller.state().set_motors(MotorMessage::new(-0.3, 0.3));
    drop(controller);

    assert_eq!(applied.lock().unwrap().last(), Some(&MotorMessage::STOP));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_with_silent_gps() {
    // The receiver end is held open but nothing is ever written to it
    let (rx, _tx) = UnixStream::pair().unwrap();
    let release = StreamRelease(rx.try_clone().unwrap());
    let gps = NmeaGps::new(BufReader::new(rx)).with_release(Box::new(release));
    let drops = Arc::new(AtomicUsize::new(0));

    let mut hardware = common::no_hardware();
    hardware.gps = Ok(Box::new(Counted {
        inner: gps,
        drops: drops.clone(),
    }));

    let mut controller = Controller::start(&params(), hardware, EventLog::disabled()).unwrap();

    // Let the poll thread block in its first read
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    controller.shutdown();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
