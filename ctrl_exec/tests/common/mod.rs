//! Helpers shared by the controller's integration tests.

use comms_if::{
    msg::Message,
    net::{FrameTransport, TcpFrameStream},
};
use ctrl_lib::{
    controller::Hardware,
    motor_ctrl::{EscConfig, ServoError},
    params::{BroadcastParams, CtrlExecParams, MotorParams, SensorParams},
    sensor::SensorError,
};

/// Parameters listening on free loopback ports.
pub fn params() -> CtrlExecParams {
    CtrlExecParams {
        name: "test_drone".into(),
        general_endpoint: "127.0.0.1:0".into(),
        motor_endpoint: "127.0.0.1:0".into(),
        broadcast: BroadcastParams {
            udp_bind: "127.0.0.1:0".into(),
            udp_target: "127.0.0.1:9".into(),
            zmq_endpoint: None,
            heartbeat_interval_ms: 50,
            position_interval_ms: 100,
            temperature_interval_ms: 100,
        },
        sensors: SensorParams {
            i2c_bus: 1,
            temperature_address: 0x48,
            temperature_period_ms: 20,
            compass_address: 0x1E,
            compass_period_ms: 20,
            compass_declination_deg: 0.0,
            gps_device: "/dev/null".into(),
            gps_baud_rate: 9600,
            gps_period_ms: 20,
        },
        motors: MotorParams {
            pca9685_address: 0x40,
            left_channel: 0,
            right_channel: 1,
            refresh_period_ms: 20,
            esc: EscConfig::default(),
        },
    }
}

/// Hardware where nothing could be opened.
pub fn no_hardware() -> Hardware {
    let absent = || Err(SensorError::DeviceUnavailable("not fitted".into()));

    Hardware {
        temperature: absent(),
        compass: absent(),
        gps: absent(),
        motor_output: Err(ServoError::DeviceUnavailable("not fitted".into())),
        broadcast: Vec::new(),
    }
}

/// Send a request and wait for its response.
pub fn request(stream: &mut TcpFrameStream, msg: &Message) -> Message {
    stream.write_frame(&msg.encode().unwrap()).unwrap();
    Message::decode(&stream.read_frame().unwrap()).unwrap()
}
