//! # Controller Executable
//!
//! This executable runs the onboard controller of the drone:
//! - Answers requests for system, sensor and motor data from connected peers
//! - Applies motor commands to the ESCs
//! - Broadcasts a heartbeat, the drone's position and the water temperature
//!
//! The controller runs until it receives SIGINT or SIGTERM, then stops the motors and shuts down.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};

// Internal
use ctrl_lib::{
    controller::{Controller, Hardware},
    params::CtrlExecParams,
};
use util::{
    event_log::EventLog,
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("ctrl_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Drone Controller Executable\n");
    match host::get_uname() {
        Ok(u) => info!("Running on: {:#?}", u),
        Err(e) => warn!("Could not get host information: {}", e),
    }
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: CtrlExecParams =
        util::params::load("ctrl_exec.toml").wrap_err("Could not load the controller params")?;
    params
        .are_valid()
        .wrap_err("Invalid controller params")?;

    info!("Parameters loaded");

    // ---- START CONTROLLER ----

    let events = EventLog::open(&session.event_log_path).wrap_err("Failed to open the event log")?;

    let zmq_ctx = zmq::Context::new();
    let hardware = Hardware::open(&params, &zmq_ctx);

    let mut controller =
        Controller::start(&params, hardware, events).wrap_err("Failed to start the controller")?;

    session.save("init_report.json", controller.init_report());

    let shutdown = controller.shutdown_signal();
    ctrlc::set_handler(move || {
        info!("Shutdown requested");
        shutdown.trigger();
    })
    .wrap_err("Failed to install the shutdown handler")?;

    info!(
        "Initialisation complete, listening on {:?} (general) and {:?} (motors)",
        controller.general_endpoint(),
        controller.motor_endpoint()
    );

    // ---- MAIN LOOP ----

    controller.wait();

    // ---- SHUTDOWN ----

    controller.shutdown();

    session.exit();

    Ok(())
}
