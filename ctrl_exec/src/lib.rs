//! # Controller library.
//!
//! Everything the controller executable is built from: the shared state, the sensor adapters,
//! the provider registry which answers requests, the motor output, the connection handling and
//! the broadcast scheduler. [`controller::Controller`] assembles them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Periodic broadcasts - pushes the controller's state to anyone listening
pub mod broadcast;

/// Device bus - register level access to devices on the I2C bus
pub mod bus;

/// Connections - accepts peers and answers their requests
pub mod conn;

/// Controller - assembles every component, and shuts them down in order
pub mod controller;

/// Motor control - drives the ESCs from the motor setpoints
pub mod motor_ctrl;

/// Parameters for the controller executable
pub mod params;

/// Message providers - the registry which answers requests
pub mod provider;

/// Sensor adapters - poll a device and cache its last reading
pub mod sensor;

/// Controller state - shared between every thread of the controller
pub mod state;
