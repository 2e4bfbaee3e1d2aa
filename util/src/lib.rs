//! Utility library for the drone controller software

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod event_log;
pub mod host;
pub mod logger;
pub mod params;
pub mod session;
pub mod time;
