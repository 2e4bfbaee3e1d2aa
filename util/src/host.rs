//! Host platform (linux for example) utility functions

use std::{env, path::PathBuf};

use uname;

/// Name of the environment variable pointing at the root of the software checkout.
///
/// Parameter files are loaded from `$DRONE_SW_ROOT/params` and sessions are written under it.
pub const SW_ROOT_ENV_VAR: &str = "DRONE_SW_ROOT";

/// Retrieve uname information.
pub fn get_uname() -> std::io::Result<uname::Info> {
    uname::uname()
}

/// Get the root directory of the software from the environment.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
