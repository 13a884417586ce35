//! CLI command implementations.

pub mod archive;
pub mod printlog;
pub mod stat;
pub mod verify;

use skein_core::{Config, Environment};
use std::path::Path;

/// Opens an existing environment for a maintenance command.
pub fn open_env(path: &Path) -> Result<Environment, Box<dyn std::error::Error>> {
    let config = Config::default().create_if_missing(false);
    Ok(Environment::open(path, config)?)
}
