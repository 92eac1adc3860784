pub mod configure;
pub mod daemon;
pub mod status;
pub mod watch;

use anyhow::{Context, Result};
use std::path::PathBuf;

fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
