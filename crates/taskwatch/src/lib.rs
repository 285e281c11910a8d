//! Live process monitor: samples the process table and system load on a
//! fixed interval, keeps a sortable table with a stable selection, and
//! terminates processes with a bounded wait.

pub mod error;
pub use error::{CollectError, Result, TaskwatchError, TerminationError};

pub mod app;
pub mod config;
pub mod controller;
pub mod headless;
pub mod monitor;
pub mod process;
pub mod scheduler;
pub mod system;
pub mod table;
pub mod ui;

pub use config::{Config, RefreshInterval};
pub use monitor::{Monitor, Presenter, Sampler, Snapshot};

use std::fs::OpenOptions;
use std::path::Path;

use env_logger::{Builder, Target};
use log::LevelFilter;

/// `RUST_LOG` overrides the default `warn` filter. With neither a log file
/// nor stderr available, logging stays off so it cannot draw over the TUI.
pub fn init_logging(log_file: Option<&Path>, stderr_allowed: bool) -> Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Warn).parse_default_env();

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(Target::Pipe(Box::new(file)));
        }
        None if stderr_allowed => {
            builder.target(Target::Stderr);
        }
        None => return Ok(()),
    }

    builder
        .try_init()
        .map_err(|err| TaskwatchError::runtime(format!("logger already set: {err}")))
}
