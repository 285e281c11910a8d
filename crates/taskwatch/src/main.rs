use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::warn;
use taskwatch::config::{Config, RefreshInterval, SortField, SortRule, Theme};
use taskwatch::{app, headless, init_logging};

#[derive(Debug, Parser)]
#[command(
    name = "taskwatch",
    about = "Live process monitor with sortable table and safe termination",
    version
)]
pub struct Cli {
    /// refresh interval in seconds, kept within 1..=60.
    #[arg(short = 'i', long = "interval", value_name = "SECS", default_value_t = RefreshInterval::DEFAULT)]
    pub interval: u64,

    /// column used to sort the process table on startup.
    #[arg(long = "sort-by", value_enum, default_value_t = SortField::Cpu)]
    pub sort_by: SortField,

    /// start in ascending order instead of descending.
    #[arg(long = "ascending")]
    pub ascending: bool,

    /// how column values are compared.
    #[arg(long = "sort-strategy", value_enum, default_value_t = SortRule::Typed)]
    pub sort_strategy: SortRule,

    /// theme selection for the tui.
    #[arg(long = "theme", value_enum, default_value_t = Theme::Pink)]
    pub theme: Theme,

    /// how long to wait for a terminated process to exit.
    #[arg(long = "terminate-timeout", value_name = "ms", default_value_t = 3_000)]
    pub terminate_timeout: u64,

    /// print snapshots to stdout instead of drawing the tui.
    #[arg(long = "headless")]
    pub headless: bool,

    /// rows printed per snapshot in headless mode.
    #[arg(long = "top", value_name = "N", default_value_t = 15)]
    pub top: usize,

    /// take one snapshot, print it and exit.
    #[arg(long = "once")]
    pub once: bool,

    /// append log output to this file.
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            theme: self.theme,
            refresh_interval: RefreshInterval::clamped(self.interval),
            initial_sort: self.sort_by,
            sort_descending: !self.ascending,
            sort_rule: self.sort_strategy,
            terminate_timeout: Duration::from_millis(self.terminate_timeout),
            headless_rows: self.top,
            log_file: self.log_file.clone(),
            ..Config::default()
        }
    }

    fn is_terminal_ui(&self) -> bool {
        !self.headless && !self.once
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let config = args.config();

    init_logging(config.log_file.as_deref(), !args.is_terminal_ui())
        .context("failed to initialise logging")?;
    if config.refresh_interval.secs() != args.interval {
        warn!(
            "refresh interval {}s out of range, using {}",
            args.interval, config.refresh_interval
        );
    }

    if args.once {
        headless::run_once(&config)
    } else if args.headless {
        headless::run_headless(&config)
    } else {
        app::run_tui(&config)
    }
}
