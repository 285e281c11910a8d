use std::io::{self, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use log::info;

use crate::config::Config;
use crate::controller::Ack;
use crate::error::{CollectError, TerminationError};
use crate::monitor::{Monitor, Presenter, Sampler};
use crate::process::ProcessRecord;
use crate::system::SystemMetrics;
use crate::table::{SortColumn, SortDirection, SortStrategy, TableModel, render_cell};

/// Writes a text block per snapshot to any sink.
pub struct LinePresenter<W: Write + Send> {
    out: Mutex<W>,
    rows: usize,
}

impl<W: Write + Send> LinePresenter<W> {
    pub fn new(out: W, rows: usize) -> Self {
        Self {
            out: Mutex::new(out),
            rows,
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        // a closed stdout is not worth stopping the monitor for
        let _ = out.write_all(text.as_bytes()).and_then(|_| out.flush());
    }
}

impl<W: Write + Send> Presenter for LinePresenter<W> {
    fn on_snapshot_updated(&self, metrics: &SystemMetrics, rows: &[ProcessRecord]) {
        self.write(&format_snapshot(metrics, rows, self.rows));
    }

    fn on_collection_error(&self, error: &CollectError) {
        self.write(&format!("collection failed: {error}\n"));
    }

    fn on_termination_result(&self, pid: u32, outcome: &Result<Ack, TerminationError>) {
        let line = match outcome {
            Ok(ack) => format!("pid {pid} terminated after {} ms\n", ack.waited.as_millis()),
            Err(err) => format!("pid {pid} not terminated: {err}\n"),
        };
        self.write(&line);
    }
}

pub fn format_snapshot(metrics: &SystemMetrics, rows: &[ProcessRecord], limit: usize) -> String {
    let mut text = format!(
        "[{}] cpu {:.1}% | ram {:.2} MB / {:.2} MB ({:.1}%) | {} processes\n",
        metrics.sampled_at.format("%H:%M:%S"),
        metrics.cpu_percent,
        metrics.memory_used_bytes as f64 / 1_000_000.0,
        metrics.memory_total_bytes as f64 / 1_000_000.0,
        metrics.memory_used_percent(),
        rows.len()
    );
    text.push_str(&format!(
        "{:>8}  {:<24} {:>7} {:>10}\n",
        "PID", "NAME", "CPU%", "RAM (MB)"
    ));
    for row in rows.iter().take(limit) {
        text.push_str(&format!(
            "{:>8}  {:<24} {:>7} {:>10}\n",
            row.pid,
            truncate(&row.name, 24),
            render_cell(row, SortColumn::Cpu),
            render_cell(row, SortColumn::Memory)
        ));
    }
    text.push('\n');
    text
}

fn truncate(value: &str, max_len: usize) -> String {
    value.chars().take(max_len).collect()
}

/// Samples on the configured interval until Ctrl-C.
pub fn run_headless(config: &Config) -> Result<()> {
    let presenter = Arc::new(LinePresenter::new(io::stdout(), config.headless_rows));
    let monitor = Monitor::start(config, presenter).context("failed to start monitor")?;

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("failed to install Ctrl-C handler")?;

    let _ = stop_rx.recv();
    info!("interrupted, stopping");
    monitor.shutdown();
    Ok(())
}

/// One sample, printed once, without starting the refresh loop.
pub fn run_once(config: &Config) -> Result<()> {
    let mut sampler = Sampler::from_os(config);
    let snapshot = sampler.sample().context("sampling failed")?;

    let direction = if config.sort_descending {
        SortDirection::Descending
    } else {
        SortDirection::Ascending
    };
    let mut table = TableModel::new(
        SortColumn::from(config.initial_sort),
        direction,
        SortStrategy::from(config.sort_rule),
    );
    table.replace(snapshot.rows);

    let text = format_snapshot(&snapshot.metrics, table.sorted_rows(), config.headless_rows);
    io::stdout()
        .write_all(text.as_bytes())
        .context("failed to write snapshot")?;
    Ok(())
}
