use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

use crate::config::{Config, RefreshInterval, Theme};
use crate::controller::{Ack, TerminationEvent};
use crate::error::{CollectError, TerminationError};
use crate::monitor::{Monitor, Presenter};
use crate::process::ProcessRecord;
use crate::scheduler::SchedulerState;
use crate::system::SystemMetrics;
use crate::table::{SortColumn, SortDirection};
use crate::ui;

const INPUT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// What the core pushed since the last frame.
#[derive(Debug, Clone)]
pub enum UiUpdate {
    Snapshot {
        metrics: SystemMetrics,
        rows: Vec<ProcessRecord>,
    },
    CollectionFailed(CollectError),
    Terminated {
        pid: u32,
        outcome: Result<Ack, TerminationError>,
    },
}

/// Forwards presenter callbacks into the UI thread's queue.
pub struct ChannelPresenter {
    tx: Mutex<Sender<UiUpdate>>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, Receiver<UiUpdate>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }

    fn send(&self, update: UiUpdate) {
        // receiver gone means the UI is shutting down
        let _ = self
            .tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(update);
    }
}

impl Presenter for ChannelPresenter {
    fn on_snapshot_updated(&self, metrics: &SystemMetrics, rows: &[ProcessRecord]) {
        self.send(UiUpdate::Snapshot {
            metrics: metrics.clone(),
            rows: rows.to_vec(),
        });
    }

    fn on_collection_error(&self, error: &CollectError) {
        self.send(UiUpdate::CollectionFailed(error.clone()));
    }

    fn on_termination_result(&self, pid: u32, outcome: &Result<Ack, TerminationError>) {
        self.send(UiUpdate::Terminated {
            pid,
            outcome: outcome.clone(),
        });
    }
}

pub struct App {
    monitor: Monitor,
    updates: Receiver<UiUpdate>,

    rows: Vec<ProcessRecord>,
    metrics: Option<SystemMetrics>,
    selected_pid: Option<u32>,
    sort_column: SortColumn,
    sort_direction: SortDirection,
    refresh_interval: RefreshInterval,

    theme: Theme,
    table_scroll_offset: usize,
    status_message: Option<(String, StatusLevel)>,
    history: Vec<TerminationEvent>,
    history_popup_open: bool,
    help_popup_open: bool,
    needs_refresh: bool,
}

impl App {
    pub fn new(config: &Config, monitor: Monitor, updates: Receiver<UiUpdate>) -> Self {
        let (sort_column, sort_direction) = monitor.sort();
        Self {
            rows: Vec::new(),
            metrics: None,
            selected_pid: monitor.selected_pid(),
            sort_column,
            sort_direction,
            refresh_interval: monitor.refresh_interval(),
            theme: config.theme,
            table_scroll_offset: 0,
            status_message: Some(("sampling…".to_string(), StatusLevel::Info)),
            history: Vec::new(),
            history_popup_open: false,
            help_popup_open: false,
            needs_refresh: true,
            monitor,
            updates,
        }
    }

    /// Drains everything the core pushed since the last call.
    pub fn apply_updates(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            self.apply_update(update);
        }
    }

    fn apply_update(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::Snapshot { metrics, rows } => {
                self.metrics = Some(metrics);
                self.rows = rows;
                let (column, direction) = self.monitor.sort();
                self.sort_column = column;
                self.sort_direction = direction;
                self.selected_pid = self.monitor.selected_pid();
                if matches!(self.status_message, Some((_, StatusLevel::Info))) {
                    self.status_message = None;
                }
            }
            UiUpdate::CollectionFailed(err) => {
                self.set_status(StatusLevel::Error, format!("refresh failed: {err}"));
            }
            UiUpdate::Terminated { pid, outcome } => {
                let name = self
                    .rows
                    .iter()
                    .find(|row| row.pid == pid)
                    .map(|row| row.name.clone())
                    .unwrap_or_else(|| format!("PID {pid}"));
                match outcome {
                    Ok(_) => {
                        self.set_status(StatusLevel::Info, format!("{name} (PID {pid}) terminated"));
                    }
                    Err(TerminationError::NotFound) => {
                        self.set_status(StatusLevel::Warning, format!("PID {pid} not found"));
                    }
                    Err(err) => {
                        self.set_status(
                            StatusLevel::Error,
                            format!("could not terminate {name} (PID {pid}): {err}"),
                        );
                    }
                }
                self.selected_pid = self.monitor.selected_pid();
                self.history = self.monitor.termination_history();
            }
        }
        self.needs_refresh = true;
    }

    pub fn handle_input(&mut self, event: KeyEvent) -> bool {
        if event.kind != KeyEventKind::Press {
            return false;
        }
        if event.code == KeyCode::Char('c') && event.modifiers.contains(KeyModifiers::CONTROL) {
            return true;
        }

        if self.help_popup_open || self.history_popup_open {
            self.help_popup_open = false;
            self.history_popup_open = false;
            self.needs_refresh = true;
            return event.code == KeyCode::Char('q');
        }

        match event.code {
            KeyCode::Char('q') => return true,
            KeyCode::Esc => {
                self.monitor.clear_selection();
                self.selected_pid = None;
            }
            KeyCode::Up => self.move_selection(-1),
            KeyCode::Down => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::Char('g') => self.jump_to(0),
            KeyCode::Char('G') => self.jump_to(self.rows.len().saturating_sub(1)),
            KeyCode::Char('p') => self.sort_by(SortColumn::Pid),
            KeyCode::Char('n') => self.sort_by(SortColumn::Name),
            KeyCode::Char('c') => self.sort_by(SortColumn::Cpu),
            KeyCode::Char('m') => self.sort_by(SortColumn::Memory),
            KeyCode::Char('>') => self.sort_by(self.sort_column.next()),
            KeyCode::Char('<') => self.sort_by(self.sort_column.prev()),
            KeyCode::Char('k') | KeyCode::Enter | KeyCode::Delete => self.terminate_selected(),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.set_refresh_interval(self.refresh_interval.step_up());
            }
            KeyCode::Char('-') => self.set_refresh_interval(self.refresh_interval.step_down()),
            KeyCode::Char('r') => {
                if let Err(err) = self.monitor.refresh_now() {
                    self.set_status(StatusLevel::Error, err.to_string());
                }
            }
            KeyCode::Char('h') => {
                self.history = self.monitor.termination_history();
                self.history_popup_open = true;
            }
            KeyCode::Char('?') => self.help_popup_open = true,
            _ => {}
        }
        self.needs_refresh = true;
        false
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.rows.is_empty() {
            return;
        }
        let target = match self.selected_index() {
            Some(idx) => idx.saturating_add_signed(delta),
            None => 0,
        };
        self.jump_to(target);
    }

    pub fn jump_to(&mut self, index: usize) {
        let Some(last) = self.rows.len().checked_sub(1) else {
            return;
        };
        let pid = self.rows[index.min(last)].pid;
        self.monitor.request_select(pid);
        self.selected_pid = Some(pid);
        self.needs_refresh = true;
    }

    fn sort_by(&mut self, column: SortColumn) {
        self.monitor.request_sort(column);
        let (column, direction) = self.monitor.sort();
        self.sort_column = column;
        self.sort_direction = direction;
        let order = match direction {
            SortDirection::Ascending => "(asc)",
            SortDirection::Descending => "(desc)",
        };
        self.set_status(
            StatusLevel::Info,
            format!("sorting by {} {order}", column.display_name()),
        );
    }

    fn terminate_selected(&mut self) {
        let Some(pid) = self.selected_pid else {
            self.set_status(StatusLevel::Warning, "no process selected");
            return;
        };
        // outcome arrives through the presenter queue
        let _ = self.monitor.request_terminate(pid);
    }

    fn set_refresh_interval(&mut self, interval: RefreshInterval) {
        self.refresh_interval = self.monitor.set_refresh_interval(interval.secs());
        self.set_status(
            StatusLevel::Info,
            format!("refresh every {}", self.refresh_interval),
        );
    }

    fn set_status<T: Into<String>>(&mut self, level: StatusLevel, message: T) {
        self.status_message = Some((message.into(), level));
        self.needs_refresh = true;
    }

    pub fn selected_index(&self) -> Option<usize> {
        let pid = self.selected_pid?;
        self.rows.iter().position(|row| row.pid == pid)
    }

    pub fn rows(&self) -> &[ProcessRecord] {
        &self.rows
    }

    pub fn metrics(&self) -> Option<&SystemMetrics> {
        self.metrics.as_ref()
    }

    pub fn selected_pid(&self) -> Option<u32> {
        self.selected_pid
    }

    pub fn sort(&self) -> (SortColumn, SortDirection) {
        (self.sort_column, self.sort_direction)
    }

    pub fn refresh_interval(&self) -> RefreshInterval {
        self.refresh_interval
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn status_message(&self) -> Option<&(String, StatusLevel)> {
        self.status_message.as_ref()
    }

    pub fn history(&self) -> &[TerminationEvent] {
        &self.history
    }

    pub fn history_popup_open(&self) -> bool {
        self.history_popup_open
    }

    pub fn help_popup_open(&self) -> bool {
        self.help_popup_open
    }

    pub fn table_scroll_offset(&self) -> usize {
        self.table_scroll_offset
    }

    pub fn set_table_scroll_offset(&mut self, offset: usize) {
        self.table_scroll_offset = offset;
    }

    pub fn is_sampling(&self) -> bool {
        self.monitor.scheduler_state() == SchedulerState::Sampling
    }

    pub fn needs_refresh(&self) -> bool {
        self.needs_refresh
    }

    fn mark_drawn(&mut self) {
        self.needs_refresh = false;
    }

    pub fn shutdown(self) {
        self.monitor.shutdown();
    }
}

pub fn run_tui(config: &Config) -> Result<()> {
    let (presenter, updates) = ChannelPresenter::new();
    let monitor = Monitor::start(config, Arc::new(presenter)).context("failed to start monitor")?;
    let mut app = App::new(config, monitor, updates);

    enable_raw_mode().context("failed to enable raw mode")?;
    let mut terminal = enter_or_restore(
        || {
            let mut stdout = io::stdout();
            execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
            Terminal::new(CrosstermBackend::new(stdout)).context("failed to create terminal")
        },
        restore_terminal,
    )?;

    let outcome = event_loop(&mut terminal, &mut app);

    disable_raw_mode().context("failed to disable raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)
        .context("failed to leave alternate screen")?;
    terminal.show_cursor().context("failed to show cursor")?;

    app.shutdown();
    outcome
}

/// Runs `enter`; if it fails, `restore` undoes whatever was switched on
/// before it.
fn enter_or_restore<T>(enter: impl FnOnce() -> Result<T>, restore: impl FnOnce()) -> Result<T> {
    enter().inspect_err(|_| restore())
}

fn restore_terminal() {
    let _ = execute!(io::stdout(), LeaveAlternateScreen);
    let _ = disable_raw_mode();
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        app.apply_updates();
        if app.needs_refresh() {
            terminal.draw(|frame| ui::render(frame, app))?;
            app.mark_drawn();
        }

        if event::poll(INPUT_POLL).context("event poll failed")? {
            match event::read().context("event read failed")? {
                Event::Key(key) => {
                    if app.handle_input(key) {
                        return Ok(());
                    }
                }
                Event::Resize(_, _) => app.needs_refresh = true,
                _ => {}
            }
        }
    }
}
