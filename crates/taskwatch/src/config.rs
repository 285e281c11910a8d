use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use ratatui::style::Color;

use crate::error::TaskwatchError;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, ValueEnum)]
pub enum Theme {
    #[default]
    Pink,
    Serious,
}

#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub table_header: Color,
    pub table_border: Color,
    pub text_normal: Color,
    pub text_dim: Color,
    pub accent: Color,
    pub highlight_selected: Color,
    pub status_info: Color,
    pub status_warning: Color,
    pub status_error: Color,
    pub load_low: Color,
    pub load_mid: Color,
    pub load_high: Color,
}

impl Theme {
    pub fn palette(self) -> Palette {
        match self {
            Theme::Pink => Palette {
                table_header: Color::LightMagenta,
                table_border: Color::Magenta,
                text_normal: Color::White,
                text_dim: Color::DarkGray,
                accent: Color::LightRed,
                highlight_selected: Color::Rgb(80, 30, 70),
                status_info: Color::LightCyan,
                status_warning: Color::Yellow,
                status_error: Color::LightRed,
                load_low: Color::LightGreen,
                load_mid: Color::Yellow,
                load_high: Color::LightRed,
            },
            Theme::Serious => Palette {
                table_header: Color::Cyan,
                table_border: Color::Gray,
                text_normal: Color::Reset,
                text_dim: Color::DarkGray,
                accent: Color::Blue,
                highlight_selected: Color::DarkGray,
                status_info: Color::Cyan,
                status_warning: Color::Yellow,
                status_error: Color::Red,
                load_low: Color::Green,
                load_mid: Color::Yellow,
                load_high: Color::Red,
            },
        }
    }

    /// Colour for a utilisation figure on a 0-100 scale.
    pub fn load_color(self, percent: f32) -> Color {
        let palette = self.palette();
        if percent >= 80.0 {
            palette.load_high
        } else if percent >= 40.0 {
            palette.load_mid
        } else {
            palette.load_low
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, ValueEnum)]
pub enum SortField {
    #[default]
    Cpu,
    Mem,
    Pid,
    Name,
}

/// How the process table orders a column.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default, ValueEnum)]
pub enum SortRule {
    /// compare the measured values; unmeasured cpu sorts last.
    #[default]
    Typed,
    /// compare the rendered cell text, numeric only when every cell parses.
    Text,
}

/// Seconds between scheduled refreshes, always within `MIN..=MAX`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct RefreshInterval(u64);

impl RefreshInterval {
    pub const MIN: u64 = 1;
    pub const MAX: u64 = 60;
    pub const DEFAULT: u64 = 5;

    /// Out-of-range values are pulled to the nearest bound.
    pub fn clamped(secs: u64) -> Self {
        Self(secs.clamp(Self::MIN, Self::MAX))
    }

    pub fn try_new(secs: u64) -> Result<Self, TaskwatchError> {
        if (Self::MIN..=Self::MAX).contains(&secs) {
            Ok(Self(secs))
        } else {
            Err(TaskwatchError::config(format!(
                "refresh interval must be between {} and {} seconds, got {secs}",
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn secs(self) -> u64 {
        self.0
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_secs(self.0)
    }

    pub fn step_up(self) -> Self {
        Self::clamped(self.0.saturating_add(1))
    }

    pub fn step_down(self) -> Self {
        Self::clamped(self.0.saturating_sub(1))
    }
}

impl Default for RefreshInterval {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl fmt::Display for RefreshInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 1 {
            write!(f, "1 second")
        } else {
            write!(f, "{} seconds", self.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub theme: Theme,
    pub refresh_interval: RefreshInterval,
    pub initial_sort: SortField,
    pub sort_descending: bool,
    pub sort_rule: SortRule,
    pub terminate_timeout: Duration,
    pub cpu_window: Duration,
    pub headless_rows: usize,
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            theme: Theme::default(),
            refresh_interval: RefreshInterval::default(),
            initial_sort: SortField::Cpu,
            sort_descending: true,
            sort_rule: SortRule::Typed,
            terminate_timeout: Duration::from_millis(3_000),
            cpu_window: Duration::from_secs(1),
            headless_rows: 15,
            log_file: None,
        }
    }
}
