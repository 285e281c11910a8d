use std::cmp::Ordering;

use crate::config::{SortField, SortRule};
use crate::process::ProcessRecord;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SortColumn {
    Pid,
    Name,
    Cpu,
    Memory,
}

impl SortColumn {
    pub const ALL: [SortColumn; 4] = [
        SortColumn::Pid,
        SortColumn::Name,
        SortColumn::Cpu,
        SortColumn::Memory,
    ];

    pub fn next(self) -> Self {
        let idx = Self::ALL.iter().position(|c| *c == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }

    pub fn prev(self) -> Self {
        let idx = Self::ALL.iter().position(|c| *c == self).unwrap_or(0);
        Self::ALL[(idx + Self::ALL.len() - 1) % Self::ALL.len()]
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SortColumn::Pid => "PID",
            SortColumn::Name => "Name",
            SortColumn::Cpu => "CPU",
            SortColumn::Memory => "Memory",
        }
    }
}

impl From<SortField> for SortColumn {
    fn from(field: SortField) -> Self {
        match field {
            SortField::Cpu => SortColumn::Cpu,
            SortField::Mem => SortColumn::Memory,
            SortField::Pid => SortColumn::Pid,
            SortField::Name => SortColumn::Name,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn flipped(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }

    pub fn arrow(self) -> &'static str {
        match self {
            SortDirection::Ascending => "▲",
            SortDirection::Descending => "▼",
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub enum SortStrategy {
    /// Numeric columns compare their values. Rows whose CPU has not been
    /// measured yet sort after every measured row in both directions.
    #[default]
    Typed,
    /// Compare the text the table displays. A column is compared as numbers
    /// only if every one of its cells parses as one; otherwise the whole
    /// pass compares the text bytewise.
    RenderedText,
}

impl From<SortRule> for SortStrategy {
    fn from(rule: SortRule) -> Self {
        match rule {
            SortRule::Typed => SortStrategy::Typed,
            SortRule::Text => SortStrategy::RenderedText,
        }
    }
}

/// Text shown for one cell of the process table.
pub fn render_cell(record: &ProcessRecord, column: SortColumn) -> String {
    match column {
        SortColumn::Pid => record.pid.to_string(),
        SortColumn::Name => record.name.clone(),
        SortColumn::Cpu => match record.cpu_percent {
            Some(cpu) => format!("{cpu:.1}"),
            None => "n/a".to_string(),
        },
        SortColumn::Memory => format!("{:.2}", record.memory_bytes as f64 / 1_000_000.0),
    }
}

/// Latest snapshot rows in display order, plus the sort and selection that
/// survive from one snapshot to the next.
#[derive(Debug, Clone)]
pub struct TableModel {
    rows: Vec<ProcessRecord>,
    sort_column: SortColumn,
    sort_direction: SortDirection,
    strategy: SortStrategy,
    selected_pid: Option<u32>,
}

impl TableModel {
    pub fn new(column: SortColumn, direction: SortDirection, strategy: SortStrategy) -> Self {
        Self {
            rows: Vec::new(),
            sort_column: column,
            sort_direction: direction,
            strategy,
            selected_pid: None,
        }
    }

    /// Swaps in a complete snapshot and orders it by the current sort.
    /// The selection is kept as-is even when its pid is absent.
    pub fn replace(&mut self, rows: Vec<ProcessRecord>) {
        self.rows = rows;
        self.apply_sort();
    }

    pub fn set_sort(&mut self, column: SortColumn, direction: SortDirection) {
        self.sort_column = column;
        self.sort_direction = direction;
        self.apply_sort();
    }

    pub fn sort(&self) -> (SortColumn, SortDirection) {
        (self.sort_column, self.sort_direction)
    }

    pub fn sorted_rows(&self) -> &[ProcessRecord] {
        &self.rows
    }

    pub fn select(&mut self, pid: u32) {
        self.selected_pid = Some(pid);
    }

    pub fn clear_selection(&mut self) {
        self.selected_pid = None;
    }

    pub fn selected_pid(&self) -> Option<u32> {
        self.selected_pid
    }

    pub fn selected_index(&self) -> Option<usize> {
        let pid = self.selected_pid?;
        self.rows.iter().position(|row| row.pid == pid)
    }

    fn apply_sort(&mut self) {
        let column = self.sort_column;
        let direction = self.sort_direction;
        match self.strategy {
            SortStrategy::Typed => self
                .rows
                .sort_by(|a, b| compare_typed(a, b, column, direction)),
            SortStrategy::RenderedText => sort_rendered(&mut self.rows, column, direction),
        }
    }
}

fn compare_typed(
    a: &ProcessRecord,
    b: &ProcessRecord,
    column: SortColumn,
    direction: SortDirection,
) -> Ordering {
    match column {
        SortColumn::Pid => direction.apply(a.pid.cmp(&b.pid)),
        SortColumn::Name => direction.apply(a.name.cmp(&b.name)),
        SortColumn::Memory => direction.apply(a.memory_bytes.cmp(&b.memory_bytes)),
        SortColumn::Cpu => match (a.cpu_percent, b.cpu_percent) {
            (Some(x), Some(y)) => direction.apply(x.total_cmp(&y)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        },
    }
}

enum CellKey {
    Number(f64),
    Text(String),
}

impl CellKey {
    fn compare(&self, other: &CellKey) -> Ordering {
        match (self, other) {
            (CellKey::Number(a), CellKey::Number(b)) => a.total_cmp(b),
            (CellKey::Text(a), CellKey::Text(b)) => a.cmp(b),
            // a pass never mixes the two
            (CellKey::Number(_), CellKey::Text(_)) => Ordering::Less,
            (CellKey::Text(_), CellKey::Number(_)) => Ordering::Greater,
        }
    }
}

fn sort_rendered(rows: &mut Vec<ProcessRecord>, column: SortColumn, direction: SortDirection) {
    let cells: Vec<String> = rows.iter().map(|row| render_cell(row, column)).collect();
    let numbers: Option<Vec<f64>> = cells
        .iter()
        .map(|cell| cell.trim().parse::<f64>().ok())
        .collect();

    let keys: Vec<CellKey> = match numbers {
        Some(values) => values.into_iter().map(CellKey::Number).collect(),
        None => cells.into_iter().map(CellKey::Text).collect(),
    };

    let mut keyed: Vec<(CellKey, ProcessRecord)> = keys.into_iter().zip(rows.drain(..)).collect();
    keyed.sort_by(|(a, _), (b, _)| direction.apply(a.compare(b)));
    rows.extend(keyed.into_iter().map(|(_, row)| row));
}
