use std::cmp::{max, min};

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::prelude::Alignment;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table};

use crate::app::{App, StatusLevel};
use crate::process::ProcessRecord;
use crate::table::{SortColumn, render_cell};
use crate::ui::aux_views;

const NAME_WIDTH: usize = 32;

pub fn render(frame: &mut Frame, area: Rect, app: &mut App) {
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Min(3),
            Constraint::Length(3),
        ])
        .split(area);

    render_title(frame, layout[0], app);
    render_gauges(frame, layout[1], app);
    render_process_list(frame, layout[2], app);
    render_status(frame, layout[3], app);

    if app.history_popup_open() {
        aux_views::render_termination_history(frame, area, app);
    }
    if app.help_popup_open() {
        aux_views::render_help_popup(frame, area, app);
    }
}

fn render_title(frame: &mut Frame, area: Rect, app: &App) {
    let palette = app.theme().palette();
    let sampled = app
        .metrics()
        .map(|metrics| metrics.sampled_at.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());

    let mut spans = vec![
        Span::styled(
            "taskwatch",
            Style::default()
                .fg(palette.table_header)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("{} processes", app.rows().len()),
            Style::default().fg(palette.text_normal),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("every {}", app.refresh_interval()),
            Style::default().fg(palette.text_dim),
        ),
        Span::raw(" | "),
        Span::styled(
            format!("sampled {sampled}"),
            Style::default().fg(palette.text_dim),
        ),
    ];
    if app.is_sampling() {
        spans.push(Span::styled(" ●", Style::default().fg(palette.accent)));
    }

    let paragraph = Paragraph::new(Line::from(spans)).alignment(Alignment::Center);
    frame.render_widget(paragraph, area);
}

fn render_gauges(frame: &mut Frame, area: Rect, app: &App) {
    let theme = app.theme();
    let palette = theme.palette();
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let (cpu, ram, ram_label) = match app.metrics() {
        Some(metrics) => (
            metrics.cpu_percent,
            metrics.memory_used_percent(),
            format!(
                "RAM {:.1}% ({:.0} / {:.0} MB)",
                metrics.memory_used_percent(),
                metrics.memory_used_bytes as f64 / 1_000_000.0,
                metrics.memory_total_bytes as f64 / 1_000_000.0
            ),
        ),
        None => (0.0, 0.0, "RAM --".to_string()),
    };
    let cpu_label = if app.metrics().is_some() {
        format!("CPU {cpu:.1}%")
    } else {
        "CPU --".to_string()
    };

    let cpu_gauge = Gauge::default()
        .gauge_style(Style::default().fg(theme.load_color(cpu)).bg(Color::Reset))
        .ratio(ratio(cpu))
        .label(Span::styled(cpu_label, Style::default().fg(palette.text_normal)));
    let ram_gauge = Gauge::default()
        .gauge_style(Style::default().fg(theme.load_color(ram)).bg(Color::Reset))
        .ratio(ratio(ram))
        .label(Span::styled(ram_label, Style::default().fg(palette.text_normal)));

    frame.render_widget(cpu_gauge, halves[0]);
    frame.render_widget(ram_gauge, halves[1]);
}

fn ratio(percent: f32) -> f64 {
    (f64::from(percent) / 100.0).clamp(0.0, 1.0)
}

fn render_process_list(frame: &mut Frame, area: Rect, app: &mut App) {
    let palette = app.theme().palette();
    let row_count = app.rows().len();
    let visible_height = area.height.saturating_sub(3) as usize; // borders + header
    let selected_index = app.selected_index();

    let mut offset = app.table_scroll_offset().min(row_count.saturating_sub(1));
    if visible_height == 0 {
        offset = 0;
    } else if let Some(selected) = selected_index {
        if selected >= offset + visible_height {
            offset = selected + 1 - visible_height;
        } else if selected < offset {
            offset = selected;
        }
    }
    app.set_table_scroll_offset(offset);

    let (sort_column, sort_direction) = app.sort();
    let header_cells = SortColumn::ALL.into_iter().map(|column| {
        let mut title = column.display_name().to_string();
        let mut style = Style::default().fg(palette.table_header);
        if column == sort_column {
            title.push(' ');
            title.push_str(sort_direction.arrow());
            style = Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD);
        }
        Cell::from(title).style(style)
    });
    let header = Row::new(header_cells).height(1);

    let rows = app.rows();
    let end = min(offset.saturating_add(visible_height), row_count);
    let displayed = if offset >= end {
        &rows[0..0]
    } else {
        &rows[offset..end]
    };
    let table_rows: Vec<Row> = displayed
        .iter()
        .enumerate()
        .map(|(idx, record)| build_row(app, record, Some(idx + offset) == selected_index))
        .collect();

    let widths = [
        Constraint::Length(8),
        Constraint::Min(NAME_WIDTH as u16),
        Constraint::Length(8),
        Constraint::Length(12),
    ];

    let table = Table::new(table_rows, widths)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(palette.table_border)),
        )
        .header(header)
        .column_spacing(1);

    frame.render_widget(table, area);

    if row_count > visible_height && visible_height > 0 {
        render_scrollbar(
            frame,
            area,
            offset,
            visible_height,
            row_count,
            palette.table_border,
        );
    }
}

fn build_row(app: &App, record: &ProcessRecord, is_selected: bool) -> Row<'static> {
    let theme = app.theme();
    let palette = theme.palette();

    let mut style = Style::default().fg(palette.text_normal);
    if is_selected {
        style = style.bg(palette.highlight_selected);
    }

    let cpu_style = match record.cpu_percent {
        Some(cpu) => Style::default().fg(theme.load_color(cpu)),
        None => Style::default()
            .fg(palette.text_dim)
            .add_modifier(Modifier::ITALIC),
    };

    Row::new(vec![
        Cell::from(format!("{:>8}", record.pid)),
        Cell::from(truncated_with_indicator(&record.name, NAME_WIDTH)),
        Cell::from(format!("{:>7}", render_cell(record, SortColumn::Cpu))).style(cpu_style),
        Cell::from(format!("{:>11}", render_cell(record, SortColumn::Memory))),
    ])
    .style(style)
    .height(1)
}

fn render_scrollbar(
    frame: &mut Frame,
    area: Rect,
    offset: usize,
    window: usize,
    total: usize,
    color: Color,
) {
    let scrollbar_area = Rect {
        x: area.x + area.width.saturating_sub(1),
        y: area.y + 1,
        width: 1,
        height: area.height.saturating_sub(2),
    };

    if scrollbar_area.height == 0 {
        return;
    }

    let ratio = window as f32 / total as f32;
    let handle_height = max((scrollbar_area.height as f32 * ratio).round() as u16, 1);
    let max_offset = total.saturating_sub(window);
    let handle_offset = if max_offset == 0 {
        0
    } else {
        ((offset as f32 / max_offset as f32) * (scrollbar_area.height - handle_height) as f32)
            .round() as u16
    };

    let lines: Vec<Line> = (0..scrollbar_area.height)
        .map(|y| {
            let symbol = if y >= handle_offset && y < handle_offset + handle_height {
                "█"
            } else {
                "░"
            };
            Line::from(Span::styled(symbol.to_string(), Style::default().fg(color)))
        })
        .collect();

    frame.render_widget(Paragraph::new(lines), scrollbar_area);
}

fn render_status(frame: &mut Frame, area: Rect, app: &App) {
    let palette = app.theme().palette();
    let mut lines = vec![Line::from(""), Line::from("")];

    if let Some((message, level)) = app.status_message() {
        let color = match level {
            StatusLevel::Info => palette.status_info,
            StatusLevel::Warning => palette.status_warning,
            StatusLevel::Error => palette.status_error,
        };
        lines[0] = Line::from(Span::styled(message.clone(), Style::default().fg(color)));
    }

    lines[1] = Line::from(Span::styled(hints(app), Style::default().fg(palette.text_dim)));

    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(palette.table_border));

    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn hints(app: &App) -> String {
    if app.history_popup_open() || app.help_popup_open() {
        return "any key closes".to_string();
    }
    let mut base = "p/n/c/m sort | +/- interval | r refresh | h history | ? help | q quit".to_string();
    if app.selected_pid().is_some() {
        base.insert_str(0, "k terminate | Esc deselect | ");
    }
    base
}

fn truncated_with_indicator(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        value.to_string()
    } else {
        value
            .chars()
            .take(max_len.saturating_sub(1))
            .collect::<String>()
            + "…"
    }
}
