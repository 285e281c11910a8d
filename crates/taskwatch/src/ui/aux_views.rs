use ratatui::Frame;
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use crate::app::App;
use crate::error::TerminationError;

pub fn render_termination_history(frame: &mut Frame, area: Rect, app: &App) {
    let popup = centered_rect(60, 70, area);
    let palette = app.theme().palette();

    let mut lines = Vec::new();
    let history = app.history();

    if history.is_empty() {
        lines.push(Line::from("nothing terminated yet."));
    } else {
        for (idx, entry) in history.iter().enumerate() {
            let header = format!(
                "{}  {} ({})",
                entry.timestamp.format("%H:%M:%S"),
                entry.process_name,
                entry.pid
            );
            lines.push(Line::from(Span::styled(
                header,
                Style::default()
                    .fg(palette.text_normal)
                    .add_modifier(Modifier::BOLD),
            )));

            let (status_text, status_color) = match &entry.outcome {
                Ok(ack) => (
                    format!("exited after {} ms", ack.waited.as_millis()),
                    palette.load_low,
                ),
                Err(TerminationError::NotFound) => {
                    ("already gone".to_string(), palette.status_warning)
                }
                Err(err) => (err.to_string(), palette.status_error),
            };

            lines.push(Line::from(vec![
                Span::raw("          "),
                Span::styled("SIGTERM", Style::default().fg(palette.text_dim)),
                Span::raw(" \u{2192} "),
                Span::styled(status_text, Style::default().fg(status_color)),
            ]));

            if idx + 1 < history.len() {
                lines.push(Line::default());
            }
        }
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.table_border))
        .title(Line::from(Span::styled(
            " Termination History ",
            Style::default()
                .fg(palette.table_header)
                .add_modifier(Modifier::BOLD),
        )));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, popup);
    frame.render_widget(paragraph, popup);
}

const HELP: &[(&str, &[(&str, &str)])] = &[
    (
        "NAVIGATION",
        &[
            ("↑↓ PgUp PgDn", "move selection"),
            ("g G", "jump top/bottom"),
            ("Esc", "clear selection"),
        ],
    ),
    (
        "SORTING",
        &[
            ("p n c m", "sort by pid/name/cpu/ram"),
            ("", "same key again flips direction"),
            ("< >", "cycle sort column"),
        ],
    ),
    (
        "ACTIONS",
        &[
            ("k Enter Del", "terminate selected (SIGTERM)"),
            ("r", "refresh now"),
            ("+ -", "refresh interval ±1s"),
            ("h", "termination history"),
        ],
    ),
    (
        "",
        &[("?", "this help"), ("q", "quit"), ("Ctrl+C", "quit instantly")],
    ),
];

pub fn render_help_popup(frame: &mut Frame, area: Rect, app: &App) {
    let popup = centered_rect(60, 70, area);
    let palette = app.theme().palette();

    let heading = Style::default()
        .fg(palette.table_header)
        .add_modifier(Modifier::BOLD);
    let body = Style::default().fg(palette.text_normal);
    let dim = Style::default().fg(palette.text_dim);

    let mut lines = vec![Line::default()];
    for (section, entries) in HELP {
        if !section.is_empty() {
            lines.push(Line::from(Span::styled(*section, heading)));
        }
        for (keys, action) in entries.iter() {
            lines.push(Line::from(Span::styled(
                format!("  {keys:<13} {action}"),
                body,
            )));
        }
        lines.push(Line::default());
    }
    lines.push(Line::from(Span::styled(
        "Press any key to close",
        dim.add_modifier(Modifier::ITALIC),
    )));

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.table_border))
        .title(Line::from(Span::styled(" taskwatch Help ", heading)));

    let paragraph = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false });

    frame.render_widget(Clear, popup);
    frame.render_widget(paragraph, popup);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_width = (area.width * percent_x) / 100;
    let popup_height = (area.height * percent_y) / 100;
    Rect {
        x: area.x + (area.width.saturating_sub(popup_width)) / 2,
        y: area.y + (area.height.saturating_sub(popup_height)) / 2,
        width: popup_width.max(1),
        height: popup_height.max(1),
    }
}
