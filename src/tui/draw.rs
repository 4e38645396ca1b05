use std::time::Instant;

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph},
};
use unicode_width::UnicodeWidthStr;

use super::app::{StatusType, TuiApp};
use crate::controller::{ControllerState, InputMode, SessionController};

/// Shortcut grid columns in keys mode
const GRID_COLUMNS: usize = 4;

fn state_color(state: ControllerState) -> Color {
    match state {
        ControllerState::Unbound => Color::DarkGray,
        ControllerState::BoundConnecting => Color::Yellow,
        ControllerState::BoundConnected => Color::Green,
        ControllerState::BoundDisconnected => Color::Red,
    }
}

fn bottom_height(app: &TuiApp, controller: &SessionController) -> u16 {
    if controller.state().is_bound() && controller.input_mode() == InputMode::Keys {
        let rows = app.shortcuts.len().div_ceil(GRID_COLUMNS).max(1);
        rows as u16 + 1
    } else {
        1
    }
}

/// Draw the whole screen
pub fn draw(f: &mut Frame, app: &mut TuiApp, controller: &SessionController, now: Instant) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),                            // Header
            Constraint::Min(0),                               // Terminal output
            Constraint::Length(1),                            // Status / key echo
            Constraint::Length(bottom_height(app, controller)), // Input line or shortcut grid
        ])
        .split(f.area());

    draw_header(f, chunks[0], controller);
    if controller.state().is_bound() {
        draw_output(f, chunks[1], app, controller);
    } else {
        draw_bind_prompt(f, chunks[1]);
    }
    draw_status_line(f, chunks[2], app, controller, now);
    match (controller.state().is_bound(), controller.input_mode()) {
        (true, InputMode::Keys) => draw_shortcut_grid(f, chunks[3], app),
        (true, InputMode::Text) => draw_input_line(f, chunks[3], "> ", &app.input),
        (false, _) => draw_input_line(f, chunks[3], "code> ", &app.input),
    }
}

fn draw_header(f: &mut Frame, area: Rect, controller: &SessionController) {
    let state = controller.state();
    let indicator = if state == ControllerState::BoundConnected { "●" } else { "○" };
    let mut spans = vec![
        Span::styled(
            format!("{} {}", indicator, state),
            Style::default().fg(state_color(state)).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  {}", controller.settings().origin),
            Style::default().fg(Color::Gray),
        ),
    ];
    if let Some(session) = controller.session() {
        spans.push(Span::styled(
            format!("  device {}", session.device_id),
            Style::default().fg(Color::Cyan),
        ));
    }
    let mode = match controller.input_mode() {
        InputMode::Text => "[TEXT]",
        InputMode::Keys => "[KEYS]",
    };
    spans.push(Span::styled(
        format!("  {}", mode),
        Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD),
    ));
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_output(f: &mut Frame, area: Rect, app: &mut TuiApp, controller: &SessionController) {
    let text: &Text<'static> = app.output_text(controller.display());
    // Keep the newest lines visible, like a terminal
    let overflow = text.lines.len().saturating_sub(area.height as usize);
    for (row, line) in text.lines[overflow..].iter().enumerate() {
        let line_area = Rect {
            y: area.y + row as u16,
            height: 1,
            ..area
        };
        f.render_widget(line, line_area);
    }
}

fn draw_bind_prompt(f: &mut Frame, area: Rect) {
    let lines = vec![
        Line::from(""),
        Line::from(Span::styled(
            "Not bound to a device.",
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from("Type the bind code shown by the agent and press Enter."),
    ];
    let block = Block::default().borders(Borders::NONE);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_status_line(
    f: &mut Frame,
    area: Rect,
    app: &TuiApp,
    controller: &SessionController,
    now: Instant,
) {
    let line = if let Some((message, status_type)) = &app.status_message {
        let color = match status_type {
            StatusType::Success => Color::Green,
            StatusType::Error => Color::Red,
            StatusType::Info => Color::Yellow,
        };
        Line::from(Span::styled(message.clone(), Style::default().fg(color)))
    } else if let Some(label) = controller.key_echo(now) {
        Line::from(vec![
            Span::styled("sent ", Style::default().fg(Color::Gray)),
            Span::styled(
                label.to_string(),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        ])
    } else {
        let key = |k: &'static str| {
            Span::styled(k, Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        };
        let hint = |t: &'static str| Span::styled(t, Style::default().fg(Color::Gray));
        Line::from(vec![
            key("Ctrl+T"),
            hint(" text/keys  "),
            key("Ctrl+U"),
            hint(" unbind  "),
            key("Ctrl+Q"),
            hint(" quit"),
        ])
    };
    f.render_widget(Paragraph::new(line), area);
}

fn draw_input_line(f: &mut Frame, area: Rect, prompt: &str, input: &str) {
    let line = Line::from(vec![
        Span::styled(prompt.to_string(), Style::default().fg(Color::Green)),
        Span::raw(input.to_string()),
        Span::styled("_", Style::default().fg(Color::Green)),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn draw_shortcut_grid(f: &mut Frame, area: Rect, app: &TuiApp) {
    let block = Block::default()
        .borders(Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let column_width = (inner.width as usize / GRID_COLUMNS).max(1);
    let lines: Vec<Line> = app
        .shortcuts
        .chunks(GRID_COLUMNS)
        .enumerate()
        .map(|(row, shortcuts)| {
            let spans: Vec<Span> = shortcuts
                .iter()
                .enumerate()
                .flat_map(|(col, shortcut)| {
                    let slot = row * GRID_COLUMNS + col;
                    let fkey = if slot < 12 { format!("F{}", slot + 1) } else { String::new() };
                    let label = format!(" {}", shortcut.label);
                    let used = fkey.width() + label.width();
                    vec![
                        Span::styled(fkey, Style::default().fg(Color::Yellow)),
                        Span::raw(label),
                        Span::raw(" ".repeat(column_width.saturating_sub(used))),
                    ]
                })
                .collect();
            Line::from(spans)
        })
        .collect();
    f.render_widget(Paragraph::new(lines), inner);
}
