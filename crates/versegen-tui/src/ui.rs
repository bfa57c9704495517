use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
};
use crate::app::App;
use versegen_core::{Level, Picker};

/// Height of one row block: border, field line, border.
const ROW_HEIGHT: u16 = 3;

pub fn render(app: &mut App, frame: &mut Frame) {
    let area = frame.area();

    // Main layout: header, body, footer
    let [header_area, body_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(frame, header_area);
    render_body(app, frame, body_area);
    render_footer(app, frame, footer_area);

    if app.popup.is_some() {
        render_picker_popup(app, frame, area);
    }
}

fn render_header(frame: &mut Frame, area: Rect) {
    let title = Line::from(vec![
        Span::styled(" Verse Generator ", Style::default().fg(Color::Cyan).bold()),
        Span::styled(
            format!("v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(Color::DarkGray),
        ),
    ]);

    let header = Paragraph::new(title).style(Style::default().bg(Color::DarkGray));
    frame.render_widget(header, area);
}

fn ellipsis(app: &App) -> &'static str {
    match app.animation_frame {
        0 => ".",
        1 => "..",
        _ => "...",
    }
}

fn render_body(app: &App, frame: &mut Frame, area: Rect) {
    let messages = status_lines(app);
    let results = app
        .session
        .result()
        .map(|result| result.lines.clone())
        .unwrap_or_default();

    let [messages_area, rows_area, results_area] = Layout::vertical([
        Constraint::Length(messages.len() as u16),
        Constraint::Min(ROW_HEIGHT),
        Constraint::Length(if results.is_empty() { 0 } else { results.len() as u16 * 2 + 2 }),
    ])
    .areas(area);

    frame.render_widget(Paragraph::new(messages).wrap(Wrap { trim: true }), messages_area);
    render_rows(app, frame, rows_area);

    if !results.is_empty() {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green))
            .title(" Results ");
        let text: Vec<Line> = results.into_iter().map(Line::from).collect();
        let paragraph = Paragraph::new(text).block(block).wrap(Wrap { trim: true });
        frame.render_widget(paragraph, results_area);
    }
}

/// Loading and error text shown above the rows.
fn status_lines(app: &App) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    let session = &app.session;

    if session.is_loading_reference() {
        lines.push(Line::styled(
            format!("Loading versions and books{}", ellipsis(app)),
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(err) = session.reference_error() {
        lines.push(Line::styled(err, Style::default().fg(Color::Red)));
    }
    if let Some(err) = session.generate_error() {
        lines.push(Line::styled(err.to_string(), Style::default().fg(Color::Red)));
    }
    if session.is_generating() {
        lines.push(Line::styled(
            format!("Generating{}", ellipsis(app)),
            Style::default().fg(Color::Yellow),
        ));
    }
    lines
}

fn render_rows(app: &App, frame: &mut Frame, area: Rect) {
    let rows = app.session.resolver().rows();
    let visible = (area.height / ROW_HEIGHT).max(1) as usize;
    // Keep the focused row on screen
    let first = app.focus_row.saturating_sub(visible - 1);

    for (slot, (index, row)) in rows.iter().enumerate().skip(first).take(visible).enumerate() {
        let row_area = Rect::new(
            area.x,
            area.y + slot as u16 * ROW_HEIGHT,
            area.width,
            ROW_HEIGHT,
        );
        let focused = index == app.focus_row;

        let mut title = format!(" Row {} ", index + 1);
        if app.can_delete(row.id) {
            title.push_str("[x] ");
        }
        let border = if focused { Color::Cyan } else { Color::DarkGray };
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .title(title);

        let mut spans = Vec::new();
        for level in Level::ALL {
            if let Some(picker) = app.picker(row.id, level) {
                let active = focused && level == app.focus_level;
                spans.extend(picker_spans(app, &picker, active));
                spans.push(Span::raw("  "));
            }
        }

        frame.render_widget(Paragraph::new(Line::from(spans)).block(block), row_area);
    }
}

fn picker_spans(app: &App, picker: &Picker, active: bool) -> Vec<Span<'static>> {
    let value = match picker.selected_label() {
        Some(label) => label.to_string(),
        None if picker.loading => format!("loading{}", ellipsis(app)),
        None => format!("Select {}", picker.label),
    };

    let mut style = if picker.disabled {
        Style::default().fg(Color::DarkGray)
    } else if picker.value.is_some() {
        Style::default().fg(Color::White)
    } else {
        Style::default().fg(Color::Gray)
    };
    if active {
        style = style.bg(Color::Blue).add_modifier(Modifier::BOLD);
    }

    vec![
        Span::styled(format!("{}: ", picker.label), Style::default().fg(Color::DarkGray)),
        Span::styled(format!(" {} ▼ ", value), style),
    ]
}

fn render_footer(app: &App, frame: &mut Frame, area: Rect) {
    // Key style: dark background with bright text for visibility on both light/dark terminals
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().bg(Color::Black).fg(Color::White);

    if let Some(status) = &app.status {
        let line = Line::styled(format!(" {} ", status), Style::default().fg(Color::Red));
        frame.render_widget(Paragraph::new(line), area);
        return;
    }

    let hints: &[(&str, &str)] = if app.popup.is_some() {
        &[("↑↓", "move"), ("Enter", "select"), ("Esc", "cancel")]
    } else {
        &[
            ("↑↓", "row"),
            ("←→", "field"),
            ("Enter", "pick"),
            ("+", "more"),
            ("d", "delete"),
            ("g", "generate"),
            ("q", "quit"),
        ]
    };

    let mut spans = Vec::new();
    for (key, label) in hints {
        spans.push(Span::styled(format!(" {} ", key), key_style));
        spans.push(Span::styled(format!(" {} ", label), label_style));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn render_picker_popup(app: &mut App, frame: &mut Frame, area: Rect) {
    let Some(popup) = app.popup.as_ref() else {
        return;
    };
    let Some(picker) = app.picker(popup.row, popup.level) else {
        return;
    };

    // Calculate popup size and position (centered)
    let popup_width = 40.min(area.width.saturating_sub(4));
    let popup_height = (picker.options.len() as u16 + 2).min(area.height.saturating_sub(4));

    let popup_x = (area.width.saturating_sub(popup_width)) / 2;
    let popup_y = (area.height.saturating_sub(popup_height)) / 2;

    let popup_area = Rect::new(popup_x, popup_y, popup_width, popup_height);

    // Clear the area behind the popup
    frame.render_widget(Clear, popup_area);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(format!(" {} ", picker.label));

    let items: Vec<ListItem> = picker
        .options
        .iter()
        .map(|choice| {
            let style = if picker.value.as_deref() == Some(choice.key.as_str()) {
                Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            ListItem::new(format!(" {} ", choice.label)).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(block)
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::White)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("> ");

    if let Some(popup) = app.popup.as_mut() {
        frame.render_stateful_widget(list, popup_area, &mut popup.state);
    }
}
