use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use crate::app::App;
use crate::tui::AppEvent;

pub fn handle_event(app: &mut App, event: AppEvent) {
    match event {
        AppEvent::Key(key) => handle_key(app, key),
        AppEvent::Resize => {}
        AppEvent::Tick => app.tick_animation(),
    }
}

fn handle_key(app: &mut App, key: KeyEvent) {
    // Global keys that work in any mode
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        app.should_quit = true;
        return;
    }

    app.status = None;

    if app.popup.is_some() {
        handle_popup(app, key);
    } else {
        handle_grid(app, key);
    }
}

fn handle_popup(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.popup_down(),
        KeyCode::Char('k') | KeyCode::Up => app.popup_up(),
        KeyCode::Enter => app.confirm_picker(),
        KeyCode::Esc | KeyCode::Char('q') => app.close_picker(),
        _ => {}
    }
}

fn handle_grid(app: &mut App, key: KeyEvent) {
    match key.code {
        // Quit
        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,

        // Navigation
        KeyCode::Char('j') | KeyCode::Down => app.row_down(),
        KeyCode::Char('k') | KeyCode::Up => app.row_up(),
        KeyCode::Char('l') | KeyCode::Right => app.level_next(),
        KeyCode::Char('h') | KeyCode::Left => app.level_prev(),
        KeyCode::Tab => app.cycle_focus(),

        // Open the picker for the focused field
        KeyCode::Enter | KeyCode::Char(' ') => app.open_picker(),

        // Rows
        KeyCode::Char('+') | KeyCode::Char('m') => app.add_row(),
        KeyCode::Char('d') | KeyCode::Delete => app.delete_focused_row(),

        KeyCode::Char('g') => app.generate(),

        _ => {}
    }
}
