use ratatui::widgets::ListState;
use std::sync::Arc;
use versegen_core::{Level, Picker, RowId, Session, TableStore};

/// The option list popped up over a row's picker.
pub struct PickerPopup {
    pub row: RowId,
    pub level: Level,
    pub state: ListState,
}

pub struct App {
    pub should_quit: bool,
    pub session: Session,

    // Focus within the row grid
    pub focus_row: usize,
    pub focus_level: Level,

    pub popup: Option<PickerPopup>,

    /// Last refused action, shown in the footer until the next key press.
    pub status: Option<String>,

    pub animation_frame: u8, // 0-2 for ellipsis animation
}

impl App {
    pub fn new(store: Arc<dyn TableStore>) -> Self {
        Self {
            should_quit: false,
            session: Session::mount(store),
            focus_row: 0,
            focus_level: Level::Version,
            popup: None,
            status: None,
            animation_frame: 0,
        }
    }

    pub fn focused_row(&self) -> Option<RowId> {
        self.session
            .resolver()
            .rows()
            .get(self.focus_row)
            .map(|row| row.id)
    }

    pub fn picker(&self, row: RowId, level: Level) -> Option<Picker> {
        self.session.resolver().picker(row, level)
    }

    // Grid navigation
    pub fn row_down(&mut self) {
        let len = self.session.resolver().rows().len();
        if len > 0 {
            self.focus_row = (self.focus_row + 1).min(len - 1);
        }
    }

    pub fn row_up(&mut self) {
        self.focus_row = self.focus_row.saturating_sub(1);
    }

    pub fn level_next(&mut self) {
        if let Some(level) = self.focus_level.next() {
            self.focus_level = level;
        }
    }

    pub fn level_prev(&mut self) {
        if let Some(level) = self.focus_level.prev() {
            self.focus_level = level;
        }
    }

    /// Tab walks levels, then wraps onto the next row.
    pub fn cycle_focus(&mut self) {
        match self.focus_level.next() {
            Some(level) => self.focus_level = level,
            None => {
                self.focus_level = Level::Version;
                let len = self.session.resolver().rows().len();
                self.focus_row = if len == 0 { 0 } else { (self.focus_row + 1) % len };
            }
        }
    }

    // Picker popup
    pub fn open_picker(&mut self) {
        let Some(row) = self.focused_row() else {
            return;
        };
        let Some(picker) = self.picker(row, self.focus_level) else {
            return;
        };

        if picker.disabled {
            self.status = Some(format!("Select the fields above {} first", picker.label));
            return;
        }
        if picker.options.is_empty() {
            self.status = Some(if picker.loading {
                format!("Loading {} options...", picker.label)
            } else {
                format!("No {} options available", picker.label)
            });
            return;
        }

        let selected = picker
            .value
            .as_deref()
            .and_then(|value| picker.options.iter().position(|c| c.key == value))
            .unwrap_or(0);
        let mut state = ListState::default();
        state.select(Some(selected));
        self.popup = Some(PickerPopup {
            row,
            level: self.focus_level,
            state,
        });
    }

    pub fn popup_options_len(&self) -> usize {
        self.popup
            .as_ref()
            .and_then(|popup| self.picker(popup.row, popup.level))
            .map(|picker| picker.options.len())
            .unwrap_or(0)
    }

    pub fn popup_down(&mut self) {
        let len = self.popup_options_len();
        if let Some(popup) = &mut self.popup {
            if len > 0 {
                let i = popup.state.selected().unwrap_or(0);
                popup.state.select(Some((i + 1).min(len - 1)));
            }
        }
    }

    pub fn popup_up(&mut self) {
        if let Some(popup) = &mut self.popup {
            let i = popup.state.selected().unwrap_or(0);
            popup.state.select(Some(i.saturating_sub(1)));
        }
    }

    pub fn close_picker(&mut self) {
        self.popup = None;
    }

    /// Apply the highlighted option and move focus to the next level.
    pub fn confirm_picker(&mut self) {
        let Some(popup) = self.popup.take() else {
            return;
        };
        let choice = self.picker(popup.row, popup.level).and_then(|picker| {
            popup
                .state
                .selected()
                .and_then(|i| picker.options.get(i).cloned())
        });
        let Some(choice) = choice else {
            return;
        };

        match self.session.set_field(popup.row, popup.level, &choice.key) {
            Ok(()) => self.level_next(),
            Err(err) => self.status = Some(err.to_string()),
        }
    }

    // Row lifecycle
    pub fn add_row(&mut self) {
        self.session.add_row();
        self.focus_row = self.session.resolver().rows().len() - 1;
        self.focus_level = Level::Version;
    }

    pub fn delete_focused_row(&mut self) {
        let Some(row) = self.focused_row() else {
            return;
        };
        match self.session.delete_row(row) {
            Ok(()) => {
                let len = self.session.resolver().rows().len();
                self.focus_row = self.focus_row.min(len.saturating_sub(1));
            }
            Err(err) => self.status = Some(err.to_string()),
        }
    }

    pub fn can_delete(&self, row: RowId) -> bool {
        self.session.resolver().can_delete(row)
    }

    pub fn generate(&mut self) {
        if self.session.is_generating() {
            return;
        }
        // A refusal is kept by the session and rendered inline.
        let _ = self.session.generate();
    }

    /// Tick animation frame (called by Tick event)
    pub fn tick_animation(&mut self) {
        if self.session.is_generating() || self.session.is_loading_reference() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn unmount(self) {
        self.session.unmount();
    }
}
