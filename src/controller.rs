use std::time::Duration;
use tracing::trace;

use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use tg::domain::{GridConfig, GridError, Message};
use tg::grid::Grid;

use crate::ui::{CMDLINE_HEIGHT, TABLE_HEADER_HEIGHT};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &GridConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, grid: &Grid) -> Result<Option<Message>, GridError> {
        if !event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(None);
        }
        let message = match event::read()? {
            Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                if grid.raw_keyevents() {
                    Some(Message::RawKey(key))
                } else {
                    self.handle_key(key)
                }
            }
            Event::Resize(_, height) => Some(Message::Resize(body_rows(height))),
            Event::FocusLost => Some(Message::Blur),
            _ => None,
        };
        Ok(message)
    }

    fn handle_key(&self, key: KeyEvent) -> Option<Message> {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            return match key.code {
                KeyCode::Char('c') => Some(Message::Quit),
                _ => None,
            };
        }
        let message = match key.code {
            KeyCode::Char('q') => Some(Message::Quit),
            KeyCode::Up | KeyCode::Char('k') => Some(Message::MoveUp),
            KeyCode::Down | KeyCode::Char('j') => Some(Message::MoveDown),
            KeyCode::Left | KeyCode::Char('h') => Some(Message::MoveLeft),
            KeyCode::Right | KeyCode::Char('l') => Some(Message::MoveRight),
            KeyCode::PageUp => Some(Message::MovePageUp),
            KeyCode::PageDown => Some(Message::MovePageDown),
            KeyCode::Home | KeyCode::Char('g') => Some(Message::MoveBeginning),
            KeyCode::End | KeyCode::Char('G') => Some(Message::MoveEnd),
            KeyCode::Enter => Some(Message::Enter),
            KeyCode::Esc => Some(Message::Exit),
            KeyCode::Char('?') => Some(Message::Help),
            KeyCode::Char('/') => Some(Message::Search),
            KeyCode::Char('m') => Some(Message::FieldMenu),
            KeyCode::Char('f') => Some(Message::Filter),
            KeyCode::Char('x') => Some(Message::ClearFilters),
            KeyCode::Char('s') => Some(Message::SortAscending),
            KeyCode::Char('S') => Some(Message::SortDescending),
            KeyCode::Char('a') => Some(Message::AddRecord),
            KeyCode::Char('b') => Some(Message::AddBulk),
            KeyCode::Char('n') => Some(Message::AddTextField),
            KeyCode::Char('N') => Some(Message::AddNumberField),
            KeyCode::Char('<') => Some(Message::MoveFieldLeft),
            KeyCode::Char('>') => Some(Message::MoveFieldRight),
            KeyCode::Char('T') => Some(Message::NewTable),
            KeyCode::Char('L') => Some(Message::LoadMore),
            KeyCode::Char('y') => Some(Message::CopyCell),
            KeyCode::Char('Y') => Some(Message::CopyRow),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}

/// Terminal rows left for table rows once the chrome is drawn.
pub fn body_rows(terminal_height: u16) -> usize {
    (terminal_height as usize).saturating_sub(CMDLINE_HEIGHT + TABLE_HEADER_HEIGHT)
}
