use ratatui::crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tracing::trace;

/// How an input session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOutcome {
    Editing,
    /// Confirmed with Enter.
    Commit,
    /// Confirmed with Tab, the caller moves on to the next cell.
    CommitNext,
    Cancel,
}

/// Single line editor holding the working string of a cell edit or a command.
#[derive(Debug, Default, Clone)]
pub struct Inputter {
    current_input: String,
    curser_pos: usize,
}

impl Inputter {
    pub fn with_text(s: &str) -> Self {
        let mut input = Inputter::default();
        input.set(s);
        input
    }

    pub fn read(&mut self, key: KeyEvent) -> InputOutcome {
        let outcome = match (key.code, key.modifiers) {
            (KeyCode::Enter, _) => InputOutcome::Commit,
            (KeyCode::Tab, _) => InputOutcome::CommitNext,
            (KeyCode::Esc, _) => InputOutcome::Cancel,
            (KeyCode::Backspace, _) => {
                self.backspace();
                InputOutcome::Editing
            }
            (KeyCode::Delete, _) => {
                self.delete();
                InputOutcome::Editing
            }
            (KeyCode::Left, _) => {
                self.curser_pos = self.curser_pos.saturating_sub(1);
                InputOutcome::Editing
            }
            (KeyCode::Right, _) => {
                self.curser_pos = (self.curser_pos + 1).min(self.char_count());
                InputOutcome::Editing
            }
            (KeyCode::Home, _) => {
                self.curser_pos = 0;
                InputOutcome::Editing
            }
            (KeyCode::End, _) => {
                self.curser_pos = self.char_count();
                InputOutcome::Editing
            }
            (KeyCode::Char(c), m) if !m.contains(KeyModifiers::CONTROL) => {
                self.insert(c);
                InputOutcome::Editing
            }
            _ => InputOutcome::Editing,
        };
        trace!(
            "Input {:?} => \"{}\" ({:?})",
            key.code, self.current_input, outcome
        );
        outcome
    }

    pub fn set(&mut self, s: &str) {
        self.current_input = s.to_string();
        self.curser_pos = self.char_count();
    }

    pub fn text(&self) -> &str {
        &self.current_input
    }

    pub fn cursor(&self) -> usize {
        self.curser_pos
    }

    fn char_count(&self) -> usize {
        self.current_input.chars().count()
    }

    fn insert(&mut self, chr: char) {
        let at = self.getbytepos(self.curser_pos);
        self.current_input.insert(at, chr);
        self.curser_pos += 1;
    }

    fn backspace(&mut self) {
        if self.curser_pos > 0 {
            let at = self.getbytepos(self.curser_pos - 1);
            self.current_input.remove(at);
            self.curser_pos -= 1;
        }
    }

    fn delete(&mut self) {
        if self.curser_pos < self.char_count() {
            let at = self.getbytepos(self.curser_pos);
            self.current_input.remove(at);
        }
    }

    fn getbytepos(&self, char_pos: usize) -> usize {
        self.current_input
            .char_indices()
            .nth(char_pos)
            .map(|(byte_idx, _)| byte_idx)
            .unwrap_or(self.current_input.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_str(input: &mut Inputter, s: &str) {
        for c in s.chars() {
            input.read(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn edits_at_the_cursor() {
        let mut input = Inputter::with_text("hllo");
        assert_eq!(input.cursor(), 4);
        input.read(key(KeyCode::Home));
        input.read(key(KeyCode::Right));
        type_str(&mut input, "e");
        assert_eq!(input.text(), "hello");
        input.read(key(KeyCode::End));
        input.read(key(KeyCode::Backspace));
        assert_eq!(input.text(), "hell");
        input.read(key(KeyCode::Home));
        input.read(key(KeyCode::Delete));
        assert_eq!(input.text(), "ell");
    }

    #[test]
    fn handles_multibyte_characters() {
        let mut input = Inputter::default();
        type_str(&mut input, "grüße");
        input.read(key(KeyCode::Left));
        input.read(key(KeyCode::Backspace));
        assert_eq!(input.text(), "grüe");
    }

    #[test]
    fn reports_how_editing_ended() {
        let mut input = Inputter::default();
        assert_eq!(input.read(key(KeyCode::Char('4'))), InputOutcome::Editing);
        assert_eq!(input.read(key(KeyCode::Enter)), InputOutcome::Commit);
        assert_eq!(input.read(key(KeyCode::Tab)), InputOutcome::CommitNext);
        assert_eq!(input.read(key(KeyCode::Esc)), InputOutcome::Cancel);
        assert_eq!(input.text(), "4");
    }
}
