//! Input line editor with per-session send history.

#[derive(Debug, Clone, Default)]
pub struct Editor {
    pub buffer: String,
    pub history: Vec<String>,
    pub history_cursor: Option<usize>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.history_cursor = None;
    }

    pub fn insert_char(&mut self, ch: char) {
        self.buffer.push(ch);
        self.history_cursor = None;
    }

    pub fn backspace(&mut self) {
        self.buffer.pop();
        self.history_cursor = None;
    }

    pub fn insert_newline(&mut self) {
        self.buffer.push('\n');
        self.history_cursor = None;
    }

    pub fn paste(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.history_cursor = None;
    }

    pub fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }
        let next = match self.history_cursor {
            None => self.history.len().saturating_sub(1),
            Some(idx) => idx.saturating_sub(1),
        };
        self.history_cursor = Some(next);
        self.buffer = self.history[next].clone();
    }

    pub fn history_next(&mut self) {
        let Some(idx) = self.history_cursor else {
            return;
        };
        if idx + 1 >= self.history.len() {
            self.history_cursor = None;
            self.buffer.clear();
            return;
        }
        let next = idx + 1;
        self.history_cursor = Some(next);
        self.buffer = self.history[next].clone();
    }

    /// Take the buffer as a message to send; blank input submits nothing.
    pub fn take_submit(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        let msg = std::mem::take(&mut self.buffer);
        self.history_cursor = None;
        if self.history.last().map(|h| h.as_str()) != Some(msg.as_str()) {
            self.history.push(msg.clone());
        }
        Some(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_trims_blank_and_records_history() {
        let mut editor = Editor::new();
        editor.buffer = "   ".to_owned();
        assert_eq!(editor.take_submit(), None);

        editor.buffer = "hello".to_owned();
        assert_eq!(editor.take_submit(), Some("hello".to_owned()));
        assert!(editor.buffer.is_empty());
        assert_eq!(editor.history, vec!["hello".to_owned()]);

        // Repeats are not recorded twice in a row.
        editor.buffer = "hello".to_owned();
        editor.take_submit();
        assert_eq!(editor.history.len(), 1);
    }

    #[test]
    fn history_walks_prev_and_next() {
        let mut editor = Editor::new();
        for text in ["one", "two", "three"] {
            editor.buffer = text.to_owned();
            editor.take_submit();
        }

        editor.history_prev();
        assert_eq!(editor.buffer, "three");
        editor.history_prev();
        assert_eq!(editor.buffer, "two");
        editor.history_next();
        assert_eq!(editor.buffer, "three");
        editor.history_next();
        assert_eq!(editor.buffer, "");

        // Typing resets the cursor.
        editor.history_prev();
        editor.insert_char('x');
        assert!(editor.history_cursor.is_none());
    }
}
