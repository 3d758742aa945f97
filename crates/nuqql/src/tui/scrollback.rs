//! Virtualized scrollback over a conversation's log.
//!
//! The log is an append-only sequence of variable-height entries; the view
//! keeps an index of the first rendered entry (`begin`) with a tail-mode
//! sentinel, and a per-width cache of how many physical lines each entry
//! wraps to, so paging never re-wraps the entire history.

use nuqql_core::conversation::LogMessage;
use time::OffsetDateTime;

/// One wrapped physical line of the rendered log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysLine {
    pub entry: usize,
    pub text: String,
    pub own: bool,
    pub is_read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Scrollback {
    /// First log entry included in the render; `None` pins the view to the
    /// tail and is recomputed from log length and height on every render.
    begin: Option<usize>,
    /// Cursor as an index into the physical lines rendered from `begin`.
    pub cursor: usize,
    width: usize,
    /// Physical line count per entry at `width`. Filled lazily, dropped
    /// whole when the width changes.
    counts: Vec<Option<usize>>,
}

impl Scrollback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_tailing(&self) -> bool {
        self.begin.is_none()
    }

    /// Back to tail mode (used on zoom toggles and conversation switches).
    pub fn jump_bottom(&mut self) {
        self.begin = None;
    }

    pub fn jump_top(&mut self) {
        self.begin = Some(0);
        self.cursor = 0;
    }

    fn sync_cache(&mut self, log_len: usize, width: usize) {
        if width != self.width {
            self.width = width;
            self.counts.clear();
        }
        self.counts.resize(log_len, None);
    }

    fn entry_lines(&mut self, log: &[LogMessage], idx: usize) -> usize {
        if let Some(cached) = self.counts[idx] {
            return cached;
        }
        let count = wrap(&format_entry(&log[idx]), self.width).len();
        self.counts[idx] = Some(count);
        count
    }

    fn rendered_line_count(&mut self, log: &[LogMessage], begin: usize) -> usize {
        (begin..log.len()).map(|idx| self.entry_lines(log, idx)).sum()
    }

    /// The begin index that puts the final entries into a viewport of
    /// `height` rows.
    fn tail_begin(&mut self, log: &[LogMessage], height: usize) -> usize {
        let mut filled = 0;
        let mut begin = log.len();
        while begin > 0 {
            let lines = self.entry_lines(log, begin - 1);
            if filled + lines > height && filled > 0 {
                break;
            }
            begin -= 1;
            filled += lines;
            if filled >= height {
                break;
            }
        }
        begin
    }

    /// Resolve tail mode to a concrete begin index without freezing it.
    fn resolve_begin(&mut self, log: &[LogMessage], height: usize) -> usize {
        match self.begin {
            Some(begin) => begin.min(log.len()),
            None => self.tail_begin(log, height.max(1)),
        }
    }

    /// Leave tail mode in place, parking the cursor on the final line.
    fn freeze(&mut self, log: &[LogMessage], height: usize) -> usize {
        let begin = self.resolve_begin(log, height);
        if self.begin.is_none() {
            self.begin = Some(begin);
            self.cursor = self.rendered_line_count(log, begin).saturating_sub(1);
        }
        begin
    }

    /// Render `log[begin..]` top-to-bottom, wrapping at `width` columns and
    /// marking every rendered entry read. Tail mode recomputes `begin` so
    /// the newest lines fill the viewport.
    pub fn render(&mut self, log: &mut [LogMessage], width: usize, height: usize) -> Vec<PhysLine> {
        self.sync_cache(log.len(), width.max(1));
        let begin = self.resolve_begin(log, height);

        let mut lines = Vec::new();
        for idx in begin..log.len() {
            let wrapped = wrap(&format_entry(&log[idx]), self.width);
            self.counts[idx] = Some(wrapped.len());
            for text in wrapped {
                lines.push(PhysLine {
                    entry: idx,
                    text,
                    own: log[idx].own,
                    is_read: log[idx].is_read,
                });
            }
            log[idx].is_read = true;
        }

        if self.begin.is_none() {
            self.cursor = lines.len().saturating_sub(1);
        } else {
            self.cursor = self.cursor.min(lines.len().saturating_sub(1));
        }
        lines
    }

    /// Move the cursor one physical line up. Crossing the first rendered
    /// line reveals the previous entry and parks the cursor on its last
    /// physical line.
    pub fn cursor_up(&mut self, log: &[LogMessage], height: usize) {
        self.sync_cache(log.len(), self.width.max(1));
        let begin = self.freeze(log, height);
        if self.cursor > 0 {
            self.cursor -= 1;
            return;
        }
        if begin > 0 {
            let revealed = begin - 1;
            self.begin = Some(revealed);
            self.cursor = self.entry_lines(log, revealed).saturating_sub(1);
        }
    }

    /// Move the cursor one physical line down; reaching the final line
    /// re-engages tail mode.
    pub fn cursor_down(&mut self, log: &[LogMessage], height: usize) {
        self.sync_cache(log.len(), self.width.max(1));
        if self.begin.is_none() {
            return;
        }
        let begin = self.resolve_begin(log, height);
        let total = self.rendered_line_count(log, begin);
        if self.cursor + 1 < total {
            self.cursor += 1;
        }
        if self.cursor + 1 >= total {
            self.begin = None;
        }
    }

    /// Page up by one viewport of physical lines, pulling earlier entries
    /// into the view as needed. Uses only cached line counts.
    pub fn page_up(&mut self, log: &[LogMessage], height: usize) {
        self.sync_cache(log.len(), self.width.max(1));
        self.freeze(log, height);
        let mut remaining = height.max(1);
        while remaining > 0 {
            if self.cursor > 0 {
                let step = self.cursor.min(remaining);
                self.cursor -= step;
                remaining -= step;
                continue;
            }
            let Some(begin) = self.begin.filter(|b| *b > 0) else {
                break;
            };
            let revealed = begin - 1;
            self.begin = Some(revealed);
            self.cursor = self.entry_lines(log, revealed).saturating_sub(1);
            remaining -= 1;
        }
    }

    pub fn page_down(&mut self, log: &[LogMessage], height: usize) {
        self.sync_cache(log.len(), self.width.max(1));
        if self.begin.is_none() {
            return;
        }
        let begin = self.resolve_begin(log, height);
        let total = self.rendered_line_count(log, begin);
        self.cursor = (self.cursor + height.max(1)).min(total.saturating_sub(1));
        if self.cursor + 1 >= total {
            self.begin = None;
        }
    }

    /// Substring search over physical lines, outward from the cursor.
    /// Backward search extends the view through `begin` when it reaches the
    /// top of the view; neither direction wraps around the log. A failed
    /// search leaves the cursor at the boundary it reached.
    pub fn search(
        &mut self,
        log: &[LogMessage],
        height: usize,
        needle: &str,
        backward: bool,
    ) -> bool {
        if needle.is_empty() || log.is_empty() {
            return false;
        }
        self.sync_cache(log.len(), self.width.max(1));
        let needle = needle.to_lowercase();
        let mut begin = self.freeze(log, height);
        let mut lines = self.phys_texts(log, begin);

        if backward {
            let mut pos = self.cursor;
            loop {
                if pos == 0 {
                    if begin == 0 {
                        self.cursor = 0;
                        return false;
                    }
                    begin -= 1;
                    self.begin = Some(begin);
                    let added = self.entry_lines(log, begin);
                    lines = self.phys_texts(log, begin);
                    self.cursor += added;
                    pos = added;
                }
                pos -= 1;
                if lines[pos].to_lowercase().contains(&needle) {
                    self.cursor = pos;
                    return true;
                }
            }
        } else {
            let total = lines.len();
            let mut pos = self.cursor;
            while pos + 1 < total {
                pos += 1;
                if lines[pos].to_lowercase().contains(&needle) {
                    self.cursor = pos;
                    return true;
                }
            }
            self.cursor = total.saturating_sub(1);
            false
        }
    }

    fn phys_texts(&mut self, log: &[LogMessage], begin: usize) -> Vec<String> {
        let mut out = Vec::new();
        for idx in begin..log.len() {
            let wrapped = wrap(&format_entry(&log[idx]), self.width);
            self.counts[idx] = Some(wrapped.len());
            out.extend(wrapped);
        }
        out
    }

    #[cfg(test)]
    fn cached_counts(&self) -> &[Option<usize>] {
        &self.counts
    }
}

/// The viewport window over the rendered lines that keeps the cursor
/// visible: `(top, bottom)` indices into the line list.
pub fn window(total_lines: usize, cursor: usize, height: usize) -> (usize, usize) {
    let height = height.max(1);
    let top = (cursor + 1).saturating_sub(height);
    let bottom = (top + height).min(total_lines);
    (top, bottom)
}

/// Word-unaware wrap: split on embedded newlines, then slice each segment
/// at the column width until the remainder fits.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut out = Vec::new();
    for segment in text.split('\n') {
        let chars: Vec<char> = segment.chars().collect();
        if chars.is_empty() {
            out.push(String::new());
            continue;
        }
        let mut start = 0;
        while start < chars.len() {
            let end = (start + width).min(chars.len());
            out.push(chars[start..end].iter().collect());
            start = end;
        }
    }
    out
}

/// The logical single string an entry wraps from: time, sender, text.
pub fn format_entry(msg: &LogMessage) -> String {
    let when =
        OffsetDateTime::from_unix_timestamp(msg.timestamp).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    format!(
        "{:02}:{:02} {}: {}",
        when.hour(),
        when.minute(),
        msg.sender,
        msg.text
    )
}
