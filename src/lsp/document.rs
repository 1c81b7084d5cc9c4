use ropey::Rope;

use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent, Url};

use crate::language_regions::{HostId, TextCoordinates};

pub use crate::lsp::models::{HostDocumentState, StaleVersion, TextDelta};

impl TextCoordinates for Rope {
    fn position_at(&self, offset: usize) -> Position {
        let char_idx = self.byte_to_char(offset.min(self.len_bytes()));
        let line = self.char_to_line(char_idx);
        Position {
            line: line as u32,
            character: (char_idx - self.line_to_char(line)) as u32,
        }
    }

    fn offset_at(&self, position: Position) -> usize {
        let line = position.line as usize;
        if line >= self.len_lines() {
            return self.len_bytes();
        }
        let line_slice = self.line(line);
        let mut width = line_slice.len_chars();
        if width > 0 && line_slice.char(width - 1) == '\n' {
            width -= 1;
        }
        let column = (position.character as usize).min(width);
        self.char_to_byte(self.line_to_char(line) + column)
    }
}

impl TextDelta {
    /// Converts an LSP content change into a byte delta against `text`.
    ///
    /// A change without a range replaces the whole document.
    pub fn from_change_event(change: &TextDocumentContentChangeEvent, text: &Rope) -> Self {
        match change.range {
            Some(range) => {
                let start = text.offset_at(range.start);
                let end = text.offset_at(range.end).max(start);
                TextDelta::new(start, end - start, change.text.clone())
            }
            None => TextDelta::new(0, text.len_bytes(), change.text.clone()),
        }
    }
}

impl HostDocumentState {
    pub fn new(uri: Url, language_id: impl Into<String>, text: &str, version: Option<i32>) -> Self {
        HostDocumentState {
            host_id: HostId::from_url(&uri),
            uri,
            language_id: language_id.into(),
            text: Rope::from_str(text),
            version,
        }
    }

    /// Rejects `version` if the document already saw it or a later one.
    fn check_version(&self, version: Option<i32>) -> Result<(), StaleVersion> {
        match (version, self.version) {
            (Some(version), Some(current)) if version <= current => Err(StaleVersion { version, current }),
            _ => Ok(()),
        }
    }

    /// Applies byte deltas in order, each against the result of the previous one.
    ///
    /// Offsets past the end are clamped to the text; offsets inside a
    /// multi-byte char are moved to the start of that char.
    pub fn apply(&mut self, deltas: &[TextDelta], version: Option<i32>) -> Result<(), StaleVersion> {
        self.check_version(version)?;
        for delta in deltas {
            self.splice(delta);
        }
        if version.is_some() {
            self.version = version;
        }
        Ok(())
    }

    /// Applies LSP content changes, converting each against the current text.
    pub fn apply_changes(
        &mut self,
        changes: &[TextDocumentContentChangeEvent],
        version: Option<i32>,
    ) -> Result<(), StaleVersion> {
        self.check_version(version)?;
        for change in changes {
            let delta = TextDelta::from_change_event(change, &self.text);
            self.splice(&delta);
        }
        if version.is_some() {
            self.version = version;
        }
        Ok(())
    }

    fn splice(&mut self, delta: &TextDelta) {
        let len = self.text.len_bytes();
        let start = delta.offset.min(len);
        let end = start.saturating_add(delta.replaced_len).min(len);
        let start_char = self.text.byte_to_char(start);
        let end_char = self.text.byte_to_char(end);
        self.text.remove(start_char..end_char);
        self.text.insert(start_char, &delta.text);
    }

    pub fn text(&self) -> String {
        self.text.to_string()
    }
}

impl TextCoordinates for HostDocumentState {
    fn position_at(&self, offset: usize) -> Position {
        self.text.position_at(offset)
    }

    fn offset_at(&self, position: Position) -> usize {
        self.text.offset_at(position)
    }
}
