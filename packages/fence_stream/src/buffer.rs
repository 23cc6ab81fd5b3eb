use serde::{Deserialize, Serialize};

/// Zero-based line/column coordinate. Columns count Unicode scalar values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub character: usize,
}

impl Position {
    pub const fn new(line: usize, character: usize) -> Self {
        Self { line, character }
    }

    /// The position just past `text` when it is inserted here.
    pub fn advanced_by(self, text: &str) -> Self {
        match text.rfind('\n') {
            Some(last_newline) => Self {
                line: self.line + text.matches('\n').count(),
                character: text[last_newline + 1..].chars().count(),
            },
            None => Self {
                line: self.line,
                character: self.character + text.chars().count(),
            },
        }
    }
}

/// A selection from `anchor` (where it started) to `active` (the caret).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub anchor: Position,
    pub active: Position,
}

impl Selection {
    pub const fn caret(at: Position) -> Self {
        Self {
            anchor: at,
            active: at,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.anchor == self.active
    }

    pub fn start(&self) -> Position {
        self.anchor.min(self.active)
    }

    pub fn end(&self) -> Position {
        self.anchor.max(self.active)
    }
}

/// The editor-side collaborator streamed text is written into.
pub trait TextBuffer {
    fn selection(&self) -> Selection;

    fn insert(&mut self, at: Position, text: &str);
}

/// Line-based in-memory text buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    lines: Vec<String>,
    selection: Selection,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            lines: vec![String::new()],
            selection: Selection::default(),
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.split('\n').map(str::to_owned).collect(),
            selection: Selection::default(),
        }
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = Selection {
            anchor: self.clamp(selection.anchor),
            active: self.clamp(selection.active),
        };
    }

    /// Text covered by `selection`.
    pub fn slice(&self, selection: &Selection) -> String {
        let start = self.byte_offset(self.clamp(selection.start()));
        let end = self.byte_offset(self.clamp(selection.end()));
        self.text()[start..end].to_string()
    }

    /// Pull a position back inside the document.
    pub fn clamp(&self, at: Position) -> Position {
        let line = at.line.min(self.lines.len() - 1);
        let width = self.lines[line].chars().count();
        Position::new(line, at.character.min(width))
    }

    fn byte_offset(&self, at: Position) -> usize {
        let before: usize = self.lines[..at.line].iter().map(|l| l.len() + 1).sum();
        before + char_to_byte(&self.lines[at.line], at.character)
    }
}

fn char_to_byte(line: &str, character: usize) -> usize {
    line.char_indices()
        .nth(character)
        .map_or(line.len(), |(i, _)| i)
}

impl TextBuffer for Document {
    fn selection(&self) -> Selection {
        self.selection
    }

    fn insert(&mut self, at: Position, text: &str) {
        if text.is_empty() {
            return;
        }
        let at = self.clamp(at);
        let line = &mut self.lines[at.line];
        let split = char_to_byte(line, at.character);
        let tail = line.split_off(split);

        let mut pieces = text.split('\n');
        if let Some(first) = pieces.next() {
            line.push_str(first);
        }
        let mut inserted: Vec<String> = pieces.map(str::to_owned).collect();
        match inserted.last_mut() {
            Some(last) => last.push_str(&tail),
            None => line.push_str(&tail),
        }
        let rest = self.lines.split_off(at.line + 1);
        self.lines.extend(inserted);
        self.lines.extend(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_without_newline() {
        assert_eq!(Position::new(2, 4).advanced_by("abc"), Position::new(2, 7));
    }

    #[test]
    fn advance_with_newlines() {
        assert_eq!(
            Position::new(2, 4).advanced_by("ab\ncd\nxyz"),
            Position::new(4, 3)
        );
        assert_eq!(Position::new(0, 9).advanced_by("\n"), Position::new(1, 0));
    }

    #[test]
    fn advance_counts_chars_not_bytes() {
        assert_eq!(Position::new(0, 0).advanced_by("ü🦀"), Position::new(0, 2));
    }

    #[test]
    fn selection_bounds_are_ordered() {
        let backwards = Selection {
            anchor: Position::new(3, 1),
            active: Position::new(1, 5),
        };
        assert_eq!(backwards.start(), Position::new(1, 5));
        assert_eq!(backwards.end(), Position::new(3, 1));
        assert!(!backwards.is_empty());
        assert!(Selection::caret(Position::new(1, 1)).is_empty());
    }

    #[test]
    fn insert_single_line() {
        let mut doc = Document::from_text("hello world");
        doc.insert(Position::new(0, 5), ",");
        assert_eq!(doc.text(), "hello, world");
    }

    #[test]
    fn insert_multi_line_splits_line() {
        let mut doc = Document::from_text("fn main() {}\nend");
        doc.insert(Position::new(0, 11), "\n    body();\n");
        assert_eq!(doc.text(), "fn main() {\n    body();\n}\nend");
        assert_eq!(doc.line_count(), 4);
    }

    #[test]
    fn insert_clamps_out_of_range() {
        let mut doc = Document::from_text("ab");
        doc.insert(Position::new(7, 99), "c");
        assert_eq!(doc.text(), "abc");
    }

    #[test]
    fn insert_unicode_column() {
        let mut doc = Document::from_text("ü🦀z");
        doc.insert(Position::new(0, 2), "-");
        assert_eq!(doc.text(), "ü🦀-z");
    }

    #[test]
    fn slice_selection() {
        let mut doc = Document::from_text("one\ntwo\nthree");
        let sel = Selection {
            anchor: Position::new(0, 1),
            active: Position::new(2, 2),
        };
        doc.set_selection(sel);
        assert_eq!(doc.slice(&doc.selection()), "ne\ntwo\nth");
    }

    #[test]
    fn set_selection_clamps() {
        let mut doc = Document::from_text("ab\nc");
        doc.set_selection(Selection::caret(Position::new(9, 9)));
        assert_eq!(doc.selection().active, Position::new(1, 1));
    }

    #[test]
    fn empty_document_has_one_line() {
        let doc = Document::new();
        assert_eq!(doc.line_count(), 1);
        assert_eq!(doc.text(), "");
        assert_eq!(doc.line(0), Some(""));
    }
}
