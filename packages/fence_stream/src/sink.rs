use tracing::debug;

use crate::buffer::{Position, TextBuffer};

/// Writes streamed text into a buffer at a cursor that only moves forward.
///
/// The first non-empty `apply` after construction or [`reset`](Self::reset)
/// anchors the cursor at the buffer's selection: the selection end if
/// something is selected, otherwise the caret.
#[derive(Debug, Clone, Default)]
pub struct EditorSink {
    cursor: Option<Position>,
}

impl EditorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply<B: TextBuffer + ?Sized>(&mut self, buffer: &mut B, text: &str) {
        if text.is_empty() {
            return;
        }
        let at = *self.cursor.get_or_insert_with(|| {
            let selection = buffer.selection();
            let anchor = if selection.is_empty() {
                selection.active
            } else {
                selection.end()
            };
            debug!(line = anchor.line, character = anchor.character, "insertion anchored");
            anchor
        });
        buffer.insert(at, text);
        self.cursor = Some(at.advanced_by(text));
    }

    pub fn reset(&mut self) {
        self.cursor = None;
    }

    /// Where the next insertion goes, once anchored.
    pub fn cursor(&self) -> Option<Position> {
        self.cursor
    }
}
