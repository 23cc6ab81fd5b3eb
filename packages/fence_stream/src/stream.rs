use crate::buffer::TextBuffer;
use crate::segmenter::{FenceMode, StreamSegmenter};
use crate::sink::EditorSink;

/// One generation session: segments model output and writes the fenced code
/// into a buffer as it arrives.
#[derive(Debug, Clone, Default)]
pub struct CodeStream {
    segmenter: StreamSegmenter,
    sink: EditorSink,
}

impl CodeStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of model output; returns what was inserted.
    pub fn push<B: TextBuffer + ?Sized>(&mut self, buffer: &mut B, chunk: &str) -> String {
        let emitted = self.segmenter.consume(chunk);
        self.sink.apply(buffer, &emitted);
        emitted
    }

    /// End the session. The next push starts from a fresh state and anchor.
    pub fn close(&mut self) {
        self.segmenter.reset();
        self.sink.reset();
    }

    pub fn mode(&self) -> FenceMode {
        self.segmenter.mode()
    }

    pub fn segmenter(&self) -> &StreamSegmenter {
        &self.segmenter
    }

    pub fn sink(&self) -> &EditorSink {
        &self.sink
    }
}
