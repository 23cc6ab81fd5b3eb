//! Fence stream - writes the code blocks of streamed model output into a text
//! buffer while the output is still arriving.
//!
//! ```
//! use fence_stream::{CodeStream, Document};
//!
//! let mut doc = Document::new();
//! let mut stream = CodeStream::new();
//! for chunk in ["Here:\n``", "`py\nprint(1)\n``", "`"] {
//!     stream.push(&mut doc, chunk);
//! }
//! assert_eq!(doc.text(), "print(1)\n");
//! ```

mod buffer;
mod segmenter;
mod sink;
mod stream;

pub use buffer::{Document, Position, Selection, TextBuffer};
pub use segmenter::{FenceMode, StreamSegmenter};
pub use sink::EditorSink;
pub use stream::CodeStream;
