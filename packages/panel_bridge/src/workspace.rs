use fence_stream::{CodeStream, Document, Selection, TextBuffer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::{Range, RangeInFile, UiOutbound};

/// Name reported for the buffer used before any file is opened.
const SCRATCH_NAME: &str = "Untitled-1";

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl WorkspaceError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Read { .. } => "read_failed",
        }
    }
}

/// A non-empty selection, ready to show in the panel.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightedCode {
    pub range_in_file: RangeInFile,
    pub filesystem: HashMap<String, String>,
    pub workspace_path: Option<String>,
}

impl HighlightedCode {
    /// The panel expects the code first, then the workspace root.
    pub fn into_messages(self) -> [UiOutbound; 2] {
        [
            UiOutbound::HighlightedCode {
                range_in_file: self.range_in_file,
                filesystem: self.filesystem,
            },
            UiOutbound::WorkspacePath {
                value: self.workspace_path,
            },
        ]
    }
}

/// The editor side of the bridge: one active document and the code stream
/// writing into it.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    active_path: Option<PathBuf>,
    document: Document,
    stream: CodeStream,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            active_path: None,
            document: Document::new(),
            stream: CodeStream::new(),
        }
    }

    /// Relative paths are taken from the workspace root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Load `path` from disk and make it the active document.
    pub async fn open_file(&mut self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let resolved = self.resolve(path);
        let text = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => WorkspaceError::NotFound(resolved.clone()),
                _ => WorkspaceError::Read {
                    path: resolved.clone(),
                    source,
                },
            })?;
        self.open_document(resolved.clone(), Document::from_text(&text));
        Ok(resolved)
    }

    /// Switch the active document. A stream in progress is ended so the next
    /// chunk anchors in the new document.
    pub fn open_document(&mut self, path: PathBuf, document: Document) {
        info!(path = %path.display(), lines = document.line_count(), "document opened");
        self.active_path = Some(path);
        self.document = document;
        self.stream.close();
    }

    pub fn active_path(&self) -> Option<&Path> {
        self.active_path.as_deref()
    }

    /// Display name of the active document.
    pub fn filepath(&self) -> String {
        self.active_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| SCRATCH_NAME.to_string())
    }

    pub fn set_selection(&mut self, selection: Selection) -> Option<HighlightedCode> {
        self.document.set_selection(selection);
        let selection = self.document.selection();
        if selection.is_empty() {
            debug!("selection cleared");
            return None;
        }

        let filepath = self.filepath();
        Some(HighlightedCode {
            range_in_file: RangeInFile {
                filepath: filepath.clone(),
                range: Range {
                    start: selection.start(),
                    end: selection.end(),
                },
            },
            filesystem: HashMap::from([(filepath, self.document.text())]),
            workspace_path: Some(self.root.display().to_string()),
        })
    }

    /// Feed model output; returns the code inserted into the document.
    pub fn push_chunk(&mut self, chunk: &str) -> String {
        let emitted = self.stream.push(&mut self.document, chunk);
        if !emitted.is_empty() {
            debug!(chars = emitted.chars().count(), mode = ?self.stream.mode(), "code streamed");
        }
        emitted
    }

    pub fn close_stream(&mut self) {
        self.stream.close();
        debug!("stream closed");
    }

    pub fn document_text(&self) -> String {
        self.document.text()
    }
}
