//! Chat/UI collaborator seam.
//!
//! The pipeline never renders markup itself: it hands the collaborator a
//! plain templated string plus a button layout (label, callback token pairs
//! grouped into rows) and receives back toggle/rename/done/cancel events
//! keyed by an opaque session identifier. Implementations adapt this to a
//! concrete chat transport.

use crate::error::TransformResult;
use async_trait::async_trait;

/// One inline button: visible label plus the opaque callback token the
/// transport echoes back on press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub token: String,
}

impl Button {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

/// Button layout: rows of buttons, rendered top to bottom.
pub type ButtonRows = Vec<Vec<Button>>;

/// Inbound user event for a selection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// Flip membership of a track index in the selection
    Toggle(usize),
    /// Open the rename sub-dialog
    Rename,
    /// Text reply carrying the new filename (without extension)
    RenameText(String),
    /// Finish selecting and resolve the session
    Done,
    /// Abort the session
    Cancel,
}

/// Outbound surface of the chat collaborator.
#[async_trait]
pub trait ChatInterface: Send + Sync {
    /// Show (or update in place) the selection prompt with its buttons.
    async fn show_prompt(&self, text: &str, buttons: ButtonRows) -> TransformResult<()>;

    /// Send a plain notice to the requester.
    async fn notify(&self, text: &str) -> TransformResult<()>;

    /// Acknowledge a button event, optionally with an alert note
    /// ("Session expired!", "Finish renaming first!", ...). Best-effort.
    async fn acknowledge(&self, note: Option<&str>);
}
