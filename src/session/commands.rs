//! Local user actions.

use crate::api::CreateInstanceRequest;
use crate::terminal::Geometry;

/// An action originated by the user or a widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Request a new instance.
    CreateInstance(CreateInstanceRequest),
    /// Request deletion of an instance.
    DeleteInstance {
        /// Instance name.
        name: String,
    },
    /// Show an instance, creating its widget on first use.
    Select {
        /// Instance name.
        name: String,
    },
    /// Raw keyboard input typed into an instance's widget.
    Input {
        /// Instance name.
        name: String,
        /// Raw bytes.
        data: Vec<u8>,
    },
    /// The local viewport changed to an explicit geometry.
    Resize(Geometry),
    /// The local viewport changed; ask the selected widget what fits.
    Fit,
    /// Ask the backend to end the session.
    CloseSession,
}

impl Command {
    /// Short verb for logs and notices.
    pub fn action(&self) -> &'static str {
        match self {
            Self::CreateInstance(_) => "create",
            Self::DeleteInstance { .. } => "delete",
            Self::Select { .. } => "select",
            Self::Input { .. } => "input",
            Self::Resize(_) | Self::Fit => "resize",
            Self::CloseSession => "close",
        }
    }
}
