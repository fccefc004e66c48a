use std::fmt;

use thiserror::Error;

use crate::generation::GenerationError;
use crate::livechat::accounts::AuthError;
use crate::livechat::storage::StorageError;
use crate::livechat::store::StoreError;

pub type Result<T> = core::result::Result<T, LiveChatError>;

/// The remote call a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Register,
    Login,
    Logout,
    ResetPassword,
    Subscribe,
    SendMessage,
    DeleteMessage,
    LoadOlder,
    SuggestReply,
    FetchImage,
    UploadImage,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::Register => "Registration failed",
            Operation::Login => "Login failed",
            Operation::Logout => "Logout failed",
            Operation::ResetPassword => "Password reset failed",
            Operation::Subscribe => "Could not subscribe to messages",
            Operation::SendMessage => "Sending failed",
            Operation::DeleteMessage => "Deleting failed",
            Operation::LoadOlder => "Older messages could not be loaded",
            Operation::SuggestReply => "Failed to fetch AI reply",
            Operation::FetchImage => "Image could not be loaded",
            Operation::UploadImage => "Upload failed",
        };
        f.write_str(text)
    }
}

#[derive(Error, Debug)]
pub enum LiveChatError {
    #[error("No user is signed in")]
    NotSignedIn,

    #[error("No email in profile, message cannot be stored")]
    MissingEmail,

    #[error("{0}")]
    Validation(String),

    /// A remote call failed; the message is meant to be shown to the user as is
    #[error("{operation}: {source}")]
    Remote {
        operation: Operation,
        #[source]
        source: Box<LiveChatError>,
    },

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LiveChatError {
    pub(crate) fn remote(operation: Operation, source: impl Into<LiveChatError>) -> Self {
        let source = source.into();
        tracing::warn!(target: "livechat::error", "{}: {}", operation, source);
        LiveChatError::Remote {
            operation,
            source: Box::new(source),
        }
    }

    /// The operation this error came from, if it was a remote call
    pub fn operation(&self) -> Option<Operation> {
        match self {
            LiveChatError::Remote { operation, .. } => Some(*operation),
            _ => None,
        }
    }
}
