use thiserror::Error;

/// Crate-wide result type for pairing operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Channel name is empty or sanitizes to nothing usable.
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// Sender identity is empty after normalization.
    #[error("invalid sender id: {0:?}")]
    InvalidSender(String),

    /// Writing the state file failed. Reads never raise; they degrade to
    /// the empty default instead.
    #[error("state write failed for {path}: {source}")]
    Storage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Could not synthesize a pairing code distinct from every active code
    /// within the retry budget.
    #[error("pairing code space exhausted after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl Error {
    /// `true` for malformed-identifier errors, which callers should surface
    /// rather than treat as storage faults.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidChannel(_) | Self::InvalidSender(_))
    }

    #[must_use]
    pub fn invalid_channel(channel: impl Into<String>) -> Self {
        Self::InvalidChannel(channel.into())
    }

    #[must_use]
    pub fn invalid_sender(sender: impl Into<String>) -> Self {
        Self::InvalidSender(sender.into())
    }

    #[must_use]
    pub fn storage(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.display().to_string(),
            source,
        }
    }
}
