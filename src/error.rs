use std::time::Duration;

/// Errors surfaced by streams, patterns, and producers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No data became available within the bound. Callers may retry.
    #[error("timeout exceeded after {0:?}")]
    Timeout(Duration),

    /// The read side of the channel is permanently gone.
    #[error("end of stream: {0}")]
    EndOfStream(&'static str),

    /// Malformed byte sequence where text was expected.
    #[error("invalid utf-8 sequence at byte {position}")]
    Decoding { position: usize },

    /// A producer was started without a forwarding loop.
    #[error("{0} should be implemented by the producer")]
    NotImplemented(&'static str),

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream(_))
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(errno: nix::errno::Errno) -> Self {
        Error::Io(errno.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
