use std::borrow::Cow;

use corellium::frame::DecodeError;

use tracing::error;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection-level failures: the duplex channel could not be opened or
    /// closed abnormally, or an HTTP request failed without a readable
    /// error body.
    Transport,
    /// Malformed or unexpected data received from the API or an agent.
    Protocol,
    /// A failure explicitly reported by the API or by an agent.
    Application,
    /// A required upstream state is missing.
    Precondition,
    /// A polled resource entered its failure status.
    Workflow,
    /// A wait exceeded its deadline or its maximum number of attempts.
    Timeout,
    /// A wait has been cancelled.
    Cancelled,
    /// An invalid client configuration.
    Configuration,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Transport => "Transport",
            Self::Protocol => "Protocol",
            Self::Application => "Application",
            Self::Precondition => "Precondition",
            Self::Workflow => "Workflow",
            Self::Timeout => "Timeout",
            Self::Cancelled => "Cancelled",
            Self::Configuration => "Configuration",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// Client error.
#[derive(PartialEq, Eq, Clone)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.format(f)
    }
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[inline]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        let description = description.into();
        error!("{}", description.as_ref());
        Self { kind, description }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error description.
    ///
    /// For [`ErrorKind::Application`] errors, it is the message reported by
    /// the remote side, verbatim.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    fn format(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_decode() {
            ErrorKind::Protocol
        } else if e.is_timeout() {
            ErrorKind::Timeout
        } else if e.is_builder() {
            ErrorKind::Configuration
        } else {
            ErrorKind::Transport
        };
        Self::new(kind, e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::new(ErrorKind::Transport, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Protocol, e.to_string())
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::new(ErrorKind::Protocol, e.to_string())
    }
}

impl std::error::Error for Error {}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use corellium::frame::DecodeError;

    use super::{Error, ErrorKind};

    #[test]
    fn client_error() {
        let error = Error::new(ErrorKind::Precondition, "No agent info returned");

        assert_eq!(error.kind(), ErrorKind::Precondition);
        assert_eq!(error.description(), "No agent info returned");
        assert_eq!(error.to_string(), "Precondition: No agent info returned");
    }

    #[test]
    fn decode_error_is_protocol() {
        let error = Error::from(DecodeError::MissingId);

        assert_eq!(error.kind(), ErrorKind::Protocol);
        assert_eq!(
            error.to_string(),
            "Protocol: Invalid message data, expecting id."
        );
    }
}
