use reqwest::StatusCode;

use serde_json::Value;

use crate::error::{Error, ErrorKind};

/// Default extraction order for error messages.
pub const DEFAULT_ERROR_FIELDS: &[ErrorField] = &[
    ErrorField::Error,
    ErrorField::Message,
    ErrorField::NestedMessage,
];

/// Where to look for the error message within a failed response body.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorField {
    /// A top-level `error` string.
    Error,
    /// A top-level `message` string.
    Message,
    /// A `message` string inside a top-level `error` object.
    NestedMessage,
}

impl ErrorField {
    fn extract(self, body: &Value) -> Option<&str> {
        let value = match self {
            Self::Error => body.get("error"),
            Self::Message => body.get("message"),
            Self::NestedMessage => body.get("error").and_then(|error| error.get("message")),
        }?;

        value.as_str().filter(|message| !message.is_empty())
    }
}

/// Turns a failed response into an [`Error`].
///
/// Fields are tried in order. The first message found becomes an
/// [`ErrorKind::Application`] error. When the body carries none, the
/// HTTP status text is used and the error is an [`ErrorKind::Transport`]
/// one.
pub(crate) fn normalize(status: StatusCode, body: &str, fields: &[ErrorField]) -> Error {
    if let Ok(body) = serde_json::from_str::<Value>(body)
        && let Some(message) = fields.iter().find_map(|field| field.extract(&body))
    {
        return Error::new(ErrorKind::Application, message.to_owned());
    }

    Error::new(ErrorKind::Transport, status_text(status))
}

fn status_text(status: StatusCode) -> String {
    status.canonical_reason().map_or_else(
        || format!("Request failed with status {}", status.as_u16()),
        str::to_owned,
    )
}
