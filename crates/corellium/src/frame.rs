use bytes::{Buf, BufMut, Bytes, BytesMut};

use serde_json::{Map, Value};

/// Size of the header preceding the payload of a binary frame.
///
/// The first four bytes hold the little-endian correlation identifier, the
/// other four are reserved.
pub const BINARY_HEADER_LEN: usize = 8;

/// A frame received from a device agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A textual frame containing a JSON object.
    Text(String),
    /// A binary frame made of a header and a UTF-8 JSON payload.
    Binary(Bytes),
}

/// All the ways an inbound frame can fail to decode.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// A binary frame shorter than its header.
    Truncated(usize),
    /// The payload is not valid UTF-8.
    Utf8,
    /// The payload is not valid JSON.
    Json(String),
    /// The payload is valid JSON, but not an object.
    NotAnObject,
    /// The object has no usable `id` field.
    MissingId,
    /// The `id` inside a binary payload differs from the header one.
    HeaderMismatch {
        /// Identifier found in the frame header.
        header: u32,
        /// Identifier found in the payload.
        payload: u32,
    },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(len) => write!(
                f,
                "Invalid message data, binary frame of {len} bytes is shorter than its {BINARY_HEADER_LEN}-byte header."
            ),
            Self::Utf8 => f.write_str("Invalid message data, expecting UTF-8."),
            Self::Json(e) => write!(f, "Invalid message data, expecting JSON: {e}"),
            Self::NotAnObject => f.write_str("Invalid message data, expecting an object."),
            Self::MissingId => f.write_str("Invalid message data, expecting id."),
            Self::HeaderMismatch { header, payload } => write!(
                f,
                "Invalid message data, header id {header} differs from payload id {payload}."
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

/// A decoded agent response.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    /// Correlation identifier.
    pub id: u32,
    /// The whole decoded object.
    pub payload: Value,
    /// The error message reported by the agent, if any.
    pub error: Option<String>,
}

impl CommandResponse {
    /// Creates a successful [`CommandResponse`].
    ///
    /// The `id` field is inserted into the payload when the payload is an
    /// object, otherwise the payload is stored under a `result` field.
    #[must_use]
    pub fn success(id: u32, payload: Value) -> Self {
        let mut object = match payload {
            Value::Object(object) => object,
            other => {
                let mut object = Map::new();
                object.insert("result".into(), other);
                object
            }
        };
        object.insert("id".into(), Value::from(id));

        Self {
            id,
            payload: Value::Object(object),
            error: None,
        }
    }

    /// Creates a failed [`CommandResponse`].
    #[must_use]
    pub fn failure(id: u32, message: impl Into<String>) -> Self {
        let message = message.into();
        let payload = serde_json::json!({
            "id": id,
            "error": {
                "message": message,
            },
        });

        Self {
            id,
            payload,
            error: Some(message),
        }
    }

    /// Converts a [`CommandResponse`] into its payload or its error message.
    ///
    /// # Errors
    ///
    /// Returns the agent error message when present.
    #[inline]
    pub fn into_result(self) -> Result<Value, String> {
        match self.error {
            Some(message) => Err(message),
            None => Ok(self.payload),
        }
    }

    /// Encodes a [`CommandResponse`] as a textual frame.
    #[must_use]
    #[inline]
    pub fn encode_text(&self) -> String {
        self.payload.to_string()
    }

    /// Encodes a [`CommandResponse`] as a binary frame.
    #[must_use]
    pub fn encode_binary(&self) -> Bytes {
        let payload = self.payload.to_string();
        let mut buffer = BytesMut::with_capacity(BINARY_HEADER_LEN + payload.len());
        buffer.put_u32_le(self.id);
        buffer.put_u32_le(0);
        buffer.put_slice(payload.as_bytes());
        buffer.freeze()
    }
}

/// Decodes a [`Frame`] into a [`CommandResponse`].
///
/// # Errors
///
/// A [`DecodeError`] is returned when the frame is malformed. Errors
/// reported by the agent are **not** decode errors: they are stored inside
/// [`CommandResponse::error`].
pub fn decode(frame: Frame) -> Result<CommandResponse, DecodeError> {
    match frame {
        Frame::Text(text) => {
            let object = parse_object(&text)?;
            let id = object_id(&object)?.ok_or(DecodeError::MissingId)?;
            Ok(into_response(id, object))
        }
        Frame::Binary(mut bytes) => {
            if bytes.len() < BINARY_HEADER_LEN {
                return Err(DecodeError::Truncated(bytes.len()));
            }
            let header = bytes.get_u32_le();
            bytes.advance(BINARY_HEADER_LEN - 4);

            let text = std::str::from_utf8(&bytes).map_err(|_| DecodeError::Utf8)?;
            let object = parse_object(text)?;

            match object_id(&object)? {
                Some(payload) if payload != header => {
                    Err(DecodeError::HeaderMismatch { header, payload })
                }
                _ => Ok(into_response(header, object)),
            }
        }
    }
}

fn parse_object(text: &str) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_str(text) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(DecodeError::NotAnObject),
        Err(e) => Err(DecodeError::Json(e.to_string())),
    }
}

// An absent `id` is `None`, a present but unusable one is an error.
fn object_id(object: &Map<String, Value>) -> Result<Option<u32>, DecodeError> {
    match object.get("id") {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|id| u32::try_from(id).ok())
            .map(Some)
            .ok_or(DecodeError::MissingId),
    }
}

fn into_response(id: u32, object: Map<String, Value>) -> CommandResponse {
    let error = object.get("error").and_then(|error| match error {
        Value::Null => None,
        Value::Object(inner) => Some(match inner.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => error.to_string(),
        }),
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    });

    CommandResponse {
        id,
        payload: Value::Object(object),
        error,
    }
}
