//! Envelope encoding and decoding.
//!
//! Decoding is two-staged so that a well-formed envelope with an unknown
//! `type` can be told apart from a corrupt frame: the former is ignorable,
//! the latter is a protocol violation.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::messages::Message;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Envelope is not a JSON object")]
    NotAnObject,

    #[error("Envelope is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("Envelope field `type` must be a string")]
    InvalidType,

    #[error("Invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Result of decoding a single frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Message(Message),
    /// Well-formed envelope whose `type` this protocol does not define
    Unknown(String),
}

/// Decode one text frame
pub fn decode(text: &str) -> Result<Decoded, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Object(mut object) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    let kind = match object.remove("type") {
        Some(Value::String(kind)) => kind,
        Some(_) => return Err(ProtocolError::InvalidType),
        None => return Err(ProtocolError::MissingField("type")),
    };
    let data = object
        .remove("data")
        .ok_or(ProtocolError::MissingField("data"))?;

    if !Message::is_known_kind(&kind) {
        return Ok(Decoded::Unknown(kind));
    }

    let mut envelope = Map::with_capacity(2);
    envelope.insert("type".to_string(), Value::String(kind.clone()));
    envelope.insert("data".to_string(), data);

    serde_json::from_value(Value::Object(envelope))
        .map(Decoded::Message)
        .map_err(|source| ProtocolError::InvalidPayload { kind, source })
}

/// Encode one message as a text frame
pub fn encode(message: &Message) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}
