//! JSON envelope carried in every relay WebSocket message.
//!
//! One WebSocket message holds exactly one envelope: a JSON object. The relay
//! reads a handful of well-known fields (`type`, `clientId`, `token`, `to`,
//! `from`) through accessors but keeps the object itself as received, so SDP
//! offers, answers and ICE candidates pass through exactly as the sender
//! produced them. A field the relay cannot use (say a numeric `to`) is simply
//! not acted on; it is never an error.

use crate::types::{envelope_type, reason};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Well-known field names.
pub mod field {
    /// Message type.
    pub const TYPE: &str = "type";
    /// Identifier being registered, or confirmed by the relay.
    pub const CLIENT_ID: &str = "clientId";
    /// Admission credential, only read on `register`.
    pub const TOKEN: &str = "token";
    /// Destination client identifier.
    pub const TO: &str = "to";
    /// Sender client identifier.
    pub const FROM: &str = "from";
    /// Failure reason on relay `error` envelopes.
    pub const REASON: &str = "reason";
}

/// Errors that can occur while decoding or encoding an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The message was not a JSON object.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A decoded relay message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Decode one envelope from a WebSocket message body.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if `data` is not a JSON object.
    pub fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Encode this envelope as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if serialization fails.
    pub fn encode(&self) -> Result<String, EnvelopeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wrap an already-built JSON object.
    #[must_use]
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// The object as it will be written.
    #[must_use]
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    fn with(mut self, key: &str, value: &str) -> Self {
        self.fields
            .insert(key.to_string(), Value::String(value.to_string()));
        self
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Client → relay registration request.
    #[must_use]
    pub fn register(client_id: &str, token: Option<&str>) -> Self {
        let env = Self::default()
            .with(field::TYPE, envelope_type::REGISTER)
            .with(field::CLIENT_ID, client_id);
        match token {
            Some(token) => env.with(field::TOKEN, token),
            None => env,
        }
    }

    /// Relay → client registration confirmation.
    #[must_use]
    pub fn registered(client_id: &str) -> Self {
        Self::default()
            .with(field::TYPE, envelope_type::REGISTERED)
            .with(field::CLIENT_ID, client_id)
    }

    /// Relay → client admission rejection.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::default()
            .with(field::TYPE, envelope_type::ERROR)
            .with(field::REASON, reason::INVALID_TOKEN)
    }

    /// Relay → client routing failure for destination `to`.
    #[must_use]
    pub fn target_unavailable(to: &str) -> Self {
        Self::default()
            .with(field::TYPE, envelope_type::ERROR)
            .with(field::REASON, reason::TARGET_UNAVAILABLE)
            .with(field::TO, to)
    }

    /// Addressed payload of an opaque `kind` with the given extra fields.
    #[must_use]
    pub fn routed(kind: &str, to: &str, rest: Map<String, Value>) -> Self {
        Self::from_fields(rest)
            .with(field::TYPE, kind)
            .with(field::TO, to)
    }

    /// `type`, when it is a string.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.str_field(field::TYPE)
    }

    /// Identifier requested by a `register` envelope.
    ///
    /// Returns `None` unless `type` is `register` and `clientId` is a
    /// non-empty string; anything else is treated as an ordinary message.
    #[must_use]
    pub fn register_id(&self) -> Option<&str> {
        if self.kind() != Some(envelope_type::REGISTER) {
            return None;
        }
        self.str_field(field::CLIENT_ID).filter(|id| !id.is_empty())
    }

    /// Admission token, when it is a string.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        self.str_field(field::TOKEN)
    }

    /// Destination of this envelope, if `to` is a non-empty string.
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.str_field(field::TO).filter(|to| !to.is_empty())
    }

    /// `from`, when it is a string.
    #[must_use]
    pub fn from(&self) -> Option<&str> {
        self.str_field(field::FROM)
    }

    /// Fill in `from` with the sender's bound identifier when the envelope
    /// does not name a sender itself (absent, `null` or `""`). Any other
    /// `from` is left as declared, and nothing else is touched.
    #[must_use]
    pub fn with_sender(mut self, sender: Option<&str>) -> Self {
        let unnamed = match self.fields.get(field::FROM) {
            None | Some(Value::Null) => true,
            Some(Value::String(from)) => from.is_empty(),
            Some(_) => false,
        };
        match sender {
            Some(sender) if unnamed => self.with(field::FROM, sender),
            _ => self,
        }
    }
}
