use core::fmt;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::ConnectionId;

/// Known envelope tags. Unknown strings stay representable on [`Envelope`]
/// and are rejected when decoded into an effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    NewConnection,
    RespondToClient,
    HashPassword,
    CheckPassword,
    SqlQuery,
    JsActionResult,
    JsError,
}

impl Tag {
    pub const fn as_str(self) -> &'static str {
        match self {
            Tag::NewConnection => "NewConnection",
            Tag::RespondToClient => "RespondToClient",
            Tag::HashPassword => "HashPassword",
            Tag::CheckPassword => "CheckPassword",
            Tag::SqlQuery => "SqlQuery",
            Tag::JsActionResult => "JsActionResult",
            Tag::JsError => "JsError",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "NewConnection" => Some(Tag::NewConnection),
            "RespondToClient" => Some(Tag::RespondToClient),
            "HashPassword" => Some(Tag::HashPassword),
            "CheckPassword" => Some(Tag::CheckPassword),
            "SqlQuery" => Some(Tag::SqlQuery),
            "JsActionResult" => Some(Tag::JsActionResult),
            "JsError" => Some(Tag::JsError),
            _ => None,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit exchanged over the bridge.
///
/// Wire form: `{"tag": .., "connectionId": .., "payload": .., ...}`. Any
/// other top-level field is correlation metadata owned by the engine and is
/// echoed back on every reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub tag: String,
    pub connection_id: ConnectionId,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub correlation: Map<String, Value>,
}

impl Envelope {
    pub fn new(tag: Tag, connection_id: ConnectionId, payload: Value) -> Self {
        Self {
            tag: tag.as_str().to_owned(),
            connection_id,
            payload,
            correlation: Map::new(),
        }
    }

    pub fn encode<T: Serialize>(
        tag: Tag,
        connection_id: ConnectionId,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(tag, connection_id, serde_json::to_value(payload)?))
    }

    pub fn known_tag(&self) -> Option<Tag> {
        Tag::parse(&self.tag)
    }

    /// Separates routing data from the payload so the payload can be
    /// consumed while the header is kept for the reply.
    pub fn into_parts(self) -> (EnvelopeHeader, Value) {
        (
            EnvelopeHeader {
                tag: self.tag,
                connection_id: self.connection_id,
                correlation: self.correlation,
            },
            self.payload,
        )
    }
}

/// Everything of an envelope except its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvelopeHeader {
    pub tag: String,
    pub connection_id: ConnectionId,
    pub correlation: Map<String, Value>,
}

impl EnvelopeHeader {
    /// `JsActionResult` reply carrying `payload`.
    pub fn reply(&self, payload: Value) -> Envelope {
        self.answer(Tag::JsActionResult, payload)
    }

    /// `JsError` reply carrying the stringified failure.
    pub fn reply_error(&self, message: impl Into<String>) -> Envelope {
        self.answer(Tag::JsError, Value::String(message.into()))
    }

    fn answer(&self, tag: Tag, payload: Value) -> Envelope {
        Envelope {
            tag: tag.as_str().to_owned(),
            connection_id: self.connection_id,
            payload,
            correlation: self.correlation.clone(),
        }
    }
}

/// Request line and headers of an ingested HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
}

/// Payload of `NewConnection`. The response sink and the database client
/// stay server-side, addressed by the envelope's `connectionId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConnection {
    pub request: RequestInfo,
    pub body: String,
    pub timestamp: u64,
}
