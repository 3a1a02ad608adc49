use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::envelope::Tag;
use crate::error::BridgeError;

/// Terminal response requested by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondToClient {
    pub status_code: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckPassword {
    pub hash: String,
    pub salt: String,
    #[serde(deserialize_with = "deserialize_secret")]
    pub plain_text: SecretString,
}

/// Parameterized statement for the connection's leased client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SqlQuery {
    #[serde(alias = "statement")]
    pub sql: String,
    /// `null` or absent means no parameters.
    #[serde(default, alias = "parameters", deserialize_with = "null_as_empty")]
    pub values: Vec<Value>,
}

/// Every side effect the engine may request.
#[derive(Debug)]
pub enum Effect {
    RespondToClient(RespondToClient),
    HashPassword(SecretString),
    CheckPassword(CheckPassword),
    SqlQuery(SqlQuery),
}

impl Effect {
    pub fn tag(&self) -> Tag {
        match self {
            Effect::RespondToClient(_) => Tag::RespondToClient,
            Effect::HashPassword(_) => Tag::HashPassword,
            Effect::CheckPassword(_) => Tag::CheckPassword,
            Effect::SqlQuery(_) => Tag::SqlQuery,
        }
    }

    /// Decodes an engine request. Tags that are unknown, or that only ever
    /// flow towards the engine, are `UnrecognizedEffect`.
    pub fn decode(tag: &str, payload: Value) -> Result<Self, BridgeError> {
        match Tag::parse(tag) {
            Some(Tag::RespondToClient) => parse(tag, payload).map(Effect::RespondToClient),
            Some(Tag::HashPassword) => {
                parse::<String>(tag, payload).map(|p| Effect::HashPassword(SecretString::from(p)))
            }
            Some(Tag::CheckPassword) => parse(tag, payload).map(Effect::CheckPassword),
            Some(Tag::SqlQuery) => parse(tag, payload).map(Effect::SqlQuery),
            Some(Tag::NewConnection | Tag::JsActionResult | Tag::JsError) | None => {
                Err(BridgeError::UnrecognizedEffect(tag.to_owned()))
            }
        }
    }
}

fn parse<T: DeserializeOwned>(tag: &str, payload: Value) -> Result<T, BridgeError> {
    serde_json::from_value(payload).map_err(|e| BridgeError::MalformedPayload {
        tag: tag.to_owned(),
        reason: e.to_string(),
    })
}

pub(crate) fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}
