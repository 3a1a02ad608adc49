use std::time::Duration;

use bridge_crypto::CryptoError;
use bridge_pool::PoolError;

/// Failure taxonomy of the bridge.
///
/// Connection-establishment failures (`Transport`, `ResourceAcquisition`)
/// are answered directly on the socket. Everything raised by an effect
/// handler is stringified into a `JsError` envelope. Nothing here is fatal
/// to the process.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
    #[error("resource acquisition failed: {0}")]
    ResourceAcquisition(#[from] PoolError),
    #[error("Unhandled action: {0}")]
    UnrecognizedEffect(String),
    #[error("malformed {tag} payload: {reason}")]
    MalformedPayload { tag: String, reason: String },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("effect timed out after {0:?}")]
    TimedOut(Duration),
    #[error("bridge closed")]
    BridgeClosed,
    #[error("configuration error: {0}")]
    Config(String),
}
