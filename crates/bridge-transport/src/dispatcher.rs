use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{BridgeError, BridgeSender, ConnectionId, ConnectionRegistry, Effect, Envelope};
use bridge_crypto::PasswordHasher;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::handlers;

/// Routes engine requests to their handlers.
///
/// ## Concurrency
/// Every envelope is handled on its own task, so a slow hash or query on
/// one connection never holds up another. Replies therefore reach the engine
/// in completion order; correlation is carried by `connectionId` and the
/// echoed envelope fields.
pub struct EffectDispatcher {
    registry: Arc<ConnectionRegistry>,
    hasher: PasswordHasher,
    effect_timeout: Duration,
}

impl EffectDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, hasher: PasswordHasher, effect_timeout: Duration) -> Self {
        Self {
            registry,
            hasher,
            effect_timeout,
        }
    }

    /// Executes one request and returns the reply owed to the engine, if any.
    ///
    /// `RespondToClient` never replies. Neither does an effect whose
    /// connection ends while it runs; the effect is dropped mid-flight.
    pub async fn dispatch(&self, envelope: Envelope) -> Option<Envelope> {
        let (header, payload) = envelope.into_parts();
        let id = header.connection_id;

        let effect = match Effect::decode(&header.tag, payload) {
            Ok(effect) => effect,
            Err(e) => {
                tracing::warn!(connection_id = %id, tag = %header.tag, "EffectDispatcher: {e}");
                return Some(header.reply_error(e.to_string()));
            }
        };
        tracing::debug!(connection_id = %id, tag = %effect.tag(), "EffectDispatcher: dispatching");

        if let Effect::RespondToClient(response) = effect {
            handlers::respond_to_client(&self.registry, id, response);
            return None;
        }

        self.registry.note_dispatch(id);
        let outcome = match self.registry.cancellation(id) {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(connection_id = %id, "EffectDispatcher: connection ended, effect dropped");
                    return None;
                }
                outcome = self.perform(id, effect) => outcome,
            },
            None => self.perform(id, effect).await,
        };

        Some(match outcome {
            Ok(result) => header.reply(result),
            Err(e) => {
                tracing::warn!(connection_id = %id, tag = %header.tag, "EffectDispatcher: {e}");
                header.reply_error(e.to_string())
            }
        })
    }

    async fn perform(&self, id: ConnectionId, effect: Effect) -> Result<Value, BridgeError> {
        match effect {
            Effect::HashPassword(plain_text) => {
                self.bounded(handlers::hash_password(&self.hasher, plain_text)).await
            }
            Effect::CheckPassword(request) => {
                self.bounded(handlers::check_password(&self.hasher, request)).await
            }
            Effect::SqlQuery(query) => {
                Ok(handlers::sql_query(&self.registry, id, query, self.effect_timeout).await)
            }
            Effect::RespondToClient(_) => Err(BridgeError::UnrecognizedEffect(
                "RespondToClient has no reply".to_owned(),
            )),
        }
    }

    async fn bounded<F>(&self, effect: F) -> Result<Value, BridgeError>
    where
        F: Future<Output = Result<Value, BridgeError>>,
    {
        tokio::time::timeout(self.effect_timeout, effect)
            .await
            .map_err(|_| BridgeError::TimedOut(self.effect_timeout))?
    }

    /// Drains engine requests until the engine side closes.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<Envelope>, replies: BridgeSender) {
        tracing::info!("EffectDispatcher: running");
        while let Some(envelope) = requests.recv().await {
            let dispatcher = Arc::clone(&self);
            let replies = replies.clone();
            tokio::spawn(async move {
                if let Some(reply) = dispatcher.dispatch(envelope).await {
                    if let Err(e) = replies.emit(reply).await {
                        tracing::warn!("EffectDispatcher: reply dropped: {e}");
                    }
                }
            });
        }
        tracing::warn!("EffectDispatcher: engine channel closed");
    }
}
