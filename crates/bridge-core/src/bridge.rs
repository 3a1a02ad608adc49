use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::BridgeError;

/// Creates the duplex bridge between the effect side and a decision engine.
///
/// ## Backpressure
/// Both directions are bounded to `capacity` envelopes. Senders wait for
/// room instead of dropping, so no envelope is lost while both ends live.
pub fn channel(capacity: usize) -> (EffectChannel, EngineChannel) {
    let capacity = capacity.max(1);
    let (to_engine_tx, to_engine_rx) = mpsc::channel(capacity);
    let (from_engine_tx, from_engine_rx) = mpsc::channel(capacity);

    (
        EffectChannel {
            to_engine: BridgeSender { tx: to_engine_tx },
            from_engine: from_engine_rx,
        },
        EngineChannel {
            inbound: to_engine_rx,
            outbound: from_engine_tx,
        },
    )
}

/// Effect-side half: ingestion and the dispatcher live here.
#[derive(Debug)]
pub struct EffectChannel {
    to_engine: BridgeSender,
    from_engine: mpsc::Receiver<Envelope>,
}

impl EffectChannel {
    pub fn split(self) -> (BridgeSender, mpsc::Receiver<Envelope>) {
        (self.to_engine, self.from_engine)
    }
}

/// Cloneable handle for emitting envelopes towards the engine.
#[derive(Debug, Clone)]
pub struct BridgeSender {
    tx: mpsc::Sender<Envelope>,
}

impl BridgeSender {
    pub async fn emit(&self, envelope: Envelope) -> Result<(), BridgeError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| BridgeError::BridgeClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Engine-side half: what a decision engine reads from and writes to.
#[derive(Debug)]
pub struct EngineChannel {
    inbound: mpsc::Receiver<Envelope>,
    outbound: mpsc::Sender<Envelope>,
}

impl EngineChannel {
    /// Next envelope for the engine; `None` once the effect side is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.inbound.recv().await
    }

    /// Submits an effect request.
    pub async fn send(&self, envelope: Envelope) -> Result<(), BridgeError> {
        self.outbound
            .send(envelope)
            .await
            .map_err(|_| BridgeError::BridgeClosed)
    }

    pub fn split(self) -> (mpsc::Receiver<Envelope>, mpsc::Sender<Envelope>) {
        (self.inbound, self.outbound)
    }
}
