//! # bridge-core: The Effect Bridge
//!
//! Shared vocabulary of the bridge: connection ids, envelopes, effect
//! requests, the duplex channel to the decision engine, and the registry of
//! connections currently waiting on the engine.

pub mod bridge;
pub mod config;
pub mod effect;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod id;
pub mod registry;
pub mod session;

pub use bridge::{channel, BridgeSender, EffectChannel, EngineChannel};
pub use config::{DatabaseConfig, EngineConfig, ServerConfig};
pub use effect::{CheckPassword, Effect, RespondToClient, SqlQuery};
pub use engine::{EngineFlags, ProcessEngine};
pub use envelope::{Envelope, EnvelopeHeader, NewConnection, RequestInfo, Tag};
pub use error::BridgeError;
pub use id::{Clock, ConnectionId, ConnectionIdGenerator, ManualClock, SystemClock};
pub use registry::{ConnectionRegistry, Delivery};
pub use session::{AbortReason, ConnectionState, InvalidTransition, LifecycleEvent};
