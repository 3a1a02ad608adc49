//! # bridge-transport: Ingestion and Effects
//!
//! The impure half of the bridge. Accepts HTTP connections, turns each one
//! into a `NewConnection` envelope, executes the effects the decision engine
//! asks for, and writes the terminal response back to the socket.

pub mod dispatcher;
pub mod handlers;
pub mod ingest;
pub mod reliability;
pub mod server;

pub use dispatcher::EffectDispatcher;
pub use ingest::{Ingestion, ResponseBody};
pub use reliability::{ConnectionGuard, ResponseOutcome};
pub use server::BridgeServer;
