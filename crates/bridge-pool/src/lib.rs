//! # bridge-pool: Pooled Resource Lifecycle
//!
//! Checkout and release of external resources (database clients) that are
//! bound 1:1 to a request. A [`Lease`] is the only owner of a checked-out
//! client; dropping it is the release, so exactly-once release follows from
//! ownership instead of caller discipline.

pub mod lease;
pub mod postgres;

pub use lease::Lease;
pub use postgres::{PgPool, PgPoolConfig};

use async_trait::async_trait;
use serde_json::Value;

/// Failure to obtain a resource from the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool exhausted: {0}")]
    Exhausted(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("pool misconfigured: {0}")]
    Misconfigured(String),
}

/// A statement failed. Carried back to the decision engine as data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct QueryError(pub String);

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A checked-out database handle.
#[async_trait]
pub trait DbClient: Send + Sync {
    /// Executes a parameterized statement and returns the result set as JSON.
    async fn query(&self, statement: &str, parameters: &[Value]) -> Result<Value, QueryError>;
}

/// The shared pool. The only cross-connection mutable state in the bridge.
#[async_trait]
pub trait ResourcePool: Send + Sync {
    /// Checks out a client. May fail on exhaustion or backend outage.
    async fn checkout(&self) -> Result<Box<dyn DbClient>, PoolError>;

    /// Returns a client to the pool. Called by [`Lease`] exactly once.
    fn release(&self, client: Box<dyn DbClient>);
}
