use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::{DbClient, PoolError, QueryError, ResourcePool};

/// Exclusive ownership of one checked-out client.
///
/// ## Release Discipline
/// The client goes back to its pool when the lease is dropped, whichever
/// path drops it: the terminal response, an abort, a timeout or a panic
/// unwinding through the owner. A lease cannot be cloned, so it cannot be
/// released twice.
pub struct Lease {
    client: Option<Box<dyn DbClient>>,
    pool: Arc<dyn ResourcePool>,
}

impl Lease {
    /// Checks out a client from `pool` and binds it to a new lease.
    pub async fn checkout(pool: &Arc<dyn ResourcePool>) -> Result<Self, PoolError> {
        let client = pool.checkout().await?;
        Ok(Self {
            client: Some(client),
            pool: Arc::clone(pool),
        })
    }

    /// Runs a statement on the leased client.
    pub async fn query(&self, statement: &str, parameters: &[Value]) -> Result<Value, QueryError> {
        match self.client.as_deref() {
            Some(client) => client.query(statement, parameters).await,
            None => Err(QueryError::new("database client already released")),
        }
    }

    /// Releases the client now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.release(client);
            tracing::trace!("Lease: client returned to pool");
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("held", &self.client.is_some())
            .finish()
    }
}
