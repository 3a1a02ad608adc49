//! Effect handlers. Each one performs a single effect and produces the
//! payload of the engine-bound reply.

use std::time::Duration;

use bridge_core::{BridgeError, CheckPassword, ConnectionId, ConnectionRegistry, Delivery, RespondToClient, SqlQuery};
use bridge_crypto::{HashRecord, PasswordHasher};
use secrecy::SecretString;
use serde_json::{json, Value};

/// Terminal effect. Produces no reply.
pub fn respond_to_client(registry: &ConnectionRegistry, id: ConnectionId, response: RespondToClient) {
    let status = response.status_code;
    match registry.respond(id, response) {
        Delivery::Delivered => tracing::debug!(connection_id = %id, status, "RespondToClient: delivered"),
        Delivery::ClientGone => {
            tracing::debug!(connection_id = %id, "RespondToClient: client already gone")
        }
        Delivery::UnknownConnection => {
            tracing::warn!(connection_id = %id, "RespondToClient: no such connection")
        }
    }
}

pub async fn hash_password(hasher: &PasswordHasher, plain_text: SecretString) -> Result<Value, BridgeError> {
    let HashRecord { hash, salt } = hasher.hash(plain_text).await?;
    Ok(json!({ "hash": hash, "salt": salt }))
}

pub async fn check_password(hasher: &PasswordHasher, request: CheckPassword) -> Result<Value, BridgeError> {
    let CheckPassword {
        hash,
        salt,
        plain_text,
    } = request;
    let check = hasher.check(HashRecord { hash, salt }, plain_text).await?;
    Ok(json!({ "passwordIsValid": check.password_is_valid }))
}

/// Runs `query` on the connection's leased client.
///
/// Database failures are data for the engine, not bridge errors: the reply
/// is `{"result": ..}` or `{"error": ..}`.
pub async fn sql_query(
    registry: &ConnectionRegistry,
    id: ConnectionId,
    query: SqlQuery,
    deadline: Duration,
) -> Value {
    let Some(lease) = registry.take_resource(id) else {
        return json!({ "error": format!("no database client attached to connection {id}") });
    };

    let outcome = tokio::time::timeout(deadline, lease.query(&query.sql, &query.values)).await;
    registry.restore_resource(id, lease);

    match outcome {
        Ok(Ok(result)) => json!({ "result": result }),
        Ok(Err(e)) => {
            tracing::debug!(connection_id = %id, "SqlQuery: {e}");
            json!({ "error": e.to_string() })
        }
        Err(_) => {
            tracing::warn!(connection_id = %id, ?deadline, "SqlQuery: timed out");
            json!({ "error": format!("query timed out after {} ms", deadline.as_millis()) })
        }
    }
}
