//! Shared fixtures: an in-memory resource pool that counts checkouts and
//! releases, and a scripted decision engine.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_core::{ConnectionId, EngineChannel, Envelope, Tag};
use bridge_pool::{DbClient, PoolError, QueryError, ResourcePool};
use serde_json::{json, Value};

/// Pool whose clients answer `SELECT` statements and reject everything else.
#[derive(Default)]
pub struct CountingPool {
    checkouts: AtomicUsize,
    releases: AtomicUsize,
    exhausted: AtomicBool,
}

impl CountingPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A pool whose every checkout fails.
    pub fn exhausted() -> Arc<Self> {
        let pool = Self::default();
        pool.exhausted.store(true, Ordering::SeqCst);
        Arc::new(pool)
    }

    pub fn checkouts(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn outstanding(&self) -> usize {
        self.checkouts() - self.releases()
    }
}

pub fn as_pool(pool: &Arc<CountingPool>) -> Arc<dyn ResourcePool> {
    Arc::clone(pool) as Arc<dyn ResourcePool>
}

#[async_trait]
impl ResourcePool for CountingPool {
    async fn checkout(&self) -> Result<Box<dyn DbClient>, PoolError> {
        if self.exhausted.load(Ordering::SeqCst) {
            return Err(PoolError::Exhausted("no clients left".into()));
        }
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockClient))
    }

    fn release(&self, _client: Box<dyn DbClient>) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockClient;

#[async_trait]
impl DbClient for MockClient {
    async fn query(&self, statement: &str, parameters: &[Value]) -> Result<Value, QueryError> {
        if statement.contains("pg_sleep") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if statement.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            Ok(json!({
                "rows": [{ "params": parameters }],
                "rowCount": 1,
                "fields": [{ "name": "params", "dataType": "jsonb" }],
            }))
        } else {
            Err(QueryError::new(format!("error: syntax error at or near \"{statement}\"")))
        }
    }
}

pub fn respond(id: ConnectionId, status: u16, body: &str) -> Envelope {
    Envelope::new(
        Tag::RespondToClient,
        id,
        json!({ "statusCode": status, "headers": { "content-type": "application/json" }, "body": body }),
    )
}

/// Drives `engine` with a fixed script keyed on the request body:
///
/// - `hash:<pw>` asks for `HashPassword(<pw>)`
/// - `sql:<statement>` asks for `SqlQuery`
/// - `silent` never answers
/// - anything else is answered `200` with the request url
///
/// Effect replies are answered `200` (`JsActionResult`) or `502`
/// (`JsError`) with the reply payload as body.
pub fn spawn_scripted_engine(mut engine: EngineChannel) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(envelope) = engine.recv().await {
            let id = envelope.connection_id;
            let next = match envelope.known_tag() {
                Some(Tag::NewConnection) => {
                    let body = envelope.payload["body"].as_str().unwrap_or_default().to_owned();
                    if let Some(password) = body.strip_prefix("hash:") {
                        Some(Envelope::new(Tag::HashPassword, id, json!(password)))
                    } else if let Some(statement) = body.strip_prefix("sql:") {
                        Some(Envelope::new(Tag::SqlQuery, id, json!({ "sql": statement, "values": [1] })))
                    } else if body == "silent" {
                        None
                    } else {
                        let url = envelope.payload["request"]["url"].as_str().unwrap_or_default();
                        Some(respond(id, 200, url))
                    }
                }
                Some(Tag::JsActionResult) => Some(respond(id, 200, &envelope.payload.to_string())),
                Some(Tag::JsError) => Some(respond(id, 502, &envelope.payload.to_string())),
                _ => None,
            };
            if let Some(next) = next {
                if engine.send(next).await.is_err() {
                    break;
                }
            }
        }
    })
}
