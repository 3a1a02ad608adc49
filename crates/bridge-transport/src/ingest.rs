use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bridge_core::{
    AbortReason, BridgeError, BridgeSender, Clock, ConnectionId, ConnectionIdGenerator,
    ConnectionRegistry, Envelope, NewConnection, RequestInfo, RespondToClient, SystemClock, Tag,
};
use bridge_pool::{Lease, ResourcePool};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::{HeaderMap, Method, Request, Response, StatusCode, Uri};

use crate::reliability::{ConnectionGuard, ResponseOutcome};

pub type ResponseBody = Full<Bytes>;

/// Turns raw HTTP requests into `NewConnection` envelopes.
///
/// ## Ordering
/// The body is buffered in full and a resource is checked out before any
/// envelope is emitted. A connection that cannot get a resource is answered
/// `503` directly and never reaches the engine.
///
/// ## Deadline
/// One deadline runs from registration. It covers handing the envelope to a
/// full bridge as well as waiting for the engine's response.
pub struct Ingestion<C: Clock = SystemClock> {
    ids: Mutex<ConnectionIdGenerator<C>>,
    pool: Arc<dyn ResourcePool>,
    registry: Arc<ConnectionRegistry>,
    bridge: BridgeSender,
    connection_timeout: Duration,
}

impl<C: Clock> Ingestion<C> {
    pub fn new(
        ids: ConnectionIdGenerator<C>,
        pool: Arc<dyn ResourcePool>,
        registry: Arc<ConnectionRegistry>,
        bridge: BridgeSender,
        connection_timeout: Duration,
    ) -> Self {
        Self {
            ids: Mutex::new(ids),
            pool,
            registry,
            bridge,
            connection_timeout,
        }
    }

    /// The next id and the clock reading it was taken from.
    fn next_stamped(&self) -> (ConnectionId, u64) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_stamped()
    }

    /// Serves one request end to end.
    ///
    /// Only a failure to read the request body is an `Err`; every other
    /// outcome is an HTTP response.
    pub async fn handle<B>(&self, request: Request<B>) -> Result<Response<ResponseBody>, BridgeError>
    where
        B: Body,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let accepted_at = Instant::now();
        let (parts, body) = request.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| BridgeError::Transport(io::Error::other(e)))?
            .to_bytes();

        let lease = match Lease::checkout(&self.pool).await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(reason = ?AbortReason::AcquisitionFailed, "Ingestion: {e}");
                return Ok(plain(StatusCode::SERVICE_UNAVAILABLE, "database unavailable"));
            }
        };

        let (id, now_ms) = self.next_stamped();
        let new_connection = NewConnection {
            request: request_info(&parts.method, &parts.uri, &parts.headers),
            body: String::from_utf8_lossy(&body).into_owned(),
            timestamp: now_ms,
        };
        let envelope = match Envelope::encode(Tag::NewConnection, id, &new_connection) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(connection_id = %id, "Ingestion: cannot encode request: {e}");
                return Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
            }
        };

        let (response_rx, _cancel) = self.registry.register(id, Some(lease), accepted_at);
        let deadline = tokio::time::Instant::now() + self.connection_timeout;
        let guard = ConnectionGuard::new(Arc::clone(&self.registry), id);
        tracing::debug!(
            connection_id = %id,
            method = %new_connection.request.method,
            url = %new_connection.request.url,
            "Ingestion: accepted"
        );

        match tokio::time::timeout_at(deadline, self.bridge.emit(envelope)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                guard.abort(AbortReason::BridgeClosed);
                tracing::error!(connection_id = %id, "Ingestion: {e}");
                return Ok(plain(StatusCode::SERVICE_UNAVAILABLE, "decision engine unavailable"));
            }
            Err(_) => {
                guard.abort(AbortReason::TimedOut);
                tracing::warn!(connection_id = %id, "Ingestion: bridge full until the deadline");
                return Ok(plain(StatusCode::GATEWAY_TIMEOUT, "decision engine timed out"));
            }
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let response = match guard.await_response(response_rx, remaining).await {
            ResponseOutcome::Responded(response) => into_http(id, response),
            ResponseOutcome::TimedOut => plain(StatusCode::GATEWAY_TIMEOUT, "decision engine timed out"),
            ResponseOutcome::Aborted => plain(StatusCode::SERVICE_UNAVAILABLE, "connection aborted"),
        };
        Ok(response)
    }
}

fn request_info(method: &Method, uri: &Uri, header_map: &HeaderMap) -> RequestInfo {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in header_map {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        headers
            .entry(name.as_str().to_owned())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert(value);
    }

    RequestInfo {
        method: method.as_str().to_owned(),
        url: uri
            .path_and_query()
            .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned()),
        headers,
    }
}

/// Builds the client response. An invalid status or header turns into a
/// `500`; the connection's resource has already been released either way.
fn into_http(id: ConnectionId, response: RespondToClient) -> Response<ResponseBody> {
    let mut builder = Response::builder().status(response.status_code);
    for (name, value) in &response.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    match builder.body(Full::new(Bytes::from(response.body))) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(connection_id = %id, "Ingestion: invalid response from engine: {e}");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "invalid response")
        }
    }
}

fn plain(status: StatusCode, message: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(Bytes::from_static(message.as_bytes())));
    *response.status_mut() = status;
    response
}
