use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bridge_core::{BridgeError, ConnectionIdGenerator, ConnectionRegistry, EffectChannel, ServerConfig};
use bridge_crypto::PasswordHasher;
use bridge_pool::ResourcePool;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpListener;

use crate::dispatcher::EffectDispatcher;
use crate::ingest::Ingestion;

const LISTEN_BACKLOG: i32 = 1024;

/// HTTP front of the bridge.
///
/// ```ignore
/// let server = BridgeServer::bind(config, pool).await?;
/// server.serve(effect_channel).await?;
/// ```
pub struct BridgeServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ServerConfig,
    pool: Arc<dyn ResourcePool>,
    registry: Arc<ConnectionRegistry>,
}

impl BridgeServer {
    pub async fn bind(config: ServerConfig, pool: Arc<dyn ResourcePool>) -> Result<Self, BridgeError> {
        let addr = config.listen_addr()?;
        let listener = bind_listener(addr)?;
        let local_addr = listener.local_addr()?;
        tracing::info!("BridgeServer: listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            config,
            pool,
            registry: Arc::new(ConnectionRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Connections currently inside the bridge.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Starts the dispatcher and accepts connections until the task is
    /// cancelled.
    pub async fn serve(self, channel: EffectChannel) -> Result<(), BridgeError> {
        let (to_engine, from_engine) = channel.split();

        let dispatcher = Arc::new(EffectDispatcher::new(
            Arc::clone(&self.registry),
            PasswordHasher::new(self.config.hash_iterations),
            self.config.effect_timeout(),
        ));
        tokio::spawn(dispatcher.run(from_engine, to_engine.clone()));

        let ingestion = Arc::new(Ingestion::new(
            ConnectionIdGenerator::new(),
            self.pool,
            self.registry,
            to_engine,
            self.config.connection_timeout(),
        ));

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("BridgeServer: accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(%peer, "BridgeServer: set_nodelay failed: {e}");
            }

            let ingestion = Arc::clone(&ingestion);
            tokio::spawn(async move {
                let service = service_fn(move |request: Request<Incoming>| {
                    let ingestion = Arc::clone(&ingestion);
                    async move { ingestion.handle(request).await }
                });
                if let Err(e) = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!(%peer, "BridgeServer: connection error: {e}");
                }
            });
        }
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    TcpListener::from_std(std::net::TcpListener::from(socket))
}
