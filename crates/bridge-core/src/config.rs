use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bridge_pool::PgPoolConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};

use crate::effect::deserialize_secret;
use crate::engine::EngineFlags;
use crate::error::BridgeError;

/// Selects the production secret policy when set to `production`.
pub const ENV_MODE: &str = "BRIDGE_ENV";
pub const ENV_SECRET: &str = "BRIDGE_SECRET";
pub const ENV_CONFIG: &str = "BRIDGE_CONFIG";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret handed to the engine for its own authentication.
    #[serde(deserialize_with = "shared_secret")]
    pub secret: Arc<SecretString>,
    /// How long the engine waits for an effect reply before abandoning it.
    pub action_timeout_ms: u64,
    /// How often the engine sweeps for abandoned effects.
    pub action_check_interval_ms: u64,
    /// Hard deadline per connection, enforced on this side of the bridge.
    pub connection_timeout_ms: u64,
    /// Latency bound for a single effect handler.
    pub effect_timeout_ms: u64,
    pub bridge_capacity: usize,
    pub hash_iterations: u32,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            secret: Arc::new(SecretString::from("secret")),
            action_timeout_ms: 1000,
            action_check_interval_ms: 1000,
            connection_timeout_ms: 30_000,
            effect_timeout_ms: 10_000,
            bridge_capacity: 1024,
            hash_iterations: bridge_crypto::DEFAULT_ITERATIONS,
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(deserialize_with = "optional_secret")]
    pub password: Option<Arc<SecretString>>,
    pub dbname: String,
    pub max_size: usize,
    pub checkout_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: None,
            dbname: "postgres".to_string(),
            max_size: 16,
            checkout_timeout_ms: 5000,
        }
    }
}

impl DatabaseConfig {
    pub fn pool_config(&self) -> PgPoolConfig {
        PgPoolConfig {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_owned()),
            dbname: self.dbname.clone(),
            max_size: self.max_size,
            checkout_timeout: Duration::from_millis(self.checkout_timeout_ms),
        }
    }
}

/// How to launch the decision engine process.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Program followed by its arguments.
    pub command: Vec<String>,
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, BridgeError> {
        let config: Self = toml::from_str(raw).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    ///
    /// In production mode the development secret is not acceptable, so the
    /// secret must be supplied through the environment.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if lookup(ENV_MODE).as_deref() == Some("production") {
            let secret = lookup(ENV_SECRET)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    BridgeError::Config(format!("{ENV_SECRET} must be set when {ENV_MODE}=production"))
                })?;
            self.secret = Arc::new(SecretString::from(secret));
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.connection_timeout_ms == 0 {
            return Err(BridgeError::Config("connection_timeout_ms must be positive".into()));
        }
        if self.effect_timeout_ms == 0 {
            return Err(BridgeError::Config("effect_timeout_ms must be positive".into()));
        }
        if self.bridge_capacity == 0 {
            return Err(BridgeError::Config("bridge_capacity must be positive".into()));
        }
        if self.hash_iterations == 0 {
            return Err(BridgeError::Config("hash_iterations must be positive".into()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, BridgeError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| BridgeError::Config(format!("invalid listen address: {e}")))
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn effect_timeout(&self) -> Duration {
        Duration::from_millis(self.effect_timeout_ms)
    }

    pub fn engine_flags(&self) -> EngineFlags {
        EngineFlags {
            secret: Arc::clone(&self.secret),
            action_timeout_ms: self.action_timeout_ms,
            action_check_interval_ms: self.action_check_interval_ms,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_effect_timeout(mut self, timeout: Duration) -> Self {
        self.effect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_hash_iterations(mut self, iterations: u32) -> Self {
        self.hash_iterations = iterations;
        self
    }
}

fn shared_secret<'de, D>(deserializer: D) -> Result<Arc<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_secret(deserializer).map(Arc::new)
}

fn optional_secret<'de, D>(deserializer: D) -> Result<Option<Arc<SecretString>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(|p| p.map(|s| Arc::new(SecretString::from(s))))
}
