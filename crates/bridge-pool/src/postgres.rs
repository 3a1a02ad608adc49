use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Config, Object, Pool, PoolConfig, Runtime};
use serde_json::{json, Map, Value};
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::{NoTls, Row, Statement};

use crate::{DbClient, PoolError, QueryError, ResourcePool};

type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Connection settings for [`PgPool`].
#[derive(Debug, Clone)]
pub struct PgPoolConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub dbname: String,
    pub max_size: usize,
    /// Upper bound on waiting for a free client or a new connection.
    pub checkout_timeout: Duration,
}

/// PostgreSQL-backed [`ResourcePool`].
pub struct PgPool {
    inner: Pool,
}

impl PgPool {
    pub fn new(config: &PgPoolConfig) -> Result<Self, PoolError> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.user = Some(config.user.clone());
        cfg.password = config.password.clone();
        cfg.dbname = Some(config.dbname.clone());

        let mut pool_cfg = PoolConfig::new(config.max_size);
        pool_cfg.timeouts.wait = Some(config.checkout_timeout);
        pool_cfg.timeouts.create = Some(config.checkout_timeout);
        pool_cfg.timeouts.recycle = Some(config.checkout_timeout);
        cfg.pool = Some(pool_cfg);

        let inner = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| PoolError::Misconfigured(e.to_string()))?;

        tracing::info!(
            host = %config.host,
            port = config.port,
            dbname = %config.dbname,
            max_size = config.max_size,
            "PgPool: created"
        );
        Ok(Self { inner })
    }
}

#[async_trait]
impl ResourcePool for PgPool {
    async fn checkout(&self) -> Result<Box<dyn DbClient>, PoolError> {
        let object = self.inner.get().await.map_err(|e| match e {
            deadpool_postgres::PoolError::Timeout(_) => PoolError::Exhausted(e.to_string()),
            other => PoolError::Unavailable(other.to_string()),
        })?;
        Ok(Box::new(PgClient { object }))
    }

    fn release(&self, client: Box<dyn DbClient>) {
        // Dropping the deadpool object hands the connection back for recycling.
        drop(client);
    }
}

struct PgClient {
    object: Object,
}

#[async_trait]
impl DbClient for PgClient {
    async fn query(&self, statement: &str, parameters: &[Value]) -> Result<Value, QueryError> {
        let prepared = self
            .object
            .prepare_cached(statement)
            .await
            .map_err(query_error)?;

        let expected = prepared.params();
        if expected.len() != parameters.len() {
            return Err(QueryError(format!(
                "statement expects {} parameters, got {}",
                expected.len(),
                parameters.len()
            )));
        }

        let bound = expected
            .iter()
            .zip(parameters)
            .map(|(ty, value)| bind_parameter(ty, value))
            .collect::<Result<Vec<SqlParam>, QueryError>>()?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();

        let rows = self
            .object
            .query(&prepared, &refs)
            .await
            .map_err(query_error)?;
        Ok(rows_to_json(&prepared, &rows))
    }
}

fn query_error(err: tokio_postgres::Error) -> QueryError {
    match err.as_db_error() {
        Some(db) => QueryError(format!("error: {}", db.message())),
        None => QueryError(err.to_string()),
    }
}

/// Untyped SQL NULL, accepted for any declared parameter type.
#[derive(Debug)]
struct SqlNull;

impl ToSql for SqlNull {
    fn to_sql(&self, _ty: &Type, _out: &mut BytesMut) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn boxed<T: ToSql + Sync + Send + 'static>(value: T) -> SqlParam {
    Box::new(value)
}

/// Converts a JSON parameter to the type the server declared for its slot.
fn bind_parameter(ty: &Type, value: &Value) -> Result<SqlParam, QueryError> {
    if value.is_null() {
        return Ok(boxed(SqlNull));
    }

    let mismatch = || QueryError(format!("cannot bind {value} as {}", ty.name()));

    let param = if *ty == Type::BOOL {
        value.as_bool().map(boxed)
    } else if *ty == Type::INT2 {
        value.as_i64().and_then(|n| i16::try_from(n).ok()).map(boxed)
    } else if *ty == Type::INT4 {
        value.as_i64().and_then(|n| i32::try_from(n).ok()).map(boxed)
    } else if *ty == Type::INT8 {
        value.as_i64().map(boxed)
    } else if *ty == Type::FLOAT4 {
        value.as_f64().map(|n| boxed(n as f32))
    } else if *ty == Type::FLOAT8 {
        value.as_f64().map(boxed)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        Some(boxed(value.clone()))
    } else {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Some(boxed(text))
    };

    param.ok_or_else(mismatch)
}

fn rows_to_json(statement: &Statement, rows: &[Row]) -> Value {
    let fields: Vec<Value> = statement
        .columns()
        .iter()
        .map(|c| json!({ "name": c.name(), "dataType": c.type_().name() }))
        .collect();
    let rows_json: Vec<Value> = rows.iter().map(row_to_object).collect();

    json!({
        "rows": rows_json,
        "rowCount": rows.len(),
        "fields": fields,
    })
}

fn row_to_object(row: &Row) -> Value {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_owned(), column_value(row, idx, column.type_()));
    }
    Value::Object(object)
}

fn cell<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Option<T> {
    row.try_get::<usize, Option<T>>(idx).ok().flatten()
}

fn column_value(row: &Row, idx: usize, ty: &Type) -> Value {
    let value = if *ty == Type::BOOL {
        cell::<bool>(row, idx).map(Value::from)
    } else if *ty == Type::INT2 {
        cell::<i16>(row, idx).map(Value::from)
    } else if *ty == Type::INT4 {
        cell::<i32>(row, idx).map(Value::from)
    } else if *ty == Type::INT8 {
        cell::<i64>(row, idx).map(Value::from)
    } else if *ty == Type::FLOAT4 {
        cell::<f32>(row, idx).map(|n| Value::from(f64::from(n)))
    } else if *ty == Type::FLOAT8 {
        cell::<f64>(row, idx).map(Value::from)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        cell::<Value>(row, idx)
    } else {
        cell::<String>(row, idx).map(Value::from)
    };
    value.unwrap_or(Value::Null)
}
