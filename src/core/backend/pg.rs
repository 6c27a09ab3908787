//! Direct Postgres execution channel, used when the RPC function cannot run
//! statements (missing function, insufficient privilege).

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::sql_query;
use diesel::sql_types::Text;
use log::{info, trace};
use serde_json::Value;
use std::time::Duration;

use super::error::{BackendError, BackendResult, RpcErrorPayload, INSUFFICIENT_PRIVILEGE};
use super::SqlExecutor;
use crate::core::config::DatabaseConfig;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

#[derive(QueryableByName)]
struct JsonRows {
    #[diesel(sql_type = Text)]
    data: String,
}

pub struct PgExecutor {
    pool: DbPool,
}

impl PgExecutor {
    /// Builds the pool without opening a connection, so an unreachable
    /// database shows up as an unavailable channel on first use.
    pub fn connect(config: &DatabaseConfig) -> Option<Self> {
        let url = config.url.as_deref().filter(|u| !u.trim().is_empty())?;
        let manager = ConnectionManager::<PgConnection>::new(url);
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .connection_timeout(Duration::from_secs(config.connect_timeout_secs.max(1)))
            .build_unchecked(manager);
        info!("Direct database channel configured");
        Some(Self { pool })
    }

    fn run(pool: &DbPool, sql: &str) -> BackendResult<Value> {
        let mut conn = pool
            .get()
            .map_err(|e| BackendError::unavailable(format!("connection failed: {e}")))?;

        if is_row_returning(sql) {
            let wrapped = format!(
                "SELECT coalesce(json_agg(t), '[]'::json)::text AS data FROM ({}) t",
                sql.trim().trim_end_matches(';')
            );
            let rows: Vec<JsonRows> = sql_query(wrapped)
                .load(&mut conn)
                .map_err(statement_error)?;
            let data = rows.into_iter().next().map(|r| r.data);
            return match data {
                Some(text) => serde_json::from_str(&text)
                    .map_err(|e| BackendError::Decode(format!("invalid json_agg output: {e}"))),
                None => Ok(Value::Array(Vec::new())),
            };
        }

        sql_query(sql).execute(&mut conn).map_err(statement_error)?;
        Ok(Value::Null)
    }
}

/// Privilege errors mean this role cannot run DDL at all; anything else is
/// about the statement.
fn statement_error(e: diesel::result::Error) -> BackendError {
    let message = e.to_string();
    let lower = message.to_ascii_lowercase();
    if lower.contains("permission denied") || lower.contains("must be owner of") {
        BackendError::ChannelUnavailable(RpcErrorPayload {
            code: Some(INSUFFICIENT_PRIVILEGE.to_string()),
            message,
            ..RpcErrorPayload::default()
        })
    } else {
        BackendError::Database(message)
    }
}

fn is_row_returning(sql: &str) -> bool {
    let head = sql.trim_start().to_ascii_lowercase();
    head.starts_with("select") || head.starts_with("with")
}

#[async_trait]
impl SqlExecutor for PgExecutor {
    async fn exec_sql(&self, sql: &str) -> BackendResult<Value> {
        trace!("postgres <- {}", sql);
        let pool = self.pool.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || Self::run(&pool, &sql))
            .await
            .map_err(|e| BackendError::Database(format!("blocking task failed: {e}")))?
    }

    fn channel_name(&self) -> &str {
        "postgres"
    }
}
