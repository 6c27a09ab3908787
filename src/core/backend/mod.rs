//! Access to the hosted backend.
//!
//! Two seams: [`SqlExecutor`] runs SQL text through some execution channel,
//! [`RowStore`] reads and writes rows through the row-level REST API.
//! [`BackendClient`] implements both over HTTP.

pub mod client;
pub mod error;
#[cfg(feature = "postgres")]
pub mod pg;

pub use client::BackendClient;
pub use error::{BackendError, BackendResult, Recovery, RpcErrorPayload};

use async_trait::async_trait;
use serde_json::Value;

/// Runs arbitrary SQL text. `Ok(Value::Null)` is returned when the channel
/// executes the statement but yields no rows.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn exec_sql(&self, sql: &str) -> BackendResult<Value>;

    /// Short name used in log lines and reports.
    fn channel_name(&self) -> &str;
}

/// Equality filter on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            column: column.into(),
            value: value.to_string(),
        }
    }
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn select(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Value>>;

    async fn insert(&self, table: &str, row: &Value) -> BackendResult<Value>;

    /// Insert-or-update keyed on `conflict_column`; returns the stored row.
    async fn upsert(&self, table: &str, row: &Value, conflict_column: &str)
        -> BackendResult<Value>;

    /// Patches the row with `id` when it also matches every `guard` filter;
    /// `BackendError::NotFound` when nothing matched.
    async fn update(
        &self,
        table: &str,
        id: &str,
        guard: &[Filter],
        patch: &Value,
    ) -> BackendResult<Value>;

    /// Checks whether `column` is selectable on `table` without touching the
    /// metadata schema. `Ok(false)` when the column or table is undefined.
    async fn probe_column(&self, table: &str, column: &str) -> BackendResult<bool>;

    /// `Ok(false)` when the table is undefined.
    async fn probe_table(&self, table: &str) -> BackendResult<bool>;

    async fn select_one(&self, table: &str, id: &str) -> BackendResult<Option<Value>> {
        let mut rows = self.select(table, &[Filter::eq("id", id)]).await?;
        if rows.is_empty() {
            Ok(None)
        } else {
            Ok(Some(rows.swap_remove(0)))
        }
    }
}
