use async_trait::async_trait;
use log::{debug, trace};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;

use super::error::{BackendError, BackendResult, RpcErrorPayload};
use super::{Filter, RowStore, SqlExecutor};
use crate::core::config::BackendConfig;
use crate::security::sql_guard::{validate_column_name, validate_table_name};

const PREFER: &str = "Prefer";
const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

/// HTTP client for the hosted backend's REST and RPC endpoints.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    rpc_function: String,
    rpc_param: String,
    schema: String,
}

impl std::fmt::Debug for BackendClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendClient")
            .field("base_url", &self.base_url)
            .field("rpc_function", &self.rpc_function)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> BackendResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(config.service_key.trim())
            .map_err(|e| BackendError::Decode(format!("service key is not a valid header: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.service_key.trim()))
            .map_err(|e| BackendError::Decode(format!("service key is not a valid header: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if config.schema != "public" {
            let profile = HeaderValue::from_str(&config.schema)
                .map_err(|e| BackendError::Decode(format!("invalid schema name: {e}")))?;
            headers.insert("Accept-Profile", profile.clone());
            headers.insert("Content-Profile", profile);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim().trim_end_matches('/').to_string(),
            rpc_function: config.rpc_function.clone(),
            rpc_param: config.rpc_param.clone(),
            schema: config.schema.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    fn rpc_url(&self) -> String {
        format!("{}/rest/v1/rpc/{}", self.base_url, self.rpc_function)
    }

    fn table_url(&self, table: &str) -> BackendResult<String> {
        let table = validate_table_name(table)?;
        Ok(format!("{}/rest/v1/{}", self.base_url, table))
    }

    fn with_filters(request: RequestBuilder, filters: &[Filter]) -> BackendResult<RequestBuilder> {
        let mut pairs = Vec::with_capacity(filters.len());
        for filter in filters {
            let column = validate_column_name(&filter.column)?;
            pairs.push((column.to_string(), format!("eq.{}", filter.value)));
        }
        Ok(request.query(&pairs))
    }

    async fn read_json(response: Response) -> BackendResult<Value> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| BackendError::Decode(format!("invalid JSON body: {e}")))
    }

    async fn error_body(response: Response) -> (u16, RpcErrorPayload) {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, RpcErrorPayload::from_body(&body))
    }

    /// Row API responses are arrays under `return=representation`.
    async fn first_row(response: Response, table: &str) -> BackendResult<Value> {
        match Self::read_json(response).await? {
            Value::Array(mut rows) if !rows.is_empty() => Ok(rows.swap_remove(0)),
            Value::Array(_) | Value::Null => Err(BackendError::NotFound(table.to_string())),
            row @ Value::Object(_) => Ok(row),
            other => Err(BackendError::Decode(format!(
                "expected a row from {table}, got {other}"
            ))),
        }
    }

    async fn row_api_error(response: Response) -> BackendError {
        let (status, payload) = Self::error_body(response).await;
        BackendError::Rpc { status, payload }
    }

    /// Selects at most one row; undefined column/table errors mean "absent".
    async fn probe(&self, table: &str, select: &str) -> BackendResult<bool> {
        let response = self
            .client
            .get(self.table_url(table)?)
            .query(&[("select", select), ("limit", "1")])
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(true);
        }

        let err = Self::row_api_error(response).await;
        if err.is_undefined_object() {
            Ok(false)
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl SqlExecutor for BackendClient {
    async fn exec_sql(&self, sql: &str) -> BackendResult<Value> {
        trace!("rpc {} <- {}", self.rpc_function, sql);
        let mut body = serde_json::Map::new();
        body.insert(self.rpc_param.clone(), Value::String(sql.to_string()));

        let response = self
            .client
            .post(self.rpc_url())
            .json(&Value::Object(body))
            .send()
            .await?;

        if response.status().is_success() {
            return Self::read_json(response).await;
        }

        let (status, payload) = Self::error_body(response).await;
        debug!("rpc {} failed with {}: {}", self.rpc_function, status, payload);
        Err(BackendError::from_rpc_response(status, payload))
    }

    fn channel_name(&self) -> &str {
        "rpc"
    }
}

#[async_trait]
impl RowStore for BackendClient {
    async fn select(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Value>> {
        let request = self.client.get(self.table_url(table)?).query(&[("select", "*")]);
        let response = Self::with_filters(request, filters)?.send().await?;

        if !response.status().is_success() {
            return Err(Self::row_api_error(response).await);
        }

        match Self::read_json(response).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Err(BackendError::Decode(format!(
                "expected rows from {table}, got {other}"
            ))),
        }
    }

    async fn insert(&self, table: &str, row: &Value) -> BackendResult<Value> {
        let response = self
            .client
            .post(self.table_url(table)?)
            .header(PREFER, RETURN_REPRESENTATION)
            .json(row)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::row_api_error(response).await);
        }
        Self::first_row(response, table).await
    }

    async fn upsert(
        &self,
        table: &str,
        row: &Value,
        conflict_column: &str,
    ) -> BackendResult<Value> {
        let conflict_column = validate_column_name(conflict_column)?;
        let response = self
            .client
            .post(self.table_url(table)?)
            .query(&[("on_conflict", conflict_column)])
            .header(PREFER, MERGE_DUPLICATES)
            .json(row)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::row_api_error(response).await);
        }
        Self::first_row(response, table).await
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        guard: &[Filter],
        patch: &Value,
    ) -> BackendResult<Value> {
        let request = self
            .client
            .patch(self.table_url(table)?)
            .header(PREFER, RETURN_REPRESENTATION)
            .json(patch);
        let mut filters = vec![Filter::eq("id", id)];
        filters.extend_from_slice(guard);
        let response = Self::with_filters(request, &filters)?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::row_api_error(response).await);
        }
        Self::first_row(response, table)
            .await
            .map_err(|e| match e {
                BackendError::NotFound(_) => BackendError::NotFound(format!("{table} {id}")),
                other => other,
            })
    }

    async fn probe_column(&self, table: &str, column: &str) -> BackendResult<bool> {
        let column = validate_column_name(column)?;
        self.probe(table, column).await
    }

    async fn probe_table(&self, table: &str) -> BackendResult<bool> {
        self.probe(table, "*").await
    }
}
