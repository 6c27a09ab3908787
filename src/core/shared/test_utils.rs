//! In-memory stand-in for the hosted backend. Understands exactly the SQL the
//! reconciler emits and the row API semantics the services rely on.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::core::backend::{
    BackendError, BackendResult, Filter, RowStore, RpcErrorPayload, SqlExecutor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RpcMode {
    Normal,
    Unavailable,
    Void,
    Down,
}

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, Table>,
    ddl: Vec<String>,
    rpc_calls: usize,
}

pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
    rpc_mode: RpcMode,
    ddl_error: Option<String>,
    probes_fail: bool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn rpc_error(status: u16, code: &str, message: &str) -> BackendError {
    BackendError::from_rpc_response(
        status,
        RpcErrorPayload {
            code: Some(code.to_string()),
            message: message.to_string(),
            details: None,
            hint: None,
        },
    )
}

fn row_error(status: u16, code: &str, message: &str) -> BackendError {
    BackendError::Rpc {
        status,
        payload: RpcErrorPayload {
            code: Some(code.to_string()),
            message: message.to_string(),
            details: None,
            hint: None,
        },
    }
}

fn delimited(sql: &str, quote: char) -> Vec<String> {
    sql.split(quote)
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn apply_sql(state: &mut State, sql: &str) -> BackendResult<Value> {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();

    if upper.starts_with("SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS") {
        let literals = delimited(trimmed, '\'');
        let (table, column) = (&literals[1], &literals[2]);
        let found = state
            .tables
            .get(table)
            .is_some_and(|t| t.columns.contains(column));
        return Ok(if found {
            json!([{ "column_name": column }])
        } else {
            json!([])
        });
    }

    if upper.starts_with("SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES") {
        let literals = delimited(trimmed, '\'');
        return Ok(if state.tables.contains_key(&literals[1]) {
            json!([{ "table_name": literals[1] }])
        } else {
            json!([])
        });
    }

    if upper.starts_with("ALTER TABLE") {
        let idents = delimited(trimmed, '"');
        let (table, column) = (&idents[1], &idents[2]);
        let Some(t) = state.tables.get_mut(table) else {
            return Err(rpc_error(400, "42P01", &format!("relation \"{table}\" does not exist")));
        };
        if !t.columns.contains(column) {
            t.columns.push(column.clone());
            for row in &mut t.rows {
                row.insert(column.clone(), Value::Null);
            }
        }
        state.ddl.push(trimmed.to_string());
        return Ok(Value::Null);
    }

    if upper.starts_with("CREATE TABLE") {
        let idents = delimited(trimmed, '"');
        let table = idents[1].clone();
        if !state.tables.contains_key(&table) {
            state.tables.insert(
                table,
                Table {
                    columns: idents[2..].to_vec(),
                    rows: Vec::new(),
                },
            );
        }
        state.ddl.push(trimmed.to_string());
        return Ok(Value::Null);
    }

    if upper.starts_with("NOTIFY") {
        return Ok(Value::Null);
    }

    Err(rpc_error(400, "42601", "syntax error"))
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            rpc_mode: RpcMode::Normal,
            ddl_error: None,
            probes_fail: false,
        }
    }

    /// RPC function missing, as on a fresh project.
    pub fn without_rpc(mut self) -> Self {
        self.rpc_mode = RpcMode::Unavailable;
        self
    }

    /// RPC function that executes but never returns rows.
    pub fn with_void_rpc(mut self) -> Self {
        self.rpc_mode = RpcMode::Void;
        self
    }

    /// RPC endpoint answering 503 to every call.
    pub fn with_rpc_down(mut self) -> Self {
        self.rpc_mode = RpcMode::Down;
        self
    }

    /// Row API probes error out, so existence checks cannot conclude.
    pub fn with_failing_probes(mut self) -> Self {
        self.probes_fail = true;
        self
    }

    pub fn failing_ddl(mut self, message: &str) -> Self {
        self.ddl_error = Some(message.to_string());
        self
    }

    pub fn direct_channel(&self) -> MemoryDirect {
        MemoryDirect {
            state: self.state.clone(),
        }
    }

    pub fn create_table(&self, table: &str, columns: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.tables.insert(
            table.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                rows: Vec::new(),
            },
        );
    }

    pub fn insert_row(&self, table: &str, row: Value) {
        let mut state = self.state.lock().unwrap();
        let t = state.tables.get_mut(table).unwrap();
        if let Value::Object(map) = row {
            t.rows.push(map);
        }
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.columns(table).iter().any(|c| c == column)
    }

    pub fn columns(&self, table: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|t| t.rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub fn executed_ddl(&self) -> Vec<String> {
        self.state.lock().unwrap().ddl.clone()
    }

    pub fn rpc_calls(&self) -> usize {
        self.state.lock().unwrap().rpc_calls
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut state = self.state.lock().unwrap();
        match state.tables.get_mut(table) {
            Some(t) => f(t),
            None => Err(row_error(
                404,
                "42P01",
                &format!("relation \"public.{table}\" does not exist"),
            )),
        }
    }
}

fn check_columns(table: &Table, row: &Map<String, Value>) -> BackendResult<()> {
    for key in row.keys() {
        if !table.columns.contains(key) {
            return Err(row_error(
                400,
                "PGRST204",
                &format!("Could not find the '{key}' column in the schema cache"),
            ));
        }
    }
    Ok(())
}

fn materialize(table: &Table, mut row: Map<String, Value>) -> Map<String, Value> {
    let now = Value::String(Utc::now().to_rfc3339());
    for column in &table.columns {
        if row.contains_key(column) {
            continue;
        }
        let value = match column.as_str() {
            "id" => Value::String(Uuid::new_v4().to_string()),
            "created_at" | "updated_at" => now.clone(),
            _ => Value::Null,
        };
        row.insert(column.clone(), value);
    }
    row
}

fn object(row: &Value) -> BackendResult<Map<String, Value>> {
    row.as_object()
        .cloned()
        .ok_or_else(|| row_error(400, "PGRST102", "expected a JSON object"))
}

#[async_trait]
impl SqlExecutor for MemoryBackend {
    async fn exec_sql(&self, sql: &str) -> BackendResult<Value> {
        let mut state = self.state.lock().unwrap();
        state.rpc_calls += 1;

        match self.rpc_mode {
            RpcMode::Unavailable => {
                return Err(rpc_error(
                    404,
                    "PGRST202",
                    "Could not find the function public.exec_sql(sql) in the schema cache",
                ))
            }
            RpcMode::Down => {
                return Err(BackendError::from_rpc_response(
                    503,
                    RpcErrorPayload {
                        message: "upstream down".to_string(),
                        ..RpcErrorPayload::default()
                    },
                ))
            }
            RpcMode::Void | RpcMode::Normal => {}
        }

        let is_ddl = {
            let upper = sql.trim_start().to_uppercase();
            upper.starts_with("ALTER") || upper.starts_with("CREATE")
        };
        if is_ddl {
            if let Some(message) = &self.ddl_error {
                return Err(rpc_error(400, "P0001", message));
            }
        }

        let result = apply_sql(&mut state, sql)?;
        Ok(match self.rpc_mode {
            RpcMode::Void => Value::Null,
            _ => result,
        })
    }

    fn channel_name(&self) -> &str {
        "rpc"
    }
}

#[async_trait]
impl RowStore for MemoryBackend {
    async fn select(&self, table: &str, filters: &[Filter]) -> BackendResult<Vec<Value>> {
        self.with_table(table, |t| {
            for filter in filters {
                if !t.columns.contains(&filter.column) {
                    return Err(row_error(
                        400,
                        "42703",
                        &format!("column {}.{} does not exist", table, filter.column),
                    ));
                }
            }
            Ok(t.rows
                .iter()
                .filter(|row| {
                    filters.iter().all(|f| {
                        row.get(&f.column).map(as_text).as_deref() == Some(f.value.as_str())
                    })
                })
                .cloned()
                .map(Value::Object)
                .collect())
        })
    }

    async fn insert(&self, table: &str, row: &Value) -> BackendResult<Value> {
        let row = object(row)?;
        self.with_table(table, |t| {
            check_columns(t, &row)?;
            let stored = materialize(t, row);
            t.rows.push(stored.clone());
            Ok(Value::Object(stored))
        })
    }

    async fn upsert(
        &self,
        table: &str,
        row: &Value,
        conflict_column: &str,
    ) -> BackendResult<Value> {
        let row = object(row)?;
        self.with_table(table, |t| {
            check_columns(t, &row)?;
            let key = row.get(conflict_column).map(as_text);
            let existing = t.rows.iter_mut().find(|r| {
                key.is_some() && r.get(conflict_column).map(as_text) == key
            });
            match existing {
                Some(current) => {
                    for (k, v) in row {
                        current.insert(k, v);
                    }
                    Ok(Value::Object(current.clone()))
                }
                None => {
                    let stored = materialize(t, row);
                    t.rows.push(stored.clone());
                    Ok(Value::Object(stored))
                }
            }
        })
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        guard: &[Filter],
        patch: &Value,
    ) -> BackendResult<Value> {
        let patch = object(patch)?;
        self.with_table(table, |t| {
            check_columns(t, &patch)?;
            let Some(current) = t.rows.iter_mut().find(|r| {
                r.get("id").map(as_text).as_deref() == Some(id)
                    && guard.iter().all(|f| {
                        r.get(&f.column).map(as_text).as_deref() == Some(f.value.as_str())
                    })
            })
            else {
                return Err(BackendError::NotFound(format!("{table} {id}")));
            };
            for (k, v) in patch {
                current.insert(k, v);
            }
            Ok(Value::Object(current.clone()))
        })
    }

    async fn probe_column(&self, table: &str, column: &str) -> BackendResult<bool> {
        if self.probes_fail {
            return Err(row_error(503, "PGRST000", "row API unavailable"));
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .tables
            .get(table)
            .is_some_and(|t| t.columns.iter().any(|c| c == column)))
    }

    async fn probe_table(&self, table: &str) -> BackendResult<bool> {
        if self.probes_fail {
            return Err(row_error(503, "PGRST000", "row API unavailable"));
        }
        Ok(self.state.lock().unwrap().tables.contains_key(table))
    }
}

/// Direct database channel sharing the same state.
pub struct MemoryDirect {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl SqlExecutor for MemoryDirect {
    async fn exec_sql(&self, sql: &str) -> BackendResult<Value> {
        let mut state = self.state.lock().unwrap();
        apply_sql(&mut state, sql)
    }

    fn channel_name(&self) -> &str {
        "memory-direct"
    }
}

/// Direct database channel whose connection attempts all fail.
pub struct UnreachableDirect;

#[async_trait]
impl SqlExecutor for UnreachableDirect {
    async fn exec_sql(&self, _sql: &str) -> BackendResult<Value> {
        Err(BackendError::Database(
            "connection failed: connection refused".to_string(),
        ))
    }

    fn channel_name(&self) -> &str {
        "postgres"
    }
}
