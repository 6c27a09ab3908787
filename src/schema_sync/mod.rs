//! Best-effort schema reconciliation.
//!
//! For every expected column: look it up, and if it is absent run an additive
//! `ALTER TABLE ... ADD COLUMN IF NOT EXISTS`. Lookups go through the RPC
//! channel first, then the direct database channel, then a row API probe.
//! Statements go through the RPC channel, then the direct channel; when
//! neither can run them the statement is handed back for manual execution.
//! Reconciliation never returns an error: every failure ends up in the
//! [`ReconcileReport`].

pub mod catalog;
pub mod gate;
pub mod statement;

pub use gate::SchemaGate;
pub use statement::{AdditiveStatement, ColumnDefault, ColumnSpec, ColumnType, TableSpec};

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::core::backend::{BackendError, Recovery, RowStore, SqlExecutor};
use statement::{column_exists_query, table_exists_query};

const RELOAD_SCHEMA_CACHE: &str = "NOTIFY pgrst, 'reload schema'";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ColumnOutcome {
    Present,
    Added { channel: String },
    /// Dry run: the statement that would be executed.
    Planned { sql: String },
    ManualRequired { sql: String, reason: String },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnReport {
    pub column: String,
    #[serde(flatten)]
    pub outcome: ColumnOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub table: String,
    pub table_created: bool,
    pub columns: Vec<ColumnReport>,
    /// Statements the operator has to run by hand, in order.
    pub manual_sql: Vec<String>,
}

impl ReconcileReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            ..Self::default()
        }
    }

    fn push(&mut self, column: &str, outcome: ColumnOutcome) {
        if let ColumnOutcome::ManualRequired { sql, .. } = &outcome {
            if !self.manual_sql.contains(sql) {
                self.manual_sql.push(sql.clone());
            }
        }
        self.columns.push(ColumnReport {
            column: column.to_string(),
            outcome,
        });
    }

    fn count(&self, pred: impl Fn(&ColumnOutcome) -> bool) -> usize {
        self.columns.iter().filter(|c| pred(&c.outcome)).count()
    }

    pub fn added(&self) -> usize {
        self.count(|o| matches!(o, ColumnOutcome::Added { .. }))
    }

    pub fn present(&self) -> usize {
        self.count(|o| matches!(o, ColumnOutcome::Present))
    }

    pub fn planned(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter_map(|c| match &c.outcome {
                ColumnOutcome::Planned { sql } => Some(sql.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&ColumnReport> {
        self.columns
            .iter()
            .filter(|c| matches!(c.outcome, ColumnOutcome::Failed { .. }))
            .collect()
    }

    pub fn needs_operator(&self) -> bool {
        !self.manual_sql.is_empty()
    }

    /// Every expected column is now in place.
    pub fn is_success(&self) -> bool {
        self.columns
            .iter()
            .all(|c| matches!(c.outcome, ColumnOutcome::Present | ColumnOutcome::Added { .. }))
    }
}

enum Probe {
    Present,
    Absent,
    Unknown(String),
}

enum Execution {
    Done(String),
    AlreadyExists,
    /// The statement's target table does not exist.
    Undefined(String),
    Manual(String),
    Failed(String),
}

/// An `ADD COLUMN` hit a table that is not there.
struct TableMissing(String);

pub struct SchemaReconciler {
    rpc: Arc<dyn SqlExecutor>,
    store: Arc<dyn RowStore>,
    direct: Option<Arc<dyn SqlExecutor>>,
    schema: String,
    dry_run: bool,
}

impl SchemaReconciler {
    pub fn new(rpc: Arc<dyn SqlExecutor>, store: Arc<dyn RowStore>, schema: &str) -> Self {
        Self {
            rpc,
            store,
            direct: None,
            schema: schema.to_string(),
            dry_run: false,
        }
    }

    pub fn with_direct_channel(mut self, direct: Arc<dyn SqlExecutor>) -> Self {
        self.direct = Some(direct);
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub async fn reconcile_all(&self, tables: &[TableSpec]) -> Vec<ReconcileReport> {
        let mut reports = Vec::with_capacity(tables.len());
        for table in tables {
            reports.push(self.reconcile(table).await);
        }
        reports
    }

    pub async fn reconcile(&self, table: &TableSpec) -> ReconcileReport {
        let mut report = ReconcileReport::new(&table.name);
        info!("Reconciling table {}.{}", self.schema, table.name);

        match self.probe_table(&table.name).await {
            Probe::Absent => {
                self.create_table(table, &mut report).await;
                self.finish(&report).await;
                return report;
            }
            Probe::Unknown(reason) => {
                debug!("Table {} existence unknown ({}), probing columns", table.name, reason);
            }
            Probe::Present => {}
        }

        for column in &table.columns {
            match self.reconcile_column(&table.name, column).await {
                Ok(outcome) => report.push(&column.name, outcome),
                Err(TableMissing(reason)) => {
                    info!("Table {} does not exist ({}), creating it", table.name, reason);
                    report = ReconcileReport::new(&table.name);
                    self.create_table(table, &mut report).await;
                    break;
                }
            }
        }

        self.finish(&report).await;
        report
    }

    async fn reconcile_column(
        &self,
        table: &str,
        column: &ColumnSpec,
    ) -> Result<ColumnOutcome, TableMissing> {
        let sql = match (AdditiveStatement::AddColumn {
            schema: &self.schema,
            table,
            column,
        })
        .to_sql()
        {
            Ok(sql) => sql,
            Err(e) => {
                return Ok(ColumnOutcome::Failed {
                    message: e.to_string(),
                })
            }
        };

        match self.probe_column(table, &column.name).await {
            Probe::Present => {
                debug!("Column {}.{} already exists", table, column.name);
                return Ok(ColumnOutcome::Present);
            }
            Probe::Absent => info!("Column {}.{} is missing", table, column.name),
            // Guarded by IF NOT EXISTS.
            Probe::Unknown(reason) => warn!(
                "Could not determine whether {}.{} exists ({}), applying guarded statement",
                table, column.name, reason
            ),
        }

        if self.dry_run {
            return Ok(ColumnOutcome::Planned { sql });
        }

        Ok(match self.execute(&sql).await {
            Execution::Done(channel) => {
                info!("Added column {}.{} via {}", table, column.name, channel);
                ColumnOutcome::Added { channel }
            }
            Execution::AlreadyExists => {
                info!("Column {}.{} already exists, skipping", table, column.name);
                ColumnOutcome::Present
            }
            Execution::Undefined(reason) => return Err(TableMissing(reason)),
            Execution::Manual(reason) => {
                warn!("Column {}.{} needs manual SQL: {}", table, column.name, sql);
                ColumnOutcome::ManualRequired { sql, reason }
            }
            Execution::Failed(message) => {
                warn!("Failed to add column {}.{}: {}", table, column.name, message);
                ColumnOutcome::Failed { message }
            }
        })
    }

    async fn create_table(&self, table: &TableSpec, report: &mut ReconcileReport) {
        info!("Table {}.{} is missing, creating it", self.schema, table.name);
        let sql = match (AdditiveStatement::CreateTable {
            schema: &self.schema,
            table,
        })
        .to_sql()
        {
            Ok(sql) => sql,
            Err(e) => {
                let message = e.to_string();
                for column in &table.columns {
                    report.push(
                        &column.name,
                        ColumnOutcome::Failed {
                            message: message.clone(),
                        },
                    );
                }
                return;
            }
        };

        if self.dry_run {
            for column in &table.columns {
                report.push(&column.name, ColumnOutcome::Planned { sql: sql.clone() });
            }
            return;
        }

        let failure = match self.execute(&sql).await {
            Execution::Done(channel) => {
                info!("Created table {}.{} via {}", self.schema, table.name, channel);
                report.table_created = true;
                None
            }
            Execution::AlreadyExists => None,
            Execution::Manual(reason) => {
                warn!("Table {} needs manual SQL: {}", table.name, sql);
                Some(ColumnOutcome::ManualRequired {
                    sql: sql.clone(),
                    reason,
                })
            }
            Execution::Undefined(message) | Execution::Failed(message) => {
                warn!("Failed to create table {}: {}", table.name, message);
                Some(ColumnOutcome::Failed { message })
            }
        };

        if let Some(outcome) = failure {
            for column in &table.columns {
                report.push(&column.name, outcome.clone());
            }
            return;
        }

        // IF NOT EXISTS also succeeds on a table that appeared after the probe,
        // so the columns are still checked one by one.
        for column in &table.columns {
            let outcome = self
                .reconcile_column(&table.name, column)
                .await
                .unwrap_or_else(|TableMissing(message)| ColumnOutcome::Failed { message });
            report.push(&column.name, outcome);
        }
    }

    async fn finish(&self, report: &ReconcileReport) {
        if report.table_created || report.added() > 0 {
            self.reload_schema_cache().await;
        }

        info!(
            "Schema sync summary for {}: {} present, {} added, {} manual, {} failed",
            report.table,
            report.present(),
            report.added(),
            report.manual_sql.len(),
            report.failures().len()
        );
    }

    /// The row API serves a cached schema until told to reload it.
    async fn reload_schema_cache(&self) {
        for channel in self.sql_channels() {
            match channel.exec_sql(RELOAD_SCHEMA_CACHE).await {
                Ok(_) => return,
                Err(e) => debug!("{} schema cache reload failed: {}", channel.channel_name(), e),
            }
        }
    }

    async fn probe_table(&self, table: &str) -> Probe {
        let query = match table_exists_query(&self.schema, table) {
            Ok(q) => q,
            Err(e) => return Probe::Unknown(e.to_string()),
        };

        if let Some(found) = self.metadata_lookup(&query).await {
            return found;
        }

        match self.store.probe_table(table).await {
            Ok(true) => Probe::Present,
            Ok(false) => Probe::Absent,
            Err(e) => Probe::Unknown(e.to_string()),
        }
    }

    async fn probe_column(&self, table: &str, column: &str) -> Probe {
        let query = match column_exists_query(&self.schema, table, column) {
            Ok(q) => q,
            Err(e) => return Probe::Unknown(e.to_string()),
        };

        if let Some(found) = self.metadata_lookup(&query).await {
            return found;
        }

        match self.store.probe_column(table, column).await {
            Ok(true) => Probe::Present,
            Ok(false) => Probe::Absent,
            Err(e) => Probe::Unknown(e.to_string()),
        }
    }

    /// Runs an information_schema query through the SQL channels. `None` when
    /// no channel gave a usable row set.
    async fn metadata_lookup(&self, query: &str) -> Option<Probe> {
        for channel in self.sql_channels() {
            match channel.exec_sql(query).await {
                Ok(Value::Array(rows)) => {
                    return Some(if rows.is_empty() {
                        Probe::Absent
                    } else {
                        Probe::Present
                    })
                }
                Ok(other) => debug!(
                    "{} returned no row set for metadata query ({})",
                    channel.channel_name(),
                    other
                ),
                Err(e) => debug!("{} metadata query failed: {}", channel.channel_name(), e),
            }
        }
        None
    }

    fn sql_channels(&self) -> impl Iterator<Item = &Arc<dyn SqlExecutor>> {
        std::iter::once(&self.rpc).chain(self.direct.iter())
    }

    /// Tries each channel in turn. A channel that is missing, refuses the
    /// call or is down hands over to the next one; when none is left the
    /// statement goes back to the operator.
    async fn execute(&self, sql: &str) -> Execution {
        let mut unavailable = Vec::new();

        for channel in self.sql_channels() {
            let name = channel.channel_name();
            match channel.exec_sql(sql).await {
                Ok(_) => return Execution::Done(name.to_string()),
                Err(e) if e.is_already_exists() => return Execution::AlreadyExists,
                Err(e) if e.is_undefined_object() => return Execution::Undefined(describe(name, &e)),
                Err(e) => match e.recovery() {
                    Recovery::Fallback | Recovery::Operator => {
                        warn!("{} cannot execute statements: {}", name, e);
                        unavailable.push(describe(name, &e));
                    }
                    Recovery::None => return Execution::Failed(describe(name, &e)),
                },
            }
        }

        Execution::Manual(if unavailable.is_empty() {
            "no execution channel available".to_string()
        } else {
            unavailable.join("; ")
        })
    }
}

fn describe(channel: &str, e: &BackendError) -> String {
    format!("{channel}: {e}")
}

/// Operator-ready script for everything the reports could not apply.
pub fn manual_script(reports: &[ReconcileReport]) -> Option<String> {
    let statements: Vec<&String> = reports.iter().flat_map(|r| &r.manual_sql).collect();
    if statements.is_empty() {
        return None;
    }

    let mut script = String::from(
        "-- The schema could not be updated automatically.\n-- Run these statements in the database SQL editor:\n\n",
    );
    for sql in statements {
        script.push_str(sql);
        script.push('\n');
    }
    script.push('\n');
    script.push_str(RELOAD_SCHEMA_CACHE);
    script.push_str(";\n");
    Some(script)
}

/// Full additive script for the given tables, without probing anything.
pub fn full_script(schema: &str, tables: &[TableSpec]) -> Result<String, BackendError> {
    let mut script = String::new();
    for table in tables {
        script.push_str(&format!("-- {}\n", table.name));
        script.push_str(&AdditiveStatement::CreateTable { schema, table }.to_sql()?);
        script.push('\n');
        for column in &table.columns {
            let sql = AdditiveStatement::AddColumn {
                schema,
                table: &table.name,
                column,
            }
            .to_sql()?;
            script.push_str(&sql);
            script.push('\n');
        }
        script.push('\n');
    }
    script.push_str(RELOAD_SCHEMA_CACHE);
    script.push_str(";\n");
    Ok(script)
}

/// Definition of the RPC execution function, for backends that lack it.
pub fn rpc_function_sql(schema: &str, function: &str, param: &str) -> String {
    format!(
        r#"CREATE OR REPLACE FUNCTION "{schema}"."{function}"({param} text)
RETURNS json
LANGUAGE plpgsql
SECURITY DEFINER
AS $$
DECLARE
  result json;
BEGIN
  IF lower(ltrim({param})) LIKE 'select%' OR lower(ltrim({param})) LIKE 'with%' THEN
    EXECUTE format('SELECT coalesce(json_agg(t), ''[]''::json) FROM (%s) t', {param}) INTO result;
    RETURN result;
  END IF;
  EXECUTE {param};
  RETURN NULL;
END;
$$;

REVOKE ALL ON FUNCTION "{schema}"."{function}"(text) FROM public, anon, authenticated;
GRANT EXECUTE ON FUNCTION "{schema}"."{function}"(text) TO service_role;
"#
    )
}
