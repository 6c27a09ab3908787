use log::warn;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ReconcileReport, SchemaReconciler, TableSpec};

/// Runs reconciliation for one table before the first read or write and
/// remembers a fully successful run for the life of the process. Partial or
/// failed runs are retried on the next call.
pub struct SchemaGate {
    reconciler: Arc<SchemaReconciler>,
    table: TableSpec,
    ready: Mutex<bool>,
}

impl SchemaGate {
    pub fn new(reconciler: Arc<SchemaReconciler>, table: TableSpec) -> Self {
        Self {
            reconciler,
            table,
            ready: Mutex::new(false),
        }
    }

    pub fn table(&self) -> &str {
        &self.table.name
    }

    /// Returns the report when reconciliation actually ran.
    pub async fn ensure(&self) -> Option<ReconcileReport> {
        let mut ready = self.ready.lock().await;
        if *ready {
            return None;
        }

        let report = self.reconciler.reconcile(&self.table).await;
        if report.is_success() {
            *ready = true;
        } else {
            warn!(
                "Schema for {} is not fully reconciled, continuing anyway ({} manual, {} failed)",
                self.table.name,
                report.manual_sql.len(),
                report.failures().len()
            );
        }
        Some(report)
    }

    pub async fn reset(&self) {
        *self.ready.lock().await = false;
    }
}
