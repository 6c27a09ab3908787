use anyhow::{bail, Context, Result};
use log::{error, info};
use std::sync::Arc;

use crate::core::backend::BackendClient;
use crate::core::config::AppConfig;
use crate::core::shared::state::{direct_channel, AppState};
use crate::schema_sync::{
    catalog, full_script, manual_script, rpc_function_sql, ColumnOutcome, ReconcileReport,
    SchemaReconciler, TableSpec,
};

use super::run_axum_server;

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_ACTION_REQUIRED: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reconcile {
        url: Option<String>,
        key: Option<String>,
        table: Option<String>,
        dry_run: bool,
        strict: bool,
    },
    Check {
        url: Option<String>,
        key: Option<String>,
        table: Option<String>,
    },
    Sql {
        table: Option<String>,
    },
    Serve,
    Help,
}

/// Parses everything after the program name.
pub fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.first() else {
        return Ok(Command::Help);
    };
    let rest = &args[1..];

    let mut positional = Vec::new();
    let mut table = None;
    let mut dry_run = false;
    let mut strict = false;

    let mut iter = rest.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--table" => match iter.next() {
                Some(name) => table = Some(name.clone()),
                None => bail!("--table needs a table name"),
            },
            "--dry-run" => dry_run = true,
            "--strict" => strict = true,
            flag if flag.starts_with("--") => bail!("Unknown option: {flag}"),
            value => positional.push(value.to_string()),
        }
    }

    if positional.len() > 2 {
        bail!("Too many arguments: expected at most URL and KEY");
    }
    let mut positional = positional.into_iter();
    let url = positional.next();
    let key = positional.next();

    match command.as_str() {
        "reconcile" => Ok(Command::Reconcile {
            url,
            key,
            table,
            dry_run,
            strict,
        }),
        "check" => Ok(Command::Check { url, key, table }),
        "sql" => Ok(Command::Sql { table }),
        "serve" => Ok(Command::Serve),
        "--help" | "-h" | "help" => Ok(Command::Help),
        other => bail!("Unknown command: {other}"),
    }
}

pub fn print_usage() {
    println!("Usage: ambassador-hub <command> [options]");
    println!();
    println!("Commands:");
    println!("  reconcile [URL] [KEY] [--table <name>] [--dry-run] [--strict]");
    println!("                      add missing tables and columns");
    println!("  check [URL] [KEY] [--table <name>]");
    println!("                      report missing columns without changing anything");
    println!("  sql [--table <name>]  print the additive SQL script");
    println!("  serve               run the HTTP API");
    println!();
    println!("URL and KEY default to SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY.");
    println!("Exit codes: 0 ok, 1 failure, 2 manual action or missing columns.");
}

/// Runs a command and returns the process exit code.
pub async fn run(command: Command) -> Result<u8> {
    match command {
        Command::Help => {
            print_usage();
            Ok(EXIT_OK)
        }
        Command::Sql { table } => {
            let config = AppConfig::load()?;
            let tables = select_tables(table.as_deref())?;
            print!("{}", sql_script(&config, &tables)?);
            Ok(EXIT_OK)
        }
        Command::Reconcile {
            url,
            key,
            table,
            dry_run,
            strict,
        } => {
            let config = load_validated(url, key)?;
            let tables = select_tables(table.as_deref())?;
            let reconciler = build_reconciler(&config)?.dry_run(dry_run);
            let reports = reconciler.reconcile_all(&tables).await;

            for report in &reports {
                println!("{}", render_report(report));
            }
            if let Some(script) = manual_script(&reports) {
                println!();
                println!("{script}");
            }
            Ok(reconcile_exit_code(&reports, strict))
        }
        Command::Check { url, key, table } => {
            let config = load_validated(url, key)?;
            let tables = select_tables(table.as_deref())?;
            let reconciler = build_reconciler(&config)?.dry_run(true);
            let reports = reconciler.reconcile_all(&tables).await;

            let mut missing = 0;
            for report in &reports {
                println!("{}", render_report(report));
                missing += report.planned().len();
            }
            if missing > 0 {
                println!("{missing} column(s) missing or unverified");
                Ok(EXIT_ACTION_REQUIRED)
            } else {
                println!("Schema is up to date");
                Ok(EXIT_OK)
            }
        }
        Command::Serve => {
            let config = load_validated(None, None)?;
            let state = Arc::new(AppState::from_config(config)?);
            run_axum_server(state).await.context("HTTP server failed")?;
            Ok(EXIT_OK)
        }
    }
}

fn load_validated(url: Option<String>, key: Option<String>) -> Result<AppConfig> {
    let config = AppConfig::load()?.with_overrides(url, key);
    config.validate()?;
    Ok(config)
}

fn build_reconciler(config: &AppConfig) -> Result<SchemaReconciler> {
    let client = Arc::new(BackendClient::new(&config.backend)?);
    info!("Reconciling schema {} at {}", config.backend.schema, client.base_url());

    let mut reconciler =
        SchemaReconciler::new(client.clone(), client, &config.backend.schema);
    if let Some(direct) = direct_channel(config)? {
        reconciler = reconciler.with_direct_channel(direct);
    }
    Ok(reconciler)
}

pub fn select_tables(table: Option<&str>) -> Result<Vec<TableSpec>> {
    match table {
        None => Ok(catalog::all()),
        Some(name) => match catalog::find(name) {
            Some(spec) => Ok(vec![spec]),
            None => {
                let known: Vec<String> = catalog::all().into_iter().map(|t| t.name).collect();
                bail!("Unknown table {name}; expected one of {}", known.join(", "))
            }
        },
    }
}

fn sql_script(config: &AppConfig, tables: &[TableSpec]) -> Result<String> {
    let backend = &config.backend;
    let mut script = String::from("-- Execution function used for automatic schema updates\n");
    script.push_str(&rpc_function_sql(
        &backend.schema,
        &backend.rpc_function,
        &backend.rpc_param,
    ));
    script.push('\n');
    script.push_str(&full_script(&backend.schema, tables)?);
    Ok(script)
}

/// Failed statements are fatal; manual SQL only fails the run under `--strict`.
pub fn reconcile_exit_code(reports: &[ReconcileReport], strict: bool) -> u8 {
    if reports.iter().any(|r| !r.failures().is_empty()) {
        for report in reports {
            for failure in report.failures() {
                error!("{}.{} could not be reconciled", report.table, failure.column);
            }
        }
        EXIT_FAILURE
    } else if strict && reports.iter().any(ReconcileReport::needs_operator) {
        EXIT_ACTION_REQUIRED
    } else {
        EXIT_OK
    }
}

pub fn render_report(report: &ReconcileReport) -> String {
    let mut out = format!(
        "{}: {} present, {} added, {} manual, {} failed",
        report.table,
        report.present(),
        report.added(),
        report.manual_sql.len(),
        report.failures().len()
    );
    if report.table_created {
        out.push_str(" (table created)");
    }
    for column in &report.columns {
        let line = match &column.outcome {
            ColumnOutcome::Present => continue,
            ColumnOutcome::Added { channel } => format!("added via {channel}"),
            ColumnOutcome::Planned { sql } => format!("missing, would run: {sql}"),
            ColumnOutcome::ManualRequired { reason, .. } => format!("manual SQL required ({reason})"),
            ColumnOutcome::Failed { message } => format!("failed: {message}"),
        };
        out.push_str(&format!("\n  {}: {}", column.column, line));
    }
    out
}
