//! Expected-schema types and the only SQL statements reconciliation may emit.

use serde::Serialize;
use std::fmt;

use crate::security::sql_guard::{
    quote_identifier, string_literal, validate_column_name, validate_table_name, SqlGuardError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    TextArray,
    Boolean,
    Integer,
    Numeric,
    Jsonb,
    Uuid,
    Date,
    Time,
    Timestamptz,
}

impl ColumnType {
    pub fn sql(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::TextArray => "text[]",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Numeric => "numeric",
            Self::Jsonb => "jsonb",
            Self::Uuid => "uuid",
            Self::Date => "date",
            Self::Time => "time",
            Self::Timestamptz => "timestamptz",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ColumnDefault {
    None,
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Json(serde_json::Value),
    EmptyArray,
    Now,
}

impl ColumnDefault {
    /// The `DEFAULT ...` clause, empty for `None`.
    pub fn clause(&self, column_type: ColumnType) -> String {
        let value = match self {
            Self::None => return String::new(),
            Self::Null => "NULL".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Text(s) => string_literal(s),
            Self::Json(v) => format!("{}::jsonb", string_literal(&v.to_string())),
            Self::EmptyArray => format!("'{{}}'::{}", column_type.sql()),
            Self::Now => "now()".to_string(),
        };
        format!(" DEFAULT {value}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub default: ColumnDefault,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType, default: ColumnDefault) -> Self {
        Self {
            name: name.into(),
            column_type,
            default,
        }
    }

    fn definition(&self) -> Result<String, SqlGuardError> {
        let name = validate_column_name(&self.name)?;
        Ok(format!(
            "{} {}{}",
            quote_identifier(name),
            self.column_type.sql(),
            self.default.clause(self.column_type)
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Schema changes that only add structure. No variant drops, renames or
/// retypes anything.
#[derive(Debug, Clone, PartialEq)]
pub enum AdditiveStatement<'a> {
    CreateTable {
        schema: &'a str,
        table: &'a TableSpec,
    },
    AddColumn {
        schema: &'a str,
        table: &'a str,
        column: &'a ColumnSpec,
    },
}

impl AdditiveStatement<'_> {
    pub fn to_sql(&self) -> Result<String, SqlGuardError> {
        match self {
            Self::CreateTable { schema, table } => {
                let qualified = qualified_name(schema, &table.name)?;
                let mut definitions =
                    vec!["\"id\" uuid PRIMARY KEY DEFAULT gen_random_uuid()".to_string()];
                for column in table.columns.iter().filter(|c| c.name != "id") {
                    definitions.push(column.definition()?);
                }
                Ok(format!(
                    "CREATE TABLE IF NOT EXISTS {} ({});",
                    qualified,
                    definitions.join(", ")
                ))
            }
            Self::AddColumn {
                schema,
                table,
                column,
            } => Ok(format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {};",
                qualified_name(schema, table)?,
                column.definition()?
            )),
        }
    }
}

fn qualified_name(schema: &str, table: &str) -> Result<String, SqlGuardError> {
    let schema = validate_table_name(schema)?;
    let table = validate_table_name(table)?;
    Ok(format!("{}.{}", quote_identifier(schema), quote_identifier(table)))
}

/// Metadata query listing matching columns of a table.
pub fn column_exists_query(schema: &str, table: &str, column: &str) -> Result<String, SqlGuardError> {
    let schema = validate_table_name(schema)?;
    let table = validate_table_name(table)?;
    let column = validate_column_name(column)?;
    Ok(format!(
        "SELECT column_name FROM information_schema.columns WHERE table_schema = {} AND table_name = {} AND column_name = {}",
        string_literal(schema),
        string_literal(table),
        string_literal(column)
    ))
}

pub fn table_exists_query(schema: &str, table: &str) -> Result<String, SqlGuardError> {
    let schema = validate_table_name(schema)?;
    let table = validate_table_name(table)?;
    Ok(format!(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = {} AND table_name = {}",
        string_literal(schema),
        string_literal(table)
    ))
}
