// attendance-backup/src/backup/sql_export.rs
//! Fallback exporter used when the dump tool is unavailable.
//!
//! Tables are read one query at a time without a shared snapshot, so a dump
//! taken while the database is being written to is not point-in-time
//! consistent across tables.
use async_trait::async_trait;
use chrono::Local;
use futures::TryStreamExt;
use sqlx::mysql::MySqlRow;
use sqlx::{Column, Connection, MySqlConnection, Row, TypeInfo, ValueRef};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::Exporter;
use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};
use crate::utils::format_file_size;

/// A column value rendered for an `INSERT` statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    /// Text, date and time values; emitted single-quoted.
    Quoted(String),
    /// Numbers and hex literals; emitted as-is.
    Raw(String),
}

impl SqlValue {
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Quoted(text) => format!("'{}'", text.replace('\'', "''")),
            SqlValue::Raw(text) => text.clone(),
        }
    }
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Read access to the schema and rows of one database.
#[async_trait]
pub trait SchemaSource: Send {
    /// Base tables in the order the server reports them.
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// The server's own `CREATE TABLE` statement, without trailing `;`.
    async fn create_statement(&mut self, table: &str) -> Result<String>;

    /// Streams every row of `table` into `on_row`, returning the row count.
    async fn for_each_row(
        &mut self,
        table: &str,
        on_row: &mut (dyn FnMut(Vec<SqlValue>) -> Result<()> + Send),
    ) -> Result<usize>;
}

/// Writes a reloadable dump of every table in `source` to `out`.
///
/// Foreign-key checks are disabled for the duration of the reload so tables can
/// be recreated in any order. `NO_BACKSLASH_ESCAPES` makes quote doubling the
/// only escaping string literals need. Returns the number of tables written.
pub async fn write_dump<S, W>(source: &mut S, database_name: &str, out: &mut W) -> Result<usize>
where
    S: SchemaSource + ?Sized,
    W: Write + Send,
{
    writeln!(out, "-- ========================================")?;
    writeln!(out, "-- Attendance database backup")?;
    writeln!(out, "-- Database: {}", database_name)?;
    writeln!(out, "-- Generated: {}", Local::now().format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(out, "-- ========================================")?;
    writeln!(out)?;
    writeln!(out, "SET @OLD_SQL_MODE=@@SQL_MODE;")?;
    writeln!(out, "SET SQL_MODE='NO_AUTO_VALUE_ON_ZERO,NO_BACKSLASH_ESCAPES';")?;
    writeln!(out, "SET FOREIGN_KEY_CHECKS=0;")?;
    writeln!(out)?;

    let tables = source.list_tables().await?;
    for table in &tables {
        let rows = write_table(source, table, out).await?;
        tracing::info!(table = %table, rows, "Exported table");
    }

    writeln!(out, "SET FOREIGN_KEY_CHECKS=1;")?;
    writeln!(out, "SET SQL_MODE=@OLD_SQL_MODE;")?;
    writeln!(out, "-- Backup completed successfully")?;
    out.flush()?;
    Ok(tables.len())
}

async fn write_table<S, W>(source: &mut S, table: &str, out: &mut W) -> Result<usize>
where
    S: SchemaSource + ?Sized,
    W: Write + Send,
{
    let ddl = source.create_statement(table).await?;
    let quoted = quote_identifier(table);

    writeln!(out, "-- Table: {}", table)?;
    writeln!(out, "DROP TABLE IF EXISTS {};", quoted)?;
    writeln!(out, "{};", ddl.trim_end().trim_end_matches(';'))?;
    writeln!(out)?;

    let mut first = true;
    let rows = source
        .for_each_row(table, &mut |row: Vec<SqlValue>| {
            let values: Vec<String> = row.iter().map(SqlValue::to_sql_literal).collect();
            if first {
                writeln!(out, "INSERT INTO {} VALUES", quoted)?;
                first = false;
            } else {
                writeln!(out, ",")?;
            }
            write!(out, "({})", values.join(", "))?;
            Ok(())
        })
        .await?;
    if rows > 0 {
        writeln!(out, ";")?;
        writeln!(out)?;
    }
    Ok(rows)
}

/// `SchemaSource` over a single live MySQL connection.
pub struct MySqlSource {
    conn: MySqlConnection,
    database: String,
}

impl MySqlSource {
    pub async fn connect(database: &DatabaseConfig) -> Result<Self> {
        let url = database.connection_url()?;
        let conn = MySqlConnection::connect(&url)
            .await
            .map_err(|e| BackupError::Connection(e.to_string()))?;
        Ok(Self {
            conn,
            database: database.name.clone(),
        })
    }

    pub async fn close(self) {
        if let Err(e) = self.conn.close().await {
            tracing::debug!(error = %e, "Export connection did not close cleanly");
        }
    }
}

fn introspection_error(table: &str, e: impl std::fmt::Display) -> BackupError {
    BackupError::Introspection {
        table: table.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl SchemaSource for MySqlSource {
    async fn list_tables(&mut self) -> Result<Vec<String>> {
        // information_schema names may arrive as binary strings, hence the unchecked decode.
        let rows = sqlx::query(
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'",
        )
        .bind(&self.database)
        .fetch_all(&mut self.conn)
        .await
        .map_err(|e| introspection_error("information_schema.TABLES", e))?;

        rows.iter()
            .map(|row| row.try_get_unchecked::<String, _>(0))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| introspection_error("information_schema.TABLES", e))
    }

    async fn create_statement(&mut self, table: &str) -> Result<String> {
        let row = sqlx::query(&format!("SHOW CREATE TABLE {}", quote_identifier(table)))
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| introspection_error(table, e))?
            .ok_or_else(|| introspection_error(table, "SHOW CREATE TABLE returned no rows"))?;
        row.try_get_unchecked::<String, _>(1)
            .map_err(|e| introspection_error(table, e))
    }

    async fn for_each_row(
        &mut self,
        table: &str,
        on_row: &mut (dyn FnMut(Vec<SqlValue>) -> Result<()> + Send),
    ) -> Result<usize> {
        let sql = format!("SELECT * FROM {}", quote_identifier(table));
        let mut rows = sqlx::query(&sql).fetch(&mut self.conn);
        let mut count = 0;
        while let Some(row) = rows.try_next().await.map_err(|e| introspection_error(table, e))? {
            let values = (0..row.columns().len())
                .map(|i| decode_value(&row, i))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| introspection_error(table, e))?;
            on_row(values)?;
            count += 1;
        }
        Ok(count)
    }
}

/// How a column's values are read and rendered, by sqlx type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Json,
    Binary,
    Text,
}

fn column_kind(type_name: &str) -> ColumnKind {
    let name = type_name.to_ascii_uppercase();
    match name.as_str() {
        // TINYINT(1) is reported as BOOLEAN but may hold any TINYINT value.
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            ColumnKind::Signed
        }
        n if n.starts_with("DECIMAL") => ColumnKind::Decimal,
        n if n.ends_with("UNSIGNED") => ColumnKind::Unsigned,
        "FLOAT" => ColumnKind::Float,
        "DOUBLE" => ColumnKind::Double,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "DATETIME" | "TIMESTAMP" => ColumnKind::DateTime,
        "JSON" => ColumnKind::Json,
        "BIT" | "BINARY" | "VARBINARY" | "GEOMETRY" => ColumnKind::Binary,
        n if n.ends_with("BLOB") => ColumnKind::Binary,
        _ => ColumnKind::Text,
    }
}

/// Renders one column of a MySQL row according to its declared type.
fn decode_value(row: &MySqlRow, index: usize) -> std::result::Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let value = match column_kind(row.column(index).type_info().name()) {
        ColumnKind::Signed => SqlValue::Raw(row.try_get_unchecked::<i64, _>(index)?.to_string()),
        ColumnKind::Unsigned => SqlValue::Raw(row.try_get_unchecked::<u64, _>(index)?.to_string()),
        ColumnKind::Float => SqlValue::Raw(row.try_get_unchecked::<f32, _>(index)?.to_string()),
        ColumnKind::Double => SqlValue::Raw(row.try_get_unchecked::<f64, _>(index)?.to_string()),
        ColumnKind::Decimal => SqlValue::Raw(
            row.try_get_unchecked::<sqlx::types::BigDecimal, _>(index)?
                .to_string(),
        ),
        ColumnKind::Date => SqlValue::Quoted(
            row.try_get_unchecked::<chrono::NaiveDate, _>(index)?
                .to_string(),
        ),
        // TIME spans -838:59:59..838:59:59, which chrono::NaiveTime cannot hold.
        ColumnKind::Time => {
            let raw: Vec<u8> = row.try_get_unchecked(index)?;
            SqlValue::Quoted(format_time_value(&raw).map_err(|e| sqlx::Error::Decode(e.into()))?)
        }
        ColumnKind::DateTime => SqlValue::Quoted(
            row.try_get_unchecked::<chrono::NaiveDateTime, _>(index)?
                .to_string(),
        ),
        ColumnKind::Json => SqlValue::Quoted(
            row.try_get_unchecked::<serde_json::Value, _>(index)?
                .to_string(),
        ),
        ColumnKind::Binary => hex_literal(row, index)?,
        ColumnKind::Text => SqlValue::Quoted(row.try_get_unchecked::<String, _>(index)?),
    };
    Ok(value)
}

/// Renders a MySQL `TIME` value as `[-]H:MM:SS[.ffffff]`.
///
/// Accepts the binary protocol layout (length, sign, days, hours, minutes,
/// seconds, optional microseconds) as well as the server's own text.
pub fn format_time_value(raw: &[u8]) -> std::result::Result<String, String> {
    match raw.first().copied() {
        None => Err("empty TIME value".to_string()),
        Some(0) => Ok("00:00:00".to_string()),
        Some(len) if (len == 8 || len == 12) && raw.len() == usize::from(len) + 1 => {
            let negative = raw[1] != 0;
            let days = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]);
            let hours = u64::from(days) * 24 + u64::from(raw[6]);
            let (minutes, seconds) = (raw[7], raw[8]);
            let micros = if len == 12 {
                u32::from_le_bytes([raw[9], raw[10], raw[11], raw[12]])
            } else {
                0
            };
            let mut text = format!(
                "{}{:02}:{:02}:{:02}",
                if negative { "-" } else { "" },
                hours,
                minutes,
                seconds
            );
            if micros != 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Ok(text)
        }
        Some(_) => {
            let text = std::str::from_utf8(raw).map_err(|e| format!("TIME value is not text: {}", e))?;
            if text.starts_with(|c: char| c == '-' || c.is_ascii_digit()) && text.contains(':') {
                Ok(text.to_string())
            } else {
                Err(format!("unrecognised TIME value '{}'", text))
            }
        }
    }
}

fn hex_literal(row: &MySqlRow, index: usize) -> std::result::Result<SqlValue, sqlx::Error> {
    let bytes: Vec<u8> = row.try_get_unchecked(index)?;
    Ok(SqlValue::Raw(format!("X'{}'", hex::encode_upper(bytes))))
}

/// Fallback exporter: schema introspection plus one multi-row `INSERT` per table.
pub struct SqlExportExporter {
    database: DatabaseConfig,
}

impl SqlExportExporter {
    pub fn new(database: DatabaseConfig) -> Self {
        Self { database }
    }
}

#[async_trait]
impl Exporter for SqlExportExporter {
    fn name(&self) -> &'static str {
        "sql-export"
    }

    async fn export(&self, target: &Path) -> Result<()> {
        let mut source = MySqlSource::connect(&self.database).await?;

        // Output written before a failure stays on disk.
        let file = File::create(target)?;
        let mut writer = BufWriter::new(file);
        let result = write_dump(&mut source, &self.database.name, &mut writer).await;
        source.close().await;
        let tables = result?;
        writer.flush()?;

        let size = std::fs::metadata(target).map(|m| m.len()).unwrap_or(0);
        tracing::info!(tables, size = %format_file_size(size), "SQL export backup successful");
        Ok(())
    }
}
