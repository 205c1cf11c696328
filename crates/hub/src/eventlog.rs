//! Optional pump run log.
//!
//! Each pump gets its own table (`pump_<name>`) holding one row per run with
//! `begin`/`end` Unix timestamps. Logging is best-effort: failures are
//! reported through `tracing` and never reach the caller.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use time::OffsetDateTime;
use tracing::warn;

/// Columns of a pump run table, in order.
pub const RUN_COLUMNS: &[&str] = &["begin", "end"];
const END_COLUMN: usize = 1;

/// Log table name for a pump: `pump_` + lowercase name with every
/// non-alphanumeric character replaced by `_`.
pub fn table_name(pump_name: &str) -> String {
    let sanitized: String = pump_name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("pump_{sanitized}")
}

fn is_safe_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Sink interface
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Create a table with integer columns, if it does not exist.
    async fn create_table(&self, table: &str, columns: &[&str]) -> Result<()>;

    async fn append_row(&self, table: &str, row: &[i64]) -> Result<()>;

    /// Overwrite one column of the most recently appended row.
    async fn update_last_row(&self, table: &str, column: usize, value: i64) -> Result<()>;

    /// Rename a table; renaming a table that does not exist is a no-op.
    async fn rename_table(&self, old: &str, new: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteEventLog {
    pool: Pool<Sqlite>,
}

impl SqliteEventLog {
    /// db_url examples:
    /// - "sqlite:/var/lib/pump-hub/events.db?mode=rwc"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal);

        // One connection keeps an in-memory database shared across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    async fn column_name(&self, table: &str, column: usize) -> Result<String> {
        // cid 0 is the row id.
        let cid = i64::try_from(column + 1).context("column index overflow")?;
        let name: Option<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info(?) WHERE cid = ?")
                .bind(table)
                .bind(cid)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("column lookup failed for {table}"))?;
        name.with_context(|| format!("{table} has no column {column}"))
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let n: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_one(&self.pool)
                .await
                .context("table lookup failed")?;
        Ok(n > 0)
    }
}

fn check_identifiers(names: &[&str]) -> Result<()> {
    for name in names {
        if !is_safe_identifier(name) {
            bail!("refusing unsafe SQL identifier '{name}'");
        }
    }
    Ok(())
}

#[async_trait]
impl EventSink for SqliteEventLog {
    async fn create_table(&self, table: &str, columns: &[&str]) -> Result<()> {
        check_identifiers(&[table])?;
        check_identifiers(columns)?;

        let cols: Vec<String> = columns.iter().map(|c| format!("\"{c}\" INTEGER")).collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (id INTEGER PRIMARY KEY AUTOINCREMENT, {})",
            cols.join(", ")
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("create_table {table} failed"))?;
        Ok(())
    }

    async fn append_row(&self, table: &str, row: &[i64]) -> Result<()> {
        check_identifiers(&[table])?;

        let placeholders = vec!["?"; row.len()].join(", ");
        let mut columns = Vec::with_capacity(row.len());
        for i in 0..row.len() {
            columns.push(format!("\"{}\"", self.column_name(table, i).await?));
        }
        let sql = format!(
            "INSERT INTO \"{table}\" ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let mut query = sqlx::query(&sql);
        for v in row {
            query = query.bind(*v);
        }
        query
            .execute(&self.pool)
            .await
            .with_context(|| format!("append_row {table} failed"))?;
        Ok(())
    }

    async fn update_last_row(&self, table: &str, column: usize, value: i64) -> Result<()> {
        check_identifiers(&[table])?;

        let col = self.column_name(table, column).await?;
        let sql = format!(
            "UPDATE \"{table}\" SET \"{col}\" = ? WHERE id = (SELECT MAX(id) FROM \"{table}\")"
        );
        sqlx::query(&sql)
            .bind(value)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update_last_row {table} failed"))?;
        Ok(())
    }

    async fn rename_table(&self, old: &str, new: &str) -> Result<()> {
        check_identifiers(&[old, new])?;

        if old == new || !self.table_exists(old).await? {
            return Ok(());
        }
        let sql = format!("ALTER TABLE \"{old}\" RENAME TO \"{new}\"");
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("rename_table {old} -> {new} failed"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pump run log
// ---------------------------------------------------------------------------

fn now_unix() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Maps pump on/off/rename events onto an [`EventSink`].
#[derive(Clone)]
pub struct PumpLog {
    sink: Arc<dyn EventSink>,
}

impl PumpLog {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn pump_started(&self, pump_name: &str) {
        let table = table_name(pump_name);
        let now = now_unix();
        let res = async {
            self.sink.create_table(&table, RUN_COLUMNS).await?;
            self.sink.append_row(&table, &[now, now]).await
        }
        .await;
        if let Err(e) = res {
            warn!(pump = %pump_name, "eventlog: recording start failed: {e:#}");
        }
    }

    pub async fn pump_stopped(&self, pump_name: &str) {
        let table = table_name(pump_name);
        if let Err(e) = self.sink.update_last_row(&table, END_COLUMN, now_unix()).await {
            warn!(pump = %pump_name, "eventlog: recording stop failed: {e:#}");
        }
    }

    pub async fn pump_renamed(&self, old_name: &str, new_name: &str) {
        let (old, new) = (table_name(old_name), table_name(new_name));
        if let Err(e) = self.sink.rename_table(&old, &new).await {
            warn!(old = %old_name, new = %new_name, "eventlog: rename failed: {e:#}");
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
