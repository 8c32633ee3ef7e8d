//! SQLite implementations of storage interfaces.
//!
//! Every write runs inside `BEGIN IMMEDIATE`, which takes the database write
//! lock up front. Concurrent writers queue on SQLite's busy handler; one that
//! waits longer than `busy_timeout_ms` fails with `SQLITE_BUSY` and surfaces
//! as [`StorageError::Contention`].

mod genealogy_store;
mod ledger_store;

pub use genealogy_store::SqliteGenealogyStore;
pub use ledger_store::SqliteLedgerStore;

use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use crate::config::SqliteConfig;
use crate::model::Side;
use crate::storage::{Result, StorageError};

use super::schema::{
    CREATE_GENEALOGY_TABLES, CREATE_PAIRING_TABLES, CREATE_PURCHASE_TABLES, CREATE_SETTINGS_TABLE,
};

/// SQLITE_BUSY and SQLITE_LOCKED primary result codes.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Open a connection pool on the configured database file.
pub async fn connect(config: &SqliteConfig) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(&config.path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.max(1))
        .connect_with(options)
        .await?;

    debug!(path = %config.path, "SQLite pool opened");
    Ok(pool)
}

/// Create all tables and indexes if they do not exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    for ddl in [
        CREATE_GENEALOGY_TABLES,
        CREATE_PAIRING_TABLES,
        CREATE_PURCHASE_TABLES,
        CREATE_SETTINGS_TABLE,
    ] {
        sqlx::raw_sql(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Whether an error means the write lock could not be obtained in time.
pub fn is_lock_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let busy = db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED));
            busy || db.message().contains("database is locked")
        }
        _ => false,
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// A connection holding the write lock from `BEGIN IMMEDIATE`.
///
/// Dropped before [`finish`] runs (a cancelled future), the connection is
/// closed instead of returned to the pool, which releases the lock.
pub(crate) struct ImmediateTx {
    conn: PoolConnection<Sqlite>,
    open: bool,
}

impl Deref for ImmediateTx {
    type Target = SqliteConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for ImmediateTx {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}

impl Drop for ImmediateTx {
    fn drop(&mut self) {
        if self.open {
            self.conn.close_on_drop();
        }
    }
}

pub(crate) async fn begin_immediate(pool: &SqlitePool) -> Result<ImmediateTx> {
    let conn = pool.acquire().await?;
    let mut tx = ImmediateTx { conn, open: true };
    match sqlx::query("BEGIN IMMEDIATE").execute(&mut *tx.conn).await {
        Ok(_) => Ok(tx),
        Err(e) => {
            // no transaction was opened
            tx.open = false;
            Err(e.into())
        }
    }
}

/// Commit on success, roll back on failure.
///
/// A failed COMMIT is rolled back too. If the rollback fails as well the
/// connection is closed rather than pooled.
pub(crate) async fn finish<T>(mut tx: ImmediateTx, result: Result<T>) -> Result<T> {
    let result = match result {
        Ok(value) => match sqlx::query("COMMIT").execute(&mut *tx.conn).await {
            Ok(_) => {
                tx.open = false;
                return Ok(value);
            }
            Err(e) => Err(e.into()),
        },
        Err(e) => Err(e),
    };

    if sqlx::query("ROLLBACK").execute(&mut *tx.conn).await.is_ok() {
        tx.open = false;
    }
    result
}

// Stored values are TEXT so decimals keep their exact scale and timestamps
// sort lexically.

pub(crate) fn encode_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(table: &'static str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StorageError::corrupt(table, format!("timestamp {raw:?}: {e}")))
}

pub(crate) fn decode_decimal(table: &'static str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| StorageError::corrupt(table, format!("amount {raw:?}: {e}")))
}

pub(crate) fn decode_side(table: &'static str, raw: &str) -> Result<Side> {
    raw.parse().map_err(|e| StorageError::corrupt(table, format!("{e}")))
}

pub(crate) fn decode_level(table: &'static str, raw: i64) -> Result<u32> {
    u32::try_from(raw).map_err(|_| StorageError::corrupt(table, format!("level {raw}")))
}
