//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `participants.rs` - Participants, accounts, limits and proxies
//! - `transfers.rs` - Plain transfers, fulfilments and error logs
//! - `fx_transfers.rs` - FX legs, fulfilments and error logs
//! - `watch_list.rs` - FX watch list
//! - `positions.rs` - Positions and the position change log
//! - `duplicates.rs` - Request hash storage per duplicate namespace
//!
//! Statements that must run inside a ledger transaction are free functions
//! in `ledger_tx.rs` taking a connection.

mod duplicates;
mod fx_transfers;
mod participants;
mod positions;
pub(crate) mod ledger_tx;
mod transfers;
mod watch_list;

pub use duplicates::NamespacedDuplicates;

use crate::domain::{Decimal, TransferState};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Round-trip a trivial query; used by the readiness probe.
    ///
    /// # Errors
    /// Returns an error if the database is unreachable.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn decode_error(
    column: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(source),
    }
}

/// Read a canonical decimal string column. Corrupt amounts are an error, never zero.
pub(crate) fn decimal_column(row: &SqliteRow, column: &str) -> Result<Decimal, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw).map_err(|e| decode_error(column, e))
}

pub(crate) fn datetime_column(
    row: &SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| decode_error(column, e))
    })
    .transpose()
}

pub(crate) fn state_column(row: &SqliteRow, column: &str) -> Result<TransferState, sqlx::Error> {
    let raw: String = row.try_get(column)?;
    TransferState::from_str(&raw).map_err(|e| decode_error(column, e))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}
