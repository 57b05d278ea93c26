//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Components reach storage through the ports in `port.rs`; every port is
//! implemented on `StoreTx`, a borrowed view of either a live transaction
//! (`ReserveStore::atomically`) or the autocommit connection
//! (`ReserveStore::session`).

use crate::{
    disposition::Disposition,
    error::{ReserveError, ReserveResult},
    reserve::{CalculationMethod, EntryType},
    scoring::Severity,
};
use rusqlite::{
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, ToSql, TransactionBehavior,
};
use std::time::Duration;

mod program;
mod register;
mod reserve;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ReserveStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ReserveStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &str) -> ReserveResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> ReserveResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open a second connection to the same database.
    /// For in-memory databases this is a fresh, isolated database.
    pub fn reopen(&self) -> ReserveResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReserveResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_register.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_management_reserve.sql"))?;
        Ok(())
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// IMMEDIATE takes SQLite's write lock up front, so two writers against
    /// the same reserve are serialized rather than both reading the same
    /// remaining amount. Commits on `Ok`, rolls back on `Err`.
    pub fn atomically<T>(
        &mut self,
        f: impl FnOnce(&StoreTx<'_>) -> ReserveResult<T>,
    ) -> ReserveResult<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&StoreTx { conn: &tx });
        match result {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    log::error!("rollback failed after '{e}': {rollback}");
                }
                Err(e)
            }
        }
    }

    /// Autocommit view for reads and single-statement writes.
    pub fn session(&self) -> StoreTx<'_> {
        StoreTx { conn: &self.conn }
    }
}

/// Borrowed connection the ports run against.
pub struct StoreTx<'c> {
    conn: &'c Connection,
}

// ── Column codecs ──────────────────────────────────────────────

fn text_column<T>(value: ValueRef<'_>) -> FromSqlResult<T>
where
    T: std::str::FromStr<Err = ReserveError>,
{
    value
        .as_str()?
        .parse()
        .map_err(|e: ReserveError| FromSqlError::Other(Box::new(e)))
}

macro_rules! text_enum_sql {
    ($($ty:ty),* $(,)?) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                text_column(value)
            }
        }
    )*};
}

text_enum_sql!(Disposition, Severity, CalculationMethod, EntryType);
