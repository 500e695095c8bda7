//! Single-connection SQL gateway with a prepared-statement cache and
//! explicit transaction tracking.

use std::path::Path;

use rusqlite::{CachedStatement, Connection};
use tracing::{debug, warn};

use crate::errors::{JournalError, Result};

const STATEMENT_CACHE_CAPACITY: usize = 32;

/// At most one write transaction is open at a time; a nested begin is a
/// caller bug and fails loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxnState {
    Idle,
    Open,
}

pub struct SqlGateway {
    conn: Connection,
    txn: TxnState,
}

impl SqlGateway {
    /// Open (creating if missing) the database file and apply the
    /// connection-time pragmas.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::setup(conn)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::setup(conn)
    }

    fn setup(conn: Connection) -> Result<Self> {
        let mode: String = conn.query_row("PRAGMA journal_mode=WAL;", [], |row| row.get(0))?;
        debug!("sqlite journal_mode={}", mode);
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;\
             PRAGMA case_sensitive_like = ON;",
        )?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        Ok(Self {
            conn,
            txn: TxnState::Idle,
        })
    }

    pub fn prepare(&self, sql: &str) -> rusqlite::Result<CachedStatement<'_>> {
        self.conn.prepare_cached(sql)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.txn == TxnState::Open {
            warn!("transaction already running, refusing to start another one");
            return Err(JournalError::TransactionAlreadyOpen);
        }
        self.conn.execute_batch("BEGIN;")?;
        self.txn = TxnState::Open;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        if self.txn == TxnState::Idle {
            debug!("no transaction to commit");
            return Ok(());
        }
        self.conn.execute_batch("COMMIT;")?;
        self.txn = TxnState::Idle;
        Ok(())
    }

    /// Commit the running transaction (if any) and optionally start a new
    /// one right away.
    pub fn commit_internal(&mut self, context: &str, start_new: bool) -> Result<()> {
        debug!(context, start_new, "transaction commit");
        self.commit()?;
        if start_new {
            self.begin()?;
        }
        Ok(())
    }

    pub fn transaction_open(&self) -> bool {
        self.txn == TxnState::Open
    }

    /// Incorporate the write-ahead log back into the main database file.
    pub fn wal_checkpoint(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("PRAGMA wal_checkpoint(FULL);")?;
        let mut rows = stmt.query([])?;
        let _ = rows.next()?;
        Ok(())
    }

    /// Column names of a table, for the idempotent migrations.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info('{}');", table))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(columns)
    }
}
