use super::compiler::{format_ident, Compiler, Statement};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::sql::planner::{Delete, GroupingMode, Query, Update};
use crate::sql::schema::Table;
use crate::sql::shaper::{Casing, Record, Shaper};
use crate::sql::types::{Row, Value};
use crate::sql::validator;

use crossbeam::channel::{self, RecvTimeoutError};
use log::{debug, info, warn};
use rusqlite::{params_from_iter, Connection, InterruptHandle};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// An embedded SQLite store. Holds a single connection behind a mutex, so
/// statements are serialized, and a write's validation and execution happen
/// under the same lock.
pub struct Store {
    conn: Mutex<Connection>,
    interrupt: Arc<InterruptHandle>,
    shaper: Shaper,
    grouping: GroupingMode,
    validate: bool,
    timeout: Option<Duration>,
}

impl Store {
    /// Opens a database file, creating it if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening store {}", path.display());
        Self::new(Connection::open(path)?)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    /// Opens the configured database and applies the configured conventions.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = match config.database.as_str() {
            ":memory:" => Self::open_in_memory()?,
            path => Self::open(path)?,
        };
        store.conn.lock()?.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        Ok(store
            .with_casing(config.casing)
            .with_grouping(config.grouping)
            .with_validation(config.validate_before_write)
            .with_timeout((config.query_timeout_ms > 0).then(|| {
                Duration::from_millis(config.query_timeout_ms)
            })))
    }

    fn new(conn: Connection) -> Result<Self> {
        Ok(Self {
            interrupt: Arc::new(conn.get_interrupt_handle()),
            conn: Mutex::new(conn),
            shaper: Shaper::default(),
            grouping: GroupingMode::default(),
            validate: true,
            timeout: None,
        })
    }

    /// Sets the naming convention for declared result names.
    pub fn with_casing(mut self, casing: Casing) -> Self {
        self.shaper = Shaper::new(casing);
        self
    }

    /// Sets the grouping mode for plans that don't set their own.
    pub fn with_grouping(mut self, grouping: GroupingMode) -> Self {
        self.grouping = grouping;
        self
    }

    /// Enables or disables validation of rows before writes. The store
    /// enforces its constraints either way.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Sets a deadline for every query run with execute().
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns a handle that interrupts the running statement, if any. The
    /// interrupted call fails with Error::Cancelled.
    pub fn interrupt_handle(&self) -> Arc<InterruptHandle> {
        self.interrupt.clone()
    }

    /// Compiles a plan with the store's grouping mode.
    pub fn compile(&self, query: &Query) -> Result<Statement> {
        Compiler::new().compile(query, self.grouping)
    }

    /// Executes a plan, returning its records. Uses the configured deadline,
    /// if any.
    pub fn execute(&self, query: &Query) -> Result<Vec<Record>> {
        self.run(query, self.timeout)
    }

    /// Executes a plan, returning its first record if any.
    pub fn execute_one(&self, query: &Query) -> Result<Option<Record>> {
        Ok(self.execute(query)?.into_iter().next())
    }

    /// Executes a plan with a deadline. A watchdog thread interrupts the
    /// statement if it runs past the deadline, failing with Error::Timeout.
    /// The deadline starts once the connection is free, so time spent
    /// waiting on other callers doesn't count.
    pub fn execute_timeout(&self, query: &Query, timeout: Duration) -> Result<Vec<Record>> {
        self.run(query, Some(timeout))
    }

    fn run(&self, query: &Query, timeout: Option<Duration>) -> Result<Vec<Record>> {
        let statement = self.compile(query)?;
        let conn = self.conn.lock()?;
        let rows = match timeout {
            Some(timeout) => {
                self.deadline(timeout, || query_rows(&conn, &statement.sql, &statement.params))?
            }
            None => query_rows(&conn, &statement.sql, &statement.params)?,
        };
        drop(conn);
        self.shaper.shape(&statement.columns, rows)
    }

    /// Runs f, interrupting it when the timeout elapses. The caller must
    /// hold the connection lock, so only its own statement is interrupted.
    fn deadline<T>(&self, timeout: Duration, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let fired = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let interrupt = self.interrupt.clone();
            let fired = fired.clone();
            std::thread::spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = done_rx.recv_timeout(timeout) {
                    fired.store(true, Ordering::SeqCst);
                    interrupt.interrupt();
                }
            })
        };
        let result = f();
        drop(done_tx);
        if watchdog.join().is_err() {
            warn!("Query watchdog panicked");
        }
        match result {
            Err(Error::Cancelled) if fired.load(Ordering::SeqCst) => {
                warn!("Query exceeded deadline of {timeout:?}");
                Err(Error::Timeout)
            }
            result => result,
        }
    }

    /// Runs a SQL query with parameters, returning raw rows.
    pub fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
        let conn = self.conn.lock()?;
        query_rows(&conn, sql, params)
    }

    /// Inserts a row, returning its row id. Absent columns are omitted, so
    /// the store applies defaults and assigns the id.
    pub fn insert(&self, table: &Table, row: Row) -> Result<i64> {
        let statement = Compiler::new().insert(table, &row)?;
        let conn = self.conn.lock()?;
        if self.validate {
            validator::validate(table, &row)?;
        }
        debug!("Executing {} {:?}", statement.sql, statement.params);
        conn.execute(&statement.sql, params_from_iter(&statement.params))?;
        Ok(conn.last_insert_rowid())
    }

    /// Updates matching rows, returning the number of rows changed.
    pub fn update(&self, update: &Update) -> Result<usize> {
        let statement = Compiler::new().update(update)?;
        let conn = self.conn.lock()?;
        if self.validate {
            validator::validate_update(&update.table, &update.set)?;
        }
        debug!("Executing {} {:?}", statement.sql, statement.params);
        Ok(conn.execute(&statement.sql, params_from_iter(&statement.params))?)
    }

    /// Deletes matching rows, returning the number of rows deleted.
    pub fn delete(&self, delete: &Delete) -> Result<usize> {
        let statement = Compiler::new().delete(delete)?;
        debug!("Executing {} {:?}", statement.sql, statement.params);
        Ok(self.conn.lock()?.execute(&statement.sql, params_from_iter(&statement.params))?)
    }

    /// Creates a table from its schema.
    pub fn create_table(&self, table: &Table) -> Result<()> {
        let sql = table.as_sql();
        debug!("Executing {sql}");
        self.conn.lock()?.execute(&sql, [])?;
        info!("Created table {}", table.name);
        Ok(())
    }

    /// Drops a table. Errors if it doesn't exist, unless if_exists is set.
    pub fn drop_table(&self, name: &str, if_exists: bool) -> Result<()> {
        let if_exists = if if_exists { " IF EXISTS" } else { "" };
        self.conn.lock()?.execute(&format!("DROP TABLE{if_exists} {}", format_ident(name)), [])?;
        info!("Dropped table {name}");
        Ok(())
    }

    /// Drops every user table.
    pub fn drop_all_tables(&self) -> Result<()> {
        for name in self.table_names()? {
            self.drop_table(&name, true)?;
        }
        Ok(())
    }

    /// Runs a batch of semicolon-separated statements, e.g. fixtures.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        Ok(self.conn.lock()?.execute_batch(sql)?)
    }

    /// Lists user tables, ordered by name.
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.query_rows(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
            &[],
        )?
        .into_iter()
        .map(|row| match row.into_iter().next() {
            Some(Value::Text(name)) => Ok(name),
            value => Err(Error::Execution(format!("unexpected table name {value:?}"))),
        })
        .collect()
    }
}

fn query_rows(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Vec<Value>>> {
    let start = Instant::now();
    let mut statement = conn.prepare(sql)?;
    let width = statement.column_count();
    let mut rows = statement.query(params_from_iter(params))?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let values =
            (0..width).map(|i| Value::from_sql(row.get_ref(i)?)).collect::<Result<Vec<_>>>()?;
        result.push(values);
    }
    debug!("Queried {} rows in {:?}: {sql} {params:?}", result.len(), start.elapsed());
    Ok(result)
}
