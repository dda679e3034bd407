//!
//! Connection State Machine
//!
//! One `ConnectionHandle` owns the driver resources for one open
//! connection: the environment, the connection, and at most one statement
//! (the most recent `exec`). States run Unopened -> Open -> Closed with no
//! way back; a fresh handle must be opened instead.
//!
//! Result sets are materialized eagerly: every column value is coerced to
//! text, SQL null becomes the literal "NULL", and rows keep the driver's
//! fetch order.
//!

use indexmap::IndexMap;
use log::{debug, warn};

use crate::diagnostics::OdbcError;
use crate::handles::{Connection, Environment, Statement};

/// Literal text standing in for SQL null in materialized cells.
const NULL_TEXT: &str = "NULL";

/// Display form of a handle whose connection string is gone (post-close).
pub const CLOSED_DESCRIPTION: &str = "odbc connection (connection string not found)";

/// One materialized row: column name to text value, in column order.
pub type Row = IndexMap<String, String>;

/// A fully materialized result set. Transient: returned to the caller,
/// never retained by the connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowSet {
    /// Column base names in driver order.
    pub columns: Vec<String>,
    /// Rows in fetch order; row N is the N-th successful fetch.
    pub rows: Vec<Row>,
}

/// Anything the materialize loop can pull a result set out of. Implemented
/// by `Statement`; tests script their own source.
pub(crate) trait ResultSource {
    /// Base name of column `col` (1-based).
    fn column_name(&mut self, col: u16) -> Result<String, OdbcError>;
    /// Advance to the next row; false once the source is exhausted.
    fn fetch(&mut self) -> Result<bool, OdbcError>;
    /// Text of column `col` in the current row; `None` marks SQL null.
    fn text_value(&mut self, col: u16) -> Result<Option<String>, OdbcError>;
}

impl ResultSource for Statement {
    fn column_name(&mut self, col: u16) -> Result<String, OdbcError> {
        self.col_base_name(col)
    }

    fn fetch(&mut self) -> Result<bool, OdbcError> {
        Statement::fetch(self)
    }

    fn text_value(&mut self, col: u16) -> Result<Option<String>, OdbcError> {
        Statement::text_value(self, col)
    }
}

/// Walk the result set row by row, column by column. Column names are read
/// once, up front. Zero columns means no result set: the fetch loop is
/// skipped and the table is empty. Any source failure aborts the whole
/// materialization; no partial table escapes.
pub(crate) fn materialize(
    source: &mut dyn ResultSource,
    columns: u16,
) -> Result<RowSet, OdbcError> {
    let mut names = Vec::with_capacity(columns as usize);
    for col in 1..=columns {
        names.push(source.column_name(col)?);
    }

    let mut rows = Vec::new();
    if columns == 0 {
        return Ok(RowSet {
            columns: names,
            rows,
        });
    }

    while source.fetch()? {
        let mut row = Row::with_capacity(columns as usize);
        for col in 1..=columns {
            let value = source
                .text_value(col)?
                .unwrap_or_else(|| NULL_TEXT.to_owned());
            row.insert(names[(col - 1) as usize].clone(), value);
        }
        rows.push(row);
    }

    Ok(RowSet {
        columns: names,
        rows,
    })
}

/// Owns the driver resources for one connection.
///
/// Field order is drop order: the statement goes before the connection,
/// the connection before its environment.
#[derive(Debug)]
pub struct ConnectionHandle {
    stmt: Option<Statement>,
    dbc: Option<Connection>,
    env: Option<Environment>,
    connection_string: Option<String>,
    last_query: Option<String>,
}

impl ConnectionHandle {
    /// Acquire an environment, require ODBC 3 semantics, allocate a
    /// connection and connect with the given connection string (no prompt
    /// fallback). Each step gates the next; on failure everything partially
    /// acquired is released and the failing step's diagnostics are
    /// returned. The original, unexpanded connection string is retained.
    pub fn open(connection_string: &str) -> Result<Self, OdbcError> {
        let env = Environment::new()?;
        env.declare_odbc3()?;
        let mut dbc = Connection::new(&env)?;
        dbc.driver_connect(connection_string)?;
        debug!("connected ({connection_string})");
        Ok(Self {
            stmt: None,
            dbc: Some(dbc),
            env: Some(env),
            connection_string: Some(connection_string.to_owned()),
            last_query: None,
        })
    }

    /// Execute `sql` and materialize its result set. The previous statement
    /// resource, if any, is released before the replacement is allocated.
    pub fn exec(&mut self, sql: &str) -> Result<RowSet, OdbcError> {
        let Some(dbc) = &self.dbc else {
            return Err(OdbcError::Closed);
        };
        self.last_query = Some(sql.to_owned());
        debug!("executing: {sql}");

        self.stmt = None;
        let mut stmt = Statement::new(dbc)?;
        stmt.exec_direct(sql)?;
        let columns = stmt.num_result_cols()?;
        let table = materialize(&mut stmt, columns.max(0) as u16)?;
        self.stmt = Some(stmt);
        Ok(table)
    }

    /// Disconnect and release every owned resource: the connection string,
    /// then the connection, the environment, and the statement. A failed
    /// disconnect is logged and teardown continues. Safe to call any number
    /// of times; each release is a no-op the second time.
    pub fn close(&mut self) {
        if let Some(dbc) = &mut self.dbc {
            if let Err(err) = dbc.disconnect() {
                warn!("disconnect reported an error during close: {err}");
            }
        }
        self.connection_string = None;
        self.dbc = None;
        self.env = None;
        self.stmt = None;
    }

    pub fn is_open(&self) -> bool {
        self.dbc.is_some()
    }

    /// The connection string the handle was opened with; gone after close.
    pub fn connection_string(&self) -> Option<&str> {
        self.connection_string.as_deref()
    }

    /// The most recently executed statement text.
    pub fn last_query(&self) -> Option<&str> {
        self.last_query.as_deref()
    }

    /// Display form: the retained connection string, or a fixed not-found
    /// text once it has been released.
    pub fn describe(&self) -> String {
        match &self.connection_string {
            Some(cs) => format!("odbc connection ({cs})"),
            None => CLOSED_DESCRIPTION.to_owned(),
        }
    }
}

impl Drop for ConnectionHandle {
    /// Last-resort safety net for handles never explicitly closed.
    fn drop(&mut self) {
        self.close();
    }
}
