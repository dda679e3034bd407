//!
//! ODBC binding surface for orin.
//!
//! Two handle registries:
//! - CONN_REGISTRY: maps i64 handle -> ConnectionHandle
//! - ROWS_REGISTRY: maps i64 handle -> materialized RowSet
//!
//! Ids start at 1 and only grow; 0 is the failure sentinel and is never
//! allocated. A closed connection stays in its registry (so `describe`
//! keeps answering) until the collector's finalize hook removes it.
//!
//! Error handling:
//! - Driver failures come back as a value pair: the zero sentinel is
//!   returned and the rendered diagnostic text is written to `err_out`.
//!   On success `err_out` is written null - absent, not an empty trace -
//!   so host-side `if err` checks work unchanged.
//! - Usage errors (null required argument, unknown connection handle)
//!   throw UsageError through the exception slots and never touch the
//!   driver.
//!

use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

use orin_std_core::{
    orin_exception_set_typed, orin_stack_capture, orin_string_new, OrinString,
    EXCEPTION_TYPE_USAGE_ERROR,
};

use crate::connection::{ConnectionHandle, RowSet, CLOSED_DESCRIPTION};
use crate::diagnostics::OdbcError;

struct ConnRegistry {
    connections: HashMap<i64, ConnectionHandle>,
    next_id: i64,
}

impl ConnRegistry {
    fn new() -> Self {
        Self {
            connections: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, conn: ConnectionHandle) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.connections.insert(id, conn);
        id
    }
}

struct RowsRegistry {
    results: HashMap<i64, RowSet>,
    next_id: i64,
}

impl RowsRegistry {
    fn new() -> Self {
        Self {
            results: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, rows: RowSet) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        self.results.insert(id, rows);
        id
    }
}

static CONN_REGISTRY: LazyLock<Mutex<ConnRegistry>> =
    LazyLock::new(|| Mutex::new(ConnRegistry::new()));

static ROWS_REGISTRY: LazyLock<Mutex<RowsRegistry>> =
    LazyLock::new(|| Mutex::new(RowsRegistry::new()));

fn string_from_orin(s: *const OrinString) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe {
        let slice = std::slice::from_raw_parts((*s).data.as_ptr(), (*s).len);
        String::from_utf8_lossy(slice).into_owned()
    }
}

fn string_to_orin(s: &str) -> *mut OrinString {
    unsafe { orin_string_new(s.as_ptr(), s.len()) }
}

/// Throw a UsageError carrying a message and a captured stack trace.
/// Payload layout: message pointer, stack pointer.
fn throw_usage_error(message: &str) {
    unsafe {
        let message_ptr = orin_string_new(message.as_ptr(), message.len());
        let layout = std::alloc::Layout::from_size_align(16, 8).unwrap();
        let ptr = std::alloc::alloc(layout);
        if ptr.is_null() {
            panic!("Failed to allocate UsageError");
        }
        *(ptr as *mut i64) = message_ptr as i64;
        let stack = orin_stack_capture();
        *(ptr.add(8) as *mut *mut u8) = stack;

        orin_exception_set_typed(ptr, EXCEPTION_TYPE_USAGE_ERROR);
    }
}

fn clear_error_slot(err_out: *mut *mut OrinString) {
    if !err_out.is_null() {
        unsafe { *err_out = std::ptr::null_mut() };
    }
}

fn write_error_slot(err_out: *mut *mut OrinString, error: &OdbcError) {
    if !err_out.is_null() {
        unsafe { *err_out = string_to_orin(&error.to_string()) };
    }
}

/// Open a connection through the driver manager. Returns a registry id
/// (>= 1), or 0 with the diagnostic text in `err_out`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_connect(
    conn_str: *const OrinString,
    err_out: *mut *mut OrinString,
) -> i64 {
    clear_error_slot(err_out);
    if conn_str.is_null() {
        throw_usage_error("usage: db.connect(connection_string)");
        return 0;
    }
    let connection_string = string_from_orin(conn_str);
    match ConnectionHandle::open(&connection_string) {
        Ok(handle) => {
            let mut reg = CONN_REGISTRY.lock().unwrap();
            reg.insert(handle)
        }
        Err(e) => {
            write_error_slot(err_out, &e);
            0
        }
    }
}

/// Execute a statement on an open connection. Returns a rows id (>= 1), or
/// 0 with the diagnostic text in `err_out`. A statement with no result set
/// succeeds with an empty rows value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_exec(
    handle: i64,
    sql: *const OrinString,
    err_out: *mut *mut OrinString,
) -> i64 {
    clear_error_slot(err_out);
    if sql.is_null() {
        throw_usage_error("usage: db.exec(statements)");
        return 0;
    }
    let sql_str = string_from_orin(sql);

    let mut reg = CONN_REGISTRY.lock().unwrap();
    let Some(conn) = reg.connections.get_mut(&handle) else {
        throw_usage_error("invalid database handle");
        return 0;
    };
    match conn.exec(&sql_str) {
        Ok(table) => {
            drop(reg);
            let mut rows_reg = ROWS_REGISTRY.lock().unwrap();
            rows_reg.insert(table)
        }
        Err(e) => {
            write_error_slot(err_out, &e);
            0
        }
    }
}

/// Close a connection in place: driver resources and the connection string
/// are released, the registry entry stays so `describe` keeps answering.
/// Unknown or already-closed handles are safe no-ops.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_close(handle: i64) {
    let mut reg = CONN_REGISTRY.lock().unwrap();
    if let Some(conn) = reg.connections.get_mut(&handle) {
        conn.close();
    }
}

/// Collector hook for handles that become unreachable without an explicit
/// close. Removes the entry; dropping it closes anything still open. Same
/// net effect as close, and never unwinds.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_finalize(handle: i64) {
    let mut reg = CONN_REGISTRY.lock().unwrap();
    reg.connections.remove(&handle);
}

/// Display form of a connection. Unknown and finalized handles get the
/// same fixed not-found text as a closed one.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_describe(handle: i64) -> *mut OrinString {
    let reg = CONN_REGISTRY.lock().unwrap();
    match reg.connections.get(&handle) {
        Some(conn) => string_to_orin(&conn.describe()),
        None => string_to_orin(CLOSED_DESCRIPTION),
    }
}

/// Number of rows in a materialized result.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_rows_row_count(rows: i64) -> i64 {
    let reg = ROWS_REGISTRY.lock().unwrap();
    match reg.results.get(&rows) {
        Some(table) => table.rows.len() as i64,
        None => 0,
    }
}

/// Number of columns in a materialized result.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_rows_column_count(rows: i64) -> i64 {
    let reg = ROWS_REGISTRY.lock().unwrap();
    match reg.results.get(&rows) {
        Some(table) => table.columns.len() as i64,
        None => 0,
    }
}

/// Base name of column `col` (1-based). Empty string when out of range.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_rows_column_name(rows: i64, col: i64) -> *mut OrinString {
    let reg = ROWS_REGISTRY.lock().unwrap();
    let name = reg
        .results
        .get(&rows)
        .and_then(|table| {
            if col < 1 {
                return None;
            }
            table.columns.get((col - 1) as usize)
        })
        .map(String::as_str)
        .unwrap_or("");
    string_to_orin(name)
}

/// Text of the cell at `row` (1-based) and column `col_name`. SQL null was
/// already rendered as the literal "NULL" at materialization. Empty string
/// for unknown rows, out-of-range indices and unknown column names.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_rows_cell(
    rows: i64,
    row: i64,
    col_name: *const OrinString,
) -> *mut OrinString {
    let name = string_from_orin(col_name);
    let reg = ROWS_REGISTRY.lock().unwrap();
    let value = reg
        .results
        .get(&rows)
        .and_then(|table| {
            if row < 1 {
                return None;
            }
            table.rows.get((row - 1) as usize)
        })
        .and_then(|r| r.get(&name))
        .map(String::as_str)
        .unwrap_or("");
    string_to_orin(value)
}

/// Release a materialized result. Idempotent.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn orin_db_odbc_rows_free(rows: i64) {
    let mut reg = ROWS_REGISTRY.lock().unwrap();
    reg.results.remove(&rows);
}

/// One native function as the module loader sees it. `arity` is the
/// script-visible argument count, receiver included; the error out-slot on
/// connect/exec is injected by the loader and not counted. Call sites with
/// any other argument count are rejected by the loader as usage errors
/// before dispatch.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
}

/// The module's registration table.
pub const MODULE_FUNCTIONS: &[NativeFunction] = &[
    NativeFunction { name: "orin_db_odbc_connect", arity: 1 },
    NativeFunction { name: "orin_db_odbc_exec", arity: 2 },
    NativeFunction { name: "orin_db_odbc_close", arity: 1 },
    NativeFunction { name: "orin_db_odbc_finalize", arity: 1 },
    NativeFunction { name: "orin_db_odbc_describe", arity: 1 },
    NativeFunction { name: "orin_db_odbc_rows_row_count", arity: 1 },
    NativeFunction { name: "orin_db_odbc_rows_column_count", arity: 1 },
    NativeFunction { name: "orin_db_odbc_rows_column_name", arity: 2 },
    NativeFunction { name: "orin_db_odbc_rows_cell", arity: 3 },
    NativeFunction { name: "orin_db_odbc_rows_free", arity: 1 },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Row;
    use orin_std_core::{
        orin_exception_check, orin_exception_clear, orin_exception_get_type_id,
        orin_string_decref,
    };

    fn take_string(ptr: *mut OrinString) -> String {
        assert!(!ptr.is_null());
        let text = unsafe { (*ptr).as_str().to_owned() };
        unsafe { orin_string_decref(ptr) };
        text
    }

    fn sample_rows() -> RowSet {
        let mut first = Row::new();
        first.insert("X".to_owned(), "1".to_owned());
        first.insert("Y".to_owned(), "NULL".to_owned());
        let mut second = Row::new();
        second.insert("X".to_owned(), "2".to_owned());
        second.insert("Y".to_owned(), "two".to_owned());
        RowSet {
            columns: vec!["X".to_owned(), "Y".to_owned()],
            rows: vec![first, second],
        }
    }

    #[test]
    fn test_rows_accessors() {
        let id = ROWS_REGISTRY.lock().unwrap().insert(sample_rows());
        unsafe {
            assert_eq!(orin_db_odbc_rows_row_count(id), 2);
            assert_eq!(orin_db_odbc_rows_column_count(id), 2);
            assert_eq!(take_string(orin_db_odbc_rows_column_name(id, 1)), "X");
            assert_eq!(take_string(orin_db_odbc_rows_column_name(id, 2)), "Y");
            assert_eq!(take_string(orin_db_odbc_rows_column_name(id, 3)), "");
            assert_eq!(take_string(orin_db_odbc_rows_column_name(id, 0)), "");

            let x = string_to_orin("X");
            let y = string_to_orin("Y");
            assert_eq!(take_string(orin_db_odbc_rows_cell(id, 1, x)), "1");
            assert_eq!(take_string(orin_db_odbc_rows_cell(id, 1, y)), "NULL");
            assert_eq!(take_string(orin_db_odbc_rows_cell(id, 2, x)), "2");
            assert_eq!(take_string(orin_db_odbc_rows_cell(id, 3, x)), "");
            assert_eq!(take_string(orin_db_odbc_rows_cell(id, 0, x)), "");
            orin_string_decref(x);
            orin_string_decref(y);

            orin_db_odbc_rows_free(id);
            assert_eq!(orin_db_odbc_rows_row_count(id), 0);
            orin_db_odbc_rows_free(id); // second free is a no-op
        }
    }

    #[test]
    fn test_rows_ids_are_positive_and_increasing() {
        let first = ROWS_REGISTRY.lock().unwrap().insert(RowSet::default());
        let second = ROWS_REGISTRY.lock().unwrap().insert(RowSet::default());
        assert!(first >= 1);
        assert!(second > first);
        unsafe {
            orin_db_odbc_rows_free(first);
            orin_db_odbc_rows_free(second);
        }
    }

    #[test]
    fn test_connect_null_argument_throws_usage_error() {
        let mut err: *mut OrinString = std::ptr::null_mut();
        let handle = unsafe { orin_db_odbc_connect(std::ptr::null(), &mut err) };
        assert_eq!(handle, 0);
        assert!(err.is_null()); // raised, not returned
        assert_eq!(orin_exception_check(), 1);
        assert_eq!(orin_exception_get_type_id(), EXCEPTION_TYPE_USAGE_ERROR);
        orin_exception_clear();
    }

    #[test]
    fn test_exec_null_sql_throws_usage_error() {
        let mut err: *mut OrinString = std::ptr::null_mut();
        let rows = unsafe { orin_db_odbc_exec(1, std::ptr::null(), &mut err) };
        assert_eq!(rows, 0);
        assert!(err.is_null());
        assert_eq!(orin_exception_get_type_id(), EXCEPTION_TYPE_USAGE_ERROR);
        orin_exception_clear();
    }

    #[test]
    fn test_exec_unknown_handle_throws_usage_error() {
        let mut err: *mut OrinString = std::ptr::null_mut();
        let sql = string_to_orin("SELECT 1");
        let rows = unsafe { orin_db_odbc_exec(-7, sql, &mut err) };
        assert_eq!(rows, 0);
        assert!(err.is_null());
        assert_eq!(orin_exception_check(), 1);
        assert_eq!(orin_exception_get_type_id(), EXCEPTION_TYPE_USAGE_ERROR);
        orin_exception_clear();
        unsafe { orin_string_decref(sql) };
    }

    #[test]
    fn test_close_and_finalize_unknown_handles_are_noops() {
        unsafe {
            orin_db_odbc_close(-1);
            orin_db_odbc_finalize(-1);
        }
        assert_eq!(orin_exception_check(), 0);
    }

    #[test]
    fn test_describe_unknown_handle_is_not_found() {
        let text = take_string(unsafe { orin_db_odbc_describe(-1) });
        assert_eq!(text, CLOSED_DESCRIPTION);
    }

    #[test]
    fn test_registration_table() {
        let arity_of = |name: &str| {
            MODULE_FUNCTIONS
                .iter()
                .find(|f| f.name == name)
                .map(|f| f.arity)
        };
        assert_eq!(arity_of("orin_db_odbc_connect"), Some(1));
        assert_eq!(arity_of("orin_db_odbc_exec"), Some(2));
        assert_eq!(arity_of("orin_db_odbc_close"), Some(1));
        assert_eq!(arity_of("orin_db_odbc_rows_cell"), Some(3));

        for f in MODULE_FUNCTIONS {
            assert!(f.name.starts_with("orin_db_odbc_"));
            assert!(f.arity >= 1);
        }
        let mut names: Vec<&str> = MODULE_FUNCTIONS.iter().map(|f| f.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MODULE_FUNCTIONS.len());
    }
}
