//!
//! Driver Resource Layer
//!
//! RAII wrappers over the driver manager's opaque environment, connection
//! and statement handles. Each wrapper is the single owner of its handle:
//! dropping it frees the handle, so release-on-all-paths is structural.
//! The narrow (ANSI) entry points are used throughout.
//!

use log::{debug, warn};
use odbc_sys::{
    AttrOdbcVersion, CDataType, Desc, DriverConnectOption, EnvironmentAttribute, Handle,
    HandleType, Pointer, SqlReturn, SQLAllocHandle, SQLColAttribute, SQLDisconnect,
    SQLDriverConnect, SQLExecDirect, SQLFetch, SQLFreeHandle, SQLGetData, SQLNumResultCols,
    SQLSetEnvAttr, NULL_DATA,
};

use crate::diagnostics::OdbcError;

/// Provides access to the raw underlying driver handle.
///
/// # Safety
///
/// The handle provided by `as_handle` must be valid and match the type
/// returned by `handle_type`.
pub unsafe trait AsHandle {
    /// The raw handle used to talk to the driver manager. Must be valid.
    fn as_handle(&self) -> Handle;

    /// The type of the handle returned by `as_handle`. A method rather than
    /// a constant so the trait stays object safe; diagnostics collection
    /// works over any handle kind through `&dyn AsHandle`.
    fn handle_type(&self) -> HandleType;
}

pub(crate) fn succeeded(ret: SqlReturn) -> bool {
    matches!(ret, SqlReturn::SUCCESS | SqlReturn::SUCCESS_WITH_INFO)
}

/// Free a handle. A failed free is logged and otherwise ignored: teardown
/// must run to completion, and there is nobody left to report to.
unsafe fn drop_handle(handle: Handle, handle_type: HandleType) {
    match unsafe { SQLFreeHandle(handle_type, handle) } {
        SqlReturn::SUCCESS => {
            debug!("SQLFreeHandle dropped {handle:?} of type {handle_type:?}.");
        }
        other => {
            warn!(
                "SQLFreeHandle returned {} freeing {handle:?} of type {handle_type:?}.",
                other.0
            );
        }
    }
}

/// The driver manager's top-level context. Required before any connection
/// can be allocated.
#[derive(Debug)]
pub struct Environment {
    handle: Handle,
}

impl Environment {
    pub fn new() -> Result<Self, OdbcError> {
        let mut handle: Handle = std::ptr::null_mut();
        let ret = unsafe { SQLAllocHandle(HandleType::Env, std::ptr::null_mut(), &mut handle) };
        if succeeded(ret) {
            Ok(Self { handle })
        } else {
            // No valid handle exists yet, so there is no diagnostic chain
            // to drain for this failure.
            Err(OdbcError::driver_without_diagnostics("SQLAllocHandle"))
        }
    }

    /// Require protocol version 3 semantics before connecting.
    pub fn declare_odbc3(&self) -> Result<(), OdbcError> {
        let ret = unsafe {
            SQLSetEnvAttr(
                self.handle as odbc_sys::HEnv,
                EnvironmentAttribute::OdbcVersion,
                AttrOdbcVersion::Odbc3.into(),
                0,
            )
        };
        if succeeded(ret) {
            Ok(())
        } else {
            Err(OdbcError::driver("SQLSetEnvAttr", self))
        }
    }
}

// Driver handles may be moved between threads; the registry mutex
// serializes every use of a handle.
unsafe impl Send for Environment {}
unsafe impl Send for Connection {}
unsafe impl Send for Statement {}

unsafe impl AsHandle for Environment {
    fn as_handle(&self) -> Handle {
        self.handle
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Env
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        unsafe { drop_handle(self.handle, HandleType::Env) }
    }
}

/// One live (or not yet connected) connection handle, scoped to an
/// environment. The caller keeps the environment alive for as long as the
/// connection exists.
#[derive(Debug)]
pub struct Connection {
    handle: Handle,
    connected: bool,
}

impl Connection {
    pub fn new(env: &Environment) -> Result<Self, OdbcError> {
        let mut handle: Handle = std::ptr::null_mut();
        let ret = unsafe { SQLAllocHandle(HandleType::Dbc, env.as_handle(), &mut handle) };
        if succeeded(ret) {
            Ok(Self {
                handle,
                connected: false,
            })
        } else {
            Err(OdbcError::driver("SQLAllocHandle", env))
        }
    }

    /// Establish the connection, letting the driver rewrite/complete the
    /// connection string with no interactive prompt fallback. The completed
    /// form goes into a scratch buffer and is discarded.
    pub fn driver_connect(&mut self, connection_string: &str) -> Result<(), OdbcError> {
        let mut completed = [0u8; 1024];
        let mut completed_len: i16 = 0;
        let ret = unsafe {
            SQLDriverConnect(
                self.handle as odbc_sys::HDbc,
                std::ptr::null_mut(),
                connection_string.as_ptr(),
                connection_string.len() as i16,
                completed.as_mut_ptr(),
                completed.len() as i16,
                &mut completed_len,
                DriverConnectOption::NoPrompt,
            )
        };
        if succeeded(ret) {
            self.connected = true;
            Ok(())
        } else {
            Err(OdbcError::driver("SQLDriverConnect", self))
        }
    }

    /// Disconnect. Failure is returned so the caller can log and continue
    /// its teardown.
    pub fn disconnect(&mut self) -> Result<(), OdbcError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        let ret = unsafe { SQLDisconnect(self.handle as odbc_sys::HDbc) };
        if succeeded(ret) {
            Ok(())
        } else {
            Err(OdbcError::driver("SQLDisconnect", self))
        }
    }
}

unsafe impl AsHandle for Connection {
    fn as_handle(&self) -> Handle {
        self.handle
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Dbc
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.connected {
            let ret = unsafe { SQLDisconnect(self.handle as odbc_sys::HDbc) };
            if !succeeded(ret) {
                warn!("SQLDisconnect returned {} during drop.", ret.0);
            }
        }
        unsafe { drop_handle(self.handle, HandleType::Dbc) }
    }
}

/// One executed statement and its pending result set, scoped to a
/// connection.
#[derive(Debug)]
pub struct Statement {
    handle: Handle,
}

impl Statement {
    pub fn new(conn: &Connection) -> Result<Self, OdbcError> {
        let mut handle: Handle = std::ptr::null_mut();
        let ret = unsafe { SQLAllocHandle(HandleType::Stmt, conn.as_handle(), &mut handle) };
        if succeeded(ret) {
            Ok(Self { handle })
        } else {
            Err(OdbcError::driver("SQLAllocHandle", conn))
        }
    }

    /// Execute the statement text directly: no prepare/execute split, no
    /// parameter binding.
    pub fn exec_direct(&mut self, sql: &str) -> Result<(), OdbcError> {
        let ret = unsafe { SQLExecDirect(self.handle as odbc_sys::HStmt, sql.as_ptr(), sql.len() as i32) };
        if succeeded(ret) {
            Ok(())
        } else {
            Err(OdbcError::driver("SQLExecDirect", self))
        }
    }

    /// Column count of the pending result set. Zero for statements that
    /// produce no result set (DDL/DML).
    pub fn num_result_cols(&mut self) -> Result<i16, OdbcError> {
        let mut columns: i16 = 0;
        let ret = unsafe { SQLNumResultCols(self.handle as odbc_sys::HStmt, &mut columns) };
        if succeeded(ret) {
            Ok(columns)
        } else {
            Err(OdbcError::driver("SQLNumResultCols", self))
        }
    }

    /// Advance the cursor. `Ok(true)` on a row, `Ok(false)` once the driver
    /// signals no more rows.
    pub fn fetch(&mut self) -> Result<bool, OdbcError> {
        let ret = unsafe { SQLFetch(self.handle as odbc_sys::HStmt) };
        if succeeded(ret) {
            Ok(true)
        } else if ret == SqlReturn::NO_DATA {
            Ok(false)
        } else {
            Err(OdbcError::driver("SQLFetch", self))
        }
    }

    /// The base name of column `col` (1-based).
    pub fn col_base_name(&mut self, col: u16) -> Result<String, OdbcError> {
        let mut name = [0u8; 256];
        let mut name_len: i16 = 0;
        let ret = unsafe {
            SQLColAttribute(
                self.handle as odbc_sys::HStmt,
                col,
                Desc::BaseColumnName,
                name.as_mut_ptr() as Pointer,
                name.len() as i16,
                &mut name_len,
                std::ptr::null_mut(),
            )
        };
        if succeeded(ret) {
            let len = (name_len.max(0) as usize).min(name.len() - 1);
            Ok(String::from_utf8_lossy(&name[..len]).into_owned())
        } else {
            Err(OdbcError::driver("SQLColAttribute", self))
        }
    }

    /// The value of column `col` (1-based) in the current row, coerced to
    /// text through a 1024-byte buffer. `None` when the indicator marks SQL
    /// null. Values longer than the buffer are truncated.
    pub fn text_value(&mut self, col: u16) -> Result<Option<String>, OdbcError> {
        let mut buf = [0u8; 1024];
        let mut indicator: isize = 0;
        let ret = unsafe {
            SQLGetData(
                self.handle as odbc_sys::HStmt,
                col,
                CDataType::Char,
                buf.as_mut_ptr() as Pointer,
                buf.len() as isize,
                &mut indicator,
            )
        };
        if !succeeded(ret) {
            return Err(OdbcError::driver("SQLGetData", self));
        }
        if indicator == NULL_DATA {
            return Ok(None);
        }
        let len = if indicator < 0 {
            // Length unknown (SQL_NO_TOTAL): the driver wrote a terminated
            // string into the buffer.
            buf.iter().position(|&b| b == 0).unwrap_or(buf.len() - 1)
        } else {
            (indicator as usize).min(buf.len() - 1)
        };
        Ok(Some(String::from_utf8_lossy(&buf[..len]).into_owned()))
    }
}

unsafe impl AsHandle for Statement {
    fn as_handle(&self) -> Handle {
        self.handle
    }

    fn handle_type(&self) -> HandleType {
        HandleType::Stmt
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        unsafe { drop_handle(self.handle, HandleType::Stmt) }
    }
}
