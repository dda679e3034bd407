//!
//! Diagnostic Chain Drain
//!
//! A failed driver call leaves a chain of diagnostic records on the handle
//! it was issued against. `collect` drains that chain into plain records;
//! `OdbcError` pairs the drained trace with the name of the call that
//! failed and renders it as one line per record.
//!

use std::fmt;

use odbc_sys::SQLGetDiagRec;
use thiserror::Error;

use crate::handles::{succeeded, AsHandle};

/// One structured entry from a handle's diagnostic chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Five-character SQLSTATE code.
    pub state: String,
    /// 1-based position in the chain.
    pub number: i16,
    /// Driver/data-source specific error code.
    pub native: i32,
    /// Message text, up to 255 bytes as drained.
    pub message: String,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.state, self.number, self.native, self.message
        )
    }
}

/// Drain every diagnostic record from `handle`, starting at record 1, until
/// the driver reports no more records or errors on the retrieval itself.
/// An empty chain yields an empty vector; this never fails the caller.
pub fn collect(handle: &dyn AsHandle) -> Vec<Record> {
    let mut records = Vec::new();
    let mut number: i16 = 1;
    loop {
        let mut state = [0u8; 6];
        let mut native: i32 = 0;
        let mut message = [0u8; 256];
        let mut message_len: i16 = 0;
        let ret = unsafe {
            SQLGetDiagRec(
                handle.handle_type(),
                handle.as_handle(),
                number,
                state.as_mut_ptr(),
                &mut native,
                message.as_mut_ptr(),
                message.len() as i16,
                &mut message_len,
            )
        };
        if !succeeded(ret) {
            break;
        }
        let len = (message_len.max(0) as usize).min(message.len() - 1);
        records.push(Record {
            state: String::from_utf8_lossy(&state[..5]).into_owned(),
            number,
            native,
            message: String::from_utf8_lossy(&message[..len]).into_owned(),
        });
        number += 1;
    }
    records
}

/// A failed database operation, as surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OdbcError {
    /// The operation requires an open connection.
    #[error("connection is closed")]
    Closed,

    /// A driver call failed; `records` is the diagnostic chain drained from
    /// the handle it was issued against.
    #[error("{function} failed{}", render_records(.records))]
    Driver {
        function: &'static str,
        records: Vec<Record>,
    },
}

impl OdbcError {
    /// Build a driver error by draining `handle`'s diagnostic chain.
    pub(crate) fn driver(function: &'static str, handle: &dyn AsHandle) -> Self {
        OdbcError::Driver {
            function,
            records: collect(handle),
        }
    }

    /// A driver failure with no handle to drain (environment allocation).
    pub(crate) fn driver_without_diagnostics(function: &'static str) -> Self {
        OdbcError::Driver {
            function,
            records: Vec::new(),
        }
    }
}

fn render_records(records: &[Record]) -> String {
    let mut out = String::new();
    for record in records {
        out.push('\n');
        out.push_str(&record.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(number: i16, message: &str) -> Record {
        Record {
            state: "HY000".to_owned(),
            number,
            native: -1,
            message: message.to_owned(),
        }
    }

    #[test]
    fn test_record_display() {
        let rec = Record {
            state: "42S02".to_owned(),
            number: 1,
            native: 208,
            message: "no_such_table not found".to_owned(),
        };
        assert_eq!(rec.to_string(), "42S02:1:208:no_such_table not found");
    }

    #[test]
    fn test_driver_error_renders_one_line_per_record() {
        let err = OdbcError::Driver {
            function: "SQLExecDirect",
            records: vec![record(1, "first"), record(2, "second")],
        };
        assert_eq!(
            err.to_string(),
            "SQLExecDirect failed\nHY000:1:-1:first\nHY000:2:-1:second"
        );
    }

    #[test]
    fn test_driver_error_without_records() {
        let err = OdbcError::driver_without_diagnostics("SQLAllocHandle");
        assert_eq!(err.to_string(), "SQLAllocHandle failed");
    }

    #[test]
    fn test_closed_error_text() {
        assert_eq!(OdbcError::Closed.to_string(), "connection is closed");
    }
}
