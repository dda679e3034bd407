//!
//! orin ODBC Database Support
//!
//! Exposes ODBC-style database connectivity to orin programs through the
//! platform driver manager. The module is a thin adapter: it owns the
//! driver resources for each open connection and marshals results into
//! interpreter values; everything else (SQL, cursors, type conversion to
//! text) is the driver's business.
//!
//! Architecture:
//! - `handles`: RAII single-owner wrappers over the driver's environment,
//!   connection and statement handles.
//! - `diagnostics`: drains a handle's diagnostic chain into records and
//!   renders driver failures as error text.
//! - `connection`: the Unopened -> Open -> Closed state machine and the
//!   eager row materialization (all values text, SQL null as "NULL").
//! - `odbc`: the extern "C" surface and the connection/rows registries,
//!   following the same handle-registry pattern as the other native
//!   modules.
//!
//! Errors: driver failures are returned to the caller as (0, diagnostic
//! text); usage errors throw UsageError. Success returns no error value.
//!

pub mod connection;
pub mod diagnostics;
pub mod handles;
pub mod odbc;

pub use connection::{ConnectionHandle, Row, RowSet, CLOSED_DESCRIPTION};
pub use diagnostics::{OdbcError, Record};
pub use odbc::*;
