///
/// Live Driver Integration Tests
///
/// Exercises a real driver manager through a DSN named TestDB pointing at
/// any database that accepts `SELECT 1 AS X`. Ignored by default since CI
/// machines rarely carry a configured driver.
///
/// Run: cargo test --test live -- --ignored
///
use orin_std_odbc::connection::{ConnectionHandle, CLOSED_DESCRIPTION};

#[test]
#[ignore = "requires a driver manager and a configured TestDB DSN"]
fn test_live_connect_exec_close() {
    let mut db = ConnectionHandle::open("DSN=TestDB").expect("connect to TestDB");

    let table = db.exec("SELECT 1 AS X").expect("SELECT 1 AS X");
    assert_eq!(table.rows.len(), 1);
    assert_eq!(table.columns, vec!["X".to_owned()]);
    assert_eq!(table.rows[0].get("X").map(String::as_str), Some("1"));

    let err = db
        .exec("SELECT * FROM no_such_table")
        .expect_err("querying a missing table");
    assert!(!err.to_string().is_empty());
    assert_eq!(db.last_query(), Some("SELECT * FROM no_such_table"));

    db.close();
    assert_eq!(db.describe(), CLOSED_DESCRIPTION);
    db.close(); // second close is a safe no-op
}

#[test]
#[ignore = "requires a driver manager and a configured TestDB DSN"]
fn test_live_connect_failure_is_reported() {
    let err = ConnectionHandle::open("DSN=definitely_not_configured")
        .expect_err("connecting to a missing DSN");
    assert!(err.to_string().contains("failed"));
}
