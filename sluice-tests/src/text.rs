use crate::params;
use sluice_core::{Connection, DriverParameters, Error, Value};

pub fn text(connection: &mut Connection) {
    let paramstyle = connection.dialect().capabilities().paramstyle;
    let mut sql = "SELECT name FROM sl_many WHERE seq = ".to_string();
    paramstyle.write_placeholder(&mut sql, "seq", 1);
    let parameters = if paramstyle.is_positional() {
        DriverParameters::Positional(vec![Value::Int64(3)])
    } else {
        DriverParameters::Named(params([("seq", Value::Int64(3))]))
    };
    let mut result = connection
        .exec_driver_sql(&sql, vec![parameters])
        .expect("Failed to run a raw query");
    assert!(result.context().is_text());
    assert_eq!(result.cache_status(), "raw sql");
    let rows = result.fetchall().expect("Failed to fetch the raw rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(*rows[0], [Value::Varchar("third".into())]);
    drop(result);

    let mut result = connection
        .exec_driver_sql("UPDATE sl_many SET name = name WHERE seq > 2", Vec::new())
        .expect("Failed to run a raw update");
    assert!(!result.returns_rows());
    if result.supports_sane_rowcount() {
        assert_eq!(result.rowcount(), 2);
    }
    assert!(matches!(result.fetchone(), Err(Error::ResourceClosed(..))));
    drop(result);

    // Driver failure keeps the connection usable
    let error = connection
        .exec_driver_sql("SELEC nothing FROM nowhere", Vec::new())
        .err()
        .expect("Invalid SQL must fail");
    assert!(matches!(error, Error::Driver(..)));
    assert!(
        error.to_string().contains("SELEC nothing FROM nowhere"),
        "The error must carry the statement: {error}"
    );
    assert!(!connection.invalidated());
    assert!(connection.ping().expect("Failed to ping"));
}
