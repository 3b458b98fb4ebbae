use crate::query_scalar;
use sluice_core::{Connection, Error, IsolationLevel, Value};

fn insert(connection: &mut Connection, name: &str) {
    connection
        .exec_driver_sql(
            &format!("INSERT INTO sl_many (name, seq) VALUES ('{name}', 100)"),
            Vec::new(),
        )
        .unwrap_or_else(|e| panic!("Could not insert {name}: {e:#}"));
}

fn count(connection: &mut Connection) -> Value {
    query_scalar(connection, "SELECT COUNT(*) FROM sl_many WHERE seq = 100")
}

pub fn transaction(connection: &mut Connection) {
    assert!(!connection.in_transaction());
    connection.begin().expect("Could not begin a transaction");
    assert!(matches!(connection.begin(), Err(Error::InvalidRequest(..))));
    assert!(matches!(
        connection.set_isolation_level(IsolationLevel::Serializable),
        Err(Error::InvalidRequest(..))
    ));
    insert(connection, "rolled back");
    assert_eq!(count(connection), Value::Int64(1));
    connection.rollback().expect("Could not roll back");
    assert!(!connection.in_transaction());
    assert_eq!(count(connection), Value::Int64(0));

    connection.begin().expect("Could not begin a transaction");
    insert(connection, "committed");
    connection.commit().expect("Could not commit");
    assert_eq!(count(connection), Value::Int64(1));

    #[cfg(not(feature = "disable-savepoints"))]
    {
        connection.begin().expect("Could not begin a transaction");
        insert(connection, "outer");
        let savepoint = connection
            .begin_nested()
            .expect("Could not create a savepoint");
        assert!(connection.in_nested_transaction());
        insert(connection, "inner");
        assert_eq!(count(connection), Value::Int64(3));
        connection
            .rollback_to_savepoint(&savepoint)
            .expect("Could not roll back to the savepoint");
        assert!(!connection.in_nested_transaction());
        assert!(matches!(
            connection.release_savepoint(&savepoint),
            Err(Error::InvalidRequest(..))
        ));
        let savepoint = connection
            .begin_nested()
            .expect("Could not create a savepoint");
        insert(connection, "released");
        connection
            .release_savepoint(&savepoint)
            .expect("Could not release the savepoint");
        connection.commit().expect("Could not commit");
        assert_eq!(count(connection), Value::Int64(3));
    }

    connection
        .exec_driver_sql("DELETE FROM sl_many WHERE seq = 100", Vec::new())
        .expect("Could not clean up sl_many");
}
