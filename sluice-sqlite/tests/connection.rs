#[cfg(test)]
mod tests {
    use sluice_core::{
        BindParameter, Compiled, Connection, Dialect, DriverParameters, Error, IsolationLevel,
        PrimaryKeyColumn, SqlType, StatementKind, Value,
    };
    use sluice_sqlite::{SqliteDriver, connect};
    use sluice_tests::{init_logs, params, query_scalar, silent_logs};
    use std::{fs, path::Path, sync::Mutex};

    static MUTEX: Mutex<()> = Mutex::new(());

    fn memory() -> Connection {
        init_logs();
        connect("sqlite://:memory:").expect("Could not open an in memory database")
    }

    fn run(connection: &mut Connection, sql: &str) {
        connection
            .exec_driver_sql(sql, Vec::new())
            .unwrap_or_else(|e| panic!("Could not run `{sql}`: {e:#}"));
    }

    #[test]
    fn create_database() {
        init_logs();
        const DB_PATH: &str = "../target/debug/creation.sqlite";
        let _guard = MUTEX.lock().unwrap();
        if Path::new(DB_PATH).exists() {
            fs::remove_file(DB_PATH)
                .unwrap_or_else(|_| panic!("Failed to remove test database file {}", DB_PATH));
        }
        assert!(
            !Path::new(DB_PATH).exists(),
            "Database file should not exist before test"
        );
        let mut connection = connect(&format!("sqlite://{}?mode=rwc", DB_PATH))
            .expect("Could not open the database");
        connection.close().expect("Could not close the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        let mut connection = connect(&format!("sqlite://{}?mode=ro", DB_PATH))
            .expect("Could not open the database");
        connection.close().expect("Could not close the database");
        fs::remove_file(DB_PATH)
            .unwrap_or_else(|_| panic!("Failed to remove existing test database file {}", DB_PATH));
        silent_logs! {
            assert!(
                connect(&format!("sqlite://{}?mode=ro", DB_PATH)).is_err(),
                "Should not be able to open in read only unexisting database"
            );
        }
    }

    #[test]
    fn wrong_url() {
        silent_logs! {
            assert!(matches!(
                connect("duckdb://some_value"),
                Err(Error::Argument(..))
            ));
            assert!(matches!(
                connect("sqlite://:memory:?paramstyle=pyformat"),
                Err(Error::Argument(..))
            ));
        }
    }

    #[test]
    fn dialect_is_initialized_once() {
        init_logs();
        let driver = SqliteDriver::new();
        let first = driver.connect("sqlite://:memory:").expect("Could not connect");
        let second = driver.connect("sqlite://:memory:").expect("Could not connect");
        let runtime = driver.dialect().runtime();
        assert!(runtime.is_initialized());
        assert_eq!(runtime.default_schema_name(), Some("main"));
        assert!(runtime.server_version().is_some_and(|v| v.starts_with('3')));
        assert_eq!(
            first.default_isolation_level(),
            Some(&IsolationLevel::Serializable)
        );
        assert_eq!(
            second.default_isolation_level(),
            Some(&IsolationLevel::Serializable)
        );
    }

    #[test]
    fn isolation_level_uses_the_read_uncommitted_pragma() {
        let mut connection = memory();
        assert_eq!(
            connection.get_isolation_level().expect("Could not read the level"),
            Some(IsolationLevel::Serializable)
        );
        connection
            .set_isolation_level(IsolationLevel::ReadUncommitted)
            .expect("Could not change the level");
        assert_eq!(
            connection.get_isolation_level().expect("Could not read the level"),
            Some(IsolationLevel::ReadUncommitted)
        );
        assert_eq!(
            query_scalar(&mut connection, "PRAGMA read_uncommitted"),
            Value::Int64(1)
        );
        assert!(matches!(
            connection.set_isolation_level(IsolationLevel::ReadCommitted),
            Err(Error::Argument(..))
        ));

        let mut connection = connect("sqlite://:memory:?isolation_level=read_uncommitted")
            .expect("Could not connect");
        assert_eq!(
            connection.get_isolation_level().expect("Could not read the level"),
            Some(IsolationLevel::ReadUncommitted)
        );
    }

    #[test]
    fn returning_rowcount_follows_the_fetched_rows() {
        let mut connection = memory();
        run(&mut connection, "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)");
        run(
            &mut connection,
            "INSERT INTO items (name) VALUES ('a'), ('b'), ('c')",
        );
        let mut result = connection
            .exec_driver_sql("UPDATE items SET name = upper(name) RETURNING id", Vec::new())
            .expect("Could not update");
        assert!(result.returns_rows());
        assert_eq!(result.fetchall().expect("Could not fetch").len(), 3);
        assert_eq!(result.rowcount(), 3);
        drop(result);
        assert_eq!(
            query_scalar(&mut connection, "SELECT group_concat(name, '') FROM items"),
            Value::Varchar("ABC".into())
        );
    }

    #[test]
    fn update_with_implicit_returning_counts_every_row() {
        let mut connection = memory();
        run(
            &mut connection,
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, ver INTEGER DEFAULT 0)",
        );
        run(
            &mut connection,
            "INSERT INTO items (name, ver) VALUES ('a', 1), ('b', 2), ('c', 3)",
        );
        let paramstyle = connection.dialect().capabilities().paramstyle;
        let update = Compiled::builder(StatementKind::Update, paramstyle)
            .sql("UPDATE items SET name = ")
            .bind(BindParameter::new("name", SqlType::Text))
            .sql(" WHERE id > ")
            .bind(BindParameter::new("id", SqlType::Integer))
            .sql(" RETURNING ver")
            .implicit_returning(["ver"])
            .result_types([SqlType::Integer])
            .build();
        let result = connection
            .execute(
                &update,
                vec![params([("name", "z".into()), ("id", 1.into())])],
            )
            .expect("Could not update");
        assert!(result.supports_sane_rowcount());
        assert_eq!(result.rowcount(), 2);
        assert!(!result.returns_rows());
        assert_eq!(
            result.returned_defaults().map(|row| row.to_vec()),
            Some(vec![Value::Int64(2)])
        );
        drop(result);
        assert_eq!(
            query_scalar(&mut connection, "SELECT COUNT(*) FROM items WHERE name = 'z'"),
            Value::Int64(2)
        );
    }

    #[test]
    fn driver_contract_errors() {
        let mut connection = memory();
        run(&mut connection, "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)");
        silent_logs! {
            let error = connection
                .exec_driver_sql("SELECT 1; SELECT 2", Vec::new())
                .err()
                .expect("Two statements must be refused");
            assert!(error.to_string().contains("one statement at a time"));

            let error = connection
                .exec_driver_sql(
                    "SELECT id FROM items WHERE id = ?",
                    vec![
                        DriverParameters::Positional(vec![Value::Int64(1)]),
                        DriverParameters::Positional(vec![Value::Int64(2)]),
                    ],
                )
                .err()
                .expect("Batches of queries must be refused");
            assert!(error.to_string().contains("can only execute DML statements"));

            let error = connection
                .exec_driver_sql(
                    "INSERT INTO items (name) VALUES (?)",
                    vec![DriverParameters::Positional(Vec::new())],
                )
                .err()
                .expect("Missing bindings must be refused");
            assert!(error.to_string().contains("Incorrect number of bindings supplied"));
        }
        assert!(!connection.invalidated());
        assert_eq!(
            query_scalar(&mut connection, "SELECT COUNT(*) FROM items"),
            Value::Int64(0)
        );
    }

    #[test]
    fn lastrowid_after_insert() {
        let mut connection = memory();
        run(&mut connection, "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT)");
        run(&mut connection, "INSERT INTO items (id, name) VALUES (41, 'a')");
        let paramstyle = connection.dialect().capabilities().paramstyle;
        let insert = Compiled::builder(StatementKind::Insert, paramstyle)
            .sql("INSERT INTO items (name) VALUES (")
            .bind(BindParameter::new("name", SqlType::Text).required())
            .sql(")")
            .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement())
            .postfetch_lastrowid(true)
            .build();
        let result = connection
            .execute(&insert, vec![params([("name", "b".into())])])
            .expect("Could not insert");
        assert_eq!(result.lastrowid(), Some(42));
        let key = result.inserted_primary_key().expect("Missing primary key");
        assert_eq!(**key, [Value::Int64(42)]);
    }

    #[test]
    fn closing_is_idempotent() {
        let mut connection = memory();
        connection.close().expect("Could not close");
        assert!(connection.is_closed());
        assert!(matches!(
            connection.exec_driver_sql("SELECT 1", Vec::new()),
            Err(Error::ResourceClosed(..))
        ));
        connection.close().expect("Closing twice is a no-op");
    }
}
