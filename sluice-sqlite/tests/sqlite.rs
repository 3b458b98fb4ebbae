#[cfg(test)]
mod tests {
    use sluice_core::ParamStyle;
    use sluice_sqlite::SqliteDriver;
    use sluice_tests::{execute_tests, init_logs};
    use std::{fs, path::Path, sync::Mutex};

    static MUTEX: Mutex<()> = Mutex::new(());

    fn fresh_database(path: &str) {
        if Path::new(path).exists() {
            fs::remove_file(path)
                .unwrap_or_else(|_| panic!("Failed to remove existing test database file {}", path));
        }
        assert!(
            !Path::new(path).exists(),
            "Database file should not exist before test"
        );
    }

    #[test]
    fn sqlite() {
        init_logs();
        const DB_PATH: &str = "../target/debug/tests.sqlite";
        let _guard = MUTEX.lock().unwrap();
        fresh_database(DB_PATH);
        let driver = SqliteDriver::new();
        let connection = driver
            .connect(&format!("sqlite://{}?mode=rwc", DB_PATH))
            .expect("Could not open the database");
        assert!(
            Path::new(DB_PATH).exists(),
            "Database file should be created after connection"
        );
        execute_tests(connection);
    }

    #[test]
    fn sqlite_lastrowid_named_paramstyle() {
        init_logs();
        const DB_PATH: &str = "../target/debug/tests_named.sqlite";
        let _guard = MUTEX.lock().unwrap();
        fresh_database(DB_PATH);
        let connection = SqliteDriver::new()
            .connect(&format!(
                "sqlite://{}?mode=rwc&paramstyle=named&implicit_returning=false",
                DB_PATH
            ))
            .expect("Could not open the database");
        assert_eq!(
            connection.dialect().capabilities().paramstyle,
            ParamStyle::Named
        );
        execute_tests(connection);
    }
}
