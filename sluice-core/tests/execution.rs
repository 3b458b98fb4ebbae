#[cfg(test)]
mod tests {
    use sluice_core::{
        BindParameter, BindTyping, Capabilities, Column, ColumnDefault, Compiled, Connection,
        ContextState, DriverParameters, Error, ExecutionOptions, ParamStyle, Parameters,
        PrimaryKeyColumn, SqlType, StatementKind, TypeRegistry, Value,
    };
    use sluice_tests::{
        init_logs,
        mock::{MockBackend, MockDialect, MockEvent, MockResponse, row},
        silent_logs,
    };
    use std::sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    };
    use time::macros::date;

    fn connect(dialect: MockDialect) -> (MockBackend, Connection) {
        init_logs();
        let backend = MockBackend::new();
        let connection = Connection::new(Arc::new(dialect), backend.connection())
            .expect("Could not connect to the mock backend");
        (backend, connection)
    }

    fn dialect(paramstyle: ParamStyle) -> MockDialect {
        MockDialect::new(Capabilities {
            name: "mock".into(),
            driver: "mock".into(),
            paramstyle,
            ..Default::default()
        })
    }

    fn group<const N: usize>(values: [(&str, Value); N]) -> Parameters {
        values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    fn closed_cursors(backend: &MockBackend) -> usize {
        backend.count(|e| *e == MockEvent::CloseCursor)
    }

    fn insert_user(paramstyle: ParamStyle) -> Compiled {
        Compiled::builder(StatementKind::Insert, paramstyle)
            .sql("INSERT INTO users (id, name) VALUES (")
            .bind(BindParameter::new("id", SqlType::Integer))
            .sql(", ")
            .bind(BindParameter::new("name", SqlType::Text).required())
            .sql(")")
            .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement())
            .postfetch_lastrowid(true)
            .build()
    }

    #[test]
    fn positional_parameters_follow_placeholders() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let compiled = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT * FROM t WHERE a = ")
            .bind(BindParameter::new("a", SqlType::Integer))
            .sql(" AND b = ")
            .bind(BindParameter::new("b", SqlType::Text))
            .sql(" OR a > ")
            .bind(BindParameter::new("a", SqlType::Integer))
            .build();
        connection
            .execute(
                &compiled,
                vec![group([("b", "x".into()), ("a", 1.into())])],
            )
            .expect("Failed to execute");
        assert_eq!(
            backend.executions(),
            [MockEvent::Execute {
                statement: "SELECT * FROM t WHERE a = ? AND b = ? OR a > ?".into(),
                parameters: DriverParameters::Positional(vec![
                    Value::Int64(1),
                    Value::Varchar("x".into()),
                    Value::Int64(1),
                ]),
            }]
        );
    }

    #[test]
    fn numeric_placeholders_are_numbered_at_execution() {
        let (backend, mut connection) = connect(dialect(ParamStyle::NumericDollar));
        let compiled = Compiled::builder(StatementKind::Select, ParamStyle::NumericDollar)
            .sql("SELECT * FROM t WHERE a IN (")
            .bind(BindParameter::new("a", SqlType::Integer).expanding())
            .sql(") AND b = ")
            .bind(BindParameter::new("b", SqlType::Integer))
            .build();
        connection
            .execute(
                &compiled,
                vec![group([("a", vec![5_i64, 6].into()), ("b", 7.into())])],
            )
            .expect("Failed to execute");
        let executions = backend.executions();
        assert_eq!(
            executions[0].statement(),
            Some("SELECT * FROM t WHERE a IN ($1, $2) AND b = $3")
        );
        assert_eq!(
            executions[0],
            MockEvent::Execute {
                statement: "SELECT * FROM t WHERE a IN ($1, $2) AND b = $3".into(),
                parameters: DriverParameters::Positional(vec![
                    Value::Int64(5),
                    Value::Int64(6),
                    Value::Int64(7),
                ]),
            }
        );
    }

    #[test]
    fn named_parameters_keep_their_names() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Named));
        connection
            .execute(
                &insert_user(ParamStyle::Named),
                vec![group([("name", "ann".into())])],
            )
            .expect("Failed to execute");
        let executions = backend.executions();
        let MockEvent::Execute { parameters, .. } = &executions[0] else {
            panic!("Expected a single execution");
        };
        let DriverParameters::Named(parameters) = parameters else {
            panic!("Expected named parameters");
        };
        assert_eq!(
            parameters.iter().collect::<Vec<_>>(),
            [
                (&"id".to_string(), &Value::Null),
                (&"name".to_string(), &Value::Varchar("ann".into()))
            ]
        );
    }

    #[test]
    fn lastrowid_primary_key() {
        let mut dialect = dialect(ParamStyle::Qmark);
        dialect.capabilities.implicit_returning = false;
        let (backend, mut connection) = connect(dialect);
        backend.respond(MockResponse::rowcount(1).lastrowid(7));
        let compiled = insert_user(ParamStyle::Qmark);
        let result = connection
            .execute(&compiled, vec![group([("name", "bob".into())])])
            .expect("Failed to insert");
        assert_eq!(&**result.inserted_primary_key().unwrap(), [Value::Int64(7)]);
        assert_eq!(result.lastrowid(), Some(7));
        assert_eq!(result.rowcount(), 1);
        assert_eq!(result.context().state(), ContextState::SoftClosed);
        drop(result);
        assert_eq!(backend.count(|e| *e == MockEvent::LastRowId), 1);
        assert_eq!(closed_cursors(&backend), 1);

        // Supplied value wins over the last row id
        backend.respond(MockResponse::rowcount(1).lastrowid(8));
        let result = connection
            .execute(
                &compiled,
                vec![group([("id", 3.into()), ("name", "eve".into())])],
            )
            .expect("Failed to insert");
        assert_eq!(&**result.inserted_primary_key().unwrap(), [Value::Int64(3)]);
    }

    #[test]
    fn implicit_returning_single_fetch() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let compiled = Compiled::builder(StatementKind::Insert, ParamStyle::Qmark)
            .sql("INSERT INTO users (name) VALUES (")
            .bind(BindParameter::new("name", SqlType::Text).required())
            .sql(") RETURNING id, created")
            .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement())
            .implicit_returning(["id", "created"])
            .result_types([SqlType::Integer, SqlType::Date])
            .postfetch("created")
            .build();
        backend.respond(MockResponse::rows(
            &["id", "created"],
            [row([Value::Int64(11), Value::Varchar("2024-05-06".into())])],
        ));
        let mut result = connection
            .execute(&compiled, vec![group([("name", "joe".into())])])
            .expect("Failed to insert");
        assert!(result.context().is_implicit_returning());
        assert!(!result.returns_rows());
        assert_eq!(&**result.inserted_primary_key().unwrap(), [Value::Int64(11)]);
        assert_eq!(
            result.returned_defaults().map(|r| r.to_vec()),
            Some(vec![Value::Int64(11), Value::Varchar("2024-05-06".into())])
        );
        assert!(result.lastrow_has_defaults());
        assert_eq!(result.postfetch_cols(), ["created"]);
        assert_eq!(result.rowcount(), 1);
        assert!(matches!(result.fetchone(), Err(Error::ResourceClosed(..))));
        drop(result);
        assert_eq!(backend.count(|e| *e == MockEvent::FetchAll), 1);
        assert_eq!(backend.count(|e| *e == MockEvent::FetchOne), 0);
        assert_eq!(backend.count(|e| *e == MockEvent::LastRowId), 0);
        assert_eq!(closed_cursors(&backend), 1);
    }

    #[test]
    fn returning_rows_are_decoded() {
        let mut dialect = dialect(ParamStyle::Qmark);
        dialect.types = TypeRegistry::text_storage();
        let (backend, mut connection) = connect(dialect);
        let compiled = Compiled::builder(StatementKind::Insert, ParamStyle::Qmark)
            .sql("INSERT INTO users (name) VALUES (")
            .bind(BindParameter::new("name", SqlType::Text).required())
            .sql(") RETURNING id, created")
            .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement())
            .implicit_returning(["id", "created"])
            .result_types([SqlType::Integer, SqlType::Date])
            .build();
        backend.respond(MockResponse::rows(
            &["id", "created"],
            [row([Value::Int64(11), Value::Varchar("2024-05-06".into())])],
        ));
        let result = connection
            .execute(&compiled, vec![group([("name", "joe".into())])])
            .expect("Failed to insert");
        assert_eq!(
            result.returned_defaults().map(|r| r.to_vec()),
            Some(vec![Value::Int64(11), Value::Date(date!(2024 - 05 - 06))])
        );
    }

    #[test]
    fn explicit_and_implicit_returning_conflict() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let compiled = Compiled::builder(StatementKind::Insert, ParamStyle::Qmark)
            .sql("INSERT INTO users (name) VALUES ('a') RETURNING id, name")
            .returning(["name"])
            .implicit_returning(["id"])
            .build();
        silent_logs! {
            assert!(matches!(
                connection.execute(&compiled, Vec::new()).err(),
                Some(Error::InvalidRequest(..))
            ));
        }
        assert!(backend.executions().is_empty());
        assert_eq!(closed_cursors(&backend), 1);
    }

    #[test]
    fn callable_defaults_run_once_per_row() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let counter = Arc::new(AtomicI64::new(10));
        let calls = counter.clone();
        let compiled = Compiled::builder(StatementKind::Insert, ParamStyle::Qmark)
            .sql("INSERT INTO events (name, seq) VALUES (")
            .bind(BindParameter::new("name", SqlType::Text).required())
            .sql(", ")
            .bind(BindParameter::new("seq", SqlType::Integer))
            .sql(")")
            .insert_prefetch(Column::new("seq", SqlType::Integer).default(
                ColumnDefault::callable(move |context| {
                    assert!(context.get("name")?.is_some());
                    assert_eq!(context.current_column().map(|c| c.key.as_str()), Some("seq"));
                    Ok(Some(calls.fetch_add(1, Ordering::SeqCst).into()))
                }),
            ))
            .build();
        backend.respond(MockResponse::rowcount(3));
        let result = connection
            .execute(
                &compiled,
                vec![
                    group([("name", "a".into())]),
                    group([("name", "b".into())]),
                    group([("name", "c".into())]),
                ],
            )
            .expect("Failed to insert many");
        assert_eq!(result.rowcount(), 3);
        assert_eq!(result.prefetch_cols(), ["seq"]);
        drop(result);
        assert_eq!(counter.load(Ordering::SeqCst), 13);
        let executions = backend.executions();
        let [MockEvent::ExecuteMany { groups, .. }] = executions.as_slice() else {
            panic!("Expected a single executemany");
        };
        let seqs = groups
            .iter()
            .map(|g| match g {
                DriverParameters::Positional(values) => values[1].clone(),
                DriverParameters::Named(..) => panic!("Expected positional parameters"),
            })
            .collect::<Vec<_>>();
        assert_eq!(seqs, [Value::Int64(10), Value::Int64(11), Value::Int64(12)]);
    }

    #[test]
    fn clause_defaults_run_on_the_statement_cursor() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let clause = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT 5")
            .build();
        let compiled = Compiled::builder(StatementKind::Insert, ParamStyle::Qmark)
            .sql("INSERT INTO t (v) VALUES (")
            .bind(BindParameter::new("v", SqlType::Integer))
            .sql(")")
            .insert_prefetch(
                Column::new("v", SqlType::Integer)
                    .default(ColumnDefault::Clause(Arc::new(clause))),
            )
            .build();
        backend
            .respond(MockResponse::rows(&["v"], [row([Value::Int64(5)])]))
            .respond(MockResponse::rowcount(1));
        connection
            .execute(&compiled, Vec::new())
            .expect("Failed to insert");
        assert_eq!(
            backend.executions(),
            [
                MockEvent::Execute {
                    statement: "SELECT 5".into(),
                    parameters: DriverParameters::Positional(Vec::new()),
                },
                MockEvent::Execute {
                    statement: "INSERT INTO t (v) VALUES (?)".into(),
                    parameters: DriverParameters::Positional(vec![Value::Int64(5)]),
                },
            ]
        );
        assert_eq!(backend.count(|e| *e == MockEvent::Cursor), 1);
        assert_eq!(closed_cursors(&backend), 1);
    }

    #[test]
    fn expanding_parameters_refused_in_batches() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let compiled = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT * FROM t WHERE a IN (")
            .bind(BindParameter::new("a", SqlType::Integer).expanding())
            .sql(")")
            .build();
        silent_logs! {
            assert!(matches!(
                connection
                    .execute(
                        &compiled,
                        vec![
                            group([("a", vec![1_i64].into())]),
                            group([("a", vec![2_i64].into())]),
                        ],
                    )
                    .err(),
                Some(Error::InvalidRequest(..))
            ));
        }
        assert!(backend.executions().is_empty());
        assert_eq!(closed_cursors(&backend), 1);
        assert!(!connection.invalidated());
    }

    #[test]
    fn cursor_closed_once() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let select = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT a FROM t")
            .build();

        // Exhausted
        backend.respond(MockResponse::rows(&["a"], [row([Value::Int64(1)])]));
        let mut result = connection
            .execute(&select, Vec::new())
            .expect("Failed to select");
        assert_eq!(result.fetchall().unwrap().len(), 1);
        assert_eq!(result.context().state(), ContextState::SoftClosed);
        result.close();
        drop(result);
        assert_eq!(closed_cursors(&backend), 1);

        // Dropped early
        backend.respond(MockResponse::rows(
            &["a"],
            [row([Value::Int64(1)]), row([Value::Int64(2)])],
        ));
        let mut result = connection
            .execute(&select, Vec::new())
            .expect("Failed to select");
        assert_eq!(result.fetchmany(1).unwrap().len(), 1);
        drop(result);
        assert_eq!(closed_cursors(&backend), 2);

        // Driver failure
        backend.respond(MockResponse::error("syntax error"));
        silent_logs! {
            let Some(Error::Driver(error)) = connection.execute(&select, Vec::new()).err() else {
                panic!("Expected a driver error");
            };
            assert_eq!(error.statement.as_deref(), Some("SELECT a FROM t"));
            assert!(!error.disconnect);
        }
        assert_eq!(closed_cursors(&backend), 3);
        assert!(!connection.invalidated());
    }

    #[test]
    fn disconnect_invalidates_the_connection() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let select = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT 1")
            .build();
        backend.respond(MockResponse::disconnect("server closed the connection"));
        silent_logs! {
            assert!(
                connection
                    .execute(&select, Vec::new())
                    .err()
                    .expect("Expected an error")
                    .is_disconnect()
            );
        }
        assert!(connection.invalidated());
        assert_eq!(closed_cursors(&backend), 1);
        assert!(matches!(
            connection.execute(&select, Vec::new()).err(),
            Some(Error::InvalidRequest(..))
        ));
        assert_eq!(backend.count(|e| *e == MockEvent::Cursor), 1);
    }

    #[test]
    fn server_side_cursor_selection() {
        let mut dialect = dialect(ParamStyle::Qmark);
        dialect.capabilities.supports_server_side_cursors = true;
        dialect.capabilities.server_side_cursors = true;
        let (backend, mut connection) = connect(dialect);
        let select = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT a FROM t")
            .build();
        let update = Compiled::builder(StatementKind::Update, ParamStyle::Qmark)
            .sql("UPDATE t SET a = 1")
            .build();
        let run = |connection: &mut Connection, compiled: &Compiled, options: ExecutionOptions| {
            connection
                .execute_with(compiled, Vec::new(), &options, Default::default(), None)
                .map(|r| r.context().is_server_side())
                .expect("Failed to execute")
        };
        assert!(run(&mut connection, &select, ExecutionOptions::new()));
        assert!(!run(
            &mut connection,
            &select,
            ExecutionOptions::new().stream_results(false)
        ));
        assert!(!run(&mut connection, &update, ExecutionOptions::new()));
        assert!(run(
            &mut connection,
            &update,
            ExecutionOptions::new().stream_results(true)
        ));
        let text = connection
            .exec_driver_sql("  select a from t", Vec::new())
            .map(|r| r.context().is_server_side())
            .unwrap();
        assert!(text);
        let compiled_select = Compiled::builder(StatementKind::Text, ParamStyle::Qmark)
            .sql("\n SELECT a FROM t")
            .build();
        let compiled_delete = Compiled::builder(StatementKind::Text, ParamStyle::Qmark)
            .sql("DELETE FROM t")
            .build();
        assert!(run(&mut connection, &compiled_select, ExecutionOptions::new()));
        assert!(!run(&mut connection, &compiled_delete, ExecutionOptions::new()));
        assert_eq!(backend.count(|e| *e == MockEvent::ServerSideCursor), 4);
        assert_eq!(backend.count(|e| *e == MockEvent::Cursor), 3);
    }

    #[test]
    fn stream_results_needs_dialect_support() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let select = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT a FROM t")
            .build();
        let options = ExecutionOptions::new().stream_results(true);
        let result = connection
            .execute_with(&select, Vec::new(), &options, Default::default(), None)
            .expect("Failed to execute");
        assert!(!result.context().is_server_side());
        drop(result);
        assert_eq!(backend.count(|e| *e == MockEvent::ServerSideCursor), 0);
    }

    #[test]
    fn input_sizes_precede_execution() {
        let mut dialect = dialect(ParamStyle::Qmark);
        dialect.capabilities.bind_typing = BindTyping::SetInputSizes;
        let (backend, mut connection) = connect(dialect);
        connection
            .execute(
                &insert_user(ParamStyle::Qmark),
                vec![group([("name", "amy".into())])],
            )
            .expect("Failed to insert");
        let events = backend.events();
        let sizes = events
            .iter()
            .position(|e| matches!(e, MockEvent::SetInputSizes(..)))
            .expect("Input sizes were not set");
        let execute = events
            .iter()
            .position(MockEvent::is_execution)
            .expect("Statement was not executed");
        assert!(sizes < execute);
        let MockEvent::SetInputSizes(sizes) = &events[sizes] else {
            unreachable!();
        };
        assert_eq!(
            sizes.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(),
            ["id", "name"]
        );
    }

    #[test]
    fn no_parameters_option() {
        let (backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        connection
            .exec_driver_sql_with(
                "SELECT 1",
                Vec::new(),
                &ExecutionOptions::new().no_parameters(true),
            )
            .expect("Failed to execute");
        connection
            .exec_driver_sql("SELECT 2", Vec::new())
            .expect("Failed to execute");
        assert_eq!(
            backend.executions(),
            [
                MockEvent::ExecuteNoParams {
                    statement: "SELECT 1".into()
                },
                MockEvent::Execute {
                    statement: "SELECT 2".into(),
                    parameters: DriverParameters::Positional(Vec::new()),
                },
            ]
        );
    }

    #[test]
    fn cache_status_is_rendered() {
        let (_backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let select = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT 1")
            .build();
        let result = connection
            .execute_with(
                &select,
                Vec::new(),
                &ExecutionOptions::new(),
                sluice_core::CacheStatus::Hit,
                None,
            )
            .expect("Failed to execute");
        assert!(result.cache_status().starts_with("cached since "));
        drop(result);
        let result = connection
            .exec_driver_sql("SELECT 1", Vec::new())
            .expect("Failed to execute");
        assert_eq!(result.cache_status(), "raw sql");
    }

    #[test]
    fn statement_level_isolation_is_refused() {
        let (_backend, mut connection) = connect(dialect(ParamStyle::Qmark));
        let options =
            ExecutionOptions::new().isolation_level(sluice_core::IsolationLevel::Serializable);
        assert!(matches!(
            connection
                .exec_driver_sql_with("SELECT 1", Vec::new(), &options)
                .err(),
            Some(Error::Argument(..))
        ));
    }
}
