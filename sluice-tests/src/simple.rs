use crate::{ddl, params, statement, use_returning};
use indoc::indoc;
use rust_decimal::Decimal;
use sluice_core::{
    BindParameter, Column, ColumnDefault, Compiled, Connection, Error, PrimaryKeyColumn, SqlType,
    StatementKind, Value,
};
use time::macros::datetime;
use uuid::Uuid;

fn insert(connection: &Connection) -> Compiled {
    let builder = statement(connection, StatementKind::Insert)
        .sql("INSERT INTO sl_simple (name, active, score, created, token) VALUES (")
        .bind(BindParameter::new("name", SqlType::String(Some(64))).required())
        .sql(", ")
        .bind(BindParameter::new("active", SqlType::Boolean))
        .sql(", ")
        .bind(BindParameter::new(
            "score",
            SqlType::Numeric {
                precision: 10,
                scale: 2,
            },
        ))
        .sql(", ")
        .bind(BindParameter::new("created", SqlType::DateTime))
        .sql(", ")
        .bind(BindParameter::new("token", SqlType::Uuid))
        .sql(")")
        .insert_prefetch(
            Column::new("created", SqlType::DateTime).default(ColumnDefault::Scalar(
                Value::Timestamp(datetime!(2025-01-02 03:04:05.25)),
            )),
        )
        .insert_prefetch(
            Column::new("token", SqlType::Uuid)
                .default(ColumnDefault::callable(|_| Ok(Some(Uuid::new_v4().into())))),
        )
        .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement());
    if use_returning(connection) {
        builder
            .sql(" RETURNING id")
            .implicit_returning(["id"])
            .result_types([SqlType::Integer])
            .build()
    } else {
        builder.postfetch_lastrowid(true).build()
    }
}

fn select_by_id(connection: &Connection) -> Compiled {
    statement(connection, StatementKind::Select)
        .sql("SELECT id, name, active, score, created, token FROM sl_simple WHERE id = ")
        .bind(BindParameter::new("id", SqlType::Integer).required())
        .result_types([
            SqlType::Integer,
            SqlType::String(Some(64)),
            SqlType::Boolean,
            SqlType::Numeric {
                precision: 10,
                scale: 2,
            },
            SqlType::DateTime,
            SqlType::Uuid,
        ])
        .build()
}

pub fn simple(connection: &mut Connection) {
    ddl(connection, "DROP TABLE IF EXISTS sl_simple");
    ddl(
        connection,
        indoc! {"
            CREATE TABLE sl_simple (
                id INTEGER PRIMARY KEY,
                name VARCHAR(64) NOT NULL,
                active BOOLEAN,
                score NUMERIC(10, 2),
                created TIMESTAMP,
                token UUID
            )
        "},
    );

    // Insert
    let insert = insert(connection);
    let mut result = connection
        .execute(
            &insert,
            vec![params([
                ("name", "alpha".into()),
                ("active", true.into()),
                ("score", Decimal::new(1250, 2).into()),
            ])],
        )
        .expect("Failed to insert alpha");
    assert_eq!(result.rowcount(), 1);
    assert_eq!(result.prefetch_cols(), ["created", "token"]);
    let alpha = result
        .inserted_primary_key()
        .expect("Alpha has no primary key")
        .clone();
    assert!(matches!(*alpha, [Value::Int64(..)]));
    assert!(matches!(result.fetchone(), Err(Error::ResourceClosed(..))));
    drop(result);

    let mut result = connection
        .execute(&insert, vec![params([("name", "bravo".into())])])
        .expect("Failed to insert bravo");
    let bravo = result
        .inserted_primary_key()
        .expect("Bravo has no primary key")
        .clone();
    assert_ne!(alpha, bravo);
    result.close();
    assert!(result.is_closed());
    drop(result);

    // Select
    let select = select_by_id(connection);
    let mut result = connection
        .execute(&select, vec![params([("id", alpha[0].clone())])])
        .expect("Failed to select alpha");
    assert!(result.returns_rows());
    assert_eq!(
        result.keys(),
        ["id", "name", "active", "score", "created", "token"]
    );
    let row = result
        .fetchone()
        .expect("Failed to fetch alpha")
        .expect("Alpha was not found");
    assert_eq!(row[0], alpha[0]);
    assert_eq!(row[1], Value::Varchar("alpha".into()));
    assert_eq!(row[2], Value::Boolean(true));
    assert_eq!(row[3], Value::Decimal(Decimal::new(125, 1)));
    assert_eq!(row[4], Value::Timestamp(datetime!(2025-01-02 03:04:05.25)));
    assert!(matches!(row[5], Value::Uuid(..)));
    assert_eq!(result.fetchone().expect("Failed to fetch past the end"), None);
    assert_eq!(result.fetchone().expect("Exhausted result must stay empty"), None);
    drop(result);

    let mut result = connection
        .execute(&select, vec![params([("id", bravo[0].clone())])])
        .expect("Failed to select bravo");
    let row = result
        .fetchone()
        .expect("Failed to fetch bravo")
        .expect("Bravo was not found");
    assert_eq!(row[2], Value::Null);
    assert_eq!(row[3], Value::Null);
    drop(result);

    // Update
    let update = statement(connection, StatementKind::Update)
        .sql("UPDATE sl_simple SET active = ")
        .bind(BindParameter::new("active", SqlType::Boolean))
        .sql(" WHERE name <> ")
        .bind(BindParameter::new("name", SqlType::Text).required())
        .build();
    let result = connection
        .execute(
            &update,
            vec![params([("active", false.into()), ("name", "nobody".into())])],
        )
        .expect("Failed to update");
    if result.supports_sane_rowcount() {
        assert_eq!(result.rowcount(), 2);
    }
    drop(result);

    // Delete
    let delete = statement(connection, StatementKind::Delete)
        .sql("DELETE FROM sl_simple WHERE id = ")
        .bind(BindParameter::new("id", SqlType::Integer).required())
        .build();
    let result = connection
        .execute(&delete, vec![params([("id", bravo[0].clone())])])
        .expect("Failed to delete bravo");
    assert_eq!(result.rowcount(), 1);
    drop(result);
    let mut result = connection
        .execute(&select, vec![params([("id", bravo[0].clone())])])
        .expect("Failed to select bravo");
    assert!(result.fetchall().expect("Failed to fetch").is_empty());
}
