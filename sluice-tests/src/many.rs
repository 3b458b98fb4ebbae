use crate::{ddl, params, query_scalar, statement};
use sluice_core::{
    BindParameter, Column, ColumnDefault, Connection, PrimaryKeyColumn, SqlType, StatementKind,
    Value,
};
use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

pub fn many(connection: &mut Connection) {
    ddl(connection, "DROP TABLE IF EXISTS sl_many");
    ddl(
        connection,
        "CREATE TABLE sl_many (id INTEGER PRIMARY KEY, name VARCHAR(32) NOT NULL, seq INTEGER)",
    );

    let counter = Arc::new(AtomicI64::new(1));
    let next = counter.clone();
    let insert = statement(connection, StatementKind::Insert)
        .sql("INSERT INTO sl_many (name, seq) VALUES (")
        .bind(BindParameter::new("name", SqlType::String(Some(32))).required())
        .sql(", ")
        .bind(BindParameter::new("seq", SqlType::Integer))
        .sql(")")
        .insert_prefetch(Column::new("seq", SqlType::Integer).default(ColumnDefault::callable(
            move |_| Ok(Some(next.fetch_add(1, Ordering::SeqCst).into())),
        )))
        .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement())
        .build();
    let groups = ["first", "second", "third", "fourth"]
        .into_iter()
        .map(|name| params([("name", name.into())]))
        .collect();
    let result = connection
        .execute(&insert, groups)
        .expect("Failed to insert many rows");
    assert!(result.context().is_executemany());
    if result.supports_sane_multi_rowcount() {
        assert_eq!(result.rowcount(), 4);
    }
    let keys = result
        .inserted_primary_key_rows()
        .expect("Many rows insert has primary key rows");
    assert_eq!(keys.len(), 4);
    assert_eq!(
        result
            .context()
            .compiled_parameters()
            .iter()
            .map(|p| p["seq"].clone())
            .collect::<Vec<_>>(),
        [Value::Int64(1), Value::Int64(2), Value::Int64(3), Value::Int64(4)]
    );
    assert!(result.inserted_primary_key().is_err());
    drop(result);
    assert_eq!(counter.load(Ordering::SeqCst), 5);
    assert_eq!(
        query_scalar(connection, "SELECT COUNT(*) FROM sl_many"),
        Value::Int64(4)
    );
    assert_eq!(
        query_scalar(connection, "SELECT MAX(seq) FROM sl_many"),
        Value::Int64(4)
    );
}
