use crate::{params, statement};
use sluice_core::{BindParameter, Connection, Error, SqlType, StatementKind, Value};

pub fn expanding(connection: &mut Connection) {
    let select = statement(connection, StatementKind::Select)
        .sql("SELECT name FROM sl_many WHERE seq IN (")
        .bind(BindParameter::new("seqs", SqlType::Integer).expanding())
        .sql(") ORDER BY seq")
        .result_types([SqlType::String(Some(32))])
        .build();

    let mut result = connection
        .execute(
            &select,
            vec![params([("seqs", vec![1_i64, 3, 4].into())])],
        )
        .expect("Failed to select an IN list");
    assert_eq!(result.context().parameters()[0].len(), 3);
    let names = result
        .fetchall()
        .expect("Failed to fetch the IN list rows")
        .into_iter()
        .map(|row| row[0].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        [
            Value::Varchar("first".into()),
            Value::Varchar("third".into()),
            Value::Varchar("fourth".into())
        ]
    );
    drop(result);

    // Empty list
    let mut result = connection
        .execute(&select, vec![params([("seqs", Vec::<i64>::new().into())])])
        .expect("Failed to select an empty IN list");
    assert!(result.context().parameters()[0].is_empty());
    assert!(result.fetchall().expect("Failed to fetch").is_empty());
    drop(result);

    // Literal
    let literal = statement(connection, StatementKind::Select)
        .sql("SELECT name FROM sl_many WHERE seq = ")
        .bind(
            BindParameter::new("seq", SqlType::Integer)
                .literal_execute()
                .value(2),
        )
        .build();
    let mut result = connection
        .execute(&literal, Vec::new())
        .expect("Failed to select with a literal parameter");
    assert!(result.context().statement().ends_with("seq = 2"));
    assert_eq!(
        result.scalar().expect("Failed to fetch the literal row"),
        Some(Value::Varchar("second".into()))
    );
    drop(result);

    // Not in a batch
    let error = connection
        .execute(
            &select,
            vec![
                params([("seqs", vec![1_i64].into())]),
                params([("seqs", vec![2_i64].into())]),
            ],
        )
        .err()
        .expect("Expanding parameters must be refused in a batch");
    assert!(matches!(error, Error::InvalidRequest(..)));
    assert!(!connection.invalidated());
}
