use crate::statement;
use sluice_core::{ColumnDefault, Connection, Error, SqlType, StatementKind, Value};
use std::sync::Arc;

pub fn defaults(connection: &mut Connection) {
    assert_eq!(
        connection
            .execute_default(&ColumnDefault::Scalar(Value::Int64(5)), &SqlType::Integer)
            .expect("Failed to evaluate a scalar default"),
        Value::Int64(5)
    );

    let clause = statement(connection, StatementKind::Select)
        .sql("SELECT 40 + 2")
        .result_types([SqlType::Integer])
        .build();
    assert_eq!(
        connection
            .execute_default(&ColumnDefault::Clause(Arc::new(clause)), &SqlType::Integer)
            .expect("Failed to evaluate a clause default"),
        Value::Int64(42)
    );

    assert_eq!(
        connection
            .execute_default(&ColumnDefault::callable(|_| Ok(None)), &SqlType::Text)
            .expect("Failed to evaluate an empty callable"),
        Value::Null
    );

    // Outside of a row there are no parameters to read
    let error = connection
        .execute_default(
            &ColumnDefault::callable(|context| {
                context.current_parameters()?;
                Ok(Some(Value::Null))
            }),
            &SqlType::Text,
        )
        .expect_err("Current parameters must not be available");
    assert!(matches!(error, Error::InvalidRequest(..)));
}
