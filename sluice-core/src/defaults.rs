use crate::{
    Column, ColumnDefault, Compiled, CompiledStatement, Dialect, DriverCursor, Error, Parameters,
    Result, SqlType, Value, classify_driver_error, expand_parameters, process_parameters,
};

/// Row scoped view handed to default callables.
///
/// Exposes the parameters already bound for the row being generated and the
/// column whose default is running.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    parameters: Option<&'a Parameters>,
    column: Option<&'a Column>,
}

impl<'a> RowContext<'a> {
    pub(crate) fn new(parameters: Option<&'a Parameters>, column: Option<&'a Column>) -> Self {
        Self { parameters, column }
    }

    /// Parameters of the current row, only available while a row is being generated.
    pub fn current_parameters(&self) -> Result<&'a Parameters> {
        self.parameters.ok_or_else(|| {
            Error::invalid_request(
                "Current parameters can only be read by a column default evaluated for a statement row",
            )
        })
    }

    pub fn current_column(&self) -> Option<&'a Column> {
        self.column
    }

    pub fn get(&self, key: &str) -> Result<Option<&'a Value>> {
        Ok(self.current_parameters()?.get(key))
    }
}

/// Runs a standalone single row, single column statement on `cursor`.
pub(crate) fn execute_scalar(
    dialect: &dyn Dialect,
    cursor: &mut dyn DriverCursor,
    compiled: &Compiled,
    ty: &SqlType,
) -> Result<Value> {
    let mut groups = [compiled.construct_params(None, None, None)?];
    let state = expand_parameters(dialect, compiled, &mut groups)?;
    let parameters = process_parameters(dialect, &state, &groups)?;
    log::debug!("{} {:?}", crate::truncate_long!(state.statement), parameters[0]);
    let value = dialect
        .do_execute(cursor, &state.statement, &parameters[0])
        .and_then(|_| cursor.fetchone())
        .map_err(|e| {
            classify_driver_error(
                dialect,
                e,
                Some(state.statement.as_str()),
                Some(parameters.as_slice()),
            )
        })?
        .and_then(|row| row.into_vec().into_iter().next())
        .unwrap_or_default();
    let ty = compiled.result_types().first().unwrap_or(ty);
    dialect.types().process_result(ty, value)
}

/// Value of one column default, `None` when the default produced nothing.
pub(crate) fn evaluate_default(
    dialect: &dyn Dialect,
    cursor: &mut dyn DriverCursor,
    column: &Column,
    default: &ColumnDefault,
    row: Option<&Parameters>,
) -> Result<Option<Value>> {
    match default {
        ColumnDefault::Scalar(value) => Ok(Some(value.clone())),
        ColumnDefault::Callable(callable) => callable(&RowContext::new(row, Some(column))),
        ColumnDefault::Clause(compiled) => {
            execute_scalar(dialect, cursor, compiled, &column.ty).map(Some)
        }
        ColumnDefault::Sequence(sequence)
            if sequence.optional
                && (dialect.capabilities().sequences_optional
                    || !dialect.capabilities().supports_sequences) =>
        {
            Ok(None)
        }
        ColumnDefault::Sequence(sequence) => {
            let value = dialect
                .fire_sequence(cursor, sequence, &column.ty)
                .map_err(|e| {
                    let statement = dialect.next_value_sql(sequence);
                    classify_driver_error(dialect, e, Some(statement.as_str()), None)
                })?;
            dialect.types().process_result(&column.ty, value).map(Some)
        }
    }
}

/// Fills the prefetch columns of every group before the statement runs.
///
/// Columns are the outer loop and rows the inner one, a scalar default is
/// computed once for all the rows. Any other default runs once per row, in
/// row order. Returns the keys of the prefetched columns.
pub(crate) fn prefetch_defaults(
    dialect: &dyn Dialect,
    cursor: &mut dyn DriverCursor,
    compiled: &dyn CompiledStatement,
    groups: &mut [Parameters],
) -> Result<Vec<String>> {
    let inserts = compiled
        .insert_prefetch()
        .iter()
        .filter_map(|c| Some((c, c.default.as_ref()?)));
    let updates = compiled
        .update_prefetch()
        .iter()
        .filter_map(|c| Some((c, c.onupdate.as_ref()?)));
    let mut prefetched = Vec::new();
    for (column, default) in inserts.chain(updates) {
        prefetched.push(column.key.clone());
        if let ColumnDefault::Scalar(value) = default {
            for group in groups.iter_mut() {
                group.insert(column.key.clone(), value.clone());
            }
            continue;
        }
        for group in groups.iter_mut() {
            if let Some(value) = evaluate_default(dialect, cursor, column, default, Some(&*group))? {
                group.insert(column.key.clone(), value);
            }
        }
    }
    Ok(prefetched)
}

/// Evaluates a default with no statement around it.
pub(crate) fn evaluate_bare_default(
    dialect: &dyn Dialect,
    cursor: &mut dyn DriverCursor,
    default: &ColumnDefault,
    ty: &SqlType,
) -> Result<Value> {
    let column = Column::new("", ty.clone());
    let value = evaluate_default(dialect, cursor, &column, default, None)?;
    Ok(value.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_context_outside_a_row() {
        let context = RowContext::new(None, None);
        assert!(matches!(
            context.current_parameters(),
            Err(Error::InvalidRequest(..))
        ));
        let parameters = Parameters::from_iter([("a".to_string(), Value::Int64(1))]);
        let column = Column::new("b", SqlType::Integer);
        let context = RowContext::new(Some(&parameters), Some(&column));
        assert_eq!(context.get("a").unwrap(), Some(&Value::Int64(1)));
        assert_eq!(context.current_column().map(|c| c.key.as_str()), Some("b"));
    }
}
