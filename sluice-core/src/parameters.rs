use crate::{
    BindParameter, BindProcessor, BindTyping, CompiledStatement, Dialect, DriverParameters, Error,
    InputSize, POSTCOMPILE_PREFIX, Parameters, Result, SqlType, Value, separated_by,
};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Statement and physical bind layout after the post compile step.
#[derive(Clone, Default)]
pub struct ExpandedState {
    pub statement: String,
    /// Physical keys in placeholder order, empty for named paramstyles.
    pub positiontup: Vec<String>,
    pub processors: IndexMap<String, BindProcessor>,
    /// Declared type of every physical key.
    pub types: IndexMap<String, SqlType>,
}

impl ExpandedState {
    pub fn processor(&self, key: &str) -> Option<&BindProcessor> {
        self.processors.get(key)
    }
}

enum Rendering {
    Placeholder,
    Literal(String),
    Expanded { keys: Vec<Vec<String>>, tuple: bool },
    EmptySet(String),
}

fn expanding_values(bind: &BindParameter, value: Value) -> Result<Vec<Value>> {
    match value {
        Value::List(values) => Ok(values),
        Value::Null => Ok(Vec::new()),
        v => Err(Error::invalid_request(format!(
            "Expanding bind parameter `{}` requires a list value, got {}",
            bind.key,
            v.type_name()
        ))),
    }
}

/// Expands the post compile binds of `compiled` into physical parameters.
///
/// Expanding binds become `<key>_<n>` (tuples `<key>_<n>_<m>`) inside the
/// parameter group, literal binds are rendered inline and leave the group.
/// It only rewrites more than one group when no such bind exists, batches
/// mixing them are rejected before this point.
pub fn expand_parameters(
    dialect: &dyn Dialect,
    compiled: &dyn CompiledStatement,
    groups: &mut [Parameters],
) -> Result<ExpandedState> {
    let capabilities = dialect.capabilities();
    let registry = dialect.types();
    let mut state = ExpandedState::default();
    for bind in compiled.binds().values().filter(|b| !b.is_postcompile()) {
        state.types.insert(bind.key.clone(), bind.ty.clone());
        if let Some(processor) = registry.bind_processor(&bind.ty) {
            state.processors.insert(bind.key.clone(), processor);
        }
    }
    let statement = compiled.statement();
    if !statement.contains(POSTCOMPILE_PREFIX) {
        state.statement = statement.to_string();
        state.positiontup = compiled.positiontup().to_vec();
        return Ok(state);
    }

    let mut renderings = HashMap::<&str, Rendering>::new();
    for bind in compiled.binds().values() {
        if !bind.is_postcompile() {
            renderings.insert(&bind.key, Rendering::Placeholder);
            continue;
        }
        let value = groups
            .first_mut()
            .and_then(|group| group.shift_remove(&bind.key))
            .unwrap_or_default();
        let processor = registry.bind_processor(&bind.ty);
        let encode = |value: Value| match &processor {
            Some(processor) if !value.is_null() => processor(value),
            _ => Ok(value),
        };
        if bind.literal_execute {
            let mut literal = String::new();
            if bind.expanding {
                let values = expanding_values(bind, value)?;
                if values.is_empty() {
                    literal = dialect.empty_set_expression(&bind.ty);
                } else {
                    let values = values.into_iter().map(encode).collect::<Result<Vec<_>>>()?;
                    separated_by(
                        &mut literal,
                        &values,
                        |out, v| dialect.write_literal(out, v),
                        ", ",
                    );
                }
            } else {
                dialect.write_literal(&mut literal, &encode(value)?);
            }
            renderings.insert(&bind.key, Rendering::Literal(literal));
            continue;
        }
        let values = expanding_values(bind, value)?;
        if values.is_empty() {
            renderings.insert(
                &bind.key,
                Rendering::EmptySet(dialect.empty_set_expression(&bind.ty)),
            );
            continue;
        }
        let mut keys = Vec::with_capacity(values.len());
        let mut expanded = Vec::new();
        match bind.ty.tuple_types() {
            Some(component_types) => {
                let processors = registry.tuple_bind_processors(&bind.ty);
                for (i, element) in values.into_iter().enumerate() {
                    let components = match element {
                        Value::Tuple(v) | Value::List(v) => v,
                        v => {
                            return Err(Error::invalid_request(format!(
                                "Expanding tuple parameter `{}` requires tuple elements, got {}",
                                bind.key,
                                v.type_name()
                            )));
                        }
                    };
                    let mut element_keys = Vec::with_capacity(components.len());
                    for (j, component) in components.into_iter().enumerate() {
                        let key = format!("{}_{}_{}", bind.key, i + 1, j + 1);
                        let n = j % component_types.len().max(1);
                        if let Some(Some(processor)) = processors.get(n) {
                            state.processors.insert(key.clone(), processor.clone());
                        }
                        if let Some(ty) = component_types.get(n) {
                            state.types.insert(key.clone(), ty.clone());
                        }
                        expanded.push((key.clone(), component));
                        element_keys.push(key);
                    }
                    keys.push(element_keys);
                }
                renderings.insert(&bind.key, Rendering::Expanded { keys, tuple: true });
            }
            None => {
                for (i, element) in values.into_iter().enumerate() {
                    let key = format!("{}_{}", bind.key, i + 1);
                    if let Some(processor) = &processor {
                        state.processors.insert(key.clone(), processor.clone());
                    }
                    state.types.insert(key.clone(), bind.ty.clone());
                    expanded.push((key.clone(), element));
                    keys.push(vec![key]);
                }
                renderings.insert(&bind.key, Rendering::Expanded { keys, tuple: false });
            }
        }
        if let Some(group) = groups.first_mut() {
            group.extend(expanded);
        }
    }

    if capabilities.positional() {
        for key in compiled.positiontup() {
            match renderings.get(key.as_str()) {
                Some(Rendering::Literal(..)) | Some(Rendering::EmptySet(..)) => {}
                Some(Rendering::Expanded { keys, .. }) => {
                    state.positiontup.extend(keys.iter().flatten().cloned())
                }
                _ => state.positiontup.push(key.clone()),
            }
        }
    }

    let paramstyle = capabilities.paramstyle;
    let mut out = String::with_capacity(statement.len());
    let mut position = 0;
    let mut rest = statement;
    while let Some(start) = rest.find(POSTCOMPILE_PREFIX) {
        out.push_str(&rest[..start]);
        let after = &rest[start + POSTCOMPILE_PREFIX.len()..];
        let Some(end) = after.find(']') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let key = &after[..end];
        match renderings.get(key) {
            Some(Rendering::Literal(literal)) | Some(Rendering::EmptySet(literal)) => {
                out.push_str(literal)
            }
            Some(Rendering::Expanded { keys, tuple }) => separated_by(
                &mut out,
                keys,
                |out, element| {
                    if *tuple {
                        out.push('(');
                    }
                    separated_by(
                        out,
                        element,
                        |out, key| {
                            position += 1;
                            paramstyle.write_placeholder(out, key, position);
                        },
                        ", ",
                    );
                    if *tuple {
                        out.push(')');
                    }
                },
                ", ",
            ),
            Some(Rendering::Placeholder) => {
                position += 1;
                paramstyle.write_placeholder(&mut out, key, position);
            }
            None => {
                return Err(Error::invalid_request(format!(
                    "Post compile marker `{key}` does not name a bind parameter"
                )));
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    state.statement = out;
    Ok(state)
}

/// Encodes the symbolic groups into the groups sent to the driver.
///
/// Positional groups follow `state.positiontup` exactly, named groups keep
/// the key order of the symbolic group.
pub fn process_parameters(
    dialect: &dyn Dialect,
    state: &ExpandedState,
    groups: &[Parameters],
) -> Result<Vec<DriverParameters>> {
    let encode = |key: &str, value: &Value| -> Result<Value> {
        match state.processor(key) {
            Some(processor) if !value.is_null() => processor(value.clone()),
            _ => Ok(value.clone()),
        }
    };
    groups
        .iter()
        .enumerate()
        .map(|(i, group)| {
            if dialect.capabilities().positional() {
                state
                    .positiontup
                    .iter()
                    .map(|key| match group.get(key) {
                        Some(value) => encode(key, value),
                        None => Err(Error::invalid_request(format!(
                            "No value for bind parameter `{key}` in parameter group {i}"
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(DriverParameters::Positional)
            } else {
                group
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), encode(key, value)?)))
                    .collect::<Result<IndexMap<_, _>>>()
                    .map(DriverParameters::Named)
            }
        })
        .collect()
}

/// Physical parameter list handed to `do_set_input_sizes`, `None` unless the dialect opts in.
pub fn input_sizes(
    dialect: &dyn Dialect,
    state: &ExpandedState,
    group: Option<&Parameters>,
) -> Option<Vec<InputSize>> {
    let capabilities = dialect.capabilities();
    if capabilities.bind_typing != BindTyping::SetInputSizes {
        return None;
    }
    let keys: Vec<&String> = if capabilities.positional() {
        state.positiontup.iter().collect()
    } else {
        group.map(|g| g.keys().collect()).unwrap_or_default()
    };
    Some(
        keys.into_iter()
            .filter_map(|key| {
                let ty = state.types.get(key)?;
                let db_type = ty.db_type()?;
                if let Some(include) = &capabilities.include_set_input_sizes
                    && !include.contains(&db_type)
                {
                    return None;
                }
                if let Some(exclude) = &capabilities.exclude_set_input_sizes
                    && exclude.contains(&db_type)
                {
                    return None;
                }
                Some(InputSize {
                    key: key.clone(),
                    db_type,
                    ty: ty.clone(),
                })
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Capabilities, Compiled, DefaultDialect, ParamStyle, StatementKind, TypeRegistry};
    use time::macros::date;

    fn dialect(paramstyle: ParamStyle) -> DefaultDialect {
        DefaultDialect {
            capabilities: Capabilities {
                paramstyle,
                ..Default::default()
            },
            types: TypeRegistry::text_storage(),
            ..Default::default()
        }
    }

    fn run(
        dialect: &DefaultDialect,
        compiled: &Compiled,
        group: Parameters,
    ) -> (ExpandedState, DriverParameters) {
        let mut groups = vec![group];
        let state = expand_parameters(dialect, compiled, &mut groups).expect("Failed to expand");
        let mut parameters =
            process_parameters(dialect, &state, &groups).expect("Failed to process");
        assert_eq!(parameters.len(), 1);
        (state, parameters.remove(0))
    }

    fn pairs(paramstyle: ParamStyle) -> Compiled {
        Compiled::builder(StatementKind::Select, paramstyle)
            .sql("SELECT * FROM t WHERE (a, b) IN (")
            .bind(
                BindParameter::new("ab", SqlType::Tuple(vec![SqlType::Integer, SqlType::Date]))
                    .expanding(),
            )
            .sql(") AND y = ")
            .bind(BindParameter::new("y", SqlType::Integer))
            .build()
    }

    fn pairs_group() -> Parameters {
        Parameters::from_iter([
            (
                "ab".to_string(),
                Value::List(vec![
                    Value::Tuple(vec![Value::Int64(1), Value::Date(date!(2020 - 01 - 01))]),
                    Value::Tuple(vec![Value::Int64(2), Value::Date(date!(2021 - 02 - 03))]),
                ]),
            ),
            ("y".to_string(), Value::Int64(9)),
        ])
    }

    fn encoded_pairs() -> Vec<Value> {
        vec![
            Value::Int64(1),
            Value::Varchar("2020-01-01".into()),
            Value::Int64(2),
            Value::Varchar("2021-02-03".into()),
            Value::Int64(9),
        ]
    }

    #[test]
    fn tuples_with_mixed_components() {
        let dialect = dialect(ParamStyle::Qmark);
        let (state, parameters) = run(&dialect, &pairs(ParamStyle::Qmark), pairs_group());
        assert_eq!(
            state.statement,
            "SELECT * FROM t WHERE (a, b) IN ((?, ?), (?, ?)) AND y = ?"
        );
        assert_eq!(state.positiontup, ["ab_1_1", "ab_1_2", "ab_2_1", "ab_2_2", "y"]);
        assert_eq!(state.types.get("ab_1_1"), Some(&SqlType::Integer));
        assert_eq!(state.types.get("ab_2_2"), Some(&SqlType::Date));
        assert_eq!(parameters, DriverParameters::Positional(encoded_pairs()));

        let dialect = self::dialect(ParamStyle::Numeric);
        let (state, parameters) = run(&dialect, &pairs(ParamStyle::Numeric), pairs_group());
        assert_eq!(
            state.statement,
            "SELECT * FROM t WHERE (a, b) IN ((:1, :2), (:3, :4)) AND y = :5"
        );
        assert_eq!(state.positiontup, ["ab_1_1", "ab_1_2", "ab_2_1", "ab_2_2", "y"]);
        assert_eq!(parameters, DriverParameters::Positional(encoded_pairs()));

        let dialect = self::dialect(ParamStyle::Named);
        let (state, parameters) = run(&dialect, &pairs(ParamStyle::Named), pairs_group());
        assert_eq!(
            state.statement,
            "SELECT * FROM t WHERE (a, b) IN ((:ab_1_1, :ab_1_2), (:ab_2_1, :ab_2_2)) AND y = :y"
        );
        assert!(state.positiontup.is_empty());
        let DriverParameters::Named(named) = parameters else {
            panic!("Expected named parameters");
        };
        assert_eq!(named.len(), 5);
        assert!(!named.contains_key("ab"));
        for (key, value) in ["ab_1_1", "ab_1_2", "ab_2_1", "ab_2_2", "y"]
            .into_iter()
            .zip(encoded_pairs())
        {
            assert_eq!(named.get(key), Some(&value), "{key}");
        }
    }

    #[test]
    fn empty_lists_render_the_empty_set() {
        let dialect = dialect(ParamStyle::Qmark);
        let compiled = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT * FROM t WHERE x IN (")
            .bind(
                BindParameter::new("x", SqlType::Integer)
                    .expanding()
                    .literal_execute(),
            )
            .sql(") AND (a, b) IN (")
            .bind(
                BindParameter::new("ab", SqlType::Tuple(vec![SqlType::Integer, SqlType::Text]))
                    .expanding(),
            )
            .sql(") AND z = ")
            .bind(BindParameter::new("z", SqlType::Integer))
            .build();
        let group = |x: Vec<Value>| {
            Parameters::from_iter([
                ("x".to_string(), Value::List(x)),
                ("ab".to_string(), Value::List(Vec::new())),
                ("z".to_string(), Value::Int64(3)),
            ])
        };

        let (state, parameters) = run(&dialect, &compiled, group(Vec::new()));
        assert_eq!(
            state.statement,
            "SELECT * FROM t WHERE x IN (SELECT 1 WHERE 1!=1) AND (a, b) IN (SELECT 1, 1 WHERE 1!=1) AND z = ?"
        );
        assert_eq!(state.positiontup, ["z"]);
        assert_eq!(parameters, DriverParameters::Positional(vec![Value::Int64(3)]));

        let (state, parameters) = run(
            &dialect,
            &compiled,
            group(vec![Value::Int64(1), Value::Int64(2)]),
        );
        assert_eq!(
            state.statement,
            "SELECT * FROM t WHERE x IN (1, 2) AND (a, b) IN (SELECT 1, 1 WHERE 1!=1) AND z = ?"
        );
        assert_eq!(parameters, DriverParameters::Positional(vec![Value::Int64(3)]));
    }
}
