use crate::{
    Error, ParamStyle, Parameters, Result, Row, RowContext, SqlType, TypeRegistry, Value,
};
use indexmap::IndexMap;
use std::{fmt, sync::Arc, time::Instant};

/// Marker left in the statement for binds rendered at execution time.
pub const POSTCOMPILE_PREFIX: &str = "__[POSTCOMPILE_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Ddl,
    Text,
}

impl StatementKind {
    pub fn is_crud(self) -> bool {
        matches!(
            self,
            StatementKind::Insert | StatementKind::Update | StatementKind::Delete
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindParameter {
    pub key: String,
    pub ty: SqlType,
    pub value: Option<Value>,
    pub required: bool,
    /// Binds a list, one placeholder per element.
    pub expanding: bool,
    /// Rendered inline as a literal instead of being sent as a parameter.
    pub literal_execute: bool,
}

impl BindParameter {
    pub fn new(key: impl Into<String>, ty: SqlType) -> Self {
        Self {
            key: key.into(),
            ty,
            value: None,
            required: false,
            expanding: false,
            literal_execute: false,
        }
    }
    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
    pub fn expanding(mut self) -> Self {
        self.expanding = true;
        self
    }
    pub fn literal_execute(mut self) -> Self {
        self.literal_execute = true;
        self
    }
    pub(crate) fn is_postcompile(&self) -> bool {
        self.expanding || self.literal_execute
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sequence {
    pub name: String,
    pub schema: Option<String>,
    /// Only fired on backends that need a sequence to generate keys.
    pub optional: bool,
}

impl Sequence {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            optional: false,
        }
    }
}

/// Default evaluated in process, `Ok(None)` means the callable produced no value.
pub type DefaultCallable = Arc<dyn Fn(&RowContext) -> Result<Option<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum ColumnDefault {
    Scalar(Value),
    Callable(DefaultCallable),
    /// SQL expression compiled as a standalone `SELECT <expr>`.
    Clause(Arc<Compiled>),
    Sequence(Sequence),
}

impl ColumnDefault {
    pub fn callable<F>(f: F) -> Self
    where
        F: Fn(&RowContext) -> Result<Option<Value>> + Send + Sync + 'static,
    {
        ColumnDefault::Callable(Arc::new(f))
    }
    pub fn is_scalar(&self) -> bool {
        matches!(self, ColumnDefault::Scalar(..))
    }
}

impl fmt::Debug for ColumnDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnDefault::Scalar(v) => f.debug_tuple("Scalar").field(v).finish(),
            ColumnDefault::Callable(..) => f.write_str("Callable"),
            ColumnDefault::Clause(v) => f.debug_tuple("Clause").field(&v.statement).finish(),
            ColumnDefault::Sequence(v) => f.debug_tuple("Sequence").field(v).finish(),
        }
    }
}

/// Column whose value is generated locally before the statement runs.
#[derive(Debug, Clone)]
pub struct Column {
    pub key: String,
    pub ty: SqlType,
    pub default: Option<ColumnDefault>,
    pub onupdate: Option<ColumnDefault>,
}

impl Column {
    pub fn new(key: impl Into<String>, ty: SqlType) -> Self {
        Self {
            key: key.into(),
            ty,
            default: None,
            onupdate: None,
        }
    }
    pub fn default(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }
    pub fn onupdate(mut self, onupdate: ColumnDefault) -> Self {
        self.onupdate = Some(onupdate);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKeyColumn {
    pub key: String,
    pub ty: SqlType,
    pub autoincrement: bool,
}

impl PrimaryKeyColumn {
    pub fn new(key: impl Into<String>, ty: SqlType) -> Self {
        Self {
            key: key.into(),
            ty,
            autoincrement: false,
        }
    }
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }
}

/// Output of the statement compiler, consumed by the execution context.
///
/// Implementors hand over the SQL text with the placeholders of the dialect
/// paramstyle. Expanding and literal binds appear as `__[POSTCOMPILE_<key>]`
/// markers; on numeric paramstyles every bind does, in `positiontup` order.
pub trait CompiledStatement: Send + Sync {
    fn statement(&self) -> &str;

    fn kind(&self) -> StatementKind;

    fn binds(&self) -> &IndexMap<String, BindParameter>;

    /// Bind keys in placeholder order, a key repeats when its bind appears twice.
    fn positiontup(&self) -> &[String];

    fn construct_params(
        &self,
        group: Option<&Parameters>,
        group_number: Option<usize>,
        extracted: Option<&[Value]>,
    ) -> Result<Parameters>;

    fn insert_prefetch(&self) -> &[Column];

    fn update_prefetch(&self) -> &[Column];

    /// Columns with server side defaults, fetched after the statement.
    fn postfetch(&self) -> &[String];

    fn primary_key(&self) -> &[PrimaryKeyColumn];

    /// Column keys of the RETURNING clause.
    fn returning(&self) -> &[String];

    fn explicit_returning(&self) -> bool;

    fn implicit_returning(&self) -> bool;

    /// Types of the result columns, aligned with the row.
    fn result_types(&self) -> &[SqlType];

    fn postfetch_lastrowid(&self) -> bool;

    fn has_schema_translates(&self) -> bool;

    fn generated_at(&self) -> Instant;

    fn is_postcompile(&self) -> bool {
        self.binds().values().any(BindParameter::is_postcompile)
    }

    /// Primary key of an inserted row, from the driver last row id and the row parameters.
    fn inserted_primary_key_from_lastrowid(
        &self,
        lastrowid: Option<i64>,
        parameters: &Parameters,
        types: &TypeRegistry,
    ) -> Result<Row> {
        self.primary_key()
            .iter()
            .map(|column| {
                let supplied = parameters
                    .get(&column.key)
                    .filter(|v| !v.is_null())
                    .cloned();
                match (column.autoincrement, supplied, lastrowid) {
                    (_, Some(value), _) => Ok(value),
                    (true, None, Some(id)) => types.process_result(&column.ty, Value::Int64(id)),
                    _ => Ok(Value::Null),
                }
            })
            .collect()
    }

    /// Primary key of an inserted row, from a row returned by RETURNING.
    fn inserted_primary_key_from_returning(
        &self,
        row: &[Value],
        parameters: &Parameters,
    ) -> Result<Row> {
        let returning = self.returning();
        Ok(self
            .primary_key()
            .iter()
            .map(|column| {
                returning
                    .iter()
                    .position(|v| *v == column.key)
                    .and_then(|i| row.get(i))
                    .or_else(|| parameters.get(&column.key))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct Compiled {
    statement: String,
    kind: StatementKind,
    binds: IndexMap<String, BindParameter>,
    positiontup: Vec<String>,
    insert_prefetch: Vec<Column>,
    update_prefetch: Vec<Column>,
    postfetch: Vec<String>,
    primary_key: Vec<PrimaryKeyColumn>,
    returning: Vec<String>,
    explicit_returning: bool,
    implicit_returning: bool,
    result_types: Vec<SqlType>,
    postfetch_lastrowid: bool,
    schema_translates: bool,
    cache_key_binds: Vec<String>,
    generated_at: Instant,
}

impl Compiled {
    pub fn builder(kind: StatementKind, paramstyle: ParamStyle) -> CompiledBuilder {
        CompiledBuilder {
            paramstyle,
            compiled: Compiled {
                statement: String::new(),
                kind,
                binds: IndexMap::new(),
                positiontup: Vec::new(),
                insert_prefetch: Vec::new(),
                update_prefetch: Vec::new(),
                postfetch: Vec::new(),
                primary_key: Vec::new(),
                returning: Vec::new(),
                explicit_returning: false,
                implicit_returning: false,
                result_types: Vec::new(),
                postfetch_lastrowid: false,
                schema_translates: false,
                cache_key_binds: Vec::new(),
                generated_at: Instant::now(),
            },
        }
    }
}

impl CompiledStatement for Compiled {
    fn statement(&self) -> &str {
        &self.statement
    }
    fn kind(&self) -> StatementKind {
        self.kind
    }
    fn binds(&self) -> &IndexMap<String, BindParameter> {
        &self.binds
    }
    fn positiontup(&self) -> &[String] {
        &self.positiontup
    }
    fn construct_params(
        &self,
        group: Option<&Parameters>,
        group_number: Option<usize>,
        extracted: Option<&[Value]>,
    ) -> Result<Parameters> {
        let extracted = extracted.map(|values| {
            self.cache_key_binds
                .iter()
                .zip(values)
                .collect::<IndexMap<_, _>>()
        });
        self.binds
            .values()
            .map(|bind| {
                let value = group
                    .and_then(|g| g.get(&bind.key))
                    .or_else(|| extracted.as_ref().and_then(|e| e.get(&bind.key).copied()))
                    .or(bind.value.as_ref());
                match value {
                    Some(value) => Ok((bind.key.clone(), value.clone())),
                    None if bind.required => Err(Error::invalid_request(match group_number {
                        Some(n) => format!(
                            "A value is required for bind parameter `{}`, in parameter group {}",
                            bind.key, n
                        ),
                        None => format!("A value is required for bind parameter `{}`", bind.key),
                    })),
                    None => Ok((bind.key.clone(), Value::Null)),
                }
            })
            .collect()
    }
    fn insert_prefetch(&self) -> &[Column] {
        &self.insert_prefetch
    }
    fn update_prefetch(&self) -> &[Column] {
        &self.update_prefetch
    }
    fn postfetch(&self) -> &[String] {
        &self.postfetch
    }
    fn primary_key(&self) -> &[PrimaryKeyColumn] {
        &self.primary_key
    }
    fn returning(&self) -> &[String] {
        &self.returning
    }
    fn explicit_returning(&self) -> bool {
        self.explicit_returning
    }
    fn implicit_returning(&self) -> bool {
        self.implicit_returning
    }
    fn result_types(&self) -> &[SqlType] {
        &self.result_types
    }
    fn postfetch_lastrowid(&self) -> bool {
        self.postfetch_lastrowid
    }
    fn has_schema_translates(&self) -> bool {
        self.schema_translates
    }
    fn generated_at(&self) -> Instant {
        self.generated_at
    }
}

/// Assembles a [`Compiled`] the way a statement compiler renders it.
#[derive(Debug)]
pub struct CompiledBuilder {
    paramstyle: ParamStyle,
    compiled: Compiled,
}

impl CompiledBuilder {
    pub fn sql(mut self, sql: &str) -> Self {
        self.compiled.statement.push_str(sql);
        self
    }

    /// Renders the placeholder of `bind` and registers it, a key seen before reuses its bind.
    pub fn bind(mut self, bind: BindParameter) -> Self {
        let compiled = &mut self.compiled;
        let postcompile = bind.is_postcompile() || self.paramstyle.is_numeric();
        if postcompile {
            compiled.statement.push_str(POSTCOMPILE_PREFIX);
            compiled.statement.push_str(&bind.key);
            compiled.statement.push(']');
        } else {
            let position = compiled.positiontup.len() + 1;
            self.paramstyle
                .write_placeholder(&mut compiled.statement, &bind.key, position);
        }
        if self.paramstyle.is_positional() {
            compiled.positiontup.push(bind.key.clone());
        }
        compiled.binds.entry(bind.key.clone()).or_insert(bind);
        self
    }

    /// Token rendered in place of a schema name, resolved by the schema translate map.
    pub fn schema(mut self, schema: Option<&str>) -> Self {
        let compiled = &mut self.compiled;
        compiled.schema_translates = true;
        compiled.statement.push_str(crate::SCHEMA_TOKEN_PREFIX);
        compiled
            .statement
            .push_str(schema.unwrap_or(crate::SCHEMA_TOKEN_NONE));
        compiled.statement.push(']');
        self
    }

    pub fn insert_prefetch(mut self, column: Column) -> Self {
        self.compiled.insert_prefetch.push(column);
        self
    }

    pub fn update_prefetch(mut self, column: Column) -> Self {
        self.compiled.update_prefetch.push(column);
        self
    }

    pub fn postfetch(mut self, key: impl Into<String>) -> Self {
        self.compiled.postfetch.push(key.into());
        self
    }

    pub fn primary_key(mut self, column: PrimaryKeyColumn) -> Self {
        self.compiled.primary_key.push(column);
        self
    }

    /// RETURNING clause requested by the caller.
    pub fn returning<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.compiled.explicit_returning = true;
        self.compiled
            .returning
            .extend(columns.into_iter().map(Into::into));
        self
    }

    /// RETURNING clause added only to retrieve generated values.
    pub fn implicit_returning<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.compiled.implicit_returning = true;
        self.compiled
            .returning
            .extend(columns.into_iter().map(Into::into));
        self
    }

    pub fn result_types(mut self, types: impl IntoIterator<Item = SqlType>) -> Self {
        self.compiled.result_types.extend(types);
        self
    }

    pub fn postfetch_lastrowid(mut self, postfetch_lastrowid: bool) -> Self {
        self.compiled.postfetch_lastrowid = postfetch_lastrowid;
        self
    }

    /// Binds whose values travel with the cache key, in the order the extracted values come.
    pub fn cache_key_binds<S: Into<String>>(mut self, keys: impl IntoIterator<Item = S>) -> Self {
        self.compiled
            .cache_key_binds
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn build(mut self) -> Compiled {
        self.compiled.generated_at = Instant::now();
        self.compiled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_insert(paramstyle: ParamStyle) -> Compiled {
        Compiled::builder(StatementKind::Insert, paramstyle)
            .sql("INSERT INTO users (id, name) VALUES (")
            .bind(BindParameter::new("id", SqlType::Integer))
            .sql(", ")
            .bind(BindParameter::new("name", SqlType::Text).required())
            .sql(")")
            .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer).autoincrement())
            .build()
    }

    #[test]
    fn placeholders_by_paramstyle() {
        assert_eq!(
            users_insert(ParamStyle::Qmark).statement(),
            "INSERT INTO users (id, name) VALUES (?, ?)"
        );
        assert_eq!(
            users_insert(ParamStyle::Named).statement(),
            "INSERT INTO users (id, name) VALUES (:id, :name)"
        );
        assert_eq!(users_insert(ParamStyle::Named).positiontup().len(), 0);
        let numeric = users_insert(ParamStyle::Numeric);
        assert_eq!(
            numeric.statement(),
            "INSERT INTO users (id, name) VALUES (__[POSTCOMPILE_id], __[POSTCOMPILE_name])"
        );
        assert_eq!(numeric.positiontup(), ["id", "name"]);
    }

    #[test]
    fn construct_params_requires_values() {
        let compiled = users_insert(ParamStyle::Qmark);
        let group = Parameters::from_iter([("name".to_string(), Value::from("a"))]);
        let params = compiled
            .construct_params(Some(&group), Some(0), None)
            .unwrap();
        assert_eq!(params["id"], Value::Null);
        assert_eq!(params["name"], Value::Varchar("a".into()));
        let Err(Error::InvalidRequest(message)) =
            compiled.construct_params(Some(&Parameters::new()), Some(3), None)
        else {
            panic!("Expected an invalid request error");
        };
        assert!(message.contains("`name`"));
        assert!(message.contains("group 3"));
    }

    #[test]
    fn construct_params_extracted_values() {
        let compiled = Compiled::builder(StatementKind::Select, ParamStyle::Qmark)
            .sql("SELECT * FROM t WHERE a = ")
            .bind(BindParameter::new("a", SqlType::Integer).value(1))
            .sql(" AND b = ")
            .bind(BindParameter::new("b", SqlType::Integer).value(2))
            .cache_key_binds(["a", "b"])
            .build();
        let params = compiled
            .construct_params(None, None, Some(&[Value::Int64(10), Value::Int64(20)]))
            .unwrap();
        assert_eq!(
            params.values().cloned().collect::<Vec<_>>(),
            [Value::Int64(10), Value::Int64(20)]
        );
        let group = Parameters::from_iter([("b".to_string(), Value::Int64(7))]);
        let params = compiled.construct_params(Some(&group), None, None).unwrap();
        assert_eq!(params["a"], Value::Int64(1));
        assert_eq!(params["b"], Value::Int64(7));
    }

    #[test]
    fn primary_key_getters() {
        let compiled = users_insert(ParamStyle::Qmark);
        let types = TypeRegistry::new();
        let params = Parameters::from_iter([
            ("id".to_string(), Value::Null),
            ("name".to_string(), Value::from("a")),
        ]);
        assert_eq!(
            &*compiled
                .inserted_primary_key_from_lastrowid(Some(7), &params, &types)
                .unwrap(),
            [Value::Int64(7)]
        );
        let supplied = Parameters::from_iter([("id".to_string(), Value::Int64(3))]);
        assert_eq!(
            &*compiled
                .inserted_primary_key_from_lastrowid(Some(7), &supplied, &types)
                .unwrap(),
            [Value::Int64(3)]
        );
        let returning = Compiled::builder(StatementKind::Insert, ParamStyle::Qmark)
            .sql("INSERT INTO t (name) VALUES (?) RETURNING id")
            .primary_key(PrimaryKeyColumn::new("id", SqlType::Integer))
            .implicit_returning(["id"])
            .build();
        assert_eq!(
            &*returning
                .inserted_primary_key_from_returning(&[Value::Int64(11)], &params)
                .unwrap(),
            [Value::Int64(11)]
        );
    }
}
