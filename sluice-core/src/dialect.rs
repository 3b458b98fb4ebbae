use crate::{
    Capabilities, DialectRuntime, DriverConnection, DriverCursor, DriverParameters, DriverResult,
    Error, IdentifierPreparer, InputSize, IsolationLevel, QuotedName, Result, Sequence, SqlType,
    TypeRegistry, Value, separated_by,
};
use std::fmt::Write;

macro_rules! write_integer {
    ($out:ident, $value:expr) => {{
        let mut buffer = itoa::Buffer::new();
        $out.push_str(buffer.format($value));
    }};
}
macro_rules! write_float {
    ($out:ident, $value:expr) => {{
        let value = $value;
        if value.is_finite() {
            let mut buffer = ryu::Buffer::new();
            $out.push_str(buffer.format_finite(value));
        } else if value.is_nan() {
            $out.push_str("'NaN'");
        } else {
            $out.push_str(if value > 0.0 { "'Infinity'" } else { "'-Infinity'" });
        }
    }};
}

/// Backend descriptor: a static capability table and the hooks that drive the driver.
///
/// Behavior is selected by reading [`Capabilities`], every hook has a default
/// that speaks plain SQL through the driver interface. Implementations are
/// shared by all the connections of an engine.
pub trait Dialect: Send + Sync {
    fn capabilities(&self) -> &Capabilities;

    fn runtime(&self) -> &DialectRuntime;

    fn preparer(&self) -> &IdentifierPreparer;

    fn types(&self) -> &TypeRegistry;

    fn name(&self) -> &str {
        &self.capabilities().name
    }

    /// Runs once on the first connection, detects the per dialect runtime state.
    fn initialize(&self, connection: &mut dyn DriverConnection) -> Result<()> {
        let runtime = self.runtime();
        if runtime.is_initialized() {
            return Ok(());
        }
        runtime.set_server_version(self.server_version_info(connection)?);
        runtime.set_default_schema_name(self.default_schema_name(connection)?);
        runtime.set_default_isolation_level(self.default_isolation_level(connection)?);
        let detected = self.detect_max_identifier_length(connection)?;
        runtime.set_max_identifier_length(detected);
        let capabilities = self.capabilities();
        if let Some(detected) = detected
            && capabilities.label_length() > detected
        {
            return Err(Error::argument(format!(
                "Label length of {} is greater than the maximum identifier length of {} reported by the server",
                capabilities.label_length(),
                detected
            )));
        }
        log::debug!(
            "Initialized dialect {}, server version {:?}, default schema {:?}",
            self.name(),
            runtime.server_version(),
            runtime.default_schema_name()
        );
        Ok(())
    }

    fn server_version_info(&self, _connection: &mut dyn DriverConnection) -> Result<Option<String>> {
        Ok(None)
    }

    fn default_schema_name(&self, _connection: &mut dyn DriverConnection) -> Result<Option<String>> {
        Ok(None)
    }

    fn default_isolation_level(
        &self,
        connection: &mut dyn DriverConnection,
    ) -> Result<Option<IsolationLevel>> {
        self.get_isolation_level(connection)
    }

    fn detect_max_identifier_length(
        &self,
        _connection: &mut dyn DriverConnection,
    ) -> Result<Option<usize>> {
        Ok(None)
    }

    fn do_begin(&self, connection: &mut dyn DriverConnection) -> DriverResult<()> {
        connection.begin()
    }

    fn do_commit(&self, connection: &mut dyn DriverConnection) -> DriverResult<()> {
        connection.commit()
    }

    fn do_rollback(&self, connection: &mut dyn DriverConnection) -> DriverResult<()> {
        connection.rollback()
    }

    fn do_close(&self, connection: &mut dyn DriverConnection) -> DriverResult<()> {
        connection.close()
    }

    /// False when the connection is gone, other failures propagate.
    fn do_ping(&self, connection: &mut dyn DriverConnection) -> DriverResult<bool> {
        let result = self.create_cursor(connection).and_then(|mut cursor| {
            let result = cursor.execute_no_params("SELECT 1");
            crate::log_failure!(cursor.close(), "Could not close the ping cursor");
            result
        });
        match result {
            Ok(()) => Ok(true),
            Err(e) if self.is_disconnect(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn do_savepoint(&self, connection: &mut dyn DriverConnection, name: &str) -> DriverResult<()> {
        let statement = format!("SAVEPOINT {}", self.preparer().quote(&name.into()));
        execute_simple(self, connection, &statement)
    }

    fn do_rollback_to_savepoint(
        &self,
        connection: &mut dyn DriverConnection,
        name: &str,
    ) -> DriverResult<()> {
        let statement = format!(
            "ROLLBACK TO SAVEPOINT {}",
            self.preparer().quote(&name.into())
        );
        execute_simple(self, connection, &statement)
    }

    fn do_release_savepoint(
        &self,
        connection: &mut dyn DriverConnection,
        name: &str,
    ) -> DriverResult<()> {
        let statement = format!("RELEASE SAVEPOINT {}", self.preparer().quote(&name.into()));
        execute_simple(self, connection, &statement)
    }

    fn do_execute(
        &self,
        cursor: &mut dyn DriverCursor,
        statement: &str,
        parameters: &DriverParameters,
    ) -> DriverResult<()> {
        cursor.execute(statement, parameters)
    }

    fn do_executemany(
        &self,
        cursor: &mut dyn DriverCursor,
        statement: &str,
        parameters: &[DriverParameters],
    ) -> DriverResult<()> {
        cursor.executemany(statement, parameters)
    }

    fn do_execute_no_params(&self, cursor: &mut dyn DriverCursor, statement: &str) -> DriverResult<()> {
        cursor.execute_no_params(statement)
    }

    fn create_cursor(&self, connection: &mut dyn DriverConnection) -> DriverResult<Box<dyn DriverCursor>> {
        connection.cursor()
    }

    /// Streaming cursor, only called when `supports_server_side_cursors` is set.
    fn create_server_side_cursor(
        &self,
        _connection: &mut dyn DriverConnection,
    ) -> DriverResult<Box<dyn DriverCursor>> {
        Err(Error::not_supported(format!(
            "Dialect {} does not implement server side cursors",
            self.name()
        ))
        .into())
    }

    /// Classifies a driver error, `true` means the connection is no longer usable.
    fn is_disconnect(&self, _error: &anyhow::Error) -> bool {
        false
    }

    fn get_lastrowid(&self, cursor: &mut dyn DriverCursor) -> DriverResult<Option<i64>> {
        cursor.lastrowid()
    }

    fn next_value_sql(&self, sequence: &Sequence) -> String {
        format!(
            "SELECT NEXT VALUE FOR {}",
            self.preparer()
                .format_qualified(sequence.schema.as_deref(), &sequence.name)
        )
    }

    /// Next value of `sequence`, fetched on the cursor of the running statement.
    fn fire_sequence(
        &self,
        cursor: &mut dyn DriverCursor,
        sequence: &Sequence,
        _ty: &SqlType,
    ) -> DriverResult<Value> {
        if !self.capabilities().supports_sequences {
            return Err(Error::not_supported(format!(
                "Dialect {} does not support sequences",
                self.name()
            ))
            .into());
        }
        let statement = self.next_value_sql(sequence);
        self.do_execute_no_params(cursor, &statement)?;
        Ok(cursor
            .fetchone()?
            .and_then(|row| row.into_vec().into_iter().next())
            .unwrap_or_default())
    }

    fn set_isolation_level(
        &self,
        _connection: &mut dyn DriverConnection,
        level: &IsolationLevel,
    ) -> DriverResult<()> {
        Err(Error::not_supported(format!(
            "Dialect {} cannot set the isolation level {}",
            self.name(),
            level
        ))
        .into())
    }

    /// Current level of the connection, `None` when the dialect cannot tell.
    fn get_isolation_level(
        &self,
        _connection: &mut dyn DriverConnection,
    ) -> Result<Option<IsolationLevel>> {
        Ok(None)
    }

    /// Levels accepted by `set_isolation_level`, `None` accepts any.
    fn isolation_level_values(&self) -> Option<&[IsolationLevel]> {
        None
    }

    /// Checks a level against the advertised values.
    fn validate_isolation_level(&self, level: &IsolationLevel) -> Result<()> {
        match self.isolation_level_values() {
            Some(allowed) if !allowed.contains(level) => {
                let mut valid = String::new();
                separated_by(&mut valid, allowed, |out, v| out.push_str(v.as_str()), ", ");
                Err(Error::argument(format!(
                    "Invalid value `{}` for isolation_level. Valid isolation levels for `{}` are {}",
                    level,
                    self.name(),
                    valid
                )))
            }
            _ => Ok(()),
        }
    }

    fn do_set_input_sizes(&self, cursor: &mut dyn DriverCursor, sizes: &[InputSize]) -> DriverResult<()> {
        cursor.set_input_sizes(sizes)
    }

    fn validate_identifier(&self, identifier: &str) -> Result<()> {
        let max = self
            .runtime()
            .max_identifier_length()
            .unwrap_or(self.capabilities().max_identifier_length);
        if identifier.chars().count() > max {
            return Err(Error::Identifier(format!(
                "Identifier `{identifier}` exceeds maximum length of {max} characters"
            )));
        }
        Ok(())
    }

    /// Left untouched unless the backend folds names to upper case.
    fn normalize_name(&self, name: &str) -> QuotedName {
        if !self.capabilities().requires_name_normalize {
            return QuotedName::plain(name);
        }
        self.preparer().normalize_name(name)
    }

    fn denormalize_name(&self, name: &QuotedName) -> String {
        if !self.capabilities().requires_name_normalize {
            return name.to_string();
        }
        self.preparer().denormalize_name(name)
    }

    /// Subquery selecting no rows, rendered in place of an empty IN list.
    fn empty_set_expression(&self, ty: &SqlType) -> String {
        let columns = ty.tuple_types().map(|t| t.len()).unwrap_or(1).max(1);
        let mut out = String::from("SELECT ");
        separated_by(&mut out, 0..columns, |out, _| out.push('1'), ", ");
        out.push_str(" WHERE 1!=1");
        out
    }

    /// Literal rendering of a `literal_execute` bind.
    fn write_literal(&self, out: &mut String, value: &Value) {
        match value {
            Value::Null => out.push_str("NULL"),
            Value::Boolean(v) => {
                if self.capabilities().supports_native_boolean {
                    out.push_str(["false", "true"][*v as usize])
                } else {
                    out.push(['0', '1'][*v as usize])
                }
            }
            Value::Int64(v) => write_integer!(out, *v),
            Value::Float64(v) => write_float!(out, *v),
            Value::Decimal(v) => drop(write!(out, "{}", v)),
            Value::Varchar(v) => self.write_literal_string(out, v),
            Value::Blob(v) => self.write_literal_blob(out, v),
            Value::Date(v) => self.write_literal_string(out, &crate::format_date(v)),
            Value::Time(v) => self.write_literal_string(out, &crate::format_time(v)),
            Value::Timestamp(v) => self.write_literal_string(out, &crate::format_timestamp(v)),
            Value::Uuid(v) => drop(write!(out, "'{}'", v.hyphenated())),
            Value::List(v) | Value::Tuple(v) => {
                out.push('(');
                separated_by(out, v, |out, v| self.write_literal(out, v), ", ");
                out.push(')');
            }
        }
    }

    fn write_literal_string(&self, out: &mut String, value: &str) {
        out.push('\'');
        let mut position = 0;
        for (i, c) in value.char_indices() {
            if c == '\'' {
                out.push_str(&value[position..i]);
                out.push_str("''");
                position = i + 1;
            }
        }
        out.push_str(&value[position..]);
        out.push('\'');
    }

    fn write_literal_blob(&self, out: &mut String, value: &[u8]) {
        out.push_str("X'");
        out.push_str(&hex::encode_upper(value));
        out.push('\'');
    }

    /// Random two phase transaction id.
    fn create_xid(&self) -> String {
        format!("_sl_{}", uuid::Uuid::new_v4().simple())
    }

    /// Values of OUT parameters after a procedure call.
    fn get_out_parameter_values(
        &self,
        _cursor: &mut dyn DriverCursor,
        _names: &[String],
    ) -> Result<Vec<Value>> {
        Err(Error::not_supported(format!(
            "Dialect {} does not support OUT parameters",
            self.name()
        )))
    }
}

/// Runs a statement without parameters on a fresh cursor.
pub fn execute_simple<D: Dialect + ?Sized>(
    dialect: &D,
    connection: &mut dyn DriverConnection,
    statement: &str,
) -> DriverResult<()> {
    let mut cursor = dialect.create_cursor(connection)?;
    let result = dialect.do_execute_no_params(cursor.as_mut(), statement);
    crate::log_failure!(cursor.close(), "Could not close the cursor of `{}`", statement);
    result
}

/// Dialect made of a capability table only, every hook keeps its default.
#[derive(Debug, Default)]
pub struct DefaultDialect {
    pub capabilities: Capabilities,
    pub runtime: DialectRuntime,
    pub preparer: IdentifierPreparer,
    pub types: TypeRegistry,
}

impl DefaultDialect {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }
}

impl Dialect for DefaultDialect {
    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }
    fn runtime(&self) -> &DialectRuntime {
        &self.runtime
    }
    fn preparer(&self) -> &IdentifierPreparer {
        &self.preparer
    }
    fn types(&self) -> &TypeRegistry {
        &self.types
    }
}
