use crate::connection::CLOSED_DATABASE;
use libsqlite3_sys::sqlite3_libversion;
use sluice_core::{
    Capabilities, Dialect, DialectOptions, DialectRuntime, DriverConnection, DriverResult, Error,
    IdentifierPreparer, IsolationLevel, ParamStyle, Result, SqlType, TypeRegistry, Value,
    classify_driver_error, execute_simple, separated_by,
};
use std::ffi::CStr;

static ISOLATION_LEVELS: [IsolationLevel; 2] =
    [IsolationLevel::ReadUncommitted, IsolationLevel::Serializable];

const RESERVED_WORDS: [&str; 33] = [
    "abort", "after", "analyze", "attach", "autoincrement", "conflict", "database", "detach",
    "exclusive", "explain", "fail", "glob", "ignore", "index", "indexed", "instead", "isnull",
    "key", "notnull", "offset", "plan", "pragma", "query", "raise", "regexp", "reindex", "rename",
    "replace", "restrict", "temp", "temporary", "vacuum", "virtual",
];

/// Dialect of the bundled sqlite library.
///
/// Booleans are stored as integers and temporal, decimal and uuid values as
/// text. Isolation is switched with `PRAGMA read_uncommitted`.
#[derive(Debug)]
pub struct SqliteDialect {
    capabilities: Capabilities,
    runtime: DialectRuntime,
    preparer: IdentifierPreparer,
    types: TypeRegistry,
}

impl SqliteDialect {
    pub fn new() -> Self {
        Self::from_capabilities(Self::default_capabilities())
    }

    /// Dialect configured by user options, typically read from the connection URL.
    pub fn with_options(options: &DialectOptions) -> Result<Self> {
        let capabilities = Self::default_capabilities().configure(options)?;
        if matches!(
            capabilities.paramstyle,
            ParamStyle::Format | ParamStyle::Pyformat
        ) {
            return Err(Error::argument(format!(
                "Paramstyle `{}` is not understood by sqlite",
                capabilities.paramstyle
            )));
        }
        Ok(Self::from_capabilities(capabilities))
    }

    fn default_capabilities() -> Capabilities {
        Capabilities {
            name: "sqlite".into(),
            driver: "libsqlite3".into(),
            paramstyle: ParamStyle::Qmark,
            implicit_returning: true,
            insert_executemany_returning: false,
            postfetch_lastrowid: true,
            supports_native_boolean: false,
            supports_server_side_cursors: false,
            supports_sequences: false,
            supports_sane_rowcount: true,
            supports_sane_multi_rowcount: true,
            ..Default::default()
        }
    }

    fn from_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            runtime: DialectRuntime::default(),
            preparer: IdentifierPreparer::new().with_reserved_words(RESERVED_WORDS),
            types: TypeRegistry::text_storage().with_integer_booleans(),
        }
    }
}

impl Default for SqliteDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl Dialect for SqliteDialect {
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

    fn server_version_info(&self, _connection: &mut dyn DriverConnection) -> Result<Option<String>> {
        let version = unsafe { CStr::from_ptr(sqlite3_libversion()) };
        Ok(Some(version.to_string_lossy().into_owned()))
    }

    fn default_schema_name(&self, _connection: &mut dyn DriverConnection) -> Result<Option<String>> {
        Ok(Some("main".into()))
    }

    fn set_isolation_level(
        &self,
        connection: &mut dyn DriverConnection,
        level: &IsolationLevel,
    ) -> DriverResult<()> {
        let flag = match level {
            IsolationLevel::ReadUncommitted => 1,
            IsolationLevel::Serializable => 0,
            _ => {
                return Err(Error::argument(format!(
                    "Isolation level {level} is not available in sqlite"
                ))
                .into());
            }
        };
        execute_simple(
            self,
            connection,
            &format!("PRAGMA read_uncommitted = {flag}"),
        )
    }

    fn get_isolation_level(
        &self,
        connection: &mut dyn DriverConnection,
    ) -> Result<Option<IsolationLevel>> {
        const STATEMENT: &str = "PRAGMA read_uncommitted";
        let result = self.create_cursor(connection).and_then(|mut cursor| {
            let result = self
                .do_execute_no_params(cursor.as_mut(), STATEMENT)
                .and_then(|_| cursor.fetchone());
            sluice_core::log_failure!(cursor.close(), "Could not close the cursor of `{}`", STATEMENT);
            result
        });
        let row = result.map_err(|e| classify_driver_error(self, e, Some(STATEMENT), None))?;
        Ok(match row.as_deref() {
            Some([Value::Int64(0)]) => Some(IsolationLevel::Serializable),
            Some([Value::Int64(1)]) => Some(IsolationLevel::ReadUncommitted),
            Some(other) => {
                return Err(Error::Other(anyhow::Error::msg(format!(
                    "Unexpected value {:?} for `{}`",
                    other, STATEMENT
                ))));
            }
            None => None,
        })
    }

    fn isolation_level_values(&self) -> Option<&[IsolationLevel]> {
        Some(&ISOLATION_LEVELS)
    }

    fn is_disconnect(&self, error: &anyhow::Error) -> bool {
        error.chain().any(|e| e.to_string().contains(CLOSED_DATABASE))
    }

    fn empty_set_expression(&self, ty: &SqlType) -> String {
        let columns = ty.tuple_types().map(|t| t.len()).unwrap_or(1).max(1);
        let mut ones = String::new();
        separated_by(&mut ones, 0..columns, |out, _| out.push('1'), ", ");
        format!("SELECT {ones} FROM (SELECT {ones}) WHERE 1!=1")
    }
}
