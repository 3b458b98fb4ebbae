use crate::{DbType, Error, Result};
use std::{
    collections::HashSet,
    fmt::{self, Display},
    str::FromStr,
    sync::OnceLock,
};

/// Placeholder convention the driver expects.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamStyle {
    /// `?`
    #[default]
    Qmark,
    /// `:1`
    Numeric,
    /// `$1`
    NumericDollar,
    /// `:name`
    Named,
    /// `%s`
    Format,
    /// `%(name)s`
    Pyformat,
}

impl ParamStyle {
    pub fn is_positional(self) -> bool {
        !matches!(self, ParamStyle::Named | ParamStyle::Pyformat)
    }
    pub fn is_numeric(self) -> bool {
        matches!(self, ParamStyle::Numeric | ParamStyle::NumericDollar)
    }

    /// Appends the placeholder of a bind, `position` is 1-based.
    pub fn write_placeholder(self, out: &mut String, key: &str, position: usize) {
        match self {
            ParamStyle::Qmark => out.push('?'),
            ParamStyle::Format => out.push_str("%s"),
            ParamStyle::Numeric | ParamStyle::NumericDollar => {
                out.push(if self == ParamStyle::Numeric { ':' } else { '$' });
                out.push_str(itoa::Buffer::new().format(position));
            }
            ParamStyle::Named => {
                out.push(':');
                out.push_str(key);
            }
            ParamStyle::Pyformat => {
                out.push_str("%(");
                out.push_str(key);
                out.push_str(")s");
            }
        }
    }
}

impl Display for ParamStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ParamStyle::Qmark => "qmark",
            ParamStyle::Numeric => "numeric",
            ParamStyle::NumericDollar => "numeric_dollar",
            ParamStyle::Named => "named",
            ParamStyle::Format => "format",
            ParamStyle::Pyformat => "pyformat",
        })
    }
}

impl FromStr for ParamStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "qmark" => ParamStyle::Qmark,
            "numeric" => ParamStyle::Numeric,
            "numeric_dollar" => ParamStyle::NumericDollar,
            "named" => ParamStyle::Named,
            "format" => ParamStyle::Format,
            "pyformat" => ParamStyle::Pyformat,
            _ => return Err(Error::argument(format!("Unknown paramstyle `{s}`"))),
        })
    }
}

/// How declared bind types are communicated to the backend.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindTyping {
    #[default]
    None,
    /// Through the driver `set_input_sizes` call before each execution.
    SetInputSizes,
    /// Through casts rendered by the compiler.
    RenderCasts,
}

/// Transaction isolation level, names are upper case with spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Autocommit,
    /// Backend specific level.
    Other(String),
}

impl IsolationLevel {
    pub fn as_str(&self) -> &str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Autocommit => "AUTOCOMMIT",
            IsolationLevel::Other(v) => v,
        }
    }
}

impl Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = Error;

    /// Accepts any spelling, `read_committed` and `Read Committed` are the same level.
    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().replace('_', " ").to_uppercase();
        Ok(match normalized.as_str() {
            "" => return Err(Error::argument("Empty isolation level")),
            "READ UNCOMMITTED" => IsolationLevel::ReadUncommitted,
            "READ COMMITTED" => IsolationLevel::ReadCommitted,
            "REPEATABLE READ" => IsolationLevel::RepeatableRead,
            "SERIALIZABLE" => IsolationLevel::Serializable,
            "AUTOCOMMIT" => IsolationLevel::Autocommit,
            _ => IsolationLevel::Other(normalized),
        })
    }
}

/// Static capability table of a dialect.
///
/// Built once from the dialect defaults and the user supplied [`DialectOptions`],
/// it is never mutated afterwards.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub name: String,
    pub driver: String,
    pub paramstyle: ParamStyle,
    pub max_identifier_length: usize,
    pub label_length: Option<usize>,
    pub implicit_returning: bool,
    pub insert_executemany_returning: bool,
    pub postfetch_lastrowid: bool,
    pub supports_native_boolean: bool,
    pub supports_server_side_cursors: bool,
    /// Legacy toggle, streams every plain SELECT when enabled.
    pub server_side_cursors: bool,
    pub supports_sequences: bool,
    /// Optional sequences are left to the backend.
    pub sequences_optional: bool,
    pub supports_sane_rowcount: bool,
    pub supports_sane_multi_rowcount: bool,
    /// When false every compiled execution reports that caching is unsupported.
    pub supports_statement_cache: bool,
    pub bind_typing: BindTyping,
    pub include_set_input_sizes: Option<HashSet<DbType>>,
    pub exclude_set_input_sizes: Option<HashSet<DbType>>,
    /// Backend folds unquoted names to upper case.
    pub requires_name_normalize: bool,
    /// Isolation level applied to every new connection.
    pub isolation_level: Option<IsolationLevel>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            name: "default".into(),
            driver: String::new(),
            paramstyle: ParamStyle::Named,
            max_identifier_length: 9999,
            label_length: None,
            implicit_returning: true,
            insert_executemany_returning: false,
            postfetch_lastrowid: true,
            supports_native_boolean: false,
            supports_server_side_cursors: false,
            server_side_cursors: false,
            supports_sequences: false,
            sequences_optional: false,
            supports_sane_rowcount: true,
            supports_sane_multi_rowcount: true,
            supports_statement_cache: true,
            bind_typing: BindTyping::None,
            include_set_input_sizes: None,
            exclude_set_input_sizes: None,
            requires_name_normalize: false,
            isolation_level: None,
        }
    }
}

impl Capabilities {
    pub fn positional(&self) -> bool {
        self.paramstyle.is_positional()
    }

    /// Label length, falls back to the identifier length.
    pub fn label_length(&self) -> usize {
        self.label_length.unwrap_or(self.max_identifier_length)
    }

    /// Applies the user options on top of the dialect defaults.
    pub fn configure(mut self, options: &DialectOptions) -> Result<Self> {
        if let Some(paramstyle) = options.paramstyle {
            self.paramstyle = paramstyle;
        }
        if let Some(isolation_level) = &options.isolation_level {
            self.isolation_level = Some(isolation_level.clone());
        }
        if let Some(implicit_returning) = options.implicit_returning {
            self.implicit_returning = implicit_returning;
        }
        if let Some(native) = options.supports_native_boolean {
            self.supports_native_boolean = native;
        }
        if let Some(length) = options.max_identifier_length {
            self.max_identifier_length = length;
        }
        if let Some(server_side_cursors) = options.server_side_cursors {
            if server_side_cursors && !self.supports_server_side_cursors {
                return Err(Error::argument(format!(
                    "Dialect {} does not support server side cursors",
                    self.name
                )));
            }
            self.server_side_cursors = server_side_cursors;
        }
        if let Some(label_length) = options.label_length {
            if label_length > self.max_identifier_length {
                return Err(Error::argument(format!(
                    "Label length of {label_length} is greater than this dialect's maximum identifier length of {}",
                    self.max_identifier_length
                )));
            }
            self.label_length = Some(label_length);
        }
        Ok(self)
    }
}

/// User configuration of a dialect, every field left `None` keeps the dialect default.
#[derive(Default, Debug, Clone, PartialEq)]
pub struct DialectOptions {
    pub paramstyle: Option<ParamStyle>,
    pub isolation_level: Option<IsolationLevel>,
    pub implicit_returning: Option<bool>,
    pub supports_native_boolean: Option<bool>,
    pub max_identifier_length: Option<usize>,
    pub label_length: Option<usize>,
    pub server_side_cursors: Option<bool>,
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::argument(format!(
            "Invalid boolean `{value}` for option `{key}`"
        ))),
    }
}

fn parse_length(key: &str, value: &str) -> Result<usize> {
    value
        .parse()
        .map_err(|_| Error::argument(format!("Invalid length `{value}` for option `{key}`")))
}

impl DialectOptions {
    /// Reads the recognized keys out of URL query pairs, other keys are left to the driver.
    pub fn from_query<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "paramstyle" => options.paramstyle = Some(value.parse()?),
                "isolation_level" => options.isolation_level = Some(value.parse()?),
                "implicit_returning" => {
                    options.implicit_returning = Some(parse_flag(key, value)?)
                }
                "supports_native_boolean" => {
                    options.supports_native_boolean = Some(parse_flag(key, value)?)
                }
                "server_side_cursors" => {
                    options.server_side_cursors = Some(parse_flag(key, value)?)
                }
                "max_identifier_length" => {
                    options.max_identifier_length = Some(parse_length(key, value)?)
                }
                "label_length" => options.label_length = Some(parse_length(key, value)?),
                _ => log::debug!("Option `{key}` is not a dialect option"),
            }
        }
        Ok(options)
    }
}

/// Per dialect state detected on the first connection, each field is written once.
#[derive(Debug, Default)]
pub struct DialectRuntime {
    server_version: OnceLock<Option<String>>,
    default_schema_name: OnceLock<Option<String>>,
    default_isolation_level: OnceLock<Option<IsolationLevel>>,
    max_identifier_length: OnceLock<Option<usize>>,
}

impl DialectRuntime {
    pub fn is_initialized(&self) -> bool {
        self.server_version.get().is_some()
    }
    pub fn server_version(&self) -> Option<&str> {
        self.server_version.get().and_then(Option::as_deref)
    }
    pub fn default_schema_name(&self) -> Option<&str> {
        self.default_schema_name.get().and_then(Option::as_deref)
    }
    pub fn default_isolation_level(&self) -> Option<&IsolationLevel> {
        self.default_isolation_level.get().and_then(Option::as_ref)
    }
    pub fn max_identifier_length(&self) -> Option<usize> {
        self.max_identifier_length.get().copied().flatten()
    }
    pub(crate) fn set_server_version(&self, value: Option<String>) {
        let _ = self.server_version.set(value);
    }
    pub(crate) fn set_default_schema_name(&self, value: Option<String>) {
        let _ = self.default_schema_name.set(value);
    }
    pub(crate) fn set_default_isolation_level(&self, value: Option<IsolationLevel>) {
        let _ = self.default_isolation_level.set(value);
    }
    pub(crate) fn set_max_identifier_length(&self, value: Option<usize>) {
        let _ = self.max_identifier_length.set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_level_spelling() {
        assert_eq!(
            "read_committed".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            " Repeatable Read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "snapshot".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::Other("SNAPSHOT".into())
        );
        assert!(matches!(
            "".parse::<IsolationLevel>(),
            Err(Error::Argument(..))
        ));
    }

    #[test]
    fn configure_rejects_invalid_options() {
        let options = DialectOptions {
            server_side_cursors: Some(true),
            ..Default::default()
        };
        assert!(matches!(
            Capabilities::default().configure(&options),
            Err(Error::Argument(..))
        ));
        let options = DialectOptions {
            label_length: Some(64),
            ..Default::default()
        };
        let capabilities = Capabilities {
            max_identifier_length: 63,
            ..Default::default()
        };
        assert!(matches!(
            capabilities.configure(&options),
            Err(Error::Argument(..))
        ));
    }

    #[test]
    fn options_from_query() {
        let options = DialectOptions::from_query([
            ("paramstyle", "qmark"),
            ("implicit_returning", "false"),
            ("mode", "rwc"),
            ("isolation_level", "serializable"),
        ])
        .unwrap();
        assert_eq!(options.paramstyle, Some(ParamStyle::Qmark));
        assert_eq!(options.implicit_returning, Some(false));
        assert_eq!(options.isolation_level, Some(IsolationLevel::Serializable));
        assert!(DialectOptions::from_query([("paramstyle", "dollar")]).is_err());

        let mut out = String::new();
        ParamStyle::NumericDollar.write_placeholder(&mut out, "x", 3);
        ParamStyle::Pyformat.write_placeholder(&mut out, "x", 3);
        assert_eq!(out, "$3%(x)s");
    }
}
