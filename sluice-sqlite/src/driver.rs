use crate::{SqliteConnection, SqliteDialect};
use sluice_core::{Connection, Dialect, DialectOptions, Error, Result, classify_driver_error};
use std::sync::Arc;
use url::form_urlencoded;

/// Query keys consumed by the dialect, every other key is handed to sqlite.
const DIALECT_KEYS: [&str; 7] = [
    "paramstyle",
    "isolation_level",
    "implicit_returning",
    "supports_native_boolean",
    "server_side_cursors",
    "max_identifier_length",
    "label_length",
];

/// Connection URL in the form `sqlite://path?mode=rwc&paramstyle=named`.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteUrl {
    /// Decoded database path, `:memory:` for a private in memory database.
    pub path: String,
    pub dialect_options: Vec<(String, String)>,
    /// URI parameters understood by sqlite itself (`mode`, `cache`, `immutable`...).
    pub sqlite_options: Vec<(String, String)>,
}

impl SqliteUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let prefix = format!("{}://", SqliteDriver::NAME);
        let Some(rest) = url.strip_prefix(&prefix) else {
            return Err(Error::argument(format!(
                "Expected sqlite connection url to start with `{}`",
                prefix
            )));
        };
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let path = urlencoding::decode(path)
            .map_err(|e| Error::argument(format!("Invalid path in the url `{url}`: {e}")))?
            .into_owned();
        let (dialect_options, sqlite_options) = form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .partition(|(k, _)| DIALECT_KEYS.contains(&k.as_str()));
        Ok(Self {
            path: if path.is_empty() {
                ":memory:".into()
            } else {
                path
            },
            dialect_options,
            sqlite_options,
        })
    }

    pub fn dialect_options(&self) -> Result<DialectOptions> {
        DialectOptions::from_query(self.dialect_options.iter().map(|(k, v)| (k, v)))
    }

    /// Filename in the sqlite URI format passed to `sqlite3_open_v2`.
    pub fn filename(&self) -> String {
        let mut out = String::from("file:");
        if self.path == ":memory:" {
            out.push_str(":memory:");
        } else {
            let mut segments = self.path.split('/').peekable();
            while let Some(segment) = segments.next() {
                out.push_str(&urlencoding::encode(segment));
                if segments.peek().is_some() {
                    out.push('/');
                }
            }
        }
        for (i, (k, v)) in self.sqlite_options.iter().enumerate() {
            out.push(if i == 0 { '?' } else { '&' });
            out.push_str(&urlencoding::encode(k));
            out.push('=');
            out.push_str(&urlencoding::encode(v));
        }
        out
    }
}

/// Opens sqlite connections sharing one dialect.
#[derive(Debug)]
pub struct SqliteDriver {
    dialect: Arc<SqliteDialect>,
}

impl SqliteDriver {
    pub const NAME: &'static str = "sqlite";

    pub fn new() -> Self {
        Self {
            dialect: Arc::new(SqliteDialect::new()),
        }
    }

    pub fn with_options(options: &DialectOptions) -> Result<Self> {
        Ok(Self {
            dialect: Arc::new(SqliteDialect::with_options(options)?),
        })
    }

    pub fn dialect(&self) -> &Arc<SqliteDialect> {
        &self.dialect
    }

    /// Opens the database of `url`.
    ///
    /// Dialect options in the query give the connection its own dialect
    /// instead of the one shared by the driver.
    pub fn connect(&self, url: &str) -> Result<Connection> {
        let url = SqliteUrl::parse(url)?;
        let dialect: Arc<dyn Dialect> = if url.dialect_options.is_empty() {
            self.dialect.clone()
        } else {
            Arc::new(SqliteDialect::with_options(&url.dialect_options()?)?)
        };
        let filename = url.filename();
        log::debug!("Connecting to `{}`", filename);
        let connection = SqliteConnection::open(&filename)
            .map_err(|e| classify_driver_error(&*dialect, e, None, None))?;
        Connection::new(dialect, Box::new(connection))
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Opens `url` with a driver of its own.
pub fn connect(url: &str) -> Result<Connection> {
    SqliteDriver::new().connect(url)
}

#[cfg(test)]
mod tests {
    use super::SqliteUrl;
    use sluice_core::{Error, ParamStyle};

    #[test]
    fn url_parsing() {
        let url = SqliteUrl::parse("sqlite://../target/debug/my%20db.sqlite?mode=rwc&paramstyle=named")
            .expect("Valid url");
        assert_eq!(url.path, "../target/debug/my db.sqlite");
        assert_eq!(url.sqlite_options, [("mode".to_string(), "rwc".to_string())]);
        assert_eq!(
            url.dialect_options().expect("Valid options").paramstyle,
            Some(ParamStyle::Named)
        );
        assert_eq!(url.filename(), "file:../target/debug/my%20db.sqlite?mode=rwc");

        let url = SqliteUrl::parse("sqlite://:memory:").expect("Valid url");
        assert_eq!(url.filename(), "file::memory:");
        let url = SqliteUrl::parse("sqlite://").expect("Valid url");
        assert_eq!(url.path, ":memory:");

        assert!(matches!(
            SqliteUrl::parse("postgres://localhost/db"),
            Err(Error::Argument(..))
        ));
    }
}
