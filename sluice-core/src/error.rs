use crate::{Dialect, DriverParameters, printable_values, truncate_long};
use std::fmt::{self, Display};

/// Result used by the orchestration layer.
pub type Result<T> = std::result::Result<T, Error>;

/// Result returned by driver level calls (connections and cursors).
///
/// Drivers raise whatever their backend raises; the execution context classifies
/// and wraps these into [`Error::Driver`] on the way out.
pub type DriverResult<T> = anyhow::Result<T>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration, raised at construction or configuration time.
    #[error("{0}")]
    Argument(String),
    /// Contract misuse by the caller, always a programming error.
    #[error("{0}")]
    InvalidRequest(String),
    /// Identifier exceeding the dialect limits.
    #[error("{0}")]
    Identifier(String),
    /// Fetching from a result whose rows are no longer available.
    #[error("{0}")]
    ResourceClosed(String),
    /// Optional capability that the dialect does not implement.
    #[error("{0}")]
    NotSupported(String),
    /// Error raised by the backend while running a statement.
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn argument(message: impl Into<String>) -> Self {
        Error::Argument(message.into())
    }
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Error::InvalidRequest(message.into())
    }
    pub fn not_supported(message: impl Into<String>) -> Self {
        Error::NotSupported(message.into())
    }
    pub fn resource_closed(message: impl Into<String>) -> Self {
        Error::ResourceClosed(message.into())
    }
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Error::NotSupported(..))
    }
    /// True when the backend reported that the connection is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::Driver(e) if e.disconnect)
    }
}

/// Backend error enriched with the statement that caused it.
#[derive(Debug)]
pub struct DriverError {
    pub statement: Option<String>,
    pub parameters: Option<String>,
    pub disconnect: bool,
    pub source: anyhow::Error,
}

impl DriverError {
    pub fn new(source: anyhow::Error) -> Self {
        Self {
            statement: None,
            parameters: None,
            disconnect: false,
            source,
        }
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {:#}", self.kind(), self.source)?;
        if let Some(statement) = &self.statement {
            write!(f, "\n[SQL: {}]", statement)?;
        }
        if let Some(parameters) = &self.parameters {
            write!(f, "\n[parameters: {}]", parameters)?;
        }
        Ok(())
    }
}

impl DriverError {
    fn kind(&self) -> &'static str {
        if self.disconnect {
            "disconnect"
        } else {
            "statement error"
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Wraps an error raised by a driver call.
///
/// Errors of this crate tunneled through the driver result come back
/// unchanged, anything else is classified by the dialect and decorated with
/// the statement and its parameters.
pub fn classify_driver_error(
    dialect: &dyn Dialect,
    source: anyhow::Error,
    statement: Option<&str>,
    parameters: Option<&[DriverParameters]>,
) -> Error {
    let source = match source.downcast::<Error>() {
        Ok(error) => return error,
        Err(source) => source,
    };
    let parameters = parameters.map(|groups| match groups {
        [group] => printable_values(group.values()),
        groups => {
            let mut out = String::from("[");
            crate::separated_by(
                &mut out,
                groups.iter().take(10),
                |out, group| out.push_str(&printable_values(group.values())),
                ", ",
            );
            if groups.len() > 10 {
                out.push_str(&format!(" ... displaying 10 of {} total parameter sets", groups.len()));
            }
            out.push(']');
            out
        }
    });
    Error::Driver(DriverError {
        statement: statement.map(|v| truncate_long!(v)),
        parameters: parameters.map(|v| truncate_long!(v)),
        disconnect: dialect.is_disconnect(&source),
        source,
    })
}
