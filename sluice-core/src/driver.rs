use crate::{DbType, DriverResult, SqlType, Value};
use indexmap::IndexMap;

/// One parameter group, keyed by bind name in insertion order.
pub type Parameters = IndexMap<String, Value>;

/// Result row, also used for generated primary keys.
pub type Row = Box<[Value]>;

/// Parameter group in the shape the driver consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverParameters {
    Positional(Vec<Value>),
    Named(IndexMap<String, Value>),
}

impl DriverParameters {
    pub fn empty(positional: bool) -> Self {
        if positional {
            DriverParameters::Positional(Vec::new())
        } else {
            DriverParameters::Named(IndexMap::new())
        }
    }
    pub fn len(&self) -> usize {
        match self {
            DriverParameters::Positional(v) => v.len(),
            DriverParameters::Named(v) => v.len(),
        }
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn values(&self) -> Box<dyn Iterator<Item = &Value> + '_> {
        match self {
            DriverParameters::Positional(v) => Box::new(v.iter()),
            DriverParameters::Named(v) => Box::new(v.values()),
        }
    }
}

impl Default for DriverParameters {
    fn default() -> Self {
        DriverParameters::Positional(Vec::new())
    }
}

impl From<Vec<Value>> for DriverParameters {
    fn from(value: Vec<Value>) -> Self {
        DriverParameters::Positional(value)
    }
}

impl From<Parameters> for DriverParameters {
    fn from(value: Parameters) -> Self {
        DriverParameters::Named(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescription {
    pub name: String,
    /// Type as declared in the backend schema, when known.
    pub declared_type: Option<String>,
}

impl ColumnDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: None,
        }
    }
}

/// Expected buffer for one physical parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSize {
    /// Bind name for named drivers, position rendered as text for positional ones.
    pub key: String,
    pub db_type: DbType,
    pub ty: SqlType,
}

/// Connection handle of a backend driver.
///
/// Cursors returned by [`DriverConnection::cursor`] own whatever part of the
/// connection they need, so they can outlive the borrow used to create them.
pub trait DriverConnection: Send {
    fn cursor(&mut self) -> DriverResult<Box<dyn DriverCursor>>;

    /// Cursor that streams rows from the server instead of buffering them.
    fn server_side_cursor(&mut self) -> DriverResult<Box<dyn DriverCursor>> {
        self.cursor()
    }

    fn begin(&mut self) -> DriverResult<()>;

    fn commit(&mut self) -> DriverResult<()>;

    fn rollback(&mut self) -> DriverResult<()>;

    fn close(&mut self) -> DriverResult<()>;
}

/// Statement handle of a backend driver.
pub trait DriverCursor: Send {
    fn execute(&mut self, statement: &str, parameters: &DriverParameters) -> DriverResult<()>;

    fn execute_no_params(&mut self, statement: &str) -> DriverResult<()>;

    fn executemany(
        &mut self,
        statement: &str,
        parameters: &[DriverParameters],
    ) -> DriverResult<()>;

    /// Columns of the current result, `None` when the statement returns no rows.
    fn description(&self) -> Option<&[ColumnDescription]>;

    fn fetchone(&mut self) -> DriverResult<Option<Row>>;

    fn fetchall(&mut self) -> DriverResult<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetchone()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Rows affected by the last statement, `-1` when unknown.
    fn rowcount(&self) -> i64;

    fn lastrowid(&self) -> DriverResult<Option<i64>>;

    fn set_input_sizes(&mut self, _sizes: &[InputSize]) -> DriverResult<()> {
        Ok(())
    }

    fn close(&mut self) -> DriverResult<()>;
}
