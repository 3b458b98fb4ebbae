use sluice_core::{
    ColumnDefault, CompiledStatement, Connection, CursorResult, DriverParameters, Error,
    IsolationLevel, Parameters, Result, Row, SqlType, Value,
};
use std::sync::Arc;
use tokio::task::spawn_blocking;

/// Result of a statement with every row already fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BufferedResult {
    pub keys: Vec<String>,
    pub rows: Vec<Row>,
    pub rowcount: i64,
    pub lastrowid: Option<i64>,
    pub inserted_primary_key_rows: Vec<Row>,
    pub returned_defaults_rows: Vec<Row>,
}

impl BufferedResult {
    /// Drains `result`, then closes it.
    pub fn buffer(result: &mut CursorResult<'_>) -> Result<Self> {
        let rows = if result.returns_rows() {
            result.fetchall()?
        } else {
            Vec::new()
        };
        let buffered = Self {
            keys: result.keys().to_vec(),
            rows,
            rowcount: result.rowcount(),
            lastrowid: result.lastrowid(),
            inserted_primary_key_rows: result
                .inserted_primary_key_rows()
                .map(<[Row]>::to_vec)
                .unwrap_or_default(),
            returned_defaults_rows: result.returned_defaults_rows().to_vec(),
        };
        result.close();
        Ok(buffered)
    }

    /// Primary key of a single row insert.
    pub fn inserted_primary_key(&self) -> Option<&Row> {
        match self.inserted_primary_key_rows.as_slice() {
            [row] => Some(row),
            _ => None,
        }
    }

    /// First column of the first row.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Connection driven from async code.
///
/// Every call moves the connection onto the tokio blocking pool and back, so
/// calls run one at a time and in the order they are awaited. Dropping a call
/// before it completes loses the connection, later calls fail with
/// [`Error::ResourceClosed`].
pub struct AsyncConnection {
    connection: Option<Connection>,
}

impl AsyncConnection {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection: Some(connection),
        }
    }

    /// Opens a connection on the blocking pool.
    pub async fn connect<F>(open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        let connection = spawn_blocking(open)
            .await
            .map_err(|e| Error::Other(e.into()))??;
        Ok(Self::new(connection))
    }

    /// Runs `f` with the connection on the blocking pool.
    pub async fn run<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let Some(mut connection) = self.connection.take() else {
            return Err(Error::resource_closed(
                "The connection was lost by an interrupted call",
            ));
        };
        match spawn_blocking(move || {
            let result = f(&mut connection);
            (connection, result)
        })
        .await
        {
            Ok((connection, result)) => {
                self.connection = Some(connection);
                result
            }
            Err(e) => {
                let error = Error::Other(e.into());
                log::error!("{:#}", error);
                Err(error)
            }
        }
    }

    pub async fn execute<C>(
        &mut self,
        compiled: Arc<C>,
        groups: Vec<Parameters>,
    ) -> Result<BufferedResult>
    where
        C: CompiledStatement + 'static,
    {
        self.run(move |connection| {
            let mut result = connection.execute(&*compiled, groups)?;
            BufferedResult::buffer(&mut result)
        })
        .await
    }

    pub async fn exec_driver_sql(
        &mut self,
        statement: impl Into<String>,
        groups: Vec<DriverParameters>,
    ) -> Result<BufferedResult> {
        let statement = statement.into();
        self.run(move |connection| {
            let mut result = connection.exec_driver_sql(&statement, groups)?;
            BufferedResult::buffer(&mut result)
        })
        .await
    }

    pub async fn execute_default(&mut self, default: ColumnDefault, ty: SqlType) -> Result<Value> {
        self.run(move |connection| connection.execute_default(&default, &ty))
            .await
    }

    pub async fn begin(&mut self) -> Result<()> {
        self.run(Connection::begin).await
    }

    pub async fn commit(&mut self) -> Result<()> {
        self.run(Connection::commit).await
    }

    pub async fn rollback(&mut self) -> Result<()> {
        self.run(Connection::rollback).await
    }

    pub async fn begin_nested(&mut self) -> Result<String> {
        self.run(Connection::begin_nested).await
    }

    pub async fn release_savepoint(&mut self, name: String) -> Result<()> {
        self.run(move |connection| connection.release_savepoint(&name))
            .await
    }

    pub async fn rollback_to_savepoint(&mut self, name: String) -> Result<()> {
        self.run(move |connection| connection.rollback_to_savepoint(&name))
            .await
    }

    pub async fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        self.run(move |connection| connection.set_isolation_level(level))
            .await
    }

    pub async fn get_isolation_level(&mut self) -> Result<Option<IsolationLevel>> {
        self.run(Connection::get_isolation_level).await
    }

    pub async fn ping(&mut self) -> Result<bool> {
        self.run(Connection::ping).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.run(Connection::close).await
    }

    pub fn in_transaction(&self) -> bool {
        self.connection
            .as_ref()
            .is_some_and(Connection::in_transaction)
    }

    /// The wrapped connection, `None` once it was lost.
    pub fn into_inner(self) -> Option<Connection> {
        self.connection
    }
}

impl From<Connection> for AsyncConnection {
    fn from(value: Connection) -> Self {
        Self::new(value)
    }
}
