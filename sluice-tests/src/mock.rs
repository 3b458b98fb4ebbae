use sluice_core::{
    Capabilities, ColumnDescription, Dialect, DialectRuntime, DriverConnection, DriverCursor,
    DriverParameters, DriverResult, IdentifierPreparer, InputSize, IsolationLevel, Result, Row,
    TypeRegistry, Value, execute_simple,
};
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
};

/// Call received by the mock driver.
#[derive(Debug, Clone, PartialEq)]
pub enum MockEvent {
    Cursor,
    ServerSideCursor,
    Execute {
        statement: String,
        parameters: DriverParameters,
    },
    ExecuteNoParams {
        statement: String,
    },
    ExecuteMany {
        statement: String,
        groups: Vec<DriverParameters>,
    },
    SetInputSizes(Vec<InputSize>),
    FetchOne,
    FetchAll,
    LastRowId,
    CloseCursor,
    Begin,
    Commit,
    Rollback,
    Close,
}

impl MockEvent {
    /// True for the calls sending a statement to the server.
    pub fn is_execution(&self) -> bool {
        matches!(
            self,
            MockEvent::Execute { .. } | MockEvent::ExecuteNoParams { .. } | MockEvent::ExecuteMany { .. }
        )
    }

    pub fn statement(&self) -> Option<&str> {
        match self {
            MockEvent::Execute { statement, .. }
            | MockEvent::ExecuteNoParams { statement }
            | MockEvent::ExecuteMany { statement, .. } => Some(statement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockError {
    pub message: String,
    pub disconnect: bool,
}

impl fmt::Display for MockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for MockError {}

/// Outcome of the next statement run by a mock cursor.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub columns: Option<Vec<ColumnDescription>>,
    pub rows: VecDeque<Row>,
    pub rowcount: i64,
    pub lastrowid: Option<i64>,
    pub error: Option<MockError>,
}

impl MockResponse {
    pub fn rows<R: Into<Row>>(columns: &[&str], rows: impl IntoIterator<Item = R>) -> Self {
        let rows: VecDeque<Row> = rows.into_iter().map(Into::into).collect();
        Self {
            columns: Some(columns.iter().map(|c| ColumnDescription::new(*c)).collect()),
            rowcount: rows.len() as i64,
            rows,
            ..Default::default()
        }
    }

    pub fn rowcount(rowcount: i64) -> Self {
        Self {
            rowcount,
            ..Default::default()
        }
    }

    pub fn lastrowid(mut self, lastrowid: i64) -> Self {
        self.lastrowid = Some(lastrowid);
        self
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(MockError {
                message: message.into(),
                disconnect: false,
            }),
            ..Default::default()
        }
    }

    pub fn disconnect(message: impl Into<String>) -> Self {
        Self {
            error: Some(MockError {
                message: message.into(),
                disconnect: true,
            }),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct MockState {
    events: Vec<MockEvent>,
    responses: VecDeque<MockResponse>,
}

/// Scripted in memory driver recording every call it receives.
///
/// Clones share the same script and the same event log.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Default::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().expect("Mock state lock is poisoned")
    }

    fn record(&self, event: MockEvent) {
        self.state().events.push(event);
    }

    fn next_response(&self) -> MockResponse {
        self.state().responses.pop_front().unwrap_or_default()
    }

    /// Queues the outcome of the next executed statement.
    pub fn respond(&self, response: MockResponse) -> &Self {
        self.state().responses.push_back(response);
        self
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state().events.clone()
    }

    pub fn executions(&self) -> Vec<MockEvent> {
        self.events().into_iter().filter(MockEvent::is_execution).collect()
    }

    pub fn count(&self, predicate: impl Fn(&MockEvent) -> bool) -> usize {
        self.state().events.iter().filter(|e| predicate(e)).count()
    }

    pub fn clear(&self) {
        self.state().events.clear();
    }

    pub fn connection(&self) -> Box<dyn DriverConnection> {
        Box::new(MockConnection {
            backend: self.clone(),
        })
    }
}

pub struct MockConnection {
    backend: MockBackend,
}

impl DriverConnection for MockConnection {
    fn cursor(&mut self) -> DriverResult<Box<dyn DriverCursor>> {
        self.backend.record(MockEvent::Cursor);
        Ok(Box::new(MockCursor::new(self.backend.clone())))
    }
    fn server_side_cursor(&mut self) -> DriverResult<Box<dyn DriverCursor>> {
        self.backend.record(MockEvent::ServerSideCursor);
        Ok(Box::new(MockCursor::new(self.backend.clone())))
    }
    fn begin(&mut self) -> DriverResult<()> {
        self.backend.record(MockEvent::Begin);
        Ok(())
    }
    fn commit(&mut self) -> DriverResult<()> {
        self.backend.record(MockEvent::Commit);
        Ok(())
    }
    fn rollback(&mut self) -> DriverResult<()> {
        self.backend.record(MockEvent::Rollback);
        Ok(())
    }
    fn close(&mut self) -> DriverResult<()> {
        self.backend.record(MockEvent::Close);
        Ok(())
    }
}

pub struct MockCursor {
    backend: MockBackend,
    current: MockResponse,
}

impl MockCursor {
    fn new(backend: MockBackend) -> Self {
        Self {
            backend,
            current: MockResponse {
                rowcount: -1,
                ..Default::default()
            },
        }
    }

    fn run(&mut self, event: MockEvent) -> DriverResult<()> {
        self.backend.record(event);
        let response = self.backend.next_response();
        if let Some(error) = response.error {
            return Err(error.into());
        }
        self.current = response;
        Ok(())
    }
}

impl DriverCursor for MockCursor {
    fn execute(&mut self, statement: &str, parameters: &DriverParameters) -> DriverResult<()> {
        self.run(MockEvent::Execute {
            statement: statement.into(),
            parameters: parameters.clone(),
        })
    }
    fn execute_no_params(&mut self, statement: &str) -> DriverResult<()> {
        self.run(MockEvent::ExecuteNoParams {
            statement: statement.into(),
        })
    }
    fn executemany(&mut self, statement: &str, groups: &[DriverParameters]) -> DriverResult<()> {
        self.run(MockEvent::ExecuteMany {
            statement: statement.into(),
            groups: groups.to_vec(),
        })
    }
    fn description(&self) -> Option<&[ColumnDescription]> {
        self.current.columns.as_deref()
    }
    fn fetchone(&mut self) -> DriverResult<Option<Row>> {
        self.backend.record(MockEvent::FetchOne);
        Ok(self.current.rows.pop_front())
    }
    fn fetchall(&mut self) -> DriverResult<Vec<Row>> {
        self.backend.record(MockEvent::FetchAll);
        Ok(self.current.rows.drain(..).collect())
    }
    fn rowcount(&self) -> i64 {
        self.current.rowcount
    }
    fn lastrowid(&self) -> DriverResult<Option<i64>> {
        self.backend.record(MockEvent::LastRowId);
        Ok(self.current.lastrowid)
    }
    fn set_input_sizes(&mut self, sizes: &[InputSize]) -> DriverResult<()> {
        self.backend.record(MockEvent::SetInputSizes(sizes.to_vec()));
        Ok(())
    }
    fn close(&mut self) -> DriverResult<()> {
        self.backend.record(MockEvent::CloseCursor);
        Ok(())
    }
}

/// Dialect for the mock driver.
///
/// Isolation levels are set with a plain `SET ISOLATION LEVEL` statement and
/// a [`MockError`] flagged as disconnect invalidates the connection.
#[derive(Debug, Default)]
pub struct MockDialect {
    pub capabilities: Capabilities,
    pub runtime: DialectRuntime,
    pub preparer: IdentifierPreparer,
    pub types: TypeRegistry,
    pub isolation_levels: Option<Vec<IsolationLevel>>,
    pub default_isolation_level: Option<IsolationLevel>,
}

impl MockDialect {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Default::default()
        }
    }
}

impl Dialect for MockDialect {
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
    fn default_isolation_level(
        &self,
        _connection: &mut dyn DriverConnection,
    ) -> Result<Option<IsolationLevel>> {
        Ok(self.default_isolation_level.clone())
    }
    fn isolation_level_values(&self) -> Option<&[IsolationLevel]> {
        self.isolation_levels.as_deref()
    }
    fn set_isolation_level(
        &self,
        connection: &mut dyn DriverConnection,
        level: &IsolationLevel,
    ) -> DriverResult<()> {
        execute_simple(self, connection, &format!("SET ISOLATION LEVEL {level}"))
    }
    fn is_disconnect(&self, error: &anyhow::Error) -> bool {
        error
            .downcast_ref::<MockError>()
            .is_some_and(|e| e.disconnect)
    }
}

/// Values as a row, shorthand for scripted responses.
pub fn row(values: impl IntoIterator<Item = Value>) -> Row {
    values.into_iter().collect()
}
