use crate::{
    CacheStatus, ColumnDefault, CompiledStatement, Connection, Dialect, DriverCursor,
    DriverParameters, DriverResult, Error, ExecutionOptions, InputSize, Parameters, Result, Row,
    SchemaTranslateMap, SqlType, StatementKind, Value, classify_driver_error, evaluate_bare_default,
    expand_parameters, input_sizes, log_failure, prefetch_defaults, process_parameters,
    truncate_long,
};
use std::{fmt, sync::Arc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    Uninitialized,
    CursorOpen,
    DefaultsResolved,
    Executed,
    ResultBuilt,
    /// Rows are no longer available, the metadata still is.
    SoftClosed,
    Closed,
    Failed,
}

impl ContextState {
    fn can_move_to(self, next: ContextState) -> bool {
        use ContextState::*;
        match (self, next) {
            (_, Failed) => !matches!(self, Closed | Failed),
            (Uninitialized, CursorOpen)
            | (CursorOpen, DefaultsResolved)
            | (DefaultsResolved, Executed)
            | (Executed, ResultBuilt)
            | (ResultBuilt, SoftClosed) => true,
            (Closed | Failed, _) => false,
            (_, Closed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Orchestrates one statement execution on one cursor.
///
/// Built by the [`Connection`] for the duration of a single call and of the
/// consumption of its result, never reused. The cursor is owned exclusively
/// and released exactly once, on whatever path the context leaves.
pub struct ExecutionContext<'c> {
    connection: &'c mut Connection,
    dialect: Arc<dyn Dialect>,
    compiled: Option<&'c dyn CompiledStatement>,
    kind: StatementKind,
    statement: String,
    options: ExecutionOptions,
    cache_status: CacheStatus,
    state: ContextState,
    pub(crate) cursor: Option<Box<dyn DriverCursor>>,
    compiled_parameters: Vec<Parameters>,
    parameters: Vec<DriverParameters>,
    input_sizes: Option<Vec<InputSize>>,
    executemany: bool,
    is_server_side: bool,
    is_explicit_returning: bool,
    is_implicit_returning: bool,
    pub(crate) returns_rows: bool,
    prefetch_cols: Vec<String>,
    postfetch_cols: Vec<String>,
    pub(crate) rowcount: Option<i64>,
    lastrowid: Option<i64>,
    inserted_primary_key_rows: Vec<Row>,
    returned_default_rows: Vec<Row>,
}

fn is_select_text(statement: &str) -> bool {
    statement
        .trim_start()
        .get(..6)
        .is_some_and(|s| s.eq_ignore_ascii_case("select"))
}

impl<'c> ExecutionContext<'c> {
    fn new(
        connection: &'c mut Connection,
        kind: StatementKind,
        statement: String,
        options: &ExecutionOptions,
    ) -> Result<Self> {
        connection.ensure_usable()?;
        if options.isolation_level.is_some() {
            return Err(Error::argument(
                "The isolation level is a connection option, it cannot be set for a single statement",
            ));
        }
        let dialect = connection.dialect().clone();
        let options = connection.options().merge(options);
        Ok(Self {
            connection,
            dialect,
            compiled: None,
            kind,
            statement,
            options,
            cache_status: CacheStatus::default(),
            state: ContextState::Uninitialized,
            cursor: None,
            compiled_parameters: Vec::new(),
            parameters: Vec::new(),
            input_sizes: None,
            executemany: false,
            is_server_side: false,
            is_explicit_returning: false,
            is_implicit_returning: false,
            returns_rows: false,
            prefetch_cols: Vec::new(),
            postfetch_cols: Vec::new(),
            rowcount: None,
            lastrowid: None,
            inserted_primary_key_rows: Vec::new(),
            returned_default_rows: Vec::new(),
        })
    }

    /// DDL statement, runs with a single empty parameter group.
    pub(crate) fn ddl(
        connection: &'c mut Connection,
        compiled: &'c dyn CompiledStatement,
        options: &ExecutionOptions,
    ) -> Result<Self> {
        let mut context = Self::new(
            connection,
            StatementKind::Ddl,
            compiled.statement().to_string(),
            options,
        )?;
        context.compiled = Some(compiled);
        context.open_cursor()?;
        context.guard(|c| {
            c.statement = c.translate_schema(compiled, &c.statement)?;
            c.compiled_parameters = vec![Parameters::new()];
            c.parameters = vec![DriverParameters::empty(
                c.dialect.capabilities().positional(),
            )];
            c.transition(ContextState::DefaultsResolved)
        })?;
        Ok(context)
    }

    /// Compiled construct, the parameter groups go through the full pipeline.
    pub(crate) fn compiled(
        connection: &'c mut Connection,
        compiled: &'c dyn CompiledStatement,
        groups: Vec<Parameters>,
        options: &ExecutionOptions,
        cache_status: CacheStatus,
        extracted: Option<&[Value]>,
    ) -> Result<Self> {
        let mut context = Self::new(
            connection,
            compiled.kind(),
            compiled.statement().to_string(),
            options,
        )?;
        context.compiled = Some(compiled);
        context.cache_status = cache_status;
        context.open_cursor()?;
        context.guard(|c| c.init_compiled(compiled, groups, extracted))?;
        Ok(context)
    }

    /// Raw SQL, the parameters are handed to the driver as they are.
    pub(crate) fn text(
        connection: &'c mut Connection,
        statement: &str,
        groups: Vec<DriverParameters>,
        options: &ExecutionOptions,
    ) -> Result<Self> {
        let mut context = Self::new(
            connection,
            StatementKind::Text,
            statement.to_string(),
            options,
        )?;
        context.open_cursor()?;
        context.guard(|c| {
            c.executemany = groups.len() > 1;
            c.parameters = if groups.is_empty() {
                vec![DriverParameters::empty(
                    c.dialect.capabilities().positional(),
                )]
            } else {
                groups
            };
            c.transition(ContextState::DefaultsResolved)
        })?;
        Ok(context)
    }

    /// Bare column default evaluation, no statement around it.
    pub(crate) fn default_evaluation(
        connection: &'c mut Connection,
        options: &ExecutionOptions,
    ) -> Result<Self> {
        let mut context = Self::new(connection, StatementKind::Select, String::new(), options)?;
        context.open_cursor()?;
        Ok(context)
    }

    fn init_compiled(
        &mut self,
        compiled: &dyn CompiledStatement,
        groups: Vec<Parameters>,
        extracted: Option<&[Value]>,
    ) -> Result<()> {
        self.executemany = groups.len() > 1;
        if self.executemany && compiled.is_postcompile() {
            return Err(Error::invalid_request(
                "`literal_execute` or `expanding` parameters can't be used with executemany",
            ));
        }
        if self.kind.is_crud() {
            self.is_explicit_returning = compiled.explicit_returning();
            self.is_implicit_returning = compiled.implicit_returning();
            if self.is_explicit_returning && self.is_implicit_returning {
                return Err(Error::invalid_request(
                    "A statement cannot use both explicit and implicit RETURNING",
                ));
            }
        }
        self.compiled_parameters = if groups.is_empty() {
            vec![compiled.construct_params(None, None, extracted)?]
        } else {
            groups
                .iter()
                .enumerate()
                .map(|(i, group)| compiled.construct_params(Some(group), Some(i), extracted))
                .collect::<Result<_>>()?
        };
        let dialect = self.dialect.clone();
        if matches!(self.kind, StatementKind::Insert | StatementKind::Update)
            && (!compiled.insert_prefetch().is_empty() || !compiled.update_prefetch().is_empty())
        {
            let Some(cursor) = self.cursor.as_deref_mut() else {
                return Err(Error::resource_closed("The cursor of this execution is closed"));
            };
            self.prefetch_cols = prefetch_defaults(
                &*dialect,
                cursor,
                compiled,
                &mut self.compiled_parameters,
            )?;
        }
        self.postfetch_cols = compiled.postfetch().to_vec();
        self.transition(ContextState::DefaultsResolved)?;

        let expanded = expand_parameters(&*dialect, compiled, &mut self.compiled_parameters)?;
        self.parameters = process_parameters(&*dialect, &expanded, &self.compiled_parameters)?;
        self.input_sizes = input_sizes(&*dialect, &expanded, self.compiled_parameters.first());
        self.statement = self.translate_schema(compiled, &expanded.statement)?;
        Ok(())
    }

    fn translate_schema(&self, compiled: &dyn CompiledStatement, statement: &str) -> Result<String> {
        if !compiled.has_schema_translates() {
            return Ok(statement.to_string());
        }
        let empty = SchemaTranslateMap::new();
        let map = self.options.schema_translate_map.as_ref().unwrap_or(&empty);
        self.dialect.preparer().render_schema_translates(
            statement,
            map,
            self.dialect.runtime().default_schema_name(),
        )
    }

    fn use_server_side_cursor(&self) -> bool {
        let capabilities = self.dialect.capabilities();
        if !capabilities.supports_server_side_cursors {
            return false;
        }
        match self.options.stream_results {
            Some(stream) => stream,
            None => {
                capabilities.server_side_cursors
                    && match self.kind {
                        StatementKind::Select => self.compiled.is_some(),
                        StatementKind::Text => is_select_text(&self.statement),
                        _ => false,
                    }
            }
        }
    }

    fn open_cursor(&mut self) -> Result<()> {
        let server_side = self.use_server_side_cursor();
        let dialect = self.dialect.clone();
        let driver = self.connection.driver_mut();
        let cursor = if server_side {
            dialect.create_server_side_cursor(driver)
        } else {
            dialect.create_cursor(driver)
        };
        match cursor {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                self.is_server_side = server_side;
                self.transition(ContextState::CursorOpen)
            }
            Err(e) => {
                let error = classify_driver_error(&*dialect, e, None, None);
                Err(self.fail(error))
            }
        }
    }

    fn transition(&mut self, next: ContextState) -> Result<()> {
        if !self.state.can_move_to(next) {
            return Err(Error::invalid_request(format!(
                "Execution context cannot move from {} to {}",
                self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Runs `f`, any error releases the cursor and leaves the context failed.
    fn guard<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        f(self).map_err(|e| self.fail(e))
    }

    fn fail(&mut self, error: Error) -> Error {
        self.release_cursor();
        if !matches!(self.state, ContextState::Closed | ContextState::Failed) {
            self.state = ContextState::Failed;
        }
        if error.is_disconnect() {
            self.connection.invalidate();
        }
        log::error!("{:#}", error);
        error
    }

    fn release_cursor(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            log_failure!(cursor.close(), "Could not close the cursor");
        }
    }

    pub(crate) fn cursor_mut(&mut self) -> Result<&mut dyn DriverCursor> {
        match self.cursor.as_deref_mut() {
            Some(cursor) => Ok(cursor),
            None => Err(Error::resource_closed("The cursor of this execution is closed")),
        }
    }

    pub(crate) fn driver_error(&mut self, error: anyhow::Error) -> Error {
        let error = classify_driver_error(
            &*self.dialect,
            error,
            Some(self.statement.as_str()),
            Some(self.parameters.as_slice()),
        );
        self.fail(error)
    }

    /// Sends the statement to the driver.
    pub(crate) fn execute(&mut self) -> Result<()> {
        if self.state != ContextState::DefaultsResolved {
            return Err(Error::invalid_request(format!(
                "Execution context in state {} cannot execute",
                self.state
            )));
        }
        let dialect = self.dialect.clone();
        let no_parameters = self.options.no_parameters.unwrap_or_default();
        log::debug!("{}", truncate_long!(self.statement));
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("[parameters: {:?}]", self.parameters);
        }
        let statement = &self.statement;
        let parameters = &self.parameters;
        let result = match self.cursor.as_deref_mut() {
            Some(cursor) => driver_execute(
                &*dialect,
                cursor,
                statement,
                parameters,
                self.input_sizes.as_deref(),
                self.executemany,
                no_parameters,
            ),
            None => return Err(Error::resource_closed("The cursor of this execution is closed")),
        };
        match result {
            Ok(()) => self.transition(ContextState::Executed),
            Err(e) => Err(self.driver_error(e)),
        }
    }

    /// Resolves generated values and prepares the rows for the caller.
    pub(crate) fn setup_result(&mut self) -> Result<()> {
        self.guard(|c| c.post_exec())
    }

    fn post_exec(&mut self) -> Result<()> {
        let dialect = self.dialect.clone();
        let capabilities = dialect.capabilities();
        let kind = self.kind;
        let has_description = self.cursor_mut()?.description().is_some();
        self.returns_rows = has_description
            && (self.is_explicit_returning
                || matches!(kind, StatementKind::Select | StatementKind::Text));
        match (kind, self.compiled) {
            (StatementKind::Insert, Some(compiled)) => {
                if self.is_implicit_returning
                    && (!self.executemany || capabilities.insert_executemany_returning)
                {
                    let rows = self.fetch_returning(compiled, false)?;
                    self.inserted_primary_key_rows = rows
                        .iter()
                        .zip(&self.compiled_parameters)
                        .map(|(row, parameters)| {
                            compiled.inserted_primary_key_from_returning(row, parameters)
                        })
                        .collect::<Result<_>>()?;
                    self.returned_default_rows = rows;
                } else if !self.executemany
                    && capabilities.postfetch_lastrowid
                    && compiled.postfetch_lastrowid()
                {
                    let cursor = self.cursor_mut()?;
                    let lastrowid = match dialect.get_lastrowid(cursor) {
                        Ok(v) => v,
                        Err(e) => return Err(self.plain_driver_error(e)),
                    };
                    self.lastrowid = lastrowid;
                    self.inserted_primary_key_rows = vec![compiled.inserted_primary_key_from_lastrowid(
                        lastrowid,
                        &self.compiled_parameters[0],
                        dialect.types(),
                    )?];
                } else {
                    self.inserted_primary_key_rows = self
                        .compiled_parameters
                        .iter()
                        .map(|parameters| {
                            compiled.inserted_primary_key_from_lastrowid(
                                None,
                                parameters,
                                dialect.types(),
                            )
                        })
                        .collect::<Result<_>>()?;
                }
            }
            (StatementKind::Update, Some(compiled)) if self.is_implicit_returning => {
                self.rowcount = Some(self.cursor_mut()?.rowcount());
                self.returned_default_rows = self.fetch_returning(compiled, true)?;
            }
            _ => {}
        }
        self.transition(ContextState::ResultBuilt)?;
        if !self.returns_rows {
            if self.rowcount.is_none() {
                self.rowcount = self.cursor.as_deref().map(|c| c.rowcount());
            }
            self.soft_close()?;
        }
        Ok(())
    }

    fn plain_driver_error(&mut self, error: anyhow::Error) -> Error {
        classify_driver_error(&*self.dialect, error, Some(self.statement.as_str()), None)
    }

    /// Rows of an implicit RETURNING, consumed with a single fetch.
    fn fetch_returning(&mut self, compiled: &dyn CompiledStatement, one: bool) -> Result<Vec<Row>> {
        let cursor = self.cursor_mut()?;
        let rows = if one {
            cursor.fetchone().map(|row| row.into_iter().collect())
        } else {
            cursor.fetchall()
        };
        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => return Err(self.plain_driver_error(e)),
        };
        if self.rowcount.is_none() {
            self.rowcount = Some(self.cursor_mut()?.rowcount());
        }
        rows.into_iter()
            .map(|row| self.process_row(row, compiled.result_types()))
            .collect()
    }

    pub(crate) fn process_row(&self, row: Row, types: &[SqlType]) -> Result<Row> {
        let registry = self.dialect.types();
        row.into_vec()
            .into_iter()
            .enumerate()
            .map(|(i, value)| match types.get(i) {
                Some(ty) => registry.process_result(ty, value),
                None => Ok(value),
            })
            .collect()
    }

    pub(crate) fn result_types(&self) -> &[SqlType] {
        self.compiled.map(|c| c.result_types()).unwrap_or_default()
    }

    /// Releases the rows, the metadata collected so far stays readable.
    pub(crate) fn soft_close(&mut self) -> Result<()> {
        if self.state == ContextState::SoftClosed {
            return Ok(());
        }
        if self.rowcount.is_none() {
            self.rowcount = self.cursor.as_deref().map(|c| c.rowcount());
        }
        self.release_cursor();
        self.transition(ContextState::SoftClosed)
    }

    pub(crate) fn close(&mut self) {
        self.release_cursor();
        if !matches!(self.state, ContextState::Failed | ContextState::Closed) {
            self.state = ContextState::Closed;
        }
    }

    /// Evaluates a column default on the cursor of this context, then closes it.
    pub(crate) fn evaluate_default(&mut self, default: &ColumnDefault, ty: &SqlType) -> Result<Value> {
        let dialect = self.dialect.clone();
        let value = self.guard(|c| evaluate_bare_default(&*dialect, c.cursor_mut()?, default, ty))?;
        self.close();
        Ok(value)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }
    pub fn dialect(&self) -> &dyn Dialect {
        &*self.dialect
    }
    pub fn kind(&self) -> StatementKind {
        self.kind
    }
    /// Final SQL text sent to the driver.
    pub fn statement(&self) -> &str {
        &self.statement
    }
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }
    /// Driver ready parameter groups.
    pub fn parameters(&self) -> &[DriverParameters] {
        &self.parameters
    }
    /// Symbolic parameter groups, after default resolution and before encoding.
    pub fn compiled_parameters(&self) -> &[Parameters] {
        &self.compiled_parameters
    }
    pub fn input_sizes(&self) -> Option<&[InputSize]> {
        self.input_sizes.as_deref()
    }
    pub fn is_executemany(&self) -> bool {
        self.executemany
    }
    pub fn is_server_side(&self) -> bool {
        self.is_server_side
    }
    pub fn is_crud(&self) -> bool {
        self.kind.is_crud()
    }
    pub fn is_ddl(&self) -> bool {
        self.kind == StatementKind::Ddl
    }
    pub fn is_text(&self) -> bool {
        self.kind == StatementKind::Text
    }
    pub fn is_explicit_returning(&self) -> bool {
        self.is_explicit_returning
    }
    pub fn is_implicit_returning(&self) -> bool {
        self.is_implicit_returning
    }
    pub fn cache_status(&self) -> String {
        self.cache_status.render(
            self.dialect.capabilities(),
            self.compiled.map(|c| c.generated_at()),
        )
    }
    /// Rows affected, `-1` when unknown.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
            .or_else(|| self.cursor.as_deref().map(|c| c.rowcount()))
            .unwrap_or(-1)
    }
    pub fn supports_sane_rowcount(&self) -> bool {
        self.dialect.capabilities().supports_sane_rowcount
    }
    pub fn supports_sane_multi_rowcount(&self) -> bool {
        self.dialect.capabilities().supports_sane_multi_rowcount
    }
    pub fn lastrowid(&self) -> Option<i64> {
        self.lastrowid
    }
    /// True when server side defaults were fired and may be fetched.
    pub fn lastrow_has_defaults(&self) -> bool {
        matches!(self.kind, StatementKind::Insert | StatementKind::Update)
            && !self.postfetch_cols.is_empty()
    }
    pub fn prefetch_cols(&self) -> &[String] {
        &self.prefetch_cols
    }
    pub fn postfetch_cols(&self) -> &[String] {
        &self.postfetch_cols
    }
    pub fn inserted_primary_key_rows(&self) -> &[Row] {
        &self.inserted_primary_key_rows
    }
    pub fn returned_default_rows(&self) -> &[Row] {
        &self.returned_default_rows
    }

    /// OUT parameters of a procedure call, when the dialect supports them.
    pub fn out_parameters(&mut self, names: &[String]) -> Result<Vec<Value>> {
        let dialect = self.dialect.clone();
        let cursor = self.cursor_mut()?;
        dialect.get_out_parameter_values(cursor, names)
    }
}

impl Drop for ExecutionContext<'_> {
    fn drop(&mut self) {
        self.close();
    }
}

fn driver_execute(
    dialect: &dyn Dialect,
    cursor: &mut dyn DriverCursor,
    statement: &str,
    parameters: &[DriverParameters],
    input_sizes: Option<&[InputSize]>,
    executemany: bool,
    no_parameters: bool,
) -> DriverResult<()> {
    if let Some(sizes) = input_sizes {
        dialect.do_set_input_sizes(cursor, sizes)?;
    }
    match parameters {
        [] => dialect.do_execute_no_params(cursor, statement),
        [group] if no_parameters && group.is_empty() => {
            dialect.do_execute_no_params(cursor, statement)
        }
        [group] if !executemany => dialect.do_execute(cursor, statement, group),
        groups => dialect.do_executemany(cursor, statement, groups),
    }
}
