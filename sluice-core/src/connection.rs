use crate::{
    CacheStatus, ColumnDefault, CompiledStatement, CursorResult, Dialect, DriverConnection,
    DriverParameters, DriverResult, Error, ExecutionContext, ExecutionOptions, IsolationLevel,
    Parameters, Result, SqlType, StatementKind, Value, classify_driver_error, log_failure,
};
use std::sync::Arc;

/// A live database connection seen through a dialect.
///
/// Every statement runs inside an [`ExecutionContext`] that borrows the
/// connection mutably, so one connection runs at most one statement at a time.
pub struct Connection {
    dialect: Arc<dyn Dialect>,
    driver: Box<dyn DriverConnection>,
    options: ExecutionOptions,
    in_transaction: bool,
    savepoints: Vec<String>,
    savepoint_seq: usize,
    isolation_level_changed: bool,
    invalidated: bool,
    closed: bool,
}

impl Connection {
    /// Wraps a driver connection, initializing the dialect on first use.
    pub fn new(dialect: Arc<dyn Dialect>, mut driver: Box<dyn DriverConnection>) -> Result<Self> {
        dialect.initialize(driver.as_mut())?;
        let mut connection = Self {
            dialect,
            driver,
            options: ExecutionOptions::default(),
            in_transaction: false,
            savepoints: Vec::new(),
            savepoint_seq: 0,
            isolation_level_changed: false,
            invalidated: false,
            closed: false,
        };
        if let Some(level) = connection.dialect.capabilities().isolation_level.clone() {
            connection.set_isolation_level(level)?;
        }
        Ok(connection)
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// Sets options inherited by every statement of this connection.
    pub fn execution_options(&mut self, options: ExecutionOptions) -> Result<&mut Self> {
        if let Some(level) = options.isolation_level.clone() {
            self.set_isolation_level(level)?;
        }
        self.options = self.options.merge(&options);
        Ok(self)
    }

    pub(crate) fn driver_mut(&mut self) -> &mut dyn DriverConnection {
        self.driver.as_mut()
    }

    pub(crate) fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(Error::resource_closed("This connection is closed"));
        }
        if self.invalidated {
            return Err(Error::invalid_request(
                "This connection was invalidated by a disconnect and cannot be used anymore",
            ));
        }
        Ok(())
    }

    /// Marks the connection as unusable after a disconnect.
    pub fn invalidate(&mut self) {
        if !self.invalidated {
            log::warn!("Invalidating connection to {}", self.dialect.name());
        }
        self.invalidated = true;
        self.in_transaction = false;
        self.savepoints.clear();
    }

    pub fn invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn driver_result<T>(&mut self, result: DriverResult<T>, statement: Option<&str>) -> Result<T> {
        result.map_err(|e| {
            let error = classify_driver_error(&*self.dialect, e, statement, None);
            if error.is_disconnect() {
                self.invalidate();
            }
            log::error!("{:#}", error);
            error
        })
    }

    pub fn execute<'c>(
        &'c mut self,
        compiled: &'c dyn CompiledStatement,
        groups: Vec<Parameters>,
    ) -> Result<CursorResult<'c>> {
        self.execute_with(
            compiled,
            groups,
            &ExecutionOptions::default(),
            CacheStatus::default(),
            None,
        )
    }

    /// Executes a compiled statement.
    ///
    /// One group runs through `do_execute`, several through `do_executemany`.
    /// `extracted` replaces the cached literal values of a statement reused
    /// from the compiled cache.
    pub fn execute_with<'c>(
        &'c mut self,
        compiled: &'c dyn CompiledStatement,
        groups: Vec<Parameters>,
        options: &ExecutionOptions,
        cache_status: CacheStatus,
        extracted: Option<&[Value]>,
    ) -> Result<CursorResult<'c>> {
        let mut context = if compiled.kind() == StatementKind::Ddl {
            ExecutionContext::ddl(self, compiled, options)?
        } else {
            ExecutionContext::compiled(self, compiled, groups, options, cache_status, extracted)?
        };
        log::info!(
            "[{}] {}",
            context.cache_status(),
            crate::truncate_long!(context.statement())
        );
        context.execute()?;
        CursorResult::new(context)
    }

    pub fn execute_ddl<'c>(
        &'c mut self,
        compiled: &'c dyn CompiledStatement,
    ) -> Result<CursorResult<'c>> {
        let mut context = ExecutionContext::ddl(self, compiled, &ExecutionOptions::default())?;
        log::info!("{}", crate::truncate_long!(context.statement()));
        context.execute()?;
        CursorResult::new(context)
    }

    /// Raw SQL in the driver paramstyle, parameters are passed through untouched.
    pub fn exec_driver_sql(
        &mut self,
        statement: &str,
        groups: Vec<DriverParameters>,
    ) -> Result<CursorResult<'_>> {
        self.exec_driver_sql_with(statement, groups, &ExecutionOptions::default())
    }

    pub fn exec_driver_sql_with(
        &mut self,
        statement: &str,
        groups: Vec<DriverParameters>,
        options: &ExecutionOptions,
    ) -> Result<CursorResult<'_>> {
        let mut context = ExecutionContext::text(self, statement, groups, options)?;
        log::info!("[raw sql] {}", crate::truncate_long!(context.statement()));
        context.execute()?;
        CursorResult::new(context)
    }

    /// Evaluates a column default outside of any statement.
    pub fn execute_default(&mut self, default: &ColumnDefault, ty: &SqlType) -> Result<Value> {
        let mut context = ExecutionContext::default_evaluation(self, &ExecutionOptions::default())?;
        context.evaluate_default(default, ty)
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn in_nested_transaction(&self) -> bool {
        !self.savepoints.is_empty()
    }

    pub fn begin(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if self.in_transaction {
            return Err(Error::invalid_request(
                "A transaction is already begun on this connection, use begin_nested for a savepoint",
            ));
        }
        let dialect = self.dialect.clone();
        let result = dialect.do_begin(self.driver.as_mut());
        self.driver_result(result, Some("BEGIN"))?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commits the current transaction, no effect without one.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if !self.in_transaction {
            return Ok(());
        }
        let dialect = self.dialect.clone();
        let result = dialect.do_commit(self.driver.as_mut());
        self.in_transaction = false;
        self.savepoints.clear();
        self.driver_result(result, Some("COMMIT"))
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.ensure_usable()?;
        if !self.in_transaction {
            return Ok(());
        }
        let dialect = self.dialect.clone();
        let result = dialect.do_rollback(self.driver.as_mut());
        self.in_transaction = false;
        self.savepoints.clear();
        self.driver_result(result, Some("ROLLBACK"))
    }

    /// Opens a savepoint, beginning a transaction first when needed. Returns its name.
    pub fn begin_nested(&mut self) -> Result<String> {
        self.ensure_usable()?;
        if !self.in_transaction {
            self.begin()?;
        }
        self.savepoint_seq += 1;
        let name = format!("sl_savepoint_{}", self.savepoint_seq);
        let dialect = self.dialect.clone();
        let result = dialect.do_savepoint(self.driver.as_mut(), &name);
        self.driver_result(result, Some("SAVEPOINT"))?;
        self.savepoints.push(name.clone());
        Ok(name)
    }

    fn savepoint_position(&self, name: &str) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|v| v == name)
            .ok_or_else(|| Error::invalid_request(format!("No active savepoint named `{name}`")))
    }

    /// Releases `name` together with every savepoint opened after it.
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let position = self.savepoint_position(name)?;
        let dialect = self.dialect.clone();
        let result = dialect.do_release_savepoint(self.driver.as_mut(), name);
        self.driver_result(result, Some("RELEASE SAVEPOINT"))?;
        self.savepoints.truncate(position);
        Ok(())
    }

    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.ensure_usable()?;
        let position = self.savepoint_position(name)?;
        let dialect = self.dialect.clone();
        let result = dialect.do_rollback_to_savepoint(self.driver.as_mut(), name);
        self.driver_result(result, Some("ROLLBACK TO SAVEPOINT"))?;
        self.savepoints.truncate(position);
        Ok(())
    }

    /// Changes the isolation level, not allowed inside a transaction.
    pub fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<()> {
        self.ensure_usable()?;
        if self.in_transaction {
            return Err(Error::invalid_request(
                "The isolation level cannot be changed while a transaction is in progress",
            ));
        }
        self.dialect.validate_isolation_level(&level)?;
        let dialect = self.dialect.clone();
        let result = dialect.set_isolation_level(self.driver.as_mut(), &level);
        self.driver_result(result, None)?;
        self.isolation_level_changed = true;
        log::debug!("Isolation level set to {level}");
        Ok(())
    }

    pub fn get_isolation_level(&mut self) -> Result<Option<IsolationLevel>> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        dialect.get_isolation_level(self.driver.as_mut())
    }

    /// Level detected by the dialect when it was initialized.
    pub fn default_isolation_level(&self) -> Option<&IsolationLevel> {
        self.dialect.runtime().default_isolation_level()
    }

    /// Round trip to the server, `false` when the connection is gone.
    pub fn ping(&mut self) -> Result<bool> {
        self.ensure_usable()?;
        let dialect = self.dialect.clone();
        let result = dialect.do_ping(self.driver.as_mut());
        let alive = self.driver_result(result, Some("SELECT 1"))?;
        if !alive {
            self.invalidate();
        }
        Ok(alive)
    }

    /// Restores the characteristics changed on this connection, then closes it.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let dialect = self.dialect.clone();
        if !self.invalidated {
            if self.in_transaction {
                log_failure!(
                    dialect.do_rollback(self.driver.as_mut()),
                    "Could not roll back the transaction of a closing connection"
                );
                self.in_transaction = false;
                self.savepoints.clear();
            }
            if self.isolation_level_changed
                && let Some(level) = dialect.runtime().default_isolation_level()
            {
                log_failure!(
                    dialect.set_isolation_level(self.driver.as_mut(), level),
                    "Could not reset the isolation level to {}",
                    level
                );
            }
        }
        self.isolation_level_changed = false;
        self.closed = true;
        let result = dialect.do_close(self.driver.as_mut());
        self.driver_result(result, None)
    }
}
