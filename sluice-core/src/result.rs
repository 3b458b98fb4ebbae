use crate::{ContextState, Error, ExecutionContext, Result, Row, StatementKind};

/// Rows and metadata of one execution.
///
/// Statements that do not return rows are soft closed as soon as the result
/// is built: the cursor is released while `rowcount`, the primary key and the
/// returned defaults stay readable.
pub struct CursorResult<'c> {
    context: ExecutionContext<'c>,
    keys: Vec<String>,
}

impl<'c> CursorResult<'c> {
    pub(crate) fn new(mut context: ExecutionContext<'c>) -> Result<Self> {
        context.setup_result()?;
        let keys = context
            .cursor
            .as_deref()
            .and_then(|c| c.description())
            .map(|d| d.iter().map(|c| c.name.clone()).collect())
            .unwrap_or_default();
        Ok(Self { context, keys })
    }

    pub fn context(&self) -> &ExecutionContext<'c> {
        &self.context
    }

    pub fn returns_rows(&self) -> bool {
        self.context.returns_rows
    }

    /// Column names of the rows.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn is_closed(&self) -> bool {
        matches!(
            self.context.state(),
            ContextState::Closed | ContextState::Failed
        )
    }

    pub fn fetchone(&mut self) -> Result<Option<Row>> {
        match self.context.state() {
            ContextState::ResultBuilt => {}
            ContextState::SoftClosed if self.context.returns_rows => return Ok(None),
            ContextState::SoftClosed => {
                return Err(Error::resource_closed(
                    "This result object does not return rows. It has been closed automatically",
                ));
            }
            _ => return Err(Error::resource_closed("This result object is closed")),
        }
        let fetched = self.context.cursor_mut()?.fetchone();
        match fetched {
            Ok(Some(row)) => self
                .context
                .process_row(row, self.context.result_types())
                .map(Some),
            Ok(None) => {
                self.context.soft_close()?;
                Ok(None)
            }
            Err(e) => Err(self.context.driver_error(e)),
        }
    }

    /// Up to `size` rows, fewer when the result is exhausted.
    pub fn fetchmany(&mut self, size: usize) -> Result<Vec<Row>> {
        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            match self.fetchone()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    pub fn fetchall(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetchone()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// First column of the first row, the result is closed afterwards.
    pub fn scalar(&mut self) -> Result<Option<crate::Value>> {
        let row = self.fetchone()?;
        self.close();
        Ok(row.and_then(|r| r.into_vec().into_iter().next()))
    }

    /// Rows matched by the statement, `-1` when the driver cannot tell.
    pub fn rowcount(&self) -> i64 {
        self.context.rowcount()
    }

    pub fn lastrowid(&self) -> Option<i64> {
        self.context.lastrowid()
    }

    fn ensure_insert(&self) -> Result<()> {
        if self.context.kind() != StatementKind::Insert {
            return Err(Error::invalid_request(
                "Statement is not a compiled insert() expression construct",
            ));
        }
        Ok(())
    }

    /// Primary key of the row just inserted, single row inserts only.
    pub fn inserted_primary_key(&self) -> Result<&Row> {
        self.ensure_insert()?;
        if self.context.is_executemany() {
            return Err(Error::invalid_request(
                "This statement was an executemany call, use inserted_primary_key_rows",
            ));
        }
        self.context
            .inserted_primary_key_rows()
            .first()
            .ok_or_else(|| Error::invalid_request("No primary key was generated for this statement"))
    }

    pub fn inserted_primary_key_rows(&self) -> Result<&[Row]> {
        self.ensure_insert()?;
        Ok(self.context.inserted_primary_key_rows())
    }

    /// Server generated values fetched through implicit RETURNING.
    pub fn returned_defaults(&self) -> Option<&Row> {
        self.context.returned_default_rows().first()
    }

    pub fn returned_defaults_rows(&self) -> &[Row] {
        self.context.returned_default_rows()
    }

    pub fn lastrow_has_defaults(&self) -> bool {
        self.context.lastrow_has_defaults()
    }

    pub fn postfetch_cols(&self) -> &[String] {
        self.context.postfetch_cols()
    }

    pub fn prefetch_cols(&self) -> &[String] {
        self.context.prefetch_cols()
    }

    pub fn supports_sane_rowcount(&self) -> bool {
        self.context.supports_sane_rowcount()
    }

    pub fn supports_sane_multi_rowcount(&self) -> bool {
        self.context.supports_sane_multi_rowcount()
    }

    pub fn cache_status(&self) -> String {
        self.context.cache_status()
    }

    /// Releases the cursor, later fetches fail.
    pub fn close(&mut self) {
        self.context.close();
    }
}
