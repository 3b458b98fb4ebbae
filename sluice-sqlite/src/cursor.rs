use crate::{
    CBox,
    bind::bind_parameters,
    connection::{Database, handle, last_error},
    extract::{extract_description, extract_row},
};
use anyhow::{Error, Result};
use libsqlite3_sys::*;
use sluice_core::{ColumnDescription, DriverCursor, DriverParameters, DriverResult, Row};
use std::{
    collections::VecDeque,
    ffi::{c_char, c_int},
    ptr,
};

/// True for the statements whose row count sqlite reports.
fn is_dml(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default();
    ["insert", "update", "delete", "replace"]
        .iter()
        .any(|v| keyword.eq_ignore_ascii_case(v))
}

/// Prepared statement stepped one row at a time.
///
/// Execution steps once to surface errors immediately, the first row is kept
/// until it is fetched. DML with RETURNING is drained on execution, so the row
/// count is final before the first fetch.
pub struct SqliteCursor {
    database: Database,
    statement: Option<CBox<*mut sqlite3_stmt>>,
    description: Option<Vec<ColumnDescription>>,
    buffered: VecDeque<Row>,
    done: bool,
    dml: bool,
    rowcount: i64,
    closed: bool,
}

impl SqliteCursor {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            database,
            statement: None,
            description: None,
            buffered: VecDeque::new(),
            done: true,
            dml: false,
            rowcount: -1,
            closed: false,
        }
    }

    fn prepare(&mut self, sql: &str) -> Result<Option<*mut sqlite3_stmt>> {
        if self.closed {
            return Err(Error::msg("Cannot operate on a closed cursor."));
        }
        let db = handle(&self.database)?;
        self.statement = None;
        self.description = None;
        self.buffered.clear();
        self.done = false;
        self.dml = is_dml(sql);
        self.rowcount = -1;
        let mut statement = CBox::new(ptr::null_mut(), |p| unsafe {
            sqlite3_finalize(p);
        });
        let mut tail: *const c_char = ptr::null();
        let start = sql.as_ptr() as *const c_char;
        let rc = unsafe { sqlite3_prepare_v2(db, start, sql.len() as c_int, &mut *statement, &mut tail) };
        if rc != SQLITE_OK {
            self.done = true;
            return Err(last_error(db));
        }
        if !tail.is_null() {
            let consumed = unsafe { tail.offset_from(start) } as usize;
            if !sql.get(consumed..).unwrap_or_default().trim().is_empty() {
                self.done = true;
                return Err(Error::msg("You can only execute one statement at a time."));
            }
        }
        if statement.is_null() {
            // Only whitespace or comments
            self.done = true;
            return Ok(None);
        }
        let ptr = *statement;
        if unsafe { sqlite3_column_count(ptr) } > 0 {
            self.description = Some(extract_description(ptr)?);
        }
        self.statement = Some(statement);
        Ok(Some(ptr))
    }

    fn changes(&self) -> Result<i64> {
        Ok(unsafe { sqlite3_changes64(handle(&self.database)?) })
    }

    fn step(&mut self) -> Result<Option<Row>> {
        if self.done {
            return Ok(None);
        }
        let Some(statement) = self.statement.as_ref().map(|v| **v) else {
            return Ok(None);
        };
        match unsafe { sqlite3_step(statement) } {
            SQLITE_ROW => Ok(Some(extract_row(statement)?)),
            SQLITE_DONE => {
                self.done = true;
                if self.dml {
                    self.rowcount = self.changes()?;
                }
                Ok(None)
            }
            _ => {
                self.done = true;
                Err(last_error(unsafe { sqlite3_db_handle(statement) }))
            }
        }
    }
}

impl DriverCursor for SqliteCursor {
    fn execute(&mut self, statement: &str, parameters: &DriverParameters) -> DriverResult<()> {
        let Some(prepared) = self.prepare(statement)? else {
            return Ok(());
        };
        bind_parameters(prepared, parameters)?;
        if self.dml && self.description.is_some() {
            while let Some(row) = self.step()? {
                self.buffered.push_back(row);
            }
        } else if let Some(row) = self.step()? {
            self.buffered.push_back(row);
        }
        Ok(())
    }

    fn execute_no_params(&mut self, statement: &str) -> DriverResult<()> {
        self.execute(statement, &DriverParameters::Positional(Vec::new()))
    }

    fn executemany(
        &mut self,
        statement: &str,
        parameters: &[DriverParameters],
    ) -> DriverResult<()> {
        let Some(prepared) = self.prepare(statement)? else {
            return Ok(());
        };
        if self.description.is_some() {
            self.done = true;
            return Err(Error::msg("executemany() can only execute DML statements."));
        }
        let mut total = 0;
        for group in parameters {
            unsafe {
                sqlite3_reset(prepared);
            }
            bind_parameters(prepared, group)?;
            self.done = false;
            self.step()?;
            if self.dml {
                total += self.rowcount.max(0);
            }
        }
        self.done = true;
        self.rowcount = if self.dml { total } else { -1 };
        Ok(())
    }

    fn description(&self) -> Option<&[ColumnDescription]> {
        self.description.as_deref()
    }

    fn fetchone(&mut self) -> DriverResult<Option<Row>> {
        if let Some(row) = self.buffered.pop_front() {
            return Ok(Some(row));
        }
        self.step()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }

    /// Rowid of the most recent successful insert on the database handle.
    fn lastrowid(&self) -> DriverResult<Option<i64>> {
        let id = unsafe { sqlite3_last_insert_rowid(handle(&self.database)?) };
        Ok((id != 0).then_some(id))
    }

    fn close(&mut self) -> DriverResult<()> {
        self.statement = None;
        self.description = None;
        self.buffered.clear();
        self.done = true;
        self.closed = true;
        Ok(())
    }
}
