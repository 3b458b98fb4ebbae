use crate::{CBox, SqliteCursor, error_message_from_ptr};
use anyhow::{Context, Error, Result};
use libsqlite3_sys::*;
use sluice_core::{DriverConnection, DriverCursor, DriverResult};
use std::{
    ffi::{CString, c_char},
    ptr,
    sync::{
        Arc,
        atomic::{AtomicPtr, Ordering},
    },
};

// Missing from the libsqlite3-sys bindings, but defined by the bundled sqlite
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut sqlite3) -> std::ffi::c_int;
}

/// Message of every call made after the database handle was closed.
pub const CLOSED_DATABASE: &str = "Cannot operate on a closed database.";

/// Milliseconds a statement waits on a locked database before failing.
const BUSY_TIMEOUT: i32 = 5000;

/// Database handle shared by a connection and its cursors.
pub(crate) type Database = Arc<CBox<AtomicPtr<sqlite3>>>;

pub(crate) fn handle(database: &Database) -> Result<*mut sqlite3> {
    let ptr = database.load(Ordering::Acquire);
    if ptr.is_null() {
        return Err(Error::msg(CLOSED_DATABASE));
    }
    Ok(ptr)
}

pub(crate) fn last_error(db: *mut sqlite3) -> Error {
    unsafe { Error::msg(error_message_from_ptr(&sqlite3_errmsg(db)).to_string()) }
}

/// Runs statements that return no rows, used for transaction control.
pub(crate) fn exec_batch(database: &Database, sql: &str) -> Result<()> {
    let db = handle(database)?;
    let statement = CString::new(sql).context("Could not create a CString from the query String")?;
    unsafe {
        let mut message: *mut c_char = ptr::null_mut();
        let rc = sqlite3_exec(db, statement.as_ptr(), None, ptr::null_mut(), &mut message);
        if rc != SQLITE_OK {
            let error = Error::msg(error_message_from_ptr(&(message as *const c_char)).to_string());
            sqlite3_free(message.cast());
            return Err(error);
        }
    }
    Ok(())
}

/// Connection to one sqlite database file.
pub struct SqliteConnection {
    pub(crate) database: Database,
    filename: String,
}

impl SqliteConnection {
    /// Opens `filename`, given in the sqlite URI format (`file:path?mode=rwc`).
    pub fn open(filename: &str) -> Result<Self> {
        let context = || format!("Error while opening the sqlite database `{}`", filename);
        let path = CString::new(filename).with_context(context)?;
        let mut connection: *mut sqlite3 = ptr::null_mut();
        let rc = unsafe {
            sqlite3_open_v2(
                path.as_ptr(),
                &mut connection,
                SQLITE_OPEN_URI | SQLITE_OPEN_READWRITE | SQLITE_OPEN_CREATE,
                ptr::null(),
            )
        };
        // The handle must be released even when opening failed
        let database: Database = Arc::new(CBox::new(AtomicPtr::new(connection), |p| unsafe {
            sqlite3_close_v2(p.into_inner());
        }));
        if rc != SQLITE_OK {
            let error = if connection.is_null() {
                Error::msg("Out of memory while opening the database")
            } else {
                last_error(connection)
            };
            return Err(error.context(context()));
        }
        unsafe {
            sqlite3_busy_timeout(connection, BUSY_TIMEOUT);
        }
        log::debug!("Opened sqlite database `{}`", filename);
        Ok(Self {
            database,
            filename: filename.into(),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// False while a transaction is open on the database handle.
    pub fn autocommit(&self) -> Result<bool> {
        let db = handle(&self.database)?;
        Ok(unsafe { sqlite3_get_autocommit(db) } != 0)
    }
}

impl DriverConnection for SqliteConnection {
    fn cursor(&mut self) -> DriverResult<Box<dyn DriverCursor>> {
        handle(&self.database)?;
        Ok(Box::new(SqliteCursor::new(self.database.clone())))
    }

    fn begin(&mut self) -> DriverResult<()> {
        exec_batch(&self.database, "BEGIN")
    }

    fn commit(&mut self) -> DriverResult<()> {
        exec_batch(&self.database, "COMMIT")
    }

    fn rollback(&mut self) -> DriverResult<()> {
        exec_batch(&self.database, "ROLLBACK")
    }

    /// Closing is deferred by sqlite until the open cursors are finalized.
    fn close(&mut self) -> DriverResult<()> {
        let ptr = self.database.swap(ptr::null_mut(), Ordering::AcqRel);
        if ptr.is_null() {
            return Ok(());
        }
        let rc = unsafe { sqlite3_close_v2(ptr) };
        if rc != SQLITE_OK {
            return Err(Error::msg(format!(
                "Could not close the sqlite database `{}` (code {})",
                self.filename, rc
            )));
        }
        log::debug!("Closed sqlite database `{}`", self.filename);
        Ok(())
    }
}
