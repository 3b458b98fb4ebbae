use anyhow::{Error, Result};
use libsqlite3_sys::*;
use sluice_core::{ColumnDescription, Row, Value};
use std::{
    ffi::{CStr, c_int},
    slice,
};

pub(crate) fn extract_value(statement: *mut sqlite3_stmt, index: c_int) -> Result<Value> {
    unsafe {
        let column_type = sqlite3_column_type(statement, index);
        Ok(match column_type {
            SQLITE_NULL => Value::Null,
            SQLITE_INTEGER => Value::Int64(sqlite3_column_int64(statement, index)),
            SQLITE_FLOAT => Value::Float64(sqlite3_column_double(statement, index)),
            SQLITE_BLOB => {
                let ptr = sqlite3_column_blob(statement, index) as *const u8;
                let len = sqlite3_column_bytes(statement, index) as usize;
                if ptr.is_null() {
                    Value::Blob(Box::default())
                } else {
                    Value::Blob(slice::from_raw_parts(ptr, len).into())
                }
            }
            SQLITE_TEXT => {
                let ptr = sqlite3_column_text(statement, index);
                let len = sqlite3_column_bytes(statement, index) as usize;
                if ptr.is_null() {
                    Value::Varchar(String::new())
                } else {
                    Value::Varchar(String::from_utf8_lossy(slice::from_raw_parts(ptr, len)).into())
                }
            }
            _ => {
                return Err(Error::msg(format!(
                    "Unexpected column type {}",
                    column_type
                )));
            }
        })
    }
}

pub(crate) fn extract_row(statement: *mut sqlite3_stmt) -> Result<Row> {
    let count = unsafe { sqlite3_column_count(statement) };
    (0..count).map(|i| extract_value(statement, i)).collect()
}

pub(crate) fn extract_name(statement: *mut sqlite3_stmt, index: c_int) -> Result<String> {
    unsafe {
        Ok(CStr::from_ptr(sqlite3_column_name(statement, index))
            .to_str()?
            .into())
    }
}

/// Column names with the declared type of the table column they come from.
pub(crate) fn extract_description(statement: *mut sqlite3_stmt) -> Result<Vec<ColumnDescription>> {
    let count = unsafe { sqlite3_column_count(statement) };
    (0..count)
        .map(|i| {
            let mut column = ColumnDescription::new(extract_name(statement, i)?);
            let declared = unsafe { sqlite3_column_decltype(statement, i) };
            if !declared.is_null() {
                column.declared_type = Some(unsafe { CStr::from_ptr(declared) }.to_str()?.into());
            }
            Ok(column)
        })
        .collect()
}
