use crate::error_message_from_ptr;
use anyhow::{Error, Result};
use libsqlite3_sys::*;
use sluice_core::{DriverParameters, Value, format_date, format_time, format_timestamp};
use std::{
    ffi::{CStr, c_int},
    os::raw::{c_char, c_void},
};

unsafe fn bind_text(statement: *mut sqlite3_stmt, index: c_int, value: &str) -> c_int {
    unsafe {
        sqlite3_bind_text(
            statement,
            index,
            value.as_ptr() as *const c_char,
            value.len() as c_int,
            SQLITE_TRANSIENT(),
        )
    }
}

/// Binds one value at the 1-based `index` of the statement.
pub(crate) fn bind_value(statement: *mut sqlite3_stmt, index: c_int, value: &Value) -> Result<()> {
    unsafe {
        let rc = match value {
            Value::Null => sqlite3_bind_null(statement, index),
            Value::Boolean(v) => sqlite3_bind_int(statement, index, *v as c_int),
            Value::Int64(v) => sqlite3_bind_int64(statement, index, *v),
            Value::Float64(v) => sqlite3_bind_double(statement, index, *v),
            Value::Decimal(v) => bind_text(statement, index, &v.to_string()),
            Value::Varchar(v) => bind_text(statement, index, v),
            Value::Blob(v) => sqlite3_bind_blob(
                statement,
                index,
                v.as_ptr() as *const c_void,
                v.len() as c_int,
                SQLITE_TRANSIENT(),
            ),
            Value::Date(v) => bind_text(statement, index, &format_date(v)),
            Value::Time(v) => bind_text(statement, index, &format_time(v)),
            Value::Timestamp(v) => bind_text(statement, index, &format_timestamp(v)),
            Value::Uuid(v) => bind_text(statement, index, &v.hyphenated().to_string()),
            Value::List(..) | Value::Tuple(..) => {
                return Err(Error::msg(format!(
                    "Cannot use a {} as a query parameter",
                    value.type_name()
                )));
            }
        };
        if rc != SQLITE_OK {
            let db = sqlite3_db_handle(statement);
            let query = sqlite3_sql(statement);
            return Err(
                Error::msg(error_message_from_ptr(&sqlite3_errmsg(db)).to_string()).context(
                    format!(
                        "Cannot bind parameter {} to query:\n{}",
                        index,
                        sluice_core::truncate_long!(CStr::from_ptr(query).to_string_lossy())
                    ),
                ),
            );
        }
    }
    Ok(())
}

/// Binds a whole parameter group, every placeholder of the statement must get a value.
pub(crate) fn bind_parameters(
    statement: *mut sqlite3_stmt,
    parameters: &DriverParameters,
) -> Result<()> {
    unsafe {
        sqlite3_clear_bindings(statement);
        let count = sqlite3_bind_parameter_count(statement);
        match parameters {
            DriverParameters::Positional(values) => {
                if values.len() != count as usize {
                    return Err(Error::msg(format!(
                        "Incorrect number of bindings supplied. The current statement uses {}, and there are {} supplied",
                        count,
                        values.len()
                    )));
                }
                for (i, value) in values.iter().enumerate() {
                    bind_value(statement, i as c_int + 1, value)?;
                }
            }
            DriverParameters::Named(values) => {
                for index in 1..=count {
                    let name = sqlite3_bind_parameter_name(statement, index);
                    if name.is_null() {
                        return Err(Error::msg(format!(
                            "Binding {index} has no name, but you supplied a dictionary"
                        )));
                    }
                    let name = CStr::from_ptr(name).to_str()?;
                    // Drop the `:`, `@` or `$` prefix
                    let key = name.get(1..).unwrap_or_default();
                    let Some(value) = values.get(key) else {
                        return Err(Error::msg(format!(
                            "You did not supply a value for binding parameter {name}"
                        )));
                    };
                    bind_value(statement, index, value)?;
                }
            }
        }
    }
    Ok(())
}
