pub mod mock;
mod defaults;
mod expanding;
mod many;
#[cfg(not(feature = "disable-schemas"))]
mod schema;
mod simple;
mod text;
mod transaction;

use defaults::defaults;
use expanding::expanding;
use log::LevelFilter;
use many::many;
#[cfg(not(feature = "disable-schemas"))]
use schema::schema;
use simple::simple;
use sluice_core::{Compiled, CompiledBuilder, Connection, Parameters, StatementKind, Value};
use std::env;
use text::text;
use transaction::transaction;

pub fn init_logs() {
    let mut logger = env_logger::builder();
    logger
        .is_test(true)
        .format_file(true)
        .format_line_number(true);
    if env::var("RUST_LOG").is_err() {
        logger.filter_level(LevelFilter::Warn);
    }
    let _ = logger.try_init();
}

/// Runs the shared suite, the connection must point to an empty database.
pub fn execute_tests(mut connection: Connection) {
    simple(&mut connection);
    many(&mut connection);
    expanding(&mut connection);
    defaults(&mut connection);
    text(&mut connection);
    transaction(&mut connection);
    #[cfg(not(feature = "disable-schemas"))]
    schema(&mut connection);
    connection
        .close()
        .expect("Could not close the connection at the end of the tests");
}

/// Statement builder in the paramstyle of the connection.
pub fn statement(connection: &Connection, kind: StatementKind) -> CompiledBuilder {
    Compiled::builder(kind, connection.dialect().capabilities().paramstyle)
}

pub fn ddl(connection: &mut Connection, sql: &str) {
    let compiled = statement(connection, StatementKind::Ddl).sql(sql).build();
    connection
        .execute_ddl(&compiled)
        .unwrap_or_else(|e| panic!("Could not run `{sql}`: {e:#}"));
}

/// Whether inserts should ask for the generated values with RETURNING.
pub fn use_returning(connection: &Connection) -> bool {
    !cfg!(feature = "disable-returning") && connection.dialect().capabilities().implicit_returning
}

#[macro_export]
macro_rules! silent_logs {
    ($($code:tt)+) => {{
        let level = log::max_level();
        log::set_max_level(log::LevelFilter::Off);
        $($code)+
        log::set_max_level(level);
    }};
}

/// Parameter group from key value pairs.
pub fn params<const N: usize>(values: [(&str, Value); N]) -> Parameters {
    values
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Single value returned by a raw query.
pub fn query_scalar(connection: &mut Connection, sql: &str) -> Value {
    connection
        .exec_driver_sql(sql, Vec::new())
        .and_then(|mut result| result.scalar())
        .unwrap_or_else(|e| panic!("Could not run `{sql}`: {e:#}"))
        .unwrap_or_default()
}
