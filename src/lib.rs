mod async_connection;

pub use async_connection::*;
pub use sluice_core::*;
