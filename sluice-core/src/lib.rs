mod cache;
mod capabilities;
mod compiled;
mod connection;
mod context;
mod defaults;
mod dialect;
mod driver;
mod error;
mod options;
mod parameters;
mod preparer;
mod result;
mod types;
mod util;
mod value;

pub use ::anyhow::Context;
pub use cache::*;
pub use capabilities::*;
pub use compiled::*;
pub use connection::*;
pub use context::*;
pub use defaults::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use options::*;
pub use parameters::*;
pub use preparer::*;
pub use result::*;
pub use types::*;
pub use util::*;
pub use value::*;
