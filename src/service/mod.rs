pub mod command;
pub mod mysql;
pub mod postgres;
#[allow(clippy::module_inception)]
mod service;

pub use mysql::MySqlDumpProvider;
pub use postgres::PgDumpProvider;
pub use service::{DumpError, DumpProvider};
