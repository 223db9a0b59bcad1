pub mod mysql_defaults;
pub mod mysqldump;

pub use mysqldump::MySqlDumpProvider;
