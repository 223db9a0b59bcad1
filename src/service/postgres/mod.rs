pub mod pg_dump;

pub use pg_dump::PgDumpProvider;
