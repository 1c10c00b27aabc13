//! Database connection pool, migrations, and TimescaleDB setup

pub mod migrations;
pub mod pool;
pub mod timescale;

pub use pool::Database;
