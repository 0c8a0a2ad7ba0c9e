// Relational persistence
pub mod postgres;

pub use postgres::PostgresSignalStore;
