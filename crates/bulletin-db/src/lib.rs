pub mod config;
pub mod database;
pub mod entry_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use entry_repository::EntryRepository;
