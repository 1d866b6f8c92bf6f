pub mod config;
pub mod database;
pub mod lookup_repository;
pub mod rate_limit_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use lookup_repository::LookupRepository;
pub use rate_limit_repository::RateLimitRepository;
