// Core modules
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod market;
pub mod models;
pub mod notify;
pub mod persistence;
pub mod retry;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::*;
pub use strategy::SignalStrategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
