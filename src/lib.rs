pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod jwt;
pub mod logger;
pub mod probe;
pub mod scheduler;
pub mod token_store;
pub mod user_agent;
pub mod utils;
pub mod worker;

#[cfg(test)]
mod mock_api;
