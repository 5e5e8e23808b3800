pub mod config;
pub mod engine;
pub mod errors;
pub mod execution;
pub mod gateway;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;
