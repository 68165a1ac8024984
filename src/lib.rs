pub mod api;
pub mod channels;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod store;
pub mod utils;
