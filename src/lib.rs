pub mod api;
pub mod clients;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;
pub mod worker;
