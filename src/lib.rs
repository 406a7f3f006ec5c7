pub mod api;
pub mod clients;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod models;
pub mod store;
pub mod utils;
pub mod worker;
