pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod entities;
pub mod error;
pub mod external;
pub mod logging;
pub mod notify;
pub mod pricing;
pub mod server;
pub mod store;

pub mod simulation;
