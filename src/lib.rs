pub mod config;
pub mod db;
pub mod engine;
pub mod extract;
pub mod models;
pub mod responses;
pub mod routes;
pub mod sql_gateway;
pub mod state;
pub mod worker;

pub use state::AppState;
