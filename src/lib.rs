pub mod app_state;
pub mod config;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;

pub use app_state::AppState;
