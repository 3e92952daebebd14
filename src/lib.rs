pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod state;
pub mod stream;

pub use errors::ChatError;
pub use state::AppState;
