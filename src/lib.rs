// Public API for integration tests and the server binary

pub mod broadcast;
pub mod config;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod types;
pub mod ws;
