//! Health and metrics HTTP server

pub mod server;

pub use server::HealthServer;
