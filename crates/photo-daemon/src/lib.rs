pub mod config;
pub mod middleware;
pub mod server;
pub mod status;
pub mod telemetry;
