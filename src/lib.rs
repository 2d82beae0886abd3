pub mod config;
pub mod entitlements;
pub mod error;
pub mod routes;
pub mod telemetry;

pub use routes::{app, root};
