//! HTTP and WebSocket surface: chain lookups, the latest-blocks feed, and a
//! push socket that streams every newly committed block.

pub mod routes;

pub use routes::{app_router, AppState};
