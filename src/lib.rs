//! Price-evidence oracle library.
//!
//! Exposes the chain's core modules for use by the binary and by tests:
//! the data model, configuration, venue collectors, the block store, the
//! chain manager, the map/reduce orchestrator, and the HTTP/WS surface.

pub mod api;
pub mod chain;
pub mod collectors;
pub mod config;
pub mod model;
pub mod orchestrator;
pub mod store;

pub use config::Config;
pub use model::FullSignedBlock;
