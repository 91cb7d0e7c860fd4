//! HTTP middleware.
//!
//! This module provides request logging with latency tracking.

pub mod logging;

pub use logging::{request_logging, request_logging_simple};
