//! Traffic-generation engine: the shared rate controller, the
//! discovery-driven sender pool, and the HTTP control surface that steers
//! them.

pub mod api;
pub mod config;
pub mod controller;
pub mod error;
pub mod pool;
pub mod telemetry;
pub mod throttle;
