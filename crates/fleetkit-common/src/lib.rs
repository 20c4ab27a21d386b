//! # FleetKit Common
//!
//! Shared pieces for the FleetKit offline caching layer.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Injectable wall clock for freshness checks

pub mod clock;
pub mod logging;

pub use clock::{Clock, ManualClock, SystemClock};
pub use logging::{init_logging, LogConfig, LogFormat};
