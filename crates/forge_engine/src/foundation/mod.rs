//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the engine:
//! - Time management (clocks, deltas, interval timers, rate counters)
//! - Logging utilities

pub mod logging;
pub mod time;
