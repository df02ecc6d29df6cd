//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `pullwatch` application.
//!
//! This module centralizes reusable components: error types, logging setup
//! and the owned handle for background tasks.

pub mod error;
pub mod logging;
pub mod task;
