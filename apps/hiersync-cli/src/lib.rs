//! hiersync CLI library
//!
//! Exposes configuration, errors and command implementations for
//! integration testing. The binary entry point is in main.rs.

pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod signal;
