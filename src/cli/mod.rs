//! CLI module for the demo application
//!
//! Argument parsing for `demo-app` and the small web application it serves.

pub mod commands;
pub mod demo;

pub use commands::*;
