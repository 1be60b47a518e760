//! Configuration management module
//!
//! This module handles the `AppConfig` connection settings and the local
//! configuration layers loaded from files and environment variables.

pub mod duration;
pub mod loader;
pub mod local;
pub mod settings;

pub use loader::*;
pub use local::*;
pub use settings::*;
