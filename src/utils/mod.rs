//! Utility functions module
//!
//! This module contains the clock abstraction, retry logic and the HTTP
//! client profile shared by the store and credential implementations.

pub mod datetime;
pub mod network;
pub mod retry;

pub use datetime::*;
pub use network::*;
pub use retry::*;
