//! Compile-time configuration for file geometry and packet layout.

mod constants;

pub use constants::*;
