//! extentraft core - shared types, errors and configuration for data nodes

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
