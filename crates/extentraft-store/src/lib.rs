//! extentraft store - extent store contract and the in-memory engine

pub mod error;
pub mod memory;
pub mod store;

pub use error::*;
pub use memory::*;
pub use store::*;
