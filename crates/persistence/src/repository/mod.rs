//! Repository implementations for database operations

pub mod trades;

pub use trades::*;
