/// Core Module
///
/// The persistence engine and its shared error type.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{Result, StoreError};
