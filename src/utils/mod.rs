//! Utility modules for the parallelizer.
//!
//! This module contains common utilities used throughout the codebase:
//! - Error types
//! - Boolean reachability matrices
//! - Text formatting

pub mod errors;
pub mod matrix;
pub mod pretty;

// Re-exports
pub use errors::*;
pub use matrix::BitMatrix;
pub use pretty::CodeFormatter;
