//! Basalt Core - Foundational Types
//!
//! This module provides the foundational types shared across the basalt
//! Dockerfile frontend: error kinds, source locations, and platform triples.

pub mod error;
pub mod location;
pub mod platform;

// Re-export commonly used types
pub use error::{FrontendError, Result};
pub use location::{Position, SourceRange};
pub use platform::Platform;

/// Basalt version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
