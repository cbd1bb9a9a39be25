//! Build engine capability.
//!
//! The engine executing the graph lives behind this two-method abstraction.
//! The `ADD --apt` extension submits a partially built graph mid-compile and
//! reads a single file back out of the produced filesystem; tests install a
//! deterministic fake.

use async_trait::async_trait;

use basalt_core::error::Result;

use crate::graph::GraphDefinition;

/// Client for the external build engine.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Execute a serialized graph and return a reference to the produced
    /// filesystem.
    async fn solve(&self, definition: &GraphDefinition) -> Result<Box<dyn SolveRef>>;
}

/// A reference to a solved filesystem.
#[async_trait]
pub trait SolveRef: Send + Sync {
    /// Read one file out of the solved filesystem.
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;
}
