//! Basalt Frontend - Dockerfile build-graph compiler.
//!
//! Consumes a parsed Dockerfile, build arguments, and target platform, and
//! produces a content-addressed build graph plus the target stage's image
//! configuration. The graph is executed by an external build engine reached
//! through the [`solver::Engine`] capability; the `ADD --apt` extension uses
//! that capability mid-compile to resolve package download URIs.

pub mod apt;
pub mod ast;
pub mod compile;
pub mod dispatch;
pub mod graph;
pub mod image;
pub mod instruction;
pub mod lint;
pub mod resolver;
pub mod shell;
pub mod solver;

pub use compile::{compile, CompileConfig, CompileResult, Features};
pub use graph::{GraphDefinition, OpRef};
pub use image::ImageConfig;
pub use lint::{CheckConfig, LintWarning, Linter};
pub use solver::{Engine, SolveRef};
