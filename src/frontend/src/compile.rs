//! Compilation entry point.
//!
//! Parses the instruction stream, resolves the stage DAG, dispatches the
//! target stage and its ancestors (layer by layer, independent stages in
//! parallel), and serializes the resulting graph and image configuration.
//! All configuration flows through [`CompileConfig`]; there is no
//! process-global state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use basalt_core::error::{FrontendError, Result};
use basalt_core::platform::Platform;

use crate::ast::Node;
use crate::dispatch::{self, StageOutput};
use crate::graph::GraphDefinition;
use crate::instruction::parse::parse_dockerfile;
use crate::lint::{CheckConfig, LintWarning, Linter};
use crate::resolver;
use crate::solver::Engine;

/// Gates for optional instruction features.
#[derive(Debug, Clone, Default)]
pub struct Features {
    /// `COPY`/`ADD --exclude`
    pub exclude_patterns: bool,
    /// `COPY --parents`
    pub parents: bool,
    /// `RUN --security`
    pub run_security: bool,
    /// `RUN --device`
    pub run_devices: bool,
}

/// Per-build options.
#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Build-arg overrides
    pub build_args: BTreeMap<String, String>,
    /// Platform the produced image targets
    pub target_platform: Platform,
    /// Platform the build executes on
    pub build_platform: Platform,
    /// Stage to build; defaults to the last stage
    pub target_stage: Option<String>,
    /// Name of the local build context
    pub context_name: String,
    /// Epoch seconds for stable history timestamps
    pub source_date_epoch: Option<i64>,
    /// Invalidate cached results for this build
    pub ignore_cache: bool,
    /// `check` directive configuration
    pub check: CheckConfig,
    /// Optional feature gates
    pub features: Features,
    /// Build-scoped cancellation signal
    pub cancel: CancellationToken,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            build_args: BTreeMap::new(),
            target_platform: Platform::host(),
            build_platform: Platform::host(),
            target_stage: None,
            context_name: "context".to_string(),
            source_date_epoch: None,
            ignore_cache: false,
            check: CheckConfig::default(),
            features: Features::default(),
            cancel: CancellationToken::new(),
        }
    }
}

/// The compiler's output, ready for transmission to the engine.
#[derive(Debug)]
pub struct CompileResult {
    /// Serialized build graph for the target stage
    pub definition: Vec<u8>,
    /// The target stage's image configuration JSON
    pub image_config: Vec<u8>,
    /// Lint warnings collected along the way
    pub warnings: Vec<LintWarning>,
}

/// Shared per-build context handed to stage dispatchers.
pub(crate) struct CompileCtx<'a> {
    pub config: &'a CompileConfig,
    pub engine: Arc<dyn Engine>,
    pub lint: Mutex<Linter>,
}

impl CompileCtx<'_> {
    pub fn check_cancelled(&self) -> Result<()> {
        if self.config.cancel.is_cancelled() {
            return Err(FrontendError::Cancelled);
        }
        Ok(())
    }
}

/// Compile a Dockerfile instruction stream into a build graph and image
/// configuration.
pub async fn compile(
    nodes: &[Node],
    config: CompileConfig,
    engine: Arc<dyn Engine>,
) -> Result<CompileResult> {
    let mut lint = Linter::new(config.check.clone());
    let (stages, meta_args) = parse_dockerfile(nodes, &config.features, &mut lint)?;
    let plan = resolver::resolve(&stages, &meta_args, &config, &mut lint)?;
    debug!(
        stages = stages.len(),
        target = plan.target,
        layers = plan.layers.len(),
        "resolved build plan"
    );

    let ctx = CompileCtx {
        config: &config,
        engine,
        lint: Mutex::new(lint),
    };

    let mut outputs: Vec<Option<StageOutput>> = vec![None; stages.len()];
    for layer in &plan.layers {
        ctx.check_cancelled()?;
        let results = futures::future::join_all(
            layer
                .iter()
                .map(|&i| dispatch::dispatch_stage(i, &stages[i], &plan, &outputs, &ctx)),
        )
        .await;
        for (&i, result) in layer.iter().zip(results) {
            outputs[i] = Some(result?);
        }
    }

    let output = outputs[plan.target]
        .take()
        .expect("target stage dispatched");
    let definition = GraphDefinition::from_root(&output.root).to_bytes()?;
    let image_config = output.image.to_bytes()?;

    let mut lint = ctx.lint.into_inner().expect("linter lock");
    lint.enforce()?;

    Ok(CompileResult {
        definition,
        image_config,
        warnings: lint.take_warnings(),
    })
}
