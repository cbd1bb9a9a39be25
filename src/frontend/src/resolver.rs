//! Stage resolution.
//!
//! Orders the stages of a multi-stage Dockerfile into a dependency DAG,
//! resolves base-image expressions against the global ARG environment,
//! determines each stage's effective platform, and selects the target stage
//! and its ancestors for dispatch.

use std::collections::{BTreeMap, BTreeSet};

use basalt_core::error::{FrontendError, Result};
use basalt_core::platform::Platform;

use crate::compile::CompileConfig;
use crate::instruction::parse::RESERVED_STAGE_NAMES;
use crate::instruction::{ArgInstruction, Instruction, Stage};
use crate::lint::{LintRule, Linter};
use crate::shell::{self, VarScope};

/// Where a stage's base filesystem comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseRef {
    Scratch,
    Image(String),
    Stage(usize),
}

/// Resolution results for one stage.
#[derive(Debug, Clone)]
pub struct ResolvedStage {
    pub base: BaseRef,
    pub platform: Platform,
    /// Indices of stages this stage reads from (base and cross-stage refs)
    pub depends_on: Vec<usize>,
}

/// The dispatch plan for a build.
#[derive(Debug)]
pub struct BuildPlan {
    /// Index of the stage whose output the caller asked for
    pub target: usize,
    /// Topological layers of the target's ancestor closure; stages within
    /// a layer are independent and may dispatch in parallel
    pub layers: Vec<Vec<usize>>,
    /// Per-stage resolution, indexed like the input stages
    pub resolved: Vec<ResolvedStage>,
    /// Global ARG environment (meta-ARGs plus built-in platform args)
    pub global_args: VarScope,
    /// Built-in platform args, consulted when a stage re-declares one
    pub builtin_args: BTreeMap<String, String>,
    /// Declared stage names, lower-cased
    pub names: BTreeMap<String, usize>,
}

/// The implicit platform build-args.
pub fn platform_args(build: &Platform, target: &Platform) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    args.insert("BUILDPLATFORM".to_string(), build.to_string());
    args.insert("BUILDOS".to_string(), build.os.clone());
    args.insert("BUILDARCH".to_string(), build.architecture.clone());
    args.insert(
        "BUILDVARIANT".to_string(),
        build.variant.clone().unwrap_or_default(),
    );
    args.insert("TARGETPLATFORM".to_string(), target.to_string());
    args.insert("TARGETOS".to_string(), target.os.clone());
    args.insert("TARGETARCH".to_string(), target.architecture.clone());
    args.insert(
        "TARGETVARIANT".to_string(),
        target.variant.clone().unwrap_or_default(),
    );
    args
}

/// Resolve stages into a dispatch plan.
pub fn resolve(
    stages: &[Stage],
    meta_args: &[ArgInstruction],
    config: &CompileConfig,
    lint: &mut Linter,
) -> Result<BuildPlan> {
    if stages.is_empty() {
        return Err(FrontendError::resolve(
            "dockerfile contains no stages to build",
        ));
    }

    // Stage names must be unique and must not shadow built-in sources.
    let mut names: BTreeMap<String, usize> = BTreeMap::new();
    for (i, stage) in stages.iter().enumerate() {
        if let Some(ref name) = stage.name {
            if RESERVED_STAGE_NAMES.contains(&name.as_str()) {
                return Err(FrontendError::resolve(format!(
                    "reserved stage name {:?}",
                    name
                ))
                .at(stage.source.location));
            }
            if names.insert(name.clone(), i).is_some() {
                return Err(FrontendError::resolve(format!(
                    "duplicate stage name {:?}",
                    name
                ))
                .at(stage.source.location));
            }
        }
    }

    // Global ARG environment: built-in platform args, then meta-ARGs in
    // declaration order (later defaults may reference earlier values).
    let builtin_args = platform_args(&config.build_platform, &config.target_platform);
    let mut global_args = VarScope::with_global_args(
        builtin_args
            .iter()
            .map(|(k, v)| (k.clone(), Some(v.clone()))),
    );
    for arg in meta_args {
        for pair in &arg.args {
            let value = match config.build_args.get(&pair.key) {
                Some(overridden) => Some(overridden.clone()),
                None => match &pair.value {
                    Some(default) => Some(
                        shell::expand(default, &global_args)
                            .map_err(|e| e.at(arg.source.location))?
                            .result,
                    ),
                    None => builtin_args.get(&pair.key).cloned(),
                },
            };
            global_args = global_args.with_global_arg(&pair.key, value);
        }
    }

    // Resolve bases, platforms, and dependency edges.
    let mut resolved = Vec::with_capacity(stages.len());
    for (i, stage) in stages.iter().enumerate() {
        let location = stage.source.location;
        let base_exp = shell::expand(&stage.base_name, &global_args).map_err(|e| e.at(location))?;
        let base_name = base_exp.result.trim().to_string();
        if base_name.is_empty() {
            return Err(FrontendError::resolve(format!(
                "base name ({}) should not be blank",
                stage.base_name
            ))
            .at(location));
        }

        let mut depends_on = Vec::new();
        let base = match names.get(&base_name.to_lowercase()) {
            // FROM may only name an earlier stage.
            Some(&j) if j < i => {
                depends_on.push(j);
                BaseRef::Stage(j)
            }
            _ if base_name.eq_ignore_ascii_case("scratch") => BaseRef::Scratch,
            _ => BaseRef::Image(base_name),
        };

        let platform = resolve_platform(stage, &global_args, config, lint)?;

        for instruction in &stage.instructions {
            for reference in stage_references(instruction) {
                if let Some(j) = lookup_stage(&reference, &names, stages.len()) {
                    if j != i && !depends_on.contains(&j) {
                        depends_on.push(j);
                    }
                }
            }
        }

        resolved.push(ResolvedStage {
            base,
            platform,
            depends_on,
        });
    }

    // Target selection: a named stage, a numeric index, or the last stage.
    let target = match &config.target_stage {
        None => stages.len() - 1,
        Some(name) => lookup_stage(name, &names, stages.len()).ok_or_else(|| {
            FrontendError::resolve(format!("target stage {:?} could not be found", name))
        })?,
    };

    let layers = layer_ancestors(target, &resolved, stages)?;

    Ok(BuildPlan {
        target,
        layers,
        resolved,
        global_args,
        builtin_args,
        names,
    })
}

/// Cross-stage references made by an instruction.
fn stage_references(instruction: &Instruction) -> Vec<String> {
    match instruction {
        Instruction::Copy(copy) => copy.from.iter().cloned().collect(),
        Instruction::Run(run) => run.mounts.iter().filter_map(|m| m.from.clone()).collect(),
        _ => Vec::new(),
    }
}

/// Resolve a stage reference: a declared name or a positional index.
pub(crate) fn lookup_stage(
    reference: &str,
    names: &BTreeMap<String, usize>,
    stage_count: usize,
) -> Option<usize> {
    if let Some(&i) = names.get(&reference.to_lowercase()) {
        return Some(i);
    }
    match reference.parse::<usize>() {
        Ok(i) if i < stage_count => Some(i),
        _ => None,
    }
}

fn resolve_platform(
    stage: &Stage,
    global_args: &VarScope,
    config: &CompileConfig,
    lint: &mut Linter,
) -> Result<Platform> {
    let Some(ref expr) = stage.platform else {
        return Ok(config.target_platform.clone());
    };
    let location = stage.source.location;

    let exp = shell::expand(expr, global_args).map_err(|e| e.at(location))?;
    if exp.result.trim().is_empty() {
        return Err(FrontendError::resolve(format!(
            "failed to parse platform ({}): result is empty",
            expr
        ))
        .at(location));
    }

    if exp.matched.is_empty() && exp.unmatched.is_empty() {
        lint.run(
            LintRule::FromPlatformFlagConstDisallowed,
            Some(location),
            format!("FROM --platform flag should not use a constant value {:?}", expr),
        );
    }
    let trimmed = expr.trim();
    if trimmed == "$TARGETPLATFORM" || trimmed == "${TARGETPLATFORM}" {
        lint.run(
            LintRule::RedundantTargetPlatform,
            Some(location),
            format!(
                "setting platform to predefined {} in FROM is redundant",
                trimmed
            ),
        );
    }

    Platform::parse(&exp.result)
        .map_err(|e| {
            FrontendError::resolve(format!("failed to parse platform ({}): {}", expr, e))
                .at(location)
        })
}

/// The target's ancestor closure, grouped into topological layers.
fn layer_ancestors(
    target: usize,
    resolved: &[ResolvedStage],
    stages: &[Stage],
) -> Result<Vec<Vec<usize>>> {
    let mut needed = BTreeSet::new();
    let mut pending = vec![target];
    while let Some(i) = pending.pop() {
        if needed.insert(i) {
            pending.extend(resolved[i].depends_on.iter().copied());
        }
    }

    let mut layers = Vec::new();
    let mut placed: BTreeSet<usize> = BTreeSet::new();
    while placed.len() < needed.len() {
        let ready: Vec<usize> = needed
            .iter()
            .copied()
            .filter(|i| !placed.contains(i))
            .filter(|i| resolved[*i].depends_on.iter().all(|d| placed.contains(d)))
            .collect();
        if ready.is_empty() {
            let stuck = needed
                .iter()
                .find(|i| !placed.contains(i))
                .copied()
                .unwrap_or(target);
            let name = stages[stuck]
                .name
                .clone()
                .unwrap_or_else(|| stuck.to_string());
            return Err(FrontendError::resolve(format!(
                "circular dependency detected on stage: {}",
                name
            ))
            .at(stages[stuck].source.location));
        }
        placed.extend(ready.iter().copied());
        layers.push(ready);
    }

    Ok(layers)
}
