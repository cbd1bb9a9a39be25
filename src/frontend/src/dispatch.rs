//! Per-stage instruction dispatch.
//!
//! Interprets one stage's instructions against a mutable dispatch state:
//! the current root filesystem handle, the evolving image configuration,
//! and the variable scope. Each instruction replaces the root handle with a
//! new graph node depending on the previous one and appends a history
//! entry.

use tracing::debug;

use basalt_core::error::{FrontendError, Result};
use basalt_core::location::SourceRange;
use basalt_core::platform::Platform;

use crate::apt;
use crate::compile::CompileCtx;
use crate::graph::{
    CacheSharing, Exec, ExecNetwork, ExecSecurity, FileAction, FileSystem, InlineFile, MountKind,
    MountSpec, OpMetadata, OpRef,
};
use crate::image::{HealthcheckSpec, ImageConfig};
use crate::instruction::{
    AddInstruction, ArgInstruction, CacheSharingMode, CmdInstruction, CopyInstruction,
    EntrypointInstruction, EnvInstruction, ExposeInstruction, HealthcheckInstruction, Instruction,
    LabelInstruction, MaintainerInstruction, NetworkMode, OnbuildInstruction, RunInstruction,
    RunMount, RunMountKind, SecurityMode, ShellDependentCmd, ShellInstruction,
    SourcesAndDest, Stage, StopSignalInstruction, UserInstruction, VolumeInstruction,
    WorkdirInstruction,
};
use crate::lint::LintRule;
use crate::resolver::{lookup_stage, BaseRef, BuildPlan};
use crate::shell::{self, VarScope};

/// Default shell for shell-form commands.
const DEFAULT_SHELL: [&str; 2] = ["/bin/sh", "-c"];

/// A completed stage: its final root handle and image configuration.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub root: OpRef,
    pub image: ImageConfig,
}

/// Mutable state while dispatching one stage.
pub(crate) struct DispatchState<'a> {
    pub plan: &'a BuildPlan,
    pub outputs: &'a [Option<StageOutput>],
    pub ctx: &'a CompileCtx<'a>,

    pub root: OpRef,
    pub image: ImageConfig,
    pub scope: VarScope,
    pub shell: Vec<String>,
    pub platform: Platform,

    stage_label: String,
    step: usize,
    total: usize,
    cmd_set: bool,
    entrypoint_set: bool,
    healthcheck_set: bool,
}

impl DispatchState<'_> {
    /// Claim the next step number and prefix a display name with it.
    pub fn prefix(&mut self, msg: &str) -> String {
        self.step += 1;
        format!("[{} {}/{}] {}", self.stage_label, self.step, self.total, msg)
    }

    /// Expand a word against the current scope, reporting undefined
    /// references to the linter.
    pub fn expand(&self, input: &str, location: SourceRange) -> Result<String> {
        let exp = shell::expand(input, &self.scope).map_err(|e| e.at(location))?;
        let mut lint = self.ctx.lint.lock().expect("linter lock");
        for name in &exp.unmatched {
            lint.run(
                LintRule::UndefinedVar,
                Some(location),
                format!("usage of undefined variable '${}'", name),
            );
        }
        Ok(exp.result)
    }

    fn warn_multiple(&self, name: &str, location: SourceRange) {
        self.ctx.lint.lock().expect("linter lock").run(
            LintRule::MultipleInstructionsDisallowed,
            Some(location),
            format!("multiple {} instructions should not be used in the same stage because only the last one will be used", name),
        );
    }

    pub fn ignore_cache(&self) -> bool {
        self.ctx.config.ignore_cache
    }

    pub fn epoch(&self) -> Option<i64> {
        self.ctx.config.source_date_epoch
    }
}

/// Dispatch a whole stage, producing its final root handle and image
/// configuration.
pub(crate) async fn dispatch_stage(
    index: usize,
    stage: &Stage,
    plan: &BuildPlan,
    outputs: &[Option<StageOutput>],
    ctx: &CompileCtx<'_>,
) -> Result<StageOutput> {
    ctx.check_cancelled()?;

    let resolved = &plan.resolved[index];
    let total = 1 + stage
        .instructions
        .iter()
        .map(|i| match i {
            Instruction::Package(_) => apt::PACKAGE_STEP_COUNT,
            _ => 1,
        })
        .sum::<usize>();

    let mut state = DispatchState {
        plan,
        outputs,
        ctx,
        root: OpRef::scratch(),
        image: ImageConfig::for_platform(&resolved.platform),
        scope: VarScope::new(),
        shell: DEFAULT_SHELL.iter().map(|s| s.to_string()).collect(),
        platform: resolved.platform.clone(),
        stage_label: stage
            .name
            .clone()
            .unwrap_or_else(|| format!("stage-{}", index)),
        step: 0,
        total,
        cmd_set: false,
        entrypoint_set: false,
        healthcheck_set: false,
    };

    // The FROM step: bind the base filesystem and inherit configuration
    // when the base is another stage.
    let from_name = state.prefix(&stage.source.code);
    match &resolved.base {
        BaseRef::Scratch => {}
        BaseRef::Image(reference) => {
            state.root = OpRef::image(reference, Some(state.platform.clone())).with_meta(
                OpMetadata {
                    name: from_name,
                    location: Some(stage.source.location),
                    ignore_cache: false,
                },
            );
        }
        BaseRef::Stage(j) => {
            let parent = outputs[*j]
                .as_ref()
                .ok_or_else(|| {
                    FrontendError::resolve(format!("stage {} has not been built", j))
                        .at(stage.source.location)
                })?
                .clone();
            state.root = parent.root;
            state.image = parent.image;
            state.image.history.clear();
        }
    }

    // Inherited ENV bindings and SHELL participate in expansion.
    for entry in &state.image.config.env {
        if let Some((k, v)) = entry.split_once('=') {
            state.scope = state.scope.with_env(k, v);
        }
    }
    if let Some(shell) = state.image.config.shell.clone() {
        state.shell = shell;
    }

    for instruction in &stage.instructions {
        ctx.check_cancelled()?;
        debug!(
            stage = %state.stage_label,
            instruction = instruction.name(),
            "dispatching"
        );
        dispatch_instruction(&mut state, instruction)
            .await
            .map_err(|e| e.at(instruction.source().location))?;
    }

    Ok(StageOutput {
        root: state.root,
        image: state.image,
    })
}

async fn dispatch_instruction(
    state: &mut DispatchState<'_>,
    instruction: &Instruction,
) -> Result<()> {
    match instruction {
        Instruction::Env(i) => dispatch_env(state, i),
        Instruction::Label(i) => dispatch_label(state, i),
        Instruction::Maintainer(i) => dispatch_maintainer(state, i),
        Instruction::Add(i) => dispatch_add(state, i),
        Instruction::Copy(i) => dispatch_copy(state, i),
        Instruction::Run(i) => dispatch_run(state, i),
        Instruction::Cmd(i) => dispatch_cmd(state, i),
        Instruction::Entrypoint(i) => dispatch_entrypoint(state, i),
        Instruction::Healthcheck(i) => dispatch_healthcheck(state, i),
        Instruction::Expose(i) => dispatch_expose(state, i),
        Instruction::User(i) => dispatch_user(state, i),
        Instruction::Volume(i) => dispatch_volume(state, i),
        Instruction::Workdir(i) => dispatch_workdir(state, i),
        Instruction::Arg(i) => dispatch_arg(state, i),
        Instruction::Shell(i) => dispatch_shell(state, i),
        Instruction::Onbuild(i) => dispatch_onbuild(state, i),
        Instruction::StopSignal(i) => dispatch_stopsignal(state, i),
        Instruction::Package(i) => apt::dispatch(state, i).await,
    }
}

// =============================================================================
// Config-only instructions
// =============================================================================

fn dispatch_env(state: &mut DispatchState, i: &EnvInstruction) -> Result<()> {
    let location = i.source.location;
    for pair in &i.env {
        let key = state.expand(&pair.key, location)?;
        let value = state.expand(&pair.value, location)?;
        state.image.set_env(&key, &value);
        state.scope = state.scope.with_env(&key, &value);
    }
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_label(state: &mut DispatchState, i: &LabelInstruction) -> Result<()> {
    let location = i.source.location;
    for pair in &i.labels {
        let key = state.expand(&pair.key, location)?;
        let value = state.expand(&pair.value, location)?;
        state.image.config.labels.insert(key, value);
    }
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_maintainer(state: &mut DispatchState, i: &MaintainerInstruction) -> Result<()> {
    state.image.author = Some(i.maintainer.clone());
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_cmd(state: &mut DispatchState, i: &CmdInstruction) -> Result<()> {
    if state.cmd_set {
        state.warn_multiple("CMD", i.source.location);
    }
    state.cmd_set = true;
    state.image.config.cmd = Some(command_line(&i.cmd, &state.shell));
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_entrypoint(state: &mut DispatchState, i: &EntrypointInstruction) -> Result<()> {
    if state.entrypoint_set {
        state.warn_multiple("ENTRYPOINT", i.source.location);
    }
    state.entrypoint_set = true;
    state.image.config.entrypoint = if i.cmd.cmd_line.is_empty() {
        None
    } else {
        Some(command_line(&i.cmd, &state.shell))
    };
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_healthcheck(state: &mut DispatchState, i: &HealthcheckInstruction) -> Result<()> {
    if state.healthcheck_set {
        state.warn_multiple("HEALTHCHECK", i.source.location);
    }
    state.healthcheck_set = true;
    state.image.config.healthcheck = Some(HealthcheckSpec::from(&i.health));
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_expose(state: &mut DispatchState, i: &ExposeInstruction) -> Result<()> {
    let location = i.source.location;
    for port in &i.ports {
        let port = state.expand(port, location)?;
        if port.is_empty() {
            continue;
        }
        let key = if port.contains('/') {
            port
        } else {
            format!("{}/tcp", port)
        };
        state.image.config.exposed_ports.insert(key, Default::default());
    }
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_user(state: &mut DispatchState, i: &UserInstruction) -> Result<()> {
    let user = state.expand(&i.user, i.source.location)?;
    state.image.config.user = Some(user);
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_volume(state: &mut DispatchState, i: &VolumeInstruction) -> Result<()> {
    let location = i.source.location;
    for volume in &i.volumes {
        let volume = state.expand(volume, location)?;
        if volume.is_empty() {
            return Err(FrontendError::validation("VOLUME cannot be an empty string"));
        }
        state.image.config.volumes.insert(volume, Default::default());
    }
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_arg(state: &mut DispatchState, i: &ArgInstruction) -> Result<()> {
    for pair in &i.args {
        let value = match state.ctx.config.build_args.get(&pair.key) {
            Some(overridden) => Some(overridden.clone()),
            None => match &pair.value {
                Some(default) => Some(state.expand(default, i.source.location)?),
                // A bare re-declaration picks up the global binding.
                None => state.plan.global_args.get(&pair.key).map(str::to_string),
            },
        };
        state.scope = state.scope.with_arg(&pair.key, value);
    }
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_shell(state: &mut DispatchState, i: &ShellInstruction) -> Result<()> {
    state.shell = i.shell.clone();
    state.image.config.shell = Some(i.shell.clone());
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_onbuild(state: &mut DispatchState, i: &OnbuildInstruction) -> Result<()> {
    state.image.config.on_build.push(i.expression.clone());
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

fn dispatch_stopsignal(state: &mut DispatchState, i: &StopSignalInstruction) -> Result<()> {
    let signal = state.expand(&i.signal, i.source.location)?;
    state.image.config.stop_signal = Some(signal);
    state.image.commit_history(&i.source.code, true, state.epoch());
    Ok(())
}

// =============================================================================
// Graph-mutating instructions
// =============================================================================

fn dispatch_workdir(state: &mut DispatchState, i: &WorkdirInstruction) -> Result<()> {
    let location = i.source.location;
    let path = state.expand(&i.path, location)?;

    let current = state.image.config.working_dir.clone().unwrap_or_default();
    if !path.starts_with('/') && !current.starts_with('/') {
        state.ctx.lint.lock().expect("linter lock").run(
            LintRule::WorkdirRelativePath,
            Some(location),
            format!("relative workdir {:?} can have unexpected results if the base image changes", path),
        );
    }

    let absolute = join_path(&current, &path);
    state.image.config.working_dir = Some(absolute.clone());

    let name = state.prefix(&i.source.code);
    state.root = FileSystem::sequence(Some(state.root.clone()))
        .append(FileAction::Mkdir {
            path: absolute,
            mode: 0o755,
            make_parents: true,
            owner: state.image.config.user.clone(),
        })
        .custom_name(name)
        .location(Some(location))
        .ignore_cache(state.ignore_cache())
        .output();
    state.image.commit_history(&i.source.code, false, state.epoch());
    Ok(())
}

fn dispatch_run(state: &mut DispatchState, i: &RunInstruction) -> Result<()> {
    let location = i.source.location;

    let (args, inline_files) = run_command(&i.cmd, &state.shell);

    // Bound ARGs become part of the exec environment, like ENV entries,
    // so shell commands can read them; this keys the cache on their values.
    let mut env = state.image.env_with_defaults();
    for (key, value) in state.scope.arg_vars() {
        if state.image.get_env(&key).is_none() {
            env.push(format!("{}={}", key, value));
        }
    }

    let mut exec = Exec::run(state.root.clone(), args)
        .env_list(env)
        .user(state.image.config.user.clone())
        .cwd(state.image.config.working_dir.clone())
        .network(match i.network {
            NetworkMode::Default => ExecNetwork::Default,
            NetworkMode::None => ExecNetwork::None,
            NetworkMode::Host => ExecNetwork::Host,
        })
        .security(match i.security {
            SecurityMode::Sandbox => ExecSecurity::Sandbox,
            SecurityMode::Insecure => ExecSecurity::Insecure,
        })
        .platform(Some(state.platform.clone()));

    for mount in &i.mounts {
        exec = exec.mount(run_mount(state, mount, location)?);
    }
    for file in inline_files {
        exec = exec.inline_file(file);
    }
    for device in &i.devices {
        exec = exec.device(device);
    }

    let name = state.prefix(&i.source.code);
    state.root = exec
        .custom_name(name)
        .location(Some(location))
        .ignore_cache(state.ignore_cache())
        .root();
    state.image.commit_history(&i.source.code, false, state.epoch());
    Ok(())
}

fn dispatch_copy(state: &mut DispatchState, i: &CopyInstruction) -> Result<()> {
    let spec = CopySpec {
        sources_and_dest: &i.sources_and_dest,
        from: i.from.as_deref(),
        chown: i.chown.as_deref(),
        chmod: i.chmod.as_deref(),
        link: i.link,
        checksum: None,
        keep_git_dir: false,
        unpack: Some(false),
        exclude_patterns: &i.exclude_patterns,
        is_add: false,
    };
    dispatch_fileop(state, &spec, &i.source.code, i.source.location)
}

fn dispatch_add(state: &mut DispatchState, i: &AddInstruction) -> Result<()> {
    let spec = CopySpec {
        sources_and_dest: &i.sources_and_dest,
        from: None,
        chown: i.chown.as_deref(),
        chmod: i.chmod.as_deref(),
        link: i.link,
        checksum: i.checksum.as_deref(),
        keep_git_dir: i.keep_git_dir,
        unpack: i.unpack,
        exclude_patterns: &i.exclude_patterns,
        is_add: true,
    };
    dispatch_fileop(state, &spec, &i.source.code, i.source.location)
}

struct CopySpec<'a> {
    sources_and_dest: &'a SourcesAndDest,
    from: Option<&'a str>,
    chown: Option<&'a str>,
    chmod: Option<&'a str>,
    link: bool,
    checksum: Option<&'a str>,
    keep_git_dir: bool,
    unpack: Option<bool>,
    exclude_patterns: &'a [String],
    is_add: bool,
}

fn dispatch_fileop(
    state: &mut DispatchState,
    spec: &CopySpec,
    code: &str,
    location: SourceRange,
) -> Result<()> {
    let workdir = state.image.config.working_dir.clone().unwrap_or_default();
    let dest_raw = state.expand(&spec.sources_and_dest.dest_path, location)?;
    let dest = join_path(&workdir, &dest_raw);

    let mode = match spec.chmod {
        None => None,
        Some(chmod) => {
            let chmod = state.expand(chmod, location)?;
            Some(u32::from_str_radix(&chmod, 8).map_err(|_| {
                FrontendError::validation(format!("invalid chmod value {:?}", chmod))
            })?)
        }
    };
    let owner = match spec.chown {
        None => None,
        Some(chown) => {
            let chown = state.expand(chown, location)?;
            (!chown.is_empty()).then_some(chown)
        }
    };

    // Classify the sources. Context paths share one local source node
    // scoped to just the paths this instruction reads.
    let from_root = match spec.from {
        Some(from) => {
            let from = state.expand(from, location)?;
            Some(stage_source(state, &from)?)
        }
        None => None,
    };

    let mut paths = Vec::new();
    let mut remotes: Vec<(OpRef, String, bool)> = Vec::new();
    for src in &spec.sources_and_dest.source_paths {
        let src = state.expand(src, location)?;
        if from_root.is_none() && spec.is_add && is_git_url(&src) {
            let (remote, reference) = split_git_ref(&src);
            remotes.push((
                OpRef::git(&remote, &reference, spec.keep_git_dir),
                "/".to_string(),
                false,
            ));
        } else if from_root.is_none() && spec.is_add && is_http_url(&src) {
            let filename = url_filename(&src).ok_or_else(|| {
                FrontendError::validation(format!(
                    "cannot determine filename for source {:?}",
                    src
                ))
            })?;
            let checksum = spec.checksum.map(|c| c.to_string());
            remotes.push((
                OpRef::http(&src, &filename, checksum),
                filename.clone(),
                spec.unpack.unwrap_or(false),
            ));
        } else {
            paths.push(src);
        }
    }

    if spec.checksum.is_some() && remotes.iter().all(|(op, _, _)| !is_http_op(op)) {
        return Err(FrontendError::validation(
            "checksum can't be specified for sources other than HTTP",
        ));
    }

    let local_root = if paths.is_empty() {
        None
    } else {
        Some(match &from_root {
            Some(root) => root.clone(),
            None => OpRef::local(&state.ctx.config.context_name, paths.clone()),
        })
    };

    let input = if spec.link { None } else { Some(state.root.clone()) };
    let mut fs = FileSystem::sequence(input);

    for path in &paths {
        let unpack = spec
            .unpack
            .unwrap_or(spec.is_add && from_root.is_none());
        fs = fs.append(FileAction::Copy {
            source: local_root.clone().expect("local source present"),
            src: path.clone(),
            dest: dest.clone(),
            mode,
            owner: owner.clone(),
            create_dest_path: true,
            follow_symlinks: true,
            allow_wildcard: true,
            unpack,
            keep_git_dir: spec.keep_git_dir,
            exclude_patterns: spec.exclude_patterns.to_vec(),
        });
    }
    for (source, src, unpack) in &remotes {
        fs = fs.append(FileAction::Copy {
            source: source.clone(),
            src: src.clone(),
            dest: dest.clone(),
            mode,
            owner: owner.clone(),
            create_dest_path: true,
            follow_symlinks: true,
            allow_wildcard: false,
            unpack: *unpack,
            keep_git_dir: spec.keep_git_dir,
            exclude_patterns: Vec::new(),
        });
    }
    for content in &spec.sources_and_dest.source_contents {
        let data = if content.expand {
            state.expand(&content.data, location)?
        } else {
            content.data.clone()
        };
        let path = if dest.ends_with('/') {
            format!("{}{}", dest, content.path)
        } else {
            dest.clone()
        };
        fs = fs.append(FileAction::Mkfile {
            path,
            mode: mode.unwrap_or(0o644),
            data,
            owner: owner.clone(),
        });
    }

    let name = state.prefix(code);
    let out = fs
        .custom_name(name)
        .location(Some(location))
        .ignore_cache(state.ignore_cache())
        .output();

    // --link composes the copy as a union over the base instead of a delta.
    state.root = if spec.link {
        OpRef::merge(
            vec![state.root.clone(), out],
            OpMetadata {
                name: format!("LINK {}", code),
                location: Some(location),
                ignore_cache: state.ignore_cache(),
            },
        )
    } else {
        out
    };
    state.image.commit_history(code, false, state.epoch());
    Ok(())
}

// =============================================================================
// Helpers
// =============================================================================

/// Resolve a `--from`/mount `from` reference to a filesystem root: a
/// completed stage, the build context, or an image reference.
pub(crate) fn stage_source(state: &DispatchState, reference: &str) -> Result<OpRef> {
    if let Some(j) = lookup_stage(reference, &state.plan.names, state.outputs.len()) {
        let output = state.outputs[j].as_ref().ok_or_else(|| {
            FrontendError::resolve(format!("stage {:?} has not been built", reference))
        })?;
        return Ok(output.root.clone());
    }
    if reference.eq_ignore_ascii_case("context") {
        return Ok(OpRef::local(&state.ctx.config.context_name, Vec::new()));
    }
    if reference.eq_ignore_ascii_case("scratch") {
        return Ok(OpRef::scratch());
    }
    Ok(OpRef::image(reference, Some(state.platform.clone())))
}

/// The final command line: exec form verbatim, shell form wrapped in the
/// effective shell. Heredocs on shell-form commands become inline files.
fn run_command(cmd: &ShellDependentCmd, shell: &[String]) -> (Vec<String>, Vec<InlineFile>) {
    if !cmd.prepend_shell {
        return (cmd.cmd_line.clone(), Vec::new());
    }

    // `RUN <<EOF` alone runs the body as the script.
    if cmd.files.len() == 1 && cmd.cmd_line.len() == 1 && cmd.cmd_line[0].starts_with("<<") {
        let mut args = shell.to_vec();
        args.push(cmd.files[0].data.clone());
        return (args, Vec::new());
    }

    let mut script = cmd.cmd_line.join(" ");
    let mut files = Vec::new();
    for file in &cmd.files {
        let path = format!("/dev/pipes/{}", file.name);
        for token in ["<<-", "<<"] {
            script = script.replace(&format!("{}{}", token, file.name), &path);
        }
        files.push(InlineFile {
            path,
            data: file.data.clone(),
            mode: 0o644,
        });
    }

    let mut args = shell.to_vec();
    args.push(script);
    (args, files)
}

fn command_line(cmd: &ShellDependentCmd, shell: &[String]) -> Vec<String> {
    if cmd.prepend_shell {
        let mut args = shell.to_vec();
        args.push(cmd.cmd_line.join(" "));
        args
    } else {
        cmd.cmd_line.clone()
    }
}

fn run_mount(state: &DispatchState, mount: &RunMount, location: SourceRange) -> Result<MountSpec> {
    let target = state.expand(&mount.target, location)?;
    let kind = match mount.kind {
        RunMountKind::Bind => {
            let source = match &mount.from {
                Some(from) => {
                    let from = state.expand(from, location)?;
                    stage_source(state, &from)?
                }
                None => OpRef::local(&state.ctx.config.context_name, Vec::new()),
            };
            MountKind::Bind {
                source,
                subpath: mount.source.clone(),
            }
        }
        RunMountKind::Cache => MountKind::Cache {
            id: match &mount.id {
                Some(id) => state.expand(id, location)?,
                None => target.clone(),
            },
            sharing: match mount.sharing {
                CacheSharingMode::Shared => CacheSharing::Shared,
                CacheSharingMode::Private => CacheSharing::Private,
                CacheSharingMode::Locked => CacheSharing::Locked,
            },
        },
        RunMountKind::Tmpfs => MountKind::Tmpfs,
        RunMountKind::Secret => MountKind::Secret {
            id: mount
                .id
                .clone()
                .unwrap_or_else(|| basename(&target).to_string()),
        },
        RunMountKind::Ssh => MountKind::Ssh {
            id: mount.id.clone().unwrap_or_else(|| "default".to_string()),
        },
    };
    Ok(MountSpec {
        target,
        readonly: mount.readonly,
        kind,
    })
}

/// Join a path onto a working directory and normalize `.`/`..` segments.
/// A trailing slash on the input survives, since it selects directory
/// semantics for copies.
pub(crate) fn join_path(workdir: &str, path: &str) -> String {
    let combined = if path.starts_with('/') {
        path.to_string()
    } else if workdir.is_empty() {
        format!("/{}", path)
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in combined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut cleaned = format!("/{}", parts.join("/"));
    if combined.ends_with('/') && cleaned != "/" {
        cleaned.push('/');
    }
    cleaned
}

fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or(path)
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn is_git_url(s: &str) -> bool {
    s.starts_with("git://")
        || s.starts_with("git@")
        || (is_http_url(s) && s.split('#').next().unwrap_or(s).ends_with(".git"))
}

fn split_git_ref(s: &str) -> (String, String) {
    match s.split_once('#') {
        Some((remote, reference)) => (remote.to_string(), reference.to_string()),
        None => (s.to_string(), String::new()),
    }
}

fn url_filename(url: &str) -> Option<String> {
    let without_query = url.split('?').next().unwrap_or(url);
    let rest = without_query
        .split_once("://")
        .map(|(_, r)| r)
        .unwrap_or(without_query);
    let (_, path) = rest.split_once('/')?;
    let name = path.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        return None;
    }
    Some(name.to_string())
}

fn is_http_op(op: &OpRef) -> bool {
    matches!(
        op.op(),
        crate::graph::Op::Source(crate::graph::SourceOp::Http { .. })
    )
}
