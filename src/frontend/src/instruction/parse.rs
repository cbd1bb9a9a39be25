//! AST-to-instruction conversion.
//!
//! Validates argument arity, parses flags, attaches heredocs, and produces
//! the typed instructions the dispatcher consumes. Optional RUN features
//! (device mounts, insecure security mode) are admitted through the
//! [`Features`] record rather than process-global state.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use basalt_core::error::{FrontendError, Result};

use super::flags::FlagSet;
use super::*;
use crate::ast::{self, Node};
use crate::compile::Features;
use crate::lint::{LintRule, Linter};

/// Stage names must be lower-case and start with a letter.
static STAGE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-z][a-z0-9._-]*$").expect("stage name regex"));

static ONBUILD_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*ONBUILD\s*").expect("onbuild prefix regex"));

/// Stage names that collide with built-in sources.
pub const RESERVED_STAGE_NAMES: [&str; 2] = ["scratch", "context"];

/// Result of parsing one AST node: either a new build stage or an
/// instruction for the current stage.
#[derive(Debug)]
pub enum Parsed {
    Stage(Stage),
    Instruction(Instruction),
}

/// Convert an AST node into a typed instruction or stage header.
pub fn parse_instruction(node: &Node, features: &Features, lint: &mut Linter) -> Result<Parsed> {
    parse_inner(node, features, lint).map_err(|e| e.at(node.location))
}

fn parse_inner(node: &Node, features: &Features, lint: &mut Linter) -> Result<Parsed> {
    match node.value.to_lowercase().as_str() {
        "env" => Ok(Parsed::Instruction(Instruction::Env(parse_env(node, lint)?))),
        "label" => Ok(Parsed::Instruction(Instruction::Label(parse_label(
            node, lint,
        )?))),
        "maintainer" => Ok(Parsed::Instruction(Instruction::Maintainer(
            parse_maintainer(node, lint)?,
        ))),
        "add" => parse_add(node, features).map(Parsed::Instruction),
        "copy" => Ok(Parsed::Instruction(Instruction::Copy(parse_copy(
            node, features,
        )?))),
        "from" => Ok(Parsed::Stage(parse_from(node, lint)?)),
        "onbuild" => Ok(Parsed::Instruction(Instruction::Onbuild(parse_onbuild(
            node,
        )?))),
        "workdir" => Ok(Parsed::Instruction(Instruction::Workdir(parse_workdir(
            node,
        )?))),
        "run" => Ok(Parsed::Instruction(Instruction::Run(parse_run(
            node, features,
        )?))),
        "cmd" => Ok(Parsed::Instruction(Instruction::Cmd(parse_cmd(node)?))),
        "entrypoint" => Ok(Parsed::Instruction(Instruction::Entrypoint(
            parse_entrypoint(node)?,
        ))),
        "healthcheck" => Ok(Parsed::Instruction(Instruction::Healthcheck(
            parse_healthcheck(node)?,
        ))),
        "expose" => Ok(Parsed::Instruction(Instruction::Expose(parse_expose(
            node,
        )?))),
        "user" => Ok(Parsed::Instruction(Instruction::User(parse_user(node)?))),
        "volume" => Ok(Parsed::Instruction(Instruction::Volume(parse_volume(
            node,
        )?))),
        "stopsignal" => Ok(Parsed::Instruction(Instruction::StopSignal(
            parse_stopsignal(node)?,
        ))),
        "arg" => {
            let arg = parse_arg(node)?;
            let keys: Vec<&str> = arg.args.iter().map(|a| a.key.as_str()).collect();
            validate_definition_description("ARG", &keys, node, lint);
            Ok(Parsed::Instruction(Instruction::Arg(arg)))
        }
        "shell" => Ok(Parsed::Instruction(Instruction::Shell(parse_shell(node)?))),
        other => Err(FrontendError::parse(format!(
            "unknown instruction: {}",
            other
        ))),
    }
}

/// Parse a whole Dockerfile into stages and the meta-ARGs preceding the
/// first `FROM`.
pub fn parse_dockerfile(
    nodes: &[Node],
    features: &Features,
    lint: &mut Linter,
) -> Result<(Vec<Stage>, Vec<ArgInstruction>)> {
    let mut stages: Vec<Stage> = Vec::new();
    let mut meta_args: Vec<ArgInstruction> = Vec::new();

    for node in nodes {
        let parsed = parse_instruction(node, features, lint)?;
        match parsed {
            Parsed::Stage(stage) => stages.push(stage),
            Parsed::Instruction(Instruction::Arg(arg)) if stages.is_empty() => {
                meta_args.push(arg);
            }
            Parsed::Instruction(instruction) => match stages.last_mut() {
                Some(stage) => stage.instructions.push(instruction),
                None => {
                    return Err(FrontendError::parse(format!(
                        "{} requires a build stage; no FROM has been seen yet",
                        instruction.name()
                    ))
                    .at(node.location));
                }
            },
        }
    }

    Ok((stages, meta_args))
}

fn source_of(node: &Node) -> InstructionSource {
    InstructionSource {
        code: node.original.trim().to_string(),
        location: node.location,
    }
}

/// Require that no flags were given.
fn no_flags(node: &Node) -> Result<()> {
    FlagSet::new(&node.flags).parse()
}

// =============================================================================
// Individual instruction parsers
// =============================================================================

fn parse_kvps(args: &[String], cmd: &str) -> Result<Vec<KeyValuePair>> {
    if args.is_empty() {
        return Err(err_at_least_one_argument(cmd));
    }

    if args[0].contains('=') {
        let mut pairs = Vec::with_capacity(args.len());
        for arg in args {
            let (key, value) = arg.split_once('=').ok_or_else(|| {
                FrontendError::parse(format!(
                    "{} must have all arguments in KEY=VALUE form, got {:?}",
                    cmd, arg
                ))
            })?;
            if key.is_empty() {
                return Err(err_blank_command_names(cmd));
            }
            pairs.push(KeyValuePair {
                key: key.to_string(),
                value: value.to_string(),
                no_delim: false,
            });
        }
        Ok(pairs)
    } else {
        // Legacy whitespace form: KEY VALUE...
        if args.len() < 2 {
            return Err(FrontendError::parse(format!(
                "{} must have two arguments",
                cmd
            )));
        }
        Ok(vec![KeyValuePair {
            key: args[0].clone(),
            value: args[1..].join(" "),
            no_delim: true,
        }])
    }
}

fn lint_legacy_kvps(cmd: &str, pairs: &[KeyValuePair], node: &Node, lint: &mut Linter) {
    if pairs.iter().any(|p| p.no_delim) {
        lint.run(
            LintRule::LegacyKeyValueFormat,
            Some(node.location),
            format!("\"{} key=value\" should be used instead of legacy \"{} key value\" format", cmd, cmd),
        );
    }
}

fn parse_env(node: &Node, lint: &mut Linter) -> Result<EnvInstruction> {
    no_flags(node)?;
    let env = parse_kvps(&node.args, "ENV")?;
    lint_legacy_kvps("ENV", &env, node, lint);
    Ok(EnvInstruction {
        source: source_of(node),
        env,
    })
}

fn parse_label(node: &Node, lint: &mut Linter) -> Result<LabelInstruction> {
    no_flags(node)?;
    let labels = parse_kvps(&node.args, "LABEL")?;
    lint_legacy_kvps("LABEL", &labels, node, lint);
    Ok(LabelInstruction {
        source: source_of(node),
        labels,
    })
}

fn parse_maintainer(node: &Node, lint: &mut Linter) -> Result<MaintainerInstruction> {
    lint.run(
        LintRule::MaintainerDeprecated,
        Some(node.location),
        "MAINTAINER is deprecated, use a LABEL instead",
    );
    if node.args.len() != 1 {
        return Err(err_exactly_one_argument("MAINTAINER"));
    }
    no_flags(node)?;
    Ok(MaintainerInstruction {
        source: source_of(node),
        maintainer: node.args[0].clone(),
    })
}

fn parse_sources_and_dest(node: &Node, cmd: &str) -> Result<SourcesAndDest> {
    let (srcs, dest) = node.args.split_at(node.args.len() - 1);
    let dest = dest[0].clone();
    if ast::parse_heredoc_token(&dest).is_some() {
        return Err(err_bad_heredoc(cmd, "a destination"));
    }

    let mut source_paths = Vec::new();
    let mut source_contents = Vec::new();
    for src in srcs {
        match ast::parse_heredoc_token(src) {
            Some(token) => {
                let heredoc = node
                    .heredocs
                    .iter()
                    .find(|h| h.name == token.name)
                    .ok_or_else(|| err_bad_heredoc(cmd, "an unattached name"))?;
                let data = if heredoc.chomp {
                    ast::chomp_heredoc_content(&heredoc.content)
                } else {
                    heredoc.content.clone()
                };
                source_contents.push(SourceContent {
                    path: token.name,
                    data,
                    expand: heredoc.expand,
                });
            }
            None => source_paths.push(src.clone()),
        }
    }

    Ok(SourcesAndDest {
        dest_path: dest,
        source_paths,
        source_contents,
    })
}

fn parse_add(node: &Node, features: &Features) -> Result<Instruction> {
    let mut flags = FlagSet::new(&node.flags);
    if features.exclude_patterns {
        flags.add_strings("exclude");
    }
    flags.add_string("chown");
    flags.add_string("chmod");
    flags.add_bool("link", false);
    flags.add_bool("keep-git-dir", false);
    flags.add_string("checksum");
    flags.add_bool("unpack", false);
    flags.add_bool("apt", false);
    flags.parse()?;

    if flags.boolean("apt") {
        // The package form: every other flag is ignored.
        return Ok(Instruction::Package(PackageInstruction {
            source: source_of(node),
            packages: node.args.clone(),
        }));
    }

    if node.args.len() < 2 {
        return Err(err_no_destination_argument("ADD"));
    }
    let sources_and_dest = parse_sources_and_dest(node, "ADD")?;

    let unpack = flags.is_used("unpack").then(|| flags.boolean("unpack"));

    Ok(Instruction::Add(AddInstruction {
        source: source_of(node),
        sources_and_dest,
        chown: flags.string("chown"),
        chmod: flags.string("chmod"),
        link: flags.boolean("link"),
        keep_git_dir: flags.boolean("keep-git-dir"),
        checksum: flags.string("checksum"),
        unpack,
        exclude_patterns: flags.strings("exclude"),
    }))
}

fn parse_copy(node: &Node, features: &Features) -> Result<CopyInstruction> {
    if node.args.len() < 2 {
        return Err(err_no_destination_argument("COPY"));
    }

    let mut flags = FlagSet::new(&node.flags);
    if features.exclude_patterns {
        flags.add_strings("exclude");
    }
    if features.parents {
        flags.add_bool("parents", false);
    }
    flags.add_string("chown");
    flags.add_string("from");
    flags.add_string("chmod");
    flags.add_bool("link", false);
    flags.parse()?;

    let sources_and_dest = parse_sources_and_dest(node, "COPY")?;

    Ok(CopyInstruction {
        source: source_of(node),
        sources_and_dest,
        from: flags.string("from"),
        chown: flags.string("chown"),
        chmod: flags.string("chmod"),
        link: flags.boolean("link"),
        parents: flags.boolean("parents"),
        exclude_patterns: flags.strings("exclude"),
    })
}

fn parse_from(node: &Node, lint: &mut Linter) -> Result<Stage> {
    if !is_lower_case_stage_name(&node.args) {
        lint.run(
            LintRule::StageNameCasing,
            Some(node.location),
            format!("stage name {:?} should be lowercase", node.args[2]),
        );
    }
    if !does_from_case_match_as_case(node) {
        lint.run(
            LintRule::FromAsCasing,
            Some(node.location),
            format!(
                "{:?} and {:?} keywords' casing do not match",
                node.value, node.args[1]
            ),
        );
    }

    let name = parse_build_stage_name(&node.args)?;
    if let Some(ref name) = name {
        if RESERVED_STAGE_NAMES.contains(&name.as_str()) {
            lint.run(
                LintRule::ReservedStageName,
                Some(node.location),
                format!("stage name should not use the same name as reserved stage {:?}", name),
            );
        }
        validate_definition_description("FROM", &[name.as_str()], node, lint);
    }

    let mut flags = FlagSet::new(&node.flags);
    flags.add_string("platform");
    flags.parse()?;

    Ok(Stage {
        base_name: node.args[0].clone(),
        name: name.clone(),
        platform: flags.string("platform"),
        instructions: Vec::new(),
        comment: get_comment(&node.prev_comments, name.as_deref()),
        source: source_of(node),
    })
}

fn parse_build_stage_name(args: &[String]) -> Result<Option<String>> {
    match args {
        [_, as_kw, name] if as_kw.eq_ignore_ascii_case("as") => {
            let stage_name = name.to_lowercase();
            if !STAGE_NAME_RE.is_match(&stage_name) {
                return Err(FrontendError::parse(format!(
                    "invalid name for build stage: {:?}, name can't start with a number or contain symbols",
                    name
                )));
            }
            Ok(Some(stage_name))
        }
        [_] => Ok(None),
        _ => Err(FrontendError::parse(
            "FROM requires either one or three arguments",
        )),
    }
}

fn parse_onbuild(node: &Node) -> Result<OnbuildInstruction> {
    if node.args.is_empty() {
        return Err(err_at_least_one_argument("ONBUILD"));
    }
    no_flags(node)?;

    let trigger = node.args[0].trim().to_uppercase();
    match trigger.as_str() {
        "ONBUILD" => {
            return Err(FrontendError::parse(
                "chaining ONBUILD via `ONBUILD ONBUILD` isn't allowed",
            ));
        }
        "MAINTAINER" | "FROM" => {
            return Err(FrontendError::parse(format!(
                "{} isn't allowed as an ONBUILD trigger",
                trigger
            )));
        }
        _ => {}
    }

    let mut expression = ONBUILD_PREFIX_RE.replace(&node.original, "").to_string();
    for heredoc in &node.heredocs {
        expression.push('\n');
        expression.push_str(&heredoc.content);
        expression.push_str(&heredoc.name);
    }

    Ok(OnbuildInstruction {
        source: source_of(node),
        expression,
    })
}

fn parse_workdir(node: &Node) -> Result<WorkdirInstruction> {
    if node.args.len() != 1 {
        return Err(err_exactly_one_argument("WORKDIR"));
    }
    no_flags(node)?;
    Ok(WorkdirInstruction {
        source: source_of(node),
        path: node.args[0].clone(),
    })
}

fn parse_shell_dependent(node: &Node) -> ShellDependentCmd {
    let files = node
        .heredocs
        .iter()
        .map(|h| ShellInlineFile {
            name: h.name.clone(),
            data: h.content.clone(),
            chomp: h.chomp,
        })
        .collect();

    ShellDependentCmd {
        cmd_line: node.args.clone(),
        files,
        prepend_shell: !node.json,
    }
}

fn parse_run(node: &Node, features: &Features) -> Result<RunInstruction> {
    let mut flags = FlagSet::new(&node.flags);
    flags.add_string("network");
    flags.add_strings("mount");
    if features.run_security {
        flags.add_string("security");
    }
    if features.run_devices {
        flags.add_strings("device");
    }
    flags.parse()?;

    let network = match flags.string("network").as_deref() {
        None | Some("default") => NetworkMode::Default,
        Some("none") => NetworkMode::None,
        Some("host") => NetworkMode::Host,
        Some(other) => {
            return Err(FrontendError::parse(format!(
                "invalid network mode {:?}",
                other
            )));
        }
    };

    let security = match flags.string("security").as_deref() {
        None | Some("sandbox") => SecurityMode::Sandbox,
        Some("insecure") => SecurityMode::Insecure,
        Some(other) => {
            return Err(FrontendError::parse(format!(
                "invalid security mode {:?}",
                other
            )));
        }
    };

    let mut mounts = Vec::new();
    for value in flags.strings("mount") {
        mounts.push(parse_mount(&value)?);
    }

    Ok(RunInstruction {
        source: source_of(node),
        cmd: parse_shell_dependent(node),
        network,
        security,
        mounts,
        devices: flags.strings("device"),
        flags_used: flags.used(),
    })
}

/// Parse a `--mount=type=...,target=...` value.
fn parse_mount(value: &str) -> Result<RunMount> {
    let mut mount = RunMount::default();
    for field in value.split(',') {
        let field = field.trim();
        if field.is_empty() {
            continue;
        }
        let (key, val) = match field.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (field, None),
        };
        match (key, val) {
            ("type", Some(v)) => {
                mount.kind = match v {
                    "bind" => RunMountKind::Bind,
                    "cache" => RunMountKind::Cache,
                    "tmpfs" => RunMountKind::Tmpfs,
                    "secret" => RunMountKind::Secret,
                    "ssh" => RunMountKind::Ssh,
                    other => {
                        return Err(FrontendError::parse(format!(
                            "unsupported mount type {:?}",
                            other
                        )));
                    }
                };
            }
            ("from", Some(v)) => mount.from = Some(v.to_string()),
            ("source" | "src", Some(v)) => mount.source = Some(v.to_string()),
            ("target" | "dst" | "destination", Some(v)) => mount.target = v.to_string(),
            ("id", Some(v)) => mount.id = Some(v.to_string()),
            ("sharing", Some(v)) => {
                mount.sharing = match v {
                    "shared" => CacheSharingMode::Shared,
                    "private" => CacheSharingMode::Private,
                    "locked" => CacheSharingMode::Locked,
                    other => {
                        return Err(FrontendError::parse(format!(
                            "unsupported sharing mode {:?}",
                            other
                        )));
                    }
                };
            }
            ("readonly" | "ro", None) => mount.readonly = true,
            ("readonly" | "ro", Some(v)) => {
                mount.readonly = v.parse().map_err(|_| {
                    FrontendError::parse(format!("invalid readonly value {:?}", v))
                })?;
            }
            ("rw" | "readwrite", None) => mount.readonly = false,
            _ => {
                return Err(FrontendError::parse(format!(
                    "unexpected mount key {:?}",
                    key
                )));
            }
        }
    }

    if mount.target.is_empty() {
        match mount.kind {
            RunMountKind::Secret => {
                let id = mount.id.clone().unwrap_or_default();
                if id.is_empty() {
                    return Err(FrontendError::parse(
                        "secret mount requires a target or an id",
                    ));
                }
                mount.target = format!("/run/secrets/{}", id);
            }
            RunMountKind::Ssh => {
                mount.target = "/run/ssh_agent.0".to_string();
            }
            _ => {
                return Err(FrontendError::parse("mount requires a target path"));
            }
        }
    }
    Ok(mount)
}

fn parse_cmd(node: &Node) -> Result<CmdInstruction> {
    no_flags(node)?;
    Ok(CmdInstruction {
        source: source_of(node),
        cmd: parse_shell_dependent(node),
    })
}

fn parse_entrypoint(node: &Node) -> Result<EntrypointInstruction> {
    no_flags(node)?;
    Ok(EntrypointInstruction {
        source: source_of(node),
        cmd: parse_shell_dependent(node),
    })
}

/// Duration of an interval flag, or None when absent. Values under one
/// millisecond are rejected.
fn parse_opt_interval(flags: &FlagSet, name: &str) -> Result<Option<Duration>> {
    let Some(value) = flags.string(name) else {
        return Ok(None);
    };
    let duration = humantime::parse_duration(&value).map_err(|e| {
        FrontendError::validation(format!("invalid duration for --{}: {}", name, e))
    })?;
    if duration.is_zero() {
        return Ok(None);
    }
    if duration < Duration::from_millis(1) {
        return Err(FrontendError::validation(format!(
            "interval --{} cannot be less than 1ms",
            name
        )));
    }
    Ok(Some(duration))
}

fn parse_healthcheck(node: &Node) -> Result<HealthcheckInstruction> {
    if node.args.is_empty() {
        return Err(err_at_least_one_argument("HEALTHCHECK"));
    }

    let typ = node.args[0].to_uppercase();
    let args = &node.args[1..];
    let health = if typ == "NONE" {
        if !args.is_empty() {
            return Err(FrontendError::parse("HEALTHCHECK NONE takes no arguments"));
        }
        no_flags(node)?;
        HealthConfig {
            test: vec!["NONE".to_string()],
            ..HealthConfig::default()
        }
    } else if typ == "CMD" {
        let mut flags = FlagSet::new(&node.flags);
        flags.add_string("interval");
        flags.add_string("timeout");
        flags.add_string("start-period");
        flags.add_string("start-interval");
        flags.add_string("retries");
        flags.parse()?;

        if args.is_empty() {
            return Err(FrontendError::parse("missing command after HEALTHCHECK CMD"));
        }
        let test = match json_args(args) {
            Some(elements) => {
                let mut test = vec!["CMD".to_string()];
                test.extend(elements);
                test
            }
            None => vec!["CMD-SHELL".to_string(), args.join(" ")],
        };

        let retries = match flags.string("retries") {
            None => None,
            Some(value) => {
                let retries: i64 = value.parse().map_err(|_| {
                    FrontendError::validation(format!("invalid --retries value {:?}", value))
                })?;
                if retries < 0 {
                    return Err(FrontendError::validation(format!(
                        "--retries cannot be negative ({})",
                        retries
                    )));
                }
                Some(retries as u32)
            }
        };

        HealthConfig {
            test,
            interval: parse_opt_interval(&flags, "interval")?,
            timeout: parse_opt_interval(&flags, "timeout")?,
            start_period: parse_opt_interval(&flags, "start-period")?,
            start_interval: parse_opt_interval(&flags, "start-interval")?,
            retries,
        }
    } else {
        return Err(FrontendError::parse(format!(
            "unknown type {:?} in HEALTHCHECK (try CMD)",
            typ
        )));
    };

    Ok(HealthcheckInstruction {
        source: source_of(node),
        health,
    })
}

/// Re-assemble a JSON argument array that the tokenizer split on
/// whitespace (sub-commands like `HEALTHCHECK CMD [...]`).
fn json_args(args: &[String]) -> Option<Vec<String>> {
    if !args.first()?.starts_with('[') {
        return None;
    }
    serde_json::from_str(&args.join(" ")).ok()
}

fn parse_expose(node: &Node) -> Result<ExposeInstruction> {
    if node.args.is_empty() {
        return Err(err_at_least_one_argument("EXPOSE"));
    }
    no_flags(node)?;
    let mut ports = node.args.clone();
    ports.sort();
    Ok(ExposeInstruction {
        source: source_of(node),
        ports,
    })
}

fn parse_user(node: &Node) -> Result<UserInstruction> {
    if node.args.len() != 1 {
        return Err(err_exactly_one_argument("USER"));
    }
    no_flags(node)?;
    Ok(UserInstruction {
        source: source_of(node),
        user: node.args[0].clone(),
    })
}

fn parse_volume(node: &Node) -> Result<VolumeInstruction> {
    if node.args.is_empty() {
        return Err(err_at_least_one_argument("VOLUME"));
    }
    no_flags(node)?;

    let mut volumes = Vec::new();
    for v in &node.args {
        let v = v.trim();
        if v.is_empty() {
            return Err(FrontendError::parse("VOLUME cannot be an empty string"));
        }
        volumes.push(v.to_string());
    }
    Ok(VolumeInstruction {
        source: source_of(node),
        volumes,
    })
}

fn parse_stopsignal(node: &Node) -> Result<StopSignalInstruction> {
    if node.args.len() != 1 {
        return Err(err_exactly_one_argument("STOPSIGNAL"));
    }
    no_flags(node)?;
    Ok(StopSignalInstruction {
        source: source_of(node),
        signal: node.args[0].clone(),
    })
}

fn parse_arg(node: &Node) -> Result<ArgInstruction> {
    if node.args.is_empty() {
        return Err(err_at_least_one_argument("ARG"));
    }
    no_flags(node)?;

    let mut args = Vec::with_capacity(node.args.len());
    for arg in &node.args {
        match arg.split_once('=') {
            Some((key, _)) if key.is_empty() => {
                return Err(err_blank_command_names("ARG"));
            }
            Some((key, value)) => args.push(KeyValuePairOptional {
                key: key.to_string(),
                value: Some(value.to_string()),
            }),
            None => args.push(KeyValuePairOptional {
                key: arg.clone(),
                value: None,
            }),
        }
    }

    Ok(ArgInstruction {
        source: source_of(node),
        args,
    })
}

fn parse_shell(node: &Node) -> Result<ShellInstruction> {
    no_flags(node)?;
    if node.args.is_empty() {
        return Err(err_at_least_one_argument("SHELL"));
    }
    if !node.json {
        return Err(err_not_json("SHELL", &node.original));
    }
    Ok(ShellInstruction {
        source: source_of(node),
        shell: node.args.clone(),
    })
}

// =============================================================================
// Lint helpers
// =============================================================================

fn is_lower_case_stage_name(args: &[String]) -> bool {
    match args {
        [_, _, name] => *name == name.to_lowercase(),
        _ => true,
    }
}

fn does_from_case_match_as_case(node: &Node) -> bool {
    if node.args.len() < 3 {
        return true;
    }
    // Mixed-case FROM is linted elsewhere; skip the AS comparison then.
    let from_lower = node.value == node.value.to_lowercase();
    let from_upper = node.value == node.value.to_uppercase();
    if !from_lower && !from_upper {
        return true;
    }
    if from_lower {
        node.args[1] == node.args[1].to_lowercase()
    } else {
        node.args[1] == node.args[1].to_uppercase()
    }
}

/// A description comment above FROM/ARG should start with the defined name.
fn validate_definition_description(
    instruction: &str,
    keys: &[&str],
    node: &Node,
    lint: &mut Linter,
) {
    if node.prev_comments.is_empty() || keys.is_empty() {
        return;
    }
    let last = &node.prev_comments[node.prev_comments.len() - 1];
    let first_word = last.split_whitespace().next().unwrap_or("");
    if keys.contains(&first_word) {
        return;
    }
    let example = if keys.len() > 1 { "<arg_key>" } else { keys[0] };
    lint.run(
        LintRule::InvalidDefinitionDescription,
        Some(node.location),
        format!(
            "comment for {} should follow the format: `# {} <description>`",
            instruction, example
        ),
    );
}

fn get_comment(comments: &[String], name: Option<&str>) -> Option<String> {
    let name = name?;
    comments
        .iter()
        .find_map(|line| line.strip_prefix(&format!("{} ", name)))
        .map(|s| s.to_string())
}

// =============================================================================
// Error constructors
// =============================================================================

fn err_at_least_one_argument(cmd: &str) -> FrontendError {
    FrontendError::parse(format!("{} requires at least one argument", cmd))
}

fn err_exactly_one_argument(cmd: &str) -> FrontendError {
    FrontendError::parse(format!("{} requires exactly one argument", cmd))
}

fn err_no_destination_argument(cmd: &str) -> FrontendError {
    FrontendError::parse(format!(
        "{} requires at least two arguments, but only one was provided. Destination could not be determined",
        cmd
    ))
}

fn err_bad_heredoc(cmd: &str, option: &str) -> FrontendError {
    FrontendError::parse(format!("{} cannot accept a heredoc as {}", cmd, option))
}

fn err_blank_command_names(cmd: &str) -> FrontendError {
    FrontendError::parse(format!("{} names can not be blank", cmd))
}

fn err_not_json(cmd: &str, original: &str) -> FrontendError {
    FrontendError::parse(format!("{} requires the arguments to be in JSON form: {}", cmd, original))
}
