//! Typed Dockerfile instructions.
//!
//! Built from AST nodes by [`parse`]; read-only afterwards. Each carries its
//! original source text and range so errors, lints, and graph metadata can
//! point back at the file.

pub mod flags;
pub mod parse;

use std::time::Duration;

use basalt_core::location::SourceRange;

/// Original text and source range shared by every instruction.
#[derive(Debug, Clone)]
pub struct InstructionSource {
    pub code: String,
    pub location: SourceRange,
}

/// A `KEY=VALUE` pair; `no_delim` marks the legacy whitespace form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
    pub no_delim: bool,
}

/// A `KEY[=VALUE]` pair for ARG declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValuePairOptional {
    pub key: String,
    pub value: Option<String>,
}

/// An inline file carried by a heredoc source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceContent {
    pub path: String,
    pub data: String,
    pub expand: bool,
}

/// Sources and destination of a COPY/ADD.
#[derive(Debug, Clone, Default)]
pub struct SourcesAndDest {
    pub dest_path: String,
    pub source_paths: Vec<String>,
    pub source_contents: Vec<SourceContent>,
}

/// A heredoc attached to a shell-form command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellInlineFile {
    pub name: String,
    pub data: String,
    pub chomp: bool,
}

/// A command line that may be shell form (wrapped in the effective shell)
/// or exec form (JSON array, used verbatim).
#[derive(Debug, Clone, Default)]
pub struct ShellDependentCmd {
    pub cmd_line: Vec<String>,
    pub files: Vec<ShellInlineFile>,
    pub prepend_shell: bool,
}

/// Network mode for RUN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkMode {
    #[default]
    Default,
    None,
    Host,
}

/// Security mode for RUN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityMode {
    #[default]
    Sandbox,
    Insecure,
}

/// Sharing mode of a cache mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheSharingMode {
    #[default]
    Shared,
    Private,
    Locked,
}

/// Mount kind for `RUN --mount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMountKind {
    #[default]
    Bind,
    Cache,
    Tmpfs,
    Secret,
    Ssh,
}

/// A parsed `--mount` option on RUN.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMount {
    pub kind: RunMountKind,
    pub from: Option<String>,
    pub source: Option<String>,
    pub target: String,
    pub readonly: bool,
    pub id: Option<String>,
    pub sharing: CacheSharingMode,
}

/// Parsed HEALTHCHECK configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthConfig {
    pub test: Vec<String>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub start_period: Option<Duration>,
    pub start_interval: Option<Duration>,
    pub retries: Option<u32>,
}

// =============================================================================
// Instructions
// =============================================================================

#[derive(Debug, Clone)]
pub struct EnvInstruction {
    pub source: InstructionSource,
    pub env: Vec<KeyValuePair>,
}

#[derive(Debug, Clone)]
pub struct LabelInstruction {
    pub source: InstructionSource,
    pub labels: Vec<KeyValuePair>,
}

#[derive(Debug, Clone)]
pub struct MaintainerInstruction {
    pub source: InstructionSource,
    pub maintainer: String,
}

#[derive(Debug, Clone)]
pub struct AddInstruction {
    pub source: InstructionSource,
    pub sources_and_dest: SourcesAndDest,
    pub chown: Option<String>,
    pub chmod: Option<String>,
    pub link: bool,
    pub keep_git_dir: bool,
    pub checksum: Option<String>,
    pub unpack: Option<bool>,
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CopyInstruction {
    pub source: InstructionSource,
    pub sources_and_dest: SourcesAndDest,
    pub from: Option<String>,
    pub chown: Option<String>,
    pub chmod: Option<String>,
    pub link: bool,
    pub parents: bool,
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunInstruction {
    pub source: InstructionSource,
    pub cmd: ShellDependentCmd,
    pub network: NetworkMode,
    pub security: SecurityMode,
    pub mounts: Vec<RunMount>,
    pub devices: Vec<String>,
    pub flags_used: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CmdInstruction {
    pub source: InstructionSource,
    pub cmd: ShellDependentCmd,
}

#[derive(Debug, Clone)]
pub struct EntrypointInstruction {
    pub source: InstructionSource,
    pub cmd: ShellDependentCmd,
}

#[derive(Debug, Clone)]
pub struct HealthcheckInstruction {
    pub source: InstructionSource,
    pub health: HealthConfig,
}

#[derive(Debug, Clone)]
pub struct ExposeInstruction {
    pub source: InstructionSource,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct UserInstruction {
    pub source: InstructionSource,
    pub user: String,
}

#[derive(Debug, Clone)]
pub struct VolumeInstruction {
    pub source: InstructionSource,
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WorkdirInstruction {
    pub source: InstructionSource,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct ArgInstruction {
    pub source: InstructionSource,
    pub args: Vec<KeyValuePairOptional>,
}

#[derive(Debug, Clone)]
pub struct ShellInstruction {
    pub source: InstructionSource,
    pub shell: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OnbuildInstruction {
    pub source: InstructionSource,
    pub expression: String,
}

#[derive(Debug, Clone)]
pub struct StopSignalInstruction {
    pub source: InstructionSource,
    pub signal: String,
}

/// The `ADD --apt` specialization.
#[derive(Debug, Clone)]
pub struct PackageInstruction {
    pub source: InstructionSource,
    pub packages: Vec<String>,
}

/// A typed Dockerfile instruction.
#[derive(Debug, Clone)]
pub enum Instruction {
    Env(EnvInstruction),
    Label(LabelInstruction),
    Maintainer(MaintainerInstruction),
    Add(AddInstruction),
    Copy(CopyInstruction),
    Run(RunInstruction),
    Cmd(CmdInstruction),
    Entrypoint(EntrypointInstruction),
    Healthcheck(HealthcheckInstruction),
    Expose(ExposeInstruction),
    User(UserInstruction),
    Volume(VolumeInstruction),
    Workdir(WorkdirInstruction),
    Arg(ArgInstruction),
    Shell(ShellInstruction),
    Onbuild(OnbuildInstruction),
    StopSignal(StopSignalInstruction),
    Package(PackageInstruction),
}

impl Instruction {
    /// Original source text and range.
    pub fn source(&self) -> &InstructionSource {
        match self {
            Instruction::Env(i) => &i.source,
            Instruction::Label(i) => &i.source,
            Instruction::Maintainer(i) => &i.source,
            Instruction::Add(i) => &i.source,
            Instruction::Copy(i) => &i.source,
            Instruction::Run(i) => &i.source,
            Instruction::Cmd(i) => &i.source,
            Instruction::Entrypoint(i) => &i.source,
            Instruction::Healthcheck(i) => &i.source,
            Instruction::Expose(i) => &i.source,
            Instruction::User(i) => &i.source,
            Instruction::Volume(i) => &i.source,
            Instruction::Workdir(i) => &i.source,
            Instruction::Arg(i) => &i.source,
            Instruction::Shell(i) => &i.source,
            Instruction::Onbuild(i) => &i.source,
            Instruction::StopSignal(i) => &i.source,
            Instruction::Package(i) => &i.source,
        }
    }

    /// Canonical (upper-case) instruction name.
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Env(_) => "ENV",
            Instruction::Label(_) => "LABEL",
            Instruction::Maintainer(_) => "MAINTAINER",
            Instruction::Add(_) | Instruction::Package(_) => "ADD",
            Instruction::Copy(_) => "COPY",
            Instruction::Run(_) => "RUN",
            Instruction::Cmd(_) => "CMD",
            Instruction::Entrypoint(_) => "ENTRYPOINT",
            Instruction::Healthcheck(_) => "HEALTHCHECK",
            Instruction::Expose(_) => "EXPOSE",
            Instruction::User(_) => "USER",
            Instruction::Volume(_) => "VOLUME",
            Instruction::Workdir(_) => "WORKDIR",
            Instruction::Arg(_) => "ARG",
            Instruction::Shell(_) => "SHELL",
            Instruction::Onbuild(_) => "ONBUILD",
            Instruction::StopSignal(_) => "STOPSIGNAL",
        }
    }
}

/// A build stage: a `FROM` header plus its instructions.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Base image expression as written (may contain variables)
    pub base_name: String,
    /// Declared stage name, lower-cased, when present
    pub name: Option<String>,
    /// `--platform` expression as written
    pub platform: Option<String>,
    /// Instructions in source order
    pub instructions: Vec<Instruction>,
    /// Leading comment describing the stage
    pub comment: Option<String>,
    pub source: InstructionSource,
}
