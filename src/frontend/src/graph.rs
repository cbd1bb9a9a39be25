//! Content-addressed build graph.
//!
//! Nodes are immutable and reference-counted; each carries a digest computed
//! from its own parameters and the digests of its inputs, so two
//! structurally identical subgraphs collapse to the same content address.
//! Display metadata (custom name, source location, cache invalidation) is
//! kept outside the digested payload.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use basalt_core::location::SourceRange;
use basalt_core::platform::Platform;

/// Reference to an immutable graph node.
#[derive(Debug, Clone)]
pub struct OpRef(Arc<OpNode>);

#[derive(Debug)]
struct OpNode {
    op: Op,
    meta: OpMetadata,
    digest: String,
}

impl OpRef {
    fn build(op: Op, meta: OpMetadata) -> OpRef {
        // Serialization of our own value types cannot fail.
        let payload = serde_json::to_vec(&op).expect("op serializes");
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&payload)));
        OpRef(Arc::new(OpNode { op, meta, digest }))
    }

    /// The content address of this node.
    pub fn digest(&self) -> &str {
        &self.0.digest
    }

    /// The same op with different display metadata; the content address is
    /// unchanged.
    pub fn with_meta(&self, meta: OpMetadata) -> OpRef {
        OpRef(Arc::new(OpNode {
            op: self.0.op.clone(),
            meta,
            digest: self.0.digest.clone(),
        }))
    }

    pub fn op(&self) -> &Op {
        &self.0.op
    }

    pub fn metadata(&self) -> &OpMetadata {
        &self.0.meta
    }

    /// Input nodes, in deterministic order.
    pub fn inputs(&self) -> Vec<&OpRef> {
        match &self.0.op {
            Op::Source(_) => Vec::new(),
            Op::Exec(exec) => {
                let mut inputs = vec![&exec.root];
                for mount in &exec.mounts {
                    if let MountKind::Bind { source, .. } = &mount.kind {
                        inputs.push(source);
                    }
                }
                inputs
            }
            Op::File(file) => {
                let mut inputs = Vec::new();
                if let Some(input) = &file.input {
                    inputs.push(input);
                }
                for action in &file.actions {
                    if let FileAction::Copy { source, .. } = action {
                        inputs.push(source);
                    }
                }
                inputs
            }
            Op::Merge(merge) => merge.inputs.iter().collect(),
        }
    }

    // --- Source constructors ---

    pub fn scratch() -> OpRef {
        OpRef::build(Op::Source(SourceOp::Scratch), OpMetadata::default())
    }

    pub fn image(reference: &str, platform: Option<Platform>) -> OpRef {
        OpRef::build(
            Op::Source(SourceOp::Image {
                reference: reference.to_string(),
                platform,
            }),
            OpMetadata::default(),
        )
    }

    pub fn local(name: &str, follow_paths: Vec<String>) -> OpRef {
        OpRef::build(
            Op::Source(SourceOp::Local {
                name: name.to_string(),
                follow_paths,
            }),
            OpMetadata::default(),
        )
    }

    pub fn http(url: &str, filename: &str, checksum: Option<String>) -> OpRef {
        OpRef::build(
            Op::Source(SourceOp::Http {
                url: url.to_string(),
                filename: filename.to_string(),
                checksum,
            }),
            OpMetadata::default(),
        )
    }

    pub fn git(remote: &str, reference: &str, keep_git_dir: bool) -> OpRef {
        OpRef::build(
            Op::Source(SourceOp::Git {
                remote: remote.to_string(),
                reference: reference.to_string(),
                keep_git_dir,
            }),
            OpMetadata::default(),
        )
    }

    pub fn merge(inputs: Vec<OpRef>, meta: OpMetadata) -> OpRef {
        OpRef::build(Op::Merge(MergeOp { inputs }), meta)
    }
}

impl PartialEq for OpRef {
    fn eq(&self, other: &Self) -> bool {
        self.0.digest == other.0.digest
    }
}

impl Eq for OpRef {}

/// Inputs serialize as their content address.
impl Serialize for OpRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.digest)
    }
}

/// Display metadata, excluded from content addressing.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OpMetadata {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceRange>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_cache: bool,
}

/// A graph operation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Op {
    Source(SourceOp),
    Exec(ExecOp),
    File(FileOp),
    Merge(MergeOp),
}

/// Where a filesystem comes from.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SourceOp {
    Scratch,
    Image {
        reference: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        platform: Option<Platform>,
    },
    Local {
        name: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        follow_paths: Vec<String>,
    },
    Git {
        remote: String,
        reference: String,
        keep_git_dir: bool,
    },
    Http {
        url: String,
        filename: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
}

/// Network mode of an exec node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecNetwork {
    #[default]
    Default,
    None,
    Host,
}

/// Security mode of an exec node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecSecurity {
    #[default]
    Sandbox,
    Insecure,
}

/// Sharing mode of a cache mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSharing {
    #[default]
    Shared,
    Private,
    Locked,
}

/// A mount attached to an exec node.
#[derive(Debug, Clone, Serialize)]
pub struct MountSpec {
    pub target: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
    #[serde(flatten)]
    pub kind: MountKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MountKind {
    Bind {
        source: OpRef,
        #[serde(skip_serializing_if = "Option::is_none")]
        subpath: Option<String>,
    },
    Cache {
        id: String,
        sharing: CacheSharing,
    },
    Tmpfs,
    Secret {
        id: String,
    },
    Ssh {
        id: String,
    },
}

/// A file created in the exec's filesystem before the command runs.
#[derive(Debug, Clone, Serialize)]
pub struct InlineFile {
    pub path: String,
    pub data: String,
    pub mode: u32,
}

/// A command execution over a root filesystem.
#[derive(Debug, Clone, Serialize)]
pub struct ExecOp {
    pub root: OpRef,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<MountSpec>,
    pub network: ExecNetwork,
    pub security: ExecSecurity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inline_files: Vec<InlineFile>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<String>,
}

/// A composition of filesystem mutations.
#[derive(Debug, Clone, Serialize)]
pub struct FileOp {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<OpRef>,
    pub actions: Vec<FileAction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    Copy {
        source: OpRef,
        src: String,
        dest: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        create_dest_path: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        follow_symlinks: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        allow_wildcard: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        unpack: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        keep_git_dir: bool,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        exclude_patterns: Vec<String>,
    },
    Mkfile {
        path: String,
        mode: u32,
        data: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
    },
    Rm {
        path: String,
        allow_not_found: bool,
    },
}

/// A union of multiple filesystems.
#[derive(Debug, Clone, Serialize)]
pub struct MergeOp {
    pub inputs: Vec<OpRef>,
}

// =============================================================================
// Builders
// =============================================================================

/// Fluent builder for exec nodes.
#[derive(Debug)]
pub struct Exec {
    op: ExecOp,
    meta: OpMetadata,
}

impl Exec {
    pub fn run(root: OpRef, args: Vec<String>) -> Exec {
        Exec {
            op: ExecOp {
                root,
                args,
                env: Vec::new(),
                user: None,
                cwd: None,
                mounts: Vec::new(),
                network: ExecNetwork::Default,
                security: ExecSecurity::Sandbox,
                platform: None,
                inline_files: Vec::new(),
                devices: Vec::new(),
            },
            meta: OpMetadata::default(),
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.op.env.push(format!("{}={}", key, value));
        self
    }

    pub fn env_list(mut self, env: Vec<String>) -> Self {
        self.op.env = env;
        self
    }

    pub fn user(mut self, user: Option<String>) -> Self {
        self.op.user = user;
        self
    }

    pub fn cwd(mut self, cwd: Option<String>) -> Self {
        self.op.cwd = cwd;
        self
    }

    pub fn mount(mut self, mount: MountSpec) -> Self {
        self.op.mounts.push(mount);
        self
    }

    pub fn network(mut self, network: ExecNetwork) -> Self {
        self.op.network = network;
        self
    }

    pub fn security(mut self, security: ExecSecurity) -> Self {
        self.op.security = security;
        self
    }

    pub fn platform(mut self, platform: Option<Platform>) -> Self {
        self.op.platform = platform;
        self
    }

    pub fn inline_file(mut self, file: InlineFile) -> Self {
        self.op.inline_files.push(file);
        self
    }

    pub fn device(mut self, device: &str) -> Self {
        self.op.devices.push(device.to_string());
        self
    }

    pub fn custom_name(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    pub fn location(mut self, location: Option<SourceRange>) -> Self {
        self.meta.location = location;
        self
    }

    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.meta.ignore_cache = ignore;
        self
    }

    pub fn root(self) -> OpRef {
        OpRef::build(Op::Exec(self.op), self.meta)
    }
}

/// Fluent builder for file nodes.
#[derive(Debug)]
pub struct FileSystem {
    op: FileOp,
    meta: OpMetadata,
}

impl FileSystem {
    pub fn sequence(input: Option<OpRef>) -> FileSystem {
        FileSystem {
            op: FileOp {
                input,
                actions: Vec::new(),
            },
            meta: OpMetadata::default(),
        }
    }

    pub fn append(mut self, action: FileAction) -> Self {
        self.op.actions.push(action);
        self
    }

    pub fn custom_name(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    pub fn location(mut self, location: Option<SourceRange>) -> Self {
        self.meta.location = location;
        self
    }

    pub fn ignore_cache(mut self, ignore: bool) -> Self {
        self.meta.ignore_cache = ignore;
        self
    }

    pub fn output(self) -> OpRef {
        OpRef::build(Op::File(self.op), self.meta)
    }
}

// =============================================================================
// Serialization
// =============================================================================

/// A serialized build graph: every node reachable from the root, inputs
/// before dependents, deduplicated by content address.
#[derive(Debug, Serialize)]
pub struct GraphDefinition {
    pub nodes: Vec<NodeRecord>,
    /// Content address of the result node
    pub root: String,
}

#[derive(Debug, Serialize)]
pub struct NodeRecord {
    pub digest: String,
    pub op: serde_json::Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceRange>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_cache: bool,
}

impl GraphDefinition {
    pub fn from_root(root: &OpRef) -> GraphDefinition {
        let mut seen = BTreeSet::new();
        let mut nodes = Vec::new();
        visit(root, &mut seen, &mut nodes);
        GraphDefinition {
            nodes,
            root: root.digest().to_string(),
        }
    }

    /// Byte-stable serialized form; the basis of spec determinism.
    pub fn to_bytes(&self) -> basalt_core::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

fn visit(op: &OpRef, seen: &mut BTreeSet<String>, nodes: &mut Vec<NodeRecord>) {
    if seen.contains(op.digest()) {
        return;
    }
    seen.insert(op.digest().to_string());
    for input in op.inputs() {
        visit(input, seen, nodes);
    }
    nodes.push(NodeRecord {
        digest: op.digest().to_string(),
        // Value maps are BTree-backed, so keys come out sorted.
        op: serde_json::to_value(op.op()).expect("op serializes"),
        name: op.metadata().name.clone(),
        location: op.metadata().location,
        ignore_cache: op.metadata().ignore_cache,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_true(root: OpRef) -> OpRef {
        Exec::run(root, vec!["true".to_string()]).root()
    }

    #[test]
    fn test_identical_ops_share_digest() {
        let a = OpRef::image("alpine:3.19", None);
        let b = OpRef::image("alpine:3.19", None);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_params_differ() {
        let a = OpRef::image("alpine:3.19", None);
        let b = OpRef::image("alpine:3.20", None);
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_digest_covers_inputs() {
        let a = exec_true(OpRef::scratch());
        let b = exec_true(OpRef::image("alpine", None));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_metadata_outside_digest() {
        let plain = Exec::run(OpRef::scratch(), vec!["true".to_string()]).root();
        let named = Exec::run(OpRef::scratch(), vec!["true".to_string()])
            .custom_name("RUN true")
            .root();
        assert_eq!(plain.digest(), named.digest());
    }

    #[test]
    fn test_env_order_changes_digest() {
        let a = Exec::run(OpRef::scratch(), vec!["true".to_string()])
            .env("A", "1")
            .env("B", "2")
            .root();
        let b = Exec::run(OpRef::scratch(), vec!["true".to_string()])
            .env("B", "2")
            .env("A", "1")
            .root();
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_serialization_is_stable() {
        let build = || {
            let base = OpRef::image("ubuntu:22.04", None);
            let fetched = OpRef::http(
                "https://example.com/pkg.deb",
                "pkg.deb",
                Some("sha256:abcd".to_string()),
            );
            let copied = FileSystem::sequence(Some(base.clone()))
                .append(FileAction::Copy {
                    source: fetched,
                    src: "pkg.deb".to_string(),
                    dest: "/tmp/pkg.deb".to_string(),
                    mode: Some(0o644),
                    owner: None,
                    create_dest_path: true,
                    follow_symlinks: false,
                    allow_wildcard: false,
                    unpack: false,
                    keep_git_dir: false,
                    exclude_patterns: Vec::new(),
                })
                .output();
            GraphDefinition::from_root(&copied).to_bytes().unwrap()
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_definition_inputs_precede_dependents() {
        let base = OpRef::scratch();
        let step = exec_true(base.clone());
        let def = GraphDefinition::from_root(&step);
        assert_eq!(def.nodes.len(), 2);
        assert_eq!(def.nodes[0].digest, base.digest());
        assert_eq!(def.nodes[1].digest, step.digest());
        assert_eq!(def.root, step.digest());
    }

    #[test]
    fn test_definition_dedupes_shared_inputs() {
        let base = OpRef::scratch();
        let left = exec_true(base.clone());
        let right = Exec::run(base, vec!["false".to_string()]).root();
        let merged = OpRef::merge(vec![left, right], OpMetadata::default());
        let def = GraphDefinition::from_root(&merged);
        // scratch, two execs, merge
        assert_eq!(def.nodes.len(), 4);
    }

    #[test]
    fn test_mounts_feed_inputs() {
        let acc = OpRef::image("ubuntu", None);
        let step = Exec::run(OpRef::scratch(), vec!["true".to_string()])
            .mount(MountSpec {
                target: "/data".to_string(),
                readonly: false,
                kind: MountKind::Bind {
                    source: acc.clone(),
                    subpath: Some("/data".to_string()),
                },
            })
            .root();
        assert!(step.inputs().iter().any(|i| i.digest() == acc.digest()));
    }

    #[test]
    fn test_cache_mount_serializes_sharing() {
        let step = Exec::run(OpRef::scratch(), vec!["true".to_string()])
            .mount(MountSpec {
                target: "/state".to_string(),
                readonly: false,
                kind: MountKind::Cache {
                    id: "apt".to_string(),
                    sharing: CacheSharing::Shared,
                },
            })
            .root();
        let json = serde_json::to_string(step.op()).unwrap();
        assert!(json.contains("\"sharing\":\"shared\""));
        assert!(json.contains("\"type\":\"cache\""));
    }
}
