//! End-to-end compilation scenarios against a fake engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use basalt_core::error::{FrontendError, Result};
use basalt_core::platform::Platform;
use basalt_frontend::ast::parse_text;
use basalt_frontend::compile::{compile, CompileConfig, CompileResult};
use basalt_frontend::graph::GraphDefinition;
use basalt_frontend::lint::LintRule;
use basalt_frontend::solver::{Engine, SolveRef};

const NGINX_LISTING: &str = "\
'http://archive.ubuntu.com/ubuntu/pool/main/n/nginx/nginx_1.18.0-0ubuntu1_amd64.deb' nginx_1.18.0-0ubuntu1_amd64.deb 43596 SHA256:9fecb47a226d2e75b4bc901ab244f9d07a1ae60e4b28e47038beb59931f2ed5e
'http://archive.ubuntu.com/ubuntu/pool/main/l/libssl/libssl1.1_1.1.1f_amd64.deb' libssl1.1_1.1.1f_amd64.deb 1320000 SHA256:4f6b2b1d6e9b0ab6deacd2b5cb8b2b9fc66eadcf9f6e0e0d78fa5e5f2b6a3c1d
";

/// Deterministic stand-in for the build engine: executes nothing, serves a
/// fixed set of files, and records every solved definition.
struct FakeEngine {
    files: BTreeMap<String, Vec<u8>>,
    solves: Mutex<Vec<serde_json::Value>>,
}

impl FakeEngine {
    fn new() -> Arc<FakeEngine> {
        Arc::new(FakeEngine {
            files: BTreeMap::new(),
            solves: Mutex::new(Vec::new()),
        })
    }

    fn with_file(path: &str, data: &str) -> Arc<FakeEngine> {
        let mut files = BTreeMap::new();
        files.insert(path.to_string(), data.as_bytes().to_vec());
        Arc::new(FakeEngine {
            files,
            solves: Mutex::new(Vec::new()),
        })
    }

    fn solve_count(&self) -> usize {
        self.solves.lock().unwrap().len()
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn solve(&self, definition: &GraphDefinition) -> Result<Box<dyn SolveRef>> {
        let value = serde_json::from_slice(&definition.to_bytes()?)
            .map_err(|e| FrontendError::Serialization(e.to_string()))?;
        self.solves.lock().unwrap().push(value);
        Ok(Box::new(FakeRef {
            files: self.files.clone(),
        }))
    }
}

struct FakeRef {
    files: BTreeMap<String, Vec<u8>>,
}

#[async_trait]
impl SolveRef for FakeRef {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| FrontendError::package(format!("file not found: {}", path)))
    }
}

fn amd64_config() -> CompileConfig {
    CompileConfig {
        target_platform: Platform::parse("linux/amd64").unwrap(),
        build_platform: Platform::parse("linux/amd64").unwrap(),
        ..CompileConfig::default()
    }
}

async fn build(dockerfile: &str) -> Result<CompileResult> {
    build_with(dockerfile, amd64_config(), FakeEngine::new()).await
}

async fn build_with(
    dockerfile: &str,
    config: CompileConfig,
    engine: Arc<FakeEngine>,
) -> Result<CompileResult> {
    let nodes = parse_text(dockerfile)?;
    compile(&nodes, config, engine).await
}

fn nodes_of(result: &CompileResult) -> Vec<serde_json::Value> {
    let value: serde_json::Value = serde_json::from_slice(&result.definition).unwrap();
    value["nodes"].as_array().unwrap().clone()
}

fn image_of(result: &CompileResult) -> serde_json::Value {
    serde_json::from_slice(&result.image_config).unwrap()
}

fn named<'a>(nodes: &'a [serde_json::Value], fragment: &str) -> Vec<&'a serde_json::Value> {
    nodes
        .iter()
        .filter(|n| {
            n["name"]
                .as_str()
                .map(|name| name.contains(fragment))
                .unwrap_or(false)
        })
        .collect()
}

fn history_lines(image: &serde_json::Value) -> Vec<String> {
    image["history"]
        .as_array()
        .map(|entries| {
            entries
                .iter()
                .map(|h| h["created_by"].as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Literal end-to-end scenarios
// =============================================================================

#[tokio::test]
async fn test_scratch_copy_single_file() {
    let result = build("FROM scratch\nCOPY a.txt /").await.unwrap();
    let nodes = nodes_of(&result);

    let files: Vec<_> = nodes
        .iter()
        .filter(|n| n["op"]["kind"] == "file")
        .collect();
    assert_eq!(files.len(), 1);
    let actions = files[0]["op"]["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["action"], "copy");
    assert_eq!(actions[0]["src"], "a.txt");
    assert_eq!(actions[0]["dest"], "/");

    let image = image_of(&result);
    assert_eq!(history_lines(&image), vec!["COPY a.txt /"]);
    assert!(image["config"].get("Env").is_none());
    assert!(image["config"].get("Cmd").is_none());
}

#[tokio::test]
async fn test_cross_stage_copy_reads_stage_not_context() {
    let result = build("FROM scratch AS a\nFROM a\nCOPY --from=a / /")
        .await
        .unwrap();
    let nodes = nodes_of(&result);

    // No local build-context source may appear: the copy reads stage a.
    assert!(nodes.iter().all(|n| n["op"]["source"] != "local"));
    let files: Vec<_> = nodes
        .iter()
        .filter(|n| n["op"]["kind"] == "file")
        .collect();
    assert_eq!(files.len(), 1);
    let source_digest = files[0]["op"]["actions"][0]["source"].as_str().unwrap();
    let scratch = nodes
        .iter()
        .find(|n| n["op"]["source"] == "scratch")
        .unwrap();
    assert_eq!(source_digest, scratch["digest"].as_str().unwrap());
}

#[tokio::test]
async fn test_build_arg_overrides_base_tag() {
    let mut config = amd64_config();
    config
        .build_args
        .insert("V".to_string(), "latest".to_string());
    let result = build_with("ARG V=1.2\nFROM busybox:${V}", config, FakeEngine::new())
        .await
        .unwrap();
    let nodes = nodes_of(&result);
    let image = nodes
        .iter()
        .find(|n| n["op"]["source"] == "image")
        .unwrap();
    assert_eq!(image["op"]["reference"], "busybox:latest");
}

#[tokio::test]
async fn test_apt_extension_emits_three_phases() {
    let engine = FakeEngine::with_file("/btidor.syntax/install", NGINX_LISTING);
    let result = build_with("FROM ubuntu\nADD --apt nginx", amd64_config(), engine.clone())
        .await
        .unwrap();
    let nodes = nodes_of(&result);

    assert_eq!(named(&nodes, "ADD (apt update) nginx").len(), 1);
    assert_eq!(named(&nodes, "ADD (apt download) nginx").len(), 1);
    assert_eq!(named(&nodes, "ADD (apt install) nginx").len(), 1);
    assert_eq!(named(&nodes, "COPY (apt packages)").len(), 1);

    // The install phase runs over the original ubuntu root, with the
    // accumulator bind-mounted at /btidor.syntax.
    let ubuntu = nodes
        .iter()
        .find(|n| n["op"]["source"] == "image")
        .unwrap();
    let install = named(&nodes, "ADD (apt install) nginx")[0];
    assert_eq!(install["op"]["root"], ubuntu["digest"]);
    let mounts = install["op"]["mounts"].as_array().unwrap();
    assert_eq!(mounts.len(), 1);
    assert_eq!(mounts[0]["target"], "/btidor.syntax");
    assert_eq!(mounts[0]["type"], "bind");
    assert_eq!(mounts[0]["subpath"], "/btidor.syntax");
    let accumulator = named(&nodes, "COPY (apt packages)")[0];
    assert_eq!(mounts[0]["source"], accumulator["digest"]);

    // The update phase attaches the shared index cache mount.
    let update = named(&nodes, "ADD (apt update) nginx")[0];
    let update_mounts = update["op"]["mounts"].as_array().unwrap();
    assert_eq!(update_mounts[0]["type"], "cache");
    assert_eq!(update_mounts[0]["id"], "btidor.syntax");
    assert_eq!(update_mounts[0]["sharing"], "shared");
    assert_eq!(update_mounts[0]["target"], "/btidor.syntax/state");

    // One mid-compile solve, containing the first two phases but not the
    // install phase.
    assert_eq!(engine.solve_count(), 1);
    let solved = engine.solves.lock().unwrap()[0].clone();
    let solved_names: Vec<String> = solved["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["name"].as_str().map(|s| s.to_string()))
        .collect();
    assert!(solved_names.iter().any(|n| n.contains("ADD (apt update)")));
    assert!(solved_names.iter().any(|n| n.contains("ADD (apt download)")));
    assert!(!solved_names.iter().any(|n| n.contains("ADD (apt install)")));

    // Every exec in the pipeline runs noninteractively.
    for fragment in ["apt update", "apt download", "apt install"] {
        let exec = named(&nodes, fragment)[0];
        let env = exec["op"]["env"].as_array().unwrap();
        assert!(env.contains(&serde_json::json!("DEBIAN_FRONTEND=noninteractive")));
    }

    // History records the three steps in order.
    let image = image_of(&result);
    let history = history_lines(&image);
    assert_eq!(history.len(), 3);
    assert!(history[0].contains("ADD (apt update) nginx"));
    assert!(history[1].contains("ADD (apt download) nginx"));
    assert!(history[2].contains("ADD (apt install) nginx"));
}

#[tokio::test]
async fn test_redundant_target_platform_lints() {
    let result = build("FROM --platform=$TARGETPLATFORM scratch").await.unwrap();
    let warning = result
        .warnings
        .iter()
        .find(|w| w.rule == LintRule::RedundantTargetPlatform)
        .expect("expected RedundantTargetPlatform");
    assert_eq!(warning.location.unwrap().start.line, 1);
}

#[tokio::test]
async fn test_reserved_stage_name_rejected() {
    let err = build("FROM scratch AS scratch").await.unwrap_err();
    assert!(matches!(err, FrontendError::Resolve { .. }));
    assert!(err.to_string().contains("reserved stage name"));
}

// =============================================================================
// Invariants
// =============================================================================

#[tokio::test]
async fn test_determinism_byte_identical_output() {
    let dockerfile = "FROM alpine:3.19\nARG A=x\nENV B=$A\nRUN echo $B\nLABEL v=1\nEXPOSE 80\nCMD [\"run\"]";
    let mut config = amd64_config();
    config.source_date_epoch = Some(1_700_000_000);

    let first = build_with(dockerfile, config.clone(), FakeEngine::new())
        .await
        .unwrap();
    let second = build_with(dockerfile, config, FakeEngine::new())
        .await
        .unwrap();
    assert_eq!(first.definition, second.definition);
    assert_eq!(first.image_config, second.image_config);
}

#[tokio::test]
async fn test_unchanged_dockerfile_keeps_content_addresses() {
    let dockerfile = "FROM alpine\nRUN apt-get update\nCOPY a /a";
    let first = build(dockerfile).await.unwrap();
    let second = build(dockerfile).await.unwrap();
    let digests = |r: &CompileResult| -> Vec<String> {
        nodes_of(r)
            .iter()
            .map(|n| n["digest"].as_str().unwrap().to_string())
            .collect()
    };
    assert_eq!(digests(&first), digests(&second));
}

#[tokio::test]
async fn test_label_order_is_observable() {
    let a = build("FROM scratch\nLABEL a=1\nLABEL b=2").await.unwrap();
    let b = build("FROM scratch\nLABEL b=2\nLABEL a=1").await.unwrap();
    // The label map itself is order-insensitive, but the recorded history
    // differs, so the output artifact does.
    assert_ne!(a.image_config, b.image_config);
}

#[tokio::test]
async fn test_undefined_variable_reported_per_occurrence() {
    let result = build("FROM scratch\nENV X=${MISSING}-${MISSING}").await.unwrap();
    let undefined: Vec<_> = result
        .warnings
        .iter()
        .filter(|w| w.rule == LintRule::UndefinedVar)
        .collect();
    assert_eq!(undefined.len(), 2);

    let image = image_of(&result);
    let env = image["config"]["Env"].as_array().unwrap();
    assert_eq!(env[0], "X=-");
}

#[tokio::test]
async fn test_stage_isolation_env() {
    // Stage b does not see stage a's ENV; the final stage inherits it via
    // FROM a. The copy from b keeps b in the dispatch plan.
    let result = build(
        "FROM scratch AS a\nENV X=1\nFROM scratch AS b\nENV Y=$X\nFROM a\nENV Z=$X\nCOPY --from=b / /b/",
    )
    .await
    .unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.rule == LintRule::UndefinedVar && w.message.contains("$X")));
    let image = image_of(&result);
    let env = image["config"]["Env"].as_array().unwrap();
    assert!(env.contains(&serde_json::json!("X=1")));
    assert!(env.contains(&serde_json::json!("Z=1")));
    assert!(!env.iter().any(|e| e.as_str().unwrap().starts_with("Y=")));
}

#[tokio::test]
async fn test_stage_arg_isolation() {
    // A meta-ARG is not visible inside a stage without re-declaration.
    let result = build("ARG V=7\nFROM scratch\nENV A=$V\nARG V\nENV B=$V")
        .await
        .unwrap();
    let image = image_of(&result);
    let env = image["config"]["Env"].as_array().unwrap();
    assert!(env.contains(&serde_json::json!("A=")));
    assert!(env.contains(&serde_json::json!("B=7")));
}

#[tokio::test]
async fn test_cyclic_stage_references_rejected() {
    let err = build(
        "FROM scratch AS a\nCOPY --from=b /x /x\nFROM scratch AS b\nCOPY --from=a /y /y",
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FrontendError::Resolve { .. }));
    assert!(err.to_string().contains("circular dependency"));
}

#[tokio::test]
async fn test_apt_round_trip_order_and_digests() {
    let engine = FakeEngine::with_file("/btidor.syntax/install", NGINX_LISTING);
    let result = build_with(
        "FROM ubuntu\nADD --apt nginx libssl1.1",
        amd64_config(),
        engine,
    )
    .await
    .unwrap();
    let nodes = nodes_of(&result);

    let https: Vec<_> = nodes
        .iter()
        .filter(|n| n["op"]["source"] == "http")
        .collect();
    assert_eq!(https.len(), 2);
    assert!(https[0]["op"]["url"].as_str().unwrap().contains("nginx"));
    assert!(https[1]["op"]["url"].as_str().unwrap().contains("libssl"));
    assert_eq!(
        https[0]["op"]["checksum"],
        "sha256:9fecb47a226d2e75b4bc901ab244f9d07a1ae60e4b28e47038beb59931f2ed5e"
    );
    assert_eq!(
        https[1]["op"]["checksum"],
        "sha256:4f6b2b1d6e9b0ab6deacd2b5cb8b2b9fc66eadcf9f6e0e0d78fa5e5f2b6a3c1d"
    );

    // The accumulator copies with mode 0644, creating the destination.
    let accumulator = named(&nodes, "COPY (apt packages)")[0];
    let actions = accumulator["op"]["actions"].as_array().unwrap();
    assert_eq!(actions.len(), 2);
    for action in actions {
        assert_eq!(action["dest"], "/btidor.syntax/cache/archives/");
        assert_eq!(action["mode"], 0o644);
        assert_eq!(action["create_dest_path"], true);
    }
}

#[tokio::test]
async fn test_apt_bad_listing_is_fatal() {
    let engine = FakeEngine::with_file("/btidor.syntax/install", "Reading package lists...\n");
    let err = build_with("FROM ubuntu\nADD --apt nginx", amd64_config(), engine)
        .await
        .unwrap_err();
    assert!(matches!(err, FrontendError::PackageResolution { .. }));
    assert!(err.location().is_some());
}

#[tokio::test]
async fn test_apt_missing_listing_is_fatal() {
    let err = build_with("FROM ubuntu\nADD --apt nginx", amd64_config(), FakeEngine::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FrontendError::PackageResolution { .. }));
}

// =============================================================================
// Dispatch behavior
// =============================================================================

#[tokio::test]
async fn test_run_exec_carries_env_user_cwd_platform() {
    let mut config = amd64_config();
    config.target_platform = Platform::parse("linux/arm64").unwrap();
    config.build_platform = Platform::parse("linux/arm64").unwrap();
    let result = build_with(
        "FROM alpine\nENV A=1\nUSER app\nWORKDIR /srv\nRUN echo hi",
        config,
        FakeEngine::new(),
    )
    .await
    .unwrap();
    let nodes = nodes_of(&result);
    let run = named(&nodes, "RUN echo hi")[0];
    assert_eq!(run["op"]["user"], "app");
    assert_eq!(run["op"]["cwd"], "/srv");
    assert_eq!(run["op"]["platform"]["architecture"], "arm64");
    let env = run["op"]["env"].as_array().unwrap();
    assert!(env.contains(&serde_json::json!("A=1")));
    let args = run["op"]["args"].as_array().unwrap();
    assert_eq!(args[0], "/bin/sh");
    assert_eq!(args[2], "echo hi");
}

#[tokio::test]
async fn test_shell_instruction_changes_wrapping() {
    let result = build("FROM alpine\nSHELL [\"/bin/bash\", \"-o\", \"pipefail\", \"-c\"]\nRUN echo hi")
        .await
        .unwrap();
    let nodes = nodes_of(&result);
    let run = named(&nodes, "RUN echo hi")[0];
    let args = run["op"]["args"].as_array().unwrap();
    assert_eq!(args[0], "/bin/bash");
    assert_eq!(args.last().unwrap(), "echo hi");

    let image = image_of(&result);
    assert_eq!(image["config"]["Shell"][0], "/bin/bash");
}

#[tokio::test]
async fn test_run_cache_mount_shares_by_id() {
    let result = build(
        "FROM alpine\nRUN --mount=type=cache,target=/root/.cache,id=deps,sharing=locked true",
    )
    .await
    .unwrap();
    let nodes = nodes_of(&result);
    let run = named(&nodes, "RUN --mount")[0];
    let mounts = run["op"]["mounts"].as_array().unwrap();
    assert_eq!(mounts[0]["type"], "cache");
    assert_eq!(mounts[0]["id"], "deps");
    assert_eq!(mounts[0]["sharing"], "locked");
}

#[tokio::test]
async fn test_copy_link_produces_merge() {
    let result = build("FROM alpine\nCOPY --link a.txt /a.txt").await.unwrap();
    let nodes = nodes_of(&result);
    assert!(nodes.iter().any(|n| n["op"]["kind"] == "merge"));
    // The linked copy starts from scratch rather than the base.
    let file = nodes.iter().find(|n| n["op"]["kind"] == "file").unwrap();
    assert!(file["op"].get("input").is_none());
}

#[tokio::test]
async fn test_copy_heredoc_becomes_mkfile() {
    let result = build("FROM scratch\nCOPY <<EOF /etc/motd\nhello $USER\nEOF")
        .await
        .unwrap();
    let nodes = nodes_of(&result);
    let file = nodes.iter().find(|n| n["op"]["kind"] == "file").unwrap();
    let action = &file["op"]["actions"][0];
    assert_eq!(action["action"], "mkfile");
    assert_eq!(action["path"], "/etc/motd");
    // $USER is undefined here and expands empty.
    assert_eq!(action["data"], "hello \n");
}

#[tokio::test]
async fn test_add_remote_url_with_checksum() {
    let result = build(
        "FROM scratch\nADD --checksum=sha256:beef https://example.com/files/tool.tar.gz /opt/",
    )
    .await
    .unwrap();
    let nodes = nodes_of(&result);
    let http = nodes.iter().find(|n| n["op"]["source"] == "http").unwrap();
    assert_eq!(http["op"]["url"], "https://example.com/files/tool.tar.gz");
    assert_eq!(http["op"]["filename"], "tool.tar.gz");
    assert_eq!(http["op"]["checksum"], "sha256:beef");
}

#[tokio::test]
async fn test_add_checksum_requires_http_source() {
    let err = build("FROM scratch\nADD --checksum=sha256:beef local.txt /opt/")
        .await
        .unwrap_err();
    assert!(matches!(err, FrontendError::Validation { .. }));
}

#[tokio::test]
async fn test_workdir_relative_lints_and_joins() {
    let result = build("FROM alpine\nWORKDIR app\nWORKDIR src").await.unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.rule == LintRule::WorkdirRelativePath));
    let image = image_of(&result);
    assert_eq!(image["config"]["WorkingDir"], "/app/src");
}

#[tokio::test]
async fn test_multiple_cmd_warns_last_wins() {
    let result = build("FROM alpine\nCMD [\"a\"]\nCMD [\"b\"]").await.unwrap();
    assert!(result
        .warnings
        .iter()
        .any(|w| w.rule == LintRule::MultipleInstructionsDisallowed));
    let image = image_of(&result);
    assert_eq!(image["config"]["Cmd"][0], "b");
}

#[tokio::test]
async fn test_target_stage_selection() {
    let mut config = amd64_config();
    config.target_stage = Some("builder".to_string());
    let result = build_with(
        "FROM alpine AS builder\nRUN make\nFROM scratch\nCOPY --from=builder /out /out",
        config,
        FakeEngine::new(),
    )
    .await
    .unwrap();
    let nodes = nodes_of(&result);
    // Only the builder stage is dispatched.
    assert_eq!(named(&nodes, "RUN make").len(), 1);
    assert!(named(&nodes, "COPY --from=builder").is_empty());
}

#[tokio::test]
async fn test_onbuild_and_misc_config() {
    let result = build(
        "FROM alpine\nONBUILD RUN echo hi\nSTOPSIGNAL SIGTERM\nVOLUME /data\nEXPOSE 8080\nHEALTHCHECK --interval=5s CMD true",
    )
    .await
    .unwrap();
    let image = image_of(&result);
    assert_eq!(image["config"]["OnBuild"][0], "RUN echo hi");
    assert_eq!(image["config"]["StopSignal"], "SIGTERM");
    assert!(image["config"]["Volumes"].get("/data").is_some());
    assert!(image["config"]["ExposedPorts"].get("8080/tcp").is_some());
    assert_eq!(image["config"]["Healthcheck"]["Interval"], 5_000_000_000i64);
}

#[tokio::test]
async fn test_history_epoch_is_stable() {
    let mut config = amd64_config();
    config.source_date_epoch = Some(0);
    let result = build_with("FROM alpine\nENV A=1", config, FakeEngine::new())
        .await
        .unwrap();
    let image = image_of(&result);
    assert_eq!(
        image["history"][0]["created"],
        "1970-01-01T00:00:00Z"
    );
}

#[tokio::test]
async fn test_cancellation_is_terminal() {
    let config = amd64_config();
    config.cancel.cancel();
    let err = build_with("FROM alpine\nRUN true", config, FakeEngine::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FrontendError::Cancelled));
}

#[tokio::test]
async fn test_check_directive_escalates_warnings() {
    let dockerfile = "FROM alpine\nWORKDIR app";
    let mut config = amd64_config();
    config.check = basalt_frontend::lint::CheckConfig::parse("error=true").unwrap();
    let err = build_with(dockerfile, config, FakeEngine::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("WorkdirRelativePath"));
}

#[tokio::test]
async fn test_parallel_stages_converge() {
    // Two independent stages feed the final stage; both must complete
    // before the target dispatches.
    let result = build(
        "FROM alpine AS a\nRUN make a\nFROM alpine AS b\nRUN make b\nFROM scratch\nCOPY --from=a /a /a\nCOPY --from=b /b /b",
    )
    .await
    .unwrap();
    let nodes = nodes_of(&result);
    assert_eq!(named(&nodes, "RUN make a").len(), 1);
    assert_eq!(named(&nodes, "RUN make b").len(), 1);
    let image = image_of(&result);
    assert_eq!(history_lines(&image).len(), 2);
}
