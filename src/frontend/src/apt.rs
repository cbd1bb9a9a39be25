//! The `ADD --apt` package extension.
//!
//! Installs Debian/Ubuntu packages through the HTTP cache in three graph
//! phases: refresh the package index under a shared cache mount, resolve
//! download URIs by executing `apt-get install --print-uris` inside the
//! temporary image and reading the listing back out of the mid-build graph,
//! then fetch each archive as a cacheable HTTP node and install with
//! `--no-download` in the original image.

use once_cell::sync::Lazy;
use regex::Regex;

use basalt_core::error::{FrontendError, Result};
use basalt_core::location::SourceRange;

use crate::dispatch::DispatchState;
use crate::graph::{
    CacheSharing, Exec, FileAction, FileSystem, GraphDefinition, MountKind, MountSpec, OpRef,
};
use crate::instruction::PackageInstruction;

/// Steps the extension contributes to a stage's progress numbering.
pub const PACKAGE_STEP_COUNT: usize = 3;

/// Build-private directory reserved inside the temporary image.
const STATE_DIR: &str = "/btidor.syntax";

/// Shared cache-mount id for the apt index; shared across all builds on
/// the host, so its contents must never be relied on for correctness.
const CACHE_ID: &str = "btidor.syntax";

// Override the important apt options, since we don't know what
// configuration the container ships with.
static APT_OPTIONS: Lazy<String> = Lazy::new(|| {
    [
        "--option Acquire::ForceHash=sha256",
        "--option Acquire::GzipIndexes=false",
        "--option Dir::Cache=/btidor.syntax/cache",
        "--option Dir::Cache::archives=archives/",
        "--option Dir::State=/btidor.syntax/state",
        "--option Dir::State::lists=lists/",
        "--yes",
        "--quiet",
    ]
    .join(" ")
});

/// One line of `apt-get install --print-uris` output:
/// `'URI' FILENAME SIZE [SHA256:HEX]`.
static URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^'([^']*)'\s+([^ ]+)\s+([0-9]+)(\s+SHA256:([0-9a-fA-F]+))?")
        .expect("apt uri regex")
});

/// A parsed package download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDownload {
    pub uri: String,
    pub filename: String,
    pub size: u64,
    pub sha256: Option<String>,
}

/// Dispatch an `ADD --apt` instruction.
pub(crate) async fn dispatch(state: &mut DispatchState<'_>, i: &PackageInstruction) -> Result<()> {
    let packages = i.packages.join(" ");
    let location = i.source.location;

    // Precompute the three step names; `prefix` advances the step counter
    // each time it is called.
    let update_stage = state.prefix(&format!("ADD (apt update) {}", packages));
    let download_stage = state.prefix(&format!("ADD (apt download) {}", packages));
    let install_stage = state.prefix(&format!("ADD (apt install) {}", packages));

    // Run `apt-get update` with the cache volume mounted.
    //
    // The cache volume is not guaranteed to persist between stages and
    // these files are required by `apt-get install`, so copy them into the
    // temporary image.
    let stage_root = state.root.clone();
    let tmp = run_phase(
        state,
        stage_root.clone(),
        &update_stage,
        false,
        &[
            "mkdir -p /btidor.syntax/state/lists/partial".to_string(),
            format!("apt-get update {}", &*APT_OPTIONS),
            "cp -r /btidor.syntax/state /btidor.syntax/backup".to_string(),
        ],
        vec![MountSpec {
            target: "/btidor.syntax/state".to_string(),
            readonly: false,
            kind: MountKind::Cache {
                id: CACHE_ID.to_string(),
                sharing: CacheSharing::Shared,
            },
        }],
        location,
    );

    // List the download URIs in the temporary image, then solve the graph
    // built so far and read the listing back from the produced filesystem.
    let tmp = run_phase(
        state,
        tmp,
        &download_stage,
        false,
        &[
            "mv /btidor.syntax/backup /btidor.syntax/state".to_string(),
            format!(
                "apt-get install -qq --print-uris {} {} > /btidor.syntax/install",
                &*APT_OPTIONS, packages
            ),
        ],
        Vec::new(),
        location,
    );
    let data = read_file(state, &tmp, "/btidor.syntax/install").await?;
    let uris = parse_uris(&data).map_err(|e| e.at(location))?;

    // Fetch each archive through the HTTP cache and accumulate the results
    // in the temporary image.
    let tmp = download_files(
        tmp,
        &uris,
        "/btidor.syntax/cache/archives/",
        state.ignore_cache(),
        location,
    );

    // Run `apt-get install --no-download` in the original image. The
    // temporary image is bind-mounted to provide the sources and cache;
    // this is the only phase that contributes a layer.
    state.root = run_phase(
        state,
        stage_root,
        &install_stage,
        true,
        &[format!(
            "apt-get install --no-download {} {}",
            &*APT_OPTIONS, packages
        )],
        vec![MountSpec {
            target: STATE_DIR.to_string(),
            readonly: false,
            kind: MountKind::Bind {
                source: tmp,
                subpath: Some(STATE_DIR.to_string()),
            },
        }],
        location,
    );
    Ok(())
}

/// Emit one phase: a single shell pipeline over `root`, with the shared
/// exec options and a history commit.
fn run_phase(
    state: &mut DispatchState<'_>,
    root: OpRef,
    stage_name: &str,
    with_layer: bool,
    script: &[String],
    extra_mounts: Vec<MountSpec>,
    location: SourceRange,
) -> OpRef {
    let mut args = state.shell.clone();
    args.push(script.join(" && "));

    let mut exec = Exec::run(root, args)
        .env("DEBIAN_FRONTEND", "noninteractive")
        .platform(Some(state.platform.clone()));
    for mount in extra_mounts {
        exec = exec.mount(mount);
    }
    let next = exec
        .custom_name(stage_name)
        .location(Some(location))
        .ignore_cache(state.ignore_cache())
        .root();

    state
        .image
        .commit_history(stage_name, !with_layer, state.epoch());
    next
}

/// Solve the graph built so far and read one file from the result. This is
/// the mid-compile interaction: the compiler temporarily becomes a client
/// of the executor.
async fn read_file(state: &DispatchState<'_>, root: &OpRef, path: &str) -> Result<Vec<u8>> {
    state.ctx.check_cancelled()?;
    let definition = GraphDefinition::from_root(root);
    let reference = state
        .ctx
        .engine
        .solve(&definition)
        .await
        .map_err(|e| match e {
            FrontendError::Cancelled => FrontendError::Cancelled,
            other => FrontendError::ExecutionRequired(format!("mid-compile solve failed: {}", other)),
        })?;
    reference.read_file(path).await.map_err(|e| match e {
        FrontendError::Cancelled => FrontendError::Cancelled,
        other => FrontendError::package(format!("could not read {}: {}", path, other)),
    })
}

/// Parse the URI listing, preserving order. A line that fails to match is
/// fatal for the build, as is an empty listing.
pub fn parse_uris(data: &[u8]) -> Result<Vec<PackageDownload>> {
    let text = String::from_utf8_lossy(data);
    let mut results = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let caps = URI_RE.captures(line).ok_or_else(|| {
            FrontendError::package(format!("could not parse apt uri line: {:?}", line))
        })?;
        let size = caps[3]
            .parse::<u64>()
            .map_err(|e| FrontendError::package(format!("bad size in apt uri line: {}", e)))?;
        results.push(PackageDownload {
            uri: caps[1].to_string(),
            filename: caps[2].to_string(),
            size,
            sha256: caps.get(5).map(|m| m.as_str().to_string()),
        });
    }
    if results.is_empty() {
        return Err(FrontendError::package("apt resolved no download URIs"));
    }
    Ok(results)
}

/// Compose a single file node copying every fetched archive into the
/// accumulator, in listing order.
fn download_files(
    base: OpRef,
    files: &[PackageDownload],
    destination: &str,
    ignore_cache: bool,
    location: SourceRange,
) -> OpRef {
    let mut fs = FileSystem::sequence(Some(base));
    for file in files {
        let checksum = file.sha256.as_ref().map(|h| format!("sha256:{}", h));
        let http = OpRef::http(&file.uri, &file.filename, checksum);
        fs = fs.append(FileAction::Copy {
            source: http,
            src: file.filename.clone(),
            dest: destination.to_string(),
            mode: Some(0o644),
            owner: None,
            create_dest_path: true,
            follow_symlinks: false,
            allow_wildcard: false,
            unpack: false,
            keep_git_dir: false,
            exclude_patterns: Vec::new(),
        });
    }
    fs.custom_name("COPY (apt packages)")
        .location(Some(location))
        .ignore_cache(ignore_cache)
        .output()
}
