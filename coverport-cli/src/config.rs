//! Command-line arguments and the explicit per-command configuration built from them.

use crate::tools::artifact_reference;
use crate::transport::{
    DEFAULT_COVERAGE_PORT, DEFAULT_LIVENESS_ATTEMPTS, DEFAULT_LIVENESS_INTERVAL, TransportConfig,
};
use chrono::Local;
use clap::{ArgAction, Args, ValueEnum};
use coverport_core::{
    CollectionParams, ConvertOptions, CoverageFormat, CoverportError, GitMetadata, Result,
    Snapshot, TargetDescriptor,
};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FILTER: &str = "coverage_server.go";

/// How targets are discovered. Exactly one method may be given.
#[derive(Args, Clone, Debug, Default)]
pub(crate) struct DiscoveryArgs {
    /// Direct HTTP URL of a coverage server (e.g. http://localhost:9095).
    #[arg(long)]
    pub url: Option<String>,
    /// Snapshot JSON listing components and their images.
    #[arg(long)]
    pub snapshot: Option<String>,
    /// File holding snapshot JSON.
    #[arg(long)]
    pub snapshot_file: Option<PathBuf>,
    /// Container images to look for (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub images: Vec<String>,
    /// Label selector matching the pods to collect from.
    #[arg(short = 'l', long)]
    pub label_selector: Option<String>,
    /// Pod names (repeatable or comma-separated, requires --namespace).
    #[arg(long, value_delimiter = ',')]
    pub pods: Vec<String>,
    /// Namespace to search (default: every non-system namespace).
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,
}

impl DiscoveryArgs {
    /// Validate the discovery flags and build the descriptor they describe.
    pub(crate) fn descriptor(&self) -> Result<TargetDescriptor> {
        let given: Vec<&str> = [
            ("--url", self.url.as_deref().is_some_and(has_text)),
            ("--snapshot", self.snapshot.as_deref().is_some_and(has_text)),
            ("--snapshot-file", self.snapshot_file.is_some()),
            ("--images", !self.images.is_empty()),
            ("--label-selector", self.label_selector.as_deref().is_some_and(has_text)),
            ("--pods", !self.pods.is_empty()),
        ]
        .into_iter()
        .filter_map(|(flag, set)| set.then_some(flag))
        .collect();

        match given.as_slice() {
            [] => {
                return Err(CoverportError::Configuration(
                    "no discovery method specified; use --url, --snapshot, --snapshot-file, --images, --label-selector or --pods".to_string(),
                ));
            }
            [_] => {}
            many => {
                return Err(CoverportError::Configuration(format!(
                    "multiple discovery methods specified ({}); use only one",
                    many.join(", ")
                )));
            }
        }

        if let Some(url) = &self.url {
            return Ok(TargetDescriptor::ByUrl {
                url: url.trim().to_string(),
            });
        }
        if let Some(json) = &self.snapshot {
            return Snapshot::parse(json)?.descriptor();
        }
        if let Some(path) = &self.snapshot_file {
            return Snapshot::from_file(path)?.descriptor();
        }
        if !self.images.is_empty() {
            return Ok(TargetDescriptor::ByImage {
                image_refs: trimmed(&self.images),
            });
        }
        let namespace = self.namespace_hint();
        if let Some(selector) = &self.label_selector {
            let namespace = namespace.ok_or_else(|| {
                CoverportError::Configuration(
                    "--namespace is required when using --label-selector".to_string(),
                )
            })?;
            return Ok(TargetDescriptor::ByLabelSelector {
                namespace: namespace.to_string(),
                selector: selector.trim().to_string(),
            });
        }
        let namespace = namespace.ok_or_else(|| {
            CoverportError::Configuration("--namespace is required when using --pods".to_string())
        })?;
        Ok(TargetDescriptor::ByExplicitName {
            namespace: namespace.to_string(),
            names: trimmed(&self.pods),
        })
    }

    pub(crate) fn namespace_hint(&self) -> Option<&str> {
        self.namespace.as_deref().map(str::trim).filter(|ns| !ns.is_empty())
    }

    /// `coverport collect` invocation reproducing this discovery.
    pub(crate) fn suggested_collect_command(&self) -> String {
        let mut command = "coverport collect".to_string();
        if let Some(namespace) = self.namespace_hint() {
            command.push_str(&format!(" --namespace={namespace}"));
        }
        if let Some(url) = &self.url {
            command.push_str(&format!(" --url={url}"));
        } else if let Some(json) = &self.snapshot {
            command.push_str(&format!(" --snapshot='{}'", truncate(json, 50)));
        } else if let Some(path) = &self.snapshot_file {
            command.push_str(&format!(" --snapshot-file={}", path.display()));
        } else if !self.images.is_empty() {
            command.push_str(&format!(" --images={}", self.images.join(",")));
        } else if let Some(selector) = &self.label_selector {
            command.push_str(&format!(" --label-selector={selector}"));
        } else if !self.pods.is_empty() {
            command.push_str(&format!(" --pods={}", self.pods.join(",")));
        }
        command
    }
}

/// Cluster access shared by `collect` and `discover`.
#[derive(Args, Clone, Debug)]
pub(crate) struct ClusterArgs {
    /// kubectl binary used for cluster access.
    #[arg(long, env = "KUBECTL", default_value = "kubectl")]
    pub kubectl: PathBuf,
    /// Timeout in seconds for each network or cluster operation.
    #[arg(long, default_value_t = 120)]
    pub timeout: u64,
}

/// Where the run summary goes.
#[derive(Args, Clone, Debug)]
pub(crate) struct OutputArgs {
    /// Output format for the run summary.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub summary_format: OutputFormat,
    /// Write the summary to a file instead of stdout.
    #[arg(long)]
    pub summary_output: Option<PathBuf>,
}

#[derive(ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
    Markdown,
}

/// Arguments of `coverport collect`.
#[derive(Args, Clone, Debug)]
pub(crate) struct CollectArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,
    #[command(flatten)]
    pub cluster: ClusterArgs,
    /// Coverage server port inside the workload.
    #[arg(long, default_value_t = DEFAULT_COVERAGE_PORT)]
    pub port: u16,
    /// Output directory for coverage data.
    #[arg(short, long, default_value = "./coverage-output")]
    pub output: PathBuf,
    /// Test name (default: coverage-<timestamp>).
    #[arg(long)]
    pub test_name: Option<String>,
    /// Coverage format served by the targets: go (counters-binary) or nyc (statement-json).
    #[arg(long, default_value = "go")]
    pub format: String,
    /// Reset counters before collecting.
    #[arg(long)]
    pub reset: bool,
    /// Source checkout used to remap recorded paths.
    #[arg(long)]
    pub source_dir: Option<PathBuf>,
    /// Remap recorded paths onto --source-dir.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub remap_paths: bool,
    /// Path substrings excluded from reports (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_FILTER)]
    pub filters: Vec<String>,
    /// Convert raw coverage into reports after collecting.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub auto_process: bool,
    /// Skip report generation.
    #[arg(long)]
    pub skip_generate: bool,
    /// Skip path filtering during report generation.
    #[arg(long)]
    pub skip_filter: bool,
    /// Number of targets collected at once.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub concurrency: usize,
    /// Push the collected coverage to an OCI registry.
    #[arg(long)]
    pub push: bool,
    /// OCI registry host.
    #[arg(long, default_value = "quay.io")]
    pub registry: String,
    /// OCI repository (e.g. org/coverage-artifacts).
    #[arg(long)]
    pub repository: Option<String>,
    /// Artifact tag (default: <test-name>-<timestamp>).
    #[arg(long)]
    pub tag: Option<String>,
    /// Artifact expiry (e.g. 30d, 1y).
    #[arg(long, default_value = "30d")]
    pub expires_after: String,
    /// Artifact title.
    #[arg(long)]
    pub artifact_title: Option<String>,
    /// File that receives the pushed artifact reference.
    #[arg(long, env = "COVERAGE_ARTIFACT_REF_FILE")]
    pub artifact_ref_file: Option<PathBuf>,
    #[command(flatten)]
    pub summary: OutputArgs,
}

/// Arguments of `coverport discover`.
#[derive(Args, Clone, Debug)]
pub(crate) struct DiscoverArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,
    #[command(flatten)]
    pub cluster: ClusterArgs,
}

/// Arguments of `coverport process`.
#[derive(Args, Clone, Debug)]
pub(crate) struct ProcessArgs {
    /// OCI artifact holding collected coverage.
    #[arg(long)]
    pub artifact_ref: Option<String>,
    /// Local directory holding collected coverage.
    #[arg(long)]
    pub coverage_dir: Option<PathBuf>,
    /// Image whose attestation names the source commit (single-component mode).
    #[arg(long)]
    pub image: Option<String>,
    /// Repository URL, instead of reading it from the image attestation.
    #[arg(long)]
    pub repo_url: Option<String>,
    /// Commit SHA, instead of reading it from the image attestation.
    #[arg(long)]
    pub commit_sha: Option<String>,
    /// Workspace directory (default: per-component directories next to the coverage).
    #[arg(long)]
    pub workspace: Option<PathBuf>,
    /// Keep workspaces after processing.
    #[arg(long)]
    pub keep_workspace: bool,
    /// Coverage format: auto, go or nyc.
    #[arg(long, default_value = "auto")]
    pub format: String,
    /// Path substrings excluded from reports (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',', default_value = DEFAULT_FILTER)]
    pub filters: Vec<String>,
    /// Upload reports to codecov.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub upload: bool,
    /// Codecov upload token.
    #[arg(long, env = "CODECOV_TOKEN", hide_env_values = true)]
    pub codecov_token: Option<String>,
    /// Codecov flags (repeatable or comma-separated).
    #[arg(long, value_delimiter = ',', default_value = "e2e-tests")]
    pub codecov_flags: Vec<String>,
    /// Codecov upload name.
    #[arg(long)]
    pub codecov_name: Option<String>,
    /// Reuse an existing checkout in the workspace.
    #[arg(long)]
    pub skip_clone: bool,
    /// Clone depth (0 for a full clone).
    #[arg(long, default_value_t = 1)]
    pub clone_depth: u32,
    /// Timeout in seconds for each external tool.
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
    #[command(flatten)]
    pub summary: OutputArgs,
}

/// OCI push settings for a collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PushConfig {
    pub reference: String,
    pub expires_after: String,
    pub title: Option<String>,
    pub ref_file: Option<PathBuf>,
}

/// Everything `collect` needs, validated.
#[derive(Debug, Clone)]
pub(crate) struct CollectConfig {
    pub descriptor: TargetDescriptor,
    pub namespace: Option<String>,
    pub test_name: String,
    pub output_dir: PathBuf,
    pub transport: TransportConfig,
    pub conversion: Option<ConvertOptions>,
    pub filters: Vec<String>,
    pub reset: bool,
    pub concurrency: usize,
    pub kubectl: PathBuf,
    pub push: Option<PushConfig>,
}

impl CollectConfig {
    pub(crate) fn from_args(args: &CollectArgs) -> Result<Self> {
        let descriptor = args.discovery.descriptor()?;
        let format: CoverageFormat = args.format.parse()?;
        let timeout = Duration::from_secs(args.cluster.timeout.max(1));
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let test_name = args
            .test_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("coverage-{stamp}"));
        let filters = non_empty(&args.filters);

        let push = if args.push {
            let repository = args
                .repository
                .as_deref()
                .filter(|repository| has_text(repository))
                .ok_or_else(|| {
                    CoverportError::Configuration(
                        "--repository is required when --push is enabled".to_string(),
                    )
                })?;
            let tag = args
                .tag
                .clone()
                .filter(|tag| has_text(tag))
                .unwrap_or_else(|| format!("{test_name}-{stamp}"));
            Some(PushConfig {
                reference: artifact_reference(&args.registry, repository, &tag),
                expires_after: args.expires_after.clone(),
                title: args.artifact_title.clone().filter(|title| has_text(title)),
                ref_file: args.artifact_ref_file.clone(),
            })
        } else {
            None
        };

        let conversion = (args.auto_process && !args.skip_generate).then(|| ConvertOptions {
            source_root: args.source_dir.clone(),
            filters: if args.skip_filter {
                Vec::new()
            } else {
                filters.clone()
            },
            remap: args.remap_paths,
            html: false,
        });

        Ok(Self {
            descriptor,
            namespace: args.discovery.namespace_hint().map(str::to_string),
            test_name,
            output_dir: args.output.clone(),
            transport: TransportConfig {
                remote_port: args.port,
                timeout,
                liveness_attempts: DEFAULT_LIVENESS_ATTEMPTS,
                liveness_interval: DEFAULT_LIVENESS_INTERVAL,
                format,
            },
            conversion,
            filters,
            reset: args.reset,
            concurrency: args.concurrency,
            kubectl: args.cluster.kubectl.clone(),
            push,
        })
    }

    /// Parameters recorded in the manifest.
    pub(crate) fn collection_params(&self) -> CollectionParams {
        let direct = matches!(self.descriptor, TargetDescriptor::ByUrl { .. });
        CollectionParams {
            coverage_port: (!direct).then_some(self.transport.remote_port),
            filters: self.filters.clone(),
            format: Some(self.transport.format),
            namespace: self.namespace.clone(),
        }
    }

    pub(crate) fn needs_cluster(&self) -> bool {
        !matches!(self.descriptor, TargetDescriptor::ByUrl { .. })
    }
}

/// Everything `discover` needs, validated.
#[derive(Debug, Clone)]
pub(crate) struct DiscoverConfig {
    pub descriptor: TargetDescriptor,
    pub namespace: Option<String>,
    pub kubectl: PathBuf,
    pub timeout: Duration,
    pub suggestion: String,
}

impl DiscoverConfig {
    pub(crate) fn from_args(args: &DiscoverArgs) -> Result<Self> {
        Ok(Self {
            descriptor: args.discovery.descriptor()?,
            namespace: args.discovery.namespace_hint().map(str::to_string),
            kubectl: args.cluster.kubectl.clone(),
            timeout: Duration::from_secs(args.cluster.timeout.max(1)),
            suggestion: args.discovery.suggested_collect_command(),
        })
    }
}

/// Where `process` reads collected coverage from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CoverageSource {
    Directory(PathBuf),
    Artifact(String),
}

/// Codecov settings; present only when an upload should happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadSettings {
    pub token: String,
    pub flags: Vec<String>,
    pub name: Option<String>,
}

/// Everything `process` needs, validated.
#[derive(Debug, Clone)]
pub(crate) struct ProcessConfig {
    pub source: CoverageSource,
    pub image: Option<String>,
    pub git: Option<GitMetadata>,
    pub workspace: Option<PathBuf>,
    pub keep_workspace: bool,
    pub format: Option<CoverageFormat>,
    pub filters: Vec<String>,
    pub upload: Option<UploadSettings>,
    pub skip_clone: bool,
    pub clone_depth: u32,
    pub timeout: Duration,
}

impl ProcessConfig {
    pub(crate) fn from_args(args: &ProcessArgs) -> Result<Self> {
        let artifact = args.artifact_ref.clone().filter(|value| has_text(value));
        let source = match (&args.coverage_dir, artifact) {
            (Some(_), Some(_)) => {
                return Err(CoverportError::Configuration(
                    "cannot specify both --artifact-ref and --coverage-dir".to_string(),
                ));
            }
            (Some(dir), None) => CoverageSource::Directory(dir.clone()),
            (None, Some(reference)) => CoverageSource::Artifact(reference.trim().to_string()),
            (None, None) => {
                return Err(CoverportError::Configuration(
                    "either --artifact-ref or --coverage-dir must be specified".to_string(),
                ));
            }
        };

        let format = match args.format.trim() {
            "" | "auto" => None,
            other => Some(other.parse()?),
        };

        let git = match (
            args.repo_url.as_deref().filter(|url| has_text(url)),
            args.commit_sha.as_deref().filter(|sha| has_text(sha)),
        ) {
            (Some(repo_url), Some(commit_sha)) => Some(GitMetadata {
                repo_url: repo_url.trim().to_string(),
                commit_sha: commit_sha.trim().to_string(),
                ..GitMetadata::default()
            }),
            (None, None) => None,
            _ => {
                return Err(CoverportError::Configuration(
                    "--repo-url and --commit-sha must be given together".to_string(),
                ));
            }
        };

        let upload = match args.codecov_token.as_deref().filter(|token| has_text(token)) {
            Some(token) if args.upload => Some(UploadSettings {
                token: token.trim().to_string(),
                flags: non_empty(&args.codecov_flags),
                name: args.codecov_name.clone().filter(|name| has_text(name)),
            }),
            _ => None,
        };

        Ok(Self {
            source,
            image: args.image.clone().filter(|image| has_text(image)),
            git,
            workspace: args.workspace.clone(),
            keep_workspace: args.keep_workspace,
            format,
            filters: non_empty(&args.filters),
            upload,
            skip_clone: args.skip_clone,
            clone_depth: args.clone_depth,
            timeout: Duration::from_secs(args.timeout.max(1)),
        })
    }
}

fn has_text(value: &str) -> bool {
    !value.trim().is_empty()
}

fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(values: &[String]) -> Vec<String> {
    trimmed(values)
}

fn truncate(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}
