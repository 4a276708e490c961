#![deny(missing_docs)]
//! coverport command-line interface.
//!
//! Collects coverage from instrumented workloads, converts it into reports,
//! and publishes the results.

mod cluster;
mod config;
mod orchestrator;
mod process;
mod resolver;
mod tools;
mod transport;

use chrono::Utc;
use clap::{Parser, Subcommand};
use cluster::ClusterApi;
use config::{
    CollectArgs, CollectConfig, DiscoverArgs, DiscoverConfig, OutputArgs, OutputFormat,
    ProcessArgs, PushConfig,
};
use coverport_core::{
    CoverageFormat, CoverportError, ResolvedTarget, TargetReport, render_json,
    render_run_markdown, render_run_text, require_tool,
};
use log::{info, warn};
use orchestrator::{CollectPlan, CollectionRun, collect_targets};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tools::{ExternalTools, PushRequest, write_artifact_ref};
use transport::{ClusterSessionOpener, TokioSleeper};

pub(crate) type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "coverport", version, about = "Coverage collection for running workloads")]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect coverage from running workloads or a coverage URL.
    Collect(CollectArgs),
    /// List the targets a collection would use, without collecting.
    Discover(DiscoverArgs),
    /// Convert collected coverage into reports and upload them.
    Process(ProcessArgs),
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Collect(args) => {
            let config = CollectConfig::from_args(&args)?;
            let cluster: Arc<dyn ClusterApi> = Arc::new(cluster::KubectlClient::new(
                config.kubectl.clone(),
                config.transport.timeout,
            ));
            let tools = tools::CommandTools::new(config.transport.timeout)?;
            run_collect(&config, cluster, &tools, &args.summary).await?;
        }
        Commands::Discover(args) => {
            let config = DiscoverConfig::from_args(&args)?;
            locate_program(&config.kubectl)?;
            let cluster = cluster::KubectlClient::new(config.kubectl.clone(), config.timeout);
            print!("{}", run_discover(&config, &cluster).await?);
        }
        Commands::Process(args) => {
            let config = config::ProcessConfig::from_args(&args)?;
            if args.upload && config.upload.is_none() {
                warn!("CODECOV_TOKEN not provided, skipping upload");
            }
            let tools = tools::CommandTools::new(config.timeout)?;
            let reports = process::run_process(&config, &tools).await?;
            emit_reports("coverport process", &reports, &args.summary).await?;
            ensure_any_done(&reports, "process")?;
        }
    }

    Ok(())
}

#[cfg(test)]
fn main() {}

#[cfg_attr(test, allow(dead_code))]
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Resolve, collect, summarize and optionally push one collection run.
#[cfg_attr(test, allow(dead_code))]
async fn run_collect(
    config: &CollectConfig,
    cluster: Arc<dyn ClusterApi>,
    tools: &dyn ExternalTools,
    summary: &OutputArgs,
) -> CliResult<CollectionRun> {
    preflight(config, require_tool)?;

    let targets = resolver::resolve(
        cluster.as_ref(),
        &config.descriptor,
        config.namespace.as_deref(),
    )
    .await?;
    if targets.is_empty() {
        return Err(format!("no targets found for {} discovery", config.descriptor.method()).into());
    }
    info!("collecting from {} target(s) as {}", targets.len(), config.test_name);

    let opener = Arc::new(ClusterSessionOpener::new(
        cluster,
        Arc::new(TokioSleeper),
        config.transport.clone(),
    ));
    let plan = CollectPlan {
        test_name: config.test_name.clone(),
        output_dir: config.output_dir.clone(),
        reset: config.reset,
        conversion: config.conversion.clone(),
        concurrency: config.concurrency,
        timeout: config.transport.timeout,
    };
    let run = collect_targets(targets, opener, plan, config.collection_params()).await?;

    emit_reports(
        &format!("coverport collect: {}", config.test_name),
        &run.reports,
        summary,
    )
    .await?;
    ensure_any_done(&run.reports, "collect coverage from")?;
    if let Some(path) = &run.manifest_path {
        info!(
            "{} of {} target(s) collected; manifest at {}",
            run.succeeded(),
            run.reports.len(),
            path.display()
        );
    }

    if let Some(push) = &config.push {
        let components: Vec<String> = run
            .manifest
            .components
            .iter()
            .map(|component| component.name.clone())
            .collect();
        match push_collection(push, &config.test_name, &config.output_dir, &components, tools).await
        {
            Ok(reference) => info!("coverage artifact pushed: {reference}"),
            Err(err) => warn!("failed to push coverage artifact: {err}"),
        }
    }
    Ok(run)
}

/// Fail before any network call when a required program is missing.
fn preflight<F>(config: &CollectConfig, lookup: F) -> coverport_core::Result<()>
where
    F: Fn(&str) -> coverport_core::Result<PathBuf>,
{
    if config.needs_cluster() {
        match config.kubectl.to_str() {
            Some(name) if !name.contains(std::path::MAIN_SEPARATOR) => {
                lookup(name)?;
            }
            _ => {
                locate_program(&config.kubectl)?;
            }
        }
    }
    if config.conversion.is_some() && config.transport.format == CoverageFormat::CountersBinary {
        lookup("go").map_err(|err| {
            CoverportError::Tool(format!("go toolchain required to convert coverage: {err}"))
        })?;
    }
    if config.push.is_some() {
        lookup("oras")?;
    }
    Ok(())
}

fn locate_program(program: &Path) -> coverport_core::Result<PathBuf> {
    if program.components().count() > 1 {
        return if program.is_file() {
            Ok(program.to_path_buf())
        } else {
            Err(CoverportError::Tool(format!("{} not found", program.display())))
        };
    }
    require_tool(&program.to_string_lossy())
}

/// Push the output directory as one OCI artifact and record its reference.
async fn push_collection(
    push: &PushConfig,
    test_name: &str,
    output_dir: &Path,
    components: &[String],
    tools: &dyn ExternalTools,
) -> coverport_core::Result<String> {
    let title = push
        .title
        .clone()
        .unwrap_or_else(|| format!("Coverage data for: {}", components.join(", ")));
    let annotations = BTreeMap::from([
        (
            "org.opencontainers.image.created".to_string(),
            Utc::now().to_rfc3339(),
        ),
        ("org.opencontainers.image.title".to_string(), title),
        (
            "org.opencontainers.image.description".to_string(),
            format!("Coverage data from test: {test_name}"),
        ),
    ]);
    let request = PushRequest {
        reference: push.reference.clone(),
        dir: output_dir.to_path_buf(),
        expires_after: Some(push.expires_after.clone()),
        annotations,
    };
    tools.push_artifact(&request).await?;
    if let Some(path) = &push.ref_file {
        write_artifact_ref(path, &push.reference).await?;
    }
    Ok(push.reference.clone())
}

async fn run_discover(config: &DiscoverConfig, cluster: &dyn ClusterApi) -> CliResult<String> {
    let targets = resolver::resolve(cluster, &config.descriptor, config.namespace.as_deref()).await?;
    Ok(render_discovery(&targets, &config.suggestion))
}

fn render_discovery(targets: &[ResolvedTarget], suggestion: &str) -> String {
    let mut output = String::new();
    if targets.is_empty() {
        let _ = writeln!(output, "No coverage targets found.");
        return output;
    }

    let mut groups: BTreeMap<&str, Vec<&ResolvedTarget>> = BTreeMap::new();
    for target in targets {
        groups
            .entry(target.component_name.as_str())
            .or_default()
            .push(target);
    }
    let _ = writeln!(
        output,
        "Found {} target(s) in {} component(s)",
        targets.len(),
        groups.len()
    );
    for (component, members) in &groups {
        let _ = writeln!(output);
        let _ = writeln!(output, "{component}:");
        for target in members {
            let _ = write!(output, "  - {}", target.display_name);
            if let Some(container) = target.container_name() {
                let _ = write!(output, " [{container}]");
            }
            if let Some(image) = &target.image {
                let _ = write!(output, " ({image})");
            }
            let _ = writeln!(output);
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "To collect coverage:");
    let _ = writeln!(output, "  {suggestion}");
    output
}

async fn emit_reports(title: &str, reports: &[TargetReport], output: &OutputArgs) -> CliResult<()> {
    let contents = match output.summary_format {
        OutputFormat::Text => render_run_text(title, reports),
        OutputFormat::Markdown => render_run_markdown(title, reports),
        OutputFormat::Json => render_json(reports)?,
    };
    emit_output(output, contents).await
}

async fn emit_output(output: &OutputArgs, contents: String) -> CliResult<()> {
    if let Some(path) = &output.summary_output {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
    } else {
        print!("{contents}");
    }
    Ok(())
}

fn ensure_any_done(reports: &[TargetReport], action: &str) -> CliResult<()> {
    if reports.iter().any(TargetReport::is_done) {
        return Ok(());
    }
    Err(format!("failed to {action} any of {} target(s)", reports.len()).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::{FakeCluster, workload};
    use crate::tools::CloneRequest;
    use coverport_core::{GitMetadata, UploadRequest};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;

    fn parse(argv: &[&str]) -> Cli {
        Cli::try_parse_from(argv).expect("parse")
    }

    fn temp_root(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "coverport-main-{name}-{}-{}",
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[derive(Default)]
    struct PushTools {
        pushed: Mutex<Vec<PushRequest>>,
    }

    impl ExternalTools for PushTools {
        fn push_artifact<'a>(
            &'a self,
            request: &'a PushRequest,
        ) -> Pin<Box<dyn Future<Output = coverport_core::Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.pushed.lock().expect("pushed").push(request.clone());
                Ok(())
            })
        }

        fn pull_artifact<'a>(
            &'a self,
            _reference: &'a str,
            _dest: &'a Path,
        ) -> Pin<Box<dyn Future<Output = coverport_core::Result<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn git_metadata<'a>(
            &'a self,
            _image: &'a str,
        ) -> Pin<Box<dyn Future<Output = coverport_core::Result<GitMetadata>> + Send + 'a>>
        {
            Box::pin(async { Ok(GitMetadata::default()) })
        }

        fn clone_repo<'a>(
            &'a self,
            _request: &'a CloneRequest,
        ) -> Pin<Box<dyn Future<Output = coverport_core::Result<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }

        fn upload<'a>(
            &'a self,
            _request: &'a UploadRequest,
            _repo_root: &'a Path,
        ) -> Pin<Box<dyn Future<Output = coverport_core::Result<()>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn parses_collect_with_global_verbose() {
        let cli = parse(&[
            "coverport",
            "collect",
            "--images",
            "quay.io/org/a,quay.io/org/b",
            "-n",
            "team",
            "--verbose",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Collect(args) => {
                assert_eq!(args.discovery.images.len(), 2);
                assert_eq!(args.port, 9095);
                assert_eq!(args.summary.summary_format, OutputFormat::Text);
            }
            _ => panic!("expected collect"),
        }
    }

    #[test]
    fn parses_process_and_discover() {
        let cli = parse(&["coverport", "process", "--coverage-dir", "out", "--upload=false"]);
        match cli.command {
            Commands::Process(args) => {
                assert!(!args.upload);
                assert_eq!(args.clone_depth, 1);
            }
            _ => panic!("expected process"),
        }
        let cli = parse(&["coverport", "discover", "-n", "team", "-l", "app=api"]);
        assert!(matches!(cli.command, Commands::Discover(_)));
    }

    #[test]
    fn preflight_checks_tools_before_collecting() {
        let cli = parse(&["coverport", "collect", "--images", "quay.io/org/a"]);
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        let config = CollectConfig::from_args(&args).expect("config");

        let seen = Mutex::new(Vec::new());
        preflight(&config, |name| {
            seen.lock().expect("seen").push(name.to_string());
            Ok(PathBuf::from(name))
        })
        .expect("preflight");
        assert_eq!(*seen.lock().expect("seen"), vec!["kubectl", "go"]);

        let error = preflight(&config, |name| {
            if name == "go" {
                Err(CoverportError::Tool("go missing".to_string()))
            } else {
                Ok(PathBuf::from(name))
            }
        })
        .expect_err("go missing");
        assert!(error.to_string().contains("go toolchain required"));
    }

    #[test]
    fn direct_url_without_conversion_needs_no_tools() {
        let cli = parse(&[
            "coverport",
            "collect",
            "--url",
            "http://localhost:9095",
            "--skip-generate",
        ]);
        let Commands::Collect(args) = cli.command else {
            panic!("expected collect");
        };
        let config = CollectConfig::from_args(&args).expect("config");
        preflight(&config, |name| {
            Err(CoverportError::Tool(format!("{name} should not be looked up")))
        })
        .expect("no lookups");
    }

    #[tokio::test]
    async fn push_records_annotations_and_reference_file() {
        let root = temp_root("push");
        let ref_file = root.join("artifact-ref");
        let push = PushConfig {
            reference: "quay.io/org/cov:smoke-1".to_string(),
            expires_after: "30d".to_string(),
            title: None,
            ref_file: Some(ref_file.clone()),
        };
        let tools = PushTools::default();

        let reference = push_collection(
            &push,
            "smoke",
            &root,
            &["frontend".to_string(), "backend".to_string()],
            &tools,
        )
        .await
        .expect("push");

        assert_eq!(reference, "quay.io/org/cov:smoke-1");
        let pushed = tools.pushed.lock().expect("pushed");
        let request = &pushed[0];
        assert_eq!(request.dir, root);
        assert_eq!(request.expires_after.as_deref(), Some("30d"));
        assert_eq!(
            request.annotations["org.opencontainers.image.title"],
            "Coverage data for: frontend, backend"
        );
        assert_eq!(
            request.annotations["org.opencontainers.image.description"],
            "Coverage data from test: smoke"
        );
        assert!(request
            .annotations
            .contains_key("org.opencontainers.image.created"));
        let written = std::fs::read_to_string(&ref_file).expect("ref file");
        assert_eq!(written.trim(), "quay.io/org/cov:smoke-1");
        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[tokio::test]
    async fn discover_groups_targets_by_component() {
        let cluster = FakeCluster::new(vec![
            workload("team", "api-0", "Running", &[("app", "api")], &[("main", "quay.io/org/api:v1")]),
            workload("team", "api-1", "Running", &[("app", "api")], &[("main", "quay.io/org/api:v1")]),
        ]);
        let cli = parse(&["coverport", "discover", "-n", "team", "-l", "app=api"]);
        let Commands::Discover(args) = cli.command else {
            panic!("expected discover");
        };
        let config = DiscoverConfig::from_args(&args).expect("config");

        let output = run_discover(&config, &cluster).await.expect("discover");

        assert!(output.contains("Found 2 target(s) in 1 component(s)"));
        assert!(output.contains("team/api-0"));
        assert!(output.contains("coverport collect --namespace=team --label-selector=app=api"));
    }

    #[test]
    fn empty_discovery_says_so() {
        assert_eq!(render_discovery(&[], "coverport collect"), "No coverage targets found.\n");
    }

    #[tokio::test]
    async fn emits_reports_to_file_in_each_format() {
        let root = temp_root("emit");
        let mut done = TargetReport::new("team/api-0", "api");
        done.output_dir = Some(root.join("api"));
        let reports = vec![done, TargetReport::failed("team/ui-0", "ui", "collecting: boom")];

        let json_path = root.join("out/summary.json");
        let output = OutputArgs {
            summary_format: OutputFormat::Json,
            summary_output: Some(json_path.clone()),
        };
        emit_reports("run", &reports, &output).await.expect("emit json");
        let contents = std::fs::read_to_string(&json_path).expect("read json");
        assert!(contents.contains("\"component\": \"ui\""));

        let md_path = root.join("summary.md");
        let output = OutputArgs {
            summary_format: OutputFormat::Markdown,
            summary_output: Some(md_path.clone()),
        };
        emit_reports("run", &reports, &output).await.expect("emit markdown");
        assert!(std::fs::read_to_string(&md_path).expect("read md").contains("api"));

        std::fs::remove_dir_all(&root).expect("cleanup");
    }

    #[test]
    fn zero_successes_is_an_error() {
        let failed = vec![TargetReport::failed("a", "a", "boom")];
        assert!(ensure_any_done(&failed, "collect coverage from").is_err());
        let mixed = vec![TargetReport::new("b", "b"), TargetReport::failed("a", "a", "boom")];
        assert!(ensure_any_done(&mixed, "process").is_ok());
    }
}
