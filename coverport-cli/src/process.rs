//! Turns collected coverage into reports and optionally uploads them.

use crate::CliResult;
use crate::config::{CoverageSource, ProcessConfig, UploadSettings};
use crate::orchestrator::convert_in_background;
use crate::tools::{CloneRequest, ExternalTools};
use chrono::Utc;
use coverport_core::image::image_basename;
use coverport_core::{
    CollectionManifest, ConvertOptions, CoverportError, GitMetadata, Result, TargetReport,
    UploadRequest, detect_format, git_service, repo_slug,
};
use log::{info, warn};
use std::path::{Path, PathBuf};

const RAW_DIR: &str = "coverage-raw";
const REPO_DIR: &str = "repo";

/// One component to convert.
struct ComponentJob {
    name: String,
    image: Option<String>,
    coverage_dir: PathBuf,
    workspace: PathBuf,
}

/// Process every component reachable from the configured source.
pub(crate) async fn run_process(
    config: &ProcessConfig,
    tools: &dyn ExternalTools,
) -> CliResult<Vec<TargetReport>> {
    match &config.source {
        CoverageSource::Directory(dir) => {
            if CollectionManifest::exists(dir) {
                return Ok(process_manifest(dir, config, tools).await?);
            }
            let workspace = root_workspace(config)?;
            check_overlap(&workspace, dir, config.keep_workspace)?;
            let reports = process_single(dir.clone(), workspace.clone(), config, tools).await;
            cleanup(&workspace, config.keep_workspace).await;
            Ok(reports?)
        }
        CoverageSource::Artifact(reference) => {
            let workspace = root_workspace(config)?;
            let raw = workspace.join(RAW_DIR);
            info!("pulling coverage artifact {reference}");
            let reports = match tools.pull_artifact(reference, &raw).await {
                Ok(()) if CollectionManifest::exists(&raw) => {
                    process_manifest(&raw, config, tools).await
                }
                Ok(()) => process_single(raw, workspace.join("component"), config, tools).await,
                Err(err) => Err(err),
            };
            cleanup(&workspace, config.keep_workspace).await;
            Ok(reports?)
        }
    }
}

async fn process_manifest(
    coverage_dir: &Path,
    config: &ProcessConfig,
    tools: &dyn ExternalTools,
) -> Result<Vec<TargetReport>> {
    let manifest = CollectionManifest::load(coverage_dir)?;
    if manifest.components.is_empty() {
        return Err(CoverportError::Configuration(format!(
            "no components found in manifest under {}",
            coverage_dir.display()
        )));
    }
    info!(
        "processing {} component(s) of collection {}",
        manifest.components.len(),
        manifest.test_name
    );

    let total = manifest.components.len();
    let mut reports = Vec::with_capacity(total);
    for (index, component) in manifest.components.iter().enumerate() {
        info!("[{}/{}] processing {}", index + 1, total, component.name);
        let workspace = match &config.workspace {
            Some(root) => root.join(&component.name),
            None => coverage_dir.join(format!("{}-workspace", component.name)),
        };
        let job = ComponentJob {
            name: component.name.clone(),
            image: Some(component.image.clone()).filter(|image| !image.is_empty()),
            coverage_dir: coverage_dir.join(&component.coverage_dir),
            workspace,
        };
        reports.push(run_component(&job, config, tools).await);
        cleanup(&job.workspace, config.keep_workspace).await;
    }
    Ok(reports)
}

async fn process_single(
    coverage_dir: PathBuf,
    workspace: PathBuf,
    config: &ProcessConfig,
    tools: &dyn ExternalTools,
) -> Result<Vec<TargetReport>> {
    if config.image.is_none() && config.git.is_none() {
        return Err(CoverportError::Configuration(
            "without a collection manifest, --image or both --repo-url and --commit-sha are required"
                .to_string(),
        ));
    }
    let name = match (&config.image, &config.git) {
        (Some(image), _) => image_basename(image),
        (None, Some(git)) => repo_slug(&git.repo_url)
            .and_then(|slug| slug.rsplit('/').next().map(str::to_string))
            .unwrap_or_else(|| "coverage".to_string()),
        (None, None) => "coverage".to_string(),
    };
    let job = ComponentJob {
        name,
        image: config.image.clone(),
        coverage_dir,
        workspace,
    };
    Ok(vec![run_component(&job, config, tools).await])
}

async fn run_component(
    job: &ComponentJob,
    config: &ProcessConfig,
    tools: &dyn ExternalTools,
) -> TargetReport {
    let target = job.coverage_dir.display().to_string();
    match process_component(job, config, tools).await {
        Ok(report) => report,
        Err(err) => {
            warn!("failed to process {}: {err}", job.name);
            TargetReport::failed(target, &job.name, err.to_string())
        }
    }
}

async fn process_component(
    job: &ComponentJob,
    config: &ProcessConfig,
    tools: &dyn ExternalTools,
) -> Result<TargetReport> {
    tokio::fs::create_dir_all(&job.workspace).await?;

    let git = match (&config.git, &job.image) {
        (Some(git), _) => git.clone(),
        (None, Some(image)) => tools.git_metadata(image).await?,
        (None, None) => {
            return Err(CoverportError::Configuration(format!(
                "no image or git coordinates recorded for {}",
                job.name
            )));
        }
    };
    info!("{}: {} @ {}", job.name, git.repo_url, git.commit_sha);

    let repo_dir = job.workspace.join(REPO_DIR);
    if config.skip_clone {
        if !repo_dir.is_dir() {
            return Err(CoverportError::Configuration(format!(
                "--skip-clone given but {} does not exist",
                repo_dir.display()
            )));
        }
    } else {
        let request = CloneRequest {
            repo_url: git.repo_url.clone(),
            commit_sha: git.commit_sha.clone(),
            branch: git.branch.clone(),
            target_dir: repo_dir.clone(),
            depth: config.clone_depth,
        };
        tools.clone_repo(&request).await?;
    }

    let format = match config.format {
        Some(format) => format,
        None => detect_format(&job.coverage_dir)?,
    };
    let options = ConvertOptions {
        source_root: Some(repo_dir.clone()),
        filters: config.filters.clone(),
        remap: true,
        html: true,
    };
    let outcome = convert_in_background(job.coverage_dir.clone(), format, options).await?;
    if !outcome.unresolved.is_empty() {
        warn!(
            "{}: dropped {} path(s) that do not exist in the checkout",
            job.name,
            outcome.unresolved.len()
        );
    }

    let mut report = TargetReport::new(job.coverage_dir.display().to_string(), &job.name);
    report.output_dir = Some(job.coverage_dir.clone());
    report.coverage = Some(outcome.summary.clone());
    report.total_percent = outcome.total_percent;
    report.warnings = outcome.warnings.clone();

    if let Some(settings) = &config.upload {
        if let Err(err) = upload(&outcome.upload_file, &repo_dir, &git, settings, tools).await {
            warn!("{}: codecov upload failed: {err}", job.name);
            report.warnings.push(format!("codecov upload failed: {err}"));
        }
    }
    Ok(report)
}

/// Copy the report into the checkout so the uploader only sees repository paths.
async fn upload(
    upload_file: &Path,
    repo_dir: &Path,
    git: &GitMetadata,
    settings: &UploadSettings,
    tools: &dyn ExternalTools,
) -> Result<()> {
    let file_name = upload_file.file_name().ok_or_else(|| {
        CoverportError::Payload(format!("invalid upload file {}", upload_file.display()))
    })?;
    let staged = repo_dir.join(file_name);
    tokio::fs::copy(upload_file, &staged).await?;

    let request = UploadRequest {
        token: settings.token.clone(),
        coverage_file: staged,
        commit_sha: git.commit_sha.clone(),
        branch: git.branch.clone(),
        slug: repo_slug(&git.repo_url),
        git_service: Some(git_service(&git.repo_url).to_string()),
        flags: settings.flags.clone(),
        name: settings.name.clone(),
    };
    tools.upload(&request, repo_dir).await
}

fn root_workspace(config: &ProcessConfig) -> Result<PathBuf> {
    let workspace = match &config.workspace {
        Some(dir) => dir.clone(),
        None => std::env::temp_dir().join(format!(
            "coverport-process-{}-{}",
            std::process::id(),
            Utc::now().format("%Y%m%d%H%M%S%f")
        )),
    };
    std::fs::create_dir_all(&workspace)?;
    Ok(workspace)
}

/// Refuse to delete a workspace that contains, or sits inside, the coverage data.
fn check_overlap(workspace: &Path, coverage_dir: &Path, keep: bool) -> Result<()> {
    if keep {
        return Ok(());
    }
    let workspace = absolute(workspace)?;
    let coverage = absolute(coverage_dir)?;
    if coverage.starts_with(&workspace) {
        return Err(CoverportError::Configuration(format!(
            "workspace {} contains coverage data {}; use --keep-workspace or another --workspace",
            workspace.display(),
            coverage.display()
        )));
    }
    if workspace.starts_with(&coverage) {
        return Err(CoverportError::Configuration(format!(
            "coverage directory {} contains workspace {}; use --keep-workspace or another --workspace",
            coverage.display(),
            workspace.display()
        )));
    }
    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    Ok(std::path::absolute(path)?)
}

async fn cleanup(workspace: &Path, keep: bool) {
    if keep {
        info!("workspace kept at {}", workspace.display());
        return;
    }
    if let Err(err) = tokio::fs::remove_dir_all(workspace).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!("failed to clean up workspace {}: {err}", workspace.display());
        }
    }
}
