//! Drives every resolved target through connect, collect, persist and convert.

use crate::CliResult;
use crate::transport::{CoverageSession, SessionOpener};
use chrono::Utc;
use coverport_core::manifest::component_coverage_dir;
use coverport_core::{
    CollectionManifest, CollectionParams, ComponentRecord, ConversionOutcome, ConvertOptions,
    Converter, CoverageFormat, CoveragePayload, CoverportError, GoToolchain, ResolvedTarget,
    Result, StdFileSystem, TargetReport, write_payload,
};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// What a collection run does with each target.
#[derive(Debug, Clone)]
pub(crate) struct CollectPlan {
    pub test_name: String,
    pub output_dir: PathBuf,
    pub reset: bool,
    /// `None` leaves the raw payload unconverted.
    pub conversion: Option<ConvertOptions>,
    pub concurrency: usize,
    pub timeout: Duration,
}

/// Manifest and per-target reports of one run.
#[derive(Debug)]
pub(crate) struct CollectionRun {
    pub manifest: CollectionManifest,
    pub reports: Vec<TargetReport>,
    pub manifest_path: Option<PathBuf>,
}

impl CollectionRun {
    pub(crate) fn succeeded(&self) -> usize {
        self.reports.iter().filter(|report| report.is_done()).count()
    }
}

/// Lifecycle of one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetState {
    Resolved,
    Connecting,
    Resetting,
    Collecting,
    Persisting,
    Converting,
    Done,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Resolved => "resolved",
            Self::Connecting => "connecting",
            Self::Resetting => "resetting",
            Self::Collecting => "collecting",
            Self::Persisting => "persisting",
            Self::Converting => "converting",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

struct TargetOutcome {
    report: TargetReport,
    record: Option<ComponentRecord>,
}

/// Collect from every target, tolerating per-target failures.
///
/// The manifest is written once, after all targets finish, and only when at
/// least one target succeeded.
pub(crate) async fn collect_targets(
    targets: Vec<ResolvedTarget>,
    opener: Arc<dyn SessionOpener>,
    plan: CollectPlan,
    params: CollectionParams,
) -> CliResult<CollectionRun> {
    let targets = assign_unique_components(targets);
    let plan = Arc::new(plan);
    let concurrency = if plan.concurrency == 0 { 1 } else { plan.concurrency };
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();
    let mut identities = Vec::with_capacity(targets.len());

    for (index, target) in targets.into_iter().enumerate() {
        identities.push((target.display_name.clone(), target.component_name.clone()));
        let permit = semaphore.clone().acquire_owned().await?;
        let opener = opener.clone();
        let plan = plan.clone();
        tasks.spawn(async move {
            let _permit = permit;
            (index, collect_target(target, opener.as_ref(), &plan).await)
        });
    }

    let mut outcomes: Vec<Option<TargetOutcome>> = identities.iter().map(|_| None).collect();
    let mut orphaned = Vec::new();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) => orphaned.push(err.to_string()),
        }
    }

    let mut manifest = CollectionManifest::new(plan.test_name.clone(), params);
    let mut reports = Vec::with_capacity(outcomes.len());
    let mut orphaned = orphaned.into_iter();
    for (slot, (display, component)) in outcomes.into_iter().zip(identities) {
        match slot {
            Some(outcome) => {
                if let Some(record) = outcome.record {
                    manifest.add_component(record);
                }
                reports.push(outcome.report);
            }
            None => {
                let error = orphaned
                    .next()
                    .unwrap_or_else(|| "collection task did not finish".to_string());
                reports.push(TargetReport::failed(display, component, error));
            }
        }
    }

    let mut run = CollectionRun {
        manifest,
        reports,
        manifest_path: None,
    };
    if run.succeeded() > 0 {
        match run.manifest.save(&plan.output_dir) {
            Ok(path) => run.manifest_path = Some(path),
            Err(err) => warn!(
                "failed to save collection manifest in {}: {err}",
                plan.output_dir.display()
            ),
        }
    }
    Ok(run)
}

async fn collect_target(
    target: ResolvedTarget,
    opener: &dyn SessionOpener,
    plan: &CollectPlan,
) -> TargetOutcome {
    let mut state = TargetState::Resolved;
    info!(
        "{}: collecting component {}",
        target.display_name, target.component_name
    );
    match drive_target(&target, opener, plan, &mut state).await {
        Ok((record, report)) => {
            debug!("{}: {state}", target.display_name);
            TargetOutcome {
                report,
                record: Some(record),
            }
        }
        Err(err) if err.is_soft() => {
            warn!("{}: skipped while {state}: {err}", target.display_name);
            TargetOutcome {
                report: TargetReport::skipped(
                    &target.display_name,
                    &target.component_name,
                    err.to_string(),
                ),
                record: None,
            }
        }
        Err(err) => {
            warn!("{}: failed while {state}: {err}", target.display_name);
            TargetOutcome {
                report: TargetReport::failed(
                    &target.display_name,
                    &target.component_name,
                    format!("{state}: {err}"),
                ),
                record: None,
            }
        }
    }
}

async fn drive_target(
    target: &ResolvedTarget,
    opener: &dyn SessionOpener,
    plan: &CollectPlan,
    state: &mut TargetState,
) -> Result<(ComponentRecord, TargetReport)> {
    *state = TargetState::Connecting;
    let session = tokio::time::timeout(plan.timeout, opener.open(target))
        .await
        .map_err(|_| {
            CoverportError::TunnelSetup(format!(
                "connecting timed out after {}s",
                plan.timeout.as_secs()
            ))
        })??;

    let label = format!("{}-{}", plan.test_name, target.component_name);
    let exchanged = exchange(session.as_ref(), &label, plan.reset, state).await;
    session.close().await;
    let payload = exchanged?;

    *state = TargetState::Persisting;
    let relative_dir = component_coverage_dir(&plan.test_name, &target.component_name);
    let dir = plan.output_dir.join(&relative_dir);
    let written = write_payload(&StdFileSystem::new(), &dir, &payload)?;
    debug!(
        "{}: wrote {} file(s) to {}",
        target.display_name,
        written.len(),
        dir.display()
    );

    let mut report = TargetReport::new(&target.display_name, &target.component_name);
    report.output_dir = Some(dir.clone());
    if let Some(options) = &plan.conversion {
        *state = TargetState::Converting;
        let outcome = convert_in_background(dir, payload.format, options.clone()).await?;
        report.coverage = Some(outcome.summary);
        report.total_percent = outcome.total_percent;
        report.warnings = outcome.warnings;
    }

    *state = TargetState::Done;
    let record = ComponentRecord::from_target(target, &relative_dir, payload.captured_at);
    Ok((record, report))
}

async fn exchange(
    session: &dyn CoverageSession,
    label: &str,
    reset: bool,
    state: &mut TargetState,
) -> Result<CoveragePayload> {
    if reset {
        *state = TargetState::Resetting;
        session.reset().await?;
    }
    *state = TargetState::Collecting;
    session.collect(label).await
}

/// Run a conversion on the blocking pool; counters need the go toolchain.
pub(crate) async fn convert_in_background(
    dir: PathBuf,
    format: CoverageFormat,
    options: ConvertOptions,
) -> Result<ConversionOutcome> {
    tokio::task::spawn_blocking(move || convert_dir(&dir, format, &options))
        .await
        .map_err(|err| CoverportError::Tool(format!("conversion task failed: {err}")))?
}

fn convert_dir(dir: &Path, format: CoverageFormat, options: &ConvertOptions) -> Result<ConversionOutcome> {
    let fs = StdFileSystem::new();
    match format {
        CoverageFormat::StatementJson => Converter::new(&fs).convert_dir(dir, format, options),
        CoverageFormat::CountersBinary => {
            let toolchain = GoToolchain::locate(options.source_root.clone())?;
            Converter::new(&fs)
                .with_toolchain(&toolchain)
                .convert_dir(dir, format, options)
        }
    }
}

/// Give targets that share a component name distinct directories.
fn assign_unique_components(targets: Vec<ResolvedTarget>) -> Vec<ResolvedTarget> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    targets
        .into_iter()
        .map(|mut target| {
            let count = seen.entry(target.component_name.clone()).or_insert(0);
            *count += 1;
            if *count > 1 {
                target.component_name = format!("{}-{}", target.component_name, count);
            }
            target
        })
        .collect()
}
