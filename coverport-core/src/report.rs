//! Normalized coverage reports and run summaries.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Line/function/branch coverage for a set of files, keyed by path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedReport {
    /// Per-file coverage, sorted by path.
    pub files: BTreeMap<String, FileReport>,
}

/// Coverage for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    /// Statement (or block) records.
    pub statements: Vec<StatementRecord>,
    /// Function records.
    pub functions: Vec<FunctionRecord>,
    /// Branch groups, in source order.
    pub branches: Vec<BranchRecord>,
}

/// A statement or basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementRecord {
    /// First line of the statement.
    pub start_line: u32,
    /// Last line of the statement.
    pub end_line: u32,
    /// Number of statements the record stands for.
    pub weight: u32,
    /// Execution count.
    pub hits: u64,
}

/// A function declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRecord {
    /// Function name.
    pub name: String,
    /// Declaration line.
    pub line: u32,
    /// Call count.
    pub hits: u64,
}

/// A branch point with one counter per alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    /// Line of the branch point.
    pub line: u32,
    /// Hit count of each alternative.
    pub hits: Vec<u64>,
}

impl FileReport {
    /// Highest hit count among statements starting on each line.
    pub fn line_hits(&self) -> BTreeMap<u32, u64> {
        let mut lines = BTreeMap::new();
        for statement in &self.statements {
            lines
                .entry(statement.start_line)
                .and_modify(|hits: &mut u64| *hits = (*hits).max(statement.hits))
                .or_insert(statement.hits);
        }
        lines
    }
}

/// Covered/total pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratio {
    /// Covered items.
    pub covered: u64,
    /// All items.
    pub total: u64,
}

impl Ratio {
    /// Coverage percentage; zero when there is nothing to cover.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.covered as f64 / self.total as f64 * 100.0
        }
    }

    fn add(&mut self, covered: bool, weight: u64) {
        self.total += weight;
        if covered {
            self.covered += weight;
        }
    }
}

/// Aggregate coverage totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    /// Files in the report.
    pub files: usize,
    /// Statement coverage.
    pub statements: Ratio,
    /// Function coverage.
    pub functions: Ratio,
    /// Branch alternative coverage.
    pub branches: Ratio,
    /// Line coverage.
    pub lines: Ratio,
}

impl NormalizedReport {
    /// Compute the totals over every file.
    pub fn summary(&self) -> CoverageSummary {
        let mut summary = CoverageSummary {
            files: self.files.len(),
            ..CoverageSummary::default()
        };
        for file in self.files.values() {
            for statement in &file.statements {
                summary
                    .statements
                    .add(statement.hits > 0, u64::from(statement.weight));
            }
            for function in &file.functions {
                summary.functions.add(function.hits > 0, 1);
            }
            for branch in &file.branches {
                for hits in &branch.hits {
                    summary.branches.add(*hits > 0, 1);
                }
            }
            for hits in file.line_hits().values() {
                summary.lines.add(*hits > 0, 1);
            }
        }
        summary
    }
}

/// Render a report in LCOV tracefile format.
pub fn render_lcov(report: &NormalizedReport) -> String {
    let mut output = String::new();
    for (path, file) in &report.files {
        let _ = writeln!(output, "TN:");
        let _ = writeln!(output, "SF:{path}");

        for function in &file.functions {
            let _ = writeln!(output, "FN:{},{}", function.line, function.name);
        }
        for function in &file.functions {
            let _ = writeln!(output, "FNDA:{},{}", function.hits, function.name);
        }
        let functions_hit = file.functions.iter().filter(|f| f.hits > 0).count();
        let _ = writeln!(output, "FNF:{}", file.functions.len());
        let _ = writeln!(output, "FNH:{functions_hit}");

        let lines = file.line_hits();
        for (line, hits) in &lines {
            let _ = writeln!(output, "DA:{line},{hits}");
        }
        let _ = writeln!(output, "LF:{}", lines.len());
        let _ = writeln!(output, "LH:{}", lines.values().filter(|hits| **hits > 0).count());

        let mut branches_found = 0;
        let mut branches_hit = 0;
        for (group, branch) in file.branches.iter().enumerate() {
            for (alternative, hits) in branch.hits.iter().enumerate() {
                let _ = writeln!(output, "BRDA:{},{group},{alternative},{hits}", branch.line);
                branches_found += 1;
                if *hits > 0 {
                    branches_hit += 1;
                }
            }
        }
        let _ = writeln!(output, "BRF:{branches_found}");
        let _ = writeln!(output, "BRH:{branches_hit}");
        let _ = writeln!(output, "end_of_record");
    }
    output
}

/// Render coverage totals as indented text lines.
pub fn render_summary_text(summary: &CoverageSummary) -> String {
    let mut output = String::new();
    for (label, ratio) in summary_rows(summary) {
        let _ = writeln!(
            output,
            "  {label:<11} {:.2}% ({}/{})",
            ratio.percent(),
            ratio.covered,
            ratio.total
        );
    }
    let _ = writeln!(output, "  {:<11} {}", "Files:", summary.files);
    output
}

fn summary_rows(summary: &CoverageSummary) -> [(&'static str, Ratio); 4] {
    [
        ("Statements:", summary.statements),
        ("Functions:", summary.functions),
        ("Branches:", summary.branches),
        ("Lines:", summary.lines),
    ]
}

/// Outcome of one target or component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum TargetStatus {
    /// Processing completed.
    Done,
    /// The target could not be reached and was left out.
    Skipped(String),
    /// Processing failed.
    Failed(String),
}

/// Per-target result included in run summaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetReport {
    /// Target identity (pod or URL).
    pub target: String,
    /// Component the target belongs to.
    pub component: String,
    /// Outcome.
    pub status: TargetStatus,
    /// Directory holding the target's artifacts.
    pub output_dir: Option<PathBuf>,
    /// Coverage totals, when conversion ran.
    pub coverage: Option<CoverageSummary>,
    /// Aggregate percentage reported by an external tool.
    pub total_percent: Option<f64>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

impl TargetReport {
    /// Create a report for a completed target.
    pub fn new(target: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            component: component.into(),
            status: TargetStatus::Done,
            output_dir: None,
            coverage: None,
            total_percent: None,
            warnings: Vec::new(),
        }
    }

    /// Create a report for a failed target.
    pub fn failed(
        target: impl Into<String>,
        component: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            status: TargetStatus::Failed(error.into()),
            ..Self::new(target, component)
        }
    }

    /// Create a report for a skipped target.
    pub fn skipped(
        target: impl Into<String>,
        component: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            status: TargetStatus::Skipped(reason.into()),
            ..Self::new(target, component)
        }
    }

    /// Whether the target completed.
    pub fn is_done(&self) -> bool {
        self.status == TargetStatus::Done
    }
}

/// Render target reports as a plain-text summary.
pub fn render_run_text(title: &str, reports: &[TargetReport]) -> String {
    let mut output = String::new();
    let done = reports.iter().filter(|report| report.is_done()).count();
    let _ = writeln!(output, "{title}");
    let _ = writeln!(output, "  Succeeded: {done}");
    let _ = writeln!(output, "  Failed:    {}", reports.len() - done);
    for report in reports {
        match &report.status {
            TargetStatus::Done => {
                let _ = write!(output, "  [ok]   {} ({})", report.target, report.component);
                if let Some(percent) = report.total_percent {
                    let _ = write!(output, " {percent:.1}%");
                } else if let Some(coverage) = &report.coverage {
                    let _ = write!(output, " {:.1}%", coverage.statements.percent());
                }
                let _ = writeln!(output);
            }
            TargetStatus::Skipped(reason) => {
                let _ = writeln!(output, "  [skip] {}: {reason}", report.target);
            }
            TargetStatus::Failed(error) => {
                let _ = writeln!(output, "  [fail] {}: {error}", report.target);
            }
        }
    }
    output
}

/// Render target reports as Markdown.
pub fn render_run_markdown(title: &str, reports: &[TargetReport]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# {title}\n");
    for report in reports {
        let _ = writeln!(output, "## {}\n", report.target);
        let _ = writeln!(output, "- Component: `{}`", report.component);
        match &report.status {
            TargetStatus::Done => {
                let _ = writeln!(output, "- Status: done");
            }
            TargetStatus::Skipped(reason) => {
                let _ = writeln!(output, "- Status: skipped ({reason})");
            }
            TargetStatus::Failed(error) => {
                let _ = writeln!(output, "- Status: failed ({error})");
            }
        }
        if let Some(dir) = &report.output_dir {
            let _ = writeln!(output, "- Output: `{}`", dir.display());
        }
        if let Some(percent) = report.total_percent {
            let _ = writeln!(output, "- Total: {percent:.2}%");
        }
        let _ = writeln!(output);
        if let Some(coverage) = &report.coverage {
            let _ = writeln!(output, "| Metric | Coverage | Covered | Total |");
            let _ = writeln!(output, "|---|---|---|---|");
            for (label, ratio) in summary_rows(coverage) {
                let _ = writeln!(
                    output,
                    "| {} | {:.2}% | {} | {} |",
                    label.trim_end_matches(':'),
                    ratio.percent(),
                    ratio.covered,
                    ratio.total
                );
            }
            let _ = writeln!(output);
        }
        if !report.warnings.is_empty() {
            let _ = writeln!(output, "### Warnings");
            for warning in &report.warnings {
                let _ = writeln!(output, "- {warning}");
            }
            let _ = writeln!(output);
        }
    }
    output
}

/// Render any serializable report payload as JSON.
pub fn render_json<T: Serialize + ?Sized>(payload: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(payload)
}
