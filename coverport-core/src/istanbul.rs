//! Statement/function/branch JSON coverage (Istanbul layout).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CoverportError, Result};
use crate::pathmap::PathMapping;
use crate::report::{BranchRecord, FileReport, FunctionRecord, NormalizedReport, StatementRecord};

/// Coverage for every instrumented file, keyed by recorded path.
pub type StatementCoverage = BTreeMap<String, FileCoverage>;

/// Coverage of a single file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    /// Recorded path.
    #[serde(default)]
    pub path: String,
    /// Statement locations by id.
    #[serde(default)]
    pub statement_map: BTreeMap<String, Range>,
    /// Function declarations by id.
    #[serde(default)]
    pub fn_map: BTreeMap<String, FunctionInfo>,
    /// Branch points by id.
    #[serde(default)]
    pub branch_map: BTreeMap<String, BranchInfo>,
    /// Statement hit counts.
    #[serde(default)]
    pub s: BTreeMap<String, u64>,
    /// Function hit counts.
    #[serde(default)]
    pub f: BTreeMap<String, u64>,
    /// Branch alternative hit counts.
    #[serde(default)]
    pub b: BTreeMap<String, Vec<u64>>,
    /// Fields carried through untouched (source maps, hashes).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Source range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    /// Start position.
    pub start: Position,
    /// End position.
    pub end: Position,
}

/// Line and optional column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// 1-based line.
    #[serde(default)]
    pub line: u32,
    /// Column; may be null in some emitters.
    #[serde(default)]
    pub column: Option<u32>,
}

/// Function entry of `fnMap`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Function name.
    #[serde(default)]
    pub name: String,
    /// Declaration range.
    #[serde(default)]
    pub decl: Option<Range>,
    /// Body range.
    #[serde(default)]
    pub loc: Option<Range>,
    /// Declaration line, when emitted.
    #[serde(default)]
    pub line: Option<u32>,
}

impl FunctionInfo {
    fn declared_line(&self) -> u32 {
        self.line
            .or_else(|| self.decl.map(|range| range.start.line))
            .or_else(|| self.loc.map(|range| range.start.line))
            .unwrap_or(0)
    }
}

/// Branch entry of `branchMap`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchInfo {
    /// Branch kind (`if`, `cond-expr`, ...).
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Location of the whole branch point.
    #[serde(default)]
    pub loc: Option<Range>,
    /// One location per alternative.
    #[serde(default)]
    pub locations: Vec<Range>,
    /// Branch line, when emitted.
    #[serde(default)]
    pub line: Option<u32>,
}

impl BranchInfo {
    fn declared_line(&self) -> u32 {
        self.line
            .or_else(|| self.loc.map(|range| range.start.line))
            .or_else(|| self.locations.first().map(|range| range.start.line))
            .unwrap_or(0)
    }
}

/// Parse statement-json bytes.
pub fn parse(bytes: &[u8]) -> Result<StatementCoverage> {
    serde_json::from_slice(bytes)
        .map_err(|err| CoverportError::Payload(format!("invalid statement coverage JSON: {err}")))
}

/// Re-key every entry through a mapping, updating the embedded paths.
pub fn remap(coverage: StatementCoverage, mapping: &PathMapping) -> StatementCoverage {
    coverage
        .into_iter()
        .map(|(path, mut file)| {
            let corrected = mapping.apply(&path);
            file.path = corrected.clone();
            (corrected, file)
        })
        .collect()
}

/// Build the normalized report, iterating ids in numeric order.
pub fn to_report(coverage: &StatementCoverage) -> NormalizedReport {
    let mut report = NormalizedReport::default();
    for (path, file) in coverage {
        let statements = sorted_ids(&file.statement_map)
            .into_iter()
            .map(|(id, range)| StatementRecord {
                start_line: range.start.line,
                end_line: range.end.line,
                weight: 1,
                hits: file.s.get(id).copied().unwrap_or(0),
            })
            .collect();

        let functions = sorted_ids(&file.fn_map)
            .into_iter()
            .map(|(id, info)| FunctionRecord {
                name: info.name.clone(),
                line: info.declared_line(),
                hits: file.f.get(id).copied().unwrap_or(0),
            })
            .collect();

        let branches = sorted_ids(&file.branch_map)
            .into_iter()
            .map(|(id, info)| {
                let counts = file.b.get(id);
                let hits = (0..info.locations.len())
                    .map(|index| counts.and_then(|c| c.get(index)).copied().unwrap_or(0))
                    .collect();
                BranchRecord {
                    line: info.declared_line(),
                    hits,
                }
            })
            .collect();

        report.files.insert(
            path.clone(),
            FileReport {
                statements,
                functions,
                branches,
            },
        );
    }
    report
}

fn sorted_ids<T>(map: &BTreeMap<String, T>) -> Vec<(&String, &T)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|(left, _), (right, _)| compare_ids(left, right));
    entries
}

fn compare_ids(left: &str, right: &str) -> Ordering {
    match (left.parse::<u64>(), right.parse::<u64>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}
