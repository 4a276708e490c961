//! Text coverage profiles produced from counters-binary data.
//!
//! A profile starts with a `mode:` line followed by one block per line:
//! `path:startLine.startCol,endLine.endCol numStatements hitCount`.

use std::fmt::Write;

use crate::error::{CoverportError, Result};
use crate::pathmap::PathMapping;
use crate::report::{FileReport, NormalizedReport, StatementRecord};

/// One counted block of code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileBlock {
    /// Source path as recorded at build time.
    pub path: String,
    /// First line.
    pub start_line: u32,
    /// First column.
    pub start_col: u32,
    /// Last line.
    pub end_line: u32,
    /// Last column.
    pub end_col: u32,
    /// Statements in the block.
    pub statements: u32,
    /// Execution count.
    pub hits: u64,
}

/// A parsed text profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Counter mode (`set`, `count` or `atomic`).
    pub mode: String,
    /// Blocks in file order.
    pub blocks: Vec<ProfileBlock>,
}

impl Profile {
    /// Parse profile text.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty());
        let mode = match lines.next() {
            Some((_, line)) => line
                .trim()
                .strip_prefix("mode:")
                .map(|mode| mode.trim().to_string())
                .ok_or_else(|| {
                    CoverportError::Payload(format!("profile must start with mode line, got {line:?}"))
                })?,
            None => return Err(CoverportError::Payload("empty coverage profile".to_string())),
        };

        let blocks = lines
            .map(|(index, line)| parse_block(line.trim(), index + 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { mode, blocks })
    }

    /// Distinct paths in first-seen order.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = Vec::new();
        for block in &self.blocks {
            if paths.last() != Some(&block.path) && !paths.contains(&block.path) {
                paths.push(block.path.clone());
            }
        }
        paths
    }

    /// Rewrite block paths through a mapping.
    pub fn remap(&mut self, mapping: &PathMapping) {
        for block in &mut self.blocks {
            block.path = mapping.apply(&block.path);
        }
    }

    /// Keep only blocks whose path satisfies the predicate.
    pub fn retain_paths(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.blocks.retain(|block| keep(&block.path));
    }

    /// Drop blocks whose rendered line contains any filter substring.
    pub fn filter_lines(&mut self, filters: &[String]) {
        if filters.is_empty() {
            return;
        }
        self.blocks.retain(|block| {
            let line = render_block(block);
            !filters.iter().any(|filter| line.contains(filter.as_str()))
        });
    }

    /// Render back to profile text.
    pub fn render(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "mode: {}", self.mode);
        for block in &self.blocks {
            let _ = writeln!(output, "{}", render_block(block));
        }
        output
    }

    /// Convert blocks into statement records.
    pub fn to_report(&self) -> NormalizedReport {
        let mut report = NormalizedReport::default();
        for block in &self.blocks {
            report
                .files
                .entry(block.path.clone())
                .or_insert_with(FileReport::default)
                .statements
                .push(StatementRecord {
                    start_line: block.start_line,
                    end_line: block.end_line,
                    weight: block.statements,
                    hits: block.hits,
                });
        }
        report
    }
}

fn parse_block(line: &str, line_number: usize) -> Result<ProfileBlock> {
    let malformed =
        || CoverportError::Payload(format!("malformed profile line {line_number}: {line:?}"));

    let mut fields = line.rsplitn(3, ' ');
    let hits = fields.next().ok_or_else(malformed)?;
    let statements = fields.next().ok_or_else(malformed)?;
    let location = fields.next().ok_or_else(malformed)?;
    let (path, span) = location.rsplit_once(':').ok_or_else(malformed)?;
    let (start, end) = span.split_once(',').ok_or_else(malformed)?;
    let (start_line, start_col) = start.split_once('.').ok_or_else(malformed)?;
    let (end_line, end_col) = end.split_once('.').ok_or_else(malformed)?;

    let number = |value: &str| value.trim().parse::<u32>().map_err(|_| malformed());
    Ok(ProfileBlock {
        path: path.to_string(),
        start_line: number(start_line)?,
        start_col: number(start_col)?,
        end_line: number(end_line)?,
        end_col: number(end_col)?,
        statements: number(statements)?,
        hits: hits.trim().parse::<u64>().map_err(|_| malformed())?,
    })
}

fn render_block(block: &ProfileBlock) -> String {
    format!(
        "{}:{}.{},{}.{} {} {}",
        block.path,
        block.start_line,
        block.start_col,
        block.end_line,
        block.end_col,
        block.statements,
        block.hits
    )
}

/// Read the percentage from the `total:` row of a function summary.
pub fn parse_total_percent(func_summary: &str) -> Option<f64> {
    func_summary
        .lines()
        .find(|line| line.trim_start().starts_with("total:"))
        .and_then(|line| line.split_whitespace().last())
        .and_then(|value| value.trim_end_matches('%').parse::<f64>().ok())
}

/// Module path declared by a `go.mod` file.
pub fn module_path(go_mod: &str) -> Option<String> {
    go_mod.lines().find_map(|line| {
        let rest = line.trim().strip_prefix("module")?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        let module = rest.trim().trim_matches('"');
        (!module.is_empty()).then(|| module.to_string())
    })
}
