//! Turn a component's raw coverage directory into reports.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::domain::{CoverageFormat, CoveragePayload};
use crate::error::{CoverportError, Result};
use crate::fs::FileSystem;
use crate::istanbul;
use crate::pathmap::{PathMapping, PrefixStrategy, detect_prefix};
use crate::profile::{Profile, module_path, parse_total_percent};
use crate::report::{CoverageSummary, NormalizedReport, render_json, render_lcov};
use crate::toolchain::CounterToolchain;

/// Raw statement-json payload.
pub const RAW_STATEMENT_FILE: &str = "coverage.json";
/// Raw counters-binary payload when sent as one blob.
pub const RAW_COUNTERS_FILE: &str = "coverage.bin";
/// Text profile produced from counter files.
pub const PROFILE_FILE: &str = "coverage.out";
/// Text profile after remapping and filtering.
pub const FILTERED_PROFILE_FILE: &str = "coverage_filtered.out";
/// LCOV report.
pub const LCOV_FILE: &str = "coverage.lcov";
/// Statement-json re-keyed by corrected paths.
pub const NORMALIZED_FILE: &str = "normalized.json";
/// HTML rendering of a counter profile.
pub const HTML_FILE: &str = "coverage.html";
/// Totals of the last conversion.
pub const SUMMARY_FILE: &str = "summary.json";

/// Inputs shared by both converters.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    /// Local checkout the recorded paths should resolve against.
    pub source_root: Option<PathBuf>,
    /// Path substrings to exclude.
    pub filters: Vec<String>,
    /// Reconcile recorded paths with `source_root`.
    pub remap: bool,
    /// Render HTML for counter profiles.
    pub html: bool,
}

/// Result of converting one directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    /// Format that was converted.
    pub format: CoverageFormat,
    /// Computed totals.
    pub summary: CoverageSummary,
    /// Total reported by the external summary tool.
    pub total_percent: Option<f64>,
    /// Path rewrite that was applied.
    pub mapping: Option<PathMapping>,
    /// Paths dropped because they do not resolve under the source root.
    pub unresolved: Vec<String>,
    /// Paths dropped by filters.
    pub filtered: Vec<String>,
    /// File to hand to an uploader.
    pub upload_file: PathBuf,
    /// Everything written.
    pub artifacts: Vec<PathBuf>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

/// Write a captured payload into a component directory.
pub fn write_payload(
    fs: &dyn FileSystem,
    dir: &Path,
    payload: &CoveragePayload,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    match payload.format {
        CoverageFormat::StatementJson => {
            if payload.raw.is_empty() {
                return Err(CoverportError::Payload("empty statement coverage".to_string()));
            }
            let path = dir.join(RAW_STATEMENT_FILE);
            fs.write(&path, &payload.raw)?;
            written.push(path);
        }
        CoverageFormat::CountersBinary => {
            for file in &payload.files {
                let name = Path::new(&file.name)
                    .file_name()
                    .ok_or_else(|| {
                        CoverportError::Payload(format!("invalid payload file name {:?}", file.name))
                    })?;
                let path = dir.join(name);
                fs.write(&path, &file.data)?;
                written.push(path);
            }
            if !payload.raw.is_empty() {
                let path = dir.join(RAW_COUNTERS_FILE);
                fs.write(&path, &payload.raw)?;
                written.push(path);
            }
            if written.is_empty() {
                return Err(CoverportError::Payload("empty counters payload".to_string()));
            }
        }
    }
    debug!("wrote {} raw artifact(s) to {}", written.len(), dir.display());
    Ok(written)
}

/// Work out which format a raw coverage directory holds.
pub fn detect_format(dir: &Path) -> Result<CoverageFormat> {
    let names = dir_file_names(dir)?;
    if names
        .iter()
        .any(|name| name.starts_with("covmeta.") || name.starts_with("covcounters."))
    {
        return Ok(CoverageFormat::CountersBinary);
    }
    if find_statement_file(dir).is_ok() {
        return Ok(CoverageFormat::StatementJson);
    }
    Err(CoverportError::Payload(format!(
        "unable to detect coverage format in {}",
        dir.display()
    )))
}

/// Locate the statement-json file inside a directory.
pub fn find_statement_file(dir: &Path) -> Result<PathBuf> {
    let nyc_output = dir.join(".nyc_output");
    let preferred = [
        dir.join("coverage-final.json"),
        dir.join("out.json"),
        dir.join(RAW_STATEMENT_FILE),
        nyc_output.join("out.json"),
        nyc_output.join("coverage-final.json"),
    ];
    if let Some(found) = preferred.into_iter().find(|path| path.is_file()) {
        return Ok(found);
    }

    if let Ok(names) = dir_file_names(&nyc_output) {
        if let Some(name) = names.iter().find(|name| name.ends_with(".json")) {
            return Ok(nyc_output.join(name));
        }
    }

    dir_file_names(dir)?
        .into_iter()
        .find(|name| name.ends_with(".json") && name.to_lowercase().contains("coverage"))
        .map(|name| dir.join(name))
        .ok_or_else(|| {
            CoverportError::Payload(format!(
                "no statement coverage file found in {}",
                dir.display()
            ))
        })
}

fn dir_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Converts raw coverage directories using a filesystem and optional toolchain.
pub struct Converter<'a> {
    fs: &'a dyn FileSystem,
    toolchain: Option<&'a dyn CounterToolchain>,
}

impl<'a> Converter<'a> {
    /// Create a converter for statement-json only.
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            toolchain: None,
        }
    }

    /// Enable counters-binary conversion.
    pub fn with_toolchain(mut self, toolchain: &'a dyn CounterToolchain) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    /// Convert the raw data in `dir`, writing reports next to it.
    pub fn convert_dir(
        &self,
        dir: &Path,
        format: CoverageFormat,
        options: &ConvertOptions,
    ) -> Result<ConversionOutcome> {
        let outcome = match format {
            CoverageFormat::StatementJson => self.convert_statements(dir, options)?,
            CoverageFormat::CountersBinary => self.convert_counters(dir, options)?,
        };
        let summary_path = dir.join(SUMMARY_FILE);
        self.fs.write(&summary_path, render_json(&outcome)?.as_bytes())?;
        info!(
            "converted {} coverage in {}: {:.2}% statements over {} file(s)",
            format,
            dir.display(),
            outcome.summary.statements.percent(),
            outcome.summary.files
        );
        Ok(outcome)
    }

    fn convert_statements(&self, dir: &Path, options: &ConvertOptions) -> Result<ConversionOutcome> {
        let input = find_statement_file(dir)?;
        debug!("reading statement coverage from {}", input.display());
        let coverage = istanbul::parse(self.fs.read_to_string(&input)?.as_bytes())?;

        let paths: Vec<String> = coverage.keys().cloned().collect();
        let mapping = self.mapping(&paths, options, false)?;
        let mut coverage = match &mapping {
            Some(mapping) => istanbul::remap(coverage, mapping),
            None => coverage,
        };

        let paths: Vec<String> = coverage.keys().cloned().collect();
        let selection = self.select(&paths, options, None);
        coverage.retain(|path, _| selection.keeps(path));

        let normalized_path = dir.join(NORMALIZED_FILE);
        self.fs.write(&normalized_path, render_json(&coverage)?.as_bytes())?;
        let report = istanbul::to_report(&coverage);
        let lcov_path = self.write_lcov(dir, &report)?;

        Ok(ConversionOutcome {
            format: CoverageFormat::StatementJson,
            summary: report.summary(),
            total_percent: None,
            mapping,
            unresolved: selection.unresolved,
            filtered: selection.filtered,
            upload_file: lcov_path.clone(),
            artifacts: vec![normalized_path, lcov_path],
            warnings: Vec::new(),
        })
    }

    fn convert_counters(&self, dir: &Path, options: &ConvertOptions) -> Result<ConversionOutcome> {
        let toolchain = self.toolchain.ok_or_else(|| {
            CoverportError::Tool("counters-binary conversion needs the go toolchain".to_string())
        })?;
        let profile_path = dir.join(PROFILE_FILE);
        toolchain.textfmt(dir, &profile_path)?;
        let mut profile = Profile::parse(&self.fs.read_to_string(&profile_path)?)?;

        let mapping = self.mapping(&profile.paths(), options, true)?;
        if let Some(mapping) = &mapping {
            profile.remap(mapping);
        }

        let module = options
            .source_root
            .as_ref()
            .and_then(|root| self.fs.read_to_string(&root.join("go.mod")).ok())
            .and_then(|contents| module_path(&contents));
        let selection = self.select(&profile.paths(), options, module.as_deref());
        profile.retain_paths(|path| !selection.unresolved.iter().any(|p| p == path));
        profile.filter_lines(&options.filters);

        let filtered_path = dir.join(FILTERED_PROFILE_FILE);
        self.fs.write(&filtered_path, profile.render().as_bytes())?;
        let mut artifacts = vec![profile_path, filtered_path.clone()];
        let mut warnings = Vec::new();

        let total_percent = match toolchain.func_summary(&filtered_path) {
            Ok(summary) => parse_total_percent(&summary),
            Err(err) => {
                warn!("function summary unavailable for {}: {err}", dir.display());
                warnings.push(format!("function summary unavailable: {err}"));
                None
            }
        };

        if options.html {
            let html_path = dir.join(HTML_FILE);
            match toolchain.html(&filtered_path, &html_path) {
                Ok(()) => artifacts.push(html_path),
                Err(err) => {
                    warn!("html report failed for {}: {err}", dir.display());
                    warnings.push(format!("html report failed: {err}"));
                }
            }
        }

        let report = profile.to_report();
        artifacts.push(self.write_lcov(dir, &report)?);

        Ok(ConversionOutcome {
            format: CoverageFormat::CountersBinary,
            summary: report.summary(),
            total_percent,
            mapping,
            unresolved: selection.unresolved,
            filtered: selection.filtered,
            upload_file: filtered_path,
            artifacts,
            warnings,
        })
    }

    fn mapping(
        &self,
        paths: &[String],
        options: &ConvertOptions,
        strip_ancestor: bool,
    ) -> Result<Option<PathMapping>> {
        let mapping = match (&options.source_root, options.remap) {
            (Some(root), true) => detect_prefix(
                paths,
                PrefixStrategy::SuffixAlignment { source_root: root },
                self.fs,
            )?,
            _ if strip_ancestor => detect_prefix(paths, PrefixStrategy::AncestorClimb, self.fs)?,
            _ => None,
        };
        match &mapping {
            Some(mapping) => info!(
                "remapping {} -> {}",
                mapping.container_prefix,
                if mapping.local_prefix.is_empty() {
                    "(stripped)"
                } else {
                    mapping.local_prefix.as_str()
                }
            ),
            None => debug!("coverage paths used as recorded"),
        }
        Ok(mapping)
    }

    fn select(&self, paths: &[String], options: &ConvertOptions, module: Option<&str>) -> Selection {
        let mut selection = Selection::default();
        for path in paths {
            if options
                .filters
                .iter()
                .any(|filter| !filter.is_empty() && path.contains(filter.as_str()))
            {
                selection.filtered.push(path.clone());
            } else if let Some(root) = &options.source_root {
                if !self.resolves(path, root, module) {
                    selection.unresolved.push(path.clone());
                }
            }
        }
        if !selection.unresolved.is_empty() {
            warn!(
                "dropping {} path(s) not found under the source root",
                selection.unresolved.len()
            );
        }
        selection
    }

    fn write_lcov(&self, dir: &Path, report: &NormalizedReport) -> Result<PathBuf> {
        let path = dir.join(LCOV_FILE);
        self.fs.write(&path, render_lcov(report).as_bytes())?;
        Ok(path)
    }

    fn resolves(&self, path: &str, root: &Path, module: Option<&str>) -> bool {
        if path.starts_with('/') {
            return self.fs.exists(Path::new(path));
        }
        let relative = module
            .and_then(|module| path.strip_prefix(module))
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(path);
        self.fs.exists(&root.join(relative))
    }
}

#[derive(Debug, Default)]
struct Selection {
    unresolved: Vec<String>,
    filtered: Vec<String>,
}

impl Selection {
    fn keeps(&self, path: &str) -> bool {
        !self.unresolved.iter().any(|p| p == path) && !self.filtered.iter().any(|p| p == path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PayloadFile;
    use crate::fs::{MockFileSystem, StdFileSystem};
    use crate::toolchain::MockCounterToolchain;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const STATEMENTS: &str = r#"{
        "/app/src/index.js": {
            "path": "/app/src/index.js",
            "statementMap": {"0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 5}}},
            "fnMap": {}, "branchMap": {}, "s": {"0": 1}, "f": {}, "b": {}
        },
        "/app/src/coverage_server.js": {
            "path": "/app/src/coverage_server.js",
            "statementMap": {"0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 5}}},
            "fnMap": {}, "branchMap": {}, "s": {"0": 1}, "f": {}, "b": {}
        },
        "/app/src/gone.js": {
            "path": "/app/src/gone.js",
            "statementMap": {"0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 5}}},
            "fnMap": {}, "branchMap": {}, "s": {"0": 0}, "f": {}, "b": {}
        }
    }"#;

    const PROFILE: &str = "mode: set\n\
        github.com/org/app/main.go:3.13,5.2 2 1\n\
        github.com/org/app/coverage_server.go:3.13,5.2 1 1\n\
        github.com/org/app/vendored.go:3.13,5.2 1 0\n";

    #[test]
    fn converts_statement_json_without_source_root() {
        let dir = temp_dir();
        std::fs::write(dir.join(RAW_STATEMENT_FILE), STATEMENTS).expect("write raw");
        let fs = StdFileSystem::new();
        let options = ConvertOptions {
            filters: vec!["coverage_server".to_string()],
            ..ConvertOptions::default()
        };

        let outcome = Converter::new(&fs)
            .convert_dir(&dir, CoverageFormat::StatementJson, &options)
            .expect("convert");
        assert_eq!(outcome.summary.files, 2);
        assert_eq!(outcome.mapping, None);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(outcome.filtered, vec!["/app/src/coverage_server.js".to_string()]);

        let lcov = std::fs::read_to_string(dir.join(LCOV_FILE)).expect("lcov");
        assert!(lcov.contains("SF:/app/src/index.js"));
        assert!(!lcov.contains("coverage_server"));
        assert!(dir.join(SUMMARY_FILE).is_file());

        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
    }

    #[test]
    fn remaps_statement_json_and_drops_unresolved() {
        let dir = temp_dir();
        let checkout = temp_dir();
        std::fs::write(dir.join(RAW_STATEMENT_FILE), STATEMENTS).expect("write raw");
        for file in ["src/index.js", "src/coverage_server.js"] {
            let path = checkout.join(file);
            std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            std::fs::write(path, "module.exports = 1").expect("write source");
        }

        let fs = StdFileSystem::new();
        let options = ConvertOptions {
            source_root: Some(checkout.clone()),
            filters: vec!["coverage_server".to_string()],
            remap: true,
            html: false,
        };
        let outcome = Converter::new(&fs)
            .convert_dir(&dir, CoverageFormat::StatementJson, &options)
            .expect("convert");

        let local = format!("{}/", checkout.to_string_lossy());
        assert_eq!(
            outcome.mapping,
            Some(PathMapping {
                container_prefix: "/app/".to_string(),
                local_prefix: local.clone(),
            })
        );
        assert_eq!(outcome.unresolved, vec![format!("{local}src/gone.js")]);
        assert_eq!(outcome.summary.files, 1);

        let normalized = std::fs::read_to_string(dir.join(NORMALIZED_FILE)).expect("normalized");
        let parsed: serde_json::Value = serde_json::from_str(&normalized).expect("json");
        let key = format!("{local}src/index.js");
        assert_eq!(parsed[key.as_str()]["path"], key.as_str());

        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
        std::fs::remove_dir_all(&checkout).expect("cleanup checkout");
    }

    #[test]
    fn converts_counters_with_toolchain() {
        let dir = temp_dir();
        let checkout = temp_dir();
        std::fs::write(checkout.join("go.mod"), "module github.com/org/app\n").expect("go.mod");
        std::fs::write(checkout.join("main.go"), "package main").expect("main.go");
        std::fs::write(checkout.join("coverage_server.go"), "package main").expect("server");

        let mut toolchain = MockCounterToolchain::new();
        toolchain.expect_textfmt().times(1).returning(|_, output| {
            std::fs::write(output, PROFILE)?;
            Ok(())
        });
        toolchain
            .expect_func_summary()
            .times(1)
            .returning(|_| Ok("total:\t(statements)\t100.0%\n".to_string()));
        toolchain.expect_html().times(1).returning(|_, output| {
            std::fs::write(output, "<html></html>")?;
            Ok(())
        });

        let fs = StdFileSystem::new();
        let options = ConvertOptions {
            source_root: Some(checkout.clone()),
            filters: vec!["coverage_server.go".to_string()],
            remap: true,
            html: true,
        };
        let outcome = Converter::new(&fs)
            .with_toolchain(&toolchain)
            .convert_dir(&dir, CoverageFormat::CountersBinary, &options)
            .expect("convert");

        assert_eq!(outcome.total_percent, Some(100.0));
        assert_eq!(outcome.unresolved, vec!["github.com/org/app/vendored.go".to_string()]);
        assert_eq!(outcome.summary.statements.total, 2);
        assert!(outcome.artifacts.contains(&dir.join(HTML_FILE)));
        assert_eq!(outcome.upload_file, dir.join(FILTERED_PROFILE_FILE));

        let filtered = std::fs::read_to_string(dir.join(FILTERED_PROFILE_FILE)).expect("filtered");
        assert_eq!(filtered, "mode: set\ngithub.com/org/app/main.go:3.13,5.2 2 1\n");

        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
        std::fs::remove_dir_all(&checkout).expect("cleanup checkout");
    }

    #[test]
    fn reports_are_written_through_the_filesystem() {
        let dir = temp_dir();
        std::fs::write(dir.join(RAW_STATEMENT_FILE), "").expect("write raw");

        let written = Arc::new(Mutex::new(Vec::new()));
        let mut fs = MockFileSystem::new();
        fs.expect_read_to_string()
            .times(1)
            .returning(|_| Ok(STATEMENTS.to_string()));
        let sink = Arc::clone(&written);
        fs.expect_write().times(3).returning(move |path, contents| {
            sink.lock()
                .expect("lock")
                .push((path.to_path_buf(), contents.len()));
            Ok(())
        });

        let outcome = Converter::new(&fs)
            .convert_dir(&dir, CoverageFormat::StatementJson, &ConvertOptions::default())
            .expect("convert");
        assert_eq!(outcome.summary.files, 3);

        let written = written.lock().expect("lock");
        let paths: Vec<&PathBuf> = written.iter().map(|(path, _)| path).collect();
        assert_eq!(
            paths,
            vec![
                &dir.join(NORMALIZED_FILE),
                &dir.join(LCOV_FILE),
                &dir.join(SUMMARY_FILE)
            ]
        );
        assert!(written.iter().all(|(_, len)| *len > 0));
        assert!(!dir.join(LCOV_FILE).exists());

        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
    }

    #[test]
    fn counters_need_a_toolchain() {
        let dir = temp_dir();
        let fs = StdFileSystem::new();
        let error = Converter::new(&fs)
            .convert_dir(&dir, CoverageFormat::CountersBinary, &ConvertOptions::default())
            .expect_err("no toolchain");
        assert!(matches!(error, CoverportError::Tool(_)));
        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
    }

    #[test]
    fn malformed_statement_json_is_a_payload_error() {
        let dir = temp_dir();
        std::fs::write(dir.join(RAW_STATEMENT_FILE), "{ nope").expect("write raw");
        let fs = StdFileSystem::new();
        let error = Converter::new(&fs)
            .convert_dir(&dir, CoverageFormat::StatementJson, &ConvertOptions::default())
            .expect_err("malformed");
        assert!(matches!(error, CoverportError::Payload(_)));
        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
    }

    #[test]
    fn writes_payloads_and_detects_formats() {
        let fs = StdFileSystem::new();
        let counters_dir = temp_dir();
        let payload = CoveragePayload {
            label: "e2e".to_string(),
            captured_at: Utc::now(),
            format: CoverageFormat::CountersBinary,
            raw: Vec::new(),
            files: vec![
                PayloadFile {
                    name: "covmeta.abc".to_string(),
                    data: vec![1, 2, 3],
                },
                PayloadFile {
                    name: "../covcounters.abc.1.2".to_string(),
                    data: vec![4],
                },
            ],
        };
        let written = write_payload(&fs, &counters_dir, &payload).expect("write payload");
        assert_eq!(written.len(), 2);
        assert!(counters_dir.join("covcounters.abc.1.2").is_file());
        assert_eq!(
            detect_format(&counters_dir).expect("detect"),
            CoverageFormat::CountersBinary
        );

        let statement_dir = temp_dir();
        let payload = CoveragePayload {
            format: CoverageFormat::StatementJson,
            raw: STATEMENTS.as_bytes().to_vec(),
            files: Vec::new(),
            ..payload
        };
        write_payload(&fs, &statement_dir, &payload).expect("write payload");
        assert_eq!(
            detect_format(&statement_dir).expect("detect"),
            CoverageFormat::StatementJson
        );

        let empty_dir = temp_dir();
        assert!(detect_format(&empty_dir).is_err());
        let empty = CoveragePayload {
            raw: Vec::new(),
            ..payload
        };
        assert!(write_payload(&fs, &empty_dir, &empty).is_err());

        for dir in [counters_dir, statement_dir, empty_dir] {
            std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
        }
    }

    #[test]
    fn finds_nyc_output_and_loose_coverage_files() {
        let dir = temp_dir();
        std::fs::create_dir_all(dir.join(".nyc_output")).expect("mkdir");
        std::fs::write(dir.join(".nyc_output/abc.json"), "{}").expect("write");
        assert_eq!(
            find_statement_file(&dir).expect("find"),
            dir.join(".nyc_output/abc.json")
        );

        let loose = temp_dir();
        std::fs::write(loose.join("unit-coverage.json"), "{}").expect("write");
        std::fs::write(loose.join("package.json"), "{}").expect("write");
        assert_eq!(
            find_statement_file(&loose).expect("find"),
            loose.join("unit-coverage.json")
        );

        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
        std::fs::remove_dir_all(&loose).expect("cleanup temp dir");
    }

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn temp_dir() -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time")
            .as_nanos();
        let count = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("coverport_convert_test_{nanos}_{count}"));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }
}
