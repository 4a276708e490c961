#![deny(missing_docs)]
//! coverport core library.
//!
//! Domain types, discovery rules, path reconciliation and the coverage
//! converters behind the `coverport` command line tool. Everything here is
//! synchronous; network access and process orchestration live in the CLI.

pub mod attestation;
pub mod codecov;
pub mod convert;
pub mod domain;
pub mod error;
pub mod fs;
pub mod image;
pub mod istanbul;
pub mod manifest;
pub mod pathmap;
pub mod profile;
pub mod report;
pub mod snapshot;
pub mod toolchain;

pub use attestation::{GitMetadata, parse_attestation};
pub use codecov::{UploadRequest, git_service, repo_slug};
pub use convert::{ConversionOutcome, ConvertOptions, Converter, detect_format, write_payload};
pub use domain::{
    CoverageFormat, CoveragePayload, DeclaredComponent, PayloadFile, ResolvedTarget,
    TargetDescriptor, TargetLocation, component_dir_name,
};
pub use error::{CoverportError, Result};
pub use fs::{FileSystem, StdFileSystem};
pub use manifest::{CollectionManifest, CollectionParams, ComponentRecord, component_coverage_dir};
pub use pathmap::{PathMapping, PrefixStrategy, detect_prefix};
pub use report::{
    CoverageSummary, NormalizedReport, TargetReport, TargetStatus, render_json, render_lcov,
    render_run_markdown, render_run_text,
};
pub use snapshot::Snapshot;
pub use toolchain::{CommandOutput, CommandSpec, CounterToolchain, GoToolchain, require_tool};
