//! External command wrappers used by the converters.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::error::{CoverportError, Result};

/// A command line to run, built up argument by argument.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: PathBuf,
    args: Vec<String>,
    workdir: Option<PathBuf>,
}

impl CommandSpec {
    /// Start a command for the given program.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Run the command from this directory.
    pub fn current_dir(mut self, dir: Option<&Path>) -> Self {
        self.workdir = dir.map(Path::to_path_buf);
        self
    }

    /// Program and arguments as one display string.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Run to completion and capture output, whatever the exit status.
    pub fn run(&self) -> Result<CommandOutput> {
        debug!("running {}", self.display());
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|err| {
            CoverportError::Tool(format!("failed to start {}: {err}", self.program.display()))
        })?;
        Ok(CommandOutput::from(output))
    }

    /// Run to completion and fail unless the command exits successfully.
    pub fn run_checked(&self) -> Result<CommandOutput> {
        let output = self.run()?;
        if !output.status.success() {
            let merged = output.merged_output();
            let detail = if merged.is_empty() {
                format!("{}", output.status)
            } else {
                merged
            };
            return Err(CoverportError::Tool(format!(
                "{} failed: {detail}",
                self.display()
            )));
        }
        Ok(output)
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status.
    pub status: std::process::ExitStatus,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

impl CommandOutput {

    /// Trimmed stdout followed by trimmed stderr.
    pub fn merged_output(&self) -> String {
        let mut merged = String::new();
        if !self.stdout.trim().is_empty() {
            merged.push_str(self.stdout.trim());
        }
        if !self.stderr.trim().is_empty() {
            if !merged.is_empty() {
                merged.push('\n');
            }
            merged.push_str(self.stderr.trim());
        }
        merged
    }
}

/// Locate a program on `PATH`.
pub fn require_tool(name: &str) -> Result<PathBuf> {
    which::which(name)
        .map_err(|err| CoverportError::Tool(format!("{name} not found on PATH: {err}")))
}

/// Conversion steps for the counters-binary format.
#[cfg_attr(test, mockall::automock)]
pub trait CounterToolchain {
    /// Convert a directory of metadata and counter files into a text profile.
    fn textfmt(&self, input_dir: &Path, output: &Path) -> Result<()>;
    /// Per-function summary of a text profile, ending with a `total:` row.
    fn func_summary(&self, profile: &Path) -> Result<String>;
    /// Render a text profile as annotated HTML.
    fn html(&self, profile: &Path, output: &Path) -> Result<()>;
}

/// [`CounterToolchain`] backed by the `go` command.
#[derive(Debug, Clone)]
pub struct GoToolchain {
    go: PathBuf,
    workdir: Option<PathBuf>,
}

impl GoToolchain {
    /// Find `go` on `PATH`. Tools that read sources run from `workdir`.
    pub fn locate(workdir: Option<PathBuf>) -> Result<Self> {
        let go = require_tool("go")
            .map_err(|err| CoverportError::Tool(format!("go toolchain required: {err}")))?;
        Ok(Self { go, workdir })
    }

    fn go(&self) -> CommandSpec {
        CommandSpec::new(&self.go)
            .arg("tool")
            .current_dir(self.workdir.as_deref())
    }
}

impl CounterToolchain for GoToolchain {
    fn textfmt(&self, input_dir: &Path, output: &Path) -> Result<()> {
        self.go()
            .args([
                "covdata".to_string(),
                "textfmt".to_string(),
                format!("-i={}", input_dir.display()),
                format!("-o={}", output.display()),
            ])
            .run_checked()?;
        if !output.is_file() {
            return Err(CoverportError::Tool(format!(
                "covdata produced no profile at {}",
                output.display()
            )));
        }
        Ok(())
    }

    fn func_summary(&self, profile: &Path) -> Result<String> {
        let output = self
            .go()
            .arg("cover")
            .arg(format!("-func={}", profile.display()))
            .run_checked()?;
        Ok(output.stdout)
    }

    fn html(&self, profile: &Path, output: &Path) -> Result<()> {
        self.go()
            .arg("cover")
            .arg(format!("-html={}", profile.display()))
            .arg("-o")
            .arg(output.display().to_string())
            .run_checked()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_output_joins_streams() {
        let output = CommandSpec::new("sh")
            .args(["-c", "echo out; echo err >&2"])
            .run()
            .expect("run sh");
        assert!(output.status.success());
        assert_eq!(output.merged_output(), "out\nerr");
    }

    #[test]
    fn run_checked_reports_failure_detail() {
        let error = CommandSpec::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .run_checked()
            .expect_err("should fail");
        let message = error.to_string();
        assert!(message.starts_with("tool error: "));
        assert!(message.contains("broken"));
    }

    #[test]
    fn missing_program_is_a_tool_error() {
        let error = CommandSpec::new("coverport-definitely-missing-binary")
            .run()
            .expect_err("missing");
        assert!(matches!(error, CoverportError::Tool(_)));
        assert!(require_tool("coverport-definitely-missing-binary").is_err());
    }

    #[test]
    fn runs_in_working_directory() {
        let dir = std::env::temp_dir();
        let output = CommandSpec::new("pwd")
            .current_dir(Some(&dir))
            .run_checked()
            .expect("pwd");
        let reported = PathBuf::from(output.stdout.trim());
        let expected = std::fs::canonicalize(&dir).expect("canonical");
        assert_eq!(
            std::fs::canonicalize(reported).expect("canonical pwd"),
            expected
        );
    }
}
