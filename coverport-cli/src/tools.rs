//! External programs: oras, cosign, git and the codecov uploader.

use coverport_core::{
    CommandOutput, CoverportError, GitMetadata, Result, UploadRequest, parse_attestation,
    require_tool,
};
use log::{debug, info, warn};
use reqwest::Client;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;
use tokio::process::Command;

const ARTIFACT_TYPE: &str = "application/vnd.coverport.coverage.v1";
const EXPIRES_AFTER_ANNOTATION: &str = "quay.expires-after";

/// An OCI push of a collection output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PushRequest {
    pub reference: String,
    pub dir: PathBuf,
    pub expires_after: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

/// A checkout of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CloneRequest {
    pub repo_url: String,
    pub commit_sha: String,
    pub branch: Option<String>,
    pub target_dir: PathBuf,
    pub depth: u32,
}

/// External tools used around collection and processing.
pub(crate) trait ExternalTools: Send + Sync {
    fn push_artifact<'a>(
        &'a self,
        request: &'a PushRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn pull_artifact<'a>(
        &'a self,
        reference: &'a str,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn git_metadata<'a>(
        &'a self,
        image: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GitMetadata>> + Send + 'a>>;

    fn clone_repo<'a>(
        &'a self,
        request: &'a CloneRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn upload<'a>(
        &'a self,
        request: &'a UploadRequest,
        repo_root: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// [`ExternalTools`] backed by programs on `PATH`.
#[cfg_attr(test, allow(dead_code))]
pub(crate) struct CommandTools {
    timeout: Duration,
    http: Client,
    download_dir: PathBuf,
}

impl CommandTools {
    #[cfg_attr(test, allow(dead_code))]
    pub(crate) fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("coverport/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| CoverportError::Tool(format!("http client: {err}")))?;
        Ok(Self {
            timeout,
            http,
            download_dir: std::env::temp_dir().join("coverport-tools"),
        })
    }

    async fn push(&self, request: &PushRequest) -> Result<()> {
        let oras = require_tool("oras")?;
        let args = push_args(request, &artifact_entries(&request.dir)?);
        run_tool(&oras, &args, Some(&request.dir), self.timeout).await?;
        info!("pushed {} to {}", request.dir.display(), request.reference);
        Ok(())
    }

    async fn pull(&self, reference: &str, dest: &Path) -> Result<()> {
        let oras = require_tool("oras")?;
        tokio::fs::create_dir_all(dest).await?;
        let args = vec![
            "pull".to_string(),
            reference.to_string(),
            "-o".to_string(),
            dest.display().to_string(),
        ];
        run_tool(&oras, &args, None, self.timeout).await?;
        info!("pulled {reference} into {}", dest.display());
        Ok(())
    }

    async fn attestation(&self, image: &str) -> Result<GitMetadata> {
        let cosign = require_tool("cosign")?;
        let args = vec![
            "download".to_string(),
            "attestation".to_string(),
            image.to_string(),
        ];
        let output = run_tool(&cosign, &args, None, self.timeout).await?;
        let metadata = parse_attestation(&output.stdout)?;
        info!(
            "{image}: {} @ {}",
            metadata.repo_url, metadata.commit_sha
        );
        Ok(metadata)
    }

    async fn checkout(&self, request: &CloneRequest) -> Result<()> {
        let git = require_tool("git")?;
        if let Some(parent) = request.target_dir.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!("cloning {} into {}", request.repo_url, request.target_dir.display());
        run_tool(&git, &clone_args(request), None, self.timeout).await?;

        if request.commit_sha.is_empty() {
            return Ok(());
        }
        let repo = request.target_dir.display().to_string();
        if request.depth > 0 {
            let shallow = fetch_args(&repo, &request.commit_sha, true);
            if let Err(err) = run_tool(&git, &shallow, None, self.timeout).await {
                warn!("shallow fetch of {} failed, retrying without depth: {err}", request.commit_sha);
                let full = fetch_args(&repo, &request.commit_sha, false);
                run_tool(&git, &full, None, self.timeout).await?;
            }
        }
        let checkout = vec![
            "-C".to_string(),
            repo,
            "checkout".to_string(),
            request.commit_sha.clone(),
        ];
        run_tool(&git, &checkout, None, self.timeout).await?;
        info!("checked out {}", request.commit_sha);
        Ok(())
    }

    async fn codecov(&self, request: &UploadRequest, repo_root: &Path) -> Result<()> {
        let uploader = match require_tool("codecov") {
            Ok(path) => path,
            Err(_) => self.download_codecov().await?,
        };
        debug!("codecov {}", request.redacted_args().join(" "));
        run_tool(&uploader, &request.args(), Some(repo_root), self.timeout).await?;
        info!("uploaded {} to codecov", request.coverage_file.display());
        Ok(())
    }

    async fn download_codecov(&self) -> Result<PathBuf> {
        let url = codecov_download_url()?;
        let target = self.download_dir.join("codecov");
        if target.is_file() {
            return Ok(target);
        }
        info!("codecov CLI not found, downloading {url}");
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| CoverportError::Tool(format!("download codecov CLI: {err}")))?
            .bytes()
            .await
            .map_err(|err| CoverportError::Tool(format!("download codecov CLI: {err}")))?;
        tokio::fs::create_dir_all(&self.download_dir).await?;
        tokio::fs::write(&target, &bytes).await?;
        make_executable(&target).await?;
        Ok(target)
    }
}

impl ExternalTools for CommandTools {
    fn push_artifact<'a>(
        &'a self,
        request: &'a PushRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.push(request))
    }

    fn pull_artifact<'a>(
        &'a self,
        reference: &'a str,
        dest: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.pull(reference, dest))
    }

    fn git_metadata<'a>(
        &'a self,
        image: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<GitMetadata>> + Send + 'a>> {
        Box::pin(self.attestation(image))
    }

    fn clone_repo<'a>(
        &'a self,
        request: &'a CloneRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.checkout(request))
    }

    fn upload<'a>(
        &'a self,
        request: &'a UploadRequest,
        repo_root: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.codecov(request, repo_root))
    }
}

/// Run a program to completion, failing on a non-zero exit or timeout.
pub(crate) async fn run_tool(
    program: &Path,
    args: &[String],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let name = program
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| {
            CoverportError::Tool(format!("{name} timed out after {}s", timeout.as_secs()))
        })?
        .map_err(|err| CoverportError::Tool(format!("failed to run {name}: {err}")))?;
    let output = CommandOutput::from(output);
    if !output.status.success() {
        return Err(CoverportError::Tool(format!(
            "{name} {} failed: {}",
            args.first().map(String::as_str).unwrap_or(""),
            output.merged_output().trim()
        )));
    }
    Ok(output)
}

/// `<registry>/<repository>:<tag>`.
pub(crate) fn artifact_reference(registry: &str, repository: &str, tag: &str) -> String {
    format!(
        "{}/{}:{tag}",
        registry.trim_end_matches('/'),
        repository.trim_matches('/')
    )
}

fn push_args(request: &PushRequest, entries: &[String]) -> Vec<String> {
    let mut args = vec![
        "push".to_string(),
        request.reference.clone(),
        "--artifact-type".to_string(),
        ARTIFACT_TYPE.to_string(),
    ];
    let mut annotations = request.annotations.clone();
    if let Some(expires) = request.expires_after.as_deref().filter(|value| !value.is_empty()) {
        annotations.insert(EXPIRES_AFTER_ANNOTATION.to_string(), expires.to_string());
    }
    for (key, value) in annotations {
        args.push("--annotation".to_string());
        args.push(format!("{key}={value}"));
    }
    args.extend(entries.iter().cloned());
    args
}

/// Top-level entries of an output directory, sorted.
fn artifact_entries(dir: &Path) -> Result<Vec<String>> {
    let mut entries = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let name: OsString = entry?.file_name();
        let name = name.to_string_lossy().into_owned();
        if !name.starts_with('.') {
            entries.push(name);
        }
    }
    entries.sort();
    if entries.is_empty() {
        return Err(CoverportError::Tool(format!(
            "nothing to push in {}",
            dir.display()
        )));
    }
    Ok(entries)
}

fn clone_args(request: &CloneRequest) -> Vec<String> {
    let mut args = vec!["clone".to_string()];
    if request.depth > 0 {
        args.push("--depth".to_string());
        args.push(request.depth.to_string());
    }
    if let Some(branch) = request.branch.as_deref().filter(|branch| !branch.is_empty()) {
        args.push("--branch".to_string());
        args.push(branch.to_string());
    }
    args.push(request.repo_url.clone());
    args.push(request.target_dir.display().to_string());
    args
}

fn fetch_args(repo: &str, commit: &str, shallow: bool) -> Vec<String> {
    let mut args = vec!["-C".to_string(), repo.to_string(), "fetch".to_string()];
    if shallow {
        args.push("--depth=1".to_string());
    }
    args.push("origin".to_string());
    args.push(commit.to_string());
    args
}

fn codecov_download_url() -> Result<&'static str> {
    match std::env::consts::OS {
        "linux" => Ok("https://cli.codecov.io/latest/linux/codecov"),
        "macos" => Ok("https://cli.codecov.io/latest/macos/codecov"),
        other => Err(CoverportError::Tool(format!(
            "codecov CLI download not supported on {other}"
        ))),
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Record a pushed artifact reference for later pipeline steps.
pub(crate) async fn write_artifact_ref(path: &Path, reference: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, reference).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_reference_and_push_arguments() {
        let reference = artifact_reference("quay.io/", "/org/coverage/", "e2e-1");
        assert_eq!(reference, "quay.io/org/coverage:e2e-1");

        let mut annotations = BTreeMap::new();
        annotations.insert(
            "org.opencontainers.image.title".to_string(),
            "Coverage data for: api".to_string(),
        );
        let request = PushRequest {
            reference,
            dir: PathBuf::from("/out"),
            expires_after: Some("30d".to_string()),
            annotations,
        };
        let args = push_args(&request, &["api".to_string(), "metadata.json".to_string()]);
        assert_eq!(
            args,
            vec![
                "push",
                "quay.io/org/coverage:e2e-1",
                "--artifact-type",
                ARTIFACT_TYPE,
                "--annotation",
                "org.opencontainers.image.title=Coverage data for: api",
                "--annotation",
                "quay.expires-after=30d",
                "api",
                "metadata.json",
            ]
        );
    }

    #[test]
    fn clone_arguments_follow_depth_and_branch() {
        let request = CloneRequest {
            repo_url: "https://github.com/org/app".to_string(),
            commit_sha: "abc".to_string(),
            branch: Some("main".to_string()),
            target_dir: PathBuf::from("/ws/repo"),
            depth: 1,
        };
        assert_eq!(
            clone_args(&request),
            vec![
                "clone",
                "--depth",
                "1",
                "--branch",
                "main",
                "https://github.com/org/app",
                "/ws/repo"
            ]
        );
        let full = CloneRequest {
            depth: 0,
            branch: None,
            ..request
        };
        assert_eq!(
            clone_args(&full),
            vec!["clone", "https://github.com/org/app", "/ws/repo"]
        );
        assert_eq!(
            fetch_args("/ws/repo", "abc", true),
            vec!["-C", "/ws/repo", "fetch", "--depth=1", "origin", "abc"]
        );
    }

    #[tokio::test]
    async fn run_tool_reports_failures() {
        let sh = PathBuf::from("sh");
        let ok = run_tool(
            &sh,
            &["-c".to_string(), "echo hello".to_string()],
            None,
            Duration::from_secs(5),
        )
        .await
        .expect("run sh");
        assert_eq!(ok.stdout.trim(), "hello");

        let error = run_tool(
            &sh,
            &["-c".to_string(), "echo boom >&2; exit 3".to_string()],
            None,
            Duration::from_secs(5),
        )
        .await
        .expect_err("non-zero exit");
        assert!(error.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn writes_artifact_reference_file() {
        let dir = std::env::temp_dir().join(format!(
            "coverport_tools_test_{}",
            std::process::id()
        ));
        let path = dir.join("nested").join("ref.txt");
        write_artifact_ref(&path, "quay.io/org/cov:t").await.expect("write");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read"),
            "quay.io/org/cov:t"
        );
        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
    }

    #[test]
    fn artifact_entries_skip_hidden_files() {
        let dir = std::env::temp_dir().join(format!(
            "coverport_entries_test_{}",
            std::process::id()
        ));
        std::fs::create_dir_all(dir.join("api")).expect("mkdir");
        std::fs::write(dir.join("metadata.json"), "{}").expect("write");
        std::fs::write(dir.join(".DS_Store"), "").expect("write");
        assert_eq!(
            artifact_entries(&dir).expect("entries"),
            vec!["api".to_string(), "metadata.json".to_string()]
        );
        std::fs::remove_dir_all(&dir).expect("cleanup temp dir");
    }
}
