//! Argument building for the codecov uploader CLI.

use std::path::PathBuf;

/// Everything needed for one upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadRequest {
    /// Upload token.
    pub token: String,
    /// Coverage file to upload.
    pub coverage_file: PathBuf,
    /// Commit the coverage belongs to.
    pub commit_sha: String,
    /// Branch, when known.
    pub branch: Option<String>,
    /// `owner/repo` slug.
    pub slug: Option<String>,
    /// Git hosting service identifier.
    pub git_service: Option<String>,
    /// Upload flags.
    pub flags: Vec<String>,
    /// Upload name.
    pub name: Option<String>,
}

impl UploadRequest {
    /// Command-line arguments for `codecov`.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "upload-coverage".to_string(),
            "-t".to_string(),
            self.token.clone(),
            "-f".to_string(),
            self.coverage_file.display().to_string(),
            "--sha".to_string(),
            self.commit_sha.clone(),
            "--disable-search".to_string(),
        ];
        let optional = [
            ("--slug", &self.slug),
            ("--git-service", &self.git_service),
            ("--branch", &self.branch),
        ];
        for (flag, value) in optional {
            if let Some(value) = value.as_deref().filter(|value| !value.is_empty()) {
                args.push(flag.to_string());
                args.push(value.to_string());
            }
        }
        for flag in self.flags.iter().filter(|flag| !flag.is_empty()) {
            args.push("--flag".to_string());
            args.push(flag.clone());
        }
        if let Some(name) = self.name.as_deref().filter(|name| !name.is_empty()) {
            args.push("--name".to_string());
            args.push(name.to_string());
        }
        args
    }

    /// Arguments with the token masked, for logging.
    pub fn redacted_args(&self) -> Vec<String> {
        let mut args = self.args();
        if let Some(index) = args.iter().position(|arg| arg == "-t") {
            if let Some(token) = args.get_mut(index + 1) {
                *token = "***".to_string();
            }
        }
        args
    }
}

/// `owner/repo` slug from an HTTPS or SSH repository URL.
pub fn repo_slug(url: &str) -> Option<String> {
    let mut rest = url.trim().trim_end_matches('/');
    rest = rest.strip_suffix(".git").unwrap_or(rest);
    for prefix in ["https://", "http://", "ssh://", "git@"] {
        rest = rest.strip_prefix(prefix).unwrap_or(rest);
    }
    let normalized = rest.replacen(':', "/", 1);
    let parts: Vec<&str> = normalized.split('/').filter(|part| !part.is_empty()).collect();
    match parts.as_slice() {
        [.., owner, repo] if parts.len() >= 3 => Some(format!("{owner}/{repo}")),
        _ => None,
    }
}

/// Git hosting service identifier understood by the uploader.
pub fn git_service(url: &str) -> &'static str {
    let url = url.to_lowercase();
    if url.contains("github.com") {
        "github"
    } else if url.contains("gitlab.com") {
        "gitlab"
    } else if url.contains("bitbucket.org") {
        "bitbucket"
    } else if url.contains("github") {
        "github_enterprise"
    } else if url.contains("gitlab") {
        "gitlab_enterprise"
    } else if url.contains("bitbucket") {
        "bitbucket_server"
    } else {
        "github"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_from_common_url_shapes() {
        assert_eq!(
            repo_slug("https://github.com/org/app").as_deref(),
            Some("org/app")
        );
        assert_eq!(
            repo_slug("https://github.com/org/app.git").as_deref(),
            Some("org/app")
        );
        assert_eq!(
            repo_slug("git@github.com:org/app.git").as_deref(),
            Some("org/app")
        );
        assert_eq!(
            repo_slug("ssh://git@gitlab.example.com/group/sub/app").as_deref(),
            Some("sub/app")
        );
        assert_eq!(repo_slug("app"), None);
    }

    #[test]
    fn git_service_detection() {
        assert_eq!(git_service("https://github.com/org/app"), "github");
        assert_eq!(git_service("https://GitLab.com/org/app"), "gitlab");
        assert_eq!(git_service("https://bitbucket.org/org/app"), "bitbucket");
        assert_eq!(git_service("https://github.corp.net/org/app"), "github_enterprise");
        assert_eq!(git_service("https://gitlab.corp.net/org/app"), "gitlab_enterprise");
        assert_eq!(git_service("https://bitbucket.corp.net/org/app"), "bitbucket_server");
        assert_eq!(git_service("https://git.example.com/org/app"), "github");
    }

    #[test]
    fn builds_upload_arguments() {
        let request = UploadRequest {
            token: "secret".to_string(),
            coverage_file: PathBuf::from("/work/repo/coverage.out"),
            commit_sha: "abc123".to_string(),
            branch: Some("main".to_string()),
            slug: Some("org/app".to_string()),
            git_service: Some("github".to_string()),
            flags: vec!["e2e-tests".to_string(), "integration".to_string()],
            name: None,
        };
        assert_eq!(
            request.args(),
            vec![
                "upload-coverage",
                "-t",
                "secret",
                "-f",
                "/work/repo/coverage.out",
                "--sha",
                "abc123",
                "--disable-search",
                "--slug",
                "org/app",
                "--git-service",
                "github",
                "--branch",
                "main",
                "--flag",
                "e2e-tests",
                "--flag",
                "integration",
            ]
        );
        assert!(!request.redacted_args().contains(&"secret".to_string()));
    }
}
