//! Git metadata carried in build provenance attestations.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{CoverportError, Result};

const REPO_URL: &str = "pipelinesascode.tekton.dev/repo-url";
const COMMIT_SHA: &str = "build.appstudio.redhat.com/commit_sha";
const SOURCE_BRANCH: &str = "pipelinesascode.tekton.dev/source_branch";
const TAG: &str = "pipelinesascode.tekton.dev/tag";
const PULL_REQUEST: &[&str] = &[
    "pipelinesascode.tekton.dev/pull-request",
    "build.appstudio.redhat.com/pull_request_number",
];

/// Source coordinates of a built image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitMetadata {
    /// Repository URL.
    pub repo_url: String,
    /// Commit SHA.
    pub commit_sha: String,
    /// Source branch.
    pub branch: Option<String>,
    /// Tag.
    pub tag: Option<String>,
    /// Pull request number.
    pub pull_request: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Envelopes {
    Many(Vec<Envelope>),
    One(Envelope),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    payload: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Statement {
    predicate: Option<Predicate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Predicate {
    build_config: Option<BuildConfig>,
}

#[derive(Debug, Deserialize)]
struct BuildConfig {
    tasks: Option<Vec<Task>>,
}

#[derive(Debug, Deserialize)]
struct Task {
    invocation: Option<Invocation>,
}

#[derive(Debug, Deserialize)]
struct Invocation {
    environment: Option<Environment>,
}

#[derive(Debug, Deserialize)]
struct Environment {
    annotations: Option<BTreeMap<String, serde_json::Value>>,
}

fn missing(field: &str) -> CoverportError {
    CoverportError::Payload(format!("attestation field missing: {field}"))
}

/// Extract git metadata from `cosign download attestation` output.
pub fn parse_attestation(output: &str) -> Result<GitMetadata> {
    let envelope = match serde_json::from_str::<Envelopes>(output.trim())
        .map_err(|err| CoverportError::Payload(format!("invalid attestation JSON: {err}")))?
    {
        Envelopes::Many(items) => items.into_iter().next().ok_or_else(|| missing("envelope"))?,
        Envelopes::One(item) => item,
    };
    let payload = envelope.payload.ok_or_else(|| missing("payload"))?;
    let statement = decode_statement(&payload)?;

    let annotations = statement
        .predicate
        .ok_or_else(|| missing("predicate"))?
        .build_config
        .ok_or_else(|| missing("predicate.buildConfig"))?
        .tasks
        .and_then(|tasks| tasks.into_iter().next())
        .ok_or_else(|| missing("predicate.buildConfig.tasks[0]"))?
        .invocation
        .ok_or_else(|| missing("tasks[0].invocation"))?
        .environment
        .ok_or_else(|| missing("invocation.environment"))?
        .annotations
        .ok_or_else(|| missing("environment.annotations"))?;

    let text = |key: &str| {
        annotations
            .get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    let repo_url = text(REPO_URL).ok_or_else(|| missing(REPO_URL))?;
    let commit_sha = text(COMMIT_SHA).ok_or_else(|| missing(COMMIT_SHA))?;
    let branch = text(SOURCE_BRANCH);
    let pull_request = PULL_REQUEST
        .iter()
        .find_map(|key| text(*key))
        .or_else(|| branch.as_deref().and_then(pull_request_from_branch));

    Ok(GitMetadata {
        repo_url,
        commit_sha,
        branch,
        tag: text(TAG),
        pull_request,
    })
}

fn decode_statement(payload: &str) -> Result<Statement> {
    if let Ok(statement) = serde_json::from_str::<Statement>(payload) {
        return Ok(statement);
    }
    let decoded = STANDARD
        .decode(payload.trim())
        .map_err(|err| CoverportError::Payload(format!("attestation payload is not JSON or base64: {err}")))?;
    serde_json::from_slice(&decoded)
        .map_err(|err| CoverportError::Payload(format!("invalid attestation payload: {err}")))
}

/// Pull request number encoded in a branch name (`pull/<n>`, `pr-<n>`, `pr/<n>`).
pub fn pull_request_from_branch(branch: &str) -> Option<String> {
    let parts: Vec<&str> = branch.split('/').collect();
    if let Some(number) = parts
        .windows(2)
        .find(|pair| pair[0] == "pull")
        .map(|pair| pair[1])
        .filter(|number| is_numeric(number))
    {
        return Some(number.to_string());
    }
    ["pr-", "pr/"]
        .iter()
        .filter_map(|prefix| branch.strip_prefix(prefix))
        .find(|number| is_numeric(number))
        .map(str::to_string)
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(annotations: serde_json::Value) -> String {
        serde_json::json!({
            "predicate": {"buildConfig": {"tasks": [
                {"invocation": {"environment": {"annotations": annotations}}}
            ]}}
        })
        .to_string()
    }

    #[test]
    fn parses_array_envelope_with_json_payload() {
        let payload = statement(serde_json::json!({
            REPO_URL: "https://github.com/org/app",
            COMMIT_SHA: "abc123",
            SOURCE_BRANCH: "main",
            TAG: "v1.0.0",
        }));
        let output = serde_json::json!([{"payload": payload}]).to_string();
        let metadata = parse_attestation(&output).expect("parse");
        assert_eq!(metadata.repo_url, "https://github.com/org/app");
        assert_eq!(metadata.commit_sha, "abc123");
        assert_eq!(metadata.branch.as_deref(), Some("main"));
        assert_eq!(metadata.tag.as_deref(), Some("v1.0.0"));
        assert_eq!(metadata.pull_request, None);
    }

    #[test]
    fn parses_object_envelope_with_base64_payload() {
        let payload = STANDARD.encode(statement(serde_json::json!({
            REPO_URL: "https://gitlab.com/org/app.git",
            COMMIT_SHA: "def456",
            "pipelinesascode.tekton.dev/pull-request": "42",
        })));
        let output = serde_json::json!({"payloadType": "application/vnd.in-toto+json", "payload": payload})
            .to_string();
        let metadata = parse_attestation(&output).expect("parse");
        assert_eq!(metadata.commit_sha, "def456");
        assert_eq!(metadata.pull_request.as_deref(), Some("42"));
    }

    #[test]
    fn missing_fields_are_named() {
        let output = serde_json::json!({"payload": "{\"predicate\": {}}"}).to_string();
        let error = parse_attestation(&output).expect_err("missing build config");
        assert_eq!(
            error.to_string(),
            "malformed payload: attestation field missing: predicate.buildConfig"
        );

        let payload = statement(serde_json::json!({REPO_URL: "https://github.com/org/app"}));
        let output = serde_json::json!({"payload": payload}).to_string();
        let error = parse_attestation(&output).expect_err("missing commit");
        assert!(error.to_string().contains(COMMIT_SHA));

        assert!(parse_attestation("[]").is_err());
        assert!(parse_attestation("garbage").is_err());
    }

    #[test]
    fn pull_request_from_branch_patterns() {
        assert_eq!(pull_request_from_branch("pull/12/head").as_deref(), Some("12"));
        assert_eq!(
            pull_request_from_branch("refs/pull/7/merge").as_deref(),
            Some("7")
        );
        assert_eq!(pull_request_from_branch("pr-99").as_deref(), Some("99"));
        assert_eq!(pull_request_from_branch("pr/5").as_deref(), Some("5"));
        assert_eq!(pull_request_from_branch("pr-abc"), None);
        assert_eq!(pull_request_from_branch("main"), None);
    }
}
