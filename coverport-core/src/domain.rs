//! Domain entities for coverport.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoverportError, Result};

/// Coverage representations understood by the converters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoverageFormat {
    /// Binary metadata + counter files, converted by an external tool.
    #[serde(rename = "counters-binary", alias = "go")]
    CountersBinary,
    /// Istanbul-style statement/function/branch JSON.
    #[serde(rename = "statement-json", alias = "nyc")]
    StatementJson,
}

impl CoverageFormat {
    /// Stable identifier used in manifests and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CountersBinary => "counters-binary",
            Self::StatementJson => "statement-json",
        }
    }
}

impl fmt::Display for CoverageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoverageFormat {
    type Err = CoverportError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_lowercase().as_str() {
            "counters-binary" | "go" => Ok(Self::CountersBinary),
            "statement-json" | "nyc" | "istanbul" => Ok(Self::StatementJson),
            other => Err(CoverportError::Configuration(format!(
                "unsupported coverage format: {other}"
            ))),
        }
    }
}

/// A component declared by a snapshot manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredComponent {
    /// Declared component name.
    pub name: String,
    /// Container image reference for the component.
    pub image_ref: String,
}

/// How the targets of a collection run are discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetDescriptor {
    /// Running workloads whose containers use one of these images.
    ByImage {
        /// Image references, with or without tag/digest.
        image_refs: Vec<String>,
    },
    /// Running workloads matching a label selector.
    ByLabelSelector {
        /// Namespace to search.
        namespace: String,
        /// Kubernetes label selector expression.
        selector: String,
    },
    /// Workloads looked up by name.
    ByExplicitName {
        /// Namespace holding the workloads.
        namespace: String,
        /// Workload names.
        names: Vec<String>,
    },
    /// Components listed in a snapshot manifest.
    BySnapshot {
        /// Declared components.
        components: Vec<DeclaredComponent>,
    },
    /// A coverage endpoint reached directly over HTTP.
    ByUrl {
        /// Base URL of the coverage server.
        url: String,
    },
}

impl TargetDescriptor {
    /// Short label for the discovery method.
    pub fn method(&self) -> &'static str {
        match self {
            Self::ByImage { .. } => "images",
            Self::ByLabelSelector { .. } => "label-selector",
            Self::ByExplicitName { .. } => "pods",
            Self::BySnapshot { .. } => "snapshot",
            Self::ByUrl { .. } => "url",
        }
    }
}

/// Where a resolved target can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetLocation {
    /// A pod reached through a tunnel.
    Cluster {
        /// Pod namespace.
        namespace: String,
        /// Pod name.
        pod_name: String,
        /// Container running the instrumented process.
        container_name: Option<String>,
    },
    /// An endpoint reached directly.
    Direct {
        /// Base URL of the coverage server.
        endpoint_url: String,
    },
}

/// A concrete, addressable collection target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTarget {
    /// Human-readable identity used in logs and summaries.
    pub display_name: String,
    /// Directory-safe component identifier.
    pub component_name: String,
    /// Container image reference, when known.
    pub image: Option<String>,
    /// How the target is reached.
    pub location: TargetLocation,
}

impl ResolvedTarget {
    /// Create a target for a pod in the cluster.
    pub fn cluster(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        container_name: Option<String>,
        component_name: &str,
        image: Option<String>,
    ) -> Self {
        let namespace = namespace.into();
        let pod_name = pod_name.into();
        Self {
            display_name: format!("{namespace}/{pod_name}"),
            component_name: component_dir_name(component_name),
            image,
            location: TargetLocation::Cluster {
                namespace,
                pod_name,
                container_name,
            },
        }
    }

    /// Create a target for an endpoint reached directly.
    pub fn direct(endpoint_url: impl Into<String>, component_name: &str) -> Self {
        let endpoint_url = endpoint_url.into();
        Self {
            display_name: endpoint_url.clone(),
            component_name: component_dir_name(component_name),
            image: None,
            location: TargetLocation::Direct { endpoint_url },
        }
    }

    /// Pod namespace for cluster targets.
    pub fn namespace(&self) -> Option<&str> {
        match &self.location {
            TargetLocation::Cluster { namespace, .. } => Some(namespace),
            TargetLocation::Direct { .. } => None,
        }
    }

    /// Pod name for cluster targets.
    pub fn pod_name(&self) -> Option<&str> {
        match &self.location {
            TargetLocation::Cluster { pod_name, .. } => Some(pod_name),
            TargetLocation::Direct { .. } => None,
        }
    }

    /// Container name for cluster targets.
    pub fn container_name(&self) -> Option<&str> {
        match &self.location {
            TargetLocation::Cluster { container_name, .. } => container_name.as_deref(),
            TargetLocation::Direct { .. } => None,
        }
    }

    /// Endpoint URL for direct targets.
    pub fn endpoint_url(&self) -> Option<&str> {
        match &self.location {
            TargetLocation::Direct { endpoint_url } => Some(endpoint_url),
            TargetLocation::Cluster { .. } => None,
        }
    }
}

/// A named file carried alongside a coverage payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadFile {
    /// File name as reported by the target.
    pub name: String,
    /// Decoded file contents.
    pub data: Vec<u8>,
}

/// Raw coverage captured from a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoveragePayload {
    /// Collection label sent with the request.
    pub label: String,
    /// When the payload was received.
    pub captured_at: DateTime<Utc>,
    /// Format of the decoded data.
    pub format: CoverageFormat,
    /// Decoded `coverage_data` bytes.
    pub raw: Vec<u8>,
    /// Extra counter-format files (metadata and counters).
    pub files: Vec<PayloadFile>,
}

/// Turn a component name into a directory-safe identifier.
pub fn component_dir_name(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '-'
            }
        })
        .collect();
    let sanitized = sanitized.trim_matches(|ch| ch == '.' || ch == '-');
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_dir_name_replaces_unsafe_characters() {
        assert_eq!(component_dir_name("frontend"), "frontend");
        assert_eq!(component_dir_name("my app/v2"), "my-app-v2");
        assert_eq!(component_dir_name("../etc"), "etc");
        assert_eq!(component_dir_name("  "), "unknown");
    }

    #[test]
    fn format_parses_aliases() {
        assert_eq!(
            "go".parse::<CoverageFormat>().expect("go"),
            CoverageFormat::CountersBinary
        );
        assert_eq!(
            "NYC".parse::<CoverageFormat>().expect("nyc"),
            CoverageFormat::StatementJson
        );
        assert!("python".parse::<CoverageFormat>().is_err());
    }

    #[test]
    fn format_serializes_with_stable_names() {
        let json = serde_json::to_string(&CoverageFormat::StatementJson).expect("json");
        assert_eq!(json, "\"statement-json\"");
        let parsed: CoverageFormat = serde_json::from_str("\"go\"").expect("alias");
        assert_eq!(parsed, CoverageFormat::CountersBinary);
    }

    #[test]
    fn cluster_and_direct_targets_expose_one_identity() {
        let pod = ResolvedTarget::cluster(
            "team",
            "api-0",
            Some("api".to_string()),
            "api",
            Some("quay.io/org/api:v1".to_string()),
        );
        assert_eq!(pod.display_name, "team/api-0");
        assert_eq!(pod.namespace(), Some("team"));
        assert_eq!(pod.container_name(), Some("api"));
        assert_eq!(pod.endpoint_url(), None);

        let direct = ResolvedTarget::direct("http://localhost:9095", "direct-url");
        assert_eq!(direct.endpoint_url(), Some("http://localhost:9095"));
        assert_eq!(direct.pod_name(), None);
        assert_eq!(direct.component_name, "direct-url");
    }
}
