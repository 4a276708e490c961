//! Image reference and workload naming rules used during discovery.

use std::collections::BTreeMap;

/// Namespaces never searched when no namespace is given.
pub const SYSTEM_NAMESPACES: &[&str] = &["kube-system", "kube-public", "kube-node-lease", "default"];

/// Namespace prefix reserved for platform components.
pub const SYSTEM_NAMESPACE_PREFIX: &str = "openshift";

/// Labels consulted, in order, for a workload's component name.
pub const COMPONENT_LABELS: &[&str] = &[
    "app.kubernetes.io/name",
    "app",
    "app.kubernetes.io/component",
];

/// Strip the tag or digest from an image reference.
///
/// `quay.io/org/app:v1`, `quay.io/org/app@sha256:abc` and `quay.io/org/app`
/// all normalize to `quay.io/org/app`. A registry port is left alone.
pub fn normalize_image_ref(image: &str) -> String {
    let image = image.trim();
    if let Some(at) = image.find('@') {
        return image[..at].to_string();
    }
    match image.rfind(':') {
        Some(colon) if !image[colon..].contains('/') => image[..colon].to_string(),
        _ => image.to_string(),
    }
}

/// Whether two image references name the same repository.
pub fn images_match(left: &str, right: &str) -> bool {
    normalize_image_ref(left) == normalize_image_ref(right)
}

/// Last path segment of an image reference, without tag or digest.
pub fn image_basename(image: &str) -> String {
    let normalized = normalize_image_ref(image);
    normalized
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Whether a namespace belongs to the platform rather than to workloads.
pub fn is_system_namespace(namespace: &str) -> bool {
    SYSTEM_NAMESPACES.contains(&namespace) || namespace.starts_with(SYSTEM_NAMESPACE_PREFIX)
}

/// Derive a component name from workload labels, falling back to the image.
pub fn component_name_from_labels(labels: &BTreeMap<String, String>, image: &str) -> String {
    COMPONENT_LABELS
        .iter()
        .filter_map(|key| labels.get(*key))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| image_basename(image))
}
