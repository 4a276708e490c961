//! Turn discovery requests into concrete collection targets.

use crate::cluster::{ClusterApi, Workload};
use crate::transport::parse_endpoint;
use coverport_core::image::{component_name_from_labels, images_match, is_system_namespace};
use coverport_core::{
    CoverportError, DeclaredComponent, ResolvedTarget, Result, TargetDescriptor,
};
use log::{debug, info, warn};

/// Component name used for targets reached by URL.
pub(crate) const DIRECT_COMPONENT: &str = "direct-url";

/// Resolve a descriptor against the cluster.
///
/// `namespace_hint` narrows image searches; label and name lookups require it.
pub(crate) async fn resolve(
    cluster: &dyn ClusterApi,
    descriptor: &TargetDescriptor,
    namespace_hint: Option<&str>,
) -> Result<Vec<ResolvedTarget>> {
    let namespace_hint = namespace_hint.map(str::trim).filter(|ns| !ns.is_empty());
    let targets = match descriptor {
        TargetDescriptor::ByUrl { url } => {
            parse_endpoint(url)?;
            vec![ResolvedTarget::direct(url.trim(), DIRECT_COMPONENT)]
        }
        TargetDescriptor::ByImage { image_refs } => {
            let wanted: Vec<DeclaredComponent> = image_refs
                .iter()
                .map(|image| DeclaredComponent {
                    name: String::new(),
                    image_ref: image.clone(),
                })
                .collect();
            resolve_images(cluster, &wanted, namespace_hint).await?
        }
        TargetDescriptor::BySnapshot { components } => {
            resolve_images(cluster, components, namespace_hint).await?
        }
        TargetDescriptor::ByLabelSelector {
            namespace,
            selector,
        } => resolve_selector(cluster, require_namespace(namespace, "label selector")?, selector).await?,
        TargetDescriptor::ByExplicitName { namespace, names } => {
            resolve_names(cluster, require_namespace(namespace, "pod names")?, names).await?
        }
    };
    info!(
        "resolved {} target(s) by {}",
        targets.len(),
        descriptor.method()
    );
    Ok(targets)
}

fn require_namespace<'a>(namespace: &'a str, method: &str) -> Result<&'a str> {
    let namespace = namespace.trim();
    if namespace.is_empty() {
        return Err(CoverportError::Configuration(format!(
            "--namespace is required when using {method}"
        )));
    }
    Ok(namespace)
}

/// Match running containers against wanted images. A declared component
/// name wins over the workload labels.
async fn resolve_images(
    cluster: &dyn ClusterApi,
    wanted: &[DeclaredComponent],
    namespace_hint: Option<&str>,
) -> Result<Vec<ResolvedTarget>> {
    let namespaces = match namespace_hint {
        Some(namespace) => vec![namespace.to_string()],
        None => cluster
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|namespace| !is_system_namespace(namespace))
            .collect(),
    };
    debug!("searching namespaces: {}", namespaces.join(", "));

    let mut targets = Vec::new();
    for namespace in &namespaces {
        let workloads = match cluster.list_pods(namespace, None).await {
            Ok(workloads) => workloads,
            Err(err) => {
                warn!("failed to list pods in namespace {namespace}: {err}");
                continue;
            }
        };
        for workload in workloads.iter().filter(|workload| workload.is_running()) {
            for container in &workload.containers {
                let Some(declared) = wanted
                    .iter()
                    .find(|declared| images_match(&container.image, &declared.image_ref))
                else {
                    continue;
                };
                let component = if declared.name.trim().is_empty() {
                    component_name_from_labels(&workload.labels, &declared.image_ref)
                } else {
                    declared.name.clone()
                };
                targets.push(ResolvedTarget::cluster(
                    workload_namespace(workload, namespace),
                    &workload.name,
                    Some(container.name.clone()),
                    &component,
                    Some(declared.image_ref.clone()),
                ));
            }
        }
    }
    Ok(targets)
}

async fn resolve_selector(
    cluster: &dyn ClusterApi,
    namespace: &str,
    selector: &str,
) -> Result<Vec<ResolvedTarget>> {
    let workloads = cluster.list_pods(namespace, Some(selector)).await?;
    Ok(workloads
        .iter()
        .filter(|workload| workload.is_running())
        .map(|workload| first_container_target(workload, namespace))
        .collect())
}

async fn resolve_names(
    cluster: &dyn ClusterApi,
    namespace: &str,
    names: &[String],
) -> Result<Vec<ResolvedTarget>> {
    let mut targets = Vec::new();
    for name in names.iter().map(|name| name.trim()).filter(|name| !name.is_empty()) {
        let workload = cluster.get_pod(namespace, name).await?;
        if !workload.is_running() {
            warn!(
                "pod {namespace}/{name} is not running (phase: {}), skipping",
                workload.phase
            );
            continue;
        }
        targets.push(first_container_target(&workload, namespace));
    }
    Ok(targets)
}

fn first_container_target(workload: &Workload, namespace: &str) -> ResolvedTarget {
    let container = workload.containers.first();
    let image = container.map(|container| container.image.clone());
    let component = component_name_from_labels(&workload.labels, image.as_deref().unwrap_or(""));
    ResolvedTarget::cluster(
        workload_namespace(workload, namespace),
        &workload.name,
        container.map(|container| container.name.clone()),
        &component,
        image,
    )
}

fn workload_namespace(workload: &Workload, fallback: &str) -> String {
    if workload.namespace.is_empty() {
        fallback.to_string()
    } else {
        workload.namespace.clone()
    }
}
