//! Kubernetes access through `kubectl`.

use coverport_core::{CoverportError, Result};
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

const RUNNING_PHASE: &str = "Running";

/// A container declared by a pod spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerInfo {
    pub name: String,
    pub image: String,
}

/// The parts of a pod that discovery looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Workload {
    pub namespace: String,
    pub name: String,
    pub phase: String,
    pub labels: BTreeMap<String, String>,
    pub containers: Vec<ContainerInfo>,
}

impl Workload {
    pub(crate) fn is_running(&self) -> bool {
        self.phase == RUNNING_PHASE
    }
}

/// Cluster operations used by discovery and the transport.
pub(crate) trait ClusterApi: Send + Sync {
    fn list_namespaces<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;

    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Workload>>> + Send + 'a>>;

    fn get_pod<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Workload>> + Send + 'a>>;

    /// Forward an ephemeral local port to `remote_port` on a pod.
    fn open_tunnel<'a>(
        &'a self,
        namespace: &'a str,
        pod: &'a str,
        remote_port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<Tunnel>> + Send + 'a>>;
}

/// A live port-forward. Dropping it kills the forwarding process.
#[derive(Debug)]
pub(crate) struct Tunnel {
    local_port: u16,
    child: Option<Child>,
}

impl Tunnel {
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn detached(local_port: u16) -> Self {
        Self {
            local_port,
            child: None,
        }
    }

    pub(crate) fn local_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.local_port)
    }

    pub(crate) async fn close(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = child.kill().await {
                debug!("port-forward already exited: {err}");
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ItemList<T> {
    #[serde(default)]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct NamespaceItem {
    metadata: ObjectMeta,
}

#[derive(Deserialize)]
struct PodItem {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: PodSpec,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Deserialize, Default)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Default)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<ContainerSpec>,
}

#[derive(Deserialize)]
struct ContainerSpec {
    name: String,
    #[serde(default)]
    image: String,
}

#[derive(Deserialize, Default)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

impl From<PodItem> for Workload {
    fn from(pod: PodItem) -> Self {
        Self {
            namespace: pod.metadata.namespace,
            name: pod.metadata.name,
            phase: pod.status.phase,
            labels: pod.metadata.labels,
            containers: pod
                .spec
                .containers
                .into_iter()
                .map(|container| ContainerInfo {
                    name: container.name,
                    image: container.image,
                })
                .collect(),
        }
    }
}

/// [`ClusterApi`] that shells out to `kubectl`.
#[derive(Debug, Clone)]
pub(crate) struct KubectlClient {
    program: PathBuf,
    timeout: Duration,
}

impl KubectlClient {
    pub(crate) fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    async fn get_json(&self, args: &[&str]) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command.args(args).arg("-o").arg("json").kill_on_drop(true);
        debug!("running {} {}", self.program.display(), args.join(" "));
        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                CoverportError::Resolution(format!(
                    "kubectl {} timed out after {}s",
                    args.join(" "),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| {
                CoverportError::Resolution(format!("failed to run kubectl: {err}"))
            })?;
        if !output.status.success() {
            return Err(CoverportError::Resolution(format!(
                "kubectl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn namespaces(&self) -> Result<Vec<String>> {
        let stdout = self.get_json(&["get", "namespaces"]).await?;
        let list: ItemList<NamespaceItem> = parse_kubectl(&stdout)?;
        Ok(list.items.into_iter().map(|item| item.metadata.name).collect())
    }

    async fn pods(&self, namespace: &str, selector: Option<&str>) -> Result<Vec<Workload>> {
        let mut args = vec!["get", "pods", "-n", namespace];
        if let Some(selector) = selector {
            args.push("-l");
            args.push(selector);
        }
        let stdout = self.get_json(&args).await?;
        let list: ItemList<PodItem> = parse_kubectl(&stdout)?;
        Ok(list.items.into_iter().map(Workload::from).collect())
    }

    async fn pod(&self, namespace: &str, name: &str) -> Result<Workload> {
        let stdout = self.get_json(&["get", "pod", name, "-n", namespace]).await?;
        let pod: PodItem = parse_kubectl(&stdout)?;
        Ok(pod.into())
    }

    async fn port_forward(&self, namespace: &str, pod: &str, remote_port: u16) -> Result<Tunnel> {
        let mut child = Command::new(&self.program)
            .arg("port-forward")
            .arg("-n")
            .arg(namespace)
            .arg(format!("pod/{pod}"))
            .arg(format!(":{remote_port}"))
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| CoverportError::TunnelSetup(format!("spawn port-forward: {err}")))?;
        let stdout = child.stdout.take().ok_or_else(|| {
            CoverportError::TunnelSetup("port-forward stdout unavailable".to_string())
        })?;

        let mut lines = BufReader::new(stdout).lines();
        let wait_for_port = async {
            while let Some(line) = lines.next_line().await? {
                debug!("port-forward: {line}");
                if let Some(port) = parse_forwarded_port(&line) {
                    return Ok(Some(port));
                }
            }
            Ok::<_, std::io::Error>(None)
        };
        let local_port = match tokio::time::timeout(self.timeout, wait_for_port).await {
            Ok(Ok(Some(port))) => port,
            Ok(Ok(None)) => {
                return Err(CoverportError::TunnelSetup(format!(
                    "port-forward to {namespace}/{pod} exited before forwarding"
                )));
            }
            Ok(Err(err)) => {
                return Err(CoverportError::TunnelSetup(format!(
                    "read port-forward output: {err}"
                )));
            }
            Err(_) => {
                return Err(CoverportError::TunnelSetup(format!(
                    "port-forward to {namespace}/{pod} timed out"
                )));
            }
        };
        debug!("forwarding 127.0.0.1:{local_port} -> {namespace}/{pod}:{remote_port}");
        Ok(Tunnel {
            local_port,
            child: Some(child),
        })
    }
}

impl ClusterApi for KubectlClient {
    fn list_namespaces<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(self.namespaces())
    }

    fn list_pods<'a>(
        &'a self,
        namespace: &'a str,
        selector: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Workload>>> + Send + 'a>> {
        Box::pin(self.pods(namespace, selector))
    }

    fn get_pod<'a>(
        &'a self,
        namespace: &'a str,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Workload>> + Send + 'a>> {
        Box::pin(self.pod(namespace, name))
    }

    fn open_tunnel<'a>(
        &'a self,
        namespace: &'a str,
        pod: &'a str,
        remote_port: u16,
    ) -> Pin<Box<dyn Future<Output = Result<Tunnel>> + Send + 'a>> {
        Box::pin(self.port_forward(namespace, pod, remote_port))
    }
}

fn parse_kubectl<'de, T: Deserialize<'de>>(stdout: &'de [u8]) -> Result<T> {
    serde_json::from_slice(stdout)
        .map_err(|err| CoverportError::Resolution(format!("unexpected kubectl output: {err}")))
}

/// Local port from a `Forwarding from 127.0.0.1:N -> PORT` line.
fn parse_forwarded_port(line: &str) -> Option<u16> {
    let rest = line.trim().strip_prefix("Forwarding from ")?;
    let (address, _) = rest.split_once(" -> ")?;
    let (host, port) = address.rsplit_once(':')?;
    if host.contains("::") || host.starts_with('[') {
        return None;
    }
    port.parse().ok()
}
