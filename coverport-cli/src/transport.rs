//! Coverage endpoint protocol and per-target sessions.

use crate::cluster::{ClusterApi, Tunnel};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use coverport_core::{
    CoverageFormat, CoveragePayload, CoverportError, PayloadFile, ResolvedTarget, Result,
    TargetLocation,
};
use log::{debug, info};
use reqwest::{Client, Url};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Port the coverage server listens on inside the workload.
pub(crate) const DEFAULT_COVERAGE_PORT: u16 = 9095;
pub(crate) const DEFAULT_LIVENESS_ATTEMPTS: u32 = 5;
pub(crate) const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Settings shared by every session of a run.
#[derive(Debug, Clone)]
pub(crate) struct TransportConfig {
    pub remote_port: u16,
    pub timeout: Duration,
    pub liveness_attempts: u32,
    pub liveness_interval: Duration,
    pub format: CoverageFormat,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            remote_port: DEFAULT_COVERAGE_PORT,
            timeout: Duration::from_secs(120),
            liveness_attempts: DEFAULT_LIVENESS_ATTEMPTS,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            format: CoverageFormat::CountersBinary,
        }
    }
}

/// `GET /health` response body.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub(crate) struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub coverage_enabled: bool,
}

impl HealthStatus {
    fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// `GET /coverage` response body.
#[derive(Debug, Deserialize)]
struct CoverageResponse {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default)]
    coverage_data: String,
    #[serde(default)]
    meta_filename: Option<String>,
    #[serde(default)]
    meta_data: Option<String>,
    #[serde(default)]
    counters_filename: Option<String>,
    #[serde(default)]
    counters_data: Option<String>,
}

/// An open channel to one target's coverage endpoint.
pub(crate) trait CoverageSession: Send + Sync {
    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<HealthStatus>> + Send + 'a>>;

    fn reset<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    fn collect<'a>(
        &'a self,
        label: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CoveragePayload>> + Send + 'a>>;

    /// Tear the session down, closing any tunnel.
    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>>;
}

/// Opens sessions for resolved targets.
pub(crate) trait SessionOpener: Send + Sync {
    fn open<'a>(
        &'a self,
        target: &'a ResolvedTarget,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn CoverageSession>>> + Send + 'a>>;
}

/// Async sleep abstraction for liveness polling tests.
pub(crate) trait Sleeper: Send + Sync {
    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Tokio-backed sleeper used in production.
pub(crate) struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep<'a>(&'a self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Session speaking the coverage protocol over HTTP.
pub(crate) struct HttpSession {
    client: Client,
    base: Url,
    format: CoverageFormat,
    tunnel: Option<Tunnel>,
}

impl HttpSession {
    pub(crate) fn connect(
        base_url: &str,
        config: &TransportConfig,
        tunnel: Option<Tunnel>,
    ) -> Result<Self> {
        let base = parse_endpoint(base_url)?;
        let client = Client::builder()
            .user_agent(concat!("coverport/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base,
            format: config.format,
            tunnel,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|err| CoverportError::Configuration(format!("invalid endpoint path {path}: {err}")))
    }

    async fn fetch_health(&self) -> Result<HealthStatus> {
        let response = self
            .client
            .get(self.endpoint("health")?)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;
        response.json::<HealthStatus>().await.map_err(transport_error)
    }

    async fn post_reset(&self) -> Result<()> {
        self.client
            .post(self.endpoint("coverage/reset")?)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;
        Ok(())
    }

    async fn fetch_coverage(&self, label: &str) -> Result<CoveragePayload> {
        let mut url = self.endpoint("coverage")?;
        url.query_pairs_mut().append_pair("name", label);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(transport_error)?
            .error_for_status()
            .map_err(transport_error)?;
        let body = response.bytes().await.map_err(transport_error)?;
        let response: CoverageResponse = serde_json::from_slice(&body)
            .map_err(|err| CoverportError::Payload(format!("invalid coverage response: {err}")))?;
        decode_payload(response, label, self.format)
    }
}

impl CoverageSession for HttpSession {
    fn health<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<HealthStatus>> + Send + 'a>> {
        Box::pin(self.fetch_health())
    }

    fn reset<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.post_reset())
    }

    fn collect<'a>(
        &'a self,
        label: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<CoveragePayload>> + Send + 'a>> {
        Box::pin(self.fetch_coverage(label))
    }

    fn close(self: Box<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            if let Some(tunnel) = self.tunnel {
                tunnel.close().await;
            }
        })
    }
}

/// Opens tunnelled sessions for pods and direct sessions for URLs.
pub(crate) struct ClusterSessionOpener {
    cluster: Arc<dyn ClusterApi>,
    sleeper: Arc<dyn Sleeper>,
    config: TransportConfig,
}

impl ClusterSessionOpener {
    pub(crate) fn new(
        cluster: Arc<dyn ClusterApi>,
        sleeper: Arc<dyn Sleeper>,
        config: TransportConfig,
    ) -> Self {
        Self {
            cluster,
            sleeper,
            config,
        }
    }

    async fn open_target(&self, target: &ResolvedTarget) -> Result<Box<dyn CoverageSession>> {
        match &target.location {
            TargetLocation::Direct { endpoint_url } => {
                debug!("connecting directly to {endpoint_url}");
                Ok(Box::new(HttpSession::connect(endpoint_url, &self.config, None)?))
            }
            TargetLocation::Cluster {
                namespace,
                pod_name,
                ..
            } => {
                let tunnel = self
                    .cluster
                    .open_tunnel(namespace, pod_name, self.config.remote_port)
                    .await?;
                let base_url = tunnel.local_url();
                info!("{}: tunnel open on {base_url}", target.display_name);
                let session = HttpSession::connect(&base_url, &self.config, Some(tunnel))?;
                if let Err(err) = wait_until_live(
                    &session,
                    self.sleeper.as_ref(),
                    self.config.liveness_attempts,
                    self.config.liveness_interval,
                )
                .await
                {
                    Box::new(session).close().await;
                    return Err(err);
                }
                Ok(Box::new(session))
            }
        }
    }
}

impl SessionOpener for ClusterSessionOpener {
    fn open<'a>(
        &'a self,
        target: &'a ResolvedTarget,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn CoverageSession>>> + Send + 'a>> {
        Box::pin(self.open_target(target))
    }
}

/// Poll the liveness probe until it answers `ok` or the attempts run out.
pub(crate) async fn wait_until_live<S: CoverageSession + ?Sized>(
    session: &S,
    sleeper: &dyn Sleeper,
    attempts: u32,
    interval: Duration,
) -> Result<()> {
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match session.health().await {
            Ok(health) if health.is_ok() => {
                if !health.coverage_enabled {
                    debug!("coverage server reports coverage_enabled=false");
                }
                return Ok(());
            }
            Ok(health) => last_error = format!("health status {:?}", health.status),
            Err(err) => last_error = err.to_string(),
        }
        debug!("liveness attempt {attempt}/{attempts} failed: {last_error}");
        if attempt < attempts {
            sleeper.sleep(interval).await;
        }
    }
    Err(CoverportError::Unreachable(format!(
        "no healthy response after {attempts} attempt(s): {last_error}"
    )))
}

fn decode_payload(
    response: CoverageResponse,
    label: &str,
    format: CoverageFormat,
) -> Result<CoveragePayload> {
    if let Some(timestamp) = &response.timestamp {
        debug!("coverage snapshot taken at {timestamp}");
    }
    let raw = decode_base64("coverage_data", &response.coverage_data)?;
    let mut files = Vec::new();
    let named = [
        (response.meta_filename, response.meta_data),
        (response.counters_filename, response.counters_data),
    ];
    for (name, data) in named {
        if let (Some(name), Some(data)) = (name, data) {
            if name.trim().is_empty() {
                continue;
            }
            let data = decode_base64(&name, &data)?;
            files.push(PayloadFile { name, data });
        }
    }
    if raw.is_empty() && files.is_empty() {
        return Err(CoverportError::Payload(
            "coverage response carried no data".to_string(),
        ));
    }
    let format = if files.is_empty() {
        format
    } else {
        CoverageFormat::CountersBinary
    };
    Ok(CoveragePayload {
        label: response.label.unwrap_or_else(|| label.to_string()),
        captured_at: Utc::now(),
        format,
        raw,
        files,
    })
}

fn decode_base64(field: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|err| CoverportError::Payload(format!("{field} is not valid base64: {err}")))
}

/// Validate a coverage endpoint URL and make it a joinable base.
pub(crate) fn parse_endpoint(value: &str) -> Result<Url> {
    let mut url = Url::parse(value.trim())
        .map_err(|err| CoverportError::Configuration(format!("invalid URL {value:?}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(CoverportError::Configuration(format!(
            "coverage URL must be http(s) with a host: {value}"
        )));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn transport_error(err: reqwest::Error) -> CoverportError {
    CoverportError::Transport(err.to_string())
}
