// Copyright (c) 2026 Podhost Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation. Exposes the network, container,
//! and build engine services over the RPC surface
//! [`podhost_client::DaemonClient`] talks to.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use podhost_client::{BuildStageRequest, BuildStageResponse};
use podhost_core::application::build_scheduler::{BuildScheduler, ExecutionContext, OperationExecutor};
use podhost_core::application::container_service::ContainerService;
use podhost_core::application::network_allocator::{
    ContainerDirectory, InMemoryIpamPlugin, NetworkAllocatorPlugin, NetworkService,
};
use podhost_core::domain::config::NodeConfig;
use podhost_core::domain::container::{Container, ContainerConfig};
use podhost_core::domain::network::{
    Attachment, NetworkConfiguration, NetworkMode, NetworkState, DEFAULT_NETWORK,
};
use podhost_core::error::{ErrorKind, HasErrorKind};
use podhost_core::infrastructure::build_executor::ShellOperationExecutor;
use podhost_core::infrastructure::content_store::ContentStore;
use podhost_core::infrastructure::dns_server::DnsListenerManager;
use podhost_core::infrastructure::snapshotter::{FsSnapshotter, Snapshotter};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, Weak};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::{remove_pid_file, write_pid_file};

pub async fn start_daemon(config_path: Option<PathBuf>, port: u16) -> Result<()> {
    let pid = std::process::id();
    write_pid_file(pid)?;
    let _guard = PidFileGuard;

    info!(pid, "podhost daemon starting");

    let config = NodeConfig::load_or_default(config_path).context("failed to load configuration")?;
    info!(data_root = %config.data_root.display(), "configuration loaded");

    install_metrics_exporter(port);

    let state = Arc::new(build_state(&config).await.context("failed to initialize daemon state")?);

    start_dns_listeners(&state, &config).await;

    let app = create_router(state).layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "daemon listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("http server failed")?;

    info!("daemon shutting down");
    Ok(())
}

/// Resolves the `ContainerService`/`NetworkService` construction cycle:
/// `NetworkService` needs a [`ContainerDirectory`] at construction time,
/// but the only implementor is `ContainerService`, which itself needs
/// an already-built `Arc<NetworkService>`. This adapter is handed to
/// `NetworkService::new` before `ContainerService` exists and bound to
/// it (via a weak reference, so it doesn't keep `ContainerService` from
/// ever being dropped) immediately after.
struct DeferredContainerDirectory {
    containers: OnceLock<Weak<ContainerService>>,
}

impl DeferredContainerDirectory {
    fn new() -> Self {
        Self { containers: OnceLock::new() }
    }

    fn bind(&self, containers: &Arc<ContainerService>) {
        let _ = self.containers.set(Arc::downgrade(containers));
    }
}

#[async_trait]
impl ContainerDirectory for DeferredContainerDirectory {
    async fn attachments_for_network(&self, network_id: &str) -> Vec<Attachment> {
        match self.containers.get().and_then(Weak::upgrade) {
            Some(containers) => containers.attachments_for_network(network_id).await,
            None => Vec::new(),
        }
    }
}

struct AppState {
    networks: Arc<NetworkService>,
    containers: Arc<ContainerService>,
    builds: Arc<BuildScheduler>,
    dns: DnsListenerManager,
    start_time: std::time::Instant,
}

async fn build_state(config: &NodeConfig) -> Result<AppState> {
    let default_ipv4: ipnet::Ipv4Net =
        config.network.default_ipv4_cidr.parse().context("invalid network.default_ipv4_cidr")?;
    let default_ipv6: Option<ipnet::Ipv6Net> = config
        .network
        .default_ipv6_cidr
        .as_deref()
        .map(|s| s.parse())
        .transpose()
        .context("invalid network.default_ipv6_cidr")?;

    let directory = Arc::new(DeferredContainerDirectory::new());
    let networks = Arc::new(NetworkService::new(directory.clone(), move |cfg: &NetworkConfiguration| {
        let ipv4 = cfg.ipv4_cidr.unwrap_or(default_ipv4);
        let ipv6 = cfg.ipv6_cidr.or(default_ipv6);
        Arc::new(InMemoryIpamPlugin::new(ipv4, ipv6)) as Arc<dyn NetworkAllocatorPlugin>
    }));

    let containers = Arc::new(ContainerService::new(networks.clone()));
    directory.bind(&containers);

    bootstrap_default_network(&networks).await;

    let store = ContentStore::open(&config.data_root).context("failed to open content store")?;
    let snapshotter: Arc<dyn Snapshotter> = Arc::new(
        FsSnapshotter::new(&config.data_root, store.clone()).context("failed to initialize snapshotter")?,
    );
    let executor: Arc<dyn OperationExecutor> = Arc::new(ShellOperationExecutor::new(&config.data_root));
    let builds = Arc::new(BuildScheduler::new(snapshotter, store, executor));

    Ok(AppState { networks, containers, builds, dns: DnsListenerManager::new(), start_time: std::time::Instant::now() })
}

/// Every node has a `default` bridged network available before any
/// container is created.
async fn bootstrap_default_network(networks: &Arc<NetworkService>) {
    let config = NetworkConfiguration::new(DEFAULT_NETWORK, NetworkMode::Bridged, "podhost-ipam");
    if let Err(e) = networks.create(config).await {
        warn!(error = %e, "failed to bootstrap default network");
    }
}

async fn start_dns_listeners(state: &Arc<AppState>, config: &NodeConfig) {
    let resolver: Arc<dyn podhost_core::infrastructure::dns_server::Resolver> =
        Arc::new(podhost_core::application::container_service::ContainerDnsResolver::new(state.networks.clone()));
    for bind_addr in &config.dns.bind_addresses {
        if let Err(e) = state.dns.start(*bind_addr, resolver.clone()).await {
            warn!(%bind_addr, error = %e, "failed to start DNS listener");
        } else {
            info!(%bind_addr, "DNS listener started");
        }
    }
}

/// Build cache hit/miss counters and DNS connection/query gauges
/// are scraped from `:<api-port>+1000`, kept off the
/// main RPC port so a metrics scraper can't be confused with an API
/// client.
fn install_metrics_exporter(api_port: u16) {
    let addr: std::net::SocketAddr = ([0, 0, 0, 0], api_port.saturating_add(1000)).into();
    if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr).install() {
        warn!(error = %e, "failed to install prometheus metrics exporter");
    } else {
        info!(%addr, "prometheus metrics exporter listening");
    }
}

struct PidFileGuard;

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal"),
        _ = terminate => info!("received SIGTERM signal"),
    }
}

fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/networks", post(create_network_handler).get(list_networks_handler))
        .route(
            "/api/networks/{id}",
            get(inspect_network_handler).delete(delete_network_handler),
        )
        .route("/api/containers", post(create_container_handler).get(list_containers_handler))
        .route(
            "/api/containers/{id}",
            get(inspect_container_handler).delete(delete_container_handler),
        )
        .route("/api/containers/{id}/start", post(start_container_handler))
        .route("/api/containers/{id}/stop", post(stop_container_handler))
        .route("/api/containers/{id}/logs", get(container_logs_handler))
        .route("/api/containers/{id}/attach", get(attach_container_handler))
        .route("/api/builds", post(run_build_stage_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
    }))
}

fn error_response(kind: ErrorKind, message: String) -> (StatusCode, Json<serde_json::Value>) {
    let status = match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Exists | ErrorKind::InvalidState => StatusCode::CONFLICT,
        ErrorKind::InvalidArgument | ErrorKind::Unsupported => StatusCode::BAD_REQUEST,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal | ErrorKind::Corruption => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": message })))
}

fn domain_error<E: HasErrorKind + std::fmt::Display>(err: E) -> (StatusCode, Json<serde_json::Value>) {
    error_response(err.kind(), err.to_string())
}

// --- networks ------------------------------------------------------

async fn create_network_handler(
    State(state): State<Arc<AppState>>,
    Json(config): Json<NetworkConfiguration>,
) -> impl IntoResponse {
    match state.networks.create(config).await {
        Ok(net) => (StatusCode::CREATED, Json(net)).into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

async fn list_networks_handler(State(state): State<Arc<AppState>>) -> Json<Vec<NetworkState>> {
    Json(state.networks.list())
}

async fn inspect_network_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.networks.get(&id) {
        Some(net) => Json(net).into_response(),
        None => error_response(ErrorKind::NotFound, format!("network not found: {id}")).into_response(),
    }
}

async fn delete_network_handler(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> impl IntoResponse {
    match state.networks.delete(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

// --- containers ------------------------------------------------------

async fn create_container_handler(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ContainerConfig>,
) -> impl IntoResponse {
    match state.containers.create(config).await {
        Ok(container) => (StatusCode::CREATED, Json(container)).into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

async fn list_containers_handler(State(state): State<Arc<AppState>>) -> Json<Vec<Container>> {
    Json(state.containers.list().await)
}

async fn inspect_container_handler(State(state): State<Arc<AppState>>, Path(query): Path<String>) -> impl IntoResponse {
    match state.containers.inspect(&query).await {
        Ok(container) => Json(container).into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

async fn start_container_handler(State(state): State<Arc<AppState>>, Path(query): Path<String>) -> impl IntoResponse {
    match state.containers.start(&query).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ForceParam {
    #[serde(default)]
    force: bool,
}

async fn stop_container_handler(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<ForceParam>,
) -> impl IntoResponse {
    match state.containers.stop(&query, params.force).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

async fn delete_container_handler(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<ForceParam>,
) -> impl IntoResponse {
    match state.containers.delete(&query, params.force).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

async fn container_logs_handler(State(state): State<Arc<AppState>>, Path(query): Path<String>) -> impl IntoResponse {
    match state.containers.logs(&query).await {
        Ok(bytes) => bytes.into_response(),
        Err(e) => domain_error(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct NoHistoryParam {
    #[serde(default)]
    no_history: bool,
}

/// Streams history replay (unless `no_history`) followed by live
/// stdout until the client disconnects or the container's session
/// ends.
async fn attach_container_handler(
    State(state): State<Arc<AppState>>,
    Path(query): Path<String>,
    Query(params): Query<NoHistoryParam>,
) -> impl IntoResponse {
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt as _;

    let (history, _truncated, rx) = match state.containers.attach(&query).await {
        Ok(result) => result,
        Err(e) => return domain_error(e).into_response(),
    };

    let live = BroadcastStream::new(rx).filter_map(|item| item.ok()).map(Ok::<_, std::io::Error>);
    let stream: std::pin::Pin<Box<dyn futures::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send>> =
        if params.no_history {
            Box::pin(live)
        } else {
            Box::pin(futures::stream::once(async move { Ok::<_, std::io::Error>(history) }).chain(live))
        };

    Body::from_stream(stream).into_response()
}

// --- build engine ------------------------------------------------------

async fn run_build_stage_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BuildStageRequest>,
) -> impl IntoResponse {
    let ctx = ExecutionContext::new(request.base);
    let before = (state.builds.stats().hits(), state.builds.stats().misses());

    match state.builds.run_stage(&ctx, &request.nodes).await {
        Ok(head) => {
            let after = (state.builds.stats().hits(), state.builds.stats().misses());
            let response = BuildStageResponse {
                head,
                cache_hits: after.0.saturating_sub(before.0),
                cache_misses: after.1.saturating_sub(before.1),
            };
            Json(response).into_response()
        }
        Err(e) => domain_error(e).into_response(),
    }
}
