//! Docker engine runtime built on bollard.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures::{StreamExt, TryStreamExt};

use crate::config::{DOCKER_HOST_SCHEMES, EngineConfig};
use crate::container::ContainerSpec;
use crate::error::{ContainerError, Result};
use crate::runtime::{ContainerRuntime, LogStream, RuntimeId, block_on_helper_thread, split_lines};

/// Label attached to every container this crate creates.
pub const MANAGED_LABEL: &str = "org.testbox.managed";

/// How many trailing lines of output to attach to start failures.
const DIAGNOSTIC_TAIL: usize = 50;

/// Connect to the Docker daemon and verify it answers a ping.
///
/// An explicit `docker_host` is used as-is. Otherwise bollard's local
/// defaults are tried first (which honor `DOCKER_HOST`), then the well-known
/// socket locations of Docker Desktop and rootless installs.
pub async fn connect_docker(config: &EngineConfig) -> Result<Docker> {
    let timeout = config.connect_timeout.as_secs();

    if let Some(ref host) = config.docker_host {
        let docker = connect_explicit(host, timeout)?;
        docker
            .ping()
            .await
            .map_err(|e| ContainerError::EngineUnavailable {
                reason: format!("{host}: {e}"),
            })?;
        return Ok(docker);
    }

    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    #[cfg(unix)]
    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        if let Ok(docker) = Docker::connect_with_socket(path, timeout, API_DEFAULT_VERSION)
            && docker.ping().await.is_ok()
        {
            tracing::debug!(socket = %path, "Connected to Docker via fallback socket");
            return Ok(docker);
        }
    }

    Err(ContainerError::EngineUnavailable {
        reason: "no Docker daemon answered on the default or fallback sockets".to_string(),
    })
}

fn connect_explicit(host: &str, timeout: u64) -> Result<Docker> {
    let unavailable = |e: DockerError| ContainerError::EngineUnavailable {
        reason: format!("{host}: {e}"),
    };

    if host.starts_with("unix://") {
        #[cfg(unix)]
        return Docker::connect_with_socket(host, timeout, API_DEFAULT_VERSION)
            .map_err(unavailable);
    }
    if host.starts_with("npipe://") {
        #[cfg(windows)]
        return Docker::connect_with_named_pipe(host, timeout, API_DEFAULT_VERSION)
            .map_err(unavailable);
    }
    if host.starts_with("tcp://") || host.starts_with("http://") {
        return Docker::connect_with_http(host, timeout, API_DEFAULT_VERSION).map_err(unavailable);
    }

    Err(ContainerError::EngineUnavailable {
        reason: format!(
            "unsupported Docker endpoint '{host}', expected one of {}",
            DOCKER_HOST_SCHEMES.join(", ")
        ),
    })
}

#[cfg(unix)]
fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
        sockets.push(home.join(".docker/desktop/docker.sock"));
    }
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        sockets.push(PathBuf::from(runtime_dir).join("docker.sock"));
    }
    sockets.push(PathBuf::from("/var/run/docker.sock"));
    sockets
}

/// Docker daemon availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStatus {
    /// Daemon reachable and answering pings.
    Available,
    /// `docker` binary not found on PATH and no daemon reachable.
    NotInstalled,
    /// Binary found but daemon not responding.
    NotRunning,
}

impl DockerStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, DockerStatus::Available)
    }

    /// What to do about it, for test skip messages.
    pub fn hint(&self) -> &'static str {
        match self {
            DockerStatus::Available => "",
            DockerStatus::NotInstalled => {
                "Install Docker: https://docs.docker.com/engine/install/"
            }
            DockerStatus::NotRunning => {
                "Start the Docker daemon, or point DOCKER_HOST at a running engine"
            }
        }
    }
}

/// Probe whether a Docker engine can be used with `config`.
///
/// Intended for tests that should skip instead of fail on machines without
/// Docker.
pub async fn check_docker(config: &EngineConfig) -> DockerStatus {
    if connect_docker(config).await.is_ok() {
        return DockerStatus::Available;
    }
    if docker_binary_exists() {
        DockerStatus::NotRunning
    } else {
        DockerStatus::NotInstalled
    }
}

fn docker_binary_exists() -> bool {
    let finder = if cfg!(windows) { "where" } else { "which" };
    std::process::Command::new(finder)
        .arg("docker")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// [`ContainerRuntime`] backed by a Docker engine.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    config: EngineConfig,
}

impl DockerRuntime {
    /// Connect using configuration from the environment.
    pub async fn connect() -> Result<Self> {
        Self::with_config(EngineConfig::resolve()?).await
    }

    /// Connect using explicit configuration.
    pub async fn with_config(config: EngineConfig) -> Result<Self> {
        let docker = connect_docker(&config).await?;
        tracing::debug!(host = %config.host_address(), "Connected to Docker engine");
        Ok(Self { docker, config })
    }

    /// The underlying bollard client.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn image_exists(&self, image: &str) -> bool {
        self.docker.inspect_image(image).await.is_ok()
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        tracing::info!(image = %image, "Pulling image");

        let (repository, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!(image = %image, "Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(ContainerError::ImagePullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(image = %image, "Pulled image");
        Ok(())
    }

    /// Last lines of output, best effort.
    async fn recent_output(&self, id: &RuntimeId) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: DIAGNOSTIC_TAIL.to_string(),
            ..Default::default()
        };

        match self
            .docker
            .logs(id.as_str(), Some(options))
            .try_collect::<Vec<_>>()
            .await
        {
            Ok(chunks) => chunks.into_iter().map(|c| c.to_string()).collect(),
            Err(e) => {
                tracing::debug!(container_id = %id.short(), "Could not fetch logs: {}", e);
                String::new()
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeId> {
        if self.config.auto_pull && !self.image_exists(&spec.image).await {
            self.pull_image(&spec.image).await?;
        } else {
            tracing::debug!(image = %spec.image, "Image exists locally or auto-pull is off");
        }

        let options = spec.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        });

        let response = self
            .docker
            .create_container(options, container_config(spec))
            .await
            .map_err(|e| match e {
                DockerError::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => ContainerError::ImagePullFailed {
                    image: spec.image.clone(),
                    reason: message,
                },
                other => classify("create", other),
            })?;

        for warning in &response.warnings {
            tracing::warn!(image = %spec.image, "Engine warning: {}", warning);
        }

        let id = RuntimeId::from(response.id);
        tracing::debug!(container_id = %id.short(), image = %spec.image, "Created container");
        Ok(id)
    }

    async fn start(&self, id: &RuntimeId) -> Result<()> {
        match self
            .docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(ContainerError::StartFailed {
                id: id.to_string(),
                reason: e.to_string(),
                diagnostics: self.recent_output(id).await,
            }),
        }
    }

    async fn resolve_port(&self, id: &RuntimeId, container_port: u16) -> Result<u16> {
        let info = self
            .docker
            .inspect_container(id.as_str(), None)
            .await
            .map_err(|e| classify("inspect", e))?;

        let ports = info
            .network_settings
            .and_then(|ns| ns.ports)
            .unwrap_or_default();

        host_port_from(&ports, container_port)
    }

    fn host_address(&self) -> String {
        self.config.host_address()
    }

    fn stream_logs(&self, id: &RuntimeId) -> LogStream {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            since: 0,
            ..Default::default()
        };

        let chunks = self
            .docker
            .logs(id.as_str(), Some(options))
            .map(|chunk| chunk.map(|c| c.into_bytes()).map_err(|e| classify("logs", e)));

        split_lines(chunks)
    }

    async fn is_running(&self, id: &RuntimeId) -> Result<bool> {
        match self.docker.inspect_container(id.as_str(), None).await {
            Ok(info) => Ok(info.state.and_then(|s| s.running).unwrap_or(false)),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(classify("inspect", e)),
        }
    }

    async fn stop(&self, id: &RuntimeId) -> Result<()> {
        let options = StopContainerOptions {
            t: self.config.stop_timeout.as_secs() as i64,
        };

        let result = self.docker.stop_container(id.as_str(), Some(options)).await;
        tolerate("stop", result, STOP_NOOP_STATUS)?;
        tracing::debug!(container_id = %id.short(), "Container stopped");
        Ok(())
    }

    async fn remove(&self, id: &RuntimeId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        let result = self.docker.remove_container(id.as_str(), Some(options)).await;
        tolerate("remove", result, REMOVE_NOOP_STATUS)?;
        tracing::debug!(container_id = %id.short(), "Container removed");
        Ok(())
    }

    fn keep_containers(&self) -> bool {
        self.config.keep_containers
    }

    fn remove_blocking(&self, id: &RuntimeId) -> Result<()> {
        // Pooled connections of `self.docker` are driven by the caller's
        // runtime, which is blocked here; use a client of our own.
        let config = self.config.clone();
        block_on_helper_thread(move || async move {
            DockerRuntime::with_config(config).await?.remove(id).await
        })
    }
}

/// Translate a spec into bollard's create request.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (port_key(*port), HashMap::new()))
        .collect();

    // Host port "0" lets the engine pick a free ephemeral port.
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .exposed_ports
        .iter()
        .map(|port| {
            (
                port_key(*port),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some("0".to_string()),
                }]),
            )
        })
        .collect();

    let binds: Vec<String> = spec.volumes.iter().map(|v| v.to_bind()).collect();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: if binds.is_empty() { None } else { Some(binds) },
        auto_remove: Some(false),
        ..Default::default()
    };

    let env = spec.env_list();

    Config {
        image: Some(spec.image.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        cmd: if spec.command.is_empty() {
            None
        } else {
            Some(spec.command.clone())
        },
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        labels: Some(HashMap::from([(
            MANAGED_LABEL.to_string(),
            "true".to_string(),
        )])),
        ..Default::default()
    }
}

fn port_key(port: u16) -> String {
    format!("{port}/tcp")
}

fn host_port_from(
    ports: &HashMap<String, Option<Vec<PortBinding>>>,
    container_port: u16,
) -> Result<u16> {
    let bindings = ports
        .get(&port_key(container_port))
        .ok_or(ContainerError::PortNotExposed {
            port: container_port,
        })?;

    bindings
        .iter()
        .flatten()
        .filter_map(|b| b.host_port.as_deref())
        .find_map(|p| p.parse::<u16>().ok().filter(|p| *p != 0))
        .ok_or_else(|| ContainerError::Engine {
            operation: "resolve_port",
            reason: format!("port {container_port} has no host binding"),
        })
}

/// Split an image reference into repository and tag for a pull.
///
/// Untagged references get `latest`, matching how the engine resolves them
/// locally; an empty tag would pull every tag of the repository. Digest
/// references are passed through whole with no tag.
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    // a ':' before the last '/' belongs to a registry port
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (&image[..split], &image[split + 1..])
        }
        None => (image, "latest"),
    }
}

/// Already stopped (304) or already gone (404).
const STOP_NOOP_STATUS: &[u16] = &[304, 404];

/// Already gone (404) or removal already in progress (409).
const REMOVE_NOOP_STATUS: &[u16] = &[404, 409];

/// Treat the given engine status codes as success, classify anything else.
fn tolerate(
    operation: &'static str,
    result: std::result::Result<(), DockerError>,
    noop_status: &[u16],
) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(DockerError::DockerResponseServerError { status_code, .. })
            if noop_status.contains(&status_code) =>
        {
            Ok(())
        }
        Err(e) => Err(classify(operation, e)),
    }
}

/// Map a bollard error onto the crate's taxonomy.
fn classify(operation: &'static str, err: DockerError) -> ContainerError {
    match err {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => ContainerError::Engine {
            operation,
            reason: format!("{status_code}: {message}"),
        },
        other => ContainerError::EngineUnavailable {
            reason: format!("{operation}: {other}"),
        },
    }
}
