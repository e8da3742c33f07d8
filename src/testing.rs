//! In-memory container runtime for tests.
//!
//! Provides:
//! - [`FakeRuntime`]: a [`ContainerRuntime`] with scripted output, ephemeral
//!   port allocation and failure injection
//! - [`FakeContainer`]: a snapshot of what the fake knows about a container
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testbox::{Container, testing::FakeRuntime};
//!
//! # async fn example() -> testbox::Result<()> {
//! let runtime = Arc::new(FakeRuntime::new().with_logs(["ready"]));
//! let mut container = Container::new("postgres:16", runtime.clone());
//! container.with_exposed_ports([5432])?;
//! container.start().await?;
//! assert_eq!(runtime.live_containers(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::container::ContainerSpec;
use crate::error::{ContainerError, Result};
use crate::runtime::{ContainerRuntime, LogStream, RuntimeId};

/// First port of the IANA dynamic/private range.
pub const EPHEMERAL_PORT_START: u16 = 49152;

/// What the fake knows about one container.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub spec: ContainerSpec,
    /// Started and not yet stopped, exited or removed.
    pub running: bool,
    pub removed: bool,
    /// Declared port → allocated host port, filled on start.
    pub ports: HashMap<u16, u16>,
    /// Everything the container has "written" so far.
    pub logs: Vec<String>,
    /// Process ends as soon as its scripted output is written.
    pub exits: bool,
}

#[derive(Default)]
struct Failures {
    unavailable: bool,
    missing_images: HashSet<String>,
    start: Option<String>,
    stop: bool,
    remove: bool,
}

struct FakeState {
    containers: HashMap<RuntimeId, FakeContainer>,
    next_port: u16,
    script: Vec<String>,
    log_delay: Duration,
    start_delay: Duration,
    exit_after_logs: bool,
    failures: Failures,
    calls: Vec<&'static str>,
}

/// A configurable [`ContainerRuntime`] stub.
///
/// Supports:
/// - Scripted output for every new container via [`with_logs`](Self::with_logs)
/// - Containers that exit right after writing it via
///   [`exiting_after_logs`](Self::exiting_after_logs)
/// - Failure injection per operation
/// - Call recording via [`calls`](Self::calls)
///
/// Log streams of running containers never end on their own, like a real
/// engine following a long-lived process.
pub struct FakeRuntime {
    host: String,
    state: Mutex<FakeState>,
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            host: "localhost".to_string(),
            state: Mutex::new(FakeState {
                containers: HashMap::new(),
                next_port: EPHEMERAL_PORT_START,
                script: Vec::new(),
                log_delay: Duration::ZERO,
                start_delay: Duration::ZERO,
                exit_after_logs: false,
                failures: Failures::default(),
                calls: Vec::new(),
            }),
        }
    }

    /// Address reported by `host_address()`.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Output written by every container this runtime starts.
    pub fn with_logs<I, S>(self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock().script = lines.into_iter().map(Into::into).collect();
        self
    }

    /// Delay before each scripted line is delivered.
    pub fn with_log_delay(self, delay: Duration) -> Self {
        self.lock().log_delay = delay;
        self
    }

    /// How long `start` takes, like an engine starting a slow container.
    pub fn with_start_delay(self, delay: Duration) -> Self {
        self.lock().start_delay = delay;
        self
    }

    /// Containers exit as soon as their scripted output is written.
    pub fn exiting_after_logs(self) -> Self {
        self.lock().exit_after_logs = true;
        self
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call fail with `EngineUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().failures.unavailable = unavailable;
    }

    /// Make `create` fail with `ImagePullFailed` for `image`.
    pub fn fail_pull(&self, image: impl Into<String>) {
        self.lock().failures.missing_images.insert(image.into());
    }

    /// Make `start` fail with `StartFailed` carrying `reason`.
    pub fn fail_start(&self, reason: impl Into<String>) {
        self.lock().failures.start = Some(reason.into());
    }

    pub fn fail_stop(&self, fail: bool) {
        self.lock().failures.stop = fail;
    }

    pub fn fail_remove(&self, fail: bool) {
        self.lock().failures.remove = fail;
    }

    /// Append a line to a container's output.
    pub fn push_log(&self, id: &RuntimeId, line: impl Into<String>) {
        if let Some(container) = self.lock().containers.get_mut(id) {
            container.logs.push(line.into());
        }
    }

    /// Simulate the container's process dying.
    pub fn kill(&self, id: &RuntimeId) {
        if let Some(container) = self.lock().containers.get_mut(id) {
            container.running = false;
            container.exits = true;
        }
    }

    /// Names of the operations called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    /// Containers created over the runtime's lifetime.
    pub fn created_count(&self) -> usize {
        self.lock().containers.len()
    }

    /// Containers created and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.lock().containers.values().filter(|c| !c.removed).count()
    }

    pub fn container(&self, id: &RuntimeId) -> Option<FakeContainer> {
        self.lock().containers.get(id).cloned()
    }

    fn record(&self, call: &'static str) -> Result<MutexGuard<'_, FakeState>> {
        let mut state = self.lock();
        state.calls.push(call);
        if state.failures.unavailable {
            return Err(ContainerError::EngineUnavailable {
                reason: "fake engine is down".to_string(),
            });
        }
        Ok(state)
    }
}

fn no_such_container(operation: &'static str, id: &RuntimeId) -> ContainerError {
    ContainerError::Engine {
        operation,
        reason: format!("404: no such container: {id}"),
    }
}

fn next_port(state: &mut FakeState) -> u16 {
    let port = state.next_port;
    state.next_port = if port == u16::MAX {
        EPHEMERAL_PORT_START
    } else {
        port + 1
    };
    port
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeId> {
        let mut state = self.record("create")?;

        if state.failures.missing_images.contains(&spec.image) {
            return Err(ContainerError::ImagePullFailed {
                image: spec.image.clone(),
                reason: "manifest unknown".to_string(),
            });
        }

        let id = RuntimeId::new(uuid::Uuid::new_v4().simple().to_string());
        let container = FakeContainer {
            spec: spec.clone(),
            running: false,
            removed: false,
            ports: HashMap::new(),
            logs: state.script.clone(),
            exits: state.exit_after_logs,
        };
        state.containers.insert(id.clone(), container);
        Ok(id)
    }

    async fn start(&self, id: &RuntimeId) -> Result<()> {
        let delay = self.lock().start_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.record("start")?;
        let (declared, output) = match state.containers.get(id) {
            Some(c) => (
                c.spec.exposed_ports.iter().copied().collect::<Vec<_>>(),
                c.logs.join("\n"),
            ),
            None => return Err(no_such_container("start", id)),
        };

        if let Some(reason) = state.failures.start.clone() {
            return Err(ContainerError::StartFailed {
                id: id.to_string(),
                reason,
                diagnostics: output,
            });
        }

        let ports: HashMap<u16, u16> = declared
            .into_iter()
            .map(|port| (port, next_port(&mut state)))
            .collect();

        if let Some(container) = state.containers.get_mut(id) {
            container.running = !container.exits;
            container.ports = ports;
        }
        Ok(())
    }

    async fn resolve_port(&self, id: &RuntimeId, container_port: u16) -> Result<u16> {
        let state = self.record("resolve_port")?;
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| no_such_container("inspect", id))?;

        if !container.spec.exposed_ports.contains(&container_port) {
            return Err(ContainerError::PortNotExposed {
                port: container_port,
            });
        }
        container
            .ports
            .get(&container_port)
            .copied()
            .ok_or_else(|| ContainerError::Engine {
                operation: "resolve_port",
                reason: format!("port {container_port} has no host binding"),
            })
    }

    fn host_address(&self) -> String {
        self.host.clone()
    }

    fn stream_logs(&self, id: &RuntimeId) -> LogStream {
        let state = self.lock();
        let Some(container) = state.containers.get(id) else {
            let err = no_such_container("logs", id);
            return Box::pin(futures::stream::once(async move { Err(err) }));
        };

        let lines = container.logs.clone();
        let ends = container.exits || container.removed || !container.running;
        let delay = state.log_delay;
        drop(state);

        let scripted = futures::stream::iter(lines).then(move |line| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(line)
        });

        if ends {
            Box::pin(scripted)
        } else {
            Box::pin(scripted.chain(futures::stream::pending()))
        }
    }

    async fn is_running(&self, id: &RuntimeId) -> Result<bool> {
        let state = self.record("inspect")?;
        Ok(state
            .containers
            .get(id)
            .is_some_and(|c| c.running && !c.removed))
    }

    async fn stop(&self, id: &RuntimeId) -> Result<()> {
        let mut state = self.record("stop")?;
        if state.failures.stop {
            return Err(ContainerError::Engine {
                operation: "stop",
                reason: "500: injected stop failure".to_string(),
            });
        }
        if let Some(container) = state.containers.get_mut(id) {
            container.running = false;
        }
        Ok(())
    }

    async fn remove(&self, id: &RuntimeId) -> Result<()> {
        let mut state = self.record("remove")?;
        if state.failures.remove {
            return Err(ContainerError::Engine {
                operation: "remove",
                reason: "500: injected remove failure".to_string(),
            });
        }
        if let Some(container) = state.containers.get_mut(id) {
            container.running = false;
            container.removed = true;
            container.ports.clear();
        }
        Ok(())
    }
}
