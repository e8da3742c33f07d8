//! Container handle: one container's configuration and lifecycle.
//!
//! A [`Container`] starts out `Unstarted` holding a [`ContainerSpec`]. While
//! unstarted it can be configured freely; once [`start`](Container::start)
//! has run the configuration is frozen and setters fail with
//! [`ContainerError::AlreadyStarted`].
//!
//! ```text
//!  Unstarted ──start()──▶ Starting ──▶ Running ──stop()──▶ Stopped ──▶ Removed
//!      ▲                     │                                            │
//!      └──── create/start ───┘                                            │
//!            failure                                  start() again ◀─────┘
//! ```
//!
//! The port map is written once during `Starting → Running` and cleared when
//! the container stops. Readiness waits run after the transition to
//! `Running`; a failed wait leaves the container running so it can still be
//! inspected.
//!
//! The runtime id is recorded as soon as the container is created, so a
//! `start()` future dropped midway leaves a `Starting` handle that
//! [`stop`](Container::stop), a new `start()` or drop will clean up.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use testbox::{Container, DockerRuntime, WaitStrategy};
//!
//! # async fn example() -> testbox::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect().await?);
//!
//! let mut redis = Container::new("redis:7", runtime);
//! redis
//!     .with_exposed_ports([6379])?
//!     .with_wait_strategy(WaitStrategy::log_contains(
//!         "Ready to accept connections",
//!         Duration::from_secs(30),
//!     ))?;
//!
//! redis.start().await?;
//! let port = redis.get_exposed_port(6379)?;
//! println!("redis at {}:{}", redis.get_host(), port);
//!
//! redis.stop().await?;
//! # Ok(())
//! # }
//! ```

mod spec;

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::RuntimeFlavor;

use crate::error::{ConfigError, ContainerError, Result};
use crate::runtime::{ContainerRuntime, LogStream, RuntimeId};
use crate::wait::WaitStrategy;

pub use spec::{ContainerSpec, VolumeMount};

/// Lifecycle state of a container handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Configured, nothing exists in the engine yet.
    Unstarted,
    /// Create/start in flight.
    Starting,
    /// Running with its port map populated.
    Running,
    /// Stopped but not yet removed.
    Stopped,
    /// Removed from the engine.
    Removed,
}

impl ContainerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Unstarted => "unstarted",
            ContainerState::Starting => "starting",
            ContainerState::Running => "running",
            ContainerState::Stopped => "stopped",
            ContainerState::Removed => "removed",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned handle for a single container instance.
///
/// Dropping a handle whose container still exists removes it before the
/// drop returns, unless the runtime keeps containers. Removal errors are
/// only logged, so prefer an explicit [`stop`](Self::stop) or
/// [`scoped`](Self::scoped).
pub struct Container {
    runtime: Arc<dyn ContainerRuntime>,
    spec: ContainerSpec,
    wait: Option<WaitStrategy>,
    state: ContainerState,
    id: Option<RuntimeId>,
    ports: HashMap<u16, u16>,
}

impl Container {
    /// Create an unstarted handle for `image`.
    pub fn new(image: impl Into<String>, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::from_spec(ContainerSpec::new(image), runtime)
    }

    /// Create an unstarted handle from a complete spec.
    pub fn from_spec(spec: ContainerSpec, runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            spec,
            wait: None,
            state: ContainerState::Unstarted,
            id: None,
            ports: HashMap::new(),
        }
    }

    /// Unstarted handle with a readiness condition already set.
    pub(crate) fn from_spec_with_wait(
        spec: ContainerSpec,
        wait: WaitStrategy,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let mut container = Self::from_spec(spec, runtime);
        container.wait = Some(wait);
        container
    }

    fn ensure_configurable(&self) -> Result<()> {
        if self.state == ContainerState::Unstarted {
            Ok(())
        } else {
            Err(ContainerError::AlreadyStarted { state: self.state })
        }
    }

    /// Set an environment variable, replacing any previous value for `key`.
    pub fn with_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<&mut Self> {
        self.ensure_configurable()?;
        self.spec.env.insert(key.into(), value.into());
        Ok(self)
    }

    /// Declare container ports to publish on ephemeral host ports.
    pub fn with_exposed_ports(&mut self, ports: impl IntoIterator<Item = u16>) -> Result<&mut Self> {
        self.ensure_configurable()?;
        let ports: Vec<u16> = ports.into_iter().collect();
        if ports.contains(&0) {
            return Err(ConfigError::InvalidValue {
                key: "exposed_ports".to_string(),
                message: "port 0 cannot be exposed".to_string(),
            }
            .into());
        }
        self.spec.exposed_ports.extend(ports);
        Ok(self)
    }

    pub fn with_name(&mut self, name: impl Into<String>) -> Result<&mut Self> {
        self.ensure_configurable()?;
        self.spec.name = Some(name.into());
        Ok(self)
    }

    /// Override the image's default command.
    pub fn with_command<I, S>(&mut self, command: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_configurable()?;
        self.spec.command = command.into_iter().map(Into::into).collect();
        Ok(self)
    }

    pub fn with_volume_mapping(&mut self, mount: VolumeMount) -> Result<&mut Self> {
        self.ensure_configurable()?;
        self.spec.volumes.push(mount);
        Ok(self)
    }

    /// Readiness condition checked at the end of [`start`](Self::start).
    pub fn with_wait_strategy(&mut self, strategy: WaitStrategy) -> Result<&mut Self> {
        self.ensure_configurable()?;
        self.wait = Some(strategy);
        Ok(self)
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn wait_strategy(&self) -> Option<&WaitStrategy> {
        self.wait.as_ref()
    }

    /// Engine id of the underlying container, once created.
    pub fn runtime_id(&self) -> Option<&RuntimeId> {
        self.id.as_ref()
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Create and start the container, then wait for readiness.
    ///
    /// Calling this on a running handle logs a warning and does nothing.
    /// A handle that was stopped and removed is started again as a fresh
    /// container with the same configuration. A handle left `Starting` by a
    /// cancelled `start()` first removes the half-started container.
    ///
    /// If create, start or port resolution fails, any container that was
    /// created is removed and the handle keeps its previous state (it stays
    /// `Starting` if that removal fails, so [`stop`](Self::stop) can retry).
    /// If only the readiness wait fails, the error is returned and the
    /// container is left running.
    pub async fn start(&mut self) -> Result<&mut Self> {
        let mut previous = self.state;
        match previous {
            ContainerState::Running => {
                tracing::warn!(
                    image = %self.spec.image,
                    container_id = %self.id.as_ref().map(|id| id.short()).unwrap_or_default(),
                    "start() called on a running container, ignoring"
                );
                return Ok(self);
            }
            ContainerState::Unstarted | ContainerState::Removed => {}
            ContainerState::Starting => {
                if let Some(id) = self.id.clone() {
                    tracing::warn!(
                        container_id = %id.short(),
                        "Removing container left behind by a cancelled start"
                    );
                    self.runtime.remove(&id).await?;
                }
                self.id = None;
                previous = ContainerState::Unstarted;
            }
            ContainerState::Stopped => {
                return Err(ContainerError::AlreadyStarted { state: previous });
            }
        }

        self.state = ContainerState::Starting;
        let id = match self.runtime.create(&self.spec).await {
            Ok(id) => id,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };
        // Recorded before anything else is awaited so that stop() and Drop
        // find the container if this future is dropped.
        self.id = Some(id.clone());

        match self.bring_up(&id).await {
            Ok(ports) => {
                tracing::info!(
                    image = %self.spec.image,
                    container_id = %id.short(),
                    ports = ?ports,
                    "Container running"
                );
                self.ports = ports;
                self.state = ContainerState::Running;
            }
            Err(e) => {
                if let Err(cleanup) = self.runtime.remove(&id).await {
                    tracing::warn!(
                        container_id = %id.short(),
                        "Failed to remove container after failed start: {}",
                        cleanup
                    );
                    return Err(e);
                }
                self.id = None;
                self.state = previous;
                return Err(e);
            }
        }

        if let Some(strategy) = self.wait.clone() {
            strategy.wait_until_ready(self).await?;
            tracing::info!(
                image = %self.spec.image,
                waited_for = %strategy.description(),
                "Container ready"
            );
        }

        Ok(self)
    }

    async fn bring_up(&self, id: &RuntimeId) -> Result<HashMap<u16, u16>> {
        self.runtime.start(id).await?;

        let mut ports = HashMap::with_capacity(self.spec.exposed_ports.len());
        for port in &self.spec.exposed_ports {
            let host_port = self.runtime.resolve_port(id, *port).await?;
            ports.insert(*port, host_port);
        }
        Ok(ports)
    }

    /// Stop and remove the container.
    ///
    /// Removal is attempted even when stopping fails. The first error is
    /// returned. Calling this on an unstarted or already removed handle is a
    /// no-op. A handle left `Starting` by a cancelled `start()` has its
    /// container removed too. If removal fails the handle stays `Stopped` and
    /// a later call retries it.
    pub async fn stop(&mut self) -> Result<()> {
        let id = match (self.state, &self.id) {
            (ContainerState::Unstarted | ContainerState::Removed, _) => return Ok(()),
            (ContainerState::Starting, None) => {
                self.state = ContainerState::Unstarted;
                return Ok(());
            }
            (_, None) => {
                self.state = ContainerState::Removed;
                return Ok(());
            }
            (_, Some(id)) => id.clone(),
        };

        let mut first_error = None;

        if matches!(self.state, ContainerState::Running | ContainerState::Starting) {
            if let Err(e) = self.runtime.stop(&id).await {
                tracing::warn!(container_id = %id.short(), "Stop failed, removing anyway: {}", e);
                first_error = Some(e);
            }
            self.state = ContainerState::Stopped;
            self.ports.clear();
        }

        match self.runtime.remove(&id).await {
            Ok(()) => {
                self.state = ContainerState::Removed;
                tracing::info!(image = %self.spec.image, container_id = %id.short(), "Container removed");
            }
            Err(e) => {
                tracing::warn!(container_id = %id.short(), "Remove failed: {}", e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Host port bound to a declared container port.
    pub fn get_exposed_port(&self, port: u16) -> Result<u16> {
        if !self.spec.exposed_ports.contains(&port) {
            return Err(ContainerError::PortNotExposed { port });
        }
        if self.state != ContainerState::Running {
            return Err(ContainerError::NotRunning { state: self.state });
        }
        self.ports
            .get(&port)
            .copied()
            .ok_or(ContainerError::PortNotExposed { port })
    }

    /// Address at which exposed ports are reachable.
    pub fn get_host(&self) -> String {
        self.runtime.host_address()
    }

    /// Fresh stream over the container's output, from the first line.
    pub fn logs(&self) -> Result<LogStream> {
        match (self.state, &self.id) {
            (ContainerState::Running | ContainerState::Stopped, Some(id)) => {
                Ok(self.runtime.stream_logs(id))
            }
            _ => Err(ContainerError::NotRunning { state: self.state }),
        }
    }

    /// Start the container, run `body`, then stop and remove it.
    ///
    /// Cleanup happens on every exit path: a failed start (including a failed
    /// readiness wait), a normal return, and a panic inside `body`, which is
    /// resumed after the container is gone. If `body` returns normally but
    /// cleanup fails, the cleanup error is returned.
    pub async fn scoped<T>(mut self, body: impl AsyncFnOnce(&Container) -> T) -> Result<T> {
        let started = self.start().await.map(|_| ());
        if let Err(e) = started {
            if let Err(cleanup) = self.stop().await {
                tracing::warn!("Cleanup after failed start also failed: {}", cleanup);
            }
            return Err(e);
        }

        let outcome = AssertUnwindSafe(body(&self)).catch_unwind().await;
        let stopped = self.stop().await;

        match outcome {
            Ok(value) => stopped.map(|()| value),
            Err(panic) => {
                if let Err(e) = stopped {
                    tracing::warn!("Cleanup after panic failed: {}", e);
                }
                std::panic::resume_unwind(panic)
            }
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("spec", &self.spec)
            .field("wait", &self.wait)
            .field("state", &self.state)
            .field("id", &self.id)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if !matches!(
            self.state,
            ContainerState::Starting | ContainerState::Running | ContainerState::Stopped
        ) {
            return;
        }
        let Some(id) = self.id.take() else {
            return;
        };

        if self.runtime.keep_containers() {
            tracing::warn!(
                image = %self.spec.image,
                container_id = %id.short(),
                "Container dropped without stop(), keeping it (keep_containers=true)"
            );
            return;
        }

        tracing::warn!(
            image = %self.spec.image,
            container_id = %id.short(),
            "Container dropped without stop(), removing it"
        );

        // Must finish before drop returns; the runtime may shut down next.
        let removed = match tokio::runtime::Handle::try_current() {
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(|| handle.block_on(self.runtime.remove(&id)))
            }
            _ => self.runtime.remove_blocking(&id),
        };
        if let Err(e) = removed {
            tracing::warn!(container_id = %id.short(), "Removal on drop failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRuntime;
    use std::time::Duration;

    fn handle(runtime: &Arc<FakeRuntime>) -> Container {
        let mut container = Container::new("cassandra:latest", runtime.clone());
        container
            .with_exposed_ports([9042])
            .unwrap()
            .with_env("A", "1")
            .unwrap();
        container
    }

    #[tokio::test]
    async fn test_start_maps_ports_and_stop_removes() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);

        container.start().await.unwrap();
        assert_eq!(container.state(), ContainerState::Running);
        assert!(!container.get_host().is_empty());

        let port = container.get_exposed_port(9042).unwrap();
        assert!((49152..=65535).contains(&port));
        assert_eq!(container.get_exposed_port(9042).unwrap(), port);

        container.stop().await.unwrap();
        assert_eq!(container.state(), ContainerState::Removed);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_undeclared_port_fails_in_every_state() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);

        assert!(matches!(
            container.get_exposed_port(8080),
            Err(ContainerError::PortNotExposed { port: 8080 })
        ));
        assert!(matches!(
            container.get_exposed_port(9042),
            Err(ContainerError::NotRunning {
                state: ContainerState::Unstarted
            })
        ));

        container.start().await.unwrap();
        assert!(matches!(
            container.get_exposed_port(8080),
            Err(ContainerError::PortNotExposed { port: 8080 })
        ));

        container.stop().await.unwrap();
        assert!(matches!(
            container.get_exposed_port(9042),
            Err(ContainerError::NotRunning {
                state: ContainerState::Removed
            })
        ));
    }

    #[tokio::test]
    async fn test_setters_fail_after_start() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        container.start().await.unwrap();

        assert!(matches!(
            container.with_env("B", "2"),
            Err(ContainerError::AlreadyStarted { .. })
        ));
        assert!(matches!(
            container.with_exposed_ports([7000]),
            Err(ContainerError::AlreadyStarted { .. })
        ));
        assert!(matches!(
            container.with_name("late"),
            Err(ContainerError::AlreadyStarted { .. })
        ));
        assert!(!container.spec().env.contains_key("B"));

        container.stop().await.unwrap();
        assert!(matches!(
            container.with_command(["true"]),
            Err(ContainerError::AlreadyStarted { .. })
        ));
    }

    #[test]
    fn test_port_zero_rejected() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = Container::new("busybox", runtime);
        let err = container.with_exposed_ports([80, 0]).unwrap_err();
        assert!(matches!(err, ContainerError::Config(_)));
        assert!(container.spec().exposed_ports.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);

        container.start().await.unwrap();
        let id = container.runtime_id().cloned();
        container.start().await.unwrap();

        assert_eq!(container.runtime_id().cloned(), id);
        assert_eq!(runtime.created_count(), 1);
        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);

        container.start().await.unwrap();
        container.stop().await.unwrap();
        let calls = runtime.calls().len();

        container.stop().await.unwrap();
        assert_eq!(runtime.calls().len(), calls);
        assert_eq!(container.state(), ContainerState::Removed);
    }

    #[tokio::test]
    async fn test_stop_unstarted_is_noop() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        container.stop().await.unwrap();
        assert_eq!(container.state(), ContainerState::Unstarted);
        assert!(runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_start_leaves_nothing_behind() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_start("exec format error");
        let mut container = handle(&runtime);

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::StartFailed { .. }));
        assert_eq!(container.state(), ContainerState::Unstarted);
        assert!(container.runtime_id().is_none());
        assert_eq!(runtime.live_containers(), 0);

        // configuration is still editable after a failed start
        container.with_env("B", "2").unwrap();
    }

    #[tokio::test]
    async fn test_pull_failure_propagates() {
        let runtime = Arc::new(FakeRuntime::new());
        runtime.fail_pull("cassandra:latest");
        let mut container = handle(&runtime);

        let err = container.start().await.unwrap_err();
        assert!(matches!(err, ContainerError::ImagePullFailed { .. }));
        assert_eq!(container.state(), ContainerState::Unstarted);
    }

    #[tokio::test]
    async fn test_stop_failure_still_removes() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        container.start().await.unwrap();

        runtime.fail_stop(true);
        let err = container.stop().await.unwrap_err();
        assert!(matches!(err, ContainerError::Engine { operation: "stop", .. }));
        assert_eq!(container.state(), ContainerState::Removed);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_remove_failure_is_retried() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        container.start().await.unwrap();

        runtime.fail_stop(true);
        runtime.fail_remove(true);
        let err = container.stop().await.unwrap_err();
        // the stop error came first and wins
        assert!(matches!(err, ContainerError::Engine { operation: "stop", .. }));
        assert_eq!(container.state(), ContainerState::Stopped);

        runtime.fail_stop(false);
        runtime.fail_remove(false);
        container.stop().await.unwrap();
        assert_eq!(container.state(), ContainerState::Removed);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_restart_after_removal() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);

        container.start().await.unwrap();
        let first = container.runtime_id().cloned().unwrap();
        container.stop().await.unwrap();

        container.start().await.unwrap();
        assert_eq!(container.state(), ContainerState::Running);
        assert_ne!(container.runtime_id().cloned().unwrap(), first);
        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_failure_leaves_container_running() {
        let runtime = Arc::new(FakeRuntime::new().with_logs(["booting"]));
        let mut container = handle(&runtime);
        container
            .with_wait_strategy(WaitStrategy::log_contains(
                "ready",
                Duration::from_millis(100),
            ))
            .unwrap();

        let err = container.start().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(container.state(), ContainerState::Running);
        assert_eq!(runtime.live_containers(), 1);

        container.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_scoped_removes_on_success() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = handle(&runtime);

        let port = container
            .scoped(async |c: &Container| c.get_exposed_port(9042))
            .await
            .unwrap()
            .unwrap();

        assert!(port > 0);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_scoped_removes_on_panic() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = handle(&runtime);

        let result = AssertUnwindSafe(
            container.scoped(async |_c: &Container| -> () { panic!("test body failed") }),
        )
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_scoped_cleans_up_failed_wait() {
        let runtime = Arc::new(FakeRuntime::new().exiting_after_logs());
        let mut container = handle(&runtime);
        container
            .with_wait_strategy(WaitStrategy::log_contains("ready", Duration::from_secs(5)))
            .unwrap();

        let err = container.scoped(async |_c: &Container| ()).await.unwrap_err();
        assert!(err.is_exited());
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_logs_require_a_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let container = handle(&runtime);
        assert!(matches!(
            container.logs(),
            Err(ContainerError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_drop_removes_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        container.start().await.unwrap();
        drop(container);

        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_removes_container_on_multi_thread_runtime() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        container.start().await.unwrap();
        drop(container);

        assert_eq!(runtime.live_containers(), 0);
    }

    #[test]
    fn test_drop_cleanup_survives_runtime_shutdown() {
        let runtime = Arc::new(FakeRuntime::new());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let mut container = handle(&runtime);
            container.start().await.unwrap();
            // dropped at the end of the body, like a test's local
        });
        drop(rt);

        assert_eq!(runtime.live_containers(), 0);
    }

    #[test]
    fn test_drop_outside_runtime_removes_container() {
        let runtime = Arc::new(FakeRuntime::new());
        let mut container = handle(&runtime);
        tokio_test::block_on(container.start()).unwrap();

        drop(container);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_start_is_cleaned_up_by_stop() {
        let runtime = Arc::new(FakeRuntime::new().with_start_delay(Duration::from_millis(200)));
        let mut container = handle(&runtime);

        let cancelled = tokio::time::timeout(Duration::from_millis(50), container.start()).await;
        assert!(cancelled.is_err());
        assert_eq!(container.state(), ContainerState::Starting);
        assert!(container.runtime_id().is_some());
        assert_eq!(runtime.live_containers(), 1);

        container.stop().await.unwrap();
        assert_eq!(container.state(), ContainerState::Removed);
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_start_after_cancelled_start_replaces_container() {
        let runtime = Arc::new(FakeRuntime::new().with_start_delay(Duration::from_millis(200)));
        let mut container = handle(&runtime);

        let cancelled = tokio::time::timeout(Duration::from_millis(50), container.start()).await;
        assert!(cancelled.is_err());
        let abandoned = container.runtime_id().cloned().unwrap();

        container.start().await.unwrap();
        assert_eq!(container.state(), ContainerState::Running);
        assert_ne!(container.runtime_id(), Some(&abandoned));
        assert!(runtime.container(&abandoned).unwrap().removed);
        assert_eq!(runtime.live_containers(), 1);

        container.stop().await.unwrap();
        assert_eq!(runtime.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_start_is_cleaned_up_on_drop() {
        let runtime = Arc::new(FakeRuntime::new().with_start_delay(Duration::from_millis(200)));
        let mut container = handle(&runtime);

        let cancelled = tokio::time::timeout(Duration::from_millis(50), container.start()).await;
        assert!(cancelled.is_err());
        drop(container);

        assert_eq!(runtime.live_containers(), 0);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ContainerState::Unstarted.to_string(), "unstarted");
        assert_eq!(ContainerState::Removed.as_str(), "removed");
    }
}
