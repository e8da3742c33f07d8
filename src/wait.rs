//! Readiness detection for started containers.
//!
//! A [`WaitStrategy`] pairs a condition with a timeout. Every strategy needs
//! an explicit timeout because how long "ready" takes differs wildly between
//! services. The timeout is a hard ceiling: the whole wait, including engine
//! calls, is cancelled when it elapses.
//!
//! Log conditions read the container's output from its first line, so lines
//! written before the wait began are still seen. Polling conditions (TCP and
//! HTTP) sleep at least [`MIN_POLL_INTERVAL`] between probes and give up early
//! with [`ContainerError::ContainerExited`] once the container stops.
//!
//! A failed wait never stops the container; that is left to the caller.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use regex::Regex;

use crate::container::{Container, ContainerState};
use crate::error::{ContainerError, Result};
use crate::runtime::RuntimeId;

/// Lower bound on the delay between two polls.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll interval used unless overridden.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Lines of output kept for [`ContainerError::ContainerExited`].
const EXIT_TAIL_LINES: usize = 20;

/// Upper bound on a single TCP/HTTP probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Predicate applied to each log line.
pub type LogPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// What has to be observed before a container counts as ready.
#[derive(Clone)]
pub enum WaitCondition {
    /// A line of output satisfies the predicate.
    LogLine {
        description: String,
        predicate: LogPredicate,
    },
    /// The published port accepts TCP connections.
    TcpPort { port: u16 },
    /// An HTTP GET on the published port returns a 2xx status.
    Http { port: u16, path: String },
}

impl fmt::Debug for WaitCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitCondition::LogLine { description, .. } => f
                .debug_struct("LogLine")
                .field("description", description)
                .finish_non_exhaustive(),
            WaitCondition::TcpPort { port } => {
                f.debug_struct("TcpPort").field("port", port).finish()
            }
            WaitCondition::Http { port, path } => f
                .debug_struct("Http")
                .field("port", port)
                .field("path", path)
                .finish(),
        }
    }
}

/// A readiness condition with its timeout and poll interval.
#[derive(Debug, Clone)]
pub struct WaitStrategy {
    condition: WaitCondition,
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitStrategy {
    pub fn new(condition: WaitCondition, timeout: Duration) -> Self {
        Self {
            condition,
            timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Ready once a log line contains `needle`.
    pub fn log_contains(needle: impl Into<String>, timeout: Duration) -> Self {
        let needle = needle.into();
        let description = format!("log line containing {needle:?}");
        Self::new(
            WaitCondition::LogLine {
                description,
                predicate: Arc::new(move |line: &str| line.contains(needle.as_str())),
            },
            timeout,
        )
    }

    /// Ready once a log line matches `pattern`.
    pub fn log_matches(pattern: Regex, timeout: Duration) -> Self {
        let description = format!("log line matching /{}/", pattern.as_str());
        Self::new(
            WaitCondition::LogLine {
                description,
                predicate: Arc::new(move |line: &str| pattern.is_match(line)),
            },
            timeout,
        )
    }

    /// Ready once `predicate` accepts a log line.
    pub fn log_predicate<P>(description: impl Into<String>, predicate: P, timeout: Duration) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::new(
            WaitCondition::LogLine {
                description: description.into(),
                predicate: Arc::new(predicate),
            },
            timeout,
        )
    }

    /// Ready once the host port mapped to `port` accepts connections.
    ///
    /// Some engines accept connections on published ports before the process
    /// inside listens; prefer a log or HTTP condition when one exists.
    pub fn tcp_port(port: u16, timeout: Duration) -> Self {
        Self::new(WaitCondition::TcpPort { port }, timeout)
    }

    /// Ready once `GET http://host:mapped(port)/path` returns a 2xx status.
    pub fn http(port: u16, path: impl Into<String>, timeout: Duration) -> Self {
        Self::new(
            WaitCondition::Http {
                port,
                path: path.into(),
            },
            timeout,
        )
    }

    /// Set the delay between polls, clamped to [`MIN_POLL_INTERVAL`].
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    pub fn condition(&self) -> &WaitCondition {
        &self.condition
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Human-readable form of the condition, used in errors and logs.
    pub fn description(&self) -> String {
        match &self.condition {
            WaitCondition::LogLine { description, .. } => description.clone(),
            WaitCondition::TcpPort { port } => format!("TCP connection to port {port}"),
            WaitCondition::Http { port, path } => format!("HTTP 2xx from port {port} at {path}"),
        }
    }

    /// Block until `container` satisfies the condition, the timeout elapses,
    /// or the container exits.
    pub async fn wait_until_ready(&self, container: &Container) -> Result<()> {
        tracing::debug!(
            image = %container.spec().image,
            waiting_for = %self.description(),
            timeout = ?self.timeout,
            "Waiting for container"
        );

        match &self.condition {
            WaitCondition::LogLine { predicate, .. } => {
                let predicate = Arc::clone(predicate);
                scan_logs(container, move |line| predicate(line), self.timeout, self.description())
                    .await
            }
            WaitCondition::TcpPort { port } => {
                self.poll(container, *port, |host, host_port| async move {
                    tcp_probe(&host, host_port).await
                })
                .await
            }
            WaitCondition::Http { port, path } => {
                let client = probe_client()?;
                let path = path.trim_start_matches('/').to_string();
                self.poll(container, *port, |host, host_port| {
                    let client = client.clone();
                    let url = format!("http://{host}:{host_port}/{path}");
                    async move { http_probe(&client, &url).await }
                })
                .await
            }
        }
    }

    /// Probe until success, checking between rounds that the container lives.
    async fn poll<F, Fut>(&self, container: &Container, port: u16, probe: F) -> Result<()>
    where
        F: Fn(String, u16) -> Fut,
        Fut: Future<Output = bool>,
    {
        let id = running_id(container)?;
        let host = container.get_host();
        let host_port = container.get_exposed_port(port)?;
        let runtime = container.runtime();

        let rounds = async {
            loop {
                if !runtime.is_running(id).await? {
                    return Err(ContainerError::ContainerExited {
                        id: id.to_string(),
                        last_output: Vec::new(),
                    });
                }
                if probe(host.clone(), host_port).await {
                    return Ok(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        match tokio::time::timeout(self.timeout, rounds).await {
            Ok(result) => result,
            Err(_) => Err(ContainerError::WaitTimeout {
                timeout: self.timeout,
                waiting_for: self.description(),
            }),
        }
    }
}

/// Block until a line of `container`'s output satisfies `predicate`.
///
/// Fails with [`ContainerError::WaitTimeout`] if no line matches within
/// `timeout`, and with [`ContainerError::ContainerExited`] if the output ends
/// first.
pub async fn wait_for_log_line<P>(container: &Container, predicate: P, timeout: Duration) -> Result<()>
where
    P: Fn(&str) -> bool,
{
    scan_logs(container, predicate, timeout, "matching log line".to_string()).await
}

async fn scan_logs<P>(
    container: &Container,
    predicate: P,
    timeout: Duration,
    waiting_for: String,
) -> Result<()>
where
    P: Fn(&str) -> bool,
{
    let id = running_id(container)?;
    let mut lines = container.logs()?;
    let mut recent: VecDeque<String> = VecDeque::with_capacity(EXIT_TAIL_LINES);

    let scan = async {
        while let Some(line) = lines.next().await {
            let line = line?;
            tracing::trace!(container_id = %id.short(), "{}", line);
            if predicate(&line) {
                return Ok(());
            }
            if recent.len() == EXIT_TAIL_LINES {
                recent.pop_front();
            }
            recent.push_back(line);
        }
        Err(ContainerError::ContainerExited {
            id: id.to_string(),
            last_output: recent.iter().cloned().collect(),
        })
    };

    match tokio::time::timeout(timeout, scan).await {
        Ok(result) => result,
        Err(_) => Err(ContainerError::WaitTimeout {
            timeout,
            waiting_for,
        }),
    }
}

fn running_id(container: &Container) -> Result<&RuntimeId> {
    match (container.state(), container.runtime_id()) {
        (ContainerState::Running, Some(id)) => Ok(id),
        (state, _) => Err(ContainerError::NotRunning { state }),
    }
}

async fn tcp_probe(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, tokio::net::TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

fn probe_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|e| ContainerError::Engine {
            operation: "http_probe",
            reason: format!("failed to build HTTP client: {e}"),
        })
}

async fn http_probe(client: &reqwest::Client, url: &str) -> bool {
    match client.get(url).send().await {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::trace!(url = %url, "HTTP probe failed: {}", e);
            false
        }
    }
}
