//! Container engine client.
//!
//! [`ContainerRuntime`] is the seam between container handles and whatever
//! actually runs containers. [`DockerRuntime`](docker::DockerRuntime) talks to
//! a Docker engine through bollard; [`FakeRuntime`](crate::testing::FakeRuntime)
//! keeps everything in memory for tests.
//!
//! Implementations must accept concurrent calls for distinct runtime ids.
//! `stop` and `remove` are idempotent: acting on a container that is already
//! stopped or gone succeeds.

pub mod docker;

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::container::ContainerSpec;
use crate::error::{ContainerError, Result};

pub use docker::{DockerRuntime, check_docker};

/// Lazy stream of log lines, ending when the container stops.
pub type LogStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opaque identifier the engine assigns to a created container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuntimeId(String);

impl RuntimeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log output.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for RuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RuntimeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Operations a container engine must provide.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container for `spec`.
    async fn create(&self, spec: &ContainerSpec) -> Result<RuntimeId>;

    /// Start a created container.
    async fn start(&self, id: &RuntimeId) -> Result<()>;

    /// Host port currently bound to the declared container port.
    async fn resolve_port(&self, id: &RuntimeId, container_port: u16) -> Result<u16>;

    /// Address at which published ports are reachable.
    fn host_address(&self) -> String;

    /// Output of the container from its very first line. Each call starts a
    /// fresh stream.
    fn stream_logs(&self, id: &RuntimeId) -> LogStream;

    /// Whether the container process is still alive.
    async fn is_running(&self, id: &RuntimeId) -> Result<bool>;

    async fn stop(&self, id: &RuntimeId) -> Result<()>;

    async fn remove(&self, id: &RuntimeId) -> Result<()>;

    /// Whether handles dropped while running should leave their container behind.
    fn keep_containers(&self) -> bool {
        false
    }

    /// Remove a container from synchronous code outside a multi-threaded
    /// runtime, e.g. a destructor running inside `block_on`.
    ///
    /// The default drives [`remove`](Self::remove) on a helper thread with
    /// its own runtime and waits for it.
    fn remove_blocking(&self, id: &RuntimeId) -> Result<()> {
        block_on_helper_thread(|| self.remove(id))
    }
}

/// Run a future to completion on a fresh current-thread runtime in a scoped
/// helper thread, blocking the caller until it finishes.
pub(crate) fn block_on_helper_thread<F, Fut>(make: F) -> Result<()>
where
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<()>>,
{
    std::thread::scope(|scope| {
        scope
            .spawn(|| {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| ContainerError::Engine {
                        operation: "remove",
                        reason: format!("failed to build cleanup runtime: {e}"),
                    })?;
                rt.block_on(make())
            })
            .join()
            .unwrap_or_else(|_| {
                Err(ContainerError::Engine {
                    operation: "remove",
                    reason: "cleanup thread panicked".to_string(),
                })
            })
    })
}

/// Re-chunk a stream of raw output into lines.
///
/// Engines deliver output in arbitrary frames; a frame may hold several lines
/// or a fraction of one. Trailing `\r\n` is stripped. A final line without a
/// newline is still emitted when the input ends. The stream ends after the
/// first error.
pub(crate) fn split_lines<S>(chunks: S) -> LogStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    struct State<S> {
        chunks: Pin<Box<S>>,
        partial: Vec<u8>,
        ready: VecDeque<String>,
        done: bool,
    }

    let state = State {
        chunks: Box::pin(chunks),
        partial: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(bytes)) => {
                    st.partial.extend_from_slice(&bytes);
                    while let Some(pos) = st.partial.iter().position(|b| *b == b'\n') {
                        let rest = st.partial.split_off(pos + 1);
                        let line = std::mem::replace(&mut st.partial, rest);
                        st.ready.push_back(decode_line(&line));
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.done = true;
                    if !st.partial.is_empty() {
                        let line = std::mem::take(&mut st.partial);
                        st.ready.push_back(decode_line(&line));
                    }
                }
            }
        }
    }))
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes>> {
        parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect()
    }

    #[tokio::test]
    async fn test_split_lines_rejoins_fragments() {
        let input = chunks(&["Initializing ", "storage\nStarting list", "ening for CQL clients\r\n"]);
        let lines: Vec<String> = split_lines(futures::stream::iter(input))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(
            lines,
            vec!["Initializing storage", "Starting listening for CQL clients"]
        );
    }

    #[tokio::test]
    async fn test_split_lines_flushes_unterminated_tail() {
        let input = chunks(&["one\ntwo\n", "three"]);
        let lines: Vec<String> = split_lines(futures::stream::iter(input))
            .map(|r| r.unwrap())
            .collect()
            .await;

        assert_eq!(lines, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_split_lines_stops_after_error() {
        let mut input = chunks(&["ok\n"]);
        input.push(Err(ContainerError::Engine {
            operation: "logs",
            reason: "connection reset".to_string(),
        }));
        input.extend(chunks(&["never\n"]));

        let results: Vec<Result<String>> =
            split_lines(futures::stream::iter(input)).collect().await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].as_ref().unwrap(), "ok");
        assert!(results[1].is_err());
    }

    #[test]
    fn test_runtime_id_short() {
        let id = RuntimeId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(RuntimeId::new("abc").short(), "abc");
        assert_eq!(id.to_string(), "0123456789abcdef0123");
    }
}
