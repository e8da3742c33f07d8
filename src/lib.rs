//! Ephemeral Docker containers for integration tests.
//!
//! - [`runtime`]: the container engine seam ([`ContainerRuntime`]) and its
//!   Docker implementation
//! - [`container`]: the [`Container`] handle tying a spec to a lifecycle
//! - [`wait`]: readiness conditions ([`WaitStrategy`])
//! - [`modules`]: preconfigured services
//! - [`testing`]: an in-memory runtime for unit tests
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use testbox::{Container, DockerRuntime, WaitStrategy};
//!
//! # async fn example() -> testbox::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect().await?);
//! let mut nginx = Container::new("nginx:alpine", runtime);
//! nginx
//!     .with_exposed_ports([80])?
//!     .with_wait_strategy(WaitStrategy::http(80, "/", Duration::from_secs(30)))?;
//!
//! let url = nginx
//!     .scoped(async |c: &Container| -> testbox::Result<String> {
//!         Ok(format!("http://{}:{}/", c.get_host(), c.get_exposed_port(80)?))
//!     })
//!     .await??;
//! println!("served at {url}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod logging;
pub mod modules;
pub mod runtime;
pub mod testing;
pub mod wait;

pub use config::EngineConfig;
pub use container::{Container, ContainerSpec, ContainerState, VolumeMount};
pub use error::{ConfigError, ContainerError, Result};
pub use runtime::{ContainerRuntime, DockerRuntime, LogStream, RuntimeId};
pub use wait::{WaitCondition, WaitStrategy, wait_for_log_line};
