//! Apache Cassandra.
//!
//! Starts a single-node cluster tuned for tests (no gossip settle delay,
//! small heap) and waits until the node accepts CQL clients.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use testbox::DockerRuntime;
//! use testbox::modules::CassandraContainer;
//!
//! # async fn example() -> testbox::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect().await?);
//! let mut cassandra = CassandraContainer::new(runtime);
//! cassandra.start().await?;
//!
//! let endpoint = cassandra.contact_point()?;
//! // hand endpoint.host / endpoint.port to a CQL driver
//! println!("cassandra at {endpoint}");
//!
//! cassandra.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::container::{Container, ContainerSpec};
use crate::error::Result;
use crate::runtime::ContainerRuntime;
use crate::wait::WaitStrategy;

pub const DEFAULT_IMAGE: &str = "cassandra:latest";

/// Native protocol (CQL) port.
pub const CQL_PORT: u16 = 9042;

/// Logged once the node accepts CQL connections.
pub const READY_LOG_LINE: &str = "Starting listening for CQL clients";

/// Cassandra configuration.
#[derive(Debug, Clone)]
pub struct CassandraConfig {
    pub image: String,
    /// Container ports to publish. Always includes [`CQL_PORT`].
    pub ports: Vec<u16>,
    /// How long the node may take to accept CQL clients.
    pub startup_timeout: Duration,
    pub datacenter: String,
    pub max_heap_size: String,
    pub heap_newsize: String,
}

impl Default for CassandraConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            ports: vec![CQL_PORT],
            startup_timeout: Duration::from_secs(120),
            datacenter: "datacenter1".to_string(),
            max_heap_size: "1024M".to_string(),
            heap_newsize: "128M".to_string(),
        }
    }
}

impl CassandraConfig {
    /// Container spec for this configuration.
    pub fn to_spec(&self) -> ContainerSpec {
        let mut spec = ContainerSpec::new(self.image.clone());
        spec.exposed_ports.extend(self.ports.iter().copied().filter(|p| *p != 0));
        spec.exposed_ports.insert(CQL_PORT);

        let env = [
            ("CASSANDRA_SNITCH", "GossipingPropertyFileSnitch"),
            ("CASSANDRA_ENDPOINT_SNITCH", "GossipingPropertyFileSnitch"),
            (
                "JVM_OPTS",
                "-Dcassandra.skip_wait_for_gossip_to_settle=0 -Dcassandra.initial_token=0",
            ),
            ("HEAP_NEWSIZE", self.heap_newsize.as_str()),
            ("MAX_HEAP_SIZE", self.max_heap_size.as_str()),
            ("CASSANDRA_DC", self.datacenter.as_str()),
        ];
        spec.env
            .extend(env.iter().map(|(k, v)| (k.to_string(), v.to_string())));
        spec
    }

    pub fn wait_strategy(&self) -> WaitStrategy {
        WaitStrategy::log_contains(READY_LOG_LINE, self.startup_timeout)
    }
}

/// Where a CQL driver should connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CassandraEndpoint {
    pub host: String,
    pub port: u16,
    /// Datacenter name to use for DC-aware load balancing.
    pub datacenter: String,
}

impl fmt::Display for CassandraEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A Cassandra node in a container.
#[derive(Debug)]
pub struct CassandraContainer {
    config: CassandraConfig,
    container: Container,
}

impl CassandraContainer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self::with_config(runtime, CassandraConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn ContainerRuntime>, config: CassandraConfig) -> Self {
        let container =
            Container::from_spec_with_wait(config.to_spec(), config.wait_strategy(), runtime);
        Self { config, container }
    }

    /// Start the node and wait until it accepts CQL clients.
    pub async fn start(&mut self) -> Result<&mut Self> {
        self.container.start().await?;
        Ok(self)
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.container.stop().await
    }

    /// Host, mapped CQL port and datacenter for a driver.
    pub fn contact_point(&self) -> Result<CassandraEndpoint> {
        Ok(CassandraEndpoint {
            host: self.container.get_host(),
            port: self.container.get_exposed_port(CQL_PORT)?,
            datacenter: self.config.datacenter.clone(),
        })
    }

    pub fn config(&self) -> &CassandraConfig {
        &self.config
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Mutable access, e.g. to add environment before starting.
    pub fn container_mut(&mut self) -> &mut Container {
        &mut self.container
    }

    pub fn into_container(self) -> Container {
        self.container
    }
}
