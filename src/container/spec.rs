//! Declarative container configuration.

use std::collections::{BTreeMap, BTreeSet};

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference, e.g. `cassandra:latest`.
    pub image: String,
    /// Container name. `None` lets the engine pick one.
    pub name: Option<String>,
    /// Container ports to publish on ephemeral host ports (TCP).
    pub exposed_ports: BTreeSet<u16>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Command override. Empty keeps the image's default.
    pub command: Vec<String>,
    /// Bind mounts.
    pub volumes: Vec<VolumeMount>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            name: None,
            exposed_ports: BTreeSet::new(),
            env: BTreeMap::new(),
            command: Vec::new(),
            volumes: Vec::new(),
        }
    }

    /// Environment in `KEY=value` form, sorted by key.
    pub fn env_list(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

/// A host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl VolumeMount {
    pub fn read_only(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: true,
        }
    }

    pub fn read_write(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    /// Docker bind syntax: `host:container:mode`.
    pub fn to_bind(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host_path, self.container_path, mode)
    }
}
