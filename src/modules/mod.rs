//! Preconfigured containers for specific services.
//!
//! Each module wraps a [`Container`](crate::Container) with the image, ports,
//! environment and readiness condition its service needs, and exposes the
//! endpoint a client library would connect to. None of them depend on a
//! client library themselves.

pub mod cassandra;

pub use cassandra::{CassandraConfig, CassandraContainer, CassandraEndpoint};
