//! Prometheus export of feed counters over HTTP

pub mod exporter;
pub mod server;

pub use exporter::PrometheusExporter;
pub use server::{MetricsServer, MetricsServerConfig};
