//! HTTP endpoint for Prometheus scraping
//!
//! `/metrics` syncs the exporter and returns the text exposition format,
//! `/health` reports whether the feed is connected.

use super::PrometheusExporter;
use anyhow::{Context, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    /// Address to bind to (e.g. "0.0.0.0:9090")
    pub listen_addr: SocketAddr,
    /// Path to serve metrics on
    pub metrics_path: String,
}

impl Default for MetricsServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            metrics_path: "/metrics".to_string(),
        }
    }
}

pub struct MetricsServer {
    config: MetricsServerConfig,
    exporter: Arc<PrometheusExporter>,
}

impl MetricsServer {
    pub fn new(config: MetricsServerConfig, exporter: Arc<PrometheusExporter>) -> Self {
        Self { config, exporter }
    }

    /// Serve until `shutdown` resolves
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server on {}", self.config.listen_addr))?;

        info!(
            "Metrics server listening on http://{}{}",
            self.config.listen_addr, self.config.metrics_path
        );

        tokio::pin!(shutdown);
        loop {
            let (stream, remote_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("Metrics server shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept metrics connection: {}", e);
                        continue;
                    }
                },
            };

            let exporter = self.exporter.clone();
            let metrics_path = self.config.metrics_path.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let response = route(req.uri().path(), &exporter, &metrics_path);
                    async move { Ok::<_, hyper::Error>(response) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection error from {}: {}", remote_addr, err);
                }
            });
        }
    }

    /// Sync and encode once, without HTTP
    pub fn serve_metrics_once(&self) -> Result<String> {
        self.exporter.sync();
        encode_metrics(&self.exporter)
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
}

fn route(path: &str, exporter: &PrometheusExporter, metrics_path: &str) -> Response<Full<Bytes>> {
    debug!("Metrics request: {}", path);

    if path == metrics_path {
        exporter.sync();
        return match encode_metrics(exporter) {
            Ok(text) => {
                let mut response = text_response(StatusCode::OK, text);
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
            }
        };
    }

    match path {
        "/health" | "/healthz" => {
            if exporter.is_connected() {
                text_response(StatusCode::OK, "OK")
            } else {
                text_response(StatusCode::SERVICE_UNAVAILABLE, "DISCONNECTED")
            }
        }
        "/" => text_response(
            StatusCode::OK,
            format!(
                "tickfeed metrics\n\nEndpoints:\n  {} - Prometheus metrics\n  /health - Feed connection status\n",
                metrics_path
            ),
        ),
        _ => {
            warn!("Unknown metrics endpoint requested: {}", path);
            text_response(StatusCode::NOT_FOUND, "Not Found")
        }
    }
}

fn encode_metrics(exporter: &PrometheusExporter) -> Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = exporter.registry().gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .context("Failed to encode metrics")?;

    String::from_utf8(buffer).context("Invalid UTF-8 in metrics")
}
