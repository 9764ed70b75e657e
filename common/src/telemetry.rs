//! Provides helper functions for initializing telemetry collection and publication.
use std::{convert::Infallible, net::SocketAddr};

use anyhow::Result;
use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{metrics::MeterProvider, runtime, Resource};
use prometheus::{Encoder, TextEncoder};
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter, Layer, Registry};

/// Name reported as the `service.name` resource attribute.
const SERVICE_NAME: &str = "vegeta-operator";

/// Output format of the log lines written to stdout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Single line, human readable.
    #[default]
    Compact,
    /// One JSON object per line.
    Json,
}

fn resource() -> Resource {
    Resource::new(vec![
        KeyValue::new(
            "hostname",
            gethostname::gethostname()
                .into_string()
                .unwrap_or_else(|raw| raw.to_string_lossy().into_owned()),
        ),
        KeyValue::new("service.name", SERVICE_NAME),
    ])
}

// Default to INFO if no env is specified
fn env_filter() -> Result<EnvFilter> {
    Ok(EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env()?)
}

/// Initialize tracing.
///
/// Logs are always written to stdout. When an OTLP endpoint is given, spans are also exported
/// to it.
pub async fn init(otlp_endpoint: Option<String>, log_format: LogFormat) -> Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if let Some(endpoint) = otlp_endpoint {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(opentelemetry_sdk::trace::config().with_resource(resource()))
            .install_batch(runtime::Tokio)?;
        layers.push(
            tracing_opentelemetry::layer()
                .with_tracer(tracer)
                .with_filter(env_filter()?)
                .boxed(),
        );
    }

    let logger = tracing_subscriber::fmt::layer();
    layers.push(match log_format {
        LogFormat::Compact => logger
            .with_ansi(true)
            .compact()
            .with_filter(env_filter()?)
            .boxed(),
        LogFormat::Json => logger.json().with_filter(env_filter()?).boxed(),
    });

    #[cfg(feature = "tokio-console")]
    {
        let console_filter = EnvFilter::builder().parse("tokio=trace,runtime=trace")?;
        layers.push(
            console_subscriber::spawn()
                .with_filter(console_filter)
                .boxed(),
        );
    }

    let collector = Registry::default().with(layers);
    tracing::subscriber::set_global_default(collector)?;
    Ok(())
}

/// Install a global meter provider backed by a prometheus registry.
///
/// The returned registry is what [`serve`] publishes.
pub fn init_metrics() -> Result<prometheus::Registry> {
    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let provider = MeterProvider::builder()
        .with_reader(exporter)
        .with_resource(resource())
        .build();
    opentelemetry::global::set_meter_provider(provider);
    Ok(registry)
}

/// Serve `/metrics`, `/healthz` and `/readyz` until the process exits.
pub async fn serve(addr: SocketAddr, registry: prometheus::Registry) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move { Ok::<_, Infallible>(respond(&req, &registry)) }
            }))
        }
    });
    tracing::info!(%addr, "serving metrics and health endpoints");
    Server::bind(&addr).serve(make_svc).await?;
    Ok(())
}

fn respond(req: &Request<Body>, registry: &prometheus::Registry) -> Response<Body> {
    match req.uri().path() {
        "/metrics" => {
            let encoder = TextEncoder::new();
            let mut buf = Vec::new();
            match encoder.encode(&registry.gather(), &mut buf) {
                Ok(()) => {
                    let mut response = Response::new(Body::from(buf));
                    if let Ok(content_type) = HeaderValue::from_str(encoder.format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, content_type);
                    }
                    response
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to encode metrics");
                    status(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
        }
        "/healthz" | "/readyz" => Response::new(Body::from("ok")),
        _ => status(StatusCode::NOT_FOUND),
    }
}

fn status(code: StatusCode) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = code;
    response
}

/// Flush any pending spans before the process exits.
pub fn shutdown() {
    opentelemetry::global::shutdown_tracer_provider();
}
