//! Operator is a long lived process that runs distributed vegeta load tests.
#![deny(missing_docs)]

use std::{collections::BTreeMap, net::SocketAddr};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use kube::Client;
use tracing::{error, info};

use vegeta_common::telemetry::{self, LogFormat};
use vegeta_operator::{
    labels::parse_label,
    utils::{ControllerConfig, DEFAULT_IMAGE, DEFAULT_IMAGE_PULL_POLICY},
    vegeta::controller,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Endpoint receiving traces, traces are not exported when unset.
    #[arg(long, env = "OPERATOR_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Address serving metrics and health probes.
    #[arg(long, env = "OPERATOR_METRICS_BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    metrics_bind_address: SocketAddr,

    /// Format of the log lines.
    #[arg(long, env = "OPERATOR_LOG_FORMAT", value_enum, default_value_t = LogFormatArg::Compact)]
    log_format: LogFormatArg,

    /// Namespaces to watch, all namespaces when empty.
    #[arg(long, env = "WATCH_NAMESPACE", value_delimiter = ',')]
    namespaces: Vec<String>,

    /// Labels added to every pod, i.e. team=perf,env=test.
    #[arg(long, env = "OPERATOR_LABELS", value_delimiter = ',', value_parser = parse_label)]
    labels: Vec<(String, String)>,

    /// Image of pods whose load test does not set one.
    #[arg(long, env = "VEGETA_IMAGE", default_value = DEFAULT_IMAGE)]
    image: String,

    /// Pull policy of every pod.
    #[arg(long, env = "VEGETA_IMAGE_PULL_POLICY", default_value = DEFAULT_IMAGE_PULL_POLICY)]
    image_pull_policy: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Compact,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Compact => LogFormat::Compact,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

impl Cli {
    fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            image: self.image.clone(),
            image_pull_policy: self.image_pull_policy.clone(),
            labels: BTreeMap::from_iter(self.labels.iter().cloned()),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    telemetry::init(args.otlp_endpoint.clone(), args.log_format.into()).await?;
    let registry = telemetry::init_metrics()?;

    let addr = args.metrics_bind_address;
    tokio::spawn(async move {
        if let Err(err) = telemetry::serve(addr, registry).await {
            error!(%err, "metrics server failed");
        }
    });

    let config = args.controller_config();
    info!(?config, namespaces = ?args.namespaces, "starting operator");
    let client = Client::try_default().await?;
    controller::run(client, config, args.namespaces).await;

    // Flush traces before shutdown
    telemetry::shutdown();
    Ok(())
}
