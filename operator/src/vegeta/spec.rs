//! Place all spec types into a single module so they can be used as a lightweight dependency
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Primary CRD describing a load test: an attack run by one or more pods and an optional
/// report aggregating their results.
#[derive(CustomResource, Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "vegeta.testing.io",
    version = "v1alpha1",
    kind = "Vegeta",
    plural = "vegeta",
    status = "VegetaStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VegetaSpec {
    /// Attack parameters.
    pub attack: AttackSpec,
    /// Number of pods running the attack. Each pod runs the full attack, adding a level of
    /// parallelism on top of the vegeta workers.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    /// Report parameters. Without a report the results are reported on the attack pod stdout.
    pub report: Option<ReportSpec>,
    /// Resource requests and limits of the vegeta container.
    pub resources: Option<ResourceRequirements>,
    /// Overrides the operator wide image for the pods of this load test.
    pub image: Option<String>,
}

fn default_replicas() -> u32 {
    1
}

impl Default for VegetaSpec {
    fn default() -> Self {
        Self {
            attack: AttackSpec::default(),
            replicas: default_replicas(),
            report: None,
            resources: None,
            image: None,
        }
    }
}

impl VegetaSpec {
    /// Where the attack results end up.
    pub fn output_type(&self) -> OutputType {
        self.report
            .as_ref()
            .and_then(|report| report.output_type.clone())
            .unwrap_or_default()
    }

    /// Reports whether results are stored and aggregated by a dedicated report pod,
    /// rather than piped from the attack into the report on the same pod.
    pub fn needs_report_pod(&self) -> bool {
        self.output_type() != OutputType::Stdout
    }
}

/// Describes the attack each pod runs.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttackSpec {
    /// Config map holding the body of every request in a file named body.txt.
    pub body_config_map: Option<String>,
    /// Secret holding the PEM encoded TLS client certificate in a file named client.crt.
    pub cert_secret: Option<String>,
    /// Send request bodies with the chunked transfer encoding.
    pub chunked: Option<bool>,
    /// Maximum number of idle open connections per target host.
    pub connections: Option<u32>,
    /// Duration of the attack, i.e. 30s. Zero means an infinite attack.
    pub duration: Option<String>,
    /// Format of the targets file.
    pub format: Option<TargetFormat>,
    /// Send HTTP/2 requests without TLS encryption.
    pub h2c: Option<bool>,
    /// Request headers, i.e. "Accept: text/plain".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,
    /// Enable HTTP/2 requests to servers which support it.
    pub http2: Option<bool>,
    /// Ignore invalid server TLS certificates.
    pub insecure: Option<bool>,
    /// Reuse TCP connections between HTTP requests.
    pub keep_alive: Option<bool>,
    /// Secret holding the PEM encoded TLS client private key in a file named client.key.
    pub key_secret: Option<String>,
    /// Read the targets lazily instead of eagerly.
    pub lazy: Option<bool>,
    /// Maximum number of bytes to capture from the body of each response.
    pub max_body: Option<i64>,
    /// Maximum number of workers.
    pub max_workers: Option<u64>,
    /// Name of the attack, recorded in the responses.
    pub name: Option<String>,
    /// Proxy CONNECT header.
    pub proxy_header: Option<String>,
    /// Request rate per time unit, i.e. 50/1s.
    pub rate: Option<String>,
    /// Maximum number of redirects followed on each request. -1 disables following redirects.
    pub redirects: Option<i32>,
    /// Config map holding a bundle of trusted TLS root CAs.
    pub root_certs_config_map: Option<String>,
    /// Key of the bundle inside the root certs config map. Defaults to ca-bundle.crt.
    pub root_certs_file: Option<String>,
    /// Single target of the attack, i.e. "GET https://example.com".
    /// Use targetsConfigMap for multiple targets.
    pub target: Option<String>,
    /// Config map holding the targets in a file named targets.json or targets.http
    /// depending on the format.
    pub targets_config_map: Option<String>,
    /// Timeout of each request. Zero disables timeouts.
    pub timeout: Option<String>,
    /// Initial number of workers.
    pub workers: Option<u64>,
}

/// Describes how results are stored and reported.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpec {
    /// Histogram buckets, i.e. "[0,1ms,10ms]".
    pub buckets: Option<String>,
    /// Write the report at every given interval, i.e. 100ms.
    pub every: Option<String>,
    /// Name of the persistent volume claim or object bucket claim receiving the results.
    pub output_claim: Option<String>,
    /// Kind of storage receiving the results.
    pub output_type: Option<OutputType>,
    /// Type of the report.
    #[serde(rename = "type")]
    pub report_type: Option<ReportType>,
}

/// Kind of storage receiving the results.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputType {
    /// The attack is piped into the report on the same pod and the report goes to stdout.
    #[default]
    Stdout,
    /// Results are written to a persistent volume claim.
    Pvc,
    /// Results are uploaded to an object bucket claim.
    Obc,
}

/// Type of the report.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    /// Plain text
    Text,
    /// JSON
    Json,
    /// Text histogram over the configured buckets
    Hist,
    /// HDR histogram plottable data
    Hdrplot,
}

impl ReportType {
    /// Value of the report -type flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Text => "text",
            ReportType::Json => "json",
            ReportType::Hist => "hist",
            ReportType::Hdrplot => "hdrplot",
        }
    }
}

/// Format of the targets file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    /// JSON targets
    Json,
    /// HTTP targets
    Http,
}

impl TargetFormat {
    /// Value of the attack -format flag.
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetFormat::Json => "json",
            TargetFormat::Http => "http",
        }
    }
}

/// Observed state of a load test.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VegetaStatus {
    /// Names of attack pods that have not terminated yet.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub active: Vec<String>,
    /// Names of attack pods that failed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<String>,
    /// Names of attack pods that completed successfully.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub succeeded: Vec<String>,
    /// Processing phase of the load test.
    #[serde(default)]
    pub phase: Phase,
}

/// Processing phase of a load test.
///
/// `Failed` and `Completed` are final. `Succeeded` is not: the report pod may still fail.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, Copy, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// No attack pod observed yet.
    #[default]
    Pending,
    /// Some attack pods have not terminated and none has failed.
    Running,
    /// All attack pods succeeded, the report has not been generated yet.
    Succeeded,
    /// An attack pod or the report pod failed.
    Failed,
    /// All attack pods succeeded and the report has been generated.
    Completed,
}

impl Phase {
    /// Reports whether the phase can no longer change.
    pub fn is_final(&self) -> bool {
        matches!(self, Phase::Failed | Phase::Completed)
    }
}
