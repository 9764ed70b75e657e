//! Assembles the shell command lines run by attack and report pods.
//!
//! Commands are built as a list of steps, each a pipeline of invocations, each a list of
//! words. Rendering joins words with spaces, invocations with ` | ` and steps with ` && `.
//! Output only depends on the Vegeta resource so a pod recreated after an operator restart
//! runs exactly the same command.

use crate::vegeta::{pod::unit_stem, OutputType, TargetFormat, Vegeta};

/// Directory holding config map sourced files.
pub const CONFIG_PATH: &str = "/opt/config";
/// Directory holding secret sourced files.
pub const CREDENTIALS_PATH: &str = "/opt/config/credentials";
/// Directory shared by attack and report pods for results.
pub const RESULTS_PATH: &str = "/results";
/// Directory holding the trusted root CA bundle.
pub const TRUSTED_CA_PATH: &str = "/etc/pki/ca-trust/extracted/pem";
/// File name of the trusted root CA bundle.
pub const TRUSTED_CA_FILE: &str = "tls-ca-bundle.pem";

/// Name of the request body file.
pub const BODY_FILE: &str = "body.txt";
/// Name of the TLS client certificate file.
pub const CERT_FILE: &str = "client.crt";
/// Name of the TLS client key file.
pub const KEY_FILE: &str = "client.key";

const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";
const SERVICE_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/service-ca.crt";

// Layout of timestamps in result file names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Name of the targets file for the given format. Targets default to the http format.
pub fn targets_file(format: Option<&TargetFormat>) -> &'static str {
    match format {
        Some(TargetFormat::Json) => "targets.json",
        Some(TargetFormat::Http) | None => "targets.http",
    }
}

/// Path of the trusted root CA bundle once mounted.
pub fn trusted_ca_bundle() -> String {
    format!("{TRUSTED_CA_PATH}/{TRUSTED_CA_FILE}")
}

/// Creation time of the resource formatted for file names.
/// A resource that was never persisted falls back to the unix epoch.
fn timestamp(vegeta: &Vegeta) -> String {
    vegeta
        .metadata
        .creation_timestamp
        .as_ref()
        .map(|time| time.0)
        .unwrap_or_default()
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Prefix shared by all result files of a load test, also used to select them in the
/// object store.
pub fn result_prefix(vegeta: &Vegeta) -> String {
    format!("{}-{}", timestamp(vegeta), unit_stem(vegeta))
}

// Pod names start with the unit stem, so files named after the host share the result
// prefix. The shell expands the hostname.
fn host_file(vegeta: &Vegeta, suffix: &str) -> String {
    format!("{RESULTS_PATH}/{}-${{HOSTNAME}}_{suffix}", timestamp(vegeta))
}

/// Path of the binary results written by an attack pod.
pub fn result_file(vegeta: &Vegeta) -> String {
    host_file(vegeta, "res.gob")
}

/// Path of the report written by the report pod.
pub fn report_file(vegeta: &Vegeta) -> String {
    host_file(vegeta, "rep.gob")
}

// Glob matching the results of every attack pod of a load test.
fn results_glob(vegeta: &Vegeta) -> String {
    format!("{RESULTS_PATH}/{}*_res.*", result_prefix(vegeta))
}

/// Quote a word for sh unless it only holds characters without special meaning.
fn quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | ',' | '@' | '%' | '+')
        });
    if safe {
        word.to_owned()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// A single program invocation.
#[derive(Debug, Clone, PartialEq)]
struct Invocation {
    words: Vec<String>,
}

impl Invocation {
    fn new(program: &str) -> Self {
        Self {
            words: vec![program.to_owned()],
        }
    }

    /// Append a word without quoting, for globs and paths relying on expansion.
    fn raw(mut self, word: impl Into<String>) -> Self {
        self.words.push(word.into());
        self
    }

    /// Append a quoted word.
    fn arg(mut self, word: &str) -> Self {
        self.words.push(quote(word));
        self
    }

    /// Append a boolean flag when enabled.
    fn switch(self, flag: &str, enabled: Option<bool>) -> Self {
        if enabled.unwrap_or_default() {
            self.raw(flag)
        } else {
            self
        }
    }

    /// Append a flag and its quoted value when the value is present and not empty.
    fn opt(self, flag: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) if !value.is_empty() => self.raw(flag).arg(value),
            _ => self,
        }
    }

    /// Append a flag and its numeric value when the value is present and not zero.
    fn num<N>(self, flag: &str, value: Option<N>) -> Self
    where
        N: Default + PartialEq + ToString,
    {
        match value {
            Some(value) if value != N::default() => self.raw(flag).raw(value.to_string()),
            _ => self,
        }
    }

    /// Append a flag and an unquoted path when the source is configured.
    fn path(self, flag: &str, source: Option<&String>, path: String) -> Self {
        match source {
            Some(source) if !source.is_empty() => self.raw(flag).raw(path),
            _ => self,
        }
    }

    fn render(&self) -> String {
        self.words.join(" ")
    }
}

/// Steps run in sequence, each step a pipeline of invocations.
#[derive(Debug, Default)]
struct Script {
    steps: Vec<Vec<Invocation>>,
}

impl Script {
    fn step(mut self, pipeline: Vec<Invocation>) -> Self {
        self.steps.push(pipeline);
        self
    }

    fn render(&self) -> String {
        self.steps
            .iter()
            .map(|pipeline| {
                pipeline
                    .iter()
                    .map(Invocation::render)
                    .collect::<Vec<_>>()
                    .join(" | ")
            })
            .collect::<Vec<_>>()
            .join(" && ")
    }
}

fn s3(command: &str) -> Invocation {
    Invocation::new("s3").raw("-command").raw(command)
}

/// Command run by an attack pod.
pub fn attack_command(vegeta: &Vegeta) -> String {
    let attack = &vegeta.spec.attack;
    let mut pipeline = Vec::new();

    let mut cmd = Invocation::new("vegeta").raw("attack");
    if attack
        .targets_config_map
        .as_ref()
        .is_some_and(|cm| !cm.is_empty())
    {
        cmd = cmd.raw("-targets").raw(format!(
            "{CONFIG_PATH}/{}",
            targets_file(attack.format.as_ref())
        ));
    } else if let Some(target) = attack.target.as_deref().filter(|t| !t.is_empty()) {
        pipeline.push(Invocation::new("echo").arg(target));
    }

    let root_certs = format!("{SERVICE_ACCOUNT_CA},{SERVICE_CA},{}", trusted_ca_bundle());
    cmd = cmd
        .path(
            "-body",
            attack.body_config_map.as_ref(),
            format!("{CONFIG_PATH}/{BODY_FILE}"),
        )
        .path(
            "-cert",
            attack.cert_secret.as_ref(),
            format!("{CREDENTIALS_PATH}/{CERT_FILE}"),
        )
        .switch("-chunked", attack.chunked)
        .num("-connections", attack.connections)
        .opt("-duration", attack.duration.as_deref())
        .opt("-format", attack.format.as_ref().map(TargetFormat::as_str))
        .switch("-h2c", attack.h2c);
    for header in &attack.headers {
        cmd = cmd.opt("-header", Some(header));
    }
    cmd = cmd
        .switch("-http2", attack.http2)
        .switch("-insecure", attack.insecure)
        .switch("-keepalive", attack.keep_alive)
        .path(
            "-key",
            attack.key_secret.as_ref(),
            format!("{CREDENTIALS_PATH}/{KEY_FILE}"),
        )
        .switch("-lazy", attack.lazy)
        .num("-max-body", attack.max_body)
        .num("-max-workers", attack.max_workers)
        .opt("-name", attack.name.as_deref())
        .opt("-proxy-header", attack.proxy_header.as_deref())
        .opt("-rate", attack.rate.as_deref())
        .num("-redirects", attack.redirects)
        .path("-root-certs", attack.root_certs_config_map.as_ref(), root_certs)
        .opt("-timeout", attack.timeout.as_deref())
        .num("-workers", attack.workers);

    match vegeta.spec.output_type() {
        // Results on stdout can only be reported right away.
        OutputType::Stdout => {
            pipeline.push(cmd);
            pipeline.push(report_invocation(vegeta, false));
            Script::default().step(pipeline).render()
        }
        OutputType::Pvc => {
            pipeline.push(cmd.raw("-output").raw(result_file(vegeta)));
            Script::default().step(pipeline).render()
        }
        OutputType::Obc => {
            pipeline.push(cmd.raw("-output").raw(result_file(vegeta)));
            Script::default()
                .step(pipeline)
                .step(vec![s3("upload")])
                .render()
        }
    }
}

/// Command run by the report pod.
pub fn report_command(vegeta: &Vegeta) -> String {
    let report = report_invocation(vegeta, true);
    match vegeta.spec.output_type() {
        OutputType::Obc => Script::default()
            .step(vec![s3("download")])
            .step(vec![report])
            .step(vec![s3("upload")])
            .render(),
        OutputType::Stdout | OutputType::Pvc => Script::default().step(vec![report]).render(),
    }
}

// The report reads stdin when piped from the attack, otherwise the result files of all
// attack pods.
fn report_invocation(vegeta: &Vegeta, from_files: bool) -> Invocation {
    let report = vegeta.spec.report.clone().unwrap_or_default();
    let mut cmd = Invocation::new("vegeta")
        .raw("report")
        .opt("-buckets", report.buckets.as_deref())
        .opt("-every", report.every.as_deref());
    if vegeta.spec.output_type() != OutputType::Stdout {
        cmd = cmd.raw("-output").raw(report_file(vegeta));
    }
    cmd = cmd.opt("-type", report.report_type.as_ref().map(|t| t.as_str()));
    if from_files {
        cmd = cmd.raw(results_glob(vegeta));
    }
    cmd
}
