//! Builds the pods running attacks and reports.
use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvFromSource,
    EnvVar, KeyToPath, PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec,
    SecretEnvSource, SecretVolumeSource, Volume, VolumeMount,
};
use kube::{api::ObjectMeta, Resource, ResourceExt};

use crate::{
    labels::{unit_labels, ROLE_LABEL},
    utils::ControllerConfig,
    vegeta::{
        command::{
            attack_command, report_command, report_file, result_file, result_prefix,
            targets_file, trusted_ca_bundle, BODY_FILE, CERT_FILE, CONFIG_PATH,
            CREDENTIALS_PATH, KEY_FILE, RESULTS_PATH, TRUSTED_CA_FILE, TRUSTED_CA_PATH,
        },
        OutputType, Vegeta,
    },
};

const CONTAINER_NAME: &str = "vegeta";
const RESULTS_VOLUME: &str = "vegeta-results";
const TRUSTED_CA_VOLUME: &str = "trusted-ca";
const DEFAULT_CA_KEY: &str = "ca-bundle.crt";
// r--r--r--
const READ_ONLY_MODE: i32 = 0o444;

/// Role of a pod within a load test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Runs the attack, one per replica.
    Attack,
    /// Aggregates the results of all attack pods.
    Report,
}

impl Role {
    /// Value of the role label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Attack => "attack",
            Role::Report => "report",
        }
    }

    /// Role of an existing pod, read from its labels.
    pub fn of(pod: &Pod) -> Option<Role> {
        match pod.labels().get(ROLE_LABEL).map(String::as_str) {
            Some("attack") => Some(Role::Attack),
            Some("report") => Some(Role::Report),
            _ => None,
        }
    }
}

// The kubelet cuts hostnames to 63 characters and pod names double as hostnames.
const MAX_HOSTNAME_LEN: usize = 63;
// Room left for the load test name next to the longest attack suffix, a u32 slot included.
const MAX_STEM_LEN: usize = MAX_HOSTNAME_LEN - "-attack-".len() - 10;

/// Load test name as it appears in pod names and result files.
pub fn unit_stem(vegeta: &Vegeta) -> String {
    vegeta.name_any().chars().take(MAX_STEM_LEN).collect()
}

/// Name of the attack pod filling the given replica slot.
pub fn attack_pod_name(vegeta: &Vegeta, slot: u32) -> String {
    format!("{}-attack-{slot}", unit_stem(vegeta))
}

/// Name of the report pod.
pub fn report_pod_name(vegeta: &Vegeta) -> String {
    format!("{}-report", unit_stem(vegeta))
}

/// Pod running the attack for the given replica slot.
pub fn attack_pod(vegeta: &Vegeta, config: &ControllerConfig, slot: u32) -> Pod {
    let attack = &vegeta.spec.attack;
    let (mut volumes, mut mounts) = shared_volumes(vegeta);

    if let Some(name) = present(&attack.body_config_map) {
        add_file(
            &mut volumes,
            &mut mounts,
            "body",
            Source::ConfigMap(name),
            BODY_FILE,
            CONFIG_PATH,
        );
    }
    if let Some(name) = present(&attack.cert_secret) {
        add_file(
            &mut volumes,
            &mut mounts,
            "cert",
            Source::Secret(name),
            CERT_FILE,
            CREDENTIALS_PATH,
        );
    }
    if let Some(name) = present(&attack.key_secret) {
        add_file(
            &mut volumes,
            &mut mounts,
            "key",
            Source::Secret(name),
            KEY_FILE,
            CREDENTIALS_PATH,
        );
    }
    if let Some(name) = present(&attack.targets_config_map) {
        add_file(
            &mut volumes,
            &mut mounts,
            "targets",
            Source::ConfigMap(name),
            targets_file(attack.format.as_ref()),
            CONFIG_PATH,
        );
    }

    let mut env = Vec::new();
    if vegeta.spec.output_type() == OutputType::Obc {
        env.push(env_var("S3_UPLOAD_FILE", result_file(vegeta)));
    }
    env.extend(ssl_cert_env(vegeta));

    unit(
        vegeta,
        config,
        Role::Attack,
        attack_pod_name(vegeta, slot),
        attack_command(vegeta),
        volumes,
        mounts,
        env,
    )
}

/// Pod aggregating the results of the attack pods into a report.
pub fn report_pod(vegeta: &Vegeta, config: &ControllerConfig) -> Pod {
    let (volumes, mounts) = shared_volumes(vegeta);

    let mut env = Vec::new();
    if vegeta.spec.output_type() == OutputType::Obc {
        env.push(env_var("S3_OBJECT_PREFIX", result_prefix(vegeta)));
        env.push(env_var("S3_UPLOAD_FILE", report_file(vegeta)));
    }
    env.extend(ssl_cert_env(vegeta));

    unit(
        vegeta,
        config,
        Role::Report,
        report_pod_name(vegeta),
        report_command(vegeta),
        volumes,
        mounts,
        env,
    )
}

#[allow(clippy::too_many_arguments)]
fn unit(
    vegeta: &Vegeta,
    config: &ControllerConfig,
    role: Role,
    name: String,
    command: String,
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
    env: Vec<EnvVar>,
) -> Pod {
    let image = vegeta
        .spec
        .image
        .as_deref()
        .map(str::trim)
        .filter(|image| !image.is_empty())
        .unwrap_or(&config.image)
        .to_owned();
    let orefs = vegeta
        .controller_owner_ref(&())
        .map(|oref| vec![oref])
        .unwrap_or_default();

    Pod {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: vegeta.namespace(),
            labels: Some(unit_labels(&config.labels, &vegeta.name_any(), role.as_str())),
            owner_references: Some(orefs),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.to_owned(),
                image: Some(image),
                image_pull_policy: Some(config.image_pull_policy.clone()),
                command: Some(vec!["/bin/sh".to_owned()]),
                args: Some(vec!["-c".to_owned(), command]),
                resources: vegeta.spec.resources.clone(),
                volume_mounts: Some(mounts),
                working_dir: Some(RESULTS_PATH.to_owned()),
                env: (!env.is_empty()).then_some(env),
                env_from: env_from(vegeta),
                ..Default::default()
            }],
            restart_policy: Some("Never".to_owned()),
            security_context: Some(PodSecurityContext::default()),
            termination_grace_period_seconds: Some(0),
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value),
        ..Default::default()
    }
}

fn ssl_cert_env(vegeta: &Vegeta) -> Option<EnvVar> {
    present(&vegeta.spec.attack.root_certs_config_map)
        .map(|_| env_var("SSL_CERT_FILE", trusted_ca_bundle()))
}

// The object bucket claim publishes the bucket location in a config map and the
// credentials in a secret, both named after the claim.
fn env_from(vegeta: &Vegeta) -> Option<Vec<EnvFromSource>> {
    if vegeta.spec.output_type() != OutputType::Obc {
        return None;
    }
    let claim = vegeta
        .spec
        .report
        .as_ref()
        .and_then(|report| report.output_claim.clone())
        .unwrap_or_default();
    Some(vec![
        EnvFromSource {
            config_map_ref: Some(ConfigMapEnvSource {
                name: Some(claim.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
        EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: Some(claim),
                ..Default::default()
            }),
            ..Default::default()
        },
    ])
}

/// Volumes and mounts used by both roles: the results directory and the trusted root CAs.
fn shared_volumes(vegeta: &Vegeta) -> (Vec<Volume>, Vec<VolumeMount>) {
    let claim = vegeta
        .spec
        .report
        .as_ref()
        .and_then(|report| report.output_claim.clone())
        .filter(|claim| !claim.is_empty());
    let results = match (vegeta.spec.output_type(), claim) {
        (OutputType::Pvc, Some(claim_name)) => Volume {
            name: RESULTS_VOLUME.to_owned(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name,
                ..Default::default()
            }),
            ..Default::default()
        },
        _ => Volume {
            name: RESULTS_VOLUME.to_owned(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
    };
    let mut volumes = vec![results];
    let mut mounts = vec![VolumeMount {
        name: RESULTS_VOLUME.to_owned(),
        mount_path: RESULTS_PATH.to_owned(),
        ..Default::default()
    }];

    let attack = &vegeta.spec.attack;
    if let Some(name) = present(&attack.root_certs_config_map) {
        let key = present(&attack.root_certs_file).unwrap_or(DEFAULT_CA_KEY);
        volumes.push(Volume {
            name: TRUSTED_CA_VOLUME.to_owned(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(name.to_owned()),
                items: Some(vec![KeyToPath {
                    key: key.to_owned(),
                    path: TRUSTED_CA_FILE.to_owned(),
                    ..Default::default()
                }]),
                default_mode: Some(READ_ONLY_MODE),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: TRUSTED_CA_VOLUME.to_owned(),
            mount_path: TRUSTED_CA_PATH.to_owned(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    (volumes, mounts)
}

enum Source<'a> {
    ConfigMap(&'a str),
    Secret(&'a str),
}

// Each file is mounted on its own so config maps and secrets can share a directory.
fn add_file(
    volumes: &mut Vec<Volume>,
    mounts: &mut Vec<VolumeMount>,
    volume: &str,
    source: Source,
    file: &str,
    dir: &str,
) {
    let items = Some(vec![KeyToPath {
        key: file.to_owned(),
        path: file.to_owned(),
        ..Default::default()
    }]);
    let mut entry = Volume {
        name: volume.to_owned(),
        ..Default::default()
    };
    match source {
        Source::ConfigMap(name) => {
            entry.config_map = Some(ConfigMapVolumeSource {
                name: Some(name.to_owned()),
                items,
                default_mode: Some(READ_ONLY_MODE),
                ..Default::default()
            })
        }
        Source::Secret(name) => {
            entry.secret = Some(SecretVolumeSource {
                secret_name: Some(name.to_owned()),
                items,
                default_mode: Some(READ_ONLY_MODE),
                ..Default::default()
            })
        }
    }
    volumes.push(entry);
    mounts.push(VolumeMount {
        name: volume.to_owned(),
        mount_path: format!("{dir}/{file}"),
        sub_path: Some(file.to_owned()),
        read_only: Some(true),
        ..Default::default()
    });
}
