use std::collections::BTreeMap;

use crate::CONTROLLER_NAME;

/// Name of the tool, used as the app name of every pod.
pub const APP_NAME: &str = "vegeta";

/// Well known labels identifying the pods of a load test.
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
#[allow(missing_docs)]
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
#[allow(missing_docs)]
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Distinguishes attack pods from the report pod.
pub const ROLE_LABEL: &str = "vegeta.testing.io/type";

/// Manage by label
pub const MANAGED_BY_LABEL_SELECTOR: &str = "app.kubernetes.io/managed-by=vegeta-operator";

/// Labels of a pod created for a load test.
///
/// The identity labels win over operator wide labels with the same key.
pub fn unit_labels(
    operator_labels: &BTreeMap<String, String>,
    instance: &str,
    role: &str,
) -> BTreeMap<String, String> {
    let mut labels = operator_labels.clone();
    labels.extend([
        (NAME_LABEL.to_owned(), APP_NAME.to_owned()),
        (INSTANCE_LABEL.to_owned(), instance.to_owned()),
        (MANAGED_BY_LABEL.to_owned(), CONTROLLER_NAME.to_owned()),
        (ROLE_LABEL.to_owned(), role.to_owned()),
    ]);
    labels
}

/// Parse a single `key=value` label.
pub fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_owned(), value.trim().to_owned()))
        }
        _ => Err(format!("label must have the form key=value, got {s:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_labels_override_operator_labels() {
        let operator_labels = BTreeMap::from_iter([
            ("team".to_owned(), "perf".to_owned()),
            (ROLE_LABEL.to_owned(), "bogus".to_owned()),
        ]);
        let labels = unit_labels(&operator_labels, "load", "attack");
        assert_eq!(labels.get("team").map(String::as_str), Some("perf"));
        assert_eq!(labels.get(ROLE_LABEL).map(String::as_str), Some("attack"));
        assert_eq!(labels.get(INSTANCE_LABEL).map(String::as_str), Some("load"));
        assert_eq!(
            labels.get(MANAGED_BY_LABEL).map(String::as_str),
            Some("vegeta-operator")
        );
        assert_eq!(labels.get(NAME_LABEL).map(String::as_str), Some("vegeta"));
    }

    #[test]
    fn managed_by_selector_matches_label() {
        assert_eq!(
            MANAGED_BY_LABEL_SELECTOR,
            format!("{MANAGED_BY_LABEL}={CONTROLLER_NAME}")
        );
    }

    #[test]
    fn parse_labels() {
        assert_eq!(
            parse_label("team=perf"),
            Ok(("team".to_owned(), "perf".to_owned()))
        );
        assert_eq!(
            parse_label("empty="),
            Ok(("empty".to_owned(), "".to_owned()))
        );
        assert!(parse_label("novalue").is_err());
        assert!(parse_label("=value").is_err());
    }
}
