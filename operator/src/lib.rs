//! Provides API for the operator and related tooling.
#![warn(missing_docs)]

/// Labels module for managing pod labels.
#[cfg(feature = "controller")]
pub mod labels;
/// Utils module for shared controller configuration.
#[cfg(feature = "controller")]
pub mod utils;
/// Vegeta module for load test resources.
pub mod vegeta;

/// Name of the operator, recorded as the manager of every pod.
#[cfg(feature = "controller")]
const CONTROLLER_NAME: &str = "vegeta-operator";
