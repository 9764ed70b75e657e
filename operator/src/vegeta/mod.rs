//! Vegeta is k8s custom resource that defines a distributed load test.

// Export all spec types
mod spec;
pub use spec::*;

// All other mods are behind the controller flag to keep the deps to a minimum
#[cfg(feature = "controller")]
pub mod command;
#[cfg(feature = "controller")]
pub mod controller;
#[cfg(feature = "controller")]
pub mod pod;
#[cfg(feature = "controller")]
pub(crate) mod status;
#[cfg(feature = "controller")]
pub mod store;

#[cfg(test)]
pub mod stub;
