//! Core library for devpush
//!
//! This crate turns a devfile into the Kubernetes objects of a development
//! component and keeps them in sync with the cluster: command resolution,
//! container and service synthesis, supervisor entrypoint wrapping, init
//! containers for preStart events, reconciliation and in-pod execution.

pub mod cluster;
pub mod command;
pub mod component;
pub mod config;
pub mod container;
pub mod devfile;
pub mod entrypoint;
pub mod errors;
pub mod exec;
pub mod io;
pub mod kube_client;
pub mod lifecycle;
pub mod logging;
pub mod naming;
pub mod ports;

// Re-export IndexMap for use by dependent crates (preserves insertion order for ordered maps)
pub use indexmap::IndexMap;

/// Get the version of the core library
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = version();
        assert!(!version.is_empty());
        assert!(version.contains('.'));
    }
}
