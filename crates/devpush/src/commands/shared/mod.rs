//! Shared helpers for command implementations.

pub mod config_loader;
pub mod output;

pub use config_loader::{load, ComponentOptions, LoadArgs, LoadResult};
pub use output::write_json;
