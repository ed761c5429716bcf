//! Command implementations
//!
//! This module contains implementations for all CLI subcommands.

pub mod delete;
pub mod push;
pub mod render;
pub mod resolve;
pub mod shared;
