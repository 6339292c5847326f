//! Utility modules
//!
//! This module contains common utilities used across the codebase.

pub mod deadline;

pub use deadline::{cancellable, with_deadline};
