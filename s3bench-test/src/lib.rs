//! Test utilities for s3bench.
//!
//! See the modules for all available utilities.

pub mod tracing;
