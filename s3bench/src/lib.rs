//! Load generator for S3 compatible object stores.
//!
//! This builds on top of [`s3bench_engine`] and adds configuration, the pre-flight setup of a
//! run, cleanup and reporting.

pub mod bench;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod observability;
pub mod preflight;
pub mod report;
pub mod size;
