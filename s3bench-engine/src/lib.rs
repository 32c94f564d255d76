//! The load generation engine behind `s3bench`.
//!
//! A run is a sequence of phases. Each phase sends one kind of [`Request`] for every object of a
//! [`KeySpace`] through a bounded queue to a [`WorkerPool`], which executes them against one or
//! more storage [`Backend`](backend::Backend)s. The [`PhaseRunner`] collects every response and
//! aggregates them into a [`PhaseResult`].
//!
//! Write payloads are synthesized by the [`reduction`] module with configurable compressibility
//! and deduplication characteristics.
#![warn(missing_debug_implementations)]

pub mod backend;
pub mod checksum;
pub mod dispatch;
mod error;
pub mod key;
pub mod payload;
pub mod reduction;
pub mod request;
pub mod runner;
pub mod worker;

use std::io;

use bytes::Bytes;
use futures_util::stream::BoxStream;

pub use checksum::Checksum;
pub use dispatch::{TagTemplate, Workload};
pub use error::{EngineError, EngineResult};
pub use key::KeySpace;
pub use payload::{Payload, PayloadSource};
pub use request::{Operation, Request, RequestError, Response, Tag};
pub use runner::{DurationStats, PhaseResult, PhaseRunner};
pub use worker::{ClientDelay, PoolConfig, WorkerPool};

/// Type alias for object content streamed from a backend.
pub type PayloadStream = BoxStream<'static, io::Result<Bytes>>;
