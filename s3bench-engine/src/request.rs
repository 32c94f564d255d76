//! Values flowing through the workload pipeline.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendError;
use crate::checksum::Checksum;

/// The kind of operation a phase executes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum Operation {
    /// Upload the payload.
    Write,
    /// Replace the tag set of each object.
    PutObjTag,
    /// Fetch the tag set of each object.
    GetObjTag,
    /// Fetch object metadata only.
    HeadObj,
    /// Download and discard the content.
    Read,
    /// Download the content and compare its checksum.
    Validate,
}

impl Operation {
    /// Returns the name used in logs and reports.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Write => "Write",
            Operation::PutObjTag => "PutObjTag",
            Operation::GetObjTag => "GetObjTag",
            Operation::HeadObj => "HeadObj",
            Operation::Read => "Read",
            Operation::Validate => "Validate",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single object tag.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A unit of work handed from the dispatcher to exactly one worker.
#[derive(Debug)]
pub enum Request {
    /// Upload `payload` under `key`.
    Write { key: String, payload: Bytes },
    /// Download `key` and check its length.
    Read { key: String },
    /// Download `key`, check its length and compare its checksum with `expected`.
    Validate { key: String, expected: Checksum },
    /// Fetch the content length of `key`.
    Head { key: String },
    /// Replace the tags of `key`.
    PutTag { key: String, tags: Vec<Tag> },
    /// Fetch the tags of `key`.
    GetTag { key: String },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::Write { .. } => Operation::Write,
            Request::Read { .. } => Operation::Read,
            Request::Validate { .. } => Operation::Validate,
            Request::Head { .. } => Operation::HeadObj,
            Request::PutTag { .. } => Operation::PutObjTag,
            Request::GetTag { .. } => Operation::GetObjTag,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Request::Write { key, .. }
            | Request::Read { key }
            | Request::Validate { key, .. }
            | Request::Head { key }
            | Request::PutTag { key, .. }
            | Request::GetTag { key } => key,
        }
    }
}

/// Why a request did not succeed.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The backend call itself failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The object has a different size than configured.
    #[error("expected object length {expected}, actual {actual}")]
    LengthMismatch { expected: u64, actual: u64 },

    /// The downloaded content differs from what was written.
    #[error("read data checksum {actual} is not eq to write data checksum {expected}")]
    ChecksumMismatch {
        expected: Checksum,
        actual: Checksum,
    },
}

/// The outcome of executing one [`Request`].
#[derive(Debug)]
pub struct Response {
    /// The operation that was executed.
    pub operation: Operation,
    /// `Ok` if the call succeeded and all postconditions held.
    pub result: Result<(), RequestError>,
    /// Time from issuing the call until the response was fully consumed.
    pub duration: Duration,
    /// Time from issuing the call until the first response data arrived.
    pub ttfb: Duration,
    /// Number of payload bytes sent or received.
    pub bytes: u64,
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}
