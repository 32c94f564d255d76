//! Turns a phase into a stream of [`Request`]s.
//!
//! The dispatcher sends into a bounded channel and therefore can never run ahead of the worker
//! pool by more than the channel capacity.

use tokio::sync::mpsc;

use crate::checksum::Checksum;
use crate::key::KeySpace;
use crate::payload::Payload;
use crate::request::{Operation, Request, Tag};

/// How tag sets for [`Operation::PutObjTag`] are built.
#[derive(Clone, Debug)]
pub struct TagTemplate {
    /// Number of tags per object.
    pub count: usize,
    /// Prefix of every tag name, followed by the tag index.
    pub name_prefix: String,
    /// Prefix of every tag value, followed by the tag index.
    pub value_prefix: String,
}

impl TagTemplate {
    /// Builds the tag set written to every object.
    pub fn build(&self) -> Vec<Tag> {
        (0..self.count)
            .map(|i| {
                Tag::new(
                    format!("{}{i}", self.name_prefix),
                    format!("{}{i}", self.value_prefix),
                )
            })
            .collect()
    }
}

impl Default for TagTemplate {
    fn default() -> Self {
        Self {
            count: 10,
            name_prefix: "tag_name_".to_owned(),
            value_prefix: "tag_val_".to_owned(),
        }
    }
}

/// Everything the dispatcher needs to build requests for any phase.
#[derive(Clone, Debug)]
pub struct Workload {
    /// The objects touched by the run.
    pub keys: KeySpace,
    /// The write payload, or `None` if this run does not write.
    pub payload: Option<Payload>,
    /// How many times every object is read, validated or headed.
    pub sample_reads: usize,
    /// Tag sets for tagging phases.
    pub tags: TagTemplate,
}

impl Workload {
    /// Returns the number of requests issued by a phase of the given operation.
    pub fn request_count(&self, operation: Operation) -> usize {
        match operation {
            Operation::Write | Operation::PutObjTag | Operation::GetObjTag => self.keys.samples(),
            Operation::Read | Operation::Validate | Operation::HeadObj => {
                self.keys.samples() * self.sample_reads
            }
        }
    }

    /// The checksum a validated read of the given sample must match.
    fn expected_checksum(&self, sample: usize) -> Checksum {
        match &self.payload {
            Some(payload) => payload.checksum(sample),
            None => self.keys.checksum(),
        }
    }

    /// Builds the request with the given ordinal within a phase.
    ///
    /// Returns `None` for a write if the workload has no payload.
    pub fn request(&self, operation: Operation, index: usize) -> Option<Request> {
        let sample = index % self.keys.samples().max(1);
        let key = self.keys.key(sample);

        let request = match operation {
            Operation::Write => Request::Write {
                key,
                payload: self.payload.as_ref()?.data(sample),
            },
            Operation::Read => Request::Read { key },
            Operation::Validate => Request::Validate {
                key,
                expected: self.expected_checksum(sample),
            },
            Operation::HeadObj => Request::Head { key },
            Operation::PutObjTag => Request::PutTag {
                key,
                tags: self.tags.build(),
            },
            Operation::GetObjTag => Request::GetTag { key },
        };

        Some(request)
    }
}

/// Sends every request of one phase into `requests`.
///
/// Returns the number of requests sent. This is less than
/// [`request_count`](Workload::request_count) only if the receiving side was closed or a write
/// phase was requested without a payload.
pub async fn dispatch(
    workload: &Workload,
    operation: Operation,
    requests: &mpsc::Sender<Request>,
) -> usize {
    let count = workload.request_count(operation);

    for index in 0..count {
        let Some(request) = workload.request(operation, index) else {
            tracing::error!(%operation, "no payload available for writing");
            return index;
        };

        if requests.send(request).await.is_err() {
            tracing::error!(%operation, index, "worker pool is gone");
            return index;
        }
    }

    count
}
