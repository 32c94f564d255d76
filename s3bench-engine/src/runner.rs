//! Runs phases on a worker pool and aggregates their outcomes.

use std::time::{Duration, Instant};

use crate::dispatch::{self, Workload};
use crate::error::{EngineError, EngineResult};
use crate::request::Operation;
use crate::worker::WorkerPool;

/// The aggregated outcome of one phase.
#[derive(Clone, Debug)]
pub struct PhaseResult {
    /// The operation executed by every request of the phase.
    pub operation: Operation,
    /// Durations of successful requests, sorted ascending.
    pub durations: Vec<Duration>,
    /// Times to first byte of successful requests, sorted ascending.
    pub ttfbs: Vec<Duration>,
    /// One message per failed request.
    pub errors: Vec<String>,
    /// Bytes transferred by successful requests.
    pub bytes: u64,
    /// Wall clock time from the first dispatch to the last response.
    pub total_duration: Duration,
}

impl PhaseResult {
    fn new(operation: Operation, expected: usize) -> Self {
        Self {
            operation,
            durations: Vec::with_capacity(expected),
            ttfbs: Vec::with_capacity(expected),
            errors: Vec::new(),
            bytes: 0,
            total_duration: Duration::ZERO,
        }
    }

    /// Total number of requests issued by the phase.
    pub fn request_count(&self) -> usize {
        self.durations.len() + self.errors.len()
    }

    /// Throughput of successful requests in bytes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Summary statistics over a sorted sequence of durations.
pub trait DurationStats {
    /// The smallest value.
    fn minimum(&self) -> Option<Duration>;
    /// The largest value.
    fn maximum(&self) -> Option<Duration>;
    /// The arithmetic mean.
    fn average(&self) -> Option<Duration>;
    /// The nearest-rank percentile, `percentile` in `0..=100`.
    fn percentile(&self, percentile: f64) -> Option<Duration>;
}

impl DurationStats for [Duration] {
    fn minimum(&self) -> Option<Duration> {
        self.first().copied()
    }

    fn maximum(&self) -> Option<Duration> {
        self.last().copied()
    }

    fn average(&self) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        let total: Duration = self.iter().sum();
        let average = match u32::try_from(self.len()) {
            Ok(len) => total / len,
            Err(_) => total.div_f64(self.len() as f64),
        };
        Some(average)
    }

    fn percentile(&self, percentile: f64) -> Option<Duration> {
        if self.is_empty() {
            return None;
        }
        let rank = (percentile / 100.0 * self.len() as f64).ceil() as usize;
        let index = rank.clamp(1, self.len()) - 1;
        Some(self[index])
    }
}

/// Executes phases one after another on a shared worker pool.
#[derive(Debug)]
pub struct PhaseRunner {
    pool: WorkerPool,
    workload: Workload,
}

impl PhaseRunner {
    pub fn new(pool: WorkerPool, workload: Workload) -> Self {
        Self { pool, workload }
    }

    /// The workload requests are built from.
    pub fn workload(&self) -> &Workload {
        &self.workload
    }

    /// Runs one phase to completion.
    ///
    /// Collects exactly as many responses as the phase issues requests, in whatever order they
    /// complete. Failed requests are recorded in the result and never stop the phase.
    pub async fn run(&mut self, operation: Operation) -> EngineResult<PhaseResult> {
        if operation == Operation::Write && self.workload.payload.is_none() {
            return Err(EngineError::MissingPayload(operation));
        }

        let expected = self.workload.request_count(operation);
        tracing::info!(%operation, requests = expected, "starting phase");

        let start = Instant::now();
        let workload = self.workload.clone();
        let sender = self.pool.sender();
        let dispatcher =
            tokio::spawn(async move { dispatch::dispatch(&workload, operation, &sender).await });

        let mut result = PhaseResult::new(operation, expected);
        for ordinal in 1..=expected {
            let Some(response) = self.pool.recv().await else {
                dispatcher.abort();
                return Err(EngineError::PoolClosed {
                    operation,
                    collected: ordinal - 1,
                    expected,
                });
            };

            let secs = response.duration.as_secs_f64();
            match response.result {
                Ok(()) => {
                    tracing::debug!("operation {operation}({ordinal}) completed in {secs:.2}s");
                    result.bytes += response.bytes;
                    result.durations.push(response.duration);
                    result.ttfbs.push(response.ttfb);
                }
                Err(err) => {
                    let message =
                        format!("{operation}({ordinal}) completed in {secs:.2}s with error {err}");
                    tracing::debug!("operation {message}");
                    result.errors.push(message);
                }
            }
        }
        result.total_duration = start.elapsed();

        if let Err(err) = dispatcher.await {
            tracing::error!(error = &err as &dyn std::error::Error, "dispatcher failed");
        }

        result.durations.sort_unstable();
        result.ttfbs.sort_unstable();

        tracing::info!(
            %operation,
            requests = result.request_count(),
            errors = result.errors.len(),
            duration = ?result.total_duration,
            "finished phase"
        );

        Ok(result)
    }

    /// Runs the given phases in order.
    pub async fn run_all(
        &mut self,
        operations: impl IntoIterator<Item = Operation>,
    ) -> EngineResult<Vec<PhaseResult>> {
        let mut results = Vec::new();
        for operation in operations {
            results.push(self.run(operation).await?);
        }
        Ok(results)
    }

    /// Stops the worker pool.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_millis).collect()
    }

    #[test]
    fn stats_of_empty_sequence() {
        let empty: Vec<Duration> = Vec::new();
        assert_eq!(empty.minimum(), None);
        assert_eq!(empty.average(), None);
        assert_eq!(empty.percentile(50.0), None);
    }

    #[test]
    fn average_keeps_nanosecond_precision() {
        let values = [1, 2, 4].map(Duration::from_nanos);
        assert_eq!(values.average(), Some(Duration::from_nanos(2)));

        let values = vec![Duration::from_micros(3); 1000];
        assert_eq!(values.average(), Some(Duration::from_micros(3)));
    }

    #[test]
    fn nearest_rank_percentiles() {
        let values = millis(&[10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);

        assert_eq!(values.minimum(), Some(Duration::from_millis(10)));
        assert_eq!(values.maximum(), Some(Duration::from_millis(100)));
        assert_eq!(values.average(), Some(Duration::from_millis(55)));
        assert_eq!(values.percentile(25.0), Some(Duration::from_millis(30)));
        assert_eq!(values.percentile(50.0), Some(Duration::from_millis(50)));
        assert_eq!(values.percentile(90.0), Some(Duration::from_millis(90)));
        assert_eq!(values.percentile(99.0), Some(Duration::from_millis(100)));
        assert_eq!(values.percentile(0.0), Some(Duration::from_millis(10)));
    }

    #[test]
    fn throughput() {
        let mut result = PhaseResult::new(Operation::Read, 0);
        assert_eq!(result.throughput(), 0.0);

        result.bytes = 3000;
        result.total_duration = Duration::from_secs(2);
        assert_eq!(result.throughput(), 1500.0);
    }
}
