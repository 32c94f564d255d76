//! The pool of concurrent workers executing requests against the backends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::TryStreamExt;
use rand::Rng;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::backend::{Backend, BackendError, SharedBackend};
use crate::checksum::{Checksum, ChecksumHasher};
use crate::error::{EngineError, EngineResult};
use crate::request::{Request, RequestError, Response};

/// Delay between starting two consecutive workers.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ClientDelay {
    /// Start all workers at once.
    #[default]
    None,
    /// Wait a fixed time between two consecutive workers.
    Fixed(Duration),
    /// Wait a random time below the given bound between two consecutive workers.
    Random(Duration),
}

impl ClientDelay {
    /// Interprets milliseconds, where negative values request a random delay up to the magnitude.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => ClientDelay::None,
            1.. => ClientDelay::Fixed(Duration::from_millis(millis as u64)),
            _ => ClientDelay::Random(Duration::from_millis(millis.unsigned_abs())),
        }
    }

    fn next(self) -> Duration {
        match self {
            ClientDelay::None => Duration::ZERO,
            ClientDelay::Fixed(delay) => delay,
            ClientDelay::Random(bound) if bound.is_zero() => Duration::ZERO,
            ClientDelay::Random(bound) => rand::rng().random_range(Duration::ZERO..bound),
        }
    }
}

/// Settings of a [`WorkerPool`].
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Number of concurrent workers.
    pub clients: usize,
    /// Stagger between worker startups.
    pub client_delay: ClientDelay,
    /// The length every object is expected to have.
    pub object_size: u64,
}

/// A fixed set of workers sharing one request queue and one response queue.
///
/// Both queues hold a single element, so the producer blocks until a worker is free. The pool
/// lives across phases; it shuts down once all request senders are dropped.
#[derive(Debug)]
pub struct WorkerPool {
    requests: mpsc::Sender<Request>,
    responses: mpsc::Receiver<Response>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `config.clients` workers, assigning backends round robin.
    ///
    /// Returns once every worker has been started, which includes the startup stagger.
    pub async fn start(backends: Vec<SharedBackend>, config: PoolConfig) -> EngineResult<Self> {
        if backends.is_empty() {
            return Err(EngineError::NoBackends);
        }
        if config.clients == 0 {
            return Err(EngineError::NoWorkers);
        }

        let (request_tx, request_rx) = mpsc::channel(1);
        let (response_tx, response_rx) = mpsc::channel(1);
        let request_rx = Arc::new(Mutex::new(request_rx));

        let mut workers = Vec::with_capacity(config.clients);
        for id in 0..config.clients {
            if id > 0 {
                let delay = config.client_delay.next();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let backend = Arc::clone(&backends[id % backends.len()]);
            let worker = Worker {
                backend,
                object_size: config.object_size,
                requests: Arc::clone(&request_rx),
                responses: response_tx.clone(),
            };

            let span = tracing::debug_span!("worker", id);
            workers.push(tokio::spawn(worker.run().instrument(span)));
        }

        tracing::debug!(workers = workers.len(), "worker pool started");

        Ok(Self {
            requests: request_tx,
            responses: response_rx,
            workers,
        })
    }

    /// Returns a handle for submitting requests.
    pub fn sender(&self) -> mpsc::Sender<Request> {
        self.requests.clone()
    }

    /// Waits for the next response from any worker.
    ///
    /// Returns `None` once all workers have exited.
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` if the pool has no workers.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Closes the request queue and waits for all workers to exit.
    pub async fn shutdown(self) {
        let Self {
            requests,
            mut responses,
            workers,
        } = self;

        drop(requests);
        // Unblock workers stuck on a full response queue.
        responses.close();

        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = &err as &dyn std::error::Error, "worker panicked");
            }
        }
    }
}

struct Worker {
    backend: SharedBackend,
    object_size: u64,
    requests: Arc<Mutex<mpsc::Receiver<Request>>>,
    responses: mpsc::Sender<Response>,
}

impl Worker {
    async fn run(self) {
        loop {
            // The lock is only held while waiting, never while executing.
            let next = self.requests.lock().await.recv().await;
            let Some(request) = next else {
                break;
            };

            let response = execute(self.backend.as_ref(), request, self.object_size).await;
            if self.responses.send(response).await.is_err() {
                break;
            }
        }
    }
}

/// Timing and accounting of one request in flight.
struct Execution {
    start: Instant,
    ttfb: Option<Duration>,
    bytes: u64,
}

impl Execution {
    fn start() -> Self {
        Self {
            start: Instant::now(),
            ttfb: None,
            bytes: 0,
        }
    }

    fn first_byte(&mut self) {
        if self.ttfb.is_none() {
            self.ttfb = Some(self.start.elapsed());
        }
    }
}

/// Runs a single request and checks its postconditions.
///
/// Never fails: backend errors and violated postconditions are part of the returned
/// [`Response`].
pub async fn execute(backend: &dyn Backend, request: Request, object_size: u64) -> Response {
    let operation = request.operation();
    let mut exec = Execution::start();

    let result = match request {
        Request::Write { key, payload } => {
            write(backend, &key, payload, object_size, &mut exec).await
        }
        Request::Read { key } => read(backend, &key, object_size, None, &mut exec).await,
        Request::Validate { key, expected } => {
            read(backend, &key, object_size, Some(expected), &mut exec).await
        }
        Request::Head { key } => head(backend, &key, object_size, &mut exec).await,
        Request::PutTag { key, tags } => backend
            .put_object_tags(&key, &tags)
            .await
            .map_err(RequestError::from),
        Request::GetTag { key } => backend
            .get_object_tags(&key)
            .await
            .map(drop)
            .map_err(RequestError::from),
    };

    let duration = exec.start.elapsed();
    Response {
        operation,
        result,
        duration,
        ttfb: exec.ttfb.unwrap_or(duration),
        bytes: exec.bytes,
    }
}

fn expect_length(expected: u64, actual: u64) -> Result<(), RequestError> {
    if expected == actual {
        Ok(())
    } else {
        Err(RequestError::LengthMismatch { expected, actual })
    }
}

async fn write(
    backend: &dyn Backend,
    key: &str,
    payload: bytes::Bytes,
    object_size: u64,
    exec: &mut Execution,
) -> Result<(), RequestError> {
    let accepted = backend.put_object(key, payload).await?;
    exec.first_byte();
    expect_length(object_size, accepted)?;
    exec.bytes = accepted;
    Ok(())
}

async fn read(
    backend: &dyn Backend,
    key: &str,
    object_size: u64,
    expected: Option<Checksum>,
    exec: &mut Execution,
) -> Result<(), RequestError> {
    let mut stream = backend.get_object(key).await?;

    let mut hasher = expected.map(|_| ChecksumHasher::new());
    let mut received = 0;
    while let Some(chunk) = stream.try_next().await.map_err(BackendError::from)? {
        exec.first_byte();
        received += chunk.len() as u64;
        if let Some(hasher) = &mut hasher {
            hasher.update(&chunk);
        }
    }

    expect_length(object_size, received)?;
    exec.bytes = received;

    if let (Some(expected), Some(hasher)) = (expected, hasher) {
        let actual = hasher.finish();
        if actual != expected {
            return Err(RequestError::ChecksumMismatch { expected, actual });
        }
    }

    Ok(())
}

async fn head(
    backend: &dyn Backend,
    key: &str,
    object_size: u64,
    exec: &mut Execution,
) -> Result<(), RequestError> {
    let length = backend.head_object(key).await?;
    exec.first_byte();
    expect_length(object_size, length)?;
    exec.bytes = length;
    Ok(())
}
