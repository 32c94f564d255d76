//! Runs complete phases through a worker pool against the in-memory backend.

use std::sync::Arc;

use s3bench_engine::backend::{InMemoryBackend, SharedBackend};
use s3bench_engine::{
    ClientDelay, KeySpace, Operation, Payload, PhaseRunner, PoolConfig, TagTemplate, WorkerPool,
    Workload,
};

const OBJECT_SIZE: usize = 4096;

fn workload(samples: usize, sample_reads: usize) -> Workload {
    let payload = Payload::shared(vec![7u8; OBJECT_SIZE]);
    Workload {
        keys: KeySpace::new("phases_", payload.canonical_checksum(), samples),
        payload: Some(payload),
        sample_reads,
        tags: TagTemplate::default(),
    }
}

async fn runner(backend: InMemoryBackend, clients: usize, workload: Workload) -> PhaseRunner {
    let config = PoolConfig {
        clients,
        client_delay: ClientDelay::None,
        object_size: OBJECT_SIZE as u64,
    };
    let backends: Vec<SharedBackend> = vec![Arc::new(backend)];
    let pool = WorkerPool::start(backends, config).await.unwrap();
    PhaseRunner::new(pool, workload)
}

#[tokio::test]
async fn collects_every_outcome_despite_failures() {
    s3bench_test::tracing::init();

    let backend = InMemoryBackend::new().fail_every(3);
    let mut runner = runner(backend.clone(), 3, workload(10, 1)).await;

    let result = runner.run(Operation::Write).await.unwrap();

    assert_eq!(result.request_count(), 10);
    assert_eq!(result.errors.len(), 3);
    assert_eq!(result.durations.len(), 7);
    assert_eq!(result.bytes, 7 * OBJECT_SIZE as u64);
    assert_eq!(backend.len(), 7);
    for error in &result.errors {
        assert!(error.starts_with("Write("), "{error}");
        assert!(error.contains("with error"), "{error}");
    }

    runner.shutdown().await;
}

#[tokio::test]
async fn collects_every_outcome_when_all_fail() {
    let backend = InMemoryBackend::new().fail_every(1);
    let mut runner = runner(backend, 2, workload(5, 1)).await;

    let result = runner.run(Operation::Write).await.unwrap();

    assert_eq!(result.request_count(), 5);
    assert_eq!(result.errors.len(), 5);
    assert!(result.durations.is_empty());
    assert_eq!(result.bytes, 0);

    runner.shutdown().await;
}

#[tokio::test]
async fn runs_all_phases_in_order() {
    let backend = InMemoryBackend::new();
    let mut runner = runner(backend.clone(), 2, workload(4, 3)).await;

    let operations = [
        Operation::Write,
        Operation::PutObjTag,
        Operation::GetObjTag,
        Operation::HeadObj,
        Operation::Read,
        Operation::Validate,
    ];
    let results = runner.run_all(operations).await.unwrap();

    let counts: Vec<_> = results
        .iter()
        .map(|result| (result.operation, result.request_count()))
        .collect();
    assert_eq!(
        counts,
        [
            (Operation::Write, 4),
            (Operation::PutObjTag, 4),
            (Operation::GetObjTag, 4),
            (Operation::HeadObj, 12),
            (Operation::Read, 12),
            (Operation::Validate, 12),
        ]
    );
    for result in &results {
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.durations.is_sorted());
        assert!(result.ttfbs.is_sorted());
    }

    let key = runner.workload().keys.key(0);
    assert_eq!(backend.get_tags(&key).unwrap().len(), 10);

    runner.shutdown().await;
}

#[tokio::test]
async fn validate_detects_corruption() {
    let backend = InMemoryBackend::new();
    let mut runner = runner(backend.clone(), 2, workload(3, 1)).await;

    runner.run(Operation::Write).await.unwrap();
    let corrupted = runner.workload().keys.key(1);
    backend.insert(corrupted, vec![8u8; OBJECT_SIZE]);

    let result = runner.run(Operation::Validate).await.unwrap();

    assert_eq!(result.request_count(), 3);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("is not eq to write data checksum"));

    runner.shutdown().await;
}

#[tokio::test]
async fn write_requires_payload() {
    let workload = Workload {
        payload: None,
        ..workload(2, 1)
    };
    let mut runner = runner(InMemoryBackend::new(), 1, workload).await;

    assert!(runner.run(Operation::Write).await.is_err());
    let result = runner.run(Operation::Read).await.unwrap();
    assert_eq!(result.errors.len(), 2);

    runner.shutdown().await;
}
