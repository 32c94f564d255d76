//! End-to-end runs against the in-memory backend.
//!
//! These drive configuration, pre-flight, all phases, cleanup and the report just like the `run`
//! command does, without a live S3 endpoint.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use s3bench::bench;
use s3bench::config::{Config, MEMORY_ENDPOINT};
use s3bench::report::Report;
use s3bench::size::Size;
use s3bench_engine::Operation;
use s3bench_engine::backend::{Backend, InMemoryBackend, SharedBackend};

fn config() -> Config {
    Config {
        endpoints: vec![MEMORY_ENDPOINT.to_owned()],
        object_size: Size::kib(32),
        dedup_unit_size: Size::kib(16),
        compression_ratio_percent: 50.0,
        dedup_ratio_percent: 50.0,
        num_samples: 8,
        num_clients: 3,
        client_delay: 0,
        ..Default::default()
    }
}

fn operations(results: &[s3bench_engine::PhaseResult]) -> Vec<Operation> {
    results.iter().map(|result| result.operation).collect()
}

#[tokio::test]
async fn validate_run() -> Result<()> {
    s3bench_test::tracing::init();

    let config = Config {
        validate: true,
        sample_reads: 2,
        ..config()
    };
    let results = bench::run(&config).await?;

    assert_eq!(
        operations(&results),
        [Operation::Write, Operation::Read, Operation::Validate]
    );
    assert_eq!(results[0].request_count(), 8);
    assert_eq!(results[1].request_count(), 16);
    assert_eq!(results[2].request_count(), 16);
    for result in &results {
        assert!(result.errors.is_empty(), "{:?}", result.errors);
    }

    Ok(())
}

#[tokio::test]
async fn validate_unique_payloads() -> Result<()> {
    let memory = Arc::new(InMemoryBackend::new());
    let backends: Vec<SharedBackend> = vec![memory.clone()];
    let config = Config {
        unique_payloads: true,
        validate: true,
        sample_reads: 2,
        num_samples: 6,
        skip_cleanup: true,
        ..config()
    };

    let results = bench::run_with_backends(&config, backends).await?;

    assert_eq!(
        operations(&results),
        [Operation::Write, Operation::Read, Operation::Validate]
    );
    assert_eq!(results[0].request_count(), 6);
    assert_eq!(results[1].request_count(), 12);
    assert_eq!(results[2].request_count(), 12);
    for result in &results {
        assert!(result.errors.is_empty(), "{:?}", result.errors);
    }

    let keys = memory.list_objects(&config.object_name_prefix, usize::MAX).await?;
    assert_eq!(keys.len(), 6);
    let contents: HashSet<_> = keys
        .iter()
        .filter_map(|key| memory.get_stored(key))
        .collect();
    assert_eq!(contents.len(), 6);

    Ok(())
}

#[tokio::test]
async fn tag_and_head_run() -> Result<()> {
    let memory = Arc::new(InMemoryBackend::new());
    let backends: Vec<SharedBackend> = vec![memory.clone(), memory.clone()];
    let config = Config {
        get_obj_tag: true,
        head_obj: true,
        num_tags: 3,
        ..config()
    };

    let results = bench::run_with_backends(&config, backends).await?;

    assert_eq!(
        operations(&results),
        [
            Operation::Write,
            Operation::PutObjTag,
            Operation::GetObjTag,
            Operation::HeadObj
        ]
    );
    for result in &results {
        assert!(result.errors.is_empty(), "{:?}", result.errors);
    }
    assert_eq!(results[1].bytes, 0);
    assert_eq!(results[3].bytes, 8 * 32 * 1024);

    assert!(memory.is_empty());
    assert!(!memory.bucket_exists());

    Ok(())
}

#[tokio::test]
async fn validate_objects_of_previous_run() -> Result<()> {
    let memory = Arc::new(InMemoryBackend::new());
    let backends = || -> Vec<SharedBackend> { vec![memory.clone()] };

    let first = Config {
        skip_cleanup: true,
        skip_read: true,
        ..config()
    };
    let results = bench::run_with_backends(&first, backends()).await?;
    assert_eq!(operations(&results), [Operation::Write]);
    assert_eq!(memory.len(), 8);

    let second = Config {
        skip_write: true,
        skip_read: true,
        validate: true,
        ..config()
    };
    let results = bench::run_with_backends(&second, backends()).await?;
    assert_eq!(operations(&results), [Operation::Validate]);
    assert!(results[0].errors.is_empty(), "{:?}", results[0].errors);

    // The bucket existed before the second run, so only the objects are removed.
    assert!(memory.is_empty());
    assert!(memory.bucket_exists());

    Ok(())
}

#[tokio::test]
async fn failures_are_reported() -> Result<()> {
    let memory = Arc::new(InMemoryBackend::new().fail_every(4));
    let backends: Vec<SharedBackend> = vec![memory];
    let config = Config {
        skip_read: true,
        json_output: true,
        ..config()
    };

    let results = bench::run_with_backends(&config, backends).await?;
    assert_eq!(results[0].request_count(), 8);
    assert_eq!(results[0].errors.len(), 2);

    let report = Report::new(&config, &results);
    let json: serde_json::Value = serde_json::from_str(&report.to_json()?)?;
    let test = &json["Tests"][0];
    assert_eq!(test["Operation"], "Write");
    assert_eq!(test["Total Requests Count"], 8);
    assert_eq!(test["Errors Count"], 2);
    assert_eq!(test["Errors"].as_array().map(Vec::len), Some(2));

    let text = report.to_text();
    assert!(text.contains("2 FAILURES"));

    Ok(())
}

#[tokio::test]
async fn skip_write_without_objects_is_fatal() {
    let config = Config {
        skip_write: true,
        ..config()
    };

    assert!(bench::run(&config).await.is_err());
}
