use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Serialize;

use crate::config::Config;
use crate::report::Report;
use crate::size::Size;
use crate::{bench, observability};

/// Load generator for S3 compatible object stores.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    ReductionFile(ReductionFileCommand),
    Version(VersionCommand),
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// run the benchmark
///
/// Every option overrides the configuration key of the same name.
#[derive(Debug, Default, FromArgs, Serialize)]
#[argh(subcommand, name = "run")]
struct RunCommand {
    /// comma separated list of S3 endpoints
    #[argh(option)]
    #[serde(rename = "endpoints", skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    /// region used for request signing
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    /// access key ID
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    access_key: Option<String>,
    /// secret access key
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_key: Option<String>,
    /// bucket to run the benchmark in
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<String>,
    /// prefix of every object key
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    object_name_prefix: Option<String>,
    /// size of every object, e.g. `4Mb`
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    object_size: Option<Size>,
    /// number of concurrent workers
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_clients: Option<usize>,
    /// number of distinct objects
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_samples: Option<usize>,
    /// number of reads, validations or heads per object
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    sample_reads: Option<usize>,
    /// milliseconds between worker startups, negative to randomize
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    client_delay: Option<i64>,
    /// number of objects removed per batch delete
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    delete_at_once: Option<usize>,
    /// number of tags per object
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    num_tags: Option<usize>,
    /// prefix of every tag name
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_name_prefix: Option<String>,
    /// prefix of every tag value
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    tag_val_prefix: Option<String>,
    /// semicolon separated list of report fields
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    report_format: Option<String>,
    /// granularity of compression and dedup decisions
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    reduction_block_size: Option<Size>,
    /// share of each unique block filled with random bytes
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_ratio_percent: Option<f64>,
    /// window within which blocks are duplicated
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_unit_size: Option<Size>,
    /// share of unique blocks within a dedup unit
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_ratio_percent: Option<f64>,
    /// padding of compressible data, `zeros` or `letters`
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    fill: Option<String>,
    /// fill payloads by repeating the content of this file
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern_file: Option<PathBuf>,

    /// keep objects and bucket after the run
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    skip_cleanup: bool,
    /// run a head phase instead of reading objects
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    head_obj: bool,
    /// print the report as JSON
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    json_output: bool,
    /// run a phase replacing the tags of every object
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    put_obj_tag: bool,
    /// run a phase fetching the tags of every object
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    get_obj_tag: bool,
    /// compare the checksum of every object with the written payload
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    validate: bool,
    /// reuse objects of a previous run instead of writing
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    skip_write: bool,
    /// do not run the read phase
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    skip_read: bool,
    /// generate an independent payload for every object
    #[argh(switch)]
    #[serde(skip_serializing_if = "is_false")]
    unique_payloads: bool,
}

/// write one generated payload to a file and exit
#[derive(Debug, FromArgs, Serialize)]
#[argh(subcommand, name = "reduction-file")]
struct ReductionFileCommand {
    /// destination of the payload
    #[argh(positional)]
    #[serde(skip)]
    path: PathBuf,
    /// size of the payload, e.g. `4Mb`
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    object_size: Option<Size>,
    /// granularity of compression and dedup decisions
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    reduction_block_size: Option<Size>,
    /// share of each unique block filled with random bytes
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    compression_ratio_percent: Option<f64>,
    /// window within which blocks are duplicated
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_unit_size: Option<Size>,
    /// share of unique blocks within a dedup unit
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    dedup_ratio_percent: Option<f64>,
    /// padding of compressible data, `zeros` or `letters`
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    fill: Option<String>,
    /// fill the payload by repeating the content of this file
    #[argh(option)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pattern_file: Option<PathBuf>,
}

/// print the s3bench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();
    let path = args.config.as_deref();

    let config = match &args.command {
        Command::Version(_) => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Command::Run(overrides) => Config::load_with_overrides(path, overrides)?,
        Command::ReductionFile(overrides) => Config::load_with_overrides(path, overrides)?,
    };

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("s3bench-rt")
        .enable_all()
        .worker_threads(config.runtime.worker_threads)
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(_) => run(config).await,
            Command::ReductionFile(command) => reduction_file(config, command.path).await,
            Command::Version(_) => Ok(()),
        }
    })
}

async fn run(config: Config) -> Result<()> {
    let results = bench::run(&config).await?;
    Report::new(&config, &results).print(config.json_output)
}

async fn reduction_file(config: Config, path: PathBuf) -> Result<()> {
    config.validate_payload()?;
    let source = config.payload_source()?;
    source.validate().context("invalid payload source")?;

    let buffer = tokio::task::spawn_blocking(move || source.build())
        .await?
        .context("failed to generate payload")?;

    tokio::fs::write(&path, &buffer)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!(path = %path.display(), size = buffer.len(), "wrote reduction file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_overrides() {
        let args = Args::from_args(
            &["s3bench"],
            &[
                "run",
                "--endpoint",
                "memory://",
                "--object-size",
                "4Kb",
                "--num-clients",
                "2",
                "--fill",
                "letters",
                "--validate",
            ],
        )
        .unwrap();

        let Command::Run(overrides) = args.command else {
            panic!("expected run command");
        };

        figment::Jail::expect_with(|_jail| {
            let config = Config::load_with_overrides(None, &overrides).unwrap();
            assert_eq!(config.endpoints, ["memory://"]);
            assert_eq!(config.object_size, Size::kib(4));
            assert_eq!(config.num_clients, 2);
            assert_eq!(config.fill, s3bench_engine::reduction::FillPolicy::Letters);
            assert!(config.validate);
            // Switches that were not given leave the configuration untouched.
            assert!(!config.skip_cleanup);
            assert_eq!(config.num_samples, 200);
            Ok(())
        });
    }

    #[test]
    fn unset_switches_do_not_override() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("S3BENCH__SKIP_CLEANUP", "true");
            let config = Config::load_with_overrides(None, &RunCommand::default()).unwrap();
            assert!(config.skip_cleanup);
            Ok(())
        });
    }

    #[tokio::test]
    async fn writes_reduction_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let config = Config {
            object_size: Size::kib(64),
            dedup_unit_size: Size::kib(16),
            compression_ratio_percent: 0.0,
            ..Default::default()
        };

        reduction_file(config, path.clone()).await.unwrap();

        let written = std::fs::read(&path).unwrap();
        assert_eq!(written.len(), 64 * 1024);
        assert!(written.iter().all(|&byte| byte == 0));
    }

    #[tokio::test]
    async fn reduction_file_rejects_invalid_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            dedup_ratio_percent: 150.0,
            ..Default::default()
        };

        assert!(
            reduction_file(config, dir.path().join("payload.bin"))
                .await
                .is_err()
        );
    }
}
