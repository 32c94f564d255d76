//! Configuration for a benchmark run.
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to
//! lowest):
//!
//! 1. Command line flags of the `run` command
//! 2. Environment variables (prefixed with `S3BENCH__`)
//! 3. YAML configuration file (specified via `-c` or `--config` flag)
//! 4. Defaults
//!
//! # Environment Variables
//!
//! Environment variables use `S3BENCH__` as a prefix and double underscores (`__`) to denote
//! nested configuration structures. For example:
//!
//! - `S3BENCH__ENDPOINTS=http://10.0.0.1:9000,http://10.0.0.2:9000` sets two endpoints
//! - `S3BENCH__OBJECT_SIZE=4Mb` sets the object size
//! - `S3BENCH__LOGGING__LEVEL=debug` sets the log level
//!
//! # YAML Configuration File
//!
//! ```yaml
//! endpoints:
//!   - http://10.0.0.1:9000
//!   - http://10.0.0.2:9000
//! object_size: 4Mb
//! num_clients: 8
//! num_samples: 64
//!
//! logging:
//!   level: debug
//! ```

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use s3bench_engine::reduction::{FillPolicy, ReductionParams};
use s3bench_engine::{ClientDelay, Operation, PayloadSource, PoolConfig, TagTemplate};
use secrecy::{CloneableSecret, SecretBox, SerializableSecret, zeroize::Zeroize};
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::size::Size;

/// Environment variable prefix for all configuration options.
const ENV_PREFIX: &str = "S3BENCH__";

/// Endpoint scheme that selects the in-process backend instead of a network endpoint.
pub const MEMORY_ENDPOINT: &str = "memory://";

/// Report fields printed when no format is configured.
pub const DEFAULT_REPORT_FORMAT: &str = "Version;Parameters;Parameters:numClients;\
    Parameters:numSamples;Parameters:objectSize (MB);Parameters:sampleReads;\
    Parameters:clientDelay;Parameters:readObj;Parameters:headObj;Parameters:putObjTag;\
    Parameters:getObjTag;Tests:Operation;Tests:Total Requests Count;Tests:Errors Count;\
    Tests:Total Throughput (MB/s);Tests:Duration Max;Tests:Duration Avg;Tests:Duration Min;\
    Tests:Ttfb Max;Tests:Ttfb Avg;Tests:Ttfb Min;-Tests:Duration 25th-ile;\
    -Tests:Duration 50th-ile;-Tests:Duration 75th-ile;-Tests:Ttfb 25th-ile;\
    -Tests:Ttfb 50th-ile;-Tests:Ttfb 75th-ile;";

/// Newtype around `String` that may protect against accidental
/// logging of secrets in our configuration struct. Use with
/// [`secrecy::SecretBox`].
#[derive(Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigSecret(String);

impl ConfigSecret {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<&str> for ConfigSecret {
    fn from(str: &str) -> Self {
        ConfigSecret(str.to_string())
    }
}

impl std::ops::Deref for ConfigSecret {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for ConfigSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "[redacted]")
    }
}

impl CloneableSecret for ConfigSecret {}
impl SerializableSecret for ConfigSecret {}
impl Zeroize for ConfigSecret {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

/// Runtime configuration for the Tokio async runtime.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Runtime {
    /// Number of worker threads for the runtime driving the workers.
    ///
    /// Workers spend most of their time waiting on the network, so the default is usually
    /// sufficient even for hundreds of clients. Validation and payload generation are CPU bound
    /// and benefit from more threads.
    ///
    /// # Default
    ///
    /// Defaults to the number of CPU cores on the host machine.
    ///
    /// # Environment Variable
    ///
    /// `S3BENCH__RUNTIME__WORKER_THREADS`
    pub worker_threads: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
        }
    }
}

/// [Sentry](https://sentry.io/) error reporting configuration.
///
/// Sentry is disabled by default and only enabled when a DSN is provided. Errors and warnings
/// logged during a run are sent as events.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Sentry {
    /// Sentry DSN (Data Source Name).
    ///
    /// # Environment Variable
    ///
    /// `S3BENCH__SENTRY__DSN`
    pub dsn: Option<SecretBox<ConfigSecret>>,

    /// Environment name attached to all events.
    ///
    /// # Environment Variable
    ///
    /// `S3BENCH__SENTRY__ENVIRONMENT`
    pub environment: Option<Cow<'static, str>>,

    /// Error event sampling rate between `0.0` and `1.0`.
    ///
    /// # Default
    ///
    /// `1.0` (send all errors)
    ///
    /// # Environment Variable
    ///
    /// `S3BENCH__SENTRY__SAMPLE_RATE`
    pub sample_rate: f32,
}

impl Sentry {
    /// Returns whether Sentry integration is enabled.
    pub fn is_enabled(&self) -> bool {
        self.dsn.is_some()
    }
}

impl Default for Sentry {
    fn default() -> Self {
        Self {
            dsn: None,
            environment: None,
            sample_rate: 1.0,
        }
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO  s3bench_engine::runner > starting phase
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2020-12-04T12:10:32Z [s3bench_engine::runner] INFO: starting phase
    /// ```
    Simplified,

    /// Dump out JSON lines.
    Json,
}

/// The logging format parse error.
#[derive(Clone, Debug)]
pub struct FormatParseError(String);

impl fmt::Display for FormatParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"error parsing "{}" as format: expected one of "auto", "pretty", "simplified", "json""#,
            self.0
        )
    }
}

impl std::str::FromStr for LogFormat {
    type Err = FormatParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = match s {
            "" => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("auto") => LogFormat::Auto,
            s if s.eq_ignore_ascii_case("pretty") => LogFormat::Pretty,
            s if s.eq_ignore_ascii_case("simplified") => LogFormat::Simplified,
            s if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            s => return Err(FormatParseError(s.into())),
        };

        Ok(result)
    }
}

impl std::error::Error for FormatParseError {}

mod display_fromstr {
    pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
        T: std::fmt::Display,
    {
        serializer.collect_str(&value)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        D: serde::Deserializer<'de>,
        T: std::str::FromStr,
        <T as std::str::FromStr>::Err: std::fmt::Display,
    {
        use serde::Deserialize;
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Accepts either a list of strings or a single comma separated string.
mod comma_separated {
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let values = match Raw::deserialize(deserializer)? {
            Raw::List(values) => values,
            Raw::Text(text) => text.split(',').map(str::to_owned).collect(),
        };

        Ok(values
            .into_iter()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .collect())
    }
}

/// Logging configuration.
///
/// Logs are always written to stderr, the report to stdout.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Logging {
    /// Minimum log level to output.
    ///
    /// Per request outcomes are logged at `DEBUG`, phase progress at `INFO`. The `RUST_LOG`
    /// environment variable provides more granular control per module if needed.
    ///
    /// # Default
    ///
    /// `INFO`
    ///
    /// # Environment Variable
    ///
    /// `S3BENCH__LOGGING__LEVEL`
    #[serde(with = "display_fromstr")]
    pub level: LevelFilter,

    /// Log output format.
    ///
    /// # Default
    ///
    /// `Auto` (pretty for TTY, simplified otherwise)
    ///
    /// # Environment Variable
    ///
    /// `S3BENCH__LOGGING__FORMAT`
    pub format: LogFormat,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
        }
    }
}

/// Main configuration struct for a benchmark run.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// S3 endpoints. Worker `i` talks to endpoint `i % endpoints.len()`.
    ///
    /// Accepts a list or a comma separated string. The special endpoint `memory://` runs
    /// against an in-process store.
    #[serde(deserialize_with = "comma_separated::deserialize")]
    pub endpoints: Vec<String>,
    /// Region used for request signing.
    pub region: String,
    /// Access key ID.
    pub access_key: String,
    /// Secret access key.
    pub secret_key: SecretBox<ConfigSecret>,
    /// Bucket to run the benchmark in. Created if it does not exist.
    pub bucket: String,
    /// Prefix of every object key.
    pub object_name_prefix: String,
    /// Size of every object.
    pub object_size: Size,
    /// Number of concurrent workers.
    pub num_clients: usize,
    /// Number of distinct objects.
    pub num_samples: usize,
    /// Keep objects and bucket after the run.
    pub skip_cleanup: bool,
    /// Run a head phase instead of reading object content.
    pub head_obj: bool,
    /// Number of reads, validations or heads per object.
    pub sample_reads: usize,
    /// Milliseconds between worker startups. Negative values randomize the delay within
    /// `[0, |client_delay|)`.
    pub client_delay: i64,
    /// Print the report as JSON.
    pub json_output: bool,
    /// Number of objects removed per batch delete during cleanup.
    pub delete_at_once: usize,
    /// Run a phase replacing the tags of every object.
    pub put_obj_tag: bool,
    /// Run a phase fetching the tags of every object. Implies `put_obj_tag`.
    pub get_obj_tag: bool,
    /// Number of tags per object.
    pub num_tags: usize,
    /// Prefix of every tag name.
    pub tag_name_prefix: String,
    /// Prefix of every tag value.
    pub tag_val_prefix: String,
    /// Semicolon separated list of report fields, see [`crate::report`].
    pub report_format: String,
    /// Run a phase comparing the checksum of every object with the written payload.
    pub validate: bool,
    /// Do not run the write phase; objects of a previous run are used.
    pub skip_write: bool,
    /// Do not run the read phase.
    pub skip_read: bool,
    /// Granularity of compression and dedup decisions.
    pub reduction_block_size: Size,
    /// Share of each unique block filled with random bytes, in `[0, 100]`.
    pub compression_ratio_percent: f64,
    /// Window within which blocks are duplicated. A multiple of `reduction_block_size`.
    pub dedup_unit_size: Size,
    /// Share of unique blocks within a dedup unit, in `[0, 100]`.
    pub dedup_ratio_percent: f64,
    /// Padding byte of the compressible part of each block.
    pub fill: FillPolicy,
    /// Generate an independent payload for every object.
    pub unique_payloads: bool,
    /// Fill payloads by repeating the content of this file instead of generating them.
    pub pattern_file: Option<PathBuf>,

    /// Configuration of the internal task runtime.
    pub runtime: Runtime,
    /// Logging configuration.
    pub logging: Logging,
    /// Sentry error reporting configuration.
    pub sentry: Sentry,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            region: "igneous-test".to_owned(),
            access_key: String::new(),
            secret_key: SecretBox::new(Box::default()),
            bucket: "bucketname".to_owned(),
            object_name_prefix: "loadgen_test".to_owned(),
            object_size: Size::mib(80),
            num_clients: 40,
            num_samples: 200,
            skip_cleanup: false,
            head_obj: false,
            sample_reads: 1,
            client_delay: 1,
            json_output: false,
            delete_at_once: 1000,
            put_obj_tag: false,
            get_obj_tag: false,
            num_tags: 10,
            tag_name_prefix: "tag_name_".to_owned(),
            tag_val_prefix: "tag_val_".to_owned(),
            report_format: DEFAULT_REPORT_FORMAT.to_owned(),
            validate: false,
            skip_write: false,
            skip_read: false,
            reduction_block_size: Size::b(4096),
            compression_ratio_percent: 100.0,
            dedup_unit_size: Size::mib(1),
            dedup_ratio_percent: 0.0,
            fill: FillPolicy::Zeros,
            unique_payloads: false,
            pattern_file: None,

            runtime: Runtime::default(),
            logging: Logging::default(),
            sentry: Sentry::default(),
        }
    }
}

impl Config {
    /// Loads configuration from defaults, the YAML file at `path` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The YAML configuration file cannot be read or parsed
    /// - Environment variables contain invalid values
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Ok(Self::figment(path).extract()?)
    }

    /// Like [`load`](Self::load), with `overrides` taking precedence over all other sources.
    ///
    /// `overrides` must serialize to a map with the same keys as [`Config`]. Absent keys leave
    /// the loaded values untouched.
    pub fn load_with_overrides<T: Serialize>(path: Option<&Path>, overrides: &T) -> Result<Self> {
        let config = Self::figment(path)
            .merge(Serialized::defaults(overrides))
            .extract()?;

        Ok(config)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Checks the parameters of payload generation.
    pub fn validate_payload(&self) -> Result<()> {
        self.reduction_params()
            .validate()
            .context("invalid reduction parameters")?;
        Ok(())
    }

    /// Checks all parameters required for a benchmark run.
    pub fn validate(&self) -> Result<()> {
        self.validate_payload()?;

        if self.num_samples < 1 || self.num_clients < 1 || self.num_clients > self.num_samples {
            bail!(
                "num_clients ({}) needs to be less than num_samples ({}) and greater than 0",
                self.num_clients,
                self.num_samples
            );
        }
        if self.endpoints.is_empty() {
            bail!("at least one endpoint is required");
        }
        if self.delete_at_once < 1 {
            bail!("cannot delete less than 1 object at once");
        }
        if self.num_tags < 1 {
            bail!("num_tags cannot be less than 1");
        }
        if self.sample_reads < 1 {
            bail!("sample_reads cannot be less than 1");
        }
        if self.unique_payloads && self.skip_write && self.validate {
            bail!("cannot validate unique payloads without writing them");
        }

        Ok(())
    }

    /// Returns the phases of this run in execution order.
    pub fn phases(&self) -> Vec<Operation> {
        let put_obj_tag = self.put_obj_tag || self.get_obj_tag;
        let candidates = [
            (Operation::Write, !self.skip_write),
            (Operation::PutObjTag, put_obj_tag),
            (Operation::GetObjTag, self.get_obj_tag),
            (Operation::HeadObj, self.head_obj),
            (Operation::Read, self.read_obj()),
            (Operation::Validate, self.validate),
        ];

        candidates
            .into_iter()
            .filter_map(|(operation, enabled)| enabled.then_some(operation))
            .collect()
    }

    /// Returns `true` if the run includes a read phase.
    pub fn read_obj(&self) -> bool {
        !(self.put_obj_tag || self.get_obj_tag || self.head_obj) && !self.skip_read
    }

    /// Returns the generator parameters for one payload.
    pub fn reduction_params(&self) -> ReductionParams {
        ReductionParams {
            size: self.object_size.as_usize(),
            block_size: self.reduction_block_size.as_usize(),
            dedup_unit_size: self.dedup_unit_size.as_usize(),
            compression_percent: self.compression_ratio_percent,
            dedup_percent: self.dedup_ratio_percent,
            fill: self.fill,
        }
    }

    /// Returns where payloads come from, reading the pattern file if one is configured.
    pub fn payload_source(&self) -> Result<PayloadSource> {
        let Some(path) = &self.pattern_file else {
            return Ok(PayloadSource::Reduction(self.reduction_params()));
        };

        let pattern = std::fs::read(path)
            .with_context(|| format!("failed to read pattern file {}", path.display()))?;
        Ok(PayloadSource::Pattern {
            size: self.object_size.as_usize(),
            pattern: pattern.into(),
        })
    }

    /// Returns the worker pool settings.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            clients: self.num_clients,
            client_delay: ClientDelay::from_millis(self.client_delay),
            object_size: self.object_size.as_u64(),
        }
    }

    /// Returns how tag sets are built.
    pub fn tag_template(&self) -> TagTemplate {
        TagTemplate {
            count: self.num_tags,
            name_prefix: self.tag_name_prefix.clone(),
            value_prefix: self.tag_val_prefix.clone(),
        }
    }
}
