//! Renders phase results as a text or JSON report.
//!
//! The report layout is selected with a semicolon separated list of field names. Fields are
//! printed in list order; a leading `-` disables a field and unknown names are ignored.
//!
//! - `Version` prints the tool version.
//! - `Parameters` prints the parameter section, with one `Parameters:<name>` entry per
//!   parameter, e.g. `Parameters:numClients`.
//! - `Tests:<name>` adds a column to every phase, e.g. `Tests:Duration Avg`.

use std::fmt::Write as _;
use std::time::Duration;

use s3bench_engine::{DurationStats, PhaseResult};
use serde::Serialize;
use serde::ser::SerializeMap;
use serde_json::Value;
use yansi::Paint;

use crate::config::Config;

const MIB: f64 = (1u64 << 20) as f64;

/// Parameter fields known to the report.
const PARAMETERS: &[&str] = &[
    "numClients",
    "numSamples",
    "objectSize (MB)",
    "sampleReads",
    "clientDelay",
    "readObj",
    "headObj",
    "putObjTag",
    "getObjTag",
    "validate",
    "compressionRatioPercent",
    "dedupRatioPercent",
    "reductionBlockSize",
    "dedupUnitSize",
];

/// The selected report fields, in print order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportFormat {
    version: bool,
    parameters: Option<Vec<String>>,
    tests: Vec<String>,
}

impl ReportFormat {
    /// Parses a semicolon separated field list.
    pub fn parse(format: &str) -> Self {
        let mut version = false;
        let mut parameters_enabled = false;
        let mut parameters = Vec::new();
        let mut tests = Vec::new();

        for field in format.split(';').map(str::trim) {
            if field.is_empty() || field.starts_with('-') {
                continue;
            }

            match field.split_once(':') {
                None if field == "Version" => version = true,
                None if field == "Parameters" => parameters_enabled = true,
                Some(("Parameters", name)) => parameters.push(name.to_owned()),
                Some(("Tests", name)) => tests.push(name.to_owned()),
                _ => tracing::debug!(field, "ignoring unknown report field"),
            }
        }

        Self {
            version,
            parameters: parameters_enabled.then_some(parameters),
            tests,
        }
    }
}

/// An ordered list of named values.
#[derive(Debug, Default, PartialEq)]
struct Entries(Vec<(String, Value)>);

impl Entries {
    fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(key, _)| key == name).map(|(_, v)| v)
    }
}

impl Serialize for Entries {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[derive(Debug, Serialize)]
struct TestReport {
    #[serde(flatten)]
    fields: Entries,
    #[serde(rename = "Errors", skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// A rendered report of a complete run.
#[derive(Debug, Serialize)]
pub struct Report {
    #[serde(rename = "Version", skip_serializing_if = "Option::is_none")]
    version: Option<&'static str>,
    #[serde(rename = "Parameters", skip_serializing_if = "Option::is_none")]
    parameters: Option<Entries>,
    #[serde(rename = "Tests")]
    tests: Vec<TestReport>,
}

impl Report {
    /// Builds the report of the given phases.
    pub fn new(config: &Config, results: &[PhaseResult]) -> Self {
        let format = ReportFormat::parse(&config.report_format);

        let parameters = format.parameters.as_ref().map(|names| {
            Entries(
                names
                    .iter()
                    .filter_map(|name| Some((name.clone(), parameter(config, name)?)))
                    .collect(),
            )
        });

        let tests = results
            .iter()
            .map(|result| TestReport {
                fields: Entries(
                    format
                        .tests
                        .iter()
                        .filter_map(|name| Some((name.clone(), test_field(result, name)?)))
                        .collect(),
                ),
                errors: result.errors.clone(),
            })
            .collect();

        Self {
            version: format.version.then_some(env!("CARGO_PKG_VERSION")),
            parameters,
            tests,
        }
    }

    /// Renders the report as pretty printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Renders the report as human readable text.
    pub fn to_text(&self) -> String {
        let mut out = String::new();

        if let Some(version) = self.version {
            writeln!(out, "{} {}", "Version:".bold(), version).ok();
        }

        if let Some(parameters) = &self.parameters {
            writeln!(out, "{}", "Parameters:".bold().blue()).ok();
            for (name, value) in &parameters.0 {
                writeln!(out, "  {}: {}", name.bold(), display(value)).ok();
            }
        }

        for test in &self.tests {
            writeln!(out).ok();
            let operation = test.fields.get("Operation").map(display);
            let title = operation.as_deref().unwrap_or("Test");
            writeln!(out, "{} {}", "##".bold(), title.bold().green()).ok();

            for (name, value) in &test.fields.0 {
                if name != "Operation" {
                    writeln!(out, "  {}: {}", name.bold(), display(value)).ok();
                }
            }
        }

        for test in self.tests.iter().filter(|test| !test.errors.is_empty()) {
            writeln!(out).ok();
            let count = format!("{} FAILURES", test.errors.len());
            writeln!(out, "{}", count.bold().red()).ok();
            for error in &test.errors {
                writeln!(out, "  {error}").ok();
            }
        }

        out
    }

    /// Prints the report to stdout.
    pub fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", self.to_json()?);
        } else {
            print!("{}", self.to_text());
        }
        Ok(())
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::Null => "-".to_owned(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if !n.is_u64() && !n.is_i64() => format!("{f:.3}"),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

fn parameter(config: &Config, name: &str) -> Option<Value> {
    let value = match name {
        "numClients" => config.num_clients.into(),
        "numSamples" => config.num_samples.into(),
        "objectSize (MB)" => config.object_size.as_mib().into(),
        "sampleReads" => config.sample_reads.into(),
        "clientDelay" => config.client_delay.into(),
        "readObj" => config.read_obj().into(),
        "headObj" => config.head_obj.into(),
        "putObjTag" => (config.put_obj_tag || config.get_obj_tag).into(),
        "getObjTag" => config.get_obj_tag.into(),
        "validate" => config.validate.into(),
        "compressionRatioPercent" => config.compression_ratio_percent.into(),
        "dedupRatioPercent" => config.dedup_ratio_percent.into(),
        "reductionBlockSize" => config.reduction_block_size.as_u64().into(),
        "dedupUnitSize" => config.dedup_unit_size.as_u64().into(),
        _ => {
            debug_assert!(!PARAMETERS.contains(&name));
            return None;
        }
    };
    Some(value)
}

fn secs(duration: Option<Duration>) -> Value {
    duration.map_or(Value::Null, |d| d.as_secs_f64().into())
}

fn percentile_field(name: &str) -> Option<(&str, f64)> {
    let (series, rank) = name.split_once(' ')?;
    let rank = rank.strip_suffix("th-ile")?.parse().ok()?;
    Some((series, rank))
}

fn test_field(result: &PhaseResult, name: &str) -> Option<Value> {
    let value = match name {
        "Operation" => result.operation.as_str().into(),
        "Total Requests Count" => result.request_count().into(),
        "Errors Count" => result.errors.len().into(),
        "Total Throughput (MB/s)" => (result.throughput() / MIB).into(),
        "Total Duration (s)" => result.total_duration.as_secs_f64().into(),
        "Duration Max" => secs(result.durations.maximum()),
        "Duration Avg" => secs(result.durations.average()),
        "Duration Min" => secs(result.durations.minimum()),
        "Ttfb Max" => secs(result.ttfbs.maximum()),
        "Ttfb Avg" => secs(result.ttfbs.average()),
        "Ttfb Min" => secs(result.ttfbs.minimum()),
        _ => match percentile_field(name)? {
            ("Duration", rank) => secs(result.durations.percentile(rank)),
            ("Ttfb", rank) => secs(result.ttfbs.percentile(rank)),
            _ => return None,
        },
    };
    Some(value)
}
