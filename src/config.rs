use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};

use crate::profiler::report::{ReportSink, StdoutSink, TracingSink};
use crate::profiler::CallRecord;

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown sort field `{0}` (expected calls, cumulative_time, location or total_time)")]
    UnknownSortField(String),

    #[error("minimal_cumulative_time_to_print must be a finite, non-negative number, got {0}")]
    InvalidThreshold(f64),

    #[error("endpoint `{0}` in endpoints_to_measure must start with '/'")]
    InvalidEndpoint(String),

    #[error("cannot read profiler config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed profiler config: {0}")]
    Parse(#[from] serde_json::Error),
}

// ─── Sort field ──────────────────────────────────────────────────

/// Record field the report is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    Calls,
    #[default]
    CumulativeTime,
    Location,
    TotalTime,
}

impl SortBy {
    /// Ascending comparison of two records on this field.
    pub fn compare(self, a: &CallRecord, b: &CallRecord) -> Ordering {
        match self {
            Self::Calls => a.call_count.cmp(&b.call_count),
            Self::CumulativeTime => a.cumulative_time.total_cmp(&b.cumulative_time),
            Self::Location => a.location.cmp(&b.location),
            Self::TotalTime => a.total_time.total_cmp(&b.total_time),
        }
    }
}

impl FromStr for SortBy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calls" => Ok(Self::Calls),
            "cumulative_time" => Ok(Self::CumulativeTime),
            "location" => Ok(Self::Location),
            "total_time" => Ok(Self::TotalTime),
            other => Err(ConfigError::UnknownSortField(other.to_owned())),
        }
    }
}

// ─── Profiler configuration ──────────────────────────────────────

/// Process-wide profiler settings, fixed once the middleware is built.
///
/// Loadable from JSON:
///
/// ```json
/// {
///   "sort_by": "total_time",
///   "sort_reverse": true,
///   "minimal_cumulative_time_to_print": 0.05,
///   "ignore_internal_frames": true,
///   "endpoints_to_measure": ["/api/fib/25"],
///   "logger": "tracing"
/// }
/// ```
#[derive(Clone, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default)]
    pub sort_by: SortBy,

    /// Descending when true
    #[serde(default = "default_sort_reverse")]
    pub sort_reverse: bool,

    /// Seconds; 0 disables the filter
    #[serde(default)]
    pub minimal_cumulative_time_to_print: f64,

    /// Drop records that are not application code
    #[serde(default)]
    pub ignore_internal_frames: bool,

    /// Only these paths are profiled; `None` profiles everything
    #[serde(default)]
    pub endpoints_to_measure: Option<HashSet<String>>,

    /// Directory holding the application's own source files, matched on
    /// whole path components. When unset, code is classified by whether its
    /// source path was workspace-relative when it was recorded.
    #[serde(default)]
    pub application_root: Option<String>,

    /// Report destination; stdout when unset
    #[serde(default, deserialize_with = "deserialize_sink")]
    pub logger: Option<Arc<dyn ReportSink>>,
}

fn default_sort_reverse() -> bool {
    true
}

fn deserialize_sink<'de, D>(deserializer: D) -> Result<Option<Arc<dyn ReportSink>>, D::Error>
where
    D: Deserializer<'de>,
{
    let name: Option<String> = Option::deserialize(deserializer)?;
    match name.as_deref() {
        None => Ok(None),
        Some("stdout") => Ok(Some(Arc::new(StdoutSink))),
        Some("tracing") => Ok(Some(Arc::new(TracingSink))),
        Some(other) => Err(serde::de::Error::unknown_variant(
            other,
            &["stdout", "tracing"],
        )),
    }
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sort_by: SortBy::default(),
            sort_reverse: default_sort_reverse(),
            minimal_cumulative_time_to_print: 0.0,
            ignore_internal_frames: false,
            endpoints_to_measure: None,
            application_root: None,
            logger: None,
        }
    }
}

impl fmt::Debug for ProfilerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerConfig")
            .field("sort_by", &self.sort_by)
            .field("sort_reverse", &self.sort_reverse)
            .field(
                "minimal_cumulative_time_to_print",
                &self.minimal_cumulative_time_to_print,
            )
            .field("ignore_internal_frames", &self.ignore_internal_frames)
            .field("endpoints_to_measure", &self.endpoints_to_measure)
            .field("application_root", &self.application_root)
            .field("logger", &self.logger.as_ref().map(|_| "custom"))
            .finish()
    }
}

impl ProfilerConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Reject settings that can only be programming mistakes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.minimal_cumulative_time_to_print;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(threshold));
        }
        if let Some(endpoints) = &self.endpoints_to_measure {
            if let Some(bad) = endpoints.iter().find(|p| !p.starts_with('/')) {
                return Err(ConfigError::InvalidEndpoint(bad.clone()));
            }
        }
        Ok(())
    }

    // ── Builder-style setters ───────────────────────────────────

    pub fn sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn sort_reverse(mut self, reverse: bool) -> Self {
        self.sort_reverse = reverse;
        self
    }

    pub fn minimal_cumulative_time_to_print(mut self, seconds: f64) -> Self {
        self.minimal_cumulative_time_to_print = seconds;
        self
    }

    pub fn ignore_internal_frames(mut self, ignore: bool) -> Self {
        self.ignore_internal_frames = ignore;
        self
    }

    pub fn endpoints_to_measure<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.endpoints_to_measure = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn application_root(mut self, root: impl Into<String>) -> Self {
        self.application_root = Some(root.into());
        self
    }

    pub fn logger(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.logger = Some(sink);
        self
    }
}
