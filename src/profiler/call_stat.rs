use std::cmp::Ordering;
use std::fmt;
use std::path::Path;

use super::{CallKey, RawCallStats};

/// Statistics for one callable observed during a single capture window.
///
/// Built by the reducer from raw capture output and never mutated after that.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub location: String,
    pub line_number: u32,
    pub function_name: String,
    pub call_count: u64,
    /// Seconds spent in the callable itself
    pub total_time: f64,
    /// Seconds spent in the callable and everything it called
    pub cumulative_time: f64,
    /// Recorded from the application's own crates
    pub application_code: bool,
}

impl CallRecord {
    pub fn from_raw(key: &CallKey, stats: &RawCallStats) -> Self {
        Self {
            location: key.location.clone(),
            line_number: key.line_number,
            function_name: key.function_name.clone(),
            call_count: stats.total_calls,
            total_time: stats.total_time,
            cumulative_time: stats.cumulative_time,
            application_code: stats.application_code,
        }
    }

    /// True when the record comes from outside the application source tree.
    ///
    /// With an explicit root the location must sit under it, compared on
    /// whole path components. Without one, the flag set at record time
    /// decides.
    pub fn is_internal(&self, application_root: Option<&Path>) -> bool {
        match application_root {
            Some(root) => !Path::new(&self.location).starts_with(root),
            None => !self.application_code,
        }
    }

    /// Orders by `(location, line_number, function_name)`.
    pub fn cmp_identity(&self, other: &Self) -> Ordering {
        self.location
            .cmp(&other.location)
            .then(self.line_number.cmp(&other.line_number))
            .then_with(|| self.function_name.cmp(&other.function_name))
    }
}

impl fmt::Display for CallRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({}) {} {:.2} {:.2}",
            self.location,
            self.line_number,
            self.function_name,
            self.call_count,
            self.total_time,
            self.cumulative_time,
        )
    }
}
