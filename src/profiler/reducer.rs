use std::path::PathBuf;

use super::{CallRecord, RawProfile};
use crate::config::{ProfilerConfig, SortBy};

/// Turns a raw profile into the ordered records that get reported.
///
/// normalize → drop below threshold → drop internal frames → sort.
/// Pure: the same input always yields the same output.
#[derive(Debug, Clone)]
pub struct StatReducer {
    sort_by: SortBy,
    sort_reverse: bool,
    min_cumulative_time: f64,
    ignore_internal_frames: bool,
    application_root: Option<PathBuf>,
}

impl StatReducer {
    pub fn from_config(config: &ProfilerConfig) -> Self {
        Self {
            sort_by: config.sort_by,
            sort_reverse: config.sort_reverse,
            min_cumulative_time: config.minimal_cumulative_time_to_print,
            ignore_internal_frames: config.ignore_internal_frames,
            application_root: config.application_root.as_ref().map(PathBuf::from),
        }
    }

    pub fn reduce(&self, raw: &RawProfile) -> Vec<CallRecord> {
        let records = Self::normalize(raw);
        let records = self.filter(records);
        self.sort(records)
    }

    /// One record per raw entry; nothing is dropped here.
    pub fn normalize(raw: &RawProfile) -> Vec<CallRecord> {
        raw.iter()
            .map(|(key, stats)| CallRecord::from_raw(key, stats))
            .collect()
    }

    fn filter(&self, mut records: Vec<CallRecord>) -> Vec<CallRecord> {
        if self.min_cumulative_time != 0.0 {
            records.retain(|r| r.cumulative_time > self.min_cumulative_time);
        }
        if self.ignore_internal_frames {
            let root = self.application_root.as_deref();
            records.retain(|r| !r.is_internal(root));
        }
        records
    }

    /// Equal keys fall back to `(location, line_number, function_name)`
    /// ascending, whatever the direction.
    fn sort(&self, mut records: Vec<CallRecord>) -> Vec<CallRecord> {
        records.sort_by(|a, b| {
            let primary = self.sort_by.compare(a, b);
            let primary = if self.sort_reverse {
                primary.reverse()
            } else {
                primary
            };
            primary.then_with(|| a.cmp_identity(b))
        });
        records
    }
}
