pub mod call_stat;
pub mod recorder;
pub mod reducer;
pub mod report;
pub mod scope;

use std::collections::HashMap;
use std::future::Future;

use futures::future::BoxFuture;

pub use call_stat::CallRecord;

// ─── Raw capture output ──────────────────────────────────────────

/// Identity of one callable inside a capture window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallKey {
    pub location: String,
    pub line_number: u32,
    pub function_name: String,
}

/// Aggregated timings for one callable, as produced by a capture primitive.
/// Times are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RawCallStats {
    /// Entries that were not nested inside another active frame of the same callable
    pub primitive_calls: u64,
    /// Every entry, recursive ones included
    pub total_calls: u64,
    /// Time spent in the callable itself, callees excluded
    pub total_time: f64,
    /// Time spent in the callable including callees
    pub cumulative_time: f64,
    /// Recorded from a source path relative to the workspace, i.e. code of
    /// the application's own crates rather than a dependency or std
    pub application_code: bool,
}

/// Everything a primitive captured between `start()` and `stop()`.
pub type RawProfile = HashMap<CallKey, RawCallStats>;

// ─── Capture capability ──────────────────────────────────────────

/// A call-level capture primitive owned by exactly one request.
pub trait CapturePrimitive: Send + Sync + 'static {
    /// Begin recording.
    fn start(&self);

    /// Stop recording and hand back what was collected since `start()`.
    fn stop(&self) -> RawProfile;

    /// Make this primitive the active one for code executed by `fut`.
    fn bind<'a, F>(&self, fut: F) -> BoxFuture<'a, F::Output>
    where
        F: Future + Send + 'a;

    /// Make this primitive the active one while `f` runs.
    ///
    /// Used for synchronous work driven from outside the request future,
    /// such as polling the response body.
    fn bind_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// Creates a fresh primitive for every profiled request.
pub trait CaptureFactory: Send + Sync + 'static {
    type Primitive: CapturePrimitive;

    fn create(&self) -> Self::Primitive;
}
