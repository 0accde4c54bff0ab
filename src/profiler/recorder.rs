//! Full-trace call recorder bound to a single request.
//!
//! A [`CallRecorder`] is made the active recorder of a request future with
//! [`CapturePrimitive::bind`]. Instrumented code opens frames through
//! [`profile_scope`] or the [`profiled!`](crate::profiled) macro; each frame
//! lands in the recorder of the request it runs for, so concurrent requests
//! never see each other's calls. Outside a profiled request the returned
//! guard is inert and no lock is taken.
//!
//! Work spawned onto other tasks is not attributed to the request.

use std::collections::HashMap;
use std::future::Future;
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use parking_lot::Mutex;

use super::{CallKey, CaptureFactory, CapturePrimitive, RawCallStats, RawProfile};

tokio::task_local! {
    static ACTIVE_RECORDER: CallRecorder;
}

static APPLICATION_ROOT: OnceLock<String> = OnceLock::new();

/// Directory the process was started from, captured on first use.
///
/// Relative source locations are resolved against it for display.
pub fn application_root() -> &'static str {
    APPLICATION_ROOT.get_or_init(|| {
        std::env::current_dir()
            .map(|dir| dir.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

fn resolve_location(file: &str) -> String {
    let path = Path::new(file);
    if path.is_absolute() {
        file.to_owned()
    } else {
        Path::new(application_root())
            .join(path)
            .to_string_lossy()
            .into_owned()
    }
}

// ─── Recorder ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    file: &'static str,
    line: u32,
    function: &'static str,
}

#[derive(Debug)]
struct Frame {
    id: u64,
    key: FrameKey,
    entered: Instant,
    child_time: Duration,
}

#[derive(Debug, Default)]
struct Aggregate {
    primitive_calls: u64,
    total_calls: u64,
    total_time: Duration,
    cumulative_time: Duration,
}

#[derive(Debug, Default)]
struct RecorderState {
    active: bool,
    next_frame: u64,
    stack: Vec<Frame>,
    table: HashMap<FrameKey, Aggregate>,
}

/// Deterministic call recorder for one capture window.
///
/// Cheap to clone; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct CallRecorder {
    state: Arc<Mutex<RecorderState>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn enter(&self, key: FrameKey) -> Option<u64> {
        let mut state = self.state.lock();
        if !state.active {
            return None;
        }
        let id = state.next_frame;
        state.next_frame += 1;
        state.stack.push(Frame {
            id,
            key,
            entered: Instant::now(),
            child_time: Duration::ZERO,
        });
        Some(id)
    }

    fn exit(&self, id: u64) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if !state.active {
            return;
        }
        // Frames opened before a restart are gone from the stack.
        let Some(pos) = state.stack.iter().rposition(|f| f.id == id) else {
            return;
        };
        if pos + 1 != state.stack.len() {
            tracing::trace!(frame = id, depth = pos, "frame closed out of order");
        }

        let frame = state.stack.remove(pos);
        let elapsed = now.saturating_duration_since(frame.entered);
        let own = elapsed.saturating_sub(frame.child_time);
        let recursive = state.stack.iter().any(|f| f.key == frame.key);

        if pos > 0 {
            state.stack[pos - 1].child_time += elapsed;
        }

        let agg = state.table.entry(frame.key).or_default();
        agg.total_calls += 1;
        agg.total_time += own;
        if !recursive {
            agg.primitive_calls += 1;
            agg.cumulative_time += elapsed;
        }
    }
}

impl CapturePrimitive for CallRecorder {
    fn start(&self) {
        let mut state = self.state.lock();
        state.stack.clear();
        state.table.clear();
        state.active = true;
    }

    fn stop(&self) -> RawProfile {
        let mut state = self.state.lock();
        state.active = false;
        state.stack.clear();

        let mut profile = RawProfile::with_capacity(state.table.len());
        for (key, agg) in state.table.drain() {
            let stats = profile
                .entry(CallKey {
                    location: resolve_location(key.file),
                    line_number: key.line,
                    function_name: key.function.to_owned(),
                })
                .or_insert_with(RawCallStats::default);
            stats.primitive_calls += agg.primitive_calls;
            stats.total_calls += agg.total_calls;
            stats.total_time += agg.total_time.as_secs_f64();
            stats.cumulative_time += agg.cumulative_time.as_secs_f64();
            stats.application_code |= Path::new(key.file).is_relative();
        }
        profile
    }

    fn bind<'a, F>(&self, fut: F) -> BoxFuture<'a, F::Output>
    where
        F: Future + Send + 'a,
    {
        Box::pin(ACTIVE_RECORDER.scope(self.clone(), fut))
    }

    fn bind_sync<R>(&self, f: impl FnOnce() -> R) -> R {
        ACTIVE_RECORDER.sync_scope(self.clone(), f)
    }
}

/// Hands out a new [`CallRecorder`] per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallRecorderFactory;

impl CaptureFactory for CallRecorderFactory {
    type Primitive = CallRecorder;

    fn create(&self) -> CallRecorder {
        CallRecorder::new()
    }
}

// ─── Instrumentation ─────────────────────────────────────────────

/// Closes its frame when dropped.
#[must_use = "the frame closes as soon as the guard is dropped"]
#[derive(Debug)]
pub struct FrameGuard {
    frame: Option<(CallRecorder, u64)>,
}

impl FrameGuard {
    /// Whether this frame is being recorded.
    pub fn is_recording(&self) -> bool {
        self.frame.is_some()
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        if let Some((recorder, id)) = self.frame.take() {
            recorder.exit(id);
        }
    }
}

/// Open a frame named `function_name` at the caller's source location.
#[track_caller]
pub fn profile_scope(function_name: &'static str) -> FrameGuard {
    let location = Location::caller();
    let frame = ACTIVE_RECORDER
        .try_with(|recorder| {
            let key = FrameKey {
                file: location.file(),
                line: location.line(),
                function: function_name,
            };
            recorder.enter(key).map(|id| (recorder.clone(), id))
        })
        .ok()
        .flatten();
    FrameGuard { frame }
}

#[doc(hidden)]
pub fn __enclosing_function(marker: &'static str) -> &'static str {
    let mut name = marker.strip_suffix("::__marker").unwrap_or(marker);
    while let Some(outer) = name.strip_suffix("::{{closure}}") {
        name = outer;
    }
    name
}

/// Open a frame for the enclosing function, or for an explicit name.
///
/// ```
/// fn checksum(data: &[u8]) -> u32 {
///     let _frame = request_profiler::profiled!();
///     data.iter().map(|&b| b as u32).sum()
/// }
/// # assert_eq!(checksum(&[1, 2]), 3);
/// ```
#[macro_export]
macro_rules! profiled {
    () => {
        $crate::profiler::recorder::profile_scope({
            fn __marker() {}
            fn __name_of<T>(_: T) -> &'static str {
                ::std::any::type_name::<T>()
            }
            $crate::profiler::recorder::__enclosing_function(__name_of(__marker))
        })
    };
    ($name:expr) => {
        $crate::profiler::recorder::profile_scope($name)
    };
}
