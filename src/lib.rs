//! Per-request call profiling for axum servers.
//!
//! Every eligible request runs with its own [`CallRecorder`] bound to the
//! request future. Code instrumented with [`profiled!`] (or
//! [`profile_scope`]) reports into the recorder of the request it is running
//! for, including while its response body is streamed. Once the body is done
//! the recorded statistics are reduced (filter, sort) and written to a
//! [`ReportSink`] as plain text:
//!
//! ```text
//! GET /api/fib/20 0.01, 200
//! /srv/app/src/handlers/workload.rs:41 (app::handlers::workload::fib) 21891 0.01 0.01
//! ```
//!
//! Wiring it into a router:
//!
//! ```no_run
//! use std::sync::Arc;
//! use axum::{routing::get, Router};
//! use request_profiler::{with_profiling, ProfilerConfig, RequestProfiler};
//!
//! let profiler = RequestProfiler::new(ProfilerConfig::default()).expect("valid config");
//! let app: Router = with_profiling(
//!     Router::new().route("/health", get(|| async { "ok" })),
//!     Arc::new(profiler),
//! );
//! ```

pub mod config;
pub mod middleware;
pub mod profiler;

pub use config::{ConfigError, ProfilerConfig, SortBy};
pub use middleware::profiling::{
    profile_requests, with_profiling, RequestProfiler, FAILED_REQUEST_STATUS,
};
pub use profiler::recorder::{
    application_root, profile_scope, CallRecorder, CallRecorderFactory, FrameGuard,
};
pub use profiler::reducer::StatReducer;
pub use profiler::report::{ReportSink, Reporter, RequestSummary, StdoutSink, TracingSink};
pub use profiler::scope::CaptureScope;
pub use profiler::{CallKey, CallRecord, CaptureFactory, CapturePrimitive, RawCallStats, RawProfile};
