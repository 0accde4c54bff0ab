use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    routing::get,
    Router,
};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use request_profiler::{
    profiled, with_profiling, CallKey, CaptureFactory, CapturePrimitive, ProfilerConfig,
    RawCallStats, RawProfile, ReportSink, RequestProfiler,
};
use tower::ServiceExt;

// ─── Test doubles ────────────────────────────────────────────────

/// Collects emitted lines in memory.
#[derive(Clone, Default)]
struct Lines(Arc<Mutex<Vec<String>>>);

impl Lines {
    fn sink(&self) -> Arc<dyn ReportSink> {
        let inner = self.0.clone();
        Arc::new(move |line: &str| inner.lock().push(line.to_owned()))
    }

    fn get(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Lines grouped per report, each group starting at a summary line.
    fn reports(&self) -> Vec<Vec<String>> {
        let mut reports: Vec<Vec<String>> = Vec::new();
        for line in self.get() {
            if line.starts_with("GET ") || line.starts_with("POST ") {
                reports.push(vec![line]);
            } else if let Some(current) = reports.last_mut() {
                current.push(line);
            }
        }
        reports
    }
}

/// Capture primitive that returns a fixed profile and counts its calls.
#[derive(Clone, Default)]
struct Scripted {
    profile: RawProfile,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl Scripted {
    fn with(profile: RawProfile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl CapturePrimitive for Scripted {
    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) -> RawProfile {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.profile.clone()
    }

    fn bind<'a, F>(&self, fut: F) -> BoxFuture<'a, F::Output>
    where
        F: Future + Send + 'a,
    {
        Box::pin(fut)
    }
}

impl CaptureFactory for Scripted {
    type Primitive = Scripted;

    fn create(&self) -> Scripted {
        self.clone()
    }
}

fn foo_bar() -> RawProfile {
    let entry = |line, name: &str, calls, tt, ct| {
        (
            CallKey {
                location: "a.py".into(),
                line_number: line,
                function_name: name.into(),
            },
            RawCallStats {
                primitive_calls: calls,
                total_calls: calls,
                total_time: tt,
                cumulative_time: ct,
                application_code: true,
            },
        )
    };
    [entry(10, "foo", 3, 0.10, 0.30), entry(20, "bar", 1, 0.05, 0.05)]
        .into_iter()
        .collect()
}

fn scripted_app(routes: Router, config: ProfilerConfig, capture: &Scripted) -> Router {
    let profiler = RequestProfiler::with_factory(config, capture.clone()).unwrap();
    with_profiling(routes, Arc::new(profiler))
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ─── Scripted capture ────────────────────────────────────────────

#[tokio::test]
async fn health_report_lists_records_by_cumulative_time() {
    let lines = Lines::default();
    let capture = Scripted::with(foo_bar());
    let app = scripted_app(
        Router::new().route("/health", get(|| async { "ok" })),
        ProfilerConfig::default().logger(lines.sink()),
        &capture,
    );

    let response = app.oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let out = lines.get();
    assert_eq!(out.len(), 3);
    assert!(out[0].starts_with("GET /health "), "summary was {}", out[0]);
    assert!(out[0].ends_with(", 200"), "summary was {}", out[0]);
    assert_eq!(out[1], "a.py:10 (foo) 3 0.10 0.30");
    assert_eq!(out[2], "a.py:20 (bar) 1 0.05 0.05");
    assert_eq!((capture.starts(), capture.stops()), (1, 1));
}

#[tokio::test]
async fn threshold_hides_fast_records() {
    let lines = Lines::default();
    let capture = Scripted::with(foo_bar());
    let app = scripted_app(
        Router::new().route("/health", get(|| async { "ok" })),
        ProfilerConfig::default()
            .minimal_cumulative_time_to_print(0.10)
            .logger(lines.sink()),
        &capture,
    );

    app.oneshot(get_request("/health")).await.unwrap();

    let out = lines.get();
    assert_eq!(out.len(), 2);
    assert!(out[1].contains("(foo)"));
}

#[tokio::test]
async fn paths_outside_the_allow_list_are_not_captured() {
    let lines = Lines::default();
    let capture = Scripted::with(foo_bar());
    let app = scripted_app(
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/other", get(|| async { "other" })),
        ProfilerConfig::default()
            .endpoints_to_measure(["/health"])
            .logger(lines.sink()),
        &capture,
    );

    let response = app.oneshot(get_request("/other")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(capture.starts(), 0);
    assert_eq!(capture.stops(), 0);
    assert!(lines.get().is_empty());
}

#[tokio::test]
async fn response_passes_through_untouched() {
    let lines = Lines::default();
    let capture = Scripted::default();
    let app = scripted_app(
        Router::new().route(
            "/created",
            get(|| async { (StatusCode::CREATED, [("x-origin", "handler")], "made it") }),
        ),
        ProfilerConfig::default().logger(lines.sink()),
        &capture,
    );

    let response = app.oneshot(get_request("/created")).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()["x-origin"], "handler");
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"made it");

    assert_eq!(lines.get().len(), 1);
    assert!(lines.get()[0].ends_with(", 201"));
}

#[tokio::test]
async fn error_status_is_reported() {
    let lines = Lines::default();
    let capture = Scripted::default();
    let app = scripted_app(
        Router::new().route("/missing", get(|| async { StatusCode::NOT_FOUND })),
        ProfilerConfig::default().logger(lines.sink()),
        &capture,
    );

    let response = app.oneshot(get_request("/missing")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    drop(response);

    let out = lines.get();
    assert!(out[0].starts_with("GET /missing "));
    assert!(out[0].ends_with(", 404"));
}

#[tokio::test]
async fn panicking_handler_reports_500_and_propagates() {
    let lines = Lines::default();
    let capture = Scripted::with(foo_bar());
    let app = scripted_app(
        Router::new().route(
            "/boom",
            get(|| async {
                if true {
                    panic!("handler exploded");
                }
                "unreachable"
            }),
        ),
        ProfilerConfig::default().logger(lines.sink()),
        &capture,
    );

    let result = AssertUnwindSafe(app.oneshot(get_request("/boom")))
        .catch_unwind()
        .await;
    assert!(result.is_err(), "panic must reach the caller");
    assert_eq!(capture.stops(), 1);

    let out = lines.get();
    assert!(out[0].starts_with("GET /boom "));
    assert!(out[0].ends_with(", 500"));
    assert_eq!(out.len(), 3);
}

#[tokio::test]
async fn protocol_upgrades_pass_through() {
    let lines = Lines::default();
    let capture = Scripted::with(foo_bar());
    let app = scripted_app(
        Router::new().route("/ws", get(|| async { "no upgrade here" })),
        ProfilerConfig::default().logger(lines.sink()),
        &capture,
    );

    let request = Request::builder()
        .uri("/ws")
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(capture.starts(), 0);
    assert!(lines.get().is_empty());
}

#[tokio::test]
async fn cancelled_request_releases_capture_without_report() {
    let lines = Lines::default();
    let capture = Scripted::with(foo_bar());
    let app = scripted_app(
        Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                "late"
            }),
        ),
        ProfilerConfig::default().logger(lines.sink()),
        &capture,
    );

    let outcome =
        tokio::time::timeout(Duration::from_millis(20), app.oneshot(get_request("/slow"))).await;
    assert!(outcome.is_err());
    assert_eq!((capture.starts(), capture.stops()), (1, 1));
    assert!(lines.get().is_empty());
}

// ─── Real call recorder ──────────────────────────────────────────

fn work_a() -> u64 {
    let _frame = profiled!();
    std::hint::black_box((0..1_000u64).sum())
}

fn work_b() -> u64 {
    let _frame = profiled!();
    std::hint::black_box((1..=20u64).product::<u64>().wrapping_add(1))
}

async fn handler_a() -> String {
    let mut acc = 0;
    for _ in 0..3 {
        acc += work_a();
        tokio::task::yield_now().await;
    }
    acc.to_string()
}

async fn handler_b() -> String {
    let mut acc = 0u64;
    for _ in 0..3 {
        acc = acc.wrapping_add(work_b());
        tokio::task::yield_now().await;
    }
    acc.to_string()
}

fn recorded_app(config: ProfilerConfig) -> Router {
    let routes = Router::new()
        .route("/a", get(handler_a))
        .route("/b", get(handler_b))
        .route(
            "/fail",
            get(|| async {
                work_a();
                if true {
                    panic!("after work_a");
                }
                "unreachable"
            }),
        );
    with_profiling(routes, Arc::new(RequestProfiler::new(config).unwrap()))
}

#[tokio::test]
async fn concurrent_requests_keep_their_own_records() {
    let lines = Lines::default();
    let app = recorded_app(ProfilerConfig::default().logger(lines.sink()));

    let (a, b) = tokio::join!(
        app.clone().oneshot(get_request("/a")),
        app.clone().oneshot(get_request("/b")),
    );
    assert_eq!(a.unwrap().status(), StatusCode::OK);
    assert_eq!(b.unwrap().status(), StatusCode::OK);

    let reports = lines.reports();
    assert_eq!(reports.len(), 2);
    for report in reports {
        let (own, other) = if report[0].starts_with("GET /a ") {
            ("::work_a)", "::work_b)")
        } else {
            ("::work_b)", "::work_a)")
        };
        let records = &report[1..];
        assert_eq!(records.len(), 1, "report: {report:?}");
        assert!(records[0].contains(own));
        assert!(!records[0].contains(other));
        assert!(records[0].contains(") 3 "), "three calls expected: {}", records[0]);
    }
}

#[tokio::test]
async fn records_point_at_the_application_source() {
    let lines = Lines::default();
    let app = recorded_app(
        ProfilerConfig::default()
            .ignore_internal_frames(true)
            .logger(lines.sink()),
    );

    app.oneshot(get_request("/a")).await.unwrap();

    let out = lines.get();
    assert_eq!(out.len(), 2);
    assert!(out[1].starts_with(request_profiler::application_root()));
    assert!(out[1].contains("middleware.rs:"));
}

#[tokio::test]
async fn partial_records_survive_a_panic() {
    let lines = Lines::default();
    let app = recorded_app(ProfilerConfig::default().logger(lines.sink()));

    let result = AssertUnwindSafe(app.oneshot(get_request("/fail")))
        .catch_unwind()
        .await;
    assert!(result.is_err());

    let out = lines.get();
    assert!(out[0].ends_with(", 500"));
    assert_eq!(out.len(), 2);
    assert!(out[1].contains("::work_a)"));
}

#[tokio::test]
async fn unprofiled_requests_record_nothing() {
    let lines = Lines::default();
    let app = recorded_app(
        ProfilerConfig::default()
            .endpoints_to_measure(["/b"])
            .logger(lines.sink()),
    );

    app.clone().oneshot(get_request("/a")).await.unwrap();
    assert!(lines.get().is_empty());

    app.oneshot(get_request("/b")).await.unwrap();
    let reports = lines.reports();
    assert_eq!(reports.len(), 1);
    assert!(reports[0][0].starts_with("GET /b "));
}

// ─── Streamed bodies ─────────────────────────────────────────────

fn render_chunk(i: u32) -> String {
    let _frame = profiled!();
    std::thread::sleep(Duration::from_millis(20));
    format!("chunk {i}\n")
}

fn render_or_fail(i: u32) -> String {
    let _frame = profiled!();
    if i == 1 {
        panic!("stream broke at chunk {i}");
    }
    format!("chunk {i}\n")
}

fn streaming_app(lines: &Lines) -> Router {
    let routes = Router::new()
        .route(
            "/stream",
            get(|| async {
                Body::from_stream(
                    futures::stream::iter(0..3).map(|i| Ok::<_, std::io::Error>(render_chunk(i))),
                )
            }),
        )
        .route(
            "/stream-fail",
            get(|| async {
                Body::from_stream(
                    futures::stream::iter(0..3)
                        .map(|i| Ok::<_, std::io::Error>(render_or_fail(i))),
                )
            }),
        );
    let config = ProfilerConfig::default().logger(lines.sink());
    with_profiling(routes, Arc::new(RequestProfiler::new(config).unwrap()))
}

fn summary_seconds(summary: &str) -> f64 {
    let (head, _status) = summary.rsplit_once(", ").unwrap();
    head.rsplit(' ').next().unwrap().parse().unwrap()
}

#[tokio::test]
async fn streamed_body_work_is_captured_and_timed() {
    let lines = Lines::default();
    let app = streaming_app(&lines);

    let response = app.oneshot(get_request("/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(lines.get().is_empty(), "reported before the body was sent");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"chunk 0\nchunk 1\nchunk 2\n");

    let out = lines.get();
    assert_eq!(out.len(), 2, "report: {out:?}");
    assert!(out[0].starts_with("GET /stream "));
    assert!(out[0].ends_with(", 200"));
    assert!(summary_seconds(&out[0]) >= 0.05, "summary was {}", out[0]);
    assert!(out[1].contains("::render_chunk) 3 "), "record was {}", out[1]);
}

#[tokio::test]
async fn panic_while_streaming_reports_500() {
    let lines = Lines::default();
    let app = streaming_app(&lines);

    let response = app.oneshot(get_request("/stream-fail")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let result = AssertUnwindSafe(axum::body::to_bytes(response.into_body(), usize::MAX))
        .catch_unwind()
        .await;
    assert!(result.is_err(), "panic must reach the reader");

    let reports = lines.reports();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report[0].starts_with("GET /stream-fail "));
    assert!(report[0].ends_with(", 500"));
    assert!(report[1..].iter().any(|line| line.contains("::render_or_fail)")));
}

#[tokio::test]
async fn dropped_body_is_reported_once() {
    let lines = Lines::default();
    let app = streaming_app(&lines);

    let response = app.oneshot(get_request("/stream")).await.unwrap();
    drop(response);

    let out = lines.get();
    assert_eq!(out.len(), 1, "report: {out:?}");
    assert!(out[0].ends_with(", 200"));
}
