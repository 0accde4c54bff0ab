use axum::{
    routing::{get, post},
    Router,
};
use request_profiler::{with_profiling, RequestProfiler};
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;

use crate::handlers::workload;

/// Builds the demo `Router`: workload routes wrapped by the profiler.
pub fn create_router(profiler: Arc<RequestProfiler>) -> Router {
    let routes = Router::new()
        // ── Liveness ────────────────────────────────────────────
        .route("/health", get(workload::health))
        // ── CPU-bound workloads ─────────────────────────────────
        .route("/api/fib/:n", get(workload::fibonacci))
        .route("/api/primes/:limit", get(workload::primes))
        .route("/api/sort", post(workload::sort_random))
        // ── Failure path ────────────────────────────────────────
        .route("/api/panic", get(workload::explode));

    // Layers apply bottom-up: the profiler sees the panic before
    // CatchPanicLayer turns it into a 500 for the client.
    with_profiling(routes, profiler)
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
}
