pub mod workload;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Instant;

// ─── Shared response envelope ────────────────────────────────────

/// Every workload response carries how long the computation took, so the
/// figure can be compared with the profiler's report line.
#[derive(Debug, Clone, Serialize)]
pub struct TimedResponse<T: Serialize> {
    pub data: T,
    pub timing: RequestTiming,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RequestTiming {
    /// Handler compute time (μs)
    pub compute_us: u64,
}

impl<T: Serialize> TimedResponse<T> {
    pub fn since(data: T, t0: Instant) -> Self {
        Self {
            data,
            timing: RequestTiming {
                compute_us: t0.elapsed().as_micros() as u64,
            },
        }
    }
}

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    TooLarge { what: &'static str, max: u64 },
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::TooLarge { what, max } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("{what} must be at most {max}"),
            ),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
