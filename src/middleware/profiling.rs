use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method},
    middleware::{self as axum_mw, Next},
    response::Response,
    Router,
};
use futures::FutureExt;

use super::body::{CaptureSession, ProfiledBody};
use crate::config::{ConfigError, ProfilerConfig};
use crate::profiler::recorder::{application_root, CallRecorderFactory};
use crate::profiler::reducer::StatReducer;
use crate::profiler::report::{Reporter, RequestSummary};
use crate::profiler::scope::CaptureScope;
use crate::profiler::RawProfile;
use crate::profiler::{CaptureFactory, CapturePrimitive};

/// Status reported when the handler, or its response body, panicked.
pub const FAILED_REQUEST_STATUS: u16 = 500;

/// Everything the middleware needs, built once and shared by all requests.
pub struct RequestProfiler<F: CaptureFactory = CallRecorderFactory> {
    factory: F,
    reducer: StatReducer,
    reporter: Reporter,
    endpoints: Option<HashSet<String>>,
}

impl RequestProfiler<CallRecorderFactory> {
    pub fn new(config: ProfilerConfig) -> Result<Self, ConfigError> {
        Self::with_factory(config, CallRecorderFactory)
    }
}

impl<F: CaptureFactory> RequestProfiler<F> {
    /// Build with a custom capture primitive.
    pub fn with_factory(config: ProfilerConfig, factory: F) -> Result<Self, ConfigError> {
        config.validate()?;
        // Pin the root now so later working-directory changes don't move it.
        let _ = application_root();

        Ok(Self {
            factory,
            reducer: StatReducer::from_config(&config),
            reporter: Reporter::new(config.logger),
            endpoints: config.endpoints_to_measure,
        })
    }

    pub fn is_eligible(&self, path: &str) -> bool {
        self.endpoints
            .as_ref()
            .map_or(true, |endpoints| endpoints.contains(path))
    }

    pub(crate) fn report(&self, summary: &RequestSummary<'_>, raw: &RawProfile) {
        let records = self.reducer.reduce(raw);
        self.reporter.report(summary, &records);
    }
}

/// WebSocket handshakes and CONNECT tunnels are not request/response
/// exchanges; they pass through without a capture. An `h2c` upgrade offer is
/// answered as a plain HTTP/1.1 request, so it is still profiled.
fn is_protocol_upgrade(req: &Request) -> bool {
    if req.method() == Method::CONNECT {
        return true;
    }

    let headers = req.headers();
    let connection_upgrade = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));

    connection_upgrade
        && headers
            .get_all(header::UPGRADE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|protocol| !protocol.trim().eq_ignore_ascii_case("h2c"))
}

/// Axum middleware that profiles eligible requests.
///
/// The capture window covers the handler and the production of the response
/// body; the report is written once the body has been sent, or dropped.
///
/// Install with [`with_profiling`] or
/// `axum::middleware::from_fn_with_state(profiler, profile_requests::<F>)`.
pub async fn profile_requests<F: CaptureFactory>(
    State(profiler): State<Arc<RequestProfiler<F>>>,
    req: Request,
    next: Next,
) -> Response {
    if is_protocol_upgrade(&req) {
        return next.run(req).await;
    }

    let path = req.uri().path().to_owned();
    if !profiler.is_eligible(&path) {
        return next.run(req).await;
    }
    let method = req.method().clone();

    let scope = CaptureScope::begin(profiler.factory.create());
    let start = Instant::now();
    let outcome = AssertUnwindSafe(scope.primitive().bind(next.run(req)))
        .catch_unwind()
        .await;

    let session = CaptureSession {
        profiler,
        scope,
        method,
        path,
        start,
    };
    match outcome {
        Ok(response) => {
            let status = response.status().as_u16();
            response.map(|body| Body::new(ProfiledBody::new(body, session, status)))
        }
        Err(panic) => {
            session.finish(FAILED_REQUEST_STATUS);
            std::panic::resume_unwind(panic)
        }
    }
}

/// Wrap every route of `router` with [`profile_requests`].
pub fn with_profiling<S, F>(router: Router<S>, profiler: Arc<RequestProfiler<F>>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    F: CaptureFactory,
{
    router.layer(axum_mw::from_fn_with_state(profiler, profile_requests::<F>))
}
