use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::Method;
use http_body::{Body as HttpBody, Frame, SizeHint};

use super::profiling::{RequestProfiler, FAILED_REQUEST_STATUS};
use crate::profiler::report::RequestSummary;
use crate::profiler::scope::CaptureScope;
use crate::profiler::{CaptureFactory, CapturePrimitive};

/// A profiled request whose report has not been written yet.
pub(crate) struct CaptureSession<F: CaptureFactory> {
    pub(crate) profiler: Arc<RequestProfiler<F>>,
    pub(crate) scope: CaptureScope<F::Primitive>,
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) start: Instant,
}

impl<F: CaptureFactory> CaptureSession<F> {
    /// Close the capture window and write the report.
    pub(crate) fn finish(self, status: u16) {
        let elapsed = self.start.elapsed();
        let raw = self.scope.end();
        self.profiler.report(
            &RequestSummary {
                method: self.method.as_str(),
                path: &self.path,
                elapsed,
                status,
            },
            &raw,
        );
    }
}

/// Response body that keeps the capture open until the body is done.
///
/// Every poll of the inner body runs with the request's primitive bound, so
/// work done while streaming lands in the same report. The report goes out
/// when the body ends, fails, panics or is dropped, whichever comes first.
pub(crate) struct ProfiledBody<F: CaptureFactory> {
    inner: Body,
    status: u16,
    session: Option<CaptureSession<F>>,
}

// Only `inner` is polled, and `Body` is itself `Unpin`.
impl<F: CaptureFactory> Unpin for ProfiledBody<F> {}

impl<F: CaptureFactory> ProfiledBody<F> {
    pub(crate) fn new(inner: Body, session: CaptureSession<F>, status: u16) -> Self {
        Self {
            inner,
            status,
            session: Some(session),
        }
    }

    fn finish(&mut self, status: u16) {
        if let Some(session) = self.session.take() {
            session.finish(status);
        }
    }
}

impl<F: CaptureFactory> HttpBody for ProfiledBody<F> {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, axum::Error>>> {
        let this = self.get_mut();
        let Some(session) = &this.session else {
            return Pin::new(&mut this.inner).poll_frame(cx);
        };

        let inner = &mut this.inner;
        let polled = std::panic::catch_unwind(AssertUnwindSafe(|| {
            session
                .scope
                .primitive()
                .bind_sync(|| Pin::new(inner).poll_frame(cx))
        }));

        match polled {
            Ok(Poll::Ready(None)) => {
                this.finish(this.status);
                Poll::Ready(None)
            }
            Ok(Poll::Ready(Some(Err(err)))) => {
                this.finish(this.status);
                Poll::Ready(Some(Err(err)))
            }
            Ok(pending_or_frame) => pending_or_frame,
            Err(panic) => {
                this.finish(FAILED_REQUEST_STATUS);
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<F: CaptureFactory> Drop for ProfiledBody<F> {
    fn drop(&mut self) {
        self.finish(self.status);
    }
}
