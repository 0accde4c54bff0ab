use std::time::Instant;

use uuid::Uuid;

use super::{CapturePrimitive, RawProfile};

/// One capture session bound to one request.
///
/// `begin` starts the primitive; it is stopped exactly once, either by
/// [`CaptureScope::end`] or, if the scope is dropped first (handler panic,
/// cancelled request), by `Drop`.
pub struct CaptureScope<P: CapturePrimitive> {
    primitive: P,
    session_id: Uuid,
    started_at: Instant,
    finished: bool,
}

impl<P: CapturePrimitive> CaptureScope<P> {
    pub fn begin(primitive: P) -> Self {
        let session_id = Uuid::new_v4();
        primitive.start();
        tracing::debug!(%session_id, "capture started");
        Self {
            primitive,
            session_id,
            started_at: Instant::now(),
            finished: false,
        }
    }

    /// The primitive recording this session, for binding the handler to it.
    pub fn primitive(&self) -> &P {
        &self.primitive
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Stop capturing and return the raw per-callable aggregates.
    pub fn end(mut self) -> RawProfile {
        self.finished = true;
        let profile = self.primitive.stop();
        tracing::debug!(
            session_id = %self.session_id,
            callables = profile.len(),
            capture_us = self.started_at.elapsed().as_micros() as u64,
            "capture finished"
        );
        profile
    }
}

impl<P: CapturePrimitive> Drop for CaptureScope<P> {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            let discarded = self.primitive.stop();
            tracing::debug!(
                session_id = %self.session_id,
                callables = discarded.len(),
                "capture released without a report"
            );
        }
    }
}
