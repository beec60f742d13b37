//! Session backend contract.
//!
//! The remote store for run sessions. Calls return boxed futures so the
//! controller can hold the backend as `Arc<dyn SessionBackend>` and move
//! upload calls onto their own task.

use futures::future::BoxFuture;

use crate::error::Result;
use crate::{RunSession, SessionRef, SessionSummary, TrackPoint};

/// Remote persistence for run sessions.
pub trait SessionBackend: Send + Sync {
    /// Whether an access credential is currently available.
    ///
    /// Timed flushes are skipped without one.
    fn has_credential(&self) -> bool;

    /// Create a new remote session.
    fn create_session<'a>(
        &'a self,
        route_id: Option<&'a str>,
        is_public: bool,
    ) -> BoxFuture<'a, Result<SessionRef>>;

    /// Append an ordered batch of points. Duplicate sequence numbers from
    /// retried batches are the backend's concern.
    fn append_points<'a>(
        &'a self,
        session_id: &'a str,
        points: &'a [TrackPoint],
    ) -> BoxFuture<'a, Result<()>>;

    /// Finalize a session and return the canonical record.
    fn end_session<'a>(
        &'a self,
        session_id: &'a str,
        summary: &'a SessionSummary,
    ) -> BoxFuture<'a, Result<RunSession>>;

    /// Delete a session. Callers treat this as best-effort.
    fn delete_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<()>>;
}
