//! Position source contract.
//!
//! The platform location service is an external collaborator. The controller
//! only needs a one-shot "current position" query and a continuous stream of
//! fixes. [`ChannelPositionSource`] adapts push-style platform callbacks (the
//! way mobile hosts deliver locations over FFI) into that contract.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use log::warn;
use tokio::sync::broadcast;

use crate::error::{Result, TrackingError};
use crate::Fix;

/// A never-ending stream of fixes; stream-level failures arrive as `Err` items.
pub type PositionStream = BoxStream<'static, Result<Fix>>;

/// Supplier of positional fixes.
pub trait PositionSource: Send + Sync {
    /// Single-shot position query. `None` when no position could be obtained.
    fn current_position(&self) -> BoxFuture<'_, Option<Fix>>;

    /// Subscribe to continuous position updates.
    ///
    /// `background_mode` asks the platform to keep delivering fixes while the
    /// app is not in the foreground.
    fn subscribe(&self, background_mode: bool) -> PositionStream;
}

/// Position source fed by the host pushing fixes into it.
///
/// Every subscriber sees every fix pushed after it subscribed. The last pushed
/// fix answers [`PositionSource::current_position`] until a subscription ends;
/// ending one forgets it, so the next session does not start from a stale fix.
pub struct ChannelPositionSource {
    sender: broadcast::Sender<Result<Fix>>,
    last_fix: Arc<Mutex<Option<Fix>>>,
}

/// Receiver half of a subscription. Clears the remembered fix when dropped.
struct Subscription {
    receiver: broadcast::Receiver<Result<Fix>>,
    last_fix: Arc<Mutex<Option<Fix>>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut last) = self.last_fix.lock() {
            *last = None;
        }
    }
}

impl ChannelPositionSource {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            last_fix: Arc::new(Mutex::new(None)),
        }
    }

    /// Deliver a fix to all subscribers.
    pub fn push_fix(&self, fix: Fix) {
        if let Ok(mut last) = self.last_fix.lock() {
            *last = Some(fix.clone());
        }
        // No subscribers is fine: the fix is still remembered as current position
        let _ = self.sender.send(Ok(fix));
    }

    /// Deliver a stream-level failure to all subscribers.
    pub fn push_error(&self, message: impl Into<String>) {
        let _ = self.sender.send(Err(TrackingError::position(message)));
    }

    /// Seed the current position without notifying subscribers.
    pub fn set_current_position(&self, fix: Option<Fix>) {
        if let Ok(mut last) = self.last_fix.lock() {
            *last = fix;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChannelPositionSource {
    fn default() -> Self {
        Self::new(256)
    }
}

impl PositionSource for ChannelPositionSource {
    fn current_position(&self) -> BoxFuture<'_, Option<Fix>> {
        let fix = self.last_fix.lock().ok().and_then(|last| last.clone());
        Box::pin(async move { fix })
    }

    fn subscribe(&self, _background_mode: bool) -> PositionStream {
        let subscription = Subscription {
            receiver: self.sender.subscribe(),
            last_fix: self.last_fix.clone(),
        };
        stream::unfold(subscription, |mut sub| async move {
            loop {
                match sub.receiver.recv().await {
                    Ok(update) => return Some((update, sub)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("[ChannelPositionSource] Subscriber lagged, {} fixes dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}
