//! Pending-upload queue for batched point submission.
//!
//! Points wait here until a flush drains them into one batch. A failed batch
//! is put back in front of anything accepted since, so the next attempt
//! resubmits the same points in their original order (at-least-once).

use std::collections::VecDeque;

use log::debug;

use crate::TrackPoint;

/// FIFO of accepted points not yet delivered to the backend.
#[derive(Debug, Clone)]
pub struct UploadQueue {
    pending: VecDeque<TrackPoint>,
    min_batch_size: usize,
}

impl UploadQueue {
    pub fn new(min_batch_size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            min_batch_size: min_batch_size.max(1),
        }
    }

    pub fn push(&mut self, point: TrackPoint) {
        self.pending.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether a timed flush would upload anything.
    pub fn is_ready(&self) -> bool {
        self.pending.len() >= self.min_batch_size
    }

    /// Drain the whole queue into a batch if it has reached the minimum size.
    pub fn take_batch(&mut self) -> Option<Vec<TrackPoint>> {
        if !self.is_ready() {
            return None;
        }
        Some(self.take_all())
    }

    /// Drain the whole queue regardless of size. Used by the final flush.
    pub fn take_all(&mut self) -> Vec<TrackPoint> {
        self.pending.drain(..).collect()
    }

    /// Put a failed batch back ahead of newer points.
    pub fn requeue(&mut self, batch: Vec<TrackPoint>) {
        debug!(
            "[UploadQueue] Requeueing {} points ahead of {} pending",
            batch.len(),
            self.pending.len()
        );
        for point in batch.into_iter().rev() {
            self.pending.push_front(point);
        }
    }

    /// Sequence numbers currently pending, in order.
    pub fn sequences(&self) -> Vec<u32> {
        self.pending.iter().map(|p| p.sequence).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn point(sequence: u32) -> TrackPoint {
        TrackPoint {
            sequence,
            latitude: 0.0,
            longitude: sequence as f64 * 0.001,
            elevation: None,
            speed: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_below_min_batch_is_not_taken() {
        let mut queue = UploadQueue::new(5);
        for i in 0..4 {
            queue.push(point(i));
        }
        assert!(queue.take_batch().is_none());
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_batch_drains_everything() {
        let mut queue = UploadQueue::new(5);
        for i in 0..7 {
            queue.push(point(i));
        }
        let batch = queue.take_batch().unwrap();
        assert_eq!(batch.len(), 7);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_preserves_order_ahead_of_new_points() {
        let mut queue = UploadQueue::new(5);
        for i in 0..5 {
            queue.push(point(i));
        }
        let batch = queue.take_batch().unwrap();

        // Accepted while the upload was in flight
        queue.push(point(5));
        queue.push(point(6));

        queue.requeue(batch);
        assert_eq!(queue.sequences(), vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_take_all_ignores_min_batch() {
        let mut queue = UploadQueue::new(5);
        queue.push(point(0));
        assert_eq!(queue.take_all().len(), 1);
        assert!(queue.take_all().is_empty());
    }

    #[test]
    fn test_zero_min_batch_is_clamped() {
        let mut queue = UploadQueue::new(0);
        assert!(queue.take_batch().is_none());
        queue.push(point(0));
        assert!(queue.take_batch().is_some());
    }
}
