//! Frame-stamped event delivery
//!
//! The lockstep channel is what makes latency consensus deterministic: a
//! report stamped for frame F is applied by every peer exactly when its frame
//! counter reaches F, and reports due on the same frame come out in the same
//! order everywhere.

use log::{debug, warn};
use shared::{Frame, LatencyReport};
use std::collections::BTreeMap;

/// Default number of undelivered events a queue will hold.
pub const CHANNEL_CAPACITY: usize = 64;

/// Deterministic, frame-aligned delivery of latency reports to every peer.
pub trait EventChannel {
    /// Schedules `report` for `report.frame_stamp`. `false` means the channel
    /// is momentarily full and the caller should try again next frame.
    fn enqueue(&mut self, report: LatencyReport) -> bool;

    /// Every report due at or before `frame`, ordered by frame stamp and then
    /// by peer index.
    fn take_due(&mut self, frame: Frame) -> Vec<LatencyReport>;
}

/// Bounded queue of reports keyed by their execution frame.
///
/// The capacity only limits [`FrameQueue::push`]. Reports another peer has
/// already scheduled go in through [`FrameQueue::insert`] and are never
/// refused.
#[derive(Debug, Clone)]
pub struct FrameQueue {
    events: BTreeMap<Frame, Vec<LatencyReport>>,
    len: usize,
    capacity: usize,
    overdue: u64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: BTreeMap::new(),
            len: 0,
            capacity,
            overdue: 0,
        }
    }

    /// Stores `report`; returns false when the queue is full.
    pub fn push(&mut self, report: LatencyReport) -> bool {
        if self.len >= self.capacity {
            debug!(
                "Event queue full ({} events), deferring report from {}",
                self.len, report.peer_index
            );
            return false;
        }

        self.insert(report);
        true
    }

    /// Stores `report` regardless of capacity.
    pub fn insert(&mut self, report: LatencyReport) {
        self.events.entry(report.frame_stamp).or_default().push(report);
        self.len += 1;
    }

    pub fn take_due(&mut self, frame: Frame) -> Vec<LatencyReport> {
        let later = match frame.checked_add(1) {
            Some(next) => self.events.split_off(&next),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut self.events, later);

        let mut reports = Vec::new();
        for (stamp, mut batch) in due {
            if stamp < frame {
                self.overdue += batch.len() as u64;
                warn!(
                    "{} latency report(s) stamped for frame {} applied late at frame {}",
                    batch.len(),
                    stamp,
                    frame
                );
            }
            batch.sort_by_key(|report| report.peer_index);
            reports.extend(batch);
        }

        self.len -= reports.len();
        reports
    }

    /// Reports handed out after their stamped frame had already passed.
    pub fn overdue(&self) -> u64 {
        self.overdue
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::new(CHANNEL_CAPACITY)
    }
}

/// Single-process channel: whatever is enqueued comes back to the same peer.
impl EventChannel for FrameQueue {
    fn enqueue(&mut self, report: LatencyReport) -> bool {
        self.push(report)
    }

    fn take_due(&mut self, frame: Frame) -> Vec<LatencyReport> {
        FrameQueue::take_due(self, frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::PeerIndex;

    fn report(peer: u8, frame: Frame) -> LatencyReport {
        LatencyReport {
            peer_index: PeerIndex(peer),
            max_ahead_hint: 5,
            latency_tier: 2,
            frame_stamp: frame,
        }
    }

    #[test]
    fn test_nothing_due_before_stamp() {
        let mut queue = FrameQueue::default();
        assert!(queue.push(report(1, 100)));

        assert!(queue.take_due(99).is_empty());
        assert_eq!(queue.len(), 1);

        let due = queue.take_due(100);
        assert_eq!(due, vec![report(1, 100)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_same_frame_ordered_by_peer() {
        let mut queue = FrameQueue::default();
        queue.push(report(3, 50));
        queue.push(report(1, 50));
        queue.push(report(2, 50));

        let due = queue.take_due(50);
        let peers: Vec<u8> = due.iter().map(|r| r.peer_index.0).collect();
        assert_eq!(peers, vec![1, 2, 3]);
    }

    #[test]
    fn test_overdue_frames_delivered_in_frame_order() {
        let mut queue = FrameQueue::default();
        queue.push(report(1, 20));
        queue.push(report(2, 10));
        queue.push(report(3, 30));

        let due = queue.take_due(25);
        let frames: Vec<Frame> = due.iter().map(|r| r.frame_stamp).collect();
        assert_eq!(frames, vec![10, 20]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.overdue(), 2);
    }

    #[test]
    fn test_on_time_reports_are_not_overdue() {
        let mut queue = FrameQueue::default();
        queue.push(report(1, 40));
        queue.push(report(2, 40));

        assert_eq!(queue.take_due(40).len(), 2);
        assert_eq!(queue.overdue(), 0);
    }

    #[test]
    fn test_insert_ignores_capacity() {
        let mut queue = FrameQueue::new(1);
        assert!(queue.push(report(1, 5)));
        queue.insert(report(2, 5));

        assert!(!queue.push(report(3, 5)));
        assert_eq!(queue.take_due(5), vec![report(1, 5), report(2, 5)]);
    }

    #[test]
    fn test_full_queue_rejects() {
        let mut queue = FrameQueue::new(2);
        assert!(queue.push(report(1, 1)));
        assert!(queue.push(report(2, 1)));
        assert!(!queue.push(report(3, 1)));
        assert_eq!(queue.len(), 2);

        queue.take_due(1);
        assert!(queue.push(report(3, 2)));
    }

    #[test]
    fn test_take_due_at_max_frame() {
        let mut queue = FrameQueue::default();
        queue.push(report(1, Frame::MAX));
        assert_eq!(queue.take_due(Frame::MAX).len(), 1);
    }
}
