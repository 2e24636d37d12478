//! Periodic latency sampling
//!
//! Once per sampling interval the local delay estimate is classified into a
//! tier and broadcast as a [`LatencyReport`]. The report is stamped for
//! `current frame + current max-ahead buffer` so that every peer has received
//! it before the stamped frame is simulated.

use crate::channel::EventChannel;
use log::debug;
use shared::{Frame, LatencyReport, PeerIndex, TierTable, INITIAL_SAMPLING_DELAY};

pub struct LatencySampler {
    local_index: PeerIndex,
    remote: bool,
    sampling_interval: u32,
    next_send_frame: Frame,
}

impl LatencySampler {
    pub fn new(local_index: PeerIndex, remote: bool, sampling_interval: u32) -> Self {
        Self {
            local_index,
            remote,
            sampling_interval,
            next_send_frame: sampling_interval.saturating_mul(INITIAL_SAMPLING_DELAY),
        }
    }

    /// Runs once per simulated frame. `measured_delay` is the transport's
    /// current delay estimate in frames, `None` while it is still unknown.
    ///
    /// Returns the report that was handed to the channel, if any.
    pub fn tick(
        &mut self,
        current_frame: Frame,
        measured_delay: Option<u8>,
        tiers: &TierTable,
        max_ahead_buffer: u8,
        channel: &mut dyn EventChannel,
    ) -> Option<LatencyReport> {
        if !self.remote || current_frame < self.next_send_frame {
            return None;
        }
        let delay = measured_delay?;

        let report = LatencyReport {
            peer_index: self.local_index,
            max_ahead_hint: delay.saturating_add(1),
            latency_tier: tiers.classify(delay),
            frame_stamp: current_frame.saturating_add(max_ahead_buffer as Frame),
        };

        if channel.enqueue(report) {
            self.next_send_frame = current_frame.saturating_add(self.sampling_interval);
            Some(report)
        } else {
            // Retry on the next frame instead of waiting a whole interval.
            debug!("Latency report deferred at frame {}", current_frame);
            self.next_send_frame = current_frame.saturating_add(1);
            None
        }
    }

    pub fn next_send_frame(&self) -> Frame {
        self.next_send_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::FrameQueue;
    use shared::SAMPLING_INTERVAL;

    fn sampler() -> LatencySampler {
        LatencySampler::new(PeerIndex(2), true, SAMPLING_INTERVAL)
    }

    fn first_frame() -> Frame {
        SAMPLING_INTERVAL * INITIAL_SAMPLING_DELAY
    }

    #[test]
    fn test_waits_for_initial_delay() {
        let mut sampler = sampler();
        let mut queue = FrameQueue::default();
        let tiers = TierTable::default();

        for frame in 0..first_frame() {
            assert!(sampler.tick(frame, Some(3), &tiers, 4, &mut queue).is_none());
        }
        assert!(queue.is_empty());
        assert!(sampler.tick(first_frame(), Some(3), &tiers, 4, &mut queue).is_some());
    }

    #[test]
    fn test_report_contents() {
        let mut sampler = sampler();
        let mut queue = FrameQueue::default();
        let tiers = TierTable::default();
        let frame = first_frame();

        let report = sampler.tick(frame, Some(7), &tiers, 6, &mut queue).unwrap();

        assert_eq!(report.peer_index, PeerIndex(2));
        assert_eq!(report.max_ahead_hint, 8);
        assert_eq!(report.latency_tier, tiers.classify(7));
        assert_eq!(report.frame_stamp, frame + 6);
        assert_eq!(queue.take_due(frame + 6), vec![report]);
    }

    #[test]
    fn test_next_report_after_interval() {
        let mut sampler = sampler();
        let mut queue = FrameQueue::default();
        let tiers = TierTable::default();
        let frame = first_frame();

        sampler.tick(frame, Some(3), &tiers, 4, &mut queue).unwrap();
        assert_eq!(sampler.next_send_frame(), frame + SAMPLING_INTERVAL);

        for f in frame + 1..frame + SAMPLING_INTERVAL {
            assert!(sampler.tick(f, Some(3), &tiers, 4, &mut queue).is_none());
        }
        assert!(sampler
            .tick(frame + SAMPLING_INTERVAL, Some(3), &tiers, 4, &mut queue)
            .is_some());
    }

    #[test]
    fn test_unknown_delay_is_noop() {
        let mut sampler = sampler();
        let mut queue = FrameQueue::default();
        let tiers = TierTable::default();

        assert!(sampler.tick(first_frame(), None, &tiers, 4, &mut queue).is_none());
        assert!(queue.is_empty());
        assert_eq!(sampler.next_send_frame(), first_frame());
    }

    #[test]
    fn test_local_session_is_noop() {
        let mut sampler = LatencySampler::new(PeerIndex(1), false, SAMPLING_INTERVAL);
        let mut queue = FrameQueue::default();
        let tiers = TierTable::default();

        assert!(sampler.tick(first_frame() * 2, Some(3), &tiers, 4, &mut queue).is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_full_channel_retries_next_frame() {
        let mut sampler = sampler();
        let mut queue = FrameQueue::new(0);
        let tiers = TierTable::default();
        let frame = first_frame();

        assert!(sampler.tick(frame, Some(3), &tiers, 4, &mut queue).is_none());
        assert_eq!(sampler.next_send_frame(), frame + 1);
    }

    #[test]
    fn test_hint_saturates() {
        let mut sampler = sampler();
        let mut queue = FrameQueue::default();
        let tiers = TierTable::default();

        let report = sampler
            .tick(first_frame(), Some(u8::MAX), &tiers, 4, &mut queue)
            .unwrap();
        assert_eq!(report.max_ahead_hint, u8::MAX);
        assert_eq!(report.latency_tier, shared::MAX_TIER);
    }
}
