//! Peer runtime: socket polling, frame loop and peer-to-peer packets
//!
//! The node runs one simulated frame per tick of a fixed interval and drains
//! the socket whenever it becomes readable, so nothing in the frame path ever
//! waits on the network. Latency events travel to other peers as
//! [`Packet::LatencyEvent`] and are queued locally for the frame they are
//! stamped with; round trips are measured with ping/pong packets counted in
//! frames.

use crate::channel::{EventChannel, FrameQueue, CHANNEL_CAPACITY};
use crate::config::SessionConfig;
use crate::controller::LogStatusSink;
use crate::session::{Session, SessionError};
use crate::tunnel::SendError;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Frame, LatencyReport, Packet, PeerIndex};
use std::collections::VecDeque;
use std::io;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, MissedTickBehavior};

/// Round-trip samples kept by the estimator.
pub const ESTIMATOR_WINDOW: usize = 8;
/// Frames between two pings to every peer.
pub const PING_INTERVAL: Frame = 10;

/// Round-trip estimate in simulation frames: the worst of the last few samples.
#[derive(Debug, Clone)]
pub struct RoundTripEstimator {
    samples: VecDeque<Frame>,
    window: usize,
}

impl RoundTripEstimator {
    pub fn new(window: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window),
            window: window.max(1),
        }
    }

    /// Records a pong for a ping sent at `sent_frame`.
    pub fn record(&mut self, sent_frame: Frame, now: Frame) {
        if sent_frame > now {
            return;
        }
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(now - sent_frame);
    }

    /// `None` until the first pong arrives.
    pub fn estimate(&self) -> Option<u8> {
        self.samples
            .iter()
            .max()
            .map(|&worst| worst.min(u8::MAX as Frame) as u8)
    }
}

impl Default for RoundTripEstimator {
    fn default() -> Self {
        Self::new(ESTIMATOR_WINDOW)
    }
}

/// Lockstep channel over the relay transport. Enqueued reports are kept for
/// local delivery and buffered as packets for the node to send to every peer.
#[derive(Debug, Default)]
pub struct DatagramEventChannel {
    queue: FrameQueue,
    outgoing: Vec<Packet>,
}

impl DatagramEventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: FrameQueue::new(capacity),
            outgoing: Vec::new(),
        }
    }

    /// Queues a report that arrived from another peer, even when the queue
    /// is at capacity.
    pub fn deliver(&mut self, report: LatencyReport) {
        self.queue.insert(report);
    }

    pub fn take_outgoing(&mut self) -> Vec<Packet> {
        std::mem::take(&mut self.outgoing)
    }

    /// Reports applied after their stamped frame.
    pub fn overdue(&self) -> u64 {
        self.queue.overdue()
    }
}

impl EventChannel for DatagramEventChannel {
    fn enqueue(&mut self, report: LatencyReport) -> bool {
        if !self.queue.push(report) {
            return false;
        }
        self.outgoing.push(Packet::LatencyEvent {
            frame: report.frame_stamp,
            sender: report.peer_index,
            payload: report.payload(),
        });
        true
    }

    fn take_due(&mut self, frame: Frame) -> Vec<LatencyReport> {
        self.queue.take_due(frame)
    }
}

pub struct PeerNode {
    session: Session<UdpSocket>,
    channel: DatagramEventChannel,
    estimator: RoundTripEstimator,
    status: LogStatusSink,
    frame_duration: Duration,
}

impl PeerNode {
    /// Binds the session socket and builds the session. Must run inside a
    /// tokio runtime.
    pub async fn bind(
        config: &SessionConfig,
        bind_addr: &str,
        frame_rate: u32,
    ) -> Result<Self, SessionError> {
        let bind_error = |source| SessionError::Bind {
            addr: bind_addr.to_string(),
            source,
        };

        let socket = std::net::UdpSocket::bind(bind_addr).map_err(bind_error)?;
        socket.set_nonblocking(true).map_err(bind_error)?;
        let socket = UdpSocket::from_std(socket).map_err(bind_error)?;
        info!("Session socket bound to {}", bind_addr);

        Ok(Self {
            session: Session::new(config, socket)?,
            channel: DatagramEventChannel::new(CHANNEL_CAPACITY),
            estimator: RoundTripEstimator::default(),
            status: LogStatusSink,
            frame_duration: Duration::from_secs_f64(1.0 / frame_rate.max(1) as f64),
        })
    }

    pub fn session(&self) -> &Session<UdpSocket> {
        &self.session
    }

    pub fn local_addr(&self) -> io::Result<std::net::SocketAddr> {
        self.session.transport().socket().local_addr()
    }

    fn send_packet(&mut self, peer: PeerIndex, packet: &Packet) {
        let data = match serialize(packet) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize packet: {}", e);
                return;
            }
        };

        match self.session.transport_mut().send(peer, &data) {
            Ok(_) => {}
            Err(SendError::UnknownPeer(_)) => {}
            Err(e) => error!("Failed to send to peer {}: {}", peer, e),
        }
    }

    fn broadcast(&mut self, packet: &Packet) {
        let peers: Vec<PeerIndex> = self.session.transport().table().indices().collect();
        for peer in peers {
            self.send_packet(peer, packet);
        }
    }

    fn handle_packet(&mut self, from: PeerIndex, packet: Packet) {
        let local = self.session.local_index();
        match packet {
            Packet::LatencyEvent {
                frame,
                sender,
                payload,
            } => {
                if sender != from {
                    warn!("Peer {} sent an event on behalf of {}", from, sender);
                    return;
                }
                match LatencyReport::from_payload(sender, frame, &payload) {
                    Ok(report) => {
                        if report.frame_stamp < self.session.frame() {
                            warn!(
                                "Report from {} stamped for frame {} arrived at frame {}",
                                from,
                                report.frame_stamp,
                                self.session.frame()
                            );
                        }
                        self.channel.deliver(report);
                    }
                    Err(e) => debug!("Bad latency event from {}: {}", from, e),
                }
            }
            Packet::Ping { frame, .. } => {
                self.send_packet(
                    from,
                    &Packet::Pong {
                        sender: local,
                        frame,
                    },
                );
            }
            Packet::Pong { frame, .. } => {
                self.estimator.record(frame, self.session.frame());
            }
        }
    }

    fn poll_socket(&mut self) -> io::Result<()> {
        for (from, payload) in self.session.transport_mut().drain()? {
            self.handle_datagram(from, &payload);
        }
        Ok(())
    }

    fn handle_datagram(&mut self, from: PeerIndex, payload: &[u8]) {
        match deserialize::<Packet>(payload) {
            Ok(packet) => self.handle_packet(from, packet),
            Err(_) => debug!("Failed to deserialize packet from {}", from),
        }
    }

    fn on_frame(&mut self) {
        let summary = self
            .session
            .step(self.estimator.estimate(), &mut self.channel, &mut self.status);

        if summary.frame % PING_INTERVAL == 0 {
            let ping = Packet::Ping {
                sender: self.session.local_index(),
                frame: summary.frame,
            };
            self.broadcast(&ping);
        }

        // Batched every `send_rate` frames; must stay below the max-ahead stamp offset.
        let send_rate = self.session.sync_state().send_rate.max(1) as Frame;
        if summary.frame % send_rate == 0 {
            for packet in self.channel.take_outgoing() {
                self.broadcast(&packet);
            }
        }

        if summary.frame % 300 == 0 {
            let stats = self.session.transport().stats();
            debug!(
                "Frame {}: tier {}, rtt {:?}, {} sent, {} received, {} dropped, {} late reports",
                summary.frame,
                self.session.sync_state().current_tier,
                self.estimator.estimate(),
                stats.sent,
                stats.received,
                stats.dropped_short
                    + stats.dropped_oversize
                    + stats.dropped_foreign
                    + stats.dropped_unknown,
                self.channel.overdue()
            );
        }
    }

    /// Runs the frame loop until `frames` frames have been simulated, or
    /// forever when `frames` is `None`.
    pub async fn run(&mut self, frames: Option<Frame>) -> io::Result<()> {
        let mut frame_timer = interval(self.frame_duration);
        frame_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Peer started at frame {}", self.session.frame());

        loop {
            tokio::select! {
                result = self.session.transport().socket().readable() => {
                    if let Err(e) = result.and_then(|_| self.poll_socket()) {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },

                _ = frame_timer.tick() => {
                    self.on_frame();
                    if frames.is_some_and(|limit| self.session.frame() >= limit) {
                        break;
                    }
                },
            }
        }

        Ok(())
    }
}
