//! Relay UDP loop

use crate::forwarder::Forwarder;
use log::{debug, error, info};
use shared::MAX_DATAGRAM_SIZE;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

pub struct RelayServer {
    socket: UdpSocket,
    forwarder: Forwarder,
}

impl RelayServer {
    pub async fn bind(addr: &str, forwarder: Forwarder) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!(
            "Relay listening on {} for tunnel {} with {} routes",
            socket.local_addr()?,
            forwarder.tunnel_id(),
            forwarder.route_count()
        );
        Ok(Self { socket, forwarder })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    /// Forwards datagrams until the task is dropped.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let mut buffer = [0u8; MAX_DATAGRAM_SIZE + 1];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buffer).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    continue;
                }
            };

            if len > MAX_DATAGRAM_SIZE {
                debug!("Dropping oversized datagram from {}", src);
                continue;
            }

            match self.forwarder.forward(src, &buffer[..len]) {
                Ok((destination, datagram)) => {
                    if let Err(e) = self.socket.send_to(&datagram, destination).await {
                        error!("Failed to forward to {}: {}", destination, e);
                    }
                }
                Err(reason) => debug!("Dropping datagram from {}: {}", src, reason),
            }
        }
    }
}
