//! Discovery engine (C4): periodic broadcast beacon, beacon/reply handling,
//! and roster feeding.
//!
//! Grounded on the teacher's `runtime/lan/discovery.rs` beacon
//! broadcaster/listener pair, but reshaped from two long-lived spawned tasks
//! into a single `tick()` driven by the non-blocking [`UdpEp`] built in
//! `transport.rs` — matching this engine's poll-based contract (§4.4, §5)
//! instead of the teacher's task-per-concern model.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::dispatch::{self, Channel, DispatchEffect, EngineCallbacks};
use crate::error::TransportError;
use crate::roster::Roster;
use crate::transport::UdpEp;
use crate::wire::{self, FrameType};

/// How often a `DISCOVERY` beacon is sent (§4.4, §7).
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// Drives the discovery half of the protocol: sends a beacon on
/// [`DISCOVERY_INTERVAL`], and drains+dispatches every inbound datagram on
/// every [`tick`](DiscoveryEngine::tick).
pub struct DiscoveryEngine {
    udp: UdpEp,
    beacon_dest: SocketAddr,
    local_ip: String,
    username: String,
    last_beacon_at: Option<Instant>,
}

impl DiscoveryEngine {
    /// `beacon_dest` is where beacons are sent. On a real LAN this is the
    /// subnet broadcast address on the discovery port; tests substitute a
    /// loopback unicast address, since two engines on `127.0.0.1` cannot
    /// share a broadcast domain the way two LAN hosts would (§10.4).
    pub fn new(udp: UdpEp, beacon_dest: SocketAddr, local_ip: String, username: String) -> Self {
        DiscoveryEngine {
            udp,
            beacon_dest,
            local_ip,
            username,
            last_beacon_at: None,
        }
    }

    /// One non-blocking pass: emit a beacon if due, then drain every ready
    /// datagram until the socket reports [`TransportError::NoData`].
    pub fn tick(&mut self, roster: &Roster, now: Instant, callbacks: &dyn EngineCallbacks) {
        self.maybe_send_beacon(now);

        let mut buf = [0u8; wire::BUFFER_SIZE];
        loop {
            match self.udp.try_recv(&mut buf) {
                Ok((src, n)) => self.handle_datagram(&buf[..n], src, roster, now, callbacks),
                Err(TransportError::NoData) => break,
                Err(e) => {
                    warn!("discovery socket error: {e}");
                    break;
                }
            }
        }
    }

    fn maybe_send_beacon(&mut self, now: Instant) {
        let due = match self.last_beacon_at {
            None => true,
            Some(last) => now >= last && now.duration_since(last) >= DISCOVERY_INTERVAL,
        };
        if !due {
            return;
        }

        match wire::encode(&FrameType::Discovery, Some(&self.username), Some(&self.local_ip), None) {
            Ok(bytes) => match self.udp.try_send(self.beacon_dest, &bytes) {
                Ok(()) => {
                    debug!("beacon sent to {}", self.beacon_dest);
                    self.last_beacon_at = Some(now);
                }
                Err(TransportError::WouldBlock) => {
                    // Send buffer is momentarily full; try again next tick
                    // rather than advancing `last_beacon_at`.
                }
                Err(e) => warn!("failed to send beacon: {e}"),
            },
            Err(e) => warn!("failed to encode beacon: {e}"),
        }
    }

    fn handle_datagram(
        &self,
        bytes: &[u8],
        src: SocketAddr,
        roster: &Roster,
        now: Instant,
        callbacks: &dyn EngineCallbacks,
    ) {
        let src_ip = src.ip().to_string();
        if src_ip == self.local_ip {
            // Our own beacon, reflected back by a broadcast-capable socket.
            return;
        }

        let frame = match wire::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("dropping malformed datagram from {src_ip}: {e}");
                return;
            }
        };

        let is_discovery = frame.frame_type == FrameType::Discovery;
        // `dispatch` already invokes `on_roster_changed` for any add/update;
        // only the info-level log is this module's own concern.
        let effect = dispatch::dispatch(&frame, &src_ip, Channel::Udp, roster, now, callbacks);
        if matches!(effect, DispatchEffect::RosterAdded) {
            info!("discovered peer {src_ip} ({})", frame.sender_username);
        }

        if is_discovery {
            self.reply_to(src, &frame.sender_username);
        }
    }

    fn reply_to(&self, dest: SocketAddr, _requester_username: &str) {
        match wire::encode(&FrameType::DiscoveryResponse, Some(&self.username), Some(&self.local_ip), None) {
            Ok(bytes) => {
                if let Err(e) = self.udp.try_send(dest, &bytes) {
                    warn!("failed to send discovery reply to {dest}: {e}");
                }
            }
            Err(e) => warn!("failed to encode discovery reply: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallbacks {
        roster_changed: Mutex<u32>,
        messages: Mutex<Vec<(String, String, String)>>,
    }

    impl EngineCallbacks for RecordingCallbacks {
        fn on_message(&self, sender_username: &str, src_ip: &str, content: &str) {
            self.messages.lock().unwrap().push((
                sender_username.to_string(),
                src_ip.to_string(),
                content.to_string(),
            ));
        }
        fn on_roster_changed(&self) {
            *self.roster_changed.lock().unwrap() += 1;
        }
    }

    async fn engine_on(port: u16, peer_addr: SocketAddr, local_ip: &str, username: &str) -> DiscoveryEngine {
        let udp = UdpEp::bind(port).await.unwrap();
        DiscoveryEngine::new(udp, peer_addr, local_ip.to_string(), username.to_string())
    }

    #[tokio::test]
    async fn discovery_round_trip_between_two_loopback_engines() {
        let a_port = 51100;
        let b_port = 51101;
        let a_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), a_port);
        let b_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), b_port);

        // Distinct "local_ip" strings stand in for distinct hosts, since
        // both engines really bind to 127.0.0.1 in this test.
        let mut a = engine_on(a_port, b_addr, "10.0.0.1", "alice").await;
        let mut b = engine_on(b_port, a_addr, "10.0.0.2", "bob").await;

        let roster_a = Roster::new();
        let roster_b = Roster::new();
        let cb_a = RecordingCallbacks::default();
        let cb_b = RecordingCallbacks::default();

        let t0 = Instant::now();
        // A's first tick sends a beacon (no prior last_beacon_at).
        a.tick(&roster_a, t0, &cb_a);
        b.tick(&roster_b, t0, &cb_b);

        // Give the loopback datagrams a moment to become readable, then
        // drain both sides again to process what arrived.
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.tick(&roster_a, t0, &cb_a);
        b.tick(&roster_b, t0, &cb_b);
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.tick(&roster_a, t0, &cb_a);
        b.tick(&roster_b, t0, &cb_b);

        assert_eq!(roster_b.count_active(), 1);
        assert_eq!(roster_b.get_by_active_index(0).unwrap().username, "alice");

        assert_eq!(roster_a.count_active(), 1);
        assert_eq!(roster_a.get_by_active_index(0).unwrap().username, "bob");
    }

    #[tokio::test]
    async fn self_echoed_datagram_is_ignored() {
        let port = 51102;
        let self_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
        // Beaconing to itself: local_ip is set to the loopback address so
        // the reflected datagram is recognised as a self-echo.
        let mut engine = engine_on(port, self_addr, "127.0.0.1", "alice").await;
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();

        let t0 = Instant::now();
        engine.tick(&roster, t0, &cb);
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.tick(&roster, t0, &cb);

        assert_eq!(roster.count_active(), 0);
    }

    #[tokio::test]
    async fn beacon_is_not_resent_before_the_interval_elapses() {
        let a_port = 51104;
        let b_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 51105);
        let mut engine = engine_on(a_port, b_addr, "10.0.0.1", "alice").await;
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();

        let t0 = Instant::now();
        engine.tick(&roster, t0, &cb);
        let first_beacon_at = engine.last_beacon_at;
        assert!(first_beacon_at.is_some());

        engine.tick(&roster, t0 + Duration::from_secs(1), &cb);
        assert_eq!(engine.last_beacon_at, first_beacon_at);

        engine.tick(&roster, t0 + DISCOVERY_INTERVAL, &cb);
        assert_ne!(engine.last_beacon_at, first_beacon_at);
    }
}
