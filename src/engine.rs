//! Top-level engine API (§6): `engine_init`, `engine_tick`,
//! `engine_send_text`, `engine_broadcast_text`, `engine_shutdown`.
//!
//! This is the module a UI collaborator actually depends on; everything
//! beneath it (`discovery`, `session`, `roster`, `wire`, `transport`,
//! `dispatch`) is private machinery reached only through here.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use log::info;

use crate::config::RuntimeConfig;
use crate::discovery::DiscoveryEngine;
use crate::dispatch::EngineCallbacks;
use crate::error::{EngineError, SendError};
use crate::roster::Roster;
use crate::session::{self, SessionEngine};
use crate::transport::{ListenerEp, UdpEp};

/// A running node: discovery half, session half, and the roster they share.
pub struct Engine {
    discovery: DiscoveryEngine,
    session: SessionEngine,
    roster: Roster,
    tcp_port: u16,
}

impl Engine {
    /// Bind both endpoints, resolve the local address, and initialise the
    /// roster. The broadcast destination is the link-local broadcast
    /// address on `config.discovery_port`, matching a real LAN deployment;
    /// tests that need two engines sharing a single host substitute a
    /// loopback unicast address by constructing [`DiscoveryEngine`]
    /// directly instead of going through `Engine::init`.
    pub async fn init(config: &RuntimeConfig) -> Result<Self, EngineError> {
        let local_ip = match &config.bind_interface {
            Some(ip) => ip.clone(),
            None => crate::transport::resolve_local_ip()
                .await
                .map_err(|_| EngineError::NoLocalAddress)?,
        };

        let udp = UdpEp::bind(config.discovery_port)
            .await
            .map_err(EngineError::DiscoveryBind)?;
        let listener = ListenerEp::bind(config.tcp_port)
            .await
            .map_err(EngineError::ListenerBind)?;

        let broadcast_dest = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::BROADCAST),
            config.discovery_port,
        );

        let roster = Roster::new();
        roster.init();

        let discovery = DiscoveryEngine::new(udp, broadcast_dest, local_ip.clone(), config.username.clone());
        let session = SessionEngine::new(listener, local_ip, config.username.clone());

        info!("engine initialised as {:?} on ports {}/{}", config.username, config.discovery_port, config.tcp_port);

        Ok(Engine {
            discovery,
            session,
            roster,
            tcp_port: config.tcp_port,
        })
    }

    /// Drive both halves of the engine by one non-blocking step, then prune
    /// stale roster entries. Called repeatedly by the pump loop.
    pub fn tick(&mut self, callbacks: &dyn EngineCallbacks) {
        let now = Instant::now();
        self.discovery.tick(&self.roster, now, callbacks);
        self.session.tick(&self.roster, now, callbacks);
        if self.roster.prune(now) > 0 {
            callbacks.on_roster_changed();
        }
    }

    pub fn is_errored(&self) -> bool {
        self.session.is_errored()
    }

    /// Send `text` to exactly one peer, opening a fresh outbound session.
    pub async fn send_text(&self, peer_ip: &str, text: &str) -> Result<(), SendError> {
        if self.roster.active_snapshot().iter().all(|p| p.ip != peer_ip) {
            return Err(SendError::NoSuchPeer(peer_ip.to_string()));
        }
        let dest: SocketAddr = format!("{peer_ip}:{}", self.tcp_port)
            .parse()
            .map_err(|_| SendError::NoSuchPeer(peer_ip.to_string()))?;
        self.session
            .send_text(dest, text)
            .await
            .map_err(SendError::failed)
    }

    /// Send `text` to every active peer, one session each, in roster order.
    pub async fn broadcast_text(&self, text: &str) {
        for peer in self.roster.active_snapshot() {
            let dest: SocketAddr = match format!("{}:{}", peer.ip, self.tcp_port).parse() {
                Ok(addr) => addr,
                Err(_) => continue,
            };
            if let Err(e) = self.session.send_text(dest, text).await {
                log::warn!("broadcast to {} failed: {e}", peer.ip);
            }
        }
    }

    /// Notify every active peer with `QUIT`, then return; the caller drops
    /// the engine (and its bound sockets) immediately after.
    pub async fn shutdown(&self) {
        session::quit_broadcast(&self.session, &self.roster, self.tcp_port).await;
    }
}
