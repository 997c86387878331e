//! TCP session engine (C5): the listener, the single in-flight inbound
//! session, and transient one-send outbound sessions, driven by the state
//! machine of §4.5.
//!
//! Grounded on the teacher's `runtime/lan/peer.rs` connection handling, but
//! collapsed from a long-lived `tokio::select!` task per peer into an
//! explicit state enum advanced from `tick()`, matching the engine-wide
//! poll contract used throughout this crate.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::dispatch::{self, Channel, EngineCallbacks};
use crate::error::TransportError;
use crate::roster::Roster;
use crate::transport::{DataEp, ListenerEp};
use crate::wire::{self, FrameType};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const SEND_TIMEOUT: Duration = Duration::from_secs(3);
pub const COOLDOWN: Duration = Duration::from_millis(750);
/// Delay between peers during the shutdown `QUIT` fan-out (§4.5).
pub const QUIT_FANOUT_DELAY: Duration = Duration::from_secs(2);

/// The engine-wide connection state (§4.5). Unlike a per-connection state
/// machine, there is exactly one of these for the whole process: at most
/// one inbound session is serviced at a time, and outbound sessions are
/// transient, one-send affairs that do not persist between calls.
enum State {
    Idle,
    ConnectedIn(DataEp),
    ClosingGraceful(DataEp),
    PostAbortCooldown(Instant),
    Error,
}

pub struct SessionEngine {
    listener: ListenerEp,
    state: State,
    local_ip: String,
    username: String,
}

impl SessionEngine {
    pub fn new(listener: ListenerEp, local_ip: String, username: String) -> Self {
        SessionEngine {
            listener,
            state: State::Idle,
            local_ip,
            username,
        }
    }

    /// True once an unrecoverable transport error has put the engine into
    /// `Error`; the containing process should shut down (§4.5).
    pub fn is_errored(&self) -> bool {
        matches!(self.state, State::Error)
    }

    /// Advance the state machine by one non-blocking step.
    pub fn tick(&mut self, roster: &Roster, now: Instant, callbacks: &dyn EngineCallbacks) {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => self.state = self.try_accept(now),
            State::ConnectedIn(ep) => self.state = self.drain_connected(ep, roster, now, callbacks),
            State::ClosingGraceful(ep) => self.state = self.drain_closing(ep, now),
            State::PostAbortCooldown(since) => {
                self.state = if now.duration_since(since) >= COOLDOWN {
                    State::Idle
                } else {
                    State::PostAbortCooldown(since)
                };
            }
            State::Error => self.state = State::Error,
        }
    }

    fn try_accept(&self, _now: Instant) -> State {
        match self.listener.try_accept() {
            Ok((ep, addr)) => {
                info!("accepted inbound connection from {addr}");
                State::ConnectedIn(ep)
            }
            Err(TransportError::NoData) => State::Idle,
            Err(e) => {
                warn!("accept failed: {e}");
                State::Idle
            }
        }
    }

    /// Drain discipline (§4.5): read until `NoData`, dispatching every
    /// complete frame found along the way.
    fn drain_connected(
        &self,
        ep: DataEp,
        roster: &Roster,
        now: Instant,
        callbacks: &dyn EngineCallbacks,
    ) -> State {
        let src_ip = ep.peer_ip().unwrap_or_else(|| self.local_ip.clone());
        let mut buf = [0u8; wire::BUFFER_SIZE];
        loop {
            match ep.try_recv(&mut buf) {
                Ok(n) => self.dispatch_inbound(&buf[..n], &src_ip, roster, now, callbacks),
                Err(TransportError::NoData) => return State::ConnectedIn(ep),
                Err(TransportError::PeerClosed) => return State::ClosingGraceful(ep),
                Err(e) => {
                    warn!("inbound session error from {src_ip}: {e}");
                    return self.abort(ep);
                }
            }
        }
    }

    /// Closing discipline (§4.5): one more receive after the peer's FIN,
    /// since data and the FIN may be coalesced, before acknowledging close.
    fn drain_closing(&self, ep: DataEp, now: Instant) -> State {
        let mut probe = [0u8; 1];
        match ep.try_recv(&mut probe) {
            Err(TransportError::NoData) | Err(TransportError::PeerClosed) => {
                info!("inbound session closed cleanly");
                State::PostAbortCooldown(now)
            }
            Ok(_) => {
                // Trailing bytes arrived alongside the FIN; re-probe next
                // tick rather than discard them silently.
                State::ClosingGraceful(ep)
            }
            Err(e) => {
                warn!("error draining closing session: {e}");
                self.abort(ep)
            }
        }
    }

    fn dispatch_inbound(
        &self,
        bytes: &[u8],
        src_ip: &str,
        roster: &Roster,
        now: Instant,
        callbacks: &dyn EngineCallbacks,
    ) {
        let frame = match wire::decode(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("dropping malformed tcp frame from {src_ip}: {e}");
                return;
            }
        };
        dispatch::dispatch(&frame, src_ip, Channel::Tcp, roster, now, callbacks);
    }

    fn abort(&self, ep: DataEp) -> State {
        ep.abort();
        State::PostAbortCooldown(Instant::now())
    }

    /// Send one text frame to `peer_ip` over a fresh outbound connection
    /// and tear it down (one-send sessions, §4.5). Awaited directly by the
    /// caller of `send_text`, never spawned.
    pub async fn send_text(&self, dest: SocketAddr, text: &str) -> Result<(), TransportError> {
        self.send_one(dest, &FrameType::Text, text).await
    }

    pub async fn send_quit(&self, dest: SocketAddr) -> Result<(), TransportError> {
        self.send_one(dest, &FrameType::Quit, "").await
    }

    async fn send_one(
        &self,
        dest: SocketAddr,
        frame_type: &FrameType,
        content: &str,
    ) -> Result<(), TransportError> {
        let bytes = wire::encode(frame_type, Some(&self.username), Some(&self.local_ip), Some(content))
            .map_err(|e| TransportError::Fatal(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;

        let mut ep = DataEp::connect(dest, CONNECT_TIMEOUT).await?;
        let result = ep.send(&bytes, SEND_TIMEOUT).await;
        // Best-effort graceful close regardless of send outcome; the
        // connection is one-shot either way.
        let _ = ep.close_graceful().await;
        result
    }
}

/// Broadcast a shutdown `QUIT` to every active roster peer, in roster
/// order, pausing [`QUIT_FANOUT_DELAY`] between peers. Failures are logged
/// and never abort the fan-out (§4.5).
pub async fn quit_broadcast(session: &SessionEngine, roster: &Roster, tcp_port: u16) {
    for peer in roster.active_snapshot() {
        let dest = match format!("{}:{}", peer.ip, tcp_port).parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(e) => {
                warn!("skipping quit to {}: {e}", peer.ip);
                continue;
            }
        };
        if let Err(e) = session.send_quit(dest).await {
            warn!("failed to notify {} of shutdown: {e}", peer.ip);
        }
        tokio::time::sleep(QUIT_FANOUT_DELAY).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallbacks {
        messages: Mutex<Vec<(String, String, String)>>,
        roster_changed: Mutex<u32>,
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

    #[tokio::test]
    async fn text_delivered_end_to_end_over_loopback() {
        let listener_port = 51200;
        let listener = ListenerEp::bind(listener_port).await.unwrap();
        let mut inbound = SessionEngine::new(listener, "10.0.0.2".to_string(), "bob".to_string());
        let outbound = SessionEngine::new(
            ListenerEp::bind(51201).await.unwrap(),
            "10.0.0.1".to_string(),
            "alice".to_string(),
        );

        let roster = Roster::new();
        let cb = RecordingCallbacks::default();
        let dest = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), listener_port);

        let send_fut = outbound.send_text(dest, "hello bob");
        let (send_result, _) = tokio::join!(send_fut, async {
            // Drive the inbound engine's accept/drain while the send happens.
            for _ in 0..50 {
                inbound.tick(&roster, Instant::now(), &cb);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });
        send_result.unwrap();

        // A few more ticks to process the closing handshake.
        for _ in 0..10 {
            inbound.tick(&roster, Instant::now(), &cb);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let messages = cb.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "alice");
        assert_eq!(messages[0].2, "hello bob");
    }

    #[tokio::test]
    async fn cooldown_returns_to_idle_only_after_elapsed() {
        let listener = ListenerEp::bind(51202).await.unwrap();
        let mut engine = SessionEngine::new(listener, "10.0.0.2".to_string(), "bob".to_string());
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();

        let t0 = Instant::now();
        engine.state = State::PostAbortCooldown(t0);
        engine.tick(&roster, t0 + Duration::from_millis(100), &cb);
        assert!(matches!(engine.state, State::PostAbortCooldown(_)));

        engine.tick(&roster, t0 + COOLDOWN, &cb);
        assert!(matches!(engine.state, State::Idle));
    }
}
