//! Dispatcher (C6): maps a parsed frame's `TYPE` to an effect on the roster
//! and/or a callback invocation.
//!
//! This is the one piece of logic shared verbatim between the UDP path
//! (discovery, §4.4) and the TCP path (session engine, §4.5) — both decode a
//! [`Frame`](crate::wire::Frame) and hand it here along with the
//! transport-level source IP, which is authoritative over whatever IP the
//! frame itself claims (§4.5 "peer IP authority").

use std::time::Instant;

use log::warn;

use crate::roster::Roster;
use crate::wire::{Frame, FrameType};

/// Which transport a frame arrived on. `DISCOVERY`/`DISCOVERY_RESPONSE` are
/// only meaningful on [`Channel::Udp`]; receiving one on
/// [`Channel::Tcp`] is a protocol error (dropped, not fatal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Udp,
    Tcp,
}

/// What the dispatcher actually did, for logging and for tests that want to
/// assert on behaviour without a mock callback object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEffect {
    RosterAdded,
    RosterUpdated,
    TextDelivered,
    PeerMarkedInactive,
    /// Frame was syntactically valid but not acted upon (unknown type, or a
    /// type invalid for the channel it arrived on).
    Dropped(&'static str),
}

/// Callbacks registered once at `engine_init` (§6). Implemented as a trait
/// so tests can inject a recording mock instead of the real UI collaborator.
pub trait EngineCallbacks: Send + Sync {
    fn on_message(&self, sender_username: &str, src_ip: &str, content: &str);
    fn on_roster_changed(&self);
}

/// Route one decoded frame to its effect. `src_ip` is the transport-level
/// source address, never the frame's embedded `sender_ip`.
pub fn dispatch(
    frame: &Frame,
    src_ip: &str,
    channel: Channel,
    roster: &Roster,
    now: Instant,
    callbacks: &dyn EngineCallbacks,
) -> DispatchEffect {
    match (&frame.frame_type, channel) {
        (FrameType::Discovery, Channel::Tcp) | (FrameType::DiscoveryResponse, Channel::Tcp) => {
            warn!("dropping {} frame received over TCP from {src_ip}", frame.frame_type.as_str());
            DispatchEffect::Dropped("discovery frame on tcp channel")
        }

        (FrameType::Discovery, Channel::Udp) | (FrameType::DiscoveryResponse, Channel::Udp) => {
            upsert_and_report(roster, src_ip, &frame.sender_username, now, callbacks)
        }

        (FrameType::Text, _) => {
            // A peer may be created by its first TEXT frame just as readily
            // as by a DISCOVERY one (§3 "created on first inbound …
            // text frame from that IP"), so the roster-changed notification
            // fires uniformly here too, not only on the discovery channel.
            upsert_and_report(roster, src_ip, &frame.sender_username, now, callbacks);
            callbacks.on_message(&frame.sender_username, src_ip, &frame.content);
            DispatchEffect::TextDelivered
        }

        (FrameType::Quit, _) => {
            if roster.mark_inactive(src_ip) {
                callbacks.on_roster_changed();
                DispatchEffect::PeerMarkedInactive
            } else {
                DispatchEffect::Dropped("quit from unknown peer")
            }
        }

        (FrameType::Unknown(t), _) => {
            warn!("dropping frame of unknown type {t:?} from {src_ip}");
            DispatchEffect::Dropped("unknown frame type")
        }
    }
}

/// Upsert the roster entry for `src_ip` and notify `on_roster_changed` on
/// any add or update (§6: "invoked after any add/update/inactive
/// transition"), regardless of which channel or frame type triggered it.
fn upsert_and_report(
    roster: &Roster,
    src_ip: &str,
    sender_username: &str,
    now: Instant,
    callbacks: &dyn EngineCallbacks,
) -> DispatchEffect {
    match roster.add_or_update(src_ip, sender_username, now) {
        Ok(crate::roster::UpsertResult::Added) => {
            callbacks.on_roster_changed();
            DispatchEffect::RosterAdded
        }
        Ok(crate::roster::UpsertResult::Updated) => {
            callbacks.on_roster_changed();
            DispatchEffect::RosterUpdated
        }
        Err(_full) => {
            warn!("roster full; dropping peer update from {src_ip}");
            DispatchEffect::Dropped("roster full")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingCallbacks {
        messages: Mutex<Vec<(String, String, String)>>,
        roster_changed_count: Mutex<u32>,
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
            *self.roster_changed_count.lock().unwrap() += 1;
        }
    }

    #[test]
    fn discovery_over_tcp_is_dropped() {
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();
        let frame = Frame::new(FrameType::Discovery, "alice", "10.0.0.1", "");
        let effect = dispatch(&frame, "10.0.0.1", Channel::Tcp, &roster, Instant::now(), &cb);
        assert_eq!(effect, DispatchEffect::Dropped("discovery frame on tcp channel"));
        assert_eq!(roster.count_active(), 0);
    }

    #[test]
    fn discovery_over_udp_updates_roster_and_notifies() {
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();
        let frame = Frame::new(FrameType::Discovery, "alice", "10.0.0.1", "");
        let effect = dispatch(&frame, "10.0.0.1", Channel::Udp, &roster, Instant::now(), &cb);
        assert_eq!(effect, DispatchEffect::RosterAdded);
        assert_eq!(roster.count_active(), 1);
        assert_eq!(*cb.roster_changed_count.lock().unwrap(), 1);
    }

    #[test]
    fn text_delivers_message_and_notifies_on_first_contact() {
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();
        let frame = Frame::new(FrameType::Text, "alice", "10.0.0.1", "hello");
        let effect = dispatch(&frame, "10.0.0.1", Channel::Tcp, &roster, Instant::now(), &cb);
        assert_eq!(effect, DispatchEffect::TextDelivered);
        assert_eq!(roster.count_active(), 1);
        // A peer whose first frame is TEXT is still a roster addition and
        // must still trigger a refresh (§6).
        assert_eq!(*cb.roster_changed_count.lock().unwrap(), 1);
        let messages = cb.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], ("alice".to_string(), "10.0.0.1".to_string(), "hello".to_string()));
    }

    #[test]
    fn quit_marks_peer_inactive_and_notifies_once() {
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();
        roster.add_or_update("10.0.0.1", "alice", Instant::now()).unwrap();

        let frame = Frame::new(FrameType::Quit, "alice", "10.0.0.1", "");
        let effect = dispatch(&frame, "10.0.0.1", Channel::Tcp, &roster, Instant::now(), &cb);
        assert_eq!(effect, DispatchEffect::PeerMarkedInactive);
        assert_eq!(roster.count_active(), 0);
        assert_eq!(*cb.roster_changed_count.lock().unwrap(), 1);

        // QUIT from a peer not present is a no-op, not a second notification.
        let effect2 = dispatch(&frame, "10.0.0.1", Channel::Tcp, &roster, Instant::now(), &cb);
        assert_eq!(effect2, DispatchEffect::Dropped("quit from unknown peer"));
        assert_eq!(*cb.roster_changed_count.lock().unwrap(), 1);
    }

    #[test]
    fn unknown_type_is_dropped() {
        let roster = Roster::new();
        let cb = RecordingCallbacks::default();
        let frame = Frame::new(FrameType::Unknown("BOGUS".into()), "x", "10.0.0.1", "");
        let effect = dispatch(&frame, "10.0.0.1", Channel::Udp, &roster, Instant::now(), &cb);
        assert_eq!(effect, DispatchEffect::Dropped("unknown frame type"));
    }
}
