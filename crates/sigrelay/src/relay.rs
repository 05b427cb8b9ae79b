//! Registry-Router: registration, admission and addressed forwarding.
//!
//! [`Relay`] is transport-agnostic. A connection task feeds it each inbound
//! message together with that connection's [`Session`]; every reply and every
//! forwarded envelope leaves through a [`ConnHandle`] queue, never through a
//! socket owned here.

use crate::admission::Admission;
use crate::metrics::{counters, gauges};
use crate::registry::Registry;
use crate::session::{ConnHandle, SendError, Session};
use sigrelay_common::Envelope;
use tracing::{debug, info, warn};

/// Result of a registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The identifier is now bound to the session.
    Registered {
        /// Another connection held the identifier and was evicted.
        replaced: bool,
    },
    /// Admission failed; the connection must be terminated.
    Rejected,
}

/// Result of routing one addressed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Queued on the target's connection.
    Delivered,
    /// No open connection under the target identifier; the sender was told.
    TargetUnavailable,
    /// Not delivered and not reported: no usable `to`, or the envelope could
    /// not be encoded.
    Dropped,
}

/// What the connection task should do after a message has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep reading.
    Continue,
    /// Flush queued replies and close the connection.
    Terminate,
}

/// Identifier-addressed message router with token admission.
#[derive(Debug)]
pub struct Relay {
    registry: Registry,
    admission: Admission,
}

impl Relay {
    /// Create a relay with an empty registry.
    #[must_use]
    pub fn new(admission: Admission) -> Self {
        Self {
            registry: Registry::new(),
            admission,
        }
    }

    /// The identifier → connection table.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Start a session for a freshly accepted connection.
    #[must_use]
    pub fn open_session(&self, handle: ConnHandle) -> Session {
        debug!(conn = %handle.id(), "session opened");
        Session::new(handle)
    }

    /// Process one inbound WebSocket message.
    ///
    /// Undecodable input is dropped without a reply. A `register` is handled
    /// first; an envelope with a non-empty `to` is then routed, including a
    /// `register` that also carries `to`.
    pub fn handle_message(&self, session: &mut Session, data: &[u8]) -> Disposition {
        let envelope = match Envelope::decode(data) {
            Ok(envelope) => envelope,
            Err(e) => {
                counters::messages_dropped_total("malformed");
                debug!(conn = %session.handle().id(), "dropping message: {}", e);
                return Disposition::Continue;
            }
        };

        if let Some(client_id) = envelope.register_id() {
            let outcome = self.register(session, client_id, envelope.token());
            if outcome == RegisterOutcome::Rejected {
                return Disposition::Terminate;
            }
        }

        if envelope.target().is_some() {
            self.route(session, envelope);
        }

        Disposition::Continue
    }

    /// Admit and bind `client_id` to `session`.
    ///
    /// On success the registry entry is inserted or overwritten and a
    /// `registered` confirmation is queued for the session. On rejection an
    /// `invalid-token` error is queued; the caller closes the connection.
    pub fn register(
        &self,
        session: &mut Session,
        client_id: &str,
        token: Option<&str>,
    ) -> RegisterOutcome {
        let conn = session.handle().id();

        if let Err(e) = self.admission.check(token) {
            counters::registrations_total("rejected");
            warn!(client_id, %conn, "registration rejected: {}", e);
            reply(session, &Envelope::invalid_token());
            return RegisterOutcome::Rejected;
        }

        if let Some(previous) = session.bind(client_id.to_string()) {
            if previous != client_id && self.registry.remove_if(&previous, conn) {
                debug!(%conn, previous = %previous, client_id, "session rebound");
            }
        }

        let replaced = self
            .registry
            .insert(client_id.to_string(), session.handle().clone())
            .is_some_and(|old| old.id() != conn);
        if replaced {
            debug!(client_id, "previous connection evicted from registry");
        }

        counters::registrations_total("registered");
        gauges::set_clients_registered(self.registry.len());
        info!(
            client_id,
            %conn,
            total = self.registry.len(),
            "client registered"
        );

        reply(session, &Envelope::registered(client_id));
        RegisterOutcome::Registered { replaced }
    }

    /// Forward `envelope` to the connection registered under its `to`.
    ///
    /// `from` is filled with the sender's bound identifier when the envelope
    /// leaves it empty; a declared `from` is forwarded as-is and every other
    /// field is left alone. A missing, closed or saturated target gets the
    /// sender a `target-unavailable` error; only a closed one is evicted.
    pub fn route(&self, session: &Session, envelope: Envelope) -> RouteOutcome {
        let Some(to) = envelope.target().map(str::to_string) else {
            return RouteOutcome::Dropped;
        };

        let target = match self.registry.get(&to) {
            Some(target) if target.is_open() => target,
            Some(stale) => {
                self.registry.remove_if(&to, stale.id());
                gauges::set_clients_registered(self.registry.len());
                return self.target_unavailable(session, &to, "closed");
            }
            None => return self.target_unavailable(session, &to, "unavailable"),
        };

        let outbound = envelope.with_sender(session.client_id());
        match target.send_envelope(&outbound) {
            Ok(()) => {
                counters::messages_routed_total();
                debug!(
                    from = outbound.from().unwrap_or("-"),
                    to = %to,
                    "message forwarded"
                );
                RouteOutcome::Delivered
            }
            Err(SendError::Closed) => {
                self.registry.remove_if(&to, target.id());
                gauges::set_clients_registered(self.registry.len());
                self.target_unavailable(session, &to, "closed")
            }
            Err(SendError::Full) => self.target_unavailable(session, &to, "backpressure"),
            Err(SendError::Encode) => {
                counters::messages_dropped_total("encode");
                RouteOutcome::Dropped
            }
        }
    }

    /// Release the session's registry entry if it still belongs to it.
    ///
    /// A later registration of the same identifier by another connection is
    /// left in place. Closing an unregistered session touches nothing.
    pub fn close_session(&self, session: Session) {
        let conn = session.handle().id();
        let Some(client_id) = session.client_id() else {
            debug!(%conn, "unregistered session closed");
            return;
        };

        if self.registry.remove_if(client_id, conn) {
            gauges::set_clients_registered(self.registry.len());
            info!(client_id, %conn, "client disconnected");
        } else {
            debug!(client_id, %conn, "client disconnected after being replaced");
        }
    }

    fn target_unavailable(&self, session: &Session, to: &str, cause: &'static str) -> RouteOutcome {
        counters::messages_dropped_total(cause);
        debug!(
            from = session.client_id().unwrap_or("-"),
            to,
            cause,
            available = ?self.registry.client_ids(),
            "target unavailable"
        );
        reply(session, &Envelope::target_unavailable(to));
        RouteOutcome::TargetUnavailable
    }
}

/// Queue `envelope` for the session's own connection. Failures are logged
/// only; the close path cleans up after a dead connection.
fn reply(session: &Session, envelope: &Envelope) {
    if let Err(e) = session.handle().send_envelope(envelope) {
        debug!(conn = %session.handle().id(), "reply not queued: {:?}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionMode;
    use serde_json::{json, Map, Value};
    use sigrelay_common::types::reason;
    use tokio::sync::mpsc;

    struct Peer {
        session: Session,
        rx: mpsc::Receiver<String>,
    }

    impl Peer {
        fn connect(relay: &Relay) -> Self {
            let (handle, rx) = ConnHandle::channel();
            Self {
                session: relay.open_session(handle),
                rx,
            }
        }

        fn recv(&mut self) -> Option<Value> {
            self.rx
                .try_recv()
                .ok()
                .map(|text| serde_json::from_str(&text).unwrap())
        }

        fn send(&mut self, relay: &Relay, value: &Value) -> Disposition {
            relay.handle_message(&mut self.session, value.to_string().as_bytes())
        }
    }

    fn secure_relay(token: &str) -> Relay {
        Relay::new(Admission::new(
            AdmissionMode::Secure,
            Some(token.to_string()),
        ))
    }

    fn registered(relay: &Relay, id: &str) -> Peer {
        let mut peer = Peer::connect(relay);
        let outcome = relay.register(&mut peer.session, id, None);
        assert!(matches!(outcome, RegisterOutcome::Registered { .. }));
        assert_eq!(
            peer.recv(),
            Some(json!({"type": "registered", "clientId": id}))
        );
        peer
    }

    #[test]
    fn register_confirms_and_binds() {
        let relay = Relay::new(Admission::open());
        let mut peer = Peer::connect(&relay);

        let disposition = peer.send(&relay, &json!({"type": "register", "clientId": "alice"}));

        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(
            peer.recv(),
            Some(json!({"type": "registered", "clientId": "alice"}))
        );
        assert_eq!(peer.session.client_id(), Some("alice"));
        assert_eq!(
            relay.registry().get("alice").unwrap().id(),
            peer.session.handle().id()
        );
    }

    #[test]
    fn second_registration_overwrites_first() {
        let relay = Relay::new(Admission::open());
        let first = registered(&relay, "alice");
        let mut second = Peer::connect(&relay);

        let outcome = relay.register(&mut second.session, "alice", None);

        assert_eq!(outcome, RegisterOutcome::Registered { replaced: true });
        assert_eq!(relay.registry().len(), 1);
        assert_eq!(
            relay.registry().get("alice").unwrap().id(),
            second.session.handle().id()
        );
        assert!(first.session.handle().is_open());
    }

    #[test]
    fn secure_mode_rejects_wrong_token() {
        let relay = secure_relay("T");
        let mut peer = Peer::connect(&relay);

        let disposition = peer.send(
            &relay,
            &json!({"type": "register", "clientId": "alice", "token": "nope"}),
        );

        assert_eq!(disposition, Disposition::Terminate);
        assert_eq!(
            peer.recv(),
            Some(json!({"type": "error", "reason": reason::INVALID_TOKEN}))
        );
        assert!(relay.registry().is_empty());
        assert_eq!(peer.session.client_id(), None);
    }

    #[test]
    fn secure_mode_rejects_missing_token() {
        let relay = secure_relay("T");
        let mut peer = Peer::connect(&relay);
        let disposition = peer.send(&relay, &json!({"type": "register", "clientId": "alice"}));
        assert_eq!(disposition, Disposition::Terminate);
        assert!(relay.registry().is_empty());
    }

    #[test]
    fn secure_mode_accepts_matching_token() {
        let relay = secure_relay("T");
        let mut peer = Peer::connect(&relay);

        let disposition = peer.send(
            &relay,
            &json!({"type": "register", "clientId": "alice", "token": "T"}),
        );

        assert_eq!(disposition, Disposition::Continue);
        assert_eq!(
            peer.recv(),
            Some(json!({"type": "registered", "clientId": "alice"}))
        );
    }

    #[test]
    fn rejected_register_is_not_routed() {
        let relay = secure_relay("T");
        let mut bob = Peer::connect(&relay);
        assert!(matches!(
            relay.register(&mut bob.session, "bob", Some("T")),
            RegisterOutcome::Registered { .. }
        ));
        let _ = bob.recv();

        let mut mallory = Peer::connect(&relay);
        let disposition = mallory.send(
            &relay,
            &json!({"type": "register", "clientId": "m", "token": "x", "to": "bob"}),
        );

        assert_eq!(disposition, Disposition::Terminate);
        assert_eq!(bob.recv(), None);
    }

    #[test]
    fn route_delivers_payload_verbatim() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let mut bob = registered(&relay, "bob");

        let offer = json!({
            "type": "offer",
            "to": "bob",
            "from": "alice",
            "sdp": {"type": "offer", "sdp": "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\n"},
        });
        alice.send(&relay, &offer);

        assert_eq!(bob.recv(), Some(offer));
        assert_eq!(alice.recv(), None);
    }

    #[test]
    fn route_fills_missing_from() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let mut bob = registered(&relay, "bob");

        let mut rest = Map::new();
        rest.insert("candidate".to_string(), json!("candidate:0 1 UDP 1 10.0.0.1 9 typ host"));
        let outcome = relay.route(&alice.session, Envelope::routed("candidate", "bob", rest));

        assert_eq!(outcome, RouteOutcome::Delivered);
        let delivered = bob.recv().unwrap();
        assert_eq!(delivered["from"], "alice");
        assert_eq!(delivered["candidate"], "candidate:0 1 UDP 1 10.0.0.1 9 typ host");
        assert_eq!(alice.recv(), None);
    }

    #[test]
    fn route_trusts_declared_from() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let mut bob = registered(&relay, "bob");

        alice.send(&relay, &json!({"type": "answer", "to": "bob", "from": "carol"}));

        assert_eq!(bob.recv().unwrap()["from"], "carol");
    }

    #[test]
    fn unregistered_sender_can_route_without_from() {
        let relay = Relay::new(Admission::open());
        let mut anon = Peer::connect(&relay);
        let mut bob = registered(&relay, "bob");

        anon.send(&relay, &json!({"type": "ping", "to": "bob"}));

        assert_eq!(bob.recv(), Some(json!({"type": "ping", "to": "bob"})));
    }

    #[test]
    fn route_to_unknown_target_reports_unavailable() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");

        let outcome = relay.route(
            &alice.session,
            Envelope::routed("offer", "ghost", Map::new()),
        );

        assert_eq!(outcome, RouteOutcome::TargetUnavailable);
        assert_eq!(
            alice.recv(),
            Some(json!({"type": "error", "reason": "target-unavailable", "to": "ghost"}))
        );
    }

    #[test]
    fn route_to_closed_target_reports_unavailable_and_evicts() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let bob = registered(&relay, "bob");
        drop(bob.rx);

        let outcome = relay.route(&alice.session, Envelope::routed("offer", "bob", Map::new()));

        assert_eq!(outcome, RouteOutcome::TargetUnavailable);
        assert_eq!(alice.recv().unwrap()["reason"], "target-unavailable");
        assert!(relay.registry().get("bob").is_none());
    }

    #[test]
    fn route_to_saturated_target_reports_unavailable() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let bob = registered(&relay, "bob");
        for _ in 0..crate::session::OUTBOUND_QUEUE_DEPTH {
            bob.session.handle().send("{}".to_string()).unwrap();
        }

        let outcome = relay.route(&alice.session, Envelope::routed("offer", "bob", Map::new()));

        assert_eq!(outcome, RouteOutcome::TargetUnavailable);
        assert_eq!(
            alice.recv(),
            Some(json!({"type": "error", "reason": "target-unavailable", "to": "bob"}))
        );
        // still registered; the queue may drain
        assert!(relay.registry().get("bob").is_some());
    }

    #[test]
    fn malformed_input_is_dropped_silently() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");

        for raw in [&b"{not json"[..], b"[1,2,3]", b"17", b"null", br#"{"to": 5}"#] {
            assert_eq!(
                relay.handle_message(&mut alice.session, raw),
                Disposition::Continue
            );
        }
        assert_eq!(alice.recv(), None);
    }

    #[test]
    fn message_without_to_goes_nowhere() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let mut bob = registered(&relay, "bob");

        alice.send(&relay, &json!({"type": "offer", "sdp": "v=0"}));

        assert_eq!(alice.recv(), None);
        assert_eq!(bob.recv(), None);
    }

    #[test]
    fn register_carrying_to_is_registered_then_routed() {
        let relay = Relay::new(Admission::open());
        let mut bob = registered(&relay, "bob");
        let mut alice = Peer::connect(&relay);

        alice.send(
            &relay,
            &json!({"type": "register", "clientId": "alice", "to": "bob"}),
        );

        assert_eq!(
            alice.recv(),
            Some(json!({"type": "registered", "clientId": "alice"}))
        );
        let delivered = bob.recv().unwrap();
        assert_eq!(delivered["type"], "register");
        assert_eq!(delivered["from"], "alice");
    }

    #[test]
    fn close_removes_own_entry() {
        let relay = Relay::new(Admission::open());
        let alice = registered(&relay, "alice");

        relay.close_session(alice.session);

        assert!(relay.registry().is_empty());
    }

    #[test]
    fn delayed_close_does_not_evict_newer_registration() {
        let relay = Relay::new(Admission::open());
        let c1 = registered(&relay, "alice");
        let c2 = registered(&relay, "alice");
        let c2_id = c2.session.handle().id();

        relay.close_session(c1.session);

        assert_eq!(relay.registry().get("alice").unwrap().id(), c2_id);
    }

    #[test]
    fn closing_unregistered_session_is_noop() {
        let relay = Relay::new(Admission::open());
        let _alice = registered(&relay, "alice");
        let anon = Peer::connect(&relay);

        relay.close_session(anon.session);

        assert_eq!(relay.registry().len(), 1);
    }

    #[test]
    fn rebinding_releases_previous_identifier() {
        let relay = Relay::new(Admission::open());
        let mut peer = registered(&relay, "alice");

        relay.register(&mut peer.session, "alice2", None);

        assert!(relay.registry().get("alice").is_none());
        assert!(relay.registry().get("alice2").is_some());
        assert_eq!(peer.session.client_id(), Some("alice2"));
    }

    #[test]
    fn reregistering_same_identifier_is_not_a_replacement() {
        let relay = Relay::new(Admission::open());
        let mut peer = registered(&relay, "alice");

        let outcome = relay.register(&mut peer.session, "alice", None);

        assert_eq!(outcome, RegisterOutcome::Registered { replaced: false });
        assert_eq!(relay.registry().len(), 1);
    }

    #[test]
    fn stale_entry_after_close_reports_unavailable() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let mut bob = registered(&relay, "bob");

        alice.send(&relay, &json!({"type": "offer", "to": "bob"}));
        assert!(bob.recv().is_some());

        relay.close_session(bob.session);
        drop(bob.rx);

        alice.send(&relay, &json!({"type": "offer", "to": "bob"}));
        assert_eq!(alice.recv().unwrap()["reason"], "target-unavailable");
    }

    #[test]
    fn well_known_names_with_other_types_are_routed_verbatim() {
        let relay = Relay::new(Admission::open());
        let mut alice = registered(&relay, "alice");
        let mut bob = registered(&relay, "bob");

        for payload in [
            json!({"type": "bye", "to": "bob", "reason": {"code": 486}}),
            json!({"to": "bob", "token": 12345}),
            json!({"type": 7, "to": "bob"}),
            json!({"type": "offer", "to": "bob", "token": null, "clientId": null}),
        ] {
            let disposition = alice.send(&relay, &payload);

            assert_eq!(disposition, Disposition::Continue);
            let mut expected = payload.clone();
            expected["from"] = json!("alice");
            assert_eq!(bob.recv(), Some(expected));
            assert_eq!(alice.recv(), None);
        }
    }

    #[test]
    fn register_with_non_string_client_id_is_only_routed() {
        let relay = Relay::new(Admission::open());
        let mut alice = Peer::connect(&relay);
        let mut bob = registered(&relay, "bob");

        alice.send(&relay, &json!({"type": "register", "clientId": 5, "to": "bob"}));

        assert_eq!(alice.recv(), None);
        assert_eq!(alice.session.client_id(), None);
        assert_eq!(
            bob.recv(),
            Some(json!({"type": "register", "clientId": 5, "to": "bob"}))
        );
    }
}
