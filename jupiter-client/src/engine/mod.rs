//! Connection supervisor for the chat session.
//!
//! [`Engine`] owns the connection/session state machines and never touches a
//! socket itself. Inputs arrive as method calls (user requests, socket
//! events, timer firings); outputs are [`EngineEvent`]s published to the
//! registered subscribers plus a queue of [`Action`]s that the runtime
//! carries out in order.

mod dispatch;

use crate::config::ConnectionSettings;
use crate::events::{EngineEvent, Subscribers};
use crate::heartbeat::{HeartbeatMonitor, TickOutcome};
use crate::reconnect::{ReconnectDecision, ReconnectPolicy};
use crate::session::{SessionAuthenticator, SessionState};
use crate::transport::TransportError;
use bytes::BytesMut;
use jupiter_proto::{BraceFrameCodec, Message};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::codec::Decoder;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Side effects requested from the runtime
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connect { addr: String, timeout: Duration },
    Send(Message),
    /// Drop the socket, or abandon an in-flight connect
    Close,
    StartHeartbeat(Duration),
    StopHeartbeat,
    ArmReconnect(Duration),
    CancelReconnect,
}

pub struct Engine {
    settings: ConnectionSettings,
    state: ConnectionState,
    session: SessionAuthenticator,
    heartbeat: HeartbeatMonitor,
    reconnect: ReconnectPolicy,
    codec: BraceFrameCodec,
    inbound: BytesMut,
    subscribers: Subscribers,
    last_status: Option<String>,
    actions: Vec<Action>,
    shut_down: bool,
}

impl Engine {
    pub fn new(settings: ConnectionSettings) -> Self {
        let heartbeat = HeartbeatMonitor::new(settings.connection_timeout(), Instant::now());
        let reconnect =
            ReconnectPolicy::new(settings.max_reconnect_attempts, settings.reconnect_delay());
        let codec = BraceFrameCodec::new(settings.max_buffer_bytes);

        Self {
            settings,
            state: ConnectionState::Disconnected,
            session: SessionAuthenticator::new(),
            heartbeat,
            reconnect,
            codec,
            inbound: BytesMut::new(),
            subscribers: Subscribers::new(),
            last_status: None,
            actions: Vec::new(),
            shut_down: false,
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    pub fn subscribers_mut(&mut self) -> &mut Subscribers {
        &mut self.subscribers
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn username(&self) -> Option<&str> {
        self.session.username()
    }

    pub fn heartbeat(&self) -> &HeartbeatMonitor {
        &self.heartbeat
    }

    pub fn reconnect_policy(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    pub fn last_status(&self) -> Option<&str> {
        self.last_status.as_deref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Drains the actions queued since the last call
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }

    pub fn connect(&mut self) {
        if self.shut_down {
            return;
        }

        if self.state != ConnectionState::Disconnected {
            debug!("Connect requested while {:?}", self.state);
            return;
        }

        if self.reconnect.is_reconnecting() {
            self.reconnect.cancel();
            self.actions.push(Action::CancelReconnect);
        }

        let addr = self.settings.addr();
        info!("Connecting to {}", addr);

        self.state = ConnectionState::Connecting;
        self.set_status(format!("Connecting to {}...", addr));
        self.actions.push(Action::Connect {
            addr,
            timeout: self.settings.connection_timeout(),
        });
    }

    /// Graceful close; also cancels any pending reconnect
    pub fn disconnect(&mut self) {
        if self.reconnect.is_reconnecting() {
            self.reconnect.cancel();
            self.actions.push(Action::CancelReconnect);
        }

        if self.state == ConnectionState::Disconnected {
            return;
        }

        info!("Disconnecting from server");
        let was_connected = self.state == ConnectionState::Connected;
        self.teardown();
        self.set_status("Disconnected from server");

        if was_connected {
            self.emit(EngineEvent::Disconnected);
        }
    }

    /// Logs in now if connected, otherwise connects first and logs in on arrival
    pub fn login(&mut self, username: &str, password: &str) {
        if self.shut_down {
            return;
        }

        if self.state == ConnectionState::Connected {
            let request = self.session.begin_login(username, password);
            self.send(request);
            self.set_status("Logging in...");
        } else {
            self.session.defer_login(username, password);
            self.set_status("Logging in...");
            self.connect();
        }
    }

    pub fn register(&mut self, username: &str, password: &str, email: &str) {
        info!("Registering user {}", username);
        if self.send(Message::register(username, password, email)) {
            self.set_status("Registering...");
        }
    }

    pub fn logout(&mut self) {
        if let Some(request) = self.session.logout() {
            self.send(request);
        }
    }

    /// Queues a message for the socket; returns false when not connected
    pub fn send(&mut self, message: Message) -> bool {
        if self.state != ConnectionState::Connected {
            warn!("Attempting to send {} while not connected", message.msg_type);
            self.set_status("Not connected to server");
            return false;
        }

        debug!("Sending message: {}", message.msg_type);
        self.actions.push(Action::Send(message));
        true
    }

    /// Stops timers, then releases the socket. Later inputs are ignored.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }

        info!("Shutting down session engine");
        self.shut_down = true;
        self.reconnect.cancel();

        self.actions.push(Action::StopHeartbeat);
        self.actions.push(Action::CancelReconnect);
        if self.state != ConnectionState::Disconnected {
            self.actions.push(Action::Close);
        }

        self.state = ConnectionState::Disconnected;
        self.inbound.clear();
        self.session.on_disconnected();
    }

    pub fn on_connected(&mut self, now: Instant) {
        if self.shut_down || self.state != ConnectionState::Connecting {
            debug!("Ignoring stale connect completion while {:?}", self.state);
            return;
        }

        info!("Connected to {}", self.settings.addr());
        self.state = ConnectionState::Connected;
        self.reconnect.on_connected();
        self.heartbeat.reset(now);
        self.inbound.clear();

        self.set_status("Connected to server");
        self.emit(EngineEvent::Connected);
        self.actions
            .push(Action::StartHeartbeat(self.settings.ping_interval()));

        if let Some(request) = self.session.on_reconnected() {
            self.send(request);
            self.set_status("Logging in...");
        }
    }

    /// Appends socket bytes and dispatches every complete frame, in order
    pub fn on_bytes(&mut self, data: &[u8], now: Instant) {
        if self.shut_down || self.state != ConnectionState::Connected {
            debug!("Ignoring {} bytes while {:?}", data.len(), self.state);
            return;
        }

        self.inbound.extend_from_slice(data);

        loop {
            match self.codec.decode(&mut self.inbound) {
                Ok(Some(message)) => self.dispatch(message, now),
                Ok(None) => break,
                Err(e) => {
                    warn!("Framing error: {}", e);
                    break;
                }
            }
        }
    }

    pub fn on_transport_error(&mut self, err: TransportError) {
        if self.shut_down || self.state == ConnectionState::Disconnected {
            debug!("Ignoring transport error while disconnected: {}", err);
            return;
        }

        error!("Socket error: {}", err);
        let was_connected = self.state == ConnectionState::Connected;
        self.teardown();

        self.set_status(err.status_message());
        self.emit(EngineEvent::Error(err.to_string()));
        if was_connected {
            self.emit(EngineEvent::Disconnected);
        }

        self.schedule_reconnect();
    }

    pub fn on_tick(&mut self, now: Instant) {
        if self.shut_down || self.state != ConnectionState::Connected {
            return;
        }

        match self.heartbeat.on_tick(now, self.session.is_authenticated()) {
            TickOutcome::Idle => {}
            TickOutcome::SendPing => {
                self.send(Message::ping());
            }
            TickOutcome::TimedOut => self.on_heartbeat_timeout(),
        }
    }

    pub fn on_reconnect_timer(&mut self) {
        if self.shut_down || !self.reconnect.is_reconnecting() {
            debug!("Ignoring cancelled reconnect timer");
            return;
        }

        self.reconnect.fire();
        self.connect();
    }

    /// Arms at most one delayed reconnect, or reports exhaustion
    pub fn schedule_reconnect(&mut self) {
        if self.shut_down {
            return;
        }

        match self.reconnect.schedule() {
            ReconnectDecision::AlreadyPending => debug!("Reconnect already pending"),
            ReconnectDecision::Retry { attempt, delay } => {
                self.set_status(format!(
                    "Reconnecting in {}s (attempt {}/{})...",
                    delay.as_secs(),
                    attempt,
                    self.reconnect.max_attempts()
                ));
                self.actions.push(Action::ArmReconnect(delay));
            }
            ReconnectDecision::Exhausted => {
                self.set_status("Reconnection failed");
                self.emit(EngineEvent::Error(
                    "Failed to reconnect after multiple attempts".to_string(),
                ));
            }
        }
    }

    fn on_heartbeat_timeout(&mut self) {
        warn!("Connection timeout - disconnecting");
        self.emit(EngineEvent::ConnectionTimedOut);
        self.teardown();
        self.set_status("Connection timed out");
        self.emit(EngineEvent::Disconnected);
        self.schedule_reconnect();
    }

    fn teardown(&mut self) {
        self.actions.push(Action::StopHeartbeat);
        self.actions.push(Action::Close);
        self.state = ConnectionState::Disconnected;
        self.inbound.clear();
        self.session.on_disconnected();
    }

    /// Publishes a status line unless it repeats the previous one
    fn set_status(&mut self, status: impl Into<String>) {
        let status = status.into();
        if self.last_status.as_deref() == Some(status.as_str()) {
            return;
        }

        info!("Status update: {}", status);
        self.last_status = Some(status.clone());
        self.emit(EngineEvent::ConnectionStatusChanged(status));
    }

    fn emit(&mut self, event: EngineEvent) {
        self.subscribers.emit(&event);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jupiter_proto::message_type;
    use std::sync::{Arc, Mutex};

    pub(crate) fn test_settings() -> ConnectionSettings {
        ConnectionSettings {
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 5000,
            ping_interval_ms: 1000,
            connection_timeout_ms: 5000,
            ..ConnectionSettings::default()
        }
    }

    pub(crate) struct Harness {
        pub engine: Engine,
        events: Arc<Mutex<Vec<EngineEvent>>>,
        pub start: Instant,
    }

    impl Harness {
        pub fn new(settings: ConnectionSettings) -> Self {
            let mut engine = Engine::new(settings);
            let events = Arc::new(Mutex::new(Vec::new()));

            let sink = events.clone();
            engine
                .subscribers_mut()
                .on_event(move |event| sink.lock().unwrap().push(event.clone()));

            Self {
                engine,
                events,
                start: Instant::now(),
            }
        }

        pub fn connected() -> Self {
            let mut harness = Self::new(test_settings());
            harness.engine.connect();
            harness.engine.on_connected(harness.start);
            harness.engine.take_actions();
            harness.take_events();
            harness
        }

        pub fn authenticated() -> Self {
            let mut harness = Self::connected();
            harness.engine.login("alice", "pw");
            harness.feed(
                r#"{"type":"login_response","status":"success","username":"alice"}"#,
                harness.start,
            );
            harness.engine.take_actions();
            harness.take_events();
            harness
        }

        pub fn feed(&mut self, wire: &str, now: Instant) {
            self.engine.on_bytes(wire.as_bytes(), now);
        }

        pub fn take_events(&mut self) -> Vec<EngineEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }

        pub fn at(&self, millis: u64) -> Instant {
            self.start + Duration::from_millis(millis)
        }
    }

    pub(crate) fn sent(actions: &[Action]) -> Vec<Message> {
        actions
            .iter()
            .filter_map(|action| match action {
                Action::Send(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(actions: &[Action], wanted: fn(&Action) -> bool) -> usize {
        actions.iter().filter(|a| wanted(a)).count()
    }

    #[test]
    fn test_connect_is_noop_while_connecting() {
        let mut harness = Harness::new(test_settings());

        harness.engine.connect();
        harness.engine.connect();

        let actions = harness.engine.take_actions();
        assert_eq!(count(&actions, |a| matches!(a, Action::Connect { .. })), 1);
        assert_eq!(harness.engine.connection_state(), ConnectionState::Connecting);
        assert_eq!(harness.engine.last_status(), Some("Connecting to 127.0.0.1:1234..."));
    }

    #[test]
    fn test_connected_starts_heartbeat() {
        let mut harness = Harness::new(test_settings());
        harness.engine.connect();
        harness.engine.take_actions();

        harness.engine.on_connected(harness.start);

        assert_eq!(
            harness.engine.take_actions(),
            vec![Action::StartHeartbeat(Duration::from_millis(1000))]
        );
        let events = harness.take_events();
        assert!(events.contains(&EngineEvent::Connected));
        assert!(events.contains(&EngineEvent::ConnectionStatusChanged(
            "Connected to server".to_string()
        )));
    }

    #[test]
    fn test_login_while_disconnected_defers_until_connected() {
        let mut harness = Harness::new(test_settings());

        harness.engine.login("alice", "pw");
        let actions = harness.engine.take_actions();
        assert!(sent(&actions).is_empty());
        assert_eq!(count(&actions, |a| matches!(a, Action::Connect { .. })), 1);

        harness.engine.on_connected(harness.start);
        let logins = sent(&harness.engine.take_actions());
        assert_eq!(logins.len(), 1);
        assert_eq!(logins[0].text("username"), Some("alice"));
        assert_eq!(harness.engine.session_state(), SessionState::Authenticating);
    }

    #[test]
    fn test_auto_relogin_after_reconnect() {
        let mut harness = Harness::authenticated();

        harness.engine.on_transport_error(TransportError::RemoteClosed);
        let actions = harness.engine.take_actions();
        assert_eq!(
            count(&actions, |a| matches!(a, Action::ArmReconnect(_))),
            1
        );
        assert_eq!(harness.engine.session_state(), SessionState::Initial);

        harness.engine.on_reconnect_timer();
        assert_eq!(
            count(&harness.engine.take_actions(), |a| matches!(a, Action::Connect { .. })),
            1
        );

        harness.engine.on_connected(harness.at(5000));
        let messages = sent(&harness.engine.take_actions());
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is(message_type::LOGIN));
        assert_eq!(messages[0].text("password"), Some("pw"));
        assert_eq!(harness.engine.reconnect_policy().attempt_count(), 0);
    }

    #[test]
    fn test_remote_close_emits_disconnected() {
        let mut harness = Harness::connected();

        harness.engine.on_transport_error(TransportError::RemoteClosed);

        let events = harness.take_events();
        assert!(events.contains(&EngineEvent::Disconnected));
        assert!(events.contains(&EngineEvent::Error(
            "remote host closed the connection".to_string()
        )));
        assert_eq!(harness.engine.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_heartbeat_timeout_disconnects_and_schedules_one_reconnect() {
        let mut harness = Harness::authenticated();

        harness.engine.on_tick(harness.at(6000));
        harness.engine.on_tick(harness.at(7000));
        let pings = sent(&harness.engine.take_actions());
        assert_eq!(pings.len(), 2);
        assert!(pings.iter().all(|m| m.is(message_type::PING)));
        assert_eq!(harness.engine.connection_state(), ConnectionState::Connected);

        harness.engine.on_tick(harness.at(8000));
        harness.engine.on_tick(harness.at(9000));

        let actions = harness.engine.take_actions();
        assert_eq!(count(&actions, |a| matches!(a, Action::Close)), 1);
        assert_eq!(count(&actions, |a| matches!(a, Action::ArmReconnect(_))), 1);
        assert!(sent(&actions).is_empty());
        assert_eq!(harness.engine.connection_state(), ConnectionState::Disconnected);

        let events = harness.take_events();
        assert!(events.contains(&EngineEvent::ConnectionTimedOut));
        assert!(events.contains(&EngineEvent::Disconnected));
    }

    #[test]
    fn test_no_pings_before_login() {
        let mut harness = Harness::connected();

        for second in 1..=20 {
            harness.engine.on_tick(harness.at(second * 1000));
        }

        assert!(harness.engine.take_actions().is_empty());
        assert_eq!(harness.engine.connection_state(), ConnectionState::Connected);
    }

    #[test]
    fn test_schedule_reconnect_twice_arms_once() {
        let mut harness = Harness::new(test_settings());

        harness.engine.schedule_reconnect();
        harness.engine.schedule_reconnect();

        let actions = harness.engine.take_actions();
        assert_eq!(
            actions,
            vec![Action::ArmReconnect(Duration::from_millis(5000))]
        );
        assert!(harness.engine.reconnect_policy().is_reconnecting());
    }

    #[test]
    fn test_reconnect_exhaustion_fires_once() {
        let mut harness = Harness::new(test_settings());
        harness.engine.connect();

        for _ in 0..3 {
            harness.engine.on_transport_error(TransportError::ConnectionRefused);
            harness.engine.on_reconnect_timer();
        }
        harness.engine.on_transport_error(TransportError::ConnectionRefused);

        let fatal = harness
            .take_events()
            .into_iter()
            .filter(|e| {
                *e == EngineEvent::Error("Failed to reconnect after multiple attempts".to_string())
            })
            .count();
        assert_eq!(fatal, 1);
        assert_eq!(harness.engine.reconnect_policy().attempt_count(), 0);
        assert!(!harness.engine.reconnect_policy().is_reconnecting());
        assert_eq!(harness.engine.last_status(), Some("Reconnection failed"));

        // No further retry is armed on its own
        harness.engine.take_actions();
        harness.engine.on_reconnect_timer();
        assert!(harness.engine.take_actions().is_empty());
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let mut harness = Harness::connected();
        harness.engine.on_transport_error(TransportError::RemoteClosed);
        harness.engine.take_actions();

        harness.engine.disconnect();
        assert_eq!(harness.engine.take_actions(), vec![Action::CancelReconnect]);

        harness.engine.on_reconnect_timer();
        assert!(harness.engine.take_actions().is_empty());
        assert_eq!(harness.engine.connection_state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_graceful_disconnect_does_not_reconnect() {
        let mut harness = Harness::connected();

        harness.engine.disconnect();

        let actions = harness.engine.take_actions();
        assert_eq!(actions, vec![Action::StopHeartbeat, Action::Close]);
        assert!(harness.take_events().contains(&EngineEvent::Disconnected));
    }

    #[test]
    fn test_shutdown_stops_timers_before_closing() {
        let mut harness = Harness::connected();

        harness.engine.shutdown();

        assert_eq!(
            harness.engine.take_actions(),
            vec![Action::StopHeartbeat, Action::CancelReconnect, Action::Close]
        );

        harness.feed(r#"{"type":"ping","timestamp":1}"#, harness.at(10));
        harness.engine.on_transport_error(TransportError::RemoteClosed);
        harness.engine.connect();
        assert!(harness.engine.take_actions().is_empty());
    }

    #[test]
    fn test_send_while_disconnected_coalesces_status() {
        let mut harness = Harness::new(test_settings());

        assert!(!harness.engine.send(Message::get_friends_list()));
        assert!(!harness.engine.send(Message::get_friends_list()));

        let statuses: Vec<_> = harness
            .take_events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::ConnectionStatusChanged(_)))
            .collect();
        assert_eq!(
            statuses,
            vec![EngineEvent::ConnectionStatusChanged("Not connected to server".to_string())]
        );
    }

    #[test]
    fn test_logout_only_when_authenticated() {
        let mut harness = Harness::connected();
        harness.engine.logout();
        assert!(harness.engine.take_actions().is_empty());

        let mut harness = Harness::authenticated();
        harness.engine.logout();
        let messages = sent(&harness.engine.take_actions());
        assert_eq!(messages.len(), 1);
        assert!(messages[0].is(message_type::LOGOUT));
        assert_eq!(harness.engine.username(), None);
    }

    #[test]
    fn test_buffer_overflow_keeps_connection() {
        let mut harness = Harness::new(ConnectionSettings {
            max_buffer_bytes: 16,
            ..test_settings()
        });
        harness.engine.connect();
        harness.engine.on_connected(harness.start);

        harness.feed(r#"{"type":"friends_list_response","friends":["#, harness.at(1));
        harness.feed(r#"{"type":"pong","timestamp":1}"#, harness.at(2));

        assert_eq!(harness.engine.connection_state(), ConnectionState::Connected);
        assert_eq!(harness.engine.heartbeat().last_liveness(), harness.at(2));
    }
}
