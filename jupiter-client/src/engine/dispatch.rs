//! Routing of decoded inbound messages.
//!
//! Precedence, first match wins:
//! 1. `error` "Not authenticated" before login is absorbed (refreshes liveness only)
//! 2. `ping`/`pong` go to the heartbeat and stop there
//! 3. `login_response`, `register_response` and `error` update the session
//! 4. everything is then handed to subscribers keyed by type
//!
//! Every message that reaches step 4 refreshes liveness, except errors that
//! arrive while unauthenticated.

use super::Engine;
use crate::events::EngineEvent;
use crate::session::{ErrorClass, LoginOutcome};
use jupiter_proto::{message_type, user_status, Message};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

impl Engine {
    pub(super) fn dispatch(&mut self, message: Message, now: Instant) {
        debug!("Processing message type: {}", message.msg_type);

        let is_error = message.is(message_type::ERROR);
        let error_class = is_error.then(|| self.session.classify_error(&message));

        if error_class == Some(ErrorClass::Suppressed) {
            debug!("Ignoring 'Not authenticated' error - not logged in yet");
            self.heartbeat.on_liveness(now);
            return;
        }

        match message.msg_type.as_str() {
            message_type::PING => {
                self.handle_ping(&message, now);
                return;
            }
            message_type::PONG => {
                debug!("Received PONG");
                self.heartbeat.on_liveness(now);
                return;
            }
            message_type::LOGIN_RESPONSE => self.handle_login_response(&message, now),
            message_type::REGISTER_RESPONSE => self.handle_register_response(&message),
            message_type::ERROR => {
                if let Some(class) = error_class {
                    self.handle_error(class);
                }
            }
            other => {
                if !message_type::is_known(other) && !self.subscribers.has_message_subscriber(other)
                {
                    warn!("Received unknown message type: {}", other);
                }
            }
        }

        self.subscribers.publish(&message);

        let refreshes_liveness = !is_error || self.session.is_authenticated();
        self.emit(EngineEvent::MessageReceived(message));

        if refreshes_liveness {
            self.heartbeat.on_liveness(now);
        }
    }

    fn handle_ping(&mut self, ping: &Message, now: Instant) {
        let timestamp = ping.int("timestamp").unwrap_or_default();
        debug!("Received PING (timestamp: {})", timestamp);

        self.heartbeat.on_liveness(now);
        self.send(Message::pong(timestamp));
    }

    fn handle_login_response(&mut self, response: &Message, now: Instant) {
        match self.session.on_login_response(response) {
            LoginOutcome::Success => {
                self.heartbeat.reset(now);

                self.send(Message::status_update(user_status::ONLINE));
                self.send(Message::get_friends_list());

                self.set_status("Login successful - Connected");
                self.emit(EngineEvent::LoginSuccessful);
            }
            LoginOutcome::Failed(reason) => {
                self.set_status(format!("Login failed: {}", reason));
                self.emit(EngineEvent::Error(reason));
            }
        }
    }

    fn handle_register_response(&mut self, response: &Message) {
        if response.text("status") == Some("success") {
            info!("Registration successful");
            self.emit(EngineEvent::RegistrationSuccessful);
            self.set_status("Registration successful - please login");
            return;
        }

        let reason = response.text("message").unwrap_or("unknown error").to_string();
        warn!("Registration failed: {}", reason);
        self.set_status(format!("Registration failed: {}", reason));
        self.emit(EngineEvent::Error(reason));
    }

    fn handle_error(&mut self, class: ErrorClass) {
        match class {
            ErrorClass::Suppressed => {}
            ErrorClass::SessionInvalidated(text) => {
                error!("Server error: {}", text);
                self.set_status(format!("Server error: {}", text));
                self.emit(EngineEvent::Error(text));
                self.set_status("Session expired - please login again");
            }
            ErrorClass::Surfaced(text) => {
                error!("Server error: {}", text);
                if text == "Invalid JSON format" {
                    error!("Invalid JSON sent to server - check message format");
                }
                self.set_status(format!("Server error: {}", text));
                self.emit(EngineEvent::Error(text));
            }
        }
    }
}
