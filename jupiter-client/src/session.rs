use jupiter_proto::Message;
use tracing::{debug, info, warn};

/// Server error text that is expected before login and carries no information
pub const NOT_AUTHENTICATED: &str = "Not authenticated";
pub const SESSION_EXPIRED: &str = "Session expired";
pub const AUTHENTICATION_REQUIRED: &str = "Authentication required";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    Authenticating,
    Authenticated,
    Expired,
}

/// Cached in memory only, never persisted
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How a server `error` message affects the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// "Not authenticated" before login: absorbed entirely
    Suppressed,
    /// The server dropped our session
    SessionInvalidated(String),
    /// Anything else, passed through to subscribers
    Surfaced(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Failed(String),
}

/// Login/session state machine layered over the connection
#[derive(Debug)]
pub struct SessionAuthenticator {
    state: SessionState,
    credentials: Option<Credentials>,
}

impl Default for SessionAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionAuthenticator {
    pub fn new() -> Self {
        Self {
            state: SessionState::Initial,
            credentials: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }

    /// Caches credentials for a login that cannot be sent yet
    pub fn defer_login(&mut self, username: &str, password: &str) {
        debug!("Deferring login for {} until connected", username);
        self.cache_credentials(username, password);
    }

    /// Caches credentials and produces the login request
    pub fn begin_login(&mut self, username: &str, password: &str) -> Message {
        self.cache_credentials(username, password);
        self.state = SessionState::Authenticating;
        info!("Logging in as {}", username);
        Message::login(username, password)
    }

    /// Replays the cached login after a fresh connection
    pub fn on_reconnected(&mut self) -> Option<Message> {
        let credentials = self.credentials.as_ref()?;
        info!("Attempting automatic re-login as {}", credentials.username);
        self.state = SessionState::Authenticating;
        Some(Message::login(&credentials.username, &credentials.password))
    }

    /// Only effective while authenticated
    pub fn logout(&mut self) -> Option<Message> {
        if !self.is_authenticated() {
            debug!("Ignoring logout while {:?}", self.state);
            return None;
        }

        info!("Logging out");
        self.credentials = None;
        self.state = SessionState::Initial;
        Some(Message::logout())
    }

    fn cache_credentials(&mut self, username: &str, password: &str) {
        self.credentials = Some(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    pub fn on_login_response(&mut self, response: &Message) -> LoginOutcome {
        if response.text("status") == Some("success") {
            info!("Login successful");
            self.state = SessionState::Authenticated;
            return LoginOutcome::Success;
        }

        let reason = response.text("message").unwrap_or("unknown error").to_string();
        warn!("Login failed: {}", reason);
        self.credentials = None;
        self.state = SessionState::Initial;
        LoginOutcome::Failed(reason)
    }

    /// Transport went away; keep credentials for the automatic re-login
    pub fn on_disconnected(&mut self) {
        if self.state != SessionState::Expired {
            self.state = SessionState::Initial;
        }
    }

    pub fn classify_error(&mut self, error: &Message) -> ErrorClass {
        let text = error.text("message").unwrap_or_default();

        if !self.is_authenticated() && text == NOT_AUTHENTICATED {
            return ErrorClass::Suppressed;
        }

        if self.is_authenticated() && (text == SESSION_EXPIRED || text == AUTHENTICATION_REQUIRED) {
            warn!("Server invalidated session: {}", text);
            self.state = SessionState::Expired;
            return ErrorClass::SessionInvalidated(text.to_string());
        }

        ErrorClass::Surfaced(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jupiter_proto::message_type;

    fn login_response(status: &str, message: &str) -> Message {
        Message::new(message_type::LOGIN_RESPONSE)
            .with_field("status", status)
            .with_field("message", message)
    }

    fn authenticated() -> SessionAuthenticator {
        let mut session = SessionAuthenticator::new();
        session.begin_login("alice", "pw");
        session.on_login_response(&login_response("success", ""));
        session
    }

    #[test]
    fn test_login_success_flow() {
        let mut session = SessionAuthenticator::new();

        let request = session.begin_login("alice", "pw");
        assert!(request.is(message_type::LOGIN));
        assert_eq!(session.state(), SessionState::Authenticating);

        let outcome = session.on_login_response(&login_response("success", ""));
        assert_eq!(outcome, LoginOutcome::Success);
        assert!(session.is_authenticated());
        assert_eq!(session.username(), Some("alice"));
    }

    #[test]
    fn test_login_failure_clears_credentials() {
        let mut session = SessionAuthenticator::new();
        session.begin_login("alice", "wrong");

        let outcome = session.on_login_response(&login_response("error", "Invalid password"));

        assert_eq!(outcome, LoginOutcome::Failed("Invalid password".to_string()));
        assert_eq!(session.state(), SessionState::Initial);
        assert_eq!(session.username(), None);
        assert!(session.on_reconnected().is_none());
    }

    #[test]
    fn test_reconnect_replays_cached_login() {
        let mut session = authenticated();
        session.on_disconnected();
        assert_eq!(session.state(), SessionState::Initial);

        let request = session.on_reconnected().unwrap();
        assert_eq!(request.text("username"), Some("alice"));
        assert_eq!(request.text("password"), Some("pw"));
        assert_eq!(session.state(), SessionState::Authenticating);
    }

    #[test]
    fn test_logout_requires_authentication() {
        let mut session = SessionAuthenticator::new();
        assert!(session.logout().is_none());

        let mut session = authenticated();
        assert!(session.logout().unwrap().is(message_type::LOGOUT));
        assert_eq!(session.state(), SessionState::Initial);
        assert_eq!(session.username(), None);
    }

    #[test]
    fn test_not_authenticated_suppressed_before_login() {
        let mut session = SessionAuthenticator::new();
        let class = session.classify_error(&Message::error(NOT_AUTHENTICATED));
        assert_eq!(class, ErrorClass::Suppressed);
    }

    #[test]
    fn test_not_authenticated_surfaced_after_login() {
        let mut session = authenticated();
        let class = session.classify_error(&Message::error(NOT_AUTHENTICATED));
        assert_eq!(class, ErrorClass::Surfaced(NOT_AUTHENTICATED.to_string()));
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_session_expired_invalidates() {
        for text in [SESSION_EXPIRED, AUTHENTICATION_REQUIRED] {
            let mut session = authenticated();
            let class = session.classify_error(&Message::error(text));

            assert_eq!(class, ErrorClass::SessionInvalidated(text.to_string()));
            assert_eq!(session.state(), SessionState::Expired);
        }
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
