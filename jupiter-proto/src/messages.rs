use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type tags used on the wire
pub mod message_type {
    pub const LOGIN: &str = "login";
    pub const LOGIN_RESPONSE: &str = "login_response";
    pub const REGISTER: &str = "register";
    pub const REGISTER_RESPONSE: &str = "register_response";
    pub const LOGOUT: &str = "logout";
    pub const LOGOUT_RESPONSE: &str = "logout_response";
    pub const GET_STATUS: &str = "get_status";
    pub const STATUS_RESPONSE: &str = "status_response";
    pub const STATUS_UPDATE: &str = "status_update";
    pub const GET_FRIENDS_LIST: &str = "get_friends_list";
    pub const FRIENDS_LIST_RESPONSE: &str = "friends_list_response";
    pub const FRIENDS_STATUS_UPDATE: &str = "friends_status_update";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const MESSAGE_RESPONSE: &str = "message_response";
    pub const MESSAGE_ACK: &str = "message_ack";
    pub const GET_MESSAGES: &str = "get_messages";
    pub const PENDING_MESSAGES: &str = "pending_messages";
    pub const UNREAD_FROM: &str = "unread_from";
    pub const MARK_MESSAGES_READ: &str = "mark_messages_read";
    pub const SEARCH_USERS: &str = "search_users";
    pub const SEARCH_USERS_RESPONSE: &str = "search_users_response";
    pub const ADD_FRIEND_REQUEST: &str = "add_friend_request";
    pub const FRIEND_REQUEST_ACCEPT: &str = "friend_request_accept";
    pub const FRIEND_REQUEST_ACCEPT_RESPONSE: &str = "friend_request_accept_response";
    pub const FRIEND_REQUEST_REJECT: &str = "friend_request_reject";
    pub const FRIEND_REQUEST_REJECT_RESPONSE: &str = "friend_request_reject_response";
    pub const CANCEL_FRIEND_REQUEST: &str = "cancel_friend_request";
    pub const CANCEL_FRIEND_REQUEST_RESPONSE: &str = "cancel_friend_request_response";
    pub const FRIEND_REQUEST_CANCELLED_NOTIFICATION: &str = "friend_request_cancelled_notification";
    pub const GET_RECEIVED_INVITATIONS: &str = "get_received_invitations";
    pub const RECEIVED_INVITATIONS_RESPONSE: &str = "received_invitations_response";
    pub const GET_SENT_INVITATIONS: &str = "get_sent_invitations";
    pub const SENT_INVITATIONS_RESPONSE: &str = "sent_invitations_response";
    pub const INVITATION_STATUS_CHANGED: &str = "invitation_status_changed";
    pub const PING: &str = "ping";
    pub const PONG: &str = "pong";
    pub const ERROR: &str = "error";

    /// Every tag the client knows how to produce or expects to receive
    pub const ALL: &[&str] = &[
        LOGIN,
        LOGIN_RESPONSE,
        REGISTER,
        REGISTER_RESPONSE,
        LOGOUT,
        LOGOUT_RESPONSE,
        GET_STATUS,
        STATUS_RESPONSE,
        STATUS_UPDATE,
        GET_FRIENDS_LIST,
        FRIENDS_LIST_RESPONSE,
        FRIENDS_STATUS_UPDATE,
        SEND_MESSAGE,
        MESSAGE_RESPONSE,
        MESSAGE_ACK,
        GET_MESSAGES,
        PENDING_MESSAGES,
        UNREAD_FROM,
        MARK_MESSAGES_READ,
        SEARCH_USERS,
        SEARCH_USERS_RESPONSE,
        ADD_FRIEND_REQUEST,
        FRIEND_REQUEST_ACCEPT,
        FRIEND_REQUEST_ACCEPT_RESPONSE,
        FRIEND_REQUEST_REJECT,
        FRIEND_REQUEST_REJECT_RESPONSE,
        CANCEL_FRIEND_REQUEST,
        CANCEL_FRIEND_REQUEST_RESPONSE,
        FRIEND_REQUEST_CANCELLED_NOTIFICATION,
        GET_RECEIVED_INVITATIONS,
        RECEIVED_INVITATIONS_RESPONSE,
        GET_SENT_INVITATIONS,
        SENT_INVITATIONS_RESPONSE,
        INVITATION_STATUS_CHANGED,
        PING,
        PONG,
        ERROR,
    ];

    pub fn is_known(tag: &str) -> bool {
        ALL.contains(&tag)
    }
}

/// Presence values accepted by `status_update`
pub mod user_status {
    pub const ONLINE: &str = "online";
    pub const OFFLINE: &str = "offline";
    pub const AWAY: &str = "away";
    pub const BUSY: &str = "busy";
}

/// One JSON object on the wire: a `type` tag plus arbitrary payload fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default)]
    pub msg_type: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn is(&self, msg_type: &str) -> bool {
        self.msg_type == msg_type
    }

    /// String field, if present and a string
    pub fn text(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Integer field, if present and an integer
    pub fn int(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn login(username: &str, password: &str) -> Self {
        Self::new(message_type::LOGIN)
            .with_field("username", username)
            .with_field("password", password)
    }

    pub fn register(username: &str, password: &str, email: &str) -> Self {
        Self::new(message_type::REGISTER)
            .with_field("username", username)
            .with_field("password", password)
            .with_field("email", email)
    }

    pub fn logout() -> Self {
        Self::new(message_type::LOGOUT)
    }

    pub fn send_chat(receiver_id: i64, content: &str) -> Self {
        Self::new(message_type::SEND_MESSAGE)
            .with_field("receiver_id", receiver_id)
            .with_field("content", content)
    }

    pub fn message_ack(message_id: &str) -> Self {
        Self::new(message_type::MESSAGE_ACK).with_field("message_id", message_id)
    }

    pub fn get_messages(friend_id: i64) -> Self {
        Self::new(message_type::GET_MESSAGES).with_field("friend_id", friend_id)
    }

    pub fn mark_messages_read(friend_id: i64) -> Self {
        Self::new(message_type::MARK_MESSAGES_READ).with_field("friend_id", friend_id)
    }

    pub fn status_update(status: &str) -> Self {
        Self::new(message_type::STATUS_UPDATE).with_field("status", status)
    }

    pub fn get_status() -> Self {
        Self::new(message_type::GET_STATUS)
    }

    /// Heartbeat ping stamped with the current Unix time in milliseconds
    pub fn ping() -> Self {
        Self::new(message_type::PING).with_field("timestamp", chrono::Utc::now().timestamp_millis())
    }

    /// Heartbeat pong echoing the timestamp of the ping it answers
    pub fn pong(timestamp: i64) -> Self {
        Self::new(message_type::PONG).with_field("timestamp", timestamp)
    }

    pub fn get_friends_list() -> Self {
        Self::new(message_type::GET_FRIENDS_LIST)
    }

    pub fn search_users(query: &str) -> Self {
        Self::new(message_type::SEARCH_USERS).with_field("query", query)
    }

    pub fn add_friend_request(user_id: i64) -> Self {
        Self::new(message_type::ADD_FRIEND_REQUEST).with_field("user_id", user_id)
    }

    pub fn friend_request_accept(request_id: i64) -> Self {
        Self::new(message_type::FRIEND_REQUEST_ACCEPT).with_field("request_id", request_id)
    }

    pub fn friend_request_reject(request_id: i64) -> Self {
        Self::new(message_type::FRIEND_REQUEST_REJECT).with_field("request_id", request_id)
    }

    pub fn cancel_friend_request(request_id: i64) -> Self {
        Self::new(message_type::CANCEL_FRIEND_REQUEST).with_field("request_id", request_id)
    }

    pub fn get_received_invitations() -> Self {
        Self::new(message_type::GET_RECEIVED_INVITATIONS)
    }

    pub fn get_sent_invitations() -> Self {
        Self::new(message_type::GET_SENT_INVITATIONS)
    }

    pub fn error(message: &str) -> Self {
        Self::new(message_type::ERROR).with_field("message", message)
    }
}
