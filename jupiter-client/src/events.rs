use jupiter_proto::Message;
use std::collections::HashMap;
use tracing::debug;

/// Everything the engine reports to the outside world
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Connected,
    Disconnected,
    MessageReceived(Message),
    LoginSuccessful,
    RegistrationSuccessful,
    /// No liveness from the server for too many heartbeat intervals
    ConnectionTimedOut,
    Error(String),
    ConnectionStatusChanged(String),
}

pub type EventCallback = Box<dyn FnMut(&EngineEvent) + Send>;
pub type MessageCallback = Box<dyn FnMut(&Message) + Send>;

/// Observer registry the engine publishes to.
///
/// Callbacks run synchronously on the engine's task, in registration order,
/// once per event.
#[derive(Default)]
pub struct Subscribers {
    events: Vec<EventCallback>,
    by_type: HashMap<String, Vec<MessageCallback>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback for every engine event
    pub fn on_event<F>(&mut self, callback: F)
    where
        F: FnMut(&EngineEvent) + Send + 'static,
    {
        self.events.push(Box::new(callback));
    }

    /// Registers a callback for inbound messages with the given type tag
    pub fn on_message<F>(&mut self, msg_type: &str, callback: F)
    where
        F: FnMut(&Message) + Send + 'static,
    {
        self.by_type
            .entry(msg_type.to_string())
            .or_default()
            .push(Box::new(callback));
    }

    pub fn has_message_subscriber(&self, msg_type: &str) -> bool {
        self.by_type.get(msg_type).is_some_and(|callbacks| !callbacks.is_empty())
    }

    pub(crate) fn emit(&mut self, event: &EngineEvent) {
        for callback in &mut self.events {
            callback(event);
        }
    }

    /// Hands a message to the callbacks keyed by its type
    pub(crate) fn publish(&mut self, message: &Message) {
        let Some(callbacks) = self.by_type.get_mut(&message.msg_type) else {
            return;
        };

        for callback in callbacks.iter_mut() {
            callback(message);
        }

        debug!("Delivered {} to {} subscriber(s)", message.msg_type, callbacks.len());
    }
}
