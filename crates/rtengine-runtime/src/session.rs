//! Sessions and output consoles
//!
//! A session lives independently of flows: it has an identity and a
//! console handle that receives informational messages, errors, and the
//! events of flows it watches.

use crate::event::Event;
use crate::flow::FlowId;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, RwLock};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SessionId(pub i64);

/// Destination for a session's output.
pub trait SessionConsole: Send + Sync {
    fn send_info(&self, message: &str);
    fn send_err(&self, message: &str);
    fn send_event(&self, flow: FlowId, event: &Event);
}

/// Console of the local interactive user: prints to stdout/stderr.
pub struct ClientConsole;

impl SessionConsole for ClientConsole {
    fn send_info(&self, message: &str) {
        println!("{}", message);
    }

    fn send_err(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn send_event(&self, flow: FlowId, event: &Event) {
        println!("[{}] {}", flow, event.render());
    }
}

/// Buffering console for tests and embedded callers.
#[derive(Default)]
pub struct BufferConsole {
    lines: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
    events: Mutex<Vec<(FlowId, Event)>>,
}

impl BufferConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<(FlowId, Event)> {
        self.events.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl SessionConsole for BufferConsole {
    fn send_info(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }

    fn send_err(&self, message: &str) {
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(message.to_string());
        }
    }

    fn send_event(&self, flow: FlowId, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push((flow, event.clone()));
        }
    }
}

/// A connected user session.
#[derive(Clone)]
pub struct UserSession {
    pub id: SessionId,
    console: Arc<dyn SessionConsole>,
}

impl UserSession {
    pub fn new(id: SessionId, console: Arc<dyn SessionConsole>) -> Self {
        Self { id, console }
    }

    pub fn send_info(&self, message: &str) {
        self.console.send_info(message);
    }

    pub fn send_err(&self, message: &str) {
        self.console.send_err(message);
    }

    pub fn send_event(&self, flow: FlowId, event: &Event) {
        self.console.send_event(flow, event);
    }
}

/// Registry of connected sessions, shared between the engine facade and
/// the worker thread.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<FxHashMap<SessionId, UserSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: UserSession) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(session.id, session);
        }
    }

    pub fn remove(&self, id: SessionId) -> Option<UserSession> {
        self.inner.write().ok()?.remove(&id)
    }

    pub fn get(&self, id: SessionId) -> Option<UserSession> {
        self.inner.read().ok()?.get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_get_remove() {
        let registry = SessionRegistry::new();
        let console = Arc::new(BufferConsole::new());
        registry.register(UserSession::new(SessionId(7), console));

        assert!(registry.get(SessionId(7)).is_some());
        assert!(registry.get(SessionId(8)).is_none());
        assert!(registry.remove(SessionId(7)).is_some());
        assert!(registry.get(SessionId(7)).is_none());
    }

    #[test]
    fn test_buffer_console_captures_streams_separately() {
        let console = BufferConsole::new();
        console.send_info("hello");
        console.send_err("oops");
        console.send_event(FlowId(1), &Event::new("s"));

        assert_eq!(console.lines(), vec!["hello"]);
        assert_eq!(console.errors(), vec!["oops"]);
        assert_eq!(console.events().len(), 1);
    }
}
