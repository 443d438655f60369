//! Ingest service and sink-context bindings
//!
//! Ingestion callbacks are created outside the flow graph, so they reach
//! their flow through a process-wide registry mapping sink names to
//! [`EventInjector`] handles. The registry is internally synchronized
//! and exposes only bind / drop / lookup. The worker thread starts the
//! ingest service lazily when the first flow with an external source is
//! deployed and stops it exactly once on exit.

use crate::env::ControlOp;
use crate::event::Event;
use crate::flow::{EventQueue, FlowId};
use rustc_hash::FxHashMap;
use std::sync::mpsc::SyncSender;
use std::sync::{Mutex, OnceLock};
use tracing::{debug, info};

/// Delivers externally-produced events into a source operator's pending
/// queue and wakes the worker with a no-op control message.
#[derive(Clone)]
pub struct EventInjector {
    queue: EventQueue,
    wake: SyncSender<ControlOp>,
    flow: FlowId,
    node: usize,
}

impl EventInjector {
    pub(crate) fn new(
        queue: EventQueue,
        wake: SyncSender<ControlOp>,
        flow: FlowId,
        node: usize,
    ) -> Self {
        Self {
            queue,
            wake,
            flow,
            node,
        }
    }

    pub fn inject(&self, event: Event) {
        self.queue.inject(event);
        // Wake the worker if it is idle; a full control queue means it is
        // already awake.
        let _ = self.wake.try_send(ControlOp::Noop);
    }

    /// Signal that this source has reached its natural end. The worker
    /// retires the operator and propagates completion downstream.
    pub fn complete(&self) {
        let _ = self
            .wake
            .send(ControlOp::ElementComplete(self.flow, self.node));
    }
}

/// The process-wide binding table.
pub struct SinkBindings {
    map: Mutex<FxHashMap<String, EventInjector>>,
}

static BINDINGS: OnceLock<SinkBindings> = OnceLock::new();

impl SinkBindings {
    pub fn global() -> &'static SinkBindings {
        BINDINGS.get_or_init(|| SinkBindings {
            map: Mutex::new(FxHashMap::default()),
        })
    }

    pub fn bind(&self, name: impl Into<String>, injector: EventInjector) {
        let name = name.into();
        debug!(sink = %name, "binding sink context");
        if let Ok(mut map) = self.map.lock() {
            map.insert(name, injector);
        }
    }

    pub fn drop_binding(&self, name: &str) {
        debug!(sink = %name, "dropping sink context");
        if let Ok(mut map) = self.map.lock() {
            map.remove(name);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<EventInjector> {
        self.map.lock().ok()?.get(name).cloned()
    }

    /// Every binding whose name starts with the prefix. Several flows
    /// may source the same stream, each under its own binding.
    pub fn lookup_matching(&self, prefix: &str) -> Vec<EventInjector> {
        match self.map.lock() {
            Ok(map) => map
                .iter()
                .filter(|(name, _)| name.starts_with(prefix))
                .map(|(_, inj)| inj.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Deliver an event to every matching binding; returns how many
    /// injectors received it.
    pub fn inject_matching(&self, prefix: &str, event: &Event) -> usize {
        let injectors = self.lookup_matching(prefix);
        for injector in &injectors {
            injector.inject(event.clone());
        }
        injectors.len()
    }
}

/// Lifecycle of the embedded event-ingestion subsystem. The in-memory
/// engine has no transport to spin up, so start/stop only track state
/// and log.
#[derive(Default)]
pub struct IngestService {
    started: bool,
}

impl IngestService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn start(&mut self) {
        if !self.started {
            info!("starting ingest service");
            self.started = true;
        }
    }

    pub fn stop(&mut self) {
        if self.started {
            info!("stopping ingest service");
            self.started = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn test_bind_lookup_drop() {
        let bindings = SinkBindings {
            map: Mutex::new(FxHashMap::default()),
        };
        let (tx, _rx) = sync_channel(4);
        let queue = EventQueue::new(8);
        bindings.bind("t:s#1", EventInjector::new(queue.clone(), tx, FlowId(1), 0));

        assert!(bindings.lookup("t:s#1").is_some());
        assert!(bindings.lookup("t:other").is_none());

        bindings.drop_binding("t:s#1");
        assert!(bindings.lookup("t:s#1").is_none());
    }

    #[test]
    fn test_inject_matching_fans_out_by_prefix() {
        let bindings = SinkBindings {
            map: Mutex::new(FxHashMap::default()),
        };
        let (tx, rx) = sync_channel(16);
        let q1 = EventQueue::new(8);
        let q2 = EventQueue::new(8);
        let q3 = EventQueue::new(8);
        bindings.bind("t:s#1", EventInjector::new(q1.clone(), tx.clone(), FlowId(1), 0));
        bindings.bind("t:s#2", EventInjector::new(q2.clone(), tx.clone(), FlowId(2), 0));
        bindings.bind("t:other#1", EventInjector::new(q3.clone(), tx, FlowId(3), 0));

        let hit = bindings.inject_matching("t:s#", &Event::new("s"));
        assert_eq!(hit, 2);
        assert_eq!(q1.len(), 1);
        assert_eq!(q2.len(), 1);
        assert_eq!(q3.len(), 0);
        // Each delivery posts a wake-up.
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_ingest_service_lifecycle() {
        let mut service = IngestService::new();
        assert!(!service.is_started());
        service.start();
        assert!(service.is_started());
        service.start(); // idempotent
        service.stop();
        assert!(!service.is_started());
        service.stop(); // idempotent
    }
}
