//! Physical flows
//!
//! A [`LocalFlow`] is an arena of operator nodes with index-based edges;
//! contexts hold downstream indices rather than pointers, so the flow
//! exclusively owns its operators and the graph carries no reference
//! cycles.

use crate::dag::Dag;
use crate::event::Event;
use crate::op::Operator;
use crate::plan::Schema;
use crate::session::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use tracing::warn;

/// Identity of a deployed flow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FlowId(pub u64);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flow-{}", self.0)
    }
}

/// Description of a running flow, as returned by `list_flows`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowInfo {
    pub id: FlowId,
    pub query: String,
}

/// Capacity of every queue-backed operator input.
pub const OPERATOR_QUEUE_CAPACITY: usize = 512;

struct QueueInner {
    deque: Mutex<VecDeque<Event>>,
    not_full: Condvar,
    capacity: usize,
}

/// A bounded pending-event queue shared between the scheduler, the
/// owning operator node, and (for sources) external injectors.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                deque: Mutex::new(VecDeque::new()),
                not_full: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Worker-side append. The scheduler's step budget bounds growth, so
    /// going over capacity is logged rather than blocked on.
    pub fn push(&self, event: Event) {
        let Ok(mut deque) = self.inner.deque.lock() else {
            return;
        };
        if deque.len() >= self.inner.capacity {
            warn!(capacity = self.inner.capacity, "operator queue over capacity");
        }
        deque.push_back(event);
    }

    /// Producer-side append: blocks the external caller while the queue
    /// is full (ingest backpressure).
    pub fn inject(&self, event: Event) {
        let Ok(mut deque) = self.inner.deque.lock() else {
            return;
        };
        while deque.len() >= self.inner.capacity {
            match self.inner.not_full.wait(deque) {
                Ok(guard) => deque = guard,
                Err(_) => return,
            }
        }
        deque.push_back(event);
    }

    pub fn pop(&self) -> Option<Event> {
        let mut deque = self.inner.deque.lock().ok()?;
        let event = deque.pop_front();
        if event.is_some() {
            self.inner.not_full.notify_one();
        }
        event
    }

    pub fn len(&self) -> usize {
        self.inner.deque.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity comparison: two handles to the same queue.
    pub fn same_queue(&self, other: &EventQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Output-routing policy of one operator node.
#[derive(Clone)]
pub enum ContextKind {
    /// Synchronous inline handoff to a single downstream node
    Direct(usize),
    /// Append to the pending queue of each downstream node
    Queue(Vec<usize>),
    /// Terminal: route to the flow's subscribers
    Sink,
}

/// One operator slot in the flow arena.
pub struct OperatorNode {
    pub name: String,
    pub op: Box<dyn Operator>,
    pub context: ContextKind,
    pub queue: EventQueue,
    pub schema: Schema,
    pub opened: bool,
    pub closed: bool,
    /// Parents whose output has not yet completed
    pub open_parents: usize,
    /// Ingest binding name for source nodes
    pub source_binding: Option<String>,
    /// Registry key in effect while the binding is live
    pub bound_key: Option<String>,
}

impl fmt::Display for OperatorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)
    }
}

/// A deployable physical flow.
pub struct LocalFlow {
    pub id: FlowId,
    pub query: String,
    pub dag: Dag<OperatorNode>,
    /// Session to auto-subscribe at deploy time
    pub autowatch_session: Option<SessionId>,
    /// True when any source is fed by the external ingest service
    pub requires_ingest: bool,
}

impl LocalFlow {
    pub fn sink_count(&self) -> usize {
        (0..self.dag.len())
            .filter(|&idx| matches!(self.dag.node(idx).context, ContextKind::Sink))
            .count()
    }
}
