//! Operator framework
//!
//! Every node of a physical flow hosts one [`Operator`]. Operators are
//! non-blocking and cooperative: `take_event` processes a single event
//! and emits downstream through the [`EmitBuffer`]; the flow driver
//! routes emissions according to the node's context. `complete_window`
//! flushes buffered state when the upstream side of an operator ends.

mod aggregate;
mod console_out;
mod filter;
mod join;
mod memory_out;
mod project;
mod source;

pub use aggregate::Aggregate;
pub use console_out::ConsoleOutput;
pub use filter::Filter;
pub use join::Join;
pub use memory_out::{MemoryOutput, MemoryOutputMap};
pub use project::Project;
pub use source::StreamSource;

use crate::error::{OpenError, RuntimeError};
use crate::event::Event;

/// Collects the downstream output of one operator invocation.
#[derive(Default)]
pub struct EmitBuffer {
    pub events: Vec<Event>,
    /// Set when the operator has run to its natural end
    pub complete: bool,
}

impl EmitBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn mark_complete(&mut self) {
        self.complete = true;
    }
}

/// The uniform operator contract.
///
/// The scheduler opens every operator before any event is processed for
/// its flow, never calls `take_event` after `close`, and guards `close`
/// against double invocation.
pub trait Operator: Send {
    fn open(&mut self) -> Result<(), OpenError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn take_event(&mut self, event: Event, out: &mut EmitBuffer) -> Result<(), RuntimeError>;

    /// Flush buffered state (windows, groups) when the upstream ends.
    fn complete_window(&mut self, _out: &mut EmitBuffer) -> Result<(), RuntimeError> {
        Ok(())
    }
}
