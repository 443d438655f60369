//! Physical flow construction
//!
//! Lowers a [`FlowSpec`] to a [`LocalFlow`]: the spec is walked in
//! reverse topological order (sinks before sources) so every node's
//! downstream exists when its context is wired. Wiring policy: a single
//! downstream couples directly; fan-out goes through the downstream
//! pending queues; terminals become sinks.

use crate::dag::Dag;
use crate::error::PlanError;
use crate::flow::{ContextKind, EventQueue, LocalFlow, OperatorNode, OPERATOR_QUEUE_CAPACITY};
use crate::op::{
    Aggregate, ConsoleOutput, Filter, Join, MemoryOutput, MemoryOutputMap, Operator, Project,
    StreamSource,
};
use crate::plan::{FlowSpec, PlanNodeKind};
use crate::session::SessionId;
use crate::flow::FlowId;
use rustc_hash::FxHashMap;
use std::sync::Arc;

pub struct LocalFlowBuilder {
    id: FlowId,
    memory_outputs: Arc<MemoryOutputMap>,
}

impl LocalFlowBuilder {
    pub fn new(id: FlowId, memory_outputs: Arc<MemoryOutputMap>) -> Self {
        Self { id, memory_outputs }
    }

    pub fn build(
        &self,
        spec: &mut FlowSpec,
        autowatch_session: Option<SessionId>,
    ) -> Result<LocalFlow, PlanError> {
        let mut dag: Dag<OperatorNode> = Dag::new();
        let mut index_map: FxHashMap<usize, usize> = FxHashMap::default();
        let mut requires_ingest = false;

        for plan_idx in spec.dag.reverse_bfs_order() {
            let node = spec.dag.node(plan_idx);

            let (name, op, source_binding): (String, Box<dyn Operator>, Option<String>) =
                match &node.kind {
                    PlanNodeKind::SourceStream {
                        scope,
                        stream,
                        binding,
                        external,
                        fields,
                        ..
                    } => {
                        requires_ingest |= external;
                        (
                            format!("SourceStream({})", stream),
                            Box::new(StreamSource::new(scope.clone(), fields.clone())),
                            Some(binding.clone()),
                        )
                    }
                    PlanNodeKind::Filter { predicate } => (
                        format!("Filter({})", predicate),
                        Box::new(Filter::new(predicate.clone())),
                        None,
                    ),
                    PlanNodeKind::Project { exprs, labels } => (
                        format!("Project({})", labels.join(", ")),
                        Box::new(Project::new(exprs.clone(), labels.clone())),
                        None,
                    ),
                    PlanNodeKind::Aggregate { items, window_ns } => (
                        "Aggregate".to_string(),
                        Box::new(Aggregate::new(items.clone(), *window_ns)),
                        None,
                    ),
                    PlanNodeKind::Join {
                        key,
                        left,
                        right,
                        window_ns,
                    } => (
                        format!("Join({}, {})", left, right),
                        Box::new(Join::new(key.clone(), left.clone(), right.clone(), *window_ns)),
                        None,
                    ),
                    PlanNodeKind::ConsoleOutput { fields } => (
                        format!("ConsoleOutput({})", fields.join(", ")),
                        Box::new(ConsoleOutput::new(fields.clone())),
                        None,
                    ),
                    PlanNodeKind::MemoryOutput { name, fields } => (
                        format!("MemoryOutput({})", name),
                        Box::new(MemoryOutput::new(
                            name.clone(),
                            fields.clone(),
                            self.memory_outputs.handle(name),
                        )),
                        None,
                    ),
                };

            // Children were built before us; wire the output context.
            let children = spec.dag.children(plan_idx);
            let context = match children.len() {
                0 => ContextKind::Sink,
                1 => {
                    let downstream = *index_map.get(&children[0]).ok_or_else(|| {
                        PlanError::new("flow spec is not a DAG: child built after parent")
                    })?;
                    ContextKind::Direct(downstream)
                }
                _ => {
                    let mut downstreams = Vec::with_capacity(children.len());
                    for child in children {
                        downstreams.push(*index_map.get(child).ok_or_else(|| {
                            PlanError::new("flow spec is not a DAG: child built after parent")
                        })?);
                    }
                    ContextKind::Queue(downstreams)
                }
            };

            let flow_idx = dag.add_node(OperatorNode {
                name,
                op,
                context,
                queue: EventQueue::new(OPERATOR_QUEUE_CAPACITY),
                schema: node.schema.clone(),
                opened: false,
                closed: false,
                open_parents: spec.dag.parents(plan_idx).len(),
                source_binding,
                bound_key: None,
            });
            index_map.insert(plan_idx, flow_idx);
        }

        for plan_idx in 0..spec.dag.len() {
            for &child in spec.dag.children(plan_idx).to_vec().iter() {
                dag.add_edge(index_map[&plan_idx], index_map[&child]);
            }
        }
        for &root in spec.dag.roots().to_vec().iter() {
            dag.set_root(index_map[&root]);
        }

        Ok(LocalFlow {
            id: self.id,
            query: spec.query.clone(),
            dag,
            autowatch_session,
            requires_ingest,
        })
    }
}
