//! Local execution environment
//!
//! [`LocalEnv`] is the engine facade. All flow state lives on a single
//! worker thread; client threads talk to it exclusively through a
//! bounded control queue (senders block when it fills) and one-shot
//! result slots. The worker blocks on the control queue when idle,
//! dispatches one control operation, then drains operator queues under a
//! step budget so a control operation never waits behind an unbounded
//! run of event processing.

use crate::error::{ControlError, PlanError};
use crate::event::Event;
use crate::flow::{ContextKind, EventQueue, FlowId, FlowInfo, LocalFlow};
use crate::ingest::{EventInjector, IngestService, SinkBindings};
use crate::op::{EmitBuffer, MemoryOutputMap};
use crate::physical::LocalFlowBuilder;
use crate::plan::{create_exec_plan, propagate_schemas, FlowSpec, PlanContext};
use crate::session::{
    ClientConsole, SessionConsole, SessionId, SessionRegistry, UserSession,
};
use rtengine_core::ast::Stmt;
use rtengine_core::check;
use rtengine_core::symbol::SymbolTable;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Max events processed between control-queue inspections.
const MAX_STEPS: usize = 250;

/// Capacity of the control queue; submitters block when it is full.
const MAX_QUEUE_LEN: usize = 100;

/// Option key: automatically subscribe the submitter to a new flow.
pub const AUTO_WATCH_FLOW_KEY: &str = "rtengine.flow.autowatch";
pub const DEFAULT_AUTO_WATCH_FLOW: bool = true;

/// Option key: session id of the submitting user.
pub const SUBMITTER_SESSION_ID_KEY: &str = "rtengine.query.submitter.session.id";

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(0);

/// One-shot cross-thread completion slot: the worker fills it, the
/// caller waits on it, optionally with a timeout that converts to an
/// incomplete result.
pub(crate) struct ResultSlot<T> {
    inner: Arc<(Mutex<Option<T>>, Condvar)>,
}

impl<T> Clone for ResultSlot<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ResultSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(None), Condvar::new())),
        }
    }

    pub fn fill(&self, value: T) {
        let (lock, cond) = &*self.inner;
        if let Ok(mut slot) = lock.lock() {
            *slot = Some(value);
            cond.notify_all();
        }
    }

    pub fn wait(&self) -> Option<T> {
        let (lock, cond) = &*self.inner;
        let mut slot = lock.lock().ok()?;
        loop {
            if let Some(value) = slot.take() {
                return Some(value);
            }
            slot = cond.wait(slot).ok()?;
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let (lock, cond) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut slot = lock.lock().ok()?;
        loop {
            if let Some(value) = slot.take() {
                return Some(value);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let (guard, result) = cond.wait_timeout(slot, remaining).ok()?;
            slot = guard;
            if result.timed_out() && slot.is_none() {
                return None;
            }
        }
    }
}

/// A request to watch or unwatch a flow.
pub(crate) struct WatchRequest {
    pub session: SessionId,
    pub flow: FlowId,
}

/// Control operations carried to the worker thread.
pub(crate) enum ControlOp {
    AddFlow(Box<LocalFlow>),
    CancelFlow(FlowId),
    CancelAll,
    ShutdownThread,
    Noop,
    ElementComplete(FlowId, usize),
    Join(FlowId, ResultSlot<bool>),
    ListFlows(ResultSlot<BTreeMap<FlowId, FlowInfo>>),
    WatchFlow(WatchRequest),
    UnwatchFlow(WatchRequest),
    GetWatchList(SessionId, ResultSlot<Vec<FlowId>>),
}

/// Result of a query submission.
#[derive(Debug, Clone)]
pub struct SubmitResponse {
    pub messages: String,
    pub flow_id: Option<FlowId>,
}

/// Standalone local execution environment for flows.
pub struct LocalEnv {
    env_id: u64,
    control_tx: SyncSender<ControlOp>,
    control_rx: Option<Receiver<ControlOp>>,
    worker: Option<JoinHandle<()>>,
    root_symbols: SymbolTable,
    sessions: Arc<SessionRegistry>,
    memory_outputs: Arc<MemoryOutputMap>,
    next_flow_id: u64,
    next_session_id: i64,
    connected: bool,
}

impl Default for LocalEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalEnv {
    pub fn new() -> Self {
        let (control_tx, control_rx) = sync_channel(MAX_QUEUE_LEN);
        Self {
            env_id: NEXT_ENV_ID.fetch_add(1, Ordering::SeqCst),
            control_tx,
            control_rx: Some(control_rx),
            worker: None,
            root_symbols: SymbolTable::with_builtins(),
            sessions: Arc::new(SessionRegistry::new()),
            memory_outputs: Arc::new(MemoryOutputMap::new()),
            next_flow_id: 0,
            next_session_id: 1,
            connected: false,
        }
    }

    /// Start the worker thread and register the local console session.
    /// The local user is always session 0.
    pub fn connect(&mut self) -> Result<SessionId, ControlError> {
        if self.connected {
            return Ok(SessionId(0));
        }
        let Some(control_rx) = self.control_rx.take() else {
            return Err(ControlError::Stopped);
        };

        let local = SessionId(0);
        self.sessions
            .register(UserSession::new(local, Arc::new(ClientConsole)));

        let worker = Worker {
            env_id: self.env_id,
            control_rx,
            control_tx: self.control_tx.clone(),
            sessions: self.sessions.clone(),
            active_flows: FxHashMap::default(),
            active_queues: Vec::new(),
            ingest: IngestService::new(),
        };
        let handle = std::thread::Builder::new()
            .name(format!("rtengine-worker-{}", self.env_id))
            .spawn(move || worker.run())
            .map_err(|e| ControlError::Rejected(format!("cannot spawn worker: {}", e)))?;
        self.worker = Some(handle);
        self.connected = true;
        Ok(local)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Register an additional session with its own console.
    pub fn register_session(&mut self, console: Arc<dyn SessionConsole>) -> SessionId {
        let id = SessionId(self.next_session_id);
        self.next_session_id += 1;
        self.sessions.register(UserSession::new(id, console));
        id
    }

    /// Disconnect a session: drop all of its watch subscriptions, then
    /// remove it from the registry.
    pub fn disconnect_session(&mut self, id: SessionId) -> Result<(), ControlError> {
        for flow in self.list_watched(id)? {
            self.unwatch_flow(id, flow)?;
        }
        self.sessions.remove(id);
        Ok(())
    }

    /// Parse, elaborate, plan and deploy one statement.
    pub fn submit(
        &mut self,
        query: &str,
        options: &std::collections::HashMap<String, String>,
    ) -> SubmitResponse {
        let mut messages = String::new();

        let mut stmt = match rtengine_parser::parse(query) {
            Ok(stmt) => stmt,
            Err(e) => {
                messages.push_str(&format!("{}\n(Could not parse command)\n", e));
                return SubmitResponse {
                    messages,
                    flow_id: None,
                };
            }
        };

        // The engine owns the flow map, so SHOW FLOWS is served here.
        if matches!(stmt, Stmt::ShowFlows) {
            match self.list_flows() {
                Ok(flows) => {
                    for info in flows.values() {
                        messages.push_str(&format!("{}: {}\n", info.id, info.query));
                    }
                }
                Err(e) => messages.push_str(&format!("Error listing flows: {}\n", e)),
            }
            return SubmitResponse {
                messages,
                flow_id: None,
            };
        }

        if let Err(e) = check::analyze(&mut stmt, &self.root_symbols) {
            messages.push_str(&format!("Error processing command: {}\n", e));
            return SubmitResponse {
                messages,
                flow_id: None,
            };
        }

        let mut ctx = PlanContext::new(options.clone());
        if let Err(e) = create_exec_plan(&stmt, &mut self.root_symbols, &mut ctx, query) {
            messages.push_str(&format!("Error processing plan: {}\n", e));
            return SubmitResponse {
                messages,
                flow_id: None,
            };
        }
        messages.push_str(&ctx.messages);

        let mut flow_id = None;
        if let Some(mut spec) = ctx.spec.take() {
            if let Err(e) = propagate_schemas(&mut spec) {
                messages.push_str(&format!("Error processing plan: {}\n", e));
                return SubmitResponse {
                    messages,
                    flow_id: None,
                };
            }
            if ctx.explain {
                messages.push_str("Execution plan:\n");
                messages.push_str(&spec.to_string());
                messages.push('\n');
            } else {
                match self.add_flow(spec, options) {
                    Ok(id) => flow_id = id,
                    Err(e) => messages.push_str(&format!("Error deploying flow: {}\n", e)),
                }
            }
        }

        SubmitResponse { messages, flow_id }
    }

    /// Lower a flow spec to a physical flow and hand it to the worker.
    /// Returns None for an empty spec (DDL-only statements).
    pub fn add_flow(
        &mut self,
        mut spec: FlowSpec,
        options: &std::collections::HashMap<String, String>,
    ) -> Result<Option<FlowId>, ControlError> {
        if spec.dag.is_empty() {
            return Ok(None);
        }

        let autowatch = options
            .get(AUTO_WATCH_FLOW_KEY)
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(DEFAULT_AUTO_WATCH_FLOW);
        let submitter = options
            .get(SUBMITTER_SESSION_ID_KEY)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        let autowatch_session = autowatch.then_some(SessionId(submitter));

        let id = FlowId(self.next_flow_id);
        self.next_flow_id += 1;

        let builder = LocalFlowBuilder::new(id, self.memory_outputs.clone());
        let flow = builder
            .build(&mut spec, autowatch_session)
            .map_err(|e: PlanError| ControlError::Rejected(e.message))?;
        if flow.dag.is_empty() {
            return Ok(None);
        }

        self.send(ControlOp::AddFlow(Box::new(flow)))?;
        Ok(Some(id))
    }

    pub fn cancel_flow(&self, id: FlowId) -> Result<(), ControlError> {
        self.send(ControlOp::CancelFlow(id))
    }

    pub fn cancel_all(&self) -> Result<(), ControlError> {
        self.send(ControlOp::CancelAll)
    }

    /// Await flow termination. Returns immediately with true when the
    /// flow is already gone.
    pub fn join_flow(&self, id: FlowId) -> Result<bool, ControlError> {
        let slot = ResultSlot::new();
        self.send(ControlOp::Join(id, slot.clone()))?;
        Ok(slot.wait().unwrap_or(false))
    }

    /// Await flow termination for at most `timeout`; false means the
    /// flow was still running when the wait expired.
    pub fn join_flow_timeout(
        &self,
        id: FlowId,
        timeout: Duration,
    ) -> Result<bool, ControlError> {
        let slot = ResultSlot::new();
        self.send(ControlOp::Join(id, slot.clone()))?;
        Ok(slot.wait_timeout(timeout).unwrap_or(false))
    }

    pub fn list_flows(&self) -> Result<BTreeMap<FlowId, FlowInfo>, ControlError> {
        let slot = ResultSlot::new();
        self.send(ControlOp::ListFlows(slot.clone()))?;
        slot.wait().ok_or(ControlError::Stopped)
    }

    pub fn watch_flow(&self, session: SessionId, flow: FlowId) -> Result<(), ControlError> {
        self.send(ControlOp::WatchFlow(WatchRequest { session, flow }))
    }

    pub fn unwatch_flow(
        &self,
        session: SessionId,
        flow: FlowId,
    ) -> Result<(), ControlError> {
        self.send(ControlOp::UnwatchFlow(WatchRequest { session, flow }))
    }

    pub fn list_watched(&self, session: SessionId) -> Result<Vec<FlowId>, ControlError> {
        let slot = ResultSlot::new();
        self.send(ControlOp::GetWatchList(session, slot.clone()))?;
        slot.wait().ok_or(ControlError::Stopped)
    }

    /// Deliver an event to every deployed source reading the named
    /// stream, through the sink-context bindings.
    pub fn inject(&self, stream: &str, event: Event) -> Result<usize, ControlError> {
        let binding = match self.root_symbols.lookup_stream(stream) {
            Some(sym) => sym.source.clone().unwrap_or_else(|| sym.name.clone()),
            None => return Err(ControlError::UnknownSource(stream.to_string())),
        };
        let prefix = format!("env{}:{}#", self.env_id, binding);
        let delivered = SinkBindings::global().inject_matching(&prefix, &event);
        Ok(delivered)
    }

    /// Signal natural end-of-stream to every deployed source reading the
    /// named stream. Each source completes, completion propagates to its
    /// sinks, and the affected flows end on their own.
    pub fn end_stream(&self, stream: &str) -> Result<usize, ControlError> {
        let binding = match self.root_symbols.lookup_stream(stream) {
            Some(sym) => sym.source.clone().unwrap_or_else(|| sym.name.clone()),
            None => return Err(ControlError::UnknownSource(stream.to_string())),
        };
        let prefix = format!("env{}:{}#", self.env_id, binding);
        let injectors = SinkBindings::global().lookup_matching(&prefix);
        for injector in &injectors {
            injector.complete();
        }
        Ok(injectors.len())
    }

    /// Snapshot of a named memory output.
    pub fn memory_output(&self, name: &str) -> Option<Vec<Event>> {
        self.memory_outputs.snapshot(name)
    }

    /// Cancel everything and stop the worker thread.
    pub fn shutdown(&mut self) {
        if !self.connected {
            return;
        }
        let _ = self.send(ControlOp::CancelAll);
        let _ = self.send(ControlOp::ShutdownThread);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        self.connected = false;
    }

    fn send(&self, op: ControlOp) -> Result<(), ControlError> {
        self.control_tx.send(op).map_err(|_| ControlError::Stopped)
    }
}

impl Drop for LocalEnv {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Reference to one live operator's pending queue in the active set.
struct QueueRef {
    flow: FlowId,
    node: usize,
    queue: EventQueue,
}

/// Runtime record of one deployed flow.
struct ActiveFlowData {
    flow: LocalFlow,
    subscribers: Vec<UserSession>,
    join_waiters: Vec<ResultSlot<bool>>,
    live_sinks: usize,
}

/// The single worker thread owning all flow state.
struct Worker {
    env_id: u64,
    control_rx: Receiver<ControlOp>,
    control_tx: SyncSender<ControlOp>,
    sessions: Arc<SessionRegistry>,
    active_flows: FxHashMap<FlowId, ActiveFlowData>,
    active_queues: Vec<QueueRef>,
    ingest: IngestService,
}

impl Worker {
    fn run(mut self) {
        let mut pending: Option<ControlOp> = None;

        loop {
            let op = match pending.take() {
                Some(op) => op,
                None => match self.control_rx.recv() {
                    Ok(op) => op,
                    // Environment dropped without shutdown.
                    Err(_) => break,
                },
            };

            if self.dispatch(op) {
                break;
            }

            // Drain data work. Every MAX_STEPS events, peek at the
            // control queue; pending control work preempts further
            // draining, otherwise run for another MAX_STEPS.
            'data: loop {
                let mut any_progress = false;
                let mut steps = 0usize;
                let mut qi = 0;
                while qi < self.active_queues.len() {
                    let (flow, node, queue) = {
                        let entry = &self.active_queues[qi];
                        (entry.flow, entry.node, entry.queue.clone())
                    };
                    loop {
                        if !self.is_live(flow, node) {
                            break;
                        }
                        let Some(event) = queue.pop() else {
                            break;
                        };
                        steps += self.drive_event(flow, node, event);
                        any_progress = true;
                        if steps > MAX_STEPS {
                            match self.control_rx.try_recv() {
                                Ok(op) => {
                                    pending = Some(op);
                                    break 'data;
                                }
                                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                                    steps = 0;
                                }
                            }
                        }
                    }
                    qi += 1;
                }
                if !any_progress {
                    break;
                }
            }
        }

        self.ingest.stop();
        debug!(env = self.env_id, "worker thread exiting");
    }

    /// Execute one control operation; true means shutdown.
    fn dispatch(&mut self, op: ControlOp) -> bool {
        match op {
            ControlOp::AddFlow(flow) => self.deploy_flow(*flow),
            ControlOp::CancelFlow(id) => self.cancel_flow(id),
            ControlOp::CancelAll => self.cancel_all(),
            ControlOp::ShutdownThread => return true,
            ControlOp::Noop => {}
            ControlOp::ElementComplete(flow, node) => self.element_complete(flow, node),
            ControlOp::Join(id, waiter) => match self.active_flows.get_mut(&id) {
                // Already gone: report success immediately.
                None => waiter.fill(true),
                Some(afd) => afd.join_waiters.push(waiter),
            },
            ControlOp::ListFlows(slot) => {
                let mut out = BTreeMap::new();
                for (id, afd) in &self.active_flows {
                    out.insert(
                        *id,
                        FlowInfo {
                            id: *id,
                            query: afd.flow.query.clone(),
                        },
                    );
                }
                slot.fill(out);
            }
            ControlOp::WatchFlow(req) => self.watch(req, true),
            ControlOp::UnwatchFlow(req) => self.watch(req, false),
            ControlOp::GetWatchList(session, slot) => {
                slot.fill(self.watch_list(session));
            }
        }
        false
    }

    fn is_live(&self, flow: FlowId, node: usize) -> bool {
        self.active_flows
            .get(&flow)
            .is_some_and(|afd| !afd.flow.dag.node(node).closed)
    }

    /// Open operators sinks-first, register queues, and activate the
    /// flow. Any open failure closes what was opened, registers nothing,
    /// and informs the subscriber.
    fn deploy_flow(&mut self, mut flow: LocalFlow) {
        if flow.dag.is_empty() {
            return;
        }
        let id = flow.id;

        let mut subscribers = Vec::new();
        if let Some(session_id) = flow.autowatch_session {
            match self.sessions.get(session_id) {
                Some(session) => subscribers.push(session),
                None => warn!(session = session_id.0, "invalid submitter session id"),
            }
        }

        if flow.requires_ingest {
            self.ingest.start();
        }

        // Open in reverse-BFS order so sinks are ready before sources.
        let order = flow.dag.reverse_bfs_order();
        let mut opened = Vec::new();
        let mut failure = None;
        for idx in order {
            let env_id = self.env_id;
            let control_tx = self.control_tx.clone();
            let node = flow.dag.node_mut(idx);
            match node.op.open() {
                Ok(()) => {
                    node.opened = true;
                    opened.push(idx);
                    if let Some(binding) = &node.source_binding {
                        let key = format!("env{}:{}#{}-{}", env_id, binding, id.0, idx);
                        SinkBindings::global().bind(
                            &key,
                            EventInjector::new(node.queue.clone(), control_tx, id, idx),
                        );
                        node.bound_key = Some(key);
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            error!(flow = %id, error = %e, "failed to deploy flow");
            for idx in opened.into_iter().rev() {
                let node = flow.dag.node_mut(idx);
                if let Some(key) = node.bound_key.take() {
                    SinkBindings::global().drop_binding(&key);
                }
                if let Err(close_err) = node.op.close() {
                    error!(flow = %id, operator = %node.name, error = %close_err,
                        "error closing operator after failed deploy");
                }
                node.closed = true;
            }
            for session in &subscribers {
                session.send_err(&format!("Flow deployment failed: {}", e));
            }
            return;
        }

        for idx in 0..flow.dag.len() {
            self.active_queues.push(QueueRef {
                flow: id,
                node: idx,
                queue: flow.dag.node(idx).queue.clone(),
            });
        }

        let live_sinks = flow.sink_count();
        info!(flow = %id, operators = flow.dag.len(), "deployed flow");
        self.active_flows.insert(
            id,
            ActiveFlowData {
                flow,
                subscribers,
                join_waiters: Vec::new(),
                live_sinks,
            },
        );
    }

    /// Close operators sources-first (so upstream stops emitting before
    /// downstream closes), unregister queues, and signal join waiters.
    /// Per-operator close errors are logged and do not abort the cancel.
    fn cancel_flow(&mut self, id: FlowId) {
        info!(flow = %id, "closing flow");
        let Some(mut afd) = self.active_flows.remove(&id) else {
            error!(flow = %id, "cannot cancel flow: no flow for id");
            return;
        };

        for idx in afd.flow.dag.bfs_order() {
            let node = afd.flow.dag.node_mut(idx);
            if let Some(key) = node.bound_key.take() {
                SinkBindings::global().drop_binding(&key);
            }
            if !node.closed {
                if let Err(e) = node.op.close() {
                    error!(flow = %id, operator = %node.name, error = %e,
                        "error closing operator");
                }
                node.closed = true;
            }
        }

        self.active_queues.retain(|q| q.flow != id);

        for waiter in afd.join_waiters.drain(..) {
            waiter.fill(true);
        }
    }

    fn cancel_all(&mut self) {
        info!("closing all flows");
        let ids: Vec<FlowId> = self.active_flows.keys().copied().collect();
        for id in ids {
            self.cancel_flow(id);
        }
    }

    /// Deliver one event to a node, routing emissions depth-first along
    /// direct-coupled edges. Returns the number of `take_event` calls.
    fn drive_event(&mut self, flow_id: FlowId, node_idx: usize, event: Event) -> usize {
        let mut steps = 0;
        let mut stack = vec![(node_idx, event)];
        let mut completions = Vec::new();

        while let Some((idx, ev)) = stack.pop() {
            let Some(afd) = self.active_flows.get_mut(&flow_id) else {
                return steps;
            };
            let node = afd.flow.dag.node_mut(idx);
            if node.closed {
                continue;
            }
            let mut out = EmitBuffer::new();
            if let Err(e) = node.op.take_event(ev, &mut out) {
                // Policy: log, drop the event, keep the operator running.
                error!(flow = %flow_id, operator = %node.name, error = %e,
                    "event processing failed; event dropped");
            }
            steps += 1;
            if out.complete {
                completions.push(idx);
            }
            let context = node.context.clone();
            match context {
                ContextKind::Direct(downstream) => {
                    for ev in out.events.into_iter().rev() {
                        stack.push((downstream, ev));
                    }
                }
                ContextKind::Queue(downstreams) => {
                    for ev in out.events {
                        for &d in &downstreams {
                            afd.flow.dag.node(d).queue.push(ev.clone());
                        }
                    }
                }
                ContextKind::Sink => {
                    for ev in &out.events {
                        for session in &afd.subscribers {
                            session.send_event(flow_id, ev);
                        }
                    }
                }
            }
        }

        for idx in completions {
            self.element_complete(flow_id, idx);
        }
        steps
    }

    /// Route a completion flush the same way ordinary output is routed.
    fn route_flush(&mut self, flow_id: FlowId, idx: usize, out: EmitBuffer) {
        let Some(afd) = self.active_flows.get_mut(&flow_id) else {
            return;
        };
        let context = afd.flow.dag.node(idx).context.clone();
        match context {
            ContextKind::Direct(downstream) => {
                for ev in out.events {
                    self.drive_event(flow_id, downstream, ev);
                }
            }
            ContextKind::Queue(downstreams) => {
                for ev in out.events {
                    for &d in &downstreams {
                        afd.flow.dag.node(d).queue.push(ev.clone());
                    }
                }
            }
            ContextKind::Sink => {
                for ev in &out.events {
                    for session in &afd.subscribers {
                        session.send_event(flow_id, ev);
                    }
                }
            }
        }
    }

    /// An operator has run to its natural end: retire its queue, close
    /// it, and propagate completion downstream. When the last sink of a
    /// flow completes, the whole flow is canceled (idempotent through
    /// the active-map membership check).
    fn element_complete(&mut self, flow_id: FlowId, node_idx: usize) {
        let mut work = vec![node_idx];
        while let Some(idx) = work.pop() {
            // Drain the node's remaining input before retiring it.
            loop {
                let Some(afd) = self.active_flows.get(&flow_id) else {
                    return;
                };
                if afd.flow.dag.node(idx).closed {
                    break;
                }
                let Some(ev) = afd.flow.dag.node(idx).queue.pop() else {
                    break;
                };
                self.drive_event(flow_id, idx, ev);
            }

            self.active_queues
                .retain(|q| !(q.flow == flow_id && q.node == idx));

            let Some(afd) = self.active_flows.get_mut(&flow_id) else {
                warn!(flow = %flow_id, "element completion for unknown flow");
                return;
            };
            let node = afd.flow.dag.node_mut(idx);
            if let Some(key) = node.bound_key.take() {
                SinkBindings::global().drop_binding(&key);
            }
            if !node.closed {
                if let Err(e) = node.op.close() {
                    error!(flow = %flow_id, operator = %node.name, error = %e,
                        "error closing completed operator");
                }
                node.closed = true;
            }
            let context = node.context.clone();

            match context {
                ContextKind::Direct(downstream) => {
                    self.close_upstream(flow_id, downstream, &mut work);
                }
                ContextKind::Queue(downstreams) => {
                    for downstream in downstreams {
                        // Drain anything still pending before closing.
                        loop {
                            let Some(afd) = self.active_flows.get(&flow_id) else {
                                return;
                            };
                            let Some(ev) = afd.flow.dag.node(downstream).queue.pop() else {
                                break;
                            };
                            self.drive_event(flow_id, downstream, ev);
                        }
                        self.close_upstream(flow_id, downstream, &mut work);
                    }
                }
                ContextKind::Sink => {
                    afd.live_sinks = afd.live_sinks.saturating_sub(1);
                    if afd.live_sinks == 0 {
                        info!(flow = %flow_id, "processing complete for flow");
                        if self.active_flows.contains_key(&flow_id) {
                            self.cancel_flow(flow_id);
                        }
                        return;
                    }
                }
            }
        }
    }

    /// One upstream edge of `idx` has ended. When the last one ends, the
    /// node flushes its windows and completes too.
    fn close_upstream(&mut self, flow_id: FlowId, idx: usize, work: &mut Vec<usize>) {
        let Some(afd) = self.active_flows.get_mut(&flow_id) else {
            return;
        };
        let node = afd.flow.dag.node_mut(idx);
        if node.closed {
            return;
        }
        node.open_parents = node.open_parents.saturating_sub(1);
        if node.open_parents > 0 {
            return;
        }

        let mut out = EmitBuffer::new();
        if let Err(e) = node.op.complete_window(&mut out) {
            error!(flow = %flow_id, operator = %node.name, error = %e,
                "error completing window");
        }
        self.route_flush(flow_id, idx, out);
        work.push(idx);
    }

    fn watch(&mut self, req: WatchRequest, is_watch: bool) {
        let Some(session) = self.sessions.get(req.session) else {
            warn!(session = req.session.0, "cannot watch flow: no such session");
            return;
        };
        let Some(afd) = self.active_flows.get_mut(&req.flow) else {
            warn!(flow = %req.flow, "cannot watch flow: no such flow");
            return;
        };
        if is_watch {
            if !afd.subscribers.iter().any(|s| s.id == session.id) {
                afd.subscribers.push(session);
            }
        } else {
            afd.subscribers.retain(|s| s.id != req.session);
        }
    }

    fn watch_list(&self, session: SessionId) -> Vec<FlowId> {
        if self.sessions.get(session).is_none() {
            error!(session = session.0, "watch list request for unknown session");
            return Vec::new();
        }
        let mut flows: Vec<FlowId> = self
            .active_flows
            .iter()
            .filter(|(_, afd)| afd.subscribers.iter().any(|s| s.id == session))
            .map(|(id, _)| *id)
            .collect();
        flows.sort_unstable();
        flows
    }
}
