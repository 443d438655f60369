//! Logical flow specifications
//!
//! `create_exec_plan` lowers a typed statement to a [`FlowSpec`], a DAG
//! of plan nodes. SELECT produces a chain of source(s), join, filter,
//! aggregation or projection, and a terminal sink; DDL statements mutate
//! the root symbol table and produce no spec. `propagate_schemas` then
//! walks the spec top-down filling in every node's output schema.

use crate::dag::Dag;
use crate::error::PlanError;
use rtengine_core::ast::{
    Expr, ExprKind, JoinKeySpec, SelectItem, SelectStmt, Stmt, StreamRef,
};
use rtengine_core::symbol::{StreamSymbol, Symbol, SymbolTable};
use rtengine_core::types::Type;
use std::collections::HashMap;
use std::fmt;

/// Submission option: route the flow's terminal sink to this named
/// memory output instead of the console.
pub const MEMORY_OUTPUT_KEY: &str = "rtengine.flow.output.memory";

/// Join window applied when neither input declares one.
pub const DEFAULT_JOIN_WINDOW_NS: i64 = 60_000_000_000;

/// An ordered (name, type) record layout.
pub type Schema = Vec<(String, Type)>;

fn schema_has(schema: &Schema, name: &str) -> bool {
    schema.iter().any(|(n, _)| n == name)
}

/// A logical flow: plan nodes with schemas, plus the originating query.
pub struct FlowSpec {
    pub dag: Dag<PlanNode>,
    pub query: String,
}

impl fmt::Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dag)
    }
}

pub struct PlanNode {
    pub kind: PlanNodeKind,
    /// Output schema, filled by [`propagate_schemas`]
    pub schema: Schema,
}

impl PlanNode {
    pub fn new(kind: PlanNodeKind) -> Self {
        Self {
            kind,
            schema: Vec::new(),
        }
    }
}

pub enum PlanNodeKind {
    SourceStream {
        /// Name the stream is known by inside the statement
        scope: String,
        stream: String,
        /// Ingest binding name
        binding: String,
        /// True when events arrive through the external ingest service
        external: bool,
        fields: Schema,
        window_ns: Option<i64>,
    },
    Filter {
        predicate: Expr,
    },
    Project {
        exprs: Vec<Expr>,
        labels: Vec<String>,
    },
    Aggregate {
        items: Vec<AggItem>,
        window_ns: Option<i64>,
    },
    Join {
        key: JoinKeySpec,
        left: String,
        right: String,
        window_ns: i64,
    },
    ConsoleOutput {
        fields: Vec<String>,
    },
    MemoryOutput {
        name: String,
        fields: Vec<String>,
    },
}

/// One projected column of an aggregation, in projection order.
#[derive(Clone)]
pub enum AggItem {
    /// A grouping key
    Key { label: String, expr: Expr },
    /// An aggregate call
    Call(AggCall),
}

#[derive(Clone)]
pub struct AggCall {
    pub label: String,
    pub func: AggFunc,
    pub arg: Option<Expr>,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<AggFunc> {
        match name {
            "count" => Some(AggFunc::Count),
            "sum" => Some(AggFunc::Sum),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "avg" => Some(AggFunc::Avg),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Avg => "avg",
        }
    }
}

// Stringification used by EXPLAIN's "Execution plan:" output.
impl fmt::Display for PlanNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            PlanNodeKind::SourceStream { scope, stream, .. } => {
                if scope == stream {
                    writeln!(f, "SourceStream({})", stream)
                } else {
                    writeln!(f, "SourceStream({} AS {})", stream, scope)
                }
            }
            PlanNodeKind::Filter { predicate } => writeln!(f, "Filter({})", predicate),
            PlanNodeKind::Project { labels, .. } => {
                writeln!(f, "Project({})", labels.join(", "))
            }
            PlanNodeKind::Aggregate { items, .. } => {
                let labels: Vec<&str> = items
                    .iter()
                    .map(|item| match item {
                        AggItem::Key { label, .. } => label.as_str(),
                        AggItem::Call(call) => call.label.as_str(),
                    })
                    .collect();
                writeln!(f, "Aggregate({})", labels.join(", "))
            }
            PlanNodeKind::Join {
                key, left, right, ..
            } => {
                let pairs: Vec<String> = key
                    .left
                    .iter()
                    .zip(&key.right)
                    .map(|(l, r)| format!("{}.{} = {}.{}", left, l, right, r))
                    .collect();
                writeln!(f, "Join({})", pairs.join(" AND "))
            }
            PlanNodeKind::ConsoleOutput { fields } => {
                writeln!(f, "ConsoleOutput({})", fields.join(", "))
            }
            PlanNodeKind::MemoryOutput { name, fields } => {
                writeln!(f, "MemoryOutput({}: {})", name, fields.join(", "))
            }
        }
    }
}

/// Carries submission options and accumulates messages across planning.
pub struct PlanContext {
    pub options: HashMap<String, String>,
    pub messages: String,
    pub explain: bool,
    pub spec: Option<FlowSpec>,
}

impl PlanContext {
    pub fn new(options: HashMap<String, String>) -> Self {
        Self {
            options,
            messages: String::new(),
            explain: false,
            spec: None,
        }
    }
}

/// Lower one elaborated statement. DDL executes immediately against the
/// root symbol table; SELECT leaves a flow spec in the context.
pub fn create_exec_plan(
    stmt: &Stmt,
    symbols: &mut SymbolTable,
    ctx: &mut PlanContext,
    query: &str,
) -> Result<(), PlanError> {
    match stmt {
        Stmt::Select(sel) => plan_select(sel, symbols, ctx, query),

        Stmt::Explain(child) => {
            create_exec_plan(child, symbols, ctx, query)?;
            ctx.messages.push_str("Parse tree:\n");
            let mut tree = String::new();
            child.format(&mut tree, 0);
            ctx.messages.push_str(&tree);
            ctx.messages.push('\n');
            ctx.explain = true;
            Ok(())
        }

        Stmt::CreateStream(cs) => {
            symbols.define(
                cs.name.clone(),
                Symbol::Stream(StreamSymbol {
                    name: cs.name.clone(),
                    schema: cs
                        .fields
                        .iter()
                        .map(|fd| (fd.name.clone(), fd.ty.clone()))
                        .collect(),
                    source: cs.source.clone(),
                }),
            );
            ctx.messages
                .push_str(&format!("Stream '{}' created.\n", cs.name));
            Ok(())
        }

        Stmt::DropStream(name) => {
            symbols.remove(name);
            ctx.messages
                .push_str(&format!("Stream '{}' dropped.\n", name));
            Ok(())
        }

        Stmt::Describe(name) => {
            let stream = symbols
                .lookup_stream(name)
                .ok_or_else(|| PlanError::new(format!("unknown stream '{}'", name)))?;
            ctx.messages.push_str(&format!("stream {}\n", stream.name));
            for (field, ty) in &stream.schema {
                ctx.messages.push_str(&format!("  {} {}\n", field, ty));
            }
            Ok(())
        }

        Stmt::ShowStreams => {
            for name in symbols.stream_names() {
                ctx.messages.push_str(name);
                ctx.messages.push('\n');
            }
            Ok(())
        }

        Stmt::ShowFunctions => {
            for name in symbols.function_names() {
                if let Some(func) = symbols.lookup_function(name) {
                    ctx.messages.push_str(&format!("{}\n", func));
                }
            }
            Ok(())
        }

        // Served directly by the engine, which owns the flow map.
        Stmt::ShowFlows => Ok(()),
    }
}

fn source_node(stream_ref: &StreamRef, sym: &StreamSymbol) -> PlanNode {
    PlanNode::new(PlanNodeKind::SourceStream {
        scope: stream_ref.scope_name().to_string(),
        stream: sym.name.clone(),
        binding: sym.source.clone().unwrap_or_else(|| sym.name.clone()),
        external: sym.is_external(),
        fields: sym.schema.clone(),
        window_ns: stream_ref.window.map(|w| w.range_ns),
    })
}

fn plan_select(
    sel: &SelectStmt,
    symbols: &mut SymbolTable,
    ctx: &mut PlanContext,
    query: &str,
) -> Result<(), PlanError> {
    let mut dag: Dag<PlanNode> = Dag::new();

    let left_sym = symbols
        .lookup_stream(&sel.source.name)
        .ok_or_else(|| PlanError::new(format!("unknown stream '{}'", sel.source.name)))?
        .clone();
    let src = dag.add_root(source_node(&sel.source, &left_sym));
    let mut tail = src;

    if let Some(join) = &sel.join {
        let right_sym = symbols
            .lookup_stream(&join.right.name)
            .ok_or_else(|| {
                PlanError::new(format!("unknown stream '{}'", join.right.name))
            })?
            .clone();
        let right_src = dag.add_root(source_node(&join.right, &right_sym));

        let key = join
            .key
            .clone()
            .ok_or_else(|| PlanError::new("join has no key descriptor"))?;
        let window_ns = sel
            .source
            .window
            .or(join.right.window)
            .map(|w| w.range_ns)
            .unwrap_or(DEFAULT_JOIN_WINDOW_NS);
        let join_node = dag.add_node(PlanNode::new(PlanNodeKind::Join {
            key,
            left: sel.source.scope_name().to_string(),
            right: join.right.scope_name().to_string(),
            window_ns,
        }));
        dag.add_edge(src, join_node);
        dag.add_edge(right_src, join_node);
        tail = join_node;
    }

    if let Some(predicate) = &sel.where_clause {
        let filter = dag.add_node(PlanNode::new(PlanNodeKind::Filter {
            predicate: predicate.clone(),
        }));
        dag.add_edge(tail, filter);
        tail = filter;
    }

    let is_agg = |name: &str| symbols.is_aggregate_function(name);
    let aggregating = sel.has_aggregates(&is_agg) || !sel.group_by.is_empty();

    let mut output_fields = Vec::with_capacity(sel.items.len());
    if aggregating {
        let mut items = Vec::with_capacity(sel.items.len());
        for item in &sel.items {
            let SelectItem::Expr { expr, label, .. } = item else {
                return Err(PlanError::new("projection contains an unexpanded '*'"));
            };
            let label = label
                .clone()
                .ok_or_else(|| PlanError::new("projection is missing a field label"))?;
            output_fields.push(label.clone());

            match &expr.kind {
                ExprKind::Call { name, args } if is_agg(name) => {
                    let func = AggFunc::from_name(name).ok_or_else(|| {
                        PlanError::new(format!("no aggregate implementation for '{}'", name))
                    })?;
                    items.push(AggItem::Call(AggCall {
                        label,
                        func,
                        arg: args.first().cloned(),
                        ty: expr.checked_ty(),
                    }));
                }
                _ => items.push(AggItem::Key {
                    label,
                    expr: expr.clone(),
                }),
            }
        }

        let agg = dag.add_node(PlanNode::new(PlanNodeKind::Aggregate {
            items,
            window_ns: sel.source.window.map(|w| w.range_ns),
        }));
        dag.add_edge(tail, agg);
        tail = agg;

        if let Some(having) = &sel.having {
            let filter = dag.add_node(PlanNode::new(PlanNodeKind::Filter {
                predicate: having.clone(),
            }));
            dag.add_edge(tail, filter);
            tail = filter;
        }
    } else {
        let mut exprs = Vec::with_capacity(sel.items.len());
        let mut labels = Vec::with_capacity(sel.items.len());
        for item in &sel.items {
            let SelectItem::Expr { expr, label, .. } = item else {
                return Err(PlanError::new("projection contains an unexpanded '*'"));
            };
            let label = label
                .clone()
                .ok_or_else(|| PlanError::new("projection is missing a field label"))?;
            exprs.push(expr.clone());
            output_fields.push(label.clone());
            labels.push(label);
        }
        let project = dag.add_node(PlanNode::new(PlanNodeKind::Project { exprs, labels }));
        dag.add_edge(tail, project);
        tail = project;
    }

    let sink = match ctx.options.get(MEMORY_OUTPUT_KEY) {
        Some(name) => dag.add_node(PlanNode::new(PlanNodeKind::MemoryOutput {
            name: name.clone(),
            fields: output_fields,
        })),
        None => dag.add_node(PlanNode::new(PlanNodeKind::ConsoleOutput {
            fields: output_fields,
        })),
    };
    dag.add_edge(tail, sink);

    ctx.spec = Some(FlowSpec {
        dag,
        query: query.to_string(),
    });
    Ok(())
}

/// Collect the event-field names an expression reads.
fn collect_fields(expr: &Expr, out: &mut Vec<String>) {
    match &expr.kind {
        ExprKind::Ident(name) => out.push(name.clone()),
        ExprKind::FieldRef { stream, field } => out.push(format!("{}.{}", stream, field)),
        ExprKind::Unary { expr, .. } => collect_fields(expr, out),
        ExprKind::Binary { left, right, .. } => {
            collect_fields(left, out);
            collect_fields(right, out);
        }
        ExprKind::Call { args, .. } => {
            for arg in args {
                collect_fields(arg, out);
            }
        }
        ExprKind::Const { .. } => {}
    }
}

fn verify_fields(
    exprs: &[&Expr],
    input: &Schema,
    node: &str,
) -> Result<(), PlanError> {
    let mut fields = Vec::new();
    for expr in exprs {
        collect_fields(expr, &mut fields);
    }
    for field in fields {
        if !schema_has(input, &field) {
            return Err(PlanError::new(format!(
                "field '{}' is not present in the input schema of {}",
                field, node
            )));
        }
    }
    Ok(())
}

/// Walk the spec top-down, computing every node's output schema from its
/// inputs and parameters. Nodes referencing absent input fields fail.
pub fn propagate_schemas(spec: &mut FlowSpec) -> Result<(), PlanError> {
    let order = spec.dag.bfs_order();
    for idx in order {
        let parents = spec.dag.parents(idx).to_vec();
        let input: Schema = parents
            .first()
            .map(|&p| spec.dag.node(p).schema.clone())
            .unwrap_or_default();

        let schema = match &spec.dag.node(idx).kind {
            PlanNodeKind::SourceStream { fields, .. } => fields.clone(),

            PlanNodeKind::Filter { predicate } => {
                verify_fields(&[predicate], &input, "Filter")?;
                input
            }

            PlanNodeKind::Project { exprs, labels } => {
                let refs: Vec<&Expr> = exprs.iter().collect();
                verify_fields(&refs, &input, "Project")?;
                labels
                    .iter()
                    .zip(exprs)
                    .map(|(label, expr)| (label.clone(), expr.checked_ty()))
                    .collect()
            }

            PlanNodeKind::Aggregate { items, .. } => {
                let mut refs: Vec<&Expr> = Vec::new();
                for item in items {
                    match item {
                        AggItem::Key { expr, .. } => refs.push(expr),
                        AggItem::Call(call) => {
                            if let Some(arg) = &call.arg {
                                refs.push(arg);
                            }
                        }
                    }
                }
                verify_fields(&refs, &input, "Aggregate")?;
                items
                    .iter()
                    .map(|item| match item {
                        AggItem::Key { label, expr } => (label.clone(), expr.checked_ty()),
                        AggItem::Call(call) => (call.label.clone(), call.ty.clone()),
                    })
                    .collect()
            }

            PlanNodeKind::Join {
                key, left, right, ..
            } => {
                if parents.len() != 2 {
                    return Err(PlanError::new("join does not have two inputs"));
                }
                let left_schema = spec.dag.node(parents[0]).schema.clone();
                let right_schema = spec.dag.node(parents[1]).schema.clone();
                for field in &key.left {
                    if !schema_has(&left_schema, field) {
                        return Err(PlanError::new(format!(
                            "join key '{}' is not present in input '{}'",
                            field, left
                        )));
                    }
                }
                for field in &key.right {
                    if !schema_has(&right_schema, field) {
                        return Err(PlanError::new(format!(
                            "join key '{}' is not present in input '{}'",
                            field, right
                        )));
                    }
                }
                let mut schema = Schema::new();
                for (name, ty) in &left_schema {
                    schema.push((format!("{}.{}", left, name), ty.clone()));
                }
                for (name, ty) in &right_schema {
                    schema.push((format!("{}.{}", right, name), ty.clone()));
                }
                schema
            }

            PlanNodeKind::ConsoleOutput { fields }
            | PlanNodeKind::MemoryOutput { fields, .. } => {
                for field in fields {
                    if !schema_has(&input, field) {
                        return Err(PlanError::new(format!(
                            "output field '{}' is not present in the sink input schema",
                            field
                        )));
                    }
                }
                input
                    .iter()
                    .filter(|(name, _)| fields.contains(name))
                    .cloned()
                    .collect()
            }
        };

        spec.dag.node_mut(idx).schema = schema;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtengine_core::ast::BinOp;
    use rtengine_core::check;
    use rtengine_core::symbol::{StreamSymbol, Symbol};
    use rtengine_core::value::Value;

    fn table_with(streams: &[(&str, &[(&str, Type)])]) -> SymbolTable {
        let mut table = SymbolTable::with_builtins();
        for (name, fields) in streams {
            table.define(
                *name,
                Symbol::Stream(StreamSymbol {
                    name: name.to_string(),
                    schema: fields
                        .iter()
                        .map(|(n, t)| (n.to_string(), t.clone()))
                        .collect(),
                    source: None,
                }),
            );
        }
        table
    }

    fn planned(symbols: &mut SymbolTable, query: &str) -> FlowSpec {
        let mut stmt = rtengine_parser::parse(query).unwrap();
        check::analyze(&mut stmt, symbols).unwrap();
        let mut ctx = PlanContext::new(HashMap::new());
        create_exec_plan(&stmt, symbols, &mut ctx, query).unwrap();
        ctx.spec.unwrap()
    }

    #[test]
    fn test_select_plan_chain_shape() {
        let mut symbols = table_with(&[("s", &[("a", Type::Int)])]);
        let mut spec = planned(&mut symbols, "SELECT a FROM s WHERE a > 0");
        propagate_schemas(&mut spec).unwrap();

        let order = spec.dag.bfs_order();
        assert_eq!(order.len(), 4);
        assert!(matches!(
            spec.dag.node(order[0]).kind,
            PlanNodeKind::SourceStream { .. }
        ));
        assert!(matches!(
            spec.dag.node(order[1]).kind,
            PlanNodeKind::Filter { .. }
        ));
        assert!(matches!(
            spec.dag.node(order[2]).kind,
            PlanNodeKind::Project { .. }
        ));
        assert!(matches!(
            spec.dag.node(order[3]).kind,
            PlanNodeKind::ConsoleOutput { .. }
        ));
        // Every node carries a computed schema.
        for idx in order {
            assert!(!spec.dag.node(idx).schema.is_empty());
        }
    }

    #[test]
    fn test_join_output_schema_is_qualified() {
        let mut symbols = table_with(&[
            ("l", &[("k", Type::Int), ("x", Type::Str)]),
            ("r", &[("k2", Type::Int)]),
        ]);
        let mut spec = planned(&mut symbols, "SELECT x FROM l JOIN r ON k = k2");
        propagate_schemas(&mut spec).unwrap();

        let order = spec.dag.bfs_order();
        let join_idx = *order
            .iter()
            .find(|&&idx| matches!(spec.dag.node(idx).kind, PlanNodeKind::Join { .. }))
            .unwrap();
        let names: Vec<&str> = spec
            .dag
            .node(join_idx)
            .schema
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["l.k", "l.x", "r.k2"]);
    }

    #[test]
    fn test_propagation_rejects_missing_field() {
        // A hand-altered filter referencing a field the source does not
        // carry must fail during propagation.
        let mut symbols = table_with(&[("s", &[("a", Type::Int)])]);
        let mut spec = planned(&mut symbols, "SELECT a FROM s WHERE a > 0");
        let order = spec.dag.bfs_order();
        let filter_idx = order[1];
        if let PlanNodeKind::Filter { predicate } = &mut spec.dag.node_mut(filter_idx).kind {
            *predicate = Expr::binary(
                BinOp::Gt,
                Expr::ident("phantom"),
                Expr::literal(Value::Int(0)),
            );
        }
        let err = propagate_schemas(&mut spec).unwrap_err();
        assert!(err.message.contains("phantom"));
    }

    #[test]
    fn test_ddl_produces_no_spec_and_mutates_symbols() {
        let mut symbols = SymbolTable::with_builtins();
        let mut stmt = rtengine_parser::parse("CREATE STREAM s (a INT)").unwrap();
        check::analyze(&mut stmt, &symbols).unwrap();
        let mut ctx = PlanContext::new(HashMap::new());
        create_exec_plan(&stmt, &mut symbols, &mut ctx, "ddl").unwrap();
        assert!(ctx.spec.is_none());
        assert!(ctx.messages.contains("created"));
        assert!(symbols.lookup_stream("s").is_some());
    }

    #[test]
    fn test_explain_sets_flag_and_prints_parse_tree() {
        let mut symbols = table_with(&[("s", &[("a", Type::Int)])]);
        let mut stmt = rtengine_parser::parse("EXPLAIN SELECT a FROM s").unwrap();
        check::analyze(&mut stmt, &symbols).unwrap();
        let mut ctx = PlanContext::new(HashMap::new());
        create_exec_plan(&stmt, &mut symbols, &mut ctx, "q").unwrap();
        assert!(ctx.explain);
        assert!(ctx.messages.contains("Parse tree:"));
        assert!(ctx.spec.is_some());
    }

    #[test]
    fn test_memory_output_option_selects_sink() {
        let mut symbols = table_with(&[("s", &[("a", Type::Int)])]);
        let mut stmt = rtengine_parser::parse("SELECT a FROM s").unwrap();
        check::analyze(&mut stmt, &symbols).unwrap();
        let mut options = HashMap::new();
        options.insert(MEMORY_OUTPUT_KEY.to_string(), "out".to_string());
        let mut ctx = PlanContext::new(options);
        create_exec_plan(&stmt, &mut symbols, &mut ctx, "q").unwrap();
        let mut spec = ctx.spec.unwrap();
        let order = spec.dag.bfs_order();
        assert!(matches!(
            &spec.dag.node(*order.last().unwrap()).kind,
            PlanNodeKind::MemoryOutput { name, .. } if name == "out"
        ));
    }

    #[test]
    fn test_aggregate_plan_keeps_projection_order() {
        let mut symbols = table_with(&[(
            "t",
            &[("sym", Type::Str), ("qty", Type::Int)],
        )]);
        let mut spec = planned(
            &mut symbols,
            "SELECT sym, sum(qty) AS total FROM t OVER RANGE 5 SECONDS GROUP BY sym",
        );
        propagate_schemas(&mut spec).unwrap();
        let order = spec.dag.bfs_order();
        let agg_idx = *order
            .iter()
            .find(|&&idx| matches!(spec.dag.node(idx).kind, PlanNodeKind::Aggregate { .. }))
            .unwrap();
        let names: Vec<&str> = spec
            .dag
            .node(agg_idx)
            .schema
            .iter()
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["sym", "total"]);
        if let PlanNodeKind::Aggregate { window_ns, .. } = &spec.dag.node(agg_idx).kind {
            assert_eq!(*window_ns, Some(5_000_000_000));
        }
    }
}
