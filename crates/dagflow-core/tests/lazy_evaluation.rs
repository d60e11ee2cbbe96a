//! Lazy evaluation through the public API.
//!
//! Covers:
//! - cached, idempotent reads
//! - minimal recomputation after a touch (diamond, chains)
//! - fan-out
//! - compute failures and recovery
//! - randomized DAGs checked against a reference model

use std::collections::HashSet;

use dagflow_core::{
    Array, ComputeContext, DType, DataDescriptor, EvalState, Graph, GraphConfig, GraphError,
    InputStrategy, Kernel, KernelError, Layout, Negotiation, NegotiationError, NodeId, Verbosity,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Constant {
    values: Vec<f64>,
}

impl Kernel for Constant {
    fn kind(&self) -> &'static str {
        "Constant"
    }

    fn layout(&self) -> Layout {
        Layout::new().output("value")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.set_output(0, DataDescriptor::new(DType::F64, [self.values.len()]))
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        ctx.output(0)?.assign(&Array::from_vec(self.values.clone()))?;
        Ok(())
    }
}

#[derive(Debug)]
struct Total;

impl Kernel for Total {
    fn kind(&self) -> &'static str {
        "Total"
    }

    fn layout(&self) -> Layout {
        Layout::new()
            .output("result")
            .strategy(InputStrategy::add_input("term"))
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.require_same_shape()?;
        let shape = ctx.input(0)?.shape.clone();
        let dtype = ctx.promoted_dtype()?;
        ctx.set_output(0, DataDescriptor::new(dtype, shape))
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let terms: Vec<&Array> = ctx.inputs().collect();
        let out = ctx.output(0)?;
        out.fill_zero();
        for term in terms {
            out.add_assign(term)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Reciprocal;

impl Kernel for Reciprocal {
    fn kind(&self) -> &'static str {
        "Reciprocal"
    }

    fn layout(&self) -> Layout {
        Layout::new().input("x").output("result")
    }

    fn negotiate(&mut self, ctx: &mut Negotiation<'_>) -> Result<(), NegotiationError> {
        ctx.copy_input_to_outputs(0)
    }

    fn compute(&mut self, ctx: &mut ComputeContext<'_>) -> Result<(), KernelError> {
        let x = ctx.input(0)?.to_f64_vec();
        if x.iter().any(|v| *v == 0.0) {
            return Err(KernelError::failed("division by zero"));
        }
        let recip: Vec<f64> = x.iter().map(|v| 1.0 / v).collect();
        ctx.output(0)?.assign(&Array::from_vec(recip))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn values(graph: &mut Graph, node: NodeId) -> Vec<f64> {
    graph.data(node.output(0)).unwrap().to_f64_vec()
}

fn calls(graph: &Graph, nodes: &[NodeId]) -> Vec<u64> {
    nodes.iter().map(|&n| graph.calls(n).unwrap()).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn idempotent_read_returns_identical_values() {
    let (mut g, total) = Graph::scoped("idempotent", GraphConfig::default(), |g| {
        let a = g.create_node("a", Constant { values: vec![0.1, 0.2, 0.3] })?;
        let b = g.create_node("b", Constant { values: vec![1.0, 2.0, 3.0] })?;
        let total = g.create_node("total", Total)?;
        g.connect_nodes(&[a, b], total)?;
        Ok(total)
    })
    .unwrap();

    let first = g.data(total.output(0)).unwrap().clone();
    let second = g.data(total.output(0)).unwrap().clone();
    assert_eq!(first.as_slice::<f64>(), second.as_slice::<f64>());
    assert_eq!(g.calls(total).unwrap(), 1);
}

#[test]
fn diamond_recomputes_each_node_once() {
    let mut g = Graph::open("diamond");
    let a = g.create_node("a", Constant { values: vec![1.0, 2.0] }).unwrap();
    let b = g.create_node("b", Total).unwrap();
    let c = g.create_node("c", Total).unwrap();
    let d = g.create_node("d", Total).unwrap();
    g.connect_each(a.output(0), &[b, c]).unwrap();
    g.connect_nodes(&[b, c], d).unwrap();
    g.close().unwrap();

    assert_eq!(values(&mut g, d), vec![2.0, 4.0]);
    assert_eq!(calls(&g, &[a, b, c, d]), [1, 1, 1, 1]);

    g.update_node::<Constant, _>(a, |k| k.values = vec![5.0, 6.0])
        .unwrap();
    assert_eq!(values(&mut g, d), vec![10.0, 12.0]);
    assert_eq!(calls(&g, &[a, b, c, d]), [2, 2, 2, 2]);
}

#[test]
fn fan_out_consumers_all_see_updates() {
    let mut g = Graph::open("fan-out");
    let src = g.create_node("src", Constant { values: vec![2.0, 4.0] }).unwrap();
    let readers: Vec<NodeId> = (0..3)
        .map(|i| g.create_node(format!("r{i}"), Reciprocal).unwrap())
        .collect();
    g.connect_each(src.output(0), &readers).unwrap();
    g.close().unwrap();

    for &r in &readers {
        assert_eq!(values(&mut g, r), vec![0.5, 0.25]);
    }
    assert_eq!(g.calls(src).unwrap(), 1);

    g.update_node::<Constant, _>(src, |k| k.values = vec![4.0, 8.0])
        .unwrap();
    for &r in &readers {
        assert!(g.node(r).unwrap().output_at(0).unwrap().is_dirty());
    }
    for &r in &readers {
        assert_eq!(values(&mut g, r), vec![0.25, 0.125]);
    }
    assert_eq!(g.calls(src).unwrap(), 2);
}

#[test]
fn compute_failure_is_reported_and_recoverable() {
    let mut g = Graph::new("failing", GraphConfig::default().with_verbosity(Verbosity::Quiet));
    let src = g.create_node("src", Constant { values: vec![1.0, 0.0] }).unwrap();
    let recip = g.create_node("recip", Reciprocal).unwrap();
    let total = g.create_node("total", Total).unwrap();
    g.connect_to(src.output(0), recip).unwrap();
    g.connect_to(recip.output(0), total).unwrap();
    g.close().unwrap();

    let err = g.data(total.output(0)).unwrap_err();
    match &err {
        GraphError::NodeCompute { node, id, source } => {
            assert_eq!(node, "recip");
            assert_eq!(*id, recip);
            assert_eq!(source.to_string(), "division by zero");
        }
        other => panic!("expected NodeCompute, got {other:?}"),
    }
    assert!(err.to_string().contains("recip"));
    assert_eq!(g.node(recip).unwrap().state(), EvalState::Invalidated);
    assert_eq!(g.node(total).unwrap().state(), EvalState::Invalidated);

    // A second read runs the kernel again and fails the same way.
    assert!(g.data(total.output(0)).is_err());
    assert_eq!(g.calls(recip).unwrap(), 2);
    assert_eq!(g.calls(src).unwrap(), 1);

    g.update_node::<Constant, _>(src, |k| k.values = vec![1.0, 4.0])
        .unwrap();
    assert_eq!(values(&mut g, total), vec![1.0, 0.25]);
    assert_eq!(g.node(total).unwrap().state(), EvalState::Evaluated);
}

#[test]
fn debug_verbosity_traces_without_changing_results() {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .finish();
    tracing::subscriber::with_default(subscriber, || {
        let mut g = Graph::new("traced", GraphConfig::debug());
        let src = g.create_node("src", Constant { values: vec![2.0] }).unwrap();
        let recip = g.create_node("recip", Reciprocal).unwrap();
        g.connect_to(src.output(0), recip).unwrap();
        g.close().unwrap();
        assert_eq!(values(&mut g, recip), vec![0.5]);
        g.touch_node(src).unwrap();
        assert_eq!(values(&mut g, recip), vec![0.5]);
        assert_eq!(calls(&g, &[src, recip]), [2, 2]);
    });
}

#[test]
fn deep_chain_does_not_recurse() {
    let mut g = Graph::new("deep", GraphConfig::default().with_verbosity(Verbosity::Quiet));
    let mut last = g.create_node("n0", Constant { values: vec![1.0] }).unwrap();
    for i in 1..20_000 {
        let next = g.create_node(format!("n{i}"), Total).unwrap();
        g.connect_to(last.output(0), next).unwrap();
        last = next;
    }
    g.close().unwrap();
    assert_eq!(values(&mut g, last), vec![1.0]);
}

#[test]
fn touching_one_output_keeps_siblings_cached() {
    let mut g = Graph::open("siblings");
    let left = g.create_node("left", Constant { values: vec![1.0] }).unwrap();
    let right = g.create_node("right", Constant { values: vec![2.0] }).unwrap();
    let l = g.create_node("l", Total).unwrap();
    let r = g.create_node("r", Total).unwrap();
    g.connect_to(left.output(0), l).unwrap();
    g.connect_to(right.output(0), r).unwrap();
    g.close().unwrap();
    values(&mut g, l);
    values(&mut g, r);

    g.touch_output(left.output(0)).unwrap();
    values(&mut g, l);
    values(&mut g, r);
    assert_eq!(calls(&g, &[left, right, l, r]), [2, 1, 2, 1]);
}

// ---------------------------------------------------------------------------
// Randomized DAGs
// ---------------------------------------------------------------------------

/// Node `i` reads the nodes listed in `parents[i]`, all of which precede it.
/// Nodes without parents are constants with value `i + 1`.
fn reference(parents: &[Vec<usize>]) -> Vec<f64> {
    let mut out: Vec<f64> = Vec::with_capacity(parents.len());
    for (i, ps) in parents.iter().enumerate() {
        let v = if ps.is_empty() {
            (i + 1) as f64
        } else {
            ps.iter().map(|&p| out[p]).sum()
        };
        out.push(v);
    }
    out
}

fn downstream_of(parents: &[Vec<usize>], start: usize) -> HashSet<usize> {
    let mut reached = HashSet::from([start]);
    for (i, ps) in parents.iter().enumerate().skip(start + 1) {
        if ps.iter().any(|p| reached.contains(p)) {
            reached.insert(i);
        }
    }
    reached
}

fn build(parents: &[Vec<usize>]) -> (Graph, Vec<NodeId>) {
    let config = GraphConfig::default().with_verbosity(Verbosity::Quiet);
    let mut g = Graph::new("random", config);
    let mut ids = Vec::with_capacity(parents.len());
    for (i, ps) in parents.iter().enumerate() {
        let id = if ps.is_empty() {
            g.create_node(format!("c{i}"), Constant { values: vec![(i + 1) as f64] })
                .unwrap()
        } else {
            let id = g.create_node(format!("t{i}"), Total).unwrap();
            let sources: Vec<NodeId> = ps.iter().map(|&p| ids[p]).collect();
            g.connect_nodes(&sources, id).unwrap();
            id
        };
        ids.push(id);
    }
    g.close().unwrap();
    (g, ids)
}

fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(prop::collection::vec(any::<prop::sample::Index>(), 0..4), 1..16)
        .prop_map(|picks| {
            picks
                .into_iter()
                .enumerate()
                .map(|(i, idx)| {
                    if i == 0 {
                        Vec::new()
                    } else {
                        idx.into_iter().map(|ix| ix.index(i)).collect()
                    }
                })
                .collect()
        })
}

proptest! {
    #[test]
    fn random_dags_match_reference(parents in dag()) {
        let expected = reference(&parents);
        let (mut g, ids) = build(&parents);

        for (i, &id) in ids.iter().enumerate().rev() {
            prop_assert_eq!(values(&mut g, id), vec![expected[i]]);
        }
        for &id in &ids {
            prop_assert_eq!(g.calls(id).unwrap(), 1);
        }
    }

    #[test]
    fn touch_recomputes_exactly_the_downstream_cone(
        parents in dag(),
        pick in any::<prop::sample::Index>(),
    ) {
        let (mut g, ids) = build(&parents);
        for &id in &ids {
            values(&mut g, id);
        }

        let start = pick.index(ids.len());
        g.touch_node(ids[start]).unwrap();
        for &id in &ids {
            values(&mut g, id);
        }

        let cone = downstream_of(&parents, start);
        for (i, &id) in ids.iter().enumerate() {
            let expected = if cone.contains(&i) { 2 } else { 1 };
            prop_assert_eq!(g.calls(id).unwrap(), expected, "node {}", i);
        }
    }
}
