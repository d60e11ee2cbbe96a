//! Read-only structural snapshot of a graph.
//!
//! Plotting and reporting tools consume a [`Topology`] instead of walking the
//! graph themselves. Building one never evaluates anything.

use std::fmt;

use serde::Serialize;

use crate::graph::{Graph, GraphState};
use crate::id::NodeId;
use crate::node::EvalState;
use crate::types::DataDescriptor;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Topology {
    pub graph: String,
    pub state: GraphState,
    pub nodes: Vec<NodeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub kind: &'static str,
    pub state: EvalState,
    pub inputs: Vec<InputView>,
    pub outputs: Vec<OutputView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputView {
    pub name: String,
    /// `"node.output"` feeding this input.
    pub source: Option<String>,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputView {
    pub name: String,
    pub descriptor: Option<DataDescriptor>,
    pub dirty: bool,
    /// `"node.input"` for every reader.
    pub consumers: Vec<String>,
}

impl Graph {
    pub fn topology(&self) -> Topology {
        let nodes = self
            .nodes()
            .map(|node| {
                let id = node.id();
                let inputs = node
                    .inputs()
                    .map(|input| InputView {
                        name: input.name().to_string(),
                        source: input.source().map(|source| self.output_label(source)),
                        optional: input.is_optional(),
                    })
                    .collect();
                let outputs = node
                    .outputs()
                    .enumerate()
                    .map(|(port, output)| OutputView {
                        name: output.name().to_string(),
                        descriptor: output.descriptor().cloned(),
                        dirty: output.is_dirty(),
                        consumers: self.consumer_labels(id, port as u16),
                    })
                    .collect();
                NodeView {
                    id,
                    name: node.name().to_string(),
                    kind: node.kind(),
                    state: node.state(),
                    inputs,
                    outputs,
                }
            })
            .collect();

        Topology {
            graph: self.name().to_string(),
            state: self.state(),
            nodes,
        }
    }

    fn consumer_labels(&self, node: NodeId, port: u16) -> Vec<String> {
        self.consumers(node.output(port))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|input| {
                let consumer = self.node(input.node).ok()?;
                let name = consumer.input_at(input.port)?.name();
                Some(format!("{}.{}", consumer.name(), name))
            })
            .collect()
    }
}

impl Topology {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Number of connections.
    pub fn edge_count(&self) -> usize {
        self.nodes
            .iter()
            .flat_map(|node| &node.inputs)
            .filter(|input| input.source.is_some())
            .count()
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "graph '{}' ({}): {} node(s), {} connection(s)",
            self.graph,
            self.state,
            self.nodes.len(),
            self.edge_count()
        )?;
        for node in &self.nodes {
            write!(f, "\n{} [{}]", node.name, node.kind)?;
            for input in &node.inputs {
                match &input.source {
                    Some(source) => write!(f, "\n  {} <- {}", input.name, source)?,
                    None if input.optional => write!(f, "\n  {} <- (optional)", input.name)?,
                    None => write!(f, "\n  {} <- (unconnected)", input.name)?,
                }
            }
            for output in &node.outputs {
                write!(f, "\n  {}", output.name)?;
                if let Some(desc) = &output.descriptor {
                    write!(f, ": {}", desc)?;
                }
                if !output.consumers.is_empty() {
                    write!(f, " -> {}", output.consumers.join(", "))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::Graph;
    use crate::port::InputSpec;
    use crate::testing::{Add, Scale, Source};

    fn demo() -> Graph {
        let mut g = Graph::open("demo");
        let a = g.create_node("a", Source::new(vec![1.0, 2.0])).unwrap();
        let b = g.create_node("b", Source::new(vec![3.0, 4.0])).unwrap();
        let sum = g.create_node("sum", Add).unwrap();
        let double = g.create_node("double", Scale { factor: 2.0 }).unwrap();
        g.connect_nodes(&[a, b], sum).unwrap();
        g.connect_to(sum.output(0), double).unwrap();
        g.add_input(double, InputSpec::new("bias").optional()).unwrap();
        g
    }

    #[test]
    fn open_graph_has_no_descriptors() {
        let topo = demo().topology();
        insta::assert_snapshot!(topo.to_string(), @r"
        graph 'demo' (open): 4 node(s), 3 connection(s)
        a [Source]
          out -> sum.x_0
        b [Source]
          out -> sum.x_1
        sum [Add]
          x_0 <- a.out
          x_1 <- b.out
          out -> double.in
        double [Scale]
          in <- sum.out
          bias <- (optional)
          out
        ");
    }

    #[test]
    fn closed_graph_shows_descriptors() {
        let mut g = demo();
        g.close().unwrap();
        let topo = g.topology();
        insta::assert_snapshot!(topo.to_string(), @r"
        graph 'demo' (closed): 4 node(s), 3 connection(s)
        a [Source]
          out: f64(2,) -> sum.x_0
        b [Source]
          out: f64(2,) -> sum.x_1
        sum [Add]
          x_0 <- a.out
          x_1 <- b.out
          out: f64(2,) -> double.in
        double [Scale]
          in <- sum.out
          bias <- (optional)
          out: f64(2,)
        ");
    }

    #[test]
    fn topology_does_not_evaluate() {
        let mut g = demo();
        g.close().unwrap();
        let topo = g.topology();
        assert!(topo.nodes.iter().all(|n| n.outputs.iter().all(|o| o.dirty)));
        assert_eq!(g.call_report().total(), 0);
    }

    #[test]
    fn serializes_to_json() {
        let mut g = demo();
        g.close().unwrap();
        let json = g.topology().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["graph"], "demo");
        assert_eq!(value["state"], "Closed");
        assert_eq!(value["nodes"][2]["kind"], "Add");
        assert_eq!(value["nodes"][2]["outputs"][0]["descriptor"]["dtype"], "F64");
        assert_eq!(value["nodes"][3]["inputs"][1]["optional"], true);
    }
}
