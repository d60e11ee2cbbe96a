//! Compute-call accounting.
//!
//! Every kernel run bumps its node's counter. [`CallReport`] turns the
//! counters into a table, sorted busiest first, with totals per kernel kind.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::graph::Graph;
use crate::id::NodeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRow {
    pub node: NodeId,
    pub name: String,
    pub kind: &'static str,
    pub calls: u64,
}

/// Snapshot of the call counters of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallReport {
    pub graph: String,
    pub rows: Vec<CallRow>,
    pub by_kind: BTreeMap<&'static str, u64>,
}

impl CallReport {
    pub fn total(&self) -> u64 {
        self.rows.iter().map(|row| row.calls).sum()
    }
}

impl Graph {
    pub fn call_report(&self) -> CallReport {
        let mut rows: Vec<CallRow> = self
            .nodes()
            .map(|node| CallRow {
                node: node.id(),
                name: node.name().to_string(),
                kind: node.kind(),
                calls: node.calls(),
            })
            .collect();
        rows.sort_by(|a, b| b.calls.cmp(&a.calls).then_with(|| a.name.cmp(&b.name)));

        let mut by_kind = BTreeMap::new();
        for row in &rows {
            *by_kind.entry(row.kind).or_insert(0) += row.calls;
        }

        CallReport {
            graph: self.name().to_string(),
            rows,
            by_kind,
        }
    }
}

impl fmt::Display for CallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_width = self
            .rows
            .iter()
            .map(|row| row.name.len())
            .chain(std::iter::once("node".len()))
            .max()
            .unwrap_or(4);
        let kind_width = self
            .rows
            .iter()
            .map(|row| row.kind.len())
            .chain(std::iter::once("kind".len()))
            .max()
            .unwrap_or(4);

        writeln!(f, "calls in graph '{}'", self.graph)?;
        writeln!(f, "{:<name_width$}  {:<kind_width$}  {:>6}", "node", "kind", "calls")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<name_width$}  {:<kind_width$}  {:>6}",
                row.name, row.kind, row.calls
            )?;
        }
        for (kind, calls) in &self.by_kind {
            writeln!(f, "{:<name_width$}  {:<kind_width$}  {:>6}", "*", kind, calls)?;
        }
        write!(f, "total {}", self.total())
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::Graph;
    use crate::testing::{Scale, Source};

    fn evaluated() -> Graph {
        let mut g = Graph::open("calls");
        let src = g.create_node("src", Source::new(vec![1.0])).unwrap();
        let x = g.create_node("x", Scale { factor: 2.0 }).unwrap();
        let y = g.create_node("y", Scale { factor: 3.0 }).unwrap();
        g.connect_each(src.output(0), &[x, y]).unwrap();
        g.close().unwrap();
        g.data(x.output(0)).unwrap();
        g.data(y.output(0)).unwrap();
        g.touch_node(x).unwrap();
        g.data(x.output(0)).unwrap();
        g
    }

    #[test]
    fn report_sorts_busiest_first() {
        let g = evaluated();
        let report = g.call_report();
        let names: Vec<&str> = report.rows.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["x", "src", "y"]);
        assert_eq!(report.by_kind["Scale"], 3);
        assert_eq!(report.by_kind["Source"], 1);
        assert_eq!(report.total(), 4);
    }

    #[test]
    fn report_renders_as_table() {
        let g = evaluated();
        insta::assert_snapshot!(g.call_report().to_string(), @r"
        calls in graph 'calls'
        node  kind     calls
        x     Scale        2
        src   Source       1
        y     Scale        1
        *     Scale        3
        *     Source       1
        total 4
        ");
    }

    #[test]
    fn reset_zeroes_counters() {
        let mut g = evaluated();
        g.reset_calls();
        assert_eq!(g.call_report().total(), 0);
    }
}
