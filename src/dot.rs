//! Circuit visualization in DOT (Graphviz) format.
//!
//! Decision nodes are circles labeled with their variable, decomposition
//! nodes are boxes labeled `AND`, kernelization nodes are boxes labeled
//! `KER` (main child first, bold edge). Terminals are squares. Render with
//! `dot -Tpng out.dot -o out.png`.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::ccdd::Ccdd;
use crate::node::Symbol;
use crate::reference::NodeId;

impl Ccdd {
    pub fn to_dot(&self, roots: &[NodeId]) -> String {
        let mut out = String::new();
        writeln!(out, "digraph ccdd {{").unwrap();
        writeln!(out, "  rankdir=TB;").unwrap();

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            match self.symbol(node) {
                Symbol::False => {
                    writeln!(out, "  n{} [shape=square, label=\"F\"];", node.get()).unwrap()
                }
                Symbol::True => {
                    writeln!(out, "  n{} [shape=square, label=\"T\"];", node.get()).unwrap()
                }
                Symbol::Literal(lit) => {
                    writeln!(out, "  n{} [shape=plaintext, label=\"{}\"];", node.get(), lit)
                        .unwrap()
                }
                Symbol::Decision(var) => {
                    let children = self.children(node);
                    writeln!(out, "  n{} [shape=circle, label=\"{}\"];", node.get(), var).unwrap();
                    writeln!(
                        out,
                        "  n{} -> n{} [style=dashed];",
                        node.get(),
                        children[0].get()
                    )
                    .unwrap();
                    writeln!(out, "  n{} -> n{};", node.get(), children[1].get()).unwrap();
                    stack.extend(children);
                }
                Symbol::Decompose | Symbol::Kernelize => {
                    let label = if matches!(self.symbol(node), Symbol::Decompose) {
                        "AND"
                    } else {
                        "KER"
                    };
                    writeln!(out, "  n{} [shape=box, label=\"{}\"];", node.get(), label).unwrap();
                    let children = self.children(node);
                    for (position, &child) in children.iter().enumerate() {
                        let style = if label == "KER" && position == 0 {
                            " [style=bold]"
                        } else {
                            ""
                        };
                        writeln!(out, "  n{} -> n{}{};", node.get(), child.get(), style).unwrap();
                    }
                    stack.extend(children);
                }
            }
        }

        writeln!(out, "}}").unwrap();
        out
    }
}
