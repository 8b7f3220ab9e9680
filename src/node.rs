//! Structural node records stored in the hash-consing arena.

use crate::reference::NodeId;
use crate::types::{Lit, Var};
use crate::utils::{pairing2, pairing_seq, MyHash};

/// The tag of a circuit node.
///
/// Decision nodes carry their branch variable; the remaining internal kinds
/// are the reserved tags of the canonical form.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Symbol {
    /// The `bot` terminal.
    False,
    /// The `top` terminal.
    True,
    /// A pre-allocated literal leaf.
    Literal(Lit),
    /// A branch on a variable; children are `[low, high]`.
    Decision(Var),
    /// An independent conjunction; children are pairwise variable-disjoint.
    Decompose,
    /// A main child plus factored-out literal equivalences.
    Kernelize,
}

impl Symbol {
    fn tag(self) -> u64 {
        match self {
            Symbol::False => 0,
            Symbol::True => 1,
            Symbol::Literal(lit) => 4 + lit.code() as u64,
            Symbol::Decision(var) => pairing2(2, var.id() as u64),
            Symbol::Decompose => 2,
            Symbol::Kernelize => 3,
        }
    }
}

/// An immutable node: a symbol plus an owned child-index sequence.
///
/// Terminals and literal leaves have no children; decision nodes have
/// exactly two; decomposition and kernelization nodes are n-ary.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Node {
    pub symbol: Symbol,
    pub children: Box<[NodeId]>,
}

impl Node {
    pub fn leaf(symbol: Symbol) -> Self {
        Node {
            symbol,
            children: Box::new([]),
        }
    }

    pub fn decision(var: Var, low: NodeId, high: NodeId) -> Self {
        Node {
            symbol: Symbol::Decision(var),
            children: Box::new([low, high]),
        }
    }

    pub fn decompose(children: Vec<NodeId>) -> Self {
        Node {
            symbol: Symbol::Decompose,
            children: children.into_boxed_slice(),
        }
    }

    /// A kernelization record; `children[0]` is the main child, the rest are
    /// the equivalence children.
    pub fn kernelize(main: NodeId, equivalences: Vec<NodeId>) -> Self {
        let mut children = Vec::with_capacity(1 + equivalences.len());
        children.push(main);
        children.extend(equivalences);
        Node {
            symbol: Symbol::Kernelize,
            children: children.into_boxed_slice(),
        }
    }

    /// The branch variable of a decision node.
    pub fn var(&self) -> Var {
        match self.symbol {
            Symbol::Decision(var) => var,
            _ => panic!("var() on a non-decision node"),
        }
    }

    pub fn low(&self) -> NodeId {
        debug_assert!(matches!(self.symbol, Symbol::Decision(_)));
        self.children[0]
    }

    pub fn high(&self) -> NodeId {
        debug_assert!(matches!(self.symbol, Symbol::Decision(_)));
        self.children[1]
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        pairing2(
            self.symbol.tag(),
            pairing_seq(self.children.iter().map(|c| c.get() as u64)),
        )
    }
}
