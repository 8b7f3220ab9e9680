//! The canonical DAG node store.
//!
//! All circuit construction goes through the [`Ccdd`] manager. Nodes are
//! hash-consed records in an index arena; the constructors
//! ([`Ccdd::add_decision`], [`Ccdd::add_decomposition`],
//! [`Ccdd::add_kernelization`]) rewrite every request into canonical form
//! before consing, so the invariants below hold for every reachable node:
//!
//! - decision: `low != high`, not both constant, the branch variable precedes
//!   every variable of the children's support, and the children share no
//!   decomposition child;
//! - decomposition: at least two children, strictly increasing handles,
//!   pairwise variable-disjoint, no nested decomposition child;
//! - kernelization: the main child is neither `bot` nor another
//!   kernelization, equivalence children are strictly increasing and each is
//!   a valid two-literal decision.
//!
//! Identical canonical requests always return the same handle and never grow
//! the store; a rejected duplicate is dropped immediately. Violated
//! preconditions are programming errors (debug assertions), not recoverable
//! failures.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt::Debug;

use log::debug;

use crate::equiv::{LitEquivStore, Union};
use crate::node::{Node, Symbol};
use crate::order::VarOrder;
use crate::reference::NodeId;
use crate::types::{Lit, Var};
use crate::table::Table;

/// Relabeling produced by a compaction pass: maps pre-collection handles of
/// surviving nodes to their new handles.
pub struct Relabeling {
    map: Vec<u32>,
}

const DEAD: u32 = u32::MAX;

impl Relabeling {
    /// The new handle of a surviving node.
    ///
    /// # Panics
    ///
    /// Panics if the node did not survive the sweep: every live reference
    /// must have been passed as a root.
    pub fn remap(&self, id: NodeId) -> NodeId {
        let new = self.map[id.index()];
        assert!(new != DEAD, "remap of a collected node {}", id);
        NodeId::new(new)
    }

    /// The new handle, or `None` if the node was collected.
    pub fn try_remap(&self, id: NodeId) -> Option<NodeId> {
        match self.map[id.index()] {
            DEAD => None,
            new => Some(NodeId::new(new)),
        }
    }
}

pub struct Ccdd {
    table: RefCell<Table<Node>>,
    order: VarOrder,
    max_var: u32,
    kernelization: bool,
    /// Heap bytes held by the children arrays of live nodes.
    child_bytes: Cell<usize>,
    /// Node count below which collection is not worth attempting; raised
    /// when a sweep reclaims little.
    gc_hint: Cell<usize>,
    scratch_low: RefCell<LitEquivStore>,
    scratch_high: RefCell<LitEquivStore>,
    scratch_ctx: RefCell<LitEquivStore>,
    scratch_kern: RefCell<LitEquivStore>,
}

impl Ccdd {
    /// A store with the natural variable order and kernelization enabled
    /// (the CCDD rule-set).
    pub fn new(max_var: u32) -> Self {
        Self::with_options(VarOrder::natural(max_var), true)
    }

    /// A decomposition-only store (the kernelization-free rule-set).
    pub fn decomposition_only(max_var: u32) -> Self {
        Self::with_options(VarOrder::natural(max_var), false)
    }

    pub fn with_options(order: VarOrder, kernelization: bool) -> Self {
        let max_var = order.max_var();
        let mut table = Table::new(10);

        // Fixed handles: bot, top, then the literal block in code order.
        let (bot, _) = table.put(Node::leaf(Symbol::False));
        let (top, _) = table.put(Node::leaf(Symbol::True));
        assert_eq!(bot, 0);
        assert_eq!(top, 1);
        for v in 1..=max_var {
            let var = Var::new(v);
            let (p, _) = table.put(Node::leaf(Symbol::Literal(var.pos())));
            let (n, _) = table.put(Node::leaf(Symbol::Literal(var.neg())));
            assert_eq!(p, var.pos().code());
            assert_eq!(n, var.neg().code());
        }

        let scratch = || RefCell::new(LitEquivStore::new(&order));
        Self {
            scratch_low: scratch(),
            scratch_high: scratch(),
            scratch_ctx: scratch(),
            scratch_kern: scratch(),
            table: RefCell::new(table),
            max_var,
            kernelization,
            child_bytes: Cell::new(0),
            gc_hint: Cell::new(0),
            order,
        }
    }

    pub fn max_var(&self) -> u32 {
        self.max_var
    }

    pub fn order(&self) -> &VarOrder {
        &self.order
    }

    pub fn kernelization_enabled(&self) -> bool {
        self.kernelization
    }

    /// Number of fixed handles (terminals plus the literal block).
    pub fn num_fixed(&self) -> usize {
        2 * self.max_var as usize + 2
    }

    pub fn num_nodes(&self) -> usize {
        self.table.borrow().len()
    }

    /// Approximate heap footprint of the store in bytes.
    pub fn memory(&self) -> usize {
        self.table.borrow().memory() + self.child_bytes.get()
    }

    pub fn bot(&self) -> NodeId {
        NodeId::BOT
    }

    pub fn top(&self) -> NodeId {
        NodeId::TOP
    }

    /// The fixed handle of a literal node.
    pub fn literal(&self, lit: Lit) -> NodeId {
        assert!(!lit.is_constant());
        assert!(lit.var().id() <= self.max_var, "literal out of range: {}", lit);
        NodeId::literal(lit)
    }

    pub fn symbol(&self, id: NodeId) -> Symbol {
        self.table.borrow().value(id.get()).symbol
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.table.borrow().value(id.get()).children.to_vec()
    }

    pub fn num_children(&self, id: NodeId) -> usize {
        self.table.borrow().value(id.get()).children.len()
    }

    pub fn is_literal(&self, id: NodeId) -> bool {
        !id.is_terminal() && id.index() < self.num_fixed()
    }

    /// The literal of a literal node.
    pub fn literal_of(&self, id: NodeId) -> Lit {
        match self.symbol(id) {
            Symbol::Literal(lit) => lit,
            _ => panic!("literal_of on a non-literal node {}", id),
        }
    }

    fn cons(&self, node: Node) -> NodeId {
        let bytes = node.children.len() * std::mem::size_of::<NodeId>();
        let (index, fresh) = self.table.borrow_mut().put(node);
        if fresh {
            self.child_bytes.set(self.child_bytes.get() + bytes);
        }
        NodeId::new(index)
    }

    /// The variable support of a node (sorted ascending by id).
    pub fn support(&self, id: NodeId) -> Vec<Var> {
        let table = self.table.borrow();
        let mut seen = HashSet::new();
        let mut vars = HashSet::new();
        let mut stack = vec![id];
        while let Some(top) = stack.pop() {
            if !seen.insert(top) {
                continue;
            }
            let node = table.value(top.get());
            match node.symbol {
                Symbol::Literal(lit) => {
                    vars.insert(lit.var());
                }
                Symbol::Decision(var) => {
                    vars.insert(var);
                }
                _ => {}
            }
            stack.extend(node.children.iter().copied());
        }
        let mut vars: Vec<Var> = vars.into_iter().collect();
        vars.sort();
        vars
    }
}

// ---------------------------------------------------------------------------
// Decomposition nodes
// ---------------------------------------------------------------------------

impl Ccdd {
    /// The canonical conjunction of variable-disjoint sub-circuits.
    ///
    /// `top` children are dropped, any `bot` child collapses the result,
    /// nested decomposition children are flattened, duplicates are merged and
    /// complementary literal children short-circuit to `bot`. Zero children
    /// yield `top`, a single child is returned as-is.
    pub fn add_decomposition(&self, children: impl IntoIterator<Item = NodeId>) -> NodeId {
        let mut flat: Vec<NodeId> = Vec::new();
        for child in children {
            if child.is_top() {
                continue;
            }
            if child.is_bot() {
                debug!("decompose: bot child");
                return NodeId::BOT;
            }
            if matches!(self.symbol(child), Symbol::Decompose) {
                flat.extend(self.children(child));
            } else {
                flat.push(child);
            }
        }
        flat.sort();
        flat.dedup();

        // Complementary literals occupy adjacent fixed handles.
        for pair in flat.windows(2) {
            if self.is_literal(pair[0]) && pair[1].get() == pair[0].get() ^ 1 {
                debug!("decompose: complementary literals {}", pair[0]);
                return NodeId::BOT;
            }
        }

        match flat.len() {
            0 => NodeId::TOP,
            1 => flat[0],
            _ => {
                #[cfg(debug_assertions)]
                self.assert_disjoint(&flat);
                self.cons(Node::decompose(flat))
            }
        }
    }

    #[cfg(debug_assertions)]
    fn assert_disjoint(&self, children: &[NodeId]) {
        let mut seen: HashSet<Var> = HashSet::new();
        for &child in children {
            debug_assert!(
                !matches!(self.symbol(child), Symbol::Decompose),
                "nested decomposition child {}",
                child
            );
            for var in self.support(child) {
                debug_assert!(seen.insert(var), "decomposition children share {}", var);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Decision nodes
// ---------------------------------------------------------------------------

impl Ccdd {
    /// The canonical form of "if `var` then `high` else `low`".
    ///
    /// Dispatch order: merge equal children, fold a `bot` side into the other
    /// side's decomposition list (*leaf*), factor out decomposition children
    /// shared by both sides (*share*), pull one side out of the other's
    /// decomposition (*part*), then (in kernelization-capable stores) try
    /// to factor literal equivalences common to both sides; only when all of
    /// that fails is a plain decision node consed.
    pub fn add_decision(&self, var: Var, low: NodeId, high: NodeId) -> NodeId {
        debug!("decision(var = {}, low = {}, high = {})", var, low, high);
        assert!(var.id() <= self.max_var);

        if low == high {
            debug!("decision: equal children");
            return low;
        }

        // Leaf rule: one unsatisfiable side turns the branch variable into a
        // plain conjunct of the other side.
        if low.is_bot() {
            debug!("decision: leaf rule (low)");
            return self.add_decomposition([self.literal(var.pos()), high]);
        }
        if high.is_bot() {
            debug!("decision: leaf rule (high)");
            return self.add_decomposition([self.literal(var.neg()), low]);
        }

        // Share rule: children common to both decompositions hold regardless
        // of the branch and move above the decision.
        if matches!(self.symbol(low), Symbol::Decompose)
            && matches!(self.symbol(high), Symbol::Decompose)
        {
            let low_children = self.children(low);
            let high_children = self.children(high);
            let shared: Vec<NodeId> = low_children
                .iter()
                .copied()
                .filter(|c| high_children.binary_search(c).is_ok())
                .collect();
            if !shared.is_empty() {
                debug!("decision: share rule ({} common)", shared.len());
                let low_rest: Vec<NodeId> = low_children
                    .iter()
                    .copied()
                    .filter(|c| shared.binary_search(c).is_err())
                    .collect();
                let high_rest: Vec<NodeId> = high_children
                    .iter()
                    .copied()
                    .filter(|c| shared.binary_search(c).is_err())
                    .collect();
                let reduced = self.add_decision(
                    var,
                    self.add_decomposition(low_rest),
                    self.add_decomposition(high_rest),
                );
                let mut children = shared;
                children.push(reduced);
                return self.add_decomposition(children);
            }
        }

        // Part rule: one side appearing verbatim inside the other's
        // decomposition is likewise branch-independent.
        if matches!(self.symbol(high), Symbol::Decompose) {
            let high_children = self.children(high);
            if high_children.binary_search(&low).is_ok() {
                debug!("decision: part rule (low in high)");
                let rest: Vec<NodeId> =
                    high_children.into_iter().filter(|&c| c != low).collect();
                let reduced = self.add_decision(var, NodeId::TOP, self.add_decomposition(rest));
                return self.add_decomposition([low, reduced]);
            }
        }
        if matches!(self.symbol(low), Symbol::Decompose) {
            let low_children = self.children(low);
            if low_children.binary_search(&high).is_ok() {
                debug!("decision: part rule (high in low)");
                let rest: Vec<NodeId> =
                    low_children.into_iter().filter(|&c| c != high).collect();
                let reduced = self.add_decision(var, self.add_decomposition(rest), NodeId::TOP);
                return self.add_decomposition([high, reduced]);
            }
        }

        // Two-literal decisions are already leaves of the canonical form
        // (this is exactly the shape of an equivalence child); factoring
        // them would rebuild themselves.
        if self.kernelization && !(self.is_literal(low) && self.is_literal(high)) {
            if let Some(result) = self.try_factor(var, low, high) {
                return result;
            }
        }

        #[cfg(debug_assertions)]
        self.assert_valid_decision(var, low, high);
        self.cons(Node::decision(var, low, high))
    }

    #[cfg(debug_assertions)]
    fn assert_valid_decision(&self, var: Var, low: NodeId, high: NodeId) {
        debug_assert_ne!(low, high);
        debug_assert!(!(low.is_terminal() && high.is_terminal()));
        for child in [low, high] {
            for v in self.support(child) {
                debug_assert!(
                    self.order.precedes(var, v),
                    "decision variable {} does not precede {}",
                    var,
                    v
                );
            }
        }
    }

    /// Collect the literal facts visible on the spine of one branch: its own
    /// literal, literal children of decompositions, and equivalences of
    /// kernelization nodes. Decision nodes contribute nothing.
    fn collect_view(&self, node: NodeId, store: &mut LitEquivStore) {
        match self.symbol(node) {
            Symbol::Literal(lit) => {
                store.assume(lit);
            }
            Symbol::Decompose => {
                for child in self.children(node) {
                    self.collect_view(child, store);
                }
            }
            Symbol::Kernelize => {
                let children = self.children(node);
                for &equiv in &children[1..] {
                    let (rep, member) = self.equivalence_of(equiv);
                    store.union(rep, member);
                }
                self.collect_view(children[0], store);
            }
            _ => {}
        }
    }

    /// Reads the `(representative, member)` pair of an equivalence child.
    fn equivalence_of(&self, id: NodeId) -> (Lit, Lit) {
        let table = self.table.borrow();
        let node = table.value(id.get());
        debug_assert!(matches!(node.symbol, Symbol::Decision(_)));
        let rep = node.var().pos();
        let member = self.literal_of(node.high());
        (rep, member)
    }

    /// Rebuild `node` modulo the facts recorded in `ctx`: implied literals
    /// vanish, remaining spine literals are rewritten to their
    /// representative, and equivalences already derivable are dropped.
    fn strip(&self, node: NodeId, ctx: &mut LitEquivStore) -> NodeId {
        match self.symbol(node) {
            Symbol::Literal(lit) => match ctx.find(lit) {
                Lit::TRUE => NodeId::TOP,
                Lit::FALSE => NodeId::BOT,
                rep => self.literal(rep),
            },
            Symbol::Decompose => {
                let stripped: Vec<NodeId> = self
                    .children(node)
                    .into_iter()
                    .map(|c| self.strip(c, ctx))
                    .collect();
                self.add_decomposition(stripped)
            }
            Symbol::Kernelize => {
                let children = self.children(node);
                let mut kept = Vec::new();
                let mut conjuncts = Vec::new();
                for &equiv in &children[1..] {
                    let (rep, member) = self.equivalence_of(equiv);
                    let (r, m) = (ctx.find(rep), ctx.find(member));
                    if r == m {
                        continue;
                    }
                    ctx.union(rep, member);
                    // A constant on either end turns the equivalence into a
                    // plain literal fact about the other end.
                    match (r.is_constant(), m.is_constant()) {
                        (true, _) => {
                            conjuncts.push(if r == Lit::TRUE { member } else { -member })
                        }
                        (_, true) => conjuncts.push(if m == Lit::TRUE { rep } else { -rep }),
                        _ => kept.push((r, m)),
                    }
                }
                let main = self.strip(children[0], ctx);
                let kernel = self.add_kernelization(main, &kept);
                let mut parts: Vec<NodeId> =
                    conjuncts.into_iter().map(|l| self.literal(l)).collect();
                parts.push(kernel);
                self.add_decomposition(parts)
            }
            _ => node,
        }
    }

    /// Rule 4: equivalences derivable on both sides of the branch become a
    /// kernelization wrapped around the reduced decision.
    fn try_factor(&self, var: Var, low: NodeId, high: NodeId) -> Option<NodeId> {
        let common = {
            let mut s_low = self.scratch_low.borrow_mut();
            let mut s_high = self.scratch_high.borrow_mut();
            s_low.reset();
            s_high.reset();
            s_low.assume(var.neg());
            s_high.assume(var.pos());
            self.collect_view(low, &mut s_low);
            self.collect_view(high, &mut s_high);
            s_low.intersection(&s_high)
        };
        if common.is_empty() {
            return None;
        }
        debug!("decision: equivalence factoring ({} facts)", common.len());

        let implied: Vec<Lit> = common
            .iter()
            .filter(|(rep, _)| rep.is_constant())
            .map(|&(_, member)| member)
            .collect();
        let pairs: Vec<(Lit, Lit)> = common
            .iter()
            .copied()
            .filter(|(rep, _)| !rep.is_constant())
            .collect();

        let (low, high) = {
            let mut ctx = self.scratch_ctx.borrow_mut();
            let conditioned = |branch_lit: Lit, node: NodeId, ctx: &mut LitEquivStore| {
                ctx.reset();
                ctx.assume(branch_lit);
                for &lit in &implied {
                    ctx.assume(lit);
                }
                for &(a, b) in &pairs {
                    ctx.union(a, b);
                }
                self.strip(node, ctx)
            };
            let low = conditioned(var.neg(), low, &mut ctx);
            let high = conditioned(var.pos(), high, &mut ctx);
            (low, high)
        };

        let reduced = self.add_decision(var, low, high);
        let kernel = self.add_kernelization(reduced, &pairs);
        let mut children: Vec<NodeId> = implied.iter().map(|&l| self.literal(l)).collect();
        children.push(kernel);
        Some(self.add_decomposition(children))
    }
}

// ---------------------------------------------------------------------------
// Kernelization nodes
// ---------------------------------------------------------------------------

impl Ccdd {
    /// A two-literal decision expressing `rep <-> member`, consed directly:
    /// it already is its own canonical form.
    fn equivalence_node(&self, rep: Lit, member: Lit) -> NodeId {
        debug_assert!(rep.is_positive() && !rep.is_constant());
        debug_assert!(!member.is_constant());
        debug_assert!(self.order.precedes(rep.var(), member.var()));
        self.cons(Node::decision(
            rep.var(),
            self.literal(member.negate()),
            self.literal(member),
        ))
    }

    /// The canonical kernelization of `main` under the given equivalence
    /// pairs. Equivalences of a kernelized `main` are hoisted first, the
    /// union is transitively closed and deduplicated, and the result is only
    /// a kernelization node if any equivalence survives.
    pub fn add_kernelization(&self, main: NodeId, equivalences: &[(Lit, Lit)]) -> NodeId {
        if main.is_bot() {
            return NodeId::BOT;
        }

        let mut store = self.scratch_kern.borrow_mut();
        store.reset();

        let mut main = main;
        while matches!(self.symbol(main), Symbol::Kernelize) {
            debug!("kernelize: hoisting nested equivalences of {}", main);
            let children = self.children(main);
            for &equiv in &children[1..] {
                let (rep, member) = self.equivalence_of(equiv);
                store.union(rep, member);
            }
            main = children[0];
        }
        for &(a, b) in equivalences {
            debug_assert!(!a.is_constant() && !b.is_constant());
            if store.union(a, b) == Union::Contradiction {
                debug!("kernelize: contradictory equivalences");
                return NodeId::BOT;
            }
        }

        let closed = store.output_equivalences();
        drop(store);
        if closed.is_empty() {
            return main;
        }

        let mut children: Vec<NodeId> = closed
            .into_iter()
            .map(|(rep, member)| self.equivalence_node(rep, member))
            .collect();
        children.sort();
        children.dedup();

        // A single equivalence over a true main *is* the equivalence node.
        if main.is_top() && children.len() == 1 {
            return children[0];
        }
        self.cons(Node::kernelize(main, children))
    }
}

// ---------------------------------------------------------------------------
// Garbage collection
// ---------------------------------------------------------------------------

impl Ccdd {
    /// Whether a collection pass is likely worthwhile under `budget` bytes.
    pub fn over_budget(&self, budget: usize) -> bool {
        self.memory() > budget && self.num_nodes() > self.gc_hint.get()
    }

    /// Mark-sweep-compact: keep the fixed block and everything reachable
    /// from `roots`, relabel survivors densely, rebuild the consing index.
    /// Every external reference must be rewritten through the returned
    /// [`Relabeling`].
    pub fn remove_redundant(&self, roots: impl IntoIterator<Item = NodeId>) -> Relabeling {
        let mut table = self.table.borrow_mut();
        let old_len = table.len();
        let fixed = self.num_fixed();

        let mut marked = vec![false; old_len];
        for m in marked.iter_mut().take(fixed) {
            *m = true;
        }
        let mut stack: Vec<NodeId> = roots.into_iter().collect();
        while let Some(id) = stack.pop() {
            if marked[id.index()] {
                continue;
            }
            marked[id.index()] = true;
            stack.extend(table.value(id.get()).children.iter().copied());
        }

        let mut map = vec![DEAD; old_len];
        let mut survivors: Vec<Node> = Vec::new();
        let mut child_bytes = 0;
        for (old, node) in table.values().iter().enumerate() {
            if !marked[old] {
                continue;
            }
            map[old] = survivors.len() as u32;
            let children: Box<[NodeId]> = node
                .children
                .iter()
                .map(|c| NodeId::new(map[c.index()]))
                .collect();
            debug_assert!(children.iter().all(|c| c.get() != DEAD));
            child_bytes += children.len() * std::mem::size_of::<NodeId>();
            survivors.push(Node {
                symbol: node.symbol,
                children,
            });
        }

        let new_len = survivors.len();
        *table = Table::from_vec(survivors);
        self.child_bytes.set(child_bytes);

        // Back off when the sweep reclaimed little.
        if new_len * 4 > old_len * 3 {
            self.gc_hint.set(old_len * 2);
        } else {
            self.gc_hint.set(new_len * 2);
        }
        debug!("gc: {} -> {} nodes", old_len, new_len);

        Relabeling { map }
    }
}

impl Debug for Ccdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ccdd")
            .field("max_var", &self.max_var)
            .field("num_nodes", &self.num_nodes())
            .field("kernelization", &self.kernelization)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lit(value: i32) -> Lit {
        Lit::from_dimacs(value)
    }

    fn var(id: u32) -> Var {
        Var::new(id)
    }

    #[test]
    fn test_fixed_handles() {
        let store = Ccdd::new(3);
        assert_eq!(store.num_nodes(), 8);
        assert_eq!(store.literal(lit(1)), NodeId::new(2));
        assert_eq!(store.literal(lit(-1)), NodeId::new(3));
        assert_eq!(store.literal(lit(-3)), NodeId::new(7));
        assert_eq!(store.symbol(NodeId::BOT), Symbol::False);
        assert_eq!(store.symbol(NodeId::TOP), Symbol::True);
    }

    #[test]
    fn test_decision_basics() {
        let store = Ccdd::new(3);
        let x2 = store.literal(lit(2));
        assert_eq!(store.add_decision(var(1), x2, x2), x2);
        // Both branches constant folds to the literal.
        assert_eq!(store.add_decision(var(1), NodeId::BOT, NodeId::TOP), store.literal(lit(1)));
        assert_eq!(store.add_decision(var(1), NodeId::TOP, NodeId::BOT), store.literal(lit(-1)));
    }

    #[test]
    fn test_hash_consing_idempotence() {
        let store = Ccdd::new(3);
        let a = store.add_decision(var(1), store.literal(lit(2)), store.literal(lit(3)));
        let size = store.num_nodes();
        let b = store.add_decision(var(1), store.literal(lit(2)), store.literal(lit(3)));
        assert_eq!(a, b);
        assert_eq!(store.num_nodes(), size);
    }

    #[test]
    fn test_leaf_rule() {
        let store = Ccdd::new(3);
        let x3 = store.literal(lit(3));
        let d = store.add_decision(var(1), NodeId::BOT, x3);
        // x1 ∧ x3 as a decomposition of two literals.
        assert_eq!(store.symbol(d), Symbol::Decompose);
        assert_eq!(store.children(d), vec![store.literal(lit(1)), x3]);
    }

    #[test]
    fn test_decomposition_rules() {
        let store = Ccdd::new(4);
        assert_eq!(store.add_decomposition([]), NodeId::TOP);
        assert_eq!(store.add_decomposition([NodeId::TOP]), NodeId::TOP);
        let x1 = store.literal(lit(1));
        assert_eq!(store.add_decomposition([x1, NodeId::TOP]), x1);
        assert_eq!(store.add_decomposition([x1, NodeId::BOT]), NodeId::BOT);
        assert_eq!(store.add_decomposition([x1, store.literal(lit(-1))]), NodeId::BOT);
        assert_eq!(store.add_decomposition([x1, x1]), x1);

        let d = store.add_decomposition([store.literal(lit(2)), x1]);
        assert_eq!(store.children(d), vec![x1, store.literal(lit(2))]);

        // Nested decompositions flatten.
        let e = store.add_decomposition([d, store.literal(lit(3))]);
        assert_eq!(store.children(e).len(), 3);
        assert!(!store.children(e).iter().any(|&c| c == d));
    }

    #[test]
    fn test_share_rule() {
        let store = Ccdd::decomposition_only(4);
        let x3 = store.literal(lit(3));
        let low = store.add_decomposition([store.literal(lit(2)), x3]);
        let high = store.add_decomposition([store.literal(lit(-2)), x3]);
        let d = store.add_decision(var(1), low, high);
        // x3 is branch-independent: expect x3 ∧ ite(x1, ~x2, x2).
        assert_eq!(store.symbol(d), Symbol::Decompose);
        let children = store.children(d);
        assert!(children.contains(&x3));
        assert_eq!(children.len(), 2);
    }

    #[test]
    fn test_part_rule() {
        let store = Ccdd::decomposition_only(4);
        let x2 = store.literal(lit(2));
        let high = store.add_decomposition([x2, store.literal(lit(3))]);
        let d = store.add_decision(var(1), x2, high);
        // x2 holds on both branches.
        assert_eq!(store.symbol(d), Symbol::Decompose);
        assert!(store.children(d).contains(&x2));
    }

    #[test]
    fn test_equivalence_factoring() {
        let store = Ccdd::new(4);
        // low = x2 ∧ x4, high = ~x2 ∧ x3: branches fix x2 ≡ ~x1.
        let low = store.add_decomposition([store.literal(lit(2)), store.literal(lit(4))]);
        let high = store.add_decomposition([store.literal(lit(-2)), store.literal(lit(3))]);
        let d = store.add_decision(var(1), low, high);
        assert_eq!(store.symbol(d), Symbol::Kernelize);
        let children = store.children(d);
        let (rep, member) = store.equivalence_of(children[1]);
        assert_eq!(rep, lit(1));
        assert_eq!(member, lit(-2));
        // The main child branches on x1 between the residuals x4 and x3.
        assert_eq!(store.symbol(children[0]), Symbol::Decision(var(1)));
    }

    #[test]
    fn test_no_factoring_in_decomposition_only_store() {
        let store = Ccdd::decomposition_only(4);
        let low = store.add_decomposition([store.literal(lit(2)), store.literal(lit(4))]);
        let high = store.add_decomposition([store.literal(lit(-2)), store.literal(lit(3))]);
        let d = store.add_decision(var(1), low, high);
        assert_eq!(store.symbol(d), Symbol::Decision(var(1)));
    }

    #[test]
    fn test_kernelization_canonicalization() {
        let store = Ccdd::new(4);
        let main = store.literal(lit(3));
        let k = store.add_kernelization(main, &[(lit(1), lit(2))]);
        assert_eq!(store.symbol(k), Symbol::Kernelize);

        // No equivalences: the main child comes back untouched.
        assert_eq!(store.add_kernelization(main, &[]), main);
        // A kernelized main is hoisted, never nested.
        let k2 = store.add_kernelization(k, &[(lit(1), lit(4))]);
        let children = store.children(k2);
        assert_eq!(children[0], main);
        assert_eq!(children.len(), 3);
        // bot absorbs.
        assert_eq!(store.add_kernelization(NodeId::BOT, &[(lit(1), lit(2))]), NodeId::BOT);
    }

    #[test]
    fn test_kernelization_single_equivalence_collapse() {
        let store = Ccdd::new(2);
        let k = store.add_kernelization(NodeId::TOP, &[(lit(1), lit(2))]);
        // Same handle as the two-literal decision built directly.
        let e = store.add_decision(var(1), store.literal(lit(-2)), store.literal(lit(2)));
        assert_eq!(k, e);
    }

    #[test]
    fn test_remove_redundant() {
        let store = Ccdd::new(3);
        let keep = store.add_decision(var(1), store.literal(lit(2)), store.literal(lit(-2)));
        let _dead = store.add_decision(var(2), store.literal(lit(3)), store.literal(lit(-3)));
        let before = store.num_nodes();
        let relabeling = store.remove_redundant([keep]);
        assert!(store.num_nodes() < before);
        let keep = relabeling.remap(keep);
        assert_eq!(store.symbol(keep), Symbol::Decision(var(1)));
        // Consing after collection still deduplicates.
        let again = store.add_decision(var(1), store.literal(lit(2)), store.literal(lit(-2)));
        assert_eq!(again, keep);
    }
}
