//! Queries over compiled circuits.
//!
//! Everything here is polynomial in the circuit size: exact model counting,
//! conditioning (literal restriction), clausal entailment, witness
//! extraction and uniform model sampling. Counting works over each node's
//! exact variable support and scales free variables at the end, so shared
//! sub-circuits are counted once.

use std::collections::{BTreeMap, HashMap};

use num_bigint::BigUint;
use rand::Rng;

use crate::ccdd::Ccdd;
use crate::node::Symbol;
use crate::reference::NodeId;
use crate::types::{Lit, Var};
use crate::utils::pairing2;

impl Ccdd {
    /// The `(representative, member)` literals of an equivalence child.
    fn equivalence_pair(&self, id: NodeId) -> (Var, Lit) {
        let var = match self.symbol(id) {
            Symbol::Decision(var) => var,
            other => panic!("equivalence child with symbol {:?}", other),
        };
        let member = self.literal_of(self.children(id)[1]);
        (var, member)
    }

    /// Reachable nodes in topological (children-first) order plus each
    /// node's sorted variable support.
    fn support_map(&self, root: NodeId) -> (Vec<NodeId>, HashMap<NodeId, Vec<Var>>) {
        let mut order: Vec<NodeId> = Vec::new();
        let mut supports: HashMap<NodeId, Vec<Var>> = HashMap::new();
        let mut stack: Vec<(NodeId, bool)> = vec![(root, false)];
        while let Some((node, expanded)) = stack.pop() {
            if supports.contains_key(&node) {
                continue;
            }
            if !expanded {
                stack.push((node, true));
                for child in self.children(node) {
                    stack.push((child, false));
                }
                continue;
            }
            let support = match self.symbol(node) {
                Symbol::False | Symbol::True => Vec::new(),
                Symbol::Literal(lit) => vec![lit.var()],
                Symbol::Decision(var) => {
                    let mut vars = vec![var];
                    for child in self.children(node) {
                        vars.extend(&supports[&child]);
                    }
                    vars.sort();
                    vars.dedup();
                    vars
                }
                Symbol::Decompose | Symbol::Kernelize => {
                    let mut vars = Vec::new();
                    for child in self.children(node) {
                        vars.extend(&supports[&child]);
                    }
                    vars.sort();
                    vars.dedup();
                    vars
                }
            };
            supports.insert(node, support);
            order.push(node);
        }
        (order, supports)
    }

    fn count_map(
        &self,
        order: &[NodeId],
        supports: &HashMap<NodeId, Vec<Var>>,
    ) -> HashMap<NodeId, BigUint> {
        let mut counts: HashMap<NodeId, BigUint> = HashMap::new();
        for &node in order {
            let count = match self.symbol(node) {
                Symbol::False => BigUint::ZERO,
                Symbol::True | Symbol::Literal(_) => BigUint::from(1u32),
                Symbol::Decision(_) => {
                    let size = supports[&node].len();
                    let children = self.children(node);
                    let mut total = BigUint::ZERO;
                    for child in children {
                        let free = size - 1 - supports[&child].len();
                        total += counts[&child].clone() << free;
                    }
                    total
                }
                Symbol::Decompose => {
                    let mut total = BigUint::from(1u32);
                    for child in self.children(node) {
                        total *= counts[&child].clone();
                    }
                    total
                }
                Symbol::Kernelize => {
                    let children = self.children(node);
                    let main = children[0];
                    let equivalences = children.len() - 1;
                    let free = supports[&node].len() - supports[&main].len() - equivalences;
                    counts[&main].clone() << free
                }
            };
            counts.insert(node, count);
        }
        counts
    }

    /// The number of models of `root` over variables `1..=num_vars`.
    pub fn sat_count(&self, root: NodeId, num_vars: usize) -> BigUint {
        let (order, supports) = self.support_map(root);
        let support = &supports[&root];
        assert!(
            support.last().map_or(0, |v| v.id() as usize) <= num_vars,
            "root mentions variables beyond num_vars"
        );
        let counts = self.count_map(&order, &supports);
        counts[&root].clone() << (num_vars - support.len())
    }

    /// Restrict `root` by the given literals, producing the canonical
    /// circuit of the remaining function (the conditioned variables drop
    /// out of its support). Contradictory literals yield `bot`.
    pub fn condition(&self, root: NodeId, lits: &[Lit]) -> NodeId {
        let mut assignment: HashMap<Var, bool> = HashMap::new();
        for &lit in lits {
            let value = lit.is_positive();
            if let Some(&previous) = assignment.get(&lit.var()) {
                if previous != value {
                    return NodeId::BOT;
                }
            }
            assignment.insert(lit.var(), value);
        }
        let mut memo = HashMap::new();
        self.condition_rec(root, &assignment, &BTreeMap::new(), &mut memo)
    }

    fn condition_rec(
        &self,
        node: NodeId,
        assignment: &HashMap<Var, bool>,
        ext: &BTreeMap<Var, bool>,
        memo: &mut HashMap<(NodeId, u64), NodeId>,
    ) -> NodeId {
        let ext_hash = ext
            .iter()
            .fold(0u64, |acc, (v, b)| pairing2(acc, (v.id() as u64) << 1 | *b as u64));
        let key = (node, ext_hash);
        if let Some(&result) = memo.get(&key) {
            return result;
        }
        let lookup = |var: Var| ext.get(&var).or_else(|| assignment.get(&var)).copied();

        let result = match self.symbol(node) {
            Symbol::False => NodeId::BOT,
            Symbol::True => NodeId::TOP,
            Symbol::Literal(lit) => match lookup(lit.var()) {
                None => node,
                Some(value) => {
                    if value == lit.is_positive() {
                        NodeId::TOP
                    } else {
                        NodeId::BOT
                    }
                }
            },
            Symbol::Decision(var) => match lookup(var) {
                Some(true) => {
                    self.condition_rec(self.children(node)[1], assignment, ext, memo)
                }
                Some(false) => {
                    self.condition_rec(self.children(node)[0], assignment, ext, memo)
                }
                None => {
                    let children = self.children(node);
                    let low = self.condition_rec(children[0], assignment, ext, memo);
                    let high = self.condition_rec(children[1], assignment, ext, memo);
                    self.add_decision(var, low, high)
                }
            },
            Symbol::Decompose => {
                let mut parts = Vec::new();
                for child in self.children(node) {
                    let conditioned = self.condition_rec(child, assignment, ext, memo);
                    if conditioned.is_bot() {
                        parts = vec![NodeId::BOT];
                        break;
                    }
                    parts.push(conditioned);
                }
                self.add_decomposition(parts)
            }
            Symbol::Kernelize => {
                let children = self.children(node);
                let mut ext2 = ext.clone();
                let mut kept: Vec<(Lit, Lit)> = Vec::new();
                let mut conjuncts: Vec<NodeId> = Vec::new();
                let mut contradictory = false;
                for &equiv in &children[1..] {
                    let (rep, member) = self.equivalence_pair(equiv);
                    let rep_value = lookup(rep).or_else(|| ext2.get(&rep).copied());
                    let member_value =
                        lookup(member.var()).map(|b| b == member.is_positive());
                    match (rep_value, member_value) {
                        (Some(a), Some(b)) => {
                            if a != b {
                                contradictory = true;
                                break;
                            }
                        }
                        (Some(true), None) => conjuncts.push(self.literal(member)),
                        (Some(false), None) => conjuncts.push(self.literal(member.negate())),
                        (None, Some(b)) => {
                            ext2.insert(rep, b);
                            conjuncts.push(self.literal(Lit::new(rep, !b)));
                        }
                        (None, None) => kept.push((rep.pos(), member)),
                    }
                }
                if contradictory {
                    NodeId::BOT
                } else {
                    let main = self.condition_rec(children[0], assignment, &ext2, memo);
                    let kernel = self.add_kernelization(main, &kept);
                    conjuncts.push(kernel);
                    self.add_decomposition(conjuncts)
                }
            }
        };
        memo.insert(key, result);
        result
    }

    /// Whether every model of `root` satisfies the clause.
    pub fn entails_clause(&self, root: NodeId, clause: &[Lit]) -> bool {
        let assumption: Vec<Lit> = clause.iter().map(|l| l.negate()).collect();
        self.condition(root, &assumption).is_bot()
    }

    /// One satisfying assignment over the root's support, or `None` for
    /// `bot`. Unconstrained support variables default to false.
    pub fn one_model(&self, root: NodeId) -> Option<Vec<Lit>> {
        if root.is_bot() {
            return None;
        }
        let mut model: HashMap<Var, bool> = HashMap::new();
        self.walk_model(root, &mut model);
        for var in self.support(root) {
            model.entry(var).or_insert(false);
        }
        let mut lits: Vec<Lit> = model
            .into_iter()
            .map(|(var, value)| Lit::new(var, !value))
            .collect();
        lits.sort();
        Some(lits)
    }

    fn walk_model(&self, node: NodeId, model: &mut HashMap<Var, bool>) {
        match self.symbol(node) {
            Symbol::False => unreachable!("bot below a satisfiable root"),
            Symbol::True => {}
            Symbol::Literal(lit) => {
                model.insert(lit.var(), lit.is_positive());
            }
            // Children of a decision are never bot, so any branch works;
            // prefer the high one.
            Symbol::Decision(var) => {
                model.insert(var, true);
                self.walk_model(self.children(node)[1], model);
            }
            Symbol::Decompose => {
                for child in self.children(node) {
                    self.walk_model(child, model);
                }
            }
            Symbol::Kernelize => {
                let children = self.children(node);
                self.walk_model(children[0], model);
                for &equiv in &children[1..] {
                    let (rep, member) = self.equivalence_pair(equiv);
                    let rep_value = *model.entry(rep).or_insert(false);
                    model.insert(member.var(), rep_value == member.is_positive());
                }
            }
        }
    }

    /// A uniformly random model over variables `1..=num_vars`, or `None`
    /// for `bot`.
    pub fn sample_model<R: Rng + ?Sized>(
        &self,
        root: NodeId,
        num_vars: usize,
        rng: &mut R,
    ) -> Option<Vec<Lit>> {
        if root.is_bot() {
            return None;
        }
        let (order, supports) = self.support_map(root);
        let counts = self.count_map(&order, &supports);
        let mut model: HashMap<Var, bool> = HashMap::new();
        self.sample_rec(root, &supports, &counts, &mut model, rng);
        let mut lits = Vec::with_capacity(num_vars);
        for id in 1..=num_vars as u32 {
            let var = Var::new(id);
            let value = model.get(&var).copied().unwrap_or_else(|| rng.gen());
            lits.push(Lit::new(var, !value));
        }
        Some(lits)
    }

    fn sample_rec<R: Rng + ?Sized>(
        &self,
        node: NodeId,
        supports: &HashMap<NodeId, Vec<Var>>,
        counts: &HashMap<NodeId, BigUint>,
        model: &mut HashMap<Var, bool>,
        rng: &mut R,
    ) {
        match self.symbol(node) {
            Symbol::False => unreachable!("bot below a satisfiable root"),
            Symbol::True => {}
            Symbol::Literal(lit) => {
                model.insert(lit.var(), lit.is_positive());
            }
            Symbol::Decision(var) => {
                let children = self.children(node);
                let size = supports[&node].len();
                let weigh = |child: NodeId| {
                    counts[&child].clone() << (size - 1 - supports[&child].len())
                };
                let threshold = weigh(children[0]);
                let value = rand_below(rng, &counts[&node]) >= threshold;
                model.insert(var, value);
                let child = children[value as usize];
                self.sample_rec(child, supports, counts, model, rng);
                // Variables free under the taken branch are unconstrained.
                for &free in supports[&node].iter() {
                    if free != var && !supports[&child].contains(&free) {
                        model.insert(free, rng.gen());
                    }
                }
            }
            Symbol::Decompose => {
                for child in self.children(node) {
                    self.sample_rec(child, supports, counts, model, rng);
                }
            }
            Symbol::Kernelize => {
                let children = self.children(node);
                self.sample_rec(children[0], supports, counts, model, rng);
                for &equiv in &children[1..] {
                    let (rep, member) = self.equivalence_pair(equiv);
                    let rep_value = *model.entry(rep).or_insert_with(|| rng.gen());
                    model.insert(member.var(), rep_value == member.is_positive());
                }
            }
        }
    }
}

/// A uniform random value below `bound` (rejection sampling on the top
/// byte's width).
fn rand_below<R: Rng + ?Sized>(rng: &mut R, bound: &BigUint) -> BigUint {
    debug_assert!(*bound > BigUint::ZERO);
    let bytes = bound.to_bytes_be();
    let mask = 0xffu8 >> bytes[0].leading_zeros();
    loop {
        let mut buf = vec![0u8; bytes.len()];
        rng.fill_bytes(&mut buf);
        buf[0] &= mask;
        let value = BigUint::from_bytes_be(&buf);
        if value < *bound {
            return value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cnf::Cnf;
    use crate::compile::{Compiler, Config, ImpliedMode};
    use crate::verify;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn lit(value: i32) -> Lit {
        Lit::from_dimacs(value)
    }

    fn compile(cnf: &Cnf) -> (Ccdd, NodeId) {
        let store = Ccdd::new(cnf.max_var());
        let mut compiler = Compiler::new(Config {
            implied: ImpliedMode::Propagation,
            ..Config::default()
        });
        let root = compiler.compile(&store, cnf);
        (store, root)
    }

    fn satisfies(cnf: &Cnf, model: &[Lit]) -> bool {
        cnf.clauses()
            .iter()
            .all(|clause| clause.iter().any(|l| model.contains(l)))
    }

    #[test]
    fn test_sat_count_terminals() {
        let store = Ccdd::new(3);
        assert_eq!(store.sat_count(NodeId::BOT, 3), BigUint::ZERO);
        assert_eq!(store.sat_count(NodeId::TOP, 3), BigUint::from(8u32));
        assert_eq!(store.sat_count(store.literal(lit(2)), 3), BigUint::from(4u32));
    }

    #[test]
    fn test_kernelization_soundness() {
        // ite(x1, ~x2 ∧ x3, x2 ∧ x4) factors x2 ≡ ~x1; the factored circuit
        // must count exactly like the unfactored formula.
        let cnf = Cnf::from_clauses(4, &[&[1, 2], &[1, 4], &[-1, -2], &[-1, 3]]);
        let store = Ccdd::new(4);
        let low = store.add_decomposition([store.literal(lit(2)), store.literal(lit(4))]);
        let high = store.add_decomposition([store.literal(lit(-2)), store.literal(lit(3))]);
        let node = store.add_decision(Var::new(1), low, high);
        assert_eq!(store.symbol(node), Symbol::Kernelize);
        assert_eq!(store.sat_count(node, 4), verify::count_models(&cnf));

        // The decomposition-only rule-set agrees.
        let plain = Ccdd::decomposition_only(4);
        let low = plain.add_decomposition([plain.literal(lit(2)), plain.literal(lit(4))]);
        let high = plain.add_decomposition([plain.literal(lit(-2)), plain.literal(lit(3))]);
        let node = plain.add_decision(Var::new(1), low, high);
        assert_eq!(plain.sat_count(node, 4), verify::count_models(&cnf));
    }

    #[test]
    fn test_condition_matches_strengthened_formula() {
        let cnf = Cnf::from_clauses(4, &[&[1, 2], &[-1, 3], &[2, -4], &[3, 4]]);
        let (store, root) = compile(&cnf);
        for unit in [1, -1, 2, -3] {
            let conditioned = store.condition(root, &[lit(unit)]);
            let mut strengthened = cnf.clone();
            strengthened.add_clause([lit(unit)]);
            // The conditioned circuit no longer mentions the variable, so
            // scale its count by the free variable to compare.
            assert_eq!(
                store.sat_count(conditioned, 4),
                verify::count_models(&strengthened) << 1,
                "conditioning on {}",
                unit
            );
        }
    }

    #[test]
    fn test_condition_through_kernelization() {
        let store = Ccdd::new(4);
        let low = store.add_decomposition([store.literal(lit(2)), store.literal(lit(4))]);
        let high = store.add_decomposition([store.literal(lit(-2)), store.literal(lit(3))]);
        let node = store.add_decision(Var::new(1), low, high);
        assert_eq!(store.symbol(node), Symbol::Kernelize);

        // Conditioning on the factored member variable x2 forces x1 false;
        // what remains is ~x1 ∧ x4, with x2 and x3 free: 4 models.
        let conditioned = store.condition(node, &[lit(2)]);
        assert_eq!(store.support(conditioned), vec![Var::new(1), Var::new(4)]);
        assert_eq!(store.sat_count(conditioned, 4), BigUint::from(4u32));
        // And x2 false forces x1 true, leaving x1 ∧ x3.
        let conditioned = store.condition(node, &[lit(-2)]);
        assert_eq!(store.support(conditioned), vec![Var::new(1), Var::new(3)]);
        assert_eq!(store.sat_count(conditioned, 4), BigUint::from(4u32));
    }

    #[test]
    fn test_entailment() {
        let cnf = Cnf::from_clauses(3, &[&[1, 2], &[-1, 3]]);
        let (store, root) = compile(&cnf);
        assert!(store.entails_clause(root, &[lit(2), lit(3)]));
        assert!(!store.entails_clause(root, &[lit(2)]));
        assert!(!store.entails_clause(root, &[lit(3)]));
        // A tautological clause is always entailed.
        assert!(store.entails_clause(root, &[lit(1), lit(-1)]));
        // bot entails everything.
        assert!(store.entails_clause(NodeId::BOT, &[lit(2)]));
    }

    #[test]
    fn test_one_model() {
        let cnf = Cnf::from_clauses(3, &[&[1, 2], &[-1, 3], &[2, -3]]);
        let (store, root) = compile(&cnf);
        let model = store.one_model(root).unwrap();
        assert!(satisfies(&cnf, &model));

        let unsat = Cnf::from_clauses(1, &[&[1], &[-1]]);
        let (store, root) = compile(&unsat);
        assert!(store.one_model(root).is_none());
    }

    #[test]
    fn test_sampling_is_valid_and_covers() {
        let cnf = Cnf::from_clauses(3, &[&[1, 2], &[-1, 3], &[2, -3]]);
        let (store, root) = compile(&cnf);
        let expected = verify::count_models(&cnf);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen: Vec<Vec<Lit>> = Vec::new();
        for _ in 0..300 {
            let model = store.sample_model(root, 3, &mut rng).unwrap();
            assert!(satisfies(&cnf, &model));
            if !seen.contains(&model) {
                seen.push(model);
            }
        }
        // All models of the formula show up in 300 draws.
        assert_eq!(BigUint::from(seen.len() as u32), expected);
    }

    #[test]
    fn test_sampling_with_kernelization() {
        let store = Ccdd::new(4);
        let low = store.add_decomposition([store.literal(lit(2)), store.literal(lit(4))]);
        let high = store.add_decomposition([store.literal(lit(-2)), store.literal(lit(3))]);
        let node = store.add_decision(Var::new(1), low, high);
        let cnf = Cnf::from_clauses(4, &[&[1, 2], &[1, 4], &[-1, -2], &[-1, 3]]);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let model = store.sample_model(node, 4, &mut rng).unwrap();
            assert!(satisfies(&cnf, &model), "bad sample {:?}", model);
        }
    }
}
