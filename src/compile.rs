//! The compilation search engine.
//!
//! An explicit `Vec<Frame>` models the suspended recursion of a
//! branch-and-decompose search: each frame compiles the residual of its
//! scope under the current trail and reports one node handle to the frame
//! below. Decomposition trees can be as deep as the variable count, so no
//! real call stack is involved.
//!
//! A frame's life cycle ([`Work`]):
//!
//! - `Enter`: propagate (plus an initial unit scan on fresh scopes and,
//!   depending on the implication strategy, failed-literal probing), collect
//!   implied literals, split the residual into components and probe it in
//!   the component cache. An empty residual or a cache hit resolves the
//!   frame immediately; a single component goes to decision mode (possibly
//!   through a kernelization episode first); several components go to
//!   decomposition mode.
//! - `LowBranch`/`HighBranch`: decision mode: branch the component's
//!   order-minimal variable, false phase first, and combine the two branch
//!   results into a decision node written to the component's slot.
//! - `Kernel`: a kernelization episode is in flight: the substituted
//!   sub-problem compiles below, and the result is re-wrapped with the
//!   factored equivalences.
//! - `Split`: decomposition mode: siblings are probed and branched one at
//!   a time. A sibling whose false branch is unsatisfiable is folded into
//!   the trail and the remainder re-decomposed (backjump-then-re-decompose);
//!   a sibling resolving to `bot` makes the whole frame `bot`, abandoning
//!   the remaining siblings.
//!
//! An unsatisfiable branch is an ordinary `bot` result, combined like any
//! other; backjumping only prunes work, and disabling it via
//! [`Config::backjump`] must never change a count.

use log::debug;

use crate::cache::{CacheLoc, ComponentCache, Probe};
use crate::ccdd::Ccdd;
use crate::cnf::Cnf;
use crate::equiv::LitEquivStore;
use crate::formula::{ClauseId, Component, Detect, Formula, KernelInfo};
use crate::reference::NodeId;
use crate::types::{Lit, Var};

/// How implied literals are computed per level.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ImpliedMode {
    /// Unit propagation only (the cheap approximation).
    Propagation,
    /// Failed-literal probing everywhere (the exact-implicate service).
    Probing,
    /// Probing on components up to `Config::probe_limit` free variables,
    /// propagation above, re-decided at every level.
    Auto,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Enable search-time kernelization episodes (requires a
    /// kernelization-capable store to have any effect).
    pub kernelization: bool,
    pub implied: ImpliedMode,
    pub probe_limit: usize,
    /// Enable backjumping (sibling abandonment and
    /// backjump-then-re-decompose). Never affects results.
    pub backjump: bool,
    /// Maximum simultaneously active kernelization episodes.
    pub kern_depth: u32,
    /// Components below this size are never kernelized.
    pub kern_min_vars: usize,
    /// Kernelize only when decisions-per-level reaches this ratio.
    pub kern_ratio: f64,
    /// Node-store budget in bytes; exceeding it triggers collection.
    pub max_memory: usize,
    /// Component-cache budget in bytes; exceeding it clears the cache.
    pub max_cache_memory: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernelization: true,
            implied: ImpliedMode::Auto,
            probe_limit: 32,
            backjump: true,
            kern_depth: 8,
            kern_min_vars: 4,
            kern_ratio: 2.0,
            max_memory: 2 << 30,
            max_cache_memory: 512 << 20,
        }
    }
}

impl Config {
    /// Configuration errors are fatal (there is nothing sensible to fall
    /// back to), reported here once at construction.
    fn validate(&self) {
        assert!(self.kern_ratio > 0.0, "kern_ratio must be positive");
        assert!(self.kern_min_vars >= 2, "kern_min_vars below 2 is meaningless");
        assert!(self.max_memory > 0, "max_memory must be positive");
        assert!(self.max_cache_memory > 0, "max_cache_memory must be positive");
    }
}

struct Frame {
    /// Clause ids this frame may look at.
    scope: Vec<ClauseId>,
    /// Scan the scope for pre-existing units (fresh scopes only).
    scan: bool,
    /// The first trail entry of this frame is a branch assignment.
    decision: bool,
    trail_mark: usize,
    level_mark: usize,
    implied: Vec<Lit>,
    /// Reserved slot of this frame's post-propagation residual.
    slot: Option<CacheLoc>,
    work: Work,
}

enum Work {
    Enter,
    LowBranch {
        comp: Component,
        var: Var,
    },
    HighBranch {
        var: Var,
        low: NodeId,
    },
    Kernel {
        pairs: Vec<(Lit, Lit)>,
        info: KernelInfo,
    },
    Split(Split),
}

struct Split {
    sibs: Vec<Component>,
    idx: usize,
    results: Vec<NodeId>,
    /// Literals folded into this level by backjump-then-re-decompose; they
    /// are part of the residual's semantics, unlike `Frame::implied`.
    folded: Vec<Lit>,
    cur: Option<SplitCur>,
}

struct SplitCur {
    comp: Component,
    var: Var,
    low: Option<NodeId>,
}

impl Frame {
    fn new(scope: Vec<ClauseId>, scan: bool, decision: bool, trail_mark: usize, level_mark: usize) -> Self {
        Self {
            scope,
            scan,
            decision,
            trail_mark,
            level_mark,
            implied: Vec::new(),
            slot: None,
            work: Work::Enter,
        }
    }

    fn split_mut(&mut self) -> &mut Split {
        match &mut self.work {
            Work::Split(split) => split,
            _ => panic!("frame is not in decomposition mode"),
        }
    }

    fn collect_nodes(&self, out: &mut Vec<NodeId>) {
        match &self.work {
            Work::HighBranch { low, .. } => out.push(*low),
            Work::Split(split) => {
                out.extend(&split.results);
                if let Some(cur) = &split.cur {
                    out.extend(cur.low);
                }
            }
            _ => {}
        }
    }

    fn remap_nodes(&mut self, relabeling: &crate::ccdd::Relabeling) {
        match &mut self.work {
            Work::HighBranch { low, .. } => *low = relabeling.remap(*low),
            Work::Split(split) => {
                for node in &mut split.results {
                    *node = relabeling.remap(*node);
                }
                if let Some(cur) = &mut split.cur {
                    if let Some(low) = &mut cur.low {
                        *low = relabeling.remap(*low);
                    }
                }
            }
            _ => {}
        }
    }

    fn collect_slots(&self, out: &mut Vec<CacheLoc>) {
        out.extend(self.slot);
        if let Work::Split(split) = &self.work {
            if let Some(cur) = &split.cur {
                out.extend(cur.comp.caching_loc);
            }
        }
    }

    fn assign_slots(&mut self, locs: &mut impl Iterator<Item = CacheLoc>) {
        if let Some(slot) = &mut self.slot {
            *slot = locs.next().expect("missing relocated slot");
        }
        if let Work::Split(split) = &mut self.work {
            if let Some(cur) = &mut split.cur {
                if let Some(loc) = &mut cur.comp.caching_loc {
                    *loc = locs.next().expect("missing relocated slot");
                }
            }
        }
    }
}

enum Outcome {
    Push(Frame),
    Finish(NodeId),
}

enum StepResult {
    Pushed,
    Finished(NodeId),
}

pub struct Compiler {
    config: Config,
    cache: ComponentCache,
    frames: Vec<Frame>,
    equiv: Option<LitEquivStore>,
    decisions: u64,
    levels: u64,
    kern_active: u32,
}

impl Compiler {
    pub fn new(config: Config) -> Self {
        config.validate();
        Self {
            config,
            cache: ComponentCache::new(),
            frames: Vec::new(),
            equiv: None,
            decisions: 0,
            levels: 0,
            kern_active: 0,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of cache hits of the most recent compilation.
    pub fn cache_hits(&self) -> usize {
        self.cache.hits()
    }

    /// Compile `cnf` into one canonical root handle in `store`.
    ///
    /// All search state is reset; the compiler can be reused for further
    /// formulas against the same store.
    pub fn compile(&mut self, store: &Ccdd, cnf: &Cnf) -> NodeId {
        assert!(
            cnf.max_var() <= store.max_var(),
            "formula has {} variables but the store only {}",
            cnf.max_var(),
            store.max_var()
        );

        let mut formula = Formula::new(cnf);
        self.cache = ComponentCache::new();
        self.frames.clear();
        self.equiv = Some(LitEquivStore::new(store.order()));
        self.decisions = 0;
        self.levels = 0;
        self.kern_active = 0;

        let scope = formula.all_active_clauses();
        self.frames.push(Frame::new(scope, true, false, 0, 0));

        let mut incoming: Option<NodeId> = None;
        loop {
            match self.step(store, &mut formula, incoming.take()) {
                StepResult::Pushed => {}
                StepResult::Finished(result) => {
                    if self.frames.is_empty() {
                        debug!("compiled root {} ({} nodes)", result, store.num_nodes());
                        return result;
                    }
                    incoming = Some(result);
                }
            }
        }
    }

    fn step(&mut self, store: &Ccdd, formula: &mut Formula, incoming: Option<NodeId>) -> StepResult {
        let mut frame = self.frames.pop().expect("step with no frame");
        let kind = match frame.work {
            Work::Enter => 0,
            Work::LowBranch { .. } => 1,
            Work::HighBranch { .. } => 2,
            Work::Kernel { .. } => 3,
            Work::Split(_) => 4,
        };
        let outcome = match kind {
            0 => self.enter(store, formula, &mut frame),
            1 => self.low_return(formula, &mut frame, incoming),
            2 => self.high_return(store, &mut frame, incoming),
            3 => self.kernel_return(store, formula, &mut frame, incoming),
            _ => self.advance_split(store, formula, &mut frame, incoming),
        };
        match outcome {
            Outcome::Push(child) => {
                self.frames.push(frame);
                self.frames.push(child);
                StepResult::Pushed
            }
            Outcome::Finish(result) => {
                formula.backtrack(frame.trail_mark, frame.level_mark);
                StepResult::Finished(result)
            }
        }
    }

    fn wrap_implied(&self, store: &Ccdd, implied: &[Lit], node: NodeId) -> NodeId {
        store.add_decomposition(
            implied
                .iter()
                .map(|&l| store.literal(l))
                .chain(std::iter::once(node)),
        )
    }

    fn use_probing(&self, free_vars: usize) -> bool {
        match self.config.implied {
            ImpliedMode::Propagation => false,
            ImpliedMode::Probing => true,
            ImpliedMode::Auto => free_vars <= self.config.probe_limit,
        }
    }

    fn kernelization_applicable(&self, store: &Ccdd, comp: &Component) -> bool {
        self.config.kernelization
            && store.kernelization_enabled()
            && self.kern_active < self.config.kern_depth
            && comp.vars.len() >= self.config.kern_min_vars
            && self.decisions as f64 >= self.config.kern_ratio * self.levels.max(1) as f64
    }

    /// Push a branch level: the assignment happens before the child frame
    /// exists, its propagation is the child's first action.
    fn branch(&mut self, formula: &mut Formula, lit: Lit, scope: Vec<ClauseId>) -> Frame {
        let trail_mark = formula.trail_len();
        let level_mark = formula.num_levels();
        formula.push_level();
        self.levels += 1;
        formula.assign(lit);
        Frame::new(scope, false, true, trail_mark, level_mark)
    }

    /// Micro-state 0.
    fn enter(&mut self, store: &Ccdd, formula: &mut Formula, frame: &mut Frame) -> Outcome {
        if frame.scan {
            if formula.scan(&frame.scope).is_err() {
                return Outcome::Finish(NodeId::BOT);
            }
        }
        if formula.propagate().is_err() {
            return Outcome::Finish(NodeId::BOT);
        }
        let free = formula.free_vars(&frame.scope);
        if self.use_probing(free.len()) && formula.probe(&free).is_err() {
            return Outcome::Finish(NodeId::BOT);
        }

        let skip = frame.trail_mark + frame.decision as usize;
        frame.implied = formula.trail_from(skip).to_vec();

        let comps = formula.decompose(&frame.scope);
        if comps.is_empty() {
            return Outcome::Finish(self.wrap_implied(store, &frame.implied, NodeId::TOP));
        }

        // Probe the whole residual before splitting it.
        let mut resid_vars: Vec<Var> = comps.iter().flat_map(|c| c.vars.iter().copied()).collect();
        let mut resid_clauses: Vec<ClauseId> =
            comps.iter().flat_map(|c| c.clauses.iter().copied()).collect();
        resid_vars.sort();
        resid_clauses.sort();
        match self.cache.probe(&resid_vars, &resid_clauses) {
            Probe::Hit(node) => {
                return Outcome::Finish(self.wrap_implied(store, &frame.implied, node));
            }
            Probe::Miss(loc) => frame.slot = Some(loc),
        }

        if comps.len() > 1 {
            frame.work = Work::Split(Split {
                sibs: comps,
                idx: 0,
                results: Vec::new(),
                folded: Vec::new(),
                cur: None,
            });
            return self.advance_split(store, formula, frame, None);
        }

        let comp = comps.into_iter().next().unwrap();

        if self.kernelization_applicable(store, &comp) {
            let mut equiv = self.equiv.take().expect("equivalence store in use");
            let detected = formula.detect_equivalences(&comp, &mut equiv);
            let outcome = match detected {
                Detect::Contradiction => {
                    self.cache.write(frame.slot.unwrap(), NodeId::BOT);
                    Some(Outcome::Finish(NodeId::BOT))
                }
                Detect::Found => {
                    debug!("kernelizing component of {} vars", comp.vars.len());
                    let pairs = equiv.output_equivalences();
                    let info = formula.kernelize(&comp, &equiv);
                    self.kern_active += 1;
                    let child = Frame::new(
                        info.component.clauses.clone(),
                        true,
                        false,
                        formula.trail_len(),
                        formula.num_levels(),
                    );
                    frame.work = Work::Kernel { pairs, info };
                    Some(Outcome::Push(child))
                }
                Detect::Nothing => None,
            };
            self.equiv = Some(equiv);
            if let Some(outcome) = outcome {
                return outcome;
            }
        }

        // Micro-state 1: branch, false phase first.
        let var = store.order().first(&comp.vars);
        self.decisions += 1;
        let child = self.branch(formula, var.neg(), comp.clauses.clone());
        frame.work = Work::LowBranch { comp, var };
        Outcome::Push(child)
    }

    /// Micro-state 2: the false branch came back; explore the true branch.
    fn low_return(
        &mut self,
        formula: &mut Formula,
        frame: &mut Frame,
        incoming: Option<NodeId>,
    ) -> Outcome {
        let low = incoming.expect("branch result");
        let (comp, var) = match std::mem::replace(&mut frame.work, Work::Enter) {
            Work::LowBranch { comp, var } => (comp, var),
            _ => unreachable!(),
        };
        let child = self.branch(formula, var.pos(), comp.clauses.clone());
        frame.work = Work::HighBranch { var, low };
        Outcome::Push(child)
    }

    /// Micro-state 3: combine the branches, fill the component's slot.
    fn high_return(&mut self, store: &Ccdd, frame: &mut Frame, incoming: Option<NodeId>) -> Outcome {
        let high = incoming.expect("branch result");
        let (var, low) = match std::mem::replace(&mut frame.work, Work::Enter) {
            Work::HighBranch { var, low } => (var, low),
            _ => unreachable!(),
        };
        let mut node = store.add_decision(var, low, high);
        self.cache.write(frame.slot.expect("decision without slot"), node);
        self.maintain(store, frame, &mut [&mut node]);
        Outcome::Finish(self.wrap_implied(store, &frame.implied, node))
    }

    /// A kernelization episode resolved: restore the clause pool and
    /// re-wrap the compiled kernel with the factored equivalences.
    fn kernel_return(
        &mut self,
        store: &Ccdd,
        formula: &mut Formula,
        frame: &mut Frame,
        incoming: Option<NodeId>,
    ) -> Outcome {
        let inner = incoming.expect("kernel result");
        let (pairs, info) = match std::mem::replace(&mut frame.work, Work::Enter) {
            Work::Kernel { pairs, info } => (pairs, info),
            _ => unreachable!(),
        };
        formula.unkernelize(&info);
        self.kern_active -= 1;
        let mut node = if inner.is_bot() {
            NodeId::BOT
        } else {
            store.add_kernelization(inner, &pairs)
        };
        self.cache.write(frame.slot.expect("kernel without slot"), node);
        self.maintain(store, frame, &mut [&mut node]);
        Outcome::Finish(self.wrap_implied(store, &frame.implied, node))
    }

    /// Decomposition mode. Loops until it needs a branch result or the
    /// frame resolves.
    fn advance_split(
        &mut self,
        store: &Ccdd,
        formula: &mut Formula,
        frame: &mut Frame,
        mut incoming: Option<NodeId>,
    ) -> Outcome {
        // Sibling micro-states: 0 = probe-or-branch the next sibling,
        // 1 = false branch returned, 2 = true branch returned.
        loop {
            let state = match &frame.split_mut().cur {
                None => 0,
                Some(cur) if cur.low.is_none() => 1,
                Some(_) => 2,
            };
            match state {
                1 => {
                    let low = incoming.take().expect("branch result");
                    if low.is_bot() && self.config.backjump {
                        // The branch variable is forced true: fold it into
                        // this level and re-decompose what is left.
                        let SplitCur { comp, var, .. } = frame.split_mut().cur.take().unwrap();
                        if let Some(loc) = comp.caching_loc {
                            self.cache.erase(loc);
                        }
                        let mark = formula.trail_len();
                        formula.assign(var.pos());
                        if formula.propagate().is_err() {
                            self.cache.write(frame.slot.unwrap(), NodeId::BOT);
                            return Outcome::Finish(NodeId::BOT);
                        }
                        let folded: Vec<Lit> = formula.trail_from(mark).to_vec();
                        let mut scope = comp.clauses;
                        {
                            let split = frame.split_mut();
                            for sib in &split.sibs[split.idx..] {
                                scope.extend_from_slice(&sib.clauses);
                            }
                        }
                        let comps = formula.decompose(&scope);
                        debug!("re-decompose after folding {}: {} siblings left", var, comps.len());
                        let split = frame.split_mut();
                        split.folded.extend(folded);
                        split.sibs = comps;
                        split.idx = 0;
                        continue;
                    }
                    let (var, scope) = {
                        let cur = frame.split_mut().cur.as_mut().unwrap();
                        cur.low = Some(low);
                        (cur.var, cur.comp.clauses.clone())
                    };
                    let child = self.branch(formula, var.pos(), scope);
                    return Outcome::Push(child);
                }
                2 => {
                    let high = incoming.take().expect("branch result");
                    let SplitCur { comp, var, low } = frame.split_mut().cur.take().unwrap();
                    let mut node = store.add_decision(var, low.unwrap(), high);
                    self.cache.write(comp.caching_loc.expect("sibling without slot"), node);
                    self.maintain(store, frame, &mut [&mut node]);
                    frame.split_mut().results.push(node);
                    if node.is_bot() && self.config.backjump {
                        self.cache.write(frame.slot.unwrap(), NodeId::BOT);
                        return Outcome::Finish(NodeId::BOT);
                    }
                }
                _ => {
                    let next = {
                        let split = frame.split_mut();
                        if split.idx < split.sibs.len() {
                            let sib = std::mem::take(&mut split.sibs[split.idx]);
                            split.idx += 1;
                            Some(sib)
                        } else {
                            None
                        }
                    };
                    match next {
                        Some(mut sib) => match self.cache.probe(&sib.vars, &sib.clauses) {
                            Probe::Hit(node) => {
                                frame.split_mut().results.push(node);
                                if node.is_bot() && self.config.backjump {
                                    self.cache.write(frame.slot.unwrap(), NodeId::BOT);
                                    return Outcome::Finish(NodeId::BOT);
                                }
                            }
                            Probe::Miss(loc) => {
                                sib.caching_loc = Some(loc);
                                let var = store.order().first(&sib.vars);
                                self.decisions += 1;
                                let scope = sib.clauses.clone();
                                let child = self.branch(formula, var.neg(), scope);
                                frame.split_mut().cur = Some(SplitCur {
                                    comp: sib,
                                    var,
                                    low: None,
                                });
                                return Outcome::Push(child);
                            }
                        },
                        None => {
                            // All siblings resolved: one decomposition node
                            // for the whole residual, written to the parent
                            // component's slot.
                            let parts: Vec<NodeId> = {
                                let split = frame.split_mut();
                                split
                                    .results
                                    .iter()
                                    .copied()
                                    .chain(split.folded.iter().map(|&l| store.literal(l)))
                                    .collect()
                            };
                            let mut node = store.add_decomposition(parts);
                            self.cache.write(frame.slot.expect("split without slot"), node);
                            self.maintain(store, frame, &mut [&mut node]);
                            return Outcome::Finish(self.wrap_implied(store, &frame.implied, node));
                        }
                    }
                }
            }
        }
    }

    /// Cache/node maintenance run at every combine point.
    fn maintain(&mut self, store: &Ccdd, frame: &mut Frame, locals: &mut [&mut NodeId]) {
        if store.over_budget(self.config.max_memory) {
            let mut roots: Vec<NodeId> = Vec::new();
            for f in &self.frames {
                f.collect_nodes(&mut roots);
            }
            frame.collect_nodes(&mut roots);
            roots.extend(locals.iter().map(|n| **n));
            roots.extend(self.cache.values());
            let relabeling = store.remove_redundant(roots);
            for f in &mut self.frames {
                f.remap_nodes(&relabeling);
            }
            frame.remap_nodes(&relabeling);
            for node in locals.iter_mut() {
                **node = relabeling.remap(**node);
            }
            self.cache.relabel_values(&relabeling);
        }

        let cache_memory = self.cache.memory();
        if cache_memory > self.config.max_cache_memory
            || cache_memory > store.memory().saturating_mul(8)
        {
            let mut keep: Vec<CacheLoc> = Vec::new();
            for f in &self.frames {
                f.collect_slots(&mut keep);
            }
            frame.collect_slots(&mut keep);
            let relocated = self.cache.clear(&keep);
            let mut locs = relocated.into_iter();
            for f in &mut self.frames {
                f.assign_slots(&mut locs);
            }
            frame.assign_slots(&mut locs);
            debug_assert!(locs.next().is_none());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Symbol;
    use crate::verify;
    use num_bigint::BigUint;
    use test_log::test;

    fn check_count(cnf: &Cnf, config: Config) -> NodeId {
        let store = Ccdd::new(cnf.max_var());
        let mut compiler = Compiler::new(config);
        let root = compiler.compile(&store, cnf);
        assert_eq!(
            store.sat_count(root, cnf.max_var() as usize),
            verify::count_models(cnf),
            "count mismatch for {:?}",
            cnf
        );
        root
    }

    fn propagation_only() -> Config {
        Config {
            implied: ImpliedMode::Propagation,
            ..Config::default()
        }
    }

    #[test]
    fn test_empty_formula_compiles_to_top() {
        let cnf = Cnf::new(0);
        let store = Ccdd::new(0);
        let mut compiler = Compiler::new(Config::default());
        let root = compiler.compile(&store, &cnf);
        assert_eq!(root, NodeId::TOP);
        assert_eq!(store.sat_count(root, 0), BigUint::from(1u32));
    }

    #[test]
    fn test_unit_clause_compiles_to_literal() {
        let cnf = Cnf::from_clauses(1, &[&[1]]);
        let store = Ccdd::new(1);
        let mut compiler = Compiler::new(Config::default());
        let root = compiler.compile(&store, &cnf);
        assert_eq!(root, store.literal(Lit::from_dimacs(1)));
    }

    #[test]
    fn test_unsatisfiable_formula() {
        let cnf = Cnf::from_clauses(1, &[&[1], &[-1]]);
        let store = Ccdd::new(1);
        let mut compiler = Compiler::new(Config::default());
        assert_eq!(compiler.compile(&store, &cnf), NodeId::BOT);
    }

    #[test]
    fn test_three_variable_scenario() {
        let cnf = Cnf::from_clauses(3, &[&[1, 2], &[-1, 3], &[2, -3]]);
        let root = check_count(&cnf, propagation_only());
        assert!(!root.is_bot());
    }

    #[test]
    fn test_disjoint_blocks_make_a_decomposition() {
        let cnf = Cnf::from_clauses(4, &[&[1, 2], &[3, 4]]);
        let store = Ccdd::new(4);
        let mut compiler = Compiler::new(propagation_only());
        let root = compiler.compile(&store, &cnf);
        assert_eq!(store.symbol(root), Symbol::Decompose);
        let children = store.children(root);
        assert_eq!(children.len(), 2);
        for child in children {
            assert!(matches!(store.symbol(child), Symbol::Decision(_)));
            assert_eq!(store.support(child).len(), 2);
        }
        assert_eq!(store.sat_count(root, 4), verify::count_models(&cnf));
    }

    #[test]
    fn test_counts_against_brute_force() {
        let cases: Vec<Cnf> = vec![
            Cnf::from_clauses(4, &[&[1, 2], &[-1, 3], &[2, -4], &[3, 4]]),
            Cnf::from_clauses(5, &[&[1, -2], &[-1, 2], &[2, 3], &[4, 5], &[-4, -5]]),
            Cnf::from_clauses(6, &[&[1, 2, 3], &[-3, 4], &[5, 6], &[-5, -6], &[1, -6]]),
            Cnf::from_clauses(3, &[&[1], &[-1, 2], &[-2, 3]]),
            Cnf::from_clauses(4, &[&[1, 2], &[1, -2], &[-1, 3, 4]]),
        ];
        for cnf in &cases {
            check_count(cnf, propagation_only());
            check_count(cnf, Config::default());
        }
    }

    #[test]
    fn test_backjump_on_and_off_agree() {
        let cases: Vec<Cnf> = vec![
            // Each block forces its first variable, exercising the fold path.
            Cnf::from_clauses(4, &[&[1, 2], &[1, -2], &[3, 4], &[3, -4]]),
            Cnf::from_clauses(6, &[&[1, 2], &[1, -2], &[3, 4, 5], &[6, 3], &[-6, -3]]),
            // An unsatisfiable block among satisfiable ones.
            Cnf::from_clauses(6, &[&[1, 2], &[3, 4], &[5, 6], &[5, -6], &[-5, 6], &[-5, -6]]),
        ];
        for cnf in &cases {
            let with = check_count(cnf, propagation_only());
            let without = check_count(
                cnf,
                Config {
                    backjump: false,
                    ..propagation_only()
                },
            );
            assert_eq!(with.is_bot(), without.is_bot());
        }
    }

    #[test]
    fn test_probing_strategies_agree() {
        let cnf = Cnf::from_clauses(5, &[&[1, 2, 3], &[-1, 4], &[-2, 4], &[4, 5], &[-4, -5]]);
        for implied in [ImpliedMode::Propagation, ImpliedMode::Probing, ImpliedMode::Auto] {
            check_count(
                &cnf,
                Config {
                    implied,
                    ..Config::default()
                },
            );
        }
    }

    #[test]
    fn test_kernelization_episode_counts() {
        // x1 ≡ x2 and x3 ≡ ~x4 as binary equivalences plus glue clauses; a
        // low ratio threshold makes the gate fire early.
        let cnf = Cnf::from_clauses(
            6,
            &[
                &[1, -2],
                &[-1, 2],
                &[3, 4],
                &[-3, -4],
                &[1, 3, 5],
                &[2, 4, 6],
                &[5, 6],
            ],
        );
        let eager = Config {
            implied: ImpliedMode::Propagation,
            kern_ratio: 0.001,
            kern_min_vars: 2,
            ..Config::default()
        };
        check_count(&cnf, eager);
        // The decomposition-only variant must agree on the count.
        let store = Ccdd::decomposition_only(6);
        let mut compiler = Compiler::new(propagation_only());
        let root = compiler.compile(&store, &cnf);
        assert_eq!(store.sat_count(root, 6), verify::count_models(&cnf));
    }

    #[test]
    fn test_cache_hits_across_branches() {
        // The (x3 ∨ x4) block reappears identically under both phases of x1,
        // so the second visit must hit the cache.
        let cnf = Cnf::from_clauses(4, &[&[1, 2, -3], &[1, 2, 3, 4], &[3, 4]]);
        let store = Ccdd::new(4);
        let mut compiler = Compiler::new(propagation_only());
        let root = compiler.compile(&store, &cnf);
        assert_eq!(store.sat_count(root, 4), verify::count_models(&cnf));
        assert!(compiler.cache_hits() > 0);
    }

    #[test]
    fn test_compiling_twice_is_deterministic() {
        let cnf = Cnf::from_clauses(4, &[&[1, 2], &[-1, 3], &[2, -4], &[3, 4]]);
        let store = Ccdd::new(4);
        let mut compiler = Compiler::new(propagation_only());
        let a = compiler.compile(&store, &cnf);
        let b = compiler.compile(&store, &cnf);
        // Identical canonical circuits share one handle.
        assert_eq!(a, b);
    }

    #[test]
    fn test_tiny_memory_budget_forces_maintenance() {
        let cnf = Cnf::from_clauses(6, &[&[1, 2, 3], &[-3, 4], &[5, 6], &[-5, -6], &[1, -6]]);
        let config = Config {
            implied: ImpliedMode::Propagation,
            max_memory: 1,
            max_cache_memory: 1,
            ..Config::default()
        };
        check_count(&cnf, config);
    }

    #[test]
    fn test_larger_pigeonhole_is_bot() {
        // 3 pigeons, 2 holes: unsatisfiable.
        let cnf = Cnf::from_clauses(
            6,
            &[
                &[1, 2],
                &[3, 4],
                &[5, 6],
                &[-1, -3],
                &[-1, -5],
                &[-3, -5],
                &[-2, -4],
                &[-2, -6],
                &[-4, -6],
            ],
        );
        let root = check_count(&cnf, propagation_only());
        assert!(root.is_bot());
    }

    /// Walks every node reachable from `root` checking the structural
    /// invariants of the canonical form.
    fn assert_canonical(store: &Ccdd, root: NodeId) {
        let mut stack = vec![root];
        let mut seen = Vec::new();
        while let Some(node) = stack.pop() {
            if seen.contains(&node) {
                continue;
            }
            seen.push(node);
            let children = store.children(node);
            stack.extend(children.iter().copied());
            match store.symbol(node) {
                Symbol::Decision(var) => {
                    assert_ne!(children[0], children[1]);
                    assert!(!(children[0].is_terminal() && children[1].is_terminal()));
                    for &child in &children {
                        for v in store.support(child) {
                            assert!(
                                store.order().precedes(var, v),
                                "decision {} below {}",
                                var,
                                v
                            );
                        }
                    }
                }
                Symbol::Decompose => {
                    assert!(children.len() >= 2);
                    assert!(children.windows(2).all(|w| w[0] < w[1]));
                    let mut vars: Vec<_> =
                        children.iter().flat_map(|&c| store.support(c)).collect();
                    let total = vars.len();
                    vars.sort();
                    vars.dedup();
                    assert_eq!(vars.len(), total, "decomposition children share variables");
                    for &child in &children {
                        assert!(!matches!(store.symbol(child), Symbol::Decompose));
                    }
                }
                Symbol::Kernelize => {
                    assert!(!children[0].is_bot());
                    assert!(!matches!(store.symbol(children[0]), Symbol::Kernelize));
                    assert!(children[1..].windows(2).all(|w| w[0] < w[1]));
                    for &equiv in &children[1..] {
                        assert!(matches!(store.symbol(equiv), Symbol::Decision(_)));
                        let pair = store.children(equiv);
                        assert!(store.is_literal(pair[0]) && store.is_literal(pair[1]));
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_compiled_circuits_are_canonical() {
        let cases: Vec<Cnf> = vec![
            Cnf::from_clauses(4, &[&[1, 2], &[-1, 3], &[2, -4], &[3, 4]]),
            Cnf::from_clauses(6, &[&[1, -2], &[-1, 2], &[3, 4], &[-3, -4], &[1, 3, 5], &[2, 4, 6], &[5, 6]]),
            Cnf::from_clauses(6, &[&[1, 2, 3], &[-3, 4], &[5, 6], &[-5, -6], &[1, -6]]),
        ];
        for cnf in &cases {
            let store = Ccdd::new(cnf.max_var());
            let mut compiler = Compiler::new(Config {
                implied: ImpliedMode::Propagation,
                kern_ratio: 0.001,
                kern_min_vars: 2,
                ..Config::default()
            });
            let root = compiler.compile(&store, cnf);
            assert_canonical(&store, root);
        }
    }

    #[test]
    fn test_random_formulas_all_strategies() {
        // A fixed bank of pseudo-random 3-CNFs; brute force is the judge.
        let mut seed = 0x2545f491u64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };
        for case in 0..12 {
            let num_vars = 4 + (case % 5) as u32;
            let num_clauses = 3 + (case % 7) as usize;
            let mut cnf = Cnf::new(num_vars);
            for _ in 0..num_clauses {
                let mut lits = Vec::new();
                for _ in 0..3 {
                    let v = (next() % num_vars as u64) as i32 + 1;
                    let sign = if next() % 2 == 0 { 1 } else { -1 };
                    lits.push(Lit::from_dimacs(v * sign));
                }
                cnf.add_clause(lits);
            }
            check_count(&cnf, propagation_only());
            check_count(&cnf, Config::default());
            check_count(
                &cnf,
                Config {
                    backjump: false,
                    kern_ratio: 0.001,
                    kern_min_vars: 2,
                    implied: ImpliedMode::Propagation,
                    ..Config::default()
                },
            );
        }
    }
}
