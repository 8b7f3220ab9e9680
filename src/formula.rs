//! Mutable search state over a clause pool.
//!
//! The pool is content-addressed: structurally identical clauses share one
//! id, including clauses interned later by kernelization episodes. This is
//! what makes component signatures deterministic across branches (§cache)
//! and lets a substituted clause coincide with an original one.
//!
//! Assignments live on a trail with level marks; propagation is driven by
//! per-literal occurrence lists and an activation mask, so clauses replaced
//! by a kernelization episode are invisible to the propagator until the
//! episode ends.

use std::collections::HashSet;

use log::trace;

use crate::cache::CacheLoc;
use crate::cnf::Cnf;
use crate::equiv::{LitEquivStore, Union};
use crate::table::Table;
use crate::types::{Lit, Var};
use crate::utils::{pairing_seq, MyHash};

pub(crate) type ClauseId = u32;

#[derive(Debug, Eq, PartialEq)]
struct Clause(Box<[Lit]>);

impl MyHash for Clause {
    fn hash(&self) -> u64 {
        pairing_seq(self.0.iter().map(|l| l.code() as u64))
    }
}

/// A connected sub-problem: sorted free variables plus the surviving clause
/// ids that mention them. Carries its cache slot once probed.
#[derive(Debug, Clone, Default)]
pub(crate) struct Component {
    pub vars: Vec<Var>,
    pub clauses: Vec<ClauseId>,
    pub caching_loc: Option<CacheLoc>,
}

/// An opaque conflict reason: the falsified clause. The engine only ever
/// forwards it; conflict analysis is not done here.
#[derive(Debug, Copy, Clone)]
pub(crate) struct Conflict {
    #[allow(dead_code)]
    pub clause: ClauseId,
}

/// Outcome of scanning a component for literal equivalences.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Detect {
    Nothing,
    Found,
    /// The binary clauses force a literal to equal its own negation.
    Contradiction,
}

/// Clause bookkeeping restored when a kernelization episode ends.
#[derive(Debug)]
pub(crate) struct KernelInfo {
    activated: Vec<ClauseId>,
    deactivated: Vec<ClauseId>,
    pub component: Component,
}

enum Status {
    Satisfied,
    Unit(Lit),
    Conflicting,
    Open,
}

pub(crate) struct Formula {
    clauses: Table<Clause>,
    active: Vec<bool>,
    /// Occurrence lists per literal code; static per clause once interned.
    occ: Vec<Vec<ClauseId>>,
    value: Vec<Option<bool>>,
    trail: Vec<Lit>,
    trail_lim: Vec<usize>,
    qhead: usize,
    // Scratch for connectivity decomposition, epoch-stamped so it needs no
    // clearing between calls.
    comp_parent: Vec<u32>,
    comp_stamp: Vec<u64>,
    epoch: u64,
}

impl Formula {
    pub fn new(cnf: &Cnf) -> Self {
        let max_var = cnf.max_var() as usize;
        let mut formula = Self {
            clauses: Table::new(6),
            active: Vec::new(),
            occ: vec![Vec::new(); 2 * max_var + 2],
            value: vec![None; max_var + 1],
            trail: Vec::new(),
            trail_lim: Vec::new(),
            qhead: 0,
            comp_parent: vec![0; max_var + 1],
            comp_stamp: vec![0; max_var + 1],
            epoch: 0,
        };
        for clause in cnf.clauses() {
            let id = formula.intern(clause.clone());
            formula.active[id as usize] = true;
        }
        formula
    }

    /// Content-addressed insertion; re-interning identical content returns
    /// the existing id. Fresh clauses start inactive.
    fn intern(&mut self, lits: Vec<Lit>) -> ClauseId {
        debug_assert!(lits.windows(2).all(|w| w[0] < w[1]), "clause not normalized");
        let (id, fresh) = self.clauses.put(Clause(lits.into_boxed_slice()));
        if fresh {
            self.active.push(false);
            for &lit in self.clauses.value(id).0.iter() {
                self.occ[lit.code() as usize].push(id);
            }
        }
        id
    }

    pub fn all_active_clauses(&self) -> Vec<ClauseId> {
        (0..self.clauses.len() as ClauseId)
            .filter(|&id| self.active[id as usize])
            .collect()
    }

    pub fn lits(&self, id: ClauseId) -> &[Lit] {
        &self.clauses.value(id).0
    }

    // -- assignment and trail ------------------------------------------------

    pub fn value_of(&self, var: Var) -> Option<bool> {
        self.value[var.id() as usize]
    }

    pub fn lit_value(&self, lit: Lit) -> Option<bool> {
        self.value_of(lit.var()).map(|v| v != lit.is_negated())
    }

    pub fn is_free(&self, var: Var) -> bool {
        self.value_of(var).is_none()
    }

    pub fn trail_len(&self) -> usize {
        self.trail.len()
    }

    pub fn num_levels(&self) -> usize {
        self.trail_lim.len()
    }

    pub fn trail_from(&self, mark: usize) -> &[Lit] {
        &self.trail[mark..]
    }

    pub fn push_level(&mut self) {
        self.trail_lim.push(self.trail.len());
    }

    pub fn assign(&mut self, lit: Lit) {
        debug_assert!(self.is_free(lit.var()), "assigning assigned {}", lit);
        self.value[lit.var().id() as usize] = Some(lit.is_positive());
        self.trail.push(lit);
        trace!("assign {} at level {}", lit, self.trail_lim.len());
    }

    /// Undo the trail past `trail_mark` and drop levels past `level_mark`.
    pub fn backtrack(&mut self, trail_mark: usize, level_mark: usize) {
        while self.trail.len() > trail_mark {
            let lit = self.trail.pop().unwrap();
            self.value[lit.var().id() as usize] = None;
        }
        self.trail_lim.truncate(level_mark);
        self.qhead = trail_mark;
    }

    // -- propagation ---------------------------------------------------------

    fn status(&self, id: ClauseId) -> Status {
        let mut free = None;
        let mut free_count = 0;
        for &lit in self.lits(id) {
            match self.lit_value(lit) {
                Some(true) => return Status::Satisfied,
                Some(false) => {}
                None => {
                    free = Some(lit);
                    free_count += 1;
                }
            }
        }
        match free_count {
            0 => Status::Conflicting,
            1 => Status::Unit(free.unwrap()),
            _ => Status::Open,
        }
    }

    /// Assert pre-existing units of `scope` (fresh scopes only; propagation
    /// alone never revisits clauses that were units from the start).
    pub fn scan(&mut self, scope: &[ClauseId]) -> Result<(), Conflict> {
        for &id in scope {
            if !self.active[id as usize] {
                continue;
            }
            match self.status(id) {
                Status::Conflicting => return Err(Conflict { clause: id }),
                Status::Unit(lit) => self.assign(lit),
                _ => {}
            }
        }
        Ok(())
    }

    /// Unit propagation to fixpoint from the current queue head.
    pub fn propagate(&mut self) -> Result<(), Conflict> {
        while self.qhead < self.trail.len() {
            let lit = self.trail[self.qhead];
            self.qhead += 1;
            let falsified = lit.negate().code() as usize;
            for i in 0..self.occ[falsified].len() {
                let id = self.occ[falsified][i];
                if !self.active[id as usize] {
                    continue;
                }
                match self.status(id) {
                    Status::Conflicting => {
                        trace!("conflict in clause {}", id);
                        return Err(Conflict { clause: id });
                    }
                    Status::Unit(unit) => self.assign(unit),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Failed-literal probing over `vars`: a literal whose assumption
    /// propagates to a conflict is asserted in the opposite phase. This is
    /// the "exact" implicate strategy; a conflict on the forced phase means
    /// the component itself is unsatisfiable.
    pub fn probe(&mut self, vars: &[Var]) -> Result<(), Conflict> {
        for &var in vars {
            for lit in [var.pos(), var.neg()] {
                if !self.is_free(var) {
                    break;
                }
                let (trail_mark, level_mark) = (self.trail.len(), self.trail_lim.len());
                self.push_level();
                self.assign(lit);
                let result = self.propagate();
                self.backtrack(trail_mark, level_mark);
                if result.is_err() {
                    trace!("probe: {} failed, asserting {}", lit, lit.negate());
                    self.assign(lit.negate());
                    self.propagate()?;
                }
            }
        }
        Ok(())
    }

    // -- components ----------------------------------------------------------

    /// Free variables of the active, unsatisfied clauses in `scope`.
    pub fn free_vars(&mut self, scope: &[ClauseId]) -> Vec<Var> {
        self.epoch += 1;
        let mut vars = Vec::new();
        for &id in scope {
            if !self.active[id as usize] {
                continue;
            }
            if let Status::Open = self.status(id) {
                for i in 0..self.lits(id).len() {
                    let v = self.lits(id)[i].var();
                    if self.value[v.id() as usize].is_none()
                        && self.comp_stamp[v.id() as usize] != self.epoch
                    {
                        self.comp_stamp[v.id() as usize] = self.epoch;
                        vars.push(v);
                    }
                }
            }
        }
        vars.sort();
        vars
    }

    fn comp_find(&mut self, var: u32) -> u32 {
        let mut v = var;
        while self.comp_parent[v as usize] != v {
            let parent = self.comp_parent[v as usize];
            self.comp_parent[v as usize] = self.comp_parent[parent as usize];
            v = parent;
        }
        v
    }

    /// Split the residual of `scope` into maximal variable-connected
    /// components. Requires propagation to be at fixpoint.
    pub fn decompose(&mut self, scope: &[ClauseId]) -> Vec<Component> {
        self.epoch += 1;
        let mut touched: Vec<u32> = Vec::new();
        let mut surviving: Vec<ClauseId> = Vec::new();

        for &id in scope {
            if !self.active[id as usize] {
                continue;
            }
            match self.status(id) {
                Status::Satisfied => continue,
                Status::Open => {}
                _ => debug_assert!(false, "decompose before propagation fixpoint"),
            }
            surviving.push(id);
            let mut first: Option<u32> = None;
            for i in 0..self.lits(id).len() {
                let lit = self.lits(id)[i];
                let v = lit.var().id();
                if self.value[v as usize].is_some() {
                    continue;
                }
                if self.comp_stamp[v as usize] != self.epoch {
                    self.comp_stamp[v as usize] = self.epoch;
                    self.comp_parent[v as usize] = v;
                    touched.push(v);
                }
                match first {
                    None => first = Some(v),
                    Some(f) => {
                        let (a, b) = (self.comp_find(f), self.comp_find(v));
                        if a != b {
                            self.comp_parent[b as usize] = a;
                        }
                    }
                }
            }
        }

        surviving.sort();
        surviving.dedup();
        touched.sort();

        let mut roots: Vec<u32> = Vec::new();
        let mut components: Vec<Component> = Vec::new();
        let mut index_of = |roots: &mut Vec<u32>, components: &mut Vec<Component>, root: u32| {
            match roots.iter().position(|&r| r == root) {
                Some(i) => i,
                None => {
                    roots.push(root);
                    components.push(Component::default());
                    components.len() - 1
                }
            }
        };
        for &v in &touched {
            let root = self.comp_find(v);
            let i = index_of(&mut roots, &mut components, root);
            components[i].vars.push(Var::new(v));
        }
        for &id in &surviving {
            let v = self
                .lits(id)
                .iter()
                .find(|l| self.value[l.var().id() as usize].is_none())
                .map(|l| l.var().id())
                .expect("surviving clause with no free literal");
            let root = self.comp_find(v);
            let i = index_of(&mut roots, &mut components, root);
            components[i].clauses.push(id);
        }
        components
    }

    // -- kernelization support ----------------------------------------------

    /// Scan the residual binary clauses of `comp` for literal equivalences
    /// (`(a ∨ b)` together with `(~a ∨ ~b)` forces `a ≡ ~b`) and record them
    /// in `store`.
    pub fn detect_equivalences(&self, comp: &Component, store: &mut LitEquivStore) -> Detect {
        store.reset();
        let mut binaries: HashSet<(u32, u32)> = HashSet::new();
        for &id in &comp.clauses {
            if !self.active[id as usize] {
                continue;
            }
            let mut free = [Lit::TRUE; 2];
            let mut count = 0;
            let mut satisfied = false;
            for &lit in self.lits(id) {
                match self.lit_value(lit) {
                    Some(true) => satisfied = true,
                    Some(false) => {}
                    None => {
                        if count < 2 {
                            free[count] = lit;
                        }
                        count += 1;
                    }
                }
            }
            if satisfied || count != 2 {
                continue;
            }
            let (a, b) = (free[0].code().min(free[1].code()), free[0].code().max(free[1].code()));
            binaries.insert((a, b));
        }

        for &(a, b) in &binaries {
            let (na, nb) = (a ^ 1, b ^ 1);
            let mirrored = (na.min(nb), na.max(nb));
            if binaries.contains(&mirrored) {
                let result = store.union(Lit::from_code(a), Lit::from_code(b).negate());
                if result == Union::Contradiction {
                    return Detect::Contradiction;
                }
            }
        }
        if store.is_trivial() {
            Detect::Nothing
        } else {
            Detect::Found
        }
    }

    /// Replace `comp`'s clauses by their image under `equiv`: literals are
    /// rewritten to representatives, tautologies vanish, and the surviving
    /// residual clauses are interned (content-addressed, so a clause that
    /// already exists elsewhere keeps its id) and activated while the
    /// originals are deactivated.
    pub fn kernelize(&mut self, comp: &Component, equiv: &LitEquivStore) -> KernelInfo {
        let mut deactivated = Vec::new();
        for &id in &comp.clauses {
            if self.active[id as usize] {
                self.active[id as usize] = false;
                deactivated.push(id);
            }
        }

        let mut activated = Vec::new();
        let mut new_clauses = Vec::new();
        'clauses: for &id in &deactivated {
            let mut image: Vec<Lit> = Vec::new();
            for i in 0..self.lits(id).len() {
                let lit = self.lits(id)[i];
                match self.lit_value(lit) {
                    Some(true) => continue 'clauses,
                    Some(false) => continue,
                    None => image.push(equiv.find(lit)),
                }
            }
            image.sort();
            image.dedup();
            for pair in image.windows(2) {
                if pair[0].var() == pair[1].var() {
                    continue 'clauses;
                }
            }
            let new_id = self.intern(image);
            if !self.active[new_id as usize] {
                self.active[new_id as usize] = true;
                activated.push(new_id);
            }
            new_clauses.push(new_id);
        }

        new_clauses.sort();
        new_clauses.dedup();
        let mut vars: Vec<Var> = Vec::new();
        self.epoch += 1;
        for &id in &new_clauses {
            for i in 0..self.lits(id).len() {
                let lit = self.lits(id)[i];
                let v = lit.var().id();
                if self.value[v as usize].is_none() && self.comp_stamp[v as usize] != self.epoch {
                    self.comp_stamp[v as usize] = self.epoch;
                    vars.push(lit.var());
                }
            }
        }
        vars.sort();

        KernelInfo {
            activated,
            deactivated,
            component: Component {
                vars,
                clauses: new_clauses,
                caching_loc: None,
            },
        }
    }

    /// Undo a [`Formula::kernelize`] episode.
    pub fn unkernelize(&mut self, info: &KernelInfo) {
        for &id in &info.activated {
            self.active[id as usize] = false;
        }
        for &id in &info.deactivated {
            self.active[id as usize] = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::VarOrder;
    use test_log::test;

    fn lit(value: i32) -> Lit {
        Lit::from_dimacs(value)
    }

    #[test]
    fn test_scan_and_propagate_units() {
        let cnf = Cnf::from_clauses(3, &[&[1], &[-1, 2], &[-2, 3]]);
        let mut f = Formula::new(&cnf);
        let scope = f.all_active_clauses();
        f.scan(&scope).unwrap();
        f.propagate().unwrap();
        assert_eq!(f.lit_value(lit(1)), Some(true));
        assert_eq!(f.lit_value(lit(2)), Some(true));
        assert_eq!(f.lit_value(lit(3)), Some(true));
    }

    #[test]
    fn test_conflict() {
        let cnf = Cnf::from_clauses(2, &[&[1], &[-1, 2], &[-1, -2]]);
        let mut f = Formula::new(&cnf);
        let scope = f.all_active_clauses();
        f.scan(&scope).unwrap();
        assert!(f.propagate().is_err());
    }

    #[test]
    fn test_backtrack_restores() {
        let cnf = Cnf::from_clauses(2, &[&[-1, 2]]);
        let mut f = Formula::new(&cnf);
        let (tm, lm) = (f.trail_len(), f.num_levels());
        f.push_level();
        f.assign(lit(1));
        f.propagate().unwrap();
        assert_eq!(f.lit_value(lit(2)), Some(true));
        f.backtrack(tm, lm);
        assert!(f.is_free(Var::new(1)));
        assert!(f.is_free(Var::new(2)));
    }

    #[test]
    fn test_probe_finds_forced_literal() {
        // x1 false forces a conflict through both chains, so probing must
        // assert x1 even though plain propagation finds nothing.
        let cnf = Cnf::from_clauses(3, &[&[1, 2], &[1, -2], &[1, 3]]);
        let mut f = Formula::new(&cnf);
        let vars: Vec<Var> = (1..=3).map(Var::new).collect();
        f.probe(&vars).unwrap();
        assert_eq!(f.lit_value(lit(1)), Some(true));
    }

    #[test]
    fn test_decompose_disjoint() {
        let cnf = Cnf::from_clauses(4, &[&[1, 2], &[3, 4]]);
        let mut f = Formula::new(&cnf);
        let scope = f.all_active_clauses();
        let comps = f.decompose(&scope);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].vars, vec![Var::new(1), Var::new(2)]);
        assert_eq!(comps[1].vars, vec![Var::new(3), Var::new(4)]);
    }

    #[test]
    fn test_decompose_splits_after_assignment() {
        // x3 is the only bridge; assigning it splits the residual in two.
        let cnf = Cnf::from_clauses(5, &[&[1, 2, 3], &[3, 4, 5]]);
        let mut f = Formula::new(&cnf);
        let scope = f.all_active_clauses();
        assert_eq!(f.decompose(&scope).len(), 1);
        f.push_level();
        f.assign(lit(-3));
        f.propagate().unwrap();
        let comps = f.decompose(&scope);
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].vars, vec![Var::new(1), Var::new(2)]);
        assert_eq!(comps[1].vars, vec![Var::new(4), Var::new(5)]);
    }

    #[test]
    fn test_duplicate_clauses_share_id() {
        let cnf = Cnf::from_clauses(2, &[&[1, 2], &[2, 1]]);
        let f = Formula::new(&cnf);
        assert_eq!(f.all_active_clauses().len(), 1);
    }

    #[test]
    fn test_detect_equivalences() {
        let order = VarOrder::natural(3);
        let mut store = LitEquivStore::new(&order);
        // x1 ≡ x2 via the two binary clauses; x3 unrelated.
        let cnf = Cnf::from_clauses(3, &[&[1, -2], &[-1, 2], &[1, 3]]);
        let mut f = Formula::new(&cnf);
        let scope = f.all_active_clauses();
        let comps = f.decompose(&scope);
        assert_eq!(comps.len(), 1);
        assert_eq!(f.detect_equivalences(&comps[0], &mut store), Detect::Found);
        assert_eq!(store.find(lit(2)), lit(1));
    }

    #[test]
    fn test_kernelize_substitutes_and_restores() {
        let order = VarOrder::natural(3);
        let mut store = LitEquivStore::new(&order);
        let cnf = Cnf::from_clauses(3, &[&[1, -2], &[-1, 2], &[2, 3]]);
        let mut f = Formula::new(&cnf);
        let scope = f.all_active_clauses();
        let comps = f.decompose(&scope);
        assert_eq!(f.detect_equivalences(&comps[0], &mut store), Detect::Found);

        let info = f.kernelize(&comps[0], &store);
        // The two equivalence clauses vanish; (x2 ∨ x3) becomes (x1 ∨ x3).
        assert_eq!(info.component.clauses.len(), 1);
        assert_eq!(info.component.vars, vec![Var::new(1), Var::new(3)]);
        let image = f.lits(info.component.clauses[0]).to_vec();
        assert_eq!(image, vec![lit(1), lit(3)]);

        f.unkernelize(&info);
        let comps = f.decompose(&scope);
        assert_eq!(comps[0].clauses.len(), 3);
    }
}
