//! Literal Equivalence Store.
//!
//! A union-find over all `2·max_var + 2` literal codes with two extra
//! guarantees on top of the textbook structure:
//!
//! - **Sign propagation**: `find(l)` and `find(~l)` are complementary at all
//!   times. Parent entries are only ever written in mirrored pairs.
//! - **O(touched) reset**: every union records the re-parented variable, so
//!   [`LitEquivStore::reset`] restores only what changed. The store is
//!   designed to be a long-lived scratch structure, reset thousands of times
//!   per compilation.
//!
//! An implied literal is expressed as an equivalence with the constant *true*
//! literal; since the constant pseudo-variable has rank 0 it always wins the
//! representative election.

use crate::order::VarOrder;
use crate::types::{Lit, Var};

/// Result of merging two equivalence classes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Union {
    Merged,
    Already,
    /// The two literals are already complementary; the requested equivalence
    /// is contradictory.
    Contradiction,
}

#[derive(Debug)]
pub struct LitEquivStore {
    parent: Vec<u32>,
    /// Variable ranks, shared layout with [`VarOrder`] (index 0 = constants).
    rank: Vec<u32>,
    touched: Vec<u32>,
    dirty: Vec<bool>,
}

impl LitEquivStore {
    pub fn new(order: &VarOrder) -> Self {
        let max_var = order.max_var();
        let size = 2 * (max_var as usize + 1);
        let mut rank = vec![0; max_var as usize + 1];
        for v in 1..=max_var {
            rank[v as usize] = order.rank(Var::new(v));
        }
        Self {
            parent: (0..size as u32).collect(),
            rank,
            touched: Vec::new(),
            dirty: vec![false; max_var as usize + 1],
        }
    }

    fn rank_of(&self, lit: Lit) -> u32 {
        self.rank[(lit.code() >> 1) as usize]
    }

    /// The representative of `lit`'s class. Complement-closed:
    /// `find(~l) == ~find(l)`.
    pub fn find(&self, lit: Lit) -> Lit {
        let mut code = lit.code();
        while self.parent[code as usize] != code {
            code = self.parent[code as usize];
        }
        Lit::from_code(code)
    }

    /// Whether `lit` is equivalent to the constant *true*.
    pub fn is_implied(&self, lit: Lit) -> bool {
        self.find(lit) == Lit::TRUE
    }

    fn touch(&mut self, var_index: usize) {
        if !self.dirty[var_index] {
            self.dirty[var_index] = true;
            self.touched.push(var_index as u32);
        }
    }

    /// Merge the classes of `a` and `b`. The representative of the merged
    /// class is the order-preferred literal of the two old representatives.
    pub fn union(&mut self, a: Lit, b: Lit) -> Union {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return Union::Already;
        }
        if ra == rb.negate() {
            return Union::Contradiction;
        }
        let (keep, move_) = if self.rank_of(ra) <= self.rank_of(rb) {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[move_.code() as usize] = keep.code();
        self.parent[move_.negate().code() as usize] = keep.negate().code();
        self.touch((move_.code() >> 1) as usize);
        Union::Merged
    }

    /// Shorthand for "this literal holds": union with the constant *true*.
    pub fn assume(&mut self, lit: Lit) -> Union {
        self.union(Lit::TRUE, lit)
    }

    /// Whether any union has been recorded since the last reset.
    pub fn is_trivial(&self) -> bool {
        self.touched.is_empty()
    }

    /// Restore the identity state in time proportional to the touched set.
    pub fn reset(&mut self) {
        for &v in &self.touched {
            let pos = 2 * v;
            self.parent[pos as usize] = pos;
            self.parent[pos as usize + 1] = pos + 1;
            self.dirty[v as usize] = false;
        }
        self.touched.clear();
    }

    /// All non-trivial classes, each keyed by a positive (or constant-true)
    /// representative and listing the member literals oriented accordingly.
    fn clusters(&self) -> Vec<(Lit, Vec<Lit>)> {
        let mut reps: Vec<Lit> = Vec::new();
        let mut members: Vec<(Lit, Lit)> = Vec::new();
        for &v in &self.touched {
            let lit = Lit::from_code(2 * v);
            let root = self.find(lit);
            debug_assert_ne!(root, lit, "touched variable with identity parent");
            let (root, lit) = if root.is_negated() {
                (root.negate(), lit.negate())
            } else {
                (root, lit)
            };
            if !members.iter().any(|&(r, _)| r == root) && !reps.contains(&root) {
                reps.push(root);
            }
            members.push((root, lit));
        }
        reps.sort();
        reps.iter()
            .map(|&rep| {
                let mut group: Vec<Lit> =
                    members.iter().filter(|&&(r, _)| r == rep).map(|&(_, m)| m).collect();
                group.sort();
                (rep, group)
            })
            .collect()
    }

    /// The recorded equivalences as sorted `(representative, member)` pairs,
    /// deduplicated and transitively closed. Pairs with representative
    /// [`Lit::TRUE`] state that the member literal is implied outright.
    pub fn output_equivalences(&self) -> Vec<(Lit, Lit)> {
        let mut pairs = Vec::new();
        for (rep, members) in self.clusters() {
            for member in members {
                pairs.push((rep, member));
            }
        }
        pairs.sort_by_key(|&(_, m)| m);
        pairs
    }

    /// Equivalences holding in both `self` and `other`: clusters of `self`
    /// are split by membership in `other`, and every surviving subgroup of
    /// size >= 2 contributes pairs against its order-preferred literal.
    pub fn intersection(&self, other: &LitEquivStore) -> Vec<(Lit, Lit)> {
        let mut pairs = Vec::new();
        for (rep, members) in self.clusters() {
            let mut cluster = Vec::with_capacity(members.len() + 1);
            cluster.push(rep);
            cluster.extend(members);

            let keys: Vec<Lit> = cluster.iter().map(|&m| other.find(m)).collect();
            let mut seen: Vec<Lit> = Vec::new();
            for key in keys {
                if seen.contains(&key) {
                    continue;
                }
                seen.push(key);
                let group: Vec<Lit> = cluster
                    .iter()
                    .copied()
                    .filter(|&m| other.find(m) == key)
                    .collect();
                if group.len() < 2 {
                    continue;
                }
                let preferred = *group
                    .iter()
                    .min_by_key(|&&m| (self.rank_of(m), m.code()))
                    .unwrap();
                for &member in &group {
                    if member == preferred {
                        continue;
                    }
                    let (rep, member) = if preferred.is_negated() {
                        (preferred.negate(), member.negate())
                    } else {
                        (preferred, member)
                    };
                    pairs.push((rep, member));
                }
            }
        }
        pairs.sort_by_key(|&(_, m)| m);
        pairs
    }
}
