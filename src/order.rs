//! Variable orders.
//!
//! Every store carries a total order on its variables. Decision nodes must
//! branch on the order-minimal variable of their support, and the
//! literal-equivalence store elects the order-preferred literal of a class as
//! its representative, so the same order object is threaded through both.
//! The constant pseudo-variable 0 is implicitly first, so an equivalence class
//! containing *true* is always represented by *true*.

use crate::types::Var;

#[derive(Debug, Clone)]
pub struct VarOrder {
    /// `rank[v]` is the position of variable `v`; index 0 is the constant
    /// pseudo-variable with rank 0, real ranks start at 1.
    rank: Vec<u32>,
    order: Vec<Var>,
}

impl VarOrder {
    /// The identity order `x1 < x2 < ...`.
    pub fn natural(max_var: u32) -> Self {
        let order: Vec<Var> = (1..=max_var).map(Var::new).collect();
        Self::from_order(max_var, order)
    }

    /// Builds an order from an explicit permutation of `1..=max_var`.
    ///
    /// # Panics
    ///
    /// Panics unless `order` is a permutation of all variables.
    pub fn from_order(max_var: u32, order: Vec<Var>) -> Self {
        assert_eq!(order.len(), max_var as usize, "Order must mention every variable");
        let mut rank = vec![u32::MAX; max_var as usize + 1];
        rank[0] = 0;
        for (position, var) in order.iter().enumerate() {
            assert!(
                rank[var.id() as usize] == u32::MAX,
                "Duplicate variable {} in order",
                var
            );
            rank[var.id() as usize] = position as u32 + 1;
        }
        Self { rank, order }
    }

    pub fn max_var(&self) -> u32 {
        self.order.len() as u32
    }

    /// The position of `var`, 1-based (0 is the constant pseudo-variable).
    pub fn rank(&self, var: Var) -> u32 {
        self.rank[var.id() as usize]
    }

    /// Whether `a` comes before `b`.
    pub fn precedes(&self, a: Var, b: Var) -> bool {
        self.rank(a) < self.rank(b)
    }

    /// The order-minimal variable of a non-empty set.
    pub fn first(&self, vars: &[Var]) -> Var {
        *vars
            .iter()
            .min_by_key(|v| self.rank(**v))
            .expect("first() on an empty variable set")
    }

    pub fn is_natural(&self) -> bool {
        self.order.iter().enumerate().all(|(i, v)| v.id() as usize == i + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = Var> + '_ {
        self.order.iter().copied()
    }
}
