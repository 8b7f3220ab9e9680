//! # ccdd-rs: a CNF knowledge compiler
//!
//! **`ccdd-rs`** compiles a CNF formula into a compact, canonical DAG, a
//! *constrained conjunction & decision diagram* (CCDD), on which model
//! counting, uniform sampling, conditioning and clausal entailment all run
//! in time polynomial in the circuit size. Compile once, query many times.
//!
//! ## How it works
//!
//! A branch-and-decompose search (an explicit-stack DPLL over the residual
//! formula) is fused with a hash-consed node store that keeps the circuit
//! canonical on the fly:
//!
//! - **Decomposition nodes** conjoin variable-disjoint sub-circuits, so
//!   counts multiply across independent components.
//! - **Kernelization nodes** factor out literal equivalences (`x ≡ ~y`),
//!   both structurally (when the two branches of a decision agree on them)
//!   and during search (substituting a component by its kernel).
//! - A **component cache** maps each syntactic sub-problem, identified by
//!   its variable set and content-addressed clause ids, to its compiled
//!   node, so identical residuals are compiled once across branches.
//!
//! ## Basic Usage
//!
//! ```rust
//! use ccdd_rs::{Ccdd, Cnf, Compiler, Config};
//!
//! // (x1 ∨ x2) ∧ (~x1 ∨ x3)
//! let cnf = Cnf::from_clauses(3, &[&[1, 2], &[-1, 3]]);
//!
//! let store = Ccdd::new(cnf.max_var());
//! let mut compiler = Compiler::new(Config::default());
//! let root = compiler.compile(&store, &cnf);
//!
//! assert_eq!(store.sat_count(root, 3), 4u32.into());
//! assert!(store.entails_clause(root, &[ccdd_rs::Lit::from_dimacs(2),
//!                                      ccdd_rs::Lit::from_dimacs(3)]));
//! ```
//!
//! ## Core components
//!
//! - [`ccdd`]: the canonical node store and its rewrite rules.
//! - [`compile`]: the search engine driving compilation.
//! - [`cache`]: the component cache.
//! - [`equiv`]: the literal-equivalence union-find.
//! - [`models`]: counting, conditioning, entailment, witnesses, sampling.
//! - [`io`]: a line-oriented text format for round-trip testing.

pub mod cache;
pub mod ccdd;
pub mod cnf;
pub mod compile;
pub mod dot;
pub mod equiv;
pub(crate) mod formula;
pub mod io;
pub mod models;
pub mod node;
pub mod order;
pub mod reference;
pub mod table;
pub mod types;
pub mod utils;
pub mod verify;

pub use crate::ccdd::Ccdd;
pub use crate::cnf::Cnf;
pub use crate::compile::{Compiler, Config, ImpliedMode};
pub use crate::node::Symbol;
pub use crate::order::VarOrder;
pub use crate::reference::NodeId;
pub use crate::types::{Lit, Var};
