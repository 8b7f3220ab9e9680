//! Brute-force model counting, the independent oracle for correctness tests.
//!
//! Enumerates every assignment, so it is only usable for small variable
//! counts; the compiler's counts are asserted against it in tests.

use num_bigint::BigUint;

use crate::cnf::Cnf;

/// The exact model count of `cnf` over all `max_var` variables, by
/// exhaustive enumeration.
///
/// # Panics
///
/// Panics when `max_var > 24`; this is a test oracle, not a counter.
pub fn count_models(cnf: &Cnf) -> BigUint {
    let n = cnf.max_var();
    assert!(n <= 24, "brute-force enumeration over {} variables", n);

    let mut count: u64 = 0;
    'outer: for assignment in 0u64..(1u64 << n) {
        for clause in cnf.clauses() {
            let satisfied = clause.iter().any(|lit| {
                let bit = assignment >> (lit.var().id() - 1) & 1 == 1;
                bit != lit.is_negated()
            });
            if !satisfied {
                continue 'outer;
            }
        }
        count += 1;
    }
    BigUint::from(count)
}
