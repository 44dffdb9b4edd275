//! The external solver capability, seen through a narrow trait.
//!
//! The engine only ever needs three judgements: satisfiability of a path
//! constraint, implication between two constraints, and simplification.
//! Each call is conceptually a fresh solver scope; implementations must not
//! leak assertions between queries. The engine drives the oracle from a
//! single thread.
//!
//! The in-tree [`StructuralOracle`] is deliberately conservative: it only
//! reports unsatisfiability when a constraint reduces to literal `false`
//! under structural simplification. A bit-precise SMT backend plugs in
//! behind the same trait.

use std::fmt;

use crate::{
    expr::Expr,
    simplify::simplify,
};

/// Solver judgements used by the engine.
pub trait SolverOracle: fmt::Debug + Send + Sync {
    /// Is `cond` satisfiable, given the background `domain` facts (variable
    /// range assumptions collected at symbol creation)?
    fn is_sat(&self, cond: &Expr, domain: &[Expr]) -> bool;

    /// Does `a` imply `b`?
    fn implies(&self, a: &Expr, b: &Expr) -> bool;

    fn simplify(&self, expr: &Expr) -> Expr;
}

/// Syntactic decision procedure over the structural simplifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralOracle;

impl SolverOracle for StructuralOracle {
    fn is_sat(&self, cond: &Expr, domain: &[Expr]) -> bool {
        let full = Expr::and_all(std::iter::once(cond.clone()).chain(domain.iter().cloned()));
        !simplify(&full).is_false()
    }

    fn implies(&self, a: &Expr, b: &Expr) -> bool {
        // a ⇒ b is valid iff a ∧ ¬b is unsatisfiable
        simplify(&a.clone().and(b.clone().negate())).is_false()
    }

    fn simplify(&self, expr: &Expr) -> Expr {
        simplify(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Op, Sort};

    #[test]
    fn sat_is_conservative() {
        let oracle = StructuralOracle;
        let x = Expr::sym("x", Sort::Int);
        let p = Expr::app(Op::Gt, vec![x.clone(), Expr::int(0)]);
        assert!(oracle.is_sat(&p, &[]));
        assert!(!oracle.is_sat(&p.clone().and(p.clone().negate()), &[]));
        // non-structural contradictions stay "satisfiable"
        let q = Expr::app(Op::Lt, vec![x, Expr::int(0)]);
        assert!(oracle.is_sat(&p.and(q), &[]));
    }

    #[test]
    fn self_implication() {
        let oracle = StructuralOracle;
        let p = Expr::app(Op::Ge, vec![Expr::sym("x", Sort::Int), Expr::int(10)]);
        assert!(oracle.implies(&p, &p));
        assert!(!oracle.implies(&p, &p.clone().negate()));
    }
}
