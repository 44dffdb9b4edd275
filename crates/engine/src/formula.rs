//! Formula store: guarded expressions attached to variables.

use indexmap::IndexMap;

use crate::{
    expr::{Expr, Op},
    simplify::simplify,
    solver::SolverOracle,
    var::VarId,
};

/// One `(expression, path-constraint)` pair: on any path where the
/// constraint is satisfiable, the owning variable equals the expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardedExpr {
    pub expr: Expr,
    pub constraint: Expr,
}

impl GuardedExpr {
    pub fn new(expr: Expr, constraint: Expr) -> Self {
        Self { expr, constraint }
    }
}

/// The set of guarded expressions a variable currently holds, in insertion
/// order, deduplicated structurally after simplification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Formula {
    pairs: Vec<GuardedExpr>,
}

impl Formula {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(expr: Expr, constraint: Expr) -> Self {
        let mut formula = Self::new();
        formula.push(GuardedExpr::new(expr, constraint));
        formula
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = GuardedExpr>) -> Self {
        let mut formula = Self::new();
        for pair in pairs {
            formula.push(pair);
        }
        formula
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn pairs(&self) -> &[GuardedExpr] {
        &self.pairs
    }

    pub fn iter(&self) -> impl Iterator<Item = &GuardedExpr> {
        self.pairs.iter()
    }

    /// Inserts a pair unless a structurally identical one is present.
    pub fn push(&mut self, pair: GuardedExpr) {
        let pair = GuardedExpr::new(simplify(&pair.expr), simplify(&pair.constraint));
        if !self.pairs.contains(&pair) {
            self.pairs.push(pair);
        }
    }

    /// Replaces the content with `pairs`.
    pub fn set(&mut self, pairs: Vec<GuardedExpr>) {
        self.pairs.clear();
        for pair in pairs {
            self.push(pair);
        }
    }

    /// Unions another formula into this one.
    pub fn extend(&mut self, other: &Formula) {
        for pair in other.iter() {
            self.push(pair.clone());
        }
    }
}

impl IntoIterator for Formula {
    type Item = GuardedExpr;
    type IntoIter = std::vec::IntoIter<GuardedExpr>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.into_iter()
    }
}

/// All variables bound on a path (or accumulated across paths).
pub type FormulaMap = IndexMap<VarId, Formula>;

/// Pairwise combination of two operand formulas under a binary operator.
///
/// Pairs whose combined constraint is unsatisfiable are dropped; an empty
/// result means the whole path is infeasible and the caller must kill it.
/// Modulo operands in the rational sort are coerced to integers first.
pub fn merge_binary(
    lhs: &[GuardedExpr],
    rhs: &[GuardedExpr],
    op: Op,
    oracle: &dyn SolverOracle,
    domain: &[Expr],
) -> Vec<GuardedExpr> {
    let mut out = Vec::with_capacity(lhs.len().min(rhs.len()));
    for (l, r) in lhs.iter().zip(rhs) {
        let constraint = simplify(&l.constraint.clone().and(r.constraint.clone()));
        if !oracle.is_sat(&constraint, domain) {
            continue;
        }
        let (le, re) = if op == Op::Mod {
            (l.expr.clone().to_int(), r.expr.clone().to_int())
        } else {
            (l.expr.clone(), r.expr.clone())
        };
        let expr = simplify(&Expr::app(op, vec![le, re]));
        out.push(GuardedExpr::new(expr, constraint));
    }
    out
}

/// Flattens a nested `ite` chain into `(leaf, guard)` pairs. The guard of a
/// leaf is `cond` conjoined with the branch predicates leading to it.
pub fn expand_if(expr: &Expr, cond: &Expr) -> Vec<GuardedExpr> {
    fn walk(expr: &Expr, guard: Expr, out: &mut Vec<GuardedExpr>) {
        if let crate::expr::ExprKind::Ite { cond, then, orelse } = expr.kind() {
            walk(then, simplify(&guard.clone().and(cond.clone())), out);
            walk(orelse, simplify(&guard.and(cond.clone().negate())), out);
        } else if !expr.is_none_value() {
            out.push(GuardedExpr::new(expr.clone(), guard));
        }
    }
    let mut out = Vec::new();
    walk(expr, cond.clone(), &mut out);
    out
}

/// Folds pairs right-to-left into `ite(g0, e0, ite(g1, e1, ..., none))`.
pub fn reconstruct_if(pairs: &[GuardedExpr]) -> Expr {
    pairs.iter().rev().fold(Expr::none(), |acc, pair| {
        Expr::ite(pair.constraint.clone(), pair.expr.clone(), acc)
    })
}

/// Combines two constraints, keeping the weaker side when one implies the
/// other. `refined` buys tighter constraints at the cost of extra solver
/// queries; without it the plain conjunction is used.
pub fn implied(a: &Expr, b: &Expr, oracle: &dyn SolverOracle, refined: bool) -> Expr {
    if refined {
        if oracle.implies(a, b) {
            return a.clone();
        }
        if oracle.implies(b, a) {
            return b.clone();
        }
    }
    simplify(&a.clone().and(b.clone()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{expr::Sort, solver::StructuralOracle};

    fn x() -> Expr {
        Expr::sym("x", Sort::Int)
    }

    fn top() -> Expr {
        Expr::bool_val(true)
    }

    #[test]
    fn push_dedups_structurally() {
        let mut f = Formula::new();
        f.push(GuardedExpr::new(Expr::app(Op::Add, vec![Expr::int(1), Expr::int(1)]), top()));
        f.push(GuardedExpr::new(Expr::int(2), top()));
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn merge_binary_zips_and_drops_unsat() {
        let oracle = StructuralOracle;
        let p = Expr::app(Op::Gt, vec![x(), Expr::int(0)]);
        let lhs = [
            GuardedExpr::new(Expr::int(1), p.clone()),
            GuardedExpr::new(Expr::int(2), simplify(&p.clone().negate())),
        ];
        let rhs = [
            GuardedExpr::new(Expr::int(10), p.clone()),
            // contradicts the zipped left constraint
            GuardedExpr::new(Expr::int(20), p),
        ];
        let merged = merge_binary(&lhs, &rhs, Op::Add, &oracle, &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].expr, Expr::int(11));
    }

    #[test]
    fn expand_and_reconstruct_round() {
        let p = Expr::app(Op::Gt, vec![x(), Expr::int(0)]);
        let pairs = [
            GuardedExpr::new(Expr::int(1), p.clone()),
            GuardedExpr::new(Expr::int(2), simplify(&p.clone().negate())),
        ];
        let tree = reconstruct_if(&pairs);
        let expanded = expand_if(&tree, &Expr::bool_val(true));
        assert_eq!(expanded.len(), 2);
        assert_eq!(expanded[0].expr, Expr::int(1));
        assert_eq!(expanded[0].constraint, p);
    }

    #[test]
    fn implied_keeps_weaker_side_in_refined_mode() {
        let oracle = StructuralOracle;
        let p = Expr::app(Op::Gt, vec![x(), Expr::int(0)]);
        // p ⇒ p, so either direction returns p itself
        assert_eq!(implied(&p, &p, &oracle, true), p);
        // unrefined mode conjoins (and dedups the identical conjunct)
        assert_eq!(implied(&p, &p, &oracle, false), p);
    }
}
