//! Structural simplification of symbolic expressions.
//!
//! Rewrites are purely syntactic: constant folding over the full operator
//! set, conjunction/disjunction flattening with unit and absorbing element
//! elimination, complementary-literal contradiction detection inside
//! conjunctions, double negation, `ite` pruning, and `select`-over-`store`
//! resolution. The structural solver oracle is built on top of this.

use num_bigint::BigInt;
use num_traits::{Pow, Signed, ToPrimitive, Zero};

use crate::expr::{address_to_u256, u256_to_address, wrap_bv160, Expr, ExprKind, Op};

/// Simplifies an expression bottom-up. Idempotent on its own output.
pub fn simplify(expr: &Expr) -> Expr {
    match expr.kind() {
        ExprKind::App { op, args } => {
            let args: Vec<Expr> = args.iter().map(simplify).collect();
            simplify_app(*op, args)
        }
        ExprKind::Select { array, index } => {
            let array = simplify(array);
            let index = simplify(index);
            simplify_select(array, index)
        }
        ExprKind::Store { array, index, value } => {
            Expr::store(simplify(array), simplify(index), simplify(value))
        }
        ExprKind::Ite { cond, then, orelse } => {
            let cond = simplify(cond);
            let then = simplify(then);
            let orelse = simplify(orelse);
            if cond.is_true() {
                then
            } else if cond.is_false() {
                orelse
            } else if then == orelse {
                then
            } else {
                Expr::ite(cond, then, orelse)
            }
        }
        ExprKind::Uf { name, args, sort } => {
            Expr::uf(name.clone(), args.iter().map(simplify).collect(), sort.clone())
        }
        ExprKind::Int2Bv { width, arg } => {
            let arg = simplify(arg);
            if let (160, ExprKind::IntConst(v)) = (*width, arg.kind()) {
                return Expr::bv160(wrap_bv160(v));
            }
            Expr::int2bv(*width, arg)
        }
        ExprKind::ToInt(arg) => simplify(arg).to_int(),
        _ => expr.clone(),
    }
}

fn simplify_app(op: Op, args: Vec<Expr>) -> Expr {
    match op {
        Op::And => simplify_and(args),
        Op::Or => simplify_or(args),
        Op::Not => simplify_not(args),
        _ => simplify_binary(op, args),
    }
}

fn simplify_and(args: Vec<Expr>) -> Expr {
    let mut flat: Vec<Expr> = Vec::with_capacity(args.len());
    for arg in args {
        match arg.kind() {
            ExprKind::BoolConst(true) => {}
            ExprKind::BoolConst(false) => return Expr::bool_val(false),
            ExprKind::App { op: Op::And, args: inner } => {
                for item in inner {
                    if !flat.contains(item) {
                        flat.push(item.clone());
                    }
                }
            }
            _ => {
                if !flat.contains(&arg) {
                    flat.push(arg);
                }
            }
        }
    }
    // p ∧ ¬p is a contradiction
    for item in &flat {
        let negated = simplify_not(vec![item.clone()]);
        if flat.contains(&negated) {
            return Expr::bool_val(false);
        }
    }
    Expr::and_all(flat)
}

fn simplify_or(args: Vec<Expr>) -> Expr {
    let mut flat: Vec<Expr> = Vec::with_capacity(args.len());
    for arg in args {
        match arg.kind() {
            ExprKind::BoolConst(false) => {}
            ExprKind::BoolConst(true) => return Expr::bool_val(true),
            ExprKind::App { op: Op::Or, args: inner } => {
                for item in inner {
                    if !flat.contains(item) {
                        flat.push(item.clone());
                    }
                }
            }
            _ => {
                if !flat.contains(&arg) {
                    flat.push(arg);
                }
            }
        }
    }
    Expr::or_all(flat)
}

fn simplify_not(mut args: Vec<Expr>) -> Expr {
    let Some(arg) = args.pop() else { return Expr::bool_val(false) };
    match arg.kind() {
        ExprKind::BoolConst(v) => Expr::bool_val(!v),
        ExprKind::App { op: Op::Not, args: inner } => {
            inner.first().cloned().unwrap_or_else(|| Expr::bool_val(false))
        }
        _ => arg.negate(),
    }
}

fn simplify_select(array: Expr, index: Expr) -> Expr {
    if let ExprKind::Store { array: inner, index: stored, value } = array.kind() {
        if *stored == index {
            return value.clone();
        }
        // distinct constant keys cannot alias
        if let (ExprKind::BvConst(a), ExprKind::BvConst(b)) = (stored.kind(), index.kind()) {
            if a != b {
                return simplify_select(inner.clone(), index);
            }
        }
        if let (ExprKind::IntConst(a), ExprKind::IntConst(b)) = (stored.kind(), index.kind()) {
            if a != b {
                return simplify_select(inner.clone(), index);
            }
        }
    }
    Expr::select(array, index)
}

fn simplify_binary(op: Op, args: Vec<Expr>) -> Expr {
    let [lhs, rhs] = match <[Expr; 2]>::try_from(args) {
        Ok(pair) => pair,
        Err(args) => return Expr::app(op, args),
    };

    if let Some(folded) = fold_constants(op, &lhs, &rhs) {
        return folded;
    }

    match op {
        // structural identities
        Op::Eq if lhs == rhs => Expr::bool_val(true),
        Op::Ne if lhs == rhs => Expr::bool_val(false),
        Op::Le | Op::Ge if lhs == rhs => Expr::bool_val(true),
        Op::Lt | Op::Gt if lhs == rhs => Expr::bool_val(false),
        Op::Sub if lhs == rhs => Expr::int(0),
        Op::Add if is_zero(&lhs) => rhs,
        Op::Add if is_zero(&rhs) => lhs,
        Op::Sub if is_zero(&rhs) => lhs,
        Op::Mul if is_one(&lhs) => rhs,
        Op::Mul if is_one(&rhs) => lhs,
        Op::Mul if is_zero(&lhs) || is_zero(&rhs) => Expr::int(0),
        _ => Expr::app(op, vec![lhs, rhs]),
    }
}

fn is_zero(expr: &Expr) -> bool {
    matches!(expr.kind(), ExprKind::IntConst(v) if v.is_zero())
}

fn is_one(expr: &Expr) -> bool {
    matches!(expr.kind(), ExprKind::IntConst(v) if *v == BigInt::from(1))
}

fn fold_constants(op: Op, lhs: &Expr, rhs: &Expr) -> Option<Expr> {
    match (lhs.kind(), rhs.kind()) {
        (ExprKind::IntConst(l), ExprKind::IntConst(r)) => fold_ints(op, l, r),
        (ExprKind::BvConst(l), ExprKind::BvConst(r)) => fold_bvs(op, *l, *r),
        (ExprKind::BoolConst(l), ExprKind::BoolConst(r)) => match op {
            Op::Eq => Some(Expr::bool_val(l == r)),
            Op::Ne => Some(Expr::bool_val(l != r)),
            _ => None,
        },
        (ExprKind::StrConst(l), ExprKind::StrConst(r)) => match op {
            Op::Eq => Some(Expr::bool_val(l == r)),
            Op::Ne => Some(Expr::bool_val(l != r)),
            _ => None,
        },
        _ => None,
    }
}

fn fold_ints(op: Op, l: &BigInt, r: &BigInt) -> Option<Expr> {
    let int = |v: BigInt| Some(Expr::int(v));
    match op {
        Op::Add => int(l + r),
        Op::Sub => int(l - r),
        Op::Mul => int(l * r),
        Op::Div if !r.is_zero() => int(l / r),
        Op::Mod if !r.is_zero() => int(l % r),
        Op::Pow => r.to_u32().map(|exp| Expr::int(Pow::pow(l, exp))),
        Op::Eq => Some(Expr::bool_val(l == r)),
        Op::Ne => Some(Expr::bool_val(l != r)),
        Op::Lt => Some(Expr::bool_val(l < r)),
        Op::Le => Some(Expr::bool_val(l <= r)),
        Op::Gt => Some(Expr::bool_val(l > r)),
        Op::Ge => Some(Expr::bool_val(l >= r)),
        Op::BitAnd => int(l & r),
        Op::BitOr => int(l | r),
        Op::BitXor => int(l ^ r),
        Op::Shl => r.to_usize().map(|sh| Expr::int(l.clone() << sh)),
        Op::Lshr if !l.is_negative() => r.to_usize().map(|sh| Expr::int(l.clone() >> sh)),
        _ => None,
    }
}

fn fold_bvs(op: Op, l: alloy_primitives::Address, r: alloy_primitives::Address) -> Option<Expr> {
    let (lv, rv) = (address_to_u256(l), address_to_u256(r));
    let bv = |v| Some(Expr::bv160(u256_to_address(v)));
    match op {
        Op::Eq => Some(Expr::bool_val(l == r)),
        Op::Ne => Some(Expr::bool_val(l != r)),
        Op::BitAnd => bv(lv & rv),
        Op::BitOr => bv(lv | rv),
        Op::BitXor => bv(lv ^ rv),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::expr::Sort;

    fn x() -> Expr {
        Expr::sym("x", Sort::Int)
    }

    #[test]
    fn folds_arithmetic() {
        let e = Expr::app(Op::Add, vec![Expr::int(2), Expr::int(3)]);
        assert_eq!(simplify(&e), Expr::int(5));
        let e = Expr::app(Op::Mul, vec![x(), Expr::int(1)]);
        assert_eq!(simplify(&e), x());
    }

    #[test]
    fn flattens_conjunctions() {
        let p = x().ge(Expr::int(0));
        let e = Expr::bool_val(true).and(p.clone().and(Expr::bool_val(true)));
        assert_eq!(simplify(&e), p);
    }

    #[test]
    fn detects_contradiction() {
        let p = Expr::app(Op::Gt, vec![x(), Expr::int(0)]);
        let e = p.clone().and(p.negate());
        assert!(simplify(&e).is_false());
    }

    #[test]
    fn double_negation() {
        let p = Expr::app(Op::Lt, vec![x(), Expr::int(10)]);
        assert_eq!(simplify(&p.clone().negate().negate()), p);
    }

    #[test]
    fn prunes_ite() {
        let e = Expr::ite(Expr::bool_val(true), Expr::int(1), Expr::int(2));
        assert_eq!(simplify(&e), Expr::int(1));
    }

    #[test]
    fn select_over_store() {
        let arr = Expr::array_sym("bal", Sort::Bv(160), Sort::Int);
        let k = Expr::sym("k", Sort::Bv(160));
        let stored = Expr::store(arr.clone(), k.clone(), Expr::int(7));
        let e = Expr::select(stored, k);
        assert_eq!(simplify(&e), Expr::int(7));
    }

    #[test]
    fn int2bv_folds_to_constant() {
        let e = Expr::int2bv(160, Expr::int(5));
        assert_eq!(simplify(&e), Expr::bv160(alloy_primitives::Address::with_last_byte(5)));
    }
}
