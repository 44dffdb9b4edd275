//! Bridge from source types to solver sorts.

use alloy_primitives::Address;
use num_bigint::BigInt;
use tracing::warn;

use formula_ir::{ElementaryType, Literal, TypeRef};

use crate::expr::{wrap_bv160, Expr, Sort};

/// Maps a source type to its solver sort.
///
/// Types the table does not know default to the integer sort and are logged
/// once at the call site.
pub fn sort_of(ty: &TypeRef) -> Sort {
    match ty {
        TypeRef::Elementary(ElementaryType::Uint(_) | ElementaryType::Int(_)) => Sort::Int,
        TypeRef::Elementary(ElementaryType::Bool) => Sort::Bool,
        TypeRef::Elementary(ElementaryType::String) => Sort::Str,
        _ if ty.is_address_like() => Sort::Bv(160),
        TypeRef::Mapping { key, value } => Sort::array(sort_of(key), sort_of(value)),
        TypeRef::Array { elem, .. } => Sort::array(Sort::Int, sort_of(elem)),
        other => {
            warn!(target: "bridge", ty = %other, "type not in bridge table, defaulting to Int");
            Sort::Int
        }
    }
}

/// A freshly created symbol plus the background domain fact it comes with
/// (`x >= 0` for unsigned integer types).
pub struct FreshSymbol {
    pub expr: Expr,
    pub domain: Option<Expr>,
}

/// Creates the initial symbolic value for a variable of the given type.
pub fn fresh_symbol(name: &str, ty: &TypeRef) -> FreshSymbol {
    let sort = sort_of(ty);
    let expr = Expr::sym(name, sort);
    let domain = match ty {
        TypeRef::Elementary(ElementaryType::Uint(_)) => {
            Some(expr.clone().ge(Expr::int(0)))
        }
        _ => None,
    };
    FreshSymbol { expr, domain }
}

/// The value of `type(uint112).max`, which source code casts to `address`
/// by writing `-1`. Preserved as-is in summaries.
fn uint112_max() -> Address {
    wrap_bv160(&((BigInt::from(1u8) << 112u32) - 1))
}

/// Rewrites a literal under its (possibly converted) type.
pub fn const_expr(value: &Literal, ty: &TypeRef) -> Expr {
    if ty.is_address_like() {
        return match value {
            Literal::Address(a) => Expr::bv160(*a),
            Literal::Int(v) if *v == BigInt::from(-1) => Expr::bv160(uint112_max()),
            Literal::Int(v) => Expr::bv160(wrap_bv160(v)),
            Literal::Bool(v) => Expr::bv160(wrap_bv160(&BigInt::from(u8::from(*v)))),
            Literal::Str(s) => {
                warn!(target: "bridge", value = %s, "string literal under address type");
                Expr::str_val(s.clone())
            }
        };
    }
    match value {
        Literal::Int(v) => Expr::int(v.clone()),
        Literal::Bool(v) => Expr::bool_val(*v),
        Literal::Str(s) => Expr::str_val(s.clone()),
        Literal::Address(a) => Expr::bv160(*a),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::expr::ExprKind;

    #[test]
    fn uint_gets_domain_fact() {
        let fresh = fresh_symbol("x", &TypeRef::uint256());
        assert_eq!(fresh.expr.sort(), Sort::Int);
        let domain = fresh.domain.expect("uint has a domain fact");
        assert_eq!(domain.to_string(), "(>= x 0)");
    }

    #[test]
    fn bool_and_address_sorts() {
        assert_eq!(sort_of(&TypeRef::bool()), Sort::Bool);
        assert_eq!(sort_of(&TypeRef::address()), Sort::Bv(160));
        assert!(fresh_symbol("owner", &TypeRef::address()).domain.is_none());
    }

    #[test]
    fn minus_one_address_idiom() {
        let e = const_expr(&Literal::Int(BigInt::from(-1)), &TypeRef::address());
        let ExprKind::BvConst(a) = e.kind() else { panic!("expected constant") };
        // 2^112 - 1: six zero bytes then fourteen 0xff bytes
        assert_eq!(&a.as_slice()[..6], &[0u8; 6]);
        assert!(a.as_slice()[6..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn integer_to_address_wraps() {
        let e = const_expr(&Literal::Int(BigInt::from(5)), &TypeRef::address());
        assert_eq!(e, Expr::bv160(Address::with_last_byte(5)));
    }
}
