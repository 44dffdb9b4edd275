//! The symbolic value model.
//!
//! An [`Expr`] is an immutable tree: a cheap handle over a reference-counted
//! node. All transformations build new nodes; nothing is mutated in place,
//! so expressions can be shared freely between path contexts. `Display`
//! renders the solver's S-expression form.

use std::{fmt, sync::Arc};

use alloy_primitives::{Address, U256};
use num_bigint::BigInt;

/// Solver sort of an expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sort {
    Int,
    /// Rational sort; only reachable through division, coerced away before
    /// modulo (see [`Expr::to_int`]).
    Real,
    Bool,
    Str,
    /// Fixed-width bit-vector; the engine only uses width 160.
    Bv(u32),
    Array(Box<Sort>, Box<Sort>),
    /// Sort of the distinguished no-value constant.
    None,
}

impl Sort {
    pub fn array(key: Sort, value: Sort) -> Self {
        Self::Array(Box::new(key), Box::new(value))
    }
}

/// Operator of an n-ary application.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    /// logical shift right
    Lshr,
}

impl Op {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Pow => "^",
            Self::Eq => "=",
            Self::Ne => "distinct",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::BitAnd => "bvand",
            Self::BitOr => "bvor",
            Self::BitXor => "bvxor",
            Self::Shl => "bvshl",
            Self::Lshr => "bvlshr",
        }
    }

    /// Whether applications of this operator are boolean-sorted.
    pub fn is_predicate(&self) -> bool {
        matches!(
            self,
            Self::Eq
                | Self::Ne
                | Self::Lt
                | Self::Le
                | Self::Gt
                | Self::Ge
                | Self::And
                | Self::Or
                | Self::Not
        )
    }
}

/// One node of the symbolic value tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExprKind {
    IntConst(BigInt),
    BoolConst(bool),
    StrConst(String),
    /// 160-bit bit-vector constant.
    BvConst(Address),
    /// Sorted free variable.
    Sym { name: Arc<str>, sort: Sort },
    /// Named array symbol (theory-of-arrays backing for mappings).
    ArraySym { name: Arc<str>, key: Sort, value: Sort },
    App { op: Op, args: Vec<Expr> },
    Select { array: Expr, index: Expr },
    Store { array: Expr, index: Expr, value: Expr },
    Ite { cond: Expr, then: Expr, orelse: Expr },
    /// Uninterpreted function application.
    Uf { name: Arc<str>, args: Vec<Expr>, sort: Sort },
    /// `Int2BV` wrap of an integer into a bit-vector.
    Int2Bv { width: u32, arg: Expr },
    /// Rational-to-integer coercion.
    ToInt(Expr),
    /// "No defined value on this path".
    NoneValue,
}

/// Shared handle over an [`ExprKind`].
#[derive(Clone)]
pub struct Expr(Arc<ExprKind>);

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for Expr {}

impl std::hash::Hash for Expr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expr({self})")
    }
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    // -- constructors -------------------------------------------------------

    pub fn int(value: impl Into<BigInt>) -> Self {
        Self::new(ExprKind::IntConst(value.into()))
    }

    pub fn bool_val(value: bool) -> Self {
        Self::new(ExprKind::BoolConst(value))
    }

    pub fn str_val(value: impl Into<String>) -> Self {
        Self::new(ExprKind::StrConst(value.into()))
    }

    pub fn bv160(value: Address) -> Self {
        Self::new(ExprKind::BvConst(value))
    }

    pub fn sym(name: impl Into<Arc<str>>, sort: Sort) -> Self {
        Self::new(ExprKind::Sym { name: name.into(), sort })
    }

    pub fn array_sym(name: impl Into<Arc<str>>, key: Sort, value: Sort) -> Self {
        Self::new(ExprKind::ArraySym { name: name.into(), key, value })
    }

    pub fn app(op: Op, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::App { op, args })
    }

    pub fn select(array: Expr, index: Expr) -> Self {
        Self::new(ExprKind::Select { array, index })
    }

    pub fn store(array: Expr, index: Expr, value: Expr) -> Self {
        Self::new(ExprKind::Store { array, index, value })
    }

    pub fn ite(cond: Expr, then: Expr, orelse: Expr) -> Self {
        Self::new(ExprKind::Ite { cond, then, orelse })
    }

    pub fn uf(name: impl Into<Arc<str>>, args: Vec<Expr>, sort: Sort) -> Self {
        Self::new(ExprKind::Uf { name: name.into(), args, sort })
    }

    pub fn int2bv(width: u32, arg: Expr) -> Self {
        Self::new(ExprKind::Int2Bv { width, arg })
    }

    pub fn none() -> Self {
        Self::new(ExprKind::NoneValue)
    }

    // -- combinators --------------------------------------------------------

    pub fn and(self, other: Expr) -> Self {
        Self::app(Op::And, vec![self, other])
    }

    pub fn or(self, other: Expr) -> Self {
        Self::app(Op::Or, vec![self, other])
    }

    pub fn negate(self) -> Self {
        Self::app(Op::Not, vec![self])
    }

    pub fn equals(self, other: Expr) -> Self {
        Self::app(Op::Eq, vec![self, other])
    }

    pub fn ge(self, other: Expr) -> Self {
        Self::app(Op::Ge, vec![self, other])
    }

    /// Conjunction over an iterator, `true` when empty.
    pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut args: Vec<Expr> = exprs.into_iter().collect();
        match args.len() {
            0 => Self::bool_val(true),
            1 => args.pop().unwrap_or_else(|| Self::bool_val(true)),
            _ => Self::app(Op::And, args),
        }
    }

    /// Disjunction over an iterator, `false` when empty.
    pub fn or_all(exprs: impl IntoIterator<Item = Expr>) -> Self {
        let mut args: Vec<Expr> = exprs.into_iter().collect();
        match args.len() {
            0 => Self::bool_val(false),
            1 => args.pop().unwrap_or_else(|| Self::bool_val(false)),
            _ => Self::app(Op::Or, args),
        }
    }

    /// Coerces a rational-sorted expression to the integer sort; everything
    /// else passes through untouched.
    pub fn to_int(self) -> Self {
        if self.sort() == Sort::Real {
            Self::new(ExprKind::ToInt(self))
        } else {
            self
        }
    }

    // -- predicates ---------------------------------------------------------

    pub fn is_true(&self) -> bool {
        matches!(self.kind(), ExprKind::BoolConst(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self.kind(), ExprKind::BoolConst(false))
    }

    pub fn is_none_value(&self) -> bool {
        matches!(self.kind(), ExprKind::NoneValue)
    }

    /// Constant 160-bit value, when this expression is one.
    pub fn as_address(&self) -> Option<Address> {
        match self.kind() {
            ExprKind::BvConst(a) => Some(*a),
            _ => None,
        }
    }

    /// Inferred sort of this expression.
    pub fn sort(&self) -> Sort {
        match self.kind() {
            ExprKind::IntConst(_) => Sort::Int,
            ExprKind::BoolConst(_) => Sort::Bool,
            ExprKind::StrConst(_) => Sort::Str,
            ExprKind::BvConst(_) => Sort::Bv(160),
            ExprKind::Sym { sort, .. } | ExprKind::Uf { sort, .. } => sort.clone(),
            ExprKind::ArraySym { key, value, .. } => Sort::array(key.clone(), value.clone()),
            ExprKind::App { op, args } => {
                if op.is_predicate() {
                    Sort::Bool
                } else {
                    args.first().map(Self::sort).unwrap_or(Sort::Int)
                }
            }
            ExprKind::Select { array, .. } => match array.sort() {
                Sort::Array(_, value) => *value,
                _ => Sort::Int,
            },
            ExprKind::Store { array, .. } => array.sort(),
            ExprKind::Ite { then, orelse, .. } => {
                let sort = then.sort();
                if sort == Sort::None { orelse.sort() } else { sort }
            }
            ExprKind::Int2Bv { width, .. } => Sort::Bv(*width),
            ExprKind::ToInt(_) => Sort::Int,
            ExprKind::NoneValue => Sort::None,
        }
    }
}

/// Wraps an unbounded integer into the 160-bit value domain.
pub(crate) fn wrap_bv160(value: &BigInt) -> Address {
    let modulus = BigInt::from(1u8) << 160u32;
    let mut wrapped = value % &modulus;
    if wrapped.sign() == num_bigint::Sign::Minus {
        wrapped += &modulus;
    }
    let (_, bytes) = wrapped.to_bytes_be();
    let mut out = [0u8; 20];
    let offset = 20usize.saturating_sub(bytes.len());
    out[offset..].copy_from_slice(&bytes[bytes.len().saturating_sub(20)..]);
    Address::from_slice(&out)
}

pub(crate) fn address_to_u256(address: Address) -> U256 {
    U256::from_be_slice(address.as_slice())
}

pub(crate) fn u256_to_address(value: U256) -> Address {
    Address::from_slice(&value.to_be_bytes::<32>()[12..])
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ExprKind::IntConst(v) => v.fmt(f),
            ExprKind::BoolConst(v) => v.fmt(f),
            ExprKind::StrConst(v) => write!(f, "{v:?}"),
            ExprKind::BvConst(v) => write!(f, "#x{}", hex::encode(v.as_slice())),
            ExprKind::Sym { name, .. } | ExprKind::ArraySym { name, .. } => f.write_str(name),
            ExprKind::App { op, args } => {
                write!(f, "({}", op.symbol())?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
            ExprKind::Select { array, index } => write!(f, "(select {array} {index})"),
            ExprKind::Store { array, index, value } => {
                write!(f, "(store {array} {index} {value})")
            }
            ExprKind::Ite { cond, then, orelse } => write!(f, "(ite {cond} {then} {orelse})"),
            ExprKind::Uf { name, args, .. } => {
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                f.write_str(")")
            }
            ExprKind::Int2Bv { width, arg } => write!(f, "((_ int2bv {width}) {arg})"),
            ExprKind::ToInt(arg) => write!(f, "(to_int {arg})"),
            ExprKind::NoneValue => f.write_str("none"),
        }
    }
}

use alloy_primitives::hex;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sexpr_rendering() {
        let x = Expr::sym("x", Sort::Int);
        let e = Expr::app(Op::Add, vec![x.clone(), Expr::int(1)]);
        assert_eq!(e.to_string(), "(+ x 1)");
        let ite = Expr::ite(x.clone().ge(Expr::int(0)), x, Expr::none());
        assert_eq!(ite.to_string(), "(ite (>= x 0) x none)");
    }

    #[test]
    fn bv_wrapping() {
        assert_eq!(wrap_bv160(&BigInt::from(1)), Address::with_last_byte(1));
        // -1 wraps to all ones
        assert_eq!(wrap_bv160(&BigInt::from(-1)), Address::repeat_byte(0xff));
    }

    #[test]
    fn sorts() {
        let arr = Expr::array_sym("bal", Sort::Bv(160), Sort::Int);
        let sel = Expr::select(arr, Expr::bv160(Address::ZERO));
        assert_eq!(sel.sort(), Sort::Int);
    }
}
