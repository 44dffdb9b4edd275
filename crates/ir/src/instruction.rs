use std::fmt;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};

use crate::types::TypeRef;

/// A named, typed variable declaration referenced by an operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub ty: TypeRef,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Compile-time constant payload of a [`Operand::Const`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Int(BigInt),
    Bool(bool),
    Str(String),
    Address(alloy_primitives::Address),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => v.fmt(f),
            Self::Bool(v) => v.fmt(f),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::Address(v) => v.fmt(f),
        }
    }
}

/// Blockchain-environment variables readable from any function body.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuiltinVar {
    This,
    MsgSender,
    MsgValue,
    BlockTimestamp,
    BlockNumber,
}

impl BuiltinVar {
    pub fn name(&self) -> &'static str {
        match self {
            Self::This => "this",
            Self::MsgSender => "msg.sender",
            Self::MsgValue => "msg.value",
            Self::BlockTimestamp => "block.timestamp",
            Self::BlockNumber => "block.number",
        }
    }
}

/// An IR operand. The extraction pipeline classifies every variable
/// reference up front, so the engine never guesses what scope a name
/// belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Persisted contract state variable.
    State(Variable),
    /// Function-scoped local.
    Local(Variable),
    /// Function parameter.
    Param(Variable),
    /// IR temporary (`TMP_n`), scoped to one basic block.
    Temp(Variable),
    /// IR reference (`REF_n`); resolves through the context's reference map.
    Ref { id: u32, ty: TypeRef },
    Const { value: Literal, ty: TypeRef },
    Builtin(BuiltinVar),
}

impl Operand {
    pub fn state(name: impl Into<String>, ty: TypeRef) -> Self {
        Self::State(Variable::new(name, ty))
    }

    pub fn local(name: impl Into<String>, ty: TypeRef) -> Self {
        Self::Local(Variable::new(name, ty))
    }

    pub fn param(name: impl Into<String>, ty: TypeRef) -> Self {
        Self::Param(Variable::new(name, ty))
    }

    pub fn temp(name: impl Into<String>, ty: TypeRef) -> Self {
        Self::Temp(Variable::new(name, ty))
    }

    pub fn reference(id: u32, ty: TypeRef) -> Self {
        Self::Ref { id, ty }
    }

    pub fn uint(value: u64) -> Self {
        Self::Const { value: Literal::Int(BigInt::from(value)), ty: TypeRef::uint256() }
    }

    pub fn int(value: i64) -> Self {
        Self::Const {
            value: Literal::Int(BigInt::from(value)),
            ty: TypeRef::Elementary(crate::ElementaryType::Int(256)),
        }
    }

    pub fn boolean(value: bool) -> Self {
        Self::Const { value: Literal::Bool(value), ty: TypeRef::bool() }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::Const { value: Literal::Str(value.into()), ty: TypeRef::string() }
    }

    pub fn address(value: alloy_primitives::Address) -> Self {
        Self::Const { value: Literal::Address(value), ty: TypeRef::address() }
    }

    /// The declared type of this operand.
    pub fn ty(&self) -> TypeRef {
        match self {
            Self::State(v) | Self::Local(v) | Self::Param(v) | Self::Temp(v) => v.ty.clone(),
            Self::Ref { ty, .. } | Self::Const { ty, .. } => ty.clone(),
            Self::Builtin(BuiltinVar::This | BuiltinVar::MsgSender) => TypeRef::address(),
            Self::Builtin(_) => TypeRef::uint256(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State(v) | Self::Local(v) | Self::Param(v) | Self::Temp(v) => {
                f.write_str(&v.name)
            }
            Self::Ref { id, .. } => write!(f, "REF_{id}"),
            Self::Const { value, .. } => value.fmt(f),
            Self::Builtin(b) => f.write_str(b.name()),
        }
    }
}

/// Binary operators of the IR, in source precedence-free three-address form.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
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
    /// short-circuit `&&`
    AndAnd,
    /// short-circuit `||`
    OrOr,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    /// logical shift right
    Shr,
}

/// Unary operators of the IR. Only boolean negation reaches the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Bang,
}

/// One three-address instruction of a CFG node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    Binary { dst: Operand, op: BinaryOp, lhs: Operand, rhs: Operand },
    Unary { dst: Operand, op: UnaryOp, src: Operand },
    Assign { dst: Operand, src: Operand },
    TypeConversion { dst: Operand, src: Operand, to: TypeRef },
    /// `dst = base[index]`; `dst` is always a reference operand.
    Index { dst: Operand, base: Operand, index: Operand },
    /// `dst = base.member`, a struct field or contract member access.
    Member { dst: Operand, base: Operand, member: String },
    Length { dst: Operand, src: Operand },
    /// Evaluates the branch predicate consumed by the enclosing `If`/`IfLoop` node.
    Condition { value: Operand },
    /// `dst = tuple.index` after a multi-valued call.
    Unpack { dst: Operand, tuple: Operand, index: usize },
    Return { values: Vec<Operand> },
    InternalCall { dst: Option<Operand>, function: String, args: Vec<Operand> },
    LibraryCall { dst: Option<Operand>, library: String, function: String, args: Vec<Operand> },
    /// Call through a typed contract reference (`token.transfer(..)`).
    HighLevelCall { dst: Option<Operand>, dest: Operand, function: String, args: Vec<Operand> },
    /// Raw `call`/`delegatecall` with an ABI-encoded payload argument.
    LowLevelCall { dst: Option<Operand>, dest: Operand, args: Vec<Operand> },
    /// Solidity builtins: `require`, `assert`, `revert`, `abi.encodeWithSelector`, ...
    SolidityCall { dst: Option<Operand>, function: String, args: Vec<Operand> },
}
