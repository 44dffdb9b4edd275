//! Canonical variable identities.
//!
//! Every IR operand the engine tracks is reduced to a [`VarId`]: a value
//! with structural equality and hashing, usable directly as a formula-map
//! key. Projections into mappings, arrays and structs are composite
//! [`MapKey`]s; components of multi-valued returns are [`TupleKey`]s.
//! Nesting composes: `m[a][b]` is `Map(Map(m, a), b)`.

use std::{fmt, sync::Arc};

use formula_ir::{BuiltinVar, Literal, Operand, TypeRef};

/// Key of one projection step.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MapIndex {
    /// Indexed by another tracked variable (`bal[owner]`).
    Var(VarId),
    /// Indexed by a literal (`prices[0]`).
    Const(Literal),
    /// Struct member access (`user.age`).
    Field(String),
}

impl fmt::Display for MapIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Var(v) => v.fmt(f),
            Self::Const(c) => c.fmt(f),
            Self::Field(name) => f.write_str(name),
        }
    }
}

/// Composite identity of a mapping/array/struct projection.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MapKey {
    pub base: VarId,
    pub index: MapIndex,
    pub ty: TypeRef,
}

/// Component `index` of the multi-valued result `base`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TupleKey {
    pub base: VarId,
    pub index: usize,
    pub ty: TypeRef,
}

/// Canonical handle of a tracked variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum VarId {
    /// Persisted state variable of `contract`.
    State { contract: Arc<str>, name: Arc<str>, ty: TypeRef },
    Local { name: Arc<str>, ty: TypeRef },
    Param { name: Arc<str>, ty: TypeRef },
    /// Block-scoped IR temporary; purged between nodes.
    Temp { name: Arc<str>, ty: TypeRef },
    /// Unresolved IR reference; resolves through the context's reference map.
    Ref(u32),
    Map(Arc<MapKey>),
    Tuple(Arc<TupleKey>),
    Builtin(BuiltinVar),
}

impl VarId {
    pub fn state(contract: impl Into<Arc<str>>, name: impl Into<Arc<str>>, ty: TypeRef) -> Self {
        Self::State { contract: contract.into(), name: name.into(), ty }
    }

    pub fn param(name: impl Into<Arc<str>>, ty: TypeRef) -> Self {
        Self::Param { name: name.into(), ty }
    }

    pub fn map(base: VarId, index: MapIndex, ty: TypeRef) -> Self {
        Self::Map(Arc::new(MapKey { base, index, ty }))
    }

    pub fn tuple(base: VarId, index: usize, ty: TypeRef) -> Self {
        Self::Tuple(Arc::new(TupleKey { base, index, ty }))
    }

    /// Converts an operand into an identity, scoped to `contract` for state
    /// variables. Constants have no identity.
    pub fn from_operand(op: &Operand, contract: &str) -> Option<Self> {
        match op {
            Operand::State(v) => {
                Some(Self::State {
                    contract: contract.into(),
                    name: v.name.as_str().into(),
                    ty: v.ty.clone(),
                })
            }
            Operand::Local(v) => {
                Some(Self::Local { name: v.name.as_str().into(), ty: v.ty.clone() })
            }
            Operand::Param(v) => {
                Some(Self::Param { name: v.name.as_str().into(), ty: v.ty.clone() })
            }
            Operand::Temp(v) => {
                Some(Self::Temp { name: v.name.as_str().into(), ty: v.ty.clone() })
            }
            Operand::Ref { id, .. } => Some(Self::Ref(*id)),
            Operand::Builtin(b) => Some(Self::Builtin(*b)),
            Operand::Const { .. } => None,
        }
    }

    /// The declared type, where one exists.
    pub fn ty(&self) -> Option<&TypeRef> {
        match self {
            Self::State { ty, .. }
            | Self::Local { ty, .. }
            | Self::Param { ty, .. }
            | Self::Temp { ty, .. } => Some(ty),
            Self::Map(key) => Some(&key.ty),
            Self::Tuple(key) => Some(&key.ty),
            Self::Ref(_) | Self::Builtin(_) => None,
        }
    }

    /// Innermost base of a projection chain; `self` for plain variables.
    pub fn root(&self) -> &VarId {
        match self {
            Self::Map(key) => key.base.root(),
            Self::Tuple(key) => key.base.root(),
            other => other,
        }
    }

    /// Whether this identity denotes persisted state: a state variable or a
    /// projection chain rooted at one.
    pub fn is_state_rooted(&self) -> bool {
        matches!(self.root(), Self::State { .. })
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Self::Temp { .. })
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::State { name, .. }
            | Self::Local { name, .. }
            | Self::Param { name, .. }
            | Self::Temp { name, .. } => f.write_str(name),
            Self::Ref(id) => write!(f, "REF_{id}"),
            Self::Map(key) => match &key.index {
                MapIndex::Field(field) => write!(f, "{}.{field}", key.base),
                index => write!(f, "{}[{index}]", key.base),
            },
            Self::Tuple(key) => write!(f, "{}.({})", key.base, key.index),
            Self::Builtin(b) => f.write_str(b.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn contract() -> Arc<str> {
        "Token".into()
    }

    #[test]
    fn structural_equality_of_projections() {
        let m = VarId::state(contract(), "bal", TypeRef::mapping(TypeRef::address(), TypeRef::uint256()));
        let a = VarId::param("a", TypeRef::address());
        let one = VarId::map(m.clone(), MapIndex::Var(a.clone()), TypeRef::uint256());
        let two = VarId::map(m, MapIndex::Var(a), TypeRef::uint256());
        assert_eq!(one, two);
    }

    #[test]
    fn nested_projection_roots_at_state() {
        let m = VarId::state(contract(), "allowance", TypeRef::uint256());
        let a = VarId::param("a", TypeRef::address());
        let b = VarId::param("b", TypeRef::address());
        let inner = VarId::map(m.clone(), MapIndex::Var(a), TypeRef::uint256());
        let outer = VarId::map(inner, MapIndex::Var(b), TypeRef::uint256());
        assert!(outer.is_state_rooted());
        assert_eq!(outer.root(), &m);
        assert_eq!(outer.to_string(), "allowance[a][b]");
    }

    #[test]
    fn locals_are_not_state_rooted() {
        let l = VarId::Local { name: "i".into(), ty: TypeRef::uint256() };
        assert!(!l.is_state_rooted());
        let proj = VarId::map(l, MapIndex::Const(Literal::Int(0.into())), TypeRef::uint256());
        assert!(!proj.is_state_rooted());
    }
}
