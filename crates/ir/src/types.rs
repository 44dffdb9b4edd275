use std::fmt;

use serde::{Deserialize, Serialize};

/// Source-level elementary type, width-annotated where the source is.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementaryType {
    /// `uintN`, 8 <= N <= 256
    Uint(u16),
    /// `intN`
    Int(u16),
    Bool,
    Address,
    String,
    /// `bytesN`, 1 <= N <= 32
    Bytes(u8),
    /// dynamically sized `bytes`
    DynBytes,
}

impl fmt::Display for ElementaryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(bits) => write!(f, "uint{bits}"),
            Self::Int(bits) => write!(f, "int{bits}"),
            Self::Bool => f.write_str("bool"),
            Self::Address => f.write_str("address"),
            Self::String => f.write_str("string"),
            Self::Bytes(n) => write!(f, "bytes{n}"),
            Self::DynBytes => f.write_str("bytes"),
        }
    }
}

/// Reference to a source type as it appears on operands and declarations.
///
/// Composite variants keep just enough structure for the engine to derive
/// solver sorts for projections: a mapping knows its key and value types, an
/// array its element type. Struct fields are not listed here; the member
/// access instruction carries the projected type on its destination operand.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Elementary(ElementaryType),
    Mapping { key: Box<TypeRef>, value: Box<TypeRef> },
    Array { elem: Box<TypeRef>, length: Option<u64> },
    Struct(String),
    Tuple(Vec<TypeRef>),
    /// A reference to a deployed contract (`IERC20 token`).
    Contract(String),
    /// Anything the extraction pipeline could not classify.
    Other(String),
}

impl TypeRef {
    pub fn uint256() -> Self {
        Self::Elementary(ElementaryType::Uint(256))
    }

    pub fn uint(bits: u16) -> Self {
        Self::Elementary(ElementaryType::Uint(bits))
    }

    pub fn bool() -> Self {
        Self::Elementary(ElementaryType::Bool)
    }

    pub fn address() -> Self {
        Self::Elementary(ElementaryType::Address)
    }

    pub fn string() -> Self {
        Self::Elementary(ElementaryType::String)
    }

    pub fn mapping(key: Self, value: Self) -> Self {
        Self::Mapping { key: Box::new(key), value: Box::new(value) }
    }

    pub fn array(elem: Self) -> Self {
        Self::Array { elem: Box::new(elem), length: None }
    }

    /// Whether values of this type occupy 20 bytes and should live in the
    /// 160-bit bit-vector domain.
    pub fn is_address_like(&self) -> bool {
        matches!(
            self,
            Self::Elementary(ElementaryType::Address)
                | Self::Elementary(ElementaryType::Bytes(20))
                | Self::Contract(_)
        )
    }

    /// The value type a single indexing step into this type yields.
    pub fn projected(&self) -> Option<&Self> {
        match self {
            Self::Mapping { value, .. } => Some(value),
            Self::Array { elem, .. } => Some(elem),
            _ => None,
        }
    }

    /// Canonical ABI rendering, used when deriving function signatures.
    pub fn abi_str(&self) -> String {
        match self {
            Self::Elementary(ty) => ty.to_string(),
            Self::Contract(_) => "address".into(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Elementary(ty) => ty.fmt(f),
            Self::Mapping { key, value } => write!(f, "mapping({key} => {value})"),
            Self::Array { elem, length: Some(n) } => write!(f, "{elem}[{n}]"),
            Self::Array { elem, length: None } => write!(f, "{elem}[]"),
            Self::Struct(name) | Self::Contract(name) | Self::Other(name) => f.write_str(name),
            Self::Tuple(tys) => {
                f.write_str("(")?;
                for (i, ty) in tys.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    ty.fmt(f)?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trip() {
        assert_eq!(TypeRef::uint256().to_string(), "uint256");
        assert_eq!(
            TypeRef::mapping(TypeRef::address(), TypeRef::uint256()).to_string(),
            "mapping(address => uint256)"
        );
        assert_eq!(TypeRef::array(TypeRef::bool()).to_string(), "bool[]");
    }

    #[test]
    fn address_like_types() {
        assert!(TypeRef::address().is_address_like());
        assert!(TypeRef::Elementary(ElementaryType::Bytes(20)).is_address_like());
        assert!(TypeRef::Contract("IERC20".into()).is_address_like());
        assert!(!TypeRef::uint256().is_address_like());
    }
}
