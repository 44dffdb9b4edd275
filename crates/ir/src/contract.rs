use alloy_primitives::{keccak256, Address};
use serde::{Deserialize, Serialize};

use crate::{
    cfg::{Node, NodeId},
    types::TypeRef,
};

/// Errors produced while loading or validating a model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("function `{0}` references unknown node {1}")]
    UnknownNode(String, NodeId),
    #[error("contract `{0}` has no function `{1}`")]
    UnknownFunction(String, String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

impl Visibility {
    /// Whether the function is callable from outside the contract and thus
    /// gets its own summary.
    pub fn is_exposed(&self) -> bool {
        matches!(self, Self::Public | Self::External)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: TypeRef,
}

/// A persisted contract field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateVariable {
    pub name: String,
    pub ty: TypeRef,
}

/// A function (or modifier) body in CFG form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionModel {
    pub name: String,
    /// Canonical ABI signature, e.g. `transfer(address,uint256)`.
    pub signature: String,
    pub visibility: Visibility,
    #[serde(default)]
    pub is_modifier: bool,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub returns: Vec<TypeRef>,
    pub entry: NodeId,
    pub nodes: Vec<Node>,
}

impl FunctionModel {
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// 4-byte dispatch selector of this function's signature.
    pub fn selector(&self) -> [u8; 4] {
        let digest = keccak256(self.signature.as_bytes());
        [digest[0], digest[1], digest[2], digest[3]]
    }

    /// Checks every edge points at a node that exists.
    pub fn validate(&self) -> Result<(), ModelError> {
        let check = |id: NodeId| {
            self.node(id)
                .map(|_| ())
                .ok_or_else(|| ModelError::UnknownNode(self.name.clone(), id))
        };
        check(self.entry)?;
        for node in &self.nodes {
            for succ in node.successors() {
                check(succ)?;
            }
        }
        Ok(())
    }
}

/// A contract: identity, persisted state layout and function bodies.
///
/// Models are immutable once loaded and shared behind `Arc` across the
/// whole analysis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractModel {
    pub name: String,
    #[serde(default)]
    pub path: String,
    /// Deployed address when the model came off-chain.
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub state_vars: Vec<StateVariable>,
    pub functions: Vec<FunctionModel>,
}

impl ContractModel {
    /// The value of `this` inside the contract: the deployed address when
    /// known, otherwise the first 20 bytes of `keccak256(name ∥ path)`.
    pub fn this_address(&self) -> Address {
        if let Some(address) = self.address {
            return address;
        }
        let mut preimage = Vec::with_capacity(self.name.len() + self.path.len());
        preimage.extend_from_slice(self.name.as_bytes());
        preimage.extend_from_slice(self.path.as_bytes());
        let digest = keccak256(&preimage);
        Address::from_slice(&digest[..20])
    }

    pub fn function(&self, name: &str) -> Option<&FunctionModel> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_by_signature(&self, signature: &str) -> Option<&FunctionModel> {
        self.functions.iter().find(|f| f.signature == signature)
    }

    pub fn is_state_var(&self, name: &str) -> bool {
        self.state_vars.iter().any(|sv| sv.name == name)
    }

    /// Functions that get a top-level summary.
    pub fn exposed_functions(&self) -> impl Iterator<Item = &FunctionModel> {
        self.functions.iter().filter(|f| f.visibility.is_exposed() && !f.is_modifier)
    }

    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        let model: Self = serde_json::from_str(json)?;
        for function in &model.functions {
            function.validate()?;
        }
        Ok(model)
    }
}
