//! Programmatic model construction.
//!
//! The extraction pipeline and the engine's test-suite both assemble models
//! through these builders rather than hand-writing the serde form.

use alloy_primitives::Address;

use crate::{
    cfg::{Node, NodeId, NodeKind},
    contract::{ContractModel, FunctionModel, Param, StateVariable, Visibility},
    instruction::Instruction,
    types::TypeRef,
};

/// Builds a [`FunctionModel`] node by node.
///
/// Node ids are handed out in insertion order; the first inserted node is
/// the entry point.
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    signature: Option<String>,
    visibility: Visibility,
    is_modifier: bool,
    params: Vec<Param>,
    returns: Vec<TypeRef>,
    nodes: Vec<Node>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            signature: None,
            visibility: Visibility::Public,
            is_modifier: false,
            params: Vec::new(),
            returns: Vec::new(),
            nodes: Vec::new(),
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn internal(self) -> Self {
        self.visibility(Visibility::Internal)
    }

    pub fn modifier(mut self) -> Self {
        self.is_modifier = true;
        self
    }

    pub fn param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.params.push(Param { name: name.into(), ty });
        self
    }

    pub fn returns(mut self, ty: TypeRef) -> Self {
        self.returns.push(ty);
        self
    }

    /// Overrides the derived ABI signature.
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Inserts a node and returns its id.
    pub fn node(&mut self, kind: NodeKind, irs: Vec<Instruction>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { id, kind, irs, sons: Vec::new(), son_true: None, son_false: None });
        id
    }

    /// Adds an unconditional edge.
    pub fn link(&mut self, from: NodeId, to: NodeId) {
        if let Some(node) = self.nodes.get_mut(from.0 as usize) {
            node.sons.push(to);
        }
    }

    /// Links `ids` into a straight-line chain.
    pub fn chain(&mut self, ids: &[NodeId]) {
        for pair in ids.windows(2) {
            self.link(pair[0], pair[1]);
        }
    }

    /// Sets the two branch edges of an `If`/`IfLoop` node.
    pub fn branch(&mut self, at: NodeId, on_true: NodeId, on_false: NodeId) {
        if let Some(node) = self.nodes.get_mut(at.0 as usize) {
            node.son_true = Some(on_true);
            node.son_false = Some(on_false);
        }
    }

    pub fn build(mut self) -> FunctionModel {
        if self.nodes.is_empty() {
            self.node(NodeKind::Entry, Vec::new());
        }
        let signature = self.signature.unwrap_or_else(|| {
            let args =
                self.params.iter().map(|p| p.ty.abi_str()).collect::<Vec<_>>().join(",");
            format!("{}({args})", self.name)
        });
        FunctionModel {
            name: self.name,
            signature,
            visibility: self.visibility,
            is_modifier: self.is_modifier,
            params: self.params,
            returns: self.returns,
            entry: NodeId(0),
            nodes: self.nodes,
        }
    }
}

/// Builds a [`ContractModel`].
#[derive(Debug)]
pub struct ContractBuilder {
    name: String,
    path: String,
    address: Option<Address>,
    state_vars: Vec<StateVariable>,
    functions: Vec<FunctionModel>,
}

impl ContractBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: String::new(),
            address: None,
            state_vars: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn state_var(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.state_vars.push(StateVariable { name: name.into(), ty });
        self
    }

    pub fn function(mut self, function: FunctionModel) -> Self {
        self.functions.push(function);
        self
    }

    pub fn build(self) -> ContractModel {
        ContractModel {
            name: self.name,
            path: self.path,
            address: self.address,
            state_vars: self.state_vars,
            functions: self.functions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryOp, Operand};

    #[test]
    fn straight_line_function() {
        let mut f = FunctionBuilder::new("add").param("x", TypeRef::uint256());
        let body = f.node(
            NodeKind::Expression,
            vec![Instruction::Binary {
                dst: Operand::state("total", TypeRef::uint256()),
                op: BinaryOp::Add,
                lhs: Operand::state("total", TypeRef::uint256()),
                rhs: Operand::param("x", TypeRef::uint256()),
            }],
        );
        let ret = f.node(NodeKind::Return, Vec::new());
        f.link(body, ret);
        let function = f.build();

        assert_eq!(function.signature, "add(uint256)");
        assert_eq!(function.entry, NodeId(0));
        function.validate().unwrap();
    }

    #[test]
    fn branch_edges() {
        let mut f = FunctionBuilder::new("branch");
        let cond = f.node(NodeKind::If, Vec::new());
        let t = f.node(NodeKind::Expression, Vec::new());
        let e = f.node(NodeKind::Expression, Vec::new());
        f.branch(cond, t, e);
        let function = f.build();
        let node = function.node(cond).unwrap();
        assert!(node.is_branch() || node.son_true.is_some());
        assert_eq!(node.successors().collect::<Vec<_>>(), vec![t, e]);
    }
}
