use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instruction::Instruction;

/// Identifier of a CFG node, unique within one function.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Structural role of a CFG node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Entry,
    Expression,
    Variable,
    If,
    EndIf,
    StartLoop,
    /// Loop header re-tested on each iteration.
    IfLoop,
    EndLoop,
    Return,
    /// Modifier substitution point (`_;`).
    Placeholder,
    Throw,
    Other,
}

/// One CFG node: its IR sequence and its successor edges.
///
/// Branching nodes (`If`, `IfLoop`) carry their successors in `son_true` /
/// `son_false`; everything else uses the plain `sons` list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub irs: Vec<Instruction>,
    #[serde(default)]
    pub sons: Vec<NodeId>,
    #[serde(default)]
    pub son_true: Option<NodeId>,
    #[serde(default)]
    pub son_false: Option<NodeId>,
}

impl Node {
    /// All successors in scheduling order, branch edges first.
    pub fn successors(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.son_true.into_iter().chain(self.son_false).chain(self.sons.iter().copied())
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::If | NodeKind::IfLoop)
    }
}
