//! Contract model and three-address IR consumed by the symbolic engine.
//!
//! This crate is the seam between the (out of tree) extraction pipeline and
//! the engine: the pipeline produces [`ContractModel`]s (contracts with
//! their persisted state variables, functions, control-flow graphs and
//! per-node IR) and the engine interprets them. Models are plain data:
//! everything here derives `serde` so a model can be shipped as JSON, and
//! the [`builder`] module constructs models programmatically.

mod cfg;
mod contract;
mod instruction;
mod types;

pub mod builder;

pub use cfg::{Node, NodeId, NodeKind};
pub use contract::{ContractModel, FunctionModel, ModelError, Param, StateVariable, Visibility};
pub use instruction::{BinaryOp, BuiltinVar, Instruction, Literal, Operand, UnaryOp, Variable};
pub use types::{ElementaryType, TypeRef};
