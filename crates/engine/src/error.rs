use formula_ir::NodeId;

/// Unrecoverable analysis failures. Everything in the recoverable taxonomy
/// (unresolvable callees, unknown types, unsatisfiable paths, loop bounds,
/// malformed operands) is handled in place and never surfaces here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("contract `{0}` has no function `{1}`")]
    UnknownFunction(String, String),
    #[error("function `{0}` references missing node {1}")]
    MissingNode(String, NodeId),
}
