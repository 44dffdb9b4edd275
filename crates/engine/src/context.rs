//! Per-path execution context.
//!
//! A context is owned by exactly one work item at a time. Forking a branch
//! deep-clones the maps; the [`merge_formulas`](Ctx::merge_formulas)
//! accumulator stays shared between every context descended from the same
//! function invocation, so terminal paths union into one place.

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::error;

use formula_ir::{ContractModel, FunctionModel, Instruction, NodeId, Operand};

use crate::{
    expr::Expr,
    formula::{Formula, FormulaMap},
    simplify::simplify,
    var::VarId,
};

/// Ref-chain resolution gives up past this depth; the reference map is
/// acyclic by construction, so hitting it means a malformed model.
const MAX_REF_DEPTH: usize = 32;

#[derive(Clone, Debug)]
pub struct Ctx {
    pub contract: Arc<ContractModel>,
    pub func: Arc<FunctionModel>,
    /// All variables currently bound on this path.
    pub formula_map: FormulaMap,
    /// Path-union accumulator, shared across sibling paths of one invocation.
    pub merge_formulas: Arc<Mutex<FormulaMap>>,
    /// Reference resolution, cleared between nodes.
    pub ref_map: HashMap<u32, VarId>,
    /// Conjunction of `require`/`assert` facts taken on this path.
    pub global_constraint: Expr,
    /// Enclosing branch predicates, innermost last.
    pub cond_stack: Vec<Expr>,
    /// Branch predicate awaiting the upcoming `If`/`IfLoop` fork.
    pub cond_expr_if: Option<Expr>,
    /// Set while the remainder of a node's IRs waits on a callee.
    pub pending_call: bool,
    /// IRs deferred until the callee returns.
    pub deferred_irs: Vec<Instruction>,
    /// Destination of the pending call's return value.
    pub caller_ret_var: Option<VarId>,
    /// Return slots `ret_0 .. ret_{n-1}` populated by `Return`.
    pub ret_var_map: IndexMap<String, Formula>,
    /// Callee parameter → original caller variable, chained across frames.
    pub param_alias: HashMap<VarId, VarId>,
    /// Contract reference a temporary was cast from; recovers the callee
    /// destination of a later high-level call.
    pub temp2addr: HashMap<VarId, VarId>,
    /// Selector-and-arguments payloads captured from `abi.encodeWithSelector`.
    pub low_level_args: HashMap<VarId, Vec<Operand>>,
    /// Per-loop-header iteration counters.
    pub loop_count: HashMap<NodeId, u32>,
    /// Background range facts (`x >= 0` for unsigned symbols).
    pub domain: Vec<Expr>,
    /// Path-dead flag.
    pub stop: bool,
    /// Node in the caller that issued the call this context services.
    pub call_site: Option<NodeId>,
}

impl Ctx {
    pub fn new(contract: Arc<ContractModel>, func: Arc<FunctionModel>) -> Self {
        Self {
            contract,
            func,
            formula_map: FormulaMap::default(),
            merge_formulas: Arc::new(Mutex::new(FormulaMap::default())),
            ref_map: HashMap::new(),
            global_constraint: Expr::bool_val(true),
            cond_stack: Vec::new(),
            cond_expr_if: None,
            pending_call: false,
            deferred_irs: Vec::new(),
            caller_ret_var: None,
            ret_var_map: IndexMap::new(),
            param_alias: HashMap::new(),
            temp2addr: HashMap::new(),
            low_level_args: HashMap::new(),
            loop_count: HashMap::new(),
            domain: Vec::new(),
            stop: false,
            call_site: None,
        }
    }

    /// Conjunction of the enclosing branch predicates.
    pub fn branch_cond(&self) -> Expr {
        simplify(&Expr::and_all(self.cond_stack.iter().cloned()))
    }

    /// Constraint attached to values read on this path: the global
    /// constraint conjoined with the branch condition.
    pub fn path_condition(&self) -> Expr {
        simplify(&self.global_constraint.clone().and(self.branch_cond()))
    }

    pub fn push_cond(&mut self, cond: Expr) {
        self.cond_stack.push(cond);
    }

    pub fn pop_cond(&mut self) {
        self.cond_stack.pop();
    }

    /// Identity of an operand, scoped to this context's contract. Constants
    /// have none.
    pub fn var_of(&self, op: &Operand) -> Option<VarId> {
        VarId::from_operand(op, &self.contract.name)
    }

    /// Resolves a reference chain to its non-reference target. Unresolved
    /// references are returned as-is for the caller to synthesize a binding.
    pub fn points_to(&self, var: &VarId) -> VarId {
        let mut current = var.clone();
        for _ in 0..MAX_REF_DEPTH {
            match current {
                VarId::Ref(id) => match self.ref_map.get(&id) {
                    Some(target) => current = target.clone(),
                    None => return current,
                },
                other => return other,
            }
        }
        error!(target: "context", var = %var, "reference chain exceeded maximum depth");
        current
    }

    /// Records the `x >= 0` style fact a fresh symbol came with.
    pub fn note_domain(&mut self, fact: Expr) {
        if !self.domain.contains(&fact) {
            self.domain.push(fact);
        }
    }

    pub fn update(&mut self, var: VarId, formula: Formula) {
        self.formula_map.insert(var, formula);
    }

    /// Purges block-scoped temporaries and the reference map; called on
    /// every node boundary.
    pub fn clear_node_scope(&mut self) {
        self.formula_map.retain(|var, _| !var.is_temp());
        self.ref_map.clear();
    }

    pub fn kill(&mut self) {
        self.stop = true;
    }

    /// Derives the context a callee invocation starts from: the caller's
    /// bindings with a fresh reference map, call bookkeeping reset, and a
    /// fresh path-union accumulator.
    pub fn derive_callee(
        &self,
        contract: Arc<ContractModel>,
        func: Arc<FunctionModel>,
        call_site: NodeId,
        global_constraint: Expr,
    ) -> Self {
        Self {
            contract,
            func,
            formula_map: self.formula_map.clone(),
            merge_formulas: Arc::new(Mutex::new(FormulaMap::default())),
            ref_map: HashMap::new(),
            global_constraint,
            cond_stack: Vec::new(),
            cond_expr_if: None,
            pending_call: false,
            deferred_irs: Vec::new(),
            caller_ret_var: None,
            ret_var_map: IndexMap::new(),
            param_alias: HashMap::new(),
            temp2addr: self.temp2addr.clone(),
            low_level_args: self.low_level_args.clone(),
            loop_count: HashMap::new(),
            domain: self.domain.clone(),
            stop: false,
            call_site: Some(call_site),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::var::MapIndex;
    use formula_ir::{builder::ContractBuilder, TypeRef};

    fn ctx() -> Ctx {
        let contract = Arc::new(ContractBuilder::new("T").build());
        let func = Arc::new(formula_ir::builder::FunctionBuilder::new("f").build());
        Ctx::new(contract, func)
    }

    #[test]
    fn ref_chains_resolve_transitively() {
        let mut ctx = ctx();
        let state = VarId::state("T", "bal", TypeRef::uint256());
        let proj = VarId::map(state, MapIndex::Field("x".into()), TypeRef::uint256());
        ctx.ref_map.insert(1, VarId::Ref(0));
        ctx.ref_map.insert(0, proj.clone());
        assert_eq!(ctx.points_to(&VarId::Ref(1)), proj);
    }

    #[test]
    fn node_scope_purges_temps_only() {
        let mut ctx = ctx();
        let temp = VarId::Temp { name: "TMP_0".into(), ty: TypeRef::uint256() };
        let local = VarId::Local { name: "i".into(), ty: TypeRef::uint256() };
        ctx.update(temp.clone(), Formula::new());
        ctx.update(local.clone(), Formula::new());
        ctx.ref_map.insert(0, local.clone());
        ctx.clear_node_scope();
        assert!(!ctx.formula_map.contains_key(&temp));
        assert!(ctx.formula_map.contains_key(&local));
        assert!(ctx.ref_map.is_empty());
    }
}
