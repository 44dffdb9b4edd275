//! The work-list driver over function CFGs.
//!
//! A deterministic, single-threaded interpreter: pop `(context, node)`,
//! dispatch the node's IRs, push successor items. Branches fork the context,
//! loop headers are bounded by `max_iter`, and calls suspend the caller on
//! an explicit frame stack until the callee's work-list drains.

use std::{collections::VecDeque, sync::Arc};

use tracing::{debug, trace, warn};

use formula_ir::{ContractModel, FunctionModel, Node, NodeId, NodeKind, TypeRef};
use formula_resolver::ContractResolver;

use crate::{
    context::Ctx,
    error::EngineError,
    expr::Expr,
    formula::{implied, Formula, FormulaMap, GuardedExpr},
    simplify::simplify,
    solver::{SolverOracle, StructuralOracle},
    sort::fresh_symbol,
    summary::FunctionSummary,
    var::{MapIndex, VarId},
};

/// Engine knobs threaded in from configuration.
#[derive(Clone, Copy, Debug)]
pub struct EngineSettings {
    /// Use implication checks to keep propagated constraints minimal.
    pub refined: bool,
    /// Per-loop-header unrolling bound.
    pub max_iter: u32,
    /// Restrict callee resolution to locally supplied contracts.
    pub offline: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { refined: false, max_iter: 3, offline: true }
    }
}

/// The symbolic execution engine.
#[derive(Debug)]
pub struct Engine {
    pub(crate) settings: EngineSettings,
    pub(crate) oracle: Arc<dyn SolverOracle>,
    pub(crate) resolver: Arc<dyn ContractResolver>,
}

/// Suspended caller waiting for a callee frame to drain.
struct CallerState {
    ctx: Ctx,
    call_node: NodeId,
}

/// One level of the inter-procedural call stack.
struct Frame {
    caller: Option<CallerState>,
    worklist: VecDeque<(Ctx, NodeId)>,
    /// Most recently interpreted context of this frame; the return-merge
    /// reads its constraint and return slots when the frame pops.
    last_ctx: Option<Ctx>,
}

/// Per-function accumulators.
struct Run {
    rows: FormulaMap,
    warnings: Vec<String>,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        oracle: Arc<dyn SolverOracle>,
        resolver: Arc<dyn ContractResolver>,
    ) -> Self {
        Self { settings, oracle, resolver }
    }

    /// Engine over the structural oracle with default settings.
    pub fn with_defaults(resolver: Arc<dyn ContractResolver>) -> Self {
        Self::new(EngineSettings::default(), Arc::new(StructuralOracle), resolver)
    }

    /// Summarizes every externally visible function of a contract.
    pub fn analyze_contract(&self, contract: &Arc<ContractModel>) -> Vec<FunctionSummary> {
        let names: Vec<String> =
            contract.exposed_functions().map(|f| f.name.clone()).collect();
        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            match self.analyze_function(contract, &name) {
                Ok(summary) => summaries.push(summary),
                Err(err) => warn!(target: "driver", function = %name, %err, "analysis failed"),
            }
        }
        summaries
    }

    /// Summarizes one function: a formula per written state-variable
    /// projection, as a function of pre-state, arguments and environment.
    pub fn analyze_function(
        &self,
        contract: &Arc<ContractModel>,
        function: &str,
    ) -> Result<FunctionSummary, EngineError> {
        let func = contract.function(function).cloned().ok_or_else(|| {
            EngineError::UnknownFunction(contract.name.clone(), function.to_owned())
        })?;
        self.run(contract, Arc::new(func))
    }

    fn run(
        &self,
        contract: &Arc<ContractModel>,
        func: Arc<FunctionModel>,
    ) -> Result<FunctionSummary, EngineError> {
        debug!(target: "driver", contract = %contract.name, function = %func.name, "analyzing");
        let ctx = Ctx::new(contract.clone(), func.clone());
        let mut run = Run { rows: FormulaMap::default(), warnings: Vec::new() };
        let mut frames = vec![Frame {
            caller: None,
            worklist: VecDeque::from([(ctx, func.entry)]),
            last_ctx: None,
        }];

        while !frames.is_empty() {
            let item = frames.last_mut().and_then(|frame| frame.worklist.pop_front());
            let Some((mut ctx, node_id)) = item else {
                let Some(finished) = frames.pop() else { break };
                let Some(caller_state) = finished.caller else { continue };
                let Some(callee_ctx) = finished.last_ctx else {
                    // every callee path died; the caller is unreachable
                    debug!(target: "driver", "callee produced no surviving path");
                    continue;
                };
                self.return_merge(caller_state, callee_ctx, &mut frames, &mut run);
                continue;
            };

            if ctx.stop {
                continue;
            }
            ctx.pending_call = false;
            let Some(node) = ctx.func.node(node_id).cloned() else {
                return Err(EngineError::MissingNode(ctx.func.name.clone(), node_id));
            };
            ctx.clear_node_scope();
            trace!(
                target: "driver",
                func = %ctx.func.name,
                node = %node_id,
                kind = ?node.kind,
                irs = node.irs.len(),
                "scheduling"
            );

            match node.kind {
                NodeKind::Placeholder => {
                    // modifier substitution point: the modifier's own
                    // invocation ends here
                    if let Some(frame) = frames.last_mut() {
                        frame.worklist.clear();
                    }
                    let outermost = frames.len() == 1;
                    self.terminal_merge(&ctx, outermost, &mut run);
                    if let Some(frame) = frames.last_mut() {
                        frame.last_ctx = Some(ctx);
                    }
                    continue;
                }
                NodeKind::Throw => {
                    // reverted path, nothing to record
                    if let Some(frame) = frames.last_mut() {
                        frame.last_ctx = Some(ctx);
                    }
                    continue;
                }
                NodeKind::EndIf | NodeKind::EndLoop => ctx.pop_cond(),
                _ => {}
            }

            if let Some(request) = self.exec_node(&mut ctx, &node) {
                frames.push(Frame {
                    caller: Some(CallerState { ctx, call_node: node_id }),
                    worklist: VecDeque::from([(request.ctx, request.entry)]),
                    last_ctx: None,
                });
                continue;
            }
            if ctx.stop {
                if let Some(frame) = frames.last_mut() {
                    frame.last_ctx = Some(ctx);
                }
                continue;
            }

            if node.is_branch() {
                self.fork(ctx, &node, &mut frames, &mut run);
                continue;
            }

            let successors: Vec<NodeId> = node.successors().collect();
            if successors.is_empty() || node.kind == NodeKind::Return {
                let outermost = frames.len() == 1;
                self.terminal_merge(&ctx, outermost, &mut run);
            }
            if let Some(frame) = frames.last_mut() {
                for succ in &successors {
                    frame.worklist.push_back((ctx.clone(), *succ));
                }
                frame.last_ctx = Some(ctx);
            }
        }

        Ok(FunctionSummary {
            contract: contract.name.clone(),
            function: func.name.clone(),
            rows: run.rows,
            warnings: run.warnings,
        })
    }

    /// Forks an `If` node into both guarded children, or advances an
    /// `IfLoop` header under the unrolling bound.
    fn fork(&self, mut ctx: Ctx, node: &Node, frames: &mut Vec<Frame>, run: &mut Run) {
        let cond = match ctx.cond_expr_if.take() {
            Some(cond) => cond,
            None => {
                warn!(target: "driver", node = %node.id, "branch node without predicate");
                Expr::bool_val(true)
            }
        };

        match node.kind {
            NodeKind::IfLoop => {
                let counter = ctx.loop_count.entry(node.id).or_insert(0);
                *counter += 1;
                let count = *counter;
                if count > self.settings.max_iter {
                    warn!(
                        target: "driver",
                        node = %node.id,
                        max_iter = self.settings.max_iter,
                        "loop bound hit, taking exit successor"
                    );
                    run.warnings.push(format!(
                        "loop at {} exceeded max_iter {}; summaries are truncated",
                        node.id, self.settings.max_iter
                    ));
                    if let Some(target) = node.son_false {
                        let mut exit = ctx.clone();
                        exit.push_cond(simplify(&cond.negate()));
                        self.enqueue(frames, exit, target);
                    }
                } else {
                    let entry = simplify(&ctx.global_constraint.clone().and(cond.clone()));
                    if self.oracle.is_sat(&entry, &ctx.domain) {
                        if let Some(target) = node.son_true {
                            let mut body = ctx.clone();
                            body.push_cond(simplify(&cond));
                            self.enqueue(frames, body, target);
                        }
                    } else if let Some(target) = node.son_false {
                        let mut exit = ctx.clone();
                        exit.push_cond(simplify(&cond.negate()));
                        self.enqueue(frames, exit, target);
                    }
                }
            }
            _ => {
                let arms = [(simplify(&cond), node.son_true),
                    (simplify(&cond.clone().negate()), node.son_false)];
                for (guard, target) in arms {
                    let Some(target) = target else { continue };
                    let mut child = ctx.clone();
                    child.push_cond(guard);
                    let feasible =
                        simplify(&child.global_constraint.clone().and(child.branch_cond()));
                    if self.oracle.is_sat(&feasible, &child.domain) {
                        self.enqueue(frames, child, target);
                    } else {
                        trace!(target: "driver", node = %target, "branch pruned as unsatisfiable");
                    }
                }
            }
        }

        if let Some(frame) = frames.last_mut() {
            frame.last_ctx = Some(ctx);
        }
    }

    fn enqueue(&self, frames: &mut [Frame], ctx: Ctx, node: NodeId) {
        if let Some(frame) = frames.last_mut() {
            frame.worklist.push_back((ctx, node));
        }
    }

    /// Terminal-node bookkeeping: union every live variable's formulas into
    /// the invocation's path-union accumulator under the global constraint,
    /// and promote state-rooted entries to the function summary when this is
    /// the analyzed function itself.
    fn terminal_merge(&self, ctx: &Ctx, emit_top: bool, run: &mut Run) {
        let global = &ctx.global_constraint;
        let mut merged = ctx.merge_formulas.lock();
        for (var, formula) in &ctx.formula_map {
            if formula.is_empty() {
                continue;
            }
            let mut under_global = Formula::new();
            for pair in formula.iter() {
                let constraint = simplify(&pair.constraint.clone().and(global.clone()));
                if !self.oracle.is_sat(&constraint, &ctx.domain) {
                    continue;
                }
                under_global.push(GuardedExpr::new(pair.expr.clone(), constraint));
            }
            if under_global.is_empty() {
                continue;
            }
            if emit_top && var.is_state_rooted() {
                run.rows.entry(var.clone()).or_default().extend(&under_global);
            }
            merged.entry(var.clone()).or_default().extend(&under_global);
        }
    }

    /// Resumes a caller whose callee frame drained: merge constraints, bind
    /// the return value, replay deferred IRs (re-suspending when one of them
    /// calls again), pull the callee's state effects back through the
    /// parameter aliases, and schedule the call-site's successors.
    fn return_merge(
        &self,
        caller_state: CallerState,
        callee: Ctx,
        frames: &mut Vec<Frame>,
        run: &mut Run,
    ) {
        let CallerState { ctx: mut caller, call_node } = caller_state;

        // 1. constraint propagation
        let callee_fact = implied(
            &callee.global_constraint,
            &callee.branch_cond(),
            &*self.oracle,
            self.settings.refined,
        );
        caller.global_constraint = implied(
            &caller.global_constraint,
            &callee_fact,
            &*self.oracle,
            self.settings.refined,
        );
        for fact in &callee.domain {
            caller.note_domain(fact.clone());
        }
        if !self.oracle.is_sat(&caller.global_constraint, &caller.domain) {
            debug!(target: "driver", "caller constraint unsatisfiable after return, killing path");
            return;
        }

        // 2. return-value binding
        if let Some(ret_var) = caller.caller_ret_var.take() {
            self.bind_return(&mut caller, &callee, ret_var);
        }

        // 3. replay the IRs deferred behind the call
        let deferred = std::mem::take(&mut caller.deferred_irs);
        for (pos, ir) in deferred.iter().enumerate() {
            if caller.stop {
                return;
            }
            if let Some(request) = self.exec_ir(&mut caller, ir, call_node) {
                caller.deferred_irs = deferred[pos + 1..].to_vec();
                frames.push(Frame {
                    caller: Some(CallerState { ctx: caller, call_node }),
                    worklist: VecDeque::from([(request.ctx, request.entry)]),
                    last_ctx: None,
                });
                return;
            }
        }
        if caller.stop {
            return;
        }

        // 4. propagate callee writes to persisted state, re-keyed through
        // the parameter aliases
        let callee_effects = callee.merge_formulas.lock().clone();
        for (var, formula) in &callee_effects {
            if formula.is_empty() || !var.is_state_rooted() {
                continue;
            }
            self.propagate_key_formulas(var, &callee, &mut caller);
            let rekeyed = rekey(var, &callee.param_alias);
            caller.formula_map.entry(rekeyed).or_default().extend(formula);
        }

        // 5. tail position: the call site may itself be terminal
        let call_site = caller.func.node(call_node).cloned();
        let successors: Vec<NodeId> =
            call_site.as_ref().map(|n| n.successors().collect()).unwrap_or_default();
        let terminal = successors.is_empty()
            || call_site.as_ref().is_some_and(|n| n.kind == NodeKind::Return);
        if terminal {
            let outermost = frames.len() == 1;
            self.terminal_merge(&caller, outermost, run);
        }

        if let Some(frame) = frames.last_mut() {
            for succ in &successors {
                frame.worklist.push_back((caller.clone(), *succ));
            }
            frame.last_ctx = Some(caller);
        }
    }

    fn bind_return(&self, caller: &mut Ctx, callee: &Ctx, ret_var: VarId) {
        let slots = callee.ret_var_map.len();
        if slots == 0 {
            // callee supplied no return value, fall back to a fresh symbol
            let ty = ret_var.ty().cloned().unwrap_or_else(TypeRef::uint256);
            let fresh = fresh_symbol(&ret_var.to_string(), &ty);
            if let Some(fact) = fresh.domain {
                caller.note_domain(fact);
            }
            let constraint = caller.path_condition();
            caller.update(ret_var, Formula::single(fresh.expr, constraint));
            return;
        }
        if let (Some(TypeRef::Tuple(tys)), true) = (ret_var.ty().cloned(), slots > 1) {
            for idx in 0..slots {
                let Some(formula) = callee.ret_var_map.get(&format!("ret_{idx}")) else {
                    continue;
                };
                let ty = tys
                    .get(idx)
                    .cloned()
                    .or_else(|| callee.func.returns.get(idx).cloned())
                    .unwrap_or_else(TypeRef::uint256);
                caller.update(VarId::tuple(ret_var.clone(), idx, ty), formula.clone());
            }
            return;
        }
        if let Some(formula) = callee.ret_var_map.get("ret_0") {
            caller.update(ret_var, formula.clone());
        }
    }

    /// Installs the formulas of the key variables a propagated projection
    /// depends on, walking nested projections inside-out.
    fn propagate_key_formulas(&self, var: &VarId, callee: &Ctx, caller: &mut Ctx) {
        if let VarId::Map(key) = var {
            if let MapIndex::Var(key_var) = &key.index {
                let target = rekey(key_var, &callee.param_alias);
                if !caller.formula_map.contains_key(&target) {
                    if let Some(formula) = callee.formula_map.get(key_var) {
                        if !formula.is_empty() {
                            caller.formula_map.insert(target, formula.clone());
                        }
                    }
                }
            }
            self.propagate_key_formulas(&key.base, callee, caller);
        }
    }
}

/// Maps callee-side identities back to the caller's originals, preserving
/// identity across frames (`from1 → from → account`).
fn rekey(var: &VarId, alias: &std::collections::HashMap<VarId, VarId>) -> VarId {
    if let Some(target) = alias.get(var) {
        return target.clone();
    }
    match var {
        VarId::Map(key) => {
            let base = rekey(&key.base, alias);
            let index = match &key.index {
                MapIndex::Var(v) => MapIndex::Var(rekey(v, alias)),
                other => other.clone(),
            };
            VarId::map(base, index, key.ty.clone())
        }
        VarId::Tuple(key) => VarId::tuple(rekey(&key.base, alias), key.index, key.ty.clone()),
        other => other.clone(),
    }
}
