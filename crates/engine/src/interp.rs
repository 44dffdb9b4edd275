//! The per-instruction dispatcher.
//!
//! One exhaustive matcher over the closed IR instruction set. Everything
//! except calls mutates the current context in place; a call builds the
//! callee's starting context and hands a [`CallRequest`] back to the driver,
//! which suspends the caller until the callee frame pops.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use formula_ir::{
    BinaryOp, BuiltinVar, ContractModel, FunctionModel, Instruction, Literal, Node, NodeId,
    Operand, TypeRef, UnaryOp,
};
use formula_resolver::AddressQuery;

use crate::{
    context::Ctx,
    driver::Engine,
    expr::{Expr, Op},
    formula::{merge_binary, reconstruct_if, Formula, GuardedExpr},
    simplify::simplify,
    sort::{const_expr, fresh_symbol},
    var::{MapIndex, VarId},
};

/// A callee invocation the driver must push as a new frame.
pub(crate) struct CallRequest {
    pub ctx: Ctx,
    pub entry: NodeId,
}

fn op_of(op: BinaryOp) -> Op {
    match op {
        BinaryOp::Add => Op::Add,
        BinaryOp::Sub => Op::Sub,
        BinaryOp::Mul => Op::Mul,
        BinaryOp::Div => Op::Div,
        BinaryOp::Mod => Op::Mod,
        BinaryOp::Pow => Op::Pow,
        BinaryOp::Eq => Op::Eq,
        BinaryOp::Ne => Op::Ne,
        BinaryOp::Lt => Op::Lt,
        BinaryOp::Le => Op::Le,
        BinaryOp::Gt => Op::Gt,
        BinaryOp::Ge => Op::Ge,
        BinaryOp::AndAnd => Op::And,
        BinaryOp::OrOr => Op::Or,
        BinaryOp::BitAnd => Op::BitAnd,
        BinaryOp::BitOr => Op::BitOr,
        BinaryOp::BitXor => Op::BitXor,
        BinaryOp::Shl => Op::Shl,
        BinaryOp::Shr => Op::Lshr,
    }
}

impl Engine {
    /// Interprets every IR of a node. Returns the callee request when one of
    /// them suspends the path; the remaining IRs are diverted into
    /// `deferred_irs` for replay after the callee returns.
    pub(crate) fn exec_node(&self, ctx: &mut Ctx, node: &Node) -> Option<CallRequest> {
        for (pos, ir) in node.irs.iter().enumerate() {
            if ctx.stop {
                return None;
            }
            if let Some(request) = self.exec_ir(ctx, ir, node.id) {
                ctx.deferred_irs.extend(node.irs[pos + 1..].iter().cloned());
                return Some(request);
            }
        }
        None
    }

    pub(crate) fn exec_ir(
        &self,
        ctx: &mut Ctx,
        ir: &Instruction,
        node: NodeId,
    ) -> Option<CallRequest> {
        trace!(target: "interp", func = %ctx.func.name, ?ir, "executing");
        match ir {
            Instruction::Binary { dst, op, lhs, rhs } => {
                self.exec_binary(ctx, dst, *op, lhs, rhs);
                None
            }
            Instruction::Unary { dst, op: UnaryOp::Bang, src } => {
                let pairs = self
                    .read_operand(ctx, src)
                    .into_iter()
                    .map(|p| GuardedExpr::new(simplify(&p.expr.negate()), p.constraint))
                    .collect();
                self.write_result(ctx, dst, pairs);
                None
            }
            Instruction::Assign { dst, src } => {
                let pairs = self.read_operand(ctx, src);
                self.write_result(ctx, dst, pairs);
                None
            }
            Instruction::TypeConversion { dst, src, to } => {
                self.exec_conversion(ctx, dst, src, to);
                None
            }
            Instruction::Index { dst, base, index } => {
                self.exec_projection(ctx, dst, base, ProjectionKey::Index(index));
                None
            }
            Instruction::Member { dst, base, member } => {
                self.exec_projection(ctx, dst, base, ProjectionKey::Field(member));
                None
            }
            Instruction::Length { dst, src } => {
                let name = match ctx.var_of(src) {
                    Some(var) => ctx.points_to(&var).to_string(),
                    None => src.to_string(),
                };
                let fresh = fresh_symbol(&format!("{name}.length"), &TypeRef::uint256());
                if let Some(fact) = fresh.domain {
                    ctx.note_domain(fact);
                }
                let pairs = vec![GuardedExpr::new(fresh.expr, ctx.path_condition())];
                self.write_result(ctx, dst, pairs);
                None
            }
            Instruction::Condition { value } => {
                let pairs = self.read_operand(ctx, value);
                ctx.cond_expr_if = Some(simplify(&reconstruct_if(&pairs)));
                None
            }
            Instruction::Unpack { dst, tuple, index } => {
                self.exec_unpack(ctx, dst, tuple, *index);
                None
            }
            Instruction::Return { values } => {
                for (idx, value) in values.iter().enumerate() {
                    let pairs = self.read_operand(ctx, value);
                    ctx.ret_var_map.insert(format!("ret_{idx}"), Formula::from_pairs(pairs));
                }
                None
            }
            Instruction::SolidityCall { dst, function, args } => {
                self.exec_solidity_call(ctx, dst.as_ref(), function, args);
                None
            }
            Instruction::InternalCall { dst, function, args } => {
                self.exec_internal_call(ctx, node, dst.as_ref(), function, args)
            }
            Instruction::LibraryCall { dst, library, function, args } => {
                self.exec_library_call(ctx, node, dst.as_ref(), library, function, args)
            }
            Instruction::HighLevelCall { dst, dest, function, args } => {
                self.exec_high_level_call(ctx, node, dst.as_ref(), dest, function, args)
            }
            Instruction::LowLevelCall { dst, dest, args } => {
                self.exec_low_level_call(ctx, node, dst.as_ref(), dest, args)
            }
        }
    }

    // -- reads --------------------------------------------------------------

    /// The guarded expressions an operand evaluates to on this path.
    pub(crate) fn read_operand(&self, ctx: &mut Ctx, op: &Operand) -> Vec<GuardedExpr> {
        match op {
            Operand::Const { value, ty } => {
                vec![GuardedExpr::new(const_expr(value, ty), ctx.path_condition())]
            }
            Operand::Builtin(BuiltinVar::This) => {
                vec![GuardedExpr::new(
                    Expr::bv160(ctx.contract.this_address()),
                    ctx.path_condition(),
                )]
            }
            _ => {
                let Some(var) = ctx.var_of(op) else { return Vec::new() };
                let var = ctx.points_to(&var);
                self.read_var(ctx, &var, &op.ty())
            }
        }
    }

    /// Current formulas of a resolved identity; an unbound variable reads as
    /// its pre-state symbol. Symbols are keyed by name and sort, so repeated
    /// reads alias without any registration.
    pub(crate) fn read_var(&self, ctx: &mut Ctx, var: &VarId, fallback: &TypeRef) -> Vec<GuardedExpr> {
        if let Some(formula) = ctx.formula_map.get(var) {
            if !formula.is_empty() {
                return formula.pairs().to_vec();
            }
        } else if matches!(var, VarId::Ref(_)) {
            debug!(target: "interp", %var, "unresolved reference read, synthesizing");
        }
        let ty = var.ty().cloned().unwrap_or_else(|| fallback.clone());
        let fresh = fresh_symbol(&var.to_string(), &ty);
        if let Some(fact) = fresh.domain {
            ctx.note_domain(fact);
        }
        vec![GuardedExpr::new(fresh.expr, ctx.path_condition())]
    }

    /// Collapses a pair list into one expression, threading multi-pair
    /// results through an `ite` chain.
    fn collapse(&self, pairs: &[GuardedExpr]) -> Expr {
        match pairs {
            [single] => single.expr.clone(),
            _ => simplify(&reconstruct_if(pairs)),
        }
    }

    // -- writes -------------------------------------------------------------

    /// Destination update policy: state-rooted identities and projections
    /// overwrite, temporaries bind fresh entries, locals and parameters
    /// update in place (synthesizing the entry when the IR is malformed).
    fn write_result(&self, ctx: &mut Ctx, dst: &Operand, pairs: Vec<GuardedExpr>) {
        let Some(var) = ctx.var_of(dst) else {
            warn!(target: "interp", dst = %dst, "constant destination, dropping write");
            return;
        };
        let var = ctx.points_to(&var);
        match &var {
            VarId::Temp { .. } => {
                ctx.update(var, Formula::from_pairs(pairs));
            }
            VarId::Local { .. } | VarId::Param { .. } => {
                if !ctx.formula_map.contains_key(&var) {
                    debug!(target: "interp", %var, "write to unseeded local, binding");
                }
                ctx.formula_map.entry(var).or_default().set(pairs);
            }
            _ => {
                ctx.formula_map.entry(var).or_default().set(pairs);
            }
        }
    }

    fn exec_binary(&self, ctx: &mut Ctx, dst: &Operand, op: BinaryOp, lhs: &Operand, rhs: &Operand) {
        let lexp = self.read_operand(ctx, lhs);
        let rexp = self.read_operand(ctx, rhs);
        let merged = merge_binary(&lexp, &rexp, op_of(op), &*self.oracle, &ctx.domain);
        if merged.is_empty() {
            debug!(target: "interp", func = %ctx.func.name, "no satisfiable merge, killing path");
            ctx.kill();
            return;
        }
        self.write_result(ctx, dst, merged);
    }

    fn exec_conversion(&self, ctx: &mut Ctx, dst: &Operand, src: &Operand, to: &TypeRef) {
        let pairs = match src {
            // constants are rewritten under the converted type
            Operand::Const { value, .. } => {
                vec![GuardedExpr::new(const_expr(value, to), ctx.path_condition())]
            }
            _ => {
                let Some(src_var) = ctx.var_of(src) else { return };
                let src_var = ctx.points_to(&src_var);
                if to.is_address_like() {
                    if let Some(dst_var) = ctx.var_of(dst) {
                        let dst_var = ctx.points_to(&dst_var);
                        ctx.temp2addr.insert(dst_var, src_var.clone());
                    }
                }
                self.read_var(ctx, &src_var, to)
            }
        };
        self.write_result(ctx, dst, pairs);
    }

    fn exec_unpack(&self, ctx: &mut Ctx, dst: &Operand, tuple: &Operand, index: usize) {
        let Some(tuple_var) = ctx.var_of(tuple) else { return };
        let tuple_var = ctx.points_to(&tuple_var);
        let component_ty = match tuple.ty() {
            TypeRef::Tuple(tys) => tys.get(index).cloned().unwrap_or_else(|| dst.ty()),
            _ => dst.ty(),
        };
        let component = VarId::tuple(tuple_var, index, component_ty.clone());
        let pairs = self.read_var(ctx, &component, &component_ty);
        self.write_result(ctx, dst, pairs);
    }

    // -- projections --------------------------------------------------------

    fn exec_projection(
        &self,
        ctx: &mut Ctx,
        dst: &Operand,
        base: &Operand,
        key: ProjectionKey<'_>,
    ) {
        let Operand::Ref { id, ty: ref_ty } = dst else {
            warn!(target: "interp", dst = %dst, "projection destination is not a reference");
            return;
        };
        let Some(base_var) = ctx.var_of(base) else { return };
        let base_var = ctx.points_to(&base_var);

        let index = match &key {
            ProjectionKey::Field(name) => MapIndex::Field((*name).clone()),
            ProjectionKey::Index(op) => match op {
                Operand::Const { value, .. } => MapIndex::Const(value.clone()),
                other => match ctx.var_of(other) {
                    Some(var) => MapIndex::Var(ctx.points_to(&var)),
                    None => return,
                },
            },
        };

        let projection = VarId::map(base_var.clone(), index, ref_ty.clone());
        ctx.ref_map.insert(*id, projection.clone());
        if ctx.formula_map.contains_key(&projection) {
            return;
        }

        // mapping-typed bases materialize their theory-of-arrays backing;
        // everything else starts unbound
        let base_ty = base_var.ty().cloned().unwrap_or_else(|| base.ty());
        if let (TypeRef::Mapping { key: key_ty, value: value_ty }, ProjectionKey::Index(key_op)) =
            (&base_ty, &key)
        {
            let key_expr = match key_op {
                Operand::Const { value, .. } => const_expr(value, key_ty),
                other => {
                    let pairs = self.read_operand(ctx, other);
                    self.collapse(&pairs)
                }
            };
            let array = match &base_var {
                // nested mapping: the inner select composes with the outer
                // array's current formula
                VarId::Map(_) => {
                    let pairs = self.read_var(ctx, &base_var, &base_ty);
                    self.collapse(&pairs)
                }
                _ => Expr::array_sym(
                    base_var.to_string(),
                    crate::sort::sort_of(key_ty),
                    crate::sort::sort_of(value_ty),
                ),
            };
            let select = simplify(&Expr::select(array, key_expr));
            ctx.update(projection, Formula::single(select, ctx.path_condition()));
        } else {
            ctx.update(projection, Formula::new());
        }
    }

    // -- calls --------------------------------------------------------------

    fn exec_solidity_call(
        &self,
        ctx: &mut Ctx,
        dst: Option<&Operand>,
        function: &str,
        args: &[Operand],
    ) {
        if function.starts_with("require") || function.starts_with("assert") {
            let Some(arg) = args.first() else {
                warn!(target: "interp", "require with no argument");
                return;
            };
            let pairs = self.read_operand(ctx, arg);
            let mut satisfiable = Vec::new();
            for pair in &pairs {
                let combined = simplify(
                    &pair
                        .expr
                        .clone()
                        .and(pair.constraint.clone())
                        .and(ctx.global_constraint.clone()),
                );
                if self.oracle.is_sat(&combined, &ctx.domain) {
                    satisfiable.push(combined);
                }
            }
            ctx.global_constraint = match satisfiable.len() {
                0 => Expr::bool_val(false),
                1 => satisfiable.remove(0),
                _ => simplify(&Expr::or_all(satisfiable)),
            };
            if ctx.global_constraint.is_false() {
                debug!(target: "interp", func = %ctx.func.name, "unsatisfiable require, killing path");
                ctx.kill();
            }
            return;
        }
        if function.starts_with("revert") {
            ctx.kill();
            return;
        }
        if function.starts_with("abi.encodeWithSelector") {
            if let Some(dst) = dst {
                if let Some(var) = ctx.var_of(dst) {
                    let var = ctx.points_to(&var);
                    ctx.low_level_args.insert(var, args.to_vec());
                }
            }
            return;
        }
        debug!(target: "interp", builtin = function, "unmodelled solidity builtin");
        self.synthesize_result(ctx, dst);
    }

    fn exec_internal_call(
        &self,
        ctx: &mut Ctx,
        node: NodeId,
        dst: Option<&Operand>,
        function: &str,
        args: &[Operand],
    ) -> Option<CallRequest> {
        let Some(callee) = ctx.contract.function(function).cloned() else {
            warn!(target: "interp", callee = function, "internal callee not in model, skipping");
            self.synthesize_result(ctx, dst);
            return None;
        };
        let contract = ctx.contract.clone();
        self.setup_callee(ctx, node, contract, Arc::new(callee), dst, args)
    }

    fn exec_library_call(
        &self,
        ctx: &mut Ctx,
        node: NodeId,
        dst: Option<&Operand>,
        library: &str,
        function: &str,
        args: &[Operand],
    ) -> Option<CallRequest> {
        // known intrinsic: an uninterpreted sqrt over the integers
        if library == "Math" && function == "sqrt" {
            if let Some(arg) = args.first() {
                let pairs = self
                    .read_operand(ctx, arg)
                    .into_iter()
                    .map(|p| {
                        GuardedExpr::new(
                            Expr::uf("sqrt", vec![p.expr], crate::expr::Sort::Int),
                            p.constraint,
                        )
                    })
                    .collect();
                if let Some(dst) = dst {
                    self.write_result(ctx, dst, pairs);
                }
            }
            return None;
        }
        self.exec_internal_call(ctx, node, dst, function, args)
    }

    fn exec_high_level_call(
        &self,
        ctx: &mut Ctx,
        node: NodeId,
        dst: Option<&Operand>,
        dest: &Operand,
        function: &str,
        args: &[Operand],
    ) -> Option<CallRequest> {
        let Some(callee_contract) = self.resolve_destination(ctx, dest) else {
            warn!(
                target: "interp",
                dest = %dest,
                callee = function,
                "unresolvable high-level callee, skipping call"
            );
            self.synthesize_result(ctx, dst);
            return None;
        };
        let Some(callee) = callee_contract.function(function).cloned() else {
            warn!(
                target: "interp",
                contract = %callee_contract.name,
                callee = function,
                "callee contract has no such function, skipping call"
            );
            self.synthesize_result(ctx, dst);
            return None;
        };
        self.setup_callee(ctx, node, callee_contract, Arc::new(callee), dst, args)
    }

    fn exec_low_level_call(
        &self,
        ctx: &mut Ctx,
        node: NodeId,
        dst: Option<&Operand>,
        dest: &Operand,
        args: &[Operand],
    ) -> Option<CallRequest> {
        let recorded = args
            .first()
            .and_then(|payload| ctx.var_of(payload))
            .map(|var| ctx.points_to(&var))
            .and_then(|var| ctx.low_level_args.get(&var).cloned());
        let Some(recorded) = recorded else {
            warn!(target: "interp", "low-level call without captured payload, skipping");
            self.synthesize_result(ctx, dst);
            return None;
        };
        let Some(selector) = recorded.first().and_then(selector_bytes) else {
            warn!(target: "interp", "payload selector is not a constant, skipping call");
            self.synthesize_result(ctx, dst);
            return None;
        };
        let signature = match self.resolver.signature_for_selector(selector) {
            Ok(Some(signature)) => signature,
            Ok(None) => {
                warn!(target: "interp", "selector decode failed, skipping call");
                self.synthesize_result(ctx, dst);
                return None;
            }
            Err(err) => {
                warn!(target: "interp", %err, "selector lookup error, skipping call");
                self.synthesize_result(ctx, dst);
                return None;
            }
        };
        let Some(callee_contract) = self.resolve_destination(ctx, dest) else {
            warn!(target: "interp", dest = %dest, "unresolvable low-level callee, skipping");
            self.synthesize_result(ctx, dst);
            return None;
        };
        let Some(callee) = callee_contract.function_by_signature(&signature).cloned() else {
            warn!(
                target: "interp",
                contract = %callee_contract.name,
                signature = %signature,
                "no function with decoded signature, skipping call"
            );
            self.synthesize_result(ctx, dst);
            return None;
        };
        self.setup_callee(ctx, node, callee_contract, Arc::new(callee), dst, &recorded[1..])
    }

    /// Recovers the callee contract behind a call destination: through the
    /// conversion the destination temporary was cast from, then through the
    /// resolver with the constant addresses its formulas pin down.
    fn resolve_destination(&self, ctx: &mut Ctx, dest: &Operand) -> Option<Arc<ContractModel>> {
        let mut candidates: Vec<alloy_primitives::Address> = Vec::new();
        if let Operand::Const { value: Literal::Address(address), .. } = dest {
            candidates.push(*address);
        }
        let origin = ctx.var_of(dest).map(|var| {
            let var = ctx.points_to(&var);
            ctx.temp2addr.get(&var).cloned().unwrap_or(var)
        });
        if let Some(origin) = &origin {
            if let Some(formula) = ctx.formula_map.get(origin) {
                candidates.extend(formula.iter().filter_map(|pair| pair.expr.as_address()));
            }
        }
        let name = origin.as_ref().map(VarId::to_string).unwrap_or_else(|| dest.to_string());
        let query = AddressQuery {
            name: &name,
            candidates: &candidates,
            caller: ctx.contract.this_address(),
        };
        let address = self.resolver.resolve_address(&query)?;
        if self.settings.offline {
            // offline mode never goes to source discovery
            return self.resolver.cached(address);
        }
        self.resolver.contract_at(address)
    }

    /// Builds the callee's starting context and suspends the caller.
    fn setup_callee(
        &self,
        ctx: &mut Ctx,
        node: NodeId,
        callee_contract: Arc<ContractModel>,
        callee: Arc<FunctionModel>,
        dst: Option<&Operand>,
        args: &[Operand],
    ) -> Option<CallRequest> {
        let entry_constraint = crate::formula::implied(
            &ctx.global_constraint,
            &ctx.branch_cond(),
            &*self.oracle,
            self.settings.refined,
        );
        if !self.oracle.is_sat(&entry_constraint, &ctx.domain) {
            debug!(target: "interp", callee = %callee.name, "callee entry unreachable, killing path");
            ctx.kill();
            return None;
        }

        let entry = callee.entry;
        let mut callee_ctx =
            ctx.derive_callee(callee_contract, callee.clone(), node, entry_constraint);

        if args.len() != callee.params.len() {
            warn!(
                target: "interp",
                callee = %callee.name,
                args = args.len(),
                params = callee.params.len(),
                "argument/parameter arity mismatch"
            );
        }
        for (arg, param) in args.iter().zip(&callee.params) {
            let param_var = VarId::param(param.name.as_str(), param.ty.clone());
            let pairs = self.read_operand(ctx, arg);
            callee_ctx.formula_map.insert(param_var.clone(), Formula::from_pairs(pairs));
            if let Some(arg_var) = ctx.var_of(arg) {
                let arg_var = ctx.points_to(&arg_var);
                let target = ctx.param_alias.get(&arg_var).cloned().unwrap_or(arg_var);
                callee_ctx.param_alias.insert(param_var, target);
            }
        }

        ctx.pending_call = true;
        ctx.caller_ret_var = dst.and_then(|op| ctx.var_of(op)).map(|var| ctx.points_to(&var));
        Some(CallRequest { ctx: callee_ctx, entry })
    }

    /// Fallback binding for the destination of a skipped call.
    fn synthesize_result(&self, ctx: &mut Ctx, dst: Option<&Operand>) {
        let Some(dst) = dst else { return };
        let Some(var) = ctx.var_of(dst) else { return };
        let var = ctx.points_to(&var);
        let fresh = fresh_symbol(&var.to_string(), &dst.ty());
        if let Some(fact) = fresh.domain {
            ctx.note_domain(fact);
        }
        let pair = GuardedExpr::new(fresh.expr, ctx.path_condition());
        ctx.update(var, Formula::from_pairs([pair]));
    }
}

enum ProjectionKey<'a> {
    Index(&'a Operand),
    Field(&'a String),
}

/// First four big-endian bytes of a constant selector literal.
fn selector_bytes(op: &Operand) -> Option<[u8; 4]> {
    let Operand::Const { value: Literal::Int(v), .. } = op else { return None };
    let (_, bytes) = v.to_bytes_be();
    let mut out = [0u8; 4];
    let offset = 4usize.checked_sub(bytes.len())?;
    out[offset..].copy_from_slice(&bytes);
    Some(out)
}
