//! End-to-end summaries over hand-built contract models.

use std::sync::Arc;

use formula_engine::{solver::StructuralOracle, Engine, EngineSettings};
use formula_ir::{
    builder::{ContractBuilder, FunctionBuilder},
    BinaryOp, Instruction, NodeKind, Operand, TypeRef,
};
use formula_resolver::LocalResolver;
use pretty_assertions::assert_eq;

fn engine() -> Engine {
    Engine::with_defaults(Arc::new(LocalResolver::new()))
}

fn engine_with(max_iter: u32) -> Engine {
    Engine::new(
        EngineSettings { refined: false, max_iter, offline: true },
        Arc::new(StructuralOracle),
        Arc::new(LocalResolver::new()),
    )
}

fn uint() -> TypeRef {
    TypeRef::uint256()
}

/// `function add(uint x) public { total = total + x; }`
#[test]
fn straight_line_addition() {
    let mut f = FunctionBuilder::new("add").param("x", uint());
    let body = f.node(
        NodeKind::Expression,
        vec![Instruction::Binary {
            dst: Operand::state("total", uint()),
            op: BinaryOp::Add,
            lhs: Operand::state("total", uint()),
            rhs: Operand::param("x", uint()),
        }],
    );
    let ret = f.node(NodeKind::Return, vec![]);
    f.link(body, ret);
    let contract = Arc::new(
        ContractBuilder::new("Token").state_var("total", uint()).function(f.build()).build(),
    );

    let summary = engine().analyze_function(&contract, "add").unwrap();
    let row = summary.row("total").expect("total is written");
    assert_eq!(row.len(), 1);
    assert_eq!(row.pairs()[0].expr.to_string(), "(+ total x)");
    assert!(row.pairs()[0].constraint.is_true());
    assert!(summary.warnings.is_empty());
}

/// `function guard(uint x) public { require(x > 10); s = x; }`
#[test]
fn require_guards_the_write() {
    let mut f = FunctionBuilder::new("guard").param("x", uint());
    let check = f.node(
        NodeKind::Expression,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_0", TypeRef::bool()),
                op: BinaryOp::Gt,
                lhs: Operand::param("x", uint()),
                rhs: Operand::uint(10),
            },
            Instruction::SolidityCall {
                dst: None,
                function: "require(bool)".into(),
                args: vec![Operand::temp("TMP_0", TypeRef::bool())],
            },
        ],
    );
    let write = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign {
            dst: Operand::state("s", uint()),
            src: Operand::param("x", uint()),
        }],
    );
    let ret = f.node(NodeKind::Return, vec![]);
    f.chain(&[check, write, ret]);
    let contract =
        Arc::new(ContractBuilder::new("C").state_var("s", uint()).function(f.build()).build());

    let summary = engine().analyze_function(&contract, "guard").unwrap();
    let row = summary.row("s").unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row.pairs()[0].expr.to_string(), "x");
    assert_eq!(row.pairs()[0].constraint.to_string(), "(> x 10)");
}

/// `function branch(uint x) public { if (x > 0) s = 1; else s = 2; }`
#[test]
fn branches_fork_and_rejoin() {
    let mut f = FunctionBuilder::new("branch").param("x", uint());
    let cond = f.node(
        NodeKind::If,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_0", TypeRef::bool()),
                op: BinaryOp::Gt,
                lhs: Operand::param("x", uint()),
                rhs: Operand::uint(0),
            },
            Instruction::Condition { value: Operand::temp("TMP_0", TypeRef::bool()) },
        ],
    );
    let then = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(1) }],
    );
    let orelse = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(2) }],
    );
    let endif = f.node(NodeKind::EndIf, vec![]);
    f.branch(cond, then, orelse);
    f.link(then, endif);
    f.link(orelse, endif);
    let contract =
        Arc::new(ContractBuilder::new("C").state_var("s", uint()).function(f.build()).build());

    let oracle = StructuralOracle;
    let summary = engine().analyze_function(&contract, "branch").unwrap();
    let row = summary.row("s").unwrap();
    assert_eq!(row.len(), 2);
    let (first, second) = (&row.pairs()[0], &row.pairs()[1]);
    assert_eq!(first.expr.to_string(), "1");
    assert_eq!(first.constraint.to_string(), "(> x 0)");
    assert_eq!(second.expr.to_string(), "2");
    assert_eq!(second.constraint.to_string(), "(not (> x 0))");

    // the two constraints are satisfiable, mutually exclusive and exhaustive
    use formula_engine::solver::SolverOracle;
    use formula_engine::simplify;
    assert!(oracle.is_sat(&first.constraint, &[]));
    assert!(oracle.is_sat(&second.constraint, &[]));
    let both = first.constraint.clone().and(second.constraint.clone());
    assert!(simplify(&both).is_false());
    assert_eq!(simplify(&second.constraint.clone().negate()), first.constraint);
}

/// `mapping(address => uint) bal; function move(address a, uint v) { bal[a] = bal[a] + v; }`
#[test]
fn mapping_write_selects_from_the_array() {
    let bal_ty = TypeRef::mapping(TypeRef::address(), uint());
    let mut f =
        FunctionBuilder::new("move").param("a", TypeRef::address()).param("v", uint());
    let body = f.node(
        NodeKind::Expression,
        vec![
            Instruction::Index {
                dst: Operand::reference(0, uint()),
                base: Operand::state("bal", bal_ty.clone()),
                index: Operand::param("a", TypeRef::address()),
            },
            Instruction::Binary {
                dst: Operand::temp("TMP_0", uint()),
                op: BinaryOp::Add,
                lhs: Operand::reference(0, uint()),
                rhs: Operand::param("v", uint()),
            },
            Instruction::Assign {
                dst: Operand::reference(0, uint()),
                src: Operand::temp("TMP_0", uint()),
            },
        ],
    );
    let ret = f.node(NodeKind::Return, vec![]);
    f.link(body, ret);
    let contract = Arc::new(
        ContractBuilder::new("Bank").state_var("bal", bal_ty).function(f.build()).build(),
    );

    let summary = engine().analyze_function(&contract, "move").unwrap();
    let row = summary.row("bal[a]").expect("projection is written");
    assert_eq!(row.len(), 1);
    assert_eq!(row.pairs()[0].expr.to_string(), "(+ (select bal a) v)");
    assert!(row.pairs()[0].constraint.is_true());
}

/// Internal call: `s = callee(z)` where `callee(y) { return y + 1; }`.
#[test]
fn internal_call_binds_the_return_value() {
    let mut callee = FunctionBuilder::new("callee").internal().param("y", uint()).returns(uint());
    callee.node(
        NodeKind::Return,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_r", uint()),
                op: BinaryOp::Add,
                lhs: Operand::param("y", uint()),
                rhs: Operand::uint(1),
            },
            Instruction::Return { values: vec![Operand::temp("TMP_r", uint())] },
        ],
    );

    let mut caller = FunctionBuilder::new("caller").param("z", uint());
    let call = caller.node(
        NodeKind::Expression,
        vec![
            Instruction::InternalCall {
                dst: Some(Operand::temp("TMP_0", uint())),
                function: "callee".into(),
                args: vec![Operand::param("z", uint())],
            },
            Instruction::Assign {
                dst: Operand::state("s", uint()),
                src: Operand::temp("TMP_0", uint()),
            },
        ],
    );
    let ret = caller.node(NodeKind::Return, vec![]);
    caller.link(call, ret);

    let contract = Arc::new(
        ContractBuilder::new("C")
            .state_var("s", uint())
            .function(callee.build())
            .function(caller.build())
            .build(),
    );

    let summary = engine().analyze_function(&contract, "caller").unwrap();
    let row = summary.row("s").unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row.pairs()[0].expr.to_string(), "(+ z 1)");
    assert!(row.pairs()[0].constraint.is_true());
}

/// `for (uint i = 0; i < 3; i++) acc += i;` with `max_iter = 3`.
#[test]
fn loops_unroll_up_to_the_bound() {
    let mut f = FunctionBuilder::new("sum");
    let init = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::local("i", uint()), src: Operand::uint(0) }],
    );
    let header = f.node(
        NodeKind::IfLoop,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_c", TypeRef::bool()),
                op: BinaryOp::Lt,
                lhs: Operand::local("i", uint()),
                rhs: Operand::uint(3),
            },
            Instruction::Condition { value: Operand::temp("TMP_c", TypeRef::bool()) },
        ],
    );
    let body = f.node(
        NodeKind::Expression,
        vec![
            Instruction::Binary {
                dst: Operand::state("acc", uint()),
                op: BinaryOp::Add,
                lhs: Operand::state("acc", uint()),
                rhs: Operand::local("i", uint()),
            },
            Instruction::Binary {
                dst: Operand::local("i", uint()),
                op: BinaryOp::Add,
                lhs: Operand::local("i", uint()),
                rhs: Operand::uint(1),
            },
        ],
    );
    let exit = f.node(NodeKind::EndLoop, vec![]);
    f.link(init, header);
    f.branch(header, body, exit);
    f.link(body, header);
    let contract =
        Arc::new(ContractBuilder::new("C").state_var("acc", uint()).function(f.build()).build());

    let summary = engine_with(3).analyze_function(&contract, "sum").unwrap();
    let row = summary.row("acc").unwrap();
    // three unrollings, never a fourth
    assert_eq!(row.len(), 1);
    assert_eq!(row.pairs()[0].expr.to_string(), "(+ (+ acc 1) 2)");
    assert_eq!(summary.warnings.len(), 1);
    assert!(summary.warnings[0].contains("max_iter"));
}

/// A `require` at function entry shows up in every resulting constraint.
#[test]
fn require_tightens_every_pair() {
    let mut f = FunctionBuilder::new("mixed").param("x", uint());
    let check = f.node(
        NodeKind::Expression,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_0", TypeRef::bool()),
                op: BinaryOp::Gt,
                lhs: Operand::param("x", uint()),
                rhs: Operand::uint(5),
            },
            Instruction::SolidityCall {
                dst: None,
                function: "require(bool)".into(),
                args: vec![Operand::temp("TMP_0", TypeRef::bool())],
            },
        ],
    );
    let cond = f.node(
        NodeKind::If,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_1", TypeRef::bool()),
                op: BinaryOp::Gt,
                lhs: Operand::param("x", uint()),
                rhs: Operand::uint(0),
            },
            Instruction::Condition { value: Operand::temp("TMP_1", TypeRef::bool()) },
        ],
    );
    let then = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(1) }],
    );
    let orelse = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(2) }],
    );
    let endif = f.node(NodeKind::EndIf, vec![]);
    f.link(check, cond);
    f.branch(cond, then, orelse);
    f.link(then, endif);
    f.link(orelse, endif);
    let contract =
        Arc::new(ContractBuilder::new("C").state_var("s", uint()).function(f.build()).build());

    let summary = engine().analyze_function(&contract, "mixed").unwrap();
    let row = summary.row("s").unwrap();
    assert!(!row.is_empty());

    use formula_engine::expr::{Expr, Op};
    use formula_engine::solver::SolverOracle;
    let oracle = StructuralOracle;
    let p = Expr::app(
        Op::Gt,
        vec![Expr::sym("x", formula_engine::expr::Sort::Int), Expr::int(5)],
    );
    for pair in row.iter() {
        assert!(oracle.is_sat(&pair.constraint, &[]), "P1: stored constraints are satisfiable");
        assert!(oracle.implies(&pair.constraint, &p), "P4: constraint implies the require");
    }
}

/// `x = x;` does not change the formula, structurally.
#[test]
fn trivial_assignment_is_idempotent() {
    let build = |assignments: usize| {
        let mut f = FunctionBuilder::new("noop");
        let irs = (0..assignments)
            .map(|_| Instruction::Assign {
                dst: Operand::state("s", uint()),
                src: Operand::state("s", uint()),
            })
            .collect();
        let body = f.node(NodeKind::Expression, irs);
        let ret = f.node(NodeKind::Return, vec![]);
        f.link(body, ret);
        Arc::new(ContractBuilder::new("C").state_var("s", uint()).function(f.build()).build())
    };

    let once = engine().analyze_function(&build(1), "noop").unwrap();
    let twice = engine().analyze_function(&build(2), "noop").unwrap();
    assert_eq!(once.row("s"), twice.row("s"));
    let row = once.row("s").unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row.pairs()[0].expr.to_string(), "s");
}

/// No two pairs of any row are structurally equal after simplification.
#[test]
fn summaries_are_deduplicated() {
    // both branches write the same value under different guards; the join
    // then writes it again unconditionally
    let mut f = FunctionBuilder::new("dup").param("x", uint());
    let cond = f.node(
        NodeKind::If,
        vec![
            Instruction::Binary {
                dst: Operand::temp("TMP_0", TypeRef::bool()),
                op: BinaryOp::Gt,
                lhs: Operand::param("x", uint()),
                rhs: Operand::uint(0),
            },
            Instruction::Condition { value: Operand::temp("TMP_0", TypeRef::bool()) },
        ],
    );
    let then = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(3) }],
    );
    let orelse = f.node(
        NodeKind::Expression,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(3) }],
    );
    let endif = f.node(
        NodeKind::EndIf,
        vec![Instruction::Assign { dst: Operand::state("s", uint()), src: Operand::uint(3) }],
    );
    f.branch(cond, then, orelse);
    f.link(then, endif);
    f.link(orelse, endif);
    let contract =
        Arc::new(ContractBuilder::new("C").state_var("s", uint()).function(f.build()).build());

    let summary = engine().analyze_function(&contract, "dup").unwrap();
    let row = summary.row("s").unwrap();
    for (i, a) in row.pairs().iter().enumerate() {
        for b in &row.pairs()[i + 1..] {
            assert_ne!(a, b, "P2: no structural duplicates");
        }
    }
}
