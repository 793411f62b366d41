/// Integration tests for per-function specialization.
///
/// These tests verify:
///   • Hot counters report tier eligibility at the configured thresholds
///   • The unboxed numeric tier produces the tree walker's results and
///     writes back through the environment (fast slot and record)
///   • Guard failures skip the tier; persistent failures discard it
///   • Discarding tiers (by hand or during sweep) is observably inert

use std::rc::Rc;

use prism::ast::{AstNode, BinaryOp};
use prism::{
    EnvId, FastNumOp, FunctionId, ObjectId, PrValue, RtConf, SpecHint, StmtBc, TierState, Vm,
};

// ─── Helpers ──────────────────────────────────────────────────────────────────

/// `function (a, b) { var c; c = (a + b) * 2; return c; }`
fn doubler_ast(vm: &mut Vm) -> (Vec<Rc<AstNode>>, Rc<AstNode>) {
    let a = vm.intern_str("a");
    let b = vm.intern_str("b");
    let c = vm.intern_str("c");
    let params = vec![Rc::new(AstNode::Identifier(a)), Rc::new(AstNode::Identifier(b))];
    let sum = Rc::new(AstNode::Binary {
        op: BinaryOp::Add,
        left: Rc::new(AstNode::Identifier(a)),
        right: Rc::new(AstNode::Identifier(b)),
    });
    let product = Rc::new(AstNode::Binary {
        op: BinaryOp::Mul,
        left: sum,
        right: Rc::new(AstNode::Literal(PrValue::Number(2.0))),
    });
    let body = Rc::new(AstNode::Block(vec![
        Rc::new(AstNode::VarDecl { id: Rc::new(AstNode::Identifier(c)), init: None }),
        Rc::new(AstNode::ExprStmt(Rc::new(AstNode::Assign {
            target: Rc::new(AstNode::Identifier(c)),
            value: product,
        }))),
        Rc::new(AstNode::Return(Some(Rc::new(AstNode::Identifier(c))))),
    ]));
    (params, body)
}

fn doubler_function(vm: &mut Vm) -> (ObjectId, FunctionId) {
    let (params, body) = doubler_ast(vm);
    let env = vm.env;
    let fn_obj = vm.new_script_function(params, vec![None, None], body, env);
    vm.function_setup(fn_obj, None);
    let func = vm.function_of(fn_obj).expect("function record");
    (fn_obj, func)
}

/// The lowered form of the doubler: slots [a, b, c], guards on a and b.
fn doubler_bc() -> StmtBc {
    StmtBc::new(vec![
        FastNumOp::LoadSlot(0),
        FastNumOp::LoadSlot(1),
        FastNumOp::Add,
        FastNumOp::LoadConst(2.0),
        FastNumOp::Mul,
        FastNumOp::StoreSlot(2),
        FastNumOp::LoadSlot(2),
    ])
}

fn install_doubler_tier(vm: &mut Vm, func: FunctionId) {
    assert!(vm.heap.function_mut(func).spec.install_unboxed(doubler_bc(), vec![0, 1]));
}

fn bound_call_env(vm: &mut Vm, fn_obj: ObjectId, args: &[PrValue]) -> EnvId {
    vm.call_env_new(fn_obj, args).expect("call env")
}

/// What the tree walker computes for the doubler.
fn doubler_reference(a: f64, b: f64) -> f64 {
    (a + b) * 2.0
}

// ─── Hot counters ─────────────────────────────────────────────────────────────

#[test]
fn hot_counters_report_tier_eligibility() {
    let mut conf = RtConf::default();
    conf.spec_hot_threshold = 3;
    conf.unboxed_hot_threshold = 5;
    let mut vm = Vm::with_conf(conf);
    let (_, func) = doubler_function(&mut vm);

    let mut hints = Vec::new();
    for _ in 0..6 {
        hints.push(vm.function_note_call(func));
    }
    // The eligibility call itself skips the lower tier's counter, so the
    // unboxed threshold lands one call later.
    assert_eq!(
        hints,
        vec![
            SpecHint::None,
            SpecHint::None,
            SpecHint::BuildStmt,
            SpecHint::None,
            SpecHint::None,
            SpecHint::BuildUnboxed,
        ]
    );
}

#[test]
fn kill_switch_suppresses_all_hints() {
    let mut conf = RtConf::default();
    conf.spec_hot_threshold = 1;
    conf.disable_specialization = true;
    let mut vm = Vm::with_conf(conf);
    let (_, func) = doubler_function(&mut vm);
    for _ in 0..10 {
        assert_eq!(vm.function_note_call(func), SpecHint::None);
    }
}

// ─── Tier transparency ────────────────────────────────────────────────────────

#[test]
fn unboxed_tier_matches_the_tree_walker() {
    let mut vm = Vm::new();
    let (fn_obj, func) = doubler_function(&mut vm);
    install_doubler_tier(&mut vm, func);

    for (a, b) in [(3.0, 4.0), (0.0, 0.0), (-1.5, 2.25), (1e9, 1.0)] {
        let env = bound_call_env(&mut vm, fn_obj, &[PrValue::Number(a), PrValue::Number(b)]);
        let result = vm.try_unboxed_call(func, env).expect("guards hold");
        assert_eq!(result, PrValue::Number(doubler_reference(a, b)));
    }
}

#[test]
fn written_slots_flow_back_through_the_environment() {
    let mut vm = Vm::new();
    let (fn_obj, func) = doubler_function(&mut vm);
    install_doubler_tier(&mut vm, func);
    assert_eq!(vm.heap.function(func).spec.write_bits, 0b100);

    let env = bound_call_env(&mut vm, fn_obj, &[PrValue::Number(3.0), PrValue::Number(4.0)]);
    vm.try_unboxed_call(func, env).expect("guards hold");

    let c = vm.intern_str("c");
    assert_eq!(vm.env_get(env, c), Some(PrValue::Number(14.0)));
    let record = vm.heap.env(env).record.expect("record");
    assert_eq!(vm.heap.get_own(record, c), Some(PrValue::Number(14.0)));

    // Unwritten slots keep their boxed values.
    let a = vm.intern_str("a");
    assert_eq!(vm.env_get(env, a), Some(PrValue::Number(3.0)));
}

// ─── Guards ───────────────────────────────────────────────────────────────────

#[test]
fn guard_failure_skips_the_tier() {
    let mut vm = Vm::new();
    let (fn_obj, func) = doubler_function(&mut vm);
    install_doubler_tier(&mut vm, func);

    let s = vm.intern_str("three");
    let env = bound_call_env(&mut vm, fn_obj, &[PrValue::String(s), PrValue::Number(4.0)]);
    assert_eq!(vm.try_unboxed_call(func, env), None);
    // One miss does not discard the tier.
    assert_eq!(vm.heap.function(func).spec.unboxed.state, TierState::Ready);

    // A numeric call still runs it.
    let env = bound_call_env(&mut vm, fn_obj, &[PrValue::Number(1.0), PrValue::Number(2.0)]);
    assert_eq!(vm.try_unboxed_call(func, env), Some(PrValue::Number(6.0)));
}

#[test]
fn persistent_guard_failures_discard_the_tier() {
    let mut conf = RtConf::default();
    conf.spec_guard_miss_max = 3;
    let mut vm = Vm::with_conf(conf);
    let (fn_obj, func) = doubler_function(&mut vm);
    install_doubler_tier(&mut vm, func);

    let s = vm.intern_str("nope");
    for _ in 0..3 {
        let env = bound_call_env(&mut vm, fn_obj, &[PrValue::String(s), PrValue::Number(4.0)]);
        assert_eq!(vm.try_unboxed_call(func, env), None);
    }
    assert_eq!(vm.heap.function(func).spec.unboxed.state, TierState::Failed);
    assert!(vm.heap.function(func).spec.unboxed.bc.is_none());
}

// ─── Discardability ───────────────────────────────────────────────────────────

#[test]
fn discarding_tiers_is_observably_inert() {
    let mut vm = Vm::new();
    let (fn_obj, func) = doubler_function(&mut vm);
    install_doubler_tier(&mut vm, func);

    vm.heap.discard_specializations();
    assert_eq!(vm.heap.function(func).spec.unboxed.state, TierState::Unbuilt);

    // The slow path is still available and agrees with the old tier.
    let env = bound_call_env(&mut vm, fn_obj, &[PrValue::Number(3.0), PrValue::Number(4.0)]);
    assert_eq!(vm.try_unboxed_call(func, env), None);

    // Reinstalling brings it back with identical results.
    install_doubler_tier(&mut vm, func);
    let env = bound_call_env(&mut vm, fn_obj, &[PrValue::Number(3.0), PrValue::Number(4.0)]);
    assert_eq!(vm.try_unboxed_call(func, env), Some(PrValue::Number(14.0)));
}

#[test]
fn sweep_discards_tiers_when_configured() {
    let mut conf = RtConf::default();
    conf.spec_discard_on_gc = true;
    let mut vm = Vm::with_conf(conf);
    let (fn_obj, func) = doubler_function(&mut vm);
    let k = vm.intern_str("f");
    vm.heap.define(vm.global, k, PrValue::Object(fn_obj), prism::PropAttrs::NONE);
    install_doubler_tier(&mut vm, func);

    vm.collect();
    assert!(vm.heap.function_live(func));
    assert_eq!(vm.heap.function(func).spec.unboxed.state, TierState::Unbuilt);
    assert!(vm.heap.function(func).spec.unboxed.bc.is_none());
}

#[test]
fn slot_map_covers_params_and_vars() {
    let mut vm = Vm::new();
    let (_, func) = doubler_function(&mut vm);
    let names: Vec<String> = vm
        .heap
        .function(func)
        .spec
        .slot_names
        .iter()
        .map(|&s| vm.heap.string(s).as_str().to_string())
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}
