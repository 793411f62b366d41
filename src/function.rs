/// Function records and specialization state.
///
/// One record serves native and script functions. Script functions keep
/// their parameter/body AST, the parameter-name strings extracted at
/// creation, and the closure environment. Per-function specialization
/// state drives progressive lowering:
///
///   tree walker ──hot──▶ statement bytecode ──hot──▶ unboxed numeric
///
/// Each tier guards on the types of specific local slots and records the
/// slots its lowered code writes; a guard failure skips the tier for the
/// call, persistent failure discards it. Tiers are caches: recomputable
/// from the AST, discardable at any safe point with no observable
/// effect.

use std::rc::Rc;

use crate::ast::{AstNode, AstRef, SwitchCase};
use crate::gc::{EnvId, FunctionId, Heap, ObjectId, Root, StringId, TraceRef};
use crate::object::{Internal, ObjectKind, PropAttrs};
use crate::value::PrValue;
use crate::vm::Vm;

/// Native entry point: `(vm, this, args) -> value`. May set a pending
/// throw on the VM.
pub type NativeFn = fn(&mut Vm, PrValue, &[PrValue]) -> PrValue;

/// Most slots a tier may guard on.
pub const SPEC_GUARD_MAX: usize = 8;
/// Most locals addressable by lowered code (the write bitmap is a u64).
pub const SPEC_SLOT_MAX: usize = 64;

// ---------------------------------------------------------------------------
// Lowered numeric code
// ---------------------------------------------------------------------------

/// One op of the lowered numeric form: a stack machine over an unboxed
/// f64 slot frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FastNumOp {
    LoadSlot(u8),
    LoadConst(f64),
    StoreSlot(u8),
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Lt,
    Le,
    Gt,
    Ge,
    EqNum,
    NeNum,
    Floor,
    Abs,
    Sqrt,
    Min,
    Max,
    Clamp { lo: f64, hi: f64, floor: bool },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BcOutcome {
    /// Finished with a value on the stack.
    Value(f64),
    /// Finished with no value (statement-only code).
    Done,
    /// Malformed program: underflow or out-of-range slot.
    Fault,
}

/// A cached lowered program.
#[derive(Debug, Clone, Default)]
pub struct StmtBc {
    pub ops: Vec<FastNumOp>,
}

impl StmtBc {
    pub fn new(ops: Vec<FastNumOp>) -> StmtBc {
        StmtBc { ops }
    }

    /// Bitmap of slots this program stores to.
    pub fn write_bits(&self) -> u64 {
        let mut bits = 0u64;
        for op in &self.ops {
            if let FastNumOp::StoreSlot(i) = *op {
                if (i as usize) < SPEC_SLOT_MAX {
                    bits |= 1u64 << i;
                }
            }
        }
        bits
    }

    /// Runs the program over an unboxed slot frame.
    pub fn execute(&self, slots: &mut [f64]) -> BcOutcome {
        let mut stack: Vec<f64> = Vec::with_capacity(8);
        macro_rules! pop {
            () => {
                match stack.pop() {
                    Some(v) => v,
                    None => return BcOutcome::Fault,
                }
            };
        }
        for op in &self.ops {
            match *op {
                FastNumOp::LoadSlot(i) => match slots.get(i as usize) {
                    Some(v) => stack.push(*v),
                    None => return BcOutcome::Fault,
                },
                FastNumOp::LoadConst(c) => stack.push(c),
                FastNumOp::StoreSlot(i) => {
                    let v = pop!();
                    match slots.get_mut(i as usize) {
                        Some(slot) => *slot = v,
                        None => return BcOutcome::Fault,
                    }
                }
                FastNumOp::Add => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a + b);
                }
                FastNumOp::Sub => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a - b);
                }
                FastNumOp::Mul => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a * b);
                }
                FastNumOp::Div => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a / b);
                }
                FastNumOp::Mod => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a % b);
                }
                FastNumOp::Neg => {
                    let a = pop!();
                    stack.push(-a);
                }
                FastNumOp::Lt => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(if a < b { 1.0 } else { 0.0 });
                }
                FastNumOp::Le => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(if a <= b { 1.0 } else { 0.0 });
                }
                FastNumOp::Gt => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(if a > b { 1.0 } else { 0.0 });
                }
                FastNumOp::Ge => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(if a >= b { 1.0 } else { 0.0 });
                }
                FastNumOp::EqNum => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(if a == b { 1.0 } else { 0.0 });
                }
                FastNumOp::NeNum => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(if a != b { 1.0 } else { 0.0 });
                }
                FastNumOp::Floor => {
                    let a = pop!();
                    stack.push(a.floor());
                }
                FastNumOp::Abs => {
                    let a = pop!();
                    stack.push(a.abs());
                }
                FastNumOp::Sqrt => {
                    let a = pop!();
                    stack.push(a.sqrt());
                }
                FastNumOp::Min => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a.min(b));
                }
                FastNumOp::Max => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(a.max(b));
                }
                FastNumOp::Clamp { lo, hi, floor } => {
                    let a = pop!();
                    let mut v = a.max(lo).min(hi);
                    if floor {
                        v = v.floor();
                    }
                    stack.push(v);
                }
            }
        }
        match stack.pop() {
            Some(v) => BcOutcome::Value(v),
            None => BcOutcome::Done,
        }
    }
}

// ---------------------------------------------------------------------------
// Tier state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierState {
    Unbuilt,
    Ready,
    Failed,
}

#[derive(Debug)]
pub struct Tier {
    pub hot_count: u32,
    pub state: TierState,
    pub bc: Option<StmtBc>,
    /// Slot-map indices whose values must be numbers for this tier.
    pub guard_slots: Vec<u8>,
    pub guard_misses: u32,
}

impl Tier {
    fn new() -> Tier {
        Tier {
            hot_count: 0,
            state: TierState::Unbuilt,
            bc: None,
            guard_slots: Vec::new(),
            guard_misses: 0,
        }
    }

    pub fn install(&mut self, bc: StmtBc, guard_slots: Vec<u8>) -> bool {
        if guard_slots.len() > SPEC_GUARD_MAX {
            self.state = TierState::Failed;
            return false;
        }
        self.bc = Some(bc);
        self.guard_slots = guard_slots;
        self.guard_misses = 0;
        self.state = TierState::Ready;
        true
    }

    /// Records a guard failure; discards the tier after `max` misses.
    pub fn note_guard_miss(&mut self, max: u32) -> bool {
        self.guard_misses += 1;
        if self.guard_misses >= max {
            self.bc = None;
            self.state = TierState::Failed;
            return true;
        }
        false
    }

    fn discard_lowered(&mut self) {
        self.bc = None;
        self.guard_misses = 0;
        self.hot_count = 0;
        if self.state == TierState::Ready {
            self.state = TierState::Unbuilt;
        }
    }
}

/// What the evaluator should do next for a function it is about to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecHint {
    None,
    /// Hot enough for the statement-bytecode tier.
    BuildStmt,
    /// Hot enough for the unboxed numeric tier.
    BuildUnboxed,
}

#[derive(Debug)]
pub struct SpecState {
    /// Parameter names followed by `var` declarations, in first-seen
    /// order. Fast slots and tier guards address locals by index into
    /// this map.
    pub slot_names: Vec<StringId>,
    pub stmt: Tier,
    pub unboxed: Tier,
    /// Slots the unboxed code assigns; everything else reads through
    /// from the boxed record.
    pub write_bits: u64,
}

impl SpecState {
    fn new() -> SpecState {
        SpecState {
            slot_names: Vec::new(),
            stmt: Tier::new(),
            unboxed: Tier::new(),
            write_bits: 0,
        }
    }

    /// Bumps hot counters; reports which tier just became eligible.
    pub fn note_call(&mut self, stmt_threshold: u32, unboxed_threshold: u32) -> SpecHint {
        if self.stmt.state == TierState::Unbuilt {
            self.stmt.hot_count += 1;
            if self.stmt.hot_count == stmt_threshold {
                return SpecHint::BuildStmt;
            }
        }
        if self.unboxed.state == TierState::Unbuilt {
            self.unboxed.hot_count += 1;
            if self.unboxed.hot_count == unboxed_threshold {
                return SpecHint::BuildUnboxed;
            }
        }
        SpecHint::None
    }

    pub fn install_unboxed(&mut self, bc: StmtBc, guard_slots: Vec<u8>) -> bool {
        let bits = bc.write_bits();
        if self.unboxed.install(bc, guard_slots) {
            self.write_bits = bits;
            true
        } else {
            false
        }
    }

    /// Drops all lowered code; counters restart. Observably a no-op.
    pub fn discard_lowered(&mut self) {
        self.stmt.discard_lowered();
        self.unboxed.discard_lowered();
        self.write_bits = 0;
    }
}

// ---------------------------------------------------------------------------
// Function records
// ---------------------------------------------------------------------------

pub struct PrFunction {
    pub is_native: bool,
    pub native: Option<NativeFn>,
    pub params: Vec<AstRef>,
    pub param_defaults: Vec<Option<AstRef>>,
    pub param_names: Vec<Option<StringId>>,
    pub name: Option<StringId>,
    pub body: Option<AstRef>,
    pub env: Option<EnvId>,
    pub spec: SpecState,
}

impl PrFunction {
    pub fn new_native(native: NativeFn) -> PrFunction {
        PrFunction {
            is_native: true,
            native: Some(native),
            params: Vec::new(),
            param_defaults: Vec::new(),
            param_names: Vec::new(),
            name: None,
            body: None,
            env: None,
            spec: SpecState::new(),
        }
    }

    pub(crate) fn trace(&self, out: &mut Vec<TraceRef>) {
        if let Some(env) = self.env {
            out.push(TraceRef::Env(env));
        }
        if let Some(name) = self.name {
            out.push(TraceRef::String(name));
        }
        for &name in self.param_names.iter().flatten() {
            out.push(TraceRef::String(name));
        }
        for &name in &self.spec.slot_names {
            out.push(TraceRef::String(name));
        }
        if let Some(body) = &self.body {
            out.push(TraceRef::Ast(Rc::clone(body)));
        }
        for p in &self.params {
            out.push(TraceRef::Ast(Rc::clone(p)));
        }
        for d in self.param_defaults.iter().flatten() {
            out.push(TraceRef::Ast(Rc::clone(d)));
        }
    }
}

// ---------------------------------------------------------------------------
// Slot-map collection
// ---------------------------------------------------------------------------

fn slot_names_push(heap: &Heap, names: &mut Vec<StringId>, name: StringId) {
    if !names.iter().any(|&n| heap.strings_equal(n, name)) {
        names.push(name);
    }
}

/// Collects `var` declarations (and `for-in` var targets) from a body,
/// without descending into nested function literals.
fn collect_slot_names(heap: &Heap, node: &AstNode, names: &mut Vec<StringId>) {
    match node {
        AstNode::VarDecl { id, .. } => {
            if let Some(name) = id.ident() {
                slot_names_push(heap, names, name);
            }
        }
        AstNode::Program(items) | AstNode::Block(items) => {
            for item in items {
                collect_slot_names(heap, item, names);
            }
        }
        AstNode::If { then_branch, else_branch, .. } => {
            collect_slot_names(heap, then_branch, names);
            if let Some(e) = else_branch {
                collect_slot_names(heap, e, names);
            }
        }
        AstNode::While { body, .. } | AstNode::DoWhile { body, .. } => {
            collect_slot_names(heap, body, names);
        }
        AstNode::For { init, body, .. } => {
            if let Some(init) = init {
                collect_slot_names(heap, init, names);
            }
            collect_slot_names(heap, body, names);
        }
        AstNode::ForIn { target, is_var, body, .. } => {
            if *is_var {
                if let Some(name) = target.ident() {
                    slot_names_push(heap, names, name);
                }
            }
            collect_slot_names(heap, body, names);
        }
        AstNode::Switch { cases, .. } => {
            for SwitchCase { body, .. } in cases {
                for stmt in body {
                    collect_slot_names(heap, stmt, names);
                }
            }
        }
        AstNode::Try { try_block, catch_block, finally_block, .. } => {
            collect_slot_names(heap, try_block, names);
            for block in [catch_block, finally_block].into_iter().flatten() {
                collect_slot_names(heap, block, names);
            }
        }
        AstNode::Label { stmt, .. } => collect_slot_names(heap, stmt, names),
        AstNode::FunctionExpr { .. } => {}
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// VM-level function operations
// ---------------------------------------------------------------------------

impl Vm {
    /// Wraps a native entry point in a FUNCTION-kind object.
    pub fn new_native_function(&mut self, native: NativeFn) -> ObjectId {
        let obj = self.heap.new_object(None);
        self.root_push(Root::Object(obj));
        let func = self.heap.alloc_function(PrFunction::new_native(native));
        let o = self.heap.object_mut(obj);
        o.kind = ObjectKind::Function;
        o.internal = Internal::Function(func);
        self.root_pop(1);
        obj
    }

    /// Creates a script function closing over `env`. Parameter names are
    /// extracted from the parameter AST here; the slot map (parameters +
    /// `var` declarations) feeds fast slots and tier guards.
    pub fn new_script_function(
        &mut self,
        params: Vec<AstRef>,
        param_defaults: Vec<Option<AstRef>>,
        body: AstRef,
        env: EnvId,
    ) -> ObjectId {
        let param_names: Vec<Option<StringId>> = params.iter().map(|p| p.ident()).collect();

        let mut slot_names = Vec::new();
        if !self.conf.disable_specialization {
            for &name in param_names.iter().flatten() {
                slot_names_push(&self.heap, &mut slot_names, name);
            }
            collect_slot_names(&self.heap, &body, &mut slot_names);
            if slot_names.len() > SPEC_SLOT_MAX {
                slot_names.clear();
            }
        }

        let obj = self.heap.new_object(None);
        self.root_push(Root::Object(obj));
        let mut record = PrFunction {
            is_native: false,
            native: None,
            params,
            param_defaults,
            param_names,
            name: None,
            body: Some(body),
            env: Some(env),
            spec: SpecState::new(),
        };
        record.spec.slot_names = slot_names;
        let func = self.heap.alloc_function(record);
        let o = self.heap.object_mut(obj);
        o.kind = ObjectKind::Function;
        o.internal = Internal::Function(func);
        self.root_pop(1);
        obj
    }

    /// The function record behind a FUNCTION-kind object.
    pub fn function_of(&self, obj: ObjectId) -> Option<FunctionId> {
        match self.heap.object(obj).internal {
            Internal::Function(f) if self.heap.object(obj).kind == ObjectKind::Function => Some(f),
            _ => None,
        }
    }

    /// Attaches `prototype` (with a DONTENUM `constructor` back-link)
    /// and links the function object to the Function prototype.
    pub fn function_setup(&mut self, fn_obj: ObjectId, prototype_override: Option<ObjectId>) {
        self.heap.set_prototype(fn_obj, Some(self.function_proto));
        let proto_obj = match prototype_override {
            Some(p) => p,
            None => {
                let p = self.heap.new_object(Some(self.object_proto));
                self.root_push(Root::Object(p));
                let ctor_key = self.intern_str("constructor");
                self.heap.define(p, ctor_key, PrValue::Object(fn_obj), PropAttrs::DONTENUM);
                self.root_pop(1);
                p
            }
        };
        let proto_key = self.intern_str("prototype");
        self.heap.define(
            fn_obj,
            proto_key,
            PrValue::Object(proto_obj),
            PropAttrs::DONTENUM | PropAttrs::DONTDELETE,
        );
    }

    /// Builds the call environment for a script function: a fresh record
    /// whose parent is the closure environment, parameters bound
    /// (defaults are the evaluator's job when an argument is undefined),
    /// fast slots installed from the slot map, callee and the argument
    /// snapshot stored for lazy `arguments`.
    pub fn call_env_new(&mut self, callee: ObjectId, args: &[PrValue]) -> Option<EnvId> {
        let Some(func) = self.function_of(callee) else {
            self.throw_type_error("not a function");
            return None;
        };
        if self.heap.function(func).is_native {
            self.throw_type_error("native function has no scope");
            return None;
        }
        let parent = self.heap.function(func).env;
        let env = self.heap.new_env_object(parent);
        self.root_push(Root::Env(env));

        let slot_names = self.heap.function(func).spec.slot_names.clone();
        let param_names = self.heap.function(func).param_names.clone();
        {
            let e = self.heap.env_mut(env);
            e.callee = Some(callee);
            e.arguments_values = args.to_vec();
            e.install_fast_slots(slot_names);
            if param_names.iter().all(|n| n.is_some()) {
                e.param_names = param_names.iter().copied().flatten().collect();
            }
        }
        for (i, name) in param_names.iter().enumerate() {
            if let Some(name) = *name {
                let arg = args.get(i).copied().unwrap_or(PrValue::Undefined);
                self.heap.env_define(env, name, arg);
            }
        }
        self.root_pop(1);
        Some(env)
    }

    /// Invokes a native function, tracking the callee for the duration.
    pub fn call_native(&mut self, fn_obj: ObjectId, this: PrValue, args: &[PrValue]) -> PrValue {
        let Some(func) = self.function_of(fn_obj) else {
            self.throw_type_error("not a function");
            return PrValue::Undefined;
        };
        let Some(native) = self.heap.function(func).native else {
            self.throw_type_error("not a native function");
            return PrValue::Undefined;
        };
        let saved = self.current_callee;
        self.current_callee = Some(fn_obj);
        let result = native(self, this, args);
        self.current_callee = saved;
        result
    }

    /// Bumps the function's hot counters; tells the evaluator which tier
    /// (if any) just became eligible for lowering.
    pub fn function_note_call(&mut self, func: FunctionId) -> SpecHint {
        if self.conf.disable_specialization {
            return SpecHint::None;
        }
        let stmt_t = self.conf.spec_hot_threshold;
        let unboxed_t = self.conf.unboxed_hot_threshold;
        self.heap.function_mut(func).spec.note_call(stmt_t, unboxed_t)
    }

    /// Attempts the unboxed numeric tier for a call whose environment is
    /// already bound. Guards check that every guarded slot currently
    /// holds a number (fast slots are installed from the slot map, so
    /// guard indices address them directly). On success the written
    /// slots flow back through the environment and the result is
    /// returned; on guard failure the tier is skipped (and discarded
    /// after repeated misses).
    pub fn try_unboxed_call(&mut self, func: FunctionId, env: EnvId) -> Option<PrValue> {
        if self.conf.disable_specialization {
            return None;
        }
        if self.heap.function(func).spec.unboxed.state != TierState::Ready {
            return None;
        }
        let guards_ok = {
            let f = self.heap.function(func);
            let e = self.heap.env(env);
            f.spec
                .unboxed
                .guard_slots
                .iter()
                .all(|&s| matches!(e.fast_values.get(s as usize), Some(PrValue::Number(_))))
        };
        let miss_max = self.conf.spec_guard_miss_max;
        if !guards_ok {
            self.heap.function_mut(func).spec.unboxed.note_guard_miss(miss_max);
            return None;
        }

        let slot_count = self.heap.function(func).spec.slot_names.len();
        let mut frame = vec![f64::NAN; slot_count];
        for (i, v) in frame.iter_mut().enumerate() {
            if let Some(PrValue::Number(n)) = self.heap.env(env).fast_values.get(i) {
                *v = *n;
            }
        }
        let bc = self
            .heap
            .function(func)
            .spec
            .unboxed
            .bc
            .clone()
            .expect("ready tier has code");
        let outcome = bc.execute(&mut frame);
        if outcome == BcOutcome::Fault {
            self.heap.function_mut(func).spec.unboxed.note_guard_miss(miss_max);
            return None;
        }

        let write_bits = self.heap.function(func).spec.write_bits;
        for i in 0..slot_count.min(SPEC_SLOT_MAX) {
            if write_bits & (1u64 << i) != 0 {
                let name = self.heap.function(func).spec.slot_names[i];
                self.heap.env_define(env, name, PrValue::Number(frame[i]));
            }
        }
        match outcome {
            BcOutcome::Value(v) => Some(PrValue::Number(v)),
            BcOutcome::Done => Some(PrValue::Undefined),
            BcOutcome::Fault => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_bits_tracks_stores() {
        let bc = StmtBc::new(vec![
            FastNumOp::LoadConst(1.0),
            FastNumOp::StoreSlot(0),
            FastNumOp::LoadConst(2.0),
            FastNumOp::StoreSlot(3),
        ]);
        assert_eq!(bc.write_bits(), 0b1001);
    }

    #[test]
    fn executes_arithmetic() {
        // slot2 = (slot0 + slot1) * 2; result slot2
        let bc = StmtBc::new(vec![
            FastNumOp::LoadSlot(0),
            FastNumOp::LoadSlot(1),
            FastNumOp::Add,
            FastNumOp::LoadConst(2.0),
            FastNumOp::Mul,
            FastNumOp::StoreSlot(2),
            FastNumOp::LoadSlot(2),
        ]);
        let mut slots = [3.0, 4.0, 0.0];
        assert_eq!(bc.execute(&mut slots), BcOutcome::Value(14.0));
        assert_eq!(slots[2], 14.0);
    }

    #[test]
    fn clamp_with_floor() {
        let bc = StmtBc::new(vec![
            FastNumOp::LoadSlot(0),
            FastNumOp::Clamp { lo: 0.0, hi: 255.0, floor: true },
        ]);
        let mut slots = [300.9];
        assert_eq!(bc.execute(&mut slots), BcOutcome::Value(255.0));
        let mut slots = [42.7];
        assert_eq!(bc.execute(&mut slots), BcOutcome::Value(42.0));
    }

    #[test]
    fn underflow_is_a_fault() {
        let bc = StmtBc::new(vec![FastNumOp::Add]);
        assert_eq!(bc.execute(&mut []), BcOutcome::Fault);
    }

    #[test]
    fn statement_only_code_finishes_without_value() {
        let bc = StmtBc::new(vec![FastNumOp::LoadConst(1.0), FastNumOp::StoreSlot(0)]);
        let mut slots = [0.0];
        assert_eq!(bc.execute(&mut slots), BcOutcome::Done);
        assert_eq!(slots[0], 1.0);
    }

    #[test]
    fn guard_misses_discard_the_tier() {
        let mut tier = Tier::new();
        assert!(tier.install(StmtBc::new(vec![]), vec![0]));
        assert_eq!(tier.state, TierState::Ready);
        assert!(!tier.note_guard_miss(2));
        assert!(tier.note_guard_miss(2));
        assert_eq!(tier.state, TierState::Failed);
        assert!(tier.bc.is_none());
    }

    #[test]
    fn too_many_guards_refused() {
        let mut tier = Tier::new();
        assert!(!tier.install(StmtBc::new(vec![]), vec![0; SPEC_GUARD_MAX + 1]));
        assert_eq!(tier.state, TierState::Failed);
    }
}
