/// Tracing mark-and-sweep collector.
///
/// ARCHITECTURE:
///   Typed arenas             — one slot arena per managed type
///     • `ObjectId` / `StringId` / `EnvId` / `FunctionId` are indices
///     • a slot carries {marked, size}; a freed slot is vacant, so a
///       stale handle is detected instead of silently followed
///   Mark phase               — recursive, precise
///     • roots: global object, current scope, built-in prototypes,
///       current callee, pending throw, root AST, event queue, and the
///       explicit root stack
///     • AST nodes are Rc-owned outside the heap; they are traversed
///       only to reach GC leaves (identifier strings, literal values)
///   Sweep phase              — drop unmarked slots, clear survivors
///     • `Drop` is the kind-specific finalizer
///     • threshold = max(min_threshold, live_bytes × growth_factor)
///     • dead intern-cache entries are purged
///
/// Allocation never collects synchronously; crossing the threshold only
/// sets `should_collect`, honored at the next safe point.

use std::rc::Rc;
use std::time::Instant;

use crate::ast::{AstNode, AstRef, SwitchCase};
use crate::env::PrEnv;
use crate::function::PrFunction;
use crate::object::PrObject;
use crate::profiler::PerfCounters;
use crate::string::PrString;
use crate::value::PrValue;
use crate::vm::Vm;

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

macro_rules! handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) u32);
    };
}

handle!(
    /// Handle to a heap-managed object.
    ObjectId
);
handle!(
    /// Handle to a heap-managed string.
    StringId
);
handle!(
    /// Handle to a heap-managed environment.
    EnvId
);
handle!(
    /// Handle to a heap-managed function record.
    FunctionId
);

/// A typed entry on the explicit root stack.
#[derive(Debug, Clone, Copy)]
pub enum Root {
    Value(PrValue),
    Object(ObjectId),
    String(StringId),
    Env(EnvId),
    Function(FunctionId),
}

/// An edge followed during the mark phase.
pub(crate) enum TraceRef {
    Value(PrValue),
    Object(ObjectId),
    String(StringId),
    Env(EnvId),
    Function(FunctionId),
    Ast(AstRef),
}

// ---------------------------------------------------------------------------
// Slot arenas
// ---------------------------------------------------------------------------

struct GcSlot<T> {
    marked: bool,
    size: usize,
    value: T,
}

pub(crate) struct Arena<T> {
    slots: Vec<Option<GcSlot<T>>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    fn new() -> Arena<T> {
        Arena { slots: Vec::new(), free: Vec::new() }
    }

    fn alloc(&mut self, value: T, size: usize) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                debug_assert!(self.slots[idx as usize].is_none());
                self.slots[idx as usize] = Some(GcSlot { marked: false, size, value });
                idx
            }
            None => {
                let idx = self.slots.len() as u32;
                self.slots.push(Some(GcSlot { marked: false, size, value }));
                idx
            }
        }
    }

    #[inline]
    pub(crate) fn get(&self, idx: u32, kind: &str) -> &T {
        match &self.slots[idx as usize] {
            Some(slot) => &slot.value,
            None => panic!("stale {kind} handle {idx}"),
        }
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, idx: u32, kind: &str) -> &mut T {
        match &mut self.slots[idx as usize] {
            Some(slot) => &mut slot.value,
            None => panic!("stale {kind} handle {idx}"),
        }
    }

    #[inline]
    pub(crate) fn is_live(&self, idx: u32) -> bool {
        (idx as usize) < self.slots.len() && self.slots[idx as usize].is_some()
    }

    /// Marks the slot; true when it was unmarked.
    fn mark(&mut self, idx: u32) -> bool {
        match &mut self.slots[idx as usize] {
            Some(slot) if !slot.marked => {
                slot.marked = true;
                true
            }
            _ => false,
        }
    }

    /// Drops unmarked slots, clears survivors. Returns (freed, live bytes).
    fn sweep(&mut self, heap_bytes: &mut usize) -> (u32, usize) {
        let mut freed = 0u32;
        let mut live_bytes = 0usize;
        for (idx, entry) in self.slots.iter_mut().enumerate() {
            match entry {
                Some(slot) if slot.marked => {
                    slot.marked = false;
                    live_bytes += slot.size;
                }
                Some(slot) => {
                    *heap_bytes -= slot.size;
                    *entry = None;
                    self.free.push(idx as u32);
                    freed += 1;
                }
                None => {}
            }
        }
        (freed, live_bytes)
    }

    fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn for_each_live_mut(&mut self, mut f: impl FnMut(&mut T)) {
        for entry in self.slots.iter_mut().flatten() {
            f(&mut entry.value);
        }
    }
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

pub struct Heap {
    pub(crate) objects: Arena<PrObject>,
    pub(crate) strings: Arena<PrString>,
    pub(crate) envs: Arena<PrEnv>,
    pub(crate) functions: Arena<PrFunction>,

    /// Σ size over live slots.
    pub heap_bytes: usize,
    pub live_bytes_last: usize,
    pub bytes_since_gc: usize,
    pub threshold: usize,
    pub(crate) min_threshold: usize,
    pub(crate) growth_factor: f64,
    pub collections: u32,
    pub freed_last: u32,
    pub(crate) should_collect: bool,
    pub(crate) in_collect: bool,
    pub(crate) roots: Vec<Root>,

    pub perf: PerfCounters,
}

impl Heap {
    pub(crate) fn new(min_threshold: usize, growth_factor: f64) -> Heap {
        Heap {
            objects: Arena::new(),
            strings: Arena::new(),
            envs: Arena::new(),
            functions: Arena::new(),
            heap_bytes: 0,
            live_bytes_last: 0,
            bytes_since_gc: 0,
            threshold: min_threshold,
            min_threshold,
            growth_factor,
            collections: 0,
            freed_last: 0,
            should_collect: false,
            in_collect: false,
            roots: Vec::new(),
            perf: PerfCounters::default(),
        }
    }

    fn note_alloc(&mut self, size: usize) {
        self.heap_bytes += size;
        self.bytes_since_gc += size;
        self.perf.alloc_count += 1;
        self.perf.alloc_bytes += size as u64;
        if self.bytes_since_gc >= self.threshold {
            self.should_collect = true;
        }
    }

    pub(crate) fn alloc_object(&mut self, obj: PrObject) -> ObjectId {
        let size = std::mem::size_of::<PrObject>();
        self.note_alloc(size);
        self.perf.object_new += 1;
        ObjectId(self.objects.alloc(obj, size))
    }

    pub(crate) fn alloc_string(&mut self, s: PrString) -> StringId {
        let size = s.footprint();
        self.note_alloc(size);
        self.perf.string_new += 1;
        StringId(self.strings.alloc(s, size))
    }

    pub(crate) fn alloc_env(&mut self, env: PrEnv) -> EnvId {
        let size = std::mem::size_of::<PrEnv>();
        self.note_alloc(size);
        self.perf.env_new += 1;
        EnvId(self.envs.alloc(env, size))
    }

    pub(crate) fn alloc_function(&mut self, f: PrFunction) -> FunctionId {
        let size = std::mem::size_of::<PrFunction>();
        self.note_alloc(size);
        self.perf.function_new += 1;
        FunctionId(self.functions.alloc(f, size))
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    #[inline]
    pub fn object(&self, id: ObjectId) -> &PrObject {
        self.objects.get(id.0, "object")
    }

    #[inline]
    pub fn object_mut(&mut self, id: ObjectId) -> &mut PrObject {
        self.objects.get_mut(id.0, "object")
    }

    #[inline]
    pub fn string(&self, id: StringId) -> &PrString {
        self.strings.get(id.0, "string")
    }

    #[inline]
    pub fn env(&self, id: EnvId) -> &PrEnv {
        self.envs.get(id.0, "env")
    }

    #[inline]
    pub fn env_mut(&mut self, id: EnvId) -> &mut PrEnv {
        self.envs.get_mut(id.0, "env")
    }

    #[inline]
    pub fn function(&self, id: FunctionId) -> &PrFunction {
        self.functions.get(id.0, "function")
    }

    #[inline]
    pub fn function_mut(&mut self, id: FunctionId) -> &mut PrFunction {
        self.functions.get_mut(id.0, "function")
    }

    pub fn object_live(&self, id: ObjectId) -> bool {
        self.objects.is_live(id.0)
    }

    pub fn string_live(&self, id: StringId) -> bool {
        self.strings.is_live(id.0)
    }

    pub fn env_live(&self, id: EnvId) -> bool {
        self.envs.is_live(id.0)
    }

    pub fn function_live(&self, id: FunctionId) -> bool {
        self.functions.is_live(id.0)
    }

    pub fn live_allocations(&self) -> usize {
        self.objects.live_count()
            + self.strings.live_count()
            + self.envs.live_count()
            + self.functions.live_count()
    }

    // ── Root stack ──────────────────────────────────────────────────────────

    /// Pins a reference for the duration of surrounding allocating calls.
    pub fn root_push(&mut self, root: Root) {
        self.roots.push(root);
    }

    /// Pops `count` pinned references; popping more than pushed is a
    /// caller bug, tolerated by clamping to empty.
    pub fn root_pop(&mut self, count: usize) {
        let len = self.roots.len();
        self.roots.truncate(len.saturating_sub(count));
    }

    pub fn root_depth(&self) -> usize {
        self.roots.len()
    }

    // ── Mark phase ──────────────────────────────────────────────────────────

    pub(crate) fn mark_ref(&mut self, r: TraceRef) {
        match r {
            TraceRef::Value(v) => self.mark_value(v),
            TraceRef::Object(o) => self.mark_object(o),
            TraceRef::String(s) => self.mark_string(s),
            TraceRef::Env(e) => self.mark_env(e),
            TraceRef::Function(f) => self.mark_function(f),
            TraceRef::Ast(node) => self.mark_ast(&node),
        }
    }

    pub(crate) fn mark_root(&mut self, root: Root) {
        match root {
            Root::Value(v) => self.mark_value(v),
            Root::Object(o) => self.mark_object(o),
            Root::String(s) => self.mark_string(s),
            Root::Env(e) => self.mark_env(e),
            Root::Function(f) => self.mark_function(f),
        }
    }

    pub(crate) fn mark_value(&mut self, v: PrValue) {
        match v {
            PrValue::String(s) => self.mark_string(s),
            PrValue::Object(o) => self.mark_object(o),
            _ => {}
        }
    }

    pub(crate) fn mark_string(&mut self, id: StringId) {
        self.strings.mark(id.0);
    }

    pub(crate) fn mark_object(&mut self, id: ObjectId) {
        if !self.objects.mark(id.0) {
            return;
        }
        let mut children = Vec::new();
        self.objects.get(id.0, "object").trace(&mut children);
        for child in children {
            self.mark_ref(child);
        }
    }

    pub(crate) fn mark_env(&mut self, id: EnvId) {
        if !self.envs.mark(id.0) {
            return;
        }
        let mut children = Vec::new();
        self.envs.get(id.0, "env").trace(&mut children);
        for child in children {
            self.mark_ref(child);
        }
    }

    pub(crate) fn mark_function(&mut self, id: FunctionId) {
        if !self.functions.mark(id.0) {
            return;
        }
        let mut children = Vec::new();
        self.functions.get(id.0, "function").trace(&mut children);
        for child in children {
            self.mark_ref(child);
        }
    }

    /// Walks an AST to mark the GC leaves embedded in it: identifier
    /// strings and literal values. Nodes themselves are not managed.
    pub(crate) fn mark_ast(&mut self, node: &AstNode) {
        match node {
            AstNode::Program(items) | AstNode::Block(items) => {
                for item in items {
                    self.mark_ast(item);
                }
            }
            AstNode::VarDecl { id, init } => {
                self.mark_ast(id);
                if let Some(init) = init {
                    self.mark_ast(init);
                }
            }
            AstNode::ExprStmt(e) => self.mark_ast(e),
            AstNode::Return(e) => {
                if let Some(e) = e {
                    self.mark_ast(e);
                }
            }
            AstNode::If { cond, then_branch, else_branch } => {
                self.mark_ast(cond);
                self.mark_ast(then_branch);
                if let Some(e) = else_branch {
                    self.mark_ast(e);
                }
            }
            AstNode::While { cond, body } => {
                self.mark_ast(cond);
                self.mark_ast(body);
            }
            AstNode::DoWhile { body, cond } => {
                self.mark_ast(body);
                self.mark_ast(cond);
            }
            AstNode::For { init, test, update, body } => {
                for part in [init, test, update].into_iter().flatten() {
                    self.mark_ast(part);
                }
                self.mark_ast(body);
            }
            AstNode::ForIn { target, object, body, .. } => {
                self.mark_ast(target);
                self.mark_ast(object);
                self.mark_ast(body);
            }
            AstNode::Switch { expr, cases } => {
                self.mark_ast(expr);
                for SwitchCase { test, body } in cases {
                    if let Some(test) = test {
                        self.mark_ast(test);
                    }
                    for stmt in body {
                        self.mark_ast(stmt);
                    }
                }
            }
            AstNode::Label { label, stmt } => {
                self.mark_string(*label);
                self.mark_ast(stmt);
            }
            AstNode::Break { label } | AstNode::Continue { label } => {
                if let Some(label) = label {
                    self.mark_string(*label);
                }
            }
            AstNode::Throw(e) => self.mark_ast(e),
            AstNode::Try { try_block, catch_param, catch_block, finally_block } => {
                self.mark_ast(try_block);
                for part in [catch_param, catch_block, finally_block].into_iter().flatten() {
                    self.mark_ast(part);
                }
            }
            AstNode::FunctionExpr { name, params, param_defaults, body } => {
                if let Some(name) = name {
                    self.mark_string(*name);
                }
                for p in params {
                    self.mark_ast(p);
                }
                for d in param_defaults.iter().flatten() {
                    self.mark_ast(d);
                }
                self.mark_ast(body);
            }
            AstNode::Identifier(s) => self.mark_string(*s),
            AstNode::Literal(v) => self.mark_value(*v),
            AstNode::Assign { target, value } => {
                self.mark_ast(target);
                self.mark_ast(value);
            }
            AstNode::Binary { left, right, .. } => {
                self.mark_ast(left);
                self.mark_ast(right);
            }
            AstNode::Unary { expr, .. } | AstNode::Update { expr, .. } => self.mark_ast(expr),
            AstNode::Conditional { cond, then_expr, else_expr } => {
                self.mark_ast(cond);
                self.mark_ast(then_expr);
                self.mark_ast(else_expr);
            }
            AstNode::Call { callee, args } | AstNode::New { callee, args } => {
                self.mark_ast(callee);
                for a in args {
                    self.mark_ast(a);
                }
            }
            AstNode::Member { object, property, .. } => {
                self.mark_ast(object);
                self.mark_ast(property);
            }
            AstNode::ArrayLiteral(items) => {
                for item in items.iter().flatten() {
                    self.mark_ast(item);
                }
            }
            AstNode::ObjectLiteral(props) => {
                for (key, value) in props {
                    self.mark_string(*key);
                    self.mark_ast(value);
                }
            }
        }
    }

    // ── Sweep phase ─────────────────────────────────────────────────────────

    fn sweep(&mut self) -> (u32, usize) {
        let mut freed = 0u32;
        let mut live_bytes = 0usize;
        let (f, l) = self.objects.sweep(&mut self.heap_bytes);
        freed += f;
        live_bytes += l;
        let (f, l) = self.strings.sweep(&mut self.heap_bytes);
        freed += f;
        live_bytes += l;
        let (f, l) = self.envs.sweep(&mut self.heap_bytes);
        freed += f;
        live_bytes += l;
        let (f, l) = self.functions.sweep(&mut self.heap_bytes);
        freed += f;
        live_bytes += l;
        (freed, live_bytes)
    }

    /// Drops every function's lowered tier code. Always safe: tiers are
    /// caches, recomputable from the AST.
    pub fn discard_specializations(&mut self) {
        self.functions.for_each_live_mut(|f| f.spec.discard_lowered());
    }
}

// ---------------------------------------------------------------------------
// VM-level collection protocol
// ---------------------------------------------------------------------------

impl Vm {
    /// Cooperative safe point: the evaluator calls this at loop
    /// back-edges and call boundaries. Collects only when flagged.
    pub fn safe_point(&mut self) {
        if (self.heap.should_collect || self.conf.gc_stress) && !self.heap.in_collect {
            self.collect();
        }
    }

    /// Runs a full mark-and-sweep. Reentry is a no-op; collection
    /// cannot fail.
    pub fn collect(&mut self) {
        if self.heap.in_collect {
            return;
        }
        self.heap.in_collect = true;
        let start = Instant::now();

        self.mark_vm_roots();

        let (freed, live_bytes) = self.heap.sweep();
        if self.conf.spec_discard_on_gc {
            self.heap.discard_specializations();
        }

        self.heap.live_bytes_last = live_bytes;
        self.heap.freed_last = freed;
        self.heap.collections += 1;
        self.heap.bytes_since_gc = 0;
        let grown = (live_bytes as f64 * self.heap.growth_factor) as usize;
        self.heap.threshold = grown.max(self.heap.min_threshold);
        self.heap.should_collect = false;
        self.heap.in_collect = false;

        // Weak intern entries: drop the ones whose string died.
        let strings = &self.heap.strings;
        self.intern.purge(|id| strings.is_live(id.0));

        let pause = start.elapsed().as_micros() as u64;
        self.heap.perf.collections += 1;
        self.heap.perf.objects_freed += freed as u64;
        self.heap.perf.gc_pause_us_last = pause;
        self.heap.perf.gc_pause_us_total += pause;
        tracing::debug!(
            collections = self.heap.collections,
            freed,
            live_bytes,
            threshold = self.heap.threshold,
            pause_us = pause,
            "gc cycle"
        );
    }

    fn mark_vm_roots(&mut self) {
        let heap = &mut self.heap;
        heap.mark_object(self.global);
        heap.mark_env(self.env);
        for proto in [
            self.object_proto,
            self.function_proto,
            self.boolean_proto,
            self.number_proto,
            self.string_proto,
            self.array_proto,
            self.date_proto,
            self.regexp_proto,
            self.math_obj,
            self.error_proto,
            self.type_error_proto,
            self.range_error_proto,
            self.reference_error_proto,
            self.syntax_error_proto,
            self.eval_error_proto,
        ] {
            heap.mark_object(proto);
        }
        if let Some(callee) = self.current_callee {
            heap.mark_object(callee);
        }
        if self.has_pending_throw {
            heap.mark_value(self.pending_throw);
        }
        let ast: Option<Rc<AstNode>> = self.root_ast.clone().or_else(|| self.current_ast.clone());
        if let Some(node) = ast {
            heap.mark_ast(&node);
        }
        for value in self.events.live_values() {
            heap.mark_value(value);
        }
        let roots = std::mem::take(&mut heap.roots);
        for root in &roots {
            heap.mark_root(*root);
        }
        heap.roots = roots;
    }

    pub fn root_push(&mut self, root: Root) {
        self.heap.root_push(root);
    }

    pub fn root_pop(&mut self, count: usize) {
        self.heap.root_pop(count);
    }
}
