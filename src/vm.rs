/// The virtual machine.
///
/// One `Vm` is one execution world: it owns the heap, the global object,
/// the current scope, the built-in prototypes, the intern cache, the
/// event ring, and the pending-throw channel. There is no process-global
/// state — embedders thread the handle through every call, and may run
/// several VMs side by side.
///
/// Error protocol: operations that throw set `has_pending_throw` +
/// `pending_throw` and return `undefined` (or `None`); callers test the
/// flag and unwind. A successful catch handler clears it.

use std::rc::Rc;

use crate::ast::AstNode;
use crate::conf::RtConf;
use crate::errors::ErrorKind;
use crate::event::EventRing;
use crate::gc::{EnvId, Heap, ObjectId, Root, StringId};
use crate::object::{Internal, ObjectKind, PrImage, PrRegexp, PropAttrs, RegexpFlags};
use crate::profiler::PerfCounters;
use crate::string::{fnv1a, InternTable, INTERN_MAX_LEN};
use crate::value::{self, format_number, PrValue};

pub struct Vm {
    pub heap: Heap,

    /// The global object; also the record of the root environment.
    pub global: ObjectId,
    /// Current environment; the evaluator swaps this across calls.
    pub env: EnvId,

    // Built-in prototypes, cached for the stdlib and the GC root set.
    pub object_proto: ObjectId,
    pub function_proto: ObjectId,
    pub boolean_proto: ObjectId,
    pub number_proto: ObjectId,
    pub string_proto: ObjectId,
    pub array_proto: ObjectId,
    pub date_proto: ObjectId,
    pub regexp_proto: ObjectId,
    pub math_obj: ObjectId,
    pub error_proto: ObjectId,
    pub type_error_proto: ObjectId,
    pub range_error_proto: ObjectId,
    pub reference_error_proto: ObjectId,
    pub syntax_error_proto: ObjectId,
    pub eval_error_proto: ObjectId,

    pub has_pending_throw: bool,
    pub pending_throw: PrValue,
    pub current_callee: Option<ObjectId>,
    pub is_constructing: bool,

    /// Program AST; marked so literals inside it survive collection.
    pub root_ast: Option<Rc<AstNode>>,
    /// Node under evaluation, marked when no root AST is set.
    pub current_ast: Option<Rc<AstNode>>,

    pub(crate) events: EventRing,
    pub(crate) intern: InternTable,
    pub conf: RtConf,
}

impl Vm {
    pub fn new() -> Vm {
        Vm::with_conf(RtConf::default())
    }

    pub fn with_conf(mut conf: RtConf) -> Vm {
        conf.normalize();
        let mut heap = Heap::new(conf.gc_min_threshold, conf.gc_growth_factor);

        let object_proto = heap.new_object(None);
        let function_proto = heap.new_object(Some(object_proto));
        let boolean_proto = heap.new_object(Some(object_proto));
        let number_proto = heap.new_object(Some(object_proto));
        let string_proto = heap.new_object(Some(object_proto));
        let array_proto = heap.new_object(Some(object_proto));
        let date_proto = heap.new_object(Some(object_proto));
        let regexp_proto = heap.new_object(Some(object_proto));
        let math_obj = heap.new_object(Some(object_proto));
        let error_proto = heap.new_object(Some(object_proto));
        let type_error_proto = heap.new_object(Some(error_proto));
        let range_error_proto = heap.new_object(Some(error_proto));
        let reference_error_proto = heap.new_object(Some(error_proto));
        let syntax_error_proto = heap.new_object(Some(error_proto));
        let eval_error_proto = heap.new_object(Some(error_proto));

        let global = heap.new_object(Some(object_proto));
        let env = heap.new_env(None, Some(global), false);

        let mut vm = Vm {
            heap,
            global,
            env,
            object_proto,
            function_proto,
            boolean_proto,
            number_proto,
            string_proto,
            array_proto,
            date_proto,
            regexp_proto,
            math_obj,
            error_proto,
            type_error_proto,
            range_error_proto,
            reference_error_proto,
            syntax_error_proto,
            eval_error_proto,
            has_pending_throw: false,
            pending_throw: PrValue::Undefined,
            current_callee: None,
            is_constructing: false,
            root_ast: None,
            current_ast: None,
            events: EventRing::new(conf.event_capacity),
            intern: InternTable::new(conf.intern_cache_size),
            conf,
        };
        vm.init_builtins();
        vm
    }

    fn init_builtins(&mut self) {
        let kinds = [
            (self.error_proto, ErrorKind::Error),
            (self.type_error_proto, ErrorKind::TypeError),
            (self.range_error_proto, ErrorKind::RangeError),
            (self.reference_error_proto, ErrorKind::ReferenceError),
            (self.syntax_error_proto, ErrorKind::SyntaxError),
            (self.eval_error_proto, ErrorKind::EvalError),
        ];
        for (proto, kind) in kinds {
            let name_key = self.intern_str("name");
            let name_val = self.intern_str(kind.name());
            self.heap.define(proto, name_key, PrValue::String(name_val), PropAttrs::DONTENUM);
            let msg_key = self.intern_str("message");
            let empty = self.intern_str("");
            self.heap.define(proto, msg_key, PrValue::String(empty), PropAttrs::DONTENUM);
        }
        self.install_events();
    }

    pub fn perf(&self) -> &PerfCounters {
        &self.heap.perf
    }

    // ── Interning ───────────────────────────────────────────────────────────

    /// A string for `text`, interned when short enough. The cache is
    /// weak: identical short literals share one string while it lives.
    pub fn intern_str(&mut self, text: &str) -> StringId {
        if text.len() > INTERN_MAX_LEN {
            return self.heap.new_string_str(text);
        }
        let hash = fnv1a(text.as_bytes());
        let slot = self.intern.slot_for(hash);
        if let Some(id) = self.intern.get(slot) {
            let s = self.heap.string(id);
            if s.hash() == hash && s.as_bytes() == text.as_bytes() {
                self.heap.perf.string_intern_hits += 1;
                return id;
            }
        }
        self.heap.perf.string_intern_misses += 1;
        let id = self.heap.new_string_str(text);
        self.intern.set(slot, id);
        id
    }

    // ── Coercions that allocate ─────────────────────────────────────────────

    pub fn to_boolean(&self, v: PrValue) -> bool {
        value::to_boolean(&self.heap, v)
    }

    pub fn to_number(&self, v: PrValue) -> f64 {
        value::to_number(&self.heap, v)
    }

    /// ToString. Wrapper objects unwrap; a plain object renders as
    /// "[object Object]" at this level (toString dispatch is the
    /// evaluator's).
    pub fn to_string_id(&mut self, v: PrValue) -> StringId {
        match v {
            PrValue::Undefined => self.intern_str("undefined"),
            PrValue::Null => self.intern_str("null"),
            PrValue::Boolean(b) => self.intern_str(if b { "true" } else { "false" }),
            PrValue::Number(n) => {
                let text = format_number(n);
                self.intern_str(&text)
            }
            PrValue::String(s) => s,
            PrValue::Object(o) => match value::unwrap_boxed(&self.heap, o) {
                Some(inner) => self.to_string_id(inner),
                None => match self.heap.object(o).kind {
                    ObjectKind::Function => self.intern_str("function"),
                    _ => self.intern_str("[object Object]"),
                },
            },
        }
    }

    /// ToObject. `undefined`/`null` set a pending TypeError.
    pub fn to_object(&mut self, v: PrValue) -> Option<ObjectId> {
        match v {
            PrValue::Object(o) => Some(o),
            PrValue::Undefined | PrValue::Null => {
                self.throw_type_error("cannot convert undefined or null to object");
                None
            }
            _ => self.wrap_primitive(v),
        }
    }

    /// Boxes a boolean, number, or string in a wrapper object.
    pub fn wrap_primitive(&mut self, v: PrValue) -> Option<ObjectId> {
        let (kind, proto) = match v {
            PrValue::Boolean(_) => (ObjectKind::Boolean, self.boolean_proto),
            PrValue::Number(_) => (ObjectKind::Number, self.number_proto),
            PrValue::String(_) => (ObjectKind::String, self.string_proto),
            _ => return None,
        };
        let obj = self.heap.new_object(Some(proto));
        let o = self.heap.object_mut(obj);
        o.kind = kind;
        o.internal = Internal::Boxed(v);
        Some(obj)
    }

    // ── Non-plain constructors ──────────────────────────────────────────────

    /// A DATE-kind wrapper boxing milliseconds since the epoch.
    pub fn new_date(&mut self, millis: f64) -> ObjectId {
        let obj = self.heap.new_object(Some(self.date_proto));
        let o = self.heap.object_mut(obj);
        o.kind = ObjectKind::Date;
        o.internal = Internal::Boxed(PrValue::Number(millis));
        obj
    }

    /// Wall-clock milliseconds for `new Date()` / `Date.now`.
    pub fn date_now_millis() -> f64 {
        chrono::Utc::now().timestamp_millis() as f64
    }

    /// Compiles a REGEXP-kind object. Invalid source sets a pending
    /// SyntaxError and yields nothing.
    pub fn new_regexp(&mut self, source: StringId, flags: RegexpFlags) -> Option<ObjectId> {
        let compiled = regex::RegexBuilder::new(self.heap.string(source).as_str())
            .case_insensitive(flags.ignore_case)
            .multi_line(flags.multiline)
            .build();
        let compiled = match compiled {
            Ok(re) => re,
            Err(err) => {
                let message = format!("invalid regular expression: {err}");
                self.throw(ErrorKind::SyntaxError, &message);
                return None;
            }
        };
        let obj = self.heap.new_object(Some(self.regexp_proto));
        let o = self.heap.object_mut(obj);
        o.kind = ObjectKind::Regexp;
        o.internal = Internal::Regexp(PrRegexp { source, flags, compiled });
        Some(obj)
    }

    /// A BUFFER-kind object owning raw bytes.
    pub fn new_buffer(&mut self, data: Vec<u8>) -> ObjectId {
        let obj = self.heap.new_object(Some(self.object_proto));
        let o = self.heap.object_mut(obj);
        o.kind = ObjectKind::Buffer;
        o.internal = Internal::Buffer(data);
        obj
    }

    /// An IMAGE-kind object with zeroed RGBA pixels. The image subsystem
    /// itself lives outside the core.
    pub fn new_image(&mut self, width: u32, height: u32) -> ObjectId {
        let obj = self.heap.new_object(Some(self.object_proto));
        let o = self.heap.object_mut(obj);
        o.kind = ObjectKind::Image;
        o.internal = Internal::Image(PrImage {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        });
        obj
    }

    // ── Errors ──────────────────────────────────────────────────────────────

    /// An error object: prototype by kind, `name` and `message` set.
    pub fn make_error(&mut self, kind: ErrorKind, message: &str) -> PrValue {
        let proto = self.error_proto_for(kind);
        let obj = self.heap.new_object(Some(proto));
        self.root_push(Root::Object(obj));
        let name_key = self.intern_str("name");
        let name_val = self.intern_str(kind.name());
        self.heap.define(obj, name_key, PrValue::String(name_val), PropAttrs::NONE);
        let msg_key = self.intern_str("message");
        let msg_val = self.heap.new_string_str(message);
        self.heap.define(obj, msg_key, PrValue::String(msg_val), PropAttrs::NONE);
        self.root_pop(1);
        PrValue::Object(obj)
    }

    pub fn error_proto_for(&self, kind: ErrorKind) -> ObjectId {
        match kind {
            ErrorKind::Error => self.error_proto,
            ErrorKind::TypeError => self.type_error_proto,
            ErrorKind::RangeError => self.range_error_proto,
            ErrorKind::ReferenceError => self.reference_error_proto,
            ErrorKind::SyntaxError => self.syntax_error_proto,
            ErrorKind::EvalError => self.eval_error_proto,
        }
    }

    /// Builds an error of `kind` and installs it as the pending throw.
    /// Returns the sentinel the failing operation should yield.
    pub fn throw(&mut self, kind: ErrorKind, message: &str) -> PrValue {
        let error = self.make_error(kind, message);
        self.throw_value(error);
        PrValue::Undefined
    }

    /// Installs an arbitrary thrown value (the `throw` statement).
    pub fn throw_value(&mut self, value: PrValue) {
        self.pending_throw = value;
        self.has_pending_throw = true;
        tracing::trace!(kind = ?value, "pending throw set");
    }

    pub fn throw_type_error(&mut self, message: &str) -> PrValue {
        self.throw(ErrorKind::TypeError, message)
    }

    pub fn throw_range_error(&mut self, message: &str) -> PrValue {
        self.throw(ErrorKind::RangeError, message)
    }

    pub fn throw_reference_error(&mut self, message: &str) -> PrValue {
        self.throw(ErrorKind::ReferenceError, message)
    }

    /// Takes the pending throw; the catch handler calls this.
    pub fn clear_pending_throw(&mut self) -> PrValue {
        self.has_pending_throw = false;
        std::mem::replace(&mut self.pending_throw, PrValue::Undefined)
    }

    /// "name: message" for the embedder's uncaught-error report.
    pub fn format_uncaught(&mut self, v: PrValue) -> String {
        if let PrValue::Object(o) = v {
            let name_key = self.intern_str("name");
            let msg_key = self.intern_str("message");
            if let Some(name) = self.heap.get(o, name_key) {
                let message = self.heap.get(o, msg_key).unwrap_or(PrValue::Undefined);
                let name_id = self.to_string_id(name);
                let msg_id = self.to_string_id(message);
                let name_text = self.heap.string(name_id).as_str().to_string();
                let msg_text = self.heap.string(msg_id).as_str();
                return if msg_text.is_empty() {
                    name_text
                } else {
                    format!("{}: {}", name_text, msg_text)
                };
            }
        }
        let id = self.to_string_id(v);
        self.heap.string(id).as_str().to_string()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}
