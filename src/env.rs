/// Lexical scope chain.
///
/// An environment pairs a parent link with a record object used as the
/// variable store. Function-call scopes may carry fast slots — a
/// name/value array consulted before the record — plus the captured
/// argument values, a callee back-link, and a lazily materialized
/// `arguments` object. Fast-slot invariant: a name with a fast slot is
/// authoritative in *both* the slot and the record; every write path
/// updates both.

use crate::gc::{EnvId, Heap, ObjectId, Root, StringId, TraceRef};
use crate::object::PropAttrs;
use crate::value::PrValue;
use crate::vm::Vm;

pub struct PrEnv {
    pub parent: Option<EnvId>,
    pub record: Option<ObjectId>,
    pub owns_record: bool,
    pub arguments_obj: Option<ObjectId>,
    pub callee: Option<ObjectId>,
    /// Argument snapshot captured at call time.
    pub arguments_values: Vec<PrValue>,
    pub fast_names: Vec<StringId>,
    pub fast_values: Vec<PrValue>,
    pub param_names: Vec<StringId>,
}

impl PrEnv {
    pub fn new(parent: Option<EnvId>, record: Option<ObjectId>, owns_record: bool) -> PrEnv {
        PrEnv {
            parent,
            record,
            owns_record,
            arguments_obj: None,
            callee: None,
            arguments_values: Vec::new(),
            fast_names: Vec::new(),
            fast_values: Vec::new(),
            param_names: Vec::new(),
        }
    }

    /// Reserves fast slots for `names`, all initially undefined.
    pub fn install_fast_slots(&mut self, names: Vec<StringId>) {
        self.fast_values = vec![PrValue::Undefined; names.len()];
        self.fast_names = names;
    }

    pub(crate) fn trace(&self, out: &mut Vec<TraceRef>) {
        if let Some(p) = self.parent {
            out.push(TraceRef::Env(p));
        }
        if let Some(r) = self.record {
            out.push(TraceRef::Object(r));
        }
        if let Some(a) = self.arguments_obj {
            out.push(TraceRef::Object(a));
        }
        if let Some(c) = self.callee {
            out.push(TraceRef::Object(c));
        }
        for &name in self.param_names.iter().chain(&self.fast_names) {
            out.push(TraceRef::String(name));
        }
        for &v in self.arguments_values.iter().chain(&self.fast_values) {
            out.push(TraceRef::Value(v));
        }
    }
}

// ---------------------------------------------------------------------------
// Heap-level environment operations
// ---------------------------------------------------------------------------

impl Heap {
    pub fn new_env(&mut self, parent: Option<EnvId>, record: Option<ObjectId>, owns_record: bool) -> EnvId {
        self.alloc_env(PrEnv::new(parent, record, owns_record))
    }

    /// A scope with a fresh record object.
    pub fn new_env_object(&mut self, parent: Option<EnvId>) -> EnvId {
        let record = self.new_object(None);
        self.new_env(parent, Some(record), true)
    }

    /// The terminal parent — the global environment.
    pub fn env_root(&self, env: EnvId) -> EnvId {
        let mut cur = env;
        while let Some(parent) = self.env(cur).parent {
            cur = parent;
        }
        cur
    }

    pub(crate) fn env_fast_find(&self, env: EnvId, name: StringId) -> Option<usize> {
        let e = self.env(env);
        (0..e.fast_names.len()).find(|&i| self.strings_equal(e.fast_names[i], name))
    }

    /// Local binding: fast slot (when reserved) plus write-through to the
    /// record.
    pub fn env_define(&mut self, env: EnvId, name: StringId, value: PrValue) -> bool {
        let fast_found = match self.env_fast_find(env, name) {
            Some(i) => {
                self.env_mut(env).fast_values[i] = value;
                true
            }
            None => false,
        };
        match self.env(env).record {
            Some(record) => self.define(record, name, value, PropAttrs::NONE),
            None => fast_found,
        }
    }
}

// ---------------------------------------------------------------------------
// VM-level operations (need prototypes, interning, conf)
// ---------------------------------------------------------------------------

impl Vm {
    /// Assignment: walks the chain checking fast slots then own
    /// properties, writing through on a hit. Unresolved names create a
    /// property on the global record (implicit-global semantics).
    pub fn env_set(&mut self, env: EnvId, name: StringId, value: PrValue) -> bool {
        let mut cur = Some(env);
        while let Some(e) = cur {
            if let Some(i) = self.heap.env_fast_find(e, name) {
                self.heap.env_mut(e).fast_values[i] = value;
                if let Some(record) = self.heap.env(e).record {
                    let _ = self.heap.put(record, name, value);
                }
                if self.conf.arguments_aliasing {
                    self.mirror_argument_write(e, name, value);
                }
                return true;
            }
            if let Some(record) = self.heap.env(e).record {
                if self.heap.get_own(record, name).is_some() {
                    let ok = self.heap.put(record, name, value);
                    if ok && self.conf.arguments_aliasing {
                        self.mirror_argument_write(e, name, value);
                    }
                    return ok;
                }
            }
            cur = self.heap.env(e).parent;
        }
        let root = self.heap.env_root(env);
        match self.heap.env(root).record {
            Some(record) => self.heap.put(record, name, value),
            None => false,
        }
    }

    /// Variable read: fast slot → own property → parent, with lazy
    /// `arguments` materialization in callee-bearing scopes.
    pub fn env_get(&mut self, env: EnvId, name: StringId) -> Option<PrValue> {
        let mut cur = Some(env);
        while let Some(e) = cur {
            if let Some(i) = self.heap.env_fast_find(e, name) {
                return Some(self.heap.env(e).fast_values[i]);
            }
            if let Some(record) = self.heap.env(e).record {
                if let Some(v) = self.heap.get_own(record, name) {
                    return Some(v);
                }
            }
            if self.heap.env(e).callee.is_some() && self.heap.string(name).as_str() == "arguments" {
                let args = self.materialize_arguments(e);
                return Some(PrValue::Object(args));
            }
            cur = self.heap.env(e).parent;
        }
        None
    }

    /// Builds the per-call `arguments` object on first reference: numeric
    /// properties 0..n-1, READONLY+DONTENUM+DONTDELETE `length` and
    /// `callee`. With aliasing on, parameter slots reflect current record
    /// values; otherwise the captured snapshot is used.
    fn materialize_arguments(&mut self, env: EnvId) -> ObjectId {
        if let Some(existing) = self.heap.env(env).arguments_obj {
            return existing;
        }
        let args_obj = self.heap.new_object(Some(self.object_proto));
        // Pin across the interning allocations below.
        self.root_push(Root::Object(args_obj));

        let count = self.heap.env(env).arguments_values.len();
        for i in 0..count {
            let mut val = self.heap.env(env).arguments_values[i];
            if self.conf.arguments_aliasing {
                if let Some(&pname) = self.heap.env(env).param_names.get(i) {
                    if let Some(record) = self.heap.env(env).record {
                        if let Some(current) = self.heap.get_own(record, pname) {
                            val = current;
                        }
                    }
                }
            }
            let key = self.intern_str(&i.to_string());
            self.heap.define(args_obj, key, val, PropAttrs::NONE);
        }

        let locked = PropAttrs::DONTENUM | PropAttrs::READONLY | PropAttrs::DONTDELETE;
        let len_key = self.intern_str("length");
        self.heap.define(args_obj, len_key, PrValue::Number(count as f64), locked);
        if let Some(callee) = self.heap.env(env).callee {
            let callee_key = self.intern_str("callee");
            self.heap.define(args_obj, callee_key, PrValue::Object(callee), locked);
        }
        if let Some(record) = self.heap.env(env).record {
            let args_key = self.intern_str("arguments");
            self.heap.define(
                record,
                args_key,
                PrValue::Object(args_obj),
                PropAttrs::DONTENUM | PropAttrs::DONTDELETE,
            );
        }
        self.heap.env_mut(env).arguments_obj = Some(args_obj);
        self.root_pop(1);
        args_obj
    }

    /// Aliased write-back: assignment through `arguments[i]` updates the
    /// named parameter in the record and its fast slot. Inert when
    /// aliasing is off.
    pub fn update_arguments(
        &mut self,
        env: EnvId,
        args_obj: ObjectId,
        prop: StringId,
        value: PrValue,
    ) -> bool {
        if !self.conf.arguments_aliasing {
            return false;
        }
        let mut cur = Some(env);
        while let Some(e) = cur {
            if self.heap.env(e).arguments_obj != Some(args_obj)
                || self.heap.env(e).param_names.is_empty()
            {
                cur = self.heap.env(e).parent;
                continue;
            }
            let Some(index) = self.heap.string(prop).numeric_index() else {
                return false;
            };
            let index = index as usize;
            if index >= self.heap.env(e).param_names.len() {
                return false;
            }
            let name = self.heap.env(e).param_names[index];
            if let Some(record) = self.heap.env(e).record {
                let _ = self.heap.put(record, name, value);
            }
            if let Some(i) = self.heap.env_fast_find(e, name) {
                self.heap.env_mut(e).fast_values[i] = value;
            }
            return true;
        }
        false
    }

    fn mirror_argument_write(&mut self, env: EnvId, name: StringId, value: PrValue) {
        let Some(args_obj) = self.heap.env(env).arguments_obj else {
            return;
        };
        let count = self.heap.env(env).param_names.len();
        for j in 0..count {
            let pname = self.heap.env(env).param_names[j];
            if self.heap.strings_equal(pname, name) {
                let key = self.intern_str(&j.to_string());
                let _ = self.heap.put(args_obj, key, value);
                return;
            }
        }
    }
}
