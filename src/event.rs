/// Event queue.
///
/// A fixed-capacity ring of values written by external sources (display,
/// timers) and drained by the embedder through `Event.next()` /
/// `Event.clear()`. Overflow drops the oldest entry. Live slots are GC
/// roots.

use crate::gc::Root;
use crate::object::PropAttrs;
use crate::value::PrValue;
use crate::vm::Vm;

pub struct EventRing {
    slots: Box<[PrValue]>,
    head: usize,
    tail: usize,
    count: usize,
}

impl EventRing {
    pub fn new(capacity: usize) -> EventRing {
        EventRing {
            slots: vec![PrValue::Undefined; capacity.max(1)].into_boxed_slice(),
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Appends, dropping the oldest entry when full.
    pub fn push(&mut self, value: PrValue) {
        let capacity = self.slots.len();
        if self.count == capacity {
            self.head = (self.head + 1) % capacity;
            self.count -= 1;
        }
        self.slots[self.tail] = value;
        self.tail = (self.tail + 1) % capacity;
        self.count += 1;
    }

    /// Pops the head, or `None` when empty.
    pub fn next(&mut self) -> Option<PrValue> {
        if self.count == 0 {
            return None;
        }
        let value = self.slots[self.head];
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        Some(value)
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
        self.count = 0;
    }

    /// The queued values, oldest first.
    pub fn live_values(&self) -> impl Iterator<Item = PrValue> + '_ {
        (0..self.count).map(|i| self.slots[(self.head + i) % self.slots.len()])
    }
}

// ---------------------------------------------------------------------------
// Natives
// ---------------------------------------------------------------------------

fn native_event_next(vm: &mut Vm, _this: PrValue, _args: &[PrValue]) -> PrValue {
    match vm.events.next() {
        Some(value) => value,
        None => PrValue::Null,
    }
}

fn native_event_clear(vm: &mut Vm, _this: PrValue, _args: &[PrValue]) -> PrValue {
    vm.events.clear();
    PrValue::Undefined
}

// ---------------------------------------------------------------------------
// VM surface
// ---------------------------------------------------------------------------

impl Vm {
    /// Queues a value. False only when the ring has zero capacity.
    pub fn event_push_value(&mut self, value: PrValue) -> bool {
        if self.events.capacity() == 0 {
            return false;
        }
        self.events.push(value);
        true
    }

    /// Queues a `{type}` record.
    pub fn event_push(&mut self, type_name: &str) -> bool {
        let obj = self.heap.new_object(Some(self.object_proto));
        self.root_push(Root::Object(obj));
        let type_key = self.intern_str("type");
        let type_val = self.intern_str(type_name);
        self.heap.define(obj, type_key, PrValue::String(type_val), PropAttrs::NONE);
        self.root_pop(1);
        self.event_push_value(PrValue::Object(obj))
    }

    pub fn event_len(&self) -> usize {
        self.events.len()
    }

    /// The oldest queued value, without consuming it.
    pub fn events_peek(&self) -> Option<PrValue> {
        self.events.live_values().next()
    }

    /// Defines the global `Event` object with `next`/`clear` natives.
    pub(crate) fn install_events(&mut self) {
        let event = self.heap.new_object(None);
        self.root_push(Root::Object(event));

        let next_fn = self.new_native_function(native_event_next);
        self.root_push(Root::Object(next_fn));
        self.function_setup(next_fn, None);
        let next_key = self.intern_str("next");
        self.heap.define(event, next_key, PrValue::Object(next_fn), PropAttrs::NONE);
        self.root_pop(1);

        let clear_fn = self.new_native_function(native_event_clear);
        self.root_push(Root::Object(clear_fn));
        self.function_setup(clear_fn, None);
        let clear_key = self.intern_str("clear");
        self.heap.define(event, clear_key, PrValue::Object(clear_fn), PropAttrs::NONE);
        self.root_pop(1);

        let event_key = self.intern_str("Event");
        self.heap.define(self.global, event_key, PrValue::Object(event), PropAttrs::NONE);
        self.root_pop(1);
    }
}
