/// Prototype-based objects.
///
/// Property storage is a slot slab threaded by two chains: the insertion
/// list (stable enumeration order) and, once an object grows past
/// `BUCKET_LAZY_MIN` properties, power-of-two hash buckets chained
/// through `hash_next`. Lookup order: one-slot cache → buckets → linear
/// scan of the insertion list; hits repopulate the cache. Slab indices
/// are stable across deletes, so the cache and both chains survive
/// unrelated mutations.

use crate::gc::{Arena, FunctionId, Heap, ObjectId, StringId, TraceRef};
use crate::profiler::PerfCounters;
use crate::string::PrString;
use crate::value::PrValue;

/// Buckets appear once an object holds more than this many properties.
const BUCKET_LAZY_MIN: usize = 8;
/// First bucket table size.
const BUCKET_INITIAL: usize = 64;
/// Buckets double when prop_count exceeds LOAD × bucket_count.
const BUCKET_LOAD: usize = 2;

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Property attribute flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PropAttrs(u8);

impl PropAttrs {
    pub const NONE: PropAttrs = PropAttrs(0);
    /// Skipped by enumeration.
    pub const DONTENUM: PropAttrs = PropAttrs(1);
    /// Value cannot be replaced.
    pub const READONLY: PropAttrs = PropAttrs(2);
    /// Cannot be removed.
    pub const DONTDELETE: PropAttrs = PropAttrs(4);

    #[inline]
    pub fn contains(self, other: PropAttrs) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for PropAttrs {
    type Output = PropAttrs;
    fn bitor(self, rhs: PropAttrs) -> PropAttrs {
        PropAttrs(self.0 | rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Kinds and internal payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Plain,
    Function,
    Boolean,
    Number,
    String,
    Date,
    Regexp,
    Buffer,
    Image,
}

/// Regexp flag set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegexpFlags {
    pub global: bool,
    pub ignore_case: bool,
    pub multiline: bool,
}

#[derive(Debug)]
pub struct PrRegexp {
    pub source: StringId,
    pub flags: RegexpFlags,
    pub compiled: regex::Regex,
}

#[derive(Debug)]
pub struct PrImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major.
    pub pixels: Vec<u8>,
}

/// Kind-determined internal payload. Dropping the object drops the
/// payload — this is the kind-specific finalizer.
#[derive(Debug, Default)]
pub enum Internal {
    #[default]
    None,
    Function(FunctionId),
    /// BOOLEAN / NUMBER / STRING / DATE wrappers.
    Boxed(PrValue),
    Regexp(PrRegexp),
    Buffer(Vec<u8>),
    Image(PrImage),
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Property {
    pub name: StringId,
    pub value: PrValue,
    pub attrs: PropAttrs,
    /// Next in insertion order.
    next: Option<u32>,
    /// Next in the bucket chain.
    hash_next: Option<u32>,
}

pub struct PrObject {
    pub prototype: Option<ObjectId>,
    slab: Vec<Option<Property>>,
    free: Vec<u32>,
    head: Option<u32>,
    tail: Option<u32>,
    buckets: Option<Box<[Option<u32>]>>,
    prop_count: usize,
    /// One-slot lookup cache: last (name, slot) pair found.
    cache: Option<(StringId, u32)>,
    pub kind: ObjectKind,
    pub internal: Internal,
}

impl PrObject {
    pub fn new(prototype: Option<ObjectId>) -> PrObject {
        PrObject {
            prototype,
            slab: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            buckets: None,
            prop_count: 0,
            cache: None,
            kind: ObjectKind::Plain,
            internal: Internal::None,
        }
    }

    pub fn prop_count(&self) -> usize {
        self.prop_count
    }

    pub fn has_buckets(&self) -> bool {
        self.buckets.is_some()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.as_ref().map_or(0, |b| b.len())
    }

    fn prop(&self, idx: u32) -> &Property {
        self.slab[idx as usize].as_ref().expect("property chain holds live slots")
    }

    fn prop_mut(&mut self, idx: u32) -> &mut Property {
        self.slab[idx as usize].as_mut().expect("property chain holds live slots")
    }

    /// Properties in insertion order.
    pub fn properties(&self) -> PropIter<'_> {
        PropIter { obj: self, cur: self.head }
    }

    fn insert_slot(&mut self, prop: Property) -> u32 {
        match self.free.pop() {
            Some(idx) => {
                self.slab[idx as usize] = Some(prop);
                idx
            }
            None => {
                let idx = self.slab.len() as u32;
                self.slab.push(Some(prop));
                idx
            }
        }
    }

    fn link_tail(&mut self, idx: u32) {
        match self.tail {
            Some(tail) => self.prop_mut(tail).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn bucket_insert(&mut self, idx: u32, strings: &Arena<PrString>) {
        let Some(buckets) = &mut self.buckets else {
            return;
        };
        let name = self.slab[idx as usize]
            .as_ref()
            .expect("property chain holds live slots")
            .name;
        let hash = strings.get(name.0, "string").hash();
        let bucket = hash as usize & (buckets.len() - 1);
        let old_head = buckets[bucket];
        buckets[bucket] = Some(idx);
        self.prop_mut(idx).hash_next = old_head;
    }

    /// (Re)builds the bucket table, reseating every `hash_next`.
    fn rehash(&mut self, new_count: usize, strings: &Arena<PrString>) {
        let mut buckets: Box<[Option<u32>]> = vec![None; new_count].into_boxed_slice();
        let mut cur = self.head;
        while let Some(idx) = cur {
            let (name, next) = {
                let p = self.prop(idx);
                (p.name, p.next)
            };
            let hash = strings.get(name.0, "string").hash();
            let bucket = hash as usize & (new_count - 1);
            self.prop_mut(idx).hash_next = buckets[bucket];
            buckets[bucket] = Some(idx);
            cur = next;
        }
        self.buckets = Some(buckets);
    }

    fn bucket_remove(&mut self, idx: u32, strings: &Arena<PrString>) {
        let Some(buckets) = &self.buckets else {
            return;
        };
        let name = self.prop(idx).name;
        let hash = strings.get(name.0, "string").hash();
        let bucket = hash as usize & (buckets.len() - 1);
        let mut cur = self.buckets.as_ref().and_then(|b| b[bucket]);
        let mut prev: Option<u32> = None;
        while let Some(i) = cur {
            let hash_next = self.prop(i).hash_next;
            if i == idx {
                match prev {
                    Some(p) => self.prop_mut(p).hash_next = hash_next,
                    None => {
                        if let Some(buckets) = &mut self.buckets {
                            buckets[bucket] = hash_next;
                        }
                    }
                }
                return;
            }
            prev = Some(i);
            cur = hash_next;
        }
    }

    pub(crate) fn trace(&self, out: &mut Vec<TraceRef>) {
        if let Some(p) = self.prototype {
            out.push(TraceRef::Object(p));
        }
        for prop in self.properties() {
            out.push(TraceRef::String(prop.name));
            out.push(TraceRef::Value(prop.value));
        }
        match &self.internal {
            Internal::None | Internal::Buffer(_) | Internal::Image(_) => {}
            Internal::Function(f) => out.push(TraceRef::Function(*f)),
            Internal::Boxed(v) => out.push(TraceRef::Value(*v)),
            Internal::Regexp(re) => out.push(TraceRef::String(re.source)),
        }
    }
}

pub struct PropIter<'a> {
    obj: &'a PrObject,
    cur: Option<u32>,
}

impl<'a> Iterator for PropIter<'a> {
    type Item = &'a Property;

    fn next(&mut self) -> Option<&'a Property> {
        let idx = self.cur?;
        let prop = self.obj.prop(idx);
        self.cur = prop.next;
        Some(prop)
    }
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

fn str_eq(strings: &Arena<PrString>, a: StringId, b: StringId) -> bool {
    if a == b {
        return true;
    }
    let sa = strings.get(a.0, "string");
    let sb = strings.get(b.0, "string");
    sa.hash() == sb.hash() && sa.as_bytes() == sb.as_bytes()
}

/// One-slot cache → buckets → insertion-list scan. A hit repopulates the
/// cache.
fn find_prop(
    obj: &mut PrObject,
    name: StringId,
    strings: &Arena<PrString>,
    perf: &mut PerfCounters,
) -> Option<u32> {
    if let Some((cached_name, idx)) = obj.cache {
        if str_eq(strings, cached_name, name) {
            perf.lookup_cache_hits += 1;
            debug_assert!(obj.slab[idx as usize].is_some());
            return Some(idx);
        }
    }
    perf.lookup_cache_misses += 1;

    if let Some(buckets) = &obj.buckets {
        let hash = strings.get(name.0, "string").hash();
        let bucket = hash as usize & (buckets.len() - 1);
        let mut cur = buckets[bucket];
        while let Some(idx) = cur {
            let (pname, hash_next) = {
                let p = obj.prop(idx);
                (p.name, p.hash_next)
            };
            if str_eq(strings, pname, name) {
                obj.cache = Some((pname, idx));
                return Some(idx);
            }
            cur = hash_next;
        }
        return None;
    }

    let mut cur = obj.head;
    while let Some(idx) = cur {
        let (pname, next) = {
            let p = obj.prop(idx);
            (p.name, p.next)
        };
        if str_eq(strings, pname, name) {
            obj.cache = Some((pname, idx));
            return Some(idx);
        }
        cur = next;
    }
    None
}

// ---------------------------------------------------------------------------
// Heap-level object operations
// ---------------------------------------------------------------------------

impl Heap {
    pub fn new_object(&mut self, prototype: Option<ObjectId>) -> ObjectId {
        self.alloc_object(PrObject::new(prototype))
    }

    /// Own-property read. `None` means absent (a present property may
    /// hold `undefined`).
    pub fn get_own(&mut self, obj: ObjectId, name: StringId) -> Option<PrValue> {
        let Heap { objects, strings, perf, .. } = self;
        let o = objects.get_mut(obj.0, "object");
        find_prop(o, name, strings, perf).map(|idx| o.prop(idx).value)
    }

    pub fn has_own(&mut self, obj: ObjectId, name: StringId) -> bool {
        self.get_own(obj, name).is_some()
    }

    /// Prototype-chain read: the nearest own property wins.
    pub fn get(&mut self, obj: ObjectId, name: StringId) -> Option<PrValue> {
        #[cfg(debug_assertions)]
        let mut visited: Vec<ObjectId> = Vec::new();
        let mut cur = Some(obj);
        while let Some(o) = cur {
            #[cfg(debug_assertions)]
            {
                debug_assert!(!visited.contains(&o), "prototype chain cycle");
                visited.push(o);
            }
            if let Some(v) = self.get_own(o, name) {
                return Some(v);
            }
            cur = self.object(o).prototype;
        }
        None
    }

    pub fn has(&mut self, obj: ObjectId, name: StringId) -> bool {
        self.get(obj, name).is_some()
    }

    /// Creates or replaces a property. Redefinition keeps the insertion
    /// slot and fails (false) on READONLY without mutating anything.
    pub fn define(&mut self, obj: ObjectId, name: StringId, value: PrValue, attrs: PropAttrs) -> bool {
        let Heap { objects, strings, perf, .. } = self;
        let o = objects.get_mut(obj.0, "object");

        if let Some(idx) = find_prop(o, name, strings, perf) {
            let p = o.prop_mut(idx);
            if p.attrs.contains(PropAttrs::READONLY) {
                return false;
            }
            p.value = value;
            p.attrs = attrs;
            let pname = p.name;
            o.cache = Some((pname, idx));
            return true;
        }

        let idx = o.insert_slot(Property { name, value, attrs, next: None, hash_next: None });
        o.link_tail(idx);
        o.prop_count += 1;

        if o.buckets.is_none() {
            if o.prop_count > BUCKET_LAZY_MIN {
                o.rehash(BUCKET_INITIAL, strings);
            }
        } else {
            o.bucket_insert(idx, strings);
            if o.prop_count > o.bucket_count() * BUCKET_LOAD {
                let doubled = o.bucket_count() * 2;
                o.rehash(doubled, strings);
            }
        }
        o.cache = Some((name, idx));
        true
    }

    /// Updates an existing property honoring READONLY; absent names fall
    /// back to `define(…, NONE)`.
    pub fn put(&mut self, obj: ObjectId, name: StringId, value: PrValue) -> bool {
        {
            let Heap { objects, strings, perf, .. } = self;
            let o = objects.get_mut(obj.0, "object");
            if let Some(idx) = find_prop(o, name, strings, perf) {
                let p = o.prop_mut(idx);
                if p.attrs.contains(PropAttrs::READONLY) {
                    return false;
                }
                p.value = value;
                let pname = p.name;
                o.cache = Some((pname, idx));
                return true;
            }
        }
        self.define(obj, name, value, PropAttrs::NONE)
    }

    /// Removes a property. Returns (ok, deleted): DONTDELETE refuses with
    /// (false, false); a missing name succeeds with (true, false).
    pub fn delete(&mut self, obj: ObjectId, name: StringId) -> (bool, bool) {
        let Heap { objects, strings, .. } = self;
        let o = objects.get_mut(obj.0, "object");

        let mut prev: Option<u32> = None;
        let mut cur = o.head;
        while let Some(idx) = cur {
            let (pname, next) = {
                let p = o.prop(idx);
                (p.name, p.next)
            };
            if str_eq(strings, pname, name) {
                if o.prop(idx).attrs.contains(PropAttrs::DONTDELETE) {
                    return (false, false);
                }
                match prev {
                    Some(p) => o.prop_mut(p).next = next,
                    None => o.head = next,
                }
                if o.tail == Some(idx) {
                    o.tail = prev;
                }
                o.bucket_remove(idx, strings);
                if let Some((_, cached_idx)) = o.cache {
                    if cached_idx == idx {
                        o.cache = None;
                    }
                }
                o.slab[idx as usize] = None;
                o.free.push(idx);
                o.prop_count -= 1;
                return (true, true);
            }
            prev = Some(idx);
            cur = next;
        }
        (true, false)
    }

    /// Visits non-DONTENUM properties in insertion order. A nonzero
    /// callback verdict aborts the walk and is returned.
    pub fn enum_own(
        &self,
        obj: ObjectId,
        mut cb: impl FnMut(StringId, PrValue, PropAttrs) -> i32,
    ) -> i32 {
        for prop in self.object(obj).properties() {
            if prop.attrs.contains(PropAttrs::DONTENUM) {
                continue;
            }
            let rc = cb(prop.name, prop.value, prop.attrs);
            if rc != 0 {
                return rc;
            }
        }
        0
    }

    /// Reassigns the prototype, rejecting chains that would cycle.
    pub fn set_prototype(&mut self, obj: ObjectId, proto: Option<ObjectId>) -> bool {
        let mut cur = proto;
        while let Some(p) = cur {
            if p == obj {
                return false;
            }
            cur = self.object(p).prototype;
        }
        self.object_mut(obj).prototype = proto;
        true
    }
}
