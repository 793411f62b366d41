/// Integration tests for the VM surface.
///
/// These tests verify:
///   • Error objects carry name/message and the kind's prototype
///   • The pending-throw channel sets, clears, and renders uncaught text
///   • ToObject wraps primitives and refuses undefined/null
///   • Equality semantics across primitives and wrappers
///   • The Event global drains the ring through its natives
///   • Regexp/date/buffer constructors and their payloads

use prism::{ErrorKind, ObjectKind, PrValue, PropAttrs, RegexpFlags, Vm};
use prism::value::{abstract_equals, strict_equals};

// ─── Errors ───────────────────────────────────────────────────────────────────

#[test]
fn thrown_errors_carry_kind_name_and_message() {
    let mut vm = Vm::new();
    assert!(!vm.has_pending_throw);
    let sentinel = vm.throw_type_error("bad operand");
    assert_eq!(sentinel, PrValue::Undefined);
    assert!(vm.has_pending_throw);

    let PrValue::Object(err) = vm.pending_throw else {
        panic!("error object expected");
    };
    assert_eq!(vm.heap.object(err).prototype, Some(vm.type_error_proto));
    assert_eq!(vm.format_uncaught(PrValue::Object(err)), "TypeError: bad operand");

    let cleared = vm.clear_pending_throw();
    assert_eq!(cleared, PrValue::Object(err));
    assert!(!vm.has_pending_throw);
    assert_eq!(vm.pending_throw, PrValue::Undefined);
}

#[test]
fn error_kinds_inherit_from_the_error_prototype() {
    let mut vm = Vm::new();
    let e = vm.make_error(ErrorKind::RangeError, "out of range");
    let PrValue::Object(err) = e else { panic!() };
    let proto = vm.heap.object(err).prototype.expect("kind prototype");
    assert_eq!(proto, vm.range_error_proto);
    assert_eq!(vm.heap.object(proto).prototype, Some(vm.error_proto));
}

#[test]
fn uncaught_formatting_falls_back_for_non_errors() {
    let mut vm = Vm::new();
    assert_eq!(vm.format_uncaught(PrValue::Number(3.0)), "3");
    let s = vm.intern_str("plain throw");
    assert_eq!(vm.format_uncaught(PrValue::String(s)), "plain throw");
}

#[test]
fn throw_value_accepts_arbitrary_values() {
    let mut vm = Vm::new();
    vm.throw_value(PrValue::Number(7.0));
    assert!(vm.has_pending_throw);
    assert_eq!(vm.clear_pending_throw(), PrValue::Number(7.0));
}

// ─── Coercions and wrappers ───────────────────────────────────────────────────

#[test]
fn to_object_refuses_undefined_and_null() {
    let mut vm = Vm::new();
    assert_eq!(vm.to_object(PrValue::Undefined), None);
    assert!(vm.has_pending_throw);
    vm.clear_pending_throw();

    assert_eq!(vm.to_object(PrValue::Null), None);
    assert!(vm.has_pending_throw);
    vm.clear_pending_throw();
}

#[test]
fn to_object_boxes_primitives_with_kind_and_prototype() {
    let mut vm = Vm::new();
    let wrapped = vm.to_object(PrValue::Number(6.5)).expect("wrapper");
    assert_eq!(vm.heap.object(wrapped).kind, ObjectKind::Number);
    assert_eq!(vm.heap.object(wrapped).prototype, Some(vm.number_proto));
    assert_eq!(vm.to_number(PrValue::Object(wrapped)), 6.5);

    let b = vm.to_object(PrValue::Boolean(true)).expect("wrapper");
    assert_eq!(vm.heap.object(b).kind, ObjectKind::Boolean);
    let s = vm.intern_str("text");
    let w = vm.to_object(PrValue::String(s)).expect("wrapper");
    assert_eq!(vm.heap.object(w).kind, ObjectKind::String);
}

#[test]
fn to_string_renders_each_tag() {
    let mut vm = Vm::new();
    let cases: Vec<(PrValue, &str)> = vec![
        (PrValue::Undefined, "undefined"),
        (PrValue::Null, "null"),
        (PrValue::Boolean(true), "true"),
        (PrValue::Number(42.0), "42"),
        (PrValue::Number(f64::NAN), "NaN"),
    ];
    for (value, expected) in cases {
        let id = vm.to_string_id(value);
        assert_eq!(vm.heap.string(id).as_str(), expected);
    }
    let plain = vm.heap.new_object(Some(vm.object_proto));
    let id = vm.to_string_id(PrValue::Object(plain));
    assert_eq!(vm.heap.string(id).as_str(), "[object Object]");
}

#[test]
fn equality_follows_the_classical_rules() {
    let mut vm = Vm::new();
    let five = vm.intern_str("5");
    let heap = &vm.heap;

    assert!(!strict_equals(heap, PrValue::Number(f64::NAN), PrValue::Number(f64::NAN)));
    assert!(strict_equals(heap, PrValue::Number(-0.0), PrValue::Number(0.0)));
    assert!(abstract_equals(heap, PrValue::Undefined, PrValue::Null));
    assert!(!strict_equals(heap, PrValue::Undefined, PrValue::Null));
    assert!(abstract_equals(heap, PrValue::String(five), PrValue::Number(5.0)));
    assert!(!strict_equals(heap, PrValue::String(five), PrValue::Number(5.0)));
    assert!(abstract_equals(heap, PrValue::Boolean(true), PrValue::Number(1.0)));

    let a = vm.heap.new_object(None);
    let b = vm.heap.new_object(None);
    assert!(strict_equals(&vm.heap, PrValue::Object(a), PrValue::Object(a)));
    assert!(!abstract_equals(&vm.heap, PrValue::Object(a), PrValue::Object(b)));

    let wrapped = vm.wrap_primitive(PrValue::Number(5.0)).expect("wrapper");
    assert!(abstract_equals(&vm.heap, PrValue::Object(wrapped), PrValue::Number(5.0)));
}

// ─── Events ───────────────────────────────────────────────────────────────────

#[test]
fn event_global_drains_the_ring() {
    let mut vm = Vm::new();
    assert!(vm.event_push("tick"));
    assert!(vm.event_push("tock"));
    assert_eq!(vm.event_len(), 2);

    let event_key = vm.intern_str("Event");
    let next_key = vm.intern_str("next");
    let clear_key = vm.intern_str("clear");
    let type_key = vm.intern_str("type");
    let PrValue::Object(event) = vm.heap.get(vm.global, event_key).expect("Event global") else {
        panic!("Event should be an object");
    };
    let PrValue::Object(next_fn) = vm.heap.get(event, next_key).expect("next") else {
        panic!("next should be a function");
    };
    let PrValue::Object(clear_fn) = vm.heap.get(event, clear_key).expect("clear") else {
        panic!("clear should be a function");
    };

    let first = vm.call_native(next_fn, PrValue::Object(event), &[]);
    let PrValue::Object(first) = first else { panic!("event record expected") };
    let type_val = vm.heap.get_own(first, type_key).expect("type");
    let id = vm.to_string_id(type_val);
    assert_eq!(vm.heap.string(id).as_str(), "tick");

    vm.call_native(clear_fn, PrValue::Object(event), &[]);
    assert_eq!(vm.event_len(), 0);
    assert_eq!(vm.call_native(next_fn, PrValue::Object(event), &[]), PrValue::Null);
}

#[test]
fn event_ring_drops_oldest_on_overflow() {
    let mut conf = prism::RtConf::default();
    conf.event_capacity = 2;
    let mut vm = Vm::with_conf(conf);
    for name in ["a", "b", "c"] {
        vm.event_push(name);
    }
    assert_eq!(vm.event_len(), 2);
}

// ─── Non-plain kinds ──────────────────────────────────────────────────────────

#[test]
fn regexp_compiles_and_keeps_its_source_alive() {
    let mut vm = Vm::new();
    let source = vm.heap.new_string_str("a really quite long regexp source [a-z]+[0-9]{2,} pattern");
    let re = vm
        .new_regexp(source, RegexpFlags { ignore_case: true, ..Default::default() })
        .expect("valid source");
    assert_eq!(vm.heap.object(re).kind, ObjectKind::Regexp);

    let k = vm.intern_str("re");
    vm.heap.define(vm.global, k, PrValue::Object(re), PropAttrs::NONE);
    vm.collect();
    assert!(vm.heap.string_live(source), "regexp source is traced");
}

#[test]
fn invalid_regexp_source_throws_syntax_error() {
    let mut vm = Vm::new();
    let source = vm.intern_str("(unclosed");
    assert_eq!(vm.new_regexp(source, RegexpFlags::default()), None);
    assert!(vm.has_pending_throw);
    let rendered = {
        let pending = vm.pending_throw;
        vm.format_uncaught(pending)
    };
    assert!(rendered.starts_with("SyntaxError:"), "{rendered}");
}

#[test]
fn date_wrapper_boxes_milliseconds() {
    let mut vm = Vm::new();
    let date = vm.new_date(1_234_567.0);
    assert_eq!(vm.heap.object(date).kind, ObjectKind::Date);
    assert_eq!(vm.heap.object(date).prototype, Some(vm.date_proto));
    assert_eq!(vm.to_number(PrValue::Object(date)), 1_234_567.0);
    assert!(Vm::date_now_millis() > 1_600_000_000_000.0);
}

#[test]
fn buffer_and_image_kinds_carry_opaque_payloads() {
    let mut vm = Vm::new();
    let buf = vm.new_buffer(vec![1, 2, 3]);
    assert_eq!(vm.heap.object(buf).kind, ObjectKind::Buffer);

    let img = vm.new_image(4, 2);
    assert_eq!(vm.heap.object(img).kind, ObjectKind::Image);
    match &vm.heap.object(img).internal {
        prism::Internal::Image(image) => {
            assert_eq!(image.pixels.len(), 4 * 2 * 4);
        }
        other => panic!("image payload expected, got {other:?}"),
    }
}

#[test]
fn perf_report_renders() {
    let mut vm = Vm::new();
    vm.heap.new_object(None);
    vm.collect();
    let report = vm.perf().to_string();
    assert!(report.contains("Runtime Statistics"));
    assert!(report.contains("collections"));
}
