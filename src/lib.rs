/// Prism Core Runtime
///
/// The runtime kernel of the Prism scripting language: a dynamic,
/// prototype-based object model with a tracing garbage collector.
/// Front ends (parser, evaluator, stdlib, host I/O) are external
/// collaborators built on these interfaces.
///
/// Module layout:
///   - value    — tagged value sum, coercions, equality, number format
///   - string   — immutable UTF-8 strings, glyph index, FNV-1a, interning
///   - object   — prototype objects, property storage, hash buckets
///   - env      — lexical scope chain, fast slots, lazy `arguments`
///   - function — native/script functions, specialization tiers
///   - gc       — typed arenas, mark/sweep, root stack, safe points
///   - ast      — read-only AST node types the collector marks through
///   - vm       — the VM handle: globals, prototypes, throw channel
///   - event    — fixed-capacity event ring + `Event` natives
///   - conf     — runtime tunables (PRISM_* environment overrides)
///   - profiler — perf counters
///   - errors   — host-level error types

pub mod ast;
pub mod conf;
pub mod env;
pub mod errors;
pub mod event;
pub mod function;
pub mod gc;
pub mod object;
pub mod profiler;
pub mod string;
pub mod value;
pub mod vm;

pub use conf::RtConf;
pub use errors::{ErrorKind, StringError};
pub use function::{BcOutcome, FastNumOp, NativeFn, SpecHint, StmtBc, TierState};
pub use gc::{EnvId, FunctionId, Heap, ObjectId, Root, StringId};
pub use object::{Internal, ObjectKind, PropAttrs, RegexpFlags};
pub use value::PrValue;
pub use vm::Vm;
