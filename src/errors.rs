/// Prism error types.
///
/// Two channels that never mix:
///   - Host-level failures (bad UTF-8, bad regexp source) are ordinary
///     Rust errors defined here.
///   - Language-level errors travel through the VM's pending-throw slot
///     as error *objects*; `ErrorKind` names their prototypes.

use thiserror::Error;

/// Failures while constructing a runtime string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StringError {
    #[error("ill-formed UTF-8 at byte {0}")]
    InvalidUtf8(usize),
}

/// The language-level error kinds. Each has a prototype cached on the VM;
/// an error object carries `name` and `message` properties and travels
/// through the pending-throw slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
    ReferenceError,
    SyntaxError,
    EvalError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Error => "Error",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::RangeError => "RangeError",
            ErrorKind::ReferenceError => "ReferenceError",
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::EvalError => "EvalError",
        }
    }
}
