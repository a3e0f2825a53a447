//! Fault taxonomy and common message constants.

use std::fmt;

pub mod messages {
    pub const DIVISION_BY_ZERO: &str = "division by zero";
    pub const INTEGER_OVERFLOW: &str = "integer overflow";
    pub const NOT_A_BOOL: &str = "not a bool";
    pub const NOT_AN_INT: &str = "not an int";
    pub const NOT_A_STRING: &str = "not a string";
    pub const NOT_A_LIST: &str = "not a list";
    pub const NOT_A_STRUCT: &str = "not a struct";
    pub const NOT_A_FUNCTION: &str = "not a function";
    pub const NOT_A_MAYBE: &str = "not a maybe";
    pub const ABSENT_VALUE: &str = "maybe value is absent";
    pub const INDEX_OUT_OF_BOUNDS: &str = "index out of bounds";
    pub const NO_SUCH_FIELD: &str = "no such field";
    pub const INPUT_CLOSED: &str = "input stream is closed";
}

/// Every runtime-detected error condition. Faults unwind a process's
/// call stack until a frame handler intercepts them or the process
/// terminates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    ModuleNotFound,
    ModuleFormatError,
    UnresolvedImport,
    NoMatchingVariant,
    AmbiguousDispatch,
    TypeMismatch,
    ArithmeticFault,
    IoClosed,
    /// Raised by the program itself with the fail instruction.
    UserFail,
}

impl FaultKind {
    pub fn name(self) -> &'static str {
        match self {
            FaultKind::ModuleNotFound => "ModuleNotFound",
            FaultKind::ModuleFormatError => "ModuleFormatError",
            FaultKind::UnresolvedImport => "UnresolvedImport",
            FaultKind::NoMatchingVariant => "NoMatchingVariant",
            FaultKind::AmbiguousDispatch => "AmbiguousDispatch",
            FaultKind::TypeMismatch => "TypeMismatch",
            FaultKind::ArithmeticFault => "ArithmeticFault",
            FaultKind::IoClosed => "IOClosed",
            FaultKind::UserFail => "UserFail",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Fault { kind, message: message.into() }
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Fault::new(FaultKind::TypeMismatch, message)
    }

    pub fn arithmetic(message: impl Into<String>) -> Self {
        Fault::new(FaultKind::ArithmeticFault, message)
    }

    pub fn io_closed(message: impl Into<String>) -> Self {
        Fault::new(FaultKind::IoClosed, message)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Fault {}
