//! Qb runtime.
//!
//! Loads compiled modules, resolves multimethod calls over runtime
//! argument tags, and multiplexes lightweight language processes onto
//! a fixed pool of worker threads.

pub mod core;
pub mod dispatch;
pub mod errors;
pub mod io;
pub mod modules;
pub mod sched;
pub mod vm;

// Re-exports from core/
pub use core::value::{FuncRef, StructType, Tag, Value};

// Re-exports from modules/
pub use modules::registry::ModuleRegistry;
pub use modules::{FunctionDef, Module};

// Re-exports from dispatch/
pub use dispatch::VariantSet;

// Re-exports from vm/
pub use vm::{Outcome, Process, RuntimeShared};

// Re-exports from sched/
pub use sched::{Pid, Scheduler, DEFAULT_WORKERS};

// Re-exports from io/
pub use io::{IoGateway, ReadOutcome, SharedBuf, Wake};

pub use errors::{Fault, FaultKind};

/// Entry function name the runtime starts a program at.
pub const ENTRY_FUNCTION: &str = "__main";
