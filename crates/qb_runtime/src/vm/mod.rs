//! The interpreter and the process it runs.
//!
//! A `Process` is a frame stack plus bookkeeping; the interpreter in
//! [`interp`] executes it one time slice at a time and reports an
//! [`Outcome`]. Suspension and resumption belong to the scheduler, not
//! to the loop.

pub mod frame;
pub mod interp;

use std::sync::Arc;

use qb_bytecode::Reg;

use crate::core::value::Value;
use crate::errors::Fault;
use crate::io::IoGateway;
use crate::modules::registry::ModuleRegistry;
use crate::modules::FunctionDef;
use crate::sched::Pid;
use frame::Frame;

/// Everything the interpreter needs besides the process itself.
pub struct RuntimeShared {
    pub registry: Arc<ModuleRegistry>,
    pub io: Arc<IoGateway>,
}

/// Why a time slice ended.
#[derive(Debug)]
pub enum Outcome {
    /// The root frame returned; the value is the process result.
    Return(Value),
    /// An unhandled fault terminated the process.
    Fault(Fault),
    /// Instruction budget exhausted; requeue.
    Yield,
    /// Waiting for input; the gateway wakes the process later.
    Block,
    /// Duplicate the process. The scheduler writes the child pid into
    /// the parent's `dst` and zero into the child's.
    Fork { dst: Reg },
    /// Start a fresh process on an already-resolved variant; `dst`
    /// receives the new pid.
    Spawn { dst: Reg, func: Arc<FunctionDef>, args: Vec<Value> },
    /// Park until the named child terminates; `dst` receives its
    /// status.
    WaitChild { dst: Reg, pid: Pid },
}

/// A lightweight language process: a private frame stack multiplexed
/// onto the worker pool. Nothing in here is shared; values cross
/// process boundaries only by `Arc` clone.
pub struct Process {
    pub id: Pid,
    pub parent: Option<Pid>,
    pub frames: Vec<Frame>,
    /// Read result delivered while the process was parked.
    /// `Some(None)` means the input stream closed.
    pub pending_input: Option<Option<String>>,
}

impl Process {
    /// A fresh process with a single frame, no inherited call history.
    pub fn spawn(
        id: Pid,
        parent: Option<Pid>,
        func: Arc<FunctionDef>,
        args: Vec<Value>,
    ) -> Process {
        Process { id, parent, frames: vec![Frame::new(func, args, 0)], pending_input: None }
    }

    /// A logical copy of this process under a new pid. Frame registers
    /// are cloned; composites stay shared until either side writes.
    pub fn fork(&self, child: Pid) -> Process {
        Process {
            id: child,
            parent: Some(self.id),
            frames: self.frames.clone(),
            pending_input: None,
        }
    }

    /// Writes a scheduler-produced value (pid, wait status) into the
    /// current frame. Out-of-range destinations surface as faults on
    /// the next slice; here there is no frame to fault in.
    pub fn set_reg(&mut self, dst: Reg, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            let _ = frame.set(dst, value);
        }
    }
}
