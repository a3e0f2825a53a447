//! Call frames.

use std::sync::Arc;

use qb_bytecode::Reg;

use crate::core::value::Value;
use crate::errors::{Fault, FaultKind};
use crate::modules::{FunctionDef, Module};

/// Fault handler installed by an on-fault instruction. One per frame;
/// consumed when it fires.
#[derive(Clone, Copy, Debug)]
pub struct Handler {
    pub target: u32,
    pub dst: Reg,
}

/// One activation of a function variant. Frames are plain data so a
/// fork can clone the whole stack; shared values stay shared through
/// their `Arc`s.
#[derive(Clone)]
pub struct Frame {
    pub func: Arc<FunctionDef>,
    pub module: Arc<Module>,
    pub pc: usize,
    pub regs: Vec<Value>,
    /// Caller register the return value lands in.
    pub ret_dst: Reg,
    pub handler: Option<Handler>,
}

impl Frame {
    /// Arguments occupy the first registers; the rest start void.
    pub fn new(func: Arc<FunctionDef>, args: Vec<Value>, ret_dst: Reg) -> Frame {
        let module = func.owner();
        let mut regs = vec![Value::Void; func.regs as usize];
        for (reg, arg) in regs.iter_mut().zip(args) {
            *reg = arg;
        }
        Frame { func, module, pc: 0, regs, ret_dst, handler: None }
    }

    pub fn get(&self, r: Reg) -> Result<&Value, Fault> {
        self.regs.get(r as usize).ok_or_else(|| bad_register(r))
    }

    pub fn get_mut(&mut self, r: Reg) -> Result<&mut Value, Fault> {
        self.regs.get_mut(r as usize).ok_or_else(|| bad_register(r))
    }

    pub fn set(&mut self, r: Reg, value: Value) -> Result<(), Fault> {
        *self.get_mut(r)? = value;
        Ok(())
    }
}

fn bad_register(r: Reg) -> Fault {
    Fault::new(FaultKind::ModuleFormatError, format!("register r{r} out of range"))
}
