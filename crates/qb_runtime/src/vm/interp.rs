//! The interpreter loop.
//!
//! Executes one process for at most `budget` instructions and reports
//! why it stopped. Faults unwind the frame stack until an installed
//! handler intercepts them; the handler receives the rendered
//! diagnostic as a string value.

use std::sync::Arc;

use qb_bytecode::{Op, Reg};

use crate::core::value::{FuncRef, Value};
use crate::errors::{Fault, FaultKind, messages};
use crate::io::{self, ReadOutcome};
use crate::modules::FunctionDef;
use crate::vm::frame::{Frame, Handler};
use crate::vm::{Outcome, Process, RuntimeShared};

/// What a single instruction decided.
enum Control {
    Advance,
    Jump(u32),
    Return(Value),
    /// Push a frame for an already-resolved callee.
    Enter { dst: Reg, func: Arc<FunctionDef>, args: Vec<Value> },
    /// Leave the loop; the pc was already positioned for resumption.
    Suspend(Outcome),
}

/// Runs `proc` until it returns, faults, suspends or exhausts the
/// instruction budget.
pub fn run(proc: &mut Process, shared: &RuntimeShared, budget: u32) -> Outcome {
    for _ in 0..budget {
        let Some(frame) = proc.frames.last() else {
            return Outcome::Return(Value::Void);
        };
        // Falling off the end of a function returns void.
        let result = if frame.pc >= frame.func.ops.len() {
            Ok(Control::Return(Value::Void))
        } else {
            let op = frame.func.ops[frame.pc];
            exec(proc, shared, op)
        };
        match result.and_then(|control| apply(proc, control)) {
            Ok(None) => {}
            Ok(Some(outcome)) => return outcome,
            Err(fault) => {
                let fault = locate(proc, fault);
                if !unwind(proc, &fault) {
                    return Outcome::Fault(fault);
                }
            }
        }
    }
    Outcome::Yield
}

/// Applies a control decision to the frame stack.
fn apply(proc: &mut Process, control: Control) -> Result<Option<Outcome>, Fault> {
    match control {
        Control::Advance => {
            top(proc).pc += 1;
            Ok(None)
        }
        Control::Jump(target) => {
            top(proc).pc = target as usize;
            Ok(None)
        }
        Control::Return(value) => {
            let finished = proc.frames.pop().expect("return from a live frame");
            match proc.frames.last_mut() {
                Some(caller) => {
                    caller.set(finished.ret_dst, value)?;
                    Ok(None)
                }
                None => Ok(Some(Outcome::Return(value))),
            }
        }
        Control::Enter { dst, func, args } => {
            top(proc).pc += 1;
            proc.frames.push(Frame::new(func, args, dst));
            Ok(None)
        }
        Control::Suspend(outcome) => Ok(Some(outcome)),
    }
}

/// Executes one instruction. Does not touch the pc except for suspend
/// points, which position it for resumption themselves.
fn exec(proc: &mut Process, shared: &RuntimeShared, op: Op) -> Result<Control, Fault> {
    match op {
        Op::Noop => Ok(Control::Advance),

        Op::ConstInt { dst, val } => {
            top(proc).set(dst, Value::Int(val))?;
            Ok(Control::Advance)
        }
        Op::ConstStr { dst, idx } => {
            let frame = top(proc);
            let s = pool_str(frame, idx)?;
            frame.set(dst, Value::Str(s))?;
            Ok(Control::Advance)
        }
        Op::ConstBool { dst, val } => {
            top(proc).set(dst, Value::Bool(val))?;
            Ok(Control::Advance)
        }
        Op::ConstVoid { dst } => {
            top(proc).set(dst, Value::Void)?;
            Ok(Control::Advance)
        }
        Op::Copy { dst, src } => {
            let frame = top(proc);
            let value = frame.get(src)?.clone();
            frame.set(dst, value)?;
            Ok(Control::Advance)
        }

        Op::IAdd { dst, a, b } => int_op(top(proc), dst, a, b, i64::checked_add),
        Op::ISub { dst, a, b } => int_op(top(proc), dst, a, b, i64::checked_sub),
        Op::IMul { dst, a, b } => int_op(top(proc), dst, a, b, i64::checked_mul),
        Op::IDiv { dst, a, b } => {
            let frame = top(proc);
            let (x, y) = int_pair(frame, a, b)?;
            if y == 0 {
                return Err(Fault::arithmetic(messages::DIVISION_BY_ZERO));
            }
            let q = x
                .checked_div(y)
                .ok_or_else(|| Fault::arithmetic(messages::INTEGER_OVERFLOW))?;
            frame.set(dst, Value::Int(q))?;
            Ok(Control::Advance)
        }

        Op::IEq { dst, a, b } => int_cmp(top(proc), dst, a, b, |x, y| x == y),
        Op::ILt { dst, a, b } => int_cmp(top(proc), dst, a, b, |x, y| x < y),
        Op::ILe { dst, a, b } => int_cmp(top(proc), dst, a, b, |x, y| x <= y),
        Op::Eq { dst, a, b } => {
            let frame = top(proc);
            let equal = frame.get(a)?.equal(frame.get(b)?);
            frame.set(dst, Value::Bool(equal))?;
            Ok(Control::Advance)
        }

        Op::StrCat { dst, src } => {
            let frame = top(proc);
            let mut buf = itoa::Buffer::new();
            let appended: &str = match frame.get(src)? {
                Value::Str(s) => s,
                Value::Int(i) => buf.format(*i),
                Value::Bool(true) => "true",
                Value::Bool(false) => "false",
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "cannot append {} to a string",
                        other.tag()
                    )));
                }
            };
            let base = frame.get(dst)?.as_str()?;
            let mut out = String::with_capacity(base.len() + appended.len());
            out.push_str(base);
            out.push_str(appended);
            frame.set(dst, Value::str(out))?;
            Ok(Control::Advance)
        }

        Op::Jump { target } => Ok(Control::Jump(target)),
        Op::BrTrue { cond, target } => {
            if top(proc).get(cond)?.as_bool()? {
                Ok(Control::Jump(target))
            } else {
                Ok(Control::Advance)
            }
        }
        Op::BrFalse { cond, target } => {
            if top(proc).get(cond)?.as_bool()? {
                Ok(Control::Advance)
            } else {
                Ok(Control::Jump(target))
            }
        }
        Op::BrPresent { src, target } => match top(proc).get(src)? {
            Value::Maybe(Some(_)) => Ok(Control::Jump(target)),
            Value::Maybe(None) => Ok(Control::Advance),
            other => Err(Fault::type_mismatch(format!(
                "{} ({})",
                messages::NOT_A_MAYBE,
                other.tag()
            ))),
        },

        Op::MakeList { dst, base, len } => {
            let frame = top(proc);
            let items = reg_range(frame, base, len)?;
            frame.set(dst, Value::list(items))?;
            Ok(Control::Advance)
        }
        Op::ListLen { dst, list } => {
            let frame = top(proc);
            let len = match frame.get(list)? {
                Value::List(items) => items.len() as i64,
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "{} ({})",
                        messages::NOT_A_LIST,
                        other.tag()
                    )));
                }
            };
            frame.set(dst, Value::Int(len))?;
            Ok(Control::Advance)
        }
        Op::ListGet { dst, list, idx } => {
            let frame = top(proc);
            let i = frame.get(idx)?.as_int()?;
            let item = match frame.get(list)? {
                Value::List(items) => usize::try_from(i)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .ok_or_else(|| {
                        Fault::type_mismatch(format!(
                            "{}: {i} of {}",
                            messages::INDEX_OUT_OF_BOUNDS,
                            items.len()
                        ))
                    })?,
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "{} ({})",
                        messages::NOT_A_LIST,
                        other.tag()
                    )));
                }
            };
            frame.set(dst, item)?;
            Ok(Control::Advance)
        }

        Op::MakeStruct { dst, ty, base, argc } => {
            let frame = top(proc);
            let ty = frame
                .module
                .struct_type(ty)
                .cloned()
                .ok_or_else(|| bad_pool("type", ty))?;
            if argc as usize != ty.fields.len() {
                return Err(Fault::type_mismatch(format!(
                    "struct {} has {} fields, got {argc} values",
                    ty.name,
                    ty.fields.len()
                )));
            }
            let fields = reg_range(frame, base, argc as u16)?;
            frame.set(dst, Value::Struct(ty, Arc::new(fields)))?;
            Ok(Control::Advance)
        }
        Op::FieldGet { dst, obj, field } => {
            let frame = top(proc);
            let name = pool_str(frame, field)?;
            let value = match frame.get(obj)? {
                Value::Struct(ty, fields) => {
                    let i = ty.field_index(&name).ok_or_else(|| {
                        Fault::type_mismatch(format!(
                            "{} '{}' on {}",
                            messages::NO_SUCH_FIELD,
                            name,
                            ty.name
                        ))
                    })?;
                    fields[i].clone()
                }
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "{} ({})",
                        messages::NOT_A_STRUCT,
                        other.tag()
                    )));
                }
            };
            frame.set(dst, value)?;
            Ok(Control::Advance)
        }
        Op::FieldSet { obj, field, src } => {
            let frame = top(proc);
            let name = pool_str(frame, field)?;
            let value = frame.get(src)?.clone();
            match frame.get_mut(obj)? {
                Value::Struct(ty, fields) => {
                    let i = ty.field_index(&name).ok_or_else(|| {
                        Fault::type_mismatch(format!(
                            "{} '{}' on {}",
                            messages::NO_SUCH_FIELD,
                            name,
                            ty.name
                        ))
                    })?;
                    Arc::make_mut(fields)[i] = value;
                }
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "{} ({})",
                        messages::NOT_A_STRUCT,
                        other.tag()
                    )));
                }
            }
            Ok(Control::Advance)
        }

        Op::MakeSome { dst, src } => {
            let frame = top(proc);
            let inner = frame.get(src)?.clone();
            frame.set(dst, Value::some(inner))?;
            Ok(Control::Advance)
        }
        Op::MakeNone { dst } => {
            top(proc).set(dst, Value::none())?;
            Ok(Control::Advance)
        }
        Op::Unwrap { dst, src } => {
            let frame = top(proc);
            let inner = match frame.get(src)? {
                Value::Maybe(Some(inner)) => inner.as_ref().clone(),
                Value::Maybe(None) => {
                    return Err(Fault::type_mismatch(messages::ABSENT_VALUE));
                }
                other => {
                    return Err(Fault::type_mismatch(format!(
                        "{} ({})",
                        messages::NOT_A_MAYBE,
                        other.tag()
                    )));
                }
            };
            frame.set(dst, inner)?;
            Ok(Control::Advance)
        }

        Op::LoadFunc { dst, module, name } => {
            let frame = top(proc);
            let module_name = pool_str(frame, module)?;
            let func_name = pool_str(frame, name)?;
            // The empty module name binds within the current module.
            // Unimported modules are loaded on demand.
            let target = if module_name.is_empty() {
                frame.module.clone()
            } else if let Some(imported) = frame.module.find_import(&module_name) {
                imported.clone()
            } else {
                shared.registry.load(&module_name)?
            };
            frame.set(dst, Value::Func(FuncRef { module: target, name: func_name }))?;
            Ok(Control::Advance)
        }
        Op::Call { dst, func, base, argc } => {
            let frame = top(proc);
            let (func, args) = resolve_call(frame, func, base, argc)?;
            Ok(Control::Enter { dst, func, args })
        }
        Op::Return { src } => {
            let value = top(proc).get(src)?.clone();
            Ok(Control::Return(value))
        }

        Op::Fail { msg } => {
            let message = pool_str(top(proc), msg)?;
            Err(Fault::new(FaultKind::UserFail, message.to_string()))
        }
        Op::OnFault { target, dst } => {
            top(proc).handler = Some(Handler { target, dst });
            Ok(Control::Advance)
        }

        Op::Fork { dst } => {
            top(proc).pc += 1;
            Ok(Control::Suspend(Outcome::Fork { dst }))
        }
        Op::Wait { dst, pid } => {
            let frame = top(proc);
            let raw = frame.get(pid)?.as_int()?;
            let pid = u64::try_from(raw)
                .map_err(|_| Fault::type_mismatch(format!("invalid pid {raw}")))?;
            frame.pc += 1;
            Ok(Control::Suspend(Outcome::WaitChild { dst, pid }))
        }
        Op::NewProc { dst, func, base, argc } => {
            let frame = top(proc);
            let (func, args) = resolve_call(frame, func, base, argc)?;
            frame.pc += 1;
            Ok(Control::Suspend(Outcome::Spawn { dst, func, args }))
        }

        Op::Write { src } => {
            let frame = top(proc);
            shared.io.write(frame.get(src)?.as_str()?)?;
            Ok(Control::Advance)
        }
        Op::ReadLine { dst } => {
            if let Some(delivered) = proc.pending_input.take() {
                return match delivered {
                    Some(line) => {
                        top(proc).set(dst, Value::str(line))?;
                        Ok(Control::Advance)
                    }
                    None => Err(io::closed_fault()),
                };
            }
            match shared.io.read_line(proc.id) {
                ReadOutcome::Line(line) => {
                    top(proc).set(dst, Value::str(line))?;
                    Ok(Control::Advance)
                }
                ReadOutcome::Closed => Err(io::closed_fault()),
                // pc stays on the read; the delivered line completes
                // it on the next slice.
                ReadOutcome::WouldBlock => Ok(Control::Suspend(Outcome::Block)),
            }
        }
    }
}

fn top(proc: &mut Process) -> &mut Frame {
    proc.frames.last_mut().expect("running process has a frame")
}

fn pool_str(frame: &Frame, idx: u16) -> Result<Arc<str>, Fault> {
    frame.module.string(idx).cloned().ok_or_else(|| bad_pool("string", idx))
}

fn bad_pool(what: &str, idx: u16) -> Fault {
    Fault::new(FaultKind::ModuleFormatError, format!("{what} pool index {idx} out of range"))
}

fn int_pair(frame: &Frame, a: Reg, b: Reg) -> Result<(i64, i64), Fault> {
    Ok((frame.get(a)?.as_int()?, frame.get(b)?.as_int()?))
}

fn int_op(
    frame: &mut Frame,
    dst: Reg,
    a: Reg,
    b: Reg,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Control, Fault> {
    let (x, y) = int_pair(frame, a, b)?;
    let value = op(x, y).ok_or_else(|| Fault::arithmetic(messages::INTEGER_OVERFLOW))?;
    frame.set(dst, Value::Int(value))?;
    Ok(Control::Advance)
}

fn int_cmp(
    frame: &mut Frame,
    dst: Reg,
    a: Reg,
    b: Reg,
    cmp: fn(i64, i64) -> bool,
) -> Result<Control, Fault> {
    let (x, y) = int_pair(frame, a, b)?;
    frame.set(dst, Value::Bool(cmp(x, y)))?;
    Ok(Control::Advance)
}

fn reg_range(frame: &Frame, base: Reg, count: u16) -> Result<Vec<Value>, Fault> {
    let mut values = Vec::with_capacity(count as usize);
    for i in 0..count {
        let r = base.checked_add(i).ok_or_else(|| {
            Fault::new(FaultKind::ModuleFormatError, "register range wraps around")
        })?;
        values.push(frame.get(r)?.clone());
    }
    Ok(values)
}

/// Dispatches a call site: the function register must hold a `Func`
/// value whose variant set accepts the argument tags.
fn resolve_call(
    frame: &Frame,
    func: Reg,
    base: Reg,
    argc: u8,
) -> Result<(Arc<FunctionDef>, Vec<Value>), Fault> {
    let fref = match frame.get(func)? {
        Value::Func(f) => f.clone(),
        other => {
            return Err(Fault::type_mismatch(format!(
                "{} ({})",
                messages::NOT_A_FUNCTION,
                other.tag()
            )));
        }
    };
    let args = reg_range(frame, base, argc as u16)?;
    let set = fref.module.variants(&fref.name).ok_or_else(|| {
        Fault::new(
            FaultKind::NoMatchingVariant,
            format!("no function '{}' in module '{}'", fref.name, fref.module.name),
        )
    })?;
    let def = set.resolve(&args)?;
    Ok((def, args))
}

/// Tags a fault with where it was raised.
fn locate(proc: &Process, mut fault: Fault) -> Fault {
    if let Some(frame) = proc.frames.last() {
        fault.message.push_str(&format!(
            " in {}.{} at op {}",
            frame.module.name, frame.func.name, frame.pc
        ));
    }
    fault
}

/// Pops frames until a handler takes the fault. Returns false when the
/// process boundary is reached.
fn unwind(proc: &mut Process, fault: &Fault) -> bool {
    while let Some(frame) = proc.frames.last_mut() {
        if let Some(handler) = frame.handler.take() {
            frame.pc = handler.target as usize;
            if frame.set(handler.dst, Value::str(fault.to_string())).is_ok() {
                return true;
            }
        }
        proc.frames.pop();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{IoGateway, SharedBuf};
    use crate::modules::registry::ModuleRegistry;
    use crate::modules::Module;
    use qb_bytecode::{ModuleBuilder, ParamType};
    use std::io::Cursor;

    const BUDGET: u32 = 10_000;

    fn shared_with_input(input: &str) -> (RuntimeShared, SharedBuf, SharedBuf) {
        let out = SharedBuf::new();
        let err = SharedBuf::new();
        let io = IoGateway::new(
            Box::new(Cursor::new(input.to_string())),
            Box::new(out.clone()),
            Box::new(err.clone()),
        );
        let shared =
            RuntimeShared { registry: Arc::new(ModuleRegistry::new(Vec::new())), io };
        (shared, out, err)
    }

    fn entry_process(module: &Arc<Module>, name: &str) -> Process {
        let func = module.variants(name).unwrap().resolve(&[]).unwrap();
        Process::spawn(1, None, func, Vec::new())
    }

    #[test]
    fn arithmetic_prints_through_strcat() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 5);
        f.const_int(0, 7)
            .const_int(1, 6)
            .op(Op::IMul { dst: 2, a: 0, b: 1 })
            .const_int(3, 2)
            .op(Op::ISub { dst: 2, a: 2, b: 3 })
            .const_int(3, 4)
            .op(Op::IDiv { dst: 2, a: 2, b: 3 })
            .const_str(4, "")
            .op(Op::StrCat { dst: 4, src: 2 })
            .write(4)
            .const_void(0)
            .ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, out, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        let outcome = run(&mut proc, &shared, BUDGET);
        assert!(matches!(outcome, Outcome::Return(Value::Void)));
        assert_eq!(out.contents(), "10");
    }

    #[test]
    fn calls_land_results_in_the_caller_register() {
        let mut mb = ModuleBuilder::new("m");
        let mut add = mb.func("add", &[ParamType::Int, ParamType::Int], 3);
        add.op(Op::IAdd { dst: 2, a: 0, b: 1 }).ret(2);
        add.finish();
        let mut f = mb.func("go", &[], 4);
        f.load_func(0, "", "add")
            .const_int(1, 30)
            .const_int(2, 12)
            .call(3, 0, 1, 2)
            .ret(3);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Return(v) => assert!(v.equal(&Value::Int(42))),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn divide_by_zero_reaches_the_installed_handler() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 3);
        let rescue = f.label();
        f.on_fault(rescue, 2);
        f.const_int(0, 1).const_int(1, 0).op(Op::IDiv { dst: 0, a: 0, b: 1 });
        f.fail("unreachable");
        f.bind(rescue);
        f.write(2).const_void(0).ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, out, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        assert!(matches!(run(&mut proc, &shared, BUDGET), Outcome::Return(_)));
        assert!(out.contents().contains("ArithmeticFault"));
        assert!(out.contents().contains("division by zero"));
    }

    #[test]
    fn unhandled_fault_terminates_the_process() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 2);
        f.const_int(0, 1).const_int(1, 0).op(Op::IDiv { dst: 0, a: 0, b: 1 }).ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Fault(fault) => {
                assert_eq!(fault.kind, FaultKind::ArithmeticFault);
                assert!(fault.message.contains("m.go"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn faults_unwind_into_the_calling_frame() {
        let mut mb = ModuleBuilder::new("m");
        let mut boom = mb.func("boom", &[], 1);
        boom.fail("it broke");
        boom.finish();
        let mut f = mb.func("go", &[], 3);
        let rescue = f.label();
        f.on_fault(rescue, 2);
        f.load_func(0, "", "boom").call(1, 0, 0, 0);
        f.fail("unreachable");
        f.bind(rescue);
        f.write(2).const_void(0).ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, out, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        assert!(matches!(run(&mut proc, &shared, BUDGET), Outcome::Return(_)));
        assert!(out.contents().contains("UserFail"));
        assert!(out.contents().contains("it broke"));
    }

    #[test]
    fn budget_exhaustion_yields() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("spin", &[], 1);
        let top = f.label();
        f.bind(top);
        f.jump(top);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "spin");
        assert!(matches!(run(&mut proc, &shared, 64), Outcome::Yield));
        // Resumable where it left off.
        assert!(matches!(run(&mut proc, &shared, 64), Outcome::Yield));
    }

    #[test]
    fn fork_suspends_and_both_sides_resume_independently() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 4);
        let child = f.label();
        f.op(Op::Fork { dst: 0 });
        f.const_int(1, 0);
        f.op(Op::IEq { dst: 2, a: 0, b: 1 });
        f.br_true(2, child);
        f.const_str(3, "parent").write(3).ret(0);
        f.bind(child);
        f.const_str(3, "child").write(3).ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, out, _) = shared_with_input("");
        let mut parent = entry_process(&module, "go");
        let Outcome::Fork { dst } = run(&mut parent, &shared, BUDGET) else {
            panic!("expected fork outcome");
        };
        let mut child = parent.fork(2);
        parent.set_reg(dst, Value::Int(2));
        child.set_reg(dst, Value::Int(0));

        assert!(matches!(run(&mut parent, &shared, BUDGET), Outcome::Return(_)));
        assert!(matches!(run(&mut child, &shared, BUDGET), Outcome::Return(_)));
        assert_eq!(out.contents(), "parentchild");
    }

    #[test]
    fn blocked_read_completes_from_delivered_input() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 1);
        f.op(Op::ReadLine { dst: 0 });
        f.write(0).ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, out, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        // Nothing buffered yet: the process parks on the read.
        assert!(matches!(run(&mut proc, &shared, BUDGET), Outcome::Block));
        proc.pending_input = Some(Some("typed".to_string()));
        assert!(matches!(run(&mut proc, &shared, BUDGET), Outcome::Return(_)));
        assert_eq!(out.contents(), "typed");
    }

    #[test]
    fn closed_input_faults_io_closed() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 1);
        f.op(Op::ReadLine { dst: 0 });
        f.ret(0);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        proc.pending_input = Some(None);
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Fault(fault) => assert_eq!(fault.kind, FaultKind::IoClosed),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn maybe_ops_branch_wrap_and_unwrap() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 3);
        let present = f.label();
        let after = f.label();
        f.op(Op::MakeNone { dst: 0 });
        f.br_present(0, present);
        f.const_int(1, 9);
        f.op(Op::MakeSome { dst: 0, src: 1 });
        f.br_present(0, present);
        f.fail("some was absent");
        f.bind(present);
        f.op(Op::Unwrap { dst: 2, src: 0 });
        f.jump(after);
        f.bind(after);
        f.ret(2);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Return(v) => assert!(v.equal(&Value::Int(9))),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn list_ops_build_measure_and_index() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 7);
        f.const_int(0, 10).const_int(1, 20).const_int(2, 30);
        f.op(Op::MakeList { dst: 3, base: 0, len: 3 });
        f.op(Op::ListLen { dst: 4, list: 3 });
        f.const_int(5, 2);
        f.op(Op::ListGet { dst: 5, list: 3, idx: 5 });
        f.op(Op::IAdd { dst: 6, a: 4, b: 5 });
        f.ret(6);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            // len 3 plus element 30
            Outcome::Return(v) => assert!(v.equal(&Value::Int(33))),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn list_index_out_of_range_faults_with_the_index() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 3);
        f.const_int(0, 1);
        f.op(Op::MakeList { dst: 1, base: 0, len: 1 });
        f.const_int(2, 7);
        f.op(Op::ListGet { dst: 2, list: 1, idx: 2 });
        f.ret(2);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Fault(fault) => {
                assert_eq!(fault.kind, FaultKind::TypeMismatch);
                assert!(fault.message.contains('7'), "message: {}", fault.message);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn structural_eq_compares_composites() {
        let mut mb = ModuleBuilder::new("m");
        let mut f = mb.func("go", &[], 7);
        f.const_int(0, 1).const_int(1, 2);
        f.op(Op::MakeList { dst: 2, base: 0, len: 2 });
        f.op(Op::MakeList { dst: 3, base: 0, len: 2 });
        f.op(Op::Eq { dst: 4, a: 2, b: 3 });
        f.op(Op::Eq { dst: 5, a: 2, b: 0 });
        let both = f.label();
        f.br_false(5, both);
        f.fail("list equalled an int");
        f.bind(both);
        f.ret(4);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Return(v) => assert!(v.equal(&Value::Bool(true))),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn struct_ops_construct_read_and_write_fields() {
        let mut mb = ModuleBuilder::new("m");
        let ty = mb.struct_type("point", &["x", "y"]);
        let x_name = mb.string("x");
        let mut f = mb.func("go", &[], 4);
        f.const_int(0, 3).const_int(1, 4);
        f.op(Op::MakeStruct { dst: 2, ty, base: 0, argc: 2 });
        f.op(Op::FieldSet { obj: 2, field: x_name, src: 1 });
        f.op(Op::FieldGet { dst: 3, obj: 2, field: x_name });
        f.ret(3);
        f.finish();
        let module = Module::link(mb.build(), Vec::new()).unwrap();

        let (shared, _, _) = shared_with_input("");
        let mut proc = entry_process(&module, "go");
        match run(&mut proc, &shared, BUDGET) {
            Outcome::Return(v) => assert!(v.equal(&Value::Int(4))),
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
