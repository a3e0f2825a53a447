//! Programmatic module assembly.
//!
//! `ModuleBuilder` interns strings and collects types and functions;
//! `FuncBuilder` emits ops with forward-reference labels that are
//! patched when the function is finished.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::module::{FuncDef, ModuleDef, TypeDef};
use crate::op::{Op, Reg};
use crate::sig::ParamType;

pub struct ModuleBuilder {
    def: ModuleDef,
    interned: HashMap<String, u16>,
}

impl ModuleBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleBuilder { def: ModuleDef::new(name), interned: HashMap::new() }
    }

    pub fn import(&mut self, name: impl Into<String>) -> &mut Self {
        self.def.imports.push(name.into());
        self
    }

    /// Adds a struct type and returns its type-table index.
    pub fn struct_type(&mut self, name: impl Into<String>, fields: &[&str]) -> u16 {
        let idx = self.def.types.len() as u16;
        self.def.types.push(TypeDef {
            name: name.into(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        idx
    }

    /// Interns a string in the module pool and returns its index.
    pub fn string(&mut self, s: &str) -> u16 {
        if let Some(&idx) = self.interned.get(s) {
            return idx;
        }
        let idx = self.def.strings.len() as u16;
        self.def.strings.push(s.to_string());
        self.interned.insert(s.to_string(), idx);
        idx
    }

    /// Starts a function variant. Arguments occupy the first
    /// registers; `regs` is the total register-file size.
    pub fn func(&mut self, name: impl Into<String>, params: &[ParamType], regs: u16) -> FuncBuilder<'_> {
        FuncBuilder {
            module: self,
            name: name.into(),
            params: SmallVec::from_slice(params),
            regs,
            ops: Vec::new(),
            labels: Vec::new(),
            patches: Vec::new(),
        }
    }

    pub fn build(self) -> ModuleDef {
        self.def
    }
}

/// A branch target handed out before its position is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label(usize);

pub struct FuncBuilder<'m> {
    module: &'m mut ModuleBuilder,
    name: String,
    params: SmallVec<[ParamType; 4]>,
    regs: u16,
    ops: Vec<Op>,
    labels: Vec<Option<u32>>,
    patches: Vec<(usize, Label)>,
}

impl FuncBuilder<'_> {
    pub fn op(&mut self, op: Op) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn const_int(&mut self, dst: Reg, val: i64) -> &mut Self {
        self.op(Op::ConstInt { dst, val })
    }

    pub fn const_str(&mut self, dst: Reg, s: &str) -> &mut Self {
        let idx = self.module.string(s);
        self.op(Op::ConstStr { dst, idx })
    }

    pub fn const_bool(&mut self, dst: Reg, val: bool) -> &mut Self {
        self.op(Op::ConstBool { dst, val })
    }

    pub fn const_void(&mut self, dst: Reg) -> &mut Self {
        self.op(Op::ConstVoid { dst })
    }

    /// Loads a function reference; the empty module name means the
    /// module being built.
    pub fn load_func(&mut self, dst: Reg, module: &str, name: &str) -> &mut Self {
        let module = self.module.string(module);
        let name = self.module.string(name);
        self.op(Op::LoadFunc { dst, module, name })
    }

    pub fn call(&mut self, dst: Reg, func: Reg, base: Reg, argc: u8) -> &mut Self {
        self.op(Op::Call { dst, func, base, argc })
    }

    pub fn write(&mut self, src: Reg) -> &mut Self {
        self.op(Op::Write { src })
    }

    pub fn ret(&mut self, src: Reg) -> &mut Self {
        self.op(Op::Return { src })
    }

    pub fn fail(&mut self, msg: &str) -> &mut Self {
        let msg = self.module.string(msg);
        self.op(Op::Fail { msg })
    }

    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds a label to the next emitted op.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        self.labels[label.0] = Some(self.ops.len() as u32);
        self
    }

    pub fn jump(&mut self, to: Label) -> &mut Self {
        self.patches.push((self.ops.len(), to));
        self.op(Op::Jump { target: u32::MAX })
    }

    pub fn br_true(&mut self, cond: Reg, to: Label) -> &mut Self {
        self.patches.push((self.ops.len(), to));
        self.op(Op::BrTrue { cond, target: u32::MAX })
    }

    pub fn br_false(&mut self, cond: Reg, to: Label) -> &mut Self {
        self.patches.push((self.ops.len(), to));
        self.op(Op::BrFalse { cond, target: u32::MAX })
    }

    pub fn br_present(&mut self, src: Reg, to: Label) -> &mut Self {
        self.patches.push((self.ops.len(), to));
        self.op(Op::BrPresent { src, target: u32::MAX })
    }

    pub fn on_fault(&mut self, to: Label, dst: Reg) -> &mut Self {
        self.patches.push((self.ops.len(), to));
        self.op(Op::OnFault { target: u32::MAX, dst })
    }

    /// Patches labels and appends the finished variant to the module.
    ///
    /// Panics on an unbound label; builders are producer-side tooling
    /// and an unbound label is a producer bug.
    pub fn finish(mut self) {
        for (at, label) in std::mem::take(&mut self.patches) {
            let Some(target) = self.labels[label.0] else {
                panic!("unbound label in function {}", self.name);
            };
            match &mut self.ops[at] {
                Op::Jump { target: t }
                | Op::BrTrue { target: t, .. }
                | Op::BrFalse { target: t, .. }
                | Op::BrPresent { target: t, .. }
                | Op::OnFault { target: t, .. } => *t = target,
                other => panic!("label patch on non-branch op {other:?}"),
            }
        }
        self.module.def.functions.push(FuncDef {
            name: std::mem::take(&mut self.name),
            params: std::mem::take(&mut self.params),
            regs: self.regs,
            ops: std::mem::take(&mut self.ops),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patches_forward_and_backward_labels() {
        let mut m = ModuleBuilder::new("loops");
        let mut f = m.func("count", &[ParamType::Int], 4);
        let top = f.label();
        let done = f.label();
        f.const_int(1, 0);
        f.const_int(2, 1);
        f.bind(top);
        f.op(Op::IEq { dst: 3, a: 1, b: 0 });
        f.br_true(3, done);
        f.op(Op::IAdd { dst: 1, a: 1, b: 2 });
        f.jump(top);
        f.bind(done);
        f.ret(1);
        f.finish();

        let def = m.build();
        let ops = &def.functions[0].ops;
        assert_eq!(ops[3], Op::BrTrue { cond: 3, target: 6 });
        assert_eq!(ops[5], Op::Jump { target: 2 });
    }

    #[test]
    fn interns_strings_once() {
        let mut m = ModuleBuilder::new("strs");
        let a = m.string("twice");
        let b = m.string("twice");
        let c = m.string("once");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(m.build().strings, vec!["twice", "once"]);
    }
}
