//! The `.qb` binary codec.
//!
//! Layout: 4-byte magic, big-endian format version, then the module
//! body (name, imports, string pool, type table, function table). All
//! multi-byte fields are big-endian. Consumers must reject files whose
//! magic or version does not match.

use std::fmt;

use smallvec::SmallVec;

use crate::module::{FuncDef, ModuleDef, TypeDef};
use crate::op::Op;
use crate::sig::ParamType;

pub const QB_MAGIC: [u8; 4] = *b"qbrt";
pub const QB_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormatError {
    BadMagic,
    Version { found: u32 },
    Truncated,
    BadOpcode(u8),
    BadParamType(u8),
    Utf8,
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::BadMagic => write!(f, "not a qb module (bad magic)"),
            FormatError::Version { found } => {
                write!(f, "unsupported format version {found} (expected {QB_VERSION})")
            }
            FormatError::Truncated => write!(f, "module file is truncated"),
            FormatError::BadOpcode(b) => write!(f, "unknown opcode 0x{b:02x}"),
            FormatError::BadParamType(b) => write!(f, "unknown parameter type 0x{b:02x}"),
            FormatError::Utf8 => write!(f, "invalid utf-8 in string data"),
        }
    }
}

impl std::error::Error for FormatError {}

// Opcode bytes. These are a private contract between this writer and
// this reader; nothing else may depend on the numbering.
mod opcode {
    pub const NOOP: u8 = 0x00;
    pub const CONST_INT: u8 = 0x01;
    pub const CONST_STR: u8 = 0x02;
    pub const CONST_BOOL: u8 = 0x03;
    pub const CONST_VOID: u8 = 0x04;
    pub const COPY: u8 = 0x05;
    pub const IADD: u8 = 0x10;
    pub const ISUB: u8 = 0x11;
    pub const IMUL: u8 = 0x12;
    pub const IDIV: u8 = 0x13;
    pub const IEQ: u8 = 0x14;
    pub const ILT: u8 = 0x15;
    pub const ILE: u8 = 0x16;
    pub const EQ: u8 = 0x17;
    pub const STRCAT: u8 = 0x18;
    pub const JUMP: u8 = 0x20;
    pub const BR_TRUE: u8 = 0x21;
    pub const BR_FALSE: u8 = 0x22;
    pub const BR_PRESENT: u8 = 0x23;
    pub const MAKE_LIST: u8 = 0x30;
    pub const LIST_LEN: u8 = 0x31;
    pub const LIST_GET: u8 = 0x32;
    pub const MAKE_STRUCT: u8 = 0x33;
    pub const FIELD_GET: u8 = 0x34;
    pub const FIELD_SET: u8 = 0x35;
    pub const MAKE_SOME: u8 = 0x36;
    pub const MAKE_NONE: u8 = 0x37;
    pub const UNWRAP: u8 = 0x38;
    pub const LOAD_FUNC: u8 = 0x40;
    pub const CALL: u8 = 0x41;
    pub const RETURN: u8 = 0x42;
    pub const FAIL: u8 = 0x43;
    pub const ON_FAULT: u8 = 0x44;
    pub const FORK: u8 = 0x50;
    pub const WAIT: u8 = 0x51;
    pub const NEW_PROC: u8 = 0x52;
    pub const WRITE: u8 = 0x60;
    pub const READ_LINE: u8 = 0x61;
}

fn param_code(p: ParamType) -> u8 {
    match p {
        ParamType::Any => 0,
        ParamType::Bool => 1,
        ParamType::Int => 2,
        ParamType::Str => 3,
        ParamType::List => 4,
        ParamType::Maybe => 5,
        ParamType::Func => 6,
        ParamType::Struct => 7,
    }
}

fn param_from_code(b: u8) -> Result<ParamType, FormatError> {
    Ok(match b {
        0 => ParamType::Any,
        1 => ParamType::Bool,
        2 => ParamType::Int,
        3 => ParamType::Str,
        4 => ParamType::List,
        5 => ParamType::Maybe,
        6 => ParamType::Func,
        7 => ParamType::Struct,
        _ => return Err(FormatError::BadParamType(b)),
    })
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn str(&mut self, s: &str) {
        self.u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(n).ok_or(FormatError::Truncated)?;
        if end > self.data.len() {
            return Err(FormatError::Truncated);
        }
        let s = &self.data[self.pos..end];
        self.pos = end;
        Ok(s)
    }
    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16, FormatError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
    fn u32(&mut self) -> Result<u32, FormatError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn i64(&mut self) -> Result<i64, FormatError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_be_bytes(raw))
    }
    fn str(&mut self) -> Result<String, FormatError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatError::Utf8)
    }
}

fn write_op(w: &mut Writer, op: &Op) {
    use opcode::*;
    match *op {
        Op::Noop => w.u8(NOOP),
        Op::ConstInt { dst, val } => {
            w.u8(CONST_INT);
            w.u16(dst);
            w.i64(val);
        }
        Op::ConstStr { dst, idx } => {
            w.u8(CONST_STR);
            w.u16(dst);
            w.u16(idx);
        }
        Op::ConstBool { dst, val } => {
            w.u8(CONST_BOOL);
            w.u16(dst);
            w.u8(val as u8);
        }
        Op::ConstVoid { dst } => {
            w.u8(CONST_VOID);
            w.u16(dst);
        }
        Op::Copy { dst, src } => {
            w.u8(COPY);
            w.u16(dst);
            w.u16(src);
        }
        Op::IAdd { dst, a, b } => write_abc(w, IADD, dst, a, b),
        Op::ISub { dst, a, b } => write_abc(w, ISUB, dst, a, b),
        Op::IMul { dst, a, b } => write_abc(w, IMUL, dst, a, b),
        Op::IDiv { dst, a, b } => write_abc(w, IDIV, dst, a, b),
        Op::IEq { dst, a, b } => write_abc(w, IEQ, dst, a, b),
        Op::ILt { dst, a, b } => write_abc(w, ILT, dst, a, b),
        Op::ILe { dst, a, b } => write_abc(w, ILE, dst, a, b),
        Op::Eq { dst, a, b } => write_abc(w, EQ, dst, a, b),
        Op::StrCat { dst, src } => {
            w.u8(STRCAT);
            w.u16(dst);
            w.u16(src);
        }
        Op::Jump { target } => {
            w.u8(JUMP);
            w.u32(target);
        }
        Op::BrTrue { cond, target } => {
            w.u8(BR_TRUE);
            w.u16(cond);
            w.u32(target);
        }
        Op::BrFalse { cond, target } => {
            w.u8(BR_FALSE);
            w.u16(cond);
            w.u32(target);
        }
        Op::BrPresent { src, target } => {
            w.u8(BR_PRESENT);
            w.u16(src);
            w.u32(target);
        }
        Op::MakeList { dst, base, len } => {
            w.u8(MAKE_LIST);
            w.u16(dst);
            w.u16(base);
            w.u16(len);
        }
        Op::ListLen { dst, list } => {
            w.u8(LIST_LEN);
            w.u16(dst);
            w.u16(list);
        }
        Op::ListGet { dst, list, idx } => write_abc(w, LIST_GET, dst, list, idx),
        Op::MakeStruct { dst, ty, base, argc } => {
            w.u8(MAKE_STRUCT);
            w.u16(dst);
            w.u16(ty);
            w.u16(base);
            w.u8(argc);
        }
        Op::FieldGet { dst, obj, field } => {
            w.u8(FIELD_GET);
            w.u16(dst);
            w.u16(obj);
            w.u16(field);
        }
        Op::FieldSet { obj, field, src } => {
            w.u8(FIELD_SET);
            w.u16(obj);
            w.u16(field);
            w.u16(src);
        }
        Op::MakeSome { dst, src } => {
            w.u8(MAKE_SOME);
            w.u16(dst);
            w.u16(src);
        }
        Op::MakeNone { dst } => {
            w.u8(MAKE_NONE);
            w.u16(dst);
        }
        Op::Unwrap { dst, src } => {
            w.u8(UNWRAP);
            w.u16(dst);
            w.u16(src);
        }
        Op::LoadFunc { dst, module, name } => {
            w.u8(LOAD_FUNC);
            w.u16(dst);
            w.u16(module);
            w.u16(name);
        }
        Op::Call { dst, func, base, argc } => {
            w.u8(CALL);
            w.u16(dst);
            w.u16(func);
            w.u16(base);
            w.u8(argc);
        }
        Op::Return { src } => {
            w.u8(RETURN);
            w.u16(src);
        }
        Op::Fail { msg } => {
            w.u8(FAIL);
            w.u16(msg);
        }
        Op::OnFault { target, dst } => {
            w.u8(ON_FAULT);
            w.u32(target);
            w.u16(dst);
        }
        Op::Fork { dst } => {
            w.u8(FORK);
            w.u16(dst);
        }
        Op::Wait { dst, pid } => {
            w.u8(WAIT);
            w.u16(dst);
            w.u16(pid);
        }
        Op::NewProc { dst, func, base, argc } => {
            w.u8(NEW_PROC);
            w.u16(dst);
            w.u16(func);
            w.u16(base);
            w.u8(argc);
        }
        Op::Write { src } => {
            w.u8(WRITE);
            w.u16(src);
        }
        Op::ReadLine { dst } => {
            w.u8(READ_LINE);
            w.u16(dst);
        }
    }
}

fn write_abc(w: &mut Writer, code: u8, a: u16, b: u16, c: u16) {
    w.u8(code);
    w.u16(a);
    w.u16(b);
    w.u16(c);
}

fn read_op(r: &mut Reader<'_>) -> Result<Op, FormatError> {
    use opcode::*;
    let code = r.u8()?;
    Ok(match code {
        NOOP => Op::Noop,
        CONST_INT => Op::ConstInt { dst: r.u16()?, val: r.i64()? },
        CONST_STR => Op::ConstStr { dst: r.u16()?, idx: r.u16()? },
        CONST_BOOL => Op::ConstBool { dst: r.u16()?, val: r.u8()? != 0 },
        CONST_VOID => Op::ConstVoid { dst: r.u16()? },
        COPY => Op::Copy { dst: r.u16()?, src: r.u16()? },
        IADD => Op::IAdd { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        ISUB => Op::ISub { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        IMUL => Op::IMul { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        IDIV => Op::IDiv { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        IEQ => Op::IEq { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        ILT => Op::ILt { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        ILE => Op::ILe { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        EQ => Op::Eq { dst: r.u16()?, a: r.u16()?, b: r.u16()? },
        STRCAT => Op::StrCat { dst: r.u16()?, src: r.u16()? },
        JUMP => Op::Jump { target: r.u32()? },
        BR_TRUE => Op::BrTrue { cond: r.u16()?, target: r.u32()? },
        BR_FALSE => Op::BrFalse { cond: r.u16()?, target: r.u32()? },
        BR_PRESENT => Op::BrPresent { src: r.u16()?, target: r.u32()? },
        MAKE_LIST => Op::MakeList { dst: r.u16()?, base: r.u16()?, len: r.u16()? },
        LIST_LEN => Op::ListLen { dst: r.u16()?, list: r.u16()? },
        LIST_GET => Op::ListGet { dst: r.u16()?, list: r.u16()?, idx: r.u16()? },
        MAKE_STRUCT => {
            Op::MakeStruct { dst: r.u16()?, ty: r.u16()?, base: r.u16()?, argc: r.u8()? }
        }
        FIELD_GET => Op::FieldGet { dst: r.u16()?, obj: r.u16()?, field: r.u16()? },
        FIELD_SET => Op::FieldSet { obj: r.u16()?, field: r.u16()?, src: r.u16()? },
        MAKE_SOME => Op::MakeSome { dst: r.u16()?, src: r.u16()? },
        MAKE_NONE => Op::MakeNone { dst: r.u16()? },
        UNWRAP => Op::Unwrap { dst: r.u16()?, src: r.u16()? },
        LOAD_FUNC => Op::LoadFunc { dst: r.u16()?, module: r.u16()?, name: r.u16()? },
        CALL => Op::Call { dst: r.u16()?, func: r.u16()?, base: r.u16()?, argc: r.u8()? },
        RETURN => Op::Return { src: r.u16()? },
        FAIL => Op::Fail { msg: r.u16()? },
        ON_FAULT => Op::OnFault { target: r.u32()?, dst: r.u16()? },
        FORK => Op::Fork { dst: r.u16()? },
        WAIT => Op::Wait { dst: r.u16()?, pid: r.u16()? },
        NEW_PROC => Op::NewProc { dst: r.u16()?, func: r.u16()?, base: r.u16()?, argc: r.u8()? },
        WRITE => Op::Write { src: r.u16()? },
        READ_LINE => Op::ReadLine { dst: r.u16()? },
        other => return Err(FormatError::BadOpcode(other)),
    })
}

/// Serializes a module to `.qb` bytes.
pub fn write_module(def: &ModuleDef) -> Vec<u8> {
    let mut w = Writer { buf: Vec::with_capacity(256) };
    w.buf.extend_from_slice(&QB_MAGIC);
    w.u32(QB_VERSION);
    w.str(&def.name);
    w.u16(def.imports.len() as u16);
    for imp in &def.imports {
        w.str(imp);
    }
    w.u16(def.strings.len() as u16);
    for s in &def.strings {
        w.str(s);
    }
    w.u16(def.types.len() as u16);
    for t in &def.types {
        w.str(&t.name);
        w.u16(t.fields.len() as u16);
        for f in &t.fields {
            w.str(f);
        }
    }
    w.u16(def.functions.len() as u16);
    for f in &def.functions {
        w.str(&f.name);
        w.u8(f.params.len() as u8);
        for p in &f.params {
            w.u8(param_code(*p));
        }
        w.u16(f.regs);
        w.u32(f.ops.len() as u32);
        for op in &f.ops {
            write_op(&mut w, op);
        }
    }
    w.buf
}

/// Parses `.qb` bytes, rejecting wrong magic or version.
pub fn read_module(bytes: &[u8]) -> Result<ModuleDef, FormatError> {
    let mut r = Reader { data: bytes, pos: 0 };
    let magic = r.take(4)?;
    if magic != QB_MAGIC {
        return Err(FormatError::BadMagic);
    }
    let version = r.u32()?;
    if version != QB_VERSION {
        return Err(FormatError::Version { found: version });
    }
    let name = r.str()?;
    let import_count = r.u16()? as usize;
    let mut imports = Vec::with_capacity(import_count);
    for _ in 0..import_count {
        imports.push(r.str()?);
    }
    let string_count = r.u16()? as usize;
    let mut strings = Vec::with_capacity(string_count);
    for _ in 0..string_count {
        strings.push(r.str()?);
    }
    let type_count = r.u16()? as usize;
    let mut types = Vec::with_capacity(type_count);
    for _ in 0..type_count {
        let name = r.str()?;
        let field_count = r.u16()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(r.str()?);
        }
        types.push(TypeDef { name, fields });
    }
    let func_count = r.u16()? as usize;
    let mut functions = Vec::with_capacity(func_count);
    for _ in 0..func_count {
        let name = r.str()?;
        let param_count = r.u8()? as usize;
        let mut params = SmallVec::new();
        for _ in 0..param_count {
            params.push(param_from_code(r.u8()?)?);
        }
        let regs = r.u16()?;
        let op_count = r.u32()? as usize;
        let mut ops = Vec::with_capacity(op_count.min(1 << 16));
        for _ in 0..op_count {
            ops.push(read_op(&mut r)?);
        }
        functions.push(FuncDef { name, params, regs, ops });
    }
    Ok(ModuleDef { name, imports, strings, types, functions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModuleBuilder;
    use crate::sig::ParamType;

    #[test]
    fn rejects_bad_magic() {
        let err = read_module(b"nope\x00\x00\x00\x01").unwrap_err();
        assert_eq!(err, FormatError::BadMagic);
    }

    #[test]
    fn rejects_wrong_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&QB_MAGIC);
        bytes.extend_from_slice(&99u32.to_be_bytes());
        let err = read_module(&bytes).unwrap_err();
        assert_eq!(err, FormatError::Version { found: 99 });
    }

    #[test]
    fn rejects_truncated_body() {
        let mut m = ModuleBuilder::new("trunc");
        let mut f = m.func("__main", &[], 1);
        f.const_int(0, 7);
        f.ret(0);
        f.finish();
        let bytes = write_module(&m.build());
        let err = read_module(&bytes[..bytes.len() - 3]).unwrap_err();
        assert_eq!(err, FormatError::Truncated);
    }

    #[test]
    fn encodes_a_realistic_module() {
        let mut m = ModuleBuilder::new("greeter");
        m.import("io_helpers");
        let point = m.struct_type("point", &["x", "y"]);
        {
            let mut f = m.func("greet", &[ParamType::Str], 4);
            f.const_str(1, "hello ");
            f.op(Op::StrCat { dst: 1, src: 0 });
            f.write(1);
            f.const_void(2);
            f.ret(2);
            f.finish();
        }
        {
            let mut f = m.func("origin", &[], 3);
            f.const_int(0, 0);
            f.const_int(1, 0);
            f.op(Op::MakeStruct { dst: 2, ty: point, base: 0, argc: 2 });
            f.ret(2);
            f.finish();
        }
        let def = m.build();
        let decoded = read_module(&write_module(&def)).unwrap();
        assert_eq!(decoded, def);
        assert_eq!(decoded.types[0].fields, vec!["x", "y"]);
        assert_eq!(decoded.functions[0].params.as_slice(), &[ParamType::Str]);
    }
}
