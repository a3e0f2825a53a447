//! Serialized module data model.

use crate::op::Op;
use crate::sig::Signature;

/// One compiled, named unit of types and function variants.
#[derive(Clone, Debug, PartialEq)]
pub struct ModuleDef {
    pub name: String,
    /// Names of modules this one imports, resolved by the runtime's
    /// registry at load time.
    pub imports: Vec<String>,
    pub strings: Vec<String>,
    pub types: Vec<TypeDef>,
    pub functions: Vec<FuncDef>,
}

impl ModuleDef {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleDef {
            name: name.into(),
            imports: Vec::new(),
            strings: Vec::new(),
            types: Vec::new(),
            functions: Vec::new(),
        }
    }
}

/// An exported struct type: a name plus ordered field names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    pub fields: Vec<String>,
}

/// One function variant. Several variants may share a name; they are
/// distinguished by their parameter-type signatures.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncDef {
    pub name: String,
    pub params: Signature,
    /// Register-file size. Arguments occupy the first registers.
    pub regs: u16,
    pub ops: Vec<Op>,
}
