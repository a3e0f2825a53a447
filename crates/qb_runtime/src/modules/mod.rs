//! Loaded modules.
//!
//! A `Module` is linked once from its serialized `ModuleDef`: strings
//! and types become shared immutable data, function variants are
//! grouped into per-name variant sets merged with the exported sets of
//! the module's direct imports. Linked modules never change and are
//! read concurrently without locking.

pub mod registry;

use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use qb_bytecode::{ModuleDef, Op, Signature};

use crate::core::value::StructType;
use crate::dispatch::VariantSet;
use crate::errors::{Fault, FaultKind};

/// One concrete function variant, immutable after module link.
pub struct FunctionDef {
    pub name: String,
    pub params: Signature,
    pub regs: u16,
    pub ops: Box<[Op]>,
    owner: Weak<Module>,
}

impl FunctionDef {
    /// The module this variant was defined in. Modules are cached for
    /// the registry's lifetime and never unloaded, so the upgrade
    /// cannot fail while any frame can still reach this definition.
    pub fn owner(&self) -> Arc<Module> {
        self.owner.upgrade().expect("owning module outlives its functions")
    }
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FunctionDef({} {})", self.name, qb_bytecode::signature_string(&self.params))
    }
}

pub struct Module {
    pub name: String,
    pub strings: Vec<Arc<str>>,
    pub types: Vec<Arc<StructType>>,
    pub imports: Vec<Arc<Module>>,
    /// Variants defined by this module, in definition order.
    own: IndexMap<String, Vec<Arc<FunctionDef>>>,
    /// Linked dispatch table: own variants plus the exported variants
    /// of direct imports.
    table: IndexMap<String, VariantSet>,
}

impl Module {
    /// Links a parsed definition against its already-loaded imports.
    pub fn link(def: ModuleDef, imports: Vec<Arc<Module>>) -> Result<Arc<Module>, Fault> {
        validate(&def)?;
        let module = Arc::new_cyclic(|self_weak: &Weak<Module>| {
            let strings: Vec<Arc<str>> =
                def.strings.iter().map(|s| Arc::from(s.as_str())).collect();
            let types: Vec<Arc<StructType>> = def
                .types
                .iter()
                .map(|t| {
                    Arc::new(StructType {
                        module: def.name.clone(),
                        name: t.name.clone(),
                        fields: t.fields.clone(),
                    })
                })
                .collect();

            let mut own: IndexMap<String, Vec<Arc<FunctionDef>>> = IndexMap::new();
            for f in def.functions {
                let fd = Arc::new(FunctionDef {
                    name: f.name.clone(),
                    params: f.params,
                    regs: f.regs,
                    ops: f.ops.into_boxed_slice(),
                    owner: self_weak.clone(),
                });
                own.entry(f.name).or_default().push(fd);
            }

            let mut table: IndexMap<String, VariantSet> = IndexMap::new();
            for (name, defs) in &own {
                let set = table
                    .entry(name.clone())
                    .or_insert_with(|| VariantSet::new(name.clone()));
                for d in defs {
                    set.push(d.clone());
                }
            }
            for imp in &imports {
                for (name, defs) in &imp.own {
                    let set = table
                        .entry(name.clone())
                        .or_insert_with(|| VariantSet::new(name.clone()));
                    for d in defs {
                        set.push(d.clone());
                    }
                }
            }

            Module { name: def.name, strings, types, imports, own, table }
        });
        Ok(module)
    }

    /// The variant set visible at call sites in this module.
    pub fn variants(&self, name: &str) -> Option<&VariantSet> {
        self.table.get(name)
    }

    pub fn string(&self, idx: u16) -> Option<&Arc<str>> {
        self.strings.get(idx as usize)
    }

    pub fn struct_type(&self, idx: u16) -> Option<&Arc<StructType>> {
        self.types.get(idx as usize)
    }

    pub fn find_import(&self, name: &str) -> Option<&Arc<Module>> {
        self.imports.iter().find(|m| m.name == name)
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Module({})", self.name)
    }
}

/// Checks every op's pool operands before linking, so the interpreter
/// can index strings and types without bounds faults.
fn validate(def: &ModuleDef) -> Result<(), Fault> {
    let bad = |what: &str, f: &str| {
        Err(Fault::new(
            FaultKind::ModuleFormatError,
            format!("{}: {what} index out of range in function {f}", def.name),
        ))
    };
    let strings = def.strings.len() as u16;
    let types = def.types.len() as u16;
    for f in &def.functions {
        if (f.regs as usize) < f.params.len() {
            return Err(Fault::new(
                FaultKind::ModuleFormatError,
                format!(
                    "{}: register file of function {} is smaller than its parameter list",
                    def.name, f.name
                ),
            ));
        }
        for op in &f.ops {
            match *op {
                Op::ConstStr { idx, .. } | Op::Fail { msg: idx } if idx >= strings => {
                    return bad("string", &f.name);
                }
                Op::FieldGet { field, .. } | Op::FieldSet { field, .. } if field >= strings => {
                    return bad("string", &f.name);
                }
                Op::LoadFunc { module, name, .. } if module >= strings || name >= strings => {
                    return bad("string", &f.name);
                }
                Op::MakeStruct { ty, .. } if ty >= types => {
                    return bad("type", &f.name);
                }
                _ => {}
            }
        }
    }
    Ok(())
}
