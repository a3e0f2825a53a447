//! Multimethod dispatch.
//!
//! Every function name maps to a set of variants distinguished by
//! parameter signature. Calls resolve against the runtime tags of the
//! actual arguments: a variant is compatible when every parameter
//! accepts the corresponding tag, and among compatible variants the
//! unique most specific one wins. Two maximally specific variants are
//! an ambiguity fault, never an arbitrary pick.

use std::sync::Arc;

use qb_bytecode::{ParamType, signature_string};
use smallvec::SmallVec;

use crate::core::value::{Tag, Value};
use crate::errors::{Fault, FaultKind};
use crate::modules::FunctionDef;

/// All variants registered under one function name.
#[derive(Debug)]
pub struct VariantSet {
    name: String,
    variants: Vec<Arc<FunctionDef>>,
}

impl VariantSet {
    pub fn new(name: String) -> Self {
        VariantSet { name, variants: Vec::new() }
    }

    pub fn push(&mut self, def: Arc<FunctionDef>) {
        self.variants.push(def);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[Arc<FunctionDef>] {
        &self.variants
    }

    /// Picks the variant for the given arguments.
    pub fn resolve(&self, args: &[Value]) -> Result<Arc<FunctionDef>, Fault> {
        let compatible: SmallVec<[&Arc<FunctionDef>; 4]> = self
            .variants
            .iter()
            .filter(|v| compatible(&v.params, args))
            .collect();

        if compatible.is_empty() {
            return Err(Fault::new(
                FaultKind::NoMatchingVariant,
                format!("no variant of {} matches {}", self.name, call_shape(args)),
            ));
        }

        let maximal: SmallVec<[&Arc<FunctionDef>; 4]> = compatible
            .iter()
            .filter(|c| {
                !compatible
                    .iter()
                    .any(|d| !Arc::ptr_eq(d, c) && strictly_dominates(&d.params, &c.params))
            })
            .copied()
            .collect();

        match maximal.as_slice() {
            [only] => Ok(Arc::clone(only)),
            several => {
                let mut listed: Vec<String> =
                    several.iter().map(|v| signature_string(&v.params)).collect();
                listed.sort();
                Err(Fault::new(
                    FaultKind::AmbiguousDispatch,
                    format!(
                        "call {}{} is ambiguous between {}",
                        self.name,
                        call_shape(args),
                        listed.join(" and ")
                    ),
                ))
            }
        }
    }
}

/// Whether a parameter type accepts a runtime tag.
fn accepts(param: ParamType, tag: Tag) -> bool {
    match param {
        ParamType::Any => true,
        ParamType::Bool => tag == Tag::Bool,
        ParamType::Int => tag == Tag::Int,
        ParamType::Str => tag == Tag::Str,
        ParamType::List => tag == Tag::List,
        ParamType::Maybe => tag == Tag::Maybe,
        ParamType::Func => tag == Tag::Func,
        ParamType::Struct => tag == Tag::Struct,
    }
}

fn compatible(params: &[ParamType], args: &[Value]) -> bool {
    params.len() == args.len()
        && params.iter().zip(args).all(|(p, a)| accepts(*p, a.tag()))
}

/// Concrete parameters are more specific than `Any`. A signature
/// strictly dominates another when it is at least as specific at every
/// position and more specific at one. Both sides have the call's
/// arity.
fn strictly_dominates(a: &[ParamType], b: &[ParamType]) -> bool {
    let mut strict = false;
    for (pa, pb) in a.iter().zip(b) {
        let (sa, sb) = (*pa != ParamType::Any, *pb != ParamType::Any);
        if sb && !sa {
            return false;
        }
        if sa && !sb {
            strict = true;
        }
    }
    strict
}

fn call_shape(args: &[Value]) -> String {
    let tags: Vec<&str> = args.iter().map(|a| a.tag().name()).collect();
    format!("({})", tags.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::Module;
    use qb_bytecode::ModuleBuilder;

    fn set_with(variants: &[&[ParamType]]) -> (Arc<Module>, String) {
        let mut mb = ModuleBuilder::new("t");
        for params in variants {
            let mut f = mb.func("pick", params, params.len().max(1) as u16);
            f.ret(0);
            f.finish();
        }
        (Module::link(mb.build(), Vec::new()).unwrap(), "pick".to_string())
    }

    #[test]
    fn exact_signature_beats_wildcard() {
        let (module, name) = set_with(&[
            &[ParamType::Any, ParamType::Any],
            &[ParamType::Int, ParamType::Int],
        ]);
        let picked = module
            .variants(&name)
            .unwrap()
            .resolve(&[Value::Int(1), Value::Int(2)])
            .unwrap();
        assert_eq!(signature_string(&picked.params), "(int,int)");
    }

    #[test]
    fn wildcard_catches_unmatched_tags() {
        let (module, name) = set_with(&[
            &[ParamType::Any, ParamType::Any],
            &[ParamType::Int, ParamType::Int],
        ]);
        let picked = module
            .variants(&name)
            .unwrap()
            .resolve(&[Value::str("a"), Value::Int(2)])
            .unwrap();
        assert_eq!(signature_string(&picked.params), "(any,any)");
    }

    #[test]
    fn incomparable_matches_are_ambiguous() {
        let (module, name) = set_with(&[
            &[ParamType::Int, ParamType::Any],
            &[ParamType::Any, ParamType::Int],
        ]);
        let fault = module
            .variants(&name)
            .unwrap()
            .resolve(&[Value::Int(1), Value::Int(2)])
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::AmbiguousDispatch);
        assert!(fault.message.contains("(int,any)"));
        assert!(fault.message.contains("(any,int)"));
    }

    #[test]
    fn no_variant_accepts_the_arguments() {
        let (module, name) = set_with(&[&[ParamType::Int]]);
        let fault = module
            .variants(&name)
            .unwrap()
            .resolve(&[Value::str("x")])
            .unwrap_err();
        assert_eq!(fault.kind, FaultKind::NoMatchingVariant);
        assert!(fault.message.contains("(str)"));
    }

    #[test]
    fn arity_must_match() {
        let (module, name) = set_with(&[&[ParamType::Any, ParamType::Any]]);
        let fault = module.variants(&name).unwrap().resolve(&[Value::Int(1)]).unwrap_err();
        assert_eq!(fault.kind, FaultKind::NoMatchingVariant);
    }
}
