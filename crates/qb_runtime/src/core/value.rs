//! Runtime value representation.
//!
//! A closed tagged union. Composite values are reference-counted;
//! struct-field mutation goes through `Arc::make_mut`, so no mutable
//! state is ever aliased between owners or across processes.

use std::fmt;
use std::sync::Arc;

use crate::errors::{Fault, messages};
use crate::modules::Module;

/// Runtime tag of a value. A value's tag never changes after
/// construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tag {
    Void,
    Bool,
    Int,
    Str,
    List,
    Struct,
    Maybe,
    Func,
}

impl Tag {
    pub fn name(self) -> &'static str {
        match self {
            Tag::Void => "void",
            Tag::Bool => "bool",
            Tag::Int => "int",
            Tag::Str => "str",
            Tag::List => "list",
            Tag::Struct => "struct",
            Tag::Maybe => "maybe",
            Tag::Func => "func",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A loaded struct type: owning module, name and ordered field names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructType {
    pub module: String,
    pub name: String,
    pub fields: Vec<String>,
}

impl StructType {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f == name)
    }
}

/// A reference to an overloaded function name within a loaded module.
/// Dispatch picks the concrete variant per call, from the argument
/// tags.
#[derive(Clone)]
pub struct FuncRef {
    pub module: Arc<Module>,
    pub name: Arc<str>,
}

impl fmt::Debug for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncRef({}.{})", self.module.name, self.name)
    }
}

#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Void,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    Struct(Arc<StructType>, Arc<Vec<Value>>),
    Maybe(Option<Arc<Value>>),
    Func(FuncRef),
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    pub fn some(inner: Value) -> Value {
        Value::Maybe(Some(Arc::new(inner)))
    }

    pub fn none() -> Value {
        Value::Maybe(None)
    }

    pub fn tag(&self) -> Tag {
        match self {
            Value::Void => Tag::Void,
            Value::Bool(_) => Tag::Bool,
            Value::Int(_) => Tag::Int,
            Value::Str(_) => Tag::Str,
            Value::List(_) => Tag::List,
            Value::Struct(..) => Tag::Struct,
            Value::Maybe(_) => Tag::Maybe,
            Value::Func(_) => Tag::Func,
        }
    }

    /// Coercion for conditional instructions: only booleans qualify.
    pub fn as_bool(&self) -> Result<bool, Fault> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(Fault::type_mismatch(format!(
                "{} ({})",
                messages::NOT_A_BOOL,
                other.tag()
            ))),
        }
    }

    pub fn as_int(&self) -> Result<i64, Fault> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(Fault::type_mismatch(format!(
                "{} ({})",
                messages::NOT_AN_INT,
                other.tag()
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str, Fault> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(Fault::type_mismatch(format!(
                "{} ({})",
                messages::NOT_A_STRING,
                other.tag()
            ))),
        }
    }

    /// Structural equality for composites, identity for function
    /// references, false across different tags.
    pub fn equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equal(y))
            }
            (Value::Struct(ta, fa), Value::Struct(tb, fb)) => {
                ta == tb && fa.iter().zip(fb.iter()).all(|(x, y)| x.equal(y))
            }
            (Value::Maybe(None), Value::Maybe(None)) => true,
            (Value::Maybe(Some(a)), Value::Maybe(Some(b))) => a.equal(b),
            (Value::Func(a), Value::Func(b)) => {
                Arc::ptr_eq(&a.module, &b.module) && a.name == b.name
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural_for_composites() {
        let a = Value::list(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list(vec![Value::Int(1), Value::str("x")]);
        let c = Value::list(vec![Value::Int(2), Value::str("x")]);
        assert!(a.equal(&b));
        assert!(!a.equal(&c));
        assert!(!a.equal(&Value::Int(1)));
    }

    #[test]
    fn maybe_equality_tracks_presence_and_payload() {
        assert!(Value::none().equal(&Value::none()));
        assert!(Value::some(Value::Int(3)).equal(&Value::some(Value::Int(3))));
        assert!(!Value::some(Value::Int(3)).equal(&Value::none()));
    }

    #[test]
    fn bool_coercion_faults_on_other_tags() {
        assert_eq!(Value::Bool(true).as_bool().unwrap(), true);
        let err = Value::Int(1).as_bool().unwrap_err();
        assert_eq!(err.kind, crate::errors::FaultKind::TypeMismatch);
    }

    #[test]
    fn struct_field_mutation_does_not_alias() {
        let ty = Arc::new(StructType {
            module: "m".into(),
            name: "point".into(),
            fields: vec!["x".into()],
        });
        let original = Value::Struct(ty.clone(), Arc::new(vec![Value::Int(1)]));
        let mut copy = original.clone();
        if let Value::Struct(_, fields) = &mut copy {
            Arc::make_mut(fields)[0] = Value::Int(99);
        }
        if let Value::Struct(_, fields) = &original {
            assert!(fields[0].equal(&Value::Int(1)));
        } else {
            unreachable!();
        }
    }
}
