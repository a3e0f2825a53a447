//! Parameter-type signatures.
//!
//! Every function variant declares one `ParamType` per parameter. The
//! runtime matches these against argument tags when it resolves a
//! multimethod call; `Any` is the wildcard that accepts every tag.

use std::fmt;

use smallvec::SmallVec;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamType {
    /// Wildcard: accepts any runtime tag.
    Any,
    Bool,
    Int,
    Str,
    List,
    Maybe,
    Func,
    Struct,
}

impl ParamType {
    pub fn name(self) -> &'static str {
        match self {
            ParamType::Any => "any",
            ParamType::Bool => "bool",
            ParamType::Int => "int",
            ParamType::Str => "str",
            ParamType::List => "list",
            ParamType::Maybe => "maybe",
            ParamType::Func => "func",
            ParamType::Struct => "struct",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered parameter types of one function variant.
pub type Signature = SmallVec<[ParamType; 4]>;

/// Renders a signature the way dispatch diagnostics report it,
/// e.g. `(int,int)`.
pub fn signature_string(params: &[ParamType]) -> String {
    let mut out = String::from("(");
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(p.name());
    }
    out.push(')');
    out
}
