//! Qb compiled module format.
//!
//! The data model (`ModuleDef`), the instruction set (`Op`), the
//! parameter-type signatures used for multimethod dispatch, the `.qb`
//! binary codec, and a programmatic `ModuleBuilder` for producers.

pub mod binary;
pub mod builder;
pub mod module;
pub mod op;
pub mod sig;

pub use binary::{FormatError, QB_MAGIC, QB_VERSION, read_module, write_module};
pub use builder::{FuncBuilder, Label, ModuleBuilder};
pub use module::{FuncDef, ModuleDef, TypeDef};
pub use op::{Op, Reg};
pub use sig::{ParamType, Signature, signature_string};
