//! The instruction set.
//!
//! A register machine: every frame owns a register file sized by its
//! function's declared register count. Branch targets are absolute
//! instruction indices. String and type operands index the owning
//! module's string pool / type table.

/// Register index within a frame.
pub type Reg = u16;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Op {
    Noop,

    // Constants and moves
    ConstInt { dst: Reg, val: i64 },
    /// Load a string-pool constant.
    ConstStr { dst: Reg, idx: u16 },
    ConstBool { dst: Reg, val: bool },
    ConstVoid { dst: Reg },
    Copy { dst: Reg, src: Reg },

    // Integer arithmetic. Overflow and division by zero fault.
    IAdd { dst: Reg, a: Reg, b: Reg },
    ISub { dst: Reg, a: Reg, b: Reg },
    IMul { dst: Reg, a: Reg, b: Reg },
    IDiv { dst: Reg, a: Reg, b: Reg },

    // Comparison
    IEq { dst: Reg, a: Reg, b: Reg },
    ILt { dst: Reg, a: Reg, b: Reg },
    ILe { dst: Reg, a: Reg, b: Reg },
    /// Structural equality over any two values.
    Eq { dst: Reg, a: Reg, b: Reg },

    /// Append `src` (str, int or bool) to the string held in `dst`.
    StrCat { dst: Reg, src: Reg },

    // Control flow. Targets are absolute op indices.
    Jump { target: u32 },
    BrTrue { cond: Reg, target: u32 },
    BrFalse { cond: Reg, target: u32 },
    /// Branch when a maybe value is present.
    BrPresent { src: Reg, target: u32 },

    // Composite values
    MakeList { dst: Reg, base: Reg, len: u16 },
    ListLen { dst: Reg, list: Reg },
    ListGet { dst: Reg, list: Reg, idx: Reg },
    /// Construct an instance of the module's type table entry `ty`
    /// from `argc` consecutive registers starting at `base`.
    MakeStruct { dst: Reg, ty: u16, base: Reg, argc: u8 },
    /// Field operands are string-pool indices of the field name.
    FieldGet { dst: Reg, obj: Reg, field: u16 },
    FieldSet { obj: Reg, field: u16, src: Reg },
    MakeSome { dst: Reg, src: Reg },
    MakeNone { dst: Reg },
    /// Extract the payload of a present maybe; faults when absent.
    Unwrap { dst: Reg, src: Reg },

    // Functions
    /// Load a function reference. `module` and `name` are string-pool
    /// indices; the empty module name means the current module.
    LoadFunc { dst: Reg, module: u16, name: u16 },
    /// Multimethod call: resolve the `func` reference's variant set
    /// against `argc` argument registers starting at `base`; the
    /// callee's result lands in `dst`.
    Call { dst: Reg, func: Reg, base: Reg, argc: u8 },
    Return { src: Reg },

    // Faults
    /// Raise an in-language fault; `msg` is a string-pool index.
    Fail { msg: u16 },
    /// Install this frame's fault handler: on a fault unwinding into
    /// this frame, `dst` receives the rendered fault message and
    /// control transfers to `target`.
    OnFault { target: u32, dst: Reg },

    // Processes
    /// Duplicate the calling process. The parent's `dst` receives the
    /// child pid; the child's `dst` receives 0.
    Fork { dst: Reg },
    /// Block until the child in register `pid` terminates, then store
    /// its exit status in `dst`.
    Wait { dst: Reg, pid: Reg },
    /// Start a fresh process running the `func` reference with copied
    /// arguments; `dst` receives the new pid.
    NewProc { dst: Reg, func: Reg, base: Reg, argc: u8 },

    // I/O
    Write { src: Reg },
    ReadLine { dst: Reg },
}
