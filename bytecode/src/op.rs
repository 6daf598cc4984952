/// Bytecode opcodes.
///
/// Every instruction is one opcode byte followed by zero, one or two
/// operands. Operands are always little-endian `u32`, so the length of an
/// encoded instruction is `1 + 4 * operand_count`. Jump operands are
/// absolute byte offsets into the same stream.
///
/// The stack effect of each opcode is documented as `pops -> pushes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// `0 -> 0`
    Noop = 0x00,

    /// `0 -> 1`
    PushNil,
    /// `0 -> 1`
    PushTrue,
    /// `0 -> 1`
    PushFalse,
    /// `0 -> 1`
    PushSelf,

    /// Push a small integer.
    /// Operands: `value:i32` (stored two's-complement). `0 -> 1`
    PushInt,

    /// Push an entry of the literal pool.
    /// Operands: `literal`. `0 -> 1`
    PushLiteral,
    /// Overwrite a pool entry that serves as a run-time cache, leaving the
    /// value on the stack. Operands: `literal`. `1 -> 1`
    SetLiteral,

    /// Replace the string on top of the stack with a fresh copy. `1 -> 1`
    StringDup,

    /// Operands: `slot`. `0 -> 1`
    PushLocal,
    /// Store the top of the stack into a local, leaving it in place.
    /// Operands: `slot`. `1 -> 1`
    SetLocal,
    /// Load a local of an enclosing scope.
    /// Operands: `depth`, `slot`. `0 -> 1`
    PushLocalDepth,
    /// Operands: `depth`, `slot`. `1 -> 1`
    SetLocalDepth,
    /// Whether the caller passed a value for the argument in `slot`.
    /// Operands: `slot`. `0 -> 1`
    PassedArg,

    /// Operands: `literal` (the ivar name). `0 -> 1`
    PushIvar,
    /// Operands: `literal`. `1 -> 1`
    SetIvar,
    /// Operands: `literal` (the global name). `0 -> 1`
    PushGlobal,
    /// Operands: `literal`. `1 -> 1`
    SetGlobal,

    /// Look a constant up lexically from the current scope.
    /// Operands: `literal`. `0 -> 1`
    PushConst,
    /// Look a constant up under the module on the stack.
    /// Operands: `literal`. `1 -> 1`
    FindConst,
    /// Push the top-level namespace (`::Name`). `0 -> 1`
    PushCpathTop,
    /// Operands: `literal`. `1 -> 1`
    SetConst,
    /// Set a constant under a module: `module value -> value`.
    /// Operands: `literal`. `2 -> 1`
    SetConstAt,

    /// Push the module that lexically encloses the code. `0 -> 1`
    PushScope,
    /// Push the block passed to the current method (or nil). `0 -> 1`
    PushBlock,
    /// Push the exception currently being handled. `0 -> 1`
    PushException,
    /// `0 -> 0`
    ClearException,
    /// Restore the current exception from the stack. `1 -> 0`
    PopException,

    /// `1 -> 0`
    Pop,
    /// `1 -> 2`
    Dup,
    /// `2 -> 2`
    Swap,
    /// Move the top value below the `count` values under it.
    /// Operands: `count`. `count + 1 -> count + 1`
    MoveDown,

    /// Unconditional jump. Operands: `target`. `0 -> 0`
    Goto,
    /// Operands: `target`. `1 -> 0`
    GotoIfFalse,
    /// Operands: `target`. `1 -> 0`
    GotoIfTrue,
    /// Give the VM a chance to service interrupts inside loops. `0 -> 0`
    CheckInterrupts,

    /// Return from the current method or block. `1 -> 0`
    Ret,
    /// Non-local return from a block to its defining method. `1 -> 0`
    RaiseReturn,
    /// Break out of a block to the caller of the yielding method. `1 -> 0`
    RaiseBreak,
    /// Re-raise the current exception. `0 -> 0`
    Reraise,

    /// Send without arguments: `receiver -> result`.
    /// Operands: `literal` (selector). `1 -> 1`
    SendMethod,
    /// `receiver args.. -> result`.
    /// Operands: `literal`, `argc`. `1 + argc -> 1`
    SendStack,
    /// `receiver args.. block -> result`.
    /// Operands: `literal`, `argc`. `2 + argc -> 1`
    SendStackWithBlock,
    /// `receiver args.. splat block -> result`.
    /// Operands: `literal`, `argc`. `3 + argc -> 1`
    SendStackWithSplat,
    /// `args.. block -> result`, receiver is self.
    /// Operands: `literal`, `argc`. `1 + argc -> 1`
    SendSuper,
    /// `args.. splat block -> result`.
    /// Operands: `literal`, `argc`. `2 + argc -> 1`
    SendSuperWithSplat,

    /// Create a closure from a compiled block in the literal pool.
    /// Operands: `literal`. `0 -> 1`
    CreateBlock,
    /// Operands: `count`. `count -> 1`
    MakeArray,
    /// Operands: `count` (key/value pairs). `2 * count -> 1`
    MakeHash,
    /// Coerce the top of the stack into an array. `1 -> 1`
    CastArray,
    /// `array -> rest first`. `1 -> 2`
    ShiftArray,
    /// Concatenate string parts. Operands: `count`. `count -> 1`
    StringBuild,
    /// `1 -> 1`
    IsNil,

    /// `object index -> field`. `2 -> 1`
    FetchField,
    /// `value object index -> value`. `3 -> 1`
    StoreField,

    /// Open (or create) a class: `superclass enclosing -> class`.
    /// Operands: `literal` (name). `2 -> 1`
    OpenClass,
    /// `enclosing -> module`. Operands: `literal` (name). `1 -> 1`
    OpenModule,
    /// `object -> singleton class`. `1 -> 1`
    OpenMetaclass,
    /// Run a compiled body with the module on the stack as self.
    /// Operands: `literal` (body method). `1 -> 1`
    RunBody,
    /// Install a compiled method on the module on the stack.
    /// Operands: `literal` (name), `literal` (method). `1 -> 1`
    AttachMethod,
}

/// What an operand refers to. Used by the disassembler and the stack
/// verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Int,
    Literal,
    Local,
    Depth,
    Target,
    Count,
}

use OperandKind as K;

impl Op {
    pub const COUNT: usize = Op::AttachMethod as usize + 1;

    pub const ALL: [Op; Op::COUNT] = [
        Op::Noop,
        Op::PushNil,
        Op::PushTrue,
        Op::PushFalse,
        Op::PushSelf,
        Op::PushInt,
        Op::PushLiteral,
        Op::SetLiteral,
        Op::StringDup,
        Op::PushLocal,
        Op::SetLocal,
        Op::PushLocalDepth,
        Op::SetLocalDepth,
        Op::PassedArg,
        Op::PushIvar,
        Op::SetIvar,
        Op::PushGlobal,
        Op::SetGlobal,
        Op::PushConst,
        Op::FindConst,
        Op::PushCpathTop,
        Op::SetConst,
        Op::SetConstAt,
        Op::PushScope,
        Op::PushBlock,
        Op::PushException,
        Op::ClearException,
        Op::PopException,
        Op::Pop,
        Op::Dup,
        Op::Swap,
        Op::MoveDown,
        Op::Goto,
        Op::GotoIfFalse,
        Op::GotoIfTrue,
        Op::CheckInterrupts,
        Op::Ret,
        Op::RaiseReturn,
        Op::RaiseBreak,
        Op::Reraise,
        Op::SendMethod,
        Op::SendStack,
        Op::SendStackWithBlock,
        Op::SendStackWithSplat,
        Op::SendSuper,
        Op::SendSuperWithSplat,
        Op::CreateBlock,
        Op::MakeArray,
        Op::MakeHash,
        Op::CastArray,
        Op::ShiftArray,
        Op::StringBuild,
        Op::IsNil,
        Op::FetchField,
        Op::StoreField,
        Op::OpenClass,
        Op::OpenModule,
        Op::OpenMetaclass,
        Op::RunBody,
        Op::AttachMethod,
    ];

    /// The assembly mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Op::Noop => "noop",
            Op::PushNil => "push_nil",
            Op::PushTrue => "push_true",
            Op::PushFalse => "push_false",
            Op::PushSelf => "push_self",
            Op::PushInt => "push_int",
            Op::PushLiteral => "push_literal",
            Op::SetLiteral => "set_literal",
            Op::StringDup => "string_dup",
            Op::PushLocal => "push_local",
            Op::SetLocal => "set_local",
            Op::PushLocalDepth => "push_local_depth",
            Op::SetLocalDepth => "set_local_depth",
            Op::PassedArg => "passed_arg",
            Op::PushIvar => "push_ivar",
            Op::SetIvar => "set_ivar",
            Op::PushGlobal => "push_global",
            Op::SetGlobal => "set_global",
            Op::PushConst => "push_const",
            Op::FindConst => "find_const",
            Op::PushCpathTop => "push_cpath_top",
            Op::SetConst => "set_const",
            Op::SetConstAt => "set_const_at",
            Op::PushScope => "push_scope",
            Op::PushBlock => "push_block",
            Op::PushException => "push_exception",
            Op::ClearException => "clear_exception",
            Op::PopException => "pop_exception",
            Op::Pop => "pop",
            Op::Dup => "dup_top",
            Op::Swap => "swap_stack",
            Op::MoveDown => "move_down",
            Op::Goto => "goto",
            Op::GotoIfFalse => "goto_if_false",
            Op::GotoIfTrue => "goto_if_true",
            Op::CheckInterrupts => "check_interrupts",
            Op::Ret => "ret",
            Op::RaiseReturn => "raise_return",
            Op::RaiseBreak => "raise_break",
            Op::Reraise => "reraise",
            Op::SendMethod => "send_method",
            Op::SendStack => "send_stack",
            Op::SendStackWithBlock => "send_stack_with_block",
            Op::SendStackWithSplat => "send_stack_with_splat",
            Op::SendSuper => "send_super",
            Op::SendSuperWithSplat => "send_super_with_splat",
            Op::CreateBlock => "create_block",
            Op::MakeArray => "make_array",
            Op::MakeHash => "make_hash",
            Op::CastArray => "cast_array",
            Op::ShiftArray => "shift_array",
            Op::StringBuild => "string_build",
            Op::IsNil => "is_nil",
            Op::FetchField => "fetch_field",
            Op::StoreField => "store_field",
            Op::OpenClass => "open_class",
            Op::OpenModule => "open_module",
            Op::OpenMetaclass => "open_metaclass",
            Op::RunBody => "run_body",
            Op::AttachMethod => "attach_method",
        }
    }

    /// Look an opcode up by mnemonic.
    pub fn from_mnemonic(name: &str) -> Option<Op> {
        Self::ALL.iter().copied().find(|op| op.mnemonic() == name)
    }

    /// The meaning of each operand, in encoding order.
    pub const fn operands(self) -> &'static [OperandKind] {
        match self {
            Op::PushInt => &[K::Int],
            Op::PushLiteral
            | Op::SetLiteral
            | Op::PushIvar
            | Op::SetIvar
            | Op::PushGlobal
            | Op::SetGlobal
            | Op::PushConst
            | Op::FindConst
            | Op::SetConst
            | Op::SetConstAt
            | Op::SendMethod
            | Op::CreateBlock
            | Op::OpenClass
            | Op::OpenModule
            | Op::RunBody => &[K::Literal],
            Op::PushLocal | Op::SetLocal | Op::PassedArg => &[K::Local],
            Op::PushLocalDepth | Op::SetLocalDepth => &[K::Depth, K::Local],
            Op::Goto | Op::GotoIfFalse | Op::GotoIfTrue => &[K::Target],
            Op::SendStack
            | Op::SendStackWithBlock
            | Op::SendStackWithSplat
            | Op::SendSuper
            | Op::SendSuperWithSplat => &[K::Literal, K::Count],
            Op::MakeArray | Op::MakeHash | Op::StringBuild | Op::MoveDown => {
                &[K::Count]
            }
            Op::AttachMethod => &[K::Literal, K::Literal],
            _ => &[],
        }
    }

    pub const fn operand_count(self) -> usize {
        self.operands().len()
    }

    /// Encoded length in bytes.
    pub const fn width(self) -> u32 {
        1 + 4 * self.operand_count() as u32
    }

    /// Whether the opcode takes a jump target.
    pub const fn is_jump(self) -> bool {
        matches!(self, Op::Goto | Op::GotoIfFalse | Op::GotoIfTrue)
    }

    /// Whether control never falls through to the next instruction.
    pub const fn is_terminator(self) -> bool {
        matches!(
            self,
            Op::Goto | Op::Ret | Op::RaiseReturn | Op::RaiseBreak | Op::Reraise
        )
    }

    /// `(pops, pushes)` for this opcode given its resolved operands.
    pub fn stack_effect(self, operands: &[u32]) -> (u32, u32) {
        let count = || operands.last().copied().unwrap_or(0);
        match self {
            Op::Noop
            | Op::ClearException
            | Op::Goto
            | Op::CheckInterrupts
            | Op::Reraise => (0, 0),
            Op::PushNil
            | Op::PushTrue
            | Op::PushFalse
            | Op::PushSelf
            | Op::PushInt
            | Op::PushLiteral
            | Op::PushLocal
            | Op::PushLocalDepth
            | Op::PassedArg
            | Op::PushIvar
            | Op::PushGlobal
            | Op::PushConst
            | Op::PushCpathTop
            | Op::PushScope
            | Op::PushBlock
            | Op::PushException
            | Op::CreateBlock => (0, 1),
            Op::StringDup
            | Op::SetLiteral
            | Op::SetLocal
            | Op::SetLocalDepth
            | Op::SetIvar
            | Op::SetGlobal
            | Op::FindConst
            | Op::SetConst
            | Op::SendMethod
            | Op::CastArray
            | Op::IsNil
            | Op::OpenModule
            | Op::OpenMetaclass
            | Op::RunBody
            | Op::AttachMethod => (1, 1),
            Op::PopException
            | Op::Pop
            | Op::GotoIfFalse
            | Op::GotoIfTrue
            | Op::Ret
            | Op::RaiseReturn
            | Op::RaiseBreak => (1, 0),
            Op::Dup => (1, 2),
            Op::Swap => (2, 2),
            Op::ShiftArray => (1, 2),
            Op::SetConstAt | Op::FetchField | Op::OpenClass => (2, 1),
            Op::StoreField => (3, 1),
            Op::SendStack | Op::SendSuper => (1 + count(), 1),
            Op::SendStackWithBlock | Op::SendSuperWithSplat => (2 + count(), 1),
            Op::SendStackWithSplat => (3 + count(), 1),
            Op::MakeArray | Op::StringBuild => (count(), 1),
            Op::MakeHash => (2 * count(), 1),
            Op::MoveDown => (count() + 1, count() + 1),
        }
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        Self::ALL.get(byte as usize).copied().ok_or(byte)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}
