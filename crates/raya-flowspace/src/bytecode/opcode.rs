//! Stack-machine opcodes
//!
//! Opcodes below `HAVE_ARGUMENT` are one byte. The others are followed by a
//! little-endian u16 argument.

/// First opcode value that takes an argument
pub const HAVE_ARGUMENT: u8 = 0x40;

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack manipulation (0x00-0x07) =====
    /// No operation
    Nop = 0x00,
    /// Pop top of stack
    PopTop = 0x01,
    /// Swap the two top values
    RotTwo = 0x02,
    /// Lift the second and third values one position, move top to third
    RotThree = 0x03,
    /// Duplicate top of stack
    DupTop = 0x04,

    // ===== Unary operations (0x08-0x0F) =====
    UnaryPositive = 0x08,
    UnaryNegative = 0x09,
    /// Logical negation (forks on the operand's truth value)
    UnaryNot = 0x0A,
    UnaryInvert = 0x0B,

    // ===== Binary operations (0x10-0x1F) =====
    BinaryAdd = 0x10,
    BinarySubtract = 0x11,
    BinaryMultiply = 0x12,
    BinaryFloorDivide = 0x13,
    BinaryModulo = 0x14,
    BinaryPower = 0x15,
    BinaryLshift = 0x16,
    BinaryRshift = 0x17,
    BinaryAnd = 0x18,
    BinaryOr = 0x19,
    BinaryXor = 0x1A,
    /// TOS1[TOS]
    BinarySubscr = 0x1B,
    /// TOS1[TOS] = TOS2
    StoreSubscr = 0x1C,

    // ===== Iteration (0x20-0x27) =====
    /// Replace TOS with iter(TOS)
    GetIter = 0x20,

    // ===== Control without argument (0x28-0x3F) =====
    ReturnValue = 0x28,
    /// Pop the innermost block-stack entry
    PopBlock = 0x29,
    /// End of an exception handler: re-raise unless TOS is None
    EndFinally = 0x2A,
    /// Leave the innermost loop
    BreakLoop = 0x2B,
    /// Yield TOS from a generator
    YieldValue = 0x2C,

    // ===== Names and constants (0x40-0x4F) =====
    /// Push consts[arg]
    LoadConst = 0x40,
    /// Push local arg
    LoadFast = 0x41,
    /// Pop into local arg
    StoreFast = 0x42,
    /// Unbind local arg
    DeleteFast = 0x43,
    /// Push global names[arg]
    LoadGlobal = 0x44,
    /// Pop into global names[arg]
    StoreGlobal = 0x45,
    /// Replace TOS with TOS.names[arg]
    LoadAttr = 0x46,
    /// TOS.names[arg] = TOS1
    StoreAttr = 0x47,
    /// Push the contents of cell arg
    LoadDeref = 0x48,
    /// Pop into cell arg
    StoreDeref = 0x49,

    // ===== Building and calling (0x50-0x5F) =====
    /// Build a tuple from the top arg values
    BuildTuple = 0x50,
    /// Build a list from the top arg values
    BuildList = 0x51,
    /// Unpack TOS into arg values
    UnpackSequence = 0x52,
    /// Comparison; arg is a `CompareKind`
    CompareOp = 0x53,
    /// Call with arg positional arguments
    CallFunction = 0x54,
    /// Raise; arg 0 re-raises, arg 1 raises TOS
    RaiseVarargs = 0x55,
    /// Import module names[arg]
    ImportName = 0x56,
    /// Push TOS.names[arg] from the module on TOS
    ImportFrom = 0x57,

    // ===== Jumps and blocks (0x60-0x6F) =====
    /// Relative jump
    JumpForward = 0x60,
    /// Absolute jump
    JumpAbsolute = 0x61,
    PopJumpIfFalse = 0x62,
    PopJumpIfTrue = 0x63,
    JumpIfFalseOrPop = 0x64,
    JumpIfTrueOrPop = 0x65,
    /// Advance the iterator on TOS, or pop it and jump (relative) when exhausted
    ForIter = 0x66,
    /// Push a loop block; arg is the relative offset past the loop
    SetupLoop = 0x67,
    /// Push an exception handler block; arg is the relative handler offset
    SetupExcept = 0x68,
    /// Jump to the start of the innermost loop at arg
    ContinueLoop = 0x69,
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::PopTop),
            0x02 => Some(Self::RotTwo),
            0x03 => Some(Self::RotThree),
            0x04 => Some(Self::DupTop),
            0x08 => Some(Self::UnaryPositive),
            0x09 => Some(Self::UnaryNegative),
            0x0A => Some(Self::UnaryNot),
            0x0B => Some(Self::UnaryInvert),
            0x10 => Some(Self::BinaryAdd),
            0x11 => Some(Self::BinarySubtract),
            0x12 => Some(Self::BinaryMultiply),
            0x13 => Some(Self::BinaryFloorDivide),
            0x14 => Some(Self::BinaryModulo),
            0x15 => Some(Self::BinaryPower),
            0x16 => Some(Self::BinaryLshift),
            0x17 => Some(Self::BinaryRshift),
            0x18 => Some(Self::BinaryAnd),
            0x19 => Some(Self::BinaryOr),
            0x1A => Some(Self::BinaryXor),
            0x1B => Some(Self::BinarySubscr),
            0x1C => Some(Self::StoreSubscr),
            0x20 => Some(Self::GetIter),
            0x28 => Some(Self::ReturnValue),
            0x29 => Some(Self::PopBlock),
            0x2A => Some(Self::EndFinally),
            0x2B => Some(Self::BreakLoop),
            0x2C => Some(Self::YieldValue),
            0x40 => Some(Self::LoadConst),
            0x41 => Some(Self::LoadFast),
            0x42 => Some(Self::StoreFast),
            0x43 => Some(Self::DeleteFast),
            0x44 => Some(Self::LoadGlobal),
            0x45 => Some(Self::StoreGlobal),
            0x46 => Some(Self::LoadAttr),
            0x47 => Some(Self::StoreAttr),
            0x48 => Some(Self::LoadDeref),
            0x49 => Some(Self::StoreDeref),
            0x50 => Some(Self::BuildTuple),
            0x51 => Some(Self::BuildList),
            0x52 => Some(Self::UnpackSequence),
            0x53 => Some(Self::CompareOp),
            0x54 => Some(Self::CallFunction),
            0x55 => Some(Self::RaiseVarargs),
            0x56 => Some(Self::ImportName),
            0x57 => Some(Self::ImportFrom),
            0x60 => Some(Self::JumpForward),
            0x61 => Some(Self::JumpAbsolute),
            0x62 => Some(Self::PopJumpIfFalse),
            0x63 => Some(Self::PopJumpIfTrue),
            0x64 => Some(Self::JumpIfFalseOrPop),
            0x65 => Some(Self::JumpIfTrueOrPop),
            0x66 => Some(Self::ForIter),
            0x67 => Some(Self::SetupLoop),
            0x68 => Some(Self::SetupExcept),
            0x69 => Some(Self::ContinueLoop),
            _ => None,
        }
    }

    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether a u16 argument follows the opcode byte
    #[inline]
    pub fn has_arg(self) -> bool {
        self.to_u8() >= HAVE_ARGUMENT
    }

    /// Whether the argument is a jump offset relative to the next instruction
    pub fn has_relative_jump(self) -> bool {
        matches!(self, Self::JumpForward | Self::ForIter | Self::SetupLoop | Self::SetupExcept)
    }

    /// Whether the argument is an absolute jump target
    pub fn has_absolute_jump(self) -> bool {
        matches!(
            self,
            Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::ContinueLoop
        )
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::PopTop => "POP_TOP",
            Self::RotTwo => "ROT_TWO",
            Self::RotThree => "ROT_THREE",
            Self::DupTop => "DUP_TOP",
            Self::UnaryPositive => "UNARY_POSITIVE",
            Self::UnaryNegative => "UNARY_NEGATIVE",
            Self::UnaryNot => "UNARY_NOT",
            Self::UnaryInvert => "UNARY_INVERT",
            Self::BinaryAdd => "BINARY_ADD",
            Self::BinarySubtract => "BINARY_SUBTRACT",
            Self::BinaryMultiply => "BINARY_MULTIPLY",
            Self::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Self::BinaryModulo => "BINARY_MODULO",
            Self::BinaryPower => "BINARY_POWER",
            Self::BinaryLshift => "BINARY_LSHIFT",
            Self::BinaryRshift => "BINARY_RSHIFT",
            Self::BinaryAnd => "BINARY_AND",
            Self::BinaryOr => "BINARY_OR",
            Self::BinaryXor => "BINARY_XOR",
            Self::BinarySubscr => "BINARY_SUBSCR",
            Self::StoreSubscr => "STORE_SUBSCR",
            Self::GetIter => "GET_ITER",
            Self::ReturnValue => "RETURN_VALUE",
            Self::PopBlock => "POP_BLOCK",
            Self::EndFinally => "END_FINALLY",
            Self::BreakLoop => "BREAK_LOOP",
            Self::YieldValue => "YIELD_VALUE",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadFast => "LOAD_FAST",
            Self::StoreFast => "STORE_FAST",
            Self::DeleteFast => "DELETE_FAST",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::LoadAttr => "LOAD_ATTR",
            Self::StoreAttr => "STORE_ATTR",
            Self::LoadDeref => "LOAD_DEREF",
            Self::StoreDeref => "STORE_DEREF",
            Self::BuildTuple => "BUILD_TUPLE",
            Self::BuildList => "BUILD_LIST",
            Self::UnpackSequence => "UNPACK_SEQUENCE",
            Self::CompareOp => "COMPARE_OP",
            Self::CallFunction => "CALL_FUNCTION",
            Self::RaiseVarargs => "RAISE_VARARGS",
            Self::ImportName => "IMPORT_NAME",
            Self::ImportFrom => "IMPORT_FROM",
            Self::JumpForward => "JUMP_FORWARD",
            Self::JumpAbsolute => "JUMP_ABSOLUTE",
            Self::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Self::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Self::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Self::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Self::ForIter => "FOR_ITER",
            Self::SetupLoop => "SETUP_LOOP",
            Self::SetupExcept => "SETUP_EXCEPT",
            Self::ContinueLoop => "CONTINUE_LOOP",
        }
    }
}

/// Argument of `COMPARE_OP`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    Lt = 0,
    Le = 1,
    Eq = 2,
    Ne = 3,
    Gt = 4,
    Ge = 5,
    In = 6,
    NotIn = 7,
    Is = 8,
    IsNot = 9,
    ExcMatch = 10,
}

impl CompareKind {
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Lt),
            1 => Some(Self::Le),
            2 => Some(Self::Eq),
            3 => Some(Self::Ne),
            4 => Some(Self::Gt),
            5 => Some(Self::Ge),
            6 => Some(Self::In),
            7 => Some(Self::NotIn),
            8 => Some(Self::Is),
            9 => Some(Self::IsNot),
            10 => Some(Self::ExcMatch),
            _ => None,
        }
    }
}
