use byteorder::{ByteOrder, LittleEndian};

use crate::DepyoError;

macro_rules! define_ops {
    ($($name:ident = $val:literal => $text:literal,)*) => {
        /// CPython 3.7 opcode set.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($name = $val,)*
        }

        impl Op {
            pub fn from_u8(byte: u8) -> Option<Op> {
                match byte {
                    $($val => Some(Op::$name),)*
                    _ => None,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$name => $text,)*
                }
            }
        }
    };
}

define_ops! {
    PopTop = 1 => "POP_TOP",
    RotTwo = 2 => "ROT_TWO",
    RotThree = 3 => "ROT_THREE",
    DupTop = 4 => "DUP_TOP",
    DupTopTwo = 5 => "DUP_TOP_TWO",
    Nop = 9 => "NOP",
    UnaryPositive = 10 => "UNARY_POSITIVE",
    UnaryNegative = 11 => "UNARY_NEGATIVE",
    UnaryNot = 12 => "UNARY_NOT",
    UnaryInvert = 15 => "UNARY_INVERT",
    BinaryMatrixMultiply = 16 => "BINARY_MATRIX_MULTIPLY",
    InplaceMatrixMultiply = 17 => "INPLACE_MATRIX_MULTIPLY",
    BinaryPower = 19 => "BINARY_POWER",
    BinaryMultiply = 20 => "BINARY_MULTIPLY",
    BinaryModulo = 22 => "BINARY_MODULO",
    BinaryAdd = 23 => "BINARY_ADD",
    BinarySubtract = 24 => "BINARY_SUBTRACT",
    BinarySubscr = 25 => "BINARY_SUBSCR",
    BinaryFloorDivide = 26 => "BINARY_FLOOR_DIVIDE",
    BinaryTrueDivide = 27 => "BINARY_TRUE_DIVIDE",
    InplaceFloorDivide = 28 => "INPLACE_FLOOR_DIVIDE",
    InplaceTrueDivide = 29 => "INPLACE_TRUE_DIVIDE",
    GetAiter = 50 => "GET_AITER",
    GetAnext = 51 => "GET_ANEXT",
    BeforeAsyncWith = 52 => "BEFORE_ASYNC_WITH",
    InplaceAdd = 55 => "INPLACE_ADD",
    InplaceSubtract = 56 => "INPLACE_SUBTRACT",
    InplaceMultiply = 57 => "INPLACE_MULTIPLY",
    InplaceModulo = 59 => "INPLACE_MODULO",
    StoreSubscr = 60 => "STORE_SUBSCR",
    DeleteSubscr = 61 => "DELETE_SUBSCR",
    BinaryLshift = 62 => "BINARY_LSHIFT",
    BinaryRshift = 63 => "BINARY_RSHIFT",
    BinaryAnd = 64 => "BINARY_AND",
    BinaryXor = 65 => "BINARY_XOR",
    BinaryOr = 66 => "BINARY_OR",
    InplacePower = 67 => "INPLACE_POWER",
    GetIter = 68 => "GET_ITER",
    GetYieldFromIter = 69 => "GET_YIELD_FROM_ITER",
    PrintExpr = 70 => "PRINT_EXPR",
    LoadBuildClass = 71 => "LOAD_BUILD_CLASS",
    YieldFrom = 72 => "YIELD_FROM",
    GetAwaitable = 73 => "GET_AWAITABLE",
    InplaceLshift = 75 => "INPLACE_LSHIFT",
    InplaceRshift = 76 => "INPLACE_RSHIFT",
    InplaceAnd = 77 => "INPLACE_AND",
    InplaceXor = 78 => "INPLACE_XOR",
    InplaceOr = 79 => "INPLACE_OR",
    BreakLoop = 80 => "BREAK_LOOP",
    WithCleanupStart = 81 => "WITH_CLEANUP_START",
    WithCleanupFinish = 82 => "WITH_CLEANUP_FINISH",
    ReturnValue = 83 => "RETURN_VALUE",
    ImportStar = 84 => "IMPORT_STAR",
    SetupAnnotations = 85 => "SETUP_ANNOTATIONS",
    YieldValue = 86 => "YIELD_VALUE",
    PopBlock = 87 => "POP_BLOCK",
    EndFinally = 88 => "END_FINALLY",
    PopExcept = 89 => "POP_EXCEPT",
    StoreName = 90 => "STORE_NAME",
    DeleteName = 91 => "DELETE_NAME",
    UnpackSequence = 92 => "UNPACK_SEQUENCE",
    ForIter = 93 => "FOR_ITER",
    UnpackEx = 94 => "UNPACK_EX",
    StoreAttr = 95 => "STORE_ATTR",
    DeleteAttr = 96 => "DELETE_ATTR",
    StoreGlobal = 97 => "STORE_GLOBAL",
    DeleteGlobal = 98 => "DELETE_GLOBAL",
    LoadConst = 100 => "LOAD_CONST",
    LoadName = 101 => "LOAD_NAME",
    BuildTuple = 102 => "BUILD_TUPLE",
    BuildList = 103 => "BUILD_LIST",
    BuildSet = 104 => "BUILD_SET",
    BuildMap = 105 => "BUILD_MAP",
    LoadAttr = 106 => "LOAD_ATTR",
    CompareOp = 107 => "COMPARE_OP",
    ImportName = 108 => "IMPORT_NAME",
    ImportFrom = 109 => "IMPORT_FROM",
    JumpForward = 110 => "JUMP_FORWARD",
    JumpIfFalseOrPop = 111 => "JUMP_IF_FALSE_OR_POP",
    JumpIfTrueOrPop = 112 => "JUMP_IF_TRUE_OR_POP",
    JumpAbsolute = 113 => "JUMP_ABSOLUTE",
    PopJumpIfFalse = 114 => "POP_JUMP_IF_FALSE",
    PopJumpIfTrue = 115 => "POP_JUMP_IF_TRUE",
    LoadGlobal = 116 => "LOAD_GLOBAL",
    ContinueLoop = 119 => "CONTINUE_LOOP",
    SetupLoop = 120 => "SETUP_LOOP",
    SetupExcept = 121 => "SETUP_EXCEPT",
    SetupFinally = 122 => "SETUP_FINALLY",
    LoadFast = 124 => "LOAD_FAST",
    StoreFast = 125 => "STORE_FAST",
    DeleteFast = 126 => "DELETE_FAST",
    RaiseVarargs = 130 => "RAISE_VARARGS",
    CallFunction = 131 => "CALL_FUNCTION",
    MakeFunction = 132 => "MAKE_FUNCTION",
    BuildSlice = 133 => "BUILD_SLICE",
    LoadClosure = 135 => "LOAD_CLOSURE",
    LoadDeref = 136 => "LOAD_DEREF",
    StoreDeref = 137 => "STORE_DEREF",
    DeleteDeref = 138 => "DELETE_DEREF",
    CallFunctionKw = 141 => "CALL_FUNCTION_KW",
    CallFunctionEx = 142 => "CALL_FUNCTION_EX",
    SetupWith = 143 => "SETUP_WITH",
    ExtendedArg = 144 => "EXTENDED_ARG",
    ListAppend = 145 => "LIST_APPEND",
    SetAdd = 146 => "SET_ADD",
    MapAdd = 147 => "MAP_ADD",
    LoadClassderef = 148 => "LOAD_CLASSDEREF",
    BuildListUnpack = 149 => "BUILD_LIST_UNPACK",
    BuildMapUnpack = 150 => "BUILD_MAP_UNPACK",
    BuildMapUnpackWithCall = 151 => "BUILD_MAP_UNPACK_WITH_CALL",
    BuildTupleUnpack = 152 => "BUILD_TUPLE_UNPACK",
    BuildSetUnpack = 153 => "BUILD_SET_UNPACK",
    SetupAsyncWith = 154 => "SETUP_ASYNC_WITH",
    FormatValue = 155 => "FORMAT_VALUE",
    BuildConstKeyMap = 156 => "BUILD_CONST_KEY_MAP",
    BuildString = 157 => "BUILD_STRING",
    BuildTupleUnpackWithCall = 158 => "BUILD_TUPLE_UNPACK_WITH_CALL",
    LoadMethod = 160 => "LOAD_METHOD",
    CallMethod = 161 => "CALL_METHOD",
}

impl Op {
    pub fn has_arg(self) -> bool {
        self as u8 >= 90
    }

    /// Relative jumps encode a delta from the following instruction.
    pub fn has_rel_jump(self) -> bool {
        matches!(
            self,
            Op::ForIter
                | Op::JumpForward
                | Op::SetupLoop
                | Op::SetupFinally
                | Op::SetupExcept
                | Op::SetupWith
                | Op::SetupAsyncWith
        )
    }

    /// Absolute jumps encode a byte offset into the code unit.
    pub fn has_abs_jump(self) -> bool {
        matches!(
            self,
            Op::JumpIfFalseOrPop
                | Op::JumpIfTrueOrPop
                | Op::JumpAbsolute
                | Op::PopJumpIfFalse
                | Op::PopJumpIfTrue
                | Op::ContinueLoop
        )
    }

    pub fn has_jump(self) -> bool {
        self.has_rel_jump() || self.has_abs_jump()
    }

    /// Opcodes that always open or close a statement. Branches that land
    /// right after one of these are else-jump candidates.
    pub fn is_stmt(self) -> bool {
        matches!(
            self,
            Op::SetupLoop
                | Op::BreakLoop
                | Op::ContinueLoop
                | Op::SetupFinally
                | Op::EndFinally
                | Op::SetupExcept
                | Op::PopExcept
                | Op::SetupWith
                | Op::PopBlock
                | Op::StoreFast
                | Op::DeleteFast
                | Op::StoreDeref
                | Op::DeleteDeref
                | Op::StoreGlobal
                | Op::DeleteGlobal
                | Op::StoreName
                | Op::DeleteName
                | Op::StoreAttr
                | Op::DeleteAttr
                | Op::ImportName
                | Op::ImportFrom
                | Op::ReturnValue
                | Op::YieldValue
                | Op::RaiseVarargs
                | Op::StoreSubscr
                | Op::DeleteSubscr
        )
    }

    pub fn is_pop_jump(self) -> bool {
        matches!(self, Op::PopJumpIfTrue | Op::PopJumpIfFalse)
    }

    /// A conditional branch to the address just after one of these is a
    /// jump over an else clause.
    pub fn is_else_jump_source(self) -> bool {
        matches!(
            self,
            Op::JumpForward
                | Op::ReturnValue
                | Op::JumpAbsolute
                | Op::SetupLoop
                | Op::RaiseVarargs
                | Op::PopTop
        )
    }

    /// Iterator-protocol opcodes that mark a loop as a for loop.
    pub fn is_for_jump(self) -> bool {
        matches!(self, Op::GetIter | Op::ForIter | Op::GetAnext)
    }

    pub fn is_unpack_store(self) -> bool {
        matches!(
            self,
            Op::StoreName
                | Op::StoreFast
                | Op::StoreSubscr
                | Op::StoreGlobal
                | Op::StoreDeref
                | Op::StoreAttr
        )
    }

    pub fn is_unpack_terminator(self) -> bool {
        self.is_stmt() && !self.is_unpack_store()
    }

    /// Opcodes that leave exactly one fresh expression on the stack.
    /// Used to tell tuple-assignment rotations apart from plain rotations.
    pub fn is_expr_producer(self) -> bool {
        matches!(
            self,
            Op::LoadAttr
                | Op::LoadGlobal
                | Op::LoadName
                | Op::LoadConst
                | Op::LoadFast
                | Op::LoadDeref
                | Op::BinarySubscr
                | Op::BuildList
                | Op::CallFunction
                | Op::BinarySubtract
                | Op::BinaryAdd
                | Op::BinaryMultiply
                | Op::BinaryTrueDivide
                | Op::BinaryModulo
                | Op::BinaryOr
                | Op::BinaryXor
                | Op::BinaryAnd
                | Op::BinaryFloorDivide
                | Op::BinaryMatrixMultiply
                | Op::BinaryLshift
                | Op::BinaryRshift
                | Op::CompareOp
                | Op::UnaryNegative
                | Op::BinaryPower
                | Op::UnaryInvert
                | Op::UnaryPositive
                | Op::UnaryNot
                | Op::CallMethod
                | Op::BuildTuple
                | Op::BuildSet
                | Op::BuildMap
                | Op::BuildSlice
        )
    }

    pub fn is_inplace(self) -> bool {
        matches!(
            self,
            Op::InplaceMatrixMultiply
                | Op::InplaceFloorDivide
                | Op::InplaceTrueDivide
                | Op::InplaceAdd
                | Op::InplaceSubtract
                | Op::InplaceMultiply
                | Op::InplaceModulo
                | Op::InplacePower
                | Op::InplaceLshift
                | Op::InplaceRshift
                | Op::InplaceAnd
                | Op::InplaceXor
                | Op::InplaceOr
        )
    }
}

/// One decoded instruction. `EXTENDED_ARG` prefixes are folded into
/// `arg`, so `offset` points at the first prefix byte and
/// `offset + size` is the next instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instr {
    pub offset: u32,
    pub op: Op,
    pub arg: u32,
    pub size: u32,
}

impl Instr {
    /// Byte offset of the jump target, if this instruction jumps.
    pub fn jump_target(&self) -> Option<u32> {
        if self.op.has_rel_jump() {
            Some(self.offset + self.size + self.arg)
        } else if self.op.has_abs_jump() {
            Some(self.arg)
        } else {
            None
        }
    }
}

/// Decodes a raw wordcode buffer into instructions, folding
/// `EXTENDED_ARG` prefixes into the operand they widen.
pub fn decode(bytecode: &[u8]) -> Result<Vec<Instr>, DepyoError> {
    let mut instrs = Vec::with_capacity(bytecode.len() / 2);
    let mut pos = 0usize;
    while pos < bytecode.len() {
        let start = pos;
        let mut word = read_word(bytecode, &mut pos)?;
        let mut arg = u32::from(word >> 8);
        while (word & 0xff) as u8 == Op::ExtendedArg as u8 {
            word = read_word(bytecode, &mut pos)?;
            arg = (arg << 8) | u32::from(word >> 8);
        }
        let byte = (word & 0xff) as u8;
        let op = Op::from_u8(byte).ok_or(DepyoError::UnknownOpcode {
            opcode: byte,
            offset: start,
        })?;
        instrs.push(Instr {
            offset: start as u32,
            op,
            arg,
            size: (pos - start) as u32,
        });
    }
    Ok(instrs)
}

fn read_word(bytecode: &[u8], pos: &mut usize) -> Result<u16, DepyoError> {
    if bytecode.len() - *pos < 2 {
        return Err(DepyoError::TruncatedInstruction { offset: *pos });
    }
    let word = LittleEndian::read_u16(&bytecode[*pos..]);
    *pos += 2;
    Ok(word)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn decodes_plain_wordcode() {
        let raw = vec![Op::LoadConst as u8, 0, Op::ReturnValue as u8, 0];
        let instrs = decode(&raw).unwrap();
        assert_eq!(instrs.len(), 2);
        assert_eq!(instrs[0].op, Op::LoadConst);
        assert_eq!(instrs[0].arg, 0);
        assert_eq!(instrs[1].offset, 2);
    }

    #[test]
    fn folds_extended_arg_prefixes() {
        let raw = vec![
            Op::ExtendedArg as u8,
            0x01,
            Op::ExtendedArg as u8,
            0x02,
            Op::LoadConst as u8,
            0x03,
        ];
        let instrs = decode(&raw).unwrap();
        assert_eq!(instrs.len(), 1);
        assert_eq!(instrs[0].op, Op::LoadConst);
        assert_eq!(instrs[0].arg, 0x010203);
        assert_eq!(instrs[0].offset, 0);
        assert_eq!(instrs[0].size, 6);
    }

    #[test]
    fn relative_jumps_resolve_past_the_instruction() {
        let raw = vec![Op::JumpForward as u8, 4, Op::Nop as u8, 0];
        let instrs = decode(&raw).unwrap();
        assert_eq!(instrs[0].jump_target(), Some(6));
    }

    #[test]
    fn rejects_unknown_opcodes() {
        let raw = vec![0xff, 0];
        match decode(&raw) {
            Err(DepyoError::UnknownOpcode { opcode, offset }) => {
                assert_eq!(opcode, 0xff);
                assert_eq!(offset, 0);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_odd_length_streams() {
        let raw = vec![Op::PopTop as u8];
        assert!(matches!(
            decode(&raw),
            Err(DepyoError::TruncatedInstruction { offset: 0 })
        ));
    }
}
