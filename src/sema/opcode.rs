use std::fmt;

use crate::error::{SemaError, SemaResult};
use crate::ir::types::ValueType;

/// Namespace tag for the dynamic-compilation meta-opcodes within a semantic
/// stream cell.
pub const DC_OPCODE_BIT: u32 = 1 << 31;

/// First opcode value of the target-specific DAG operator space. Cells in
/// `[TARGET_OPCODE_START, DC_OPCODE_BIT)` are delegated to target hooks.
pub const TARGET_OPCODE_START: u32 = 0x1000;

/// Meta-opcodes for operand/register/constant access and stream control.
/// These never appear in patterns; the flattener produces them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum DcOp {
    /// Sentinel terminating one instruction's semantic program.
    EndOfInstruction = 0,
    /// Read a register operand of the MI. Operand: MI operand index.
    GetRc = 1,
    /// Write a register operand. Operands: MI operand index, value index.
    PutRc = 2,
    /// Read an explicitly-named physical register. Operand: register number.
    GetReg = 3,
    /// Write an explicitly-named physical register. Operands: register
    /// number, value index.
    PutReg = 4,
    /// Target-specific decoding of a non-register operand. Operands:
    /// operand-type enum value, first MI operand index.
    CustomOp = 5,
    /// Read an immediate operand from the MI. Operand: MI operand index.
    ConstantOp = 6,
    /// Produce a compile-time constant. Operand: constant-pool index.
    MovConstant = 7,
    /// Declare an implicit register def/use. Operand: register number.
    Implicit = 8,
}

impl DcOp {
    pub fn from_u32(val: u32) -> Option<Self> {
        use DcOp::*;
        Some(match val {
            0 => EndOfInstruction,
            1 => GetRc,
            2 => PutRc,
            3 => GetReg,
            4 => PutReg,
            5 => CustomOp,
            6 => ConstantOp,
            7 => MovConstant,
            8 => Implicit,
            _ => return None,
        })
    }

    pub fn encode(self) -> u32 {
        DC_OPCODE_BIT | self as u32
    }
}

impl fmt::Display for DcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DcOp::EndOfInstruction => "END_OF_INSTRUCTION",
            DcOp::GetRc => "GET_RC",
            DcOp::PutRc => "PUT_RC",
            DcOp::GetReg => "GET_REG",
            DcOp::PutReg => "PUT_REG",
            DcOp::CustomOp => "CUSTOM_OP",
            DcOp::ConstantOp => "CONSTANT_OP",
            DcOp::MovConstant => "MOV_CONSTANT",
            DcOp::Implicit => "IMPLICIT",
        };
        write!(f, "{}", s)
    }
}

/// Target-independent operators inherited from the pattern DSL. Every value
/// has a fixed result convention and operand arity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IsdOp {
    Add = 1,
    Sub = 2,
    Mul = 3,
    UDiv = 4,
    SDiv = 5,
    URem = 6,
    SRem = 7,
    And = 8,
    Or = 9,
    Xor = 10,
    Shl = 11,
    Srl = 12,
    Sra = 13,
    FAdd = 14,
    FSub = 15,
    FMul = 16,
    FDiv = 17,
    Load = 18,
    Store = 19,
    Br = 20,
    BrCond = 21,
    Call = 22,
    Ret = 23,
    Trap = 24,
    Trunc = 25,
    ZExt = 26,
    SExt = 27,
    Bitcast = 28,
    /// Target intrinsic; the operand cell is the intrinsic id, delegated to
    /// target hooks at runtime.
    Intrinsic = 29,
}

impl IsdOp {
    pub fn from_u32(val: u32) -> Option<Self> {
        use IsdOp::*;
        Some(match val {
            1 => Add,
            2 => Sub,
            3 => Mul,
            4 => UDiv,
            5 => SDiv,
            6 => URem,
            7 => SRem,
            8 => And,
            9 => Or,
            10 => Xor,
            11 => Shl,
            12 => Srl,
            13 => Sra,
            14 => FAdd,
            15 => FSub,
            16 => FMul,
            17 => FDiv,
            18 => Load,
            19 => Store,
            20 => Br,
            21 => BrCond,
            22 => Call,
            23 => Ret,
            24 => Trap,
            25 => Trunc,
            26 => ZExt,
            27 => SExt,
            28 => Bitcast,
            29 => Intrinsic,
            _ => return None,
        })
    }

    pub fn encode(self) -> u32 {
        self as u32
    }

    pub fn is_binary(self) -> bool {
        use IsdOp::*;
        matches!(
            self,
            Add | Sub | Mul | UDiv | SDiv | URem | SRem | And | Or | Xor | Shl | Srl | Sra
                | FAdd | FSub | FMul | FDiv
        )
    }

    pub fn is_cast(self) -> bool {
        use IsdOp::*;
        matches!(self, Trunc | ZExt | SExt | Bitcast)
    }
}

impl fmt::Display for IsdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ISD_{}", format!("{:?}", self).to_uppercase())
    }
}

/// A decoded semantic stream opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemaOp {
    Dc(DcOp),
    Isd(IsdOp),
    /// A target-specific DAG operator, delegated to hooks at runtime.
    Target(u32),
}

impl SemaOp {
    pub fn encode(self) -> u32 {
        match self {
            SemaOp::Dc(op) => op.encode(),
            SemaOp::Isd(op) => op.encode(),
            SemaOp::Target(op) => {
                debug_assert!((TARGET_OPCODE_START..DC_OPCODE_BIT).contains(&op));
                op
            }
        }
    }

    /// Decode a stream cell. Returns None for values in no namespace.
    pub fn decode(cell: u32) -> Option<Self> {
        if cell & DC_OPCODE_BIT != 0 {
            DcOp::from_u32(cell & !DC_OPCODE_BIT).map(SemaOp::Dc)
        } else if cell >= TARGET_OPCODE_START {
            Some(SemaOp::Target(cell))
        } else {
            IsdOp::from_u32(cell).map(SemaOp::Isd)
        }
    }
}

impl fmt::Display for SemaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemaOp::Dc(op) => write!(f, "{}", op),
            SemaOp::Isd(op) => write!(f, "{}", op),
            SemaOp::Target(op) => write!(f, "TARGET_{:#x}", op),
        }
    }
}

/// How an operand cell of a semantic node is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandClass {
    /// Def-number of an earlier result in the same stream.
    DefRef,
    /// Positional index of a machine-instruction operand.
    MiOperand,
    /// Physical register number.
    Register,
    /// Constant-pool index.
    PoolIndex,
    /// Target operand-type enum value.
    OpType,
}

/// Per-opcode stream signature: how many type cells follow the opcode, and
/// the class of each operand cell after those.
#[derive(Debug, Clone, Copy)]
pub struct OpSig {
    pub num_types: usize,
    pub operands: &'static [OperandClass],
}

impl OpSig {
    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }
}

impl DcOp {
    pub fn sig(self) -> OpSig {
        use OperandClass::*;
        const EMPTY: &[OperandClass] = &[];
        const MI: &[OperandClass] = &[MiOperand];
        const MI_DEF: &[OperandClass] = &[MiOperand, DefRef];
        const REG: &[OperandClass] = &[Register];
        const REG_DEF: &[OperandClass] = &[Register, DefRef];
        const TYPE_MI: &[OperandClass] = &[OpType, MiOperand];
        const POOL: &[OperandClass] = &[PoolIndex];
        match self {
            DcOp::EndOfInstruction => OpSig { num_types: 0, operands: EMPTY },
            DcOp::GetRc => OpSig { num_types: 1, operands: MI },
            DcOp::PutRc => OpSig { num_types: 1, operands: MI_DEF },
            DcOp::GetReg => OpSig { num_types: 1, operands: REG },
            DcOp::PutReg => OpSig { num_types: 1, operands: REG_DEF },
            DcOp::CustomOp => OpSig { num_types: 1, operands: TYPE_MI },
            DcOp::ConstantOp => OpSig { num_types: 1, operands: MI },
            DcOp::MovConstant => OpSig { num_types: 1, operands: POOL },
            DcOp::Implicit => OpSig { num_types: 1, operands: REG },
        }
    }
}

impl IsdOp {
    pub fn sig(self) -> OpSig {
        use OperandClass::*;
        const NONE: &[OperandClass] = &[];
        const ONE: &[OperandClass] = &[DefRef];
        const TWO: &[OperandClass] = &[DefRef, DefRef];
        const ID: &[OperandClass] = &[OpType];
        let operands = match self {
            IsdOp::Ret | IsdOp::Trap => NONE,
            IsdOp::Intrinsic => ID,
            IsdOp::Load
            | IsdOp::Br
            | IsdOp::Call
            | IsdOp::Trunc
            | IsdOp::ZExt
            | IsdOp::SExt
            | IsdOp::Bitcast => ONE,
            _ => TWO,
        };
        OpSig {
            num_types: 1,
            operands,
        }
    }
}

/// Walk the semantic stream of one instruction starting at `offset`,
/// checking that every node consumes exactly its documented type and
/// operand cells and that every def reference points strictly before the
/// referring node. `target_sig` resolves signatures for target-specific
/// opcodes. Returns the number of defs the stream produces.
pub fn validate_stream(
    stream: &[u32],
    offset: usize,
    target_sig: &dyn Fn(u32) -> Option<OpSig>,
) -> SemaResult<usize> {
    let mut idx = offset;
    let mut num_defs = 0usize;
    let malformed = |offset: usize, reason: &str| SemaError::MalformedStream {
        offset,
        reason: reason.to_string(),
    };

    loop {
        let op_off = idx;
        let cell = *stream
            .get(idx)
            .ok_or_else(|| malformed(idx, "stream ends without END_OF_INSTRUCTION"))?;
        idx += 1;

        let op = SemaOp::decode(cell)
            .ok_or_else(|| malformed(op_off, "cell is not a semantic opcode"))?;
        if op == SemaOp::Dc(DcOp::EndOfInstruction) {
            return Ok(num_defs);
        }

        let sig = match op {
            SemaOp::Dc(dc) => dc.sig(),
            SemaOp::Isd(isd) => isd.sig(),
            SemaOp::Target(t) => {
                target_sig(t).ok_or_else(|| malformed(op_off, "unknown target opcode"))?
            }
        };

        let mut node_defs = 0usize;
        for _ in 0..sig.num_types {
            let tcell = *stream
                .get(idx)
                .ok_or_else(|| malformed(idx, "truncated type list"))?;
            let ty = ValueType::from_u32(tcell)
                .ok_or_else(|| malformed(idx, "cell is not a value type"))?;
            if !ty.is_void() {
                node_defs += 1;
            }
            idx += 1;
        }

        for class in sig.operands {
            let ocell = *stream
                .get(idx)
                .ok_or_else(|| malformed(idx, "truncated operand list"))?;
            if *class == OperandClass::DefRef && ocell as usize >= num_defs {
                return Err(malformed(idx, "operand refers to a later def"));
            }
            idx += 1;
        }

        num_defs += node_defs;
    }
}
