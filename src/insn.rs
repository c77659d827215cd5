use smallvec::SmallVec;
use ustr::Ustr;

use crate::address::Address;

/// Target-specific opcode number assigned by the disassembler layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Opcode(pub u32);

/// Target-specific register number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RegId(pub u32);

/// Target-specific register class number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct RegClassId(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineOperand {
    Register(RegId),
    Immediate(i64),
}

/// A decoded guest instruction, operands in the disassembler's order.
#[derive(Debug, Clone)]
pub struct MachineInst {
    pub opcode: Opcode,
    pub operands: SmallVec<[MachineOperand; 4]>,
}

bitflags::bitflags! {
    /// Structural descriptor flags for an opcode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct InsnFlags: u16 {
        const BRANCH     = 0b0000_0001;
        const CALL       = 0b0000_0010;
        const RETURN     = 0b0000_0100;
        const COMPARE    = 0b0000_1000;
        const PREDICABLE = 0b0001_0000;
        const MAY_LOAD   = 0b0010_0000;
        const MAY_STORE  = 0b0100_0000;
        /// The instruction takes a variable operand list; every register
        /// operand is treated as a def.
        const VARIADIC   = 0b1000_0000;
    }
}

/// Role of one explicit operand slot, as described by the descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    Register,
    Immediate,
    Predicate,
    /// Anything else (memory micro-operands, target-custom slots); skipped
    /// by operand analysis.
    Other,
}

/// Static description of one explicit operand slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandInfo {
    pub kind: OperandKind,
    /// Register class, when known and not resolved through a lookup table.
    pub class: Option<RegClassId>,
}

/// Static descriptor for an opcode, from the disassembler's tables.
#[derive(Debug, Clone)]
pub struct InsnDescriptor {
    pub flags: InsnFlags,
    /// Leading explicit operands that are defs.
    pub num_defs: u8,
    pub operands: Vec<OperandInfo>,
    pub implicit_defs: Vec<RegId>,
    pub implicit_uses: Vec<RegId>,
}

impl InsnDescriptor {
    pub fn is_variadic(&self) -> bool {
        self.flags.contains(InsnFlags::VARIADIC)
    }
}

/// Metadata the engine records for one translated guest instruction.
#[derive(Debug, Clone)]
pub struct InstMetadata {
    pub address: Address,
    /// Guest instruction size in bytes.
    pub size: u64,
    /// Whether the patched form of the instruction writes the program
    /// counter.
    pub modify_pc: bool,
    pub inst: MachineInst,
}

/// Queries over the guest ISA's instruction descriptors and register file,
/// provided by the disassembler layer.
pub trait InsnInfo {
    fn descriptor(&self, opcode: Opcode) -> &InsnDescriptor;

    fn mnemonic(&self, opcode: Opcode) -> Ustr;

    fn register_name(&self, reg: RegId) -> Ustr;

    /// The machine-context general-purpose register table, in context
    /// order.
    fn gprs(&self) -> &[RegId];

    /// Whether `reg` is `gpr` itself or one of its sub-registers.
    fn is_sub_register_eq(&self, gpr: RegId, reg: RegId) -> bool;

    /// Byte size and offset of `reg` within `gpr`, for a proper
    /// sub-register.
    fn sub_register_layout(&self, gpr: RegId, reg: RegId) -> Option<(u16, u16)>;

    /// Byte size of a register class.
    fn register_class_size(&self, class: RegClassId) -> Option<u16>;

    /// Render `inst` to its assembly text.
    fn disassemble(&self, inst: &MachineInst, address: Address) -> String;
}
