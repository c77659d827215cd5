//! Lazily built, facet-gated metadata about individual guest instructions.

use smallvec::SmallVec;
use ustr::Ustr;

use crate::address::Address;
use crate::insn::{
    InsnDescriptor, InsnFlags, InsnInfo, InstMetadata, MachineOperand, OperandKind, RegId,
};
use crate::symbol::SymbolResolver;

bitflags::bitflags! {
    /// Facets of an instruction analysis. A cached analysis is reused only
    /// when its facets are a superset of the requested ones.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct AnalysisFacets: u8 {
        const DISASSEMBLY = 0b0001;
        const INSTRUCTION = 0b0010;
        const OPERANDS    = 0b0100;
        const SYMBOL      = 0b1000;
    }
}

bitflags::bitflags! {
    /// How an operand touches its register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct RegisterAccess: u8 {
        const READ  = 0b01;
        const WRITE = 0b10;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandType {
    /// A register backed by a machine-context general-purpose slot.
    Gpr,
    Imm,
    Pred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperandAnalysis {
    pub kind: OperandType,
    /// Register number or immediate value.
    pub value: u64,
    /// Operand size in bytes.
    pub size: u16,
    /// Byte offset within the full-width register, for sub-registers.
    pub reg_offset: u16,
    /// Index of the backing slot in the machine context.
    pub reg_ctx_idx: u16,
    pub reg_name: Option<Ustr>,
    pub access: RegisterAccess,
}

/// Cached analysis of one guest instruction. Which fields are meaningful
/// depends on the facets it was built with; the rest stay at their zero
/// values.
#[derive(Debug, Clone)]
pub struct InstAnalysis {
    facets: AnalysisFacets,
    disassembly: Option<String>,
    address: Address,
    size: u64,
    affects_control_flow: bool,
    flags: InsnFlags,
    mnemonic: Option<Ustr>,
    operands: SmallVec<[OperandAnalysis; 4]>,
    symbol: Option<Ustr>,
    symbol_offset: u64,
    module: Option<Ustr>,
}

impl InstAnalysis {
    pub(crate) fn build(
        info: &dyn InsnInfo,
        symbols: &dyn SymbolResolver,
        metadata: &InstMetadata,
        facets: AnalysisFacets,
    ) -> Self {
        let mut analysis = InstAnalysis {
            facets,
            disassembly: None,
            address: Address::default(),
            size: 0,
            affects_control_flow: false,
            flags: InsnFlags::empty(),
            mnemonic: None,
            operands: SmallVec::new(),
            symbol: None,
            symbol_offset: 0,
            module: None,
        };

        let desc = info.descriptor(metadata.inst.opcode);

        if facets.contains(AnalysisFacets::DISASSEMBLY) {
            analysis.disassembly = Some(info.disassemble(&metadata.inst, metadata.address));
        }

        if facets.contains(AnalysisFacets::INSTRUCTION) {
            analysis.address = metadata.address;
            analysis.size = metadata.size;
            analysis.affects_control_flow = metadata.modify_pc;
            analysis.flags = desc.flags;
            analysis.mnemonic = Some(info.mnemonic(metadata.inst.opcode));
        }

        if facets.contains(AnalysisFacets::OPERANDS) {
            analyse_operands(&mut analysis, info, metadata, desc);
        }

        if facets.contains(AnalysisFacets::SYMBOL) {
            if let Some(resolved) = symbols.resolve(metadata.address) {
                if let Some(name) = resolved.name {
                    analysis.symbol = Some(name);
                    analysis.symbol_offset = u64::from(metadata.address - resolved.base);
                }
                if let Some(module) = resolved.module {
                    let base = module.rsplit('/').next().unwrap_or(module.as_str());
                    analysis.module = Some(Ustr::from(base));
                }
            }
        }

        analysis
    }

    pub fn facets(&self) -> AnalysisFacets {
        self.facets
    }

    pub fn disassembly(&self) -> Option<&str> {
        self.disassembly.as_deref()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn affects_control_flow(&self) -> bool {
        self.affects_control_flow
    }

    pub fn is_branch(&self) -> bool {
        self.flags.contains(InsnFlags::BRANCH)
    }

    pub fn is_call(&self) -> bool {
        self.flags.contains(InsnFlags::CALL)
    }

    pub fn is_return(&self) -> bool {
        self.flags.contains(InsnFlags::RETURN)
    }

    pub fn is_compare(&self) -> bool {
        self.flags.contains(InsnFlags::COMPARE)
    }

    pub fn is_predicable(&self) -> bool {
        self.flags.contains(InsnFlags::PREDICABLE)
    }

    pub fn may_load(&self) -> bool {
        self.flags.contains(InsnFlags::MAY_LOAD)
    }

    pub fn may_store(&self) -> bool {
        self.flags.contains(InsnFlags::MAY_STORE)
    }

    pub fn mnemonic(&self) -> Option<Ustr> {
        self.mnemonic
    }

    pub fn operands(&self) -> &[OperandAnalysis] {
        &self.operands
    }

    pub fn symbol(&self) -> Option<Ustr> {
        self.symbol
    }

    /// Byte offset of the instruction from the start of its symbol.
    pub fn symbol_offset(&self) -> u64 {
        self.symbol_offset
    }

    /// Basename of the object file hosting the instruction.
    pub fn module(&self) -> Option<Ustr> {
        self.module
    }
}

/// Describe `reg` against the machine context: name, backing slot, and
/// size/offset when it is a sub-register of a context GPR. Size stays 0
/// when the register has no backing slot.
fn analyse_register(info: &dyn InsnInfo, reg: RegId) -> OperandAnalysis {
    let mut opa = OperandAnalysis {
        kind: OperandType::Gpr,
        value: reg.0 as u64,
        size: 0,
        reg_offset: 0,
        reg_ctx_idx: 0,
        reg_name: Some(info.register_name(reg)),
        access: RegisterAccess::empty(),
    };
    for (slot, gpr) in info.gprs().iter().enumerate() {
        if info.is_sub_register_eq(*gpr, reg) {
            if *gpr != reg {
                if let Some((size, offset)) = info.sub_register_layout(*gpr, reg) {
                    opa.size = size;
                    opa.reg_offset = offset;
                }
            } else {
                opa.size = std::mem::size_of::<u64>() as u16;
            }
            opa.reg_ctx_idx = slot as u16;
            break;
        }
    }
    opa
}

/// Merge the last pushed operand into an earlier one naming the same
/// register slice, OR-ing the access bits.
fn try_merge_last(operands: &mut SmallVec<[OperandAnalysis; 4]>) {
    let last_idx = operands.len() - 1;
    let last = operands[last_idx];
    for i in 0..last_idx {
        let prev = &operands[i];
        if prev.kind == last.kind
            && prev.reg_name == last.reg_name
            && prev.size == last.size
            && prev.reg_offset == last.reg_offset
        {
            operands[i].access |= last.access;
            operands.pop();
            break;
        }
    }
}

fn analyse_implicit(
    analysis: &mut InstAnalysis,
    info: &dyn InsnInfo,
    regs: &[RegId],
    access: RegisterAccess,
) {
    for reg in regs {
        let mut opa = analyse_register(info, *reg);
        // only GPR-backed registers are reported
        if opa.size == 0 {
            continue;
        }
        opa.access = access;
        analysis.operands.push(opa);
        try_merge_last(&mut analysis.operands);
    }
}

fn analyse_operands(
    analysis: &mut InstAnalysis,
    info: &dyn InsnInfo,
    metadata: &InstMetadata,
    desc: &InsnDescriptor,
) {
    let inst = &metadata.inst;
    let num_explicit = inst.operands.len();
    if num_explicit + desc.implicit_defs.len() + desc.implicit_uses.len() == 0 {
        return;
    }

    let defs_end = if desc.is_variadic() {
        num_explicit
    } else {
        desc.num_defs as usize
    };

    for (idx, op) in inst.operands.iter().enumerate() {
        let Some(opinfo) = desc.operands.get(idx) else {
            continue;
        };
        match *op {
            MachineOperand::Register(reg) => {
                // validate that this is really a register operand, not
                // something else (memory access)
                if opinfo.kind != OperandKind::Register {
                    continue;
                }
                let mut opa = analyse_register(info, reg);
                if opa.size == 0 {
                    continue;
                }
                // update register size using the operand's class
                if let Some(class) = opinfo.class {
                    if let Some(size) = info.register_class_size(class) {
                        opa.size = size;
                    }
                }
                opa.access = if idx < defs_end {
                    RegisterAccess::WRITE
                } else {
                    RegisterAccess::READ
                };
                analysis.operands.push(opa);
                try_merge_last(&mut analysis.operands);
            }
            MachineOperand::Immediate(value) => {
                let kind = match opinfo.kind {
                    OperandKind::Predicate => OperandType::Pred,
                    OperandKind::Immediate => OperandType::Imm,
                    _ => continue,
                };
                analysis.operands.push(OperandAnalysis {
                    kind,
                    value: value as u64,
                    size: std::mem::size_of::<u64>() as u16,
                    reg_offset: 0,
                    reg_ctx_idx: 0,
                    reg_name: None,
                    access: RegisterAccess::empty(),
                });
            }
        }
    }

    analyse_implicit(analysis, info, &desc.implicit_defs, RegisterAccess::WRITE);
    analyse_implicit(analysis, info, &desc.implicit_uses, RegisterAccess::READ);
}
