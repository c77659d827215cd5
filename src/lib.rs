//! Translation cache management for the Ostinato dynamic binary
//! instrumentation engine.
//!
//! The engine intercepts guest machine code at runtime, rewrites it into
//! instrumented form, and stores the rewritten code in host-executable
//! buffers. This crate owns those buffers: it maps guest addresses to
//! translated entry points, places newly patched basic blocks, splits
//! already-written sequences when control enters them mid-block,
//! invalidates translations when guest memory changes, and caches
//! per-instruction analyses.
//!
//! The patcher, assembler, disassembler tables, and host-loader symbol
//! resolution are external collaborators, reached through the
//! [`ExecBlock`]/[`BlockSource`], [`InsnInfo`], and [`SymbolResolver`]
//! seams.

pub mod address;
pub mod analysis;
pub mod block;
pub mod cache;
pub mod insn;
pub mod patch;
pub mod stats;
pub mod symbol;

pub use self::address::{Address, AddressRange};
pub use self::analysis::{
    AnalysisFacets, InstAnalysis, OperandAnalysis, OperandType, RegisterAccess,
};
pub use self::block::{BlockSource, ExecBlock, InstId, SeqId, SeqKind, SeqWrite};
pub use self::cache::{BasicBlockInfo, CacheError, InstLoc, SeqLoc, TranslationCache};
pub use self::insn::{
    InsnDescriptor, InsnFlags, InsnInfo, InstMetadata, MachineInst, MachineOperand, Opcode,
    OperandInfo, OperandKind, RegClassId, RegId,
};
pub use self::patch::Patch;
pub use self::stats::{CacheStatistics, RegionStatistics};
pub use self::symbol::{NoSymbols, ResolvedSymbol, SymbolResolver};
