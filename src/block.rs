use crate::address::Address;
use crate::patch::Patch;

/// Identifies a sequence within one executable block.
pub type SeqId = u16;

/// Identifies an instruction within one executable block.
pub type InstId = u16;

bitflags::bitflags! {
    /// Position of a sequence relative to its source basic block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct SeqKind: u8 {
        /// The sequence covers the first patch of the block.
        const ENTRY = 0b01;
        /// The sequence covers the last patch of the block.
        const EXIT  = 0b10;
    }
}

/// Result of a successful sequence write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqWrite {
    pub seq: SeqId,
    /// Leading patches of the requested slice that were written.
    pub patches_written: usize,
    /// Host bytes the written patches expanded to.
    pub bytes_written: u64,
}

/// A fixed-capacity host-executable buffer, as required by the translation
/// cache. The concrete type is provided by the assembler layer.
///
/// `write_sequence` must be atomic: a `None` (buffer full) return leaves
/// the block unchanged. A partial write of the leading patches is allowed
/// and reported through [`SeqWrite::patches_written`].
pub trait ExecBlock {
    /// Assemble `patches` into the buffer as a new sequence, or `None` if
    /// not even the first patch fits.
    fn write_sequence(&mut self, patches: &[Patch], kind: SeqKind) -> Option<SeqWrite>;

    /// Promote the suffix of an existing sequence starting at `inst` into
    /// its own sequence, reusing the same bytes.
    fn split_sequence(&mut self, inst: InstId) -> SeqId;

    /// The sequence owning `inst`.
    fn seq_of(&self, inst: InstId) -> SeqId;

    /// First instruction of `seq`.
    fn seq_start(&self, seq: SeqId) -> InstId;

    /// Last instruction of `seq` (inclusive).
    fn seq_end(&self, seq: SeqId) -> InstId;

    /// Guest address `inst` was translated from.
    fn inst_address(&self, inst: InstId) -> Address;

    /// Arm the block to enter at `seq` on its next execution.
    fn select_seq(&mut self, seq: SeqId);

    /// Remaining writable byte budget.
    fn epilogue_offset(&self) -> u64;

    /// Used bytes over capacity.
    fn occupation_ratio(&self) -> f32;
}

/// Factory seam through which the cache grows a region's buffer set.
pub trait BlockSource {
    type Block: ExecBlock;

    fn new_block(&mut self) -> anyhow::Result<Self::Block>;
}
