use nohash_hasher::IntMap;

use crate::address::{Address, AddressRange};
use crate::analysis::InstAnalysis;
use crate::block::{InstId, SeqId};

/// Translated entry point for a guest address: block index within the
/// owning region, sequence id within that block, and index into the
/// region's basic-block registry.
///
/// Locations are index-based rather than reference-based: regions own
/// their blocks in growable containers, so the cache resolves a location
/// back to a buffer on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqLoc {
    pub block: u16,
    pub seq: SeqId,
    pub bb: u16,
}

/// Location of one translated guest instruction within a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstLoc {
    pub block: u16,
    pub inst: InstId,
}

/// Guest extent of an original or split-promoted basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlockInfo {
    pub start: Address,
    pub end: Address,
}

/// The unit of cache organization: one covered guest range and the
/// executable blocks its translations live in. Sequences, instruction
/// locations, and analyses die with the region.
pub(crate) struct CacheRegion<B> {
    /// Guest range logically owned by this region; regions never overlap.
    pub(crate) covered: AddressRange,
    /// Guest bytes translated into this region so far.
    pub(crate) translated: u64,
    /// Writable byte budget left in the principal block after reserving
    /// space for the untranslated remainder of `covered`.
    pub(crate) available: u64,
    /// Principal block plus overflow blocks.
    pub(crate) blocks: Vec<B>,
    pub(crate) sequence_cache: IntMap<Address, SeqLoc>,
    pub(crate) inst_cache: IntMap<Address, InstLoc>,
    pub(crate) bb_registry: Vec<BasicBlockInfo>,
    pub(crate) analysis_cache: IntMap<Address, InstAnalysis>,
}

impl<B> CacheRegion<B> {
    pub(crate) fn new(covered: AddressRange) -> Self {
        Self {
            covered,
            translated: 0,
            available: 0,
            blocks: Vec::new(),
            sequence_cache: IntMap::default(),
            inst_cache: IntMap::default(),
            bb_registry: Vec::new(),
            analysis_cache: IntMap::default(),
        }
    }
}
