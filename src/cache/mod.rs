//! The translation cache manager.
//!
//! Owns the executable-block regions holding translated guest code, maps
//! guest addresses to translated entry points, places newly patched basic
//! blocks, splits already-written sequences when control enters them
//! mid-block, and invalidates translations when guest memory changes.

use std::io;

use nohash_hasher::IntMap;

use crate::address::{Address, AddressRange};
use crate::analysis::{AnalysisFacets, InstAnalysis};
use crate::block::{BlockSource, ExecBlock, SeqKind};
use crate::insn::{InsnInfo, InstMetadata};
use crate::patch::{self, Patch};
use crate::stats::{CacheStatistics, RegionStatistics};
use crate::symbol::SymbolResolver;

pub mod error;
mod region;

pub use self::error::CacheError;
pub use self::region::{BasicBlockInfo, InstLoc, SeqLoc};

use self::region::CacheRegion;

/// How many regions past the binary-search anchor the allocator probes
/// when placing a basic block. Fragmented guest layouts may hide a viable
/// neighbour beyond the window.
const REGION_PROBE: usize = 3;

/// The translation cache manager.
///
/// All operations assume exclusive access; the VM owning the manager
/// serializes calls. Lookups return borrows tied to the manager, so no
/// stale reference can survive an invalidation commit.
pub struct TranslationCache<S>
where
    S: BlockSource,
{
    regions: Vec<CacheRegion<S::Block>>,
    /// Region indices queued for erasure, applied by `flush_commit`.
    flush_list: Vec<usize>,
    /// One-slot region search cache, keyed by the last queried address.
    search_slot: Option<(Address, usize)>,
    /// Host bytes written, across the cache lifetime.
    total_translation: u64,
    /// Guest bytes translated, across the cache lifetime.
    total_translated: u64,
    /// Analyses for instructions outside every region; only dropped by
    /// `flush_commit`.
    stray_analyses: IntMap<Address, InstAnalysis>,
    source: S,
    insn_info: Box<dyn InsnInfo>,
    symbols: Box<dyn SymbolResolver>,
}

impl<S> TranslationCache<S>
where
    S: BlockSource,
{
    /// Both translation counters start at 1 so the expansion ratio is
    /// strictly positive before the first write.
    pub fn new(source: S, insn_info: Box<dyn InsnInfo>, symbols: Box<dyn SymbolResolver>) -> Self {
        Self {
            regions: Vec::new(),
            flush_list: Vec::new(),
            search_slot: None,
            total_translation: 1,
            total_translated: 1,
            stray_analyses: IntMap::default(),
            source,
            insn_info,
            symbols,
        }
    }

    /// Running estimate of host translated bytes per guest translated
    /// byte, used as a budget multiplier by the region allocator.
    pub fn expansion_ratio(&self) -> f64 {
        self.total_translation as f64 / self.total_translated as f64
    }

    /// Index of the region containing `address`, or else of the last
    /// region whose covered range starts at or before it (0 when the
    /// address precedes all regions or no region exists). Callers must
    /// re-check containment before consulting per-region caches.
    fn search_region(&mut self, address: Address) -> usize {
        if self.regions.is_empty() {
            return 0;
        }
        if let Some((cached, idx)) = self.search_slot {
            if cached == address {
                return idx;
            }
        }
        let mut low = 0;
        let mut high = self.regions.len();
        while low + 1 != high {
            let idx = (low + high) / 2;
            if self.regions[idx].covered.start() > address {
                high = idx;
            } else if self.regions[idx].covered.end() <= address {
                low = idx;
            } else {
                log::debug!(
                    "region search: exact match for region {} {}",
                    idx,
                    self.regions[idx].covered
                );
                self.search_slot = Some((address, idx));
                return idx;
            }
        }
        log::debug!(
            "region search: low match for region {} {}",
            low,
            self.regions[low].covered
        );
        self.search_slot = Some((address, low));
        low
    }

    /// The region that should host a basic block spanning `range`:
    /// a region already containing it, else the cheapest-to-extend
    /// neighbour whose byte budget affords the extension, else a fresh
    /// region inserted in sort order.
    fn find_region(&mut self, range: AddressRange) -> usize {
        let low = self.search_region(range.start());
        let ratio = self.expansion_ratio();
        let mut best_region = self.regions.len();
        let mut best_cost = u64::MAX;

        for i in low..(low + REGION_PROBE).min(self.regions.len()) {
            // Easy case: the range is inside one of the regions.
            if self.regions[i].covered.contains_range(range) {
                log::debug!(
                    "basic block {} assigned to region {} {}",
                    range,
                    i,
                    self.regions[i].covered
                );
                self.search_slot = Some((range.start(), i));
                return i;
            }
            // Hard case: cost for the region to cover the extended range.
            let mut cost = 0u64;
            if self.regions[i].covered.end() < range.end() {
                cost += u64::from(range.end() - self.regions[i].covered.end());
            }
            if self.regions[i].covered.start() > range.start() {
                cost += u64::from(self.regions[i].covered.start() - range.start());
            }
            // The extension must fit the region's budget once expanded.
            if ((cost as f64 * ratio) as u64) < self.regions[i].available && cost < best_cost {
                best_cost = cost;
                best_region = i;
            }
        }

        if best_region != self.regions.len() {
            log::debug!(
                "extending region {} {} to cover basic block {}",
                best_region,
                self.regions[best_region].covered,
                range
            );
            self.regions[best_region].covered.cover(range);
            self.search_slot = Some((range.start(), best_region));
            return best_region;
        }

        // No viable candidate: insert a fresh region, preserving sort
        // order.
        let mut insert = low;
        while insert < self.regions.len() && self.regions[insert].covered.start() <= range.start() {
            insert += 1;
        }
        log::debug!("creating region {} to cover basic block {}", insert, range);
        self.regions.insert(insert, CacheRegion::new(range));
        self.search_slot = Some((range.start(), insert));
        insert
    }

    /// Admit a freshly patched basic block, writing it as one or more
    /// sequences into its region's blocks and populating the sequence and
    /// instruction caches. Re-admitting an already translated block is a
    /// no-op.
    pub fn write_basic_block(&mut self, patches: &[Patch]) -> Result<(), CacheError> {
        let Some(range) = patch::block_range(patches) else {
            return Ok(());
        };
        let first = range.start();
        let r = self.find_region(range);

        // Truncate at the first patch whose address is already a sequence
        // entry, so the cached suffix is not re-translated.
        let mut patch_end = patches.len();
        for (i, patch) in patches.iter().enumerate() {
            if self.regions[r].sequence_cache.contains_key(&patch.address()) {
                patch_end = i;
                break;
            }
        }
        if patch_end == 0 {
            log::debug!("cache hit, basic block {} already translated", first);
            return Ok(());
        }
        log::debug!("writing new basic block {}", first);

        self.regions[r].bb_registry.push(BasicBlockInfo {
            start: range.start(),
            end: range.end(),
        });
        let bb_idx = (self.regions[r].bb_registry.len() - 1) as u16;

        let mut translated = 0u64;
        let mut translation = 0u64;
        let mut patch_idx = 0usize;

        while patch_idx < patch_end {
            let mut block_idx = 0usize;
            loop {
                // A region should fit in one block; mispredictions or
                // oversized basic blocks overflow into extra blocks.
                let created = block_idx == self.regions[r].blocks.len();
                if created {
                    let block = self.source.new_block().map_err(CacheError::Alloc)?;
                    self.regions[r].blocks.push(block);
                }
                let mut kind = SeqKind::empty();
                if patch_idx == 0 {
                    kind |= SeqKind::ENTRY;
                }
                if patch_end == patches.len() {
                    kind |= SeqKind::EXIT;
                }
                let Some(write) = self.regions[r].blocks[block_idx]
                    .write_sequence(&patches[patch_idx..patch_end], kind)
                else {
                    if created {
                        // Not even an empty block fits this sequence.
                        return Err(CacheError::SequenceTooLarge(patches[patch_idx].address()));
                    }
                    block_idx += 1;
                    continue;
                };

                let entry = patches[patch_idx].address();
                self.regions[r].sequence_cache.insert(
                    entry,
                    SeqLoc {
                        block: block_idx as u16,
                        seq: write.seq,
                        bb: bb_idx,
                    },
                );

                let start_id = self.regions[r].blocks[block_idx].seq_start(write.seq);
                let end_id = self.regions[r].blocks[block_idx].seq_end(write.seq);
                for id in start_id..=end_id {
                    let address = patches[patch_idx + (id - start_id) as usize].address();
                    self.regions[r].inst_cache.insert(
                        address,
                        InstLoc {
                            block: block_idx as u16,
                            inst: id,
                        },
                    );
                }

                let last_written = &patches[patch_idx + write.patches_written - 1];
                log::debug!(
                    "sequence {}-{} written in block {} of region {} as sequence {}",
                    entry,
                    last_written.address(),
                    block_idx,
                    r,
                    write.seq
                );
                translated += u64::from(last_written.end() - entry);
                translation += write.bytes_written;
                patch_idx += write.patches_written;
                break;
            }
        }

        self.total_translation += translation;
        self.total_translated += translated;
        self.update_region_stats(r, translated);
        Ok(())
    }

    fn update_region_stats(&mut self, r: usize, translated: u64) {
        let ratio = self.expansion_ratio();
        let region = &mut self.regions[r];
        region.translated += translated;
        // Only the principal block funds further extension; the allocator
        // tries to keep each region in a single block.
        region.available = region.blocks[0].epilogue_offset();
        // Space reserved for the untranslated remainder of the covered
        // range.
        let untranslated = region.covered.size().saturating_sub(region.translated);
        let reserved = (untranslated as f64 * ratio) as u64;
        log::debug!(
            "region {} has {} bytes available of which {} are reserved for {} bytes of untranslated code",
            r,
            region.available,
            reserved,
            untranslated
        );
        if reserved > region.available {
            region.available = 0;
        } else {
            region.available -= reserved;
        }
    }

    /// Resolve a guest address to a translated entry point. When the
    /// address lands in the middle of an already-written sequence, the
    /// suffix is promoted to its own sequence over the same bytes, so the
    /// first-translated form keeps its continuation semantics.
    pub fn seq_loc(&mut self, address: impl Into<Address>) -> Option<SeqLoc> {
        let address = address.into();
        let r = self.search_region(address);
        if r >= self.regions.len() || !self.regions[r].covered.contains(address) {
            log::debug!("cache miss for sequence {}", address);
            return None;
        }
        if let Some(loc) = self.regions[r].sequence_cache.get(&address) {
            log::debug!(
                "found sequence {} in block {} as sequence {}",
                address,
                loc.block,
                loc.seq
            );
            return Some(*loc);
        }
        if let Some(inst_loc) = self.regions[r].inst_cache.get(&address).copied() {
            let region = &mut self.regions[r];
            // Identify the enclosing basic block and inherit its end.
            let (existing_seq, existing_start) = {
                let block = &region.blocks[inst_loc.block as usize];
                let seq = block.seq_of(inst_loc.inst);
                (seq, block.inst_address(block.seq_start(seq)))
            };
            let existing_bb = region.sequence_cache[&existing_start].bb;
            let inherited_end = region.bb_registry[existing_bb as usize].end;
            region.bb_registry.push(BasicBlockInfo {
                start: address,
                end: inherited_end,
            });
            let new_seq = region.blocks[inst_loc.block as usize].split_sequence(inst_loc.inst);
            let loc = SeqLoc {
                block: inst_loc.block,
                seq: new_seq,
                bb: (region.bb_registry.len() - 1) as u16,
            };
            region.sequence_cache.insert(address, loc);
            log::debug!(
                "split sequence {} at instruction {} into new sequence {}",
                existing_seq,
                inst_loc.inst,
                new_seq
            );
            return Some(loc);
        }
        log::debug!("cache miss for sequence {}", address);
        None
    }

    /// Resolve a guest address and arm the owning block to enter at the
    /// resolved sequence on its next execution.
    pub fn exec_block(&mut self, address: impl Into<Address>) -> Option<&S::Block> {
        let address = address.into();
        let loc = self.seq_loc(address)?;
        let r = self.search_region(address);
        let block = &mut self.regions[r].blocks[loc.block as usize];
        block.select_seq(loc.seq);
        Some(block)
    }

    /// Guest extent of the basic block entered at `address`. Unlike
    /// [`seq_loc`](Self::seq_loc), a mid-sequence address yields `None`
    /// rather than a split.
    pub fn bb_info(&mut self, address: impl Into<Address>) -> Option<&BasicBlockInfo> {
        let address = address.into();
        let r = self.search_region(address);
        if r >= self.regions.len() || !self.regions[r].covered.contains(address) {
            return None;
        }
        let region = &self.regions[r];
        let loc = region.sequence_cache.get(&address)?;
        Some(&region.bb_registry[loc.bb as usize])
    }

    /// Build or fetch the analysis of one instruction, carrying at least
    /// the requested facets. The returned borrow is owned by the manager
    /// and valid until the next invalidation commit of its region.
    ///
    /// Analyses of instructions outside every region land in a
    /// manager-wide cache that is not consulted on lookup and is only
    /// dropped by [`flush_commit`](Self::flush_commit).
    pub fn analyze_inst_metadata(
        &mut self,
        metadata: &InstMetadata,
        facets: AnalysisFacets,
    ) -> &InstAnalysis {
        let address = metadata.address;
        let r = self.search_region(address);
        let in_region = r < self.regions.len() && self.regions[r].covered.contains(address);

        let hit = in_region
            && self.regions[r]
                .analysis_cache
                .get(&address)
                .map(|analysis| analysis.facets().contains(facets))
                .unwrap_or(false);

        if !hit {
            let analysis = InstAnalysis::build(
                self.insn_info.as_ref(),
                self.symbols.as_ref(),
                metadata,
                facets,
            );
            if in_region {
                log::debug!("analysis of instruction {} cached in region {}", address, r);
                self.regions[r].analysis_cache.insert(address, analysis);
            } else {
                log::debug!("analysis of instruction {} cached outside regions", address);
                self.stray_analyses.insert(address, analysis);
            }
        } else {
            log::debug!("analysis of instruction {} found in region {}", address, r);
        }

        if in_region {
            &self.regions[r].analysis_cache[&address]
        } else {
            &self.stray_analyses[&address]
        }
    }

    /// Queue every region overlapping `range` for erasure. Nothing is
    /// dropped until [`flush_commit`](Self::flush_commit); lookups keep
    /// hitting queued regions in between, and the VM must not run
    /// translated code from them past the commit.
    pub fn clear_cache(&mut self, range: AddressRange) {
        log::debug!("queueing erasure of range {}", range);
        for (i, region) in self.regions.iter().enumerate() {
            if region.covered.overlaps(range) {
                self.flush_list.push(i);
            }
        }
    }

    /// Queue every region overlapping any of `ranges` and reset the
    /// translation counters; a batch of ranges usually comes from an
    /// instrumentation change, after which the expansion estimate starts
    /// over.
    pub fn clear_cache_ranges(&mut self, ranges: impl IntoIterator<Item = AddressRange>) {
        for range in ranges {
            self.clear_cache(range);
        }
        self.total_translated = 1;
        self.total_translation = 1;
        self.search_slot = None;
    }

    /// Erase every region immediately, bypassing the deferred flush list.
    pub fn clear_cache_all(&mut self) {
        log::debug!("erasing all cache");
        while !self.regions.is_empty() {
            self.erase_region(self.regions.len() - 1);
        }
    }

    /// Whether a [`flush_commit`](Self::flush_commit) call would erase
    /// queued regions.
    pub fn flush_pending(&self) -> bool {
        !self.flush_list.is_empty()
    }

    /// Erase the queued regions, highest index first so queued indices
    /// stay valid, then drop the analyses cached outside regions.
    pub fn flush_commit(&mut self) {
        if self.flush_list.is_empty() {
            return;
        }
        log::debug!("flushing queued regions");
        self.flush_list.sort_unstable_by(|a, b| b.cmp(a));
        self.flush_list.dedup();
        let pending = std::mem::take(&mut self.flush_list);
        for r in pending {
            self.erase_region(r);
        }
        self.stray_analyses.clear();
        self.search_slot = None;
    }

    fn erase_region(&mut self, r: usize) {
        log::debug!("erasing region {} {}", r, self.regions[r].covered);
        // Blocks and cached analyses die with the region.
        self.regions.remove(r);
        self.search_slot = None;
    }

    /// Snapshot of cache shape and buffer occupation.
    pub fn statistics(&self) -> CacheStatistics {
        let mut mean_occupation = 0.0f32;
        let mut overflow_count = 0usize;
        let mut regions = Vec::with_capacity(self.regions.len());
        for region in self.regions.iter() {
            let mut occupation = 0.0f32;
            for block in region.blocks.iter() {
                occupation += block.occupation_ratio();
            }
            if region.blocks.len() > 1 {
                overflow_count += 1;
            }
            if !region.blocks.is_empty() {
                occupation /= region.blocks.len() as f32;
            }
            mean_occupation += occupation;
            regions.push(RegionStatistics {
                covered: region.covered,
                blocks: region.blocks.len(),
                occupation,
            });
        }
        if !regions.is_empty() {
            mean_occupation /= regions.len() as f32;
        }
        CacheStatistics {
            regions,
            mean_occupation,
            overflow_count,
        }
    }

    pub fn print_cache_statistics<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.statistics())
    }
}

impl<S> Drop for TranslationCache<S>
where
    S: BlockSource,
{
    fn drop(&mut self) {
        log::debug!("translation cache dropped:\n{}", self.statistics());
    }
}
