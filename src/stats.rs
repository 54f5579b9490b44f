//! Allocation and occupancy counters.
//!
//! Adapted from the teacher's per-stride `StrideStats`/`CreatedNodes`
//! pair, collapsed to this crate's single fixed stride-8 m-trie and
//! its companion 1-trie, and extended with a per-mask-length data
//! count and an allocator-failure tally (spec Invariant 4/6, Testable
//! Property 5).

use std::fmt;
use std::mem::size_of;

use crate::mtrie::MBlock;

/// Internal, mutable half of the counters; [`Stats`] is the read-only
/// snapshot handed back to callers.
#[derive(Debug, Default, Clone)]
pub(crate) struct Counters {
    btrie_nodes: usize,
    mtrie_blocks: usize,
    data_per_masklen: [usize; 129],
    alloc_fail: usize,
}

impl Counters {
    pub(crate) fn inc_btrie_nodes(&mut self, n: usize) {
        self.btrie_nodes += n;
    }

    pub(crate) fn dec_btrie_nodes(&mut self, n: usize) {
        debug_assert!(self.btrie_nodes >= n, "btrie node count underflow");
        self.btrie_nodes -= n;
    }

    pub(crate) fn inc_mtrie_blocks(&mut self, n: usize) {
        self.mtrie_blocks += n;
    }

    pub(crate) fn dec_mtrie_blocks(&mut self, n: usize) {
        debug_assert!(self.mtrie_blocks >= n, "mtrie block count underflow");
        self.mtrie_blocks -= n;
    }

    pub(crate) fn inc_data(&mut self, masklen: u8) {
        self.data_per_masklen[masklen as usize] += 1;
    }

    pub(crate) fn dec_data(&mut self, masklen: u8) {
        debug_assert!(
            self.data_per_masklen[masklen as usize] > 0,
            "data count underflow at masklen {masklen}"
        );
        self.data_per_masklen[masklen as usize] -= 1;
    }

    pub(crate) fn record_alloc_fail(&mut self) {
        self.alloc_fail += 1;
    }

    pub(crate) fn btrie_nodes(&self) -> usize {
        self.btrie_nodes
    }

    pub(crate) fn mtrie_blocks(&self) -> usize {
        self.mtrie_blocks
    }

    pub(crate) fn snapshot<P>(&self) -> Stats {
        Stats {
            btrie_nodes: self.btrie_nodes,
            mtrie_blocks: self.mtrie_blocks,
            data_total: self.data_per_masklen.iter().sum(),
            data_per_masklen: self.data_per_masklen.to_vec(),
            alloc_fail: self.alloc_fail,
            mtrie_block_bytes: size_of::<MBlock<P>>(),
        }
    }
}

/// A point-in-time, read-only view of a table's allocation counters.
#[derive(Debug, Clone)]
pub struct Stats {
    /// Live 1-trie nodes.
    pub btrie_nodes: usize,
    /// Live m-trie blocks (including the permanent root block).
    pub mtrie_blocks: usize,
    /// Total number of records stored, across all mask lengths.
    pub data_total: usize,
    /// Record count indexed by mask length, `0..=128`.
    pub data_per_masklen: Vec<usize>,
    /// Allocator failures observed by mutating operations so far.
    pub alloc_fail: usize,
    /// `size_of::<MBlock<P>>()` for the table's payload type, handy
    /// for estimating m-trie memory usage as `mtrie_blocks * this`.
    pub mtrie_block_bytes: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "btrie_nodes: {}, mtrie_blocks: {} ({}k), data_total: {}, alloc_fail: {}",
            self.btrie_nodes,
            self.mtrie_blocks,
            (self.mtrie_blocks * self.mtrie_block_bytes) / 1024,
            self.data_total,
            self.alloc_fail,
        )
    }
}
