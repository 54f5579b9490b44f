//! C6 — the table facade.
//!
//! Ties the 1-trie, the m-trie, and the allocation counters together
//! behind the public operations a caller actually uses. Mutating
//! operations (`add`, `update`, `del`, `update_default`,
//! `delete_default`, `destroy`) are `&mut self`: the borrow checker is
//! what enforces this crate's single-writer contract, so there is no
//! internal locking to get wrong. `search` and `find_exact` take
//! `&self` and may run on any number of threads at once.

use crate::addr::Addr;
use crate::alloc;
use crate::btrie::{self, AddPathStatus, BNode};
use crate::delete;
use crate::error::{TableError, TableResult};
use crate::expand;
use crate::mtrie::{free_block_recursive, MBlock};
use crate::prefix::{MAX_MASKLEN, NAME_LEN};
use crate::stats::{Counters, Stats};

/// A longest-prefix-match table over payloads of type `P`.
pub struct Table<P> {
    name: String,
    pub(crate) btrie_root: Box<BNode<P>>,
    pub(crate) mtrie_root: Box<MBlock<P>>,
    default_payload: Option<P>,
    default_addr: Addr,
    default_masklen: u8,
    pub(crate) counters: Counters,
}

impl<P: Copy + PartialEq> Table<P> {
    /// Allocates a table: an empty 1-trie root and the level-0 m-trie
    /// block. If either allocation fails the one that did succeed is
    /// dropped and the error is returned; no partial table escapes.
    pub fn create(name: &str) -> TableResult<Self> {
        let name: String = name.chars().take(NAME_LEN - 1).collect();
        let btrie_root = alloc::try_alloc(BNode::empty())?;
        let mtrie_root = match alloc::try_alloc(MBlock::zeroed()) {
            Ok(block) => block,
            Err(err) => {
                drop(btrie_root);
                return Err(err);
            }
        };
        let mut counters = Counters::default();
        counters.inc_btrie_nodes(1);
        counters.inc_mtrie_blocks(1);
        log::debug!("table {name:?} created");
        Ok(Table {
            name,
            btrie_root,
            mtrie_root,
            default_payload: None,
            default_addr: Addr::zero(),
            default_masklen: 0,
            counters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frees the m-trie, then the 1-trie, logging the reclaimed counts
    /// as a cross-check against the live counters.
    pub fn destroy(self) {
        let Table {
            name,
            btrie_root,
            mtrie_root,
            counters,
            ..
        } = self;
        let freed_blocks = free_block_recursive(mtrie_root);
        let freed_nodes = btrie::destroy_subtree(btrie_root);
        log::debug!(
            "table {name:?} destroyed: freed {freed_nodes} btrie nodes (tracked {}), {freed_blocks} mtrie blocks (tracked {})",
            counters.btrie_nodes(),
            counters.mtrie_blocks(),
        );
    }

    fn validate(addr: &Addr, masklen: u8) -> TableResult<Addr> {
        let _ = addr;
        if masklen > MAX_MASKLEN {
            return Err(TableError::Invalid("masklen exceeds 128 bits"));
        }
        Ok(addr.masked(masklen))
    }

    /// Inserts `(addr, masklen) -> payload`. `EXISTS` if the identical
    /// payload is already stored there, `CONFLICT` if a different one
    /// is (no side effect either way).
    pub fn add(&mut self, addr: Addr, masklen: u8, payload: P) -> TableResult<()> {
        let addr = Self::validate(&addr, masklen)?;

        if masklen == 0 {
            return match self.btrie_root.payload {
                Some(existing) if existing == payload => Err(TableError::Exists),
                Some(_) => Err(TableError::Conflict),
                None => {
                    self.btrie_root.payload = Some(payload);
                    self.counters.inc_data(0);
                    Ok(())
                }
            };
        }

        let (status, anchor, created) = match btrie::add_path(&mut self.btrie_root, &addr, masklen) {
            Ok(v) => v,
            Err(err) => {
                self.counters.record_alloc_fail();
                return Err(err);
            }
        };
        if matches!(status, AddPathStatus::Inserted) {
            self.counters.inc_btrie_nodes(created);
        }

        let node = btrie::find_node_mut(&mut self.btrie_root, &addr, masklen)
            .expect("add_path just ensured this path exists");
        match node.payload {
            Some(existing) if existing == payload => {
                return Err(TableError::Exists);
            }
            Some(_) => {
                return Err(TableError::Conflict);
            }
            None => {
                node.payload = Some(payload);
            }
        }

        let node = btrie::find_node(&self.btrie_root, &addr, masklen).unwrap();
        let mut scratch = addr;
        if let Err(err) = expand::expand(&mut self.mtrie_root, &mut scratch, masklen - 1, node, Some(payload)) {
            // Roll the 1-trie back to how we found it: undo the
            // payload we just set, and detach whatever chain add_path
            // appended for this call.
            let node = btrie::find_node_mut(&mut self.btrie_root, &addr, masklen).unwrap();
            node.payload = None;
            if let Some(anchor) = anchor {
                let freed = btrie::detach_and_free_chain(&mut self.btrie_root, &addr, anchor);
                self.counters.dec_btrie_nodes(freed);
            }
            self.counters.record_alloc_fail();
            return Err(err);
        }
        self.counters.inc_data(masklen);
        Ok(())
    }

    /// Overwrites the payload of an already-present prefix and
    /// re-derives its m-trie coverage. `NOTFOUND` if the prefix isn't
    /// present.
    pub fn update(&mut self, addr: Addr, masklen: u8, payload: P) -> TableResult<()> {
        let addr = Self::validate(&addr, masklen)?;

        if masklen == 0 {
            if self.btrie_root.payload.is_none() {
                return Err(TableError::NotFound);
            }
            self.btrie_root.payload = Some(payload);
            return Ok(());
        }

        {
            let node = btrie::find_node_mut(&mut self.btrie_root, &addr, masklen)
                .ok_or(TableError::NotFound)?;
            if node.payload.is_none() {
                return Err(TableError::NotFound);
            }
            node.payload = Some(payload);
        }
        let node = btrie::find_node(&self.btrie_root, &addr, masklen).unwrap();
        let mut scratch = addr;
        let result = expand::expand(&mut self.mtrie_root, &mut scratch, masklen - 1, node, Some(payload));
        if result.is_err() {
            self.counters.record_alloc_fail();
        }
        result
    }

    /// The payload stored for exactly this prefix, if any.
    pub fn find_exact(&self, addr: Addr, masklen: u8) -> Option<P> {
        if masklen > MAX_MASKLEN {
            return None;
        }
        let addr = addr.masked(masklen);
        btrie::find_node(&self.btrie_root, &addr, masklen).and_then(|n| n.payload)
    }

    /// The datapath: longest matching prefix for `addr`, or the
    /// default payload. The second element of the tuple reports
    /// whether the default was used.
    pub fn search(&self, addr: &Addr) -> (Option<P>, bool) {
        let mut best: Option<P> = None;
        let mut block: &MBlock<P> = &self.mtrie_root;
        for level in 0..crate::addr::LEVEL_MAX as u8 {
            let entry = &block.entries[addr.byte(level) as usize];
            if entry.payload.is_some() {
                best = entry.payload;
            }
            match entry.next.as_deref() {
                Some(next) => block = next,
                None => break,
            }
        }
        match best {
            Some(p) => (Some(p), false),
            None => (self.default_payload, true),
        }
    }

    /// Copies an already-present prefix's payload into the default
    /// slot. `NOTFOUND` if no such prefix exists.
    pub fn update_default(&mut self, addr: Addr, masklen: u8) -> TableResult<()> {
        let addr = Self::validate(&addr, masklen)?;
        let payload = btrie::find_node(&self.btrie_root, &addr, masklen)
            .and_then(|n| n.payload)
            .ok_or(TableError::NotFound)?;
        self.default_payload = Some(payload);
        self.default_addr = addr;
        self.default_masklen = masklen;
        Ok(())
    }

    /// Clears the default slot. The 1-trie is untouched; if the
    /// default's source prefix is later deleted without calling this
    /// first, the default slot is left dangling per the documented
    /// contract.
    pub fn delete_default(&mut self) -> TableResult<()> {
        if self.default_payload.is_none() {
            return Err(TableError::NotFound);
        }
        self.default_payload = None;
        self.default_addr = Addr::zero();
        self.default_masklen = 0;
        Ok(())
    }

    /// Deletes `(addr, masklen)`. `masklen == 0` just nulls the root
    /// payload; otherwise see [`crate::delete::delete`].
    pub fn del(&mut self, addr: &Addr, masklen: u8) -> TableResult<()> {
        if masklen > MAX_MASKLEN {
            return Err(TableError::Invalid("masklen exceeds 128 bits"));
        }
        let addr = addr.masked(masklen);
        delete::delete(self, &addr, masklen)
    }

    /// Pre-order walk over every stored prefix, followed by the
    /// default entry if one is set. `cb` returning non-zero aborts the
    /// walk and surfaces as `EXOTIC`.
    pub fn walk(&self, mut cb: impl FnMut(&Addr, u8, P) -> i32) -> TableResult<()> {
        let mut scratch = Addr::zero();
        let aborted = btrie::dfs_walk(&self.btrie_root, &mut scratch, 0, &mut cb);
        if aborted {
            return Err(TableError::Exotic);
        }
        if let Some(payload) = self.default_payload {
            if cb(&self.default_addr, self.default_masklen, payload) != 0 {
                return Err(TableError::Exotic);
            }
        }
        Ok(())
    }

    /// A point-in-time snapshot of the table's allocation counters.
    pub fn statistics(&self) -> Stats {
        self.counters.snapshot::<P>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn create_allocates_both_roots() {
        let t: Table<u32> = Table::create("t").unwrap();
        let stats = t.statistics();
        assert_eq!(stats.btrie_nodes, 1);
        assert_eq!(stats.mtrie_blocks, 1);
    }

    #[test]
    fn add_exists_then_conflict() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let a = Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0));
        t.add(a, 8, 1).unwrap();
        assert_eq!(t.add(a, 8, 1), Err(TableError::Exists));
        assert_eq!(t.add(a, 8, 2), Err(TableError::Conflict));
    }

    #[test]
    fn scenario_s1_longest_match_and_default() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let net10 = Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0));
        let net10_1 = Addr::from_ipv4(Ipv4Addr::new(10, 1, 0, 0));
        t.add(net10, 8, 100).unwrap();
        t.add(net10_1, 16, 200).unwrap();

        let probe = Addr::from_ipv4(Ipv4Addr::new(10, 1, 2, 3));
        assert_eq!(t.search(&probe), (Some(200), false));

        let probe2 = Addr::from_ipv4(Ipv4Addr::new(10, 2, 0, 1));
        assert_eq!(t.search(&probe2), (Some(100), false));

        let probe3 = Addr::from_ipv4(Ipv4Addr::new(11, 0, 0, 0));
        assert_eq!(t.search(&probe3), (None, true));
    }

    #[test]
    fn scenario_s4_sibling_subtrees_do_not_leak_scratch_bits() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let a = Addr::from_ipv4(Ipv4Addr::new(128, 0, 0, 0));
        let b = Addr::from_ipv4(Ipv4Addr::new(64, 0, 0, 0));
        t.add(a, 2, 1).unwrap();
        t.add(b, 3, 2).unwrap();

        assert_eq!(t.search(&Addr::from_ipv4(Ipv4Addr::new(128, 0, 0, 0))), (Some(1), false));
        assert_eq!(t.search(&Addr::from_ipv4(Ipv4Addr::new(96, 0, 0, 0))), (Some(2), false));
        assert_eq!(t.search(&Addr::from_ipv4(Ipv4Addr::new(0, 0, 0, 0))), (None, true));
    }

    #[test]
    fn zero_route_requires_promotion_to_surface_in_search() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        t.add(Addr::zero(), 0, 999).unwrap();
        assert_eq!(t.search(&Addr::from_ipv4(Ipv4Addr::new(200, 0, 0, 0))), (None, true));
        t.update_default(Addr::zero(), 0).unwrap();
        assert_eq!(t.search(&Addr::from_ipv4(Ipv4Addr::new(200, 0, 0, 0))), (Some(999), true));
    }

    #[test]
    fn update_requires_existing_prefix() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let a = Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(t.update(a, 8, 1), Err(TableError::NotFound));
        t.add(a, 8, 1).unwrap();
        t.update(a, 8, 2).unwrap();
        assert_eq!(t.find_exact(a, 8), Some(2));
    }

    #[test]
    fn walk_visits_every_prefix_and_the_default() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let a = Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0));
        let b = Addr::from_ipv4(Ipv4Addr::new(192, 168, 0, 0));
        t.add(a, 8, 1).unwrap();
        t.add(b, 16, 2).unwrap();
        t.update_default(a, 8).unwrap();

        let mut seen = Vec::new();
        t.walk(|addr, masklen, payload| {
            seen.push((*addr, masklen, payload));
            0
        })
        .unwrap();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn walk_abort_surfaces_as_exotic() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        t.add(Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0)), 8, 1).unwrap();
        let result = t.walk(|_, _, _| 1);
        assert_eq!(result, Err(TableError::Exotic));
    }

    /// Testable Property 5 (rollback): a failure on the very first
    /// allocation `add` needs — a fresh 1-trie node — must leave the
    /// table exactly as it was.
    #[test]
    fn add_rolls_back_on_first_btrie_allocation_failure() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let before = t.statistics().btrie_nodes;
        alloc::fault::arm(0);
        let result = t.add(Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0)), 24, 1);
        alloc::fault::disarm();

        assert_eq!(result, Err(TableError::Resources));
        assert_eq!(t.statistics().btrie_nodes, before);
        assert_eq!(t.find_exact(Addr::from_ipv4(Ipv4Addr::new(10, 0, 0, 0)), 24), None);
        assert_eq!(t.statistics().alloc_fail, 1);
    }

    /// A failure inside expansion, after the 1-trie path was already
    /// appended, must detach-and-free that chain rather than leaving
    /// orphaned nodes with no payload and no m-trie coverage.
    #[test]
    fn add_rolls_back_btrie_chain_on_expansion_allocation_failure() {
        let mut t: Table<u32> = Table::create("t").unwrap();
        let addr = Addr::from_ipv4(Ipv4Addr::new(10, 20, 30, 0));

        // /24 on a fresh trie appends 24 btrie nodes before expansion
        // runs; expansion then needs 2 new m-trie blocks (levels 1, 2)
        // since bitpos=23 is a stride boundary. Fail the first of those.
        alloc::fault::arm(24);
        let result = t.add(addr, 24, 1);
        alloc::fault::disarm();

        assert_eq!(result, Err(TableError::Resources));
        let stats = t.statistics();
        assert_eq!(stats.btrie_nodes, 1);
        assert_eq!(stats.mtrie_blocks, 1);
        assert_eq!(stats.data_total, 0);
        assert_eq!(stats.alloc_fail, 1);
        assert_eq!(t.find_exact(addr, 24), None);
        assert_eq!(t.search(&addr), (None, true));
    }
}
