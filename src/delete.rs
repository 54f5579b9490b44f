//! C5 — the deletion engine.
//!
//! Deleting a prefix has to repaint whatever coverage it was providing
//! in the m-trie (either by re-running expansion for a less-specific
//! restorer, erasing with NULL, or the fast `zero_out` path) and then
//! prune any 1-trie nodes — and, at stride boundaries, m-trie blocks —
//! that deletion just made dead weight.

use crate::addr::Addr;
use crate::btrie::{self, BNode};
use crate::error::TableResult;
use crate::expand;
use crate::mtrie::{pattern_write, MBlock};
use crate::stats::Counters;
use crate::table::Table;

pub(crate) fn delete<P: Copy>(table: &mut Table<P>, addr: &Addr, masklen: u8) -> TableResult<()> {
    if masklen == 0 {
        return delete_zero_route(table);
    }

    let mut node: &BNode<P> = &table.btrie_root;
    let mut lsr_depth: Option<u8> = None;
    let mut found = true;
    for depth in 0..masklen {
        if depth > 0 && node.payload.is_some() {
            lsr_depth = Some(depth);
        }
        let bit = addr.bit(depth) as usize;
        match node.children[bit].as_deref() {
            Some(child) => node = child,
            None => {
                found = false;
                break;
            }
        }
    }
    if !found || node.payload.is_none() {
        return Err(crate::error::TableError::NotFound);
    }
    let has_live_descendants = node.children[0].is_some() || node.children[1].is_some();

    {
        let target = btrie::find_node_mut(&mut table.btrie_root, addr, masklen)
            .expect("target located by the walk above must be reachable");
        target.payload = None;
    }
    table.counters.dec_data(masklen);

    if let Some(lsr_depth) = lsr_depth {
        if let Err(err) = repaint_from_lsr(table, addr, masklen, lsr_depth) {
            table.counters.record_alloc_fail();
            return Err(err);
        }
    } else if has_live_descendants {
        let target_node = btrie::find_node(&table.btrie_root, addr, masklen)
            .expect("target node still present after only nulling its payload");
        let mut scratch = *addr;
        if let Err(err) = expand::expand(&mut table.mtrie_root, &mut scratch, masklen - 1, target_node, None) {
            table.counters.record_alloc_fail();
            return Err(err);
        }
    } else {
        zero_out(&mut table.mtrie_root, addr, masklen);
    }

    let start_depth = lsr_depth.unwrap_or(0);
    prune(table, addr, start_depth, masklen);

    Ok(())
}

fn delete_zero_route<P: Copy>(table: &mut Table<P>) -> TableResult<()> {
    if table.btrie_root.payload.is_none() {
        return Err(crate::error::TableError::NotFound);
    }
    table.btrie_root.payload = None;
    table.counters.dec_data(0);
    Ok(())
}

fn repaint_from_lsr<P: Copy>(
    table: &mut Table<P>,
    addr: &Addr,
    masklen: u8,
    lsr_depth: u8,
) -> TableResult<()> {
    // Same-block test, expressed consistently in "last covered bit
    // index" terms on both sides (the spec's literal `LSR_depth / 8`
    // reads as an off-by-one against `(masklen - 1) / 8`; see
    // DESIGN.md for the resolved Open Question).
    let same_block = (masklen - 1) / 8 == (lsr_depth - 1) / 8;
    let mut scratch = *addr;
    if same_block {
        let lsr_node = btrie::find_node(&table.btrie_root, addr, lsr_depth)
            .expect("LSR depth recorded during the walk must still be reachable");
        let lsr_payload = lsr_node.payload.expect("LSR carries a payload by definition");
        expand::expand(&mut table.mtrie_root, &mut scratch, lsr_depth - 1, lsr_node, Some(lsr_payload))
    } else {
        let target_node = btrie::find_node(&table.btrie_root, addr, masklen)
            .expect("target node still present after only nulling its payload");
        expand::expand(&mut table.mtrie_root, &mut scratch, masklen - 1, target_node, None)
    }
}

fn zero_out<P: Copy>(mtrie_root: &mut MBlock<P>, addr: &Addr, masklen: u8) {
    let target_level = (masklen - 1) / 8;
    let mut cur = mtrie_root;
    for level in 0..target_level {
        let idx = addr.byte(level) as usize;
        cur.entries[idx].payload = None;
        match cur.entries[idx].next.as_deref_mut() {
            Some(next) => cur = next,
            None => return,
        }
    }
    let idx = addr.byte(target_level);
    pattern_write(cur, idx, masklen - 1, None);
}

fn prune<P: Copy>(table: &mut Table<P>, addr: &Addr, start_depth: u8, masklen: u8) {
    let start_node: &mut BNode<P> = if start_depth == 0 {
        &mut table.btrie_root
    } else {
        btrie::find_node_mut(&mut table.btrie_root, addr, start_depth)
            .expect("LSR depth must still be reachable")
    };
    prune_rec(
        start_node,
        addr,
        start_depth,
        masklen,
        &mut table.mtrie_root,
        &mut table.counters,
    );
}

/// Returns true if `node` itself is now deletable (no payload, no
/// children) so its caller can prune it.
fn prune_rec<P: Copy>(
    node: &mut BNode<P>,
    addr: &Addr,
    depth: u8,
    masklen: u8,
    mtrie_root: &mut MBlock<P>,
    counters: &mut Counters,
) -> bool {
    if depth == masklen {
        return node.payload.is_none() && node.children[0].is_none() && node.children[1].is_none();
    }
    let bit = addr.bit(depth) as usize;
    let child_deletable = match node.children[bit].as_deref_mut() {
        Some(child) => prune_rec(child, addr, depth + 1, masklen, mtrie_root, counters),
        None => unreachable!("prune path must exist: repaint runs before pruning"),
    };
    if child_deletable {
        node.children[bit] = None;
        counters.dec_btrie_nodes(1);
    }

    // A stride-boundary node whose m-trie block just became
    // unreachable: this fires both when `node` is about to be pruned
    // by our own caller (no payload, now childless) and — the case a
    // removed-child-only check misses — when `node` survives with its
    // own payload but just lost its last deeper child. Either way, no
    // 1-trie prefix of length >= depth+1 leads into this block anymore.
    let now_childless = node.children[0].is_none() && node.children[1].is_none();
    if depth != 0 && depth % 8 == 0 && now_childless {
        unlink_and_free_block(mtrie_root, addr, depth, counters);
    }

    node.payload.is_none() && now_childless
}

fn unlink_and_free_block<P: Copy>(
    mtrie_root: &mut MBlock<P>,
    addr: &Addr,
    freed_depth: u8,
    counters: &mut Counters,
) {
    let level = freed_depth / 8;
    let parent_level = level - 1;
    let mut cur = mtrie_root;
    for l in 0..parent_level {
        cur = cur.entries[addr.byte(l) as usize]
            .next
            .as_deref_mut()
            .expect("parent block must exist for a node freed at a stride boundary");
    }
    let idx = addr.byte(parent_level) as usize;
    if let Some(orphan) = cur.entries[idx].next.take() {
        if orphan.entries.iter().any(|e| e.next.is_some()) {
            panic!("internal inconsistency: freeing a non-empty m-trie block");
        }
        counters.dec_mtrie_blocks(1);
        drop(orphan);
    }
}
