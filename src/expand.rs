//! C4 — controlled prefix expansion.
//!
//! Replicates a prefix's payload into every m-trie entry in its
//! stride-aligned range, except sub-ranges already dominated by a
//! more specific prefix recorded in the 1-trie. `reach_block_for_write`
//! implements the lazy, all-or-nothing block allocation described in
//! the spec: new blocks are built fully disconnected from the tree,
//! and only linked in — deepest first, then the single link that
//! reattaches the new chain to the existing tree — once every
//! allocation in the chain has succeeded. A failure partway through
//! frees what was built so far without ever touching the existing
//! tree.

use crate::addr::Addr;
use crate::alloc;
use crate::btrie::BNode;
use crate::error::TableResult;
use crate::mtrie::{free_block_recursive, pattern_write, MBlock};

/// Ensure the m-trie is linked down to (and including) `target_level`
/// along `addr`'s path, allocating any missing blocks.
pub(crate) fn reach_block_for_write<P: Copy>(
    root: &mut MBlock<P>,
    addr: &Addr,
    target_level: u8,
) -> TableResult<()> {
    if target_level == 0 {
        return Ok(());
    }

    let mut existing_depth = 0u8;
    {
        let mut cur: &MBlock<P> = root;
        for level in 0..target_level {
            match cur.entries[addr.byte(level) as usize].next.as_deref() {
                Some(next) => {
                    cur = next;
                    existing_depth = level + 1;
                }
                None => break,
            }
        }
    }
    if existing_depth == target_level {
        return Ok(());
    }

    let mut new_blocks: Vec<Box<MBlock<P>>> = Vec::new();
    for _ in existing_depth..target_level {
        match alloc::try_alloc(MBlock::zeroed()) {
            Ok(block) => new_blocks.push(block),
            Err(err) => {
                for block in new_blocks {
                    free_block_recursive(block);
                }
                return Err(err);
            }
        }
    }

    // Link the new blocks to each other, deepest first, then attach
    // the shallowest one to the existing tree in a single final write.
    while new_blocks.len() > 1 {
        let child = new_blocks.pop().unwrap();
        let level = existing_depth + new_blocks.len() as u8;
        let parent = new_blocks.last_mut().unwrap();
        parent.entries[addr.byte(level) as usize].next = Some(child);
    }

    let mut cur = root;
    for level in 0..existing_depth {
        cur = cur.entries[addr.byte(level) as usize]
            .next
            .as_deref_mut()
            .expect("walked path must still be linked");
    }
    cur.entries[addr.byte(existing_depth) as usize].next = new_blocks.pop();

    Ok(())
}

pub(crate) fn find_block_mut<'a, P>(root: &'a mut MBlock<P>, addr: &Addr, level: u8) -> &'a mut MBlock<P> {
    let mut cur = root;
    for l in 0..level {
        cur = cur.entries[addr.byte(l) as usize]
            .next
            .as_deref_mut()
            .expect("reach_block_for_write must have been called first");
    }
    cur
}

/// Recursively mirror `btrie_node`'s subtree into the m-trie starting
/// at `bitpos`, writing `payload` everywhere not already claimed by a
/// more specific prefix.
///
/// `scratch` must already hold `bitpos`'s bit and every bit above it
/// set to the path that led to `btrie_node`; bits at and below
/// `bitpos` are written and restored as the recursion descends.
pub(crate) fn expand<P: Copy>(
    mtrie_root: &mut MBlock<P>,
    scratch: &mut Addr,
    bitpos: u8,
    btrie_node: &BNode<P>,
    payload: Option<P>,
) -> TableResult<()> {
    let level = bitpos / 8;
    let no_children = btrie_node.children[0].is_none() && btrie_node.children[1].is_none();

    if crate::bits::is_boundary(bitpos) || no_children {
        reach_block_for_write(mtrie_root, scratch, level)?;
        let block = find_block_mut(mtrie_root, scratch, level);
        let idx = scratch.byte(level);
        pattern_write(block, idx, bitpos, payload);
        return Ok(());
    }

    for b in 0..2u8 {
        match btrie_node.children[b as usize].as_deref() {
            None => {
                let next_bitpos = bitpos + 1;
                let next_level = next_bitpos / 8;
                scratch.set_bit_to(next_bitpos, b);
                reach_block_for_write(mtrie_root, scratch, next_level)?;
                let block = find_block_mut(mtrie_root, scratch, next_level);
                let idx = scratch.byte(next_level);
                pattern_write(block, idx, next_bitpos, payload);
            }
            Some(child) => {
                if child.payload.is_some() {
                    continue;
                }
                let next_bitpos = bitpos + 1;
                scratch.set_bit_to(next_bitpos, b);
                expand(mtrie_root, scratch, next_bitpos, child, payload)?;
                scratch.set_bit_to(next_bitpos, 0);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btrie::{add_path, find_node_mut};

    #[test]
    fn expand_leaf_writes_full_pattern() {
        let mut mtrie = MBlock::<u32>::zeroed();
        let mut btrie = BNode::<u32>::empty();
        let addr = Addr::from_ipv4(std::net::Ipv4Addr::new(10, 0, 0, 0));
        add_path(&mut btrie, &addr, 8).unwrap();
        find_node_mut(&mut btrie, &addr, 8).unwrap().payload = Some(42);

        let mut scratch = addr;
        expand(&mut mtrie, &mut scratch, 7, &btrie, Some(42)).unwrap();
        assert_eq!(mtrie.entries[10].payload, Some(42));
    }

    #[test]
    fn expand_skips_more_specific_child() {
        // A /1 base prefix (bitpos=0, not a stride boundary) with a
        // /2 child that already carries its own payload. Expanding
        // the base must leave the child's half of the block alone.
        let mut mtrie = MBlock::<u32>::zeroed();
        let mut btrie = BNode::<u32>::empty();
        let base = Addr::zero();
        let more_specific = {
            let mut a = Addr::zero();
            a.set_bit_to(1, 0);
            a
        };

        add_path(&mut btrie, &base, 1).unwrap();
        find_node_mut(&mut btrie, &base, 1).unwrap().payload = Some(1);
        add_path(&mut btrie, &more_specific, 2).unwrap();
        find_node_mut(&mut btrie, &more_specific, 2).unwrap().payload = Some(2);

        let mut scratch = base;
        let root = crate::btrie::find_node(&btrie, &base, 1).unwrap();
        expand(&mut mtrie, &mut scratch, 0, root, Some(1)).unwrap();

        // bit1=0 half (the more-specific /2's own range) must not
        // have been overwritten with the base's payload.
        assert_ne!(mtrie.entries[0].payload, Some(1));
        // bit1=1 half (no more-specific child there) gets the base
        // prefix's payload.
        assert_eq!(mtrie.entries[0b0100_0000].payload, Some(1));
    }
}
