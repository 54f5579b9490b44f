//! C2 — the authoritative bit-level 1-trie.
//!
//! Every inserted prefix corresponds to exactly one path from the
//! root, one edge per bit. Nodes are allocated lazily and own their
//! children outright (`Option<Box<BNode<P>>>`); there are no back
//! pointers and no shared references, matching the ownership model in
//! the spec's Design Notes.

use crate::addr::Addr;
use crate::alloc;
use crate::error::TableResult;

pub(crate) struct BNode<P> {
    pub(crate) payload: Option<P>,
    pub(crate) children: [Option<Box<BNode<P>>>; 2],
}

impl<P> BNode<P> {
    pub(crate) fn empty() -> Self {
        BNode {
            payload: None,
            children: [None, None],
        }
    }
}

pub(crate) enum AddPathStatus {
    Existed,
    Inserted,
}

/// Walk `masklen` bits down from `root`, allocating any missing nodes
/// along the way.
///
/// Returns the path status, the depth of the first newly-allocated
/// node (`None` if the whole path already existed), and the number of
/// nodes created. On allocation failure, any nodes created during
/// *this* call are unwound via [`detach_and_free_chain`] before the
/// error is returned, leaving the trie exactly as it was found.
pub(crate) fn add_path<P>(
    root: &mut BNode<P>,
    addr: &Addr,
    masklen: u8,
) -> TableResult<(AddPathStatus, Option<u8>, usize)> {
    let mut anchor_depth: Option<u8> = None;
    let mut created = 0usize;
    {
        let mut node: &mut BNode<P> = root;
        for depth in 0..masklen {
            let bit = addr.bit(depth) as usize;
            if node.children[bit].is_none() {
                match alloc::try_alloc(BNode::empty()) {
                    Ok(child) => {
                        node.children[bit] = Some(child);
                        created += 1;
                        if anchor_depth.is_none() {
                            anchor_depth = Some(depth);
                        }
                    }
                    Err(err) => {
                        if let Some(anchor) = anchor_depth {
                            detach_and_free_chain(root, addr, anchor);
                        }
                        return Err(err);
                    }
                }
            }
            node = node.children[bit].as_deref_mut().unwrap();
        }
    }
    let status = if anchor_depth.is_none() {
        AddPathStatus::Existed
    } else {
        AddPathStatus::Inserted
    };
    Ok((status, anchor_depth, created))
}

pub(crate) fn find_node<'a, P>(root: &'a BNode<P>, addr: &Addr, masklen: u8) -> Option<&'a BNode<P>> {
    let mut node = root;
    for depth in 0..masklen {
        let bit = addr.bit(depth) as usize;
        node = node.children[bit].as_deref()?;
    }
    Some(node)
}

pub(crate) fn find_node_mut<'a, P>(
    root: &'a mut BNode<P>,
    addr: &Addr,
    masklen: u8,
) -> Option<&'a mut BNode<P>> {
    let mut node = root;
    for depth in 0..masklen {
        let bit = addr.bit(depth) as usize;
        node = node.children[bit].as_deref_mut()?;
    }
    Some(node)
}

/// Detach and free the linear chain of nodes rooted at
/// `root`'s descendant reached after `anchor_depth` bits, returning
/// how many nodes were freed.
///
/// This is only ever used to unwind a chain this same call just
/// appended, so it asserts linearity (at most one child per node)
/// rather than handling a general subtree: finding a node with two
/// children here is a bug, not user-triggerable.
pub(crate) fn detach_and_free_chain<P>(root: &mut BNode<P>, addr: &Addr, anchor_depth: u8) -> usize {
    let mut node: &mut BNode<P> = root;
    for depth in 0..anchor_depth {
        let bit = addr.bit(depth) as usize;
        node = node.children[bit]
            .as_deref_mut()
            .expect("anchor path must still exist");
    }
    let bit = addr.bit(anchor_depth) as usize;
    match node.children[bit].take() {
        Some(child) => free_chain(child),
        None => 0,
    }
}

fn free_chain<P>(mut node: Box<BNode<P>>) -> usize {
    let mut count = 0;
    loop {
        count += 1;
        let next = match (&node.children[0], &node.children[1]) {
            (Some(_), Some(_)) => panic!("rollback chain is not linear: node has two children"),
            (Some(_), None) => node.children[0].take(),
            (None, Some(_)) => node.children[1].take(),
            (None, None) => None,
        };
        match next {
            Some(n) => node = n,
            None => break,
        }
    }
    count
}

/// Post-order subtree destruction, returning the number of nodes
/// freed. Used by [`crate::Table::destroy`] to cross-check the live
/// node counter against the actual shape of the trie.
pub(crate) fn destroy_subtree<P>(node: Box<BNode<P>>) -> usize {
    fn rec<P>(node: Box<BNode<P>>, depth: u16) -> usize {
        if depth > 129 {
            log::warn!("destroy_subtree recursion exceeded the 128-bit depth guard");
        }
        let BNode { children, .. } = *node;
        let [left, right] = children;
        let mut count = 1;
        if let Some(l) = left {
            count += rec(l, depth + 1);
        }
        if let Some(r) = right {
            count += rec(r, depth + 1);
        }
        count
    }
    rec(node, 0)
}

/// Pre-order depth-first walk, invoking `cb(addr, masklen, payload)`
/// for every node carrying a payload. A single scratch [`Addr`] is
/// threaded through the recursion: the bit for the current depth is
/// set before descending into the right (`1`) child and cleared again
/// after returning, so by the time `cb` runs at any node the scratch
/// address holds exactly that node's prefix.
///
/// Returns `true` if `cb` requested early termination by returning
/// non-zero.
pub(crate) fn dfs_walk<P: Copy>(
    node: &BNode<P>,
    scratch: &mut Addr,
    depth: u8,
    cb: &mut dyn FnMut(&Addr, u8, P) -> i32,
) -> bool {
    if depth > 128 {
        log::warn!("dfs_walk exceeded the 128-bit depth guard");
        return false;
    }
    if let Some(payload) = node.payload {
        if cb(scratch, depth, payload) != 0 {
            return true;
        }
    }
    if let Some(left) = node.children[0].as_deref() {
        scratch.set_bit_to(depth, 0);
        if dfs_walk(left, scratch, depth + 1, cb) {
            return true;
        }
    }
    if let Some(right) = node.children[1].as_deref() {
        scratch.set_bit_to(depth, 1);
        if dfs_walk(right, scratch, depth + 1, cb) {
            return true;
        }
        scratch.set_bit_to(depth, 0);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_path_reuses_existing_nodes() {
        let mut root = BNode::<u32>::empty();
        let addr = Addr::from_ipv4(std::net::Ipv4Addr::new(10, 0, 0, 0));
        let (status1, anchor1, created1) = add_path(&mut root, &addr, 24).unwrap();
        assert!(matches!(status1, AddPathStatus::Inserted));
        assert_eq!(anchor1, Some(0));
        assert_eq!(created1, 24);

        let (status2, anchor2, created2) = add_path(&mut root, &addr, 16).unwrap();
        assert!(matches!(status2, AddPathStatus::Existed));
        assert_eq!(anchor2, None);
        assert_eq!(created2, 0);
    }

    #[test]
    fn detach_and_free_chain_removes_only_the_new_tail() {
        let mut root = BNode::<u32>::empty();
        let addr_a = Addr::from_ipv4(std::net::Ipv4Addr::new(10, 0, 0, 0));
        add_path(&mut root, &addr_a, 8).unwrap();

        let addr_b = Addr::from_ipv4(std::net::Ipv4Addr::new(10, 1, 0, 0));
        let (_, anchor, created) = add_path(&mut root, &addr_b, 16).unwrap();
        assert_eq!(created, 8);
        let freed = detach_and_free_chain(&mut root, &addr_b, anchor.unwrap());
        assert_eq!(freed, 8);
        assert!(find_node(&root, &addr_a, 8).is_some());
        assert!(find_node(&root, &addr_b, 16).is_none());
    }

    #[test]
    fn dfs_walk_restores_scratch_address() {
        let mut root = BNode::<u32>::empty();
        let addr = Addr::from_ipv4(std::net::Ipv4Addr::new(192, 168, 1, 0));
        add_path(&mut root, &addr, 24).unwrap();
        find_node_mut(&mut root, &addr, 24).unwrap().payload = Some(7);

        let mut scratch = Addr::zero();
        let mut seen = Vec::new();
        dfs_walk(&root, &mut scratch, 0, &mut |a, m, p| {
            seen.push((*a, m, p));
            0
        });
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 24);
        assert_eq!(seen[0].2, 7);
        assert_eq!(scratch, Addr::zero());
    }
}
