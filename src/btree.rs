//! Search, insertion and splitting over pages owned by a [`Pager`].
//!
//! The root never moves: when it splits, its contents are copied into a fresh
//! page that becomes the left child, and the root page is rewritten as an
//! internal node above both halves.

use std::io::Write;

use tracing::debug;

use crate::error::{DbError, Result};
use crate::node::*;
use crate::pager::{Page, Pager};
use crate::row::Row;

/// Where a tree is rooted and how many keys an internal node takes before it
/// splits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tree {
    pub(crate) root: u32,
    pub(crate) max_internal_keys: usize,
}

impl Tree {
    pub fn new(root: u32) -> Self {
        Self {
            root,
            max_internal_keys: INTERNAL_NODE_MAX_KEYS,
        }
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    /// Narrows internal nodes so deep trees can be built from a few thousand
    /// rows. Below three keys a split can leave one half without a key.
    #[cfg(test)]
    pub(crate) fn with_max_internal_keys(mut self, max_internal_keys: usize) -> Self {
        assert!((3..=INTERNAL_NODE_MAX_KEYS).contains(&max_internal_keys));
        self.max_internal_keys = max_internal_keys;
        self
    }
}

/// No path from the root can be longer than the file has pages.
fn check_depth(pager: &Pager, page_num: u32, depth: usize) -> Result<()> {
    if depth > pager.num_pages() as usize {
        return Err(DbError::CorruptPage {
            page_num,
            reason: "child pointers form a cycle".into(),
        });
    }
    Ok(())
}

/// Descends from `root` to the leaf that holds, or would hold, `key`.
/// Returns the leaf page and the slot for `key` inside it.
pub fn find_leaf(pager: &mut Pager, root: u32, key: u32) -> Result<(u32, usize)> {
    let mut page_num = root;
    let mut depth = 0;
    loop {
        check_depth(pager, page_num, depth)?;
        depth += 1;
        let page = pager.get_page(page_num)?;
        match checked_node_type(page, page_num)? {
            NodeType::Leaf => return Ok((page_num, leaf_find_slot(page, key))),
            NodeType::Internal => {
                let child_num = internal_find_child(page, key);
                page_num = internal_child(page, child_num);
            }
        }
    }
}

/// First leaf in key order under `page_num`.
pub fn leftmost_leaf(pager: &mut Pager, mut page_num: u32) -> Result<u32> {
    let mut depth = 0;
    loop {
        check_depth(pager, page_num, depth)?;
        depth += 1;
        let page = pager.get_page(page_num)?;
        match checked_node_type(page, page_num)? {
            NodeType::Leaf => return Ok(page_num),
            NodeType::Internal => page_num = internal_child(page, 0),
        }
    }
}

/// Largest key stored under `page_num`.
pub fn max_key(pager: &mut Pager, mut page_num: u32) -> Result<u32> {
    let mut depth = 0;
    loop {
        check_depth(pager, page_num, depth)?;
        depth += 1;
        let page = pager.get_page(page_num)?;
        match checked_node_type(page, page_num)? {
            NodeType::Leaf => {
                let num_cells = leaf_num_cells(page);
                return Ok(if num_cells == 0 {
                    0
                } else {
                    leaf_key(page, num_cells - 1)
                });
            }
            NodeType::Internal => {
                let right = internal_right_child(page);
                if right == INVALID_PAGE_NUM {
                    return Err(DbError::EmptyInternalNode(page_num));
                }
                page_num = right;
            }
        }
    }
}

/// Writes `row` into slot `cell_num` of leaf `page_num`, splitting the leaf
/// when it is full. The caller has already ruled out a duplicate key.
pub fn leaf_insert(
    pager: &mut Pager,
    tree: Tree,
    page_num: u32,
    cell_num: usize,
    row: &Row,
) -> Result<()> {
    let page = pager.get_page(page_num)?;
    let num_cells = leaf_num_cells(page);
    if num_cells >= LEAF_NODE_MAX_CELLS {
        return leaf_split_and_insert(pager, tree, page_num, cell_num, row);
    }

    leaf_shift_right(page, cell_num, num_cells);
    set_leaf_num_cells(page, num_cells + 1);
    set_leaf_key(page, cell_num, row.id);
    row.serialize(leaf_value_mut(page, cell_num));
    Ok(())
}

fn leaf_split_and_insert(
    pager: &mut Pager,
    tree: Tree,
    old_page_num: u32,
    cell_num: usize,
    row: &Row,
) -> Result<()> {
    let old: Page = *pager.get_page(old_page_num)?;
    let old_max = leaf_key(&old, LEAF_NODE_MAX_CELLS - 1);

    let mut cell = [0u8; LEAF_NODE_CELL_SIZE];
    cell[LEAF_NODE_KEY_OFFSET..LEAF_NODE_KEY_OFFSET + LEAF_NODE_KEY_SIZE]
        .copy_from_slice(&row.id.to_le_bytes());
    row.serialize(&mut cell[LEAF_NODE_VALUE_OFFSET..]);

    let new_page_num = pager.allocate_page()?;
    debug!(old_page_num, new_page_num, key = row.id, "splitting leaf");

    {
        let new = pager.get_page(new_page_num)?;
        initialize_leaf(new);
        set_parent(new, parent(&old));
        set_leaf_next_leaf(new, leaf_next_leaf(&old));
    }

    // Lay the old cells plus the new one out in key order across both leaves.
    for i in 0..=LEAF_NODE_MAX_CELLS {
        let src: &[u8] = match i.cmp(&cell_num) {
            std::cmp::Ordering::Less => leaf_cell(&old, i),
            std::cmp::Ordering::Equal => &cell,
            std::cmp::Ordering::Greater => leaf_cell(&old, i - 1),
        };
        let (dest_page_num, dest_cell) = if i < LEAF_NODE_LEFT_SPLIT_COUNT {
            (old_page_num, i)
        } else {
            (new_page_num, i - LEAF_NODE_LEFT_SPLIT_COUNT)
        };
        leaf_cell_mut(pager.get_page(dest_page_num)?, dest_cell).copy_from_slice(src);
    }

    {
        let old_page = pager.get_page(old_page_num)?;
        set_leaf_num_cells(old_page, LEAF_NODE_LEFT_SPLIT_COUNT);
        set_leaf_next_leaf(old_page, new_page_num);
    }
    set_leaf_num_cells(pager.get_page(new_page_num)?, LEAF_NODE_RIGHT_SPLIT_COUNT);

    if is_root(&old) {
        return create_new_root(pager, tree.root, new_page_num);
    }

    let parent_page_num = parent(&old);
    let new_max = max_key(pager, old_page_num)?;
    update_internal_key(pager.get_page(parent_page_num)?, old_max, new_max);
    internal_insert(pager, tree, parent_page_num, new_page_num)
}

/// Moves the root's contents into a new left child and turns the root page
/// into an internal node over that child and `right_child_page_num`.
fn create_new_root(pager: &mut Pager, root: u32, right_child_page_num: u32) -> Result<()> {
    let old_root: Page = *pager.get_page(root)?;
    let left_child_page_num = pager.allocate_page()?;
    debug!(
        root,
        left_child_page_num, right_child_page_num, "promoting new root"
    );

    {
        let left = pager.get_page(left_child_page_num)?;
        *left = old_root;
        set_root(left, false);
        set_parent(left, root);
    }

    if node_type(&old_root)? == NodeType::Internal {
        for child_num in 0..=internal_num_keys(&old_root) {
            let child = internal_child(&old_root, child_num);
            set_parent(pager.get_page(child)?, left_child_page_num);
        }
    }

    let left_max = max_key(pager, left_child_page_num)?;
    {
        let root_page = pager.get_page(root)?;
        initialize_internal(root_page);
        set_root(root_page, true);
        set_internal_num_keys(root_page, 1);
        set_internal_child(root_page, 0, left_child_page_num);
        set_internal_key(root_page, 0, left_max);
        set_internal_right_child(root_page, right_child_page_num);
    }
    set_parent(pager.get_page(right_child_page_num)?, root);
    Ok(())
}

/// Replaces the separator `old_key` with `new_key`. The right child has no
/// separator, so nothing changes when `old_key` belongs to it.
fn update_internal_key(page: &mut Page, old_key: u32, new_key: u32) {
    let key_num = internal_find_child(page, old_key);
    if key_num < internal_num_keys(page) {
        set_internal_key(page, key_num, new_key);
    }
}

/// Adds `child_page_num` to internal node `parent_page_num` at the position
/// its max key calls for, splitting the parent when it is full.
fn internal_insert(
    pager: &mut Pager,
    tree: Tree,
    parent_page_num: u32,
    child_page_num: u32,
) -> Result<()> {
    let child_max = max_key(pager, child_page_num)?;
    let parent_page = pager.get_page(parent_page_num)?;
    let num_keys = internal_num_keys(parent_page);
    if num_keys >= tree.max_internal_keys {
        return internal_split_and_insert(pager, tree, parent_page_num, child_page_num);
    }

    let right_child = internal_right_child(parent_page);
    if right_child == INVALID_PAGE_NUM {
        set_internal_right_child(parent_page, child_page_num);
        return Ok(());
    }

    let index = internal_find_child(parent_page, child_max);
    let right_max = max_key(pager, right_child)?;
    let parent_page = pager.get_page(parent_page_num)?;
    if child_max > right_max {
        // The old right child moves into the last cell.
        set_internal_num_keys(parent_page, num_keys + 1);
        set_internal_child(parent_page, num_keys, right_child);
        set_internal_key(parent_page, num_keys, right_max);
        set_internal_right_child(parent_page, child_page_num);
    } else {
        internal_shift_right(parent_page, index, num_keys);
        set_internal_num_keys(parent_page, num_keys + 1);
        set_internal_child(parent_page, index, child_page_num);
        set_internal_key(parent_page, index, child_max);
    }
    Ok(())
}

fn internal_split_and_insert(
    pager: &mut Pager,
    tree: Tree,
    parent_page_num: u32,
    child_page_num: u32,
) -> Result<()> {
    let mut old_page_num = parent_page_num;
    let old_max = max_key(pager, old_page_num)?;
    let child_max = max_key(pager, child_page_num)?;

    let new_page_num = pager.allocate_page()?;
    initialize_internal(pager.get_page(new_page_num)?);
    debug!(old_page_num, new_page_num, "splitting internal node");

    let splitting_root = is_root(pager.get_page(old_page_num)?);
    let grandparent_page_num = if splitting_root {
        create_new_root(pager, tree.root, new_page_num)?;
        old_page_num = internal_child(pager.get_page(tree.root)?, 0);
        tree.root
    } else {
        let grandparent = parent(pager.get_page(old_page_num)?);
        set_parent(pager.get_page(new_page_num)?, grandparent);
        grandparent
    };

    // The right child goes first so the new node has something to compare
    // against; then the upper half of the cells follows, largest first.
    let moved = internal_right_child(pager.get_page(old_page_num)?);
    internal_insert(pager, tree, new_page_num, moved)?;
    set_parent(pager.get_page(moved)?, new_page_num);
    set_internal_right_child(pager.get_page(old_page_num)?, INVALID_PAGE_NUM);

    let max_keys = tree.max_internal_keys;
    for child_num in (max_keys / 2 + 1..max_keys).rev() {
        let moved = internal_child(pager.get_page(old_page_num)?, child_num);
        internal_insert(pager, tree, new_page_num, moved)?;
        set_parent(pager.get_page(moved)?, new_page_num);
        set_internal_num_keys(pager.get_page(old_page_num)?, child_num);
    }

    // The child left of the middle key becomes the old node's right child.
    {
        let old_page = pager.get_page(old_page_num)?;
        let num_keys = internal_num_keys(old_page);
        let last = internal_child(old_page, num_keys - 1);
        set_internal_right_child(old_page, last);
        set_internal_num_keys(old_page, num_keys - 1);
    }

    let max_after_split = max_key(pager, old_page_num)?;
    let destination = if child_max < max_after_split {
        old_page_num
    } else {
        new_page_num
    };
    set_parent(pager.get_page(child_page_num)?, destination);
    internal_insert(pager, tree, destination, child_page_num)?;

    let new_old_max = max_key(pager, old_page_num)?;
    update_internal_key(
        pager.get_page(grandparent_page_num)?,
        old_max,
        new_old_max,
    );

    if !splitting_root {
        internal_insert(pager, tree, grandparent_page_num, new_page_num)?;
    }
    Ok(())
}

/// Pre-order dump of the subtree at `page_num`, two spaces per level.
pub fn render<W: Write>(pager: &mut Pager, page_num: u32, depth: usize, out: &mut W) -> Result<()> {
    check_depth(pager, page_num, depth)?;
    let indent = "  ".repeat(depth);
    let page = pager.get_page(page_num)?;
    match checked_node_type(page, page_num)? {
        NodeType::Leaf => {
            let num_cells = leaf_num_cells(page);
            writeln!(out, "{indent}- leaf (size {num_cells})")?;
            for cell_num in 0..num_cells {
                writeln!(out, "{indent}  - {}", leaf_key(page, cell_num))?;
            }
        }
        NodeType::Internal => {
            let num_keys = internal_num_keys(page);
            writeln!(out, "{indent}- internal (size {num_keys})")?;
            let node: Page = *page;
            for key_num in 0..num_keys {
                render(pager, internal_child(&node, key_num), depth + 1, out)?;
                writeln!(out, "{indent}  - key {}", internal_key(&node, key_num))?;
            }
            let right = internal_right_child(&node);
            if right != INVALID_PAGE_NUM {
                render(pager, right, depth + 1, out)?;
            }
        }
    }
    Ok(())
}
