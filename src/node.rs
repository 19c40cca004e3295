//! Byte layout of B-tree nodes inside a page.
//!
//! Every function here is plain arithmetic over a page buffer. Nothing in this
//! module knows where the page came from.
//!
//! Common header: node type (1 byte), is-root flag (1 byte), parent page (4).
//! A leaf adds its cell count; each cell is a key followed by a serialized
//! row. The right-sibling pointer of a leaf sits just past the last possible
//! cell. An internal node adds its key count and right child; each cell is a
//! child page followed by the largest key reachable through that child.

use crate::error::{DbError, Result};
use crate::pager::Page;
use crate::{PAGE_SIZE, ROW_SIZE};

// Common node header layout.
pub const NODE_TYPE_SIZE: usize = size_of::<u8>();
pub const NODE_TYPE_OFFSET: usize = 0;
pub const IS_ROOT_SIZE: usize = size_of::<u8>();
pub const IS_ROOT_OFFSET: usize = NODE_TYPE_SIZE;
pub const PARENT_POINTER_SIZE: usize = size_of::<u32>();
pub const PARENT_POINTER_OFFSET: usize = IS_ROOT_OFFSET + IS_ROOT_SIZE;
pub const COMMON_NODE_HEADER_SIZE: usize = NODE_TYPE_SIZE + IS_ROOT_SIZE + PARENT_POINTER_SIZE;

// Leaf node header layout.
pub const LEAF_NODE_NUM_CELLS_SIZE: usize = size_of::<u32>();
pub const LEAF_NODE_NUM_CELLS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
pub const LEAF_NODE_HEADER_SIZE: usize = COMMON_NODE_HEADER_SIZE + LEAF_NODE_NUM_CELLS_SIZE;

// Leaf node body layout.
pub const LEAF_NODE_KEY_SIZE: usize = size_of::<u32>();
pub const LEAF_NODE_KEY_OFFSET: usize = 0;
pub const LEAF_NODE_VALUE_SIZE: usize = ROW_SIZE;
pub const LEAF_NODE_VALUE_OFFSET: usize = LEAF_NODE_KEY_OFFSET + LEAF_NODE_KEY_SIZE;
pub const LEAF_NODE_CELL_SIZE: usize = LEAF_NODE_KEY_SIZE + LEAF_NODE_VALUE_SIZE;
pub const LEAF_NODE_SPACE_FOR_CELLS: usize = PAGE_SIZE - LEAF_NODE_HEADER_SIZE;
pub const LEAF_NODE_MAX_CELLS: usize = LEAF_NODE_SPACE_FOR_CELLS / LEAF_NODE_CELL_SIZE;
pub const LEAF_NODE_NEXT_LEAF_SIZE: usize = size_of::<u32>();
pub const LEAF_NODE_NEXT_LEAF_OFFSET: usize =
    LEAF_NODE_HEADER_SIZE + LEAF_NODE_MAX_CELLS * LEAF_NODE_CELL_SIZE;

// A full leaf plus the incoming cell is divided between the two halves.
pub const LEAF_NODE_RIGHT_SPLIT_COUNT: usize = (LEAF_NODE_MAX_CELLS + 1) / 2;
pub const LEAF_NODE_LEFT_SPLIT_COUNT: usize = LEAF_NODE_MAX_CELLS + 1 - LEAF_NODE_RIGHT_SPLIT_COUNT;

// Internal node header layout.
pub const INTERNAL_NODE_NUM_KEYS_SIZE: usize = size_of::<u32>();
pub const INTERNAL_NODE_NUM_KEYS_OFFSET: usize = COMMON_NODE_HEADER_SIZE;
pub const INTERNAL_NODE_RIGHT_CHILD_SIZE: usize = size_of::<u32>();
pub const INTERNAL_NODE_RIGHT_CHILD_OFFSET: usize =
    INTERNAL_NODE_NUM_KEYS_OFFSET + INTERNAL_NODE_NUM_KEYS_SIZE;
pub const INTERNAL_NODE_HEADER_SIZE: usize =
    COMMON_NODE_HEADER_SIZE + INTERNAL_NODE_NUM_KEYS_SIZE + INTERNAL_NODE_RIGHT_CHILD_SIZE;

// Internal node body layout.
pub const INTERNAL_NODE_CHILD_SIZE: usize = size_of::<u32>();
pub const INTERNAL_NODE_KEY_SIZE: usize = size_of::<u32>();
pub const INTERNAL_NODE_CELL_SIZE: usize = INTERNAL_NODE_CHILD_SIZE + INTERNAL_NODE_KEY_SIZE;
pub const INTERNAL_NODE_MAX_KEYS: usize =
    (PAGE_SIZE - INTERNAL_NODE_HEADER_SIZE) / INTERNAL_NODE_CELL_SIZE;

/// Marks the right child of an internal node that has no children yet.
pub const INVALID_PAGE_NUM: u32 = u32::MAX;

/// Sibling pointer value of the last leaf. Page 0 is always the root, so no
/// leaf ever has it as a right sibling.
pub const NO_NEXT_LEAF: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Internal = 0,
    Leaf = 1,
}

impl TryFrom<u8> for NodeType {
    type Error = DbError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(NodeType::Internal),
            1 => Ok(NodeType::Leaf),
            other => Err(DbError::UnknownNodeType(other)),
        }
    }
}

fn read_u32(page: &Page, offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&page[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn write_u32(page: &mut Page, offset: usize, value: u32) {
    page[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn node_type(page: &Page) -> Result<NodeType> {
    NodeType::try_from(page[NODE_TYPE_OFFSET])
}

/// Node type of `page`, once its cell or key count is known to fit in a page.
/// Traversals read nodes loaded from disk through this.
pub fn checked_node_type(page: &Page, page_num: u32) -> Result<NodeType> {
    let node_type = node_type(page)?;
    let (count, limit) = match node_type {
        NodeType::Leaf => (leaf_num_cells(page), LEAF_NODE_MAX_CELLS),
        NodeType::Internal => (internal_num_keys(page), INTERNAL_NODE_MAX_KEYS),
    };
    if count > limit {
        return Err(DbError::CorruptPage {
            page_num,
            reason: format!("{count} cells in a node that holds at most {limit}"),
        });
    }
    Ok(node_type)
}

pub fn set_node_type(page: &mut Page, node_type: NodeType) {
    page[NODE_TYPE_OFFSET] = node_type as u8;
}

pub fn is_root(page: &Page) -> bool {
    page[IS_ROOT_OFFSET] != 0
}

pub fn set_root(page: &mut Page, is_root: bool) {
    page[IS_ROOT_OFFSET] = u8::from(is_root);
}

pub fn parent(page: &Page) -> u32 {
    read_u32(page, PARENT_POINTER_OFFSET)
}

pub fn set_parent(page: &mut Page, parent: u32) {
    write_u32(page, PARENT_POINTER_OFFSET, parent);
}

pub fn initialize_leaf(page: &mut Page) {
    set_node_type(page, NodeType::Leaf);
    set_root(page, false);
    set_leaf_num_cells(page, 0);
    set_leaf_next_leaf(page, NO_NEXT_LEAF);
}

pub fn leaf_num_cells(page: &Page) -> usize {
    read_u32(page, LEAF_NODE_NUM_CELLS_OFFSET) as usize
}

pub fn set_leaf_num_cells(page: &mut Page, num_cells: usize) {
    write_u32(page, LEAF_NODE_NUM_CELLS_OFFSET, num_cells as u32);
}

pub fn leaf_next_leaf(page: &Page) -> u32 {
    read_u32(page, LEAF_NODE_NEXT_LEAF_OFFSET)
}

pub fn set_leaf_next_leaf(page: &mut Page, next: u32) {
    write_u32(page, LEAF_NODE_NEXT_LEAF_OFFSET, next);
}

fn leaf_cell_offset(cell_num: usize) -> usize {
    debug_assert!(cell_num <= LEAF_NODE_MAX_CELLS);
    LEAF_NODE_HEADER_SIZE + cell_num * LEAF_NODE_CELL_SIZE
}

pub fn leaf_cell(page: &Page, cell_num: usize) -> &[u8] {
    let offset = leaf_cell_offset(cell_num);
    &page[offset..offset + LEAF_NODE_CELL_SIZE]
}

pub fn leaf_cell_mut(page: &mut Page, cell_num: usize) -> &mut [u8] {
    let offset = leaf_cell_offset(cell_num);
    &mut page[offset..offset + LEAF_NODE_CELL_SIZE]
}

pub fn leaf_key(page: &Page, cell_num: usize) -> u32 {
    read_u32(page, leaf_cell_offset(cell_num) + LEAF_NODE_KEY_OFFSET)
}

pub fn set_leaf_key(page: &mut Page, cell_num: usize, key: u32) {
    write_u32(page, leaf_cell_offset(cell_num) + LEAF_NODE_KEY_OFFSET, key);
}

pub fn leaf_value(page: &Page, cell_num: usize) -> &[u8] {
    &leaf_cell(page, cell_num)[LEAF_NODE_VALUE_OFFSET..]
}

pub fn leaf_value_mut(page: &mut Page, cell_num: usize) -> &mut [u8] {
    &mut leaf_cell_mut(page, cell_num)[LEAF_NODE_VALUE_OFFSET..]
}

/// Opens a hole at `cell_num` by moving cells `cell_num..num_cells` one slot
/// to the right. The leaf must have room for one more cell.
pub fn leaf_shift_right(page: &mut Page, cell_num: usize, num_cells: usize) {
    debug_assert!(num_cells < LEAF_NODE_MAX_CELLS);
    if cell_num < num_cells {
        page.copy_within(
            leaf_cell_offset(cell_num)..leaf_cell_offset(num_cells),
            leaf_cell_offset(cell_num + 1),
        );
    }
}

/// Index of the first cell whose key is `>= key`, or the cell count.
pub fn leaf_find_slot(page: &Page, key: u32) -> usize {
    let mut min = 0;
    let mut max = leaf_num_cells(page);
    while min != max {
        let mid = (min + max) / 2;
        if leaf_key(page, mid) >= key {
            max = mid;
        } else {
            min = mid + 1;
        }
    }
    min
}

pub fn initialize_internal(page: &mut Page) {
    set_node_type(page, NodeType::Internal);
    set_root(page, false);
    set_internal_num_keys(page, 0);
    // A zeroed right child would point at the root page.
    set_internal_right_child(page, INVALID_PAGE_NUM);
}

pub fn internal_num_keys(page: &Page) -> usize {
    read_u32(page, INTERNAL_NODE_NUM_KEYS_OFFSET) as usize
}

pub fn set_internal_num_keys(page: &mut Page, num_keys: usize) {
    write_u32(page, INTERNAL_NODE_NUM_KEYS_OFFSET, num_keys as u32);
}

pub fn internal_right_child(page: &Page) -> u32 {
    read_u32(page, INTERNAL_NODE_RIGHT_CHILD_OFFSET)
}

pub fn set_internal_right_child(page: &mut Page, child: u32) {
    write_u32(page, INTERNAL_NODE_RIGHT_CHILD_OFFSET, child);
}

fn internal_cell_offset(cell_num: usize) -> usize {
    debug_assert!(cell_num <= INTERNAL_NODE_MAX_KEYS);
    INTERNAL_NODE_HEADER_SIZE + cell_num * INTERNAL_NODE_CELL_SIZE
}

/// Child `child_num`; the index one past the last key is the right child.
pub fn internal_child(page: &Page, child_num: usize) -> u32 {
    let num_keys = internal_num_keys(page);
    debug_assert!(child_num <= num_keys);
    if child_num == num_keys {
        internal_right_child(page)
    } else {
        read_u32(page, internal_cell_offset(child_num))
    }
}

pub fn set_internal_child(page: &mut Page, child_num: usize, child: u32) {
    if child_num == internal_num_keys(page) {
        set_internal_right_child(page, child);
    } else {
        write_u32(page, internal_cell_offset(child_num), child);
    }
}

pub fn internal_key(page: &Page, key_num: usize) -> u32 {
    read_u32(page, internal_cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE)
}

pub fn set_internal_key(page: &mut Page, key_num: usize, key: u32) {
    write_u32(
        page,
        internal_cell_offset(key_num) + INTERNAL_NODE_CHILD_SIZE,
        key,
    );
}

/// Moves cells `cell_num..num_keys` one slot right. The node must have room.
pub fn internal_shift_right(page: &mut Page, cell_num: usize, num_keys: usize) {
    debug_assert!(num_keys < INTERNAL_NODE_MAX_KEYS);
    if cell_num < num_keys {
        page.copy_within(
            internal_cell_offset(cell_num)..internal_cell_offset(num_keys),
            internal_cell_offset(cell_num + 1),
        );
    }
}

/// Index of the child that covers `key`: the first key `>= key`, or the
/// right child when `key` is larger than every separator.
pub fn internal_find_child(page: &Page, key: u32) -> usize {
    let mut min = 0;
    let mut max = internal_num_keys(page);
    while min != max {
        let mid = (min + max) / 2;
        if internal_key(page, mid) >= key {
            max = mid;
        } else {
            min = mid + 1;
        }
    }
    min
}
