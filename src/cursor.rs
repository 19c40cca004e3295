use crate::btree;
use crate::error::{DbError, Result};
use crate::node::{
    NO_NEXT_LEAF, NodeType, checked_node_type, leaf_key, leaf_next_leaf, leaf_num_cells,
    leaf_value,
};
use crate::row::Row;
use crate::table::Table;

/// A position inside the tree: a leaf page and a cell slot in it.
///
/// A cursor borrows its table for one statement; any split invalidates it.
pub struct Cursor<'a> {
    table: &'a mut Table,
    page_num: u32,
    cell_num: usize,
    leaves_visited: u32,
    end_of_table: bool,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(table: &'a mut Table, page_num: u32, cell_num: usize) -> Result<Self> {
        let num_cells = leaf_len(table, page_num)?;
        Ok(Self {
            table,
            page_num,
            cell_num,
            leaves_visited: 0,
            end_of_table: cell_num >= num_cells,
        })
    }

    pub fn end_of_table(&self) -> bool {
        self.end_of_table
    }

    pub fn key(&mut self) -> Result<u32> {
        let page = self.table.pager.get_page(self.page_num)?;
        Ok(leaf_key(page, self.cell_num))
    }

    /// Serialized row bytes under the cursor.
    pub fn value(&mut self) -> Result<&[u8]> {
        let page = self.table.pager.get_page(self.page_num)?;
        Ok(leaf_value(page, self.cell_num))
    }

    pub fn row(&mut self) -> Result<Row> {
        Ok(Row::deserialize(self.value()?))
    }

    /// Steps to the next cell, following the sibling link at the end of a leaf.
    pub fn advance(&mut self) -> Result<()> {
        self.cell_num += 1;
        while self.cell_num >= leaf_len(self.table, self.page_num)? {
            let next = leaf_next_leaf(self.table.pager.get_page(self.page_num)?);
            if next == NO_NEXT_LEAF {
                self.end_of_table = true;
                return Ok(());
            }
            self.leaves_visited += 1;
            if self.leaves_visited > self.table.pager.num_pages() {
                return Err(DbError::CorruptPage {
                    page_num: next,
                    reason: "leaf sibling links form a cycle".into(),
                });
            }
            self.page_num = next;
            self.cell_num = 0;
        }
        Ok(())
    }

    /// Inserts `row` at the cursor's slot, splitting nodes as needed.
    pub fn insert(&mut self, row: &Row) -> Result<()> {
        let tree = self.table.tree;
        btree::leaf_insert(
            &mut self.table.pager,
            tree,
            self.page_num,
            self.cell_num,
            row,
        )
    }
}

/// Cell count of the leaf on `page_num`, refusing anything that is not a
/// well-formed leaf.
fn leaf_len(table: &mut Table, page_num: u32) -> Result<usize> {
    let page = table.pager.get_page(page_num)?;
    match checked_node_type(page, page_num)? {
        NodeType::Leaf => Ok(leaf_num_cells(page)),
        NodeType::Internal => Err(DbError::CorruptPage {
            page_num,
            reason: "expected a leaf, found an internal node".into(),
        }),
    }
}
