use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::btree::{self, Tree};
use crate::cursor::Cursor;
use crate::error::{DbError, Result};
use crate::node::{checked_node_type, initialize_leaf, is_root, set_root};
use crate::pager::Pager;
use crate::row::Row;

/// An open database: the pager plus where the tree is rooted.
pub struct Table {
    pub(crate) pager: Pager,
    pub(crate) tree: Tree,
}

impl Table {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut pager = Pager::open(path)?;
        let root_page_num = 0;

        if pager.num_pages() == 0 {
            pager.allocate_page()?;
            let root = pager.get_page(root_page_num)?;
            initialize_leaf(root);
            set_root(root, true);
            info!("initialized empty database");
        } else {
            let root = pager.get_page(root_page_num)?;
            checked_node_type(root, root_page_num)?;
            if !is_root(root) {
                return Err(DbError::MissingRoot(root_page_num));
            }
        }

        Ok(Self {
            pager,
            tree: Tree::new(root_page_num),
        })
    }

    /// Flushes every touched page and releases the file.
    pub fn close(self) -> Result<()> {
        self.pager.close()
    }

    pub fn root_page_num(&self) -> u32 {
        self.tree.root()
    }

    /// Cursor at the first row in key order.
    pub fn start(&mut self) -> Result<Cursor<'_>> {
        let page_num = btree::leftmost_leaf(&mut self.pager, self.tree.root)?;
        Cursor::new(self, page_num, 0)
    }

    /// Cursor at the slot where `key` is, or would be inserted.
    pub fn find(&mut self, key: u32) -> Result<Cursor<'_>> {
        let (page_num, cell_num) = btree::find_leaf(&mut self.pager, self.tree.root, key)?;
        Cursor::new(self, page_num, cell_num)
    }

    pub fn insert(&mut self, row: &Row) -> Result<()> {
        let mut cursor = self.find(row.id)?;
        if !cursor.end_of_table() && cursor.key()? == row.id {
            return Err(DbError::DuplicateKey);
        }
        cursor.insert(row)
    }

    /// Every row in ascending id order.
    pub fn select(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        let mut cursor = self.start()?;
        while !cursor.end_of_table() {
            rows.push(cursor.row()?);
            cursor.advance()?;
        }
        Ok(rows)
    }

    /// Writes the tree layout shown by `.btree`.
    pub fn render_tree<W: Write>(&mut self, out: &mut W) -> Result<()> {
        btree::render(&mut self.pager, self.tree.root, 0, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{
        LEAF_NODE_MAX_CELLS, NodeType, initialize_internal, internal_child, internal_key,
        internal_num_keys, leaf_key, leaf_next_leaf, leaf_num_cells, node_type, parent,
        set_internal_right_child, set_leaf_next_leaf, set_leaf_num_cells,
    };
    use crate::{COLUMN_EMAIL_SIZE, COLUMN_USERNAME_SIZE, PAGE_SIZE};
    use tempfile::{TempDir, tempdir};

    fn open_temp() -> (TempDir, std::path::PathBuf, Table) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let table = Table::open(&path).unwrap();
        (dir, path, table)
    }

    fn row(id: u32) -> Row {
        Row::new(id, format!("user{id}"), format!("person{id}@example.com"))
    }

    fn ids(table: &mut Table) -> Vec<u32> {
        table.select().unwrap().iter().map(|r| r.id).collect()
    }

    fn tree(table: &mut Table) -> String {
        let mut out = Vec::new();
        table.render_tree(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    /// Walks the subtree, checking parent pointers, separators and capacity.
    /// Returns its depth and its keys in tree order.
    fn check_subtree(table: &mut Table, page_num: u32, depth: usize) -> (usize, Vec<u32>) {
        let page = *table.pager.get_page(page_num).unwrap();
        match node_type(&page).unwrap() {
            NodeType::Leaf => {
                let num_cells = leaf_num_cells(&page);
                assert!(num_cells <= LEAF_NODE_MAX_CELLS);
                let keys = (0..num_cells).map(|i| leaf_key(&page, i)).collect();
                (depth, keys)
            }
            NodeType::Internal => {
                let num_keys = internal_num_keys(&page);
                assert!(num_keys >= 1 && num_keys <= table.tree.max_internal_keys);
                let mut keys = Vec::new();
                let mut leaf_depth = None;
                for child_num in 0..=num_keys {
                    let child = internal_child(&page, child_num);
                    let child_parent = parent(table.pager.get_page(child).unwrap());
                    assert_eq!(child_parent, page_num, "parent of page {child}");

                    let (d, child_keys) = check_subtree(table, child, depth + 1);
                    assert_eq!(*leaf_depth.get_or_insert(d), d, "leaves at uneven depth");
                    if child_num < num_keys {
                        assert_eq!(child_keys.last(), Some(&internal_key(&page, child_num)));
                    }
                    keys.extend(child_keys);
                }
                (leaf_depth.unwrap_or(depth), keys)
            }
        }
    }

    fn check_tree(table: &mut Table) -> (usize, Vec<u32>) {
        let root = table.root_page_num();
        assert!(is_root(table.pager.get_page(root).unwrap()));
        let (depth, keys) = check_subtree(table, root, 1);
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "keys out of order");
        (depth, keys)
    }

    #[test]
    fn new_database_is_an_empty_root_leaf() {
        let (_dir, path, mut table) = open_temp();
        assert!(table.select().unwrap().is_empty());
        assert_eq!(tree(&mut table), "- leaf (size 0)\n");
        table.close().unwrap();

        assert_eq!(std::fs::metadata(&path).unwrap().len(), PAGE_SIZE as u64);
        let mut table = Table::open(&path).unwrap();
        assert!(table.select().unwrap().is_empty());
    }

    #[test]
    fn rows_come_back_in_key_order() {
        let (_dir, _path, mut table) = open_temp();
        for id in [3, 1, 2] {
            table.insert(&row(id)).unwrap();
        }
        assert_eq!(table.select().unwrap(), vec![row(1), row(2), row(3)]);
        assert_eq!(
            tree(&mut table),
            "- leaf (size 3)\n  - 1\n  - 2\n  - 3\n"
        );
    }

    #[test]
    fn maximum_length_strings_round_trip() {
        let (_dir, _path, mut table) = open_temp();
        let long = Row::new(
            1,
            "a".repeat(COLUMN_USERNAME_SIZE),
            "b".repeat(COLUMN_EMAIL_SIZE),
        );
        table.insert(&long).unwrap();
        assert_eq!(table.select().unwrap(), vec![long]);
    }

    #[test]
    fn duplicate_keys_are_rejected_without_side_effects() {
        let (_dir, _path, mut table) = open_temp();
        table.insert(&row(1)).unwrap();
        let other = Row::new(1, "someone", "else@example.com");

        assert!(matches!(table.insert(&other), Err(DbError::DuplicateKey)));
        assert_eq!(table.select().unwrap(), vec![row(1)]);
    }

    #[test]
    fn duplicate_detected_inside_a_split_tree() {
        let (_dir, _path, mut table) = open_temp();
        for id in 1..=30 {
            table.insert(&row(id)).unwrap();
        }
        for id in [1, 7, 8, 14, 30] {
            assert!(matches!(table.insert(&row(id)), Err(DbError::DuplicateKey)));
        }
        assert_eq!(ids(&mut table), (1..=30).collect::<Vec<_>>());
    }

    #[test]
    fn fourteen_keys_split_the_root_leaf() {
        let (_dir, _path, mut table) = open_temp();
        for id in 1..=14 {
            table.insert(&row(id)).unwrap();
        }

        let mut expected = String::from("- internal (size 1)\n  - leaf (size 7)\n");
        for id in 1..=7 {
            expected.push_str(&format!("    - {id}\n"));
        }
        expected.push_str("  - key 7\n  - leaf (size 7)\n");
        for id in 8..=14 {
            expected.push_str(&format!("    - {id}\n"));
        }
        assert_eq!(tree(&mut table), expected);
        assert_eq!(table.root_page_num(), 0);

        table.insert(&row(15)).unwrap();
        assert_eq!(ids(&mut table), (1..=15).collect::<Vec<_>>());
        check_tree(&mut table);
    }

    #[test]
    fn splitting_a_middle_leaf_updates_the_separator() {
        let (_dir, _path, mut table) = open_temp();
        for id in (10..=140).step_by(10) {
            table.insert(&row(id)).unwrap();
        }
        // Left leaf now holds 10..=70; fill it and force a split there.
        for id in 1..=7 {
            table.insert(&row(id)).unwrap();
        }
        let (depth, keys) = check_tree(&mut table);
        assert_eq!(depth, 2);
        assert_eq!(keys, ids(&mut table));
        assert_eq!(keys.len(), 21);
    }

    #[test]
    fn sequential_inserts_grow_a_three_level_tree() {
        let (_dir, path, mut table) = open_temp();
        let count = 4_000;
        for id in 1..=count {
            table.insert(&row(id)).unwrap();
        }

        let (depth, keys) = check_tree(&mut table);
        assert_eq!(depth, 3);
        assert_eq!(keys, (1..=count).collect::<Vec<_>>());
        table.close().unwrap();

        let mut table = Table::open(&path).unwrap();
        assert_eq!(table.select().unwrap().len(), count as usize);
        assert_eq!(table.select().unwrap()[1234], row(1235));
        table.insert(&row(count + 1)).unwrap();
        assert!(matches!(table.insert(&row(17)), Err(DbError::DuplicateKey)));
        check_tree(&mut table);
    }

    #[test]
    fn scattered_inserts_keep_every_invariant() {
        let (_dir, path, mut table) = open_temp();
        let count: u32 = 8_000;
        // 7919 is prime, so this visits every id in 1..=count once.
        for i in 0..count {
            table.insert(&row((i * 7919) % count + 1)).unwrap();
        }

        let (depth, keys) = check_tree(&mut table);
        assert!(depth >= 3);
        assert_eq!(keys, (1..=count).collect::<Vec<_>>());
        assert_eq!(ids(&mut table), keys);
        table.close().unwrap();

        let mut table = Table::open(&path).unwrap();
        let rows = table.select().unwrap();
        assert_eq!(rows.len(), count as usize);
        assert_eq!(rows[4999], row(5000));
        check_tree(&mut table);
    }

    #[test]
    fn refuses_a_file_without_a_root() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rootless.db");
        let mut page = vec![0u8; PAGE_SIZE];
        page[0] = NodeType::Leaf as u8;
        std::fs::write(&path, page).unwrap();

        assert!(matches!(Table::open(&path), Err(DbError::MissingRoot(0))));
    }

    #[test]
    fn refuses_a_file_with_a_bad_node_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0xffu8; PAGE_SIZE]).unwrap();

        assert!(matches!(
            Table::open(&path),
            Err(DbError::UnknownNodeType(0xff))
        ));
    }

    /// Opens a table whose internal nodes split after `max_keys` keys.
    fn open_narrow(path: &std::path::Path, max_keys: usize) -> Table {
        let mut table = Table::open(path).unwrap();
        table.tree = table.tree.with_max_internal_keys(max_keys);
        table
    }

    #[test]
    fn narrow_internal_nodes_split_below_the_root() {
        for max_keys in [3, 4, 5] {
            let dir = tempdir().unwrap();
            let path = dir.path().join("narrow.db");
            let mut table = open_narrow(&path, max_keys);
            let count: u32 = 3_000;
            for i in 0..count {
                table.insert(&row((i * 7919) % count + 1)).unwrap();
            }

            // Depth four needs the root's internal children to have split.
            let (depth, keys) = check_tree(&mut table);
            assert!(depth >= 4, "fanout {max_keys} only reached depth {depth}");
            assert_eq!(keys, (1..=count).collect::<Vec<_>>());
            assert_eq!(ids(&mut table), keys);
            table.close().unwrap();

            let mut table = open_narrow(&path, max_keys);
            check_tree(&mut table);
            for id in count + 1..=count + 200 {
                table.insert(&row(id)).unwrap();
            }
            assert!(matches!(table.insert(&row(1500)), Err(DbError::DuplicateKey)));
            let (_, keys) = check_tree(&mut table);
            assert_eq!(keys, (1..=count + 200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn narrow_tree_grows_under_sequential_and_descending_inserts() {
        let dir = tempdir().unwrap();

        let mut ascending = open_narrow(&dir.path().join("up.db"), 3);
        for id in 1..=2_000 {
            ascending.insert(&row(id)).unwrap();
        }
        let (depth, keys) = check_tree(&mut ascending);
        assert!(depth >= 4);
        assert_eq!(keys, (1..=2_000).collect::<Vec<_>>());

        let mut descending = open_narrow(&dir.path().join("down.db"), 3);
        for id in (1..=2_000).rev() {
            descending.insert(&row(id)).unwrap();
        }
        let (depth, keys) = check_tree(&mut descending);
        assert!(depth >= 4);
        assert_eq!(ids(&mut descending), keys);
    }

    fn write_pages(path: &std::path::Path, pages: &[Box<[u8; PAGE_SIZE]>]) {
        let bytes: Vec<u8> = pages.iter().flat_map(|page| page.iter().copied()).collect();
        std::fs::write(path, bytes).unwrap();
    }

    fn root_leaf() -> Box<[u8; PAGE_SIZE]> {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        initialize_leaf(&mut page);
        set_root(&mut page, true);
        page
    }

    #[test]
    fn refuses_a_leaf_with_too_many_cells() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("crowded.db");
        let mut root = root_leaf();
        set_leaf_num_cells(&mut root, 200);
        write_pages(&path, &[root]);

        assert!(matches!(
            Table::open(&path),
            Err(DbError::CorruptPage { page_num: 0, .. })
        ));
    }

    #[test]
    fn corrupt_child_pages_fail_select_and_insert() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("child.db");
        let mut root = Box::new([0u8; PAGE_SIZE]);
        initialize_internal(&mut root);
        set_root(&mut root, true);
        set_internal_right_child(&mut root, 1);
        let mut leaf = root_leaf();
        set_root(&mut leaf, false);
        set_leaf_num_cells(&mut leaf, 200);
        write_pages(&path, &[root, leaf]);

        let mut table = Table::open(&path).unwrap();
        assert!(matches!(
            table.select(),
            Err(DbError::CorruptPage { page_num: 1, .. })
        ));
        assert!(matches!(
            table.insert(&row(1)),
            Err(DbError::CorruptPage { page_num: 1, .. })
        ));
        assert!(matches!(
            table.render_tree(&mut Vec::<u8>::new()),
            Err(DbError::CorruptPage { page_num: 1, .. })
        ));
    }

    #[test]
    fn dangling_right_child_fails_without_allocating() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dangling.db");
        let mut root = Box::new([0u8; PAGE_SIZE]);
        initialize_internal(&mut root);
        set_root(&mut root, true);
        // u32::MAX is also the "no right child" marker.
        set_internal_right_child(&mut root, u32::MAX);
        write_pages(&path, &[root]);

        let mut table = Table::open(&path).unwrap();
        assert!(matches!(
            table.select(),
            Err(DbError::PageOutOfBounds {
                page_num: u32::MAX,
                num_pages: 1
            })
        ));
        assert!(table.find(7).is_err());
        assert_eq!(table.pager.num_pages(), 1);
    }

    #[test]
    fn sibling_link_cycle_ends_the_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("looped.db");
        let mut table = Table::open(&path).unwrap();
        for id in 1..=14 {
            table.insert(&row(id)).unwrap();
        }
        let left = btree::leftmost_leaf(&mut table.pager, 0).unwrap();
        let right = leaf_next_leaf(table.pager.get_page(left).unwrap());
        set_leaf_next_leaf(table.pager.get_page(right).unwrap(), left);

        assert!(matches!(table.select(), Err(DbError::CorruptPage { .. })));
    }
}
