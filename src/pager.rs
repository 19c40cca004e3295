//! Maps page numbers onto fixed-size regions of the database file and caches
//! every page it has handed out until the pager is closed.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, info, trace};

use crate::PAGE_SIZE;
use crate::error::{DbError, Result};
use crate::node::INVALID_PAGE_NUM;

pub type Page = [u8; PAGE_SIZE];

pub struct Pager {
    file: File,
    /// Pages present in the file itself.
    file_pages: u32,
    /// Pages on disk plus any touched since open.
    num_pages: u32,
    pages: Vec<Option<Box<Page>>>,
}

impl Pager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| DbError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let length = file.metadata()?.len();
        if length % PAGE_SIZE as u64 != 0 {
            return Err(DbError::CorruptFile { length });
        }
        let file_pages =
            u32::try_from(length / PAGE_SIZE as u64).map_err(|_| DbError::CorruptFile { length })?;

        info!(path = %path.display(), pages = file_pages, "opened database file");
        Ok(Self {
            file,
            file_pages,
            num_pages: file_pages,
            pages: Vec::new(),
        })
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Returns the page, reading it from disk on a cache miss. Pages allocated
    /// past the end of the file come back zeroed; anything beyond
    /// `num_pages` is a dangling pointer in the file.
    pub fn get_page(&mut self, page_num: u32) -> Result<&mut Page> {
        if page_num >= self.num_pages {
            return Err(DbError::PageOutOfBounds {
                page_num,
                num_pages: self.num_pages,
            });
        }
        let index = page_num as usize;
        if index >= self.pages.len() {
            self.pages.resize_with(index + 1, || None);
        }

        let slot = &mut self.pages[index];
        if slot.is_none() {
            let mut page = Box::new([0u8; PAGE_SIZE]);
            if page_num < self.file_pages {
                debug!(page_num, "loading page from disk");
                self.file
                    .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
                self.file.read_exact(page.as_mut_slice())?;
            } else {
                trace!(page_num, "fresh page");
            }
            *slot = Some(page);
        }
        let page: &mut Page = slot.get_or_insert_with(|| Box::new([0u8; PAGE_SIZE]));
        Ok(page)
    }

    /// Hands out the next page number that has never been used.
    pub fn allocate_page(&mut self) -> Result<u32> {
        let page_num = self.num_pages;
        if page_num == INVALID_PAGE_NUM {
            return Err(DbError::PageOutOfBounds {
                page_num,
                num_pages: self.num_pages,
            });
        }
        self.num_pages += 1;
        self.get_page(page_num)?;
        debug!(page_num, "allocated page");
        Ok(page_num)
    }

    /// Writes one whole page back to its slot in the file.
    pub fn flush(&mut self, page_num: u32) -> Result<()> {
        let page = self
            .pages
            .get(page_num as usize)
            .and_then(|slot| slot.as_deref())
            .ok_or(DbError::FlushUncached(page_num))?;

        self.file
            .seek(SeekFrom::Start(page_num as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(page)?;
        if page_num >= self.file_pages {
            self.file_pages = page_num + 1;
        }
        trace!(page_num, "flushed page");
        Ok(())
    }

    /// Flushes every cached page and releases the file.
    pub fn close(mut self) -> Result<()> {
        for page_num in 0..self.pages.len() as u32 {
            if self.pages[page_num as usize].is_some() {
                self.flush(page_num)?;
            }
        }
        self.file.sync_all()?;
        info!(pages = self.num_pages, "closed database file");
        Ok(())
    }
}
