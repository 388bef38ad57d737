//! File manager for MoonSQL
//!
//! Maps each table to a `<table>.tbl` file of 4096-byte pages inside the
//! data directory. All reads and writes are page-aligned; the file manager
//! holds no cache of page contents.

use crate::error::{Error, Result};
use crate::storage::page::{PageId, SlottedPage, PAGE_SIZE};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File manager
#[derive(Debug)]
pub struct FileManager {
    /// File handles for open tables
    open_files: Mutex<HashMap<String, File>>,
    /// Directory where data files are stored
    data_dir: PathBuf,
}

impl FileManager {
    /// Open a file manager rooted at the given data directory, creating the
    /// directory if needed.
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        std::fs::create_dir_all(data_dir.as_ref())?;
        Ok(Self {
            open_files: Mutex::new(HashMap::new()),
            data_dir: data_dir.as_ref().to_path_buf(),
        })
    }

    /// Path of a table's `.tbl` file
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{}.tbl", table))
    }

    /// Data directory this manager is rooted at
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Check whether a table file exists on disk
    pub fn table_exists(&self, table: &str) -> bool {
        self.table_path(table).exists()
    }

    /// Create an empty table file
    pub fn create_table_file(&self, table: &str) -> Result<()> {
        let path = self.table_path(table);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let mut open_files = self.open_files.lock().unwrap();
        open_files.insert(table.to_string(), file);
        Ok(())
    }

    /// Read one page into a fresh buffer
    pub fn read_page(&self, table: &str, page_id: PageId) -> Result<Vec<u8>> {
        let mut open_files = self.open_files.lock().unwrap();
        let file = self.get_file_mut(&mut open_files, table)?;
        let mut data = vec![0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Write one page at its page-aligned offset
    pub fn write_page(&self, table: &str, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            return Err(Error::Internal(format!(
                "refusing to write {}-byte page image",
                data.len()
            )));
        }
        let mut open_files = self.open_files.lock().unwrap();
        let file = self.get_file_mut(&mut open_files, table)?;
        file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        file.write_all(data)?;
        file.flush()?;
        Ok(())
    }

    /// Extend the file by one page and return the new page's id. The page is
    /// written as a valid empty slotted page so the file never contains
    /// uninitialized images.
    pub fn allocate_page(&self, table: &str) -> Result<PageId> {
        let mut open_files = self.open_files.lock().unwrap();
        let file = self.get_file_mut(&mut open_files, table)?;
        let file_len = file.metadata()?.len();
        let page_id = (file_len / PAGE_SIZE as u64) as PageId;

        file.seek(SeekFrom::End(0))?;
        file.write_all(&SlottedPage::new(page_id).to_bytes())?;
        file.flush()?;

        Ok(page_id)
    }

    /// Number of pages in the table file
    pub fn page_count(&self, table: &str) -> Result<u32> {
        let mut open_files = self.open_files.lock().unwrap();
        let file = self.get_file_mut(&mut open_files, table)?;
        let file_len = file.metadata()?.len();
        Ok((file_len / PAGE_SIZE as u64) as u32)
    }

    /// Force file contents to stable storage
    pub fn flush(&self, table: &str) -> Result<()> {
        let mut open_files = self.open_files.lock().unwrap();
        let file = self.get_file_mut(&mut open_files, table)?;
        file.sync_all()?;
        Ok(())
    }

    /// Close and remove a table file
    pub fn delete_table_file(&self, table: &str) -> Result<()> {
        let mut open_files = self.open_files.lock().unwrap();
        open_files.remove(table);
        let path = self.table_path(table);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn get_file_mut<'a>(
        &self,
        open_files: &'a mut HashMap<String, File>,
        table: &str,
    ) -> Result<&'a mut File> {
        if !open_files.contains_key(table) {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(self.table_path(table))?;
            open_files.insert(table.to_string(), file);
        }
        Ok(open_files.get_mut(table).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_allocate_and_page_count() {
        let dir = tempdir().unwrap();
        let fm = FileManager::open(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();

        assert_eq!(fm.page_count("t").unwrap(), 0);
        assert_eq!(fm.allocate_page("t").unwrap(), 0);
        assert_eq!(fm.allocate_page("t").unwrap(), 1);
        assert_eq!(fm.page_count("t").unwrap(), 2);

        // File length stays a multiple of the page size.
        let len = std::fs::metadata(fm.table_path("t")).unwrap().len();
        assert_eq!(len, 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_write_and_read_page() {
        let dir = tempdir().unwrap();
        let fm = FileManager::open(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();
        fm.allocate_page("t").unwrap();

        let mut page = SlottedPage::new(0);
        page.insert(b"persisted").unwrap();
        fm.write_page("t", 0, &page.to_bytes()).unwrap();

        let bytes = fm.read_page("t", 0).unwrap();
        let restored = SlottedPage::from_bytes(&bytes).unwrap();
        assert_eq!(restored.read(0), Some(&b"persisted"[..]));
    }

    #[test]
    fn test_allocated_page_is_valid() {
        let dir = tempdir().unwrap();
        let fm = FileManager::open(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();
        let page_id = fm.allocate_page("t").unwrap();

        let bytes = fm.read_page("t", page_id).unwrap();
        let page = SlottedPage::from_bytes(&bytes).unwrap();
        assert_eq!(page.page_id(), page_id);
        assert_eq!(page.slot_count(), 0);
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let fm = FileManager::open(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();
        assert!(fm.read_page("t", 5).is_err());
    }

    #[test]
    fn test_delete_table_file() {
        let dir = tempdir().unwrap();
        let fm = FileManager::open(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();
        assert!(fm.table_exists("t"));
        fm.delete_table_file("t").unwrap();
        assert!(!fm.table_exists("t"));
    }
}
