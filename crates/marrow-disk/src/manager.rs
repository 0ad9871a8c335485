//! Disk manager for page-level file I/O.

use marrow_common::page::{PageId, PAGE_SIZE};
use marrow_common::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskManagerConfig {
    /// Base directory for the data file.
    pub data_dir: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for DiskManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: true,
        }
    }
}

/// Manages reading and writing pages to the data file.
///
/// Page ids map directly to file offsets (`page_id * PAGE_SIZE`). Reading a
/// page past the end of the file yields a zeroed buffer: the buffer pool
/// allocates ids without touching the disk, so a page that was never flushed
/// reads back as zeroes.
pub struct DiskManager {
    /// Configuration.
    config: DiskManagerConfig,
    /// The data file handle.
    file: Mutex<File>,
}

impl DiskManager {
    /// Name of the data file within `data_dir`.
    const DATA_FILE: &'static str = "marrow.dat";

    /// Creates a new disk manager, creating the data file if needed.
    pub fn new(config: DiskManagerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let path = config.data_dir.join(Self::DATA_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        Ok(Self {
            config,
            file: Mutex::new(file),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Reads a page from disk.
    ///
    /// Bytes beyond the end of the file read as zero.
    pub fn read_page(&self, page_id: PageId) -> Result<Box<[u8; PAGE_SIZE]>> {
        let mut buffer = Box::new([0u8; PAGE_SIZE]);

        let mut file = self.file.lock();
        let file_len = file.metadata()?.len();
        let offset = page_id.offset();
        if offset >= file_len {
            return Ok(buffer);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buffer[..available])?;

        Ok(buffer)
    }

    /// Writes a page to disk, extending the file if needed.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(page_id.offset()))?;
        file.write_all(data)?;

        if self.config.fsync_enabled {
            file.sync_all()?;
        }

        Ok(())
    }

    /// Returns the number of pages currently backed by the data file.
    pub fn num_pages(&self) -> Result<u32> {
        let file = self.file.lock();
        let file_len = file.metadata()?.len();
        Ok((file_len / PAGE_SIZE as u64) as u32)
    }

    /// Flushes all pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.file.lock().sync_all()?;
        Ok(())
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.file.lock().sync_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = DiskManagerConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
        };
        let dm = DiskManager::new(config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_disk_manager_new() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(dm.data_dir().exists());
        assert_eq!(dm.num_pages().unwrap(), 0);
    }

    #[test]
    fn test_disk_manager_write_read() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[0] = 0xAB;
        data[100] = 0xCD;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(PageId(0), &data).unwrap();

        let read_data = dm.read_page(PageId(0)).unwrap();
        assert_eq!(read_data[0], 0xAB);
        assert_eq!(read_data[100], 0xCD);
        assert_eq!(read_data[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_disk_manager_read_unwritten_page_is_zeroed() {
        let (dm, _dir) = create_test_disk_manager();

        dm.write_page(PageId(0), &[1u8; PAGE_SIZE]).unwrap();

        // Page 5 was never written; it reads back as zeroes.
        let data = dm.read_page(PageId(5)).unwrap();
        assert!(data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_disk_manager_sparse_write_extends_file() {
        let (dm, _dir) = create_test_disk_manager();

        let mut data = Box::new([0u8; PAGE_SIZE]);
        data[0] = 0x77;
        dm.write_page(PageId(3), &data).unwrap();

        assert_eq!(dm.num_pages().unwrap(), 4);
        // Pages before the written one read as zeroes.
        assert!(dm.read_page(PageId(1)).unwrap().iter().all(|&b| b == 0));
        assert_eq!(dm.read_page(PageId(3)).unwrap()[0], 0x77);
    }

    #[test]
    fn test_disk_manager_overwrite_page() {
        let (dm, _dir) = create_test_disk_manager();

        dm.write_page(PageId(0), &[0xAA; PAGE_SIZE]).unwrap();
        dm.write_page(PageId(0), &[0xBB; PAGE_SIZE]).unwrap();

        let read_data = dm.read_page(PageId(0)).unwrap();
        assert_eq!(read_data[0], 0xBB);
    }

    #[test]
    fn test_disk_manager_persistence() {
        let dir = tempdir().unwrap();

        {
            let config = DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            dm.write_page(PageId(2), &[0xFF; PAGE_SIZE]).unwrap();
        }

        // Reopen with a new disk manager.
        {
            let config = DiskManagerConfig {
                data_dir: dir.path().to_path_buf(),
                fsync_enabled: true,
            };
            let dm = DiskManager::new(config).unwrap();
            assert_eq!(dm.num_pages().unwrap(), 3);
            assert_eq!(dm.read_page(PageId(2)).unwrap()[0], 0xFF);
        }
    }

    #[test]
    fn test_disk_manager_flush() {
        let (dm, _dir) = create_test_disk_manager();
        dm.write_page(PageId(0), &[1u8; PAGE_SIZE]).unwrap();
        dm.flush().unwrap();
    }
}
