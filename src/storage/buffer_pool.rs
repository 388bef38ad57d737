//! Buffer pool for MoonSQL
//!
//! A bounded cache of pages keyed by `(table, page_id)` with a pluggable
//! replacement policy. Callers pin pages through handles and must unpin
//! them promptly; only unpinned frames are eviction candidates, and a dirty
//! victim is written back before its frame is reused.

use crate::error::{Error, Result};
use crate::storage::file_manager::FileManager;
use crate::storage::page::{PageId, SlottedPage};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Default number of frames
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// A global page identifier (table, page_id)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub table: String,
    pub page_id: PageId,
}

impl PageKey {
    pub fn new(table: impl Into<String>, page_id: PageId) -> Self {
        Self {
            table: table.into(),
            page_id,
        }
    }
}

/// A pinned reference to a page resident in the pool. The handle must be
/// returned via [`BufferPool::unpin`] before the next statement begins.
#[derive(Debug)]
pub struct PageHandle {
    key: PageKey,
    frame: usize,
}

impl PageHandle {
    pub fn key(&self) -> &PageKey {
        &self.key
    }

    pub fn page_id(&self) -> PageId {
        self.key.page_id
    }
}

/// Replacement policy: the pool reports accesses, the policy picks victims
/// among the currently unpinned frames. `forget` drops a frame that left the
/// pool outside the victim path (table eviction).
pub trait ReplacementPolicy: std::fmt::Debug + Send {
    fn name(&self) -> &'static str;
    fn record_access(&mut self, frame: usize);
    fn pick_victim(&mut self, unpinned: &[usize]) -> Option<usize>;
    fn forget(&mut self, frame: usize);
}

/// Least-recently-used replacement
#[derive(Debug, Default)]
pub struct LruPolicy {
    /// Frames in access order, least recent first
    order: Vec<usize>,
}

impl ReplacementPolicy for LruPolicy {
    fn name(&self) -> &'static str {
        "LRU"
    }

    fn record_access(&mut self, frame: usize) {
        if let Some(pos) = self.order.iter().position(|&f| f == frame) {
            self.order.remove(pos);
        }
        self.order.push(frame);
    }

    fn pick_victim(&mut self, unpinned: &[usize]) -> Option<usize> {
        let pos = self.order.iter().position(|f| unpinned.contains(f))?;
        Some(self.order.remove(pos))
    }

    fn forget(&mut self, frame: usize) {
        self.order.retain(|&f| f != frame);
    }
}

/// First-in-first-out replacement: frames leave in the order they entered
/// the pool, regardless of later accesses.
#[derive(Debug, Default)]
pub struct FifoPolicy {
    queue: VecDeque<usize>,
    resident: HashSet<usize>,
}

impl ReplacementPolicy for FifoPolicy {
    fn name(&self) -> &'static str {
        "FIFO"
    }

    fn record_access(&mut self, frame: usize) {
        if self.resident.insert(frame) {
            self.queue.push_back(frame);
        }
    }

    fn pick_victim(&mut self, unpinned: &[usize]) -> Option<usize> {
        let pos = self.queue.iter().position(|f| unpinned.contains(f))?;
        let frame = self.queue.remove(pos).unwrap();
        self.resident.remove(&frame);
        Some(frame)
    }

    fn forget(&mut self, frame: usize) {
        if self.resident.remove(&frame) {
            self.queue.retain(|&f| f != frame);
        }
    }
}

/// Replacement policy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Lru,
    Fifo,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn ReplacementPolicy> {
        match self {
            PolicyKind::Lru => Box::<LruPolicy>::default(),
            PolicyKind::Fifo => Box::<FifoPolicy>::default(),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(PolicyKind::Lru),
            "fifo" => Ok(PolicyKind::Fifo),
            other => Err(format!("unknown replacement policy '{}'", other)),
        }
    }
}

/// Buffer pool statistics
#[derive(Debug, Clone, Serialize)]
pub struct BufferPoolStats {
    pub policy: String,
    pub capacity: usize,
    pub cached_pages: usize,
    pub dirty_pages: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

#[derive(Debug)]
struct Frame {
    key: Option<PageKey>,
    page: SlottedPage,
    dirty: bool,
    pin_count: u32,
}

/// Bounded page cache
#[derive(Debug)]
pub struct BufferPool {
    frames: Vec<Frame>,
    page_table: HashMap<PageKey, usize>,
    free_list: Vec<usize>,
    policy: Box<dyn ReplacementPolicy>,
    file_manager: Arc<FileManager>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl BufferPool {
    pub fn new(file_manager: Arc<FileManager>, capacity: usize, policy: PolicyKind) -> Self {
        assert!(capacity > 0, "buffer pool capacity must be positive");

        let mut frames = Vec::with_capacity(capacity);
        let mut free_list = Vec::with_capacity(capacity);
        for i in 0..capacity {
            frames.push(Frame {
                key: None,
                page: SlottedPage::new(0),
                dirty: false,
                pin_count: 0,
            });
            free_list.push(i);
        }
        free_list.reverse();

        Self {
            frames,
            page_table: HashMap::new(),
            free_list,
            policy: policy.build(),
            file_manager,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Fetch a page, pinning it. On a miss the page is read through the file
    /// manager into a frame chosen by the replacement policy.
    pub fn get(&mut self, table: &str, page_id: PageId) -> Result<PageHandle> {
        let key = PageKey::new(table, page_id);

        if let Some(&frame) = self.page_table.get(&key) {
            self.hits += 1;
            self.frames[frame].pin_count += 1;
            self.policy.record_access(frame);
            return Ok(PageHandle { key, frame });
        }

        self.misses += 1;
        // Read before choosing a victim so an I/O failure cannot orphan
        // a frame.
        let bytes = self.file_manager.read_page(table, page_id)?;
        let page = SlottedPage::from_bytes(&bytes)?;
        let frame = self.victim_frame()?;

        self.frames[frame] = Frame {
            key: Some(key.clone()),
            page,
            dirty: false,
            pin_count: 1,
        };
        self.page_table.insert(key.clone(), frame);
        self.policy.record_access(frame);

        Ok(PageHandle { key, frame })
    }

    /// Allocate a fresh page on disk and install a zeroed page for it,
    /// pinned and marked dirty.
    pub fn new_page(&mut self, table: &str) -> Result<(PageId, PageHandle)> {
        let page_id = self.file_manager.allocate_page(table)?;
        let key = PageKey::new(table, page_id);
        let frame = self.victim_frame()?;

        self.frames[frame] = Frame {
            key: Some(key.clone()),
            page: SlottedPage::new(page_id),
            dirty: true,
            pin_count: 1,
        };
        self.page_table.insert(key.clone(), frame);
        self.policy.record_access(frame);

        Ok((page_id, PageHandle { key, frame }))
    }

    /// Read access to a pinned page
    pub fn page(&self, handle: &PageHandle) -> &SlottedPage {
        &self.frames[handle.frame].page
    }

    /// Write access to a pinned page; marks the frame dirty
    pub fn page_mut(&mut self, handle: &PageHandle) -> &mut SlottedPage {
        self.frames[handle.frame].dirty = true;
        &mut self.frames[handle.frame].page
    }

    /// Mark a pinned page dirty without touching it
    pub fn mark_dirty(&mut self, handle: &PageHandle) {
        self.frames[handle.frame].dirty = true;
    }

    /// Release a pin. Consumes the handle so a released pin cannot be reused.
    pub fn unpin(&mut self, handle: PageHandle) {
        let frame = &mut self.frames[handle.frame];
        debug_assert!(frame.pin_count > 0, "unpin without a matching pin");
        if frame.pin_count > 0 {
            frame.pin_count -= 1;
        }
    }

    /// Write every dirty page back and clear the dirty bits.
    pub fn flush_all(&mut self) -> Result<()> {
        for frame in 0..self.frames.len() {
            self.flush_frame(frame)?;
        }
        Ok(())
    }

    fn flush_frame(&mut self, frame: usize) -> Result<()> {
        if let (Some(key), true) = (&self.frames[frame].key, self.frames[frame].dirty) {
            let key = key.clone();
            self.file_manager
                .write_page(&key.table, key.page_id, &self.frames[frame].page.to_bytes())?;
            self.frames[frame].dirty = false;
        }
        Ok(())
    }

    /// Drop every cached page of a table, optionally writing dirty pages
    /// back first. Fails when any of the table's pages is still pinned.
    pub fn evict_table(&mut self, table: &str, write_back: bool) -> Result<usize> {
        let victims: Vec<(PageKey, usize)> = self
            .page_table
            .iter()
            .filter(|(key, _)| key.table == table)
            .map(|(key, &frame)| (key.clone(), frame))
            .collect();

        for (_, frame) in &victims {
            if self.frames[*frame].pin_count > 0 {
                return Err(Error::BufferFull);
            }
        }

        let evicted = victims.len();
        for (key, frame) in victims {
            if write_back {
                self.flush_frame(frame)?;
            }
            self.page_table.remove(&key);
            self.policy.forget(frame);
            self.frames[frame].key = None;
            self.frames[frame].dirty = false;
            self.free_list.push(frame);
        }
        self.evictions += evicted as u64;
        Ok(evicted)
    }

    /// Pool statistics
    pub fn stats(&self) -> BufferPoolStats {
        let total = self.hits + self.misses;
        BufferPoolStats {
            policy: self.policy.name().to_string(),
            capacity: self.frames.len(),
            cached_pages: self.page_table.len(),
            dirty_pages: self.frames.iter().filter(|f| f.dirty).count(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_ratio: if total > 0 {
                self.hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Number of frames currently pinned
    pub fn pinned_frames(&self) -> usize {
        self.frames.iter().filter(|f| f.pin_count > 0).count()
    }

    fn victim_frame(&mut self) -> Result<usize> {
        if let Some(frame) = self.free_list.pop() {
            return Ok(frame);
        }

        let unpinned: Vec<usize> = self
            .frames
            .iter()
            .enumerate()
            .filter(|(_, f)| f.key.is_some() && f.pin_count == 0)
            .map(|(i, _)| i)
            .collect();

        let frame = self
            .policy
            .pick_victim(&unpinned)
            .ok_or(Error::BufferFull)?;

        let key = self.frames[frame]
            .key
            .clone()
            .ok_or_else(|| Error::Internal("victim frame has no page".to_string()))?;
        let was_dirty = self.frames[frame].dirty;
        if was_dirty {
            self.flush_frame(frame)?;
        }
        self.page_table.remove(&key);
        self.frames[frame].key = None;
        self.evictions += 1;
        debug!(
            table = %key.table,
            page_id = key.page_id,
            was_dirty,
            policy = self.policy.name(),
            "evicting page"
        );

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn setup(capacity: usize, policy: PolicyKind) -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let fm = Arc::new(FileManager::open(dir.path()).unwrap());
        fm.create_table_file("t").unwrap();
        for _ in 0..6 {
            fm.allocate_page("t").unwrap();
        }
        let pool = BufferPool::new(fm, capacity, policy);
        (dir, pool)
    }

    #[test]
    fn test_hits_and_misses() {
        let (_dir, mut pool) = setup(3, PolicyKind::Lru);

        let h = pool.get("t", 0).unwrap();
        pool.unpin(h);
        let h = pool.get("t", 0).unwrap();
        pool.unpin(h);

        let stats = pool.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let (_dir, mut pool) = setup(3, PolicyKind::Lru);

        for page_id in 0..3 {
            let h = pool.get("t", page_id).unwrap();
            pool.unpin(h);
        }
        // Touch page 0 so page 1 is now the least recently used.
        let h = pool.get("t", 0).unwrap();
        pool.unpin(h);

        let h = pool.get("t", 3).unwrap();
        pool.unpin(h);

        assert_eq!(pool.stats().evictions, 1);
        // Pages 0, 2, 3 are resident; fetching page 1 misses.
        let misses_before = pool.stats().misses;
        let h = pool.get("t", 0).unwrap();
        pool.unpin(h);
        assert_eq!(pool.stats().misses, misses_before);
        let h = pool.get("t", 1).unwrap();
        pool.unpin(h);
        assert_eq!(pool.stats().misses, misses_before + 1);
    }

    #[test]
    fn test_fifo_ignores_recency() {
        let (_dir, mut pool) = setup(3, PolicyKind::Fifo);

        for page_id in 0..3 {
            let h = pool.get("t", page_id).unwrap();
            pool.unpin(h);
        }
        // Re-accessing page 0 must not save it under FIFO.
        let h = pool.get("t", 0).unwrap();
        pool.unpin(h);

        let h = pool.get("t", 3).unwrap();
        pool.unpin(h);

        // Page 0 was the first in, so it was evicted.
        let misses_before = pool.stats().misses;
        let h = pool.get("t", 0).unwrap();
        pool.unpin(h);
        assert_eq!(pool.stats().misses, misses_before + 1);
    }

    #[test]
    fn test_all_pinned_is_buffer_full() {
        let (_dir, mut pool) = setup(2, PolicyKind::Lru);

        let h0 = pool.get("t", 0).unwrap();
        let h1 = pool.get("t", 1).unwrap();
        let err = pool.get("t", 2).unwrap_err();
        assert!(matches!(err, Error::BufferFull));

        pool.unpin(h0);
        pool.unpin(h1);
        assert!(pool.get("t", 2).is_ok());
    }

    #[test]
    fn test_dirty_victim_written_back() {
        let (_dir, mut pool) = setup(1, PolicyKind::Lru);

        let h = pool.get("t", 0).unwrap();
        pool.page_mut(&h).insert(b"survives eviction").unwrap();
        pool.unpin(h);

        // Force page 0 out of the single frame.
        let h = pool.get("t", 1).unwrap();
        pool.unpin(h);

        let h = pool.get("t", 0).unwrap();
        assert_eq!(pool.page(&h).read(0), Some(&b"survives eviction"[..]));
        pool.unpin(h);
    }

    #[test]
    fn test_flush_all_clears_dirty_bits() {
        let (_dir, mut pool) = setup(4, PolicyKind::Lru);

        let h = pool.get("t", 0).unwrap();
        pool.page_mut(&h).insert(b"x").unwrap();
        pool.unpin(h);
        assert_eq!(pool.stats().dirty_pages, 1);

        pool.flush_all().unwrap();
        assert_eq!(pool.stats().dirty_pages, 0);
    }

    #[test]
    fn test_pinned_frames_counter() {
        let (_dir, mut pool) = setup(4, PolicyKind::Lru);
        let h0 = pool.get("t", 0).unwrap();
        let h1 = pool.get("t", 1).unwrap();
        assert_eq!(pool.pinned_frames(), 2);
        pool.unpin(h0);
        pool.unpin(h1);
        assert_eq!(pool.pinned_frames(), 0);
    }

    #[test]
    fn test_new_page_is_pinned_and_dirty() {
        let (_dir, mut pool) = setup(4, PolicyKind::Lru);
        let (page_id, handle) = pool.new_page("t").unwrap();
        assert_eq!(page_id, 6);
        assert_eq!(pool.pinned_frames(), 1);
        assert_eq!(pool.stats().dirty_pages, 1);
        pool.unpin(handle);
    }
}
