//! Pooled, growable byte buffers shared by the codecs.
//!
//! A `Buffer` tracks a logical size and a read cursor over a block handed
//! out by a `Pool`. Blocks go back to the pool on `free()` or drop, so a
//! codec that runs entry after entry reuses the same allocations.

use std::cell::RefCell;
use std::sync::Mutex;

/// Blocks kept per pool; anything beyond is released to the allocator.
const MAX_CACHED_BLOCKS: usize = 8;

pub trait Pool {
    /// Hand out a block of at least `n` bytes.
    fn allocate(&self, n: usize) -> Box<[u8]>;
    fn deallocate(&self, block: Box<[u8]>);
}

fn take_fitting(blocks: &mut Vec<Box<[u8]>>, n: usize) -> Box<[u8]> {
    match blocks.iter().position(|b| b.len() >= n) {
        Some(idx) => blocks.swap_remove(idx),
        None => vec![0u8; n].into_boxed_slice(),
    }
}

fn keep_block(blocks: &mut Vec<Box<[u8]>>, block: Box<[u8]>) {
    if !block.is_empty() && blocks.len() < MAX_CACHED_BLOCKS {
        blocks.push(block);
    }
}

/// Pool for single-threaded use.
#[derive(Default)]
pub struct LocalPool {
    blocks: RefCell<Vec<Box<[u8]>>>,
}

impl LocalPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self) -> usize {
        self.blocks.borrow().len()
    }
}

impl Pool for LocalPool {
    fn allocate(&self, n: usize) -> Box<[u8]> {
        take_fitting(&mut self.blocks.borrow_mut(), n)
    }

    fn deallocate(&self, block: Box<[u8]>) {
        keep_block(&mut self.blocks.borrow_mut(), block);
    }
}

/// Pool that can be shared between threads.
pub struct SyncPool {
    blocks: Mutex<Vec<Box<[u8]>>>,
}

impl SyncPool {
    pub const fn new() -> Self {
        Self {
            blocks: Mutex::new(Vec::new()),
        }
    }

    pub fn cached(&self) -> usize {
        self.blocks.lock().map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for SyncPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool for SyncPool {
    fn allocate(&self, n: usize) -> Box<[u8]> {
        match self.blocks.lock() {
            Ok(mut blocks) => take_fitting(&mut blocks, n),
            Err(_) => vec![0u8; n].into_boxed_slice(),
        }
    }

    fn deallocate(&self, block: Box<[u8]>) {
        if let Ok(mut blocks) = self.blocks.lock() {
            keep_block(&mut blocks, block);
        }
    }
}

static DEFAULT_POOL: SyncPool = SyncPool::new();

/// Process-wide pool used when callers don't bring their own.
pub fn default_pool() -> &'static SyncPool {
    &DEFAULT_POOL
}

pub struct Buffer<'p> {
    pool: &'p dyn Pool,
    data: Box<[u8]>,
    size: usize,
    pos: usize,
}

impl<'p> Buffer<'p> {
    pub fn new(pool: &'p dyn Pool) -> Self {
        Self {
            pool,
            data: Box::default(),
            size: 0,
            pos: 0,
        }
    }

    pub fn with_capacity(pool: &'p dyn Pool, n: usize) -> Self {
        let mut buf = Self::new(pool);
        buf.grow(n);
        buf
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Ensure capacity of at least `n`. Bytes up to the current size are
    /// preserved; capacity never shrinks.
    pub fn grow(&mut self, n: usize) {
        if n <= self.data.len() {
            return;
        }
        let mut block = self.pool.allocate(n);
        block[..self.size].copy_from_slice(&self.data[..self.size]);
        let old = std::mem::replace(&mut self.data, block);
        self.pool.deallocate(old);
    }

    /// Return the backing block to the pool now.
    pub fn free(&mut self) {
        let old = std::mem::take(&mut self.data);
        self.pool.deallocate(old);
        self.size = 0;
        self.pos = 0;
    }

    /// Bytes written but not yet consumed.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.pos..self.size]
    }

    pub fn remaining(&self) -> usize {
        self.size - self.pos
    }

    pub fn consume(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.size);
    }

    /// Writable space past the logical size.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.size..]
    }

    /// Mark `n` bytes of spare space as written.
    pub fn advance(&mut self, n: usize) {
        self.size = (self.size + n).min(self.data.len());
    }

    pub fn clear(&mut self) {
        self.size = 0;
        self.pos = 0;
    }

    /// Move unread bytes to the front so the spare space is maximal.
    pub fn compact(&mut self) {
        if self.pos == 0 {
            return;
        }
        self.data.copy_within(self.pos..self.size, 0);
        self.size -= self.pos;
        self.pos = 0;
    }

    pub fn extend_from_slice(&mut self, bytes: &[u8]) {
        self.grow(self.size + bytes.len());
        self.data[self.size..self.size + bytes.len()].copy_from_slice(bytes);
        self.size += bytes.len();
    }
}

impl Drop for Buffer<'_> {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.data.len())
            .field("size", &self.size)
            .field("pos", &self.pos)
            .finish()
    }
}
