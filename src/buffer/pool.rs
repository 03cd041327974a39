use super::{BufferError, PacketChain};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct PoolInner {
    block_size: usize,
    block_count: usize,
    headroom: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    allocated: AtomicUsize,
    freed: AtomicUsize,
}

/// A pool of pre-allocated, fixed size packet blocks
///
/// All blocks are created when the pool is constructed, nothing is allocated afterwards. The pool
/// is cheap to clone (clones refer to the same blocks) and both taking and returning blocks are
/// safe to perform from a producer thread while the host processes on another.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

/// Block allocation counters of a pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total number of blocks taken from the pool
    pub allocated: usize,
    /// Total number of blocks returned to the pool
    pub freed: usize,
}

impl BufferPool {
    /// Create a new pool
    ///
    /// `headroom` is the number of bytes reserved in front of the first block of a newly
    /// allocated chain for headers that are prepended later.
    pub fn new(block_size: usize, block_count: usize, headroom: usize) -> Self {
        let free = (0..block_count)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();

        BufferPool {
            inner: Arc::new(PoolInner {
                block_size,
                block_count,
                headroom: headroom.min(block_size),
                free: Mutex::new(free),
                allocated: AtomicUsize::new(0),
                freed: AtomicUsize::new(0),
            }),
        }
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn block_count(&self) -> usize {
        self.inner.block_count
    }

    /// Get the headroom reserved in front of a new chain
    pub fn headroom(&self) -> usize {
        self.inner.headroom
    }

    /// Allocate an empty chain made up of a single block
    pub fn allocate(&self) -> Result<PacketChain, BufferError> {
        let mut blocks = self.take_blocks(1)?;

        match blocks.pop() {
            Some(block) => Ok(PacketChain::new(self.clone(), block, self.inner.headroom)),
            None => Err(BufferError::OutOfBuffers),
        }
    }

    /// Allocate a chain and fill it with `bytes`
    pub fn allocate_with(&self, bytes: &[u8]) -> Result<PacketChain, BufferError> {
        let mut chain = self.allocate()?;

        chain.append(bytes)?;

        Ok(chain)
    }

    /// Return every block of `chain` to this pool
    ///
    /// This is the same as dropping the chain.
    pub fn free(&self, chain: PacketChain) {
        drop(chain)
    }

    /// The number of blocks that are not in use
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    /// The number of blocks currently held by chains
    pub fn in_use(&self) -> usize {
        self.inner.block_count - self.available()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.inner.allocated.load(Ordering::Acquire),
            freed: self.inner.freed.load(Ordering::Acquire),
        }
    }

    /// Take `count` blocks, either all of them or none
    pub(super) fn take_blocks(&self, count: usize) -> Result<Vec<Box<[u8]>>, BufferError> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut free = self.lock();

        if free.len() < count {
            log::debug!(
                "buffer pool exhausted ({} blocks requested, {} available)",
                count,
                free.len()
            );

            return Err(BufferError::OutOfBuffers);
        }

        let at = free.len() - count;

        let blocks = free.split_off(at);

        self.inner.allocated.fetch_add(count, Ordering::AcqRel);

        Ok(blocks)
    }

    pub(super) fn release_block(&self, block: Box<[u8]>) {
        self.lock().push(block);

        self.inner.freed.fetch_add(1, Ordering::AcqRel);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<[u8]>>> {
        // a poisoned free list is still a valid free list
        self.inner.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl core::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("BufferPool")
            .field("block_size", &self.inner.block_size)
            .field("block_count", &self.inner.block_count)
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn free_from_another_thread() {
        let pool = BufferPool::new(16, 4, 0);

        let chains: Vec<_> = (0..4).map(|_| pool.allocate().unwrap()).collect();

        assert_eq!(0, pool.available());

        std::thread::spawn(move || drop(chains)).join().unwrap();

        assert_eq!(4, pool.available());
        assert_eq!(PoolStats { allocated: 4, freed: 4 }, pool.stats());
    }
}
