//! Packet buffers
//!
//! Every layer of the host passes data to the next as a [`PacketChain`]. A chain is an ordered list
//! of fixed sized blocks taken from a [`BufferPool`]. Protocols push and pop header bytes at the
//! front of a chain and payload bytes at the back, so a packet travelling down the stack collects
//! its L2CAP and HCI headers in front of the payload without the payload ever being copied, and a
//! packet travelling up the stack has its headers stripped the same way.
//!
//! A chain has exactly one owner. Passing a chain to another layer moves it, and dropping it (or
//! calling [`BufferPool::free`]) returns its blocks to the pool. There is no way to alias a chain
//! so a block can neither leak nor be returned twice.

mod pool;

pub use pool::{BufferPool, PoolStats};

use core::fmt::{self, Display, Formatter};
use std::collections::VecDeque;

/// Buffer errors
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// The pool has no free blocks
    OutOfBuffers,
    /// A trim or read asked for more bytes than the chain holds
    LengthOfBuffer,
}

impl Display for BufferError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            BufferError::OutOfBuffers => f.write_str("packet buffer pool is exhausted"),
            BufferError::LengthOfBuffer => f.write_str("buffer is too small"),
        }
    }
}

impl fmt::Debug for BufferError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// One block of a chain
///
/// The valid bytes of the block are `data[start..end]`.
struct Block {
    data: Box<[u8]>,
    start: usize,
    end: usize,
}

impl Block {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn front_room(&self) -> usize {
        self.start
    }

    fn back_room(&self) -> usize {
        self.data.len() - self.end
    }

    fn bytes(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }
}

/// A packet made up of pool blocks
///
/// A `PacketChain` is created by [`BufferPool::allocate`]. The first block of a new chain is
/// positioned with the pool's headroom in front of it so that headers can later be prepended
/// without taking another block.
pub struct PacketChain {
    pool: BufferPool,
    blocks: VecDeque<Block>,
}

impl PacketChain {
    fn new(pool: BufferPool, first: Box<[u8]>, headroom: usize) -> Self {
        let start = headroom.min(first.len());

        let mut blocks = VecDeque::with_capacity(1);

        blocks.push_back(Block {
            data: first,
            start,
            end: start,
        });

        PacketChain { pool, blocks }
    }

    /// The number of valid bytes within the chain
    pub fn len(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of pool blocks held by this chain
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Get the pool this chain was allocated from
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Append bytes to the back of the chain
    ///
    /// Additional blocks are taken from the pool as needed. If the pool cannot supply every block
    /// required then `OutOfBuffers` is returned and the chain is left exactly as it was.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let room = self.blocks.back().map(Block::back_room).unwrap_or(0);

        let block_size = self.pool.block_size();

        let needed = if bytes.len() > room {
            (bytes.len() - room + block_size - 1) / block_size
        } else {
            0
        };

        let mut extra = self.pool.take_blocks(needed)?.into_iter();

        let mut rest = bytes;

        if let Some(last) = self.blocks.back_mut() {
            let cnt = rest.len().min(last.back_room());

            last.data[last.end..last.end + cnt].copy_from_slice(&rest[..cnt]);

            last.end += cnt;

            rest = &rest[cnt..];
        }

        while !rest.is_empty() {
            // `take_blocks` supplied enough blocks for the remaining bytes
            let data = match extra.next() {
                Some(data) => data,
                None => return Err(BufferError::OutOfBuffers),
            };

            let cnt = rest.len().min(data.len());

            let mut block = Block { data, start: 0, end: 0 };

            block.data[..cnt].copy_from_slice(&rest[..cnt]);

            block.end = cnt;

            self.blocks.push_back(block);

            rest = &rest[cnt..];
        }

        Ok(())
    }

    /// Prepend bytes to the front of the chain
    ///
    /// This is used for pushing a protocol header in front of a payload. The bytes are placed
    /// within the headroom of the first block, a new block is taken from the pool only when the
    /// headroom is too small. As with `append`, a failure leaves the chain untouched.
    pub fn prepend(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let room = self.blocks.front().map(Block::front_room).unwrap_or(0);

        if bytes.len() <= room {
            if let Some(first) = self.blocks.front_mut() {
                first.start -= bytes.len();

                first.data[first.start..first.start + bytes.len()].copy_from_slice(bytes);

                return Ok(());
            }
        }

        let block_size = self.pool.block_size();

        let needed = (bytes.len() - room + block_size - 1) / block_size;

        let extra = self.pool.take_blocks(needed)?;

        let mut rest = bytes;

        if let Some(first) = self.blocks.front_mut() {
            let cnt = room.min(rest.len());

            let (head, tail) = rest.split_at(rest.len() - cnt);

            first.start -= cnt;

            first.data[first.start..first.start + cnt].copy_from_slice(tail);

            rest = head;
        }

        // new blocks are filled from their end so that the bytes stay contiguous with the chain
        for data in extra {
            let cnt = rest.len().min(data.len());

            let (head, tail) = rest.split_at(rest.len() - cnt);

            let end = data.len();

            let mut block = Block { data, start: end - cnt, end };

            block.data[block.start..].copy_from_slice(tail);

            self.blocks.push_front(block);

            rest = head;
        }

        Ok(())
    }

    /// Remove `n` bytes from the front of the chain
    ///
    /// Blocks emptied by the trim are returned to the pool, but the chain always keeps at least one
    /// block.
    pub fn adjust_front(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.len() {
            return Err(BufferError::LengthOfBuffer);
        }

        let mut remaining = n;

        while remaining > 0 {
            let first = match self.blocks.front_mut() {
                Some(first) => first,
                None => break,
            };

            let cnt = remaining.min(first.len());

            first.start += cnt;

            remaining -= cnt;

            if first.len() == 0 && self.blocks.len() > 1 {
                if let Some(block) = self.blocks.pop_front() {
                    self.pool.release_block(block.data);
                }
            }
        }

        Ok(())
    }

    /// Remove `n` bytes from the back of the chain
    pub fn adjust_back(&mut self, n: usize) -> Result<(), BufferError> {
        if n > self.len() {
            return Err(BufferError::LengthOfBuffer);
        }

        let mut remaining = n;

        while remaining > 0 {
            let last = match self.blocks.back_mut() {
                Some(last) => last,
                None => break,
            };

            let cnt = remaining.min(last.len());

            last.end -= cnt;

            remaining -= cnt;

            if last.len() == 0 && self.blocks.len() > 1 {
                if let Some(block) = self.blocks.pop_back() {
                    self.pool.release_block(block.data);
                }
            }
        }

        Ok(())
    }

    /// Split the first `n` bytes off into a new chain
    ///
    /// The new chain comes from the same pool and has the usual headroom in front of it. If the
    /// pool cannot supply the blocks this chain is left untouched.
    pub fn split_front(&mut self, n: usize) -> Result<PacketChain, BufferError> {
        if n > self.len() {
            return Err(BufferError::LengthOfBuffer);
        }

        let head: Vec<u8> = self.iter().take(n).collect();

        let chain = self.pool.allocate_with(&head)?;

        self.adjust_front(n)?;

        Ok(chain)
    }

    /// Move the blocks of `other` onto the back of this chain
    ///
    /// No bytes are copied. Empty blocks of `other` are returned to the pool.
    pub fn concat(&mut self, mut other: PacketChain) {
        while let Some(block) = other.blocks.pop_front() {
            if block.len() == 0 {
                self.pool.release_block(block.data);
            } else {
                self.blocks.push_back(block);
            }
        }
    }

    /// Copy the first `into.len()` bytes of the chain into `into`
    pub fn copy_front(&self, into: &mut [u8]) -> Result<(), BufferError> {
        if into.len() > self.len() {
            return Err(BufferError::LengthOfBuffer);
        }

        for (dst, src) in into.iter_mut().zip(self.iter()) {
            *dst = src;
        }

        Ok(())
    }

    /// Read a little endian `u16` at byte `offset`
    pub fn read_u16(&self, offset: usize) -> Result<u16, BufferError> {
        let mut iter = self.iter().skip(offset);

        match (iter.next(), iter.next()) {
            (Some(lo), Some(hi)) => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(BufferError::LengthOfBuffer),
        }
    }

    /// Iterate over the bytes of the chain
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.blocks.iter().flat_map(|b| b.bytes().iter().copied())
    }

    /// Copy the chain into a contiguous vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(self.len());

        self.blocks.iter().for_each(|b| v.extend_from_slice(b.bytes()));

        v
    }
}

impl Drop for PacketChain {
    fn drop(&mut self) {
        while let Some(block) = self.blocks.pop_front() {
            self.pool.release_block(block.data);
        }
    }
}

impl fmt::Debug for PacketChain {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("PacketChain")
            .field("len", &self.len())
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pool() -> BufferPool {
        BufferPool::new(8, 6, 4)
    }

    #[test]
    fn append_spans_blocks() {
        let pool = pool();

        let mut chain = pool.allocate().unwrap();

        chain.append(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap();

        assert_eq!(10, chain.len());
        assert_eq!(3, chain.block_count());
        assert_eq!((1..=10).collect::<Vec<u8>>(), chain.to_vec());
        assert_eq!(3, pool.in_use());

        drop(chain);

        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn prepend_uses_headroom_then_blocks() {
        let pool = pool();

        let mut chain = pool.allocate().unwrap();

        chain.append(&[9, 9]).unwrap();
        chain.prepend(&[3, 4]).unwrap();

        assert_eq!(1, chain.block_count());

        chain.prepend(&[0, 0, 1, 2]).unwrap();

        assert_eq!(2, chain.block_count());
        assert_eq!(vec![0, 0, 1, 2, 3, 4, 9, 9], chain.to_vec());
        assert_eq!(0x0201, chain.read_u16(2).unwrap());
    }

    #[test]
    fn trim_front_and_back() {
        let pool = pool();

        let mut chain = pool.allocate().unwrap();

        chain.append(&(0..20).collect::<Vec<u8>>()).unwrap();

        let before = pool.in_use();

        chain.adjust_front(9).unwrap();
        chain.adjust_back(3).unwrap();

        assert_eq!((9..17).collect::<Vec<u8>>(), chain.to_vec());
        assert!(pool.in_use() < before);

        assert_eq!(Err(BufferError::LengthOfBuffer), chain.adjust_front(9));
        assert_eq!(8, chain.len());
    }

    #[test]
    fn random_operations_free_every_block() {
        use rand::Rng;

        let pool = BufferPool::new(8, 32, 4);

        let mut rng = rand::thread_rng();

        let mut chains: Vec<PacketChain> = Vec::new();

        for _ in 0..1000 {
            match rng.gen_range(0, 4) {
                0 => {
                    if let Ok(chain) = pool.allocate() {
                        chains.push(chain)
                    }
                }
                1 if !chains.is_empty() => {
                    let index = rng.gen_range(0, chains.len());

                    let len = rng.gen_range(0, 20);

                    // exhaustion is expected here
                    let _ = chains[index].append(&vec![0xAA; len]);
                }
                2 if !chains.is_empty() => {
                    let index = rng.gen_range(0, chains.len());

                    let n = rng.gen_range(0, chains[index].len() + 1);

                    chains[index].adjust_front(n).unwrap();
                }
                3 if !chains.is_empty() => {
                    let index = rng.gen_range(0, chains.len());

                    pool.free(chains.swap_remove(index));
                }
                _ => (),
            }

            assert!(pool.in_use() <= pool.block_count());
        }

        drop(chains);

        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn exhaustion_leaves_chain_intact() {
        let pool = BufferPool::new(4, 2, 0);

        let mut chain = pool.allocate().unwrap();

        chain.append(&[1, 2, 3]).unwrap();

        assert_eq!(Err(BufferError::OutOfBuffers), chain.append(&[0; 9]));
        assert_eq!(vec![1, 2, 3], chain.to_vec());
        assert_eq!(1, pool.in_use());

        let other = pool.allocate().unwrap();

        assert!(pool.allocate().is_err());

        pool.free(other);

        assert!(pool.allocate().is_ok());
    }

    #[test]
    fn concat_moves_blocks() {
        let pool = pool();

        let mut a = pool.allocate().unwrap();
        let mut b = pool.allocate().unwrap();

        a.append(&[1, 2]).unwrap();
        b.append(&[3, 4, 5]).unwrap();

        a.concat(b);

        assert_eq!(vec![1, 2, 3, 4, 5], a.to_vec());
        assert_eq!(2, pool.in_use());

        drop(a);

        let stats = pool.stats();

        assert_eq!(stats.allocated, stats.freed);
    }
}
