//! Fixed-capacity ring of planner blocks.
//!
//! Three cursors walk the ring: `w` (next slot to claim), `q` (next slot to
//! commit) and `r` (running block). Blocks link to their neighbours by index
//! so traversal never leaves the array.

use core::ops::{Index, IndexMut};

use super::block::{Block, BlockId, BufferState, MoveKind, MoveState};
use super::{PLANNER_HEADROOM, POOL_SIZE};

/// The planner block ring.
#[derive(Debug, Clone)]
pub struct Pool {
    blocks: [Block; POOL_SIZE],
    w: BlockId,
    q: BlockId,
    r: BlockId,
    available: usize,
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool {
    /// Create an empty, linked ring.
    pub fn new() -> Self {
        Self {
            blocks: core::array::from_fn(Block::linked),
            w: BlockId(0),
            q: BlockId(0),
            r: BlockId(0),
            available: POOL_SIZE,
        }
    }

    /// Empty the ring and reset the cursors.
    pub fn init(&mut self) {
        *self = Self::new();
    }

    /// Free blocks.
    #[inline]
    pub fn buffers_available(&self) -> usize {
        self.available
    }

    /// Whether more than the reserved headroom is free.
    #[inline]
    pub fn has_headroom(&self) -> bool {
        self.available > PLANNER_HEADROOM
    }

    /// Claim the next free slot. Returns `None` when the ring is full.
    pub fn get_write_buffer(&mut self) -> Option<BlockId> {
        let id = self.w;
        let block = &mut self.blocks[id.0];
        if block.buffer_state != BufferState::Empty {
            return None;
        }
        block.clear();
        block.buffer_state = BufferState::Loading;
        self.available -= 1;
        self.w = block.nx;
        Some(id)
    }

    /// Return the last claimed slot without committing it.
    pub fn unget_write_buffer(&mut self) {
        self.w = self.blocks[self.w.0].pv;
        self.blocks[self.w.0].buffer_state = BufferState::Empty;
        self.available += 1;
    }

    /// Publish the oldest claimed slot as `kind`.
    pub fn commit_write_buffer(&mut self, kind: MoveKind) {
        let block = &mut self.blocks[self.q.0];
        block.kind = kind;
        block.move_state = MoveState::New;
        block.buffer_state = BufferState::Queued;
        self.q = block.nx;
    }

    /// The block at the head of the queue, promoting it to running.
    pub fn get_run_buffer(&mut self) -> Option<BlockId> {
        let block = &mut self.blocks[self.r.0];
        if matches!(block.buffer_state, BufferState::Queued | BufferState::Pending) {
            block.buffer_state = BufferState::Running;
        }
        (block.buffer_state == BufferState::Running).then_some(self.r)
    }

    /// Release the running block. Returns `true` when the queue is now empty.
    pub fn free_run_buffer(&mut self) -> bool {
        let id = self.r;
        self.blocks[id.0].clear();
        self.r = self.blocks[id.0].nx;
        let next = &mut self.blocks[self.r.0];
        if next.buffer_state == BufferState::Queued {
            next.buffer_state = BufferState::Pending;
        }
        self.available += 1;
        self.w == self.r
    }

    /// The running block (or the block about to run), without promoting it.
    pub fn get_first_buffer(&self) -> Option<BlockId> {
        match self.blocks[self.r.0].buffer_state {
            BufferState::Queued | BufferState::Pending | BufferState::Running => Some(self.r),
            _ => None,
        }
    }

    /// The newest committed block.
    pub fn get_last_buffer(&self) -> Option<BlockId> {
        let first = self.get_first_buffer()?;
        let mut bp = first;
        loop {
            let nx = self.blocks[bp.0].nx;
            if nx == first || self.blocks[nx.0].move_state == MoveState::Off {
                return Some(bp);
            }
            bp = nx;
        }
    }

    /// Following slot in the ring.
    #[inline]
    pub fn next(&self, id: BlockId) -> BlockId {
        self.blocks[id.0].nx
    }

    /// Preceding slot in the ring.
    #[inline]
    pub fn prev(&self, id: BlockId) -> BlockId {
        self.blocks[id.0].pv
    }

    /// Copy the contents of `src` into `dst`, keeping `dst`'s links.
    pub fn copy_buffer(&mut self, dst: BlockId, src: BlockId) {
        let (nx, pv) = (self.blocks[dst.0].nx, self.blocks[dst.0].pv);
        self.blocks[dst.0] = Block {
            nx,
            pv,
            ..self.blocks[src.0]
        };
    }

    /// Iterate over queued blocks from the head in execution order.
    pub fn queued(&self) -> impl Iterator<Item = BlockId> + '_ {
        let first = self.get_first_buffer();
        let mut cursor = first;
        core::iter::from_fn(move || {
            let id = cursor?;
            let nx = self.blocks[id.0].nx;
            cursor = (Some(nx) != first && self.blocks[nx.0].move_state != MoveState::Off)
                .then_some(nx);
            Some(id)
        })
    }
}

impl Index<BlockId> for Pool {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }
}

impl IndexMut<BlockId> for Pool {
    fn index_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_one(pool: &mut Pool, length: f64) -> BlockId {
        let id = pool.get_write_buffer().unwrap();
        pool[id].length = length;
        pool.commit_write_buffer(MoveKind::Aline);
        id
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = Pool::new();
        assert_eq!(pool.buffers_available(), POOL_SIZE);
        assert!(pool.has_headroom());
        assert!(pool.get_run_buffer().is_none());
        assert!(pool.get_first_buffer().is_none());
        assert!(pool.get_last_buffer().is_none());
        assert_eq!(pool.queued().count(), 0);
    }

    #[test]
    fn test_commit_and_run_in_order() {
        let mut pool = Pool::new();
        let a = commit_one(&mut pool, 1.0);
        let b = commit_one(&mut pool, 2.0);
        assert_eq!(pool.buffers_available(), POOL_SIZE - 2);
        assert_eq!(pool.get_last_buffer(), Some(b));

        assert_eq!(pool.get_run_buffer(), Some(a));
        assert_eq!(pool[a].buffer_state, BufferState::Running);
        assert!(!pool.free_run_buffer());
        assert_eq!(pool[b].buffer_state, BufferState::Pending);
        assert_eq!(pool.get_run_buffer(), Some(b));
        assert!(pool.free_run_buffer());
        assert_eq!(pool.buffers_available(), POOL_SIZE);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let mut pool = Pool::new();
        for _ in 0..POOL_SIZE {
            commit_one(&mut pool, 1.0);
        }
        assert_eq!(pool.buffers_available(), 0);
        assert!(!pool.has_headroom());
        assert!(pool.get_write_buffer().is_none());
    }

    #[test]
    fn test_unget_releases_slot() {
        let mut pool = Pool::new();
        let id = pool.get_write_buffer().unwrap();
        pool.unget_write_buffer();
        assert_eq!(pool.buffers_available(), POOL_SIZE);
        assert_eq!(pool.get_write_buffer(), Some(id));
    }

    #[test]
    fn test_wraparound_traversal() {
        let mut pool = Pool::new();
        for _ in 0..POOL_SIZE - 2 {
            commit_one(&mut pool, 1.0);
            pool.get_run_buffer();
            pool.free_run_buffer();
        }
        let ids: heapless::Vec<BlockId, 4> =
            (0..4).map(|i| commit_one(&mut pool, i as f64)).collect();
        // the third and fourth blocks wrapped past the end of the array
        assert_eq!(ids[2], BlockId(0));
        let order: heapless::Vec<BlockId, 4> = pool.queued().collect();
        assert_eq!(order, ids);
        assert_eq!(pool.get_last_buffer(), Some(ids[3]));
    }

    #[test]
    fn test_copy_buffer_keeps_links() {
        let mut pool = Pool::new();
        let a = commit_one(&mut pool, 1.0);
        let b = commit_one(&mut pool, 7.5);
        pool.copy_buffer(a, b);
        assert_eq!(pool[a].length, 7.5);
        assert_eq!(pool.next(a), b);
        assert_eq!(pool.prev(b), a);
    }
}
