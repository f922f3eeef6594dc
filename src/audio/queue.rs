//! Lock-free feed queue between the network receiver and the scheduler
//!
//! The network task pushes, the scheduler's completion handler pops. Neither
//! side ever waits: `pop` reports an empty queue as `None`, and `push` on a
//! full queue evicts the oldest block instead of blocking.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::block::SampleBlock;
use crate::error::BlockError;

/// Bounded FIFO of validated sample blocks
pub struct FeedQueue {
    queue: ArrayQueue<SampleBlock>,
    block_length: usize,
    pushed: AtomicUsize,
    trimmed: AtomicUsize,
    rejected: AtomicUsize,
    discarded: AtomicUsize,
}

impl FeedQueue {
    /// Create a queue holding at most `capacity` blocks of `block_length` samples
    pub fn new(capacity: usize, block_length: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            block_length,
            pushed: AtomicUsize::new(0),
            trimmed: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
            discarded: AtomicUsize::new(0),
        }
    }

    /// Append a block.
    ///
    /// Blocks whose length differs from the session block length are
    /// rejected. When the queue is full the oldest block is dropped.
    pub fn push(&self, block: SampleBlock) -> Result<(), BlockError> {
        if block.len() != self.block_length {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(BlockError::WrongLength {
                expected: self.block_length,
                got: block.len(),
            });
        }

        if self.queue.force_push(block).is_some() {
            self.trimmed.fetch_add(1, Ordering::Relaxed);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Validate raw samples and append them as a block
    pub fn push_samples(&self, samples: Vec<f32>) -> Result<(), BlockError> {
        match SampleBlock::from_samples(samples, self.block_length) {
            Ok(block) => self.push(block),
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Remove and return the oldest block, or `None` if the queue is empty
    pub fn pop(&self) -> Option<SampleBlock> {
        self.queue.pop()
    }

    /// Drop the oldest block without playing it
    pub fn discard_one(&self) -> bool {
        if self.queue.pop().is_some() {
            self.discarded.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Drop everything currently queued, returning the count
    pub fn clear(&self) -> usize {
        let mut count = 0;
        while self.queue.pop().is_some() {
            count += 1;
        }
        self.discarded.fetch_add(count, Ordering::Relaxed);
        count
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity(),
            pushed: self.pushed.load(Ordering::Relaxed),
            trimmed: self.trimmed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe handle to a feed queue
pub type SharedFeedQueue = Arc<FeedQueue>;

/// Feed queue counters
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub pushed: usize,
    /// Blocks evicted because the queue was full
    pub trimmed: usize,
    /// Blocks refused for failing validation
    pub rejected: usize,
    /// Blocks dropped unplayed while the session was stopped
    pub discarded: usize,
}
