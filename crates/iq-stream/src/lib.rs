//! Sample Stream Channel
//!
//! A bounded single-producer/single-consumer handoff for fixed-capacity
//! blocks of complex baseband samples. The producer fills a block it owns,
//! then calls [`SampleStream::swap`] to publish it and receive a fresh block
//! in return. At most one published block is ever pending: if the consumer
//! has not drained the previous block, `swap` blocks, keeping end-to-end
//! latency bounded and memory use constant.
//!
//! Stopping is writer-driven. [`SampleStream::stop_writer`] moves the
//! channel into a closed state in which any blocked or future `swap` returns
//! the terminal [`StreamStopped`] signal; [`SampleStream::clear_write_stop`]
//! reopens it for the next streaming phase. This pairing is what makes the
//! acquisition task's stop sequence race-free: hardware stop first, then
//! `stop_writer`, then join the producer.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use num_complex::Complex;
use thiserror::Error;

/// Terminal signal returned by [`SampleStream::swap`] once the writer side
/// has been stopped. The producer must exit its loop on seeing this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sample stream stopped")]
pub struct StreamStopped;

/// A fixed-capacity, producer-owned block of complex samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleBlock {
    /// The samples, in acquisition order
    pub samples: Vec<Complex<f32>>,
}

impl SampleBlock {
    /// Create an empty block able to hold `capacity` samples without
    /// reallocating
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Number of samples currently in the block
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the block holds no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Drop the samples, keeping the allocation
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

// Writer's spare + one published + consumer's block in flight.
const POOL_BLOCKS: usize = 2;

struct State {
    ready: Option<SampleBlock>,
    pool: Vec<SampleBlock>,
    write_stopped: bool,
}

struct Shared {
    state: Mutex<State>,
    // Producer waits here for the consumer to drain.
    writer_cv: Condvar,
    // Consumer waits here for the next published block.
    reader_cv: Condvar,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The sample handoff channel. Cheap to clone; one clone goes to the
/// producer, one to the consumer, and the controller keeps one for the
/// stop/reopen calls.
#[derive(Clone)]
pub struct SampleStream {
    shared: Arc<Shared>,
}

impl SampleStream {
    /// Create a channel whose blocks hold `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        let pool = (0..POOL_BLOCKS)
            .map(|_| SampleBlock::with_capacity(capacity))
            .collect();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    ready: None,
                    pool,
                    write_stopped: false,
                }),
                writer_cv: Condvar::new(),
                reader_cv: Condvar::new(),
                capacity,
            }),
        }
    }

    /// Block capacity in samples
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Take an empty block for the producer to fill
    pub fn acquire(&self) -> SampleBlock {
        let mut state = self.shared.lock();
        state
            .pool
            .pop()
            .unwrap_or_else(|| SampleBlock::with_capacity(self.shared.capacity))
    }

    /// Publish a filled block and receive a fresh one.
    ///
    /// Blocks while the previous published block has not been drained.
    /// Returns [`StreamStopped`] once [`stop_writer`](Self::stop_writer) has
    /// been called; the filled block is recycled internally in that case.
    pub fn swap(&self, block: SampleBlock) -> Result<SampleBlock, StreamStopped> {
        let mut state = self.shared.lock();
        while state.ready.is_some() && !state.write_stopped {
            state = match self.shared.writer_cv.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        if state.write_stopped {
            Self::recycle_locked(&mut state, block);
            return Err(StreamStopped);
        }
        state.ready = Some(block);
        self.shared.reader_cv.notify_one();
        let next = state
            .pool
            .pop()
            .unwrap_or_else(|| SampleBlock::with_capacity(self.shared.capacity));
        Ok(next)
    }

    /// Consumer side: wait for the next published block.
    ///
    /// Returns None once the writer has been stopped and no block is
    /// pending. Hand the drained block back with [`recycle`](Self::recycle).
    pub fn recv(&self) -> Option<SampleBlock> {
        let mut state = self.shared.lock();
        loop {
            if let Some(block) = state.ready.take() {
                self.shared.writer_cv.notify_one();
                return Some(block);
            }
            if state.write_stopped {
                return None;
            }
            state = match self.shared.reader_cv.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Consumer side: wait for the next published block, up to `timeout`.
    ///
    /// Returns None on timeout or once the writer has been stopped with
    /// nothing pending.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SampleBlock> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(block) = state.ready.take() {
                self.shared.writer_cv.notify_one();
                return Some(block);
            }
            if state.write_stopped {
                return None;
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, result) = match self.shared.reader_cv.wait_timeout(state, remaining) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            state = guard;
            if result.timed_out() && state.ready.is_none() {
                return None;
            }
        }
    }

    /// Return a drained block to the internal pool
    pub fn recycle(&self, mut block: SampleBlock) {
        block.clear();
        let mut state = self.shared.lock();
        Self::recycle_locked(&mut state, block);
    }

    /// Close the writer side: any blocked or future [`swap`](Self::swap)
    /// returns [`StreamStopped`], and a consumer blocked in `recv` drains
    /// what is pending and then sees end-of-stream.
    pub fn stop_writer(&self) {
        let mut state = self.shared.lock();
        state.write_stopped = true;
        self.shared.writer_cv.notify_all();
        self.shared.reader_cv.notify_all();
    }

    /// Reopen the channel for the next streaming phase, discarding any
    /// undrained block from the previous one
    pub fn clear_write_stop(&self) {
        let mut state = self.shared.lock();
        state.write_stopped = false;
        if let Some(stale) = state.ready.take() {
            Self::recycle_locked(&mut state, stale);
        }
    }

    fn recycle_locked(state: &mut State, mut block: SampleBlock) {
        if state.pool.len() < POOL_BLOCKS {
            block.clear();
            state.pool.push(block);
        }
    }
}
