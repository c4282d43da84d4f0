//! Pool of per-sample Gibbs-chain buffers for parallel batches.
//!
//! In parallel mode every sample of a batch runs its own chain on a rayon
//! worker, and each chain needs five activation matrices. The pool hands out
//! pre-allocated [`ChainBuffers`] and takes them back after the chain has
//! finished, so steady-state training allocates nothing per sample.
//!
//! # Thread Safety
//!
//! Buffers live in a `Mutex<Vec<ChainBuffers>>`; workers `get()` one, run
//! their chain, and `return_to_pool()` it. The lock is held only for the
//! push or pop.

use std::sync::{Mutex, PoisonError};

use crate::training::cd::ChainBuffers;

/// Shape of the buffers a pool produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainLayout {
    pub rows: usize,
    pub visible_len: usize,
    pub hidden_len: usize,
}

impl ChainLayout {
    fn allocate(self) -> ChainBuffers {
        ChainBuffers::new(self.rows, self.visible_len, self.hidden_len)
    }
}

#[derive(Debug, Default)]
struct Counters {
    allocated: usize,
    hits: usize,
    misses: usize,
}

/// Stack of reusable chain buffers with hit/miss accounting.
pub struct BufferPool {
    buffers: Mutex<Vec<ChainBuffers>>,
    layout: ChainLayout,
    counters: Mutex<Counters>,
}

/// Pool diagnostics.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Buffers created over the pool's lifetime
    pub total_allocated: usize,
    /// `get()` calls served from the stack
    pub hits: usize,
    /// `get()` calls that had to allocate
    pub misses: usize,
    /// Buffers currently waiting in the pool
    pub available: usize,
    /// `hits / (hits + misses)`, 0 before the first `get()`
    pub hit_rate: f32,
}

#[allow(clippy::must_use_candidate)]
impl BufferPool {
    /// Pre-allocate `capacity` buffers.
    pub fn new(layout: ChainLayout, capacity: usize) -> Self {
        let buffers = (0..capacity).map(|_| layout.allocate()).collect();
        Self {
            buffers: Mutex::new(buffers),
            layout,
            counters: Mutex::new(Counters {
                allocated: capacity,
                ..Counters::default()
            }),
        }
    }

    /// A pool that allocates lazily on the first `get()` calls.
    pub fn empty(layout: ChainLayout) -> Self {
        Self::new(layout, 0)
    }

    pub fn layout(&self) -> ChainLayout {
        self.layout
    }

    /// Take zeroed buffers from the pool, allocating when it is empty.
    pub fn get(&self) -> ChainBuffers {
        let reused = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        match reused {
            Some(mut buffers) => {
                counters.hits += 1;
                drop(counters);
                buffers.zero();
                buffers
            }
            None => {
                counters.misses += 1;
                counters.allocated += 1;
                drop(counters);
                self.layout.allocate()
            }
        }
    }

    pub fn return_to_pool(&self, buffers: ChainBuffers) {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(buffers);
    }

    pub fn stats(&self) -> PoolStats {
        let available = self.available();
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let gets = counters.hits + counters.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if gets > 0 {
            counters.hits as f32 / gets as f32
        } else {
            0.0
        };
        PoolStats {
            total_allocated: counters.allocated,
            hits: counters.hits,
            misses: counters.misses,
            available,
            hit_rate,
        }
    }

    pub fn available(&self) -> usize {
        self.buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
