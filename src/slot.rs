//! Single-slot, last-write-wins publication cells.
//!
//! Producers (UI, sensors) replace the value; the render thread reads the
//! latest snapshot once per frame. Nothing queues, nothing blocks for longer
//! than an `Arc` swap.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::parallax::ParallaxOffset;

/// A published value together with the generation that produced it.
#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: Arc<T>,
    pub generation: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            generation: self.generation,
        }
    }
}

/// Atomically replaceable cell; readers never observe a partially written value.
#[derive(Debug)]
pub struct Latest<T> {
    current: Mutex<Snapshot<T>>,
}

impl<T> Latest<T> {
    pub fn new(initial: T) -> Self {
        Self {
            current: Mutex::new(Snapshot {
                value: Arc::new(initial),
                generation: 0,
            }),
        }
    }

    /// Replaces the value and returns its generation.
    pub fn publish(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let mut current = self.current.lock();
        current.generation += 1;
        current.value = value;
        current.generation
    }

    pub fn load(&self) -> Snapshot<T> {
        self.current.lock().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.lock().generation
    }
}

/// Lock-free cell for the two-component parallax offset (packed f32 bits).
#[derive(Debug, Default)]
pub struct OffsetCell {
    bits: AtomicU64,
}

impl OffsetCell {
    pub fn new(offset: ParallaxOffset) -> Self {
        Self {
            bits: AtomicU64::new(pack(offset)),
        }
    }

    pub fn store(&self, offset: ParallaxOffset) {
        self.bits.store(pack(offset), Ordering::Release);
    }

    pub fn load(&self) -> ParallaxOffset {
        unpack(self.bits.load(Ordering::Acquire))
    }
}

fn pack(offset: ParallaxOffset) -> u64 {
    (u64::from(offset.dx.to_bits()) << 32) | u64::from(offset.dy.to_bits())
}

fn unpack(bits: u64) -> ParallaxOffset {
    ParallaxOffset {
        dx: f32::from_bits((bits >> 32) as u32),
        dy: f32::from_bits(bits as u32),
    }
}
