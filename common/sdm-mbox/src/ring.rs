// Licensed under the Apache-2.0 license

//! Cursor arithmetic of the command and response rings.
//!
//! Both rings are described by a producer cursor (the "valid" offset) and a
//! consumer cursor (the "consumed" offset). One slot is always left unused so
//! that a full ring can be told apart from an empty one.

/// A circular buffer of `capacity` 32-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ring {
    capacity: u32,
}

impl Ring {
    pub const fn new(capacity: u32) -> Self {
        Self { capacity }
    }

    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Words the producer can have outstanding at once.
    pub const fn usable(&self) -> u32 {
        self.capacity - 1
    }

    /// Cursor value after `cursor`, wrapping at the ring size.
    pub const fn next(&self, cursor: u32) -> u32 {
        (cursor + 1) % self.capacity
    }

    /// The producer at `cursor` may not write while the consumer is at
    /// `other`.
    pub const fn is_full(&self, cursor: u32, other: u32) -> bool {
        self.next(cursor) == other % self.capacity
    }

    /// The consumer at `other` has taken every word the producer at `cursor`
    /// published, and is parked one slot behind it.
    pub const fn is_empty(&self, cursor: u32, other: u32) -> bool {
        self.next(other) == cursor % self.capacity
    }

    /// Words published by the producer at `producer` that the consumer at
    /// `consumer` has not taken yet.
    pub const fn pending(&self, producer: u32, consumer: u32) -> u32 {
        (producer + self.capacity - consumer % self.capacity) % self.capacity
    }

    /// Words the producer at `producer` may still write.
    pub const fn free(&self, producer: u32, consumer: u32) -> u32 {
        self.usable() - self.pending(producer, consumer)
    }
}
