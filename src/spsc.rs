//! # SPSC Ring Buffer
//!
//! A bounded lock-free queue between exactly one producer and one consumer.
//!
//! ## Design
//!
//! - Fixed power-of-two capacity, checked at compile time, so index wrap is
//!   a bitmask.
//! - `head` (consumer) and `tail` (producer) each live on their own cache
//!   line to prevent false sharing; the slot array is line-aligned too.
//! - The release/acquire handshake is the entire synchronization story: a
//!   consumer that observes a new `tail` is guaranteed to observe the slot
//!   write that happened before it, and symmetrically for the freed-slot
//!   signal travelling back through `head`.
//!
//! The single-producer/single-consumer contract is structural: [`ring_buffer`]
//! returns a unique [`Producer`] and a unique [`Consumer`], neither of which
//! is cloneable. One slot is sacrificed to distinguish full from empty, so a
//! buffer of capacity `CAP` holds at most `CAP - 1` values.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

/// Shared ring storage. Use [`ring_buffer`] to construct the handle pair.
pub struct RingBuffer<T, const CAP: usize> {
    /// Consumer index, owned by the consumer, acquired by the producer.
    head: CachePadded<AtomicUsize>,
    /// Producer index, owned by the producer, acquired by the consumer.
    tail: CachePadded<AtomicUsize>,
    /// Slot storage; slot `i` is initialized iff `head <= i < tail` circularly.
    slots: CachePadded<[UnsafeCell<MaybeUninit<T>>; CAP]>,
}

// SAFETY: slot `i` is accessed by at most one side at a time: the producer
// before publishing `tail`, the consumer before publishing `head`.
unsafe impl<T: Send, const CAP: usize> Send for RingBuffer<T, CAP> {}
unsafe impl<T: Send, const CAP: usize> Sync for RingBuffer<T, CAP> {}

impl<T, const CAP: usize> RingBuffer<T, CAP> {
    const CAPACITY_IS_POWER_OF_TWO: () = assert!(
        CAP > 1 && CAP.is_power_of_two(),
        "ring buffer capacity must be a power of two"
    );

    const MASK: usize = CAP - 1;

    fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_IS_POWER_OF_TWO;
        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            slots: CachePadded::new(std::array::from_fn(|_| {
                UnsafeCell::new(MaybeUninit::uninit())
            })),
        }
    }

    /// Number of values currently buffered (racy snapshot).
    fn len(&self) -> usize {
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        tail.wrapping_sub(head) & Self::MASK
    }
}

impl<T, const CAP: usize> Drop for RingBuffer<T, CAP> {
    fn drop(&mut self) {
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        while head != tail {
            // SAFETY: slots in [head, tail) hold initialized values.
            unsafe { (*self.slots[head].get()).assume_init_drop() };
            head = (head + 1) & Self::MASK;
        }
    }
}

/// Create a ring of capacity `CAP` and split it into its two endpoints.
pub fn ring_buffer<T, const CAP: usize>() -> (Producer<T, CAP>, Consumer<T, CAP>) {
    let ring = Arc::new(RingBuffer::new());
    (
        Producer { ring: ring.clone() },
        Consumer { ring },
    )
}

/// The write endpoint. Exactly one exists per ring.
pub struct Producer<T, const CAP: usize> {
    ring: Arc<RingBuffer<T, CAP>>,
}

impl<T, const CAP: usize> Producer<T, CAP> {
    /// Enqueue one value. Returns `false` iff the buffer is full.
    ///
    /// Never spins: a full buffer is reported immediately.
    pub fn push(&mut self, value: T) -> bool {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let next = (tail + 1) & RingBuffer::<T, CAP>::MASK;
        let head = ring.head.load(Ordering::Acquire);
        if next == head {
            return false;
        }
        // SAFETY: the slot at `tail` is outside [head, tail), so the
        // consumer will not touch it until the release store below.
        unsafe { (*ring.slots[tail].get()).write(value) };
        ring.tail.store(next, Ordering::Release);
        true
    }

    /// Number of buffered values (racy snapshot).
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the buffer currently appears empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usable capacity (one slot is reserved to distinguish full from empty).
    pub const fn capacity(&self) -> usize {
        CAP - 1
    }
}

/// The read endpoint. Exactly one exists per ring.
pub struct Consumer<T, const CAP: usize> {
    ring: Arc<RingBuffer<T, CAP>>,
}

impl<T, const CAP: usize> Consumer<T, CAP> {
    /// Dequeue one value, or `None` if the buffer is empty.
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: the acquire load of `tail` ordered the producer's slot
        // write before this read.
        let value = unsafe { (*ring.slots[head].get()).assume_init_read() };
        ring.head
            .store((head + 1) & RingBuffer::<T, CAP>::MASK, Ordering::Release);
        Some(value)
    }

    /// Borrow the front value without removing it.
    ///
    /// The borrow takes `&mut self`, so no consumer mutation can occur while
    /// it is alive; a concurrent producer push lands in a different slot.
    pub fn peek(&mut self) -> Option<&T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        if head == tail {
            return None;
        }
        // SAFETY: as in `pop`; the slot stays initialized because `head`
        // does not advance.
        Some(unsafe { (*ring.slots[head].get()).assume_init_ref() })
    }

    /// Number of buffered values (racy snapshot).
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Whether the buffer currently appears empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
