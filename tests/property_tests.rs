//! Property-based tests for the runtime's core data structures.
//!
//! Uses proptest to generate random workloads and verify the structural
//! invariants hold after every step.

use proptest::prelude::*;

use specter::pipeline::{hash_vectorize, scalar_quantize, VECTOR_DIM};
use specter::slab::{OwnedRegion, SlabAllocator};
use specter::spsc::ring_buffer;

/// Strategy for allocation sizes spanning tiny to multi-block.
fn alloc_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..4096, 1..40)
}

/// Strategy for dense vectors with finite lanes.
fn dense_vector() -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-1.0e6f32..1.0e6, VECTOR_DIM)
}

proptest! {
    /// After any interleaving of allocations and frees, the heap keeps its
    /// boundary-tag invariants: header/footer agreement, size conservation,
    /// no adjacent free blocks, and a free list of only-free blocks.
    #[test]
    fn slab_invariants_survive_random_churn(
        sizes in alloc_sizes(),
        free_order in prop::collection::vec(any::<prop::sample::Index>(), 0..40),
    ) {
        let region_size = 512 * 1024;
        let region = OwnedRegion::new(region_size);
        let slab = unsafe { SlabAllocator::new(region.as_ptr(), region_size, 0x1000) };
        let initial = slab.heap_stats();
        prop_assert_eq!(initial.tag_mismatches, 0);

        let mut live: Vec<u64> = sizes
            .iter()
            .map(|&size| slab.allocate(size))
            .filter(|&offset| offset != 0)
            .collect();

        for index in &free_order {
            if live.is_empty() {
                break;
            }
            let offset = live.swap_remove(index.index(live.len()));
            slab.free(offset);

            let stats = slab.heap_stats();
            prop_assert_eq!(stats.tag_mismatches, 0);
            prop_assert_eq!(stats.adjacent_free_pairs, 0);
            prop_assert_eq!(stats.total_bytes, initial.total_bytes);
        }

        // Drain the rest; the heap must collapse back to one free block.
        for offset in live.drain(..) {
            slab.free(offset);
        }
        let end = slab.heap_stats();
        prop_assert_eq!(end.blocks, 1);
        prop_assert_eq!(end.free_bytes, initial.total_bytes);
        prop_assert_eq!(slab.free_list_len(), 1);
    }

    /// Freed blocks are reusable: alloc/free/alloc of the same size yields
    /// the same offset (first fit from a restored list).
    #[test]
    fn slab_alloc_free_alloc_is_stable(size in 1usize..8192) {
        let region_size = 128 * 1024;
        let region = OwnedRegion::new(region_size);
        let slab = unsafe { SlabAllocator::new(region.as_ptr(), region_size, 0x1000) };

        let first = slab.allocate(size);
        prop_assert_ne!(first, 0);
        slab.free(first);
        let second = slab.allocate(size);
        prop_assert_eq!(first, second);
    }

    /// The ring delivers every value exactly once, in push order.
    #[test]
    fn spsc_preserves_fifo_order(values in prop::collection::vec(any::<u64>(), 0..500)) {
        let (mut tx, mut rx) = ring_buffer::<u64, 64>();
        let mut pushed = 0;
        let mut popped = Vec::with_capacity(values.len());

        while pushed < values.len() || popped.len() < values.len() {
            if pushed < values.len() && tx.push(values[pushed]) {
                pushed += 1;
            } else if let Some(v) = rx.pop() {
                popped.push(v);
            } else {
                // Queue empty and nothing left to push: done early.
                break;
            }
        }
        while let Some(v) = rx.pop() {
            popped.push(v);
        }

        prop_assert_eq!(popped, values);
    }

    /// Peek always agrees with the following pop.
    #[test]
    fn spsc_peek_matches_pop(values in prop::collection::vec(any::<u32>(), 1..63)) {
        let (mut tx, mut rx) = ring_buffer::<u32, 64>();
        for &v in &values {
            prop_assert!(tx.push(v));
        }
        for &expected in &values {
            let peeked = *rx.peek().expect("peek on non-empty ring");
            prop_assert_eq!(peeked, expected);
            prop_assert_eq!(rx.pop(), Some(expected));
        }
        prop_assert!(rx.peek().is_none());
    }

    /// Quantization always produces in-range lanes, maps the minimum lane
    /// to -128, and dequantizes to within one step of the input.
    #[test]
    fn quantizer_is_bounded_and_faithful(dense_vec in dense_vector()) {
        let mut dense = [0.0f32; VECTOR_DIM];
        dense.copy_from_slice(&dense_vec);

        let (lanes, scale, bias) = scalar_quantize(&dense);
        let min = dense.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = dense.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        if (max - min).abs() < 1e-6 {
            prop_assert_eq!(scale, 1.0);
            prop_assert!(lanes.iter().all(|&l| l == -128));
        } else {
            prop_assert_eq!(bias, min);
            for (lane, &v) in lanes.iter().zip(dense.iter()) {
                let reconstructed = (*lane as f32 + 128.0) * scale + bias;
                prop_assert!((reconstructed - v).abs() <= scale * 1.01);
            }
            // Some lane sits at the bottom of the range.
            prop_assert!(lanes.contains(&-128));
        }
    }

    /// The hashing vectorizer conserves total mass and stays in its buckets.
    #[test]
    fn vectorizer_conserves_counts(
        terms in prop::collection::hash_map(1u32..10_000, 1u32..50, 0..64)
    ) {
        let dense = hash_vectorize(&terms);
        let total: f32 = dense.iter().sum();
        let expected: u32 = terms.values().sum();
        prop_assert_eq!(total as u32, expected);
        prop_assert!(dense.iter().all(|&v| v >= 0.0));
    }
}
