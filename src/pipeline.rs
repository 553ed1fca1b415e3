//! # Document Pipeline
//!
//! The end-to-end exercise of the core primitives: text enters on the
//! ingest side, crosses the SPSC ring to a worker OS thread, and comes out
//! the other end as a scalar-quantized vector record appended to the ghost
//! arena, with an index node linked into the slab-resident graph.
//!
//! ```text
//! ingest fiber ──ring──> worker thread
//!                          tokenize -> hash-vectorize -> quantize
//!                          append record at arena head
//!                          link graph node in the slab
//! ```
//!
//! ## Record layout
//!
//! Records are packed little-endian at `arena base + head_offset`:
//!
//! ```text
//! offset 0: scale      f32
//! offset 4: bias       f32
//! offset 8: quantized  i8[256]
//! ```
//!
//! The append protocol publishes the head offset with release ordering
//! after the record bytes are written, and bumps `vector_count` last, so a
//! reader that observes the new count also observes the record.

use std::collections::{HashMap, HashSet};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::arena::GhostArena;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::graph::VectorGraph;
use crate::log;
use crate::slab::{OwnedRegion, SlabAllocator};
use crate::spsc::{ring_buffer, Consumer, Producer};

/// Dense vector dimension produced by the hashing vectorizer.
pub const VECTOR_DIM: usize = 256;

/// Bytes per record on the arena: scale + bias + quantized lanes.
pub const RECORD_SIZE: usize = 4 + 4 + VECTOR_DIM;

/// Ring capacity between the ingest fiber and the worker.
pub const QUEUE_CAPACITY: usize = 64;

/// Virtual base offset of the index slab.
const SLAB_BASE_OFFSET: u64 = 0x1000;

/// Interned term identifier; 0 is never issued.
pub type TermId = u32;

const STOPWORDS: &[&str] = &[
    "the", "of", "and", "a", "to", "in", "is", "you", "that", "it", "he", "was", "for", "on",
    "are", "as", "with", "his", "they", "i",
];

// ============================================================================
// Tokenizer
// ============================================================================

/// Lowercasing whitespace/punctuation tokenizer with an interned vocabulary.
pub struct Tokenizer {
    stopwords: HashSet<&'static str>,
    vocab: HashMap<String, TermId>,
    inverse: Vec<String>,
    next_id: TermId,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    /// Create a tokenizer with the built-in stopword list.
    pub fn new() -> Self {
        Self {
            stopwords: STOPWORDS.iter().copied().collect(),
            vocab: HashMap::new(),
            inverse: vec![String::new()], // id 0 unused
            next_id: 1,
        }
    }

    /// Split `text` into lowercase alphanumeric runs and count terms,
    /// interning each new term into the vocabulary. Stopwords are dropped.
    pub fn tokenize(&mut self, text: &str) -> HashMap<TermId, u32> {
        let mut counts = HashMap::new();
        let mut token = String::with_capacity(32);

        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                token.push(c.to_ascii_lowercase());
            } else if !token.is_empty() {
                if !self.is_stopword(&token) {
                    *counts.entry(self.term_id(&token)).or_insert(0) += 1;
                }
                token.clear();
            }
        }
        if !token.is_empty() && !self.is_stopword(&token) {
            *counts.entry(self.term_id(&token)).or_insert(0) += 1;
        }

        counts
    }

    /// Intern `token`, returning its stable identifier.
    pub fn term_id(&mut self, token: &str) -> TermId {
        if let Some(&id) = self.vocab.get(token) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.vocab.insert(token.to_string(), id);
        self.inverse.push(token.to_string());
        id
    }

    /// Reverse lookup of an interned term.
    pub fn term_string(&self, id: TermId) -> Option<&str> {
        self.inverse.get(id as usize).map(String::as_str)
    }

    /// Whether `token` is on the stopword list.
    pub fn is_stopword(&self, token: &str) -> bool {
        self.stopwords.contains(token)
    }

    /// Number of distinct interned terms.
    pub fn vocabulary_size(&self) -> usize {
        self.vocab.len()
    }
}

// ============================================================================
// IDF tracking
// ============================================================================

/// Per-term document frequencies for inverse-document-frequency weighting.
#[derive(Default)]
pub struct IdfTracker {
    doc_freqs: HashMap<TermId, u32>,
}

impl IdfTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one document containing each term in `unique_terms` once.
    pub fn update_document(&mut self, unique_terms: impl IntoIterator<Item = TermId>) {
        for term in unique_terms {
            *self.doc_freqs.entry(term).or_insert(0) += 1;
        }
    }

    /// Documents seen containing `term`.
    pub fn doc_freq(&self, term: TermId) -> u32 {
        self.doc_freqs.get(&term).copied().unwrap_or(0)
    }

    /// Smoothed IDF: `ln(total / (1 + df)) + 1`.
    pub fn idf(&self, term: TermId, total_docs: u64) -> f32 {
        if total_docs == 0 {
            return 0.0;
        }
        let df = self.doc_freq(term) as f32;
        (total_docs as f32 / (1.0 + df)).ln() + 1.0
    }
}

// ============================================================================
// Vectorize and quantize
// ============================================================================

/// Fold sparse term counts into a dense vector with the hashing trick:
/// each term adds its count to bucket `term_id % VECTOR_DIM`.
pub fn hash_vectorize(counts: &HashMap<TermId, u32>) -> [f32; VECTOR_DIM] {
    let mut dense = [0.0f32; VECTOR_DIM];
    for (&term, &count) in counts {
        dense[term as usize % VECTOR_DIM] += count as f32;
    }
    dense
}

/// Scalar-quantize a dense vector to i8 lanes.
///
/// Per lane: `q = clamp(round((v - min) / (max - min) * 255) - 128, -128, 127)`.
/// A flat input (`|max - min| < 1e-6`) yields `scale = 1.0` with every lane
/// at `-128`. Returns `(lanes, scale, bias)` with `scale = (max - min) / 255`
/// and `bias = min` in the non-degenerate case.
pub fn scalar_quantize(dense: &[f32; VECTOR_DIM]) -> ([i8; VECTOR_DIM], f32, f32) {
    let mut min = dense[0];
    let mut max = dense[0];
    for &v in dense.iter() {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }

    if (max - min).abs() < 1e-6 {
        return ([-128i8; VECTOR_DIM], 1.0, min);
    }

    let range = max - min;
    let mut lanes = [0i8; VECTOR_DIM];
    for (lane, &v) in lanes.iter_mut().zip(dense.iter()) {
        let scaled = ((v - min) / range * 255.0).round() as i32 - 128;
        *lane = scaled.clamp(-128, 127) as i8;
    }

    (lanes, range / 255.0, min)
}

// ============================================================================
// Arena record append
// ============================================================================

/// Append one quantized record at the arena head.
///
/// Returns the record's arena offset. Order matters: record bytes first,
/// head offset with release second, counter last.
pub fn append_record(
    arena: &GhostArena,
    scale: f32,
    bias: f32,
    lanes: &[i8; VECTOR_DIM],
) -> Result<u64, RuntimeError> {
    let head = arena.head_offset();
    // Validate the whole span before touching it.
    arena.address_of(head + RECORD_SIZE as u64 - 1)?;
    let dest = arena.address_of(head)?;

    // SAFETY: the span [dest, dest + RECORD_SIZE) is inside the
    // reservation; faults commit pages transparently.
    unsafe {
        ptr::write_unaligned(dest as *mut f32, scale);
        ptr::write_unaligned(dest.add(4) as *mut f32, bias);
        ptr::copy_nonoverlapping(lanes.as_ptr() as *const u8, dest.add(8), VECTOR_DIM);
    }

    arena.publish_head_offset(head + RECORD_SIZE as u64);
    arena.increment_vector_count();
    Ok(head)
}

/// Read back the record at `offset`. The inverse of [`append_record`],
/// used by integration tests and diagnostics.
pub fn read_record(
    arena: &GhostArena,
    offset: u64,
) -> Result<(f32, f32, [i8; VECTOR_DIM]), RuntimeError> {
    arena.address_of(offset + RECORD_SIZE as u64 - 1)?;
    let src = arena.address_of(offset)?;

    // SAFETY: span validated above.
    unsafe {
        let scale = ptr::read_unaligned(src as *const f32);
        let bias = ptr::read_unaligned(src.add(4) as *const f32);
        let mut lanes = [0i8; VECTOR_DIM];
        ptr::copy_nonoverlapping(src.add(8), lanes.as_mut_ptr() as *mut u8, VECTOR_DIM);
        Ok((scale, bias, lanes))
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Analysis state shared between the worker and stats readers.
struct Analysis {
    tokenizer: Tokenizer,
    idf: IdfTracker,
}

struct Shared {
    running: AtomicBool,
    indexed: AtomicU64,
    analysis: Mutex<Analysis>,
}

/// Counters reported by [`Pipeline::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Records appended to the arena.
    pub documents: u64,
    /// Distinct terms interned so far.
    pub vocabulary: usize,
    /// Graph nodes inserted.
    pub indexed: u64,
    /// Arena faults taken.
    pub faults: u64,
    /// Arena pages committed.
    pub resident_pages: u64,
}

/// The ingest-to-record pipeline: one producer side (fiber-friendly, never
/// blocks) and one worker OS thread consuming the ring.
pub struct Pipeline {
    producer: Mutex<Producer<String, QUEUE_CAPACITY>>,
    shared: Arc<Shared>,
    arena: &'static GhostArena,
    worker: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Start the worker thread and return the pipeline handle.
    pub fn start(arena: &'static GhostArena, config: &RuntimeConfig) -> Self {
        let (producer, consumer) = ring_buffer::<String, QUEUE_CAPACITY>();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            indexed: AtomicU64::new(0),
            analysis: Mutex::new(Analysis {
                tokenizer: Tokenizer::new(),
                idf: IdfTracker::new(),
            }),
        });

        let worker_shared = shared.clone();
        let slab_size = config.pipeline.slab_size;
        let worker = thread::Builder::new()
            .name("specter-worker".into())
            .spawn(move || worker_loop(arena, worker_shared, consumer, slab_size))
            .expect("failed to spawn pipeline worker thread");

        Self {
            producer: Mutex::new(producer),
            shared,
            arena,
            worker: Some(worker),
        }
    }

    /// Offer a document to the worker. Returns `false` when the ring is
    /// full; the caller yields and retries.
    pub fn ingest(&self, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        self.producer.lock().push(text.to_string())
    }

    /// Snapshot of pipeline progress, readable from any thread.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            documents: self.arena.vector_count(),
            vocabulary: self.shared.analysis.lock().tokenizer.vocabulary_size(),
            indexed: self.shared.indexed.load(Ordering::Acquire),
            faults: self.arena.fault_count(),
            resident_pages: self.arena.resident_pages(),
        }
    }

    /// Stop the worker after it drains the ring, and join it.
    pub fn shutdown(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The worker: drain the ring, process each document, sleep briefly when
/// idle. Runs on its own OS thread under preemptive scheduling.
fn worker_loop(
    arena: &'static GhostArena,
    shared: Arc<Shared>,
    mut consumer: Consumer<String, QUEUE_CAPACITY>,
    slab_size: usize,
) {
    let region = OwnedRegion::new(slab_size);
    // SAFETY: the region lives to the end of this function, and the worker
    // is the slab's only user.
    let slab = unsafe { SlabAllocator::new(region.as_ptr(), slab_size, SLAB_BASE_OFFSET) };
    let mut graph = VectorGraph::new();

    loop {
        match consumer.pop() {
            Some(text) => {
                process_document(arena, &shared, &slab, &mut graph, &text);
            }
            None => {
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                thread::sleep(Duration::from_millis(2));
            }
        }
    }

    log::record(log::LogLevel::Debug, "pipeline worker stopped")
        .target("pipeline")
        .field_int("indexed", shared.indexed.load(Ordering::Acquire) as i64)
        .emit();
}

fn process_document(
    arena: &GhostArena,
    shared: &Shared,
    slab: &SlabAllocator,
    graph: &mut VectorGraph,
    text: &str,
) {
    let counts = {
        let mut analysis = shared.analysis.lock();
        let counts = analysis.tokenizer.tokenize(text);
        analysis.idf.update_document(counts.keys().copied());
        counts
    };
    if counts.is_empty() {
        return;
    }

    let dense = hash_vectorize(&counts);
    let (lanes, scale, bias) = scalar_quantize(&dense);

    let record_offset = match append_record(arena, scale, bias, &lanes) {
        Ok(offset) => offset,
        Err(err) => {
            log::record(log::LogLevel::Error, "record append failed")
                .target("pipeline")
                .field_str("error", err.to_string())
                .emit();
            return;
        }
    };

    let doc_id = shared.indexed.load(Ordering::Relaxed) as u32;
    if graph.insert(slab, doc_id, record_offset).is_none() {
        log::warn("index slab exhausted; document stored but not indexed");
    }
    shared.indexed.fetch_add(1, Ordering::Release);
}

// ============================================================================
// Tests
// ============================================================================
