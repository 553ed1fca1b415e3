//! End-to-end pipeline test: documents enter through the SPSC ring and come
//! out as quantized records on the ghost arena.

use std::time::{Duration, Instant};

use specter::arena::GhostArena;
use specter::config::RuntimeConfig;
use specter::pipeline::{read_record, Pipeline, RECORD_SIZE, VECTOR_DIM};

const DOCUMENTS: &[&str] = &[
    "ghost pages materialize on first touch",
    "the slab splits blocks and coalesces both ways",
    "fibers hand the processor around a ring",
    "ghost pages materialize on first touch", // duplicate on purpose
];

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn documents_become_arena_records() {
    let config = RuntimeConfig::builder().arena_size(1 << 36).build();
    let arena = GhostArena::init(config.arena.size).expect("arena init");

    let base_count = arena.vector_count();
    let base_head = arena.head_offset();

    let mut pipeline = Pipeline::start(arena, &config);
    for text in DOCUMENTS {
        assert!(pipeline.ingest(text), "queue must accept a trickle feed");
    }

    let expected = base_count + DOCUMENTS.len() as u64;
    assert!(
        wait_until(Duration::from_secs(5), || {
            arena.vector_count() >= expected
                && pipeline.stats().indexed >= DOCUMENTS.len() as u64
        }),
        "worker did not store all documents in time"
    );

    let stats = pipeline.stats();
    assert_eq!(stats.documents, expected);
    assert_eq!(stats.indexed, DOCUMENTS.len() as u64);
    // Distinct terms across the corpus, minus stopwords and duplicates.
    assert!(stats.vocabulary >= 10);

    // Head advanced by exactly one record per document.
    assert_eq!(
        arena.head_offset(),
        base_head + (DOCUMENTS.len() * RECORD_SIZE) as u64
    );

    // Every stored record decodes with sane quantization parameters.
    for i in 0..DOCUMENTS.len() {
        let offset = base_head + (i * RECORD_SIZE) as u64;
        let (scale, _bias, lanes) = read_record(arena, offset).expect("record readable");
        assert!(scale.is_finite() && scale > 0.0);
        assert_eq!(lanes.len(), VECTOR_DIM);
        // A real document always hits its minimum bucket at -128.
        assert!(lanes.contains(&-128));
    }

    // Identical documents quantize to identical records.
    let (s0, b0, l0) = read_record(arena, base_head).unwrap();
    let (s3, b3, l3) = read_record(arena, base_head + (3 * RECORD_SIZE) as u64).unwrap();
    assert_eq!(s0, s3);
    assert_eq!(b0, b3);
    assert_eq!(l0, l3);

    pipeline.shutdown();
}
