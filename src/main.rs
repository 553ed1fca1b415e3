//! Demo binary: boots the runtime, feeds a handful of documents through the
//! pipeline from an ingest fiber, and reports arena activity from a status
//! fiber until everything has been stored.

use std::process::ExitCode;
use std::sync::Arc;

use specter::config::RuntimeConfig;
use specter::pipeline::Pipeline;
use specter::{log, scheduler, GhostArena};

const SAMPLE_DOCUMENTS: &[&str] = &[
    "Reserved address space costs nothing until the first touch commits a page.",
    "The slab hands out offsets so the index survives a remap of its region.",
    "Fibers yield at explicit points; the ring decides who runs next.",
    "One producer, one consumer, and a release store between them.",
    "Quantized vectors pack a document into two hundred and sixty four bytes.",
    "Boundary tags let a freed block find both neighbors in constant time.",
];

fn main() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if let Err(err) = config.validate() {
        eprintln!("configuration error: {}", err);
        return ExitCode::FAILURE;
    }

    log::set_level(config.log.level);
    scheduler::init_with_stack_size(config.scheduler.stack_size);

    let arena = match GhostArena::init(config.arena.size) {
        Ok(arena) => arena,
        Err(err) => {
            log::error(format!("ghost arena boot failed: {}", err));
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = arena.self_test() {
        log::error(format!("arena self-test failed: {}", err));
        return ExitCode::FAILURE;
    }

    let pipeline = Arc::new(Pipeline::start(arena, &config));
    let expected = SAMPLE_DOCUMENTS.len() as u64;

    let ingest_pipeline = pipeline.clone();
    scheduler::spawn("ingest", move || {
        for text in SAMPLE_DOCUMENTS {
            while !ingest_pipeline.ingest(text) {
                scheduler::yield_now();
            }
            scheduler::yield_now();
        }
    });

    let status_pipeline = pipeline.clone();
    scheduler::spawn("status", move || {
        loop {
            let stats = status_pipeline.stats();
            log::record(log::LogLevel::Info, "pipeline status")
                .target("status")
                .field_int("documents", stats.documents as i64)
                .field_int("vocabulary", stats.vocabulary as i64)
                .field_int("indexed", stats.indexed as i64)
                .field_int("faults", stats.faults as i64)
                .field_int("resident_pages", stats.resident_pages as i64)
                .emit();
            if stats.documents >= expected && stats.indexed >= expected {
                break;
            }
            scheduler::yield_now();
        }
    });

    scheduler::run();

    // Fibers are done; tear the worker and the arena down cooperatively.
    match Arc::try_unwrap(pipeline) {
        Ok(mut pipeline) => pipeline.shutdown(),
        Err(_) => log::warn("pipeline handle still shared at shutdown"),
    }

    let head = arena.head_offset();
    log::record(log::LogLevel::Info, "runtime shutting down")
        .target("main")
        .field_int("documents", arena.vector_count() as i64)
        .field_int("head_offset", head as i64)
        .emit();
    arena.shutdown();
    ExitCode::SUCCESS
}
