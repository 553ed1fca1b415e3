//! # Specter Runtime
//!
//! An experimental unikernel-style desktop runtime fusing four low-level
//! subsystems into one process:
//!
//! - **Ghost Arena**: a terabyte-scale virtual reservation whose pages
//!   materialize under a synchronous fault handler ([`arena`])
//! - **Slab Allocator**: an offset-addressed boundary-tag heap over a
//!   caller-owned region ([`slab`])
//! - **Fiber Scheduler**: cooperative round-robin multitasking over
//!   hand-forged stack frames ([`scheduler`], [`arch`])
//! - **SPSC Ring Buffer**: a lock-free bounded queue bridging the ingest
//!   fiber to the worker thread ([`spsc`])
//!
//! A small document pipeline ([`pipeline`]) exercises them end to end:
//! tokenize, hash-vectorize, scalar-quantize, append to the arena.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     main OS thread                           │
//! │  ┌───────────┐   ┌──────────────┐   ┌─────────────────────┐  │
//! │  │ scheduler │──>│ ingest fiber │──>│ status fiber        │  │
//! │  └───────────┘   └──────┬───────┘   └─────────────────────┘  │
//! └─────────────────────────┼────────────────────────────────────┘
//!                      SPSC ring (spsc.rs)
//! ┌─────────────────────────┼────────────────────────────────────┐
//! │                   worker OS thread                           │
//! │   tokenize -> vectorize -> quantize (pipeline.rs)            │
//! │        │                                  │                  │
//! │   ghost arena records (arena.rs)    slab + graph (slab.rs,   │
//! │   committed on fault                graph.rs)                │
//! └──────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod arch;
pub mod arena;
pub mod config;
pub mod error;
pub mod fiber;
pub mod graph;
pub mod log;
pub mod pipeline;
pub mod scheduler;
pub mod slab;
pub mod spsc;
pub mod sync;

// Re-exports
pub use arena::{ArenaHeader, GhostArena, DEFAULT_ARENA_SIZE, GHOST_MAGIC};
pub use config::{ConfigError, RuntimeConfig, RuntimeConfigBuilder};
pub use error::RuntimeError;
pub use fiber::{Fiber, FiberId, FiberSnapshot, FiberStack};
pub use graph::{GraphNode, VectorGraph};
pub use pipeline::{Pipeline, PipelineStats, Tokenizer, RECORD_SIZE, VECTOR_DIM};
pub use slab::{OwnedRegion, SlabAllocator};
pub use spsc::{ring_buffer, Consumer, Producer, RingBuffer};
pub use sync::{SpinGuard, SpinLock};

/// Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the runtime: logging level, this thread's fiber scheduler and
/// the process-global ghost arena, in that order.
pub fn init(config: &RuntimeConfig) -> Result<&'static GhostArena, RuntimeError> {
    log::set_level(config.log.level);
    scheduler::init_with_stack_size(config.scheduler.stack_size);
    GhostArena::init(config.arena.size)
}

/// Initialize the runtime from `SPECTER_*` environment variables.
pub fn init_from_env() -> Result<&'static GhostArena, RuntimeError> {
    init(&RuntimeConfig::from_env())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(RuntimeConfig::default().validate().is_ok());
    }
}
