//! Runtime error taxonomy.
//!
//! Recoverable conditions are returned as typed values from the operation
//! that detected them. Conditions the runtime cannot continue past (fiber
//! stack allocation, page commit inside the fault handler) are not
//! represented here; they panic or fall through to the default signal
//! disposition at the site.

use thiserror::Error;

/// Errors surfaced by the runtime's core subsystems.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    /// Reserving the ghost arena's virtual address range failed.
    #[error("virtual address reservation failed")]
    Reservation,

    /// Installing the SIGSEGV/SIGBUS handlers failed.
    #[error("signal handler installation failed")]
    SignalInstall,

    /// `mprotect` refused to commit a page inside the fault handler.
    ///
    /// This is unrecoverable: the handler restores the default signal
    /// disposition and the retried access produces a crash dump.
    #[error("page commit failed inside the fault handler")]
    Commit,

    /// An offset outside the reserved arena span was translated.
    #[error("offset outside the reserved arena")]
    InvalidAccess,

    /// The process-global arena has not been initialized yet.
    #[error("ghost arena is not initialized")]
    ArenaUninitialized,
}
