//! # Ghost Arena
//!
//! A terabyte-scale virtual address reservation whose pages materialize on
//! first touch, driven by a synchronous fault handler.
//!
//! ## Design
//!
//! The arena reserves its full span with `PROT_NONE` and `MAP_NORESERVE`,
//! so neither physical memory nor page tables are populated up front. A
//! `SIGSEGV`/`SIGBUS` handler installed with `SA_SIGINFO | SA_NODEFER`
//! intercepts the first access to each page, commits it with
//! `mprotect(PROT_READ | PROT_WRITE)` and returns, letting the hardware
//! retry the faulting instruction. User code observes nothing but a
//! zero-filled page.
//!
//! Fault delivery is process-global, so the arena is a process-global
//! singleton: the handler reaches it through static atomics and calls
//! nothing that allocates, locks or logs. Faults outside the reserved span
//! restore the default disposition and return, so the retried access
//! produces the platform's normal crash dump.
//!
//! The first page carries the [`ArenaHeader`]; reading its magic during
//! initialization deliberately triggers the very first fault and proves the
//! whole path works before any user data goes in.

use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};

use nix::libc;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::RuntimeError;
use crate::log;

/// Magic value marking an initialized arena header.
pub const GHOST_MAGIC: u64 = 0xFADE_D0C5_DEAD_C0DE;

/// Default reservation size: 1 TiB.
pub const DEFAULT_ARENA_SIZE: usize = 1 << 40;

/// Header stored at offset 0 of the arena.
///
/// Field order is the wire layout: little-endian u64s at offsets 0, 8, 16.
/// Records follow from offset `size_of::<ArenaHeader>()`.
#[repr(C)]
pub struct ArenaHeader {
    /// [`GHOST_MAGIC`] once the header has been written; never rewritten.
    pub magic: u64,
    /// Number of records appended; monotonically non-decreasing.
    pub vector_count: u64,
    /// Offset of the next record slot; always >= the header size.
    pub head_offset: u64,
}

/// Size of the arena header in bytes.
pub const HEADER_SIZE: usize = mem::size_of::<ArenaHeader>();

// ============================================================================
// Process-global handler state
//
// The fault handler may run on any thread at any instruction. Everything it
// needs lives in statics it can read without synchronization beyond atomics.
// ============================================================================

static ARENA_BASE: AtomicUsize = AtomicUsize::new(0);
static ARENA_SIZE: AtomicUsize = AtomicUsize::new(0);
static FAULT_COUNT: AtomicU64 = AtomicU64::new(0);
static RESIDENT_PAGES: AtomicU64 = AtomicU64::new(0);

static ARENA: OnceLock<GhostArena> = OnceLock::new();

/// Serializes `GhostArena::init` so exactly one caller reserves, installs
/// handlers and publishes the statics; losers of the race wait here and
/// then observe the winner's instance.
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// The process-global ghost arena.
pub struct GhostArena {
    base: *mut u8,
    size: usize,
}

// SAFETY: the base pointer is immutable after init; page commits are
// serialized by the kernel and all header mutation goes through atomics.
unsafe impl Send for GhostArena {}
unsafe impl Sync for GhostArena {}

impl GhostArena {
    /// Reserve the arena, install the fault handlers and bootstrap the
    /// header. Idempotent: a second call, from any thread, returns the
    /// existing instance.
    pub fn init(size: usize) -> Result<&'static GhostArena, RuntimeError> {
        if let Some(arena) = ARENA.get() {
            return Ok(arena);
        }

        // One caller performs the whole sequence; the handler-visible
        // statics are written exactly once, by that caller, before anything
        // can fault into the new reservation.
        let _guard = INIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(arena) = ARENA.get() {
            return Ok(arena);
        }

        let base = reserve_span(size)?;
        install_fault_handlers()?;

        ARENA_BASE.store(base as usize, Ordering::Release);
        ARENA_SIZE.store(size, Ordering::Release);

        let arena = GhostArena { base, size };
        arena.bootstrap_header();

        log::record(log::LogLevel::Info, "ghost arena online")
            .target("arena")
            .field_int("reserved_gib", (size >> 30) as i64)
            .emit();

        let _ = ARENA.set(arena); // cannot lose: guarded by INIT_LOCK
        Ok(ARENA.get().expect("arena initialized under the lock"))
    }

    /// The initialized global arena, if any.
    pub fn global() -> Result<&'static GhostArena, RuntimeError> {
        ARENA.get().ok_or(RuntimeError::ArenaUninitialized)
    }

    /// Base virtual address of the reservation.
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Total reserved size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Translate an arena offset into a virtual address.
    pub fn address_of(&self, offset: u64) -> Result<*mut u8, RuntimeError> {
        if offset >= self.size as u64 {
            return Err(RuntimeError::InvalidAccess);
        }
        // SAFETY: offset is inside the reservation.
        Ok(unsafe { self.base.add(offset as usize) })
    }

    /// Pages committed so far by the fault handler.
    pub fn resident_pages(&self) -> u64 {
        RESIDENT_PAGES.load(Ordering::Relaxed)
    }

    /// Faults taken so far.
    pub fn fault_count(&self) -> u64 {
        FAULT_COUNT.load(Ordering::Relaxed)
    }

    /// Number of records appended, with acquire ordering so the record
    /// bytes counted are visible to the caller.
    pub fn vector_count(&self) -> u64 {
        self.header_atomic(8).load(Ordering::Acquire)
    }

    /// Current head offset, with acquire ordering.
    pub fn head_offset(&self) -> u64 {
        self.header_atomic(16).load(Ordering::Acquire)
    }

    /// Publish a new head offset after the record bytes are in place.
    pub fn publish_head_offset(&self, new_head: u64) {
        self.header_atomic(16).store(new_head, Ordering::Release);
    }

    /// Bump the record counter. Published after the head so a reader that
    /// observes the count also observes the record.
    pub fn increment_vector_count(&self) -> u64 {
        self.header_atomic(8).fetch_add(1, Ordering::Release)
    }

    /// Write a probe value deep inside the reservation and read it back,
    /// proving the fault path end to end.
    pub fn self_test(&self) -> Result<(), RuntimeError> {
        let offset = (self.size / 2) as u64;
        let addr = self.address_of(offset)? as *mut u32;
        let faults_before = self.fault_count();

        // SAFETY: addr is inside the reservation; the access faults at
        // most once and the handler commits the page.
        unsafe {
            ptr::write_volatile(addr, 0x1234);
            if ptr::read_volatile(addr) != 0x1234 {
                return Err(RuntimeError::Commit);
            }
        }

        log::record(log::LogLevel::Info, "arena self-test passed")
            .target("arena")
            .field_int("probe_offset_gib", (offset >> 30) as i64)
            .field_int("faults_taken", (self.fault_count() - faults_before) as i64)
            .emit();
        Ok(())
    }

    /// Release the entire reservation. No per-page bookkeeping exists, so
    /// this is a single `munmap`.
    pub fn shutdown(&self) {
        ARENA_BASE.store(0, Ordering::Release);
        // SAFETY: base/size describe the mapping created in init().
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.size) };
        log::record(log::LogLevel::Info, "ghost arena released")
            .target("arena")
            .field_int("faults", self.fault_count() as i64)
            .field_int("resident_pages", self.resident_pages() as i64)
            .emit();
    }

    /// View a header counter field as an atomic. `field_offset` is 8 for
    /// `vector_count`, 16 for `head_offset`.
    fn header_atomic(&self, field_offset: usize) -> &AtomicU64 {
        // SAFETY: the header page was committed during bootstrap; the
        // fields are aligned u64s shared with the worker thread.
        unsafe { AtomicU64::from_ptr(self.base.add(field_offset) as *mut u64) }
    }

    /// Read the header magic (deliberately taking the first fault) and
    /// initialize the header if this is a fresh reservation.
    fn bootstrap_header(&self) {
        let header = self.base as *mut ArenaHeader;

        // SAFETY: the read below is the designed bootstrap trap: it faults,
        // the handler commits the page, and the load retries against
        // zero-filled memory.
        unsafe {
            let magic = ptr::read_volatile(ptr::addr_of!((*header).magic));
            if magic != GHOST_MAGIC {
                ptr::write_volatile(ptr::addr_of_mut!((*header).vector_count), 0);
                ptr::write_volatile(
                    ptr::addr_of_mut!((*header).head_offset),
                    HEADER_SIZE as u64,
                );
                // Magic goes last: a header with the magic set is complete.
                ptr::write_volatile(ptr::addr_of_mut!((*header).magic), GHOST_MAGIC);
                log::debug("arena header initialized");
            } else {
                log::debug("arena header already present");
            }
        }
    }
}

/// Host page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf(_SC_PAGESIZE) is always safe and positive.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Reserve `size` bytes of address space with no access and no commit.
fn reserve_span(size: usize) -> Result<*mut u8, RuntimeError> {
    #[allow(unused_mut)]
    let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        flags |= libc::MAP_NORESERVE;
    }

    // SAFETY: anonymous mapping with no constraints on placement.
    let base = unsafe {
        libc::mmap(
            ptr::null_mut(),
            size,
            libc::PROT_NONE,
            flags,
            -1,
            0,
        )
    };
    if base == libc::MAP_FAILED {
        log::record(log::LogLevel::Error, "arena reservation failed")
            .target("arena")
            .field_int("bytes", size as i64)
            .field_str("os_error", std::io::Error::last_os_error().to_string())
            .emit();
        return Err(RuntimeError::Reservation);
    }
    Ok(base as *mut u8)
}

/// Install the fault handlers for both segmentation and bus faults.
fn install_fault_handlers() -> Result<(), RuntimeError> {
    let action = SigAction::new(
        SigHandler::SigAction(ghost_fault_handler),
        SaFlags::SA_SIGINFO | SaFlags::SA_NODEFER,
        SigSet::empty(),
    );

    for sig in [Signal::SIGSEGV, Signal::SIGBUS] {
        // SAFETY: the handler is async-signal-safe: it touches only static
        // atomics and calls mprotect/signal.
        if unsafe { signal::sigaction(sig, &action) }.is_err() {
            log::error("failed to install arena fault handler");
            return Err(RuntimeError::SignalInstall);
        }
    }
    Ok(())
}

/// The fault handler. Commits the touched page when the fault lands inside
/// the arena; otherwise restores the default disposition so the retried
/// instruction produces a normal crash dump.
///
/// Re-entrancy: `SA_NODEFER` leaves the signal unblocked, so a nested fault
/// taken while committing (there is none today, the commit path touches no
/// arena memory) would simply run the handler again.
extern "C" fn ghost_fault_handler(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    // SAFETY: the kernel hands us a valid siginfo for SA_SIGINFO handlers.
    let addr = unsafe { (*info).si_addr() } as usize;
    let base = ARENA_BASE.load(Ordering::Acquire);
    let size = ARENA_SIZE.load(Ordering::Acquire);

    if base != 0 && addr >= base && addr < base + size {
        if commit_page(addr).is_ok() {
            return; // The faulting instruction retries and succeeds.
        }
    }

    // Genuine crash, or an unrecoverable commit failure: fall back to the
    // default handler and let the retry take the process down properly.
    // SAFETY: signal() is async-signal-safe.
    unsafe { libc::signal(sig, libc::SIG_DFL) };
}

/// Commit the page containing `addr`. Runs inside the fault handler: no
/// locks, no allocation, no logging.
fn commit_page(addr: usize) -> Result<(), RuntimeError> {
    let ps = page_size();
    let page = addr & !(ps - 1);

    // SAFETY: page lies inside the reservation checked by the caller.
    let ret = unsafe {
        libc::mprotect(
            page as *mut libc::c_void,
            ps,
            libc::PROT_READ | libc::PROT_WRITE,
        )
    };
    if ret != 0 {
        return Err(RuntimeError::Commit);
    }

    FAULT_COUNT.fetch_add(1, Ordering::Relaxed);
    RESIDENT_PAGES.fetch_add(1, Ordering::Relaxed);
    Ok(())
}
