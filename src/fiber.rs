//! # Fibers
//!
//! Cooperatively scheduled units of execution with their own stacks,
//! switched without kernel involvement.
//!
//! A fiber's stack is an anonymous mapping with a `PROT_NONE` guard page at
//! the low end, so runaway recursion faults instead of silently corrupting
//! a neighboring allocation. The main OS thread is wrapped as fiber 0 with
//! no stack of its own; its stack pointer is captured on the first switch
//! away from it.

use std::fmt;
use std::ptr;

use nix::libc;

use crate::arena::page_size;

/// Unique identifier for a fiber within its scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiberId(pub u64);

impl FiberId {
    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fiber({})", self.0)
    }
}

/// Default fiber stack size: 1 MiB.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// An mmap-backed fiber stack with a guard page at the low end.
pub struct FiberStack {
    base: *mut u8,
    total: usize,
}

impl FiberStack {
    /// Map a stack of `size` usable bytes plus one guard page.
    ///
    /// Allocation failure is fatal: a runtime that cannot map a fiber stack
    /// has nothing sensible left to do.
    pub fn allocate(size: usize) -> Self {
        let ps = page_size();
        let usable = (size + ps - 1) & !(ps - 1);
        let total = usable + ps;

        // SAFETY: fresh anonymous mapping, unconstrained placement.
        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            panic!(
                "fiber stack allocation failed for {} bytes: {}",
                total,
                std::io::Error::last_os_error()
            );
        }

        // Guard page: any overflow past the low end faults immediately.
        // SAFETY: the first page of the mapping just created.
        let ret = unsafe { libc::mprotect(base, ps, libc::PROT_NONE) };
        if ret != 0 {
            panic!(
                "fiber guard page setup failed: {}",
                std::io::Error::last_os_error()
            );
        }

        Self {
            base: base as *mut u8,
            total,
        }
    }

    /// One past the highest usable byte; stacks grow down from here.
    pub fn top(&self) -> *mut u8 {
        // SAFETY: base + total is one past the end of the mapping.
        unsafe { self.base.add(self.total) }
    }

    /// Lowest usable address (just above the guard page).
    pub fn bottom(&self) -> *mut u8 {
        // SAFETY: guard page is the first page of the mapping.
        unsafe { self.base.add(page_size()) }
    }

    /// Usable stack size in bytes.
    pub fn size(&self) -> usize {
        self.total - page_size()
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // SAFETY: base/total describe the mapping from allocate().
        unsafe { libc::munmap(self.base as *mut libc::c_void, self.total) };
    }
}

impl fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberStack")
            .field("size", &self.size())
            .finish()
    }
}

/// A fiber record owned by the scheduler.
pub struct Fiber {
    /// Unique identifier; the main fiber is 0.
    pub id: FiberId,
    /// Name for diagnostics.
    pub name: String,
    /// Stack, or `None` for the main fiber (the OS thread's own stack).
    pub stack: Option<FiberStack>,
    /// Saved stack pointer while suspended. For a fresh fiber this is the
    /// forged initial frame; for the main fiber it is written on the first
    /// switch away.
    pub saved_sp: usize,
    /// Set by the trampoline once the entry closure has returned.
    pub completed: bool,
}

impl Fiber {
    /// Whether the saved SP lies inside this fiber's own stack. Trivially
    /// true for the main fiber, which has no stack of its own.
    pub fn sp_in_bounds(&self) -> bool {
        match &self.stack {
            Some(stack) => {
                let sp = self.saved_sp;
                sp >= stack.bottom() as usize && sp <= stack.top() as usize
            }
            None => true,
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("completed", &self.completed)
            .finish()
    }
}

/// A copyable view of a fiber's state, returned by scheduler observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiberSnapshot {
    /// Fiber identifier.
    pub id: FiberId,
    /// Fiber name.
    pub name: String,
    /// Whether the fiber's entry has returned.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fiber_id_display() {
        assert_eq!(FiberId(3).to_string(), "Fiber(3)");
        assert_eq!(FiberId(3).as_u64(), 3);
    }

    #[test]
    fn test_stack_allocation_and_bounds() {
        let stack = FiberStack::allocate(64 * 1024);
        assert!(stack.size() >= 64 * 1024);
        assert!((stack.top() as usize) > (stack.bottom() as usize));
        assert_eq!(
            stack.top() as usize - stack.bottom() as usize,
            stack.size()
        );
    }

    #[test]
    fn test_stack_is_writable_to_the_top() {
        let stack = FiberStack::allocate(16 * 1024);
        // SAFETY: both ends of the usable span belong to the mapping.
        unsafe {
            *stack.bottom() = 0xAA;
            *stack.top().sub(1) = 0xBB;
            assert_eq!(*stack.bottom(), 0xAA);
            assert_eq!(*stack.top().sub(1), 0xBB);
        }
    }

    #[test]
    fn test_main_fiber_sp_bounds() {
        let fiber = Fiber {
            id: FiberId(0),
            name: "main".into(),
            stack: None,
            saved_sp: 0,
            completed: false,
        };
        assert!(fiber.sp_in_bounds());
    }
}
