//! Architecture-specific context switching.
//!
//! Each backend exposes exactly two entry points:
//!
//! - `switch_context(prev_sp_slot, next_sp)`: save the host ABI's
//!   callee-saved register set on the current stack, store the stack
//!   pointer through `prev_sp_slot`, then load `next_sp` and restore the
//!   target's registers. The final `ret` resumes wherever the target last
//!   suspended.
//! - `forge_initial_frame(stack_top, closure) -> sp`: lay out a fresh stack
//!   so that the very first switch into it "restores" placeholder registers
//!   and returns into the fiber trampoline, with `closure` preloaded into
//!   one designated callee-saved register (R12 on x86-64, X19 on AArch64)
//!   for the trampoline to pick up.

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(target_arch = "x86_64")]
pub use self::x86_64::{forge_initial_frame, switch_context};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{forge_initial_frame, switch_context};

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("no context-switch backend for this architecture");
