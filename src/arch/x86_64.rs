//! System V AMD64 context switch.
//!
//! Callee-saved set: RBX, RBP, R12-R15. R12 carries the closure pointer
//! into the trampoline.

use core::arch::global_asm;

global_asm!(
    ".globl __specter_switch_context",
    ".p2align 4",
    "__specter_switch_context:",
    // Save the callee-saved set on the current stack.
    "push rbx",
    "push rbp",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    // Swap stacks: *prev_sp_slot = rsp; rsp = next_sp.
    "mov [rdi], rsp",
    "mov rsp, rsi",
    // Restore the target's set and return into it.
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbp",
    "pop rbx",
    "ret",
);

global_asm!(
    ".globl __specter_fiber_start",
    ".p2align 4",
    "__specter_fiber_start:",
    // The forged frame parked the closure pointer in R12.
    "mov rdi, r12",
    "call {entry}",
    // The entry never returns.
    "ud2",
    entry = sym crate::scheduler::fiber_entry,
);

extern "C" {
    fn __specter_switch_context(prev_sp_slot: *mut usize, next_sp: usize);
    fn __specter_fiber_start();
}

/// Switch from the current context to `next_sp`, saving the current stack
/// pointer through `prev_sp_slot`.
///
/// # Safety
///
/// `next_sp` must point at a register save area produced by a previous
/// switch or by [`forge_initial_frame`]; `prev_sp_slot` must stay valid
/// until this context is resumed.
#[inline]
pub unsafe fn switch_context(prev_sp_slot: *mut usize, next_sp: usize) {
    __specter_switch_context(prev_sp_slot, next_sp);
}

/// Build the initial register save area for a new fiber on `stack_top`
/// (one past the highest usable byte, stacks grow down).
///
/// Frame, from high to low: trampoline return address, then RBX, RBP, R12
/// (the closure pointer), R13, R14, R15 placeholders. The return slot sits
/// at `sp % 16 == 8` so the trampoline's `call` hands the entry a System V
/// conformant stack.
///
/// # Safety
///
/// `stack_top` must be the top of a writable region with room for the
/// frame; `closure` must be the raw closure box consumed exactly once by
/// the trampoline.
pub unsafe fn forge_initial_frame(stack_top: *mut u8, closure: *mut u8) -> usize {
    let top = (stack_top as usize) & !0xF;
    let sp = top - 7 * core::mem::size_of::<usize>();
    let slots = sp as *mut usize;

    slots.add(6).write(__specter_fiber_start as *const () as usize); // return slot for the final ret
    slots.add(5).write(0); // rbx
    slots.add(4).write(0); // rbp
    slots.add(3).write(closure as usize); // r12: closure pointer for the trampoline
    slots.add(2).write(0); // r13
    slots.add(1).write(0); // r14
    slots.add(0).write(0); // r15

    sp
}
