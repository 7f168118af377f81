//! # AArch64 Port (AAPCS64)
//!
//! Callee-saved state is `x19`–`x28`, the frame pointer `x29`, the link
//! register `x30` and the low halves of `v8`–`v15` (`d8`–`d15`). `switch`
//! stores all of it in a 160-byte frame on the current stack.
//!
//! ## Frame Layout (low address first)
//!
//! ```text
//!   +0x00  x19, x20   ─ start function, start argument on a fresh frame
//!   +0x10  x21, x22
//!   +0x20  x23, x24
//!   +0x30  x25, x26
//!   +0x40  x27, x28
//!   +0x50  x29, x30   ─ x30 = resume address
//!   +0x60  d8 .. d15
//! ```

use core::arch::naked_asm;

use super::StartFn;

pub const STACK_ALIGN: usize = 16;

const SWITCH_FRAME: usize = 0xa0;

/// See the x86_64 port; same contract.
///
/// # Safety
/// `load` must come from a previous `switch` or from `init_frame`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut usize, _load: usize) {
    naked_asm!(
        "sub sp, sp, #0xa0",
        "stp x19, x20, [sp, #0x00]",
        "stp x21, x22, [sp, #0x10]",
        "stp x23, x24, [sp, #0x20]",
        "stp x25, x26, [sp, #0x30]",
        "stp x27, x28, [sp, #0x40]",
        "stp x29, x30, [sp, #0x50]",
        "stp d8, d9, [sp, #0x60]",
        "stp d10, d11, [sp, #0x70]",
        "stp d12, d13, [sp, #0x80]",
        "stp d14, d15, [sp, #0x90]",
        // x0 = save, x1 = load
        "mov x2, sp",
        "str x2, [x0]",
        "mov sp, x1",
        "ldp x19, x20, [sp, #0x00]",
        "ldp x21, x22, [sp, #0x10]",
        "ldp x23, x24, [sp, #0x20]",
        "ldp x25, x26, [sp, #0x30]",
        "ldp x27, x28, [sp, #0x40]",
        "ldp x29, x30, [sp, #0x50]",
        "ldp d8, d9, [sp, #0x60]",
        "ldp d10, d11, [sp, #0x70]",
        "ldp d12, d13, [sp, #0x80]",
        "ldp d14, d15, [sp, #0x90]",
        "add sp, sp, #0xa0",
        "ret",
    )
}

#[unsafe(naked)]
unsafe extern "C" fn task_start() -> ! {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #0x1",
    )
}

/// # Safety
/// `boundary` must be 16-byte aligned with `SWITCH_FRAME` writable bytes
/// below it.
pub unsafe fn init_frame(boundary: *mut u8, entry: StartFn, arg: *mut u8) -> *mut u8 {
    let frame = boundary.sub(SWITCH_FRAME).cast::<usize>();
    frame.write_bytes(0, SWITCH_FRAME / 8);
    frame.add(0).write(entry as *const () as usize);      // x19
    frame.add(1).write(arg as usize);        // x20
    frame.add(11).write(task_start as *const () as usize); // x30
    frame.cast()
}

#[inline]
pub fn idle() {
    core::hint::spin_loop();
}
