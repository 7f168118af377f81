//! # x86_64 Port (System V)
//!
//! Callee-saved state under the System V ABI is `rbx`, `rbp`, `r12`–`r15`,
//! the MXCSR control bits and the x87 control word. `switch` pushes all of
//! it on the current stack, so a suspended task's registers end up inside
//! the stack slice captured into its snapshot.
//!
//! ## Frame Layout (low address first, `sp` points at the first row)
//!
//! ```text
//!   +0x00  MXCSR (low 32 bits) | x87 CW (bits 32..48)
//!   +0x08  r15
//!   +0x10  r14
//!   +0x18  r13      ─ start argument on a fresh frame
//!   +0x20  r12      ─ start function on a fresh frame
//!   +0x28  rbx
//!   +0x30  rbp
//!   +0x38  return address
//! ```

use core::arch::naked_asm;

use super::StartFn;

/// The frame boundary is 16-byte aligned, as the ABI requires before a call.
pub const STACK_ALIGN: usize = 16;

/// Size of the frame `switch` leaves on a stack, return address included.
const SWITCH_FRAME: usize = 8 * 8;

/// Default MXCSR (all exceptions masked, round to nearest) and x87 control
/// word (extended precision, all exceptions masked).
const DEFAULT_CSR: usize = 0x1F80 | (0x037F << 32);

/// Save the callee-saved registers and stack pointer into `*save`, then
/// continue on the stack at `load`.
///
/// # Safety
/// `load` must be a stack pointer produced by a previous `switch` or by
/// `init_frame`, and the memory it refers to must hold that frame.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut usize, _load: usize) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr [rsp]",
        "fnstcw [rsp + 4]",
        // rdi = save, rsi = load
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "ldmxcsr [rsp]",
        "fldcw [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    )
}

/// Landing pad of a fresh frame: calls `r12(r13)` with the stack aligned
/// exactly at the boundary.
#[unsafe(naked)]
unsafe extern "C" fn task_start() -> ! {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        "ud2",
    )
}

/// Build the initial frame directly below `boundary` and return the stack
/// pointer to hand to `switch`.
///
/// # Safety
/// `boundary` must be `STACK_ALIGN`-aligned with at least `SWITCH_FRAME`
/// writable bytes below it.
pub unsafe fn init_frame(boundary: *mut u8, entry: StartFn, arg: *mut u8) -> *mut u8 {
    let frame = boundary.sub(SWITCH_FRAME).cast::<usize>();
    let words: [usize; 8] = [
        DEFAULT_CSR,
        0,                                // r15
        0,                                // r14
        arg as usize,                     // r13
        entry as *const () as usize,      // r12
        0,                                // rbx
        0,                                // rbp, terminates frame-pointer walks
        task_start as *const () as usize, // return address
    ];
    frame.copy_from_nonoverlapping(words.as_ptr(), words.len());
    frame.cast()
}

/// Nothing to sleep on in a hosted process.
#[inline]
pub fn idle() {
    core::hint::spin_loop();
}
