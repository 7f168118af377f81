//! # Cortex-M4 Port Layer
//!
//! Hardware-specific half of the context switch for the ARM Cortex-M4
//! (Thumb-2). Tasks run in Thread mode on MSP, the same stack the scheduler
//! loop uses, but inside the execution stack region handed to the
//! scheduler; no exception entry is involved, the switch is an ordinary
//! function call.
//!
//! ## Callee-Saved State
//!
//! AAPCS makes `r4`–`r11` callee-saved, plus `s16`–`s31` when the FPU is used
//! for argument passing (`thumbv7em-none-eabihf`). `r3` is pushed as padding
//! so the frame keeps the 8-byte stack alignment AAPCS requires at public
//! interfaces.
//!
//! ```text
//!   [s16 .. s31]        (eabihf only, 64 bytes)
//!   r3 (pad)
//!   r4                  ─ start function on a fresh frame
//!   r5                  ─ start argument on a fresh frame
//!   r6 .. r11
//!   pc (saved lr)       ─ resume address
//! ```

use core::arch::naked_asm;

use super::StartFn;

/// AAPCS stack alignment.
pub const STACK_ALIGN: usize = 8;

/// Core registers frame: r3-r11 plus the return address.
const CORE_FRAME: usize = 10 * 4;

#[cfg(target_abi = "eabihf")]
const FPU_FRAME: usize = 16 * 4;
#[cfg(not(target_abi = "eabihf"))]
const FPU_FRAME: usize = 0;

/// Save the callee-saved registers and stack pointer into `*save`, then
/// continue on the stack at `load`.
///
/// # Safety
/// `load` must come from a previous `switch` or from `init_frame`.
#[cfg(not(target_abi = "eabihf"))]
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut usize, _load: usize) {
    naked_asm!(
        "push {{r3-r11, lr}}",
        // r0 = save, r1 = load
        "mov r2, sp",
        "str r2, [r0]",
        "mov sp, r1",
        "pop {{r3-r11, pc}}",
    )
}

/// Save the callee-saved registers and stack pointer into `*save`, then
/// continue on the stack at `load`.
///
/// # Safety
/// `load` must come from a previous `switch` or from `init_frame`.
#[cfg(target_abi = "eabihf")]
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_save: *mut usize, _load: usize) {
    naked_asm!(
        "push {{r3-r11, lr}}",
        "vpush {{s16-s31}}",
        "mov r2, sp",
        "str r2, [r0]",
        "mov sp, r1",
        "vpop {{s16-s31}}",
        "pop {{r3-r11, pc}}",
    )
}

/// Landing pad of a fresh frame: `r4(r5)`.
#[unsafe(naked)]
unsafe extern "C" fn task_start() -> ! {
    naked_asm!(
        "mov r0, r5",
        "blx r4",
        "udf #0",
    )
}

/// Build the initial frame directly below `boundary`.
///
/// Function pointers already carry the Thumb bit, so the popped `pc` stays
/// in Thumb state.
///
/// # Safety
/// `boundary` must be 8-byte aligned with the frame's bytes writable below
/// it.
pub unsafe fn init_frame(boundary: *mut u8, entry: StartFn, arg: *mut u8) -> *mut u8 {
    let frame = boundary.sub(CORE_FRAME + FPU_FRAME).cast::<u32>();
    frame.write_bytes(0, (CORE_FRAME + FPU_FRAME) / 4);

    let core_regs = frame.add(FPU_FRAME / 4);
    core_regs.add(1).write(entry as *const () as usize as u32);      // r4
    core_regs.add(2).write(arg as usize as u32);        // r5
    core_regs.add(9).write(task_start as *const () as usize as u32); // pc
    frame.cast()
}

/// Sleep until the next interrupt.
///
/// Nothing but an interrupt handler can change task states while the loop
/// idles, so `wfi` is the natural park step for an idle hook.
#[inline]
pub fn idle() {
    cortex_m::asm::wfi();
}
