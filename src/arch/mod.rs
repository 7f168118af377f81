//! # Architecture Abstraction Layer
//!
//! Provides the register-level half of the context switch for each supported
//! target. Every port exports the same items:
//!
//! - `STACK_ALIGN`: alignment of the frame boundary
//! - `switch(save, load)`: save callee-saved registers on the current stack,
//!   store the stack pointer into `*save`, then load `load` and pop the
//!   registers saved there
//! - `init_frame(boundary, entry, arg)`: build the frame a first `switch`
//!   pops, so that it starts `entry(arg)` with the stack ending at `boundary`
//! - `idle()`: what the CPU does while no task can run
//!
//! Everything above this layer is architecture independent.

/// Signature of the function a fresh task frame starts in.
pub type StartFn = extern "C" fn(*mut u8) -> !;

#[cfg(all(target_arch = "x86_64", not(windows)))]
mod x86_64;
#[cfg(all(target_arch = "x86_64", not(windows)))]
pub use self::x86_64::{idle, init_frame, switch, STACK_ALIGN};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use self::aarch64::{idle, init_frame, switch, STACK_ALIGN};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::cortex_m4::{idle, init_frame, switch, STACK_ALIGN};

#[cfg(not(any(
    all(target_arch = "x86_64", not(windows)),
    target_arch = "aarch64",
    all(target_arch = "arm", target_os = "none"),
)))]
compile_error!("coopsched supports x86_64 (System V), aarch64 and bare-metal Cortex-M4 only");
