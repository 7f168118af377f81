//! # Context Capture / Restore
//!
//! Every task runs on one shared execution stack. The top of that stack is
//! the *frame boundary*: first dispatch builds the initial frame right below
//! it and the boundary never moves, so every address a task records on its
//! stack stays valid across suspensions.
//!
//! Suspending copies the live slice `[sp, boundary)` into the task's
//! [`SavedContext`]. Resuming copies it back to exactly the same addresses
//! and switches to `boundary - len`, which lands inside the switch call the
//! task made when it suspended.
//!
//! ```text
//!   high ┌──────────────────────┐
//!        │ anchor slot          │
//!        ├──────────────────────┤ ◄── boundary (fixed)
//!        │ start stub ret addr  │
//!        │ trampoline frame     │
//!        │ task body frame      │   captured span
//!        │ nested helper frames │   (copied to / from SavedContext)
//!        │ suspend frame        │
//!        │ saved callee regs    │ ◄── sp at suspend
//!        ├──────────────────────┤
//!        │        free          │
//!        ├──────────────────────┤
//!    low │ canary (painted)     │ ◄── base
//!        └──────────────────────┘
//! ```
//!
//! The suspended task's own memory is reused by whichever task runs next, so
//! nothing outside a task may hold a pointer into that task's stack frames
//! across a suspension.
//!
//! Above the boundary sits the *anchor*: one slot the scheduler refreshes
//! with its own address every time it starts running. Task frames reach the
//! scheduler only through the anchor. Snapshots never record the
//! scheduler's address, so the scheduler can be moved between runs.

use core::marker::PhantomData;
use core::ptr::{self, NonNull};

use crate::arch;
use crate::config::{ANCHOR_LEN, CANARY_LEN, MIN_EXEC_STACK, STACK_PAINT};
use crate::error::{Result, SchedError};

// ---------------------------------------------------------------------------
// Saved context
// ---------------------------------------------------------------------------

/// Fixed-capacity copy of a suspended task's stack slice.
#[derive(Clone)]
pub struct SavedContext<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> SavedContext<N> {
    /// An empty snapshot.
    pub const fn new() -> Self {
        Self { buf: [0; N], len: 0 }
    }

    /// Captured bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Forget the snapshot.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Replace the snapshot with `bytes`.
    pub fn fill(&mut self, bytes: &[u8]) -> Result<()> {
        self.check(bytes.len())?;
        self.buf[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        Ok(())
    }

    /// Copy `len` bytes starting at `top` into the buffer. On overflow the
    /// previous snapshot is left untouched.
    ///
    /// # Safety
    /// `top..top + len` must be readable and must not overlap the buffer.
    pub unsafe fn capture(&mut self, top: *const u8, len: usize) -> Result<()> {
        self.check(len)?;
        ptr::copy_nonoverlapping(top, self.buf.as_mut_ptr(), len);
        self.len = len;
        Ok(())
    }

    /// Copy the snapshot back so that it ends at `boundary`, returning the
    /// stack pointer the task had when it was captured.
    ///
    /// # Safety
    /// `boundary - len..boundary` must be writable and owned by the caller.
    pub unsafe fn restore(&self, boundary: *mut u8) -> *mut u8 {
        let top = boundary.sub(self.len);
        ptr::copy_nonoverlapping(self.buf.as_ptr(), top, self.len);
        top
    }

    fn check(&self, needed: usize) -> Result<()> {
        if needed > N {
            return Err(SchedError::ContextOverflow { needed, capacity: N });
        }
        Ok(())
    }
}

impl<const N: usize> Default for SavedContext<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Switch bookkeeping
// ---------------------------------------------------------------------------

/// Stack pointers saved by the register switch. `host_sp` belongs to the
/// scheduler loop, `task_sp` to the task that last switched away.
#[derive(Debug, Default)]
pub struct SwitchRegs {
    pub host_sp: usize,
    pub task_sp: usize,
}

impl SwitchRegs {
    pub const fn new() -> Self {
        Self { host_sp: 0, task_sp: 0 }
    }
}

// ---------------------------------------------------------------------------
// Execution stack
// ---------------------------------------------------------------------------

/// The shared stack all tasks execute on.
///
/// Holds the region as a raw pointer: task frames living in it are accessed
/// by task code while the scheduler copies snapshots in and out, so no Rust
/// reference to the bytes may outlive a single copy.
pub struct ExecStack<'a> {
    base: NonNull<u8>,
    size: usize,
    _region: PhantomData<&'a mut [u8]>,
}

impl<'a> ExecStack<'a> {
    /// Take ownership of `region` as the execution stack. The top is aligned
    /// down to `arch::STACK_ALIGN` and the anchor slot is carved out below
    /// it; the rest is usable stack.
    pub fn new(region: &'a mut [u8]) -> Result<Self> {
        let start = region.as_mut_ptr() as usize;
        let end = (start + region.len()) & !(arch::STACK_ALIGN - 1);
        let size = end.saturating_sub(start).saturating_sub(ANCHOR_LEN);
        if size < MIN_EXEC_STACK {
            return Err(SchedError::StackTooSmall { size, required: MIN_EXEC_STACK });
        }

        region[..size].fill(STACK_PAINT);
        let base = NonNull::from(region).cast::<u8>();
        Ok(Self { base, size, _region: PhantomData })
    }

    /// Usable bytes below the boundary.
    #[inline]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// The fixed frame boundary (one past the highest usable byte).
    #[inline]
    pub fn boundary(&self) -> *mut u8 {
        // SAFETY: size never exceeds the length of the borrowed region.
        unsafe { self.base.as_ptr().add(self.size) }
    }

    /// The anchor slot, `ANCHOR_LEN` bytes starting at the boundary and
    /// aligned like it. Its address is fixed for the life of the region.
    #[inline]
    pub fn anchor(&self) -> *mut u8 {
        self.boundary()
    }

    /// Bytes between a suspended stack pointer and the boundary.
    #[inline]
    pub fn span_from(&self, sp: usize) -> usize {
        (self.boundary() as usize).saturating_sub(sp)
    }

    /// Whether `sp` lies inside this stack.
    #[inline]
    pub fn contains(&self, sp: usize) -> bool {
        let base = self.base.as_ptr() as usize;
        (base..=base + self.size).contains(&sp)
    }

    /// The lowest `CANARY_LEN` bytes still carry the paint.
    pub fn canary_intact(&self) -> bool {
        // SAFETY: the canary is inside the region and no task ever legitimately
        // owns it, so reading it cannot race with live task frames.
        let canary = unsafe { core::slice::from_raw_parts(self.base.as_ptr(), CANARY_LEN) };
        canary.iter().all(|&b| b == STACK_PAINT)
    }

    /// Deepest stack usage observed so far, measured from the paint.
    pub fn peak_usage(&self) -> usize {
        let base = self.base.as_ptr();
        let untouched = (0..self.size)
            // SAFETY: i < size, inside the region.
            .take_while(|&i| unsafe { base.add(i).read() } == STACK_PAINT)
            .count();
        self.size - untouched
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_restore_round_trip() {
        let mut stack = vec![0u8; 256];
        let boundary = unsafe { stack.as_mut_ptr().add(256) };
        for (i, b) in stack[200..].iter_mut().enumerate() {
            *b = i as u8 ^ 0x5A;
        }
        let expected = stack[200..].to_vec();

        let mut ctx: SavedContext<64> = SavedContext::new();
        unsafe { ctx.capture(stack.as_ptr().add(200), 56) }.unwrap();
        assert_eq!(ctx.len(), 56);
        assert_eq!(ctx.as_bytes(), &expected[..]);

        // Another task scribbles over the same region.
        stack[150..].fill(0xEE);

        let sp = unsafe { ctx.restore(boundary) };
        assert_eq!(sp as usize, stack.as_ptr() as usize + 200);
        assert_eq!(&stack[200..], &expected[..]);
        assert!(stack[150..200].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn test_capture_overflow_keeps_previous_snapshot() {
        let data = [7u8; 128];
        let mut ctx: SavedContext<32> = SavedContext::new();
        ctx.fill(&[1, 2, 3]).unwrap();

        let err = unsafe { ctx.capture(data.as_ptr(), data.len()) }.unwrap_err();
        assert_eq!(err, SchedError::ContextOverflow { needed: 128, capacity: 32 });
        assert_eq!(ctx.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_fill_and_clear() {
        let mut ctx: SavedContext<8> = SavedContext::default();
        assert!(ctx.is_empty());
        ctx.fill(&[9; 8]).unwrap();
        assert_eq!(ctx.len(), 8);
        assert!(ctx.fill(&[9; 9]).is_err());
        ctx.clear();
        assert!(ctx.is_empty());
        assert_eq!(ctx.capacity(), 8);
    }

    #[test]
    fn test_exec_stack_alignment_and_paint() {
        let mut region = vec![0u8; 4096 + 7];
        let stack = ExecStack::new(&mut region).unwrap();

        assert_eq!(stack.boundary() as usize % arch::STACK_ALIGN, 0);
        assert!(stack.size() >= 4096 - arch::STACK_ALIGN - ANCHOR_LEN);
        assert!(stack.size() + ANCHOR_LEN <= 4096 + 7);
        assert!(stack.canary_intact());
        assert_eq!(stack.peak_usage(), 0);
        assert_eq!(stack.span_from(stack.boundary() as usize - 48), 48);
    }

    #[test]
    fn test_anchor_sits_above_boundary() {
        let mut region = vec![0u8; 2048];
        let region_end = region.as_ptr() as usize + region.len();
        let stack = ExecStack::new(&mut region).unwrap();

        assert_eq!(stack.anchor(), stack.boundary());
        assert_eq!(stack.anchor() as usize % arch::STACK_ALIGN, 0);
        assert!(stack.anchor() as usize + ANCHOR_LEN <= region_end);
        assert!(!stack.contains(stack.anchor() as usize + 1));

        // Writing the anchor does not count as stack usage.
        unsafe { stack.anchor().write_bytes(0, ANCHOR_LEN) };
        assert_eq!(stack.peak_usage(), 0);
    }

    #[test]
    fn test_exec_stack_too_small() {
        let mut region = vec![0u8; 64];
        match ExecStack::new(&mut region) {
            Err(SchedError::StackTooSmall { required, .. }) => assert_eq!(required, MIN_EXEC_STACK),
            other => panic!("unexpected: {:?}", other.map(|s| s.size())),
        }
    }

    #[test]
    fn test_canary_and_peak_usage() {
        let mut region = vec![0u8; 2048];
        let stack = ExecStack::new(&mut region).unwrap();
        let size = stack.size();
        let base = unsafe { stack.boundary().sub(size) };

        unsafe { stack.boundary().sub(100).write_bytes(0, 100) };
        assert_eq!(stack.peak_usage(), 100);
        assert!(stack.canary_intact());

        unsafe { base.add(3).write(0) };
        assert!(!stack.canary_intact());
        assert_eq!(stack.peak_usage(), size - 3);
    }
}
