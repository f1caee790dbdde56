//! Async-signal-safe stack capture.
//!
//! Real-world samplers (including samply, via `framehop`) use DWARF
//! CFI or frame-pointer chasing to walk an interrupted thread's stack
//! without calling into libc's own (non-signal-safe) unwinder. PerFlow
//! implements the frame-pointer variant: frame-pointer chasing needs no
//! allocation and touches only the interrupted thread's own memory, which
//! keeps it safe to run from the handler. On any unwind error (a broken or
//! missing frame-pointer chain) the partial stack captured so far is kept
//! rather than discarded.

use perflow_core::CallStack;

/// Captures up to `max_depth` return addresses starting at `pc`/`fp`
/// (instruction pointer / frame-pointer register values at the moment of
/// interruption), by walking the classic `[saved_fp, return_addr]` chain.
///
/// # Safety
/// `fp` must be a valid frame-pointer value for the interrupted thread's
/// stack, or `0`. This function only ever reads memory through `fp`; it
/// performs bounds sanity checks (monotonically increasing addresses,
/// alignment) before each dereference and stops rather than following an
/// implausible pointer, but it cannot fully validate an arbitrary `fp`.
pub unsafe fn capture_stack_by_frame_pointer(pc: u64, fp: u64, max_depth: usize) -> CallStack {
    let mut stack = CallStack::new();
    if pc != 0 {
        stack.push(pc);
    }

    let mut frame_ptr = fp;
    let mut last_frame_ptr = 0u64;
    while stack.depth() < max_depth && frame_ptr != 0 {
        if frame_ptr % 8 != 0 || frame_ptr <= last_frame_ptr {
            // A broken chain: not 8-byte aligned, or not moving outward.
            // Keep whatever was captured so far and stop.
            break;
        }
        let saved_fp_ptr = frame_ptr as *const u64;
        let return_addr_ptr = (frame_ptr + 8) as *const u64;

        // SAFETY: caller guarantees `fp` chain validity to the extent
        // possible from signal context; we additionally require addresses
        // to strictly increase, which bounds the walk to a finite,
        // well-formed stack even if a link is garbage.
        let return_addr = std::ptr::read_volatile(return_addr_ptr);
        if return_addr == 0 {
            break;
        }
        stack.push(return_addr);

        last_frame_ptr = frame_ptr;
        frame_ptr = std::ptr::read_volatile(saved_fp_ptr);
    }

    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frame_pointer_yields_just_pc() {
        let stack = unsafe { capture_stack_by_frame_pointer(0x1234, 0, 32) };
        assert_eq!(stack.as_slice(), &[0x1234]);
    }

    #[test]
    fn misaligned_frame_pointer_stops_immediately() {
        let stack = unsafe { capture_stack_by_frame_pointer(0x1234, 0x1001, 32) };
        assert_eq!(stack.as_slice(), &[0x1234]);
    }
}
