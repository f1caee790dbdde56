//! Process-wide dynamic-load event counter. Interposes `dlopen`/`dlclose`
//! (the same `dlsym(RTLD_NEXT, ...)` forwarding pattern as
//! `crate::mpi_rank`) purely to bump a generation counter; it does not
//! itself rebuild `LibraryMap` snapshots — that happens off-signal, in
//! `Sampler::check_for_dynamic_load_events`.
//!
//! This is intentionally process-global rather than tied to one `Sampler`
//! instance: the preloaded agent is itself a process-wide singleton, and a
//! second `Sampler` constructed later in the same process (as a test suite
//! constructing and tearing down multiple instances in sequence does)
//! should see load events that happened before it existed.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicU32, Ordering};

static GENERATION: AtomicU32 = AtomicU32::new(0);

/// Current dynamic-load generation. A `Sampler` snapshot taken while this
/// value was `g` is stale as soon as the value changes.
pub fn generation() -> u32 {
    GENERATION.load(Ordering::Acquire)
}

unsafe fn lookup_real(name: &str) -> Option<*mut c_void> {
    let cname = CString::new(name).ok()?;
    let sym = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
    (!sym.is_null()).then_some(sym)
}

/// # Safety
/// Interposes the libc `dlopen` entry point; forwards to the real one.
#[no_mangle]
pub unsafe extern "C" fn dlopen(filename: *const c_char, flag: c_int) -> *mut c_void {
    type DlopenFn = unsafe extern "C" fn(*const c_char, c_int) -> *mut c_void;
    let Some(real) = lookup_real("dlopen") else { return std::ptr::null_mut() };
    let real: DlopenFn = std::mem::transmute(real);
    let handle = real(filename, flag);
    if !handle.is_null() {
        GENERATION.fetch_add(1, Ordering::AcqRel);
    }
    handle
}

/// # Safety
/// Interposes the libc `dlclose` entry point; forwards to the real one.
#[no_mangle]
pub unsafe extern "C" fn dlclose(handle: *mut c_void) -> c_int {
    type DlcloseFn = unsafe extern "C" fn(*mut c_void) -> c_int;
    let Some(real) = lookup_real("dlclose") else { return -1 };
    let real: DlcloseFn = std::mem::transmute(real);
    let rc = real(handle);
    if rc == 0 {
        GENERATION.fetch_add(1, Ordering::AcqRel);
    }
    rc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generation_starts_at_zero_and_is_readable() {
        // This test process never calls the interposed dlopen/dlclose
        // above (dynamic interposition only takes effect when this crate
        // is LD_PRELOADed into another process), so the generation is
        // whatever earlier tests in this binary left it at; it should at
        // least be a stable, readable counter.
        let g1 = generation();
        let g2 = generation();
        assert_eq!(g1, g2);
    }
}
