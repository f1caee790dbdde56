//! MPI rank detection: the sampler is `LD_PRELOAD`ed into an unmodified
//! MPI application, so it cannot link
//! against an MPI implementation directly. Instead it interposes every
//! standard C and Fortran name-mangling variant of `MPI_Init`/`MPI_Init_thread`,
//! forwards to the real implementation found via `dlsym(RTLD_NEXT, ...)`,
//! and captures the rank immediately after the real call returns. Failure
//! to do so (no MPI symbols present, or the lookup fails) is non-fatal: the
//! sampler falls back to the OS process id.

use std::ffi::CString;
use std::os::raw::{c_char, c_int, c_void};
use std::sync::atomic::{AtomicI32, Ordering};

/// `-1` means "not yet captured"; callers should fall back to the OS pid.
static CAPTURED_RANK: AtomicI32 = AtomicI32::new(-1);

pub fn captured_rank() -> Option<u32> {
    let v = CAPTURED_RANK.load(Ordering::Acquire);
    if v >= 0 {
        Some(v as u32)
    } else {
        None
    }
}

/// The rank to use for this process: the MPI rank if one was captured by
/// the interposed entry points, otherwise the OS process id. Failing to
/// capture a rank is non-fatal.
pub fn resolved_rank() -> u32 {
    captured_rank().unwrap_or_else(|| std::process::id())
}

unsafe fn lookup_real_symbol(name: &str) -> Option<*mut c_void> {
    let cname = CString::new(name).ok()?;
    let sym = libc::dlsym(libc::RTLD_NEXT, cname.as_ptr());
    if sym.is_null() {
        None
    } else {
        Some(sym)
    }
}

/// Calls the real `MPI_Comm_rank(MPI_COMM_WORLD, &rank)` via `dlsym`, if
/// present, and records the result. Called right after forwarding to the
/// real `MPI_Init`/`MPI_Init_thread`.
unsafe fn capture_rank_after_init() {
    // MPI_COMM_WORLD is implementation-defined (often a plain `int`
    // handle equal to a small constant, e.g. 0x44000000 in Open MPI or a
    // simple integer in MPICH); a preload shim cannot portably synthesize
    // it without linking the MPI headers. PerFlow looks up the real
    // implementation's own `MPI_Comm_rank` and passes through whatever
    // handle value the application's MPI library resolves
    // `ompi_mpi_comm_world`/`MPI_COMM_WORLD` to at link time, which the
    // dynamic linker has already bound for us as a data symbol.
    let Some(comm_world_sym) = lookup_real_symbol("ompi_mpi_comm_world") else {
        return try_capture_via_mpich_comm_world();
    };
    let comm_world = *(comm_world_sym as *const c_int);
    capture_via_comm_rank(comm_world);
}

unsafe fn try_capture_via_mpich_comm_world() {
    // MPICH represents MPI_COMM_WORLD as the plain integer constant
    // `0x44000000`; unlike Open MPI it is not a resolvable data symbol.
    const MPICH_COMM_WORLD: c_int = 0x4400_0000;
    capture_via_comm_rank(MPICH_COMM_WORLD);
}

unsafe fn capture_via_comm_rank(comm_world: c_int) {
    type CommRankFn = unsafe extern "C" fn(c_int, *mut c_int) -> c_int;
    let Some(sym) = lookup_real_symbol("MPI_Comm_rank") else { return };
    let comm_rank: CommRankFn = std::mem::transmute(sym);
    let mut rank: c_int = -1;
    if comm_rank(comm_world, &mut rank as *mut c_int) == 0 && rank >= 0 {
        CAPTURED_RANK.store(rank, Ordering::Release);
    }
}

macro_rules! intercept_mpi_init_c {
    ($rust_name:ident, $exported_name:literal) => {
        /// # Safety
        /// Called by the dynamic linker in place of the real MPI entry
        /// point; `argc`/`argv` are forwarded unchanged.
        #[no_mangle]
        pub unsafe extern "C" fn $rust_name(argc: *mut c_int, argv: *mut *mut *mut c_char) -> c_int {
            let real: MpiInitFn = match lookup_real_symbol($exported_name) {
                Some(sym) => std::mem::transmute(sym),
                None => return -1,
            };
            let rc = real(argc, argv);
            if rc == 0 {
                capture_rank_after_init();
            }
            rc
        }
    };
}

macro_rules! intercept_mpi_init_fortran {
    ($rust_name:ident, $exported_name:literal) => {
        /// # Safety
        /// Called by the dynamic linker in place of the real Fortran MPI
        /// entry point. Fortran `MPI_INIT(IERROR)` is a void subroutine
        /// that returns its status through the by-reference `ierror`
        /// out-parameter, not a function return value, so the status is
        /// read back through the pointer rather than from `real`'s
        /// (nonexistent) return value.
        #[no_mangle]
        pub unsafe extern "C" fn $rust_name(ierror: *mut c_int) {
            let real: MpiInitFortranFn = match lookup_real_symbol($exported_name) {
                Some(sym) => std::mem::transmute(sym),
                None => {
                    if !ierror.is_null() {
                        *ierror = -1;
                    }
                    return;
                }
            };
            real(ierror);
            if !ierror.is_null() && *ierror == 0 {
                capture_rank_after_init();
            }
        }
    };
}

type MpiInitFn = unsafe extern "C" fn(*mut c_int, *mut *mut *mut c_char) -> c_int;
type MpiInitFortranFn = unsafe extern "C" fn(*mut c_int);

// The C binding takes (argc, argv) and returns the status. The three
// common Fortran name-mangling conventions (lowercase-no-underscore,
// lowercase-with-trailing-underscore for gfortran, and all-uppercase for
// older/other toolchains) are all void subroutines taking a single
// by-reference IERROR out-parameter.
intercept_mpi_init_c!(MPI_Init, "MPI_Init");
intercept_mpi_init_fortran!(mpi_init, "mpi_init");
intercept_mpi_init_fortran!(mpi_init_, "mpi_init_");
intercept_mpi_init_fortran!(MPI_INIT, "MPI_INIT");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_process_id_when_uncaptured() {
        // In a unit test process there is no real MPI_Init call, so the
        // rank is never captured and resolved_rank() must fall back.
        assert_eq!(captured_rank(), None);
        assert_eq!(resolved_rank(), std::process::id());
    }
}
