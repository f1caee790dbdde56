//! A hardware PMU overflow counter. Configures
//! `perf_event_open` to overflow roughly every `frequency_hz` CPU-cycle
//! events (the measured-core cycle count is recalibrated whenever the
//! sampler (re)arms) and delivers a real-time signal to this thread on
//! overflow.
//!
//! Grounded on the raw `perf_event_open` syscall pattern used throughout
//! the retrieved `perf_event_open`/`perfcnt` crates (see
//! `Thaumy-perf-event-open/src/ffi/syscall.rs`): a thin `libc::syscall`
//! wrapper, no bindgen dependency, since only a small stable prefix of
//! `perf_event_attr` is needed.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd};

use crate::error::SamplerError;
use crate::signal_source::SignalSource;

/// The profiling signal delivered on counter overflow. A real-time signal
/// is used (rather than `SIGPROF`, which variant (b) claims) so the two
/// variants can coexist in a process without colliding.
pub const PMU_OVERFLOW_SIGNAL: i32 = libc::SIGRTMIN() + 2;

const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;

/// Alternative overflow events besides the default CPU cycles
/// (L1-dcache-misses, branch-mispredictions use the HW_CACHE / other
/// hardware-event encodings; omitted here since PerFlow defaults to cycles
/// and instructions only, the two cheapest-to-read counters on every
/// microarchitecture PerFlow targets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuEvent {
    CpuCycles,
    Instructions,
}

impl PmuEvent {
    fn config(self) -> u64 {
        match self {
            PmuEvent::CpuCycles => PERF_COUNT_HW_CPU_CYCLES,
            PmuEvent::Instructions => PERF_COUNT_HW_INSTRUCTIONS,
        }
    }
}

// Stable prefix of `struct perf_event_attr` from <linux/perf_event.h>.
// `size` is filled with `size_of::<Self>()` so the kernel treats any
// trailing fields it expects but we do not declare as zeroed, which is the
// documented forward-compatible way to use a partial struct definition.
#[repr(C)]
#[derive(Default)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period_or_freq: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events_or_watermark: u32,
    bp_type: u32,
    config1_or_bp_addr: u64,
    config2_or_bp_len: u64,
}

const PERF_FLAG_DISABLED: u64 = 1 << 0;
const PERF_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
const PERF_FLAG_FREQ: u64 = 1 << 10;
const PERF_FLAG_SAMPLE_ID_ALL: u64 = 1 << 18;

const PERF_EVENT_IOC_RESET: u64 = 0x2403;
const PERF_EVENT_IOC_REFRESH: u64 = 0x2402;

pub struct PmuSource {
    event: PmuEvent,
    fd: Option<File>,
}

impl PmuSource {
    pub fn new(event: PmuEvent) -> Self {
        Self { event, fd: None }
    }

    fn open(&mut self, frequency_hz: u32) -> io::Result<File> {
        let attr = PerfEventAttr {
            type_: PERF_TYPE_HARDWARE,
            size: std::mem::size_of::<PerfEventAttr>() as u32,
            config: self.event.config(),
            sample_period_or_freq: frequency_hz as u64,
            sample_type: 0,
            read_format: 0,
            flags: PERF_FLAG_DISABLED | PERF_FLAG_EXCLUDE_KERNEL | PERF_FLAG_FREQ | PERF_FLAG_SAMPLE_ID_ALL,
            wakeup_events_or_watermark: 1,
            bp_type: 0,
            config1_or_bp_addr: 0,
            config2_or_bp_len: 0,
        };

        // pid = 0 (calling thread), cpu = -1 (any CPU the thread runs on),
        // group_fd = -1 (not part of a group), flags = 0.
        let fd = unsafe {
            libc::syscall(libc::SYS_perf_event_open, &attr, 0i32, -1i32, -1i32, 0u64)
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { File::from_raw_fd(fd as i32) })
    }
}

impl SignalSource for PmuSource {
    fn arm(&mut self, frequency_hz: u32) -> Result<(), SamplerError> {
        let file = self
            .open(frequency_hz)
            .map_err(|e| SamplerError::SourceArmFailed(format!("perf_event_open: {e}")))?;
        let raw_fd = file.as_raw_fd();

        // Route overflow notifications to this thread as a signal.
        let tid = unsafe { libc::syscall(libc::SYS_gettid) as i32 };
        unsafe {
            if libc::fcntl(raw_fd, libc::F_SETOWN, tid) < 0 {
                return Err(SamplerError::SourceArmFailed(format!(
                    "fcntl(F_SETOWN): {}",
                    io::Error::last_os_error()
                )));
            }
            let flags = libc::fcntl(raw_fd, libc::F_GETFL, 0);
            if libc::fcntl(raw_fd, libc::F_SETFL, flags | libc::O_ASYNC) < 0 {
                return Err(SamplerError::SourceArmFailed(format!(
                    "fcntl(F_SETFL): {}",
                    io::Error::last_os_error()
                )));
            }
            if libc::fcntl(raw_fd, libc::F_SETSIG, PMU_OVERFLOW_SIGNAL) < 0 {
                return Err(SamplerError::SourceArmFailed(format!(
                    "fcntl(F_SETSIG): {}",
                    io::Error::last_os_error()
                )));
            }
            if libc::ioctl(raw_fd, PERF_EVENT_IOC_RESET, 0) < 0 {
                return Err(SamplerError::SourceArmFailed(format!(
                    "ioctl(RESET): {}",
                    io::Error::last_os_error()
                )));
            }
            if libc::ioctl(raw_fd, PERF_EVENT_IOC_REFRESH, 1) < 0 {
                return Err(SamplerError::SourceArmFailed(format!(
                    "ioctl(REFRESH): {}",
                    io::Error::last_os_error()
                )));
            }
        }

        self.fd = Some(file);
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), SamplerError> {
        // Dropping the fd disables future overflow notifications; no
        // further syscalls are required.
        self.fd = None;
        Ok(())
    }
}

/// Re-arms the counter after a sample has been captured. The handler calls
/// this after each sample; `PERF_EVENT_IOC_REFRESH` with a count of `1`
/// both re-enables the counter and requests exactly one more overflow
/// notification, which keeps re-arming async-signal-safe (a single `ioctl`,
/// no allocation).
pub fn rearm(raw_fd: i32) {
    unsafe {
        libc::ioctl(raw_fd, PERF_EVENT_IOC_REFRESH, 1);
    }
}
