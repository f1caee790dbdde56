//! `Sampler`: the periodic signal source whose handler captures a stack and
//! updates a `SampleMap`. This module owns the state machine,
//! signal-handler installation, and the (off-signal) flush/stop control
//! path. The handler itself lives in [`handler_entry`] and touches nothing
//! that is not async-signal-safe.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use perflow_core::SampleMap;

use crate::config::SamplerConfig;
use crate::dl_watch;
use crate::error::SamplerError;
use crate::library_map::{LibraryMap, LibraryMapRegistry};
use crate::mpi_rank;
use crate::proc_maps;
use crate::signal_source::pmu::{PmuEvent, PmuSource, PMU_OVERFLOW_SIGNAL};
use crate::signal_source::timer::{TimerSource, TIMER_SIGNAL};
use crate::signal_source::SignalSource;
use crate::stats::{SamplerStats, SamplerStatsSnapshot};
use crate::store::StoreExporter;
use crate::unwind::capture_stack_by_frame_pointer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Which sample-trigger variant to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerVariant {
    HardwarePmu(PmuEventKind),
    IntervalTimer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmuEventKind {
    CpuCycles,
    Instructions,
}

struct SamplerInner {
    sample_map: SampleMap,
    library_registry: Mutex<LibraryMapRegistry>,
    current_snapshot_id: AtomicU32,
    snapshot_generation_baseline: AtomicU32,
    stats: SamplerStats,
    max_stack_depth: usize,
}

impl SamplerInner {
    /// The actual signal-handler body, shared by both trigger variants.
    /// Takes only the raw register values needed to start an
    /// unwind; never allocates, never logs, never locks a mutex that
    /// control-path code might also be holding.
    fn on_signal(&self, pc: u64, fp: u64) {
        thread_local! {
            static IN_HANDLER: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
        }

        let reentered = IN_HANDLER.with(|f| {
            if f.get() {
                true
            } else {
                f.set(true);
                false
            }
        });
        if reentered {
            // Nesting guard: disables re-entry while the
            // interrupted code was itself inside this handler (e.g. a
            // nested signal of the same kind).
            self.stats.record_reentry_bounce();
            return;
        }

        // If a dynamic-load event has happened since the snapshot this
        // sample would be tagged with, drop it silently rather than risk
        // resolving against a stale LibraryMap.
        if dl_watch::generation() != self.snapshot_generation_baseline.load(Ordering::Acquire) {
            self.stats.record_dropped_snapshot_race();
            IN_HANDLER.with(|f| f.set(false));
            return;
        }

        // Step 1: frame-pointer walk, bounded to max_stack_depth.
        let stack = unsafe { capture_stack_by_frame_pointer(pc, fp, self.max_stack_depth) };

        // Steps 3-4: form the CallStack value (already done above) and
        // record it into the fixed-capacity SampleMap.
        match self.sample_map.record(stack) {
            perflow_core::InsertResult::CapacityExceeded => {
                self.stats.record_dropped_capacity();
            }
            _ => {
                self.stats.record_captured();
            }
        }

        IN_HANDLER.with(|f| f.set(false));
        // Step 5 (re-arming) is the signal source's responsibility; see
        // `handler_entry` below for the PMU one-shot refresh.
    }
}

static ACTIVE_SAMPLER: AtomicPtr<SamplerInner> = AtomicPtr::new(ptr::null_mut());
static ACTIVE_SIGNAL: AtomicU32 = AtomicU32::new(0);

extern "C" fn handler_entry(signum: i32, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let ptr = ACTIVE_SAMPLER.load(Ordering::Acquire);
    if ptr.is_null() {
        return;
    }
    let inner = unsafe { &*ptr };

    let (pc, fp) = unsafe { pc_and_fp_from_ucontext(ctx) };
    inner.on_signal(pc, fp);

    // Re-arm the PMU counter for one more overflow. The interval-timer
    // variant re-arms itself (`setitimer` with a nonzero `it_interval`
    // already repeats), so nothing further is needed there.
    if signum == PMU_OVERFLOW_SIGNAL {
        let fd = unsafe { (*info).si_fd() };
        crate::signal_source::pmu::rearm(fd);
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn pc_and_fp_from_ucontext(ctx: *mut libc::c_void) -> (u64, u64) {
    let ucontext = ctx as *mut libc::ucontext_t;
    if ucontext.is_null() {
        return (0, 0);
    }
    let mctx = &(*ucontext).uc_mcontext;
    let pc = mctx.gregs[libc::REG_RIP as usize] as u64;
    let fp = mctx.gregs[libc::REG_RBP as usize] as u64;
    (pc, fp)
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn pc_and_fp_from_ucontext(_ctx: *mut libc::c_void) -> (u64, u64) {
    // Other architectures need their own mcontext register layout; left
    // unimplemented rather than guessing register indices.
    (0, 0)
}

/// The periodic signal source whose handler captures call stacks.
/// Construct one per sampled process (normally exactly one, created by the
/// preloaded agent's library-load constructor).
pub struct Sampler {
    config: SamplerConfig,
    state: SamplerState,
    inner: Arc<SamplerInner>,
    source: Box<dyn SignalSource>,
    variant: SamplerVariant,
    rank: u32,
}

impl Sampler {
    pub fn new(config: SamplerConfig, variant: SamplerVariant) -> Self {
        let inner = Arc::new(SamplerInner {
            sample_map: SampleMap::with_capacity(config.sample_capacity),
            library_registry: Mutex::new(LibraryMapRegistry::new()),
            current_snapshot_id: AtomicU32::new(0),
            snapshot_generation_baseline: AtomicU32::new(dl_watch::generation()),
            stats: SamplerStats::default(),
            max_stack_depth: config.max_stack_depth,
        });
        let source: Box<dyn SignalSource> = match variant {
            SamplerVariant::HardwarePmu(PmuEventKind::CpuCycles) => Box::new(PmuSource::new(PmuEvent::CpuCycles)),
            SamplerVariant::HardwarePmu(PmuEventKind::Instructions) => {
                Box::new(PmuSource::new(PmuEvent::Instructions))
            }
            SamplerVariant::IntervalTimer => Box::new(TimerSource::new()),
        };
        Self { config, state: SamplerState::Uninitialized, inner, source, variant, rank: 0 }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn stats(&self) -> SamplerStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// `initialize`: builds the first library-map snapshot (id 0) and
    /// installs the signal handler, but does not yet arm the source.
    /// Fails if not in `Uninitialized`/`Stopped`.
    pub fn initialize(&mut self) -> Result<(), SamplerError> {
        if !matches!(self.state, SamplerState::Uninitialized | SamplerState::Stopped) {
            return Err(SamplerError::InvalidState {
                operation: "initialize",
                expected: "Uninitialized or Stopped",
                actual: self.state,
            });
        }

        let regions = read_self_maps();
        let snapshot = LibraryMap::from_regions(regions);
        let mut registry = self.inner.library_registry.lock();
        let id = registry.register(snapshot);
        self.inner.current_snapshot_id.store(id, Ordering::Release);
        self.inner
            .snapshot_generation_baseline
            .store(dl_watch::generation(), Ordering::Release);
        drop(registry);

        install_signal_handler(self.signal_number());
        self.state = SamplerState::Initialized;
        Ok(())
    }

    fn signal_number(&self) -> i32 {
        match self.variant {
            SamplerVariant::HardwarePmu(_) => PMU_OVERFLOW_SIGNAL,
            SamplerVariant::IntervalTimer => TIMER_SIGNAL,
        }
    }

    /// `start`: arms the signal source. Valid from `Initialized` or
    /// `Stopped`; fails with an `initialization-error`-equivalent
    /// otherwise.
    pub fn start(&mut self) -> Result<(), SamplerError> {
        if !matches!(self.state, SamplerState::Initialized | SamplerState::Stopped) {
            return Err(SamplerError::InvalidState {
                operation: "start",
                expected: "Initialized or Stopped",
                actual: self.state,
            });
        }
        self.rank = mpi_rank::resolved_rank();
        ACTIVE_SAMPLER.store(Arc::as_ptr(&self.inner) as *mut SamplerInner, Ordering::Release);
        ACTIVE_SIGNAL.store(self.signal_number() as u32, Ordering::Release);
        self.source.arm(self.config.frequency_hz)?;
        self.state = SamplerState::Running;
        Ok(())
    }

    /// `stop`: disarms the signal source and uses a memory fence, not a
    /// lock, so any in-flight handler invocation observes the stop.
    pub fn stop(&mut self) -> Result<(), SamplerError> {
        if self.state != SamplerState::Running {
            return Err(SamplerError::InvalidState {
                operation: "stop",
                expected: "Running",
                actual: self.state,
            });
        }
        self.source.disarm()?;
        ACTIVE_SAMPLER.store(ptr::null_mut(), Ordering::Release);
        std::sync::atomic::fence(Ordering::SeqCst);
        self.state = SamplerState::Stopped;
        Ok(())
    }

    /// Rebuilds the library-map snapshot if a dynamic-load event has
    /// occurred since the baseline the handler is checking against. Safe
    /// to call from `flush`/periodically from the control path; never
    /// called from the handler itself.
    pub fn check_for_dynamic_load_events(&mut self) {
        let current_generation = dl_watch::generation();
        if current_generation == self.inner.snapshot_generation_baseline.load(Ordering::Acquire) {
            return;
        }
        let snapshot = LibraryMap::from_regions(read_self_maps());
        let mut registry = self.inner.library_registry.lock();
        let id = registry.register(snapshot);
        self.inner.current_snapshot_id.store(id, Ordering::Release);
        self.inner.snapshot_generation_baseline.store(current_generation, Ordering::Release);
    }

    /// `flush`: serializes the current `SampleMap` and the current
    /// `LibraryMap` snapshots to the per-rank store. Valid in `Initialized`
    /// or `Stopped`; idempotent.
    pub fn flush(&mut self) -> Result<(), SamplerError> {
        if !matches!(self.state, SamplerState::Initialized | SamplerState::Stopped) {
            return Err(SamplerError::InvalidState {
                operation: "flush",
                expected: "Initialized or Stopped",
                actual: self.state,
            });
        }
        self.check_for_dynamic_load_events();

        let exporter = StoreExporter::new(&self.config.output_directory, &self.config.output_filename_prefix);
        let entries = self.inner.sample_map.snapshot();
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        exporter.write_samples(
            self.rank,
            &entries,
            self.config.max_stack_depth as u32,
            timestamp_ns,
            self.config.compress_output,
        )?;

        let registry = self.inner.library_registry.lock();
        exporter.write_library_maps(self.rank, registry.snapshots())?;
        Ok(())
    }
}

fn read_self_maps() -> Vec<proc_maps::MapRegion> {
    match std::fs::read_to_string("/proc/self/maps") {
        Ok(text) => proc_maps::parse(&text),
        Err(_) => Vec::new(),
    }
}

fn install_signal_handler(signum: i32) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler_entry as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(signum, &action, ptr::null_mut());
    }
}
