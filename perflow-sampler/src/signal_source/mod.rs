//! The two interchangeable sample-trigger variants: a hardware PMU
//! overflow counter, or a per-process interval timer. Both
//! deliver a profiling signal to the thread to be sampled; the sampler's
//! signal handler (`crate::sampler`) is shared between them.

pub mod pmu;
pub mod timer;

use crate::error::SamplerError;

/// A periodic signal source that can be armed and disarmed. Both
/// [`pmu::PmuSource`] and [`timer::TimerSource`] implement this so
/// [`crate::sampler::Sampler`] can treat them interchangeably.
pub trait SignalSource: Send {
    /// Arms the source so it begins delivering the profiling signal at
    /// approximately `frequency_hz`.
    fn arm(&mut self, frequency_hz: u32) -> Result<(), SamplerError>;

    /// Disarms the source. Idempotent.
    fn disarm(&mut self) -> Result<(), SamplerError>;
}
