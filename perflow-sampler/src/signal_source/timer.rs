//! A per-process interval timer delivering `SIGPROF` every
//! `1/frequency_hz` seconds. Uses `setitimer(ITIMER_PROF)`,
//! the POSIX-portable fallback when no hardware PMU is available (or when
//! running under a hypervisor that virtualizes it away).

use std::io;

use crate::error::SamplerError;
use crate::signal_source::SignalSource;

pub const TIMER_SIGNAL: i32 = libc::SIGPROF;

#[derive(Default)]
pub struct TimerSource {
    armed: bool,
}

impl TimerSource {
    pub fn new() -> Self {
        Self::default()
    }
}

fn itimerval_for_frequency(frequency_hz: u32) -> libc::itimerval {
    let period_us = 1_000_000u64 / frequency_hz.max(1) as u64;
    let interval = libc::timeval {
        tv_sec: (period_us / 1_000_000) as libc::time_t,
        tv_usec: (period_us % 1_000_000) as libc::suseconds_t,
    };
    libc::itimerval { it_interval: interval, it_value: interval }
}

impl SignalSource for TimerSource {
    fn arm(&mut self, frequency_hz: u32) -> Result<(), SamplerError> {
        let new_value = itimerval_for_frequency(frequency_hz);
        let rc = unsafe {
            libc::setitimer(libc::ITIMER_PROF, &new_value, std::ptr::null_mut())
        };
        if rc != 0 {
            return Err(SamplerError::SourceArmFailed(format!(
                "setitimer: {}",
                io::Error::last_os_error()
            )));
        }
        self.armed = true;
        Ok(())
    }

    fn disarm(&mut self) -> Result<(), SamplerError> {
        if !self.armed {
            return Ok(());
        }
        let zero = libc::itimerval {
            it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
            it_value: libc::timeval { tv_sec: 0, tv_usec: 0 },
        };
        let rc = unsafe { libc::setitimer(libc::ITIMER_PROF, &zero, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(SamplerError::SourceArmFailed(format!(
                "setitimer(disarm): {}",
                io::Error::last_os_error()
            )));
        }
        self.armed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequency_to_interval_conversion() {
        let itv = itimerval_for_frequency(1000);
        assert_eq!(itv.it_interval.tv_sec, 0);
        assert_eq!(itv.it_interval.tv_usec, 1000);
    }

    #[test]
    fn low_frequency_spans_whole_seconds() {
        let itv = itimerval_for_frequency(2);
        assert_eq!(itv.it_interval.tv_sec, 0);
        assert_eq!(itv.it_interval.tv_usec, 500_000);
    }
}
