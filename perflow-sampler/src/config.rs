//! Sampler configuration, sourced entirely from environment variables — a
//! preloaded agent has no argv of its own, so (mirroring how samply's own
//! in-process agents such as `samply-in-process` and `samply-mac-preload`
//! are driven by the launching process rather than by flags) every knob
//! lives in `PERFLOW_*`.

use std::env;
use std::path::PathBuf;

use perflow_core::MAX_STACK_DEPTH;

pub const DEFAULT_SAMPLING_FREQ_HZ: u32 = 1000;
pub const DEFAULT_SAMPLE_CAPACITY: usize = 65_536;

/// Resolved sampler configuration. Constructed once via [`SamplerConfig::from_env`]
/// at library-load time.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub output_directory: PathBuf,
    pub output_filename_prefix: String,
    pub frequency_hz: u32,
    pub max_stack_depth: usize,
    pub compress_output: bool,
    pub flush_interval_seconds: Option<u64>,
    /// `SampleMap` capacity. Treated as a pure configuration parameter
    /// with a default generous enough for typical unique-stack
    /// cardinality.
    pub sample_capacity: usize,
    pub symbol_debug: bool,
}

impl SamplerConfig {
    pub fn from_env() -> Self {
        Self {
            output_directory: env::var_os("PERFLOW_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(env::temp_dir),
            output_filename_prefix: "perflow".to_owned(),
            frequency_hz: env_u32("PERFLOW_SAMPLING_FREQ").unwrap_or(DEFAULT_SAMPLING_FREQ_HZ),
            max_stack_depth: env_usize("PERFLOW_MAX_STACK_DEPTH")
                .unwrap_or(MAX_STACK_DEPTH)
                .min(MAX_STACK_DEPTH),
            compress_output: env_flag("PERFLOW_COMPRESS"),
            flush_interval_seconds: env_u64("PERFLOW_FLUSH_INTERVAL_SECS"),
            sample_capacity: env_usize("PERFLOW_SAMPLE_CAPACITY").unwrap_or(DEFAULT_SAMPLE_CAPACITY),
            symbol_debug: env_flag("PERFLOW_SYMBOL_DEBUG"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1").unwrap_or(false)
}

fn env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        // SAFETY-equivalent: serialize env-var tests to avoid cross-test
        // interference; this test only clears keys it itself reads.
        for key in [
            "PERFLOW_OUTPUT_DIR",
            "PERFLOW_SAMPLING_FREQ",
            "PERFLOW_MAX_STACK_DEPTH",
            "PERFLOW_COMPRESS",
            "PERFLOW_FLUSH_INTERVAL_SECS",
            "PERFLOW_SAMPLE_CAPACITY",
            "PERFLOW_SYMBOL_DEBUG",
        ] {
            env::remove_var(key);
        }
        let cfg = SamplerConfig::from_env();
        assert_eq!(cfg.frequency_hz, DEFAULT_SAMPLING_FREQ_HZ);
        assert_eq!(cfg.max_stack_depth, MAX_STACK_DEPTH);
        assert!(!cfg.compress_output);
        assert_eq!(cfg.sample_capacity, DEFAULT_SAMPLE_CAPACITY);
    }
}
