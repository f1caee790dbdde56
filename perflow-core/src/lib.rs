//! Async-signal-safe call-stack representation and fixed-capacity
//! aggregation for PerFlow: `CallStack`, `StaticHashMap`, and the
//! `SampleMap` built on top of them.

pub mod call_stack;
pub mod sample_map;
pub mod static_hash_map;

pub use call_stack::{CallStack, CallStackSample, MAX_STACK_DEPTH};
pub use sample_map::SampleMap;
pub use static_hash_map::{InsertResult, StaticHashKey, StaticHashMap, TARGET_LOAD_FACTOR};
